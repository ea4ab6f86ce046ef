//! Common types used across Renova

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Plan ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PlanId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Subscription ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Invoice ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub Uuid);

impl InvoiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvoiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for InvoiceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Payment ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PaymentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Operational state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Delinquent,
    Suspended,
    Cancelled,
    Expired,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl SubscriptionStatus {
    /// Terminal states never transition again on their own; only a cancelled
    /// subscription can be manually reactivated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// States eligible for manual reactivation
    pub fn can_reactivate(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Suspended | Self::Delinquent)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Delinquent => write!(f, "delinquent"),
            Self::Suspended => write!(f, "suspended"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "delinquent" => Ok(Self::Delinquent),
            "suspended" => Ok(Self::Suspended),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Invoice status
///
/// `Overdue` is honored when present in stored data but the engine never
/// writes it; lateness is derived at read time from the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl InvoiceStatus {
    /// Whether this invoice still awaits payment
    pub fn is_unpaid(&self) -> bool {
        matches!(self, Self::Pending | Self::Overdue)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Overdue => write!(f, "overdue"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid invoice status: {}", s)),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Plan catalog entry. Read-only input to the billing engine; the engine
/// references plans and snapshots their price, it never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub monthly_price: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Subscription model
///
/// `current_price` is the price actually being charged; after a plan change
/// it is re-snapshotted from the new plan and may differ from the catalog
/// price of older invoices.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Date the next monthly charge is due. Always set while the
    /// subscription is active or delinquent.
    pub next_billing_date: NaiveDate,
    pub auto_renew: bool,
    pub current_price: Decimal,
    pub cancellation_date: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the subscription is due for its monthly charge
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.next_billing_date <= today
    }
}

/// Invoice model. Immutable once created except for the payment fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    /// Human-readable number: "FAC-" + 8 uppercase hex chars for monthly
    /// charges, "PRO-" + 8 uppercase hex chars for prorations.
    pub number: String,
    pub subscription_id: Uuid,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    /// Applied tax rate in percent (e.g. 21.00)
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub status: InvoiceStatus,
    pub is_proration: bool,
    pub paid_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Whether this invoice still awaits payment
    pub fn is_unpaid(&self) -> bool {
        self.status.is_unpaid()
    }

    /// Derived lateness: unpaid and past its due date
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_unpaid() && self.due_date < today
    }

    /// Days past the due date, 0 if not yet due
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days().max(0)
    }
}

// =============================================================================
// Payments
// =============================================================================

/// How an invoice was settled. One variant per supported instrument, each
/// carrying its own masking and validity rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    Card {
        card_number: String,
        holder: String,
        expiry_month: u32,
        expiry_year: i32,
    },
    Paypal {
        email: String,
        transaction_ref: String,
    },
    BankTransfer {
        bank_name: String,
        account_number: String,
        reference: String,
    },
}

impl PaymentMethod {
    /// Display form safe for logs and receipts. Never exposes a full card
    /// or account number.
    pub fn masked_display(&self) -> String {
        match self {
            Self::Card { card_number, .. } => {
                let digits: String = card_number.chars().filter(|c| c.is_ascii_digit()).collect();
                let tail = if digits.len() >= 4 {
                    &digits[digits.len() - 4..]
                } else {
                    "????"
                };
                format!("**** **** **** {}", tail)
            }
            Self::Paypal { email, .. } => match email.split_once('@') {
                Some((local, domain)) if !local.is_empty() => {
                    let first = &local[..local.chars().next().map_or(0, char::len_utf8)];
                    format!("{}***@{}", first, domain)
                }
                _ => "***".to_string(),
            },
            Self::BankTransfer { account_number, .. } => {
                let tail = if account_number.len() >= 4 {
                    &account_number[account_number.len() - 4..]
                } else {
                    "????"
                };
                format!("****{}", tail)
            }
        }
    }

    /// Basic validity: required fields present, card not expired relative
    /// to the supplied date.
    pub fn is_valid(&self, today: NaiveDate) -> bool {
        match self {
            Self::Card {
                card_number,
                holder,
                expiry_month,
                expiry_year,
            } => {
                let digits = card_number.chars().filter(|c| c.is_ascii_digit()).count();
                if !(13..=19).contains(&digits) || holder.trim().is_empty() {
                    return false;
                }
                if !(1..=12).contains(expiry_month) {
                    return false;
                }
                // A card is usable through the last day of its expiry month
                *expiry_year > today.year()
                    || (*expiry_year == today.year() && *expiry_month >= today.month())
            }
            Self::Paypal {
                email,
                transaction_ref,
            } => email.contains('@') && !transaction_ref.trim().is_empty(),
            Self::BankTransfer {
                bank_name,
                account_number,
                reference,
            } => {
                !bank_name.trim().is_empty()
                    && !account_number.trim().is_empty()
                    && !reference.trim().is_empty()
            }
        }
    }
}

/// A recorded settlement of an invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
}

// =============================================================================
// Aggregates
// =============================================================================

/// Per-status subscription counts plus the pending-invoice backlog
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LifecycleStats {
    pub active: i64,
    pub delinquent: i64,
    pub suspended: i64,
    pub cancelled: i64,
    pub expired: i64,
    pub pending_invoices: i64,
}

/// Result of one batch entry point: items transitioned or invoiced, and
/// items whose individual transaction failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: u32,
    pub errors: u32,
}

impl BatchOutcome {
    pub fn record_success(&mut self) {
        self.processed += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================
