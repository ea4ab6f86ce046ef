//! Storage collaborator contracts
//!
//! The engine reads and writes entities only through these traits. Two
//! backings ship with the workspace: [`postgres::PgStore`] for production
//! and [`memory::InMemoryStore`] for tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use renova_shared::{Invoice, Payment, Plan, Subscription, SubscriptionStatus};

use crate::error::BillingResult;

/// Subscription persistence
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    async fn find_by_status(&self, status: SubscriptionStatus)
        -> BillingResult<Vec<Subscription>>;

    /// Active subscriptions whose `next_billing_date` is on or before the
    /// given date.
    async fn find_due_for_renewal(&self, date: NaiveDate) -> BillingResult<Vec<Subscription>>;

    async fn save(&self, subscription: &Subscription) -> BillingResult<()>;

    /// Persist an updated subscription together with a freshly generated
    /// invoice, atomically: both commit or neither does.
    ///
    /// `expected_next_billing_date` is the billing date the caller read
    /// before generating the invoice; implementations must fail with
    /// [`crate::BillingError::Transient`] when the stored value no longer
    /// matches, so a concurrent run cannot bill the same cycle twice.
    async fn save_with_invoice(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        expected_next_billing_date: NaiveDate,
    ) -> BillingResult<()>;

    async fn count_by_status(&self, status: SubscriptionStatus) -> BillingResult<i64>;
}

/// Invoice persistence
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Invoice>>;

    async fn find_by_subscription(&self, subscription_id: Uuid) -> BillingResult<Vec<Invoice>>;

    /// Unpaid (pending or stored-overdue) invoices with `due_date` strictly
    /// before the cutoff.
    async fn find_overdue(&self, cutoff: NaiveDate) -> BillingResult<Vec<Invoice>>;

    async fn save(&self, invoice: &Invoice) -> BillingResult<()>;

    /// Persist the settled invoice and its payment record atomically.
    async fn record_payment(&self, invoice: &Invoice, payment: &Payment) -> BillingResult<()>;

    async fn count_pending(&self) -> BillingResult<i64>;
}

/// Read-only plan catalog
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Plan>>;
}

/// Read-only profile lookup, used for tax-country resolution
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn country_of(&self, user_id: Uuid) -> BillingResult<Option<String>>;
}
