//! Subscription lifecycle state machine
//!
//! Owns every mutation of a subscription's status and billing date:
//! scheduled renewals, the dunning ladder (delinquent, suspended, expired),
//! and the manual operations (cancel, reactivate, auto-renew toggle, plan
//! change). No other component writes these fields.
//!
//! Dunning thresholds are measured from the invoice **due date**, not from
//! when the subscription entered its current state. A subscription first
//! observed with a long-overdue invoice can therefore walk several rungs of
//! the ladder across one day's successive batch runs.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use renova_shared::{
    BatchOutcome, Clock, LifecycleStats, PlanId, Subscription, SubscriptionId, SubscriptionStatus,
};

use crate::error::{BillingError, BillingResult};
use crate::invoice::{InvoiceGenerator, BILLING_CYCLE_DAYS};
use crate::proration::calculate_proration;
use crate::store::{InvoiceStore, PlanCatalog, SubscriptionStore};

/// Days past an invoice's due date before an active subscription is marked
/// delinquent
pub const GRACE_DAYS: i64 = 7;

/// Days past due before a delinquent subscription is suspended
pub const SUSPEND_AFTER_DAYS: i64 = 30;

/// Days past due before a suspended subscription expires
pub const EXPIRE_AFTER_DAYS: i64 = 60;

const AUTO_EXPIRY_REASON: &str = "Expired automatically after prolonged non-payment";
const DEFAULT_CANCEL_REASON: &str = "Cancellation requested by user";

/// Outcomes of one full daily cycle, in execution order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub renewals: BatchOutcome,
    pub delinquencies: BatchOutcome,
    pub suspensions: BatchOutcome,
    pub expirations: BatchOutcome,
}

pub struct LifecycleService {
    subscriptions: Arc<dyn SubscriptionStore>,
    invoices: Arc<dyn InvoiceStore>,
    plans: Arc<dyn PlanCatalog>,
    generator: InvoiceGenerator,
    clock: Arc<dyn Clock>,
}

impl LifecycleService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        invoices: Arc<dyn InvoiceStore>,
        plans: Arc<dyn PlanCatalog>,
        generator: InvoiceGenerator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            invoices,
            plans,
            generator,
            clock,
        }
    }

    /// Whether the subscription has any invoice still awaiting payment
    async fn has_unpaid_invoices(&self, subscription: &Subscription) -> BillingResult<bool> {
        let invoices = self.invoices.find_by_subscription(subscription.id).await?;
        Ok(invoices.iter().any(|i| i.is_unpaid()))
    }

    async fn load(&self, id: SubscriptionId) -> BillingResult<Subscription> {
        self.subscriptions
            .find_by_id(id.0)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", id.0)))
    }

    // =======================================================================
    // Batch entry points
    // =======================================================================

    /// Bill every active subscription whose billing date has arrived.
    ///
    /// A subscription is skipped (not an error) when auto-renew is off or
    /// when unpaid invoices are outstanding; it is then picked up by the
    /// dunning jobs instead. Re-running on the same day is a no-op for
    /// already-billed subscriptions because their billing date has advanced.
    pub async fn process_renewals(&self) -> BillingResult<BatchOutcome> {
        let today = self.clock.today();
        tracing::info!(%today, "Starting renewal run");

        let due = self.subscriptions.find_due_for_renewal(today).await?;
        let mut outcome = BatchOutcome::default();

        for mut subscription in due {
            if !subscription.auto_renew {
                tracing::info!(
                    subscription_id = %subscription.id,
                    "Auto-renew disabled, skipping renewal"
                );
                continue;
            }
            match self.renew_one(&mut subscription).await {
                Ok(true) => outcome.record_success(),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Renewal failed"
                    );
                    outcome.record_error();
                }
            }
        }

        tracing::info!(
            renewed = outcome.processed,
            errors = outcome.errors,
            "Renewal run complete"
        );
        Ok(outcome)
    }

    async fn renew_one(&self, subscription: &mut Subscription) -> BillingResult<bool> {
        if self.has_unpaid_invoices(subscription).await? {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Unpaid invoices outstanding, skipping renewal"
            );
            return Ok(false);
        }

        self.generator.generate_monthly(subscription).await?;
        Ok(true)
    }

    /// Mark active subscriptions delinquent when an invoice is more than
    /// [`GRACE_DAYS`] past due.
    pub async fn process_delinquencies(&self) -> BillingResult<BatchOutcome> {
        let today = self.clock.today();
        let cutoff = today - Duration::days(GRACE_DAYS);
        tracing::info!(%today, %cutoff, "Starting delinquency run");

        let overdue = self.invoices.find_overdue(cutoff).await?;
        let mut outcome = BatchOutcome::default();

        for invoice in overdue {
            match self.mark_delinquent(invoice.subscription_id, &invoice.number).await {
                Ok(true) => outcome.record_success(),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %invoice.subscription_id,
                        error = %e,
                        "Delinquency transition failed"
                    );
                    outcome.record_error();
                }
            }
        }

        tracing::info!(
            marked = outcome.processed,
            errors = outcome.errors,
            "Delinquency run complete"
        );
        Ok(outcome)
    }

    async fn mark_delinquent(
        &self,
        subscription_id: uuid::Uuid,
        invoice_number: &str,
    ) -> BillingResult<bool> {
        let Some(mut subscription) = self.subscriptions.find_by_id(subscription_id).await? else {
            return Ok(false);
        };
        if subscription.status != SubscriptionStatus::Active {
            return Ok(false);
        }

        subscription.status = SubscriptionStatus::Delinquent;
        subscription.updated_at = self.clock.now();
        self.subscriptions.save(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            invoice_number = %invoice_number,
            "Subscription marked delinquent"
        );
        Ok(true)
    }

    /// Suspend delinquent subscriptions holding an invoice more than
    /// [`SUSPEND_AFTER_DAYS`] past due.
    pub async fn process_suspensions(&self) -> BillingResult<BatchOutcome> {
        let cutoff = self.clock.today() - Duration::days(SUSPEND_AFTER_DAYS);
        tracing::info!(%cutoff, "Starting suspension run");

        let delinquent = self
            .subscriptions
            .find_by_status(SubscriptionStatus::Delinquent)
            .await?;
        let mut outcome = BatchOutcome::default();

        for mut subscription in delinquent {
            match self.overdue_past(&subscription, cutoff).await {
                Ok(false) => {}
                Ok(true) => {
                    subscription.status = SubscriptionStatus::Suspended;
                    subscription.updated_at = self.clock.now();
                    match self.subscriptions.save(&subscription).await {
                        Ok(()) => {
                            tracing::info!(
                                subscription_id = %subscription.id,
                                "Subscription suspended for prolonged non-payment"
                            );
                            outcome.record_success();
                        }
                        Err(e) => {
                            tracing::error!(
                                subscription_id = %subscription.id,
                                error = %e,
                                "Suspension failed"
                            );
                            outcome.record_error();
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Suspension check failed"
                    );
                    outcome.record_error();
                }
            }
        }

        tracing::info!(
            suspended = outcome.processed,
            errors = outcome.errors,
            "Suspension run complete"
        );
        Ok(outcome)
    }

    /// Expire suspended subscriptions holding an invoice more than
    /// [`EXPIRE_AFTER_DAYS`] past due. Expiry is terminal: auto-renew is
    /// switched off and the cancellation fields are stamped.
    pub async fn process_expirations(&self) -> BillingResult<BatchOutcome> {
        let cutoff = self.clock.today() - Duration::days(EXPIRE_AFTER_DAYS);
        tracing::info!(%cutoff, "Starting expiration run");

        let suspended = self
            .subscriptions
            .find_by_status(SubscriptionStatus::Suspended)
            .await?;
        let mut outcome = BatchOutcome::default();

        for mut subscription in suspended {
            match self.overdue_past(&subscription, cutoff).await {
                Ok(false) => {}
                Ok(true) => {
                    subscription.status = SubscriptionStatus::Expired;
                    subscription.auto_renew = false;
                    subscription.cancellation_date = Some(self.clock.now());
                    subscription.cancellation_reason = Some(AUTO_EXPIRY_REASON.to_string());
                    subscription.updated_at = self.clock.now();
                    match self.subscriptions.save(&subscription).await {
                        Ok(()) => {
                            tracing::info!(
                                subscription_id = %subscription.id,
                                "Subscription expired for prolonged non-payment"
                            );
                            outcome.record_success();
                        }
                        Err(e) => {
                            tracing::error!(
                                subscription_id = %subscription.id,
                                error = %e,
                                "Expiration failed"
                            );
                            outcome.record_error();
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Expiration check failed"
                    );
                    outcome.record_error();
                }
            }
        }

        tracing::info!(
            expired = outcome.processed,
            errors = outcome.errors,
            "Expiration run complete"
        );
        Ok(outcome)
    }

    /// Whether the subscription holds an unpaid invoice due strictly before
    /// the cutoff.
    async fn overdue_past(
        &self,
        subscription: &Subscription,
        cutoff: chrono::NaiveDate,
    ) -> BillingResult<bool> {
        let invoices = self.invoices.find_by_subscription(subscription.id).await?;
        Ok(invoices
            .iter()
            .any(|i| i.is_unpaid() && i.due_date < cutoff))
    }

    /// Run the four batch jobs in dunning order. Later jobs must observe
    /// the writes of earlier ones, which sequential execution guarantees.
    pub async fn run_full_cycle(&self) -> BillingResult<CycleOutcome> {
        Ok(CycleOutcome {
            renewals: self.process_renewals().await?,
            delinquencies: self.process_delinquencies().await?,
            suspensions: self.process_suspensions().await?,
            expirations: self.process_expirations().await?,
        })
    }

    // =======================================================================
    // Manual operations
    // =======================================================================

    /// Cancel a subscription. Terminal states are rejected.
    pub async fn cancel_subscription(
        &self,
        id: SubscriptionId,
        reason: Option<String>,
    ) -> BillingResult<Subscription> {
        let mut subscription = self.load(id).await?;

        if subscription.status.is_terminal() {
            return Err(BillingError::InvalidStateTransition(format!(
                "subscription {} is already {}",
                subscription.id, subscription.status
            )));
        }

        subscription.status = SubscriptionStatus::Cancelled;
        subscription.auto_renew = false;
        subscription.cancellation_date = Some(self.clock.now());
        subscription.cancellation_reason =
            Some(reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()));
        subscription.updated_at = self.clock.now();
        self.subscriptions.save(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            reason = %subscription.cancellation_reason.as_deref().unwrap_or(""),
            "Subscription cancelled"
        );
        Ok(subscription)
    }

    /// Reactivate a cancelled, suspended, or delinquent subscription.
    /// Expired subscriptions are terminal; unpaid invoices must be settled
    /// first. A billing date already in the past restarts a fresh cycle
    /// from today.
    pub async fn reactivate_subscription(
        &self,
        id: SubscriptionId,
    ) -> BillingResult<Subscription> {
        let mut subscription = self.load(id).await?;
        let today = self.clock.today();

        if subscription.status == SubscriptionStatus::Expired {
            return Err(BillingError::InvalidStateTransition(format!(
                "subscription {} has expired; a new subscription must be created",
                subscription.id
            )));
        }
        if !subscription.status.can_reactivate() {
            return Err(BillingError::InvalidStateTransition(format!(
                "subscription {} is {} and cannot be reactivated",
                subscription.id, subscription.status
            )));
        }
        if self.has_unpaid_invoices(&subscription).await? {
            return Err(BillingError::InvalidStateTransition(format!(
                "subscription {} has unpaid invoices that must be settled before reactivation",
                subscription.id
            )));
        }

        subscription.status = SubscriptionStatus::Active;
        subscription.auto_renew = true;
        subscription.cancellation_date = None;
        subscription.cancellation_reason = None;
        if subscription.next_billing_date < today {
            subscription.next_billing_date = today + Duration::days(BILLING_CYCLE_DAYS);
        }
        subscription.updated_at = self.clock.now();
        self.subscriptions.save(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            next_billing_date = %subscription.next_billing_date,
            "Subscription reactivated"
        );
        Ok(subscription)
    }

    /// Enable or disable automatic renewal. Enabling on a terminal
    /// subscription is rejected; those never renew again.
    pub async fn toggle_auto_renew(
        &self,
        id: SubscriptionId,
        enabled: bool,
    ) -> BillingResult<Subscription> {
        let mut subscription = self.load(id).await?;

        if enabled && subscription.status.is_terminal() {
            return Err(BillingError::InvalidStateTransition(format!(
                "subscription {} is {}; auto-renew cannot be re-enabled",
                subscription.id, subscription.status
            )));
        }

        subscription.auto_renew = enabled;
        subscription.updated_at = self.clock.now();
        self.subscriptions.save(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            auto_renew = enabled,
            "Auto-renew toggled"
        );
        Ok(subscription)
    }

    /// Switch a subscription to another plan. Upgrades bill the remainder
    /// of the current cycle via a proration invoice; downgrades take effect
    /// at no immediate charge.
    pub async fn change_plan(
        &self,
        id: SubscriptionId,
        new_plan_id: PlanId,
    ) -> BillingResult<Subscription> {
        let mut subscription = self.load(id).await?;

        if subscription.status != SubscriptionStatus::Active {
            return Err(BillingError::InvalidStateTransition(format!(
                "subscription {} is {}; only active subscriptions can change plan",
                subscription.id, subscription.status
            )));
        }

        let new_plan = self
            .plans
            .find_by_id(new_plan_id.0)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {}", new_plan_id.0)))?;
        if !new_plan.active {
            return Err(BillingError::InvalidStateTransition(format!(
                "plan {} is no longer offered",
                new_plan.id
            )));
        }
        let old_plan = self
            .plans
            .find_by_id(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("plan {}", subscription.plan_id)))?;

        if new_plan.monthly_price > old_plan.monthly_price {
            let amount =
                calculate_proration(&subscription, &old_plan, &new_plan, self.clock.today());
            if amount > Decimal::ZERO {
                self.generator
                    .generate_proration(&subscription, &old_plan, &new_plan, amount)
                    .await?;
            }
        }

        subscription.plan_id = new_plan.id;
        subscription.current_price = new_plan.monthly_price;
        subscription.updated_at = self.clock.now();
        self.subscriptions.save(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            old_plan = %old_plan.name,
            new_plan = %new_plan.name,
            "Plan changed"
        );
        Ok(subscription)
    }

    // =======================================================================
    // Reporting
    // =======================================================================

    /// Per-status subscription counts and the pending-invoice backlog
    pub async fn statistics(&self) -> BillingResult<LifecycleStats> {
        Ok(LifecycleStats {
            active: self
                .subscriptions
                .count_by_status(SubscriptionStatus::Active)
                .await?,
            delinquent: self
                .subscriptions
                .count_by_status(SubscriptionStatus::Delinquent)
                .await?,
            suspended: self
                .subscriptions
                .count_by_status(SubscriptionStatus::Suspended)
                .await?,
            cancelled: self
                .subscriptions
                .count_by_status(SubscriptionStatus::Cancelled)
                .await?,
            expired: self
                .subscriptions
                .count_by_status(SubscriptionStatus::Expired)
                .await?,
            pending_invoices: self.invoices.count_pending().await?,
        })
    }
}
