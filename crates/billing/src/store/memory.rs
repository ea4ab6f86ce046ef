//! In-memory store
//!
//! Single-mutex backing for the storage traits, used by the test suites and
//! for local development without a database. Every operation is trivially
//! atomic under the lock. Saves are mirrored into an in-process change log,
//! matching what the Postgres adapter writes to `lifecycle_events`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use renova_shared::{Invoice, Payment, Plan, Subscription, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::events::{ChangeKind, ChangeRecord};

use super::{InvoiceStore, PlanCatalog, ProfileDirectory, SubscriptionStore};

#[derive(Default)]
struct Inner {
    plans: HashMap<Uuid, Plan>,
    subscriptions: HashMap<Uuid, Subscription>,
    invoices: HashMap<Uuid, Invoice>,
    payments: Vec<Payment>,
    countries: HashMap<Uuid, String>,
    changes: Vec<ChangeRecord>,
    /// Subscription ids whose writes are forced to fail, for exercising
    /// batch failure isolation.
    failing: HashSet<Uuid>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -------------------------------------------------------------------
    // Seeding and inspection helpers
    // -------------------------------------------------------------------

    pub fn insert_plan(&self, plan: Plan) {
        self.lock().plans.insert(plan.id, plan);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.lock()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn insert_invoice(&self, invoice: Invoice) {
        self.lock().invoices.insert(invoice.id, invoice);
    }

    pub fn set_country(&self, user_id: Uuid, country: &str) {
        self.lock().countries.insert(user_id, country.to_string());
    }

    /// Force every write for this subscription to fail with a transient
    /// error.
    pub fn fail_writes_for(&self, subscription_id: Uuid) {
        self.lock().failing.insert(subscription_id);
    }

    pub fn subscription(&self, id: Uuid) -> Option<Subscription> {
        self.lock().subscriptions.get(&id).cloned()
    }

    pub fn invoices_for(&self, subscription_id: Uuid) -> Vec<Invoice> {
        self.lock()
            .invoices
            .values()
            .filter(|i| i.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.lock().payments.clone()
    }

    pub fn change_log(&self) -> Vec<ChangeRecord> {
        self.lock().changes.clone()
    }

    fn check_writable(inner: &Inner, subscription_id: Uuid) -> BillingResult<()> {
        if inner.failing.contains(&subscription_id) {
            return Err(BillingError::Transient(format!(
                "simulated write failure for subscription {}",
                subscription_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.lock().subscriptions.get(&id).cloned())
    }

    async fn find_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn find_due_for_renewal(&self, date: NaiveDate) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active && s.next_billing_date <= date)
            .cloned()
            .collect())
    }

    async fn save(&self, subscription: &Subscription) -> BillingResult<()> {
        let mut inner = self.lock();
        Self::check_writable(&inner, subscription.id)?;

        let change = if inner.subscriptions.contains_key(&subscription.id) {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        inner
            .subscriptions
            .insert(subscription.id, subscription.clone());
        inner
            .changes
            .push(ChangeRecord::subscription(change, subscription));
        Ok(())
    }

    async fn save_with_invoice(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        expected_next_billing_date: NaiveDate,
    ) -> BillingResult<()> {
        let mut inner = self.lock();
        Self::check_writable(&inner, subscription.id)?;

        let stored = inner
            .subscriptions
            .get(&subscription.id)
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription.id)))?;
        if stored.next_billing_date != expected_next_billing_date {
            return Err(BillingError::Transient(format!(
                "subscription {} was already billed for this cycle",
                subscription.id
            )));
        }

        inner
            .subscriptions
            .insert(subscription.id, subscription.clone());
        inner.invoices.insert(invoice.id, invoice.clone());
        inner
            .changes
            .push(ChangeRecord::subscription(ChangeKind::Updated, subscription));
        inner
            .changes
            .push(ChangeRecord::invoice(ChangeKind::Created, invoice));
        Ok(())
    }

    async fn count_by_status(&self, status: SubscriptionStatus) -> BillingResult<i64> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.status == status)
            .count() as i64)
    }
}

#[async_trait]
impl InvoiceStore for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.lock().invoices.get(&id).cloned())
    }

    async fn find_by_subscription(&self, subscription_id: Uuid) -> BillingResult<Vec<Invoice>> {
        Ok(self.invoices_for(subscription_id))
    }

    async fn find_overdue(&self, cutoff: NaiveDate) -> BillingResult<Vec<Invoice>> {
        Ok(self
            .lock()
            .invoices
            .values()
            .filter(|i| i.is_unpaid() && i.due_date < cutoff)
            .cloned()
            .collect())
    }

    async fn save(&self, invoice: &Invoice) -> BillingResult<()> {
        let mut inner = self.lock();
        Self::check_writable(&inner, invoice.subscription_id)?;

        let change = if inner.invoices.contains_key(&invoice.id) {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        inner.invoices.insert(invoice.id, invoice.clone());
        inner.changes.push(ChangeRecord::invoice(change, invoice));
        Ok(())
    }

    async fn record_payment(&self, invoice: &Invoice, payment: &Payment) -> BillingResult<()> {
        let mut inner = self.lock();
        Self::check_writable(&inner, invoice.subscription_id)?;

        inner.invoices.insert(invoice.id, invoice.clone());
        inner.payments.push(payment.clone());
        inner
            .changes
            .push(ChangeRecord::invoice(ChangeKind::Updated, invoice));
        inner.changes.push(ChangeRecord::payment(payment));
        Ok(())
    }

    async fn count_pending(&self) -> BillingResult<i64> {
        Ok(self
            .lock()
            .invoices
            .values()
            .filter(|i| i.status == renova_shared::InvoiceStatus::Pending)
            .count() as i64)
    }
}

#[async_trait]
impl PlanCatalog for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Plan>> {
        Ok(self.lock().plans.get(&id).cloned())
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryStore {
    async fn country_of(&self, user_id: Uuid) -> BillingResult<Option<String>> {
        Ok(self.lock().countries.get(&user_id).cloned())
    }
}
