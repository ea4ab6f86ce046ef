//! Postgres store
//!
//! sqlx-backed implementation of the storage traits. Every evaluate-and-
//! mutate step runs in a single transaction; renewal writes take a row lock
//! and re-check `next_billing_date` so a concurrent or re-entrant batch run
//! cannot produce a duplicate invoice. Each committed change also appends a
//! row to `lifecycle_events`.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use renova_shared::{Invoice, Payment, Plan, Subscription, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::events::{ChangeKind, ChangeRecord};

use super::{InvoiceStore, PlanCatalog, ProfileDirectory, SubscriptionStore};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, start_date, end_date, \
     next_billing_date, auto_renew, current_price, cancellation_date, \
     cancellation_reason, created_at, updated_at";

const INVOICE_COLUMNS: &str = "id, number, subscription_id, issue_date, due_date, subtotal, \
     tax_rate, tax_amount, total, status, is_proration, paid_date, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_change(
        tx: &mut Transaction<'_, Postgres>,
        record: &ChangeRecord,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lifecycle_events (id, entity, entity_id, change, snapshot, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.entity)
        .bind(record.entity_id)
        .bind(record.change)
        .bind(&record.snapshot)
        .bind(record.recorded_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update_subscription_row(
        tx: &mut Transaction<'_, Postgres>,
        subscription: &Subscription,
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan_id = $2,
                status = $3,
                start_date = $4,
                end_date = $5,
                next_billing_date = $6,
                auto_renew = $7,
                current_price = $8,
                cancellation_date = $9,
                cancellation_reason = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.plan_id)
        .bind(subscription.status)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.next_billing_date)
        .bind(subscription.auto_renew)
        .bind(subscription.current_price)
        .bind(subscription.cancellation_date)
        .bind(subscription.cancellation_reason.as_deref())
        .bind(subscription.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_invoice_row(
        tx: &mut Transaction<'_, Postgres>,
        invoice: &Invoice,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, number, subscription_id, issue_date, due_date, subtotal,
                                  tax_rate, tax_amount, total, status, is_proration, paid_date,
                                  created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.number)
        .bind(invoice.subscription_id)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.total)
        .bind(invoice.status)
        .bind(invoice.is_proration)
        .bind(invoice.paid_date)
        .bind(invoice.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    async fn find_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> BillingResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE status = $1 ORDER BY created_at",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    async fn find_due_for_renewal(&self, date: NaiveDate) -> BillingResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions \
             WHERE status = 'active' AND next_billing_date <= $1 \
             ORDER BY next_billing_date",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    async fn save(&self, subscription: &Subscription) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let rows = Self::update_subscription_row(&mut tx, subscription).await?;
        if rows == 0 {
            return Err(BillingError::NotFound(format!(
                "subscription {}",
                subscription.id
            )));
        }
        Self::append_change(
            &mut tx,
            &ChangeRecord::subscription(ChangeKind::Updated, subscription),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_with_invoice(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        expected_next_billing_date: NaiveDate,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        // Row lock, then re-check the billing date: if another run already
        // advanced it, this cycle has been billed and we must not bill it
        // again.
        let current: Option<(NaiveDate,)> = sqlx::query_as(
            "SELECT next_billing_date FROM subscriptions WHERE id = $1 FOR UPDATE",
        )
        .bind(subscription.id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((stored,)) = current else {
            return Err(BillingError::NotFound(format!(
                "subscription {}",
                subscription.id
            )));
        };
        if stored != expected_next_billing_date {
            tx.rollback().await.ok();
            return Err(BillingError::Transient(format!(
                "subscription {} was already billed for this cycle",
                subscription.id
            )));
        }

        Self::update_subscription_row(&mut tx, subscription).await?;
        Self::insert_invoice_row(&mut tx, invoice).await?;
        Self::append_change(
            &mut tx,
            &ChangeRecord::subscription(ChangeKind::Updated, subscription),
        )
        .await?;
        Self::append_change(&mut tx, &ChangeRecord::invoice(ChangeKind::Created, invoice))
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn count_by_status(&self, status: SubscriptionStatus) -> BillingResult<i64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE status = $1")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(result.0)
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invoice)
    }

    async fn find_by_subscription(&self, subscription_id: Uuid) -> BillingResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE subscription_id = $1 ORDER BY issue_date DESC",
            INVOICE_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    async fn find_overdue(&self, cutoff: NaiveDate) -> BillingResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices \
             WHERE status IN ('pending', 'overdue') AND due_date < $1 \
             ORDER BY due_date",
            INVOICE_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    async fn save(&self, invoice: &Invoice) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_invoice_row(&mut tx, invoice).await?;
        Self::append_change(&mut tx, &ChangeRecord::invoice(ChangeKind::Created, invoice))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_payment(&self, invoice: &Invoice, payment: &Payment) -> BillingResult<()> {
        let method = serde_json::to_value(&payment.method)
            .map_err(|e| BillingError::Internal(format!("payment method serialization: {}", e)))?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE invoices SET status = $2, paid_date = $3 WHERE id = $1",
        )
        .bind(invoice.id)
        .bind(invoice.status)
        .bind(invoice.paid_date)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("invoice {}", invoice.id)));
        }

        sqlx::query(
            r#"
            INSERT INTO payments (id, invoice_id, amount, method, paid_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(payment.id)
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(&method)
        .bind(payment.paid_at)
        .execute(&mut *tx)
        .await?;

        Self::append_change(&mut tx, &ChangeRecord::invoice(ChangeKind::Updated, invoice))
            .await?;
        Self::append_change(&mut tx, &ChangeRecord::payment(payment)).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn count_pending(&self) -> BillingResult<i64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM invoices WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(result.0)
    }
}

#[async_trait]
impl PlanCatalog for PgStore {
    async fn find_by_id(&self, id: Uuid) -> BillingResult<Option<Plan>> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, name, monthly_price, active, created_at FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }
}

#[async_trait]
impl ProfileDirectory for PgStore {
    async fn country_of(&self, user_id: Uuid) -> BillingResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT country FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(country,)| country))
    }
}
