//! Invoice generation
//!
//! Builds monthly and proration invoices, applies country tax, and persists
//! them through the storage collaborators. Monthly generation also advances
//! the subscription's next billing date; the two writes are a single atomic
//! storage operation.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use renova_shared::{Clock, Invoice, InvoiceStatus, Plan, Subscription};

use crate::error::BillingResult;
use crate::store::{InvoiceStore, ProfileDirectory, SubscriptionStore};
use crate::tax::TaxEngine;

/// Length of one billing cycle in days
pub const BILLING_CYCLE_DAYS: i64 = 30;

/// Payment terms for a monthly invoice
pub const MONTHLY_DUE_DAYS: i64 = 15;

/// Payment terms for a proration invoice
pub const PRORATION_DUE_DAYS: i64 = 7;

/// Country assumed when the owner's profile has none
pub const FALLBACK_COUNTRY: &str = "ES";

/// Invoice number: prefix plus 8 uppercase hex chars. Existing records use
/// this exact shape, so it must not change.
fn invoice_number(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, hex[..8].to_uppercase())
}

pub struct InvoiceGenerator {
    subscriptions: Arc<dyn SubscriptionStore>,
    invoices: Arc<dyn InvoiceStore>,
    profiles: Arc<dyn ProfileDirectory>,
    tax: Arc<TaxEngine>,
    clock: Arc<dyn Clock>,
}

impl InvoiceGenerator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        invoices: Arc<dyn InvoiceStore>,
        profiles: Arc<dyn ProfileDirectory>,
        tax: Arc<TaxEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            invoices,
            profiles,
            tax,
            clock,
        }
    }

    /// Resolve the owner's country for tax purposes. A missing profile or a
    /// failed lookup degrades to the fallback country; it never blocks
    /// invoice creation.
    async fn owner_country(&self, subscription: &Subscription) -> String {
        match self.profiles.country_of(subscription.user_id).await {
            Ok(Some(country)) if !country.trim().is_empty() => country,
            Ok(_) => FALLBACK_COUNTRY.to_string(),
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Country lookup failed, falling back to default"
                );
                FALLBACK_COUNTRY.to_string()
            }
        }
    }

    fn build_invoice(
        &self,
        subscription: &Subscription,
        subtotal: Decimal,
        country: &str,
        number_prefix: &str,
        due_days: i64,
        is_proration: bool,
    ) -> Invoice {
        let today = self.clock.today();
        let tax_rate = self.tax.rate_for(Some(country));
        let tax_amount = self.tax.tax_amount(subtotal, Some(country));

        Invoice {
            id: Uuid::new_v4(),
            number: invoice_number(number_prefix),
            subscription_id: subscription.id,
            issue_date: today,
            due_date: today + Duration::days(due_days),
            subtotal,
            tax_rate,
            tax_amount,
            total: subtotal + tax_amount,
            status: InvoiceStatus::Pending,
            is_proration,
            paid_date: None,
            created_at: self.clock.now(),
        }
    }

    /// Generate the monthly charge for a subscription and advance its next
    /// billing date by one cycle. Both writes commit together; if another
    /// run already advanced the billing date the store rejects the write
    /// and no duplicate invoice is produced.
    pub async fn generate_monthly(&self, subscription: &mut Subscription) -> BillingResult<Invoice> {
        let country = self.owner_country(subscription).await;
        let invoice = self.build_invoice(
            subscription,
            subscription.current_price,
            &country,
            "FAC",
            MONTHLY_DUE_DAYS,
            false,
        );

        let previous_billing_date = subscription.next_billing_date;
        let mut updated = subscription.clone();
        updated.next_billing_date = previous_billing_date + Duration::days(BILLING_CYCLE_DAYS);
        updated.updated_at = self.clock.now();

        self.subscriptions
            .save_with_invoice(&updated, &invoice, previous_billing_date)
            .await?;
        *subscription = updated;

        tracing::info!(
            subscription_id = %subscription.id,
            invoice_number = %invoice.number,
            total = %invoice.total,
            country = %country,
            tax_rate = %invoice.tax_rate,
            next_billing_date = %subscription.next_billing_date,
            "Generated monthly invoice"
        );

        Ok(invoice)
    }

    /// Generate a proration invoice for a plan upgrade. Called only with a
    /// positive subtotal; never touches the billing date.
    pub async fn generate_proration(
        &self,
        subscription: &Subscription,
        old_plan: &Plan,
        new_plan: &Plan,
        subtotal: Decimal,
    ) -> BillingResult<Invoice> {
        debug_assert!(subtotal > Decimal::ZERO);

        let country = self.owner_country(subscription).await;
        let invoice = self.build_invoice(
            subscription,
            subtotal,
            &country,
            "PRO",
            PRORATION_DUE_DAYS,
            true,
        );

        self.invoices.save(&invoice).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            invoice_number = %invoice.number,
            total = %invoice.total,
            old_plan = %old_plan.name,
            new_plan = %new_plan.name,
            "Generated proration invoice"
        );

        Ok(invoice)
    }
}
