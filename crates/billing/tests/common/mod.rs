//! Shared fixtures for the billing integration tests
#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use renova_billing::store::memory::InMemoryStore;
use renova_billing::{InvoiceGenerator, LifecycleService, PaymentService, TaxEngine};
use renova_shared::{
    FixedClock, Invoice, InvoiceStatus, Plan, Subscription, SubscriptionStatus,
};

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub lifecycle: LifecycleService,
    pub payments: PaymentService,
}

pub fn harness(today: NaiveDate) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::at_date(today));
    let tax = Arc::new(TaxEngine::default());

    let generator = InvoiceGenerator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        tax,
        clock.clone(),
    );
    let lifecycle = LifecycleService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        generator,
        clock.clone(),
    );
    let payments = PaymentService::new(store.clone(), clock.clone());

    Harness {
        store,
        clock,
        lifecycle,
        payments,
    }
}

pub fn plan(name: &str, monthly_price: &str) -> Plan {
    Plan {
        id: Uuid::new_v4(),
        name: name.to_string(),
        monthly_price: dec(monthly_price),
        active: true,
        created_at: Utc::now(),
    }
}

pub fn active_subscription(plan: &Plan, next_billing_date: NaiveDate) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        plan_id: plan.id,
        status: SubscriptionStatus::Active,
        start_date: next_billing_date - chrono::Duration::days(30),
        end_date: None,
        next_billing_date,
        auto_renew: true,
        current_price: plan.monthly_price,
        cancellation_date: None,
        cancellation_reason: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn unpaid_invoice(subscription: &Subscription, due_date: NaiveDate) -> Invoice {
    let subtotal = subscription.current_price;
    let tax_rate = dec("21.00");
    let tax_amount =
        (subtotal * tax_rate / dec("100")).round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
    Invoice {
        id: Uuid::new_v4(),
        number: format!("FAC-{:08X}", rand_suffix()),
        subscription_id: subscription.id,
        issue_date: due_date - chrono::Duration::days(15),
        due_date,
        subtotal,
        tax_rate,
        tax_amount,
        total: subtotal + tax_amount,
        status: InvoiceStatus::Pending,
        is_proration: false,
        paid_date: None,
        created_at: Utc::now(),
    }
}

fn rand_suffix() -> u32 {
    // Unique-enough numbers for test invoice identifiers
    Uuid::new_v4().as_fields().0
}
