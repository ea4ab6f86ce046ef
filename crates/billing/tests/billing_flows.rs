//! Plan changes, proration, tax resolution, and payment recording
#![allow(clippy::unwrap_used)]

mod common;

use common::*;

use renova_billing::BillingError;
use renova_shared::{InvoiceId, PaymentMethod, PlanId, SubscriptionId, SubscriptionStatus};

// ===========================================================================
// Plan changes
// ===========================================================================

#[tokio::test]
async fn upgrade_mid_cycle_bills_prorated_difference() {
    // Basic 9.99 -> Premium 29.99 with 15 days left, Spanish VAT
    let today = date(2025, 6, 1);
    let h = harness(today);

    let basic = plan("Basic", "9.99");
    let premium = plan("Premium", "29.99");
    let sub = active_subscription(&basic, date(2025, 6, 16));
    h.store.set_country(sub.user_id, "ES");
    h.store.insert_plan(basic);
    h.store.insert_plan(premium.clone());
    h.store.insert_subscription(sub.clone());

    let updated = h
        .lifecycle
        .change_plan(SubscriptionId(sub.id), PlanId(premium.id))
        .await
        .unwrap();

    assert_eq!(updated.plan_id, premium.id);
    assert_eq!(updated.current_price, dec("29.99"));
    // Proration never moves the billing boundary
    assert_eq!(updated.next_billing_date, date(2025, 6, 16));

    let invoices = h.store.invoices_for(sub.id);
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert!(invoice.number.starts_with("PRO-"));
    assert!(invoice.is_proration);
    assert_eq!(invoice.subtotal, dec("10.00"));
    assert_eq!(invoice.tax_rate, dec("21.00"));
    assert_eq!(invoice.tax_amount, dec("2.10"));
    assert_eq!(invoice.total, dec("12.10"));
    assert_eq!(invoice.due_date, date(2025, 6, 8));
}

#[tokio::test]
async fn upgrade_to_enterprise_bills_larger_proration() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let basic = plan("Basic", "9.99");
    let enterprise = plan("Enterprise", "99.99");
    let sub = active_subscription(&basic, date(2025, 6, 16));
    h.store.set_country(sub.user_id, "ES");
    h.store.insert_plan(basic);
    h.store.insert_plan(enterprise.clone());
    h.store.insert_subscription(sub.clone());

    h.lifecycle
        .change_plan(SubscriptionId(sub.id), PlanId(enterprise.id))
        .await
        .unwrap();

    let invoices = h.store.invoices_for(sub.id);
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].subtotal, dec("45.00"));
    assert_eq!(invoices[0].tax_amount, dec("9.45"));
    assert_eq!(invoices[0].total, dec("54.45"));
}

#[tokio::test]
async fn downgrade_changes_plan_without_invoice() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let premium = plan("Premium", "29.99");
    let basic = plan("Basic", "9.99");
    let sub = active_subscription(&premium, date(2025, 6, 16));
    h.store.insert_plan(premium);
    h.store.insert_plan(basic.clone());
    h.store.insert_subscription(sub.clone());

    let updated = h
        .lifecycle
        .change_plan(SubscriptionId(sub.id), PlanId(basic.id))
        .await
        .unwrap();

    assert_eq!(updated.current_price, dec("9.99"));
    assert!(h.store.invoices_for(sub.id).is_empty());
}

#[tokio::test]
async fn upgrade_on_billing_day_changes_plan_without_invoice() {
    let today = date(2025, 6, 16);
    let h = harness(today);

    let basic = plan("Basic", "9.99");
    let premium = plan("Premium", "29.99");
    let sub = active_subscription(&basic, today);
    h.store.insert_plan(basic);
    h.store.insert_plan(premium.clone());
    h.store.insert_subscription(sub.clone());

    let updated = h
        .lifecycle
        .change_plan(SubscriptionId(sub.id), PlanId(premium.id))
        .await
        .unwrap();

    assert_eq!(updated.current_price, dec("29.99"));
    assert!(h.store.invoices_for(sub.id).is_empty());
}

#[tokio::test]
async fn change_plan_requires_active_subscription() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let basic = plan("Basic", "9.99");
    let premium = plan("Premium", "29.99");
    let mut sub = active_subscription(&basic, date(2025, 6, 16));
    sub.status = SubscriptionStatus::Suspended;
    h.store.insert_plan(basic);
    h.store.insert_plan(premium.clone());
    h.store.insert_subscription(sub.clone());

    let err = h
        .lifecycle
        .change_plan(SubscriptionId(sub.id), PlanId(premium.id))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn change_plan_to_unknown_plan_is_not_found() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let basic = plan("Basic", "9.99");
    let sub = active_subscription(&basic, date(2025, 6, 16));
    h.store.insert_plan(basic);
    h.store.insert_subscription(sub.clone());

    let err = h
        .lifecycle
        .change_plan(SubscriptionId(sub.id), PlanId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)));
}

#[tokio::test]
async fn change_plan_to_retired_plan_is_rejected() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let basic = plan("Basic", "9.99");
    let mut retired = plan("Legacy Premium", "24.99");
    retired.active = false;
    let sub = active_subscription(&basic, date(2025, 6, 16));
    h.store.insert_plan(basic);
    h.store.insert_plan(retired.clone());
    h.store.insert_subscription(sub.clone());

    let err = h
        .lifecycle
        .change_plan(SubscriptionId(sub.id), PlanId(retired.id))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidStateTransition(_)));
}

// ===========================================================================
// Tax resolution on generated invoices
// ===========================================================================

#[tokio::test]
async fn missing_profile_falls_back_to_default_country() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let plan = plan("Basic", "10.00");
    let sub = active_subscription(&plan, today);
    // No country seeded for this user
    h.store.insert_plan(plan);
    h.store.insert_subscription(sub.clone());

    h.lifecycle.process_renewals().await.unwrap();

    let invoices = h.store.invoices_for(sub.id);
    assert_eq!(invoices[0].tax_rate, dec("21.00"));
    assert_eq!(invoices[0].tax_amount, dec("2.10"));
}

#[tokio::test]
async fn us_profile_is_billed_without_tax() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let plan = plan("Basic", "10.00");
    let sub = active_subscription(&plan, today);
    h.store.set_country(sub.user_id, "US");
    h.store.insert_plan(plan);
    h.store.insert_subscription(sub.clone());

    h.lifecycle.process_renewals().await.unwrap();

    let invoices = h.store.invoices_for(sub.id);
    assert_eq!(invoices[0].tax_rate, dec("0.00"));
    assert_eq!(invoices[0].tax_amount, dec("0.00"));
    assert_eq!(invoices[0].total, dec("10.00"));
}

#[tokio::test]
async fn generated_invoices_satisfy_total_identity() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let mut sub_ids = Vec::new();
    for (price, country) in [("9.99", "ES"), ("29.99", "DE"), ("7.77", "CH"), ("13.13", "PE")] {
        let plan = plan("Plan", price);
        let sub = active_subscription(&plan, today);
        h.store.set_country(sub.user_id, country);
        h.store.insert_plan(plan);
        h.store.insert_subscription(sub.clone());
        sub_ids.push(sub.id);
    }

    let outcome = h.lifecycle.process_renewals().await.unwrap();
    assert_eq!(outcome.processed, 4);

    for sub_id in sub_ids {
        let invoices = h.store.invoices_for(sub_id);
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(invoice.total, invoice.subtotal + invoice.tax_amount);
        assert_eq!(invoice.tax_amount, invoice.tax_amount.round_dp(2));
        assert_eq!(invoice.total, invoice.total.round_dp(2));
    }
}

// ===========================================================================
// Payments
// ===========================================================================

#[tokio::test]
async fn paying_an_invoice_unblocks_renewal() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let plan = plan("Basic", "9.99");
    let sub = active_subscription(&plan, today);
    h.store.insert_plan(plan);
    h.store.insert_subscription(sub.clone());
    let invoice = unpaid_invoice(&sub, date(2025, 5, 25));
    h.store.insert_invoice(invoice.clone());

    // Outstanding invoice blocks the renewal
    assert_eq!(
        h.lifecycle.process_renewals().await.unwrap().processed,
        0
    );

    let paid = h
        .payments
        .record_payment(
            InvoiceId(invoice.id),
            PaymentMethod::Card {
                card_number: "4111111111111111".to_string(),
                holder: "Ada Lovelace".to_string(),
                expiry_month: 12,
                expiry_year: 2030,
            },
        )
        .await
        .unwrap();
    assert!(paid.paid_date.is_some());

    assert_eq!(
        h.lifecycle.process_renewals().await.unwrap().processed,
        1
    );
}

#[tokio::test]
async fn payment_records_amount_and_masked_method() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let plan = plan("Basic", "9.99");
    let sub = active_subscription(&plan, date(2025, 6, 20));
    h.store.insert_plan(plan);
    h.store.insert_subscription(sub.clone());
    let invoice = unpaid_invoice(&sub, date(2025, 6, 10));
    h.store.insert_invoice(invoice.clone());

    h.payments
        .record_payment(
            InvoiceId(invoice.id),
            PaymentMethod::Paypal {
                email: "ada@example.com".to_string(),
                transaction_ref: "TX-99".to_string(),
            },
        )
        .await
        .unwrap();

    let payments = h.store.payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].invoice_id, invoice.id);
    assert_eq!(payments[0].amount, invoice.total);

    // The change log only ever sees the masked form
    let log = h.store.change_log();
    let payment_entry = log
        .iter()
        .find(|r| r.entity == renova_billing::events::EntityKind::Payment)
        .unwrap();
    assert_eq!(payment_entry.snapshot["method"], "a***@example.com");
}

#[tokio::test]
async fn paying_a_settled_invoice_is_rejected() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let plan = plan("Basic", "9.99");
    let sub = active_subscription(&plan, date(2025, 6, 20));
    h.store.insert_plan(plan);
    h.store.insert_subscription(sub.clone());
    let invoice = unpaid_invoice(&sub, date(2025, 6, 10));
    h.store.insert_invoice(invoice.clone());

    let method = PaymentMethod::BankTransfer {
        bank_name: "Banco Azul".to_string(),
        account_number: "ES9121000418450200051332".to_string(),
        reference: "REF-1".to_string(),
    };

    h.payments
        .record_payment(InvoiceId(invoice.id), method.clone())
        .await
        .unwrap();
    let err = h
        .payments
        .record_payment(InvoiceId(invoice.id), method)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn expired_card_is_rejected() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let plan = plan("Basic", "9.99");
    let sub = active_subscription(&plan, date(2025, 6, 20));
    h.store.insert_plan(plan);
    h.store.insert_subscription(sub.clone());
    let invoice = unpaid_invoice(&sub, date(2025, 6, 10));
    h.store.insert_invoice(invoice.clone());

    let err = h
        .payments
        .record_payment(
            InvoiceId(invoice.id),
            PaymentMethod::Card {
                card_number: "4111111111111111".to_string(),
                holder: "Ada Lovelace".to_string(),
                expiry_month: 4,
                expiry_year: 2025,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidInput(_)));

    let stored = h.store.invoices_for(sub.id);
    assert!(stored[0].is_unpaid());
}

// ===========================================================================
// Change log
// ===========================================================================

#[tokio::test]
async fn renewal_appends_subscription_and_invoice_changes() {
    let today = date(2025, 6, 1);
    let h = harness(today);

    let plan = plan("Basic", "9.99");
    let sub = active_subscription(&plan, today);
    h.store.insert_plan(plan);
    h.store.insert_subscription(sub.clone());

    h.lifecycle.process_renewals().await.unwrap();

    let log = h.store.change_log();
    use renova_billing::events::{ChangeKind, EntityKind};
    assert!(log
        .iter()
        .any(|r| r.entity == EntityKind::Subscription
            && r.entity_id == sub.id
            && r.change == ChangeKind::Updated));
    assert!(log
        .iter()
        .any(|r| r.entity == EntityKind::Invoice && r.change == ChangeKind::Created));
}
