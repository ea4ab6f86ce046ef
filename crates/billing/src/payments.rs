//! Invoice settlement
//!
//! Records a payment against an invoice and marks it paid. The instrument
//! details live in a tagged [`PaymentMethod`]; only its masked form is ever
//! logged.

use std::sync::Arc;

use uuid::Uuid;

use renova_shared::{Clock, Invoice, InvoiceId, InvoiceStatus, Payment, PaymentMethod};

use crate::error::{BillingError, BillingResult};
use crate::store::InvoiceStore;

pub struct PaymentService {
    invoices: Arc<dyn InvoiceStore>,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    pub fn new(invoices: Arc<dyn InvoiceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { invoices, clock }
    }

    /// Settle an invoice in full with the given instrument. The invoice
    /// update and the payment row commit atomically.
    pub async fn record_payment(
        &self,
        invoice_id: InvoiceId,
        method: PaymentMethod,
    ) -> BillingResult<Invoice> {
        let mut invoice = self
            .invoices
            .find_by_id(invoice_id.0)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {}", invoice_id.0)))?;

        if !invoice.status.is_unpaid() {
            return Err(BillingError::InvalidStateTransition(format!(
                "invoice {} is {} and cannot be paid",
                invoice.number, invoice.status
            )));
        }
        if !method.is_valid(self.clock.today()) {
            return Err(BillingError::InvalidInput(format!(
                "payment method {} failed validation",
                method.masked_display()
            )));
        }

        let now = self.clock.now();
        invoice.status = InvoiceStatus::Paid;
        invoice.paid_date = Some(now);

        let payment = Payment {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            amount: invoice.total,
            method,
            paid_at: now,
        };
        self.invoices.record_payment(&invoice, &payment).await?;

        tracing::info!(
            invoice_number = %invoice.number,
            amount = %payment.amount,
            method = %payment.method.masked_display(),
            "Invoice paid"
        );
        Ok(invoice)
    }
}
