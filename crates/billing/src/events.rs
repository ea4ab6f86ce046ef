//! Append-only change log
//!
//! Storage adapters record one entry per persisted change. The engine never
//! reads these back; they exist for offline audit tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use renova_shared::{Invoice, Payment, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Subscription,
    Invoice,
    Payment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
}

/// One persisted change: which entity, what happened, and a full snapshot
/// of the row as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub change: ChangeKind,
    pub snapshot: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeRecord {
    fn new(entity: EntityKind, entity_id: Uuid, change: ChangeKind, snapshot: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity,
            entity_id,
            change,
            snapshot,
            recorded_at: Utc::now(),
        }
    }

    pub fn subscription(change: ChangeKind, subscription: &Subscription) -> Self {
        let snapshot = serde_json::to_value(subscription).unwrap_or_default();
        Self::new(EntityKind::Subscription, subscription.id, change, snapshot)
    }

    pub fn invoice(change: ChangeKind, invoice: &Invoice) -> Self {
        let snapshot = serde_json::to_value(invoice).unwrap_or_default();
        Self::new(EntityKind::Invoice, invoice.id, change, snapshot)
    }

    pub fn payment(payment: &Payment) -> Self {
        // Snapshot the masked form only; raw instrument details never land
        // in the change log.
        let snapshot = serde_json::json!({
            "invoice_id": payment.invoice_id,
            "amount": payment.amount,
            "method": payment.method.masked_display(),
            "paid_at": payment.paid_at,
        });
        Self::new(EntityKind::Payment, payment.id, ChangeKind::Created, snapshot)
    }
}
