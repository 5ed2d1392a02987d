use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::member::{MemberId, TenantId};

/// Purchase event as submitted by a point-of-sale integration. The wire
/// shape is owned by the POS side, hence the camelCase field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEvent {
    /// Globally unique per POS system; the idempotency key for ingestion.
    pub external_id: String,
    pub pos_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub member_id: Option<Uuid>,
    #[serde(default)]
    pub member_phone: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    pub items: Vec<LineItem>,
    pub subtotal: f64,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub discount: Option<f64>,
    pub total: f64,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub transaction_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Processed,
    Failed,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Processed => "processed",
            PurchaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stored ingestion record. Never deleted: a failed evaluation leaves the
/// row in `failed` as the audit trail of the attempt.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub external_id: String,
    pub pos_id: String,
    pub location_id: Option<String>,
    pub member_id: MemberId,
    pub tenant_id: Option<TenantId>,
    pub items: String,
    pub subtotal: f64,
    pub tax: Option<f64>,
    pub discount: Option<f64>,
    pub total: f64,
    pub payment_method: Option<String>,
    pub status: String,
    pub points_earned: Option<i64>,
    pub transaction_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pos_wire_shape_deserializes() {
        let payload = r#"{
            "externalId": "pos-7781-000123",
            "posId": "pos-7781",
            "locationId": "downtown",
            "memberPhone": "+15550001111",
            "items": [
                {"sku": "CF-01", "name": "flat white", "category": "coffee",
                 "quantity": 1, "unitPrice": 25.0, "totalPrice": 25.0}
            ],
            "subtotal": 25.0,
            "total": 25.0,
            "transactionDate": "2026-08-25T09:30:00Z"
        }"#;

        let event: PurchaseEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.external_id, "pos-7781-000123");
        assert!(event.member_id.is_none());
        assert_eq!(event.member_phone.as_deref(), Some("+15550001111"));
        assert_eq!(event.items[0].category.as_deref(), Some("coffee"));
        assert!(event.tax.is_none());
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let payload = r#"{"posId": "pos-1", "items": [], "subtotal": 1.0, "total": 1.0}"#;
        assert!(serde_json::from_str::<PurchaseEvent>(payload).is_err());
    }
}
