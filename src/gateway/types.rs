use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order creation request (amount in minor units)
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrder {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    /// created, authorized, captured, refunded, failed
    pub status: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl GatewayPayment {
    pub fn is_captured(&self) -> bool {
        self.status == "captured"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemList<T> {
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Entity<T> {
    pub entity: T,
}

/// Webhook envelope: `{"event": "...", "payload": {"payment": {"entity": {...}}, ...}}`
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub payment: Option<Entity<GatewayPayment>>,
    #[serde(default)]
    pub order: Option<Entity<GatewayOrder>>,
    #[serde(default)]
    pub refund: Option<Entity<GatewayRefund>>,
}

impl WebhookEvent {
    pub fn payment(&self) -> Option<&GatewayPayment> {
        self.payload.payment.as_ref().map(|p| &p.entity)
    }

    pub fn order(&self) -> Option<&GatewayOrder> {
        self.payload.order.as_ref().map(|o| &o.entity)
    }

    pub fn refund(&self) -> Option<&GatewayRefund> {
        self.payload.refund.as_ref().map(|r| &r.entity)
    }

    /// Gateway order id the event refers to, from the payment or the order entity
    pub fn order_id(&self) -> Option<&str> {
        self.payment()
            .and_then(|p| p.order_id.as_deref())
            .or_else(|| self.order().map(|o| o.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payment_captured_event() {
        let raw = r#"{
            "entity": "event",
            "account_id": "acc_BFQ7uQEaa7j2z7",
            "event": "payment.captured",
            "contains": ["payment"],
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_DESlfW9H8K9uqM",
                        "entity": "payment",
                        "amount": 149900,
                        "currency": "INR",
                        "status": "captured",
                        "order_id": "order_DESlLckIVRkHWj",
                        "method": "upi",
                        "error_code": null,
                        "error_description": null
                    }
                }
            },
            "created_at": 1567674606
        }"#;

        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "payment.captured");
        let payment = event.payment().unwrap();
        assert!(payment.is_captured());
        assert_eq!(payment.amount, 149900);
        assert_eq!(event.order_id(), Some("order_DESlLckIVRkHWj"));
        assert!(event.refund().is_none());
    }

    #[test]
    fn test_order_id_falls_back_to_order_entity() {
        let raw = r#"{
            "event": "order.paid",
            "payload": {
                "order": { "entity": { "id": "order_X", "amount": 100, "currency": "INR", "status": "paid" } }
            }
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.order_id(), Some("order_X"));
    }

    #[test]
    fn test_event_without_payload() {
        let event: WebhookEvent = serde_json::from_str(r#"{"event":"account.updated"}"#).unwrap();
        assert!(event.order_id().is_none());
    }
}
