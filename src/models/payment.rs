use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Created,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    /// created → paid | failed, failed → paid, paid → refunded
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, Paid) | (Created, Failed) | (Failed, Paid) | (Paid, Refunded)
        )
    }

    /// Stored statuses a payment may be in to move to `next`; used as an update filter.
    pub fn sources_of(next: PaymentStatus) -> Vec<&'static str> {
        Self::ALL
            .iter()
            .filter(|s| s.can_transition_to(next))
            .map(|s| s.as_str())
            .collect()
    }

    pub fn has_invoice(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One checkout attempt for a plan, mirrored from the gateway order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    pub restaurant_id: ObjectId,
    pub plan_id: ObjectId,
    pub plan_name: String,
    /// Minor currency units (paise)
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub receipt: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub method: Option<String>,
    pub failure_reason: Option<String>,
    /// Most recent refund
    pub refund_id: Option<String>,
    /// Every refund recorded against this payment
    #[serde(default)]
    pub refund_ids: Vec<String>,
    /// Sum of all recorded refunds, minor units; absent until the first refund so `$inc` can create it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_amount: Option<i64>,
    pub invoice_number: Option<String>,
    pub period_start: Option<BsonDateTime>,
    pub period_end: Option<BsonDateTime>,
    pub paid_at: Option<BsonDateTime>,
    /// Set once the paid period has been written onto the restaurant
    #[serde(default)]
    pub subscription_applied: bool,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

impl Payment {
    /// Paid, but the invoice number or the subscription update is still missing
    pub fn settlement_incomplete(&self) -> bool {
        self.status == PaymentStatus::Paid
            && (self.invoice_number.is_none() || !self.subscription_applied)
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PaymentResponse {
    pub id: String,
    pub restaurant_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub method: Option<String>,
    pub failure_reason: Option<String>,
    pub invoice_number: Option<String>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub paid_at: Option<String>,
    pub created_at: String,
}

fn rfc3339(dt: BsonDateTime) -> String {
    dt.try_to_rfc3339_string()
        .unwrap_or_else(|_| dt.timestamp_millis().to_string())
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        PaymentResponse {
            id: p.id.map(|id| id.to_hex()).unwrap_or_default(),
            restaurant_id: p.restaurant_id.to_hex(),
            plan_id: p.plan_id.to_hex(),
            plan_name: p.plan_name,
            amount: p.amount,
            currency: p.currency,
            status: p.status,
            gateway_order_id: p.gateway_order_id,
            gateway_payment_id: p.gateway_payment_id,
            method: p.method,
            failure_reason: p.failure_reason,
            invoice_number: p.invoice_number,
            period_start: p.period_start.map(rfc3339),
            period_end: p.period_end.map(rfc3339),
            paid_at: p.paid_at.map(rfc3339),
            created_at: rfc3339(p.created_at),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_payment(user_id: &str, status: PaymentStatus) -> Payment {
    let now = BsonDateTime::now();
    Payment {
        id: Some(ObjectId::new()),
        user_id: user_id.to_string(),
        restaurant_id: ObjectId::new(),
        plan_id: ObjectId::new(),
        plan_name: "Pro".to_string(),
        amount: 149_900,
        currency: "INR".to_string(),
        status,
        receipt: "rcpt_0123456789ab".to_string(),
        gateway_order_id: "order_TEST123".to_string(),
        gateway_payment_id: None,
        gateway_signature: None,
        method: None,
        failure_reason: None,
        refund_id: None,
        refund_ids: vec![],
        refunded_amount: None,
        invoice_number: None,
        period_start: None,
        period_end: None,
        paid_at: None,
        subscription_applied: false,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Created.can_transition_to(Paid));
        assert!(Created.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Refunded));
    }

    #[test]
    fn test_paid_never_goes_back_to_failed() {
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Paid.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Created.can_transition_to(Refunded));
    }

    #[test]
    fn test_sources_of() {
        assert_eq!(PaymentStatus::sources_of(Paid), vec!["created", "failed"]);
        assert_eq!(PaymentStatus::sources_of(Failed), vec!["created"]);
        assert_eq!(PaymentStatus::sources_of(Refunded), vec!["paid"]);
    }

    #[test]
    fn test_settlement_incomplete() {
        let mut payment = test_payment("u1", Paid);
        assert!(payment.settlement_incomplete());

        payment.invoice_number = Some("INV-20260301-000001".into());
        assert!(payment.settlement_incomplete());

        payment.subscription_applied = true;
        assert!(!payment.settlement_incomplete());

        assert!(!test_payment("u1", Created).settlement_incomplete());
        assert!(!test_payment("u1", Refunded).settlement_incomplete());
    }

    #[test]
    fn test_legacy_document_defaults() {
        let mut doc = mongodb::bson::to_document(&test_payment("u1", Created)).unwrap();
        doc.remove("refund_ids");
        doc.remove("subscription_applied");
        let payment: Payment = mongodb::bson::from_document(doc).unwrap();
        assert!(payment.refund_ids.is_empty());
        assert!(!payment.subscription_applied);
    }

    #[test]
    fn test_payment_response_ids_are_hex() {
        let payment = test_payment("u1", Paid);
        let restaurant_hex = payment.restaurant_id.to_hex();
        let response = PaymentResponse::from(payment);
        assert_eq!(response.restaurant_id, restaurant_hex);
        assert_eq!(response.id.len(), 24);
        assert!(response.paid_at.is_none());
    }
}
