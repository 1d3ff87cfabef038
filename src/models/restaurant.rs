use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::BillingCycle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    /// No subscription at all
    Inactive,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Inactive => "inactive",
        };
        write!(f, "{}", s)
    }
}

/// The restaurant's current plan and the period it covers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub plan_id: ObjectId,
    pub plan_name: String,
    pub price: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub start_date: BsonDateTime,
    /// Absent for free plans, which never lapse
    pub end_date: Option<BsonDateTime>,
    /// Last written status; readers recompute it from `end_date`
    pub status: SubscriptionStatus,
    pub last_payment_id: Option<ObjectId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restaurant {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// user_id of the owning merchant
    pub owner_id: String,
    pub name: String,
    pub slug: String,
    /// Business category, used to pick the plans on offer
    pub category: String,
    #[serde(default)]
    pub subscription: Option<Subscription>,
    pub created_at: Option<BsonDateTime>,
    pub updated_at: Option<BsonDateTime>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubscriptionResponse {
    pub restaurant_id: String,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub billing_cycle: Option<BillingCycle>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: SubscriptionStatus,
    pub days_remaining: Option<i64>,
}

#[cfg(test)]
pub(crate) fn test_restaurant(owner_id: &str) -> Restaurant {
    Restaurant {
        id: Some(ObjectId::new()),
        owner_id: owner_id.to_string(),
        name: "Cafe Aroma".to_string(),
        slug: "cafe-aroma".to_string(),
        category: "restaurant".to_string(),
        subscription: None,
        created_at: None,
        updated_at: None,
    }
}
