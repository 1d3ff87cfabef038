use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a plan renews
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

impl BillingCycle {
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Quarterly => 3,
            BillingCycle::HalfYearly => 6,
            BillingCycle::Yearly => 12,
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::HalfYearly => "half_yearly",
            BillingCycle::Yearly => "yearly",
        };
        write!(f, "{}", s)
    }
}

/// A priced feature bundle for one business category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    /// Stable identifier within a category ("free", "basic", "pro")
    pub slug: String,
    pub category: String,
    /// Price in major currency units
    pub price: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    /// Overrides the billing cycle length when set
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    /// Set when the plan was customised for a single user
    #[serde(default)]
    pub custom_for_user: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    pub created_at: Option<BsonDateTime>,
    pub updated_at: Option<BsonDateTime>,
}

fn default_true() -> bool {
    true
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price <= 0.0
    }

    /// Whether `user_id` may buy this plan
    pub fn is_purchasable_by(&self, user_id: &str) -> bool {
        self.is_active
            && self
                .custom_for_user
                .as_deref()
                .map_or(true, |owner| owner == user_id)
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub category: String,
    pub price: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub duration_days: Option<u32>,
    pub features: Vec<String>,
    pub is_custom: bool,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        PlanResponse {
            id: plan.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: plan.name,
            slug: plan.slug,
            category: plan.category,
            price: plan.price,
            currency: plan.currency,
            billing_cycle: plan.billing_cycle,
            duration_days: plan.duration_days,
            features: plan.features,
            is_custom: plan.custom_for_user.is_some(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_plan(slug: &str, price: f64, cycle: BillingCycle) -> Plan {
    Plan {
        id: Some(ObjectId::new()),
        name: slug.to_uppercase(),
        slug: slug.to_string(),
        category: "restaurant".to_string(),
        price,
        currency: "INR".to_string(),
        billing_cycle: cycle,
        duration_days: None,
        features: vec![],
        is_active: true,
        is_default: true,
        custom_for_user: None,
        sort_order: 0,
        created_at: None,
        updated_at: None,
    }
}
