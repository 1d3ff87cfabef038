use crate::{
    database::{MongoDB, PLANS},
    models::{Plan, PlanResponse},
    utils::AppError,
};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use std::collections::HashMap;

/// Plans visible to `user_id` in `category`.
///
/// Public plans plus plans customised for this user; a customised plan
/// replaces the public plan with the same slug.
pub async fn list_plans(
    db: &MongoDB,
    category: &str,
    user_id: &str,
) -> Result<Vec<PlanResponse>, AppError> {
    let filter = doc! {
        "category": category,
        "is_active": true,
        "$or": [
            { "custom_for_user": null },
            { "custom_for_user": user_id },
        ],
    };

    let plans: Vec<Plan> = db
        .collection::<Plan>(PLANS)
        .find(filter)
        .await?
        .try_collect()
        .await?;

    log::debug!("📋 {} candidate plans for category '{}'", plans.len(), category);

    Ok(merge_custom_plans(plans)
        .into_iter()
        .map(PlanResponse::from)
        .collect())
}

pub(crate) fn merge_custom_plans(plans: Vec<Plan>) -> Vec<Plan> {
    let mut by_slug: HashMap<String, Plan> = HashMap::new();

    for plan in plans {
        let replace = match by_slug.get(&plan.slug) {
            None => true,
            Some(existing) => existing.custom_for_user.is_none() && plan.custom_for_user.is_some(),
        };
        if replace {
            by_slug.insert(plan.slug.clone(), plan);
        }
    }

    let mut merged: Vec<Plan> = by_slug.into_values().collect();
    merged.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then(a.price.total_cmp(&b.price))
            .then_with(|| a.slug.cmp(&b.slug))
    });
    merged
}

/// Loads a plan the caller may check out.
pub async fn get_purchasable_plan(
    db: &MongoDB,
    plan_id: &str,
    user_id: &str,
) -> Result<Plan, AppError> {
    let object_id = ObjectId::parse_str(plan_id)?;

    let plan = db
        .collection::<Plan>(PLANS)
        .find_one(doc! { "_id": object_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Plan not found".to_string()))?;

    if !plan.is_purchasable_by(user_id) {
        return Err(AppError::InvalidRequest("Plan is not available".to_string()));
    }

    Ok(plan)
}

pub async fn get_plan(db: &MongoDB, plan_id: &ObjectId) -> Result<Plan, AppError> {
    db.collection::<Plan>(PLANS)
        .find_one(doc! { "_id": plan_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Plan not found".to_string()))
}
