use crate::database::{MongoDB, PLANS};
use crate::models::{BillingCycle, Plan};
use mongodb::bson::{doc, DateTime as BsonDateTime};

/// Categories that get the stock Free / Basic / Pro ladder.
pub const DEFAULT_CATEGORIES: &[&str] = &["restaurant", "cafe", "salon"];

/// Inserts the default plans of every category that has none yet.
/// Errors are logged; the service starts without seed data.
pub async fn seed_default_plans(db: &MongoDB, currency: &str) {
    let collection = db.collection::<Plan>(PLANS);

    for category in DEFAULT_CATEGORIES {
        let count = match collection
            .count_documents(doc! { "category": *category, "is_default": true })
            .await
        {
            Ok(count) => count,
            Err(e) => {
                log::error!("   ❌ Could not count default plans for '{}': {}", category, e);
                continue;
            }
        };

        if count > 0 {
            log::info!("📋 Plans: {} defaults for '{}' already in DB - skipping", count, category);
            continue;
        }

        let plans = build_default_plans(category, currency, BsonDateTime::now());
        match collection.insert_many(&plans).await {
            Ok(result) => log::info!(
                "   ✅ Seeded {} default plans for '{}'",
                result.inserted_ids.len(),
                category
            ),
            Err(e) => log::error!("   ❌ Failed to seed plans for '{}': {}", category, e),
        }
    }
}

fn build_default_plans(category: &str, currency: &str, now: BsonDateTime) -> Vec<Plan> {
    let plan = |slug: &str, name: &str, price: f64, sort_order: i32, features: &[&str]| Plan {
        id: None,
        name: name.to_string(),
        slug: slug.to_string(),
        category: category.to_string(),
        price,
        currency: currency.to_string(),
        billing_cycle: BillingCycle::Monthly,
        duration_days: None,
        features: features.iter().map(|f| f.to_string()).collect(),
        is_active: true,
        is_default: true,
        custom_for_user: None,
        sort_order,
        created_at: Some(now),
        updated_at: Some(now),
    };

    vec![
        plan("free", "Free", 0.0, 0, &["QR check-in", "Up to 50 visits per month"]),
        plan(
            "basic",
            "Basic",
            499.0,
            1,
            &["QR check-in", "Unlimited visits", "Visitor export"],
        ),
        plan(
            "pro",
            "Pro",
            1499.0,
            2,
            &["QR check-in", "Unlimited visits", "Visitor export", "Analytics", "Priority support"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladder() {
        let plans = build_default_plans("cafe", "INR", BsonDateTime::now());
        let slugs: Vec<_> = plans.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["free", "basic", "pro"]);
        assert!(plans[0].is_free());
        assert!(plans.iter().all(|p| p.category == "cafe" && p.is_default));
        assert!(plans.windows(2).all(|w| w[0].sort_order < w[1].sort_order));
    }
}
