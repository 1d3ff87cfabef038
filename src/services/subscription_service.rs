use crate::{
    database::{MongoDB, RESTAURANTS},
    models::{Plan, Restaurant, Subscription, SubscriptionResponse, SubscriptionStatus},
    services::auth_service::Claims,
    utils::AppError,
};
use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use mongodb::bson::{self, doc, oid::ObjectId, DateTime as BsonDateTime, Document};

/// The date range a payment buys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    /// `None` for plans that never lapse
    pub end: Option<DateTime<Utc>>,
}

pub fn to_chrono(dt: BsonDateTime) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(dt.timestamp_millis())
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn to_bson(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

/// Converts a major-unit price into gateway minor units (paise).
pub fn amount_in_minor_units(price: f64) -> Result<i64, AppError> {
    if !price.is_finite() || price < 0.0 {
        return Err(AppError::InvalidRequest(format!("Invalid plan price: {}", price)));
    }
    Ok((price * 100.0).round() as i64)
}

/// End of a period starting at `start` for `plan`.
fn period_end(plan: &Plan, start: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, AppError> {
    if let Some(days) = plan.duration_days {
        return start
            .checked_add_signed(Duration::days(days.into()))
            .map(Some)
            .ok_or_else(|| AppError::Internal(format!("Plan duration of {} days is out of range", days)));
    }

    if plan.is_free() {
        return Ok(None);
    }

    // chrono clamps to the last day of shorter months
    start
        .checked_add_months(Months::new(plan.billing_cycle.months()))
        .map(Some)
        .ok_or_else(|| AppError::Internal("Subscription end date out of range".to_string()))
}

/// Renewal-date computation.
///
/// A renewal of the same plan while it is still running starts where the
/// current period ends, so no paid days are lost. Anything else (new plan,
/// lapsed subscription, first purchase) starts now.
pub fn compute_period(
    plan: &Plan,
    current: Option<&Subscription>,
    now: DateTime<Utc>,
) -> Result<Period, AppError> {
    let start = current
        .filter(|sub| Some(sub.plan_id) == plan.id)
        .and_then(|sub| sub.end_date)
        .map(to_chrono)
        .filter(|end| *end > now)
        .unwrap_or(now);

    Ok(Period {
        start,
        end: period_end(plan, start)?,
    })
}

/// Status derived from `end_date`; the stored status is never trusted.
pub fn effective_status(subscription: Option<&Subscription>, now: DateTime<Utc>) -> SubscriptionStatus {
    match subscription {
        None => SubscriptionStatus::Inactive,
        Some(sub) => match sub.end_date {
            None => SubscriptionStatus::Active,
            Some(end) if to_chrono(end) > now => SubscriptionStatus::Active,
            Some(_) => SubscriptionStatus::Expired,
        },
    }
}

fn days_remaining(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    if end <= now {
        return 0;
    }
    let secs = (end - now).num_seconds();
    (secs + 86_399) / 86_400
}

pub fn to_response(restaurant: &Restaurant, now: DateTime<Utc>) -> SubscriptionResponse {
    let sub = restaurant.subscription.as_ref();
    let status = effective_status(sub, now);
    let rfc3339 = |dt: BsonDateTime| to_chrono(dt).to_rfc3339();

    SubscriptionResponse {
        restaurant_id: restaurant.id.map(|id| id.to_hex()).unwrap_or_default(),
        plan_id: sub.map(|s| s.plan_id.to_hex()),
        plan_name: sub.map(|s| s.plan_name.clone()),
        price: sub.map(|s| s.price),
        currency: sub.map(|s| s.currency.clone()),
        billing_cycle: sub.map(|s| s.billing_cycle),
        start_date: sub.map(|s| rfc3339(s.start_date)),
        end_date: sub.and_then(|s| s.end_date).map(rfc3339),
        status,
        days_remaining: sub
            .and_then(|s| s.end_date)
            .map(|end| days_remaining(to_chrono(end), now)),
    }
}

pub async fn get_restaurant(db: &MongoDB, restaurant_id: &ObjectId) -> Result<Restaurant, AppError> {
    db.collection::<Restaurant>(RESTAURANTS)
        .find_one(doc! { "_id": restaurant_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Restaurant not found".to_string()))
}

/// Loads a restaurant the caller owns (admins may read any).
pub async fn get_owned_restaurant(
    db: &MongoDB,
    restaurant_id: &str,
    claims: &Claims,
) -> Result<Restaurant, AppError> {
    let object_id = ObjectId::parse_str(restaurant_id)?;
    let restaurant = get_restaurant(db, &object_id).await?;

    if restaurant.owner_id != claims.sub && !claims.is_admin() {
        log::warn!(
            "⚠️  User {} tried to access restaurant {} owned by {}",
            claims.sub, restaurant_id, restaurant.owner_id
        );
        return Err(AppError::Forbidden("You do not own this restaurant".to_string()));
    }

    Ok(restaurant)
}

pub async fn get_subscription(
    db: &MongoDB,
    restaurant_id: &str,
    claims: &Claims,
) -> Result<SubscriptionResponse, AppError> {
    let restaurant = get_owned_restaurant(db, restaurant_id, claims).await?;
    Ok(to_response(&restaurant, Utc::now()))
}

/// Writes the new subscription onto the restaurant document.
///
/// With a `payment_id` the write is skipped when the restaurant already
/// carries that payment's subscription, so a retried settlement is a no-op.
pub async fn activate(
    db: &MongoDB,
    restaurant_id: &ObjectId,
    plan: &Plan,
    period: Period,
    payment_id: Option<ObjectId>,
) -> Result<Subscription, AppError> {
    let plan_id = plan
        .id
        .ok_or_else(|| AppError::Internal("Plan without id".to_string()))?;

    let subscription = Subscription {
        plan_id,
        plan_name: plan.name.clone(),
        price: plan.price,
        currency: plan.currency.clone(),
        billing_cycle: plan.billing_cycle,
        start_date: to_bson(period.start),
        end_date: period.end.map(to_bson),
        status: SubscriptionStatus::Active,
        last_payment_id: payment_id,
    };

    let mut filter = doc! { "_id": restaurant_id };
    if let Some(payment_id) = payment_id {
        filter.insert("subscription.last_payment_id", doc! { "$ne": payment_id });
    }

    let result = db
        .collection::<Restaurant>(RESTAURANTS)
        .update_one(
            filter,
            doc! { "$set": {
                "subscription": bson::to_bson(&subscription)?,
                "updated_at": BsonDateTime::now(),
            } },
        )
        .await?;

    if result.matched_count == 0 {
        // Either gone, or this payment was applied by an earlier attempt
        let restaurant = get_restaurant(db, restaurant_id).await?;
        if let Some(current) = restaurant.subscription {
            log::info!("ℹ️  Subscription for payment {:?} already applied to {}", payment_id, restaurant_id);
            return Ok(current);
        }
        return Err(AppError::NotFound("Restaurant not found".to_string()));
    }

    log::info!(
        "✅ Subscription activated: restaurant {} → {} (until {})",
        restaurant_id,
        plan.name,
        period
            .end
            .map(|e| e.to_rfc3339())
            .unwrap_or_else(|| "no end date".to_string())
    );

    Ok(subscription)
}

/// Marks stored `active` subscriptions whose end date has passed as `expired`.
pub async fn sweep_expired(db: &MongoDB, now: DateTime<Utc>) -> Result<u64, AppError> {
    let result = db
        .collection::<Restaurant>(RESTAURANTS)
        .update_many(
            expired_filter(now),
            doc! { "$set": {
                "subscription.status": SubscriptionStatus::Expired.to_string(),
                "updated_at": to_bson(now),
            } },
        )
        .await?;

    Ok(result.modified_count)
}

/// Stored-active subscriptions that have lapsed at `now`.
pub(crate) fn expired_filter(now: DateTime<Utc>) -> Document {
    doc! {
        "subscription.status": SubscriptionStatus::Active.to_string(),
        "subscription.end_date": { "$ne": null, "$lte": to_bson(now) },
    }
}
