use crate::{
    config::AppConfig,
    database::{MongoDB, PAYMENTS},
    gateway::{signature, CreateOrder, GatewayPayment, GatewayRefund, PaymentGateway, WebhookEvent},
    models::{Payment, PaymentResponse, PaymentStatus, Plan, Restaurant, SubscriptionResponse},
    services::{
        auth_service::Claims, invoice_service, plan_service, subscription_service,
        subscription_service::Period,
    },
    utils::{cache, AppError},
};
use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateOrderRequest {
    pub restaurant_id: String,
    pub plan_id: String,
}

/// Checkout details handed to the gateway's checkout widget
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CheckoutOrder {
    pub success: bool,
    pub free: bool,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
    pub payment_id: String,
    pub plan_name: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FreeActivation {
    pub success: bool,
    pub free: bool,
    pub subscription: SubscriptionResponse,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CreateOrderOutcome {
    Checkout(CheckoutOrder),
    Free(FreeActivation),
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct Settlement {
    pub success: bool,
    /// True when the payment had already been settled earlier
    pub already_processed: bool,
    pub payment: PaymentResponse,
    pub subscription: SubscriptionResponse,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WebhookAck {
    pub success: bool,
    pub event: String,
    pub action: String,
    pub duplicate: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReconcileOutcome {
    pub success: bool,
    /// paid, failed, pending or unchanged
    pub result: String,
    pub payment: PaymentResponse,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub restaurant_id: Option<String>,
    /// Admin only
    pub user_id: Option<String>,
}

fn receipt_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("rcpt_{}", &raw[..12])
}

async fn find_by_order_id(db: &MongoDB, order_id: &str) -> Result<Option<Payment>, AppError> {
    Ok(db
        .collection::<Payment>(PAYMENTS)
        .find_one(doc! { "gateway_order_id": order_id })
        .await?)
}

async fn reload(db: &MongoDB, payment_id: &ObjectId) -> Result<Payment, AppError> {
    db.collection::<Payment>(PAYMENTS)
        .find_one(doc! { "_id": payment_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))
}

fn ensure_owner(payment: &Payment, claims: &Claims) -> Result<(), AppError> {
    if payment.user_id != claims.sub && !claims.is_admin() {
        log::warn!(
            "⚠️  User {} tried to access payment for order {} owned by {}",
            claims.sub, payment.gateway_order_id, payment.user_id
        );
        return Err(AppError::Forbidden("Not your payment".to_string()));
    }
    Ok(())
}

/// How a checkout proceeds once the restaurant and plan are loaded
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CheckoutKind {
    Free,
    Paid { amount: i64 },
}

/// Category check plus free/paid split; no I/O.
pub(crate) fn checkout_kind(restaurant: &Restaurant, plan: &Plan) -> Result<CheckoutKind, AppError> {
    if !plan.category.eq_ignore_ascii_case(&restaurant.category) {
        return Err(AppError::InvalidRequest(format!(
            "Plan '{}' is for '{}' businesses, not '{}'",
            plan.name, plan.category, restaurant.category
        )));
    }

    if plan.is_free() {
        return Ok(CheckoutKind::Free);
    }

    Ok(CheckoutKind::Paid {
        amount: subscription_service::amount_in_minor_units(plan.price)?,
    })
}

/// Creates the gateway order and the matching `created` payment record (not yet stored).
pub(crate) async fn open_gateway_order(
    gateway: &dyn PaymentGateway,
    user_id: &str,
    restaurant_id: ObjectId,
    plan: &Plan,
    amount: i64,
) -> Result<Payment, AppError> {
    let plan_id = plan
        .id
        .ok_or_else(|| AppError::Internal("Plan without id".to_string()))?;
    let receipt = receipt_id();

    let mut notes = HashMap::new();
    notes.insert("user_id".to_string(), user_id.to_string());
    notes.insert("restaurant_id".to_string(), restaurant_id.to_hex());
    notes.insert("plan_id".to_string(), plan_id.to_hex());

    let order = gateway
        .create_order(&CreateOrder {
            amount,
            currency: plan.currency.clone(),
            receipt: receipt.clone(),
            notes,
        })
        .await?;

    let stamp = BsonDateTime::now();
    Ok(Payment {
        id: Some(ObjectId::new()),
        user_id: user_id.to_string(),
        restaurant_id,
        plan_id,
        plan_name: plan.name.clone(),
        amount: order.amount,
        currency: order.currency,
        status: PaymentStatus::Created,
        receipt,
        gateway_order_id: order.id,
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
        created_at: stamp,
        updated_at: stamp,
    })
}

/// Starts a checkout: a gateway order for paid plans, immediate activation for free ones.
pub async fn create_order(
    db: &MongoDB,
    gateway: &dyn PaymentGateway,
    claims: &Claims,
    request: &CreateOrderRequest,
) -> Result<CreateOrderOutcome, AppError> {
    let restaurant =
        subscription_service::get_owned_restaurant(db, &request.restaurant_id, claims).await?;
    let restaurant_id = restaurant
        .id
        .ok_or_else(|| AppError::Internal("Restaurant without id".to_string()))?;

    let plan = plan_service::get_purchasable_plan(db, &request.plan_id, &claims.sub).await?;

    let amount = match checkout_kind(&restaurant, &plan)? {
        CheckoutKind::Paid { amount } => amount,
        CheckoutKind::Free => {
            let now = Utc::now();
            let period =
                subscription_service::compute_period(&plan, restaurant.subscription.as_ref(), now)?;
            let subscription =
                subscription_service::activate(db, &restaurant_id, &plan, period, None).await?;

            log::info!("🆓 Free plan '{}' activated for restaurant {}", plan.name, restaurant_id);

            let mut updated = restaurant;
            updated.subscription = Some(subscription);
            return Ok(CreateOrderOutcome::Free(FreeActivation {
                success: true,
                free: true,
                subscription: subscription_service::to_response(&updated, now),
            }));
        }
    };

    let payment = open_gateway_order(gateway, &claims.sub, restaurant_id, &plan, amount).await?;
    db.collection::<Payment>(PAYMENTS).insert_one(&payment).await?;

    log::info!(
        "🧾 Order {} created: {} {} for plan '{}' (restaurant {})",
        payment.gateway_order_id, payment.amount, payment.currency, plan.name, restaurant_id
    );

    Ok(CreateOrderOutcome::Checkout(CheckoutOrder {
        success: true,
        free: false,
        payment_id: payment.id.map(|id| id.to_hex()).unwrap_or_default(),
        order_id: payment.gateway_order_id,
        amount: payment.amount,
        currency: payment.currency,
        key_id: gateway.key_id().to_string(),
        plan_name: plan.name,
    }))
}

/// What settling has left to do for a payment in its stored state
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SettleStep {
    /// `created` or `failed`: claim it, then apply
    Fresh,
    /// `paid`, but the invoice number or the subscription write is missing
    Resume,
    /// Fully settled or refunded
    Done,
}

pub(crate) fn settle_step(payment: &Payment) -> SettleStep {
    if payment.status.can_transition_to(PaymentStatus::Paid) {
        SettleStep::Fresh
    } else if payment.settlement_incomplete() {
        SettleStep::Resume
    } else {
        SettleStep::Done
    }
}

/// Moves a payment to `paid` and extends the restaurant's subscription.
///
/// Plan, restaurant, period and invoice number are all resolved before the
/// `created|failed → paid` write, and that write stores them together. The
/// subscription update comes last and is keyed on the payment id, so a
/// payment left `paid` without it is finished by the next attempt.
pub async fn settle(
    db: &MongoDB,
    payment: Payment,
    gateway_payment_id: &str,
    signature: Option<&str>,
    method: Option<&str>,
) -> Result<Settlement, AppError> {
    let payment_oid = payment
        .id
        .ok_or_else(|| AppError::Internal("Payment without id".to_string()))?;

    match settle_step(&payment) {
        SettleStep::Done => return already_settled(db, payment).await,
        SettleStep::Resume => return finish_settlement(db, payment).await,
        SettleStep::Fresh => {}
    }

    let now = Utc::now();
    let plan = plan_service::get_plan(db, &payment.plan_id).await?;
    let restaurant = subscription_service::get_restaurant(db, &payment.restaurant_id).await?;
    let period = subscription_service::compute_period(&plan, restaurant.subscription.as_ref(), now)?;
    let invoice_number = invoice_service::next_invoice_number(db, now).await?;

    let mut set = doc! {
        "status": PaymentStatus::Paid.as_str(),
        "gateway_payment_id": gateway_payment_id,
        "paid_at": subscription_service::to_bson(now),
        "updated_at": subscription_service::to_bson(now),
        "failure_reason": null,
        "invoice_number": invoice_number.as_str(),
        "period_start": subscription_service::to_bson(period.start),
        "subscription_applied": false,
    };
    if let Some(end) = period.end {
        set.insert("period_end", subscription_service::to_bson(end));
    }
    if let Some(sig) = signature {
        set.insert("gateway_signature", sig);
    }
    if let Some(m) = method {
        set.insert("method", m);
    }

    let result = db
        .collection::<Payment>(PAYMENTS)
        .update_one(
            doc! {
                "_id": payment_oid,
                "status": { "$in": PaymentStatus::sources_of(PaymentStatus::Paid) },
            },
            doc! { "$set": set },
        )
        .await?;

    if result.modified_count == 0 {
        // Claimed concurrently (checkout callback racing the webhook); the reserved number stays unused
        log::info!(
            "ℹ️  Order {} already settled elsewhere, {} left unused",
            payment.gateway_order_id, invoice_number
        );
        let current = reload(db, &payment_oid).await?;
        return match settle_step(&current) {
            SettleStep::Resume => finish_settlement(db, current).await,
            _ => already_settled(db, current).await,
        };
    }

    log::info!(
        "✅ Payment {} claimed for order {} → invoice {}",
        gateway_payment_id, payment.gateway_order_id, invoice_number
    );

    finish_settlement(db, reload(db, &payment_oid).await?).await
}

/// Completes a `paid` payment: invoice number, period, subscription write.
/// Each step is skipped when an earlier attempt already did it.
async fn finish_settlement(db: &MongoDB, mut payment: Payment) -> Result<Settlement, AppError> {
    let payment_oid = payment
        .id
        .ok_or_else(|| AppError::Internal("Payment without id".to_string()))?;
    let paid_at = payment
        .paid_at
        .map(subscription_service::to_chrono)
        .unwrap_or_else(Utc::now);

    let plan = plan_service::get_plan(db, &payment.plan_id).await?;
    let restaurant = subscription_service::get_restaurant(db, &payment.restaurant_id).await?;
    let payments = db.collection::<Payment>(PAYMENTS);

    if payment.invoice_number.is_none() {
        let number = invoice_service::next_invoice_number(db, paid_at).await?;
        payments
            .update_one(
                doc! { "_id": payment_oid, "invoice_number": null },
                doc! { "$set": { "invoice_number": number.as_str() } },
            )
            .await?;
    }

    if payment.period_start.is_none() {
        let period =
            subscription_service::compute_period(&plan, restaurant.subscription.as_ref(), paid_at)?;
        let mut set = doc! { "period_start": subscription_service::to_bson(period.start) };
        if let Some(end) = period.end {
            set.insert("period_end", subscription_service::to_bson(end));
        }
        payments
            .update_one(doc! { "_id": payment_oid, "period_start": null }, doc! { "$set": set })
            .await?;
    }

    payment = reload(db, &payment_oid).await?;
    let period = match payment.period_start {
        Some(start) => Period {
            start: subscription_service::to_chrono(start),
            end: payment.period_end.map(subscription_service::to_chrono),
        },
        None => return Err(AppError::Internal("Settled payment without a period".to_string())),
    };

    let subscription = subscription_service::activate(
        db,
        &payment.restaurant_id,
        &plan,
        period,
        Some(payment_oid),
    )
    .await?;

    payments
        .update_one(
            doc! { "_id": payment_oid },
            doc! { "$set": { "subscription_applied": true, "updated_at": BsonDateTime::now() } },
        )
        .await?;
    payment.subscription_applied = true;

    log::info!(
        "✅ Order {} settled (invoice {})",
        payment.gateway_order_id,
        payment.invoice_number.as_deref().unwrap_or("-")
    );

    let mut updated_restaurant = restaurant;
    updated_restaurant.subscription = Some(subscription);

    Ok(Settlement {
        success: true,
        already_processed: false,
        payment: PaymentResponse::from(payment),
        subscription: subscription_service::to_response(&updated_restaurant, Utc::now()),
    })
}

async fn already_settled(db: &MongoDB, payment: Payment) -> Result<Settlement, AppError> {
    let restaurant = subscription_service::get_restaurant(db, &payment.restaurant_id).await?;
    Ok(Settlement {
        success: true,
        already_processed: true,
        payment: PaymentResponse::from(payment),
        subscription: subscription_service::to_response(&restaurant, Utc::now()),
    })
}

/// Marks a `created` payment as failed. Paid payments are never downgraded.
pub async fn mark_failed(db: &MongoDB, payment: &Payment, reason: &str) -> Result<bool, AppError> {
    let payment_oid = payment
        .id
        .ok_or_else(|| AppError::Internal("Payment without id".to_string()))?;

    let result = db
        .collection::<Payment>(PAYMENTS)
        .update_one(
            doc! {
                "_id": payment_oid,
                "status": { "$in": PaymentStatus::sources_of(PaymentStatus::Failed) },
            },
            doc! { "$set": {
                "status": PaymentStatus::Failed.as_str(),
                "failure_reason": reason,
                "updated_at": BsonDateTime::now(),
            } },
        )
        .await?;

    if result.modified_count > 0 {
        // Follow-up with the merchant happens out of band
        log::warn!(
            "⚠️  Payment for order {} failed (user {}): {}",
            payment.gateway_order_id, payment.user_id, reason
        );
    }

    Ok(result.modified_count > 0)
}

/// Checkout callback: verifies the gateway signature and settles the payment.
pub async fn verify_payment(
    db: &MongoDB,
    config: &AppConfig,
    gateway: &dyn PaymentGateway,
    claims: &Claims,
    request: &VerifyPaymentRequest,
) -> Result<Settlement, AppError> {
    let payment = find_by_order_id(db, &request.razorpay_order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

    ensure_owner(&payment, claims)?;

    let valid = signature::verify_checkout_signature(
        &config.razorpay_key_secret,
        &request.razorpay_order_id,
        &request.razorpay_payment_id,
        &request.razorpay_signature,
    );

    if !valid {
        mark_failed(db, &payment, "signature verification failed").await?;
        return Err(AppError::InvalidSignature(
            "Payment signature verification failed".to_string(),
        ));
    }

    // Payment method is informational; a lookup failure does not block settlement
    let method = if settle_step(&payment) == SettleStep::Fresh {
        match gateway.fetch_payment(&request.razorpay_payment_id).await {
            Ok(p) => p.method,
            Err(e) => {
                log::warn!("⚠️  Could not fetch payment {}: {}", request.razorpay_payment_id, e);
                None
            }
        }
    } else {
        None
    };

    settle(
        db,
        payment,
        &request.razorpay_payment_id,
        Some(&request.razorpay_signature),
        method.as_deref(),
    )
    .await
}

/// A capture for less than the order amount never settles it
pub(crate) fn is_short_capture(payment: &Payment, captured: &GatewayPayment) -> bool {
    captured.amount < payment.amount
}

/// Settles from a captured gateway payment, refusing short captures.
async fn settle_captured(
    db: &MongoDB,
    payment: Payment,
    captured: &GatewayPayment,
) -> Result<String, AppError> {
    if is_short_capture(&payment, captured) {
        log::error!(
            "❌ Order {} captured {} but {} was due; not settling",
            payment.gateway_order_id, captured.amount, payment.amount
        );
        return Ok("ignored: amount mismatch".to_string());
    }

    let settlement = settle(db, payment, &captured.id, None, captured.method.as_deref()).await?;
    Ok(if settlement.already_processed {
        "already settled".to_string()
    } else {
        "settled".to_string()
    })
}

/// What a webhook event asks for, before any database access
#[derive(Debug)]
pub(crate) enum WebhookAction<'a> {
    Capture { order_id: &'a str, payment: &'a GatewayPayment },
    Fail { order_id: &'a str, reason: String },
    Refund(&'a GatewayRefund),
    Ignore(String),
}

pub(crate) fn webhook_action(event: &WebhookEvent) -> WebhookAction<'_> {
    match event.event.as_str() {
        "payment.captured" | "order.paid" => match (event.order_id(), event.payment()) {
            (Some(order_id), Some(payment)) => WebhookAction::Capture { order_id, payment },
            (None, _) => WebhookAction::Ignore("ignored: no order id".to_string()),
            (Some(_), None) => WebhookAction::Ignore("ignored: no payment entity".to_string()),
        },
        "payment.failed" => match event.order_id() {
            Some(order_id) => WebhookAction::Fail {
                order_id,
                reason: event
                    .payment()
                    .and_then(|p| p.error_description.clone().or_else(|| p.error_code.clone()))
                    .unwrap_or_else(|| "payment failed".to_string()),
            },
            None => WebhookAction::Ignore("ignored: no order id".to_string()),
        },
        "refund.processed" | "refund.created" => match event.refund() {
            Some(refund) => WebhookAction::Refund(refund),
            None => WebhookAction::Ignore("ignored: no refund entity".to_string()),
        },
        other => WebhookAction::Ignore(format!("ignored: unhandled event {}", other)),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RefundDecision {
    NotRefundable,
    Duplicate,
    /// Add the refund; `total` is the new running sum
    Record { total: i64, full: bool },
}

/// Partial refunds accumulate; the payment becomes `refunded` once they cover the amount.
pub(crate) fn refund_decision(payment: &Payment, refund: &GatewayRefund) -> RefundDecision {
    if !matches!(payment.status, PaymentStatus::Paid | PaymentStatus::Refunded) {
        return RefundDecision::NotRefundable;
    }
    if payment.refund_ids.iter().any(|id| id == &refund.id) {
        return RefundDecision::Duplicate;
    }

    let total = payment.refunded_amount.unwrap_or(0) + refund.amount;
    RefundDecision::Record {
        total,
        full: total >= payment.amount,
    }
}

async fn record_refund(db: &MongoDB, refund: &GatewayRefund) -> Result<String, AppError> {
    let payments = db.collection::<Payment>(PAYMENTS);
    let Some(payment) = payments
        .find_one(doc! { "gateway_payment_id": refund.payment_id.as_str() })
        .await?
    else {
        return Ok("ignored: unknown payment".to_string());
    };
    let payment_oid = payment
        .id
        .ok_or_else(|| AppError::Internal("Payment without id".to_string()))?;

    let (total, full) = match refund_decision(&payment, refund) {
        RefundDecision::NotRefundable => return Ok(format!("ignored: payment is {}", payment.status)),
        RefundDecision::Duplicate => return Ok("ignored: refund already recorded".to_string()),
        RefundDecision::Record { total, full } => (total, full),
    };

    let result = payments
        .update_one(
            doc! {
                "_id": payment_oid,
                "status": { "$in": [PaymentStatus::Paid.as_str(), PaymentStatus::Refunded.as_str()] },
                "refund_ids": { "$ne": refund.id.as_str() },
            },
            doc! {
                "$push": { "refund_ids": refund.id.as_str() },
                "$inc": { "refunded_amount": refund.amount },
                "$set": { "refund_id": refund.id.as_str(), "updated_at": BsonDateTime::now() },
            },
        )
        .await?;

    if result.modified_count == 0 {
        return Ok("ignored: refund already recorded".to_string());
    }

    // Status follows the stored running total, not this event's snapshot
    payments
        .update_one(
            doc! {
                "_id": payment_oid,
                "status": { "$in": PaymentStatus::sources_of(PaymentStatus::Refunded) },
                "$expr": { "$gte": ["$refunded_amount", "$amount"] },
            },
            doc! { "$set": { "status": PaymentStatus::Refunded.as_str() } },
        )
        .await?;

    log::info!(
        "↩️  Refund {} on payment {}: {} of {} refunded",
        refund.id, refund.payment_id, total, payment.amount
    );

    Ok(if full {
        "marked refunded".to_string()
    } else {
        "partial refund recorded".to_string()
    })
}

/// Applies one webhook event to the matching payment.
async fn apply_event(db: &MongoDB, event: &WebhookEvent) -> Result<String, AppError> {
    match webhook_action(event) {
        WebhookAction::Capture { order_id, payment: captured } => {
            let Some(payment) = find_by_order_id(db, order_id).await? else {
                return Ok("ignored: unknown order".to_string());
            };
            settle_captured(db, payment, captured).await
        }
        WebhookAction::Fail { order_id, reason } => {
            let Some(payment) = find_by_order_id(db, order_id).await? else {
                return Ok("ignored: unknown order".to_string());
            };
            if !payment.status.can_transition_to(PaymentStatus::Failed) {
                return Ok(format!("ignored: payment is {}", payment.status));
            }
            if mark_failed(db, &payment, &reason).await? {
                Ok("marked failed".to_string())
            } else {
                Ok("ignored: payment changed concurrently".to_string())
            }
        }
        WebhookAction::Refund(refund) => record_refund(db, refund).await,
        WebhookAction::Ignore(reason) => Ok(reason),
    }
}

/// Authenticates and applies a gateway webhook delivery.
pub async fn handle_webhook(
    db: &MongoDB,
    config: &AppConfig,
    body: &[u8],
    signature_header: Option<&str>,
    event_id: Option<&str>,
) -> Result<WebhookAck, AppError> {
    let event = parse_webhook(config, body, signature_header)?;

    if let Some(id) = event_id {
        if cache::check_and_mark_event(id) {
            log::info!("🔁 Duplicate webhook {} ({}) skipped", id, event.event);
            return Ok(WebhookAck {
                success: true,
                event: event.event,
                action: "duplicate".to_string(),
                duplicate: true,
            });
        }
    }

    log::info!(
        "📨 Webhook {} (id: {}, created_at: {})",
        event.event,
        event_id.unwrap_or("-"),
        event.created_at.unwrap_or_default()
    );

    match apply_event(db, &event).await {
        Ok(action) => {
            log::info!("✅ Webhook {} → {}", event.event, action);
            Ok(WebhookAck {
                success: true,
                event: event.event,
                action,
                duplicate: false,
            })
        }
        Err(e) => {
            // Let the gateway's retry reprocess it
            if let Some(id) = event_id {
                cache::forget_event(id);
            }
            Err(e)
        }
    }
}

/// Signature check then JSON parse; no database access.
pub fn parse_webhook(
    config: &AppConfig,
    body: &[u8],
    signature_header: Option<&str>,
) -> Result<WebhookEvent, AppError> {
    let signature = signature_header
        .ok_or_else(|| AppError::InvalidSignature("Missing webhook signature".to_string()))?;

    if !signature::verify_webhook_signature(&config.razorpay_webhook_secret, body, signature) {
        return Err(AppError::InvalidSignature("Webhook signature mismatch".to_string()));
    }

    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed webhook payload: {}", e)))
}

/// The caller's payments, newest first.
pub async fn payment_history(
    db: &MongoDB,
    claims: &Claims,
    query: &HistoryQuery,
) -> Result<Vec<PaymentResponse>, AppError> {
    let user_id = match &query.user_id {
        Some(other) if other != &claims.sub => {
            if !claims.is_admin() {
                return Err(AppError::Forbidden("Cannot read another user's payments".to_string()));
            }
            other.clone()
        }
        _ => claims.sub.clone(),
    };

    let mut filter = doc! { "user_id": &user_id };
    if let Some(restaurant_id) = &query.restaurant_id {
        filter.insert("restaurant_id", ObjectId::parse_str(restaurant_id)?);
    }

    let payments: Vec<Payment> = db
        .collection::<Payment>(PAYMENTS)
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .limit(HISTORY_LIMIT)
        .await?
        .try_collect()
        .await?;

    Ok(payments.into_iter().map(PaymentResponse::from).collect())
}

/// What the gateway's attempts say about an order
#[derive(Debug)]
pub(crate) enum AttemptsVerdict<'a> {
    Captured(&'a GatewayPayment),
    /// Every attempt failed; carries the last failure reason
    AllFailed(String),
    Pending,
}

pub(crate) fn classify_attempts(attempts: &[GatewayPayment]) -> AttemptsVerdict<'_> {
    if let Some(captured) = attempts.iter().find(|p| p.is_captured()) {
        return AttemptsVerdict::Captured(captured);
    }
    if !attempts.is_empty() && attempts.iter().all(|p| p.is_failed()) {
        let reason = attempts
            .last()
            .and_then(|p| p.error_description.clone().or_else(|| p.error_code.clone()))
            .unwrap_or_else(|| "payment failed".to_string());
        return AttemptsVerdict::AllFailed(reason);
    }
    AttemptsVerdict::Pending
}

/// Pulls the order's attempts from the gateway and settles/fails the payment.
pub async fn reconcile(
    db: &MongoDB,
    gateway: &dyn PaymentGateway,
    claims: &Claims,
    order_id: &str,
) -> Result<ReconcileOutcome, AppError> {
    let payment = find_by_order_id(db, order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;

    ensure_owner(&payment, claims)?;

    match settle_step(&payment) {
        SettleStep::Done => {
            return Ok(ReconcileOutcome {
                success: true,
                result: "unchanged".to_string(),
                payment: PaymentResponse::from(payment),
            });
        }
        SettleStep::Resume => {
            log::info!("🔧 Order {} is paid but unfinished; completing", order_id);
            let gateway_payment_id = payment.gateway_payment_id.clone().unwrap_or_default();
            let settlement = settle(db, payment, &gateway_payment_id, None, None).await?;
            return Ok(ReconcileOutcome {
                success: true,
                result: "paid".to_string(),
                payment: settlement.payment,
            });
        }
        SettleStep::Fresh => {}
    }

    let payment_oid = payment
        .id
        .ok_or_else(|| AppError::Internal("Payment without id".to_string()))?;

    let attempts = gateway.fetch_order_payments(order_id).await?;
    log::info!("🔎 Reconciling order {}: {} attempt(s) at gateway", order_id, attempts.len());

    let result = match classify_attempts(&attempts) {
        AttemptsVerdict::Captured(captured) => {
            let action = settle_captured(db, payment, captured).await?;
            if action.starts_with("ignored") {
                "pending"
            } else {
                "paid"
            }
        }
        AttemptsVerdict::AllFailed(reason) => {
            mark_failed(db, &payment, &reason).await?;
            "failed"
        }
        AttemptsVerdict::Pending => "pending",
    };

    Ok(ReconcileOutcome {
        success: true,
        result: result.to_string(),
        payment: PaymentResponse::from(reload(db, &payment_oid).await?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(config: &AppConfig, body: &str) -> String {
        signature::sign(&config.razorpay_webhook_secret, body.as_bytes())
    }

    #[test]
    fn test_receipt_id_shape() {
        let receipt = receipt_id();
        assert!(receipt.starts_with("rcpt_"));
        assert_eq!(receipt.len(), 17);
        assert_ne!(receipt, receipt_id());
    }

    #[test]
    fn test_parse_webhook_requires_signature() {
        let config = AppConfig::for_tests();
        let result = parse_webhook(&config, b"{\"event\":\"payment.captured\"}", None);
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn test_parse_webhook_rejects_bad_signature() {
        let config = AppConfig::for_tests();
        let body = r#"{"event":"payment.captured"}"#;
        let wrong = signature::sign("other-secret", body.as_bytes());
        let result = parse_webhook(&config, body.as_bytes(), Some(&wrong));
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn test_parse_webhook_malformed_json_after_valid_signature() {
        let config = AppConfig::for_tests();
        let body = "{not json";
        let result = parse_webhook(&config, body.as_bytes(), Some(&signed(&config, body)));
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_parse_webhook_accepts_signed_event() {
        let config = AppConfig::for_tests();
        let body = r#"{"event":"refund.processed","payload":{"refund":{"entity":{"id":"rfnd_1","payment_id":"pay_1","amount":500}}}}"#;
        let event = parse_webhook(&config, body.as_bytes(), Some(&signed(&config, body))).unwrap();
        assert_eq!(event.event, "refund.processed");
        assert_eq!(event.refund().unwrap().payment_id, "pay_1");
    }

    #[test]
    fn test_ensure_owner() {
        use crate::models::test_payment;
        let payment = test_payment("owner-1", PaymentStatus::Created);

        let claims = |sub: &str, roles: &[&str]| Claims {
            sub: sub.to_string(),
            email: String::new(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat: 0,
            exp: 0,
            jti: String::new(),
            aud: String::new(),
            iss: String::new(),
        };

        assert!(ensure_owner(&payment, &claims("owner-1", &["user"])).is_ok());
        assert!(matches!(
            ensure_owner(&payment, &claims("owner-2", &["user"])),
            Err(AppError::Forbidden(_))
        ));
        assert!(ensure_owner(&payment, &claims("ops", &["admin"])).is_ok());
    }

    use crate::gateway::GatewayOrder;
    use crate::models::{test_payment, test_plan, test_restaurant, BillingCycle};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records orders and returns canned attempts
    struct MockGateway {
        orders: Mutex<Vec<CreateOrder>>,
        attempts: Vec<GatewayPayment>,
    }

    impl MockGateway {
        fn new(attempts: Vec<GatewayPayment>) -> Self {
            Self { orders: Mutex::new(vec![]), attempts }
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn key_id(&self) -> &str {
            "rzp_test_mock"
        }

        async fn create_order(&self, order: &CreateOrder) -> Result<GatewayOrder, AppError> {
            self.orders.lock().unwrap().push(order.clone());
            Ok(GatewayOrder {
                id: format!("order_mock{}", self.orders.lock().unwrap().len()),
                amount: order.amount,
                currency: order.currency.clone(),
                receipt: Some(order.receipt.clone()),
                status: "created".to_string(),
            })
        }

        async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, AppError> {
            self.attempts
                .iter()
                .find(|p| p.id == payment_id)
                .cloned()
                .ok_or_else(|| AppError::GatewayError("unknown payment".to_string()))
        }

        async fn fetch_order_payments(&self, _order_id: &str) -> Result<Vec<GatewayPayment>, AppError> {
            Ok(self.attempts.clone())
        }
    }

    fn attempt(id: &str, status: &str, amount: i64) -> GatewayPayment {
        GatewayPayment {
            id: id.to_string(),
            amount,
            currency: "INR".to_string(),
            status: status.to_string(),
            order_id: Some("order_TEST123".to_string()),
            method: Some("upi".to_string()),
            error_code: None,
            error_description: if status == "failed" { Some(format!("{} declined", id)) } else { None },
        }
    }

    fn refund(id: &str, amount: i64) -> GatewayRefund {
        GatewayRefund {
            id: id.to_string(),
            payment_id: "pay_1".to_string(),
            amount,
            status: Some("processed".to_string()),
        }
    }

    fn event(body: &str) -> WebhookEvent {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_checkout_kind_rejects_other_category() {
        let restaurant = test_restaurant("u1");
        let mut plan = test_plan("pro", 1499.0, BillingCycle::Monthly);
        plan.category = "salon".to_string();

        let err = checkout_kind(&restaurant, &plan).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(actix_web::ResponseError::status_code(&err), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_checkout_kind_category_is_case_insensitive() {
        let restaurant = test_restaurant("u1");
        let mut plan = test_plan("pro", 1499.0, BillingCycle::Monthly);
        plan.category = "Restaurant".to_string();

        assert_eq!(checkout_kind(&restaurant, &plan).unwrap(), CheckoutKind::Paid { amount: 149_900 });
    }

    #[test]
    fn test_checkout_kind_free_plan_never_needs_gateway() {
        let restaurant = test_restaurant("u1");
        let plan = test_plan("free", 0.0, BillingCycle::Monthly);
        assert_eq!(checkout_kind(&restaurant, &plan).unwrap(), CheckoutKind::Free);
    }

    #[tokio::test]
    async fn test_open_gateway_order_sends_minor_units_and_notes() {
        let gateway = MockGateway::new(vec![]);
        let restaurant_id = ObjectId::new();
        let plan = test_plan("pro", 1499.0, BillingCycle::Monthly);

        let payment = open_gateway_order(&gateway, "u1", restaurant_id, &plan, 149_900).await.unwrap();

        let orders = gateway.orders.lock().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount, 149_900);
        assert_eq!(orders[0].currency, "INR");
        assert_eq!(orders[0].receipt, payment.receipt);
        assert_eq!(orders[0].notes["restaurant_id"], restaurant_id.to_hex());
        assert_eq!(orders[0].notes["user_id"], "u1");

        assert_eq!(payment.status, PaymentStatus::Created);
        assert_eq!(payment.gateway_order_id, "order_mock1");
        assert_eq!(payment.amount, 149_900);
        assert!(payment.invoice_number.is_none());
        assert!(!payment.subscription_applied);
    }

    #[tokio::test]
    async fn test_classify_attempts_from_gateway() {
        let gateway = MockGateway::new(vec![
            attempt("pay_1", "failed", 149_900),
            attempt("pay_2", "captured", 149_900),
        ]);
        let attempts = gateway.fetch_order_payments("order_TEST123").await.unwrap();
        assert!(matches!(classify_attempts(&attempts), AttemptsVerdict::Captured(p) if p.id == "pay_2"));

        let all_failed = vec![attempt("pay_1", "failed", 100), attempt("pay_2", "failed", 100)];
        assert!(matches!(
            classify_attempts(&all_failed),
            AttemptsVerdict::AllFailed(reason) if reason == "pay_2 declined"
        ));

        let mixed = vec![attempt("pay_1", "failed", 100), attempt("pay_2", "authorized", 100)];
        assert!(matches!(classify_attempts(&mixed), AttemptsVerdict::Pending));
        assert!(matches!(classify_attempts(&[]), AttemptsVerdict::Pending));
    }

    #[test]
    fn test_settle_step() {
        assert_eq!(settle_step(&test_payment("u1", PaymentStatus::Created)), SettleStep::Fresh);
        assert_eq!(settle_step(&test_payment("u1", PaymentStatus::Failed)), SettleStep::Fresh);
        assert_eq!(settle_step(&test_payment("u1", PaymentStatus::Refunded)), SettleStep::Done);

        let mut paid = test_payment("u1", PaymentStatus::Paid);
        assert_eq!(settle_step(&paid), SettleStep::Resume);

        paid.invoice_number = Some("INV-20260301-000001".to_string());
        assert_eq!(settle_step(&paid), SettleStep::Resume);

        paid.subscription_applied = true;
        assert_eq!(settle_step(&paid), SettleStep::Done);
    }

    #[test]
    fn test_short_capture_is_not_settled() {
        let payment = test_payment("u1", PaymentStatus::Created);
        assert!(is_short_capture(&payment, &attempt("pay_1", "captured", 100)));
        assert!(!is_short_capture(&payment, &attempt("pay_1", "captured", 149_900)));
    }

    #[test]
    fn test_webhook_action_mapping() {
        let captured = event(
            r#"{"event":"payment.captured","payload":{"payment":{"entity":{"id":"pay_1","amount":149900,"currency":"INR","status":"captured","order_id":"order_1"}}}}"#,
        );
        assert!(matches!(
            webhook_action(&captured),
            WebhookAction::Capture { order_id: "order_1", payment } if payment.id == "pay_1"
        ));

        let failed = event(
            r#"{"event":"payment.failed","payload":{"payment":{"entity":{"id":"pay_1","amount":149900,"currency":"INR","status":"failed","order_id":"order_1","error_code":"BAD_REQUEST_ERROR"}}}}"#,
        );
        assert!(matches!(
            webhook_action(&failed),
            WebhookAction::Fail { order_id: "order_1", reason } if reason == "BAD_REQUEST_ERROR"
        ));

        let refunded = event(
            r#"{"event":"refund.processed","payload":{"refund":{"entity":{"id":"rfnd_1","payment_id":"pay_1","amount":500}}}}"#,
        );
        assert!(matches!(webhook_action(&refunded), WebhookAction::Refund(r) if r.id == "rfnd_1"));

        let unknown = event(r#"{"event":"subscription.charged"}"#);
        assert!(matches!(webhook_action(&unknown), WebhookAction::Ignore(_)));

        let orphan = event(r#"{"event":"payment.failed"}"#);
        assert!(matches!(webhook_action(&orphan), WebhookAction::Ignore(_)));
    }

    #[test]
    fn test_failure_after_paid_is_ignored() {
        assert!(!test_payment("u1", PaymentStatus::Paid).status.can_transition_to(PaymentStatus::Failed));
        assert!(!test_payment("u1", PaymentStatus::Refunded).status.can_transition_to(PaymentStatus::Failed));
        assert!(test_payment("u1", PaymentStatus::Created).status.can_transition_to(PaymentStatus::Failed));
    }

    #[test]
    fn test_two_partial_refunds_accumulate() {
        let mut payment = test_payment("u1", PaymentStatus::Paid);
        payment.amount = 1_000;

        let first = refund("rfnd_1", 400);
        assert_eq!(refund_decision(&payment, &first), RefundDecision::Record { total: 400, full: false });

        // As stored after the first refund
        payment.refund_ids.push(first.id.clone());
        payment.refunded_amount = Some(400);
        assert_eq!(refund_decision(&payment, &first), RefundDecision::Duplicate);

        let second = refund("rfnd_2", 600);
        assert_eq!(refund_decision(&payment, &second), RefundDecision::Record { total: 1_000, full: true });
    }

    #[test]
    fn test_refund_needs_a_paid_payment() {
        let created = test_payment("u1", PaymentStatus::Created);
        assert_eq!(refund_decision(&created, &refund("rfnd_1", 10)), RefundDecision::NotRefundable);
        let failed = test_payment("u1", PaymentStatus::Failed);
        assert_eq!(refund_decision(&failed, &refund("rfnd_1", 10)), RefundDecision::NotRefundable);
    }

    async fn seed(db: &MongoDB, status: PaymentStatus) -> (Payment, Restaurant, Plan) {
        let restaurant = test_restaurant("u1");
        let plan = test_plan("pro", 1499.0, BillingCycle::Monthly);
        let mut payment = test_payment("u1", status);
        payment.restaurant_id = restaurant.id.unwrap();
        payment.plan_id = plan.id.unwrap();
        payment.gateway_order_id = format!("order_{}", ObjectId::new().to_hex());

        db.collection::<Restaurant>(crate::database::RESTAURANTS).insert_one(&restaurant).await.unwrap();
        db.collection::<Plan>(crate::database::PLANS).insert_one(&plan).await.unwrap();
        db.collection::<Payment>(PAYMENTS).insert_one(&payment).await.unwrap();
        (payment, restaurant, plan)
    }

    #[tokio::test]
    #[ignore] // needs TEST_DATABASE_URL
    async fn test_settling_twice_keeps_one_invoice_and_one_period() {
        let db = crate::database::test_database().await;
        let (payment, restaurant, _) = seed(&db, PaymentStatus::Created).await;

        let first = settle(&db, payment.clone(), "pay_1", None, None).await.unwrap();
        assert!(!first.already_processed);

        let second = settle(&db, payment.clone(), "pay_1", None, None).await.unwrap();
        assert!(second.already_processed);
        assert_eq!(second.payment.invoice_number, first.payment.invoice_number);
        assert_eq!(second.subscription.end_date, first.subscription.end_date);

        let stored = reload(&db, &payment.id.unwrap()).await.unwrap();
        assert!(stored.subscription_applied);
        let current = subscription_service::get_restaurant(&db, &restaurant.id.unwrap()).await.unwrap();
        assert_eq!(current.subscription.unwrap().last_payment_id, payment.id);
    }

    #[tokio::test]
    #[ignore] // needs TEST_DATABASE_URL
    async fn test_failed_payment_can_still_settle() {
        let db = crate::database::test_database().await;
        let (payment, _, _) = seed(&db, PaymentStatus::Created).await;

        assert!(mark_failed(&db, &payment, "card declined").await.unwrap());
        let failed = reload(&db, &payment.id.unwrap()).await.unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);

        let settlement = settle(&db, failed, "pay_2", None, None).await.unwrap();
        assert_eq!(settlement.payment.status, PaymentStatus::Paid);
        assert!(settlement.payment.failure_reason.is_none());
        assert!(settlement.payment.invoice_number.is_some());

        // A late failure notice does not downgrade it
        let paid = reload(&db, &payment.id.unwrap()).await.unwrap();
        assert!(!mark_failed(&db, &paid, "late decline").await.unwrap());
    }

    #[tokio::test]
    #[ignore] // needs TEST_DATABASE_URL
    async fn test_interrupted_settlement_is_completed_on_retry() {
        let db = crate::database::test_database().await;
        let (mut payment, restaurant, _) = seed(&db, PaymentStatus::Created).await;

        // Paid but neither numbered nor applied, as left by a crash mid-settlement
        db.collection::<Payment>(PAYMENTS)
            .update_one(
                doc! { "_id": payment.id.unwrap() },
                doc! { "$set": { "status": "paid", "gateway_payment_id": "pay_3", "paid_at": BsonDateTime::now() } },
            )
            .await
            .unwrap();
        payment = reload(&db, &payment.id.unwrap()).await.unwrap();
        assert_eq!(settle_step(&payment), SettleStep::Resume);

        let settlement = settle(&db, payment.clone(), "pay_3", None, None).await.unwrap();
        assert!(settlement.payment.invoice_number.is_some());
        assert!(settlement.payment.period_start.is_some());

        let current = subscription_service::get_restaurant(&db, &restaurant.id.unwrap()).await.unwrap();
        assert_eq!(current.subscription.unwrap().last_payment_id, payment.id);
        assert_eq!(settle_step(&reload(&db, &payment.id.unwrap()).await.unwrap()), SettleStep::Done);
    }
}
