use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::api::metrics;
use crate::config::AppConfig;
use crate::database::MongoDB;
use crate::gateway::PaymentGateway;
use crate::services::auth_service::Claims;
use crate::services::invoice_service::{self, Invoice};
use crate::services::payment_service::{
    self, CheckoutOrder, CreateOrderOutcome, CreateOrderRequest, HistoryQuery, ReconcileOutcome,
    Settlement, VerifyPaymentRequest,
};
use crate::utils::AppError;

#[utoipa::path(
    post,
    path = "/api/v1/payments/create-order",
    tag = "Payments",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Gateway order created, or free plan activated", body = CheckoutOrder),
        (status = 400, description = "Plan not valid for this restaurant"),
        (status = 403, description = "Restaurant belongs to another user"),
        (status = 502, description = "Payment gateway unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_order(
    db: web::Data<MongoDB>,
    gateway: web::Data<dyn PaymentGateway>,
    claims: web::ReqData<Claims>,
    request: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    log::info!(
        "💳 POST /payments/create-order - restaurant: {}, plan: {}, user: {}",
        request.restaurant_id, request.plan_id, claims.sub
    );

    let outcome =
        payment_service::create_order(&db, gateway.get_ref(), &claims, &request).await?;

    if let CreateOrderOutcome::Checkout(_) = &outcome {
        metrics::increment_orders_created();
    }

    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    tag = "Payments",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified and subscription extended", body = Settlement),
        (status = 400, description = "Signature mismatch"),
        (status = 404, description = "Unknown order")
    ),
    security(("bearer_auth" = []))
)]
pub async fn verify_payment(
    db: web::Data<MongoDB>,
    config: web::Data<AppConfig>,
    gateway: web::Data<dyn PaymentGateway>,
    claims: web::ReqData<Claims>,
    request: web::Json<VerifyPaymentRequest>,
) -> Result<HttpResponse, AppError> {
    log::info!("🔏 POST /payments/verify - order: {}", request.razorpay_order_id);

    match payment_service::verify_payment(&db, &config, gateway.get_ref(), &claims, &request).await {
        Ok(settlement) => {
            if !settlement.already_processed {
                metrics::increment_payments_settled();
            }
            Ok(HttpResponse::Ok().json(settlement))
        }
        Err(e) => {
            if matches!(e, AppError::InvalidSignature(_)) {
                metrics::increment_signature_failures();
            }
            log::warn!("❌ Verification failed for {}: {}", request.razorpay_order_id, e);
            Err(e)
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/history",
    tag = "Payments",
    params(
        ("restaurant_id" = Option<String>, Query, description = "Only payments for this restaurant"),
        ("user_id" = Option<String>, Query, description = "Another user's history (admin only)")
    ),
    responses(
        (status = 200, description = "Payments, newest first"),
        (status = 403, description = "Not allowed to read that user's history")
    ),
    security(("bearer_auth" = []))
)]
pub async fn payment_history(
    db: web::Data<MongoDB>,
    claims: web::ReqData<Claims>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    log::info!("📜 GET /payments/history - user: {}", claims.sub);

    let payments = payment_service::payment_history(&db, &claims, &query).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "payments": payments,
        "total": payments.len()
    })))
}

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    /// `json` (default) or `text`
    pub format: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}/invoice",
    tag = "Payments",
    params(
        ("id" = String, Path, description = "Payment id"),
        ("format" = Option<String>, Query, description = "json (default) or text")
    ),
    responses(
        (status = 200, description = "Invoice", body = Invoice),
        (status = 404, description = "Payment not found"),
        (status = 409, description = "Payment has no invoice yet")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_invoice(
    db: web::Data<MongoDB>,
    config: web::Data<AppConfig>,
    claims: web::ReqData<Claims>,
    path: web::Path<String>,
    query: web::Query<InvoiceQuery>,
) -> Result<HttpResponse, AppError> {
    let payment_id = path.into_inner();
    log::info!("🧾 GET /payments/{}/invoice", payment_id);

    let invoice = invoice_service::get_invoice(&db, &config, &payment_id, &claims).await?;

    match query.format.as_deref() {
        Some("text") => Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(invoice_service::render_text(&invoice))),
        None | Some("json") => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "invoice": invoice
        }))),
        Some(other) => Err(AppError::InvalidRequest(format!("Unknown invoice format '{}'", other))),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/{order_id}/reconcile",
    tag = "Payments",
    params(("order_id" = String, Path, description = "Gateway order id")),
    responses(
        (status = 200, description = "Payment state after checking the gateway", body = ReconcileOutcome),
        (status = 404, description = "Unknown order"),
        (status = 502, description = "Payment gateway unavailable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn reconcile(
    db: web::Data<MongoDB>,
    gateway: web::Data<dyn PaymentGateway>,
    claims: web::ReqData<Claims>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    log::info!("🔎 POST /payments/{}/reconcile - user: {}", order_id, claims.sub);

    let outcome = payment_service::reconcile(&db, gateway.get_ref(), &claims, &order_id).await?;
    if outcome.result == "paid" {
        metrics::increment_payments_settled();
    }
    Ok(HttpResponse::Ok().json(outcome))
}
