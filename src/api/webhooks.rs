use actix_web::{web, HttpRequest, HttpResponse};

use crate::api::metrics;
use crate::config::AppConfig;
use crate::database::MongoDB;
use crate::services::payment_service::{self, WebhookAck};
use crate::utils::AppError;

const SIGNATURE_HEADER: &str = "X-Razorpay-Signature";
const EVENT_ID_HEADER: &str = "X-Razorpay-Event-Id";

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Signed server-to-server callback. The signature covers the raw body,
/// so it is taken as bytes and parsed only after verification.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/razorpay",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    tag = "Webhooks",
    responses(
        (status = 200, description = "Event applied, ignored or recognised as duplicate", body = WebhookAck),
        (status = 400, description = "Bad signature or malformed payload")
    )
)]
pub async fn razorpay_webhook(
    req: HttpRequest,
    body: web::Bytes,
    db: web::Data<MongoDB>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, AppError> {
    metrics::increment_webhooks_received();

    let signature = header(&req, SIGNATURE_HEADER);
    let event_id = header(&req, EVENT_ID_HEADER);

    match payment_service::handle_webhook(&db, &config, &body, signature, event_id).await {
        Ok(ack) => Ok(HttpResponse::Ok().json(ack)),
        Err(e) => {
            if matches!(e, AppError::InvalidSignature(_)) {
                metrics::increment_signature_failures();
                log::warn!("🚫 Webhook rejected from {:?}: {}", req.peer_addr(), e);
            } else {
                log::error!("❌ Webhook processing failed: {}", e);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::signature;
    use actix_web::{http::StatusCode, test, App};

    async fn app_data() -> (web::Data<MongoDB>, web::Data<AppConfig>) {
        (
            web::Data::new(MongoDB::unconnected().await),
            web::Data::new(AppConfig::for_tests()),
        )
    }

    fn webhook_request(body: &str, signature: Option<String>, event_id: Option<&str>) -> test::TestRequest {
        let mut req = test::TestRequest::post()
            .uri("/api/v1/webhooks/razorpay")
            .insert_header(("Content-Type", "application/json"))
            .set_payload(body.to_string());
        if let Some(sig) = signature {
            req = req.insert_header((SIGNATURE_HEADER, sig));
        }
        if let Some(id) = event_id {
            req = req.insert_header((EVENT_ID_HEADER, id));
        }
        req
    }

    #[actix_web::test]
    async fn test_missing_signature_is_rejected() {
        let (db, config) = app_data().await;
        let app = test::init_service(
            App::new()
                .app_data(db)
                .app_data(config)
                .route("/api/v1/webhooks/razorpay", web::post().to(razorpay_webhook)),
        )
        .await;

        let resp = test::call_service(&app, webhook_request("{}", None, None).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn test_tampered_body_is_rejected() {
        let (db, config) = app_data().await;
        let original = r#"{"event":"payment.captured","payload":{}}"#;
        let sig = signature::sign(&config.razorpay_webhook_secret, original.as_bytes());

        let app = test::init_service(
            App::new()
                .app_data(db)
                .app_data(config)
                .route("/api/v1/webhooks/razorpay", web::post().to(razorpay_webhook)),
        )
        .await;

        let tampered = r#"{"event":"payment.captured","payload":{"x":1}}"#;
        let resp = test::call_service(&app, webhook_request(tampered, Some(sig), None).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unhandled_event_is_acknowledged_once() {
        let (db, config) = app_data().await;
        let body = r#"{"event":"subscription.charged","payload":{}}"#;
        let sig = signature::sign(&config.razorpay_webhook_secret, body.as_bytes());
        let event_id = format!("evt_{}", uuid::Uuid::new_v4().simple());

        let app = test::init_service(
            App::new()
                .app_data(db)
                .app_data(config)
                .route("/api/v1/webhooks/razorpay", web::post().to(razorpay_webhook)),
        )
        .await;

        let resp = test::call_service(&app, webhook_request(body, Some(sig.clone()), Some(&event_id)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let ack: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(ack["duplicate"], false);
        assert_eq!(ack["action"], "ignored: unhandled event subscription.charged");

        let resp = test::call_service(&app, webhook_request(body, Some(sig), Some(&event_id)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let ack: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(ack["duplicate"], true);
    }
}
