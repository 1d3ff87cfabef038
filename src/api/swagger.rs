use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "QR Presence Billing API",
        version = "1.0.0",
        description = "Plans, subscriptions and payments for QR Presence businesses.\n\n**Authentication:** every `/api/v1` endpoint except register, login and the gateway webhook requires a JWT Bearer token.\n\n**Payments:** checkout goes through Razorpay. A payment is settled either by the checkout callback (`/payments/verify`) or by the signed webhook, whichever arrives first.",
        contact(
            name = "QR Presence Team",
            email = "support@qrpresence.in"
        )
    ),
    paths(
        // Auth
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::auth::refresh_token,
        crate::api::auth::get_me,

        // Health & Metrics
        crate::api::health::health_check,
        crate::api::metrics::get_metrics,

        // Plans & subscriptions
        crate::api::plans::list_plans,
        crate::api::subscriptions::get_subscription,

        // Payments
        crate::api::payments::create_order,
        crate::api::payments::verify_payment,
        crate::api::payments::payment_history,
        crate::api::payments::get_invoice,
        crate::api::payments::reconcile,

        // Webhooks
        crate::api::webhooks::razorpay_webhook,
    ),
    components(
        schemas(
            crate::services::auth_service::LoginRequest,
            crate::services::auth_service::RegisterRequest,
            crate::services::auth_service::AuthResponse,
            crate::models::UserInfo,

            crate::api::health::HealthResponse,
            crate::api::metrics::MetricsResponse,

            crate::models::BillingCycle,
            crate::models::PlanResponse,
            crate::models::SubscriptionStatus,
            crate::models::SubscriptionResponse,

            crate::models::PaymentStatus,
            crate::models::PaymentResponse,
            crate::services::payment_service::CreateOrderRequest,
            crate::services::payment_service::CheckoutOrder,
            crate::services::payment_service::FreeActivation,
            crate::services::payment_service::VerifyPaymentRequest,
            crate::services::payment_service::Settlement,
            crate::services::payment_service::ReconcileOutcome,
            crate::services::payment_service::WebhookAck,
            crate::services::invoice_service::Invoice,
            crate::services::invoice_service::InvoiceLine,
        )
    ),
    tags(
        (name = "Auth", description = "Registration, login and token refresh."),
        (name = "Health", description = "Liveness and Prometheus metrics."),
        (name = "Plans", description = "Plan catalogue per business category, including plans customised for the caller."),
        (name = "Subscriptions", description = "Current subscription of a restaurant."),
        (name = "Payments", description = "Checkout, verification, history, invoices and reconciliation."),
        (name = "Webhooks", description = "Signed Razorpay event deliveries."),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Enter your JWT token"))
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_billing_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/plans",
            "/api/v1/payments/create-order",
            "/api/v1/payments/{id}/invoice",
            "/api/v1/webhooks/razorpay",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
