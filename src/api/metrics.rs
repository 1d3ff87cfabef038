use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static REQUEST_COUNT: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNT: AtomicU64 = AtomicU64::new(0);
static ORDERS_CREATED: AtomicU64 = AtomicU64::new(0);
static PAYMENTS_SETTLED: AtomicU64 = AtomicU64::new(0);
static SIGNATURE_FAILURES: AtomicU64 = AtomicU64::new(0);
static WEBHOOKS_RECEIVED: AtomicU64 = AtomicU64::new(0);

pub fn increment_request_count() {
    REQUEST_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn increment_error_count() {
    ERROR_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn increment_orders_created() {
    ORDERS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn increment_payments_settled() {
    PAYMENTS_SETTLED.fetch_add(1, Ordering::Relaxed);
}

pub fn increment_signature_failures() {
    SIGNATURE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn increment_webhooks_received() {
    WEBHOOKS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct MetricsResponse {
    pub http_requests_total: u64,
    pub http_errors_total: u64,
    pub payment_orders_created_total: u64,
    pub payments_settled_total: u64,
    pub payment_signature_failures_total: u64,
    pub webhooks_received_total: u64,
}

impl MetricsResponse {
    fn snapshot() -> Self {
        Self {
            http_requests_total: REQUEST_COUNT.load(Ordering::Relaxed),
            http_errors_total: ERROR_COUNT.load(Ordering::Relaxed),
            payment_orders_created_total: ORDERS_CREATED.load(Ordering::Relaxed),
            payments_settled_total: PAYMENTS_SETTLED.load(Ordering::Relaxed),
            payment_signature_failures_total: SIGNATURE_FAILURES.load(Ordering::Relaxed),
            webhooks_received_total: WEBHOOKS_RECEIVED.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition format
    fn render(&self) -> String {
        let counters = [
            ("http_requests_total", "Total number of HTTP requests", self.http_requests_total),
            ("http_errors_total", "Total number of HTTP errors", self.http_errors_total),
            ("payment_orders_created_total", "Gateway orders created", self.payment_orders_created_total),
            ("payments_settled_total", "Payments moved to paid", self.payments_settled_total),
            ("payment_signature_failures_total", "Rejected checkout or webhook signatures", self.payment_signature_failures_total),
            ("webhooks_received_total", "Webhook deliveries received", self.webhooks_received_total),
        ];

        counters
            .iter()
            .map(|(name, help, value)| {
                format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Health",
    responses(
        (status = 200, description = "System metrics", body = MetricsResponse)
    )
)]
pub async fn get_metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(MetricsResponse::snapshot().render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_every_counter() {
        increment_webhooks_received();
        let text = MetricsResponse::snapshot().render();

        for name in [
            "http_requests_total",
            "http_errors_total",
            "payment_orders_created_total",
            "payments_settled_total",
            "payment_signature_failures_total",
            "webhooks_received_total",
        ] {
            assert!(text.contains(&format!("# TYPE {} counter", name)), "missing {}", name);
        }
        assert!(!text.contains("webhooks_received_total 0\n"));
    }
}
