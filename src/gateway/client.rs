use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::{CreateOrder, ErrorBody, GatewayOrder, GatewayPayment, ItemList};
use super::PaymentGateway;
use crate::config::AppConfig;
use crate::utils::AppError;

/// REST client for the hosted payment gateway (Razorpay API v1)
pub struct RazorpayClient {
    http: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl RazorpayClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        log::info!("💳 Payment gateway client ready (key: {})", mask_key(&config.razorpay_key_id));

        Ok(Self {
            http,
            base_url: config.razorpay_base_url.trim_end_matches('/').to_string(),
            key_id: config.razorpay_key_id.clone(),
            key_secret: config.razorpay_key_secret.clone(),
        })
    }

    async fn parse<T: DeserializeOwned>(response: Response, action: &str) -> Result<T, AppError> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .map(|b| {
                    format!(
                        "{} ({})",
                        b.error.description.unwrap_or_else(|| "no description".to_string()),
                        b.error.code.unwrap_or_else(|| status.to_string())
                    )
                })
                .unwrap_or_else(|| format!("HTTP {}", status));

            log::error!("❌ Gateway {} failed: {}", action, detail);
            return Err(AppError::GatewayError(format!("{} failed: {}", action, detail)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::GatewayError(format!("Failed to parse {} response: {}", action, e)))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(&self, order: &CreateOrder) -> Result<GatewayOrder, AppError> {
        log::info!("💳 Creating gateway order: {} {} ({})", order.amount, order.currency, order.receipt);

        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(order)
            .send()
            .await?;

        let created: GatewayOrder = Self::parse(response, "create order").await?;
        log::info!("✅ Gateway order created: {} (status: {})", created.id, created.status);

        Ok(created)
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, AppError> {
        let response = self
            .http
            .get(format!("{}/payments/{}", self.base_url, urlencoding::encode(payment_id)))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;

        Self::parse(response, "fetch payment").await
    }

    async fn fetch_order_payments(&self, order_id: &str) -> Result<Vec<GatewayPayment>, AppError> {
        let response = self
            .http
            .get(format!("{}/orders/{}/payments", self.base_url, urlencoding::encode(order_id)))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;

        let list: ItemList<GatewayPayment> = Self::parse(response, "fetch order payments").await?;
        Ok(list.items)
    }
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(8).collect();
    format!("{}…", visible)
}
