pub mod client;
pub mod signature;
pub mod types;

pub use client::RazorpayClient;
pub use types::*;

use async_trait::async_trait;

use crate::utils::AppError;

/// Hosted payment gateway operations the billing flow depends on
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key id handed to the checkout widget
    fn key_id(&self) -> &str;

    async fn create_order(&self, order: &CreateOrder) -> Result<GatewayOrder, AppError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, AppError>;

    /// All payment attempts made against an order
    async fn fetch_order_payments(&self, order_id: &str) -> Result<Vec<GatewayPayment>, AppError>;
}
