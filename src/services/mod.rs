pub mod auth_service;
pub mod invoice_service;
pub mod payment_service;
pub mod plan_service;
pub mod subscription_service;
