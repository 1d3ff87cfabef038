pub mod auth;
pub mod health;
pub mod metrics;
pub mod payments;
pub mod plans;
pub mod subscriptions;
pub mod swagger;
pub mod webhooks;
