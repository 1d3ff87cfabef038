use std::env;
use std::fmt::Display;
use std::str::FromStr;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

/// Runtime configuration, loaded once from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_ttl_hours: i64,

    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: String,
    pub razorpay_base_url: String,

    pub cors_origins: String,
    pub currency: String,
    pub company_name: String,

    pub sweep_enabled: bool,
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            host: try_load("HOST", "0.0.0.0")?,
            port: try_load("PORT", "5000")?,
            database_url: required("DATABASE_URL")?,

            jwt_secret: required("JWT_SECRET")?,
            jwt_issuer: try_load("JWT_ISSUER", "qr-presence")?,
            jwt_audience: try_load("JWT_AUDIENCE", "qr-presence-api")?,
            jwt_ttl_hours: try_load("JWT_TTL_HOURS", "24")?,

            razorpay_key_id: required("RAZORPAY_KEY_ID")?,
            razorpay_key_secret: required("RAZORPAY_KEY_SECRET")?,
            razorpay_webhook_secret: required("RAZORPAY_WEBHOOK_SECRET")?,
            razorpay_base_url: try_load("RAZORPAY_BASE_URL", "https://api.razorpay.com/v1")?,

            cors_origins: try_load("CORS_ORIGINS", DEFAULT_CORS_ORIGINS)?,
            currency: try_load("CURRENCY", "INR")?,
            company_name: try_load("COMPANY_NAME", "QR Presence")?,

            sweep_enabled: parse_flag(&try_load::<String>("SUBSCRIPTION_SWEEP_ENABLED", "true")?),
            sweep_interval_secs: try_load::<u64>("SUBSCRIPTION_SWEEP_INTERVAL_SECS", "3600")?.max(60),
        })
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn required(key: &str) -> Result<String, String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(format!("{} must be set", key)),
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, String>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        log::info!("{} not set, using default: {}", key, default);
        default.to_string()
    });

    raw.parse()
        .map_err(|e| format!("Invalid {} value '{}': {}", key, raw, e))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            database_url: "mongodb://localhost:27017/qr_presence_test".into(),
            jwt_secret: "test-jwt-secret".into(),
            jwt_issuer: "qr-presence".into(),
            jwt_audience: "qr-presence-api".into(),
            jwt_ttl_hours: 24,
            razorpay_key_id: "rzp_test_key".into(),
            razorpay_key_secret: "rzp_test_secret".into(),
            razorpay_webhook_secret: "whsec_test".into(),
            razorpay_base_url: "http://127.0.0.1:9/v1".into(),
            cors_origins: DEFAULT_CORS_ORIGINS.into(),
            currency: "INR".into(),
            company_name: "QR Presence".into(),
            sweep_enabled: false,
            sweep_interval_secs: 3600,
        }
    }
}
