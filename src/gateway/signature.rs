use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
#[cfg(test)]
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature. Empty or non-hex input is a mismatch.
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let signature_hex = signature_hex.trim();
    if signature_hex.is_empty() || secret.is_empty() {
        return false;
    }

    let expected = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Checkout callback signature: HMAC(key_secret, "order_id|payment_id").
pub fn verify_checkout_signature(
    key_secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    let payload = format!("{}|{}", order_id, payment_id);
    verify(key_secret, payload.as_bytes(), signature)
}

/// Webhook signature: HMAC(webhook_secret, raw body).
pub fn verify_webhook_signature(webhook_secret: &str, body: &[u8], signature: &str) -> bool {
    verify(webhook_secret, body, signature)
}
