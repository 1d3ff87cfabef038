use crate::{
    config::AppConfig,
    database::{MongoDB, PAYMENTS},
    models::{Payment, Restaurant, User},
    services::{auth_service, auth_service::Claims, subscription_service},
    utils::AppError,
};
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId};
use serde::Serialize;
use std::fmt::Write as _;

const INVOICE_COUNTER: &str = "invoice";

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: u32,
    pub amount: i64,
    pub amount_formatted: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct Invoice {
    pub invoice_number: String,
    pub issued_at: String,
    pub status: String,
    pub seller: String,
    pub bill_to_name: String,
    pub bill_to_email: String,
    pub business_name: String,
    pub lines: Vec<InvoiceLine>,
    pub currency: String,
    pub subtotal: i64,
    pub total: i64,
    pub total_formatted: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub refunded_amount: Option<i64>,
}

/// `INV-YYYYMMDD-NNNNNN`
pub fn invoice_number(date: DateTime<Utc>, seq: i64) -> String {
    format!("INV-{}-{:06}", date.format("%Y%m%d"), seq)
}

/// Reserves the next invoice number from the shared counter.
pub async fn next_invoice_number(db: &MongoDB, date: DateTime<Utc>) -> Result<String, AppError> {
    let seq = db.next_sequence(INVOICE_COUNTER).await?;
    Ok(invoice_number(date, seq))
}

/// Formats minor units as `"INR 1,499.00"`.
pub fn format_amount(minor: i64, currency: &str) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let major = (abs / 100).to_string();
    let cents = abs % 100;

    let mut grouped = String::with_capacity(major.len() + major.len() / 3);
    for (i, ch) in major.chars().enumerate() {
        if i > 0 && (major.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{} {}{}.{:02}", currency, sign, grouped, cents)
}

pub fn build_invoice(
    payment: &Payment,
    user: &User,
    restaurant: &Restaurant,
    company_name: &str,
) -> Result<Invoice, AppError> {
    if !payment.status.has_invoice() {
        return Err(AppError::Conflict(format!(
            "No invoice for a payment in status '{}'",
            payment.status
        )));
    }

    let invoice_number = payment
        .invoice_number
        .clone()
        .ok_or_else(|| AppError::Conflict("Invoice number not assigned yet".to_string()))?;

    let issued_at = subscription_service::to_chrono(payment.paid_at.unwrap_or(payment.updated_at));

    let period = match (payment.period_start, payment.period_end) {
        (Some(start), Some(end)) => format!(
            " ({} to {})",
            subscription_service::to_chrono(start).format("%d %b %Y"),
            subscription_service::to_chrono(end).format("%d %b %Y")
        ),
        (Some(start), None) => format!(
            " (from {})",
            subscription_service::to_chrono(start).format("%d %b %Y")
        ),
        _ => String::new(),
    };

    let line = InvoiceLine {
        description: format!("{} plan subscription{}", payment.plan_name, period),
        quantity: 1,
        amount: payment.amount,
        amount_formatted: format_amount(payment.amount, &payment.currency),
    };

    Ok(Invoice {
        invoice_number,
        issued_at: issued_at.format("%Y-%m-%d").to_string(),
        status: payment.status.to_string(),
        seller: company_name.to_string(),
        bill_to_name: user.name.clone().unwrap_or_else(|| user.email.clone()),
        bill_to_email: user.email.clone(),
        business_name: restaurant.name.clone(),
        subtotal: payment.amount,
        total: payment.amount,
        total_formatted: format_amount(payment.amount, &payment.currency),
        currency: payment.currency.clone(),
        lines: vec![line],
        gateway_order_id: payment.gateway_order_id.clone(),
        gateway_payment_id: payment.gateway_payment_id.clone(),
        refunded_amount: payment.refunded_amount,
    })
}

/// Plain-text rendering of an invoice.
pub fn render_text(invoice: &Invoice) -> String {
    let rule = "-".repeat(56);
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "{}", invoice.seller);
    let _ = writeln!(out, "TAX INVOICE");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Invoice No : {}", invoice.invoice_number);
    let _ = writeln!(out, "Date       : {}", invoice.issued_at);
    let _ = writeln!(out, "Status     : {}", invoice.status.to_uppercase());
    let _ = writeln!(out, "Bill to    : {} <{}>", invoice.bill_to_name, invoice.bill_to_email);
    let _ = writeln!(out, "Business   : {}", invoice.business_name);
    let _ = writeln!(out, "{}", rule);

    for line in &invoice.lines {
        let _ = writeln!(out, "{:<38}{:>18}", truncate(&line.description, 37), line.amount_formatted);
    }

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "{:<38}{:>18}", "TOTAL", invoice.total_formatted);

    if let Some(refunded) = invoice.refunded_amount {
        let _ = writeln!(out, "{:<38}{:>18}", "REFUNDED", format_amount(refunded, &invoice.currency));
    }

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Order   : {}", invoice.gateway_order_id);
    if let Some(payment_id) = &invoice.gateway_payment_id {
        let _ = writeln!(out, "Payment : {}", payment_id);
    }

    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Invoice for a payment the caller owns (admins may read any).
pub async fn get_invoice(
    db: &MongoDB,
    config: &AppConfig,
    payment_id: &str,
    claims: &Claims,
) -> Result<Invoice, AppError> {
    let object_id = ObjectId::parse_str(payment_id)?;

    let payment = db
        .collection::<Payment>(PAYMENTS)
        .find_one(doc! { "_id": object_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

    if payment.user_id != claims.sub && !claims.is_admin() {
        return Err(AppError::Forbidden("Not your payment".to_string()));
    }

    let user = auth_service::find_user(db, &payment.user_id).await?;
    let restaurant = subscription_service::get_restaurant(db, &payment.restaurant_id).await?;

    build_invoice(&payment, &user, &restaurant, &config.company_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{test_payment, test_restaurant, PaymentStatus};
    use chrono::TimeZone;

    fn owner() -> User {
        User {
            id: None,
            user_id: "owner-1".into(),
            email: "owner@cafe.in".into(),
            password: None,
            name: Some("Asha Rao".into()),
            phone: None,
            roles: vec!["user".into()],
            is_active: true,
            created_at: None,
            updated_at: None,
            last_login: None,
        }
    }

    #[test]
    fn test_invoice_number_format() {
        let date = Utc.with_ymd_and_hms(2026, 10, 7, 23, 59, 0).unwrap();
        assert_eq!(invoice_number(date, 42), "INV-20261007-000042");
        assert_eq!(invoice_number(date, 1_234_567), "INV-20261007-1234567");
    }

    #[test]
    fn test_format_amount_grouping() {
        assert_eq!(format_amount(149_900, "INR"), "INR 1,499.00");
        assert_eq!(format_amount(5, "INR"), "INR 0.05");
        assert_eq!(format_amount(99_999_999, "INR"), "INR 999,999.99");
        assert_eq!(format_amount(100_000_000, "USD"), "USD 1,000,000.00");
        assert_eq!(format_amount(-1_050, "INR"), "INR -10.50");
    }

    #[test]
    fn test_no_invoice_for_unpaid_payment() {
        let payment = test_payment("owner-1", PaymentStatus::Created);
        let result = build_invoice(&payment, &owner(), &test_restaurant("owner-1"), "QR Presence");
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn test_build_and_render_invoice() {
        let mut payment = test_payment("owner-1", PaymentStatus::Paid);
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        payment.invoice_number = Some("INV-20260301-000007".into());
        payment.gateway_payment_id = Some("pay_ABC".into());
        payment.paid_at = Some(subscription_service::to_bson(start));
        payment.period_start = Some(subscription_service::to_bson(start));
        payment.period_end = Some(subscription_service::to_bson(end));

        let invoice = build_invoice(&payment, &owner(), &test_restaurant("owner-1"), "QR Presence").unwrap();
        assert_eq!(invoice.issued_at, "2026-03-01");
        assert_eq!(invoice.total_formatted, "INR 1,499.00");
        assert_eq!(invoice.bill_to_name, "Asha Rao");
        assert_eq!(invoice.lines[0].description, "Pro plan subscription (01 Mar 2026 to 01 Apr 2026)");

        let text = render_text(&invoice);
        assert!(text.contains("Invoice No : INV-20260301-000007"));
        assert!(text.contains("Payment : pay_ABC"));
        assert!(text.lines().any(|l| l.starts_with("TOTAL") && l.ends_with("INR 1,499.00")));
        assert!(!text.contains("REFUNDED"));
    }

    #[test]
    fn test_refunded_invoice_shows_refund() {
        let mut payment = test_payment("owner-1", PaymentStatus::Refunded);
        payment.invoice_number = Some("INV-20260301-000008".into());
        payment.refunded_amount = Some(149_900);

        let invoice = build_invoice(&payment, &owner(), &test_restaurant("owner-1"), "QR Presence").unwrap();
        assert!(render_text(&invoice).contains("REFUNDED"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
