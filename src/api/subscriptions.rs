use actix_web::{web, HttpResponse};

use crate::database::MongoDB;
use crate::models::SubscriptionResponse;
use crate::services::{auth_service::Claims, subscription_service};
use crate::utils::AppError;

#[utoipa::path(
    get,
    path = "/api/v1/restaurants/{id}/subscription",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Restaurant id")),
    responses(
        (status = 200, description = "Current subscription", body = SubscriptionResponse),
        (status = 403, description = "Restaurant belongs to another user"),
        (status = 404, description = "Restaurant not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_subscription(
    db: web::Data<MongoDB>,
    claims: web::ReqData<Claims>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let restaurant_id = path.into_inner();
    log::info!("📆 GET /restaurants/{}/subscription", restaurant_id);

    let subscription = subscription_service::get_subscription(&db, &restaurant_id, &claims).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "subscription": subscription
    })))
}
