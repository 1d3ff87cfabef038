use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::database::MongoDB;
use crate::services::{auth_service::Claims, plan_service};
use crate::utils::AppError;

const DEFAULT_CATEGORY: &str = "restaurant";

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PlansQuery {
    /// Business category, defaults to `restaurant`
    pub category: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/plans",
    tag = "Plans",
    params(PlansQuery),
    responses(
        (status = 200, description = "Plans available to the caller"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_plans(
    db: web::Data<MongoDB>,
    claims: web::ReqData<Claims>,
    query: web::Query<PlansQuery>,
) -> Result<HttpResponse, AppError> {
    let category = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_lowercase();

    log::info!("📋 GET /plans - category: {}, user: {}", category, claims.sub);

    let plans = plan_service::list_plans(&db, &category, &claims.sub).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "category": category,
        "plans": plans,
        "total": plans.len()
    })))
}
