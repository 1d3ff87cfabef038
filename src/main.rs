mod api;
mod config;
mod database;
mod gateway;
mod jobs;
mod middleware;
mod models;
mod seeds;
mod services;
mod utils;

use actix_cors::Cors;
use actix_web::dev::Service as _;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::gateway::{PaymentGateway, RazorpayClient};
use crate::utils::AppError;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("🚀 Starting QR Presence billing service...");

    let db = match database::MongoDB::new(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            log::error!("❌ Failed to connect to MongoDB: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("✅ MongoDB connected successfully");

    let razorpay = match RazorpayClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            log::error!("❌ Failed to build payment gateway client: {}", e);
            std::process::exit(1);
        }
    };
    let gateway: Arc<dyn PaymentGateway> = Arc::new(razorpay);

    // 🌱 Seed default plans
    seeds::plans_seed::seed_default_plans(&db, &config.currency).await;

    log::info!("📅 Starting background jobs...");
    jobs::subscription_sweeper::start_subscription_sweeper(db.clone(), &config).await;

    let bind = (config.host.clone(), config.port);
    log::info!("🌐 Server starting on {}:{}", bind.0, bind.1);
    log::info!("📚 Swagger UI available at: http://{}:{}/swagger-ui/", bind.0, bind.1);

    let db_data = web::Data::new(db);
    let config_data = web::Data::new(config);
    let gateway_data: web::Data<dyn PaymentGateway> = web::Data::from(gateway);

    HttpServer::new(move || {
        let cors = config_data
            .cors_origins()
            .into_iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(&origin))
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::ACCEPT,
            ])
            .expose_headers(vec![actix_web::http::header::CONTENT_TYPE])
            .supports_credentials()
            .max_age(3600);

        // Malformed JSON bodies get the same error shape as everything else
        let json_config = web::JsonConfig::default()
            .limit(64 * 1024)
            .error_handler(|err, _req| AppError::InvalidRequest(err.to_string()).into());

        let openapi = api::swagger::ApiDoc::openapi();

        App::new()
            .app_data(db_data.clone())
            .app_data(config_data.clone())
            .app_data(gateway_data.clone())
            .app_data(json_config)
            .wrap(cors)
            .wrap(middleware::SecurityHeaders)
            .wrap(Logger::default())
            .wrap_fn(|req, srv| {
                api::metrics::increment_request_count();
                let fut = srv.call(req);
                async move {
                    let res = fut.await?;
                    if res.status().is_server_error() {
                        api::metrics::increment_error_count();
                    }
                    Ok(res)
                }
            })
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
            .route("/health", web::get().to(api::health::health_check))
            .route("/metrics", web::get().to(api::metrics::get_metrics))
            // Auth
            .service(
                web::scope("/api/v1/auth")
                    .route("/register", web::post().to(api::auth::register))
                    .route("/login", web::post().to(api::auth::login))
                    .service(
                        web::resource("/refresh")
                            .wrap(middleware::auth::AuthMiddleware)
                            .route(web::post().to(api::auth::refresh_token))
                    )
                    .service(
                        web::resource("/me")
                            .wrap(middleware::auth::AuthMiddleware)
                            .route(web::get().to(api::auth::get_me))
                    )
            )
            // Gateway callbacks authenticate by HMAC, not JWT
            .service(
                web::scope("/api/v1/webhooks")
                    .route("/razorpay", web::post().to(api::webhooks::razorpay_webhook))
            )
            .service(
                web::scope("/api/v1/plans")
                    .wrap(middleware::auth::AuthMiddleware)
                    .route("", web::get().to(api::plans::list_plans))
            )
            .service(
                web::scope("/api/v1/restaurants")
                    .wrap(middleware::auth::AuthMiddleware)
                    .route("/{id}/subscription", web::get().to(api::subscriptions::get_subscription))
            )
            .service(
                web::scope("/api/v1/payments")
                    .wrap(middleware::auth::AuthMiddleware)
                    .route("/create-order", web::post().to(api::payments::create_order))
                    .route("/verify", web::post().to(api::payments::verify_payment))
                    .route("/history", web::get().to(api::payments::payment_history))
                    .route("/{id}/invoice", web::get().to(api::payments::get_invoice))
                    .route("/{order_id}/reconcile", web::post().to(api::payments::reconcile))
            )
    })
    .bind(bind)?
    .run()
    .await
}
