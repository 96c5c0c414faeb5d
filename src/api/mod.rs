//! SchoolCoin REST API
//!
//! HTTP API layer for SchoolCoin, built with Axum. Every `/api/v1` route
//! except login requires `Authorization: Bearer <token>`.
//!
//! # Endpoints
//!
//! ## Auth
//! - `POST /api/v1/auth/login`, `POST /api/v1/auth/logout`
//! - `GET /api/v1/auth/me`, `PUT /api/v1/auth/password`
//!
//! ## Schools and profiles
//! - `GET|POST /api/v1/schools`, `GET|PUT /api/v1/schools/:id`
//! - `POST /api/v1/schools/:id/reconcile`
//! - `GET /api/v1/schools/:id/profiles`, `POST /api/v1/profiles`
//! - `GET|PUT|DELETE /api/v1/profiles/:id` and its balance, transactions,
//!   achievements, purchases and offers
//!
//! ## Classes
//! - `GET /api/v1/schools/:id/classes`, `POST /api/v1/classes`
//! - `GET|DELETE /api/v1/classes/:id`, roster under `/classes/:id/students`
//!
//! ## Coins
//! - `POST /api/v1/transfers`, `POST /api/v1/schools/:id/adjustments`
//! - `GET /api/v1/schools/:id/transactions`, `GET /api/v1/transactions/:id`
//! - Achievement types and awards, marketplace categories, items and
//!   purchases, exchange listings and offers
//!
//! ## Bulk
//! - `POST /api/v1/schools/:id/import` - CSV user import
//! - `GET /api/v1/schools/:id/export/{transactions,balances}` - CSV export
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use schoolcoin::api::{serve, ApiConfig, AppState};
//! use schoolcoin::store::{Store, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open(&StoreConfig::new("./data"))?;
//!     let config = ApiConfig::default();
//!
//!     serve(AppState::new(store, config.clone()), &config).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::CurrentUser;
pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::permissive().allow_origin(AllowOrigin::list(allowed))
}

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    use routes::{
        achievements, bulk, classes, exchange, health, marketplace, profiles, schools,
        transactions,
    };

    let api_routes = Router::new()
        // Auth
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/me", get(routes::auth::me))
        .route("/auth/password", put(routes::auth::change_password))
        // Schools
        .route("/schools", get(schools::list_schools).post(schools::create_school))
        .route("/schools/:id", get(schools::get_school).put(schools::update_school))
        .route("/schools/:id/reconcile", post(schools::reconcile))
        // Profiles
        .route("/schools/:id/profiles", get(profiles::list_profiles))
        .route("/profiles", post(profiles::create_profile))
        .route(
            "/profiles/:id",
            get(profiles::get_profile)
                .put(profiles::update_profile)
                .delete(profiles::delete_profile),
        )
        .route("/profiles/:id/balance", get(profiles::get_balance))
        .route("/profiles/:id/transactions", get(profiles::list_profile_transactions))
        .route("/profiles/:id/achievements", get(profiles::list_profile_achievements))
        .route("/profiles/:id/purchases", get(profiles::list_profile_purchases))
        .route("/profiles/:id/offers", get(profiles::list_profile_offers))
        // Classes
        .route("/schools/:id/classes", get(classes::list_classes))
        .route("/classes", post(classes::create_class))
        .route("/classes/:id", get(classes::get_class).delete(classes::delete_class))
        .route(
            "/classes/:id/students",
            get(classes::class_roster).post(classes::enroll_student),
        )
        .route(
            "/classes/:id/students/:student_id",
            axum::routing::delete(classes::unenroll_student),
        )
        // Transactions
        .route("/schools/:id/transactions", get(transactions::list_school_transactions))
        .route("/schools/:id/adjustments", post(transactions::adjust_balance))
        .route("/transactions/:id", get(transactions::get_transaction))
        .route("/transfers", post(transactions::transfer))
        // Achievements
        .route(
            "/schools/:id/achievement-types",
            get(achievements::list_types).post(achievements::create_type),
        )
        .route(
            "/achievement-types/:id",
            put(achievements::update_type).delete(achievements::delete_type),
        )
        .route("/achievements", post(achievements::award))
        .route("/schools/:id/achievements", get(achievements::list_school_achievements))
        // Marketplace
        .route(
            "/schools/:id/categories",
            get(marketplace::list_categories).post(marketplace::create_category),
        )
        .route("/categories/:id", axum::routing::delete(marketplace::delete_category))
        .route(
            "/schools/:id/items",
            get(marketplace::list_items).post(marketplace::create_item),
        )
        .route("/items/:id", get(marketplace::get_item).put(marketplace::update_item))
        .route("/items/:id/purchase", post(marketplace::purchase_item))
        // Exchange
        .route("/schools/:id/listings", get(exchange::list_listings))
        .route("/listings", post(exchange::create_listing))
        .route("/listings/:id", get(exchange::get_listing))
        .route("/listings/:id/cancel", post(exchange::cancel_listing))
        .route(
            "/listings/:id/offers",
            get(exchange::list_offers).post(exchange::make_offer),
        )
        .route("/offers/:id/accept", post(exchange::accept_offer))
        .route("/offers/:id/reject", post(exchange::reject_offer))
        .route("/offers/:id/withdraw", post(exchange::withdraw_offer))
        // Bulk
        .route("/schools/:id/import", post(bulk::import_users))
        .route("/schools/:id/export/transactions", get(bulk::export_transactions))
        .route("/schools/:id/export/balances", get(bulk::export_balances))
        .layer(DefaultBodyLimit::max(state.config.max_body_size));

    let health_routes = Router::new()
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/", get(health::full_health));

    let timeout = Duration::from_millis(state.config.request_timeout_ms);
    let cors = cors_layer(&state.config.cors_origins);

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("SchoolCoin API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("SchoolCoin API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
