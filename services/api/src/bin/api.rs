//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, NoSvgConverter, SoapUploadAdapter},
    config::Config,
    error::ApiError,
    session::TokenStore,
    web::{
        barcode, impact, middleware::require_multi_pickup_auth, state::AppState,
        test_connection_handler, trip, ApiDoc,
    },
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use pickup_route_core::ports::{DatabaseService, DocumentUploadService, ImageConversionService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// How often expired session tokens are swept from the store and the file.
const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let uploader: Option<Arc<dyn DocumentUploadService>> = match &config.upload_url {
        Some(url) => {
            let adapter = SoapUploadAdapter::new(url.clone(), config.upload_timeout)
                .map_err(|e| ApiError::Internal(format!("upload client setup failed: {e}")))?;
            Some(Arc::new(adapter))
        }
        None => {
            warn!("UPLOAD_URL not set; signature and photo uploads are disabled");
            None
        }
    };
    if config.svg_conversion {
        warn!("SVG_CONVERSION requested but no converter backend is built in; SVG signatures will be rejected");
    }
    let converter: Arc<dyn ImageConversionService> = Arc::new(NoSvgConverter);

    // --- 4. Load the Durable Token Store ---
    let tokens = Arc::new(TokenStore::new(config.token_store_path.clone()));
    tokens.load_on_start();
    {
        let sweeper = tokens.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                sweeper.sweep_expired();
            }
        });
    }

    // --- 5. Build the Shared AppState ---
    let db: Arc<dyn DatabaseService> = db_adapter;
    let app_state = Arc::new(AppState::new(
        db,
        uploader,
        converter,
        tokens,
        config.clone(),
    ));

    let cors = if config.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
            ApiError::Internal(format!("invalid CORS_ORIGIN '{}': {e}", config.cors_origin))
        })?;
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
    };

    // --- 6. Create the Web Router ---
    // Public routes (no session token required)
    let public_routes = Router::new()
        .route("/multi-pickup/claim-route", post(trip::claim_route_handler))
        .route("/barcode/scan", post(barcode::scan_handler))
        .route("/barcode/register", post(barcode::register_handler))
        .route("/barcode/master/list", get(barcode::master_list_handler))
        .route("/barcode/cycle/start", post(barcode::cycle_start_handler))
        .route(
            "/barcode/cycle/list",
            get(barcode::cycle_list_handler),
        )
        .route(
            "/barcode/cycle/by-barcode/{barcode_id}",
            get(barcode::cycle_by_barcode_handler),
        )
        .route("/barcode/cycle/{id}", get(barcode::cycle_get_handler))
        .route(
            "/barcode/cycle/{id}/update-status",
            post(barcode::cycle_update_status_handler),
        )
        .route(
            "/barcode/inbound/scan-weight",
            post(barcode::inbound_scan_weight_handler),
        )
        .route("/impact/resync", post(impact::resync_handler))
        .route("/test/connection", get(test_connection_handler));

    // Protected routes (multi-pickup session token required)
    let protected_routes = Router::new()
        .route(
            "/multi-pickup/session-status",
            get(trip::session_status_handler),
        )
        .route(
            "/multi-pickup/refresh-token",
            post(trip::refresh_token_handler),
        )
        .route(
            "/multi-pickup/update-app-state",
            post(trip::update_app_state_handler),
        )
        .route("/multi-pickup/logout", post(trip::logout_handler))
        .route(
            "/multi-pickup/assignment-sequences/{route_id}",
            get(trip::assignment_sequences_handler),
        )
        .route(
            "/multi-pickup/next-sequence/{route_id}",
            get(trip::next_sequence_handler),
        )
        .route(
            "/multi-pickup/start-stop/{stop_id}",
            post(trip::start_stop_handler),
        )
        .route(
            "/multi-pickup/complete-stop/{stop_id}",
            post(trip::complete_stop_handler),
        )
        .route(
            "/multi-pickup/start-stop-by-sequence/{route_id}/{sequence}",
            post(trip::start_stop_by_sequence_handler),
        )
        .route(
            "/multi-pickup/complete-stop-by-sequence/{route_id}/{sequence}",
            post(trip::complete_stop_by_sequence_handler),
        )
        .route(
            "/multi-pickup/auto-start-next",
            post(trip::auto_start_next_handler),
        )
        .route(
            "/multi-pickup/auto-complete-current",
            post(trip::auto_complete_current_handler),
        )
        .route("/multi-pickup/start-trip", post(trip::start_trip_handler))
        .route(
            "/multi-pickup/complete-trip",
            post(trip::complete_trip_handler),
        )
        .route(
            "/barcode/cycle/scan-and-start",
            post(barcode::cycle_scan_and_start_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_multi_pickup_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(api_lib::web::fallback_handler)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
