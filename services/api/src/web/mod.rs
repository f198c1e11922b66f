//! services/api/src/web/mod.rs
//!
//! The HTTP layer: response envelope, shared state, auth middleware, the
//! handler modules, and the master OpenAPI definition.

pub mod barcode;
pub mod envelope;
pub mod impact;
pub mod middleware;
pub mod state;
pub mod trip;

pub use middleware::require_multi_pickup_auth;
pub use state::AppState;

use axum::{extract::State, response::Response};
use std::sync::Arc;
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        trip::claim_route_handler,
        trip::session_status_handler,
        trip::refresh_token_handler,
        trip::update_app_state_handler,
        trip::logout_handler,
        trip::assignment_sequences_handler,
        trip::next_sequence_handler,
        trip::start_stop_handler,
        trip::complete_stop_handler,
        trip::start_stop_by_sequence_handler,
        trip::complete_stop_by_sequence_handler,
        trip::auto_start_next_handler,
        trip::auto_complete_current_handler,
        trip::start_trip_handler,
        trip::complete_trip_handler,
        barcode::scan_handler,
        barcode::register_handler,
        barcode::master_list_handler,
        barcode::cycle_start_handler,
        barcode::cycle_scan_and_start_handler,
        barcode::cycle_update_status_handler,
        barcode::cycle_get_handler,
        barcode::cycle_list_handler,
        barcode::cycle_by_barcode_handler,
        barcode::inbound_scan_weight_handler,
        impact::resync_handler,
        test_connection_handler,
    ),
    components(
        schemas(
            envelope::Envelope,
            trip::ClaimRouteRequest,
            trip::UpdateAppStateRequest,
            trip::CompleteStopRequest,
            trip::StopDto,
            trip::AssignmentDto,
            barcode::ScanRequest,
            barcode::RegisterRequest,
            barcode::CycleStartRequest,
            barcode::ScanAndStartRequest,
            barcode::CycleStatusRequest,
            barcode::InboundWeightRequest,
            barcode::BarcodeDto,
            barcode::CycleDto,
            impact::ResyncRequest,
            impact::RollupDto,
        )
    ),
    tags(
        (name = "Pickup Route API", description = "Route progression, bag cycles and impact aggregation for waste-collection logistics.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Health Handler
//=========================================================================================

/// Database reachability probe used by deploy tooling and the mobile
/// client's connection test screen.
#[utoipa::path(
    get,
    path = "/test/connection",
    responses(
        (status = 200, description = "Database reachable", body = envelope::Envelope),
        (status = 500, description = "Database unreachable", body = envelope::Envelope)
    )
)]
pub async fn test_connection_handler(State(app_state): State<Arc<AppState>>) -> Response {
    match app_state.db.ping().await {
        Ok(()) => envelope::ok(
            "Database connection successful",
            serde_json::json!({
                "server_time": chrono::Utc::now(),
                "api_prefix": "/",
            }),
        ),
        Err(e) => envelope::internal(format!("database ping failed: {e}")),
    }
}

/// Envelope-shaped 404 for unknown paths, so clients never see a bare
/// framework error body.
pub async fn fallback_handler() -> Response {
    envelope::fail(axum::http::StatusCode::NOT_FOUND, "Resource not found")
}
