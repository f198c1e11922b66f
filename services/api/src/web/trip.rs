//! services/api/src/web/trip.rs
//!
//! Axum handlers for the multi-pickup driver flow: claiming a route,
//! session lifecycle, and the strictly ordered stop progression.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pickup_route_core::domain::{
    RouteAssignment, RouteStop, SessionRecord, SessionState, StopCompletion, StopStatus,
};
use pickup_route_core::ports::{ConversionError, PortError};
use pickup_route_core::scheduler::{self, NextStop, StopAction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::session::{SessionContext, TokenStore, TOKEN_EXPIRY_HOURS};
use crate::web::envelope::{self, Envelope};
use crate::web::state::AppState;

//=========================================================================================
// Request / Response Payloads
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct ClaimRouteRequest {
    pub vehicle_no: String,
    #[serde(alias = "driver_dl")]
    pub dl_no: String,
    /// Claim a specific assignment; otherwise resolution falls back to the
    /// vehicle's assignment for the date, then to a fresh assignment.
    pub route_id: Option<i64>,
    /// Defaults to today.
    pub route_date: Option<NaiveDate>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateAppStateRequest {
    pub current_page: Option<String>,
    pub trip_started: Option<bool>,
    pub current_stop_index: Option<i32>,
    pub completed_stops: Option<Vec<i32>>,
}

/// Completion payload. Weight arrives as a number or a string depending on
/// the client build, so it is accepted loosely and validated here. Image
/// and signature fields each accept an already-hosted URL, a raw base64
/// payload, or a data URI.
#[derive(Default, Deserialize, ToSchema)]
pub struct CompleteStopRequest {
    #[schema(value_type = Option<String>)]
    pub weight: Option<serde_json::Value>,
    pub remark: Option<String>,
    pub waste_image: Option<String>,
    pub receipt_image: Option<String>,
    pub poc_name: Option<String>,
    pub poc_designation: Option<String>,
    pub poc_signature: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct StopDto {
    pub id: i64,
    pub route_id: i64,
    pub sequence: i32,
    pub branch_code: String,
    pub branch_name: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
    pub weight: Option<f64>,
    pub inbound_weight: Option<f64>,
    pub remark: Option<String>,
    pub waste_image_url: Option<String>,
    pub receipt_image_url: Option<String>,
    pub poc_name: Option<String>,
    pub poc_designation: Option<String>,
    pub poc_signature: Option<String>,
    pub pickup_started_at: Option<DateTime<Utc>>,
    pub pickup_ended_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<RouteStop> for StopDto {
    fn from(stop: RouteStop) -> Self {
        Self {
            id: stop.id,
            route_id: stop.route_id,
            sequence: stop.sequence,
            branch_code: stop.branch_code,
            branch_name: stop.branch_name,
            address: stop.address,
            contact: stop.contact,
            latitude: stop.latitude,
            longitude: stop.longitude,
            status: stop.status.to_string(),
            weight: stop.weight,
            inbound_weight: stop.inbound_weight,
            remark: stop.remark,
            waste_image_url: stop.waste_image_url,
            receipt_image_url: stop.receipt_image_url,
            poc_name: stop.poc_name,
            poc_designation: stop.poc_designation,
            poc_signature: stop.poc_signature,
            pickup_started_at: stop.pickup_started_at,
            pickup_ended_at: stop.pickup_ended_at,
            completed_at: stop.completed_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AssignmentDto {
    pub route_id: i64,
    pub route_date: NaiveDate,
    pub driver_dl: Option<String>,
    pub vehicle_no: String,
    pub status: String,
    pub trip_started_at: Option<DateTime<Utc>>,
    pub trip_ended_at: Option<DateTime<Utc>>,
}

impl From<RouteAssignment> for AssignmentDto {
    fn from(a: RouteAssignment) -> Self {
        Self {
            route_id: a.route_id,
            route_date: a.route_date,
            driver_dl: a.driver_dl,
            vehicle_no: a.vehicle_no,
            status: a.status.to_string(),
            trip_started_at: a.trip_started_at,
            trip_ended_at: a.trip_ended_at,
        }
    }
}

//=========================================================================================
// Shared Helpers
//=========================================================================================

pub(crate) fn port_error_response(e: PortError) -> Response {
    match e {
        PortError::NotFound(msg) => envelope::fail(StatusCode::NOT_FOUND, msg),
        PortError::Conflict(msg) => envelope::fail(StatusCode::CONFLICT, msg),
        PortError::Unexpected(detail) => envelope::internal(detail),
    }
}

/// The route bound to the authenticated multi-pickup session. Middleware
/// guarantees the kind, so a miss here means a logic error upstream.
fn session_route(ctx: &SessionContext) -> Result<i64, Response> {
    ctx.record
        .route_id()
        .ok_or_else(|| envelope::internal("multi-pickup session has no bound route"))
}

fn ensure_session_route(ctx: &SessionContext, route_id: i64) -> Result<(), Response> {
    if ctx.record.route_id() != Some(route_id) {
        return Err(envelope::fail(
            StatusCode::FORBIDDEN,
            format!("Route {} is not bound to this session", route_id),
        ));
    }
    Ok(())
}

/// Parses a loosely typed weight into a positive, finite kilogram value.
pub(crate) fn parse_weight(value: &serde_json::Value) -> Result<f64, String> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(w) if w.is_finite() && w > 0.0 => Ok(w),
        _ => Err(format!("Invalid weight value: {}", value)),
    }
}

/// Resolves an image/signature input into a stored URL.
///
/// Already-hosted values pass through untouched. Base64 payloads (raw or
/// data URI) are decoded, SVG content is rasterized to PNG first, and the
/// result is pushed through the document upload service.
async fn resolve_media(
    state: &AppState,
    value: &str,
    filename: &str,
) -> Result<String, Response> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") || value.starts_with('/') {
        return Ok(value.to_string());
    }

    let (payload, declared_svg) = match value.strip_prefix("data:") {
        Some(rest) => {
            let (mime, b64) = rest.split_once(";base64,").ok_or_else(|| {
                envelope::fail(
                    StatusCode::BAD_REQUEST,
                    "Unsupported data URI; expected base64 encoding",
                )
            })?;
            (b64, mime.contains("svg"))
        }
        None => (value, false),
    };

    use base64::Engine;
    let mut bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| {
            envelope::fail(
                StatusCode::BAD_REQUEST,
                "Image payload is not valid base64",
            )
        })?;

    let looks_like_svg = {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
        let head = head.trim_start();
        head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
    };
    if declared_svg || looks_like_svg {
        bytes = state.converter.svg_to_png(&bytes).map_err(|e| match e {
            ConversionError::Unavailable => envelope::fail(
                StatusCode::BAD_REQUEST,
                "SVG signatures cannot be processed by this deployment. Please submit a PNG signature.",
            ),
            ConversionError::Failed(detail) => {
                envelope::internal(format!("SVG conversion failed: {detail}"))
            }
        })?;
    }

    let uploader = state
        .uploader
        .as_ref()
        .ok_or_else(|| envelope::internal("document upload service is not configured"))?;
    uploader.upload(&bytes, filename).await.map_err(|e| {
        warn!("document upload failed: {e}");
        envelope::fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Document upload failed. Please retry.",
        )
    })
}

/// Best-effort mirror of a stop status onto the branch pickup schedule.
/// Failures are logged and never fail the stop transition.
async fn propagate_frequency(
    state: &AppState,
    route_id: i64,
    branch_code: &str,
    status: StopStatus,
) {
    let route_date = match state.db.get_assignment(route_id).await {
        Ok(assignment) => assignment.route_date,
        Err(e) => {
            warn!("could not resolve route date for frequency update: {e}");
            return;
        }
    };
    if let Err(e) = state
        .db
        .update_frequency_status(branch_code, route_date, status)
        .await
    {
        warn!(
            branch_code,
            %status,
            "branch pickup frequency update failed: {e}"
        );
    }
}

/// Validates and executes one stop transition under the route's lock.
///
/// The lock is held across the progress read, the order validation, and
/// the write, so two concurrent requests can never both pass validation
/// against the same snapshot.
async fn run_transition(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    route_id: i64,
    sequence: i32,
    action: StopAction,
    completion_req: Option<CompleteStopRequest>,
) -> Response {
    let lock = state.route_lock(route_id);
    let _guard = lock.lock().await;

    let progress = match state.db.stop_progress(route_id).await {
        Ok(progress) => progress,
        Err(e) => return port_error_response(e),
    };
    if progress.is_empty() {
        return envelope::fail(
            StatusCode::NOT_FOUND,
            format!("No stops found for route {}", route_id),
        );
    }
    if let Err(violation) = scheduler::validate(&progress, sequence, action) {
        return envelope::fail(StatusCode::BAD_REQUEST, violation.to_string());
    }

    let stop = match state.db.get_stop_by_sequence(route_id, sequence).await {
        Ok(stop) => stop,
        Err(e) => return port_error_response(e),
    };

    match action {
        StopAction::Start => start_validated_stop(state, ctx, stop).await,
        StopAction::Complete => {
            complete_validated_stop(state, ctx, stop, completion_req.unwrap_or_default()).await
        }
    }
}

async fn start_validated_stop(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    stop: RouteStop,
) -> Response {
    if let Err(e) = state.db.start_stop(stop.id).await {
        return port_error_response(e);
    }
    propagate_frequency(state, stop.route_id, &stop.branch_code, StopStatus::InProgress).await;

    let sequence = stop.sequence;
    state.tokens.update_state(&ctx.token, |session| {
        if let SessionState::MultiPickup {
            current_stop_index, ..
        } = session
        {
            *current_stop_index = sequence;
        }
    });

    match state.db.get_stop(stop.id).await {
        Ok(updated) => envelope::ok(
            format!("Sequence {} started", sequence),
            StopDto::from(updated),
        ),
        Err(e) => port_error_response(e),
    }
}

async fn complete_validated_stop(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    stop: RouteStop,
    req: CompleteStopRequest,
) -> Response {
    // All validation happens before the first write so a rejected request
    // leaves the stop untouched.
    let weight = match &req.weight {
        Some(value) => match parse_weight(value) {
            Ok(w) => Some(w),
            Err(msg) => return envelope::fail(StatusCode::BAD_REQUEST, msg),
        },
        None => {
            warn!(
                stop_id = stop.id,
                sequence = stop.sequence,
                "stop completed without a weight"
            );
            None
        }
    };

    let mut completion = StopCompletion {
        weight,
        remark: req.remark.clone(),
        poc_name: req.poc_name.clone(),
        poc_designation: req.poc_designation.clone(),
        ..StopCompletion::default()
    };

    if let Some(signature) = req.poc_signature.as_deref().filter(|s| !s.trim().is_empty()) {
        let filename = format!("signature_{}_{}.png", stop.route_id, stop.sequence);
        match resolve_media(state, signature, &filename).await {
            Ok(url) => completion.poc_signature_url = Some(url),
            Err(response) => return response,
        }
    }
    if let Some(image) = req.waste_image.as_deref().filter(|s| !s.trim().is_empty()) {
        let filename = format!("waste_{}_{}.jpg", stop.route_id, stop.sequence);
        match resolve_media(state, image, &filename).await {
            Ok(url) => completion.waste_image_url = Some(url),
            Err(response) => return response,
        }
    }
    if let Some(image) = req.receipt_image.as_deref().filter(|s| !s.trim().is_empty()) {
        let filename = format!("receipt_{}_{}.jpg", stop.route_id, stop.sequence);
        match resolve_media(state, image, &filename).await {
            Ok(url) => completion.receipt_image_url = Some(url),
            Err(response) => return response,
        }
    }

    if let Err(e) = state.db.complete_stop(stop.id, &completion).await {
        return port_error_response(e);
    }
    propagate_frequency(state, stop.route_id, &stop.branch_code, StopStatus::Completed).await;

    let sequence = stop.sequence;
    state.tokens.update_state(&ctx.token, |session| {
        if let SessionState::MultiPickup {
            completed_stops,
            current_stop_index,
            ..
        } = session
        {
            if !completed_stops.contains(&sequence) {
                completed_stops.push(sequence);
            }
            *current_stop_index = sequence;
        }
    });

    let progress = match state.db.stop_progress(stop.route_id).await {
        Ok(progress) => progress,
        Err(e) => return port_error_response(e),
    };
    let next = scheduler::next_eligible(&progress);
    let updated = match state.db.get_stop(stop.id).await {
        Ok(updated) => updated,
        Err(e) => return port_error_response(e),
    };

    envelope::ok(
        format!("Sequence {} completed", sequence),
        json!({
            "stop": StopDto::from(updated),
            "all_completed": next.is_all_completed(),
            "next_sequence": next.sequence(),
        }),
    )
}

//=========================================================================================
// Session Lifecycle Handlers
//=========================================================================================

/// Claim a route assignment and open a multi-pickup session.
#[utoipa::path(
    post,
    path = "/multi-pickup/claim-route",
    request_body = ClaimRouteRequest,
    responses(
        (status = 200, description = "Session opened", body = Envelope),
        (status = 404, description = "Requested assignment does not exist", body = Envelope),
        (status = 500, description = "Internal server error", body = Envelope)
    )
)]
pub async fn claim_route_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimRouteRequest>,
) -> Response {
    let route_date = req.route_date.unwrap_or_else(|| Utc::now().date_naive());

    let assignment = if let Some(route_id) = req.route_id {
        match state.db.get_assignment(route_id).await {
            Ok(assignment) => assignment,
            Err(e) => return port_error_response(e),
        }
    } else {
        match state
            .db
            .find_assignment_for_vehicle(&req.vehicle_no, route_date)
            .await
        {
            Ok(Some(assignment)) => assignment,
            Ok(None) => {
                // No assignment planned for this vehicle today; open a
                // fresh one the driver can append stops to by scanning.
                match state
                    .db
                    .create_assignment(route_date, Some(&req.dl_no), &req.vehicle_no)
                    .await
                {
                    Ok(assignment) => assignment,
                    Err(e) => return port_error_response(e),
                }
            }
            Err(e) => return port_error_response(e),
        }
    };

    if let Err(e) = state
        .db
        .claim_assignment(assignment.route_id, &req.dl_no)
        .await
    {
        return port_error_response(e);
    }

    let stops = match state.db.list_stops(assignment.route_id).await {
        Ok(stops) => stops,
        Err(e) => return port_error_response(e),
    };

    let token = TokenStore::generate_token();
    let record = SessionRecord::new_multi_pickup(
        req.vehicle_no.clone(),
        req.dl_no.clone(),
        assignment.route_id,
        Duration::hours(TOKEN_EXPIRY_HOURS),
    );
    let expires_at = record.expires_at;
    state.tokens.put(token.clone(), record);
    info!(
        route_id = assignment.route_id,
        vehicle_no = %req.vehicle_no,
        "multi-pickup session opened"
    );

    envelope::ok(
        "Route claimed",
        json!({
            "token": token,
            "session_type": "multi_pickup",
            "token_expires_in": TOKEN_EXPIRY_HOURS * 3600,
            "expires_at": expires_at,
            "route_id": assignment.route_id,
            "assignment": AssignmentDto::from(assignment),
            "stops": stops.into_iter().map(StopDto::from).collect::<Vec<_>>(),
        }),
    )
}

/// Current session snapshot for the presented token.
#[utoipa::path(
    get,
    path = "/multi-pickup/session-status",
    responses(
        (status = 200, description = "Session details", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn session_status_handler(Extension(ctx): Extension<SessionContext>) -> Response {
    envelope::ok(
        "Session is valid",
        json!({
            "vehicle_no": ctx.record.vehicle_no,
            "dl_no": ctx.record.dl_no,
            "created_at": ctx.record.created_at,
            "expires_at": ctx.record.expires_at,
            "app_state": ctx.record.state,
        }),
    )
}

/// Rotate the session token, resetting its expiry.
#[utoipa::path(
    post,
    path = "/multi-pickup/refresh-token",
    responses(
        (status = 200, description = "New token issued", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn refresh_token_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Response {
    let mut record = ctx.record.clone();
    record.expires_at = Utc::now() + Duration::hours(TOKEN_EXPIRY_HOURS);

    let new_token = TokenStore::generate_token();
    let expires_at = record.expires_at;
    state.tokens.delete(&ctx.token);
    state.tokens.put(new_token.clone(), record);

    envelope::ok(
        "Token refreshed",
        json!({ "token": new_token, "expires_at": expires_at }),
    )
}

/// Merge client-side navigation state into the session record.
#[utoipa::path(
    post,
    path = "/multi-pickup/update-app-state",
    request_body = UpdateAppStateRequest,
    responses(
        (status = 200, description = "State updated", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn update_app_state_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    Json(req): Json<UpdateAppStateRequest>,
) -> Response {
    let updated = state.tokens.update_state(&ctx.token, |session| {
        if let SessionState::MultiPickup {
            current_page,
            trip_started,
            current_stop_index,
            completed_stops,
            ..
        } = session
        {
            if let Some(page) = req.current_page {
                *current_page = page;
            }
            if let Some(started) = req.trip_started {
                *trip_started = started;
            }
            if let Some(index) = req.current_stop_index {
                *current_stop_index = index;
            }
            if let Some(stops) = req.completed_stops {
                *completed_stops = stops;
            }
        }
    });

    match updated {
        Some(record) => envelope::ok("App state updated", json!({ "app_state": record.state })),
        None => envelope::fail(
            StatusCode::UNAUTHORIZED,
            "Invalid token. Session may have expired or backend was restarted. Please login again.",
        ),
    }
}

/// Close the session and invalidate the token.
#[utoipa::path(
    post,
    path = "/multi-pickup/logout",
    responses(
        (status = 200, description = "Session closed", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Response {
    state.tokens.delete(&ctx.token);
    envelope::ok_message("Logged out")
}

//=========================================================================================
// Route Reading Handlers
//=========================================================================================

/// All stops of a route, ascending by sequence, with the next eligible one.
#[utoipa::path(
    get,
    path = "/multi-pickup/assignment-sequences/{route_id}",
    params(("route_id" = i64, Path, description = "Route assignment id")),
    responses(
        (status = 200, description = "Stops for the route", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope),
        (status = 404, description = "Route not found", body = Envelope)
    )
)]
pub async fn assignment_sequences_handler(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<i64>,
) -> Response {
    let assignment = match state.db.get_assignment(route_id).await {
        Ok(assignment) => assignment,
        Err(e) => return port_error_response(e),
    };
    let stops = match state.db.list_stops(route_id).await {
        Ok(stops) => stops,
        Err(e) => return port_error_response(e),
    };
    let progress = match state.db.stop_progress(route_id).await {
        Ok(progress) => progress,
        Err(e) => return port_error_response(e),
    };
    let next = scheduler::next_eligible(&progress);

    let next_status = match next {
        NextStop::Eligible { status, .. } => Some(status.to_string()),
        NextStop::AllCompleted => None,
    };
    envelope::ok(
        format!("{} sequences found", stops.len()),
        json!({
            "assignment": AssignmentDto::from(assignment),
            "sequences": stops.into_iter().map(StopDto::from).collect::<Vec<_>>(),
            "sequential_info": {
                "next_sequence": next.sequence(),
                "next_status": next_status,
                "all_completed": next.is_all_completed(),
            },
        }),
    )
}

/// The next sequence the driver must act on.
#[utoipa::path(
    get,
    path = "/multi-pickup/next-sequence/{route_id}",
    params(("route_id" = i64, Path, description = "Route assignment id")),
    responses(
        (status = 200, description = "Next eligible sequence", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope),
        (status = 404, description = "Route has no stops", body = Envelope)
    )
)]
pub async fn next_sequence_handler(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<i64>,
) -> Response {
    let progress = match state.db.stop_progress(route_id).await {
        Ok(progress) => progress,
        Err(e) => return port_error_response(e),
    };
    if progress.is_empty() {
        return envelope::fail(
            StatusCode::NOT_FOUND,
            format!("No stops found for route {}", route_id),
        );
    }

    match scheduler::next_eligible(&progress) {
        NextStop::Eligible { sequence, status } => envelope::ok(
            format!("Next sequence is {}", sequence),
            json!({
                "next_sequence": sequence,
                "status": status.to_string(),
                "all_completed": false,
            }),
        ),
        NextStop::AllCompleted => envelope::ok(
            "All sequences completed",
            json!({ "next_sequence": null, "all_completed": true }),
        ),
    }
}

//=========================================================================================
// Stop Transition Handlers
//=========================================================================================

/// Start a stop by its row id.
#[utoipa::path(
    post,
    path = "/multi-pickup/start-stop/{stop_id}",
    params(("stop_id" = i64, Path, description = "Stop row id")),
    responses(
        (status = 200, description = "Stop started", body = Envelope),
        (status = 400, description = "Out-of-order or repeated transition", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope),
        (status = 404, description = "Stop not found", body = Envelope)
    )
)]
pub async fn start_stop_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    Path(stop_id): Path<i64>,
) -> Response {
    let stop = match state.db.get_stop(stop_id).await {
        Ok(stop) => stop,
        Err(e) => return port_error_response(e),
    };
    if let Err(response) = ensure_session_route(&ctx, stop.route_id) {
        return response;
    }
    run_transition(&state, &ctx, stop.route_id, stop.sequence, StopAction::Start, None).await
}

/// Complete a stop by its row id.
#[utoipa::path(
    post,
    path = "/multi-pickup/complete-stop/{stop_id}",
    params(("stop_id" = i64, Path, description = "Stop row id")),
    request_body = CompleteStopRequest,
    responses(
        (status = 200, description = "Stop completed", body = Envelope),
        (status = 400, description = "Out-of-order transition or invalid payload", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope),
        (status = 404, description = "Stop not found", body = Envelope)
    )
)]
pub async fn complete_stop_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    Path(stop_id): Path<i64>,
    Json(req): Json<CompleteStopRequest>,
) -> Response {
    let stop = match state.db.get_stop(stop_id).await {
        Ok(stop) => stop,
        Err(e) => return port_error_response(e),
    };
    if let Err(response) = ensure_session_route(&ctx, stop.route_id) {
        return response;
    }
    run_transition(
        &state,
        &ctx,
        stop.route_id,
        stop.sequence,
        StopAction::Complete,
        Some(req),
    )
    .await
}

/// Start a stop addressed by route and sequence.
#[utoipa::path(
    post,
    path = "/multi-pickup/start-stop-by-sequence/{route_id}/{sequence}",
    params(
        ("route_id" = i64, Path, description = "Route assignment id"),
        ("sequence" = i32, Path, description = "Stop sequence number")
    ),
    responses(
        (status = 200, description = "Stop started", body = Envelope),
        (status = 400, description = "Out-of-order or repeated transition", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope),
        (status = 404, description = "Route or sequence not found", body = Envelope)
    )
)]
pub async fn start_stop_by_sequence_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    Path((route_id, sequence)): Path<(i64, i32)>,
) -> Response {
    if let Err(response) = ensure_session_route(&ctx, route_id) {
        return response;
    }
    run_transition(&state, &ctx, route_id, sequence, StopAction::Start, None).await
}

/// Complete a stop addressed by route and sequence.
#[utoipa::path(
    post,
    path = "/multi-pickup/complete-stop-by-sequence/{route_id}/{sequence}",
    params(
        ("route_id" = i64, Path, description = "Route assignment id"),
        ("sequence" = i32, Path, description = "Stop sequence number")
    ),
    request_body = CompleteStopRequest,
    responses(
        (status = 200, description = "Stop completed", body = Envelope),
        (status = 400, description = "Out-of-order transition or invalid payload", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope),
        (status = 404, description = "Route or sequence not found", body = Envelope)
    )
)]
pub async fn complete_stop_by_sequence_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    Path((route_id, sequence)): Path<(i64, i32)>,
    Json(req): Json<CompleteStopRequest>,
) -> Response {
    if let Err(response) = ensure_session_route(&ctx, route_id) {
        return response;
    }
    run_transition(&state, &ctx, route_id, sequence, StopAction::Complete, Some(req)).await
}

/// Start the next pending stop on the session's route.
#[utoipa::path(
    post,
    path = "/multi-pickup/auto-start-next",
    responses(
        (status = 200, description = "Next stop started", body = Envelope),
        (status = 400, description = "Nothing to start", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn auto_start_next_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Response {
    let route_id = match session_route(&ctx) {
        Ok(route_id) => route_id,
        Err(response) => return response,
    };
    let progress = match state.db.stop_progress(route_id).await {
        Ok(progress) => progress,
        Err(e) => return port_error_response(e),
    };
    match scheduler::next_eligible(&progress) {
        NextStop::Eligible { sequence, .. } => {
            run_transition(&state, &ctx, route_id, sequence, StopAction::Start, None).await
        }
        NextStop::AllCompleted => envelope::ok(
            "All sequences completed. Ready to complete trip.",
            json!({ "all_completed": true, "next_sequence": null }),
        ),
    }
}

/// Complete the currently in-progress stop on the session's route.
#[utoipa::path(
    post,
    path = "/multi-pickup/auto-complete-current",
    request_body = CompleteStopRequest,
    responses(
        (status = 200, description = "Current stop completed", body = Envelope),
        (status = 400, description = "No stop is in progress", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn auto_complete_current_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    body: Option<Json<CompleteStopRequest>>,
) -> Response {
    let Json(req) = body.unwrap_or_else(|| Json(CompleteStopRequest::default()));
    let route_id = match session_route(&ctx) {
        Ok(route_id) => route_id,
        Err(response) => return response,
    };
    let progress = match state.db.stop_progress(route_id).await {
        Ok(progress) => progress,
        Err(e) => return port_error_response(e),
    };
    match scheduler::next_eligible(&progress) {
        NextStop::Eligible { sequence, .. } => {
            run_transition(&state, &ctx, route_id, sequence, StopAction::Complete, Some(req)).await
        }
        NextStop::AllCompleted => envelope::fail(
            StatusCode::BAD_REQUEST,
            "All sequences are already completed",
        ),
    }
}

//=========================================================================================
// Trip Lifecycle Handlers
//=========================================================================================

/// Mark the session's route as started.
#[utoipa::path(
    post,
    path = "/multi-pickup/start-trip",
    responses(
        (status = 200, description = "Trip started (idempotent)", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn start_trip_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Response {
    let route_id = match session_route(&ctx) {
        Ok(route_id) => route_id,
        Err(response) => return response,
    };
    let lock = state.route_lock(route_id);
    let _guard = lock.lock().await;

    use pickup_route_core::domain::AssignmentStatus;
    let changed = match state
        .db
        .update_assignment_status(route_id, AssignmentStatus::InProgress)
        .await
    {
        Ok(changed) => changed,
        Err(e) => return port_error_response(e),
    };
    state.tokens.update_state(&ctx.token, |session| {
        if let SessionState::MultiPickup { trip_started, .. } = session {
            *trip_started = true;
        }
    });

    let assignment = match state.db.get_assignment(route_id).await {
        Ok(assignment) => assignment,
        Err(e) => return port_error_response(e),
    };
    let message = if changed {
        "Trip started"
    } else {
        "Trip was already started"
    };
    envelope::ok(message, AssignmentDto::from(assignment))
}

/// Mark the session's route as completed. Requires every stop to be
/// completed; a repeat completion is rejected so trip_ended_at is never
/// re-stamped.
#[utoipa::path(
    post,
    path = "/multi-pickup/complete-trip",
    responses(
        (status = 200, description = "Trip completed", body = Envelope),
        (status = 400, description = "Stops remain uncompleted, or trip already completed", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope)
    )
)]
pub async fn complete_trip_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Response {
    let route_id = match session_route(&ctx) {
        Ok(route_id) => route_id,
        Err(response) => return response,
    };
    let lock = state.route_lock(route_id);
    let _guard = lock.lock().await;

    let progress = match state.db.stop_progress(route_id).await {
        Ok(progress) => progress,
        Err(e) => return port_error_response(e),
    };
    let remaining = progress
        .iter()
        .filter(|p| p.status != StopStatus::Completed)
        .count();
    if remaining > 0 {
        return envelope::fail(
            StatusCode::BAD_REQUEST,
            format!(
                "Cannot complete trip. {} sequence(s) are not completed yet",
                remaining
            ),
        );
    }

    use pickup_route_core::domain::AssignmentStatus;
    let changed = match state
        .db
        .update_assignment_status(route_id, AssignmentStatus::Completed)
        .await
    {
        Ok(changed) => changed,
        Err(e) => return port_error_response(e),
    };
    if !changed {
        return envelope::fail(StatusCode::BAD_REQUEST, "Trip is already completed");
    }

    let assignment = match state.db.get_assignment(route_id).await {
        Ok(assignment) => assignment,
        Err(e) => return port_error_response(e),
    };
    envelope::ok("Trip completed", AssignmentDto::from(assignment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_weights_both_parse() {
        assert_eq!(parse_weight(&json!(12.5)).unwrap(), 12.5);
        assert_eq!(parse_weight(&json!("12.5")).unwrap(), 12.5);
        assert_eq!(parse_weight(&json!(" 7 ")).unwrap(), 7.0);
    }

    #[test]
    fn non_positive_and_garbage_weights_are_rejected() {
        assert!(parse_weight(&json!(0)).is_err());
        assert!(parse_weight(&json!(-3.2)).is_err());
        assert!(parse_weight(&json!("abc")).is_err());
        assert!(parse_weight(&json!(null)).is_err());
        assert!(parse_weight(&json!(["12"])).is_err());
    }
}
