//! services/api/src/web/barcode.rs
//!
//! Bag-barcode master data and the pickup-to-sorting bag cycle lifecycle.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use pickup_route_core::domain::{BagCycle, Barcode, CycleStatus, NewRouteStop};
use pickup_route_core::ports::{BarcodeFilter, CycleFilter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::session::SessionContext;
use crate::web::envelope::{self, Envelope};
use crate::web::impact;
use crate::web::state::AppState;
use crate::web::trip::{parse_weight, port_error_response};

/// Bag type recorded when a scan auto-registers an unknown barcode.
const DEFAULT_BAGTYPE: &str = "B2B";

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

//=========================================================================================
// Request / Response Payloads
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct ScanRequest {
    pub barcode_id: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub barcode_id: String,
    pub bagtype: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, IntoParams)]
pub struct BarcodeListQuery {
    pub is_active: Option<bool>,
    pub bagtype: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct CycleStartRequest {
    pub barcode_id: String,
    pub branch_code: String,
    #[schema(value_type = String)]
    pub pickup_weight: serde_json::Value,
    pub route_id: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct ScanAndStartRequest {
    pub barcode_id: String,
    pub branch_code: String,
    #[schema(value_type = String)]
    pub pickup_weight: serde_json::Value,
}

#[derive(Deserialize, ToSchema)]
pub struct CycleStatusRequest {
    pub status: String,
    #[schema(value_type = Option<String>)]
    pub inbound_weight: Option<serde_json::Value>,
}

#[derive(Deserialize, IntoParams)]
pub struct CycleListQuery {
    pub status: Option<String>,
    pub branch_code: Option<String>,
    pub barcode_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Weigh-in accepts either the bag's barcode or the explicit cycle
/// identifier; exactly one is required.
#[derive(Deserialize, ToSchema)]
pub struct InboundWeightRequest {
    pub barcode_id: Option<String>,
    pub cycle_id: Option<String>,
    #[schema(value_type = String)]
    pub inbound_weight: serde_json::Value,
}

#[derive(Serialize, ToSchema)]
pub struct BarcodeDto {
    pub id: i64,
    pub barcode_id: String,
    pub bagtype: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Barcode> for BarcodeDto {
    fn from(b: Barcode) -> Self {
        Self {
            id: b.id,
            barcode_id: b.barcode_id,
            bagtype: b.bagtype,
            is_active: b.is_active,
            created_at: b.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CycleDto {
    pub id: i64,
    pub cycle_id: String,
    pub barcode_id: String,
    pub branch_code: String,
    pub route_id: Option<i64>,
    pub pickup_weight: f64,
    pub inbound_weight: Option<f64>,
    pub status: String,
    pub picked_at: Option<DateTime<Utc>>,
    pub inbound_at: Option<DateTime<Utc>>,
    pub sorted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<BagCycle> for CycleDto {
    fn from(c: BagCycle) -> Self {
        Self {
            id: c.id,
            cycle_id: c.cycle_id,
            barcode_id: c.barcode_id,
            branch_code: c.branch_code,
            route_id: c.route_id,
            pickup_weight: c.pickup_weight,
            inbound_weight: c.inbound_weight,
            status: c.status.to_string(),
            picked_at: c.picked_at,
            inbound_at: c.inbound_at,
            sorted_at: c.sorted_at,
            completed_at: c.completed_at,
        }
    }
}

//=========================================================================================
// Shared Helpers
//=========================================================================================

fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Cycle ids are date plus a barcode prefix so warehouse staff can read
/// them off a screen.
fn new_cycle_id(barcode_id: &str) -> String {
    let prefix: String = barcode_id.chars().take(8).collect();
    format!("CYCLE_{}_{}", Utc::now().format("%Y%m%d"), prefix)
}

/// Opens a new cycle for a barcode, rejecting when one is already in
/// flight.
async fn open_cycle(
    state: &AppState,
    barcode_id: &str,
    branch_code: &str,
    route_id: Option<i64>,
    pickup_weight: f64,
) -> Response {
    match state.db.find_active_cycle(barcode_id).await {
        Ok(Some(active)) => {
            return envelope::fail(
                StatusCode::CONFLICT,
                format!(
                    "Barcode {} already has an active cycle {}",
                    barcode_id, active.cycle_id
                ),
            )
        }
        Ok(None) => {}
        Err(e) => return port_error_response(e),
    }

    let cycle_id = new_cycle_id(barcode_id);
    match state
        .db
        .create_cycle(&cycle_id, barcode_id, branch_code, route_id, pickup_weight)
        .await
    {
        Ok(cycle) => {
            info!(barcode_id, cycle_id = %cycle.cycle_id, "bag cycle started");
            envelope::ok("Cycle started", json!({ "cycle": CycleDto::from(cycle) }))
        }
        Err(e) => port_error_response(e),
    }
}

//=========================================================================================
// Barcode Master Handlers
//=========================================================================================

/// Scan a barcode: returns its master entry (auto-registering unknown
/// ones) and any active cycle.
#[utoipa::path(
    post,
    path = "/barcode/scan",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Barcode details", body = Envelope),
        (status = 500, description = "Internal server error", body = Envelope)
    )
)]
pub async fn scan_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> Response {
    let barcode_id = req.barcode_id.trim();
    if barcode_id.is_empty() {
        return envelope::fail(StatusCode::BAD_REQUEST, "barcode_id is required");
    }

    let barcode = match state.db.find_barcode(barcode_id, true).await {
        Ok(Some(barcode)) => barcode,
        Ok(None) => {
            // Field bags sometimes reach a route before back-office
            // registration; register on first scan rather than blocking
            // the pickup.
            match state
                .db
                .register_barcode(barcode_id, DEFAULT_BAGTYPE, true)
                .await
            {
                Ok(barcode) => {
                    info!(barcode_id, "auto-registered barcode on first scan");
                    barcode
                }
                Err(e) => return port_error_response(e),
            }
        }
        Err(e) => return port_error_response(e),
    };

    let active_cycle = match state.db.find_active_cycle(barcode_id).await {
        Ok(cycle) => cycle,
        Err(e) => return port_error_response(e),
    };

    envelope::ok(
        "Barcode scanned",
        json!({
            "barcode": BarcodeDto::from(barcode),
            "active_cycle": active_cycle.map(CycleDto::from),
        }),
    )
}

/// Register a barcode in the master table.
#[utoipa::path(
    post,
    path = "/barcode/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Barcode registered", body = Envelope),
        (status = 409, description = "Barcode already exists", body = Envelope)
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let barcode_id = req.barcode_id.trim();
    if barcode_id.is_empty() {
        return envelope::fail(StatusCode::BAD_REQUEST, "barcode_id is required");
    }
    let bagtype = req.bagtype.as_deref().unwrap_or(DEFAULT_BAGTYPE);
    match state
        .db
        .register_barcode(barcode_id, bagtype, req.is_active.unwrap_or(true))
        .await
    {
        Ok(barcode) => envelope::ok(
            "Barcode registered",
            json!({ "barcode": BarcodeDto::from(barcode) }),
        ),
        Err(e) => port_error_response(e),
    }
}

/// Page through the barcode master table.
#[utoipa::path(
    get,
    path = "/barcode/master/list",
    params(BarcodeListQuery),
    responses(
        (status = 200, description = "Barcode page", body = Envelope)
    )
)]
pub async fn master_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BarcodeListQuery>,
) -> Response {
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let filter = BarcodeFilter {
        is_active: query.is_active,
        bagtype: query.bagtype,
        limit,
        offset,
    };
    match state.db.list_barcodes(&filter).await {
        Ok((barcodes, total)) => envelope::ok(
            format!("{} barcodes found", total),
            json!({
                "barcodes": barcodes.into_iter().map(BarcodeDto::from).collect::<Vec<_>>(),
                "total": total,
                "limit": limit,
                "offset": offset,
            }),
        ),
        Err(e) => port_error_response(e),
    }
}

//=========================================================================================
// Bag Cycle Handlers
//=========================================================================================

/// Start a bag cycle for a registered, active barcode.
#[utoipa::path(
    post,
    path = "/barcode/cycle/start",
    request_body = CycleStartRequest,
    responses(
        (status = 200, description = "Cycle started", body = Envelope),
        (status = 404, description = "Barcode unknown or inactive", body = Envelope),
        (status = 409, description = "Barcode already has an active cycle", body = Envelope)
    )
)]
pub async fn cycle_start_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CycleStartRequest>,
) -> Response {
    let pickup_weight = match parse_weight(&req.pickup_weight) {
        Ok(w) => w,
        Err(msg) => return envelope::fail(StatusCode::BAD_REQUEST, msg),
    };
    match state.db.find_barcode(&req.barcode_id, true).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return envelope::fail(
                StatusCode::NOT_FOUND,
                format!("Barcode {} not found or inactive", req.barcode_id),
            )
        }
        Err(e) => return port_error_response(e),
    }
    open_cycle(
        &state,
        &req.barcode_id,
        &req.branch_code,
        req.route_id,
        pickup_weight,
    )
    .await
}

/// Scan a bag during a route and start its cycle in one step. The cycle
/// is bound to the session's route; unknown barcodes are auto-registered.
#[utoipa::path(
    post,
    path = "/barcode/cycle/scan-and-start",
    request_body = ScanAndStartRequest,
    responses(
        (status = 200, description = "Cycle started", body = Envelope),
        (status = 401, description = "Missing, invalid or expired token", body = Envelope),
        (status = 409, description = "Barcode already has an active cycle", body = Envelope)
    )
)]
pub async fn cycle_scan_and_start_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    Json(req): Json<ScanAndStartRequest>,
) -> Response {
    let pickup_weight = match parse_weight(&req.pickup_weight) {
        Ok(w) => w,
        Err(msg) => return envelope::fail(StatusCode::BAD_REQUEST, msg),
    };
    let barcode_id = req.barcode_id.trim();
    if barcode_id.is_empty() {
        return envelope::fail(StatusCode::BAD_REQUEST, "barcode_id is required");
    }

    match state.db.find_barcode(barcode_id, true).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            if let Err(e) = state
                .db
                .register_barcode(barcode_id, DEFAULT_BAGTYPE, true)
                .await
            {
                return port_error_response(e);
            }
            info!(barcode_id, "auto-registered barcode on scan-and-start");
        }
        Err(e) => return port_error_response(e),
    }

    // A scan at an unplanned location extends the session's route: the
    // branch is appended as a new stop at the next sequence number.
    let route_id = ctx.record.route_id();
    if let Some(route_id) = route_id {
        let already_routed = match state.db.list_stops(route_id).await {
            Ok(stops) => stops.iter().any(|s| s.branch_code == req.branch_code),
            Err(e) => return port_error_response(e),
        };
        if !already_routed {
            let sequence = match state.db.next_stop_sequence(route_id).await {
                Ok(sequence) => sequence,
                Err(e) => return port_error_response(e),
            };
            let new_stop = NewRouteStop {
                route_id,
                sequence,
                branch_code: req.branch_code.clone(),
                branch_name: None,
                address: None,
                contact: None,
                latitude: None,
                longitude: None,
            };
            match state.db.add_stop(new_stop).await {
                Ok(stop) => info!(
                    route_id,
                    sequence = stop.sequence,
                    branch_code = %stop.branch_code,
                    "appended scanned branch to route"
                ),
                Err(e) => return port_error_response(e),
            }
        }
    }

    open_cycle(&state, barcode_id, &req.branch_code, route_id, pickup_weight).await
}

/// Advance a cycle's status. Transitions only move forward.
#[utoipa::path(
    post,
    path = "/barcode/cycle/{id}/update-status",
    params(("id" = i64, Path, description = "Cycle row id")),
    request_body = CycleStatusRequest,
    responses(
        (status = 200, description = "Cycle updated", body = Envelope),
        (status = 400, description = "Unknown status or backward transition", body = Envelope),
        (status = 404, description = "Cycle not found", body = Envelope)
    )
)]
pub async fn cycle_update_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<CycleStatusRequest>,
) -> Response {
    let target: CycleStatus = match req.status.parse() {
        Ok(status) => status,
        Err(_) => {
            return envelope::fail(
                StatusCode::BAD_REQUEST,
                format!("Unknown cycle status '{}'", req.status),
            )
        }
    };
    let inbound_weight = match &req.inbound_weight {
        Some(value) => match parse_weight(value) {
            Ok(w) => Some(w),
            Err(msg) => return envelope::fail(StatusCode::BAD_REQUEST, msg),
        },
        None => None,
    };

    let cycle = match state.db.get_cycle(id).await {
        Ok(cycle) => cycle,
        Err(e) => return port_error_response(e),
    };
    if !cycle.status.can_advance_to(target) {
        return envelope::fail(
            StatusCode::BAD_REQUEST,
            format!("Cannot move cycle from {} to {}", cycle.status, target),
        );
    }

    match state.db.update_cycle_status(id, target, inbound_weight).await {
        Ok(updated) => envelope::ok(
            format!("Cycle moved to {}", target),
            json!({ "cycle": CycleDto::from(updated) }),
        ),
        Err(e) => port_error_response(e),
    }
}

/// Fetch one cycle by row id.
#[utoipa::path(
    get,
    path = "/barcode/cycle/{id}",
    params(("id" = i64, Path, description = "Cycle row id")),
    responses(
        (status = 200, description = "Cycle details", body = Envelope),
        (status = 404, description = "Cycle not found", body = Envelope)
    )
)]
pub async fn cycle_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match state.db.get_cycle(id).await {
        Ok(cycle) => envelope::ok("Cycle found", json!({ "cycle": CycleDto::from(cycle) })),
        Err(e) => port_error_response(e),
    }
}

/// Page through cycles with optional filters.
#[utoipa::path(
    get,
    path = "/barcode/cycle/list",
    params(CycleListQuery),
    responses(
        (status = 200, description = "Cycle page", body = Envelope),
        (status = 400, description = "Unknown status filter", body = Envelope)
    )
)]
pub async fn cycle_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CycleListQuery>,
) -> Response {
    let status = match &query.status {
        Some(raw) => match raw.parse::<CycleStatus>() {
            Ok(status) => Some(status),
            Err(_) => {
                return envelope::fail(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown cycle status '{}'", raw),
                )
            }
        },
        None => None,
    };
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let filter = CycleFilter {
        status,
        branch_code: query.branch_code,
        barcode_id: query.barcode_id,
        limit,
        offset,
    };
    match state.db.list_cycles(&filter).await {
        Ok((cycles, total)) => envelope::ok(
            format!("{} cycles found", total),
            json!({
                "cycles": cycles.into_iter().map(CycleDto::from).collect::<Vec<_>>(),
                "total": total,
                "limit": limit,
                "offset": offset,
            }),
        ),
        Err(e) => port_error_response(e),
    }
}

/// Full cycle history of one barcode, newest first.
#[utoipa::path(
    get,
    path = "/barcode/cycle/by-barcode/{barcode_id}",
    params(("barcode_id" = String, Path, description = "Barcode identifier")),
    responses(
        (status = 200, description = "Cycle history", body = Envelope)
    )
)]
pub async fn cycle_by_barcode_handler(
    State(state): State<Arc<AppState>>,
    Path(barcode_id): Path<String>,
) -> Response {
    match state.db.list_cycles_for_barcode(&barcode_id).await {
        Ok(cycles) => envelope::ok(
            format!("{} cycles found", cycles.len()),
            json!({
                "barcode_id": barcode_id,
                "cycles": cycles.into_iter().map(CycleDto::from).collect::<Vec<_>>(),
            }),
        ),
        Err(e) => port_error_response(e),
    }
}

/// Record a bag's weighed arrival at the facility: moves the cycle to
/// inbound, mirrors the weight onto the originating route stop, and
/// refreshes the branch's impact rollup.
#[utoipa::path(
    post,
    path = "/barcode/inbound/scan-weight",
    request_body = InboundWeightRequest,
    responses(
        (status = 200, description = "Inbound weight recorded", body = Envelope),
        (status = 400, description = "Invalid weight or cycle already past inbound", body = Envelope),
        (status = 404, description = "No active cycle for the barcode", body = Envelope)
    )
)]
pub async fn inbound_scan_weight_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InboundWeightRequest>,
) -> Response {
    let inbound_weight = match parse_weight(&req.inbound_weight) {
        Ok(w) => w,
        Err(msg) => return envelope::fail(StatusCode::BAD_REQUEST, msg),
    };

    let cycle = match (&req.barcode_id, &req.cycle_id) {
        (Some(barcode_id), _) => match state.db.find_active_cycle(barcode_id).await {
            Ok(Some(cycle)) => cycle,
            Ok(None) => {
                return envelope::fail(
                    StatusCode::NOT_FOUND,
                    format!("No active cycle found for barcode {}", barcode_id),
                )
            }
            Err(e) => return port_error_response(e),
        },
        (None, Some(cycle_id)) => match state.db.find_cycle_by_cycle_id(cycle_id).await {
            Ok(Some(cycle)) => cycle,
            Ok(None) => {
                return envelope::fail(
                    StatusCode::NOT_FOUND,
                    format!("Cycle {} not found", cycle_id),
                )
            }
            Err(e) => return port_error_response(e),
        },
        (None, None) => {
            return envelope::fail(
                StatusCode::BAD_REQUEST,
                "Either barcode_id or cycle_id is required",
            )
        }
    };
    if cycle.status > CycleStatus::Inbound {
        return envelope::fail(
            StatusCode::BAD_REQUEST,
            format!("Cycle {} is already {}", cycle.cycle_id, cycle.status),
        );
    }

    let updated = match state
        .db
        .update_cycle_status(cycle.id, CycleStatus::Inbound, Some(inbound_weight))
        .await
    {
        Ok(updated) => updated,
        Err(e) => return port_error_response(e),
    };

    // Mirror the measured weight onto the route stop the bag came from.
    let mut mirrored_stop = None;
    if let Some(route_id) = updated.route_id {
        match state
            .db
            .record_stop_inbound_weight(route_id, &updated.branch_code, inbound_weight)
            .await
        {
            Ok(stop) => mirrored_stop = stop.map(|s| s.id),
            Err(e) => warn!("could not mirror inbound weight to route stop: {e}"),
        }
    }

    // Fresh weigh data changes the branch's impact figures; recompute
    // best-effort so a missing branch mapping never fails the weigh-in.
    if let Err(_response) = impact::recompute_branch(&state, &updated.branch_code, None).await {
        warn!(
            branch_code = %updated.branch_code,
            "impact recompute after inbound weigh-in did not apply"
        );
    }

    envelope::ok(
        "Inbound weight recorded",
        json!({
            "cycle": CycleDto::from(updated),
            "mirrored_stop_id": mirrored_stop,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_ids_carry_date_and_barcode_prefix() {
        let id = new_cycle_id("BAG0012345XYZ");
        let today = Utc::now().format("%Y%m%d").to_string();
        assert_eq!(id, format!("CYCLE_{}_BAG00123", today));
    }

    #[test]
    fn short_barcodes_use_the_whole_id_as_prefix() {
        let id = new_cycle_id("B7");
        assert!(id.ends_with("_B7"));
    }

    #[test]
    fn page_clamping_bounds_limit_and_offset() {
        assert_eq!(clamp_page(None, None), (DEFAULT_PAGE_SIZE, 0));
        assert_eq!(clamp_page(Some(0), Some(-5)), (1, 0));
        assert_eq!(clamp_page(Some(10_000), Some(20)), (MAX_PAGE_SIZE, 20));
    }
}
