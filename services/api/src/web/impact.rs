//! services/api/src/web/impact.rs
//!
//! Environmental-impact aggregation: full recompute-and-replace of a
//! branch's rollup from its historical segregation rows.

use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Json,
};
use pickup_route_core::domain::ImpactRollup;
use pickup_route_core::impact::derive_rollup;
use pickup_route_core::ports::PortError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::web::envelope::{self, Envelope};
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct ResyncRequest {
    pub branch_code: String,
    /// Resolved from the branch master when omitted.
    pub corporate_code: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct RollupDto {
    pub corporate_code: String,
    pub branch_code: String,
    pub total_weight: f64,
    pub total_plastic: f64,
    pub total_cardboard: f64,
    pub total_paper: f64,
    pub total_ewaste: f64,
    pub trees_saved: f64,
    pub water_saved: f64,
    pub energy_saved: f64,
    pub landfill_saved: f64,
}

impl From<ImpactRollup> for RollupDto {
    fn from(r: ImpactRollup) -> Self {
        Self {
            corporate_code: r.corporate_code,
            branch_code: r.branch_code,
            total_weight: r.total_weight,
            total_plastic: r.total_plastic,
            total_cardboard: r.total_cardboard,
            total_paper: r.total_paper,
            total_ewaste: r.total_ewaste,
            trees_saved: r.trees_saved,
            water_saved: r.water_saved,
            energy_saved: r.energy_saved,
            landfill_saved: r.landfill_saved,
        }
    }
}

/// Recomputes and replaces a branch's impact rollup under the per-key
/// lock. Returns the new rollup, or an error response ready to send.
pub(crate) async fn recompute_branch(
    state: &AppState,
    branch_code: &str,
    corporate_code: Option<&str>,
) -> Result<ImpactRollup, Response> {
    let corporate_code = match corporate_code {
        Some(code) => code.to_string(),
        None => match state.db.corporate_for_branch(branch_code).await {
            Ok(code) => code,
            Err(PortError::NotFound(msg)) => {
                return Err(envelope::fail(StatusCode::NOT_FOUND, msg))
            }
            Err(e) => return Err(envelope::internal(e.to_string())),
        },
    };

    let lock = state.impact_lock(branch_code, &corporate_code);
    let _guard = lock.lock().await;

    let totals = match state
        .db
        .segregation_totals(branch_code, &corporate_code)
        .await
    {
        Ok(Some(totals)) => totals,
        Ok(None) => {
            return Err(envelope::fail(
                StatusCode::NOT_FOUND,
                format!("No segregation data found for branch {}", branch_code),
            ))
        }
        Err(e) => return Err(envelope::internal(e.to_string())),
    };

    let rollup = derive_rollup(&totals);
    if let Err(e) = state.db.upsert_impact(&rollup).await {
        return Err(envelope::internal(e.to_string()));
    }
    info!(
        branch_code,
        corporate_code,
        total_weight = rollup.total_weight,
        "impact rollup recomputed"
    );
    Ok(rollup)
}

/// Recompute a branch's impact rollup from scratch.
#[utoipa::path(
    post,
    path = "/impact/resync",
    request_body = ResyncRequest,
    responses(
        (status = 200, description = "Rollup recomputed", body = Envelope),
        (status = 404, description = "Unknown branch or no segregation data", body = Envelope),
        (status = 500, description = "Internal server error", body = Envelope)
    )
)]
pub async fn resync_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResyncRequest>,
) -> Response {
    match recompute_branch(&state, &req.branch_code, req.corporate_code.as_deref()).await {
        Ok(rollup) => envelope::ok(
            "Impact data synchronized",
            json!({ "impact": RollupDto::from(rollup) }),
        ),
        Err(response) => response,
    }
}
