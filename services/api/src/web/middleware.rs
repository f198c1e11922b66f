//! services/api/src/web/middleware.rs
//!
//! Bearer-token middleware protecting the driver-facing routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use pickup_route_core::domain::SessionKind;
use std::sync::Arc;

use crate::session::authenticate;
use crate::web::envelope;
use crate::web::state::AppState;

/// Validates the `Authorization` header as a multi-pickup session token.
///
/// On success the `SessionContext` is inserted into request extensions for
/// handlers to read. Every rejection is a 401 envelope carrying the exact
/// message the mobile clients key off.
pub async fn require_multi_pickup_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let raw_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match authenticate(&state.tokens, raw_header, Some(SessionKind::MultiPickup)) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(rejection) => envelope::fail(StatusCode::UNAUTHORIZED, rejection.to_string()),
    }
}
