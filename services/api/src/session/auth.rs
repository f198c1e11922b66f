//! services/api/src/session/auth.rs
//!
//! Turns a bearer-token header into a validated session context, or a
//! typed rejection. Every rejection maps to HTTP 401 with the exact
//! message the mobile clients key off.

use chrono::{Duration, Utc};
use pickup_route_core::domain::{SessionKind, SessionRecord};
use rand::Rng;

use super::store::TokenStore;

/// Clock-skew allowance added to the stored expiry during validation.
const EXPIRY_GRACE_MINUTES: i64 = 5;

/// Fraction of successful validations that flush the last-activity bump to
/// disk (1 in N). The hourly sweep is the consistency backstop.
const PERSIST_ONE_IN: u32 = 10;

/// A validated session: the token plus a snapshot of its record. The store
/// keeps ownership of the record; this is a read copy, and all mutations go
/// back through the store.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub token: String,
    pub record: SessionRecord,
}

/// Why a bearer token was rejected. All variants are terminal for the
/// request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("No authorization token provided")]
    MissingToken,
    #[error("Invalid token. Session may have expired or backend was restarted. Please login again.")]
    Unknown,
    #[error("Token expired. Please login again.")]
    Expired,
    #[error("Invalid session type. {0} token required.")]
    WrongKind(KindLabel),
}

/// Human-readable label for the required session kind in rejection text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindLabel(pub SessionKind);

impl std::fmt::Display for KindLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            SessionKind::MultiPickup => f.write_str("Multi-pickup"),
            SessionKind::SinglePickup => f.write_str("Single-pickup"),
        }
    }
}

/// Validates a raw `Authorization` header value against the store.
///
/// Strips an optional `Bearer ` prefix. Expiry is checked against the
/// stored expiry plus a fixed grace window; a token past grace is deleted
/// as a side effect. On success the record's last-activity timestamp is
/// bumped, persisting probabilistically to bound file I/O.
pub fn authenticate(
    store: &TokenStore,
    raw_header: Option<&str>,
    required_kind: Option<SessionKind>,
) -> Result<SessionContext, AuthRejection> {
    let raw = raw_header.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Err(AuthRejection::MissingToken);
    }
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
    if token.is_empty() {
        return Err(AuthRejection::MissingToken);
    }

    let record = store.get(token).ok_or(AuthRejection::Unknown)?;

    let deadline = record.expires_at + Duration::minutes(EXPIRY_GRACE_MINUTES);
    if Utc::now() > deadline {
        store.delete(token);
        return Err(AuthRejection::Expired);
    }

    if let Some(required) = required_kind {
        if record.kind() != required {
            return Err(AuthRejection::WrongKind(KindLabel(required)));
        }
    }

    let persist = rand::thread_rng().gen_ratio(1, PERSIST_ONE_IN);
    store.touch(token, persist);

    // Re-read so the context reflects the bumped last-activity.
    let record = store.get(token).ok_or(AuthRejection::Unknown)?;
    Ok(SessionContext {
        token: token.to_string(),
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with(token: &str, record: SessionRecord) -> (tempfile::TempDir, TokenStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        store.put(token.to_string(), record);
        (dir, store)
    }

    fn multi(route_id: i64, ttl: Duration) -> SessionRecord {
        SessionRecord::new_multi_pickup(
            "KA01AB1234".to_string(),
            "DL-042".to_string(),
            route_id,
            ttl,
        )
    }

    #[test]
    fn missing_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        assert_eq!(
            authenticate(&store, None, None).unwrap_err(),
            AuthRejection::MissingToken
        );
        assert_eq!(
            authenticate(&store, Some("  "), None).unwrap_err(),
            AuthRejection::MissingToken
        );
    }

    #[test]
    fn unknown_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        assert_eq!(
            authenticate(&store, Some("Bearer nope"), None).unwrap_err(),
            AuthRejection::Unknown
        );
    }

    #[test]
    fn bearer_prefix_is_optional() {
        let (_dir, store) = store_with("tok1", multi(42, Duration::hours(20)));
        assert!(authenticate(&store, Some("Bearer tok1"), None).is_ok());
        assert!(authenticate(&store, Some("tok1"), None).is_ok());
    }

    #[test]
    fn fresh_multi_pickup_session_validates_with_expected_state() {
        let (_dir, store) = store_with("tok1", multi(42, Duration::hours(20)));
        let ctx = authenticate(
            &store,
            Some("Bearer tok1"),
            Some(SessionKind::MultiPickup),
        )
        .unwrap();
        assert_eq!(ctx.record.vehicle_no, "KA01AB1234");
        assert_eq!(ctx.record.kind(), SessionKind::MultiPickup);
        match &ctx.record.state {
            pickup_route_core::domain::SessionState::MultiPickup {
                route_id,
                current_page,
                ..
            } => {
                assert_eq!(*route_id, 42);
                assert_eq!(current_page, "route_dashboard");
            }
            _ => panic!("wrong session state"),
        }
    }

    #[test]
    fn validity_is_bounded_by_expiry_plus_grace() {
        // Expired one second short of the grace window: still valid.
        let inside = multi(1, Duration::minutes(-EXPIRY_GRACE_MINUTES) + Duration::seconds(1));
        let (_dir, store) = store_with("inside", inside);
        assert!(authenticate(&store, Some("inside"), None).is_ok());

        // One second past the grace window: rejected and removed.
        let outside = multi(1, Duration::minutes(-EXPIRY_GRACE_MINUTES) - Duration::seconds(1));
        let (_dir2, store2) = store_with("outside", outside);
        assert_eq!(
            authenticate(&store2, Some("outside"), None).unwrap_err(),
            AuthRejection::Expired
        );
        assert!(store2.get("outside").is_none());
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let single = SessionRecord::new_single_pickup(
            "KA01AB1234".to_string(),
            "DL-042".to_string(),
            Some(5),
            Some("BR001".to_string()),
            Duration::hours(20),
        );
        let (_dir, store) = store_with("tok1", single);
        let err = authenticate(
            &store,
            Some("tok1"),
            Some(SessionKind::MultiPickup),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid session type. Multi-pickup token required."
        );
    }
}
