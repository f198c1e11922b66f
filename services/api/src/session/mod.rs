//! services/api/src/session/mod.rs
//!
//! Driver-session management: the file-backed token store and the bearer
//! token authenticator built on top of it.

pub mod auth;
pub mod store;

pub use auth::{authenticate, AuthRejection, SessionContext};
pub use store::TokenStore;

/// Session lifetime in hours; a driver's shift plus margin.
pub const TOKEN_EXPIRY_HOURS: i64 = 20;
