//! crates/pickup_route_core/src/lib.rs
//!
//! The core crate for the pickup-route backend. Holds the pure domain
//! types, the service port traits, and the two pieces of logic with real
//! invariants: the sequential stop scheduler and the impact-metric
//! derivation. Nothing in here touches a database, a socket, or a file.

pub mod domain;
pub mod impact;
pub mod ports;
pub mod scheduler;
