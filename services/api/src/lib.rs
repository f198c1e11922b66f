//! services/api/src/lib.rs
//!
//! Library crate for the pickup-route API service: configuration, error
//! types, the driver session layer, port adapters, and the web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod session;
pub mod web;
