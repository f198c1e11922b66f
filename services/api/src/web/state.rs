//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-resource locks that
//! serialize route transitions and impact recomputation.

use crate::config::Config;
use crate::session::TokenStore;
use pickup_route_core::ports::{DatabaseService, DocumentUploadService, ImageConversionService};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all
/// handlers.
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub uploader: Option<Arc<dyn DocumentUploadService>>,
    pub converter: Arc<dyn ImageConversionService>,
    pub tokens: Arc<TokenStore>,
    pub config: Arc<Config>,
    route_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    impact_locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl AppState {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        uploader: Option<Arc<dyn DocumentUploadService>>,
        converter: Arc<dyn ImageConversionService>,
        tokens: Arc<TokenStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            uploader,
            converter,
            tokens,
            config,
            route_locks: Mutex::new(HashMap::new()),
            impact_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-route mutex held across the read-validate-write of a stop or
    /// trip transition, so two concurrent requests cannot both pass
    /// validation against the same snapshot.
    pub fn route_lock(&self, route_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.route_locks.lock().expect("route lock map poisoned");
        locks.entry(route_id).or_default().clone()
    }

    /// Per-(branch, corporate) mutex serializing impact recomputation so
    /// concurrent resyncs cannot interleave their read-then-replace.
    pub fn impact_lock(
        &self,
        branch_code: &str,
        corporate_code: &str,
    ) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.impact_locks.lock().expect("impact lock map poisoned");
        locks
            .entry((branch_code.to_string(), corporate_code.to_string()))
            .or_default()
            .clone()
    }
}
