//! crates/pickup_route_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing
//! the core to be independent of the concrete database, the SOAP upload
//! service, and the optional image converter.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{
    AssignmentStatus, BagCycle, Barcode, CycleStatus, ImpactRollup, NewRouteStop,
    RouteAssignment, RouteStop, SegregationTotals, StopCompletion, StopStatus,
};
use crate::scheduler::StopProgress;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations. Specific driver errors
/// (database, network) are flattened into these variants; raw internals go
/// to server-side logs, never to clients.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Database Port
//=========================================================================================

/// Filters for the barcode master listing.
#[derive(Debug, Clone, Default)]
pub struct BarcodeFilter {
    pub is_active: Option<bool>,
    pub bagtype: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Filters for the bag-cycle listing.
#[derive(Debug, Clone, Default)]
pub struct CycleFilter {
    pub status: Option<CycleStatus>,
    pub branch_code: Option<String>,
    pub barcode_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Round-trips a trivial query so the health endpoint can report
    /// database reachability.
    async fn ping(&self) -> PortResult<()>;

    // --- Route Assignments ---
    async fn create_assignment(
        &self,
        route_date: NaiveDate,
        driver_dl: Option<&str>,
        vehicle_no: &str,
    ) -> PortResult<RouteAssignment>;

    async fn get_assignment(&self, route_id: i64) -> PortResult<RouteAssignment>;

    async fn find_assignment_for_vehicle(
        &self,
        vehicle_no: &str,
        route_date: NaiveDate,
    ) -> PortResult<Option<RouteAssignment>>;

    /// Binds a driver to an assignment on first claim.
    async fn claim_assignment(&self, route_id: i64, driver_dl: &str) -> PortResult<()>;

    /// Transitions the assignment status, stamping trip_started_at /
    /// trip_ended_at as appropriate. Returns false when no row changed
    /// (already in the target status), so callers can treat a repeat
    /// completion as a no-op rather than double-counting.
    async fn update_assignment_status(
        &self,
        route_id: i64,
        status: AssignmentStatus,
    ) -> PortResult<bool>;

    // --- Route Stops ---
    async fn add_stop(&self, stop: NewRouteStop) -> PortResult<RouteStop>;

    async fn get_stop(&self, stop_id: i64) -> PortResult<RouteStop>;

    async fn get_stop_by_sequence(&self, route_id: i64, sequence: i32) -> PortResult<RouteStop>;

    /// All stops for a route, ascending by sequence.
    async fn list_stops(&self, route_id: i64) -> PortResult<Vec<RouteStop>>;

    /// The (sequence, status) projection the scheduler consumes, ascending
    /// by sequence.
    async fn stop_progress(&self, route_id: i64) -> PortResult<Vec<StopProgress>>;

    /// Next sequence number for appending a stop to a route.
    async fn next_stop_sequence(&self, route_id: i64) -> PortResult<i32>;

    /// Marks a stop in_progress and stamps pickup_started_at.
    async fn start_stop(&self, stop_id: i64) -> PortResult<()>;

    /// Marks a stop completed, stamps completion timestamps, and persists
    /// every supplied optional field. Omitted fields are left unchanged.
    async fn complete_stop(&self, stop_id: i64, completion: &StopCompletion) -> PortResult<()>;

    /// Mirrors an inbound weight onto the latest stop for a branch on a
    /// route.
    async fn record_stop_inbound_weight(
        &self,
        route_id: i64,
        branch_code: &str,
        inbound_weight: f64,
    ) -> PortResult<Option<RouteStop>>;

    // --- Branch Pickup Frequency (derived projection) ---
    /// Updates the scheduled-pickup record for branch+date whose status
    /// differs (case-insensitive) from the mapped stop status.
    async fn update_frequency_status(
        &self,
        branch_code: &str,
        pickup_date: NaiveDate,
        status: StopStatus,
    ) -> PortResult<()>;

    // --- Barcode Master ---
    async fn find_barcode(&self, barcode_id: &str, active_only: bool)
        -> PortResult<Option<Barcode>>;

    async fn register_barcode(
        &self,
        barcode_id: &str,
        bagtype: &str,
        is_active: bool,
    ) -> PortResult<Barcode>;

    async fn list_barcodes(&self, filter: &BarcodeFilter) -> PortResult<(Vec<Barcode>, i64)>;

    // --- Bag Cycles ---
    async fn create_cycle(
        &self,
        cycle_id: &str,
        barcode_id: &str,
        branch_code: &str,
        route_id: Option<i64>,
        pickup_weight: f64,
    ) -> PortResult<BagCycle>;

    async fn get_cycle(&self, id: i64) -> PortResult<BagCycle>;

    /// Latest non-completed cycle for a barcode, if any.
    async fn find_active_cycle(&self, barcode_id: &str) -> PortResult<Option<BagCycle>>;

    /// Lookup by the human-readable cycle identifier.
    async fn find_cycle_by_cycle_id(&self, cycle_id: &str) -> PortResult<Option<BagCycle>>;

    async fn list_cycles(&self, filter: &CycleFilter) -> PortResult<(Vec<BagCycle>, i64)>;

    async fn list_cycles_for_barcode(&self, barcode_id: &str) -> PortResult<Vec<BagCycle>>;

    /// Advances a cycle's status, stamping the per-status timestamp and
    /// recording the inbound weight when one is supplied.
    async fn update_cycle_status(
        &self,
        id: i64,
        status: CycleStatus,
        inbound_weight: Option<f64>,
    ) -> PortResult<BagCycle>;

    // --- Impact Aggregation ---
    /// Corporate code mapped to a branch in the branch master.
    async fn corporate_for_branch(&self, branch_code: &str) -> PortResult<String>;

    /// Sums all historical segregation rows for branch+corporate. `None`
    /// when no rows exist.
    async fn segregation_totals(
        &self,
        branch_code: &str,
        corporate_code: &str,
    ) -> PortResult<Option<SegregationTotals>>;

    /// Full-recompute-and-replace upsert keyed by (branch, corporate).
    async fn upsert_impact(&self, rollup: &ImpactRollup) -> PortResult<()>;
}

//=========================================================================================
// Document Upload Port
//=========================================================================================

/// Failure modes of the external document-scan upload service, kept apart
/// so callers can tell a transport fault from an error payload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload transport failure: {0}")]
    Transport(String),
    #[error("upload service rejected the document: {0}")]
    Service(String),
    #[error("upload response could not be interpreted: {0}")]
    BadResponse(String),
    #[error("upload timed out")]
    Timeout,
}

#[async_trait]
pub trait DocumentUploadService: Send + Sync {
    /// Uploads a byte payload under the given filename and returns the
    /// retrievable file path/URL.
    async fn upload(&self, bytes: &[u8], filename: &str) -> Result<String, UploadError>;
}

//=========================================================================================
// Image Conversion Port
//=========================================================================================

/// Failure modes of the optional SVG-to-PNG capability. `Unavailable` is a
/// valid outcome the caller must handle by rejecting the content rather
/// than uploading it untranscoded.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("SVG conversion is not available in this deployment")]
    Unavailable,
    #[error("SVG conversion failed: {0}")]
    Failed(String),
}

pub trait ImageConversionService: Send + Sync {
    fn svg_to_png(&self, svg: &[u8]) -> Result<Vec<u8>, ConversionError>;
}
