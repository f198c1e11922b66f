//! crates/pickup_route_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format,
//! with the one exception that session records derive serde so the token
//! store can persist them across restarts.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a status string from an external source does not
/// name a known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct ParseStatusError(pub String);

//=========================================================================================
// Status Enums
//=========================================================================================

/// Lifecycle of a single route stop. The only legal transitions are
/// `Pending -> InProgress -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Pending,
    InProgress,
    Completed,
}

impl StopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopStatus::Pending => "pending",
            StopStatus::InProgress => "in_progress",
            StopStatus::Completed => "completed",
        }
    }

    /// The derived status written to the branch pickup frequency projection.
    pub fn as_frequency_status(&self) -> &'static str {
        match self {
            StopStatus::Pending => "PENDING",
            StopStatus::InProgress => "IN_PROGRESS",
            StopStatus::Completed => "COMPLETED",
        }
    }
}

impl FromStr for StopStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StopStatus::Pending),
            "in_progress" => Ok(StopStatus::InProgress),
            "completed" => Ok(StopStatus::Completed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl fmt::Display for StopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a whole route assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssignmentStatus::Pending),
            "in_progress" => Ok(AssignmentStatus::InProgress),
            "completed" => Ok(AssignmentStatus::Completed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a barcode-tagged bag cycle. Transitions are strictly
/// forward in declaration order: picked -> inbound -> sorting -> completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Picked,
    Inbound,
    Sorting,
    Completed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Picked => "picked",
            CycleStatus::Inbound => "inbound",
            CycleStatus::Sorting => "sorting",
            CycleStatus::Completed => "completed",
        }
    }

    /// A transition is legal only when it moves strictly forward.
    pub fn can_advance_to(&self, next: CycleStatus) -> bool {
        next > *self
    }
}

impl FromStr for CycleStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "picked" => Ok(CycleStatus::Picked),
            "inbound" => Ok(CycleStatus::Inbound),
            "sorting" => Ok(CycleStatus::Sorting),
            "completed" => Ok(CycleStatus::Completed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two kinds of driver session the backend issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    SinglePickup,
    MultiPickup,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::SinglePickup => "single_pickup",
            SessionKind::MultiPickup => "multi_pickup",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Route Assignments and Stops
//=========================================================================================

/// One vehicle's route for one date.
#[derive(Debug, Clone)]
pub struct RouteAssignment {
    pub route_id: i64,
    pub route_date: NaiveDate,
    /// Nullable until a vehicle app claims the route.
    pub driver_dl: Option<String>,
    pub vehicle_no: String,
    pub status: AssignmentStatus,
    pub trip_started_at: Option<DateTime<Utc>>,
    pub trip_ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One pickup location within a route, identified by (route_id, sequence).
#[derive(Debug, Clone)]
pub struct RouteStop {
    pub id: i64,
    pub route_id: i64,
    pub sequence: i32,
    pub branch_code: String,
    pub branch_name: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: StopStatus,
    /// Set only through the completion action, never from estimates.
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a stop on an assignment.
#[derive(Debug, Clone)]
pub struct NewRouteStop {
    pub route_id: i64,
    pub sequence: i32,
    pub branch_code: String,
    pub branch_name: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// The optional-field bundle persisted when a stop is completed.
///
/// Fields left as `None` are not written, so a completion that carries only
/// a remark never clears previously captured photos (partial-update
/// semantics, not overwrite-with-null).
#[derive(Debug, Clone, Default)]
pub struct StopCompletion {
    pub weight: Option<f64>,
    pub remark: Option<String>,
    pub waste_image_url: Option<String>,
    pub receipt_image_url: Option<String>,
    pub poc_name: Option<String>,
    pub poc_designation: Option<String>,
    pub poc_signature_url: Option<String>,
}

//=========================================================================================
// Driver Sessions
//=========================================================================================

/// Kind-specific mutable app state carried by a session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "session_type", rename_all = "snake_case")]
pub enum SessionState {
    MultiPickup {
        route_id: i64,
        current_page: String,
        trip_started: bool,
        current_stop_index: i32,
        completed_stops: Vec<i32>,
        last_activity: DateTime<Utc>,
    },
    SinglePickup {
        pickup_id: Option<i64>,
        branch_code: Option<String>,
        current_page: String,
        navigation_started: bool,
        completed_steps: Vec<String>,
        last_activity: DateTime<Utc>,
    },
}

impl SessionState {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionState::MultiPickup { .. } => SessionKind::MultiPickup,
            SessionState::SinglePickup { .. } => SessionKind::SinglePickup,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        match self {
            SessionState::MultiPickup { last_activity, .. } => *last_activity = now,
            SessionState::SinglePickup { last_activity, .. } => *last_activity = now,
        }
    }
}

/// One authenticated driver session, exclusively owned by the token store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub vehicle_no: String,
    pub dl_no: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SessionState,
}

impl SessionRecord {
    /// Creates a multi-pickup session bound to a route.
    pub fn new_multi_pickup(
        vehicle_no: String,
        dl_no: String,
        route_id: i64,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            vehicle_no,
            dl_no,
            created_at: now,
            expires_at: now + ttl,
            state: SessionState::MultiPickup {
                route_id,
                current_page: "route_dashboard".to_string(),
                trip_started: false,
                current_stop_index: 0,
                completed_stops: Vec::new(),
                last_activity: now,
            },
        }
    }

    /// Creates a single-pickup session bound to one scheduled pickup.
    pub fn new_single_pickup(
        vehicle_no: String,
        dl_no: String,
        pickup_id: Option<i64>,
        branch_code: Option<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            vehicle_no,
            dl_no,
            created_at: now,
            expires_at: now + ttl,
            state: SessionState::SinglePickup {
                pickup_id,
                branch_code,
                current_page: "dashboard".to_string(),
                navigation_started: false,
                completed_steps: Vec::new(),
                last_activity: now,
            },
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.state.kind()
    }

    /// Route bound to this session, when it is a multi-pickup one.
    pub fn route_id(&self) -> Option<i64> {
        match &self.state {
            SessionState::MultiPickup { route_id, .. } => Some(*route_id),
            SessionState::SinglePickup { .. } => None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

//=========================================================================================
// Barcodes and Bag Cycles
//=========================================================================================

/// A bag barcode registered in the master table.
#[derive(Debug, Clone)]
pub struct Barcode {
    pub id: i64,
    pub barcode_id: String,
    pub bagtype: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One pickup-to-sorting cycle of a barcode-tagged bag.
#[derive(Debug, Clone)]
pub struct BagCycle {
    pub id: i64,
    pub cycle_id: String,
    pub barcode_id: String,
    pub branch_code: String,
    pub route_id: Option<i64>,
    pub pickup_weight: f64,
    pub inbound_weight: Option<f64>,
    pub status: CycleStatus,
    pub picked_at: Option<DateTime<Utc>>,
    pub inbound_at: Option<DateTime<Utc>>,
    pub sorted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Impact Aggregation
//=========================================================================================

/// Summed segregation rows for one (branch, corporate) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SegregationTotals {
    pub branch_code: String,
    pub corporate_code: String,
    pub total_weight: f64,
    pub total_plastic: f64,
    pub total_paper: f64,
    pub total_ewaste: f64,
    pub total_metal: f64,
    pub total_glass: f64,
}

/// The fully recomputed environmental-impact aggregate for a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpactRollup {
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
