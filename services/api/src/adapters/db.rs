//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the `DatabaseService` port from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.
//!
//! Queries use the runtime API rather than the compile-time macros: the
//! stop-completion update is dynamically shaped (only supplied fields are
//! written), and the runtime API keeps the crate buildable without a live
//! DATABASE_URL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pickup_route_core::domain::{
    AssignmentStatus, BagCycle, Barcode, CycleStatus, ImpactRollup, NewRouteStop,
    ParseStatusError, RouteAssignment, RouteStop, SegregationTotals, StopCompletion, StopStatus,
};
use pickup_route_core::ports::{
    BarcodeFilter, CycleFilter, DatabaseService, PortError, PortResult,
};
use pickup_route_core::scheduler::StopProgress;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::str::FromStr;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_status<T>(raw: &str) -> PortResult<T>
where
    T: FromStr<Err = ParseStatusError>,
{
    raw.parse()
        .map_err(|e: ParseStatusError| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AssignmentRecord {
    route_id: i64,
    route_date: NaiveDate,
    driver_dl: Option<String>,
    vehicle_no: String,
    status: String,
    trip_started_at: Option<DateTime<Utc>>,
    trip_ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AssignmentRecord {
    fn to_domain(self) -> PortResult<RouteAssignment> {
        Ok(RouteAssignment {
            route_id: self.route_id,
            route_date: self.route_date,
            driver_dl: self.driver_dl,
            vehicle_no: self.vehicle_no,
            status: parse_status::<AssignmentStatus>(&self.status)?,
            trip_started_at: self.trip_started_at,
            trip_ended_at: self.trip_ended_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ASSIGNMENT_COLUMNS: &str = "route_id, route_date, driver_dl, vehicle_no, status, \
     trip_started_at, trip_ended_at, created_at, updated_at";

#[derive(FromRow)]
struct StopRecord {
    id: i64,
    route_id: i64,
    sequence: i32,
    branch_code: String,
    branch_name: Option<String>,
    address: Option<String>,
    contact: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    status: String,
    weight: Option<f64>,
    inbound_weight: Option<f64>,
    remark: Option<String>,
    waste_image_url: Option<String>,
    receipt_image_url: Option<String>,
    poc_name: Option<String>,
    poc_designation: Option<String>,
    poc_signature: Option<String>,
    pickup_started_at: Option<DateTime<Utc>>,
    pickup_ended_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StopRecord {
    fn to_domain(self) -> PortResult<RouteStop> {
        Ok(RouteStop {
            id: self.id,
            route_id: self.route_id,
            sequence: self.sequence,
            branch_code: self.branch_code,
            branch_name: self.branch_name,
            address: self.address,
            contact: self.contact,
            latitude: self.latitude,
            longitude: self.longitude,
            status: parse_status::<StopStatus>(&self.status)?,
            weight: self.weight,
            inbound_weight: self.inbound_weight,
            remark: self.remark,
            waste_image_url: self.waste_image_url,
            receipt_image_url: self.receipt_image_url,
            poc_name: self.poc_name,
            poc_designation: self.poc_designation,
            poc_signature: self.poc_signature,
            pickup_started_at: self.pickup_started_at,
            pickup_ended_at: self.pickup_ended_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const STOP_COLUMNS: &str = "id, route_id, sequence, branch_code, branch_name, address, contact, \
     latitude, longitude, status, weight, inbound_weight, remark, waste_image_url, \
     receipt_image_url, poc_name, poc_designation, poc_signature, pickup_started_at, \
     pickup_ended_at, completed_at, created_at, updated_at";

#[derive(FromRow)]
struct ProgressRecord {
    sequence: i32,
    status: String,
}

#[derive(FromRow)]
struct BarcodeRecord {
    id: i64,
    barcode_id: String,
    bagtype: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl BarcodeRecord {
    fn to_domain(self) -> Barcode {
        Barcode {
            id: self.id,
            barcode_id: self.barcode_id,
            bagtype: self.bagtype,
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CycleRecord {
    id: i64,
    cycle_id: String,
    barcode_id: String,
    branch_code: String,
    route_id: Option<i64>,
    pickup_weight: f64,
    inbound_weight: Option<f64>,
    status: String,
    picked_at: Option<DateTime<Utc>>,
    inbound_at: Option<DateTime<Utc>>,
    sorted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl CycleRecord {
    fn to_domain(self) -> PortResult<BagCycle> {
        Ok(BagCycle {
            id: self.id,
            cycle_id: self.cycle_id,
            barcode_id: self.barcode_id,
            branch_code: self.branch_code,
            route_id: self.route_id,
            pickup_weight: self.pickup_weight,
            inbound_weight: self.inbound_weight,
            status: parse_status::<CycleStatus>(&self.status)?,
            picked_at: self.picked_at,
            inbound_at: self.inbound_at,
            sorted_at: self.sorted_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
        })
    }
}

const CYCLE_COLUMNS: &str = "id, cycle_id, barcode_id, branch_code, route_id, pickup_weight, \
     inbound_weight, status, picked_at, inbound_at, sorted_at, completed_at, created_at";

#[derive(FromRow)]
struct TotalsRecord {
    branch_code: String,
    corporate_code: String,
    total_weight: f64,
    total_plastic: f64,
    total_paper: f64,
    total_ewaste: f64,
    total_metal: f64,
    total_glass: f64,
}

impl TotalsRecord {
    fn to_domain(self) -> SegregationTotals {
        SegregationTotals {
            branch_code: self.branch_code,
            corporate_code: self.corporate_code,
            total_weight: self.total_weight,
            total_plastic: self.total_plastic,
            total_paper: self.total_paper,
            total_ewaste: self.total_ewaste,
            total_metal: self.total_metal,
            total_glass: self.total_glass,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn ping(&self) -> PortResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_assignment(
        &self,
        route_date: NaiveDate,
        driver_dl: Option<&str>,
        vehicle_no: &str,
    ) -> PortResult<RouteAssignment> {
        let sql = format!(
            "INSERT INTO b2b_route_assignments (route_date, driver_dl, vehicle_no, status) \
             VALUES ($1, $2, $3, 'pending') RETURNING {ASSIGNMENT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, AssignmentRecord>(&sql)
            .bind(route_date)
            .bind(driver_dl)
            .bind(vehicle_no)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_assignment(&self, route_id: i64) -> PortResult<RouteAssignment> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM b2b_route_assignments WHERE route_id = $1"
        );
        let record = sqlx::query_as::<_, AssignmentRecord>(&sql)
            .bind(route_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Assignment {} not found", route_id))
                }
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn find_assignment_for_vehicle(
        &self,
        vehicle_no: &str,
        route_date: NaiveDate,
    ) -> PortResult<Option<RouteAssignment>> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM b2b_route_assignments \
             WHERE vehicle_no = $1 AND route_date = $2 ORDER BY route_id DESC LIMIT 1"
        );
        let record = sqlx::query_as::<_, AssignmentRecord>(&sql)
            .bind(vehicle_no)
            .bind(route_date)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        record.map(AssignmentRecord::to_domain).transpose()
    }

    async fn claim_assignment(&self, route_id: i64, driver_dl: &str) -> PortResult<()> {
        let result =
            sqlx::query("UPDATE b2b_route_assignments SET driver_dl = $1, updated_at = NOW() WHERE route_id = $2")
                .bind(driver_dl)
                .bind(route_id)
                .execute(&self.pool)
                .await
                .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Assignment {} not found",
                route_id
            )));
        }
        Ok(())
    }

    async fn update_assignment_status(
        &self,
        route_id: i64,
        status: AssignmentStatus,
    ) -> PortResult<bool> {
        // Trip timestamps are stamped in the same statement as the status
        // change; the status guard makes a repeat transition a no-op.
        let result = sqlx::query(
            "UPDATE b2b_route_assignments SET \
                 status = $1, \
                 updated_at = NOW(), \
                 trip_started_at = CASE WHEN $1 = 'in_progress' THEN NOW() ELSE trip_started_at END, \
                 trip_ended_at = CASE WHEN $1 = 'completed' THEN NOW() ELSE trip_ended_at END \
             WHERE route_id = $2 AND status <> $1",
        )
        .bind(status.as_str())
        .bind(route_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_stop(&self, stop: NewRouteStop) -> PortResult<RouteStop> {
        let sql = format!(
            "INSERT INTO b2b_route_stops \
                 (route_id, sequence, branch_code, branch_name, address, contact, latitude, longitude, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending') \
             RETURNING {STOP_COLUMNS}"
        );
        let record = sqlx::query_as::<_, StopRecord>(&sql)
            .bind(stop.route_id)
            .bind(stop.sequence)
            .bind(&stop.branch_code)
            .bind(&stop.branch_name)
            .bind(&stop.address)
            .bind(&stop.contact)
            .bind(stop.latitude)
            .bind(stop.longitude)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_stop(&self, stop_id: i64) -> PortResult<RouteStop> {
        let sql = format!("SELECT {STOP_COLUMNS} FROM b2b_route_stops WHERE id = $1");
        let record = sqlx::query_as::<_, StopRecord>(&sql)
            .bind(stop_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Stop {} not found", stop_id))
                }
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn get_stop_by_sequence(&self, route_id: i64, sequence: i32) -> PortResult<RouteStop> {
        let sql = format!(
            "SELECT {STOP_COLUMNS} FROM b2b_route_stops WHERE route_id = $1 AND sequence = $2"
        );
        let record = sqlx::query_as::<_, StopRecord>(&sql)
            .bind(route_id)
            .bind(sequence)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!(
                    "Stop with sequence {} not found on route {}",
                    sequence, route_id
                )),
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn list_stops(&self, route_id: i64) -> PortResult<Vec<RouteStop>> {
        let sql = format!(
            "SELECT {STOP_COLUMNS} FROM b2b_route_stops WHERE route_id = $1 ORDER BY sequence ASC"
        );
        let records = sqlx::query_as::<_, StopRecord>(&sql)
            .bind(route_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(StopRecord::to_domain).collect()
    }

    async fn stop_progress(&self, route_id: i64) -> PortResult<Vec<StopProgress>> {
        let records = sqlx::query_as::<_, ProgressRecord>(
            "SELECT sequence, status FROM b2b_route_stops WHERE route_id = $1 ORDER BY sequence ASC",
        )
        .bind(route_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records
            .into_iter()
            .map(|r| {
                Ok(StopProgress {
                    sequence: r.sequence,
                    status: parse_status::<StopStatus>(&r.status)?,
                })
            })
            .collect()
    }

    async fn next_stop_sequence(&self, route_id: i64) -> PortResult<i32> {
        let (next,): (i32,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM b2b_route_stops WHERE route_id = $1",
        )
        .bind(route_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(next)
    }

    async fn start_stop(&self, stop_id: i64) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE b2b_route_stops SET status = 'in_progress', pickup_started_at = NOW(), \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(stop_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Stop {} not found", stop_id)));
        }
        Ok(())
    }

    async fn complete_stop(&self, stop_id: i64, completion: &StopCompletion) -> PortResult<()> {
        // Only supplied fields are written; omitted optional fields keep
        // their previous values.
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "UPDATE b2b_route_stops SET status = 'completed', completed_at = NOW(), \
             pickup_ended_at = NOW(), updated_at = NOW()",
        );
        if let Some(weight) = completion.weight {
            qb.push(", weight = ").push_bind(weight);
        }
        if let Some(remark) = &completion.remark {
            qb.push(", remark = ").push_bind(remark);
        }
        if let Some(url) = &completion.waste_image_url {
            qb.push(", waste_image_url = ").push_bind(url);
        }
        if let Some(url) = &completion.receipt_image_url {
            qb.push(", receipt_image_url = ").push_bind(url);
        }
        if let Some(name) = &completion.poc_name {
            qb.push(", poc_name = ").push_bind(name);
        }
        if let Some(designation) = &completion.poc_designation {
            qb.push(", poc_designation = ").push_bind(designation);
        }
        if let Some(url) = &completion.poc_signature_url {
            qb.push(", poc_signature = ").push_bind(url);
        }
        qb.push(" WHERE id = ").push_bind(stop_id);

        let result = qb.build().execute(&self.pool).await.map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Stop {} not found", stop_id)));
        }
        Ok(())
    }

    async fn record_stop_inbound_weight(
        &self,
        route_id: i64,
        branch_code: &str,
        inbound_weight: f64,
    ) -> PortResult<Option<RouteStop>> {
        let sql = format!(
            "UPDATE b2b_route_stops SET inbound_weight = $1, updated_at = NOW() \
             WHERE id = (SELECT id FROM b2b_route_stops \
                         WHERE route_id = $2 AND branch_code = $3 \
                         ORDER BY id DESC LIMIT 1) \
             RETURNING {STOP_COLUMNS}"
        );
        let record = sqlx::query_as::<_, StopRecord>(&sql)
            .bind(inbound_weight)
            .bind(route_id)
            .bind(branch_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        record.map(StopRecord::to_domain).transpose()
    }

    async fn update_frequency_status(
        &self,
        branch_code: &str,
        pickup_date: NaiveDate,
        status: StopStatus,
    ) -> PortResult<()> {
        sqlx::query(
            "UPDATE branch_pickup_frequency SET status = $1, updated_at = NOW() \
             WHERE branch_code = $2 AND pickup_date = $3 AND UPPER(status) <> $1",
        )
        .bind(status.as_frequency_status())
        .bind(branch_code)
        .bind(pickup_date)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn find_barcode(
        &self,
        barcode_id: &str,
        active_only: bool,
    ) -> PortResult<Option<Barcode>> {
        let sql = if active_only {
            "SELECT id, barcode_id, bagtype, is_active, created_at FROM barcode_master_table \
             WHERE barcode_id = $1 AND is_active"
        } else {
            "SELECT id, barcode_id, bagtype, is_active, created_at FROM barcode_master_table \
             WHERE barcode_id = $1"
        };
        let record = sqlx::query_as::<_, BarcodeRecord>(sql)
            .bind(barcode_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(BarcodeRecord::to_domain))
    }

    async fn register_barcode(
        &self,
        barcode_id: &str,
        bagtype: &str,
        is_active: bool,
    ) -> PortResult<Barcode> {
        let record = sqlx::query_as::<_, BarcodeRecord>(
            "INSERT INTO barcode_master_table (barcode_id, bagtype, is_active) \
             VALUES ($1, $2, $3) RETURNING id, barcode_id, bagtype, is_active, created_at",
        )
        .bind(barcode_id)
        .bind(bagtype)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return PortError::Conflict(format!(
                        "Barcode {} already exists",
                        barcode_id
                    ));
                }
            }
            unexpected(e)
        })?;
        Ok(record.to_domain())
    }

    async fn list_barcodes(&self, filter: &BarcodeFilter) -> PortResult<(Vec<Barcode>, i64)> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, barcode_id, bagtype, is_active, created_at FROM barcode_master_table WHERE 1=1",
        );
        if let Some(is_active) = filter.is_active {
            qb.push(" AND is_active = ").push_bind(is_active);
        }
        if let Some(bagtype) = &filter.bagtype {
            qb.push(" AND bagtype = ").push_bind(bagtype);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let records = qb
            .build_query_as::<BarcodeRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM barcode_master_table WHERE 1=1");
        if let Some(is_active) = filter.is_active {
            count_qb.push(" AND is_active = ").push_bind(is_active);
        }
        if let Some(bagtype) = &filter.bagtype {
            count_qb.push(" AND bagtype = ").push_bind(bagtype);
        }
        let (total,): (i64,) = count_qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok((
            records.into_iter().map(BarcodeRecord::to_domain).collect(),
            total,
        ))
    }

    async fn create_cycle(
        &self,
        cycle_id: &str,
        barcode_id: &str,
        branch_code: &str,
        route_id: Option<i64>,
        pickup_weight: f64,
    ) -> PortResult<BagCycle> {
        let sql = format!(
            "INSERT INTO pickup_bag_cycle \
                 (cycle_id, barcode_id, branch_code, route_id, pickup_weight, status, picked_at) \
             VALUES ($1, $2, $3, $4, $5, 'picked', NOW()) RETURNING {CYCLE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, CycleRecord>(&sql)
            .bind(cycle_id)
            .bind(barcode_id)
            .bind(branch_code)
            .bind(route_id)
            .bind(pickup_weight)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_cycle(&self, id: i64) -> PortResult<BagCycle> {
        let sql = format!("SELECT {CYCLE_COLUMNS} FROM pickup_bag_cycle WHERE id = $1");
        let record = sqlx::query_as::<_, CycleRecord>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Cycle {} not found", id))
                }
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn find_active_cycle(&self, barcode_id: &str) -> PortResult<Option<BagCycle>> {
        let sql = format!(
            "SELECT {CYCLE_COLUMNS} FROM pickup_bag_cycle \
             WHERE barcode_id = $1 AND status <> 'completed' ORDER BY id DESC LIMIT 1"
        );
        let record = sqlx::query_as::<_, CycleRecord>(&sql)
            .bind(barcode_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        record.map(CycleRecord::to_domain).transpose()
    }

    async fn find_cycle_by_cycle_id(&self, cycle_id: &str) -> PortResult<Option<BagCycle>> {
        let sql = format!(
            "SELECT {CYCLE_COLUMNS} FROM pickup_bag_cycle \
             WHERE cycle_id = $1 ORDER BY id DESC LIMIT 1"
        );
        let record = sqlx::query_as::<_, CycleRecord>(&sql)
            .bind(cycle_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        record.map(CycleRecord::to_domain).transpose()
    }

    async fn list_cycles(&self, filter: &CycleFilter) -> PortResult<(Vec<BagCycle>, i64)> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {CYCLE_COLUMNS} FROM pickup_bag_cycle WHERE 1=1"));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(branch_code) = &filter.branch_code {
            qb.push(" AND branch_code = ").push_bind(branch_code);
        }
        if let Some(barcode_id) = &filter.barcode_id {
            qb.push(" AND barcode_id = ").push_bind(barcode_id);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let records = qb
            .build_query_as::<CycleRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM pickup_bag_cycle WHERE 1=1");
        if let Some(status) = filter.status {
            count_qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(branch_code) = &filter.branch_code {
            count_qb.push(" AND branch_code = ").push_bind(branch_code);
        }
        if let Some(barcode_id) = &filter.barcode_id {
            count_qb.push(" AND barcode_id = ").push_bind(barcode_id);
        }
        let (total,): (i64,) = count_qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let cycles = records
            .into_iter()
            .map(CycleRecord::to_domain)
            .collect::<PortResult<Vec<_>>>()?;
        Ok((cycles, total))
    }

    async fn list_cycles_for_barcode(&self, barcode_id: &str) -> PortResult<Vec<BagCycle>> {
        let sql = format!(
            "SELECT {CYCLE_COLUMNS} FROM pickup_bag_cycle \
             WHERE barcode_id = $1 ORDER BY created_at DESC"
        );
        let records = sqlx::query_as::<_, CycleRecord>(&sql)
            .bind(barcode_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(CycleRecord::to_domain).collect()
    }

    async fn update_cycle_status(
        &self,
        id: i64,
        status: CycleStatus,
        inbound_weight: Option<f64>,
    ) -> PortResult<BagCycle> {
        let sql = format!(
            "UPDATE pickup_bag_cycle SET \
                 status = $1, \
                 inbound_at = CASE WHEN $1 = 'inbound' THEN NOW() ELSE inbound_at END, \
                 sorted_at = CASE WHEN $1 = 'sorting' THEN NOW() ELSE sorted_at END, \
                 completed_at = CASE WHEN $1 = 'completed' THEN NOW() ELSE completed_at END, \
                 inbound_weight = COALESCE($2, inbound_weight) \
             WHERE id = $3 RETURNING {CYCLE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, CycleRecord>(&sql)
            .bind(status.as_str())
            .bind(inbound_weight)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Cycle {} not found", id))
                }
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn corporate_for_branch(&self, branch_code: &str) -> PortResult<String> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT corporate_code FROM b2b_corporate_branch_master WHERE branch_code = $1 LIMIT 1",
        )
        .bind(branch_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(|(code,)| code).ok_or_else(|| {
            PortError::NotFound(format!("Corporate code not found for branch {}", branch_code))
        })
    }

    async fn segregation_totals(
        &self,
        branch_code: &str,
        corporate_code: &str,
    ) -> PortResult<Option<SegregationTotals>> {
        let record = sqlx::query_as::<_, TotalsRecord>(
            "SELECT branch_code, corporate_code, \
                 COALESCE(SUM(total_weight), 0) AS total_weight, \
                 COALESCE(SUM(plastic), 0) AS total_plastic, \
                 COALESCE(SUM(paper), 0) AS total_paper, \
                 COALESCE(SUM(e_waste), 0) AS total_ewaste, \
                 COALESCE(SUM(metal), 0) AS total_metal, \
                 COALESCE(SUM(glass), 0) AS total_glass \
             FROM b2b_segregation \
             WHERE branch_code = $1 AND corporate_code = $2 \
             GROUP BY branch_code, corporate_code",
        )
        .bind(branch_code)
        .bind(corporate_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(TotalsRecord::to_domain))
    }

    async fn upsert_impact(&self, rollup: &ImpactRollup) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO b2b_impact \
                 (corporate_code, branch_code, total_weight, total_plastic, total_cardboard, \
                  total_paper, total_ewaste, trees_saved, water_saved, energy_saved, landfill_saved) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (branch_code, corporate_code) DO UPDATE SET \
                 total_weight = EXCLUDED.total_weight, \
                 total_plastic = EXCLUDED.total_plastic, \
                 total_cardboard = EXCLUDED.total_cardboard, \
                 total_paper = EXCLUDED.total_paper, \
                 total_ewaste = EXCLUDED.total_ewaste, \
                 trees_saved = EXCLUDED.trees_saved, \
                 water_saved = EXCLUDED.water_saved, \
                 energy_saved = EXCLUDED.energy_saved, \
                 landfill_saved = EXCLUDED.landfill_saved, \
                 updated_at = NOW()",
        )
        .bind(&rollup.corporate_code)
        .bind(&rollup.branch_code)
        .bind(rollup.total_weight)
        .bind(rollup.total_plastic)
        .bind(rollup.total_cardboard)
        .bind(rollup.total_paper)
        .bind(rollup.total_ewaste)
        .bind(rollup.trees_saved)
        .bind(rollup.water_saved)
        .bind(rollup.energy_saved)
        .bind(rollup.landfill_saved)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
