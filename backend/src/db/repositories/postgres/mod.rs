//! Postgres repository implementation using Diesel.
//!
//! Stations, basins, reference tables, measurements and ingestion history live
//! in the schema created by the embedded migrations under `migrations/`.
//! Measurements are upserted on their natural key
//! `(time, entity_type, entity_id, variable_code, source_code, run_id)`.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures
//! - Connection health monitoring
//! - Automatic migration execution
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, max, min};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel::upsert::excluded;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task;

use crate::api::{
    Basin, BasinId, BasinPatch, EntityKind, EntityRef, IngestionRecord, IngestionStatus,
    Measurement, MeasurementQuery, NewBasin, NewStation, Run, SeriesCoverage, Source, Station,
    StationId, StationPatch, TimeOrder, Variable, STATION_TYPE_HYDRO,
};
use crate::db::repository::{
    BasinRepository, ErrorContext, IngestionRepository, MeasurementRepository,
    ReferenceRepository, RepositoryError, RepositoryResult, StationRepository,
};

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Rows per INSERT statement when upserting measurements.
const UPSERT_CHUNK: usize = 1000;

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl PostgresConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
    /// - `PG_POOL_MAX`: Maximum pool size (default: 10)
    /// - `PG_POOL_MIN`: Minimum pool size (default: 1)
    /// - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
    /// - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
    /// - `PG_MAX_RETRIES`: Maximum retry attempts (default: 3)
    /// - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;

        let defaults = Self::default();
        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
        })
    }

    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Pool health statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of connections currently in use
    pub connections_in_use: u32,
    /// Number of idle connections
    pub idle_connections: u32,
    /// Total number of connections in the pool
    pub total_connections: u32,
    /// Maximum pool size
    pub max_size: u32,
    /// Total successful queries executed
    pub total_queries: u64,
    /// Total failed queries
    pub failed_queries: u64,
    /// Total retried operations
    pub retried_operations: u64,
}

/// Diesel-backed repository for Postgres.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
    // Metrics counters
    total_queries: std::sync::Arc<AtomicU64>,
    failed_queries: std::sync::Arc<AtomicU64>,
    retried_operations: std::sync::Arc<AtomicU64>,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    ///
    /// # Arguments
    /// * `config` - Database configuration
    ///
    /// # Returns
    /// * `Ok(PostgresRepository)` on success
    /// * `Err(RepositoryError)` if connection or migration fails
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true) // Validate connections before use
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        // Run migrations once during initialization
        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self {
            pool,
            config,
            total_queries: std::sync::Arc::new(AtomicU64::new(0)),
            failed_queries: std::sync::Arc::new(AtomicU64::new(0)),
            retried_operations: std::sync::Arc::new(AtomicU64::new(0)),
        })
    }

    /// Run pending database migrations.
    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;

        Ok(())
    }

    /// Execute a database operation with automatic retry for transient failures.
    ///
    /// This method will retry the operation up to `max_retries` times if a
    /// retryable error occurs (connection errors, timeouts, serialization failures).
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;
        let total_queries = self.total_queries.clone();
        let failed_queries = self.failed_queries.clone();
        let retried_operations = self.retried_operations.clone();

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    retried_operations.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2; // Exponential backoff
                }

                // Get connection
                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1))
                                .retryable(),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                };

                // Execute the operation
                total_queries.fetch_add(1, Ordering::Relaxed);
                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => {
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }

            failed_queries.fetch_add(1, Ordering::Relaxed);
            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }

    /// Get pool health statistics.
    ///
    /// Returns current pool state and query statistics for monitoring.
    pub fn get_pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections_in_use: state.connections - state.idle_connections,
            idle_connections: state.idle_connections,
            total_connections: state.connections,
            max_size: self.config.max_pool_size,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            retried_operations: self.retried_operations.load(Ordering::Relaxed),
        }
    }

    /// Check if the database connection is healthy.
    ///
    /// Performs a simple query to verify connectivity.
    pub async fn is_healthy(&self) -> bool {
        self.health_check().await.unwrap_or(false)
    }

    /// Health, latency in milliseconds and the error message if any.
    pub async fn health_check_detailed(&self) -> (bool, Option<u64>, Option<String>) {
        let start = Instant::now();
        match self.health_check().await {
            Ok(true) => (true, Some(start.elapsed().as_millis() as u64), None),
            Ok(false) => (
                false,
                Some(start.elapsed().as_millis() as u64),
                Some("Health check returned false".to_string()),
            ),
            Err(e) => (
                false,
                Some(start.elapsed().as_millis() as u64),
                Some(e.to_string()),
            ),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn map_diesel_error(err: diesel::result::Error) -> RepositoryError {
    RepositoryError::from(err)
}

fn station_changeset(patch: &StationPatch) -> StationChangeset {
    StationChangeset {
        code: patch.code.clone(),
        name: patch.name.clone(),
        basin_id: patch.basin_id.map(|b| b.map(|b| b.value())),
        lat: patch.lat.map(Some),
        lon: patch.lon.map(Some),
        station_type: patch.station_type.clone(),
        active: patch.active,
    }
}

fn basin_changeset(patch: &BasinPatch) -> BasinChangeset {
    BasinChangeset {
        code: patch.code.clone(),
        name: patch.name.clone(),
        level: patch.level.map(Some),
        parent_basin_id: patch.parent_basin_id.map(|b| Some(b.value())),
        geometry: patch.geometry.clone().map(Some),
        color: patch.color.clone().map(Some),
    }
}

fn new_station_row(station: &NewStation) -> NewStationRow {
    NewStationRow {
        code: station.code.clone(),
        name: station.name.clone(),
        basin_id: station.basin_id.map(|b| b.value()),
        lat: station.lat,
        lon: station.lon,
        station_type: station
            .station_type
            .clone()
            .unwrap_or_else(|| STATION_TYPE_HYDRO.to_string()),
    }
}

fn new_basin_row(basin: &NewBasin) -> NewBasinRow {
    NewBasinRow {
        code: basin.code.clone(),
        name: basin.name.clone(),
        level: basin.level,
        parent_basin_id: basin.parent_basin_id.map(|b| b.value()),
        geometry: basin.geometry.clone(),
        color: basin.color.clone(),
    }
}

fn delete_entity_measurements(
    conn: &mut PgConnection,
    kind: EntityKind,
    id: Option<i64>,
) -> RepositoryResult<usize> {
    let scoped = ts_measurement::table.filter(ts_measurement::entity_type.eq(kind.as_str()));
    let removed = match id {
        Some(id) => diesel::delete(scoped.filter(ts_measurement::entity_id.eq(id))).execute(conn),
        None => diesel::delete(scoped).execute(conn),
    };
    removed.map_err(map_diesel_error)
}

#[async_trait]
impl StationRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn list_stations(&self, skip: usize, limit: usize) -> RepositoryResult<Vec<Station>> {
        self.with_conn(move |conn| {
            let rows = ref_station::table
                .order(ref_station::station_id.asc())
                .offset(skip as i64)
                .limit(limit as i64)
                .select(StationRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(Station::from).collect())
        })
        .await
    }

    async fn get_station(&self, id: StationId) -> RepositoryResult<Station> {
        self.with_conn(move |conn| {
            ref_station::table
                .find(id.value())
                .select(StationRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?
                .map(Station::from)
                .ok_or_else(|| RepositoryError::entity_not_found("station", id))
        })
        .await
    }

    async fn find_station_by_code(&self, code: &str) -> RepositoryResult<Option<Station>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let row = ref_station::table
                .filter(ref_station::code.eq(&code))
                .select(StationRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            Ok(row.map(Station::from))
        })
        .await
    }

    async fn create_station(&self, station: &NewStation) -> RepositoryResult<Station> {
        let row = new_station_row(station);
        self.with_conn(move |conn| {
            diesel::insert_into(ref_station::table)
                .values(&row)
                .returning(StationRow::as_returning())
                .get_result(conn)
                .map(Station::from)
                .map_err(|e| map_diesel_error(e).with_operation("create_station"))
        })
        .await
    }

    async fn update_station(
        &self,
        id: StationId,
        patch: &StationPatch,
    ) -> RepositoryResult<Station> {
        if patch.is_empty() {
            return self.get_station(id).await;
        }
        let changes = station_changeset(patch);
        self.with_conn(move |conn| {
            diesel::update(ref_station::table.find(id.value()))
                .set(&changes)
                .returning(StationRow::as_returning())
                .get_result(conn)
                .optional()
                .map_err(map_diesel_error)?
                .map(Station::from)
                .ok_or_else(|| RepositoryError::entity_not_found("station", id))
        })
        .await
    }

    async fn delete_station(&self, id: StationId) -> RepositoryResult<()> {
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                delete_entity_measurements(conn, EntityKind::Station, Some(id.value()))?;
                let removed = diesel::delete(ref_station::table.find(id.value()))
                    .execute(conn)
                    .map_err(map_diesel_error)?;
                if removed == 0 {
                    return Err(RepositoryError::entity_not_found("station", id));
                }
                Ok(())
            })
        })
        .await
    }

    async fn upsert_station_by_code(&self, station: &NewStation) -> RepositoryResult<Station> {
        let row = new_station_row(station);
        let patch = StationPatch {
            name: Some(station.name.clone()),
            basin_id: station.basin_id.map(Some),
            lat: station.lat,
            lon: station.lon,
            station_type: station.station_type.clone(),
            ..Default::default()
        };
        let changes = station_changeset(&patch);
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let existing: Option<i64> = ref_station::table
                    .filter(ref_station::code.eq(&row.code))
                    .select(ref_station::station_id)
                    .first(conn)
                    .optional()
                    .map_err(map_diesel_error)?;

                let saved = match existing {
                    Some(station_id) => diesel::update(ref_station::table.find(station_id))
                        .set(&changes)
                        .returning(StationRow::as_returning())
                        .get_result(conn),
                    None => diesel::insert_into(ref_station::table)
                        .values(&row)
                        .returning(StationRow::as_returning())
                        .get_result(conn),
                };
                saved.map(Station::from).map_err(map_diesel_error)
            })
        })
        .await
    }

    async fn truncate_stations(&self) -> RepositoryResult<usize> {
        self.with_conn(|conn| {
            conn.transaction(|conn| {
                delete_entity_measurements(conn, EntityKind::Station, None)?;
                diesel::delete(ref_station::table)
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
        })
        .await
    }
}

#[async_trait]
impl BasinRepository for PostgresRepository {
    async fn list_basins(&self, skip: usize, limit: usize) -> RepositoryResult<Vec<Basin>> {
        self.with_conn(move |conn| {
            let rows = ref_basin::table
                .order(ref_basin::basin_id.asc())
                .offset(skip as i64)
                .limit(limit as i64)
                .select(BasinRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(Basin::from).collect())
        })
        .await
    }

    async fn get_basin(&self, id: BasinId) -> RepositoryResult<Basin> {
        self.with_conn(move |conn| {
            ref_basin::table
                .find(id.value())
                .select(BasinRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?
                .map(Basin::from)
                .ok_or_else(|| RepositoryError::entity_not_found("basin", id))
        })
        .await
    }

    async fn find_basin_by_code(&self, code: &str) -> RepositoryResult<Option<Basin>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let row = ref_basin::table
                .filter(ref_basin::code.eq(&code))
                .select(BasinRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            Ok(row.map(Basin::from))
        })
        .await
    }

    async fn create_basin(&self, basin: &NewBasin) -> RepositoryResult<Basin> {
        let row = new_basin_row(basin);
        self.with_conn(move |conn| {
            diesel::insert_into(ref_basin::table)
                .values(&row)
                .returning(BasinRow::as_returning())
                .get_result(conn)
                .map(Basin::from)
                .map_err(|e| map_diesel_error(e).with_operation("create_basin"))
        })
        .await
    }

    async fn update_basin(&self, id: BasinId, patch: &BasinPatch) -> RepositoryResult<Basin> {
        if patch.is_empty() {
            return self.get_basin(id).await;
        }
        let changes = basin_changeset(patch);
        self.with_conn(move |conn| {
            diesel::update(ref_basin::table.find(id.value()))
                .set(&changes)
                .returning(BasinRow::as_returning())
                .get_result(conn)
                .optional()
                .map_err(map_diesel_error)?
                .map(Basin::from)
                .ok_or_else(|| RepositoryError::entity_not_found("basin", id))
        })
        .await
    }

    async fn delete_basin(&self, id: BasinId) -> RepositoryResult<()> {
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                delete_entity_measurements(conn, EntityKind::Basin, Some(id.value()))?;
                let removed = diesel::delete(ref_basin::table.find(id.value()))
                    .execute(conn)
                    .map_err(map_diesel_error)?;
                if removed == 0 {
                    return Err(RepositoryError::entity_not_found("basin", id));
                }
                Ok(())
            })
        })
        .await
    }

    async fn upsert_basin_by_code(&self, basin: &NewBasin) -> RepositoryResult<Basin> {
        let row = new_basin_row(basin);
        let changes = basin_changeset(&BasinPatch {
            name: Some(basin.name.clone()),
            level: basin.level,
            parent_basin_id: basin.parent_basin_id,
            geometry: basin.geometry.clone(),
            color: basin.color.clone(),
            ..Default::default()
        });
        self.with_conn(move |conn| {
            diesel::insert_into(ref_basin::table)
                .values(&row)
                .on_conflict(ref_basin::code)
                .do_update()
                .set(&changes)
                .returning(BasinRow::as_returning())
                .get_result(conn)
                .map(Basin::from)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn truncate_basins(&self) -> RepositoryResult<usize> {
        self.with_conn(|conn| {
            conn.transaction(|conn| {
                delete_entity_measurements(conn, EntityKind::Basin, None)?;
                diesel::delete(ref_basin::table)
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
        })
        .await
    }
}

#[async_trait]
impl ReferenceRepository for PostgresRepository {
    async fn list_variables(&self) -> RepositoryResult<Vec<Variable>> {
        self.with_conn(|conn| {
            let rows = ref_variable::table
                .order(ref_variable::label.asc())
                .select(VariableRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(Variable::from).collect())
        })
        .await
    }

    async fn get_variable(&self, code: &str) -> RepositoryResult<Option<Variable>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let row = ref_variable::table
                .find(&code)
                .select(VariableRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            Ok(row.map(Variable::from))
        })
        .await
    }

    async fn list_sources(&self) -> RepositoryResult<Vec<Source>> {
        self.with_conn(|conn| {
            let rows = ref_source::table
                .order(ref_source::code.asc())
                .select(SourceRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(Source::from).collect())
        })
        .await
    }

    async fn get_source(&self, code: &str) -> RepositoryResult<Option<Source>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let row = ref_source::table
                .find(&code)
                .select(SourceRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            Ok(row.map(Source::from))
        })
        .await
    }

    async fn get_or_create_run(
        &self,
        source_code: &str,
        label: &str,
        run_time: DateTime<Utc>,
    ) -> RepositoryResult<Run> {
        if self.get_source(source_code).await?.is_none() {
            return Err(RepositoryError::not_found(format!(
                "Source {} not found",
                source_code
            )));
        }
        let row = NewRunRow {
            source_code: source_code.to_string(),
            label: label.to_string(),
            run_time,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(ref_run::table)
                .values(&row)
                .on_conflict((ref_run::source_code, ref_run::label))
                .do_nothing()
                .execute(conn)
                .map_err(map_diesel_error)?;

            ref_run::table
                .filter(ref_run::source_code.eq(&row.source_code))
                .filter(ref_run::label.eq(&row.label))
                .select(RunRow::as_select())
                .first(conn)
                .map(Run::from)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn list_run_times(
        &self,
        source_code: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<DateTime<Utc>>> {
        let source_code = source_code.to_string();
        self.with_conn(move |conn| {
            ref_run::table
                .filter(ref_run::source_code.eq(&source_code))
                .select(ref_run::run_time)
                .distinct()
                .order(ref_run::run_time.desc())
                .limit(limit as i64)
                .load(conn)
                .map_err(map_diesel_error)
        })
        .await
    }
}

#[async_trait]
impl MeasurementRepository for PostgresRepository {
    async fn upsert_measurements(&self, rows: &[Measurement]) -> RepositoryResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        // One INSERT cannot touch the same key twice; the last value wins.
        let mut unique = std::collections::BTreeMap::new();
        for m in rows {
            unique.insert(m.key(), NewMeasurementRow::from(m));
        }
        let batch: Vec<NewMeasurementRow> = unique.into_values().collect();

        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let mut written = 0;
                for chunk in batch.chunks(UPSERT_CHUNK) {
                    written += diesel::insert_into(ts_measurement::table)
                        .values(chunk)
                        .on_conflict((
                            ts_measurement::time,
                            ts_measurement::entity_type,
                            ts_measurement::entity_id,
                            ts_measurement::variable_code,
                            ts_measurement::source_code,
                            ts_measurement::run_id,
                        ))
                        .do_update()
                        .set((
                            ts_measurement::value.eq(excluded(ts_measurement::value)),
                            ts_measurement::qc_flag.eq(excluded(ts_measurement::qc_flag)),
                        ))
                        .execute(conn)
                        .map_err(|e| map_diesel_error(e).with_operation("upsert_measurements"))?;
                }
                Ok(written)
            })
        })
        .await
    }

    async fn query_measurements(
        &self,
        query: &MeasurementQuery,
    ) -> RepositoryResult<Vec<Measurement>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut q = ts_measurement::table
                .select(MeasurementRow::as_select())
                .into_boxed();

            if let Some(entity) = query.entity {
                q = q
                    .filter(ts_measurement::entity_type.eq(entity.kind.as_str()))
                    .filter(ts_measurement::entity_id.eq(entity.id));
            }
            if let Some(kind) = query.entity_kind {
                q = q.filter(ts_measurement::entity_type.eq(kind.as_str()));
            }
            if !query.variable_codes.is_empty() {
                q = q.filter(ts_measurement::variable_code.eq_any(query.variable_codes.clone()));
            }
            if !query.source_codes.is_empty() {
                q = q.filter(ts_measurement::source_code.eq_any(query.source_codes.clone()));
            }
            if let Some(run_id) = query.run_id {
                q = q.filter(ts_measurement::run_id.eq(run_id.value()));
            }
            if let Some(start) = query.start {
                q = q.filter(ts_measurement::time.ge(start));
            }
            if let Some(end) = query.end {
                q = q.filter(ts_measurement::time.le(end));
            }
            q = match query.order {
                TimeOrder::Ascending => q.order(ts_measurement::time.asc()),
                TimeOrder::Descending => q.order(ts_measurement::time.desc()),
            };
            if let Some(limit) = query.limit {
                q = q.limit(limit as i64);
            }

            q.load(conn)
                .map_err(map_diesel_error)?
                .into_iter()
                .map(Measurement::try_from)
                .collect()
        })
        .await
    }

    async fn latest_measurements(
        &self,
        kind: EntityKind,
        series: &[(&str, &str)],
    ) -> RepositoryResult<Vec<Measurement>> {
        let pairs: Vec<(String, String)> = series
            .iter()
            .map(|(v, s)| (v.to_string(), s.to_string()))
            .collect();
        self.with_conn(move |conn| {
            let variables: Vec<&str> = pairs.iter().map(|(v, _)| v.as_str()).collect();
            let sources: Vec<&str> = pairs.iter().map(|(_, s)| s.as_str()).collect();

            let rows = ts_measurement::table
                .filter(ts_measurement::entity_type.eq(kind.as_str()))
                .filter(ts_measurement::variable_code.eq_any(variables))
                .filter(ts_measurement::source_code.eq_any(sources))
                .order_by((
                    ts_measurement::entity_id,
                    ts_measurement::variable_code,
                    ts_measurement::source_code,
                    ts_measurement::time.desc(),
                ))
                .distinct_on((
                    ts_measurement::entity_id,
                    ts_measurement::variable_code,
                    ts_measurement::source_code,
                ))
                .select(MeasurementRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;

            rows.into_iter()
                .filter(|r| {
                    pairs
                        .iter()
                        .any(|(v, s)| *v == r.variable_code && *s == r.source_code)
                })
                .map(Measurement::try_from)
                .collect()
        })
        .await
    }

    async fn delete_measurement(
        &self,
        entity: EntityRef,
        variable_code: &str,
        time: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let variable_code = variable_code.to_string();
        self.with_conn(move |conn| {
            diesel::delete(
                ts_measurement::table
                    .filter(ts_measurement::entity_type.eq(entity.kind.as_str()))
                    .filter(ts_measurement::entity_id.eq(entity.id))
                    .filter(ts_measurement::variable_code.eq(&variable_code))
                    .filter(ts_measurement::time.eq(time)),
            )
            .execute(conn)
            .map_err(map_diesel_error)
        })
        .await
    }

    async fn delete_variable_series(
        &self,
        entity: EntityRef,
        variable_code: &str,
    ) -> RepositoryResult<usize> {
        let variable_code = variable_code.to_string();
        self.with_conn(move |conn| {
            diesel::delete(
                ts_measurement::table
                    .filter(ts_measurement::entity_type.eq(entity.kind.as_str()))
                    .filter(ts_measurement::entity_id.eq(entity.id))
                    .filter(ts_measurement::variable_code.eq(&variable_code)),
            )
            .execute(conn)
            .map_err(map_diesel_error)
        })
        .await
    }

    async fn delete_time_range(
        &self,
        entity: EntityRef,
        variable_code: &str,
        source_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let variable_code = variable_code.to_string();
        let source_code = source_code.to_string();
        self.with_conn(move |conn| {
            diesel::delete(
                ts_measurement::table
                    .filter(ts_measurement::entity_type.eq(entity.kind.as_str()))
                    .filter(ts_measurement::entity_id.eq(entity.id))
                    .filter(ts_measurement::variable_code.eq(&variable_code))
                    .filter(ts_measurement::source_code.eq(&source_code))
                    .filter(ts_measurement::time.between(start, end)),
            )
            .execute(conn)
            .map_err(map_diesel_error)
        })
        .await
    }

    async fn series_coverage(
        &self,
        kind: Option<EntityKind>,
    ) -> RepositoryResult<Vec<SeriesCoverage>> {
        type CoverageRow = (
            String,
            i64,
            String,
            String,
            i64,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        );

        self.with_conn(move |conn| {
            let group = (
                ts_measurement::entity_type,
                ts_measurement::entity_id,
                ts_measurement::variable_code,
                ts_measurement::source_code,
            );
            let columns = (
                ts_measurement::entity_type,
                ts_measurement::entity_id,
                ts_measurement::variable_code,
                ts_measurement::source_code,
                count_star(),
                min(ts_measurement::time),
                max(ts_measurement::time),
            );

            let rows: Vec<CoverageRow> = match kind {
                Some(kind) => ts_measurement::table
                    .filter(ts_measurement::entity_type.eq(kind.as_str()))
                    .group_by(group)
                    .select(columns)
                    .load(conn),
                None => ts_measurement::table.group_by(group).select(columns).load(conn),
            }
            .map_err(map_diesel_error)?;

            let mut coverage = Vec::with_capacity(rows.len());
            for (entity_type, entity_id, variable_code, source_code, count, first, last) in rows {
                let (Some(first_record), Some(last_record)) = (first, last) else {
                    continue;
                };
                let kind: EntityKind = entity_type.parse().map_err(RepositoryError::internal)?;
                coverage.push(SeriesCoverage {
                    entity: EntityRef { kind, id: entity_id },
                    variable_code,
                    source_code,
                    record_count: count,
                    first_record,
                    last_record,
                });
            }
            Ok(coverage)
        })
        .await
    }

    async fn count_measurements(&self) -> RepositoryResult<i64> {
        self.with_conn(|conn| {
            ts_measurement::table
                .count()
                .get_result(conn)
                .map_err(map_diesel_error)
        })
        .await
    }
}

#[async_trait]
impl IngestionRepository for PostgresRepository {
    async fn start_ingestion(
        &self,
        pipeline_name: &str,
        file_checksum: Option<&str>,
    ) -> RepositoryResult<IngestionRecord> {
        let row = NewIngestionRow {
            pipeline_name: pipeline_name.to_string(),
            status: IngestionStatus::Running.as_str().to_string(),
            file_checksum: file_checksum.map(str::to_string),
        };
        self.with_conn(move |conn| {
            let saved = diesel::insert_into(ingestion_history::table)
                .values(&row)
                .returning(IngestionRow::as_returning())
                .get_result(conn)
                .map_err(map_diesel_error)?;
            IngestionRecord::try_from(saved)
        })
        .await
    }

    async fn finish_ingestion(
        &self,
        ingestion_id: i64,
        status: IngestionStatus,
        summary: serde_json::Value,
    ) -> RepositoryResult<IngestionRecord> {
        self.with_conn(move |conn| {
            let saved = diesel::update(ingestion_history::table.find(ingestion_id))
                .set((
                    ingestion_history::status.eq(status.as_str()),
                    ingestion_history::finished_at.eq(Some(Utc::now())),
                    ingestion_history::summary.eq(&summary),
                ))
                .returning(IngestionRow::as_returning())
                .get_result(conn)
                .optional()
                .map_err(map_diesel_error)?
                .ok_or_else(|| RepositoryError::entity_not_found("ingestion", ingestion_id))?;
            IngestionRecord::try_from(saved)
        })
        .await
    }

    async fn list_ingestions(&self, limit: usize) -> RepositoryResult<Vec<IngestionRecord>> {
        self.with_conn(move |conn| {
            ingestion_history::table
                .order(ingestion_history::started_at.desc())
                .limit(limit as i64)
                .select(IngestionRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?
                .into_iter()
                .map(IngestionRecord::try_from)
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PostgresConfig::with_url("postgres://localhost/hydro");
        assert_eq!(config.database_url, "postgres://localhost/hydro");
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.retry_delay_ms, 100);
    }

    #[test]
    fn test_station_changeset_only_sets_patched_fields() {
        let changes = station_changeset(&StationPatch {
            lat: Some(33.1),
            ..Default::default()
        });
        assert_eq!(changes.lat, Some(Some(33.1)));
        assert!(changes.name.is_none());
        assert!(changes.basin_id.is_none());

        let detach = station_changeset(&StationPatch {
            basin_id: Some(None),
            ..Default::default()
        });
        assert_eq!(detach.basin_id, Some(None));
    }

    #[test]
    fn test_new_station_row_defaults_type() {
        let row = new_station_row(&NewStation {
            code: "X".into(),
            name: "X".into(),
            ..Default::default()
        });
        assert_eq!(row.station_type, STATION_TYPE_HYDRO);
    }
}
