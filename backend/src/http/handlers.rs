//! HTTP handlers for the REST API.
//!
//! Each handler corresponds to an API endpoint and delegates to the
//! service layer for business logic.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;

use super::dto::{
    CompareQuery, EntityResponse, HealthResponse, JobStatusResponse, LimitQuery, Pagination,
    RunsQuery, SeriesRangeQuery, StationsWithDataQuery, StatusResponse, TemplateQuery,
    TimeseriesQuery, UploadForm, VariableStationsQuery, VariableStationsResponse, WindowQuery,
};
use super::error::AppError;
use super::state::AppState;
use crate::api::{Basin, EntityKind, IngestionRecord, Source, Station, Variable};
use crate::config::API_VERSION;
use crate::db::repository::{
    BasinRepository, IngestionRepository, ReferenceRepository, StationRepository,
};
use crate::db::services::{self as db_services, EntityPayload};
use crate::services::availability::{self, DataAvailability, StationWithData};
use crate::services::geo_import::{self, GeoUploadOutcome, GeoUploadRequest};
use crate::services::ingestion::{self, ExecuteOutcome, IngestKind, IngestReport};
use crate::services::job_tracker::JobStatus;
use crate::services::kpi::{self, MapKpiItem, TopCriticalItem};
use crate::services::measurements::{
    self, CompareSeries, RunOption, SeriesFilter, TimeseriesPoint,
};
use crate::services::tabular::parse_timestamp;
use crate::services::templates::{self, TemplateKind, XLSX_MIME};
use crate::services::timeseries::{
    self, AnalysisOutcome, ImportMode, PointInput, StationSeries, UploadOutcome, UploadRequest,
};

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

const DEFAULT_TOP_CRITICAL: usize = 10;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Optional day-first or ISO timestamp; naive values are taken as UTC.
fn parse_time(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            parse_timestamp(s)
                .map(|t| t.and_utc())
                .ok_or_else(|| AppError::BadRequest(format!("Invalid {}: {}", field, s)))
        })
        .transpose()
}

fn entity_kind(raw: Option<&str>) -> Result<EntityKind, AppError> {
    raw.map(str::parse::<EntityKind>)
        .transpose()
        .map(Option::unwrap_or_default)
        .map_err(AppError::BadRequest)
}

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
///
/// Reports whether the repository answers; the endpoint itself never fails.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_status = match db_services::health_check(state.repository.as_ref()).await {
        Ok(true) => "connected",
        _ => "disconnected",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        data_mode: "db".to_string(),
        db_status: db_status.to_string(),
        version: API_VERSION.to_string(),
    })
}

// =============================================================================
// Reference data
// =============================================================================

/// GET /stations
pub async fn list_stations(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> HandlerResult<Vec<Station>> {
    let stations = state.repository.list_stations(page.skip, page.limit).await?;
    Ok(Json(stations))
}

/// GET /basins
pub async fn list_basins(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> HandlerResult<Vec<Basin>> {
    let basins = state.repository.list_basins(page.skip, page.limit).await?;
    Ok(Json(basins))
}

/// GET /variables
pub async fn list_variables(State(state): State<AppState>) -> HandlerResult<Vec<Variable>> {
    let mut variables = state.repository.list_variables().await?;
    variables.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(Json(variables))
}

// =============================================================================
// Measurements
// =============================================================================

/// GET /measurements/timeseries
pub async fn get_timeseries(
    State(state): State<AppState>,
    Query(query): Query<TimeseriesQuery>,
) -> HandlerResult<Vec<TimeseriesPoint>> {
    let variables = match (&query.variables, &query.variable_code) {
        (Some(list), _) => measurements::split_codes(list),
        (None, Some(code)) => vec![code.clone()],
        (None, None) => Vec::new(),
    };
    let filter = SeriesFilter {
        kind: entity_kind(query.entity_type.as_deref())?,
        entity_id: query.station_id,
        variables,
        source_code: query.source_code.clone().filter(|s| !s.is_empty()),
        start: parse_time("start", query.start.as_deref())?,
        end: parse_time("end", query.end.as_deref())?,
    };
    let points = measurements::timeseries(state.repository.as_ref(), &filter).await?;
    Ok(Json(points))
}

/// GET /measurements/window/24h
pub async fn get_window_24h(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> HandlerResult<Vec<TimeseriesPoint>> {
    let points =
        measurements::window_24h(state.repository.as_ref(), query.station_id, Utc::now()).await?;
    Ok(Json(points))
}

/// GET /measurements/compare
pub async fn get_compare(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> HandlerResult<CompareSeries> {
    let sources = query
        .sources
        .as_deref()
        .map(measurements::split_codes)
        .unwrap_or_default();
    let series = measurements::compare_sources(
        state.repository.as_ref(),
        query.station_id,
        query.variable_code.as_deref(),
        &sources,
        parse_time("start", query.start.as_deref())?,
        parse_time("end", query.end.as_deref())?,
    )
    .await?;
    Ok(Json(series))
}

/// GET /measurements/runs
pub async fn get_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> HandlerResult<Vec<RunOption>> {
    let source = query.source_code.as_deref().filter(|s| !s.is_empty());
    let runs = measurements::list_runs(state.repository.as_ref(), source).await?;
    Ok(Json(runs))
}

// =============================================================================
// Dashboard
// =============================================================================

/// GET /map/points-kpi
pub async fn map_points_kpi(State(state): State<AppState>) -> HandlerResult<Vec<MapKpiItem>> {
    let items = kpi::map_points_kpi(state.repository.as_ref(), Utc::now()).await?;
    Ok(Json(items))
}

/// GET /dashboard/top-critical
pub async fn top_critical(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> HandlerResult<Vec<TopCriticalItem>> {
    let limit = query.limit.unwrap_or(DEFAULT_TOP_CRITICAL);
    let items = kpi::top_critical(state.repository.as_ref(), Utc::now(), limit).await?;
    Ok(Json(items))
}

// =============================================================================
// Admin: availability and entities
// =============================================================================

/// GET /admin/data-availability
pub async fn data_availability(State(state): State<AppState>) -> HandlerResult<DataAvailability> {
    let tree = availability::data_availability(state.repository.as_ref()).await?;
    Ok(Json(tree))
}

/// GET /admin/stations-with-data
pub async fn stations_with_data(
    State(state): State<AppState>,
    Query(query): Query<StationsWithDataQuery>,
) -> HandlerResult<Vec<StationWithData>> {
    let stations = availability::stations_with_data(
        state.repository.as_ref(),
        query.variable_code.as_deref(),
        query.source_code.as_deref(),
    )
    .await?;
    Ok(Json(stations))
}

/// GET /admin/entities/{kind}
pub async fn list_entities(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> HandlerResult<Vec<serde_json::Value>> {
    let kind = entity_kind(Some(&kind))?;
    let entities = db_services::list_entities(state.repository.as_ref(), kind).await?;
    Ok(Json(entities))
}

/// POST /admin/entities/{kind}
pub async fn create_entity(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(payload): Json<EntityPayload>,
) -> HandlerResult<EntityResponse> {
    let kind = entity_kind(Some(&kind))?;
    let entity = db_services::create_entity(state.repository.as_ref(), kind, &payload).await?;
    Ok(Json(EntityResponse {
        status: "success".to_string(),
        entity,
    }))
}

/// PUT /admin/entities/{kind}/{id}
pub async fn update_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Json(payload): Json<EntityPayload>,
) -> HandlerResult<EntityResponse> {
    let kind = entity_kind(Some(&kind))?;
    let entity =
        db_services::update_entity(state.repository.as_ref(), kind, id, &payload).await?;
    Ok(Json(EntityResponse {
        status: "success".to_string(),
        entity,
    }))
}

/// DELETE /admin/entities/{kind}/{id}
pub async fn delete_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> HandlerResult<StatusResponse> {
    let kind = entity_kind(Some(&kind))?;
    db_services::delete_entity(state.repository.as_ref(), kind, id).await?;
    Ok(Json(StatusResponse::success(format!("Entity {} deleted", id))))
}

// =============================================================================
// Admin: time series management
// =============================================================================

/// GET /admin/timeseries/sources
pub async fn list_sources(State(state): State<AppState>) -> HandlerResult<Vec<Source>> {
    Ok(Json(state.repository.list_sources().await?))
}

/// POST /admin/timeseries/analyze
pub async fn analyze_timeseries(
    State(state): State<AppState>,
    multipart: Multipart,
) -> HandlerResult<AnalysisOutcome> {
    let mut form = UploadForm::read(multipart).await?;
    let (filename, bytes) = form.take_file()?;
    let kind = entity_kind(form.text("entity_type").as_deref())?;
    let outcome =
        timeseries::analyze_upload(state.repository.as_ref(), &filename, &bytes, kind).await?;
    Ok(Json(outcome))
}

/// POST /admin/timeseries/upload
pub async fn upload_timeseries(
    State(state): State<AppState>,
    multipart: Multipart,
) -> HandlerResult<UploadOutcome> {
    let mut form = UploadForm::read(multipart).await?;
    let (filename, bytes) = form.take_file()?;
    let request = UploadRequest {
        import_mode: form
            .text("import_mode")
            .map(|m| m.parse::<ImportMode>())
            .transpose()?
            .unwrap_or_default(),
        replace_existing: form.flag("replace_existing", false),
        entity_id: form.parsed("station_id")?,
        variable_code: form.text("variable_code"),
        source_code: form.text("source_code").unwrap_or_else(|| "OBS".to_string()),
        kind: entity_kind(form.text("entity_type").as_deref())?,
    };
    let outcome = timeseries::upload_timeseries(
        state.repository.as_ref(),
        &filename,
        &bytes,
        &request,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome))
}

/// GET /admin/timeseries/template
///
/// Download an xlsx import template.
pub async fn download_template(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Result<Response, AppError> {
    let kind = query
        .template_type
        .as_deref()
        .map(str::parse::<TemplateKind>)
        .transpose()?
        .unwrap_or(TemplateKind::Simple);
    let file = templates::build_template(
        state.repository.as_ref(),
        kind,
        query.station_id,
        query.variable_code.as_deref(),
        Utc::now().date_naive(),
    )
    .await?;

    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}

/// GET /admin/timeseries/{variable}
pub async fn variable_stations(
    State(state): State<AppState>,
    Path(variable_code): Path<String>,
    Query(query): Query<VariableStationsQuery>,
) -> HandlerResult<VariableStationsResponse> {
    let stations = availability::stations_for_variable(
        state.repository.as_ref(),
        &variable_code,
        query.all_stations,
    )
    .await?;
    Ok(Json(VariableStationsResponse {
        variable_code,
        stations,
    }))
}

/// GET /admin/timeseries/{variable}/{station}
pub async fn station_series(
    State(state): State<AppState>,
    Path((variable_code, station_id)): Path<(String, i64)>,
    Query(query): Query<SeriesRangeQuery>,
) -> HandlerResult<StationSeries> {
    let series = timeseries::station_series(
        state.repository.as_ref(),
        &variable_code,
        station_id,
        parse_time("start_date", query.start_date.as_deref())?,
        parse_time("end_date", query.end_date.as_deref())?,
    )
    .await?;
    Ok(Json(series))
}

/// POST /admin/timeseries/{variable}/{station}
pub async fn add_point(
    State(state): State<AppState>,
    Path((variable_code, station_id)): Path<(String, i64)>,
    Json(point): Json<PointInput>,
) -> HandlerResult<StatusResponse> {
    timeseries::add_point(state.repository.as_ref(), &variable_code, station_id, &point).await?;
    Ok(Json(StatusResponse::success("Data point added")))
}

/// DELETE /admin/timeseries/{variable}/{station}/{timestamp}
pub async fn delete_point(
    State(state): State<AppState>,
    Path((variable_code, station_id, timestamp)): Path<(String, i64, String)>,
) -> HandlerResult<StatusResponse> {
    let time = parse_time("timestamp", Some(&timestamp))?
        .ok_or_else(|| AppError::BadRequest("Invalid timestamp".to_string()))?;
    timeseries::delete_point(state.repository.as_ref(), &variable_code, station_id, time).await?;
    Ok(Json(StatusResponse::success("Data point deleted")))
}

/// DELETE /admin/timeseries/{variable}/{station}
pub async fn delete_series(
    State(state): State<AppState>,
    Path((variable_code, station_id)): Path<(String, i64)>,
) -> HandlerResult<StatusResponse> {
    let message =
        timeseries::delete_series(state.repository.as_ref(), &variable_code, station_id).await?;
    Ok(Json(StatusResponse::success(message)))
}

// =============================================================================
// Admin: spatial import
// =============================================================================

/// POST /admin/geo/upload
pub async fn upload_geo(
    State(state): State<AppState>,
    multipart: Multipart,
) -> HandlerResult<GeoUploadOutcome> {
    let mut form = UploadForm::read(multipart).await?;
    let (filename, bytes) = form.take_file()?;
    let request = GeoUploadRequest {
        dry_run: form.flag("dry_run", true),
        kind: entity_kind(form.text("entity_type").as_deref())?,
        replace_mode: form.flag("replace_mode", false),
        column_mapping: form.text("column_mapping"),
        force_type: form.text("force_type"),
    };
    let outcome =
        geo_import::upload_geo(state.repository.as_ref(), &filename, &bytes, &request).await?;
    Ok(Json(outcome))
}

// =============================================================================
// Ingestion
// =============================================================================

/// GET /ingest/history
pub async fn ingest_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> HandlerResult<Vec<IngestionRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.repository.list_ingestions(limit).await?))
}

/// POST /ingest/analyze
///
/// Dry-run report; problems are reported in the body, not as HTTP errors.
pub async fn ingest_analyze(multipart: Multipart) -> HandlerResult<IngestReport> {
    let mut form = UploadForm::read(multipart).await?;
    let (_, bytes) = form.take_file()?;
    let file_type = form.text("type").unwrap_or_default();
    Ok(Json(ingestion::analyze_file(&bytes, &file_type, Utc::now())))
}

/// POST /ingest/execute
///
/// Start an ingestion in the background and return its job id.
pub async fn ingest_execute(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ExecuteOutcome>), AppError> {
    let mut form = UploadForm::read(multipart).await?;
    let (filename, bytes) = form.take_file()?;
    let kind: IngestKind = form
        .text("type")
        .unwrap_or_default()
        .parse()
        .map_err(AppError::BadRequest)?;
    let run_time =
        parse_time("run_date", form.text("run_date").as_deref())?.unwrap_or_else(Utc::now);

    let outcome = ingestion::start_ingestion_job(
        state.repository.clone(),
        &state.job_tracker,
        filename,
        bytes,
        kind,
        form.text("source_code"),
        run_time,
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// GET /ingest/jobs/{job_id}
///
/// Get the current status and logs of a background job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> HandlerResult<JobStatusResponse> {
    let job = state
        .job_tracker
        .get_job(&job_id)
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    Ok(Json(JobStatusResponse {
        job_id: job.job_id,
        label: job.label,
        status: job.status,
        logs: job.logs,
        result: job.result,
    }))
}

/// GET /ingest/jobs/{job_id}/logs
///
/// Stream job logs via Server-Sent Events (SSE).
pub async fn stream_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if state.job_tracker.get_job(&job_id).is_none() {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    }

    let tracker = state.job_tracker.clone();
    let stream = async_stream::stream! {
        let mut sent = 0;
        loop {
            let fresh = tracker.logs_since(&job_id, sent);
            sent += fresh.len();
            for entry in fresh {
                let data = serde_json::to_string(&entry).unwrap_or_default();
                yield Ok(Event::default().data(data));
            }

            match tracker.get_job(&job_id) {
                Some(job) if job.status == JobStatus::Running => {}
                Some(job) => {
                    // lines logged between the read above and completion
                    for entry in job.logs.iter().skip(sent) {
                        let data = serde_json::to_string(entry).unwrap_or_default();
                        yield Ok(Event::default().data(data));
                    }
                    let final_event = serde_json::json!({
                        "status": job.status,
                        "result": job.result,
                    });
                    yield Ok(Event::default()
                        .event("complete")
                        .data(serde_json::to_string(&final_event).unwrap_or_default()));
                    break;
                }
                None => break,
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("keep-alive"),
    ))
}
