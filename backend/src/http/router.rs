//! Router configuration for the HTTP API.
//!
//! This module sets up all routes, middleware (CORS, compression, tracing),
//! and creates the axum router ready for serving.

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Maximum accepted request body (spreadsheet and GeoJSON uploads).
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

fn api_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/data-availability", get(handlers::data_availability))
        .route("/stations-with-data", get(handlers::stations_with_data))
        // Stations and basins
        .route(
            "/entities/{kind}",
            get(handlers::list_entities).post(handlers::create_entity),
        )
        .route(
            "/entities/{kind}/{id}",
            put(handlers::update_entity).delete(handlers::delete_entity),
        )
        // Time series management
        .route("/timeseries/sources", get(handlers::list_sources))
        .route("/timeseries/analyze", post(handlers::analyze_timeseries))
        .route("/timeseries/upload", post(handlers::upload_timeseries))
        .route("/timeseries/template", get(handlers::download_template))
        .route("/timeseries/{variable}", get(handlers::variable_stations))
        .route(
            "/timeseries/{variable}/{station}",
            get(handlers::station_series)
                .post(handlers::add_point)
                .delete(handlers::delete_series),
        )
        .route(
            "/timeseries/{variable}/{station}/{timestamp}",
            delete(handlers::delete_point),
        )
        // Spatial import
        .route("/geo/upload", post(handlers::upload_geo));

    let ingest = Router::new()
        .route("/history", get(handlers::ingest_history))
        .route("/analyze", post(handlers::ingest_analyze))
        .route("/execute", post(handlers::ingest_execute))
        .route("/jobs/{job_id}", get(handlers::get_job_status))
        .route("/jobs/{job_id}/logs", get(handlers::stream_job_logs));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stations", get(handlers::list_stations))
        .route("/basins", get(handlers::list_basins))
        .route("/variables", get(handlers::list_variables))
        .route("/measurements/timeseries", get(handlers::get_timeseries))
        .route("/measurements/window/24h", get(handlers::get_window_24h))
        .route("/measurements/compare", get(handlers::get_compare))
        .route("/measurements/runs", get(handlers::get_runs))
        .route("/map/points-kpi", get(handlers::map_points_kpi))
        .route("/dashboard/top-critical", get(handlers::top_critical))
        .nest("/admin", admin)
        .nest("/ingest", ingest)
}

/// Create the main application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);
    let prefix = state.settings.api_prefix.clone();

    let root = Router::new().route("/health", get(handlers::health_check));
    let app = if prefix.is_empty() || prefix == "/" {
        api_routes()
    } else {
        root.nest(&prefix, api_routes())
    };

    app.layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::FullRepository;
    use std::sync::Arc;

    #[test]
    fn test_router_creation() {
        let repo = Arc::new(LocalRepository::new()) as Arc<dyn FullRepository>;
        let state = AppState::new(repo, Settings::default());
        let _router = create_router(state);
    }

    #[test]
    fn test_invalid_origins_are_skipped() {
        let _cors = cors_layer(&["http://localhost:5173".to_string(), "bad\norigin".to_string()]);
    }
}
