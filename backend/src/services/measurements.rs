//! Read paths behind the chart endpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{EntityKind, EntityRef, Measurement, MeasurementQuery, RunId, TimeOrder};
use crate::db::repository::{FullRepository, RepositoryResult};

/// Maximum points returned by one chart query.
pub const SERIES_LIMIT: usize = 1000;
/// Maximum run times listed per source.
pub const RUNS_LIMIT: usize = 50;

pub const DEFAULT_COMPARE_VARIABLE: &str = "precip_mm";
pub const DEFAULT_COMPARE_SOURCES: [&str; 2] = ["OBS", "AROME"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesPoint {
    pub station_id: i64,
    pub time: DateTime<Utc>,
    pub value: f64,
    pub variable_code: String,
    pub source_code: String,
    pub run_id: Option<RunId>,
    pub qc_flag: String,
}

impl From<Measurement> for TimeseriesPoint {
    fn from(m: Measurement) -> Self {
        TimeseriesPoint {
            station_id: m.entity.id,
            time: m.time,
            value: m.value,
            variable_code: m.variable_code,
            source_code: m.source_code,
            run_id: m.run_id,
            qc_flag: m.qc_flag,
        }
    }
}

/// Filters of the time series endpoint.
#[derive(Debug, Clone, Default)]
pub struct SeriesFilter {
    pub kind: EntityKind,
    pub entity_id: Option<i64>,
    pub variables: Vec<String>,
    pub source_code: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Split `a, b,c` into trimmed, non-empty codes.
pub fn split_codes(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Newest first, at most [`SERIES_LIMIT`] points.
pub async fn timeseries<R: FullRepository + ?Sized>(
    repo: &R,
    filter: &SeriesFilter,
) -> RepositoryResult<Vec<TimeseriesPoint>> {
    let query = MeasurementQuery {
        entity: filter.entity_id.map(|id| EntityRef {
            kind: filter.kind,
            id,
        }),
        entity_kind: Some(filter.kind),
        variable_codes: filter.variables.clone(),
        source_codes: filter.source_code.iter().cloned().collect(),
        start: filter.start,
        end: filter.end,
        order: TimeOrder::Descending,
        limit: Some(SERIES_LIMIT),
        ..Default::default()
    };
    Ok(repo
        .query_measurements(&query)
        .await?
        .into_iter()
        .map(TimeseriesPoint::from)
        .collect())
}

/// Station points of the last 24 hours before `now`.
pub async fn window_24h<R: FullRepository + ?Sized>(
    repo: &R,
    station_id: Option<i64>,
    now: DateTime<Utc>,
) -> RepositoryResult<Vec<TimeseriesPoint>> {
    let filter = SeriesFilter {
        kind: EntityKind::Station,
        entity_id: station_id,
        start: Some(now - Duration::hours(24)),
        ..Default::default()
    };
    timeseries(repo, &filter).await
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparePoint {
    pub t: DateTime<Utc>,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareSeries {
    pub station_id: i64,
    pub variable: String,
    pub sources: BTreeMap<String, Vec<ComparePoint>>,
}

/// One variable of one station, split by source, oldest first.
pub async fn compare_sources<R: FullRepository + ?Sized>(
    repo: &R,
    station_id: i64,
    variable_code: Option<&str>,
    sources: &[String],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> RepositoryResult<CompareSeries> {
    let variable = variable_code.unwrap_or(DEFAULT_COMPARE_VARIABLE).to_string();
    let source_codes = if sources.is_empty() {
        DEFAULT_COMPARE_SOURCES.iter().map(|s| s.to_string()).collect()
    } else {
        sources.to_vec()
    };

    let query = MeasurementQuery {
        entity: Some(EntityRef {
            kind: EntityKind::Station,
            id: station_id,
        }),
        variable_codes: vec![variable.clone()],
        source_codes,
        start,
        end,
        order: TimeOrder::Ascending,
        ..Default::default()
    };

    let mut grouped: BTreeMap<String, Vec<ComparePoint>> = BTreeMap::new();
    for m in repo.query_measurements(&query).await? {
        grouped.entry(m.source_code).or_default().push(ComparePoint {
            t: m.time,
            y: m.value,
        });
    }
    Ok(CompareSeries {
        station_id,
        variable,
        sources: grouped,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOption {
    pub id: String,
    pub label: String,
}

/// Distinct run times of a source (or of every source), newest first.
pub async fn list_runs<R: FullRepository + ?Sized>(
    repo: &R,
    source_code: Option<&str>,
) -> RepositoryResult<Vec<RunOption>> {
    let mut times = match source_code {
        Some(code) => repo.list_run_times(code, RUNS_LIMIT).await?,
        None => {
            let mut all = Vec::new();
            for source in repo.list_sources().await? {
                all.extend(repo.list_run_times(&source.code, RUNS_LIMIT).await?);
            }
            all
        }
    };
    times.sort_unstable_by(|a, b| b.cmp(a));
    times.dedup();
    times.truncate(RUNS_LIMIT);

    Ok(times
        .into_iter()
        .map(|t| {
            let stamp = t.to_rfc3339();
            RunOption {
                id: stamp.clone(),
                label: stamp,
            }
        })
        .collect())
}
