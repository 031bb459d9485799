//! Station criticality over the last 24 hours.
//!
//! Mirrors the `v_station_criticality` view so the in-memory repository and
//! PostgreSQL agree on severities and scores.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{
    BasinId, EntityKind, Measurement, MeasurementQuery, Severity, Station, StationId,
};
use crate::db::repository::{FullRepository, RepositoryResult};

pub const PRECIP: &str = "precip_mm";
pub const DEBIT: &str = "debit_m3s";
pub const LACHER: &str = "lacher_m3s";
pub const APPORT: &str = "apport_m3s";
pub const VOLUME: &str = "volume_hm3";

const LACHER_ALERT: f64 = 500.0;
const DEBIT_ALERT: f64 = 500.0;
const PRECIP_ALERT: f64 = 50.0;
const PRECIP_VIGILANCE: f64 = 20.0;

/// Upper bound on stations considered for the map.
const MAP_STATION_LIMIT: usize = 10_000;

/// Aggregates of one station over the window. Missing series count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiWindow {
    pub precip_cum_24h: f64,
    pub debit_max_24h: f64,
    pub lacher_max_24h: f64,
    pub apport_max_24h: f64,
}

impl KpiWindow {
    /// Aggregate measurements already restricted to one station and the window.
    pub fn from_measurements<'a, I>(measurements: I) -> Self
    where
        I: IntoIterator<Item = &'a Measurement>,
    {
        let mut window = KpiWindow::default();
        let mut debit: Option<f64> = None;
        let mut lacher: Option<f64> = None;
        let mut apport: Option<f64> = None;

        for m in measurements {
            match m.variable_code.as_str() {
                PRECIP if m.source_code == "OBS" => window.precip_cum_24h += m.value,
                DEBIT => debit = Some(debit.map_or(m.value, |d| d.max(m.value))),
                LACHER => lacher = Some(lacher.map_or(m.value, |d| d.max(m.value))),
                APPORT => apport = Some(apport.map_or(m.value, |d| d.max(m.value))),
                _ => {}
            }
        }

        window.debit_max_24h = debit.unwrap_or(0.0);
        window.lacher_max_24h = lacher.unwrap_or(0.0);
        window.apport_max_24h = apport.unwrap_or(0.0);
        window
    }

    /// First matching rule wins, releases before flows before rain.
    pub fn severity(&self) -> Severity {
        if self.lacher_max_24h >= LACHER_ALERT {
            Severity::AlerteLacher
        } else if self.debit_max_24h >= DEBIT_ALERT {
            Severity::AlerteDebit
        } else if self.precip_cum_24h >= PRECIP_ALERT {
            Severity::AlertePluie
        } else if self.precip_cum_24h >= PRECIP_VIGILANCE {
            Severity::VigilancePluie
        } else {
            Severity::Ok
        }
    }

    pub fn score(&self) -> f64 {
        self.precip_cum_24h * 1.0
            + self.debit_max_24h * 0.1
            + self.lacher_max_24h * 0.1
            + self.apport_max_24h * 0.1
    }
}

/// Most recent value of the series shown on map popups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestPivot {
    pub precip_obs_mm: Option<f64>,
    pub precip_arome_mm: Option<f64>,
    pub debit_obs_m3s: Option<f64>,
    pub debit_sim_m3s: Option<f64>,
    pub lacher_m3s_latest: Option<f64>,
    pub volume_hm3_latest: Option<f64>,
    pub volume_sim_hm3: Option<f64>,
}

/// `(variable, source)` pairs feeding [`LatestPivot`].
pub const PIVOT_SERIES: [(&str, &str); 7] = [
    (PRECIP, "OBS"),
    (PRECIP, "AROME"),
    (DEBIT, "OBS"),
    (DEBIT, "SIM"),
    (LACHER, "OBS"),
    (VOLUME, "OBS"),
    (VOLUME, "SIM"),
];

impl LatestPivot {
    fn set(&mut self, variable: &str, source: &str, value: f64) {
        let slot = match (variable, source) {
            (PRECIP, "OBS") => &mut self.precip_obs_mm,
            (PRECIP, "AROME") => &mut self.precip_arome_mm,
            (DEBIT, "OBS") => &mut self.debit_obs_m3s,
            (DEBIT, "SIM") => &mut self.debit_sim_m3s,
            (LACHER, "OBS") => &mut self.lacher_m3s_latest,
            (VOLUME, "OBS") => &mut self.volume_hm3_latest,
            (VOLUME, "SIM") => &mut self.volume_sim_hm3,
            _ => return,
        };
        *slot = Some(value);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapKpiItem {
    pub station_id: StationId,
    pub code: String,
    pub station_name: String,
    pub station_type: String,
    pub basin_id: Option<BasinId>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub severity: Severity,
    pub score: f64,
    pub precip_cum_24h_mm: f64,
    pub debit_max_24h_m3s: f64,
    pub lacher_max_24h_m3s: f64,
    pub apport_max_24h_m3s: f64,
    #[serde(flatten)]
    pub latest: LatestPivot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopCriticalItem {
    pub station_id: StationId,
    pub station_name: String,
    pub basin_name: Option<String>,
    pub precip_cum_24h_mm: f64,
    pub debit_max_24h_m3s: f64,
    pub lacher_max_24h_m3s: f64,
    pub severity: Severity,
    pub score: f64,
}

/// 24-hour aggregates of every station that has data in the window.
pub async fn station_windows<R: FullRepository + ?Sized>(
    repo: &R,
    now: DateTime<Utc>,
) -> RepositoryResult<HashMap<i64, KpiWindow>> {
    let query = MeasurementQuery {
        entity_kind: Some(EntityKind::Station),
        variable_codes: vec![
            PRECIP.to_string(),
            DEBIT.to_string(),
            LACHER.to_string(),
            APPORT.to_string(),
        ],
        start: Some(now - Duration::hours(24)),
        ..Default::default()
    };
    let rows = repo.query_measurements(&query).await?;

    let mut grouped: HashMap<i64, Vec<&Measurement>> = HashMap::new();
    for m in &rows {
        grouped.entry(m.entity.id).or_default().push(m);
    }
    Ok(grouped
        .into_iter()
        .map(|(id, ms)| (id, KpiWindow::from_measurements(ms)))
        .collect())
}

async fn latest_pivots<R: FullRepository + ?Sized>(
    repo: &R,
) -> RepositoryResult<HashMap<i64, LatestPivot>> {
    let latest = repo
        .latest_measurements(EntityKind::Station, &PIVOT_SERIES)
        .await?;
    let mut pivots: HashMap<i64, LatestPivot> = HashMap::new();
    for m in latest {
        pivots
            .entry(m.entity.id)
            .or_default()
            .set(&m.variable_code, &m.source_code, m.value);
    }
    Ok(pivots)
}

async fn active_stations<R: FullRepository + ?Sized>(repo: &R) -> RepositoryResult<Vec<Station>> {
    Ok(repo
        .list_stations(0, MAP_STATION_LIMIT)
        .await?
        .into_iter()
        .filter(|s| s.active)
        .collect())
}

/// Map markers: active stations with coordinates, their severity and latest values.
pub async fn map_points_kpi<R: FullRepository + ?Sized>(
    repo: &R,
    now: DateTime<Utc>,
) -> RepositoryResult<Vec<MapKpiItem>> {
    let windows = station_windows(repo, now).await?;
    let mut pivots = latest_pivots(repo).await?;

    let items = active_stations(repo)
        .await?
        .into_iter()
        .filter(|s| s.lat.is_some() && s.lon.is_some())
        .map(|s| {
            let window = windows.get(&s.id.value()).copied().unwrap_or_default();
            MapKpiItem {
                station_id: s.id,
                code: s.code,
                station_name: s.name,
                station_type: s.station_type,
                basin_id: s.basin_id,
                lat: s.lat,
                lon: s.lon,
                severity: window.severity(),
                score: window.score(),
                precip_cum_24h_mm: window.precip_cum_24h,
                debit_max_24h_m3s: window.debit_max_24h,
                lacher_max_24h_m3s: window.lacher_max_24h,
                apport_max_24h_m3s: window.apport_max_24h,
                latest: pivots.remove(&s.id.value()).unwrap_or_default(),
            }
        })
        .collect();
    Ok(items)
}

/// Active stations ordered by descending score.
pub async fn top_critical<R: FullRepository + ?Sized>(
    repo: &R,
    now: DateTime<Utc>,
    limit: usize,
) -> RepositoryResult<Vec<TopCriticalItem>> {
    let windows = station_windows(repo, now).await?;
    let basins: HashMap<i64, String> = repo
        .list_basins(0, MAP_STATION_LIMIT)
        .await?
        .into_iter()
        .map(|b| (b.id.value(), b.name))
        .collect();

    let mut items: Vec<TopCriticalItem> = active_stations(repo)
        .await?
        .into_iter()
        .map(|s| {
            let window = windows.get(&s.id.value()).copied().unwrap_or_default();
            TopCriticalItem {
                station_id: s.id,
                station_name: s.name,
                basin_name: s.basin_id.and_then(|b| basins.get(&b.value()).cloned()),
                precip_cum_24h_mm: window.precip_cum_24h,
                debit_max_24h_m3s: window.debit_max_24h,
                lacher_max_24h_m3s: window.lacher_max_24h,
                severity: window.severity(),
                score: window.score(),
            }
        })
        .collect();

    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    items.truncate(limit);
    Ok(items)
}

#[cfg(test)]
#[path = "kpi_tests.rs"]
mod kpi_tests;
