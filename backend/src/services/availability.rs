//! Data availability report for the administration pages.
//!
//! ```text
//! stations ─┬─ "Barrage" ─┬─ count
//!           │             └─ variables ── lacher_m3s ── sources ── OBS ── {record_count, first, last}
//!           └─ ...
//! basins ───── "level_2" ── {count, variables}
//! summary ──── totals, available variables and sources
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{EntityKind, Station};
use crate::db::repository::{FullRepository, RepositoryResult};

const SCAN_LIMIT: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub record_count: i64,
    pub first_record: Option<DateTime<Utc>>,
    pub last_record: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableAvailability {
    pub sources: BTreeMap<String, SeriesStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupAvailability {
    pub count: usize,
    pub variables: BTreeMap<String, VariableAvailability>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySummary {
    pub total_stations: usize,
    pub total_basins: usize,
    pub total_variables: usize,
    pub total_sources: usize,
    pub total_records: i64,
    pub available_variables: Vec<String>,
    pub available_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAvailability {
    pub stations: BTreeMap<String, GroupAvailability>,
    pub basins: BTreeMap<String, GroupAvailability>,
    pub summary: AvailabilitySummary,
}

/// Stations grouped by type, basins by level, and what station data exists.
pub async fn data_availability<R: FullRepository + ?Sized>(
    repo: &R,
) -> RepositoryResult<DataAvailability> {
    let mut report = DataAvailability::default();

    let stations = repo.list_stations(0, SCAN_LIMIT).await?;
    let type_of: HashMap<i64, &str> = stations
        .iter()
        .map(|s| (s.id.value(), s.station_type.as_str()))
        .collect();
    for station in &stations {
        report
            .stations
            .entry(station.station_type.clone())
            .or_default()
            .count += 1;
    }
    report.summary.total_stations = stations.len();

    let mut variables = BTreeSet::new();
    let mut sources = BTreeSet::new();
    for series in repo.series_coverage(Some(EntityKind::Station)).await? {
        let Some(station_type) = type_of.get(&series.entity.id) else {
            continue;
        };
        variables.insert(series.variable_code.clone());
        sources.insert(series.source_code.clone());
        report.summary.total_records += series.record_count;

        report
            .stations
            .entry((*station_type).to_string())
            .or_default()
            .variables
            .entry(series.variable_code)
            .or_default()
            .sources
            .entry(series.source_code)
            .and_modify(|stats| {
                stats.record_count += series.record_count;
                stats.first_record = stats.first_record.min(Some(series.first_record));
                stats.last_record = stats.last_record.max(Some(series.last_record));
            })
            .or_insert(SeriesStats {
                record_count: series.record_count,
                first_record: Some(series.first_record),
                last_record: Some(series.last_record),
            });
    }

    let basins = repo.list_basins(0, SCAN_LIMIT).await?;
    for basin in &basins {
        let key = match basin.level {
            Some(level) => format!("level_{}", level),
            None => "level_None".to_string(),
        };
        report.basins.entry(key).or_default().count += 1;
    }
    report.summary.total_basins = basins.len();

    report.summary.total_variables = variables.len();
    report.summary.total_sources = sources.len();
    report.summary.available_variables = variables.into_iter().collect();
    report.summary.available_sources = sources.into_iter().collect();
    Ok(report)
}

/// Row of the stations-with-data listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationWithData {
    pub id: i64,
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub station_type: String,
}

/// Stations holding at least one measurement of the given variable and source.
pub async fn stations_with_data<R: FullRepository + ?Sized>(
    repo: &R,
    variable_code: Option<&str>,
    source_code: Option<&str>,
) -> RepositoryResult<Vec<StationWithData>> {
    let with_data: BTreeSet<i64> = repo
        .series_coverage(Some(EntityKind::Station))
        .await?
        .into_iter()
        .filter(|s| variable_code.map_or(true, |v| s.variable_code == v))
        .filter(|s| source_code.map_or(true, |src| s.source_code == src))
        .map(|s| s.entity.id)
        .collect();

    let mut stations: Vec<StationWithData> = repo
        .list_stations(0, SCAN_LIMIT)
        .await?
        .into_iter()
        .filter(|s| with_data.contains(&s.id.value()))
        .map(|s: Station| StationWithData {
            id: s.id.value(),
            code: s.code,
            name: s.name,
            station_type: s.station_type,
        })
        .collect();
    stations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(stations)
}

/// Stations offered by the series manager for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableStation {
    pub station_id: i64,
    pub code: String,
    pub name: String,
    pub station_type: String,
    pub data_count: i64,
}

/// All stations (`data_count` 0) or only those holding `variable_code`, by name.
pub async fn stations_for_variable<R: FullRepository + ?Sized>(
    repo: &R,
    variable_code: &str,
    all_stations: bool,
) -> RepositoryResult<Vec<VariableStation>> {
    let mut counts: HashMap<i64, i64> = HashMap::new();
    if !all_stations {
        for series in repo.series_coverage(Some(EntityKind::Station)).await? {
            if series.variable_code == variable_code {
                *counts.entry(series.entity.id).or_default() += series.record_count;
            }
        }
    }

    let mut stations: Vec<VariableStation> = repo
        .list_stations(0, SCAN_LIMIT)
        .await?
        .into_iter()
        .filter_map(|s| {
            let data_count = counts.get(&s.id.value()).copied();
            if !all_stations && data_count.is_none() {
                return None;
            }
            Some(VariableStation {
                station_id: s.id.value(),
                code: s.code,
                name: s.name,
                station_type: s.station_type,
                data_count: data_count.unwrap_or(0),
            })
        })
        .collect();
    stations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EntityRef, Measurement, NewBasin, NewStation, STATION_TYPE_DAM};
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::{BasinRepository, MeasurementRepository, StationRepository};
    use chrono::TimeZone;

    async fn seeded() -> LocalRepository {
        let repo = LocalRepository::new();
        let dam = repo
            .create_station(&NewStation {
                code: "B1".into(),
                name: "Al Wahda".into(),
                station_type: Some(STATION_TYPE_DAM.into()),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.create_station(&NewStation {
            code: "H1".into(),
            name: "Azib Soltane".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        repo.create_basin(&NewBasin {
            code: "BV".into(),
            name: "Ouergha".into(),
            level: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

        let rows: Vec<Measurement> = (0..3)
            .map(|h| Measurement {
                time: Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap(),
                entity: EntityRef::station(dam.id),
                variable_code: "lacher_m3s".into(),
                source_code: "OBS".into(),
                run_id: None,
                value: 10.0 * h as f64,
                qc_flag: "good".into(),
            })
            .collect();
        repo.upsert_measurements(&rows).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_availability_report() {
        let repo = seeded().await;
        let report = data_availability(&repo).await.unwrap();

        assert_eq!(report.summary.total_stations, 2);
        assert_eq!(report.summary.total_basins, 1);
        assert_eq!(report.summary.total_records, 3);
        assert_eq!(report.summary.available_variables, vec!["lacher_m3s"]);
        assert_eq!(report.basins["level_2"].count, 1);

        let dams = &report.stations[STATION_TYPE_DAM];
        let obs = &dams.variables["lacher_m3s"].sources["OBS"];
        assert_eq!(obs.record_count, 3);
        assert_eq!(
            obs.last_record,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_stations_with_data_filters() {
        let repo = seeded().await;
        let found = stations_with_data(&repo, Some("lacher_m3s"), Some("OBS"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "B1");

        let none = stations_with_data(&repo, Some("precip_mm"), None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_stations_for_variable() {
        let repo = seeded().await;
        let all = stations_for_variable(&repo, "lacher_m3s", true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|s| s.data_count == 0));

        let with_data = stations_for_variable(&repo, "lacher_m3s", false)
            .await
            .unwrap();
        assert_eq!(with_data.len(), 1);
        assert_eq!(with_data[0].data_count, 3);
    }
}
