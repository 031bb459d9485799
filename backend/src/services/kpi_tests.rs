#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use crate::api::{EntityRef, Measurement, NewBasin, NewStation, Severity, StationId};
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::{BasinRepository, MeasurementRepository, StationRepository};
    use crate::services::kpi::*;

    fn point(station: i64, var: &str, src: &str, hours_ago: i64, value: f64) -> Measurement {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        Measurement {
            time: now - Duration::hours(hours_ago),
            entity: EntityRef::station(StationId::new(station)),
            variable_code: var.to_string(),
            source_code: src.to_string(),
            run_id: None,
            value,
            qc_flag: "good".to_string(),
        }
    }

    fn window(precip: f64, debit: f64, lacher: f64) -> KpiWindow {
        KpiWindow {
            precip_cum_24h: precip,
            debit_max_24h: debit,
            lacher_max_24h: lacher,
            apport_max_24h: 0.0,
        }
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(window(0.0, 0.0, 0.0).severity(), Severity::Ok);
        assert_eq!(window(19.9, 0.0, 0.0).severity(), Severity::Ok);
        assert_eq!(window(20.0, 0.0, 0.0).severity(), Severity::VigilancePluie);
        assert_eq!(window(50.0, 0.0, 0.0).severity(), Severity::AlertePluie);
        assert_eq!(window(80.0, 500.0, 0.0).severity(), Severity::AlerteDebit);
        assert_eq!(window(80.0, 600.0, 500.0).severity(), Severity::AlerteLacher);
    }

    #[test]
    fn test_score_weights() {
        let w = KpiWindow {
            precip_cum_24h: 12.0,
            debit_max_24h: 100.0,
            lacher_max_24h: 50.0,
            apport_max_24h: 30.0,
        };
        assert!((w.score() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_sums_only_observed_rain() {
        let rows = [
            point(1, PRECIP, "OBS", 1, 4.0),
            point(1, PRECIP, "OBS", 2, 6.0),
            point(1, PRECIP, "AROME", 1, 40.0),
            point(1, DEBIT, "OBS", 1, 120.0),
            point(1, DEBIT, "SIM", 3, 180.0),
        ];
        let w = KpiWindow::from_measurements(rows.iter());
        assert_eq!(w.precip_cum_24h, 10.0);
        assert_eq!(w.debit_max_24h, 180.0);
        assert_eq!(w.lacher_max_24h, 0.0);
    }

    #[tokio::test]
    async fn test_map_points_and_top_critical() {
        let repo = LocalRepository::new();
        let basin = repo
            .create_basin(&NewBasin {
                code: "SEB".into(),
                name: "Sebou".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let wet = repo
            .create_station(&NewStation {
                code: "P1".into(),
                name: "Fès".into(),
                basin_id: Some(basin.id),
                lat: Some(34.0),
                lon: Some(-5.0),
                station_type: None,
            })
            .await
            .unwrap();
        let dry = repo
            .create_station(&NewStation {
                code: "P2".into(),
                name: "Taza".into(),
                basin_id: None,
                lat: Some(34.2),
                lon: Some(-4.0),
                station_type: None,
            })
            .await
            .unwrap();
        // No coordinates: left off the map, still ranked.
        repo.create_station(&NewStation {
            code: "P3".into(),
            name: "Sans position".into(),
            basin_id: None,
            lat: None,
            lon: None,
            station_type: None,
        })
        .await
        .unwrap();

        repo.upsert_measurements(&[
            point(wet.id.value(), PRECIP, "OBS", 1, 30.0),
            point(wet.id.value(), PRECIP, "OBS", 2, 25.0),
            point(wet.id.value(), PRECIP, "OBS", 30, 99.0),
            point(dry.id.value(), VOLUME, "OBS", 5, 123.4),
        ])
        .await
        .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let points = map_points_kpi(&repo, now).await.unwrap();
        assert_eq!(points.len(), 2);

        let wet_point = points.iter().find(|p| p.code == "P1").unwrap();
        assert_eq!(wet_point.severity, Severity::AlertePluie);
        assert_eq!(wet_point.precip_cum_24h_mm, 55.0);
        assert_eq!(wet_point.latest.precip_obs_mm, Some(30.0));

        let dry_point = points.iter().find(|p| p.code == "P2").unwrap();
        assert_eq!(dry_point.severity, Severity::Ok);
        assert_eq!(dry_point.latest.volume_hm3_latest, Some(123.4));

        let top = top_critical(&repo, now, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].station_name, "Fès");
        assert_eq!(top[0].basin_name.as_deref(), Some("Sebou"));
    }

    proptest! {
        #[test]
        fn prop_score_is_monotonic_in_rain(base in 0.0f64..200.0, extra in 0.0f64..200.0) {
            let lower = window(base, 10.0, 0.0);
            let higher = window(base + extra, 10.0, 0.0);
            prop_assert!(higher.score() >= lower.score());
        }

        #[test]
        fn prop_release_alert_dominates(precip in 0.0f64..500.0, debit in 0.0f64..2000.0) {
            prop_assert_eq!(window(precip, debit, 500.0).severity(), Severity::AlerteLacher);
        }
    }
}
