#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::api::{
        EntityKind, EntityRef, MeasurementQuery, NewStation, StationId, STATION_TYPE_DAM,
    };
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::{MeasurementRepository, ReferenceRepository, StationRepository};
    use crate::services::error::ImportError;
    use crate::services::timeseries::*;

    async fn repo_with_stations() -> LocalRepository {
        let repo = LocalRepository::new();
        repo.create_station(&NewStation {
            code: "P1".into(),
            name: "Fès Saiss".into(),
            lat: Some(34.0),
            lon: Some(-5.0),
            ..Default::default()
        })
        .await
        .unwrap();
        repo.create_station(&NewStation {
            code: "B1".into(),
            name: "Al Wahda".into(),
            station_type: Some(STATION_TYPE_DAM.into()),
            ..Default::default()
        })
        .await
        .unwrap();
        repo
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_matches_codes_and_names() {
        let repo = repo_with_stations().await;
        let csv = "Date;p1;Al Wahda;Inconnue\n01/01/2024 00:00;1;2;3\n02/01/2024 00:00;4;5;6\n";

        let outcome = analyze_upload(&repo, "obs.csv", csv.as_bytes(), EntityKind::Station)
            .await
            .unwrap();
        let AnalysisOutcome::Success(report) = outcome else {
            panic!("expected a successful analysis");
        };
        assert_eq!(report.time_column, "Date");
        assert_eq!(report.rows_count, 2);
        assert_eq!(report.stations_found, 2);
        assert_eq!(report.stations_details[1].station_code, "B1");
        assert_eq!(report.unknown_columns, vec!["Inconnue"]);
        assert_eq!(report.start_date.as_deref(), Some("2024-01-01 00:00:00"));
        assert_eq!(report.preview.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_without_time_column() {
        let repo = repo_with_stations().await;
        let outcome = analyze_upload(&repo, "x.csv", b"a,b\n1,2\n", EntityKind::Station)
            .await
            .unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Timestamp column not found");
    }

    #[tokio::test]
    async fn test_simple_upload_creates_daily_run() {
        let repo = repo_with_stations().await;
        let csv = "timestamp,value,quality_flag\n2024-01-01T00:00:00,1.5,good\n2024-01-01T01:00:00,2.5,suspect\nbad,9,good\n";
        let request = UploadRequest {
            entity_id: Some(1),
            variable_code: Some("precip_mm".into()),
            ..Default::default()
        };

        let outcome = upload_timeseries(&repo, "s.csv", csv.as_bytes(), &request, now())
            .await
            .unwrap();
        assert_eq!(outcome.message, "Imported 2 data points");

        let rows = repo
            .query_measurements(&MeasurementQuery::for_entity(EntityRef::station(
                StationId::new(1),
            )))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|m| m.qc_flag == "suspect"));

        let runs = repo.list_run_times("OBS", 10).await.unwrap();
        assert_eq!(runs, vec![now()]);
    }

    #[tokio::test]
    async fn test_simple_upload_requires_station_and_variable() {
        let repo = repo_with_stations().await;
        let err = upload_timeseries(
            &repo,
            "s.csv",
            b"timestamp,value\n2024-01-01,1\n",
            &UploadRequest::default(),
            now(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Station and Variable required for simple mode");
    }

    #[tokio::test]
    async fn test_upload_rejects_file_without_timestamps() {
        let repo = repo_with_stations().await;
        let err = upload_timeseries(
            &repo,
            "s.csv",
            b"timestamp,value\nhier,1\n",
            &UploadRequest::default(),
            now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::BadRequest(_)));
        assert_eq!(err.to_string(), "File is empty or no valid timestamps found");
    }

    #[tokio::test]
    async fn test_upload_unknown_source() {
        let repo = repo_with_stations().await;
        let request = UploadRequest {
            source_code: "RADAR".into(),
            ..Default::default()
        };
        let err = upload_timeseries(&repo, "s.csv", b"time,v\n2024-01-01,1\n", &request, now())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_multi_station_skips_non_dams_for_release() {
        let repo = repo_with_stations().await;
        let csv = "time,P1,B1,Unnamed: 3\n2024-01-01 00:00,10,20,x\n";
        let request = UploadRequest {
            import_mode: ImportMode::MultiStation,
            variable_code: Some("lacher_m3s".into()),
            ..Default::default()
        };
        let outcome = upload_timeseries(&repo, "m.csv", csv.as_bytes(), &request, now())
            .await
            .unwrap();
        assert_eq!(outcome.records, 1);

        let dam_rows = repo
            .query_measurements(&MeasurementQuery::for_entity(EntityRef::station(
                StationId::new(2),
            )))
            .await
            .unwrap();
        assert_eq!(dam_rows[0].value, 20.0);
    }

    #[tokio::test]
    async fn test_multi_variable_matches_labels_and_units() {
        let repo = repo_with_stations().await;
        let label = repo.get_variable("debit_m3s").await.unwrap().unwrap().label;
        let csv = format!(
            "date,precip_mm,{} (m3/s),lacher_m3s\n2024-01-01 00:00,1,2,3\n",
            label
        );
        let request = UploadRequest {
            import_mode: ImportMode::MultiVariable,
            entity_id: Some(1),
            ..Default::default()
        };
        let outcome = upload_timeseries(&repo, "v.csv", csv.as_bytes(), &request, now())
            .await
            .unwrap();
        // lacher_m3s is dropped: P1 is not a dam.
        assert_eq!(outcome.records, 2);
    }

    #[tokio::test]
    async fn test_replace_existing_clears_range() {
        let repo = repo_with_stations().await;
        let request = UploadRequest {
            entity_id: Some(1),
            variable_code: Some("debit_m3s".into()),
            ..Default::default()
        };
        let first = "timestamp,value\n2024-01-01 00:00,1\n2024-01-01 02:00,1\n";
        upload_timeseries(&repo, "a.csv", first.as_bytes(), &request, now())
            .await
            .unwrap();

        let replace = UploadRequest {
            replace_existing: true,
            ..request
        };
        let second = "timestamp,value\n2024-01-01 00:00,5\n2024-01-01 01:00,5\n";
        upload_timeseries(&repo, "b.csv", second.as_bytes(), &replace, now())
            .await
            .unwrap();

        let rows = repo
            .query_measurements(&MeasurementQuery::for_entity(EntityRef::station(
                StationId::new(1),
            )))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().filter(|m| m.value == 5.0).count() == 2);
    }

    #[tokio::test]
    async fn test_manual_point_lifecycle() {
        let repo = repo_with_stations().await;
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        add_point(
            &repo,
            "volume_hm3",
            2,
            &PointInput {
                timestamp: t,
                value: 512.3,
                quality_flag: None,
            },
        )
        .await
        .unwrap();

        let series = station_series(&repo, "volume_hm3", 2, None, None)
            .await
            .unwrap();
        assert_eq!(series.data_count, 1);
        assert_eq!(series.data[0].quality_flag, "good");

        delete_point(&repo, "volume_hm3", 2, t).await.unwrap();
        let err = delete_point(&repo, "volume_hm3", 2, t).await.unwrap_err();
        assert_eq!(err.to_string(), "Measurement not found");

        let message = delete_series(&repo, "volume_hm3", 2).await.unwrap();
        assert_eq!(message, "Deleted 0 measurements for variable volume_hm3");
    }

    #[tokio::test]
    async fn test_add_point_unknown_variable() {
        let repo = repo_with_stations().await;
        let err = add_point(
            &repo,
            "salinite",
            1,
            &PointInput {
                timestamp: now(),
                value: 1.0,
                quality_flag: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Variable salinite not found");
    }
}
