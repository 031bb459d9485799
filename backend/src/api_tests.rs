#[cfg(test)]
mod tests {
    use crate::api::*;
    use chrono::{TimeZone, Utc};

    fn sample_station() -> Station {
        Station {
            id: StationId::new(1),
            code: "ST01".to_string(),
            name: "Ain Sebou".to_string(),
            basin_id: None,
            lat: Some(34.0),
            lon: Some(-5.0),
            station_type: STATION_TYPE_HYDRO.to_string(),
            active: true,
        }
    }

    #[test]
    fn test_station_id_value() {
        let id = StationId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("stations".parse::<EntityKind>().unwrap(), EntityKind::Station);
        assert_eq!("bassins".parse::<EntityKind>().unwrap(), EntityKind::Basin);

        let err = "rivers".parse::<EntityKind>().unwrap_err();
        assert_eq!(err, "Invalid entity type: rivers. Allowed: stations, bassins");
    }

    #[test]
    fn test_entity_kind_serializes_as_path_segment() {
        let json = serde_json::to_string(&EntityKind::Basin).unwrap();
        assert_eq!(json, "\"bassins\"");
    }

    #[test]
    fn test_station_serializes_type_field() {
        let json = serde_json::to_value(sample_station()).unwrap();
        assert_eq!(json["type"], "Station hydrologique");
        assert_eq!(json["id"], 1);
    }

    #[test]
    fn test_station_patch_apply() {
        let mut station = sample_station();
        let patch = StationPatch {
            name: Some("Renamed".to_string()),
            active: Some(false),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        patch.apply(&mut station);
        assert_eq!(station.name, "Renamed");
        assert!(!station.active);
        assert_eq!(station.code, "ST01");
    }

    #[test]
    fn test_empty_patch() {
        assert!(StationPatch::default().is_empty());
        assert!(BasinPatch::default().is_empty());
    }

    #[test]
    fn test_is_dam_type() {
        assert!(is_dam_type("Barrage"));
        assert!(is_dam_type("barrage de garde"));
        assert!(!is_dam_type(STATION_TYPE_RAIN));
    }

    #[test]
    fn test_severity_wire_names() {
        assert_eq!(
            serde_json::to_string(&Severity::VigilancePluie).unwrap(),
            "\"VIGILANCE_PLUIE\""
        );
        assert_eq!(Severity::AlerteLacher.as_str(), "ALERTE_LACHER");
        assert_eq!(Severity::Ok.to_string(), "OK");
    }

    #[test]
    fn test_measurement_query_matches() {
        let m = Measurement {
            time: Utc.with_ymd_and_hms(2024, 1, 10, 6, 0, 0).unwrap(),
            entity: EntityRef::station(StationId::new(3)),
            variable_code: "precip_mm".to_string(),
            source_code: "OBS".to_string(),
            run_id: None,
            value: 4.2,
            qc_flag: "good".to_string(),
        };

        let mut query = MeasurementQuery::for_entity(EntityRef::station(StationId::new(3)));
        assert!(query.matches(&m));

        query.variable_codes = vec!["debit_m3s".to_string()];
        assert!(!query.matches(&m));

        query.variable_codes.clear();
        query.start = Some(Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap());
        assert!(!query.matches(&m));
    }

    #[test]
    fn test_default_reference_data() {
        let sources = default_sources();
        assert!(sources.iter().any(|s| s.code == "OBS"));
        assert!(sources.iter().any(|s| s.code == "ABHS_RES"));
        let variables = default_variables();
        assert!(variables.iter().any(|v| v.code == "precip_mm" && v.unit == "mm"));
    }

    #[test]
    fn test_ingestion_status_roundtrip_names() {
        assert_eq!("success".parse::<IngestionStatus>().unwrap(), IngestionStatus::Success);
        assert_eq!(IngestionStatus::Failed.as_str(), "FAILED");
    }
}
