#[cfg(test)]
mod tests {
    use crate::api::EntityKind;
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::{MeasurementRepository, RepositoryError};
    use crate::db::services::*;

    fn station_payload(code: &str) -> EntityPayload {
        EntityPayload {
            code: Some(code.to_string()),
            name: Some(format!("Poste {}", code)),
            lat: Some(34.2),
            lon: Some(-5.1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_health_check_pass_through() {
        let repo = LocalRepository::new();
        assert!(health_check(&repo).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_station_requires_coordinates() {
        let repo = LocalRepository::new();
        let payload = EntityPayload {
            lat: None,
            ..station_payload("P1")
        };
        let err = create_entity(&repo, EntityKind::Station, &payload)
            .await
            .unwrap_err();
        assert_eq!(
            err.message(),
            "Latitude and Longitude are required for new stations"
        );
    }

    #[tokio::test]
    async fn test_create_station_default_type() {
        let repo = LocalRepository::new();
        let created = create_entity(&repo, EntityKind::Station, &station_payload("P1"))
            .await
            .unwrap();
        assert_eq!(created["type"], "Station hydrologique");
        assert_eq!(created["code"], "P1");
    }

    #[tokio::test]
    async fn test_create_basin_without_coordinates() {
        let repo = LocalRepository::new();
        let payload = EntityPayload {
            code: Some("BV1".into()),
            name: Some("Sebou amont".into()),
            level: Some(2),
            ..Default::default()
        };
        let created = create_entity(&repo, EntityKind::Basin, &payload).await.unwrap();
        assert_eq!(created["level"], 2);
    }

    #[tokio::test]
    async fn test_update_with_no_fields_is_rejected() {
        let repo = LocalRepository::new();
        create_entity(&repo, EntityKind::Station, &station_payload("P1"))
            .await
            .unwrap();
        let err = update_entity(&repo, EntityKind::Station, 1, &EntityPayload::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "No fields to update");
    }

    #[tokio::test]
    async fn test_update_needs_both_coordinates() {
        let repo = LocalRepository::new();
        create_entity(&repo, EntityKind::Station, &station_payload("P1"))
            .await
            .unwrap();
        let payload = EntityPayload {
            lat: Some(1.0),
            ..Default::default()
        };
        let err = update_entity(&repo, EntityKind::Station, 1, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ValidationError { .. }));
        assert_eq!(
            err.message(),
            "Latitude and Longitude are required for new stations"
        );

        let payload = EntityPayload {
            lat: Some(1.0),
            lon: Some(2.0),
            ..Default::default()
        };
        let moved = update_entity(&repo, EntityKind::Station, 1, &payload)
            .await
            .unwrap();
        assert_eq!(moved["lat"], 1.0);
        assert_eq!(moved["lon"], 2.0);
    }

    #[tokio::test]
    async fn test_update_detaches_basin_on_null() {
        let repo = LocalRepository::new();
        let basin = EntityPayload {
            code: Some("BV1".into()),
            name: Some("Sebou amont".into()),
            ..Default::default()
        };
        create_entity(&repo, EntityKind::Basin, &basin).await.unwrap();
        let payload = EntityPayload {
            basin_id: Some(Some(1)),
            ..station_payload("P1")
        };
        let created = create_entity(&repo, EntityKind::Station, &payload)
            .await
            .unwrap();
        assert_eq!(created["basin_id"], 1);

        let rename: EntityPayload =
            serde_json::from_value(serde_json::json!({ "name": "Renamed" })).unwrap();
        assert_eq!(rename.basin_id, None);
        let renamed = update_entity(&repo, EntityKind::Station, 1, &rename)
            .await
            .unwrap();
        assert_eq!(renamed["basin_id"], 1);

        let detach: EntityPayload =
            serde_json::from_value(serde_json::json!({ "basin_id": null })).unwrap();
        assert_eq!(detach.basin_id, Some(None));
        let detached = update_entity(&repo, EntityKind::Station, 1, &detach)
            .await
            .unwrap();
        assert!(detached["basin_id"].is_null());
        assert_eq!(detached["name"], "Renamed");
    }

    #[tokio::test]
    async fn test_update_missing_entity() {
        let repo = LocalRepository::new();
        let payload = EntityPayload {
            name: Some("x".into()),
            ..Default::default()
        };
        let err = update_entity(&repo, EntityKind::Basin, 77, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
        assert_eq!(err.message(), "Entity 77 not found");
    }

    #[tokio::test]
    async fn test_delete_and_resolve() {
        let repo = LocalRepository::new();
        create_entity(&repo, EntityKind::Station, &station_payload("P1"))
            .await
            .unwrap();
        assert!(resolve_entity(&repo, EntityKind::Station, 1).await.is_ok());

        delete_entity(&repo, EntityKind::Station, 1).await.unwrap();
        assert!(resolve_entity(&repo, EntityKind::Station, 1)
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(repo.count_measurements().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_entities_as_json() {
        let repo = LocalRepository::new();
        for code in ["A", "B"] {
            create_entity(&repo, EntityKind::Station, &station_payload(code))
                .await
                .unwrap();
        }
        let listed = list_entities(&repo, EntityKind::Station).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(list_entities(&repo, EntityKind::Basin).await.unwrap().is_empty());
    }
}
