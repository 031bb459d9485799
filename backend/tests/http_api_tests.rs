//! End-to-end tests of the REST API against the in-memory repository.

mod support;

use std::time::Duration as StdDuration;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use hydro_sentinel::api::{EntityRef, Measurement, StationId};
use hydro_sentinel::db::repository::MeasurementRepository;
use hydro_sentinel::services::templates::XLSX_MIME;
use support::http::{app, get, json_request, multipart_request, send, send_raw};
use support::seeded_repo;

fn recent(station: i64, variable: &str, source: &str, hours_ago: i64, value: f64) -> Measurement {
    Measurement {
        time: Utc::now() - Duration::hours(hours_ago),
        entity: EntityRef::station(StationId::new(station)),
        variable_code: variable.to_string(),
        source_code: source.to_string(),
        run_id: None,
        value,
        qc_flag: "good".to_string(),
    }
}

#[tokio::test]
async fn test_health_at_root_and_under_prefix() {
    let app = app(seeded_repo().await);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["data_mode"], "db");
    assert_eq!(body["db_status"], "connected");
    assert_eq!(body["version"], "1.0.0");

    let root = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = send(&app, root).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_reference_lists() {
    let app = app(seeded_repo().await);

    let (status, body) = send(&app, get("/stations?skip=1&limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["code"], "AW");
    assert_eq!(body[0]["type"], "Barrage");

    let (_, body) = send(&app, get("/variables")).await;
    let labels: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["label"].as_str().unwrap())
        .collect();
    let mut sorted = labels.clone();
    sorted.sort();
    assert_eq!(labels, sorted);

    let (_, body) = send(&app, get("/admin/timeseries/sources")).await;
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["code"] == "ABHS_RES"));
}

#[tokio::test]
async fn test_entity_administration() {
    let app = app(seeded_repo().await);

    let (status, body) = send(
        &app,
        json_request("POST", "/admin/entities/stations", json!({ "code": "S9", "name": "Sebou" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Latitude and Longitude are required for new stations"
    );

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/admin/entities/stations",
            json!({ "code": "S9", "name": "Sebou", "lat": 34.2, "lon": -6.1, "type": "Station hydrologique" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let id = body["entity"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        json_request("PUT", &format!("/admin/entities/stations/{}", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No fields to update");

    let (status, body) = send(
        &app,
        json_request("PUT", "/admin/entities/stations/999", json!({ "name": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["message"], "Entity 999 not found");

    let request = axum::http::Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/admin/entities/stations/{}", id))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], format!("Entity {} deleted", id));

    let (_, body) = send(&app, get("/admin/entities/stations")).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = send(&app, get("/admin/entities/rivers")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_then_query_series() {
    let app = app(seeded_repo().await);
    let csv = b"timestamp,value\n01/02/2024 00:00,12.5\n01/02/2024 01:00,3\nnot a date,7\n";

    let (status, body) = send(
        &app,
        multipart_request(
            "/admin/timeseries/upload",
            &[
                ("import_mode", "simple"),
                ("station_id", "1"),
                ("variable_code", "precip_mm"),
                ("source_code", "OBS"),
            ],
            "p1.csv",
            csv,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Imported 2 data points");

    let (status, body) = send(
        &app,
        get("/measurements/timeseries?station_id=1&variable_code=precip_mm&start=2024-02-01"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let points = body.as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["value"], 3.0);
    assert_eq!(points[0]["source_code"], "OBS");

    let (_, body) = send(&app, get("/admin/timeseries/precip_mm/1")).await;
    assert_eq!(body["data_count"], 2);

    let (status, _) = send(&app, get("/measurements/timeseries?start=yesterday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_rejects_unknown_source() {
    let app = app(seeded_repo().await);
    let (status, body) = send(
        &app,
        multipart_request(
            "/admin/timeseries/upload",
            &[
                ("import_mode", "multi_station"),
                ("variable_code", "precip_mm"),
                ("source_code", "RADAR"),
            ],
            "obs.csv",
            b"date,P1\n01/02/2024 00:00,1\n",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Source RADAR not found");
}

#[tokio::test]
async fn test_manual_point_editing() {
    let app = app(seeded_repo().await);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/admin/timeseries/debit_m3s/1",
            json!({ "timestamp": "2024-03-01T06:00:00Z", "value": 42.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Data point added");

    let delete = |path: &str| {
        axum::http::Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1{}", path))
            .body(axum::body::Body::empty())
            .unwrap()
    };
    let (status, body) = send(
        &app,
        delete("/admin/timeseries/debit_m3s/1/2024-03-01T06:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Data point deleted");

    let (status, body) = send(
        &app,
        delete("/admin/timeseries/debit_m3s/1/2024-03-01T06:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Measurement not found");
}

#[tokio::test]
async fn test_template_download() {
    let app = app(seeded_repo().await);
    let (status, headers, body) = send_raw(
        &app,
        get("/admin/timeseries/template?template_type=multi_station&variable_code=precip_mm"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], XLSX_MIME);
    assert!(headers["content-disposition"]
        .to_str()
        .unwrap()
        .starts_with("attachment; filename="));
    assert_eq!(&body[..2], b"PK");

    let (status, _) = send(&app, get("/admin/timeseries/template?template_type=pivot")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dashboard_ranks_critical_stations() {
    let repo = seeded_repo().await;
    repo.upsert_measurements(&[
        recent(1, "precip_mm", "OBS", 2, 15.0),
        recent(1, "precip_mm", "OBS", 1, 10.0),
        recent(2, "lacher_m3s", "OBS", 3, 600.0),
        recent(2, "precip_mm", "OBS", 30, 80.0),
    ])
    .await
    .unwrap();
    let app = app(repo);

    let (status, body) = send(&app, get("/map/points-kpi")).await;
    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    let p1 = items.iter().find(|i| i["code"] == "P1").unwrap();
    assert_eq!(p1["severity"], "VIGILANCE_PLUIE");
    assert_eq!(p1["precip_cum_24h_mm"], 25.0);

    let (_, body) = send(&app, get("/dashboard/top-critical?limit=1")).await;
    let top = body.as_array().unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["station_name"], "Al Wahda");
    assert_eq!(top[0]["severity"], "ALERTE_LACHER");

    let (_, body) = send(&app, get("/admin/data-availability")).await;
    assert_eq!(body["summary"]["total_stations"], 2);
    assert_eq!(body["summary"]["total_records"], 4);
    assert_eq!(
        body["stations"]["Barrage"]["variables"]["lacher_m3s"]["sources"]["OBS"]["record_count"],
        1
    );
}

#[tokio::test]
async fn test_ingestion_job_lifecycle() {
    let repo = seeded_repo().await;
    let app = app(repo);

    let (status, body) = send(
        &app,
        multipart_request(
            "/ingest/analyze",
            &[("type", "datatable")],
            "table.csv",
            b"date,P1\n01/02/2024 00:00,1\n",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = send(
        &app,
        multipart_request(
            "/ingest/execute",
            &[("type", "datatable"), ("source_code", "OBS")],
            "table.csv",
            b"date,P1\n01/02/2024 00:00,1\n01/02/2024 01:00,2\n",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "running");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let mut job = serde_json::Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&app, get(&format!("/ingest/jobs/{}", job_id))).await;
        assert_eq!(status, StatusCode::OK);
        job = body;
        if job["status"] != "running" {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"]["records"], 2);

    let (_, body) = send(&app, get("/ingest/history?limit=5")).await;
    assert_eq!(body[0]["status"], "SUCCESS");

    let (status, _) = send(&app, get("/ingest/jobs/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        multipart_request("/ingest/execute", &[("type", "shp")], "x.shp", b"abc"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Unknown file type: shp");
}

#[tokio::test]
async fn test_geo_dry_run() {
    let app = app(seeded_repo().await);
    let geojson = json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": { "code": "G1", "nom": "Oued Fès", "type": "pluviometre" },
            "geometry": { "type": "Point", "coordinates": [-5.0, 34.0] }
        }]
    });
    let (status, body) = send(
        &app,
        multipart_request(
            "/admin/geo/upload",
            &[("entity_type", "stations")],
            "posts.geojson",
            geojson.to_string().as_bytes(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Parsed 1 features from posts.geojson");
}

#[tokio::test]
async fn test_job_log_stream_ends_with_completion() {
    let app = app(seeded_repo().await);

    let (status, body) = send(
        &app,
        multipart_request(
            "/ingest/execute",
            &[("type", "datatable"), ("source_code", "OBS")],
            "table.csv",
            b"date,P1\n01/02/2024 00:00,1\n01/02/2024 01:00,2\n01/02/2024 02:00,3\n",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // the stream closes itself after the completion event
    let (status, headers, body) = tokio::time::timeout(
        StdDuration::from_secs(10),
        send_raw(&app, get(&format!("/ingest/jobs/{}/logs", job_id))),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("Reading table.csv (datatable)"));
    assert!(text.contains("Ingestion complete: 3 points"));
    assert!(text.contains("\"level\":\"success\""));

    let complete = text.find("event: complete").unwrap();
    assert!(text.find("Ingestion complete").unwrap() < complete);
    assert!(text[complete..].contains("\"status\":\"completed\""));
    assert!(text[complete..].contains("\"records\":3"));

    let (status, _) = send(&app, get("/ingest/jobs/unknown/logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_geo_commit_detects_type_column() {
    let app = app(seeded_repo().await);
    let geojson = json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "Code": "G1", "Nom": "Oued Fès", "Genre": "pluviometre" },
                "geometry": { "type": "Point", "coordinates": [-5.0, 34.0] }
            },
            {
                "type": "Feature",
                "properties": { "Code": "G2", "Nom": "Idriss 1er", "Genre": "BARRAGE" },
                "geometry": { "type": "Point", "coordinates": [-4.5, 34.1] }
            },
            {
                "type": "Feature",
                "properties": { "Code": "G3", "Nom": "Azzaba", "Genre": "Limnimétrique" },
                "geometry": null
            }
        ]
    });
    let (status, body) = send(
        &app,
        multipart_request(
            "/admin/geo/upload",
            &[("entity_type", "stations"), ("dry_run", "false")],
            "stations.geojson",
            geojson.to_string().as_bytes(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], 3);

    let (_, body) = send(&app, get("/admin/entities/stations")).await;
    let stations = body.as_array().unwrap();
    let by_code = |code: &str| {
        stations
            .iter()
            .find(|s| s["code"] == code)
            .cloned()
            .unwrap()
    };
    assert_eq!(by_code("G1")["type"], "Poste Pluviométrique");
    assert_eq!(by_code("G1")["lat"], 34.0);
    assert_eq!(by_code("G1")["lon"], -5.0);
    assert_eq!(by_code("G2")["type"], "Barrage");
    assert_eq!(by_code("G3")["type"], "Station hydrologique");
    assert!(by_code("G3")["lat"].is_null());
}
