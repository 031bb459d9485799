//! Tests for db::factory and db::repo_config - choosing and configuring the store.

mod support;

use std::io::Write;
use std::str::FromStr;

use hydro_sentinel::config::Settings;
use hydro_sentinel::db::factory::{RepositoryBuilder, RepositoryFactory, RepositoryType};
use hydro_sentinel::db::repository::{ReferenceRepository, StationRepository};
use hydro_sentinel::db::RepositoryConfig;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_repository_type_from_str() {
    assert_eq!(
        RepositoryType::from_str("postgres").unwrap(),
        RepositoryType::Postgres
    );
    assert_eq!(RepositoryType::from_str("PG").unwrap(), RepositoryType::Postgres);
    assert_eq!(RepositoryType::from_str("LOCAL").unwrap(), RepositoryType::Local);

    let err = RepositoryType::from_str("timescale").unwrap_err();
    assert!(err.contains("Unknown repository type"));
}

#[test]
fn test_repository_type_from_env_default() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", None),
            ("DATABASE_URL", None),
            ("PG_DATABASE_URL", None),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Local),
    );
}

#[test]
fn test_repository_type_from_env_with_database_url() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", None),
            ("DATABASE_URL", Some("postgres://localhost/hydro")),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Postgres),
    );
}

#[test]
fn test_repository_type_explicit_wins_over_url() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", Some("local")),
            ("DATABASE_URL", Some("postgres://localhost/hydro")),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Local),
    );
}

#[test]
fn test_repository_type_invalid_defaults_to_local() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", Some("invalid")),
            ("DATABASE_URL", None),
            ("PG_DATABASE_URL", None),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Local),
    );
}

#[tokio::test]
async fn test_local_repository_is_seeded() {
    let repo = RepositoryFactory::create(RepositoryType::Local, None)
        .await
        .unwrap();
    assert!(repo.health_check().await.unwrap());
    assert!(repo.get_source("ABHS_RES").await.unwrap().is_some());
    assert!(repo.get_variable("precip_mm").await.unwrap().is_some());
    assert!(repo.list_stations(0, 10).await.unwrap().is_empty());
}

#[cfg(feature = "postgres-repo")]
#[tokio::test]
async fn test_create_postgres_without_config_fails() {
    let result = RepositoryFactory::create(RepositoryType::Postgres, None).await;
    let err = result.err().unwrap();
    assert!(err.to_string().contains("requires PostgresConfig"));
}

#[cfg(not(feature = "postgres-repo"))]
#[tokio::test]
async fn test_create_postgres_without_feature_fails() {
    let result = RepositoryFactory::create(RepositoryType::Postgres, None).await;
    let err = result.err().unwrap();
    assert!(err.to_string().contains("feature not enabled"));
}

#[test]
fn test_config_file_local() {
    let file = write_config("[repository]\ntype = \"local\"\n");
    let config = RepositoryConfig::from_file(file.path()).unwrap();
    assert_eq!(config.repository_type().unwrap(), RepositoryType::Local);
    assert!(config.to_postgres_config().unwrap().is_none());
    assert_eq!(config.postgres.max_connections, 10);
}

#[test]
fn test_config_file_errors() {
    let missing = RepositoryConfig::from_file("/nonexistent/repository.toml");
    assert!(missing
        .unwrap_err()
        .to_string()
        .contains("Failed to read config file"));

    let file = write_config("[repository\ntype = ");
    let broken = RepositoryConfig::from_file(file.path());
    assert!(broken
        .unwrap_err()
        .to_string()
        .contains("Failed to parse config file"));
}

#[tokio::test]
async fn test_factory_from_config_file() {
    let file = write_config("[repository]\ntype = \"local\"\n");
    let repo = RepositoryFactory::from_config_file(file.path()).await.unwrap();
    assert!(repo.health_check().await.unwrap());

    let built = RepositoryBuilder::new()
        .repository_type(RepositoryType::Local)
        .build()
        .await
        .unwrap();
    assert!(built.list_stations(0, 1).await.unwrap().is_empty());
}

#[test]
fn test_settings_from_env() {
    support::with_scoped_env(
        &[
            ("PORT", Some("9000")),
            ("API_PREFIX", Some("api/v2/")),
            ("BACKEND_CORS_ORIGINS", Some("[\"https://hydro.example.ma\"]")),
        ],
        || {
            let settings = Settings::from_env().unwrap();
            assert_eq!(settings.port, 9000);
            assert_eq!(settings.api_prefix, "/api/v2");
            assert_eq!(settings.cors_origins, vec!["https://hydro.example.ma"]);
        },
    );
}

#[test]
fn test_settings_rejects_bad_port() {
    support::with_scoped_env(&[("PORT", Some("eighty"))], || {
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("PORT"));
    });
}
