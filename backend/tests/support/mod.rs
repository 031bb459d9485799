#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use hydro_sentinel::api::NewStation;
use hydro_sentinel::db::repositories::LocalRepository;
use hydro_sentinel::db::repository::StationRepository;

#[cfg(feature = "http-server")]
pub mod http;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// This is panic-safe (restores variables on unwind) and also serializes access to
/// process-global env vars to avoid flaky tests when Rust runs tests in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

/// Repository with a rain post (`P1`) and a dam (`AW`), both located.
pub async fn seeded_repo() -> Arc<LocalRepository> {
    let repo = Arc::new(LocalRepository::new());
    repo.create_station(&NewStation {
        code: "P1".into(),
        name: "Fès Saiss".into(),
        lat: Some(34.03),
        lon: Some(-5.0),
        station_type: Some("Poste Pluviométrique".into()),
        ..Default::default()
    })
    .await
    .unwrap();
    repo.create_station(&NewStation {
        code: "AW".into(),
        name: "Al Wahda".into(),
        lat: Some(34.6),
        lon: Some(-5.3),
        station_type: Some("Barrage".into()),
        ..Default::default()
    })
    .await
    .unwrap();
    repo
}
