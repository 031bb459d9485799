//! # Hydro Sentinel backend
//!
//! Monitoring backend for a river basin: stations, dams and sub-basins, the
//! hydrological time series measured or forecast on them, and the imports that
//! feed those series from spreadsheets.
//!
//! ## Architecture
//!
//! - [`api`]: domain types shared by the repositories, services and HTTP layer
//! - [`db`]: repository traits, the PostgreSQL and in-memory implementations
//! - [`services`]: indicators, availability, imports, templates and job tracking
//! - [`prepare`]: reshaping of raw exports into import templates (`hydro-prepare`)
//! - [`config`]: server settings from the environment
//! - [`http`]: axum router and handlers (`hydro-server`)

// RepositoryError carries a rich context
#![allow(clippy::result_large_err)]

pub mod api;
pub mod config;
pub mod db;
pub mod prepare;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;
