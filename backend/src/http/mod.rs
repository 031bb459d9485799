//! HTTP server module for the Hydro Sentinel backend.
//!
//! This module provides an axum-based HTTP server that exposes the dashboard
//! and administration API. Handlers stay thin: they parse the request and call
//! the service layer, which works against any [`FullRepository`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  HTTP Layer (axum handlers)                               │
//! │  - Query strings, JSON bodies, multipart uploads          │
//! │  - CORS, compression, request tracing, error mapping      │
//! │  - SSE streaming of ingestion job logs                    │
//! └───────────────────┬──────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────────────┐
//! │  Service Layer (services/, db::services)                  │
//! │  - KPI, availability, imports, templates, ingestion jobs  │
//! └───────────────────┬──────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────────────┐
//! │  Repository Layer (db/)                                   │
//! │  - LocalRepository / PostgresRepository                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! [`FullRepository`]: crate::db::repository::FullRepository

#[cfg(feature = "http-server")]
pub mod handlers;

#[cfg(feature = "http-server")]
pub mod router;

#[cfg(feature = "http-server")]
pub mod state;

#[cfg(feature = "http-server")]
pub mod error;

#[cfg(feature = "http-server")]
pub mod dto;

#[cfg(feature = "http-server")]
pub use router::create_router;

#[cfg(feature = "http-server")]
pub use state::AppState;
