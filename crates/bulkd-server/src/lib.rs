//! bulkd server library
//!
//! Asynchronous bulk import/export service for tabular datasets (users,
//! articles, comments) backed by PostgreSQL.
//!
//! # Overview
//!
//! - **Ingest**: a two-pass, staged, batch-oriented import pipeline that
//!   parses CSV/NDJSON input, validates every row independently, detects
//!   duplicates and foreign-key violations with set-based SQL over a
//!   per-job staging relation, and promotes survivors via batch UPSERT.
//! - **Export**: forward-only cursor streaming to NDJSON or a JSON array.
//! - **Jobs**: an async job API with a bounded worker pool, progress
//!   counters, an error journal, and idempotency keys.
//!
//! # Framework stack
//!
//! - **Axum** for the HTTP surface
//! - **SQLx** for PostgreSQL access and migrations
//! - **Tokio** bounded channels for the worker pool

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod models;
pub mod repos;
pub mod worker;

pub use error::{AppError, AppResult};
