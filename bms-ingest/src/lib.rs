//! bms-ingest library interface
//!
//! Verifies BMS (battery management system) screenshots and ingests them
//! into a deduplicated SQLite store.
//!
//! Exposes public APIs for the binary and for integration testing.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod models;
pub mod services;
pub mod utils;
pub mod validators;
pub mod workflow;

pub use crate::error::{IngestError, Result};
