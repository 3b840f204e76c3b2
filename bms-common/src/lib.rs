//! # BMS Common Library
//!
//! Shared code for the BMS screenshot ingest crates:
//! - Error type
//! - Configuration loading and root folder resolution
//! - Progress event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
