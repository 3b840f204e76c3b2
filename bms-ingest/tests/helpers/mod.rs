//! Test Helper Utilities
//!
//! Shared utilities for testing bms-ingest

#![allow(dead_code)]

pub mod fixtures;
pub mod memory_repository;
pub mod mock_vision;

pub use fixtures::{complete_fields, create_test_db, partial_fields, screenshot_name, write_zip};
pub use memory_repository::InMemoryRepository;
pub use mock_vision::{Scripted, ScriptedVision};
