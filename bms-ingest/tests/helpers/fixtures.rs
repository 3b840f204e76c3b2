//! Readings and file fixtures

use bms_ingest::db::{init_database_pool, SqliteRecordRepository};
use bms_ingest::models::ExtractedFields;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Valid screenshot name for the given minute offset after 13:00 on 2026-01-26
pub fn screenshot_name(minute: u32) -> String {
    format!("Screenshot_20260126-13{:02}00.png", minute)
}

/// A 16S LiFePO4 reading with every core and expected field present
pub fn complete_fields() -> ExtractedFields {
    ExtractedFields {
        voltage: Some(53.12),
        current: Some(-10.0),
        power: Some(531.2),
        state_of_charge: Some(87.0),
        remaining_capacity: Some(243.6),
        full_capacity: Some(280.0),
        cycle_count: Some(112),
        highest_cell_voltage: Some(3.33),
        lowest_cell_voltage: Some(3.31),
        cell_voltage_difference: Some(0.02),
        temperatures: Some(vec![18.0, 19.5]),
        mos_temperature: Some(24.0),
        ..Default::default()
    }
}

/// Core readings only; cell and capacity panels not visible
pub fn partial_fields() -> ExtractedFields {
    ExtractedFields {
        voltage: Some(53.12),
        current: Some(-10.0),
        power: Some(531.2),
        state_of_charge: Some(87.0),
        ..Default::default()
    }
}

/// File-backed SQLite repository in a temp dir
pub async fn create_test_db() -> (TempDir, SqliteRecordRepository) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database_pool(&temp_dir.path().join("bms-ingest.db"))
        .await
        .unwrap();
    (temp_dir, SqliteRecordRepository::new(pool, 5000))
}

/// Write a stored ZIP with the given entries
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}
