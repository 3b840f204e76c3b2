//! Screenshot record model
//!
//! A record is one analyzed BMS screenshot. Its identity is the SHA-256 of the
//! image bytes; its only trusted time is the one parsed from the filename.
//! Every extracted reading is optional: `None` means "not extracted", never 0.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extractors::WeatherSample;
use crate::validators::PhysicsReport;

/// Trust classification of an extraction
///
/// Serialized as the single letters used in stored records and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationState {
    /// A: every core and expected field is present and valid (terminal)
    #[serde(rename = "A")]
    Complete,
    /// B: first attempt left fields missing; worth one more look
    #[serde(rename = "B")]
    PartialNeedsVerify,
    /// C: re-analysis confirmed the screenshot lacks the data (terminal)
    #[serde(rename = "C")]
    VerifiedIncomplete,
    /// D: attempts disagree
    #[serde(rename = "D")]
    Inconclusive,
}

impl VerificationState {
    /// Single-letter code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Complete => "A",
            Self::PartialNeedsVerify => "B",
            Self::VerifiedIncomplete => "C",
            Self::Inconclusive => "D",
        }
    }

    /// Parse a single-letter code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::Complete),
            "B" => Some(Self::PartialNeedsVerify),
            "C" => Some(Self::VerifiedIncomplete),
            "D" => Some(Self::Inconclusive),
            _ => None,
        }
    }

    /// States that are never re-analyzed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::VerifiedIncomplete)
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Named reading, used for completeness reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordField {
    Voltage,
    Current,
    Power,
    StateOfCharge,
    RemainingCapacity,
    FullCapacity,
    CycleCount,
    HighestCellVoltage,
    LowestCellVoltage,
    AverageCellVoltage,
    CellVoltageDifference,
    CellVoltages,
    Temperatures,
}

impl RecordField {
    /// Wire name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Current => "current",
            Self::Power => "power",
            Self::StateOfCharge => "stateOfCharge",
            Self::RemainingCapacity => "remainingCapacity",
            Self::FullCapacity => "fullCapacity",
            Self::CycleCount => "cycleCount",
            Self::HighestCellVoltage => "highestCellVoltage",
            Self::LowestCellVoltage => "lowestCellVoltage",
            Self::AverageCellVoltage => "averageCellVoltage",
            Self::CellVoltageDifference => "cellVoltageDifference",
            Self::CellVoltages => "cellVoltages",
            Self::Temperatures => "temperatures",
        }
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readings returned by the vision oracle
///
/// Deliberately carries no timestamp: time comes from the filename only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractedFields {
    /// Pack voltage (V)
    pub voltage: Option<f64>,
    /// Pack current (A); sign follows the device display
    pub current: Option<f64>,
    /// Pack power (W)
    pub power: Option<f64>,
    /// State of charge (%)
    pub state_of_charge: Option<f64>,
    /// Remaining capacity (Ah)
    pub remaining_capacity: Option<f64>,
    /// Full capacity (Ah)
    pub full_capacity: Option<f64>,
    pub cycle_count: Option<u32>,
    /// Highest cell voltage (V)
    pub highest_cell_voltage: Option<f64>,
    /// Lowest cell voltage (V)
    pub lowest_cell_voltage: Option<f64>,
    /// Average cell voltage (V)
    pub average_cell_voltage: Option<f64>,
    /// Highest minus lowest cell voltage (V)
    pub cell_voltage_difference: Option<f64>,
    /// Individual cell voltages (V)
    pub cell_voltages: Option<Vec<f64>>,
    /// Temperature sensor readings (°C)
    pub temperatures: Option<Vec<f64>>,
    /// MOS temperature (°C)
    pub mos_temperature: Option<f64>,
    /// Protection-circuit state, not a charge/discharge indicator
    pub charge_mos_on: Option<bool>,
    /// Protection-circuit state, not a charge/discharge indicator
    pub discharge_mos_on: Option<bool>,
    pub balancing_active: Option<bool>,
    pub device_name: Option<String>,
}

/// One analyzed screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub id: Uuid,
    /// Hex SHA-256 of the raw image bytes
    pub content_hash: String,
    pub file_name: String,
    /// Device-local wall-clock time parsed from the filename
    pub timestamp_from_filename: NaiveDateTime,
    pub fields: ExtractedFields,
    pub verification_state: Option<VerificationState>,
    pub analysis_count: u32,
    pub needs_reanalysis: bool,
    pub missing_fields: Vec<RecordField>,
    pub validation: PhysicsReport,
    pub fixes_applied: Vec<String>,
    pub weather: Option<WeatherSample>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScreenshotRecord {
    /// Create a record for a first extraction (analysis count 1, unverified)
    pub fn new(
        content_hash: String,
        file_name: String,
        timestamp_from_filename: NaiveDateTime,
        fields: ExtractedFields,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content_hash,
            file_name,
            timestamp_from_filename,
            fields,
            verification_state: None,
            analysis_count: 1,
            needs_reanalysis: false,
            missing_fields: Vec::new(),
            validation: PhysicsReport::default(),
            fixes_applied: Vec::new(),
            weather: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a re-analysis patch
    ///
    /// Identity and filename time are untouched; the analysis count never
    /// moves backwards.
    pub fn apply_update(&mut self, update: &RecordUpdate) {
        self.fields = update.fields.clone();
        self.verification_state = Some(update.verification_state);
        self.analysis_count = self.analysis_count.max(update.analysis_count);
        self.needs_reanalysis = update.needs_reanalysis;
        self.missing_fields = update.missing_fields.clone();
        self.validation = update.validation.clone();
        self.fixes_applied = update.fixes_applied.clone();
        if update.weather.is_some() {
            self.weather = update.weather.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Patch written when an existing record is re-analyzed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpdate {
    pub fields: ExtractedFields,
    pub verification_state: VerificationState,
    pub analysis_count: u32,
    pub needs_reanalysis: bool,
    pub missing_fields: Vec<RecordField>,
    pub validation: PhysicsReport,
    pub fixes_applied: Vec<String>,
    pub weather: Option<WeatherSample>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 26)
            .unwrap()
            .and_hms_opt(13, 9, 50)
            .unwrap()
    }

    #[test]
    fn test_state_codes_round_trip() {
        for state in [
            VerificationState::Complete,
            VerificationState::PartialNeedsVerify,
            VerificationState::VerifiedIncomplete,
            VerificationState::Inconclusive,
        ] {
            assert_eq!(VerificationState::from_code(state.code()), Some(state));
        }
        assert_eq!(VerificationState::from_code("E"), None);
        assert!(VerificationState::Complete.is_terminal());
        assert!(!VerificationState::Inconclusive.is_terminal());
    }

    #[test]
    fn test_fields_deserialize_from_camel_case_with_gaps() {
        let json = r#"{"voltage": 53.2, "stateOfCharge": 87, "cellVoltages": [3.32, 3.33]}"#;
        let fields: ExtractedFields = serde_json::from_str(json).unwrap();

        assert_eq!(fields.voltage, Some(53.2));
        assert_eq!(fields.state_of_charge, Some(87.0));
        assert_eq!(fields.cell_voltages, Some(vec![3.32, 3.33]));
        assert_eq!(fields.current, None);
        assert_eq!(fields.cycle_count, None);
    }

    #[test]
    fn test_apply_update_keeps_identity_and_time() {
        let mut record = ScreenshotRecord::new(
            "abc".to_string(),
            "Screenshot_20260126-130950.png".to_string(),
            timestamp(),
            ExtractedFields::default(),
        );
        record.analysis_count = 2;
        let id = record.id;

        let update = RecordUpdate {
            fields: ExtractedFields {
                voltage: Some(53.1),
                ..Default::default()
            },
            verification_state: VerificationState::Inconclusive,
            analysis_count: 1,
            needs_reanalysis: true,
            missing_fields: vec![RecordField::Power],
            validation: PhysicsReport::default(),
            fixes_applied: Vec::new(),
            weather: None,
        };
        record.apply_update(&update);

        assert_eq!(record.id, id);
        assert_eq!(record.content_hash, "abc");
        assert_eq!(record.timestamp_from_filename, timestamp());
        assert_eq!(record.analysis_count, 2);
        assert_eq!(record.fields.voltage, Some(53.1));
        assert_eq!(record.verification_state, Some(VerificationState::Inconclusive));
    }
}
