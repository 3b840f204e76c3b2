//! Verification State Machine
//!
//! Decides, without human review, how far an extraction can be trusted.
//!
//! | Completeness | analysis count | previous state | → state |
//! |--------------|----------------|----------------|---------|
//! | complete     | any            | any            | A       |
//! | incomplete   | ≤ 1            | any            | B       |
//! | incomplete   | ≥ 2            | B or D         | C       |
//! | incomplete   | ≥ 2            | other / none   | D       |
//!
//! A record is never C without having been B or D first: "confirmed
//! incomplete" requires a second look that agreed the data is missing.
//!
//! Re-analysis policy: A and C are terminal; B, D and legacy (no state)
//! records are retried until [`MAX_ANALYSIS_ATTEMPTS`] extractions exist.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::physics_validator::PhysicsPolicy;
use crate::models::{ExtractedFields, RecordField, ScreenshotRecord, VerificationState};

/// Maximum vision extractions per image
pub const MAX_ANALYSIS_ATTEMPTS: u32 = 3;

/// Readings a record cannot be trusted without
pub const CORE_FIELDS: [RecordField; 4] = [
    RecordField::Voltage,
    RecordField::Current,
    RecordField::Power,
    RecordField::StateOfCharge,
];

/// Readings every supported BMS screen shows
pub const EXPECTED_FIELDS: [RecordField; 6] = [
    RecordField::HighestCellVoltage,
    RecordField::LowestCellVoltage,
    RecordField::CellVoltageDifference,
    RecordField::CycleCount,
    RecordField::RemainingCapacity,
    RecordField::Temperatures,
];

/// Outcome of [`VerificationStateMachine::determine_state`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDecision {
    pub state: VerificationState,
    /// Core and expected fields that are absent or invalid
    pub missing_fields: Vec<RecordField>,
    pub reason: String,
}

/// Outcome of [`should_reanalyze`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReanalysisDecision {
    pub should: bool,
    pub reason: String,
}

/// Verification State Machine
pub struct VerificationStateMachine {
    policy: PhysicsPolicy,
}

impl VerificationStateMachine {
    /// Create state machine with default validity bounds
    pub fn new() -> Self {
        Self::with_policy(PhysicsPolicy::default())
    }

    /// Create state machine sharing the validator's bounds
    pub fn with_policy(policy: PhysicsPolicy) -> Self {
        Self { policy }
    }

    /// Fields from [`CORE_FIELDS`] and [`EXPECTED_FIELDS`] that are absent or invalid
    pub fn missing_fields(&self, fields: &ExtractedFields) -> Vec<RecordField> {
        CORE_FIELDS
            .iter()
            .chain(EXPECTED_FIELDS.iter())
            .copied()
            .filter(|field| !self.field_is_valid(fields, *field))
            .collect()
    }

    /// Classify an extraction
    ///
    /// `analysis_count` is the number of extractions including this one;
    /// `previous` is the state stored before this extraction (None for a new
    /// image or a legacy record).
    pub fn determine_state(
        &self,
        fields: &ExtractedFields,
        previous: Option<VerificationState>,
        analysis_count: u32,
    ) -> StateDecision {
        let missing_fields = self.missing_fields(fields);

        let (state, reason) = if missing_fields.is_empty() {
            (
                VerificationState::Complete,
                "All core and expected fields present and valid".to_string(),
            )
        } else if analysis_count <= 1 {
            (
                VerificationState::PartialNeedsVerify,
                format!(
                    "First extraction missing {} field(s); needs verification",
                    missing_fields.len()
                ),
            )
        } else {
            match previous {
                Some(VerificationState::PartialNeedsVerify) | Some(VerificationState::Inconclusive) => (
                    VerificationState::VerifiedIncomplete,
                    format!(
                        "Extraction {} confirmed {} field(s) missing from the screenshot",
                        analysis_count,
                        missing_fields.len()
                    ),
                ),
                other => (
                    VerificationState::Inconclusive,
                    format!(
                        "Extraction {} incomplete after previous state {}",
                        analysis_count,
                        other.map(|s| s.code()).unwrap_or("none")
                    ),
                ),
            }
        };

        debug!(
            state = %state,
            analysis_count,
            missing = missing_fields.len(),
            "Determined verification state"
        );

        StateDecision {
            state,
            missing_fields,
            reason,
        }
    }

    fn field_is_valid(&self, fields: &ExtractedFields, field: RecordField) -> bool {
        let policy = &self.policy;
        match field {
            RecordField::Voltage => fields.voltage.map_or(false, |v| v.is_finite() && v > 0.0),
            RecordField::Current => fields.current.map_or(false, f64::is_finite),
            RecordField::Power => fields.power.map_or(false, f64::is_finite),
            RecordField::StateOfCharge => fields.state_of_charge.map_or(false, |v| policy.soc_in_range(v)),
            RecordField::RemainingCapacity => fields
                .remaining_capacity
                .map_or(false, |v| v.is_finite() && v >= 0.0),
            RecordField::FullCapacity => fields.full_capacity.map_or(false, |v| v.is_finite() && v > 0.0),
            RecordField::CycleCount => fields.cycle_count.is_some(),
            RecordField::HighestCellVoltage => fields
                .highest_cell_voltage
                .map_or(false, |v| policy.cell_voltage_in_range(v)),
            RecordField::LowestCellVoltage => fields
                .lowest_cell_voltage
                .map_or(false, |v| policy.cell_voltage_in_range(v)),
            RecordField::AverageCellVoltage => fields
                .average_cell_voltage
                .map_or(false, |v| policy.cell_voltage_in_range(v)),
            RecordField::CellVoltageDifference => fields
                .cell_voltage_difference
                .map_or(false, |v| v.is_finite() && v >= 0.0 && v <= policy.max_cell_spread),
            RecordField::CellVoltages => fields.cell_voltages.as_ref().map_or(false, |cells| {
                !cells.is_empty() && cells.iter().all(|v| policy.cell_voltage_in_range(*v))
            }),
            RecordField::Temperatures => fields.temperatures.as_ref().map_or(false, |temps| {
                !temps.is_empty() && temps.iter().all(|t| policy.temperature_in_range(*t))
            }),
        }
    }
}

impl Default for VerificationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a stored record should get another extraction
pub fn should_reanalyze(record: &ScreenshotRecord) -> ReanalysisDecision {
    let count = record.analysis_count;
    let remaining = count < MAX_ANALYSIS_ATTEMPTS;

    let (should, reason) = match record.verification_state {
        Some(VerificationState::Complete) => (false, "Complete (A): all fields verified".to_string()),
        Some(VerificationState::VerifiedIncomplete) => (
            false,
            "Verified incomplete (C): data confirmed absent from screenshot".to_string(),
        ),
        Some(state) if remaining => (
            true,
            format!("State {} after {} of {} attempts", state, count, MAX_ANALYSIS_ATTEMPTS),
        ),
        None if remaining => (
            true,
            format!("Unverified record after {} of {} attempts", count, MAX_ANALYSIS_ATTEMPTS),
        ),
        _ => (false, format!("Maximum of {} attempts reached", MAX_ANALYSIS_ATTEMPTS)),
    };

    ReanalysisDecision { should, reason }
}
