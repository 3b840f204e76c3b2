//! Sanity Fixer
//!
//! Repairs the unit and decimal-point slips a vision oracle makes when reading
//! BMS screens, then nulls whatever is still physically impossible.
//!
//! **Algorithm:**
//! 1. `attempt_fix`: rescale cell-voltage-like values that were read in mV
//!    (`÷1000`) or with a dropped decimal point (`÷10`), and a cell difference
//!    read in mV. Idempotent: a fixed value never matches a rule again.
//! 2. `apply_sanity_fixes`: set impossible values to `None`. Values are
//!    removed, never invented.

use tracing::debug;

use super::physics_validator::PhysicsPolicy;
use crate::models::ExtractedFields;

/// Largest plausible cell difference (V) after fixing
const MAX_CELL_DIFFERENCE: f64 = 1.0;

/// Result of a fix pass
#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    /// Fields after the pass
    pub fixed: ExtractedFields,
    /// Human-readable description of each change
    pub fixes: Vec<String>,
}

impl FixOutcome {
    /// Whether the pass changed anything
    pub fn changed(&self) -> bool {
        !self.fixes.is_empty()
    }
}

/// Sanity Fixer
pub struct SanityFixer {
    policy: PhysicsPolicy,
}

impl SanityFixer {
    /// Create fixer with default bounds
    pub fn new() -> Self {
        Self::with_policy(PhysicsPolicy::default())
    }

    /// Create fixer sharing the validator's bounds
    pub fn with_policy(policy: PhysicsPolicy) -> Self {
        Self { policy }
    }

    /// Rescale misread cell voltages and cell difference
    pub fn attempt_fix(&self, fields: &ExtractedFields) -> FixOutcome {
        let mut fixed = fields.clone();
        let mut fixes = Vec::new();

        for (name, slot) in [
            ("highestCellVoltage", &mut fixed.highest_cell_voltage),
            ("lowestCellVoltage", &mut fixed.lowest_cell_voltage),
            ("averageCellVoltage", &mut fixed.average_cell_voltage),
        ] {
            if let Some(value) = *slot {
                if let Some((repaired, rule)) = self.rescale_cell_voltage(value) {
                    fixes.push(format!("{}: {} → {} ({})", name, value, repaired, rule));
                    *slot = Some(repaired);
                }
            }
        }

        if let Some(cells) = fixed.cell_voltages.as_mut() {
            for (index, cell) in cells.iter_mut().enumerate() {
                if let Some((repaired, rule)) = self.rescale_cell_voltage(*cell) {
                    fixes.push(format!("cellVoltages[{}]: {} → {} ({})", index, cell, repaired, rule));
                    *cell = repaired;
                }
            }
        }

        if let Some(diff) = fixed.cell_voltage_difference {
            if diff > 1.0 && diff < 500.0 {
                let repaired = diff / 1000.0;
                fixes.push(format!("cellVoltageDifference: {} → {} (mV → V)", diff, repaired));
                fixed.cell_voltage_difference = Some(repaired);
            }
        }

        if !fixes.is_empty() {
            debug!(count = fixes.len(), "Applied unit/decimal fixes");
        }

        FixOutcome { fixed, fixes }
    }

    /// Null every value that is still physically impossible
    pub fn apply_sanity_fixes(&self, fields: &ExtractedFields) -> FixOutcome {
        let policy = &self.policy;
        let mut fixed = fields.clone();
        let mut fixes = Vec::new();

        if let Some(soc) = fixed.state_of_charge {
            if !policy.soc_in_range(soc) {
                fixes.push(format!("stateOfCharge nulled ({} outside 0-100)", soc));
                fixed.state_of_charge = None;
            }
        }

        if let (Some(high), Some(low)) = (fixed.highest_cell_voltage, fixed.lowest_cell_voltage) {
            if high < low {
                fixes.push(format!(
                    "highestCellVoltage and lowestCellVoltage nulled ({} < {})",
                    high, low
                ));
                fixed.highest_cell_voltage = None;
                fixed.lowest_cell_voltage = None;
            }
        }

        for (name, slot) in [
            ("highestCellVoltage", &mut fixed.highest_cell_voltage),
            ("lowestCellVoltage", &mut fixed.lowest_cell_voltage),
            ("averageCellVoltage", &mut fixed.average_cell_voltage),
        ] {
            if let Some(value) = *slot {
                if !policy.cell_voltage_in_range(value) {
                    fixes.push(format!(
                        "{} nulled ({} outside {}-{} V)",
                        name, value, policy.min_cell_voltage, policy.max_cell_voltage
                    ));
                    *slot = None;
                }
            }
        }

        if let Some(cells) = &fixed.cell_voltages {
            if cells.iter().any(|v| !policy.cell_voltage_in_range(*v)) {
                fixes.push(format!(
                    "cellVoltages nulled (entry outside {}-{} V)",
                    policy.min_cell_voltage, policy.max_cell_voltage
                ));
                fixed.cell_voltages = None;
            }
        }

        if let Some(diff) = fixed.cell_voltage_difference {
            if !(0.0..=MAX_CELL_DIFFERENCE).contains(&diff) {
                fixes.push(format!("cellVoltageDifference nulled ({} V)", diff));
                fixed.cell_voltage_difference = None;
            }
        }

        if let Some(voltage) = fixed.voltage {
            if voltage <= 0.0 || !voltage.is_finite() {
                fixes.push(format!("voltage nulled ({} V)", voltage));
                fixed.voltage = None;
            }
        }

        if let (Some(remaining), Some(full)) = (fixed.remaining_capacity, fixed.full_capacity) {
            if remaining > full {
                fixes.push(format!(
                    "remainingCapacity nulled ({} Ah above full {} Ah)",
                    remaining, full
                ));
                fixed.remaining_capacity = None;
            }
        }

        if !fixes.is_empty() {
            debug!(count = fixes.len(), "Nulled physically impossible values");
        }

        FixOutcome { fixed, fixes }
    }

    /// Run both passes, concatenating their fix lists
    pub fn fix_all(&self, fields: &ExtractedFields) -> FixOutcome {
        let rescaled = self.attempt_fix(fields);
        let nulled = self.apply_sanity_fixes(&rescaled.fixed);
        let mut fixes = rescaled.fixes;
        fixes.extend(nulled.fixes);
        FixOutcome {
            fixed: nulled.fixed,
            fixes,
        }
    }

    fn rescale_cell_voltage(&self, value: f64) -> Option<(f64, &'static str)> {
        if value >= 1000.0 {
            let repaired = value / 1000.0;
            if self.policy.cell_voltage_in_range(repaired) {
                return Some((repaired, "mV → V"));
            }
        }
        if (20.0..=400.0).contains(&value) {
            let repaired = value / 10.0;
            if self.policy.cell_voltage_in_range(repaired) {
                return Some((repaired, "decimal shift"));
            }
        }
        None
    }
}

impl Default for SanityFixer {
    fn default() -> Self {
        Self::new()
    }
}
