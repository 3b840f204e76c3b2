//! Physics Validator
//!
//! Cross-checks the electrical readings of one extraction against physical
//! constraints to catch OCR and extraction errors.
//!
//! # Checks
//! 1. **Ohm's law**: `|V×I|` must match reported power within a relative tolerance
//! 2. **Cell topology**: `round(V / avgCell)` must be a canonical series count,
//!    and that count must reconstruct the pack voltage
//! 3. **Chemistry bounds**: cell voltages, cell spread, and state of charge
//! 4. **Current sign vs MOS status**: not checked. MOS on/off is the state of
//!    the protection circuit, not a charge/discharge indicator, so it must
//!    never be compared against the sign of the current.
//!
//! Errors make a report invalid; warnings never do. A report never blocks
//! persistence: it feeds the verification state machine as a plausibility
//! signal.
//!
//! The tolerances come from [`PhysicsPolicy`] rather than being hard-coded.
//! The defaults were tuned on LiFePO4 packs and are not assumed to hold for
//! every chemistry.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::ExtractedFields;

/// Series counts seen in real packs
pub const CANONICAL_SERIES_COUNTS: [u32; 11] = [4, 7, 8, 12, 14, 15, 16, 20, 24, 28, 32];

/// Configurable validation thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsPolicy {
    /// Maximum relative error between `|V×I|` and `|P|`
    pub ohm_tolerance: f64,
    /// Maximum difference between `S × avgCell` and pack voltage (V)
    pub topology_tolerance_volts: f64,
    /// Lowest plausible cell voltage (V)
    pub min_cell_voltage: f64,
    /// Highest plausible cell voltage (V)
    pub max_cell_voltage: f64,
    /// Largest plausible highest-minus-lowest cell spread (V)
    pub max_cell_spread: f64,
    /// Accepted series counts
    pub series_counts: Vec<u32>,
    /// Plausible temperature range (°C), warnings only
    pub min_temperature_c: f64,
    pub max_temperature_c: f64,
}

impl Default for PhysicsPolicy {
    fn default() -> Self {
        Self {
            ohm_tolerance: 0.10,
            topology_tolerance_volts: 1.0,
            min_cell_voltage: 2.0,
            max_cell_voltage: 4.0,
            max_cell_spread: 0.5,
            series_counts: CANONICAL_SERIES_COUNTS.to_vec(),
            min_temperature_c: -40.0,
            max_temperature_c: 100.0,
        }
    }
}

impl PhysicsPolicy {
    /// Whether a cell voltage lies in the chemistry bounds
    pub fn cell_voltage_in_range(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min_cell_voltage && value <= self.max_cell_voltage
    }

    /// Whether a state of charge is a valid percentage
    pub fn soc_in_range(&self, value: f64) -> bool {
        value.is_finite() && (0.0..=100.0).contains(&value)
    }

    /// Whether a temperature is plausible
    pub fn temperature_in_range(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min_temperature_c && value <= self.max_temperature_c
    }
}

/// Validation outcome for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsReport {
    /// `true` when no errors were found
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for PhysicsReport {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Average cell voltage: the reported field, else the mean of the cell array
pub fn average_cell_voltage(fields: &ExtractedFields) -> Option<f64> {
    if let Some(avg) = fields.average_cell_voltage {
        return Some(avg);
    }
    match &fields.cell_voltages {
        Some(cells) if !cells.is_empty() => Some(cells.iter().sum::<f64>() / cells.len() as f64),
        _ => None,
    }
}

/// Cell spread: highest−lowest, else array max−min, else the reported difference
pub fn cell_spread(fields: &ExtractedFields) -> Option<f64> {
    if let (Some(high), Some(low)) = (fields.highest_cell_voltage, fields.lowest_cell_voltage) {
        return Some(high - low);
    }
    if let Some(cells) = &fields.cell_voltages {
        if cells.len() >= 2 {
            let max = cells.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = cells.iter().copied().fold(f64::INFINITY, f64::min);
            return Some(max - min);
        }
    }
    fields.cell_voltage_difference
}

/// Physics Validator
pub struct PhysicsValidator {
    policy: PhysicsPolicy,
}

impl PhysicsValidator {
    /// Create validator with default policy
    pub fn new() -> Self {
        Self::with_policy(PhysicsPolicy::default())
    }

    /// Create validator with a custom policy
    pub fn with_policy(policy: PhysicsPolicy) -> Self {
        Self { policy }
    }

    /// Active policy
    pub fn policy(&self) -> &PhysicsPolicy {
        &self.policy
    }

    /// Validate one set of readings; never mutates, never fails
    pub fn validate(&self, fields: &ExtractedFields) -> PhysicsReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        self.check_ohms_law(fields, &mut errors);
        self.check_topology(fields, &mut errors, &mut warnings);
        self.check_chemistry(fields, &mut errors, &mut warnings);

        debug!(
            errors = errors.len(),
            warnings = warnings.len(),
            "Physics validation complete"
        );

        PhysicsReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn check_ohms_law(&self, fields: &ExtractedFields, errors: &mut Vec<String>) {
        let (Some(voltage), Some(current), Some(power)) = (fields.voltage, fields.current, fields.power) else {
            return;
        };

        let computed = (voltage * current).abs();
        let reported = power.abs();

        if reported == 0.0 {
            if computed > 1.0 {
                errors.push(format!(
                    "Ohm's law mismatch: V×I = {:.1} W but reported power is 0 W",
                    computed
                ));
            }
            return;
        }

        let relative_error = (computed - reported).abs() / reported;
        if relative_error > self.policy.ohm_tolerance {
            errors.push(format!(
                "Ohm's law mismatch: V×I = {:.1} W vs reported power {:.1} W ({:.1}% off)",
                computed,
                reported,
                relative_error * 100.0
            ));
        }
    }

    fn check_topology(&self, fields: &ExtractedFields, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
        let (Some(voltage), Some(avg_cell)) = (fields.voltage, average_cell_voltage(fields)) else {
            return;
        };
        if avg_cell <= 0.0 || !avg_cell.is_finite() || !voltage.is_finite() {
            return;
        }

        let ratio = voltage / avg_cell;
        let series = ratio.round();

        if series < 1.0 || !self.policy.series_counts.contains(&(series as u32)) {
            errors.push(format!(
                "Cell topology mismatch: V / avgCell = {:.2} gives {}S, not a canonical series count",
                ratio, series
            ));
            return;
        }

        let reconstructed = series * avg_cell;
        if (reconstructed - voltage).abs() > self.policy.topology_tolerance_volts {
            errors.push(format!(
                "Cell topology mismatch: {}S × {:.3} V = {:.2} V vs pack voltage {:.2} V",
                series, avg_cell, reconstructed, voltage
            ));
        }

        if let Some(cells) = &fields.cell_voltages {
            if !cells.is_empty() && cells.len() != series as usize {
                warnings.push(format!(
                    "Cell array has {} entries but pack voltage implies {}S",
                    cells.len(),
                    series
                ));
            }
        }
    }

    fn check_chemistry(&self, fields: &ExtractedFields, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
        let policy = &self.policy;

        let named = [
            ("Highest cell voltage", fields.highest_cell_voltage),
            ("Lowest cell voltage", fields.lowest_cell_voltage),
            ("Average cell voltage", fields.average_cell_voltage),
        ];
        for (name, value) in named {
            if let Some(value) = value {
                if !policy.cell_voltage_in_range(value) {
                    errors.push(format!(
                        "{} {:.3} V outside [{:.1}, {:.1}] V",
                        name, value, policy.min_cell_voltage, policy.max_cell_voltage
                    ));
                }
            }
        }

        if let Some(cells) = &fields.cell_voltages {
            let out_of_range: Vec<usize> = cells
                .iter()
                .enumerate()
                .filter(|(_, v)| !policy.cell_voltage_in_range(**v))
                .map(|(i, _)| i + 1)
                .collect();
            if !out_of_range.is_empty() {
                errors.push(format!(
                    "Cell voltages outside [{:.1}, {:.1}] V at cells {:?}",
                    policy.min_cell_voltage, policy.max_cell_voltage, out_of_range
                ));
            }
        }

        if let (Some(high), Some(low)) = (fields.highest_cell_voltage, fields.lowest_cell_voltage) {
            if high < low {
                errors.push(format!(
                    "Highest cell voltage {:.3} V is below lowest {:.3} V",
                    high, low
                ));
            }
        }

        if let Some(spread) = cell_spread(fields) {
            if spread > policy.max_cell_spread {
                errors.push(format!(
                    "Cell voltage spread {:.3} V exceeds {:.1} V",
                    spread, policy.max_cell_spread
                ));
            }
        }

        if let Some(soc) = fields.state_of_charge {
            if !policy.soc_in_range(soc) {
                errors.push(format!("State of charge {:.1}% outside [0, 100]%", soc));
            }
        }

        let temperatures = fields
            .temperatures
            .iter()
            .flatten()
            .copied()
            .chain(fields.mos_temperature);
        for temperature in temperatures {
            if !policy.temperature_in_range(temperature) {
                warnings.push(format!("Implausible temperature {:.1} °C", temperature));
            }
        }

        if let (Some(remaining), Some(full)) = (fields.remaining_capacity, fields.full_capacity) {
            if remaining > full {
                warnings.push(format!(
                    "Remaining capacity {:.1} Ah exceeds full capacity {:.1} Ah",
                    remaining, full
                ));
            }
        }
    }
}

impl Default for PhysicsValidator {
    fn default() -> Self {
        Self::new()
    }
}
