//! Filename timestamp authority
//!
//! The only trusted reading time is the one encoded in the screenshot's
//! filename: `Screenshot_YYYYMMDD-HHMMSS.<ext>`. No other naming convention,
//! file metadata, upload time, or oracle-inferred time is ever used.
//!
//! The parsed value is device-local wall-clock time and is returned as a
//! `NaiveDateTime`: it is never shifted to UTC and never tagged with an offset.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Required filename prefix
const PREFIX: &str = "Screenshot_";

/// Accepted year range (inclusive)
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 2000..=2100;

/// Timestamp extraction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// Filename does not match `Screenshot_YYYYMMDD-HHMMSS.<ext>` or carries an
    /// out-of-range component
    #[error("Invalid filename format '{file_name}': {detail}")]
    InvalidFilenameFormat { file_name: String, detail: String },
}

impl TimeError {
    fn invalid(file_name: &str, detail: impl Into<String>) -> Self {
        Self::InvalidFilenameFormat {
            file_name: file_name.to_string(),
            detail: detail.into(),
        }
    }
}

/// Extract the authoritative local timestamp from a filename
///
/// Directory components (`/` or `\` separated, as found inside ZIP
/// containers) are ignored; only the base name is examined.
pub fn extract_timestamp(file_name: &str) -> Result<NaiveDateTime, TimeError> {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);

    let rest = base
        .strip_prefix(PREFIX)
        .ok_or_else(|| TimeError::invalid(file_name, "missing 'Screenshot_' prefix"))?;

    let (stem, extension) = rest
        .split_once('.')
        .ok_or_else(|| TimeError::invalid(file_name, "missing file extension"))?;

    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TimeError::invalid(file_name, "invalid file extension"));
    }

    let (date_part, time_part) = stem
        .split_once('-')
        .ok_or_else(|| TimeError::invalid(file_name, "expected YYYYMMDD-HHMMSS"))?;

    if date_part.len() != 8 || time_part.len() != 6 {
        return Err(TimeError::invalid(file_name, "expected YYYYMMDD-HHMMSS"));
    }
    // Byte slicing below relies on every character being a single ASCII digit
    if !date_part.bytes().chain(time_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(TimeError::invalid(file_name, "timestamp contains non-digit characters"));
    }

    let year = parse_digits(file_name, &date_part[0..4], "year")?;
    let month = parse_digits(file_name, &date_part[4..6], "month")?;
    let day = parse_digits(file_name, &date_part[6..8], "day")?;
    let hour = parse_digits(file_name, &time_part[0..2], "hour")?;
    let minute = parse_digits(file_name, &time_part[2..4], "minute")?;
    let second = parse_digits(file_name, &time_part[4..6], "second")?;

    let year = year as i32;
    if !YEAR_RANGE.contains(&year) {
        return Err(TimeError::invalid(file_name, format!("year {} out of range", year)));
    }
    check_range(file_name, "month", month, 1, 12)?;
    check_range(file_name, "day", day, 1, 31)?;
    check_range(file_name, "hour", hour, 0, 23)?;
    check_range(file_name, "minute", minute, 0, 59)?;
    check_range(file_name, "second", second, 0, 59)?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or_else(|| TimeError::invalid(file_name, "date does not exist in the calendar"))
}

/// Whether a filename would be accepted
pub fn is_valid_filename(file_name: &str) -> bool {
    extract_timestamp(file_name).is_ok()
}

fn parse_digits(file_name: &str, digits: &str, component: &str) -> Result<u32, TimeError> {
    digits
        .parse::<u32>()
        .map_err(|_| TimeError::invalid(file_name, format!("{} '{}' is not numeric", component, digits)))
}

fn check_range(file_name: &str, component: &str, value: u32, min: u32, max: u32) -> Result<(), TimeError> {
    if value < min || value > max {
        return Err(TimeError::invalid(
            file_name,
            format!("{} {} out of range {}-{}", component, value, min, max),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_valid_filename_parses_local_time() {
        let ts = extract_timestamp("Screenshot_20260126-130950.png").unwrap();
        assert_eq!(ts.year(), 2026);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 26);
        assert_eq!(ts.hour(), 13);
        assert_eq!(ts.minute(), 9);
        assert_eq!(ts.second(), 50);
        assert_eq!(ts.to_string(), "2026-01-26 13:09:50");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let name = "Screenshot_20251231-235959.jpg";
        let first = extract_timestamp(name).unwrap();
        for _ in 0..10 {
            assert_eq!(extract_timestamp(name).unwrap(), first);
        }
    }

    #[test]
    fn test_directory_components_are_ignored() {
        let nested = extract_timestamp("batch/january/Screenshot_20260126-130950.png").unwrap();
        let windows = extract_timestamp("batch\\Screenshot_20260126-130950.png").unwrap();
        let plain = extract_timestamp("Screenshot_20260126-130950.png").unwrap();
        assert_eq!(nested, plain);
        assert_eq!(windows, plain);
    }

    #[test]
    fn test_other_naming_conventions_rejected() {
        let names = [
            "IMG_001.png",
            "screenshot_20260126-130950.png",
            "Screenshot_2026-01-26_13-09-50.png",
            "Screenshot_20260126_130950.png",
            "Screenshot_20260126-130950",
            "Screenshot_20260126-130950.",
            "Screenshot_20260126-13095.png",
            "Screenshot_2026012a-130950.png",
            "Screenshot_20260126-130950.png.bak",
            "Screenshot_20260126-130950 (1).png",
            "",
        ];
        for name in names {
            assert!(
                matches!(extract_timestamp(name), Err(TimeError::InvalidFilenameFormat { .. })),
                "expected rejection for {:?}",
                name
            );
        }
    }

    #[test]
    fn test_signed_or_padded_digits_rejected() {
        // u32 parsing alone would accept a leading '+'
        for name in ["Screenshot_+2026012-130950.png", "Screenshot_20260126-+30950.png", "Screenshot_2026 126-130950.png"] {
            match extract_timestamp(name) {
                Err(TimeError::InvalidFilenameFormat { detail, .. }) => {
                    assert_eq!(detail, "timestamp contains non-digit characters", "{}", name)
                }
                other => panic!("Expected rejection for {:?}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_out_of_range_components_rejected() {
        let names = [
            "Screenshot_19991231-120000.png",
            "Screenshot_21010101-120000.png",
            "Screenshot_20261301-120000.png",
            "Screenshot_20260001-120000.png",
            "Screenshot_20260100-120000.png",
            "Screenshot_20260132-120000.png",
            "Screenshot_20260126-240000.png",
            "Screenshot_20260126-126000.png",
            "Screenshot_20260126-120060.png",
            "Screenshot_20260230-120000.png",
        ];
        for name in names {
            assert!(!is_valid_filename(name), "expected rejection for {}", name);
        }
    }

    #[test]
    fn test_range_boundaries_accepted() {
        assert!(is_valid_filename("Screenshot_20000101-000000.png"));
        assert!(is_valid_filename("Screenshot_21001231-235959.webp"));
        assert!(is_valid_filename("Screenshot_20240229-120000.jpeg"));
    }

    #[test]
    fn test_error_names_the_file() {
        let err = extract_timestamp("IMG_001.png").unwrap_err();
        assert!(err.to_string().contains("IMG_001.png"));
    }
}
