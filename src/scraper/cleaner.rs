//! Cell-level parsing for the measurement table.
//!
//! Every helper takes the raw text of one `<td>` and either yields a typed
//! value or a [`RecordError`] naming the column that failed.

use chrono::NaiveDate;
use std::num::ParseFloatError;
use thiserror::Error;

/// Date layout used by the source page, e.g. `01.03.2024`.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Placeholder the source prints for a missing water level.
pub const NO_VALUE: &str = "-";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("row has {found} cells, column {index} ({column}) is missing")]
    MissingCell {
        index: usize,
        column: &'static str,
        found: usize,
    },

    #[error("column {column}: {value:?} is not a DD.MM.YYYY date")]
    InvalidDate {
        column: &'static str,
        value: String,
        /// `None` when the text is not even shaped like `DD.MM.YYYY`.
        #[source]
        source: Option<chrono::ParseError>,
    },

    #[error("column {column}: {value:?} is not a decimal number")]
    InvalidNumber {
        column: &'static str,
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("column {column}: {value:?} is not a coordinate")]
    InvalidCoordinate {
        column: &'static str,
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("column {column} is empty")]
    EmptyCell { column: &'static str },
}

/// Fetch the trimmed text of a cell by position.
pub fn cell<'a>(
    cells: &'a [String],
    index: usize,
    column: &'static str,
) -> Result<&'a str, RecordError> {
    cells
        .get(index)
        .map(|c| c.trim())
        .ok_or(RecordError::MissingCell {
            index,
            column,
            found: cells.len(),
        })
}

/// Text that must be present, e.g. an identifier.
pub fn parse_required_text(s: &str, column: &'static str) -> Result<String, RecordError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(RecordError::EmptyCell { column });
    }
    Ok(s.to_string())
}

/// Text that may be blank on the page; blank maps to `None`.
pub fn parse_optional_text(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// `DD.MM.YYYY` only. Anything else is an error.
///
/// chrono's `%d` and `%m` also accept a single digit, so the zero-padded
/// shape is checked first: "1.3.2024" is rejected.
pub fn parse_date(s: &str, column: &'static str) -> Result<NaiveDate, RecordError> {
    let s = s.trim();
    let invalid = |source| RecordError::InvalidDate {
        column,
        value: s.to_string(),
        source,
    };
    if !is_padded_date(s) {
        return Err(invalid(None));
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| invalid(Some(e)))
}

fn is_padded_date(s: &str) -> bool {
    s.len() == 10
        && s.bytes().enumerate().all(|(i, b)| match i {
            2 | 5 => b == b'.',
            _ => b.is_ascii_digit(),
        })
}

/// Comma-decimal water level. `"-"` → `Ok(None)`.
/// "12,34" → 12.34 | "-0,5" → -0.5 | "-" → None
pub fn parse_level(s: &str, column: &'static str) -> Result<Option<f64>, RecordError> {
    let s = s.trim();
    if s == NO_VALUE {
        return Ok(None);
    }
    let normalised = s.replace(',', ".");
    normalised
        .parse::<f64>()
        .map(Some)
        .map_err(|source| RecordError::InvalidNumber {
            column,
            value: s.to_string(),
            source,
        })
}

/// Latitude/longitude cell, dot-decimal as printed by the page.
pub fn parse_coordinate(s: &str, column: &'static str) -> Result<f64, RecordError> {
    let s = s.trim();
    s.parse::<f64>()
        .map_err(|source| RecordError::InvalidCoordinate {
            column,
            value: s.to_string(),
            source,
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
