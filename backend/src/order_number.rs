//! Human-readable order numbers: `PREFIX-YYYYMMDD-NNNN`.
//!
//! The sequence part comes from a per-day counter that the repository increments
//! atomically, so two orders never share a number even under concurrent checkout.

use chrono::NaiveDate;

const DATE_FORMAT: &str = "%Y%m%d";

/// Formats an order number. Sequences above 9999 simply widen.
pub fn format_order_number(prefix: &str, day: NaiveDate, sequence: i64) -> String {
    format!("{}-{}-{:04}", prefix, day.format(DATE_FORMAT), sequence)
}

/// The parts of a well-formed order number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOrderNumber {
    pub prefix: String,
    pub day: NaiveDate,
    pub sequence: i64,
}

/// Inverse of [`format_order_number`]. Returns None for anything malformed.
pub fn parse_order_number(raw: &str) -> Option<ParsedOrderNumber> {
    let mut parts = raw.rsplitn(3, '-');
    let sequence = parts.next()?;
    let day = parts.next()?;
    let prefix = parts.next()?;

    if prefix.is_empty() || sequence.len() < 4 || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if day.len() != 8 {
        return None;
    }

    Some(ParsedOrderNumber {
        prefix: prefix.to_string(),
        day: NaiveDate::parse_from_str(day, DATE_FORMAT).ok()?,
        sequence: sequence.parse().ok().filter(|seq| *seq > 0)?,
    })
}
