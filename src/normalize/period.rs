//! Reporting-period resolution.
//!
//! Disclosures rarely agree on how they label a quarter: some carry explicit
//! `Year`/`Quarter` columns, some a single `Period` cell like `"2023Q3"` or
//! `"Q3 2023"`, some only a date. This module turns whatever a row offers
//! into a canonical `"YYYYQn"` label with exact calendar bounds, or nothing.
//!
//! Resolution order:
//!
//! 1. Collect a year/quarter candidate from dedicated columns.
//! 2. Walk the row's period/date-like columns **in declared order**; the
//!    first one that yields a quarter (pattern match or date parse) wins and
//!    overrides step 1.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::domain::ParsedRow;

const YEAR_KEYS: [&str; 3] = ["year", "anio", "año"];
const QUARTER_KEYS: [&str; 4] = ["quarter", "q", "trim", "trimestre"];
const PERIOD_MARKERS: [&str; 6] = ["period", "periodo", "quarter", "trimestre", "fecha", "date"];
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];

/// A resolved fiscal quarter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPeriod {
    /// Canonical `"YYYYQn"` label. Zero-padded years keep lexical order equal
    /// to chronological order, which the scoring engine relies on.
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Resolve the reporting period for one row, if any evidence exists.
pub fn resolve_period(row: &ParsedRow) -> Option<ResolvedPeriod> {
    let (mut year, mut quarter) = extract_year_quarter(row);

    for (key, value) in row.iter() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let key_lower = key.to_lowercase();
        if !PERIOD_MARKERS
            .iter()
            .any(|marker| key_lower.contains(marker))
        {
            continue;
        }
        if let Some((y, q)) = match_quarter_text(value) {
            year = Some(y);
            quarter = Some(q);
            break;
        }
        if let Some(date) = parse_date(value) {
            year = Some(date.year());
            quarter = Some(date.month0() / 3 + 1);
            break;
        }
    }

    canonicalize(year?, quarter?)
}

/// Build the canonical label and calendar bounds for `year`/`quarter`.
pub fn canonicalize(year: i32, quarter: u32) -> Option<ResolvedPeriod> {
    if !(1..=4).contains(&quarter) {
        return None;
    }
    let start = quarter_start(year, quarter)?;
    let end = quarter_end(year, quarter)?;
    Some(ResolvedPeriod {
        label: format!("{year}Q{quarter}"),
        start,
        end,
    })
}

fn extract_year_quarter(row: &ParsedRow) -> (Option<i32>, Option<u32>) {
    let mut year = None;
    let mut quarter = None;
    for (key, value) in row.iter() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let key_lower = key.to_lowercase();
        if YEAR_KEYS.contains(&key_lower.as_str()) {
            if let Ok(parsed) = value.parse::<i32>() {
                year = Some(parsed);
            }
        }
        if QUARTER_KEYS.contains(&key_lower.as_str()) {
            // A bare "3", "Q3", or "Trimestre 3" all carry the quarter as the
            // first digit in the 1-4 range.
            if let Some(digit) = value.chars().find(|ch| matches!(ch, '1'..='4')) {
                quarter = Some(digit as u32 - '0' as u32);
            }
        }
    }
    (year, quarter)
}

/// Match a quarter embedded in free text, in either `"2023Q3"` or
/// `"Q3 2023"` ordering.
fn match_quarter_text(value: &str) -> Option<(i32, u32)> {
    static YEAR_FIRST: OnceLock<Regex> = OnceLock::new();
    static QUARTER_FIRST: OnceLock<Regex> = OnceLock::new();
    let year_first =
        YEAR_FIRST.get_or_init(|| Regex::new(r"(?i)(\d{4}).*?q\s*([1-4])").unwrap());
    let quarter_first =
        QUARTER_FIRST.get_or_init(|| Regex::new(r"(?i)q\s*([1-4]).*?(\d{4})").unwrap());

    if let Some(caps) = year_first.captures(value) {
        let year = caps[1].parse().ok()?;
        let quarter = caps[2].parse().ok()?;
        return Some((year, quarter));
    }
    if let Some(caps) = quarter_first.captures(value) {
        let quarter = caps[1].parse().ok()?;
        let year = caps[2].parse().ok()?;
        return Some((year, quarter));
    }
    None
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    // ISO-8601 timestamps appear in spreadsheet exports of date cells.
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map(|datetime| datetime.date())
        .ok()
}

fn quarter_start(year: i32, quarter: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)
}

fn quarter_end(year: i32, quarter: u32) -> Option<NaiveDate> {
    if quarter == 4 {
        return NaiveDate::from_ymd_opt(year, 12, 31);
    }
    quarter_start(year, quarter + 1)?.pred_opt()
}
