//! Time-bucket naming and consolidation arithmetic.
//!
//! Bucket columns are named `dd.mm HH:00` (hourly) or `dd.mm` (daily).
//! Everything here is pure so the policy is testable without a sheet.

use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;

pub fn hourly_label(t: &DateTime<Local>) -> String {
    t.format("%d.%m %H:00").to_string()
}

pub fn daily_label(t: &DateTime<Local>) -> String {
    t.format("%d.%m").to_string()
}

/// Parsed bucket column header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLabel {
    pub date: String,
    /// `None` for a daily bucket.
    pub hour: Option<u8>,
}

pub fn parse_label(header: &str) -> Option<BucketLabel> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(\d{2}\.\d{2})(?: (\d{2}):00)?$").expect("static pattern")
    });
    let caps = re.captures(header.trim())?;
    Some(BucketLabel {
        date: caps[1].to_string(),
        hour: caps.get(2).and_then(|m| m.as_str().parse().ok()),
    })
}

/// Numeric reading of one result cell for averaging.
///
/// The not-found sentinel `N+` counts as `N`; empty cells and the
/// non-positional markers (`-1`, `err`) carry no information and are
/// excluded from the mean.
fn cell_numeric(value: &str) -> Option<u64> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if let Some(stripped) = v.strip_suffix('+') {
        return stripped.parse().ok();
    }
    v.parse::<u64>().ok().filter(|&n| n > 0)
}

/// Collapse one row's hourly cells into its daily value: rounded arithmetic
/// mean, re-emitted as the sentinel when the mean reaches the ceiling.
/// Empty when no cell contributed.
pub fn consolidate_row(cells: &[String], ceiling: u32) -> String {
    let nums: Vec<u64> = cells.iter().filter_map(|c| cell_numeric(c)).collect();
    if nums.is_empty() {
        return String::new();
    }
    let mean = (nums.iter().sum::<u64>() as f64 / nums.len() as f64).round() as u64;
    if mean >= u64::from(ceiling) {
        format!("{ceiling}+")
    } else {
        mean.to_string()
    }
}
