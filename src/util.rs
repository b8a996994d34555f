use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub const DEFAULT_LOG_NAME: &str = "verify_downloads.log";
pub const FALLBACK_LOG_NAME: &str = "verify_downloads.report.log";

/// A measurement that may have been replaced by a sentinel because the job
/// never got far enough to take it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measured<T> {
    Value(T),
    NotAvailable,
    FailedDownload,
}

impl<T> Measured<T> {
    fn sentinel(&self) -> Option<&'static str> {
        match self {
            Measured::Value(_) => None,
            Measured::NotAvailable => Some("N/A"),
            Measured::FailedDownload => Some("Failed Download"),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Measured<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measured::Value(v) => v.fmt(f),
            other => f.write_str(other.sentinel().unwrap_or_default()),
        }
    }
}

pub fn format_bytes(value: u64) -> String {
    let val = value as f64;
    if val >= GIB {
        format!("{:.1} GB", val / GIB)
    } else if val >= MIB {
        format!("{:.1} MB", val / MIB)
    } else if val >= KIB {
        format!("{:.1} KB", val / KIB)
    } else {
        format!("{value} B")
    }
}

pub fn format_size(size: &Measured<u64>) -> String {
    match size {
        Measured::Value(bytes) => format_bytes(*bytes),
        other => other.to_string(),
    }
}

/// Renders `HHh MMm SSs`; hours and minutes are always shown.
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}h {minutes:02}m {secs:02}s")
}

/// Parses `dd/mm/yy`. Years 00-49 map to 20xx, 50-99 to 19xx.
pub fn parse_upload_date(input: &str) -> Option<NaiveDate> {
    let mut parts = input.trim().split('/');
    let day = two_digits(parts.next()?)?;
    let month = two_digits(parts.next()?)?;
    let year = two_digits(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    let century = if year < 50 { 2000 } else { 1900 };
    NaiveDate::from_ymd_opt(century + year as i32, month, day)
}

fn two_digits(part: &str) -> Option<u32> {
    if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeStyle {
    /// Whole calendar years, then the days since the last anniversary.
    Calendar,
    /// `days / 365` years and `days % 365` days, as older logs were written.
    Legacy,
}

pub fn format_age(upload_date: Option<&str>, today: NaiveDate, style: AgeStyle) -> String {
    let Some(date) = upload_date.and_then(parse_upload_date) else {
        return "N/A".to_string();
    };
    if date > today {
        return "N/A".to_string();
    }

    match style {
        AgeStyle::Legacy => {
            let days = (today - date).num_days();
            format!("{}y {}d", days / 365, days % 365)
        }
        AgeStyle::Calendar => {
            let mut years = today.year() - date.year();
            let mut anniversary = add_years(date, years);
            if anniversary > today {
                years -= 1;
                anniversary = add_years(date, years);
            }
            let days = (today - anniversary).num_days();
            format!("{years}y {days}d")
        }
    }
}

// 29 Feb rolls back to 28 Feb in non-leap years.
fn add_years(date: NaiveDate, years: i32) -> NaiveDate {
    let year = date.year() + years;
    date.with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, date.month(), 28))
        .unwrap_or(date)
}

/// Resolves the report log beside `exe`, never returning `exe` itself.
pub fn resolve_log_path(exe: &Path, name: &str) -> PathBuf {
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    let candidate = dir.join(name);
    if candidate == exe {
        dir.join(FALLBACK_LOG_NAME)
    } else {
        candidate
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32, m: u32, y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn size_picks_largest_unit_at_threshold() {
        assert_eq!(format_bytes(1_073_741_824), "1.0 GB");
        assert_eq!(format_bytes(1_048_576), "1.0 MB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1_073_741_823), "1024.0 MB");
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn size_sentinels_pass_through() {
        assert_eq!(format_size(&Measured::NotAvailable), "N/A");
        assert_eq!(format_size(&Measured::FailedDownload), "Failed Download");
    }

    #[test]
    fn elapsed_always_shows_hours_and_minutes() {
        assert_eq!(format_elapsed(0), "00h 00m 00s");
        assert_eq!(format_elapsed(65), "00h 01m 05s");
        assert_eq!(format_elapsed(3 * 3600 + 7), "03h 00m 07s");
    }

    #[test]
    fn two_digit_years_pivot_at_fifty() {
        assert_eq!(parse_upload_date("01/02/49"), Some(date(1, 2, 2049)));
        assert_eq!(parse_upload_date("01/02/50"), Some(date(1, 2, 1950)));
        assert_eq!(parse_upload_date("31/02/23"), None);
        assert_eq!(parse_upload_date("1/2/23"), None);
    }

    #[test]
    fn age_counts_calendar_years() {
        let today = date(15, 6, 2025);
        assert_eq!(format_age(Some("15/06/23"), today, AgeStyle::Calendar), "2y 0d");
        assert_eq!(format_age(Some("16/06/24"), today, AgeStyle::Calendar), "0y 364d");
        assert_eq!(format_age(Some("15/06/25"), today, AgeStyle::Calendar), "0y 0d");
    }

    #[test]
    fn legacy_age_uses_365_day_years() {
        let today = date(15, 6, 2025);
        assert_eq!(format_age(Some("15/06/23"), today, AgeStyle::Legacy), "2y 1d");
    }

    #[test]
    fn age_is_unknown_for_missing_bad_or_future_dates() {
        let today = date(15, 6, 2025);
        assert_eq!(format_age(None, today, AgeStyle::Calendar), "N/A");
        assert_eq!(format_age(Some("garbage"), today, AgeStyle::Calendar), "N/A");
        assert_eq!(format_age(Some("16/06/25"), today, AgeStyle::Calendar), "N/A");
    }

    #[test]
    fn log_path_never_points_at_the_executable() {
        let exe = Path::new("/opt/tools/verify");
        assert_eq!(
            resolve_log_path(exe, DEFAULT_LOG_NAME),
            PathBuf::from("/opt/tools/verify_downloads.log")
        );
        let clash = Path::new("/opt/tools/verify_downloads.log");
        assert_eq!(
            resolve_log_path(clash, DEFAULT_LOG_NAME),
            PathBuf::from("/opt/tools/verify_downloads.report.log")
        );
    }
}
