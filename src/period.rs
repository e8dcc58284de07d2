use chrono::{Datelike, Duration, NaiveDate};

/// Fixed 13-week quarter bands over the planning year.
/// Weeks past 52 (long years) stay in Q4; see `week_of_year`.
const QUARTER_BANDS: [(u32, u32); 4] = [(1, 13), (14, 26), (27, 39), (40, 52)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRef {
    pub year: i32,
    pub quarter: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPeriod {
    pub year: i32,
    pub quarter: u8,
    pub start_week: u32,
    pub end_week: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub label: String,
    pub is_current: bool,
}

fn year_start(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default()
}

/// Week number with the app's historical convention: weeks are counted
/// from Jan 1 with Jan 1's weekday folded in (Monday=1 .. Sunday=7), no
/// ISO year-boundary correction. Late-December dates can land in week 53.
pub fn week_of_year(date: NaiveDate) -> u32 {
    let start = year_start(date.year());
    let day_offset = (date - start).num_days();
    let start_weekday = i64::from(start.weekday().number_from_monday());
    // ceil((day_offset + start_weekday) / 7)
    ((day_offset + start_weekday + 6) / 7) as u32
}

/// Date of `weekday` (Monday=1 .. Sunday=7) in week `week`, counting
/// weeks from the first Monday on or after Jan 1. Not an inverse of
/// `week_of_year` in general; both sides of that asymmetry are load-bearing
/// for stored quarter boundaries.
pub fn date_from_week(year: i32, week: i64, weekday: i64) -> NaiveDate {
    let start = year_start(year);
    let to_monday = i64::from((8 - start.weekday().number_from_monday()) % 7);
    start + Duration::days(to_monday + (week - 1) * 7 + (weekday - 1))
}

pub fn quarter_week_band(quarter: u8) -> (u32, u32) {
    match quarter {
        1 => QUARTER_BANDS[0],
        2 => QUARTER_BANDS[1],
        3 => QUARTER_BANDS[2],
        _ => QUARTER_BANDS[3],
    }
}

pub fn resolve_quarter(now: NaiveDate) -> PeriodRef {
    let quarter = match week_of_year(now) {
        1..=13 => 1,
        14..=26 => 2,
        27..=39 => 3,
        _ => 4,
    };
    PeriodRef {
        year: now.year(),
        quarter,
    }
}

/// Strict `YYYY-Qn` parse: exactly a four-digit year plus a quarter in
/// 1..=4, or nothing.
pub fn try_parse_period_token(raw: &str) -> Option<PeriodRef> {
    let (y, q) = raw.trim().split_once("-Q")?;
    if y.len() != 4 || !y.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = y.parse::<i32>().ok()?;
    let quarter = match q {
        "1" => 1,
        "2" => 2,
        "3" => 3,
        "4" => 4,
        _ => return None,
    };
    Some(PeriodRef { year, quarter })
}

/// Parse a `YYYY-Qn` selector token. Anything malformed (or absent)
/// falls back to the period containing `now`; callers never see a
/// parse failure.
pub fn parse_period_token(raw: Option<&str>, now: NaiveDate) -> PeriodRef {
    raw.and_then(try_parse_period_token)
        .unwrap_or_else(|| resolve_quarter(now))
}

pub fn format_period_token(period: PeriodRef) -> String {
    format!("{:04}-Q{}", period.year, period.quarter)
}

pub fn build_resolved_period(year: i32, quarter: u8, now: NaiveDate) -> ResolvedPeriod {
    let (start_week, end_week) = quarter_week_band(quarter);
    let start_date = date_from_week(year, i64::from(start_week), 1);
    let end_date = date_from_week(year, i64::from(end_week), 7);
    ResolvedPeriod {
        year,
        quarter,
        start_week,
        end_week,
        start_date,
        end_date,
        label: format!("Q{} {}", quarter, year),
        is_current: resolve_quarter(now) == PeriodRef { year, quarter },
    }
}

pub fn previous_period(period: PeriodRef) -> PeriodRef {
    if period.quarter <= 1 {
        PeriodRef {
            year: period.year - 1,
            quarter: 4,
        }
    } else {
        PeriodRef {
            year: period.year,
            quarter: period.quarter - 1,
        }
    }
}

pub fn next_period(period: PeriodRef) -> PeriodRef {
    if period.quarter >= 4 {
        PeriodRef {
            year: period.year + 1,
            quarter: 1,
        }
    } else {
        PeriodRef {
            year: period.year,
            quarter: period.quarter + 1,
        }
    }
}

/// Selectable periods around `center`: `radius` quarters back through
/// `radius` quarters forward, ascending, fully materialized.
pub fn enumerate_periods(center: PeriodRef, radius: usize) -> Vec<PeriodRef> {
    let mut cursor = center;
    for _ in 0..radius {
        cursor = previous_period(cursor);
    }
    let mut out = Vec::with_capacity(radius * 2 + 1);
    out.push(cursor);
    for _ in 0..radius * 2 {
        cursor = next_period(cursor);
        out.push(cursor);
    }
    out
}
