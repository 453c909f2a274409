//! Presentation of stored sessions
//!
//! Short sessions (the console being bumped, a quick reset) are left out of
//! every view.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::SessionRecord;

/// Sessions at or below this energy are not reported
pub const MIN_REPORT_ENERGY_KJ: u32 = 50;

/// Kilojoules per kilocalorie
const KJ_PER_KCAL: f64 = 4.184;

/// One formatted session line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    /// "YYYY-MM-DD"
    pub start_day: String,
    /// "4.5 km"
    pub distance: String,
    /// "12:07"
    pub time: String,
    /// "310 kJ"
    pub energy: String,
}

/// Calories burned on one day; `None` for days without sessions
#[derive(Debug, Clone, PartialEq)]
pub struct DailyCalories {
    pub day: NaiveDate,
    pub kcal: Option<f64>,
}

fn reportable(record: &SessionRecord) -> bool {
    record.energy_kjoule > MIN_REPORT_ENERGY_KJ
}

/// Formatted rows, newest session first
pub fn session_rows(records: &[SessionRecord]) -> Vec<SessionRow> {
    let mut kept: Vec<&SessionRecord> = records.iter().filter(|r| reportable(r)).collect();
    kept.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    kept.into_iter()
        .map(|r| SessionRow {
            start_day: r.start_time.format("%Y-%m-%d").to_string(),
            distance: format!("{:.1} km", r.distance_km),
            time: format!("{}:{:02}", r.time_elapsed_sec / 60, r.time_elapsed_sec % 60),
            energy: format!("{} kJ", r.energy_kjoule),
        })
        .collect()
}

/// Per-day calorie totals from the first to the last day with a session,
/// in ascending order, optionally starting on `since`.
pub fn daily_calories(records: &[SessionRecord], since: Option<NaiveDate>) -> Vec<DailyCalories> {
    let mut totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for record in records.iter().filter(|r| reportable(r)) {
        let day = record.start_time.date_naive();
        if since.is_some_and(|s| day < s) {
            continue;
        }
        *totals.entry(day).or_default() += u64::from(record.energy_kjoule);
    }

    let (Some(&first), Some(&last)) = (totals.keys().next(), totals.keys().next_back()) else {
        return Vec::new();
    };

    first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|day| DailyCalories {
            day,
            kcal: totals.get(&day).map(|&kj| kj as f64 / KJ_PER_KCAL),
        })
        .collect()
}
