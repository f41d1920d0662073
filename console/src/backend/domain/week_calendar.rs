//! Monday-aligned week arithmetic for vacation allotments.
//!
//! All dates are calendar dates in UTC. A year owns exactly the weeks whose
//! Monday falls inside it, so adjacent years never share a week.

use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};

/// Every Monday that falls inside `year`, strictly increasing
pub fn generate_week_starts(year: i32) -> Vec<NaiveDate> {
    let Some(jan_first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    let offset = (7 - jan_first.weekday().num_days_from_monday()) % 7;
    let mut monday = jan_first + Duration::days(i64::from(offset));

    let mut weeks = Vec::with_capacity(53);
    while monday.year() == year {
        weeks.push(monday);
        monday += Duration::days(7);
    }
    weeks
}

/// The Monday on or before `date`
pub fn week_start_for(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn is_week_start(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Mon
}

/// First and last Monday of `year`, the bounds used to query its weeks
pub fn week_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    let weeks = generate_week_starts(year);
    Some((*weeks.first()?, *weeks.last()?))
}

/// Week starts of every week overlapping the inclusive range `start..=end`
pub fn weeks_overlapping(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut monday = week_start_for(start);
    let mut weeks = Vec::new();
    while monday <= end {
        weeks.push(monday);
        monday += Duration::days(7);
    }
    weeks
}

/// Calendar years touched by the inclusive range, in order
pub fn years_touched(start: NaiveDate, end: NaiveDate) -> Vec<i32> {
    let (first, last) = if start <= end {
        (start.year(), end.year())
    } else {
        (end.year(), start.year())
    };
    (first..=last).collect()
}

/// The current UTC year
pub fn current_utc_year() -> i32 {
    Utc::now().year()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_generate_week_starts_2024() {
        let weeks = generate_week_starts(2024);

        // 2024-01-01 is a Monday, 2024-12-30 is the last Monday
        assert_eq!(weeks.len(), 53);
        assert_eq!(weeks.first(), Some(&date(2024, 1, 1)));
        assert_eq!(weeks.last(), Some(&date(2024, 12, 30)));
        assert!(weeks.iter().all(|w| w.weekday() == Weekday::Mon));
        assert!(weeks.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_generate_week_starts_skips_leading_partial_week() {
        // 2025-01-01 is a Wednesday, so the first owned Monday is the 6th
        let weeks = generate_week_starts(2025);
        assert_eq!(weeks.first(), Some(&date(2025, 1, 6)));
        assert_eq!(weeks.last(), Some(&date(2025, 12, 29)));
        assert_eq!(weeks.len(), 52);
    }

    #[test]
    fn test_adjacent_years_do_not_share_weeks() {
        let this_year = generate_week_starts(2026);
        let next_year = generate_week_starts(2027);
        assert!(this_year.iter().all(|w| !next_year.contains(w)));
        assert_eq!(
            *next_year.first().unwrap() - *this_year.last().unwrap(),
            Duration::days(7)
        );
    }

    #[test]
    fn test_week_start_for() {
        assert_eq!(week_start_for(date(2025, 1, 1)), date(2024, 12, 30));
        assert_eq!(week_start_for(date(2025, 1, 6)), date(2025, 1, 6));
        assert_eq!(week_start_for(date(2025, 1, 12)), date(2025, 1, 6));
        assert!(is_week_start(date(2025, 1, 6)));
        assert!(!is_week_start(date(2025, 1, 7)));
    }

    #[test]
    fn test_years_touched_is_inclusive() {
        assert_eq!(years_touched(date(2025, 3, 1), date(2025, 4, 1)), vec![2025]);
        assert_eq!(years_touched(date(2024, 12, 1), date(2026, 1, 5)), vec![2024, 2025, 2026]);
        assert_eq!(years_touched(date(2026, 1, 5), date(2025, 12, 1)), vec![2025, 2026]);
    }

    #[test]
    fn test_weeks_overlapping_includes_partial_edges() {
        let weeks = weeks_overlapping(date(2025, 1, 1), date(2025, 1, 14));
        assert_eq!(weeks, vec![date(2024, 12, 30), date(2025, 1, 6), date(2025, 1, 13)]);
        assert!(weeks_overlapping(date(2025, 1, 14), date(2025, 1, 1)).is_empty());
    }

    #[test]
    fn test_week_bounds() {
        assert_eq!(week_bounds(2025), Some((date(2025, 1, 6), date(2025, 12, 29))));
    }
}
