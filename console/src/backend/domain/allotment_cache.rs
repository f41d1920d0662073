//! Per-calendar allotment cache.
//!
//! Entries are created lazily by the first successful fetch for a calendar
//! and are never expired by time. Each calendar year has two independently
//! loaded halves (yearly PLD/SDV and weekly vacation); writes merge per half
//! so a late yearly result never clobbers a fresher weekly one.

use chrono::{Datelike, NaiveDate};
use shared::{WeeklyVacationAllotment, YearlyAllotment};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Partial update for one calendar year. `None` fields leave the cached half as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearPatch {
    pub yearly: Option<YearlyAllotment>,
    pub weekly: Option<Vec<WeeklyVacationAllotment>>,
}

impl YearPatch {
    pub fn yearly(allotment: YearlyAllotment) -> Self {
        Self {
            yearly: Some(allotment),
            weekly: None,
        }
    }

    pub fn weekly(weeks: Vec<WeeklyVacationAllotment>) -> Self {
        Self {
            yearly: None,
            weekly: Some(weeks),
        }
    }
}

/// Everything known about one calendar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    yearly: BTreeMap<i32, YearlyAllotment>,
    weekly: BTreeMap<NaiveDate, WeeklyVacationAllotment>,
    yearly_loaded: BTreeSet<i32>,
    weekly_loaded: BTreeSet<i32>,
    /// Unsaved PLD/SDV input per year, as typed
    pub pld_sdv_edit_buffer: BTreeMap<i32, String>,
    /// Unsaved vacation input per year, as typed
    pub vacation_edit_buffer: BTreeMap<i32, String>,
}

impl CacheEntry {
    pub fn yearly_allotments(&self) -> Vec<YearlyAllotment> {
        self.yearly.values().cloned().collect()
    }

    pub fn weekly_allotments(&self) -> Vec<WeeklyVacationAllotment> {
        self.weekly.values().cloned().collect()
    }

    pub fn yearly_for(&self, year: i32) -> Option<&YearlyAllotment> {
        self.yearly.get(&year)
    }

    pub fn weekly_for(&self, year: i32) -> Vec<WeeklyVacationAllotment> {
        self.weekly
            .values()
            .filter(|w| w.week_start_date.year() == year)
            .cloned()
            .collect()
    }

    /// Both halves of `year` have been loaded at least once
    pub fn has_year(&self, year: i32) -> bool {
        self.yearly_loaded.contains(&year) && self.weekly_loaded.contains(&year)
    }

    pub fn loaded_years(&self) -> Vec<i32> {
        self.yearly_loaded
            .intersection(&self.weekly_loaded)
            .copied()
            .collect()
    }

    fn apply(&mut self, year: i32, patch: YearPatch) {
        if let Some(yearly) = patch.yearly {
            self.yearly.insert(year, yearly);
            self.yearly_loaded.insert(year);
        }
        if let Some(weeks) = patch.weekly {
            // The year's week list is authoritative; drop rows the store no longer returns
            self.weekly.retain(|date, _| date.year() != year);
            for week in weeks {
                self.weekly.insert(week.week_start_date, week);
            }
            self.weekly_loaded.insert(year);
        }
    }
}

/// Cache of allotment snapshots keyed by calendar id
#[derive(Debug, Clone, Default)]
pub struct AllotmentCache {
    entries: HashMap<String, CacheEntry>,
}

impl AllotmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, calendar_id: &str) -> Option<&CacheEntry> {
        self.entries.get(calendar_id)
    }

    pub fn contains(&self, calendar_id: &str) -> bool {
        self.entries.contains_key(calendar_id)
    }

    /// True when every year in `years` is fully loaded for the calendar
    pub fn has_years(&self, calendar_id: &str, years: &[i32]) -> bool {
        self.entries
            .get(calendar_id)
            .is_some_and(|entry| years.iter().all(|year| entry.has_year(*year)))
    }

    /// Shallow-merge `patch` into the calendar's entry, creating it if needed
    pub fn merge_year(&mut self, calendar_id: &str, year: i32, patch: YearPatch) {
        self.entries
            .entry(calendar_id.to_string())
            .or_default()
            .apply(year, patch);
    }

    pub fn set_pld_sdv_edit(&mut self, calendar_id: &str, year: i32, value: String) {
        self.entries
            .entry(calendar_id.to_string())
            .or_default()
            .pld_sdv_edit_buffer
            .insert(year, value);
    }

    pub fn set_vacation_edit(&mut self, calendar_id: &str, year: i32, value: String) {
        self.entries
            .entry(calendar_id.to_string())
            .or_default()
            .vacation_edit_buffer
            .insert(year, value);
    }

    pub fn clear_pld_sdv_edit(&mut self, calendar_id: &str, year: i32) {
        if let Some(entry) = self.entries.get_mut(calendar_id) {
            entry.pld_sdv_edit_buffer.remove(&year);
        }
    }

    pub fn clear_vacation_edit(&mut self, calendar_id: &str, year: i32) {
        if let Some(entry) = self.entries.get_mut(calendar_id) {
            entry.vacation_edit_buffer.remove(&year);
        }
    }

    /// Drop one calendar's entry. Returns whether it existed.
    pub fn invalidate(&mut self, calendar_id: &str) -> bool {
        self.entries.remove(calendar_id).is_some()
    }

    /// Drop the entries of several calendars, e.g. all calendars of an unloaded division
    pub fn invalidate_many<'a>(&mut self, calendar_ids: impl IntoIterator<Item = &'a str>) -> usize {
        calendar_ids
            .into_iter()
            .filter(|id| self.invalidate(id))
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
