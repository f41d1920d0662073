//! Read path for allotments.
//!
//! A calendar year is loaded as two independent sub-fetches, yearly PLD/SDV
//! and weekly vacation, each deduplicated by `(calendar, year, kind)`. The
//! fetch writes its result into the cache itself, exactly once per
//! execution, whatever became of the caller that started it. Applying
//! results to the live display is left to the caller, which must first check
//! that its scope is still selected.

use chrono::Datelike;
use futures_util::future::try_join_all;
use log::{debug, info};
use shared::{AllotmentKind, WeeklyVacationAllotment, YearlyAllotment};
use std::sync::Arc;

use crate::backend::storage::AllotmentStore;

use super::allotment_cache::YearPatch;
use super::console_state::StateHandle;
use super::errors::ConsoleError;
use super::fetch_registry::{FetchRegistry, InFlightKey};
use super::week_calendar::week_bounds;

/// Both halves of one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct YearAllotments {
    pub year: i32,
    pub yearly: YearlyAllotment,
    pub weekly: Vec<WeeklyVacationAllotment>,
}

#[derive(Clone)]
pub struct AllotmentService {
    store: Arc<dyn AllotmentStore>,
    state: StateHandle,
    yearly_fetches: FetchRegistry<YearlyAllotment>,
    weekly_fetches: FetchRegistry<Vec<WeeklyVacationAllotment>>,
}

impl AllotmentService {
    pub fn new(store: Arc<dyn AllotmentStore>, state: StateHandle) -> Self {
        Self {
            store,
            state,
            yearly_fetches: FetchRegistry::new(),
            weekly_fetches: FetchRegistry::new(),
        }
    }

    /// Yearly quota for `(calendar_id, year)`, materialized as zero when absent
    pub async fn fetch_yearly(&self, calendar_id: &str, year: i32) -> Result<YearlyAllotment, ConsoleError> {
        let key = InFlightKey::allotment(calendar_id, year, AllotmentKind::PldSdv);
        let store = Arc::clone(&self.store);
        let state = self.state.clone();
        let calendar_id = calendar_id.to_string();

        self.yearly_fetches
            .dedupe(key, move || async move {
                let allotment = load_yearly(store.as_ref(), &calendar_id, year).await?;
                state.update(|s| s.cache.merge_year(&calendar_id, year, YearPatch::yearly(allotment.clone())));
                Ok(allotment)
            })
            .await
    }

    /// Every weekly row of `year` for the calendar
    pub async fn fetch_weekly(&self, calendar_id: &str, year: i32) -> Result<Vec<WeeklyVacationAllotment>, ConsoleError> {
        let key = InFlightKey::allotment(calendar_id, year, AllotmentKind::Vacation);
        let store = Arc::clone(&self.store);
        let state = self.state.clone();
        let calendar_id = calendar_id.to_string();

        self.weekly_fetches
            .dedupe(key, move || async move {
                let weeks = load_weekly(store.as_ref(), &calendar_id, year).await?;
                state.update(|s| s.cache.merge_year(&calendar_id, year, YearPatch::weekly(weeks.clone())));
                Ok(weeks)
            })
            .await
    }

    /// Load both halves of one calendar year
    pub async fn fetch_allotments(&self, calendar_id: &str, year: i32) -> Result<YearAllotments, ConsoleError> {
        let (yearly, weekly) = tokio::try_join!(
            self.fetch_yearly(calendar_id, year),
            self.fetch_weekly(calendar_id, year)
        )?;
        Ok(YearAllotments { year, yearly, weekly })
    }

    pub async fn fetch_years(&self, calendar_id: &str, years: &[i32]) -> Result<Vec<YearAllotments>, ConsoleError> {
        debug!("Fetching allotments for calendar {} years {:?}", calendar_id, years);
        try_join_all(years.iter().map(|year| self.fetch_allotments(calendar_id, *year))).await
    }

    /// Re-read the yearly row straight from the store, bypassing any pending fetch.
    /// Used after writes, where a read that started earlier could predate the write.
    pub async fn reload_yearly(&self, calendar_id: &str, year: i32) -> Result<YearlyAllotment, ConsoleError> {
        let allotment = load_yearly(self.store.as_ref(), calendar_id, year).await?;
        self.state
            .update(|s| s.cache.merge_year(calendar_id, year, YearPatch::yearly(allotment.clone())));
        Ok(allotment)
    }

    pub async fn reload_weekly(&self, calendar_id: &str, year: i32) -> Result<Vec<WeeklyVacationAllotment>, ConsoleError> {
        let weeks = load_weekly(self.store.as_ref(), calendar_id, year).await?;
        self.state
            .update(|s| s.cache.merge_year(calendar_id, year, YearPatch::weekly(weeks.clone())));
        Ok(weeks)
    }

    pub async fn reload_year(&self, calendar_id: &str, year: i32) -> Result<YearAllotments, ConsoleError> {
        let (yearly, weekly) = tokio::try_join!(
            self.reload_yearly(calendar_id, year),
            self.reload_weekly(calendar_id, year)
        )?;
        Ok(YearAllotments { year, yearly, weekly })
    }

    fn selected_calendar(&self) -> Result<String, ConsoleError> {
        self.state
            .read(|s| s.selected_calendar.clone())
            .ok_or_else(|| ConsoleError::validation("Select a calendar before editing allotments"))
    }

    /// Stash unsaved PLD/SDV input for the selected calendar
    pub fn set_pld_sdv_edit(&self, year: i32, value: &str) -> Result<(), ConsoleError> {
        let calendar_id = self.selected_calendar()?;
        self.state
            .update(|s| s.cache.set_pld_sdv_edit(&calendar_id, year, value.to_string()));
        Ok(())
    }

    pub fn set_vacation_edit(&self, year: i32, value: &str) -> Result<(), ConsoleError> {
        let calendar_id = self.selected_calendar()?;
        self.state
            .update(|s| s.cache.set_vacation_edit(&calendar_id, year, value.to_string()));
        Ok(())
    }

    pub fn pld_sdv_edit(&self, year: i32) -> Option<String> {
        self.state.read(|s| {
            let calendar_id = s.selected_calendar.as_deref()?;
            s.cache.get(calendar_id)?.pld_sdv_edit_buffer.get(&year).cloned()
        })
    }

    pub fn vacation_edit(&self, year: i32) -> Option<String> {
        self.state.read(|s| {
            let calendar_id = s.selected_calendar.as_deref()?;
            s.cache.get(calendar_id)?.vacation_edit_buffer.get(&year).cloned()
        })
    }

    /// Drop every cache entry and the display. Readiness goes with it, since
    /// no division's allotments are present any more.
    pub fn reset_allotments(&self) {
        self.state.update(|s| {
            s.cache.clear();
            s.readiness.clear();
            s.clear_display();
        });
        info!("Allotment cache reset");
    }

    /// Drop one calendar's cache entry; the division showing it stops being ready
    pub fn invalidate_calendar(&self, calendar_id: &str) -> bool {
        self.state.update(|s| {
            let removed = s.cache.invalidate(calendar_id);
            if s.selected_calendar.as_deref() == Some(calendar_id) {
                if let Some(division) = s.selected_division.clone() {
                    s.readiness.mark_not_ready(&division);
                }
                s.clear_display();
            }
            removed
        })
    }
}

async fn load_yearly(store: &dyn AllotmentStore, calendar_id: &str, year: i32) -> Result<YearlyAllotment, ConsoleError> {
    let row = store.find_yearly_allotment(calendar_id, year).await.map_err(|e| {
        ConsoleError::remote(
            format!("Failed to load PLD/SDV allotment for calendar {} ({})", calendar_id, year),
            &e,
        )
    })?;
    Ok(row.unwrap_or_else(|| YearlyAllotment::zero(calendar_id, year)))
}

async fn load_weekly(store: &dyn AllotmentStore, calendar_id: &str, year: i32) -> Result<Vec<WeeklyVacationAllotment>, ConsoleError> {
    let (first, last) = week_bounds(year)
        .ok_or_else(|| ConsoleError::validation(format!("Year {} has no representable weeks", year)))?;
    let weeks = store
        .list_weekly_allotments(calendar_id, first, last)
        .await
        .map_err(|e| {
            ConsoleError::remote(
                format!("Failed to load vacation allotments for calendar {} ({})", calendar_id, year),
                &e,
            )
        })?;
    Ok(weeks
        .into_iter()
        .filter(|w| w.week_start_date.year() == year)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::{MemoryStore, StoreOperation};
    use chrono::NaiveDate;
    use shared::OverrideAudit;

    fn setup() -> (MemoryStore, StateHandle, AllotmentService) {
        let store = MemoryStore::new();
        let state = StateHandle::new();
        let service = AllotmentService::new(Arc::new(store.clone()), state.clone());
        (store, state, service)
    }

    #[tokio::test]
    async fn test_missing_yearly_row_is_materialized_as_zero() {
        let (_store, state, service) = setup();

        let yearly = service.fetch_yearly("cal-1", 2025).await.unwrap();

        assert_eq!(yearly, YearlyAllotment::zero("cal-1", 2025));
        let cached = state.read(|s| s.cache.get("cal-1").and_then(|e| e.yearly_for(2025).cloned()));
        assert_eq!(cached, Some(YearlyAllotment::zero("cal-1", 2025)));
    }

    #[tokio::test]
    async fn test_fetch_allotments_fills_both_halves() {
        let (store, state, service) = setup();
        store.put_weekly(WeeklyVacationAllotment {
            calendar_id: "cal-1".to_string(),
            week_start_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            max_allotment: 4,
            current_requests: 1,
            audit: OverrideAudit::default(),
        });

        let loaded = service.fetch_allotments("cal-1", 2025).await.unwrap();

        assert_eq!(loaded.weekly.len(), 1);
        assert!(state.read(|s| s.cache.has_years("cal-1", &[2025])));
        assert_eq!(store.calls(StoreOperation::FindYearly), 1);
        assert_eq!(store.calls(StoreOperation::ListWeekly), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_cache_untouched() {
        let (store, state, service) = setup();
        store.fail_on(StoreOperation::ListWeekly, "gateway timeout");

        let err = service.fetch_allotments("cal-1", 2025).await.unwrap_err();

        assert!(matches!(err, ConsoleError::RemoteFailure(_)));
        assert!(err.to_string().contains("Failed to load vacation allotments for calendar cal-1 (2025)"));
        assert!(!state.read(|s| s.cache.has_years("cal-1", &[2025])));
    }

    #[tokio::test]
    async fn test_concurrent_year_fetches_are_deduplicated() {
        let (store, _state, service) = setup();
        let gate = store.hold_reads().await;

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.fetch_allotments("cal-1", 2025).await }
        });
        let second = tokio::spawn({
            let service = service.clone();
            async move { service.fetch_allotments("cal-1", 2025).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(gate);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(store.calls(StoreOperation::FindYearly), 1);
        assert_eq!(store.calls(StoreOperation::ListWeekly), 1);
    }

    #[tokio::test]
    async fn test_surviving_half_settles_after_sibling_fails() {
        let (store, state, service) = setup();
        store.fail_on(StoreOperation::ListWeekly, "gateway timeout");
        let gate = store.hold_reads().await;

        let err = service.fetch_allotments("cal-1", 2025).await.unwrap_err();
        assert!(matches!(err, ConsoleError::RemoteFailure(_)));
        drop(gate);

        let key = InFlightKey::allotment("cal-1", 2025, AllotmentKind::PldSdv);
        for _ in 0..50 {
            if !service.yearly_fetches.is_in_flight(&key) {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(service.yearly_fetches.in_flight_count(), 0);
        assert_eq!(service.weekly_fetches.in_flight_count(), 0);
        assert_eq!(store.calls(StoreOperation::FindYearly), 1);
        let cached = state.read(|s| s.cache.get("cal-1").and_then(|e| e.yearly_for(2025).cloned()));
        assert_eq!(cached, Some(YearlyAllotment::zero("cal-1", 2025)));
    }

    #[tokio::test]
    async fn test_edit_buffers_require_selected_calendar() {
        let (_store, state, service) = setup();
        assert!(matches!(service.set_pld_sdv_edit(2025, "10"), Err(ConsoleError::Validation(_))));

        state.update(|s| s.selected_calendar = Some("cal-1".to_string()));
        service.set_pld_sdv_edit(2025, "10").unwrap();
        service.set_vacation_edit(2026, "3").unwrap();

        assert_eq!(service.pld_sdv_edit(2025).as_deref(), Some("10"));
        assert_eq!(service.vacation_edit(2026).as_deref(), Some("3"));
        assert!(service.pld_sdv_edit(2026).is_none());
    }
}
