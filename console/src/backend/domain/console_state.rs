//! In-memory state owned by one console instance.
//!
//! The cache, readiness map, selection and display all live behind a single
//! mutex. Services only touch it through [`StateHandle::update`] and
//! [`StateHandle::read`], whose closures are synchronous, so no lock is ever
//! held across an `.await`.

use shared::{Calendar, DisplayedAllotments, Division, LoadingFlags};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::allotment_cache::{AllotmentCache, CacheEntry};
use super::readiness::ReadinessTracker;

/// Where a division is in its load cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DivisionPhase {
    #[default]
    Unloaded,
    SettingsLoading,
    /// Division row and calendars are known
    SettingsLoaded,
    AllotmentsLoading,
    Ready,
    Error(String),
}

impl DivisionPhase {
    /// Calendars for the division are present in the shadow copy
    pub fn calendars_known(&self) -> bool {
        matches!(
            self,
            DivisionPhase::SettingsLoaded | DivisionPhase::AllotmentsLoading | DivisionPhase::Ready
        )
    }
}

/// Shadow copy of a division's settings as last fetched
#[derive(Debug, Clone, PartialEq)]
pub struct DivisionScope {
    pub division: Division,
    /// Ordered by name ascending
    pub calendars: Vec<Calendar>,
    /// Calendar selected the last time this division was active
    pub last_selected_calendar: Option<String>,
}

impl DivisionScope {
    pub fn calendar(&self, calendar_id: &str) -> Option<&Calendar> {
        self.calendars.iter().find(|c| c.id == calendar_id)
    }

    pub fn calendar_ids(&self) -> impl Iterator<Item = &str> {
        self.calendars.iter().map(|c| c.id.as_str())
    }
}

/// Identity of the scope an async operation was started for.
/// Compared against the live selection after every await.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeToken {
    pub division: Option<String>,
    pub calendar_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConsoleState {
    pub divisions: HashMap<String, DivisionScope>,
    pub phases: HashMap<String, DivisionPhase>,
    pub selected_division: Option<String>,
    pub selected_calendar: Option<String>,
    pub display: DisplayedAllotments,
    pub cache: AllotmentCache,
    pub readiness: ReadinessTracker,
    pub loading: LoadingFlags,
    pub error: Option<String>,
    settings_loads: usize,
    allotment_loads: usize,
}

impl ConsoleState {
    pub fn scope_token(&self) -> ScopeToken {
        ScopeToken {
            division: self.selected_division.clone(),
            calendar_id: self.selected_calendar.clone(),
        }
    }

    pub fn is_current(&self, token: &ScopeToken) -> bool {
        self.scope_token() == *token
    }

    pub fn phase(&self, division: &str) -> DivisionPhase {
        self.phases.get(division).cloned().unwrap_or_default()
    }

    pub fn set_phase(&mut self, division: &str, phase: DivisionPhase) {
        self.phases.insert(division.to_string(), phase);
    }

    pub fn clear_display(&mut self) {
        self.display = DisplayedAllotments {
            division: self.selected_division.clone(),
            calendar_id: self.selected_calendar.clone(),
            ..DisplayedAllotments::default()
        };
    }

    /// Copy the cached entry for the selected calendar into the live display
    pub fn hydrate_display(&mut self) {
        let entry = self
            .selected_calendar
            .as_deref()
            .and_then(|id| self.cache.get(id))
            .cloned()
            .unwrap_or_default();
        self.display = display_from(self.selected_division.clone(), self.selected_calendar.clone(), &entry);
    }

    /// Refresh the display if it currently shows `calendar_id`
    pub fn refresh_display_for(&mut self, calendar_id: &str) -> bool {
        if self.selected_calendar.as_deref() == Some(calendar_id) {
            self.hydrate_display();
            true
        } else {
            false
        }
    }

    pub fn begin_settings_load(&mut self) {
        self.settings_loads += 1;
        self.loading.settings = true;
    }

    pub fn finish_settings_load(&mut self) {
        self.settings_loads = self.settings_loads.saturating_sub(1);
        self.loading.settings = self.settings_loads > 0;
    }

    /// Count one more pending allotment load; the flag stays up until all have finished
    pub fn begin_allotment_load(&mut self) {
        self.allotment_loads += 1;
        self.loading.allotments = true;
    }

    pub fn finish_allotment_load(&mut self) {
        self.allotment_loads = self.allotment_loads.saturating_sub(1);
        self.loading.allotments = self.allotment_loads > 0;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }
}

fn display_from(division: Option<String>, calendar_id: Option<String>, entry: &CacheEntry) -> DisplayedAllotments {
    DisplayedAllotments {
        division,
        calendar_id,
        yearly: entry.yearly_allotments(),
        weekly: entry.weekly_allotments(),
    }
}

/// Cloneable handle to the shared console state
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<Mutex<ConsoleState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a synchronous read-modify-write on the state
    pub fn update<R>(&self, f: impl FnOnce(&mut ConsoleState) -> R) -> R {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn read<R>(&self, f: impl FnOnce(&ConsoleState) -> R) -> R {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}
