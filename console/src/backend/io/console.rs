//! `AllotmentConsole`: the surface the admin UI drives.
//!
//! Selection entry points never fail; their errors land in [`AllotmentConsole::error`].
//! Write entry points return their error as well as recording it.

use log::{info, warn};
use shared::{
    Calendar, DisplayedAllotments, LoadingFlags, RangeOverrideOutcome, RangeOverrideRequest,
    WeeklyVacationAllotment, YearlyAllotment,
};
use std::sync::Arc;

use crate::backend::domain::{
    parse_quota_input, AllotmentService, ConsoleError, DivisionPhase, MutationCoordinator,
    ScopeResolver, StateHandle, UpdateWeekCommand, UpdateWeeklyForYearCommand,
    UpdateYearlyAllotmentCommand,
};
use crate::backend::storage::{AllotmentStore, SessionProvider};

#[derive(Clone)]
pub struct AllotmentConsole {
    state: StateHandle,
    resolver: ScopeResolver,
    allotments: AllotmentService,
    mutations: MutationCoordinator,
}

impl AllotmentConsole {
    pub fn new(
        store: Arc<dyn AllotmentStore>,
        session: Arc<dyn SessionProvider>,
        reference_year: Option<i32>,
    ) -> Self {
        let state = StateHandle::new();
        let allotments = AllotmentService::new(Arc::clone(&store), state.clone());
        let resolver = ScopeResolver::new(
            Arc::clone(&store),
            state.clone(),
            allotments.clone(),
            reference_year,
        );
        let mutations = MutationCoordinator::new(store, session, state.clone(), allotments.clone());

        Self {
            state,
            resolver,
            allotments,
            mutations,
        }
    }

    /// Switch the console to `name`. Selecting the current division again
    /// only revalidates its readiness.
    pub async fn select_division(&self, name: &str) {
        let from = self.state.read(|s| s.selected_division.clone());
        info!("Selecting division {} (from {:?})", name, from);
        self.resolver.prepare_division_switch(from.as_deref(), name).await;
    }

    pub async fn select_calendar(&self, calendar_id: Option<&str>) {
        self.resolver.set_selected_calendar(calendar_id).await;
    }

    /// Re-check the selected division and finish any load left incomplete
    pub async fn refresh(&self) {
        if let Some(division) = self.selected_division() {
            self.resolver.revalidate_readiness(&division).await;
        }
    }

    pub fn displayed_allotments(&self) -> DisplayedAllotments {
        self.state.read(|s| s.display.clone())
    }

    pub fn is_ready(&self, division: &str) -> bool {
        self.state.read(|s| s.readiness.is_ready(division))
    }

    pub fn selected_division(&self) -> Option<String> {
        self.state.read(|s| s.selected_division.clone())
    }

    pub fn selected_calendar(&self) -> Option<String> {
        self.state.read(|s| s.selected_calendar.clone())
    }

    /// Calendars of the selected division, ordered by name
    pub fn calendars(&self) -> Vec<Calendar> {
        self.state.read(|s| {
            s.selected_division
                .as_deref()
                .and_then(|d| s.divisions.get(d))
                .map(|scope| scope.calendars.clone())
                .unwrap_or_default()
        })
    }

    pub fn division_phase(&self, division: &str) -> DivisionPhase {
        self.state.read(|s| s.phase(division))
    }

    pub fn active_years(&self) -> [i32; 2] {
        self.resolver.active_years()
    }

    pub fn error(&self) -> Option<String> {
        self.state.read(|s| s.error.clone())
    }

    pub fn clear_error(&self) {
        self.state.update(|s| s.error = None);
    }

    pub fn loading(&self) -> LoadingFlags {
        self.state.read(|s| s.loading)
    }

    pub async fn update_yearly(&self, command: UpdateYearlyAllotmentCommand) -> Result<YearlyAllotment, ConsoleError> {
        self.mutations.update_yearly_allotment(command).await
    }

    pub async fn update_weekly(
        &self,
        command: UpdateWeeklyForYearCommand,
    ) -> Result<Vec<WeeklyVacationAllotment>, ConsoleError> {
        self.mutations.update_weekly_allotment_for_year(command).await
    }

    pub async fn update_week(&self, command: UpdateWeekCommand) -> Result<WeeklyVacationAllotment, ConsoleError> {
        self.mutations.update_weekly_allotment(command).await
    }

    pub async fn update_range(&self, request: RangeOverrideRequest) -> Result<RangeOverrideOutcome, ConsoleError> {
        self.mutations.update_range_override(request).await
    }

    pub fn set_pld_sdv_edit(&self, year: i32, value: &str) -> Result<(), ConsoleError> {
        self.allotments.set_pld_sdv_edit(year, value)
    }

    pub fn set_vacation_edit(&self, year: i32, value: &str) -> Result<(), ConsoleError> {
        self.allotments.set_vacation_edit(year, value)
    }

    pub fn pld_sdv_edit(&self, year: i32) -> Option<String> {
        self.allotments.pld_sdv_edit(year)
    }

    pub fn vacation_edit(&self, year: i32) -> Option<String> {
        self.allotments.vacation_edit(year)
    }

    /// Save the buffered PLD/SDV quota of `year` for the selected calendar
    pub async fn save_pld_sdv_edit(&self, year: i32, reason: Option<String>) -> Result<YearlyAllotment, ConsoleError> {
        let (calendar_id, max_allotment) = self.buffered_quota(year, self.pld_sdv_edit(year))?;
        self.update_yearly(UpdateYearlyAllotmentCommand {
            calendar_id,
            year,
            max_allotment,
            reason,
        })
        .await
    }

    /// Save the buffered vacation quota of `year` to every week of that year
    pub async fn save_vacation_edit(
        &self,
        year: i32,
        reason: Option<String>,
    ) -> Result<Vec<WeeklyVacationAllotment>, ConsoleError> {
        let (calendar_id, max_allotment) = self.buffered_quota(year, self.vacation_edit(year))?;
        self.update_weekly(UpdateWeeklyForYearCommand {
            calendar_id,
            year,
            max_allotment,
            reason,
        })
        .await
    }

    fn buffered_quota(&self, year: i32, buffer: Option<String>) -> Result<(String, u32), ConsoleError> {
        let parsed = self
            .selected_calendar()
            .ok_or_else(|| ConsoleError::validation("Select a calendar before saving allotments"))
            .and_then(|calendar_id| {
                let text = buffer.ok_or_else(|| {
                    ConsoleError::validation(format!("No pending edit for {}", year))
                })?;
                Ok((calendar_id, parse_quota_input(&text)?))
            });

        if let Err(e) = &parsed {
            warn!("Edit for {} not saved: {}", year, e);
            self.state.update(|s| s.record_error(e.to_string()));
        }
        parsed
    }

    pub fn reset_allotments(&self) {
        self.allotments.reset_allotments();
    }

    pub fn invalidate_calendar(&self, calendar_id: &str) -> bool {
        self.allotments.invalidate_calendar(calendar_id)
    }

    pub fn cleanup_division(&self, division: &str) {
        self.resolver.cleanup_division(division);
    }
}
