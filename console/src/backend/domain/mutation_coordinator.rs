//! Write path for quota overrides.
//!
//! Every write stamps the override audit from the current session, goes
//! through the store, then re-reads what it touched so the cache and display
//! hold the authoritative post-write rows. Unlike the read path, failures are
//! recorded in the shared error field *and* returned to the caller.

use chrono::{Datelike, Utc};
use futures_util::future::try_join_all;
use log::{info, warn};
use shared::{
    OverrideAudit, RangeOverrideOutcome, RangeOverrideRequest, WeeklyQuota,
    WeeklyVacationAllotment, YearlyAllotment, YearlyQuota,
};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::backend::storage::{AllotmentStore, SessionProvider};

use super::allotment_service::AllotmentService;
use super::commands::{UpdateWeekCommand, UpdateWeeklyForYearCommand, UpdateYearlyAllotmentCommand};
use super::console_state::StateHandle;
use super::errors::ConsoleError;
use super::week_calendar::{generate_week_starts, is_week_start, years_touched};

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 9999;
const MAX_REASON_LEN: usize = 500;

/// Holds the mutation loading flag up for as long as it lives
struct MutationGuard {
    state: StateHandle,
}

impl MutationGuard {
    fn start(state: &StateHandle) -> Self {
        state.update(|s| s.loading.mutation = true);
        Self { state: state.clone() }
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.state.update(|s| s.loading.mutation = false);
    }
}

/// Parse a quota typed into an edit buffer
pub fn parse_quota_input(input: &str) -> Result<u32, ConsoleError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ConsoleError::validation("Enter a quota before saving"));
    }
    trimmed
        .parse::<u32>()
        .map_err(|_| ConsoleError::validation(format!("Quota must be a whole number of zero or more, got {:?}", trimmed)))
}

fn validate_calendar_id(calendar_id: &str) -> Result<(), ConsoleError> {
    if calendar_id.trim().is_empty() {
        return Err(ConsoleError::validation("A calendar is required for allotment updates"));
    }
    Ok(())
}

fn validate_year(year: i32) -> Result<(), ConsoleError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(ConsoleError::validation(format!(
            "Year {} is outside {}-{}",
            year, MIN_YEAR, MAX_YEAR
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct MutationCoordinator {
    store: Arc<dyn AllotmentStore>,
    session: Arc<dyn SessionProvider>,
    state: StateHandle,
    allotments: AllotmentService,
}

impl MutationCoordinator {
    pub fn new(
        store: Arc<dyn AllotmentStore>,
        session: Arc<dyn SessionProvider>,
        state: StateHandle,
        allotments: AllotmentService,
    ) -> Self {
        Self {
            store,
            session,
            state,
            allotments,
        }
    }

    fn audit(&self, reason: Option<String>) -> Result<OverrideAudit, ConsoleError> {
        let user_id = self
            .session
            .current_user_id()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ConsoleError::validation("No signed-in user to attribute the override to"))?;

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(ConsoleError::validation(format!(
                "Override reason cannot exceed {} characters",
                MAX_REASON_LEN
            )));
        }

        Ok(OverrideAudit::manual(&user_id, &Utc::now().to_rfc3339(), reason))
    }

    /// Record a failed mutation and hand the result back unchanged
    fn settle<T>(&self, operation: &str, result: Result<T, ConsoleError>) -> Result<T, ConsoleError> {
        if let Err(e) = &result {
            warn!("{} failed: {}", operation, e);
            self.state.update(|s| s.record_error(e.to_string()));
        }
        result
    }

    /// Override the PLD/SDV quota of one calendar year
    pub async fn update_yearly_allotment(
        &self,
        command: UpdateYearlyAllotmentCommand,
    ) -> Result<YearlyAllotment, ConsoleError> {
        let _guard = MutationGuard::start(&self.state);
        let result = self.write_yearly(command).await;
        self.settle("PLD/SDV allotment update", result)
    }

    async fn write_yearly(&self, command: UpdateYearlyAllotmentCommand) -> Result<YearlyAllotment, ConsoleError> {
        validate_calendar_id(&command.calendar_id)?;
        validate_year(command.year)?;
        let audit = self.audit(command.reason)?;

        let quota = YearlyQuota {
            calendar_id: command.calendar_id.clone(),
            year: command.year,
            max_allotment: command.max_allotment,
            audit,
        };
        self.store.upsert_yearly_allotment(&quota).await.map_err(|e| {
            ConsoleError::remote(
                format!(
                    "Failed to update PLD/SDV allotment for calendar {} ({})",
                    command.calendar_id, command.year
                ),
                &e,
            )
        })?;

        let refreshed = self.allotments.reload_yearly(&command.calendar_id, command.year).await?;
        self.state.update(|s| {
            s.cache.clear_pld_sdv_edit(&command.calendar_id, command.year);
            s.refresh_display_for(&command.calendar_id);
        });

        info!(
            "Updated PLD/SDV allotment for calendar {} ({}) to {}",
            command.calendar_id, command.year, refreshed.max_allotment
        );
        Ok(refreshed)
    }

    /// Override the vacation quota of every week of one calendar year
    pub async fn update_weekly_allotment_for_year(
        &self,
        command: UpdateWeeklyForYearCommand,
    ) -> Result<Vec<WeeklyVacationAllotment>, ConsoleError> {
        let _guard = MutationGuard::start(&self.state);
        let result = self.write_weekly_year(command).await;
        self.settle("Vacation allotment update", result)
    }

    async fn write_weekly_year(
        &self,
        command: UpdateWeeklyForYearCommand,
    ) -> Result<Vec<WeeklyVacationAllotment>, ConsoleError> {
        validate_calendar_id(&command.calendar_id)?;
        validate_year(command.year)?;
        let audit = self.audit(command.reason)?;

        let quotas: Vec<WeeklyQuota> = generate_week_starts(command.year)
            .into_iter()
            .map(|week_start_date| WeeklyQuota {
                calendar_id: command.calendar_id.clone(),
                week_start_date,
                max_allotment: command.max_allotment,
                audit: audit.clone(),
            })
            .collect();

        let written = self.store.upsert_weekly_allotments(&quotas).await.map_err(|e| {
            ConsoleError::remote(
                format!(
                    "Failed to update vacation allotments for calendar {} ({})",
                    command.calendar_id, command.year
                ),
                &e,
            )
        })?;

        let refreshed = self.allotments.reload_weekly(&command.calendar_id, command.year).await?;
        self.state.update(|s| {
            s.cache.clear_vacation_edit(&command.calendar_id, command.year);
            s.refresh_display_for(&command.calendar_id);
        });

        info!(
            "Updated {} vacation weeks for calendar {} ({}) to {}",
            written, command.calendar_id, command.year, command.max_allotment
        );
        Ok(refreshed)
    }

    /// Override the vacation quota of a single week
    pub async fn update_weekly_allotment(
        &self,
        command: UpdateWeekCommand,
    ) -> Result<WeeklyVacationAllotment, ConsoleError> {
        let _guard = MutationGuard::start(&self.state);
        let result = self.write_week(command).await;
        self.settle("Vacation week update", result)
    }

    async fn write_week(&self, command: UpdateWeekCommand) -> Result<WeeklyVacationAllotment, ConsoleError> {
        validate_calendar_id(&command.calendar_id)?;
        if !is_week_start(command.week_start_date) {
            return Err(ConsoleError::validation(format!(
                "Week start {} is not a Monday",
                command.week_start_date
            )));
        }
        let year = command.week_start_date.year();
        validate_year(year)?;
        let audit = self.audit(command.reason)?;

        let quota = WeeklyQuota {
            calendar_id: command.calendar_id.clone(),
            week_start_date: command.week_start_date,
            max_allotment: command.max_allotment,
            audit,
        };
        self.store
            .upsert_weekly_allotments(std::slice::from_ref(&quota))
            .await
            .map_err(|e| {
                ConsoleError::remote(
                    format!(
                        "Failed to update vacation week {} for calendar {}",
                        command.week_start_date, command.calendar_id
                    ),
                    &e,
                )
            })?;

        let weeks = self.allotments.reload_weekly(&command.calendar_id, year).await?;
        self.state.update(|s| {
            s.refresh_display_for(&command.calendar_id);
        });

        weeks
            .into_iter()
            .find(|w| w.week_start_date == command.week_start_date)
            .ok_or_else(|| {
                ConsoleError::not_found(format!(
                    "Vacation week {} for calendar {} missing after update",
                    command.week_start_date, command.calendar_id
                ))
            })
    }

    /// Bulk override over an inclusive date range.
    ///
    /// The store decides which rows the range touches, so every calendar
    /// year between the requested and the effective bounds is re-read in
    /// full afterwards; rows are never patched locally.
    pub async fn update_range_override(
        &self,
        request: RangeOverrideRequest,
    ) -> Result<RangeOverrideOutcome, ConsoleError> {
        let _guard = MutationGuard::start(&self.state);
        let result = self.write_range(request).await;
        self.settle("Range override", result)
    }

    async fn write_range(&self, request: RangeOverrideRequest) -> Result<RangeOverrideOutcome, ConsoleError> {
        validate_calendar_id(&request.calendar_id)?;
        if request.start_date > request.end_date {
            return Err(ConsoleError::validation(format!(
                "Range start {} is after range end {}",
                request.start_date, request.end_date
            )));
        }
        validate_year(request.start_date.year())?;
        validate_year(request.end_date.year())?;
        let audit = self.audit(request.reason.clone())?;

        let outcome = self
            .store
            .apply_range_override(&request, &audit)
            .await
            .map_err(|e| {
                ConsoleError::remote(
                    format!(
                        "Failed to apply {} override for calendar {} ({} to {})",
                        request.kind, request.calendar_id, request.start_date, request.end_date
                    ),
                    &e,
                )
            })?;

        let bounds_valid = outcome.start_date <= outcome.end_date
            && validate_year(outcome.start_date.year()).is_ok()
            && validate_year(outcome.end_date.year()).is_ok();
        if !bounds_valid {
            return Err(ConsoleError::RemoteFailure(format!(
                "Range override for calendar {} reported unusable bounds {} to {}",
                request.calendar_id, outcome.start_date, outcome.end_date
            )));
        }

        let years: BTreeSet<i32> = years_touched(request.start_date, request.end_date)
            .into_iter()
            .chain(years_touched(outcome.start_date, outcome.end_date))
            .collect();
        try_join_all(
            years
                .iter()
                .map(|year| self.allotments.reload_year(&request.calendar_id, *year)),
        )
        .await?;

        self.state.update(|s| {
            s.refresh_display_for(&request.calendar_id);
        });

        info!(
            "Range override on calendar {} touched {} rows ({} to {}), refreshed years {:?}",
            request.calendar_id, outcome.affected_count, outcome.start_date, outcome.end_date, years
        );
        Ok(outcome)
    }
}
