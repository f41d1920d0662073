//! # Storage Traits
//!
//! The remote persistence API and session provider the console consumes.
//! The domain layer only ever talks to these traits, so the remote store,
//! the SQLite store and the in-memory test store are interchangeable.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use shared::{
    Calendar, Division, OverrideAudit, RangeOverrideOutcome, RangeOverrideRequest,
    WeeklyQuota, WeeklyVacationAllotment, YearlyAllotment, YearlyQuota,
};

/// Row-level access to divisions, calendars and allotments
#[async_trait]
pub trait AllotmentStore: Send + Sync {
    /// Look up a division by its unique name
    async fn find_division(&self, name: &str) -> Result<Option<Division>>;

    /// All calendars of the named division, active or not, ordered by name
    async fn list_calendars(&self, division_name: &str) -> Result<Vec<Calendar>>;

    /// The yearly quota row for `(calendar_id, year)`, if one exists
    async fn find_yearly_allotment(&self, calendar_id: &str, year: i32) -> Result<Option<YearlyAllotment>>;

    /// Weekly rows with `from <= week_start_date <= to`, ordered by week start
    async fn list_weekly_allotments(
        &self,
        calendar_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WeeklyVacationAllotment>>;

    /// Insert or update keyed by `(calendar_id, year)`
    async fn upsert_yearly_allotment(&self, quota: &YearlyQuota) -> Result<()>;

    /// Bulk insert or update keyed by `(calendar_id, week_start_date)`.
    /// Existing rows keep their request counts. Returns the number of rows written.
    async fn upsert_weekly_allotments(&self, quotas: &[WeeklyQuota]) -> Result<u64>;

    /// Server-side bulk override for every row the range touches
    async fn apply_range_override(
        &self,
        request: &RangeOverrideRequest,
        audit: &OverrideAudit,
    ) -> Result<RangeOverrideOutcome>;
}

/// Identity of the signed-in administrator, used for override audit fields
pub trait SessionProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Session provider with a fixed user, for single-user tools and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    user_id: Option<String>,
}

impl StaticSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }
}

impl SessionProvider for StaticSession {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}
