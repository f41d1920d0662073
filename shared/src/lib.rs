use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level organizational scope that owns calendars and allotments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Division {
    pub id: i64,
    /// Unique display name, also used as the division key throughout the console
    pub name: String,
    /// Legacy toggle kept for provisioning tools; explicit calendar rows are authoritative
    pub uses_scoped_calendars: bool,
}

/// Sub-scope within a division to which allotments belong (formerly "zone")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    /// Opaque identifier token
    pub id: String,
    pub division_id: i64,
    pub name: String,
    /// Calendars are deactivated, never deleted
    pub is_active: bool,
}

/// Audit trail attached to every quota that an administrator has set by hand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideAudit {
    pub is_override: bool,
    /// User id of the administrator who made the change
    pub override_by: Option<String>,
    /// RFC 3339 timestamp of the change
    pub override_at: Option<String>,
    pub override_reason: Option<String>,
}

impl OverrideAudit {
    pub fn manual(user_id: &str, at: &str, reason: Option<String>) -> Self {
        Self {
            is_override: true,
            override_by: Some(user_id.to_string()),
            override_at: Some(at.to_string()),
            override_reason: reason,
        }
    }
}

/// Maximum leave-day (PLD/SDV) quota for one calendar in one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyAllotment {
    pub calendar_id: String,
    pub year: i32,
    pub max_allotment: u32,
    #[serde(flatten)]
    pub audit: OverrideAudit,
}

impl YearlyAllotment {
    /// The record used when the store has no row for `(calendar_id, year)`
    pub fn zero(calendar_id: &str, year: i32) -> Self {
        Self {
            calendar_id: calendar_id.to_string(),
            year,
            max_allotment: 0,
            audit: OverrideAudit::default(),
        }
    }
}

/// Maximum vacation-week quota for one calendar in one Monday-aligned week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyVacationAllotment {
    pub calendar_id: String,
    /// Always a Monday, computed in UTC
    pub week_start_date: NaiveDate,
    pub max_allotment: u32,
    /// Number of vacation requests already filed against this week
    pub current_requests: u32,
    #[serde(flatten)]
    pub audit: OverrideAudit,
}

/// Which quota family an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AllotmentKind {
    /// Personal leave days and single-day vacations, tracked per year
    PldSdv,
    /// Vacation weeks, tracked per Monday-aligned week
    Vacation,
}

impl fmt::Display for AllotmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllotmentKind::PldSdv => write!(f, "pld_sdv"),
            AllotmentKind::Vacation => write!(f, "vacation"),
        }
    }
}

/// Upsert payload for a yearly quota, conflict key `(calendar_id, year)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyQuota {
    pub calendar_id: String,
    pub year: i32,
    pub max_allotment: u32,
    pub audit: OverrideAudit,
}

/// Upsert payload for a weekly quota, conflict key `(calendar_id, week_start_date)`.
/// Conflicting rows keep their `current_requests`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyQuota {
    pub calendar_id: String,
    pub week_start_date: NaiveDate,
    pub max_allotment: u32,
    pub audit: OverrideAudit,
}

/// Request for a date-range bulk override, executed server-side in one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeOverrideRequest {
    pub calendar_id: String,
    pub kind: AllotmentKind,
    /// Inclusive
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub max_allotment: u32,
    pub reason: Option<String>,
}

/// Result of the bulk override procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeOverrideOutcome {
    pub affected_count: u64,
    /// Effective first date actually touched
    pub start_date: NaiveDate,
    /// Effective last date actually touched
    pub end_date: NaiveDate,
}

/// Snapshot of what the UI is allowed to render for the active scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayedAllotments {
    pub division: Option<String>,
    pub calendar_id: Option<String>,
    pub yearly: Vec<YearlyAllotment>,
    pub weekly: Vec<WeeklyVacationAllotment>,
}

impl DisplayedAllotments {
    pub fn is_empty(&self) -> bool {
        self.yearly.is_empty() && self.weekly.is_empty()
    }

    pub fn yearly_for(&self, year: i32) -> Option<&YearlyAllotment> {
        self.yearly.iter().find(|a| a.year == year)
    }
}

/// Loading indicators surfaced to the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingFlags {
    pub settings: bool,
    pub allotments: bool,
    pub mutation: bool,
}
