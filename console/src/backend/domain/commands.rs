//! Domain-level command types for quota overrides.
//! The console facade builds these from UI input; the mutation coordinator
//! consumes them.

use chrono::NaiveDate;

/// Set the PLD/SDV quota of one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateYearlyAllotmentCommand {
    pub calendar_id: String,
    pub year: i32,
    pub max_allotment: u32,
    pub reason: Option<String>,
}

/// Set the vacation quota of every week of one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateWeeklyForYearCommand {
    pub calendar_id: String,
    pub year: i32,
    pub max_allotment: u32,
    pub reason: Option<String>,
}

/// Set the vacation quota of a single week
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateWeekCommand {
    pub calendar_id: String,
    /// Must be a Monday
    pub week_start_date: NaiveDate,
    pub max_allotment: u32,
    pub reason: Option<String>,
}
