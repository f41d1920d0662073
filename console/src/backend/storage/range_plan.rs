//! Row targets of a date-range override, shared by the store adapters so they
//! agree on which rows a bulk override touches.

use chrono::NaiveDate;
use shared::{AllotmentKind, RangeOverrideRequest};

use crate::backend::domain::week_calendar::{weeks_overlapping, years_touched};

#[derive(Debug, Clone, PartialEq)]
pub enum RangeTargets {
    Years(Vec<i32>),
    Weeks(Vec<NaiveDate>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangePlan {
    pub targets: RangeTargets,
    pub effective_start: NaiveDate,
    pub effective_end: NaiveDate,
}

impl RangePlan {
    /// `None` when the range touches no rows, e.g. when start is after end
    pub fn for_request(request: &RangeOverrideRequest) -> Option<Self> {
        if request.start_date > request.end_date {
            return None;
        }
        match request.kind {
            AllotmentKind::PldSdv => {
                let years = years_touched(request.start_date, request.end_date);
                let effective_start = NaiveDate::from_ymd_opt(*years.first()?, 1, 1)?;
                let effective_end = NaiveDate::from_ymd_opt(*years.last()?, 12, 31)?;
                Some(Self {
                    targets: RangeTargets::Years(years),
                    effective_start,
                    effective_end,
                })
            }
            AllotmentKind::Vacation => {
                let weeks = weeks_overlapping(request.start_date, request.end_date);
                let effective_start = *weeks.first()?;
                let effective_end = *weeks.last()?;
                Some(Self {
                    targets: RangeTargets::Weeks(weeks),
                    effective_start,
                    effective_end,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.targets {
            RangeTargets::Years(years) => years.len(),
            RangeTargets::Weeks(weeks) => weeks.len(),
        }
    }
}
