//! In-process store.
//!
//! Holds rows in maps and counts every call so tests can assert how many
//! remote round-trips an interaction cost. Reads can be held open with
//! [`MemoryStore::hold_reads`] to simulate slow responses, and any operation
//! can be made to fail.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use shared::{
    Calendar, Division, OverrideAudit, RangeOverrideOutcome, RangeOverrideRequest,
    WeeklyQuota, WeeklyVacationAllotment, YearlyAllotment, YearlyQuota,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::range_plan::{RangePlan, RangeTargets};
use super::traits::AllotmentStore;

/// Store operations, used for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    FindDivision,
    ListCalendars,
    FindYearly,
    ListWeekly,
    UpsertYearly,
    UpsertWeekly,
    ApplyRange,
}

#[derive(Debug, Default)]
struct MemoryData {
    divisions: Vec<Division>,
    calendars: Vec<Calendar>,
    yearly: HashMap<(String, i32), YearlyAllotment>,
    weekly: BTreeMap<(String, NaiveDate), WeeklyVacationAllotment>,
    calls: HashMap<StoreOperation, usize>,
    failures: HashMap<StoreOperation, String>,
    failing_divisions: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
    read_gate: Arc<RwLock<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, MemoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and return the injected failure for `op`, if any
    fn enter(&self, op: StoreOperation) -> Result<()> {
        let mut data = self.data();
        *data.calls.entry(op).or_insert(0) += 1;
        match data.failures.get(&op) {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    async fn wait_for_reads(&self) {
        let _open = self.read_gate.read().await;
    }

    pub fn add_division(&self, name: &str) -> Division {
        let mut data = self.data();
        let division = Division {
            id: data.divisions.len() as i64 + 1,
            name: name.to_string(),
            uses_scoped_calendars: true,
        };
        data.divisions.push(division.clone());
        division
    }

    pub fn add_calendar(&self, division_name: &str, id: &str, name: &str, is_active: bool) -> Result<Calendar> {
        let mut data = self.data();
        let division_id = data
            .divisions
            .iter()
            .find(|d| d.name == division_name)
            .map(|d| d.id)
            .ok_or_else(|| anyhow!("Division not found: {}", division_name))?;
        let calendar = Calendar {
            id: id.to_string(),
            division_id,
            name: name.to_string(),
            is_active,
        };
        data.calendars.push(calendar.clone());
        Ok(calendar)
    }

    pub fn set_calendar_active(&self, calendar_id: &str, is_active: bool) {
        if let Some(calendar) = self.data().calendars.iter_mut().find(|c| c.id == calendar_id) {
            calendar.is_active = is_active;
        }
    }

    pub fn put_yearly(&self, allotment: YearlyAllotment) {
        self.data()
            .yearly
            .insert((allotment.calendar_id.clone(), allotment.year), allotment);
    }

    pub fn put_weekly(&self, allotment: WeeklyVacationAllotment) {
        self.data()
            .weekly
            .insert((allotment.calendar_id.clone(), allotment.week_start_date), allotment);
    }

    pub fn yearly_row(&self, calendar_id: &str, year: i32) -> Option<YearlyAllotment> {
        self.data().yearly.get(&(calendar_id.to_string(), year)).cloned()
    }

    pub fn weekly_row(&self, calendar_id: &str, week_start: NaiveDate) -> Option<WeeklyVacationAllotment> {
        self.data().weekly.get(&(calendar_id.to_string(), week_start)).cloned()
    }

    pub fn calls(&self, op: StoreOperation) -> usize {
        self.data().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.data().calls.values().sum()
    }

    pub fn reset_calls(&self) {
        self.data().calls.clear();
    }

    pub fn fail_on(&self, op: StoreOperation, message: &str) {
        self.data().failures.insert(op, message.to_string());
    }

    /// Make division lookups for `name` fail while others succeed
    pub fn fail_division(&self, name: &str) {
        self.data().failing_divisions.insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        let mut data = self.data();
        data.failures.clear();
        data.failing_divisions.clear();
    }

    /// Block every read until the returned guard is dropped.
    /// Calls are still counted as they arrive.
    pub async fn hold_reads(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.read_gate).write_owned().await
    }
}

#[async_trait]
impl AllotmentStore for MemoryStore {
    async fn find_division(&self, name: &str) -> Result<Option<Division>> {
        self.enter(StoreOperation::FindDivision)?;
        self.wait_for_reads().await;
        let data = self.data();
        if data.failing_divisions.contains(name) {
            return Err(anyhow!("request for division {} timed out", name));
        }
        Ok(data.divisions.iter().find(|d| d.name == name).cloned())
    }

    async fn list_calendars(&self, division_name: &str) -> Result<Vec<Calendar>> {
        self.enter(StoreOperation::ListCalendars)?;
        self.wait_for_reads().await;
        let data = self.data();
        let Some(division_id) = data.divisions.iter().find(|d| d.name == division_name).map(|d| d.id) else {
            return Ok(Vec::new());
        };
        let mut calendars: Vec<Calendar> = data
            .calendars
            .iter()
            .filter(|c| c.division_id == division_id)
            .cloned()
            .collect();
        calendars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(calendars)
    }

    async fn find_yearly_allotment(&self, calendar_id: &str, year: i32) -> Result<Option<YearlyAllotment>> {
        self.enter(StoreOperation::FindYearly)?;
        self.wait_for_reads().await;
        Ok(self.yearly_row(calendar_id, year))
    }

    async fn list_weekly_allotments(
        &self,
        calendar_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WeeklyVacationAllotment>> {
        self.enter(StoreOperation::ListWeekly)?;
        self.wait_for_reads().await;
        if from > to {
            return Ok(Vec::new());
        }
        let data = self.data();
        Ok(data
            .weekly
            .range((calendar_id.to_string(), from)..=(calendar_id.to_string(), to))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn upsert_yearly_allotment(&self, quota: &YearlyQuota) -> Result<()> {
        self.enter(StoreOperation::UpsertYearly)?;
        debug!("Memory upsert yearly {} {}", quota.calendar_id, quota.year);
        self.put_yearly(YearlyAllotment {
            calendar_id: quota.calendar_id.clone(),
            year: quota.year,
            max_allotment: quota.max_allotment,
            audit: quota.audit.clone(),
        });
        Ok(())
    }

    async fn upsert_weekly_allotments(&self, quotas: &[WeeklyQuota]) -> Result<u64> {
        self.enter(StoreOperation::UpsertWeekly)?;
        let mut data = self.data();
        for quota in quotas {
            let key = (quota.calendar_id.clone(), quota.week_start_date);
            let current_requests = data.weekly.get(&key).map(|w| w.current_requests).unwrap_or(0);
            data.weekly.insert(
                key,
                WeeklyVacationAllotment {
                    calendar_id: quota.calendar_id.clone(),
                    week_start_date: quota.week_start_date,
                    max_allotment: quota.max_allotment,
                    current_requests,
                    audit: quota.audit.clone(),
                },
            );
        }
        Ok(quotas.len() as u64)
    }

    async fn apply_range_override(
        &self,
        request: &RangeOverrideRequest,
        audit: &OverrideAudit,
    ) -> Result<RangeOverrideOutcome> {
        self.enter(StoreOperation::ApplyRange)?;
        let plan = RangePlan::for_request(request)
            .ok_or_else(|| anyhow!("range {}..{} touches no rows", request.start_date, request.end_date))?;

        match &plan.targets {
            RangeTargets::Years(years) => {
                for year in years {
                    self.put_yearly(YearlyAllotment {
                        calendar_id: request.calendar_id.clone(),
                        year: *year,
                        max_allotment: request.max_allotment,
                        audit: audit.clone(),
                    });
                }
            }
            RangeTargets::Weeks(weeks) => {
                let quotas: Vec<WeeklyQuota> = weeks
                    .iter()
                    .map(|week_start| WeeklyQuota {
                        calendar_id: request.calendar_id.clone(),
                        week_start_date: *week_start,
                        max_allotment: request.max_allotment,
                        audit: audit.clone(),
                    })
                    .collect();
                let mut data = self.data();
                for quota in quotas {
                    let key = (quota.calendar_id.clone(), quota.week_start_date);
                    let current_requests = data.weekly.get(&key).map(|w| w.current_requests).unwrap_or(0);
                    data.weekly.insert(
                        key,
                        WeeklyVacationAllotment {
                            calendar_id: quota.calendar_id,
                            week_start_date: quota.week_start_date,
                            max_allotment: quota.max_allotment,
                            current_requests,
                            audit: quota.audit,
                        },
                    );
                }
            }
        }

        Ok(RangeOverrideOutcome {
            affected_count: plan.len() as u64,
            start_date: plan.effective_start,
            end_date: plan.effective_end,
        })
    }
}
