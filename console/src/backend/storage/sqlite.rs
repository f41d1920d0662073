//! SQLite-backed [`AllotmentStore`] for local installs and integration tests.
//!
//! Dates are stored as ISO `YYYY-MM-DD` text so range filters compare
//! lexicographically. Upserts use `ON CONFLICT` on the natural keys, and the
//! range override runs inside one transaction, which is what the remote
//! bulk procedure guarantees as well.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info};
use shared::{
    Calendar, Division, OverrideAudit, RangeOverrideOutcome, RangeOverrideRequest,
    WeeklyQuota, WeeklyVacationAllotment, YearlyAllotment, YearlyQuota,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;

use super::range_plan::{RangePlan, RangeTargets};
use super::traits::AllotmentStore;

const DATE_FORMAT: &str = "%Y-%m-%d";

const UPSERT_YEARLY_SQL: &str = r#"
    INSERT INTO yearly_allotments (calendar_id, year, max_allotment, is_override, override_by, override_at, override_reason)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (calendar_id, year) DO UPDATE SET
        max_allotment = excluded.max_allotment,
        is_override = excluded.is_override,
        override_by = excluded.override_by,
        override_at = excluded.override_at,
        override_reason = excluded.override_reason
"#;

const UPSERT_WEEKLY_SQL: &str = r#"
    INSERT INTO weekly_vacation_allotments (calendar_id, week_start_date, max_allotment, current_requests, is_override, override_by, override_at, override_reason)
    VALUES (?, ?, ?, 0, ?, ?, ?, ?)
    ON CONFLICT (calendar_id, week_start_date) DO UPDATE SET
        max_allotment = excluded.max_allotment,
        is_override = excluded.is_override,
        override_by = excluded.override_by,
        override_at = excluded.override_at,
        override_reason = excluded.override_reason
"#;

/// SqliteStore manages the allotment tables
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL: {}", url))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::setup_schema(&pool).await?;
        info!("Opened allotment store at {}", url);
        Ok(Self { pool: Arc::new(pool) })
    }

    /// A private in-memory database on a single pooled connection
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::setup_schema(&pool).await?;
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS divisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                uses_scoped_calendars INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calendars (
                id TEXT PRIMARY KEY,
                division_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY (division_id) REFERENCES divisions (id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS yearly_allotments (
                calendar_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                max_allotment INTEGER NOT NULL,
                is_override INTEGER NOT NULL DEFAULT 0,
                override_by TEXT,
                override_at TEXT,
                override_reason TEXT,
                PRIMARY KEY (calendar_id, year)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS weekly_vacation_allotments (
                calendar_id TEXT NOT NULL,
                week_start_date TEXT NOT NULL,
                max_allotment INTEGER NOT NULL,
                current_requests INTEGER NOT NULL DEFAULT 0,
                is_override INTEGER NOT NULL DEFAULT 0,
                override_by TEXT,
                override_at TEXT,
                override_reason TEXT,
                PRIMARY KEY (calendar_id, week_start_date)
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Provision a division. Division rows are otherwise read-only to the console.
    pub async fn create_division(&self, name: &str, uses_scoped_calendars: bool) -> Result<Division> {
        let result = sqlx::query("INSERT INTO divisions (name, uses_scoped_calendars) VALUES (?, ?)")
            .bind(name)
            .bind(uses_scoped_calendars)
            .execute(self.pool())
            .await?;
        Ok(Division {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            uses_scoped_calendars,
        })
    }

    pub async fn create_calendar(&self, calendar: &Calendar) -> Result<()> {
        sqlx::query("INSERT INTO calendars (id, division_id, name, is_active) VALUES (?, ?, ?, ?)")
            .bind(&calendar.id)
            .bind(calendar.division_id)
            .bind(&calendar.name)
            .bind(calendar.is_active)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Seed request counts, normally maintained by the request workflow
    pub async fn set_current_requests(&self, calendar_id: &str, week_start: NaiveDate, current_requests: u32) -> Result<()> {
        sqlx::query(
            "UPDATE weekly_vacation_allotments SET current_requests = ? WHERE calendar_id = ? AND week_start_date = ?",
        )
        .bind(i64::from(current_requests))
        .bind(calendar_id)
        .bind(week_start.format(DATE_FORMAT).to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_weekly_in(tx: &mut Transaction<'_, Sqlite>, quota: &WeeklyQuota) -> Result<()> {
        sqlx::query(UPSERT_WEEKLY_SQL)
            .bind(&quota.calendar_id)
            .bind(quota.week_start_date.format(DATE_FORMAT).to_string())
            .bind(i64::from(quota.max_allotment))
            .bind(quota.audit.is_override)
            .bind(&quota.audit.override_by)
            .bind(&quota.audit.override_at)
            .bind(&quota.audit.override_reason)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn upsert_yearly_in(tx: &mut Transaction<'_, Sqlite>, quota: &YearlyQuota) -> Result<()> {
        sqlx::query(UPSERT_YEARLY_SQL)
            .bind(&quota.calendar_id)
            .bind(quota.year)
            .bind(i64::from(quota.max_allotment))
            .bind(quota.audit.is_override)
            .bind(&quota.audit.override_by)
            .bind(&quota.audit.override_at)
            .bind(&quota.audit.override_reason)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

fn audit_from_row(r: &SqliteRow) -> OverrideAudit {
    OverrideAudit {
        is_override: r.get("is_override"),
        override_by: r.get("override_by"),
        override_at: r.get("override_at"),
        override_reason: r.get("override_reason"),
    }
}

fn yearly_from_row(r: &SqliteRow) -> Result<YearlyAllotment> {
    Ok(YearlyAllotment {
        calendar_id: r.get("calendar_id"),
        year: r.get("year"),
        max_allotment: count_column(r, "max_allotment")?,
        audit: audit_from_row(r),
    })
}

/// Read a non-negative INTEGER column into a `u32`
fn count_column(r: &SqliteRow, column: &str) -> Result<u32> {
    let value: i64 = r.get(column);
    u32::try_from(value).with_context(|| format!("Column {} holds out-of-range value {}", column, value))
}

fn weekly_from_row(r: &SqliteRow) -> Result<WeeklyVacationAllotment> {
    let week_start: String = r.get("week_start_date");
    Ok(WeeklyVacationAllotment {
        calendar_id: r.get("calendar_id"),
        week_start_date: NaiveDate::parse_from_str(&week_start, DATE_FORMAT)
            .with_context(|| format!("Invalid week_start_date in store: {}", week_start))?,
        max_allotment: count_column(r, "max_allotment")?,
        current_requests: count_column(r, "current_requests")?,
        audit: audit_from_row(r),
    })
}

#[async_trait]
impl AllotmentStore for SqliteStore {
    async fn find_division(&self, name: &str) -> Result<Option<Division>> {
        let row = sqlx::query("SELECT id, name, uses_scoped_calendars FROM divisions WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(|r| Division {
            id: r.get("id"),
            name: r.get("name"),
            uses_scoped_calendars: r.get("uses_scoped_calendars"),
        }))
    }

    async fn list_calendars(&self, division_name: &str) -> Result<Vec<Calendar>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.division_id, c.name, c.is_active
            FROM calendars c
            JOIN divisions d ON d.id = c.division_id
            WHERE d.name = ?
            ORDER BY c.name ASC
            "#,
        )
        .bind(division_name)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|r| Calendar {
                id: r.get("id"),
                division_id: r.get("division_id"),
                name: r.get("name"),
                is_active: r.get("is_active"),
            })
            .collect())
    }

    async fn find_yearly_allotment(&self, calendar_id: &str, year: i32) -> Result<Option<YearlyAllotment>> {
        let row = sqlx::query(
            r#"
            SELECT calendar_id, year, max_allotment, is_override, override_by, override_at, override_reason
            FROM yearly_allotments
            WHERE calendar_id = ? AND year = ?
            "#,
        )
        .bind(calendar_id)
        .bind(year)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(yearly_from_row).transpose()
    }

    async fn list_weekly_allotments(
        &self,
        calendar_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WeeklyVacationAllotment>> {
        let rows = sqlx::query(
            r#"
            SELECT calendar_id, week_start_date, max_allotment, current_requests,
                   is_override, override_by, override_at, override_reason
            FROM weekly_vacation_allotments
            WHERE calendar_id = ? AND week_start_date >= ? AND week_start_date <= ?
            ORDER BY week_start_date ASC
            "#,
        )
        .bind(calendar_id)
        .bind(from.format(DATE_FORMAT).to_string())
        .bind(to.format(DATE_FORMAT).to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(weekly_from_row).collect()
    }

    async fn upsert_yearly_allotment(&self, quota: &YearlyQuota) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_yearly_in(&mut tx, quota).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_weekly_allotments(&self, quotas: &[WeeklyQuota]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for quota in quotas {
            Self::upsert_weekly_in(&mut tx, quota).await?;
        }
        tx.commit().await?;
        debug!("Upserted {} weekly allotments", quotas.len());
        Ok(quotas.len() as u64)
    }

    async fn apply_range_override(
        &self,
        request: &RangeOverrideRequest,
        audit: &OverrideAudit,
    ) -> Result<RangeOverrideOutcome> {
        let plan = RangePlan::for_request(request).with_context(|| {
            format!("Range {}..{} touches no rows", request.start_date, request.end_date)
        })?;

        let mut tx = self.pool.begin().await?;
        match &plan.targets {
            RangeTargets::Years(years) => {
                for year in years {
                    let quota = YearlyQuota {
                        calendar_id: request.calendar_id.clone(),
                        year: *year,
                        max_allotment: request.max_allotment,
                        audit: audit.clone(),
                    };
                    Self::upsert_yearly_in(&mut tx, &quota).await?;
                }
            }
            RangeTargets::Weeks(weeks) => {
                for week_start in weeks {
                    let quota = WeeklyQuota {
                        calendar_id: request.calendar_id.clone(),
                        week_start_date: *week_start,
                        max_allotment: request.max_allotment,
                        audit: audit.clone(),
                    };
                    Self::upsert_weekly_in(&mut tx, &quota).await?;
                }
            }
        }
        tx.commit().await?;

        Ok(RangeOverrideOutcome {
            affected_count: plan.len() as u64,
            start_date: plan.effective_start,
            end_date: plan.effective_end,
        })
    }
}
