use allotment_console::backend::domain::{
    generate_week_starts, DivisionPhase, UpdateYearlyAllotmentCommand,
};
use allotment_console::backend::storage::{MemoryStore, SqliteStore, StaticSession, StoreOperation};
use allotment_console::AllotmentConsole;
use chrono::{Datelike, NaiveDate, Weekday};
use shared::{AllotmentKind, Calendar, RangeOverrideRequest, WeeklyVacationAllotment, OverrideAudit};
use std::sync::Arc;

const YEAR: i32 = 2025;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_division("North");
    store.add_calendar("North", "n-alpha", "Alpha", true).unwrap();
    store.add_calendar("North", "n-bravo", "Bravo", true).unwrap();
    store.add_division("South");
    store.add_calendar("South", "s-main", "Main", true).unwrap();
    store
}

fn console_for(store: &MemoryStore) -> AllotmentConsole {
    AllotmentConsole::new(
        Arc::new(store.clone()),
        Arc::new(StaticSession::new("U1")),
        Some(YEAR),
    )
}

async fn settle_tasks() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn concurrent_division_selects_share_one_settings_fetch() {
    let store = seeded_store();
    let console = console_for(&store);
    let gate = store.hold_reads().await;

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let console = console.clone();
            tokio::spawn(async move { console.select_division("North").await })
        })
        .collect();
    settle_tasks().await;
    assert!(console.loading().settings);
    drop(gate);

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.calls(StoreOperation::FindDivision), 1);
    assert_eq!(store.calls(StoreOperation::ListCalendars), 1);
    // One yearly and one weekly read for each of the two active years
    assert_eq!(store.calls(StoreOperation::FindYearly), 2);
    assert_eq!(store.calls(StoreOperation::ListWeekly), 2);
    assert!(console.is_ready("North"));
    assert_eq!(console.selected_calendar().as_deref(), Some("n-alpha"));
    assert!(!console.loading().settings);
}

#[tokio::test]
async fn readiness_drops_on_calendar_change_until_loaded() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;
    assert!(console.is_ready("North"));

    let gate = store.hold_reads().await;
    let switch = tokio::spawn({
        let console = console.clone();
        async move { console.select_calendar(Some("n-bravo")).await }
    });
    settle_tasks().await;

    assert!(!console.is_ready("North"));
    assert!(console.loading().allotments);
    assert_eq!(console.division_phase("North"), DivisionPhase::AllotmentsLoading);
    assert!(console.displayed_allotments().is_empty());

    drop(gate);
    switch.await.unwrap();

    assert!(console.is_ready("North"));
    assert_eq!(console.division_phase("North"), DivisionPhase::Ready);
    let display = console.displayed_allotments();
    assert_eq!(display.calendar_id.as_deref(), Some("n-bravo"));
    assert_eq!(display.yearly.len(), 2);
}

#[tokio::test]
async fn switching_away_and_back_reuses_cached_allotments() {
    let store = seeded_store();
    let console = console_for(&store);

    console.select_division("North").await;
    console.select_calendar(Some("n-bravo")).await;
    console.select_division("South").await;
    assert_eq!(console.selected_calendar().as_deref(), Some("s-main"));
    store.reset_calls();

    console.select_division("North").await;

    assert_eq!(console.selected_calendar().as_deref(), Some("n-bravo"));
    assert!(console.is_ready("North"));
    assert_eq!(store.calls(StoreOperation::FindYearly), 0);
    assert_eq!(store.calls(StoreOperation::ListWeekly), 0);
    assert_eq!(
        console.displayed_allotments().calendar_id.as_deref(),
        Some("n-bravo")
    );
}

#[tokio::test]
async fn reselecting_the_same_division_is_a_no_op() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;
    let before = console.displayed_allotments();
    store.reset_calls();

    console.select_division("North").await;
    console.select_division("North").await;

    assert_eq!(store.total_calls(), 0);
    assert_eq!(console.displayed_allotments(), before);
    assert!(console.is_ready("North"));
    assert_eq!(console.selected_calendar().as_deref(), Some("n-alpha"));
}

#[tokio::test]
async fn failed_switch_leaves_previous_division_intact() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;
    store.fail_division("South");

    console.select_division("South").await;

    assert_eq!(console.selected_division().as_deref(), Some("South"));
    assert!(console.selected_calendar().is_none());
    assert!(!console.is_ready("South"));
    assert!(matches!(console.division_phase("South"), DivisionPhase::Error(_)));
    let error = console.error().unwrap();
    assert!(error.contains("Failed to load division South"), "got {}", error);
    assert!(!console.loading().settings);

    // North keeps its readiness and cached rows
    assert!(console.is_ready("North"));
    store.clear_failures();
    store.reset_calls();
    console.select_division("North").await;
    assert_eq!(store.calls(StoreOperation::FindYearly), 0);
    assert!(console.error().is_none());
}

#[tokio::test]
async fn unknown_division_is_reported_as_not_found() {
    let store = seeded_store();
    let console = console_for(&store);

    console.select_division("Nowhere").await;

    assert_eq!(console.error().as_deref(), Some("Division Nowhere not found"));
    assert!(!console.is_ready("Nowhere"));
    assert!(console.calendars().is_empty());
}

#[tokio::test]
async fn stale_calendar_result_never_reaches_the_display() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;

    let gate = store.hold_reads().await;
    let stale = tokio::spawn({
        let console = console.clone();
        async move { console.select_calendar(Some("n-bravo")).await }
    });
    settle_tasks().await;

    // Back to the cached calendar while n-bravo is still loading
    console.select_calendar(Some("n-alpha")).await;
    assert!(console.is_ready("North"));

    drop(gate);
    stale.await.unwrap();

    assert_eq!(
        console.displayed_allotments().calendar_id.as_deref(),
        Some("n-alpha")
    );
    assert_eq!(console.selected_calendar().as_deref(), Some("n-alpha"));
    assert!(console.is_ready("North"));
    assert!(!console.loading().allotments);

    // The stale fetch still populated the cache
    store.reset_calls();
    console.select_calendar(Some("n-bravo")).await;
    assert_eq!(store.calls(StoreOperation::FindYearly), 0);
}

#[tokio::test]
async fn calendar_outside_division_is_rejected() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;

    console.select_calendar(Some("s-main")).await;

    assert_eq!(console.selected_calendar().as_deref(), Some("n-alpha"));
    assert!(console.error().unwrap().contains("does not belong to division North"));
}

#[tokio::test]
async fn clearing_the_calendar_is_ready_immediately() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;

    console.select_calendar(None).await;

    assert!(console.is_ready("North"));
    assert!(console.displayed_allotments().is_empty());
}

#[test]
fn year_2024_has_53_monday_week_starts() {
    let weeks = generate_week_starts(2024);

    assert_eq!(weeks.len(), 53);
    assert_eq!(weeks.first(), Some(&date(2024, 1, 1)));
    assert_eq!(weeks.last(), Some(&date(2024, 12, 30)));
    assert!(weeks.iter().all(|d| d.weekday() == Weekday::Mon && d.year() == 2024));
    assert!(weeks.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn yearly_override_is_audited_in_sqlite() {
    let store = SqliteStore::in_memory().await.unwrap();
    let division = store.create_division("North", true).await.unwrap();
    store
        .create_calendar(&Calendar {
            id: "C1".to_string(),
            division_id: division.id,
            name: "Main".to_string(),
            is_active: true,
        })
        .await
        .unwrap();
    let console = AllotmentConsole::new(Arc::new(store), Arc::new(StaticSession::new("U1")), Some(YEAR));
    console.select_division("North").await;

    let updated = console
        .update_yearly(UpdateYearlyAllotmentCommand {
            calendar_id: "C1".to_string(),
            year: YEAR,
            max_allotment: 10,
            reason: Some("policy change".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(updated.max_allotment, 10);
    assert!(updated.audit.is_override);
    assert_eq!(updated.audit.override_by.as_deref(), Some("U1"));
    assert_eq!(updated.audit.override_reason.as_deref(), Some("policy change"));
    assert!(updated.audit.override_at.is_some());

    let shown = console.displayed_allotments();
    assert_eq!(shown.yearly_for(YEAR), Some(&updated));
    assert!(!console.loading().mutation);
}

#[tokio::test]
async fn range_override_refreshes_every_touched_year() {
    let store = seeded_store();
    store.put_weekly(WeeklyVacationAllotment {
        calendar_id: "n-alpha".to_string(),
        week_start_date: date(2026, 1, 5),
        max_allotment: 6,
        current_requests: 2,
        audit: OverrideAudit::default(),
    });
    let console = console_for(&store);
    console.select_division("North").await;
    store.reset_calls();

    let outcome = console
        .update_range(RangeOverrideRequest {
            calendar_id: "n-alpha".to_string(),
            kind: AllotmentKind::Vacation,
            start_date: date(2025, 12, 20),
            end_date: date(2026, 1, 10),
            max_allotment: 1,
            reason: Some("winter shutdown".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(outcome.start_date, date(2025, 12, 15));
    assert_eq!(outcome.end_date, date(2026, 1, 5));
    assert_eq!(outcome.affected_count, 4);
    assert_eq!(store.calls(StoreOperation::ApplyRange), 1);
    assert_eq!(store.calls(StoreOperation::FindYearly), 2);
    assert_eq!(store.calls(StoreOperation::ListWeekly), 2);

    let shown = console.displayed_allotments();
    let january = shown
        .weekly
        .iter()
        .find(|w| w.week_start_date == date(2026, 1, 5))
        .unwrap();
    assert_eq!(january.max_allotment, 1);
    assert_eq!(january.current_requests, 2);
    assert_eq!(january.audit.override_reason.as_deref(), Some("winter shutdown"));
    assert_eq!(shown.weekly.len(), 4);
}

#[tokio::test]
async fn override_without_operator_is_rejected() {
    let store = seeded_store();
    let console = AllotmentConsole::new(
        Arc::new(store.clone()),
        Arc::new(StaticSession::anonymous()),
        Some(YEAR),
    );
    console.select_division("North").await;

    let result = console
        .update_yearly(UpdateYearlyAllotmentCommand {
            calendar_id: "n-alpha".to_string(),
            year: YEAR,
            max_allotment: 3,
            reason: None,
        })
        .await;

    assert!(result.is_err());
    assert!(console.error().is_some());
    assert_eq!(store.calls(StoreOperation::UpsertYearly), 0);
}

#[tokio::test]
async fn cleanup_unloads_division_and_its_cache() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;
    console.select_division("South").await;

    console.cleanup_division("North");
    assert_eq!(console.division_phase("North"), DivisionPhase::Unloaded);
    assert!(!console.is_ready("North"));

    store.reset_calls();
    console.select_division("North").await;
    assert_eq!(store.calls(StoreOperation::ListCalendars), 1);
    assert_eq!(store.calls(StoreOperation::FindYearly), 2);
    assert!(console.is_ready("North"));
}

#[tokio::test]
async fn late_failure_of_an_abandoned_division_is_not_reported() {
    let store = seeded_store();
    store.fail_division("South");
    let console = console_for(&store);
    let gate = store.hold_reads().await;

    let abandoned = tokio::spawn({
        let console = console.clone();
        async move { console.select_division("South").await }
    });
    settle_tasks().await;
    let current = tokio::spawn({
        let console = console.clone();
        async move { console.select_division("North").await }
    });
    settle_tasks().await;
    drop(gate);

    abandoned.await.unwrap();
    current.await.unwrap();

    assert_eq!(console.selected_division().as_deref(), Some("North"));
    assert!(console.is_ready("North"));
    assert!(console.error().is_none(), "got {:?}", console.error());
    assert!(matches!(console.division_phase("South"), DivisionPhase::Error(_)));
    assert!(!console.is_ready("South"));
    assert!(!console.loading().settings);
}

#[tokio::test]
async fn allotment_failure_on_calendar_select_recovers_on_refresh() {
    let store = seeded_store();
    let console = console_for(&store);
    console.select_division("North").await;
    store.fail_on(StoreOperation::FindYearly, "upstream unavailable");

    console.select_calendar(Some("n-bravo")).await;

    assert!(matches!(console.division_phase("North"), DivisionPhase::Error(_)));
    assert!(!console.is_ready("North"));
    assert!(!console.loading().allotments);
    let error = console.error().unwrap();
    assert!(error.contains("n-bravo"), "got {}", error);
    assert_eq!(console.selected_calendar().as_deref(), Some("n-bravo"));

    store.clear_failures();
    console.refresh().await;

    assert!(console.is_ready("North"));
    assert_eq!(console.division_phase("North"), DivisionPhase::Ready);
    assert_eq!(
        console.displayed_allotments().calendar_id.as_deref(),
        Some("n-bravo")
    );
}
