//! Scope resolution state machine.
//!
//! Drives each division through
//! `Unloaded → SettingsLoading → SettingsLoaded → AllotmentsLoading → Ready`
//! (or `Error` from any of them), picks the active calendar, and decides per
//! selection whether the cache can serve it or a fetch is needed.
//!
//! Entry points never return errors. Failures land in the shared error field
//! and the loading flags are reset, so the UI keeps rendering whatever stale
//! data it had.
//!
//! Every path that awaits captures a [`ScopeToken`] first and compares it with
//! the live selection afterwards; results for a scope the user has already
//! left still go into the cache but never into the display.

use log::{debug, info, warn};
use shared::{Calendar, Division};
use std::sync::Arc;

use crate::backend::storage::AllotmentStore;

use super::allotment_service::AllotmentService;
use super::console_state::{DivisionPhase, DivisionScope, ScopeToken, StateHandle};
use super::errors::ConsoleError;
use super::fetch_registry::{FetchRegistry, InFlightKey};
use super::week_calendar::current_utc_year;

/// Division row plus its calendars, ordered by name
#[derive(Debug, Clone, PartialEq)]
pub struct DivisionSettings {
    pub division: Division,
    pub calendars: Vec<Calendar>,
}

/// Pick the calendar to show for a division.
///
/// Keeps `previous` if it is still listed and active. Otherwise takes the
/// first active calendar by name, then the first calendar of any state,
/// then nothing.
pub fn resolve_active_calendar(calendars: &[Calendar], previous: Option<&str>) -> Option<String> {
    if let Some(previous) = previous {
        if calendars.iter().any(|c| c.id == previous && c.is_active) {
            return Some(previous.to_string());
        }
    }

    let mut ordered: Vec<&Calendar> = calendars.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));
    ordered
        .iter()
        .find(|c| c.is_active)
        .or_else(|| ordered.first())
        .map(|c| c.id.clone())
}

enum Activation {
    Done,
    Fetch { token: ScopeToken, calendar_id: String },
}

enum Revalidation {
    Done,
    LoadDivision,
    Activate(Option<String>),
}

#[derive(Clone)]
pub struct ScopeResolver {
    store: Arc<dyn AllotmentStore>,
    state: StateHandle,
    allotments: AllotmentService,
    settings_fetches: FetchRegistry<DivisionSettings>,
    reference_year: Option<i32>,
}

impl ScopeResolver {
    pub fn new(
        store: Arc<dyn AllotmentStore>,
        state: StateHandle,
        allotments: AllotmentService,
        reference_year: Option<i32>,
    ) -> Self {
        Self {
            store,
            state,
            allotments,
            settings_fetches: FetchRegistry::new(),
            reference_year,
        }
    }

    /// Current and next calendar year, the years a ready calendar must have loaded
    pub fn active_years(&self) -> [i32; 2] {
        let year = self.reference_year.unwrap_or_else(current_utc_year);
        [year, year + 1]
    }

    /// Make sure the division's settings are known.
    ///
    /// Short-circuits to a readiness check when the division's calendars are
    /// already loaded and one of them is selected. Otherwise fetches the
    /// division row and its calendars in parallel through the registry.
    pub async fn ensure_division_loaded(&self, name: &str) -> Result<DivisionSettings, ConsoleError> {
        let known = self.state.read(|s| {
            let selected_here = s.selected_division.as_deref() == Some(name) && s.selected_calendar.is_some();
            if selected_here && s.phase(name).calendars_known() {
                s.divisions.get(name).map(|scope| DivisionSettings {
                    division: scope.division.clone(),
                    calendars: scope.calendars.clone(),
                })
            } else {
                None
            }
        });
        if let Some(settings) = known {
            debug!("Division {} already loaded, revalidating readiness", name);
            self.revalidate_readiness(name).await;
            return Ok(settings);
        }

        self.load_settings(name).await
    }

    /// Fetch the division's settings and record them in the shadow copy
    async fn load_settings(&self, name: &str) -> Result<DivisionSettings, ConsoleError> {
        self.state.update(|s| {
            s.set_phase(name, DivisionPhase::SettingsLoading);
            s.begin_settings_load();
        });

        let result = self.fetch_settings(name).await;

        self.state.update(|s| {
            s.finish_settings_load();
            match &result {
                Ok(settings) => {
                    let last_selected_calendar = s
                        .divisions
                        .get(name)
                        .and_then(|scope| scope.last_selected_calendar.clone());
                    s.divisions.insert(
                        name.to_string(),
                        DivisionScope {
                            division: settings.division.clone(),
                            calendars: settings.calendars.clone(),
                            last_selected_calendar,
                        },
                    );
                    s.set_phase(name, DivisionPhase::SettingsLoaded);
                }
                Err(e) => {
                    s.set_phase(name, DivisionPhase::Error(e.to_string()));
                    if s.selected_division.as_deref() == Some(name) {
                        s.record_error(e.to_string());
                    }
                }
            }
        });

        match &result {
            Ok(settings) => info!(
                "Loaded division {} with {} calendars",
                name,
                settings.calendars.len()
            ),
            Err(e) => warn!("Division {} failed to load: {}", name, e),
        }
        result
    }

    async fn fetch_settings(&self, name: &str) -> Result<DivisionSettings, ConsoleError> {
        let store = Arc::clone(&self.store);
        let name = name.to_string();

        self.settings_fetches
            .dedupe(InFlightKey::division(&name), move || async move {
                let (division, mut calendars) = tokio::try_join!(
                    async {
                        store
                            .find_division(&name)
                            .await
                            .map_err(|e| ConsoleError::remote(format!("Failed to load division {}", name), &e))
                    },
                    async {
                        store
                            .list_calendars(&name)
                            .await
                            .map_err(|e| ConsoleError::remote(format!("Failed to load calendars for division {}", name), &e))
                    }
                )?;
                let division = division.ok_or_else(|| ConsoleError::not_found(format!("Division {} not found", name)))?;
                calendars.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(DivisionSettings { division, calendars })
            })
            .await
    }

    /// Switch the console from division `from` to `to`.
    ///
    /// Re-selecting the current division only revalidates readiness. A real
    /// switch never touches the division being left: its cache entries and
    /// readiness flag stay as they are.
    pub async fn prepare_division_switch(&self, from: Option<&str>, to: &str) {
        if from == Some(to) {
            self.state.update(|s| {
                if s.selected_division.is_none() {
                    s.selected_division = Some(to.to_string());
                }
            });
            self.revalidate_readiness(to).await;
            return;
        }

        info!("Switching division {:?} -> {}", from, to);
        self.state.update(|s| {
            if let Some(previous) = s.selected_division.clone() {
                let selected = s.selected_calendar.clone();
                if let Some(scope) = s.divisions.get_mut(&previous) {
                    scope.last_selected_calendar = selected;
                }
            }
            s.readiness.mark_not_ready(to);
            s.selected_division = Some(to.to_string());
            s.selected_calendar = None;
            s.error = None;
            s.clear_display();
        });

        let loaded = self.ensure_division_loaded(to).await;
        self.settle_division(to, loaded).await;
    }

    /// Resolve and activate a calendar once settings are in, or record the failure
    async fn settle_division(&self, division: &str, loaded: Result<DivisionSettings, ConsoleError>) {
        match loaded {
            Ok(settings) => {
                let next = self.state.read(|s| {
                    if s.selected_division.as_deref() != Some(division) {
                        return None;
                    }
                    let previous = s.selected_calendar.clone().or_else(|| {
                        s.divisions
                            .get(division)
                            .and_then(|scope| scope.last_selected_calendar.clone())
                    });
                    Some(resolve_active_calendar(&settings.calendars, previous.as_deref()))
                });

                match next {
                    Some(calendar_id) => self.activate_calendar(division, calendar_id).await,
                    None => debug!("Division {} is no longer selected, skipping calendar selection", division),
                }
            }
            Err(e) => {
                self.state.update(|s| {
                    s.readiness.mark_not_ready(division);
                    if s.selected_division.as_deref() == Some(division) {
                        s.selected_calendar = None;
                        s.clear_display();
                        s.record_error(e.to_string());
                    }
                });
            }
        }
    }

    /// Select a calendar within the current division. Unchanged selection is a no-op.
    pub async fn set_selected_calendar(&self, calendar_id: Option<&str>) {
        let check = self.state.read(|s| {
            let Some(division) = s.selected_division.clone() else {
                return Err(ConsoleError::validation("Select a division before choosing a calendar"));
            };
            if s.selected_calendar.as_deref() == calendar_id {
                return Ok(None);
            }
            if let (Some(id), Some(scope)) = (calendar_id, s.divisions.get(&division)) {
                if scope.calendar(id).is_none() {
                    return Err(ConsoleError::not_found(format!(
                        "Calendar {} does not belong to division {}",
                        id, division
                    )));
                }
            }
            Ok(Some(division))
        });

        match check {
            Ok(Some(division)) => {
                self.activate_calendar(&division, calendar_id.map(str::to_string))
                    .await
            }
            Ok(None) => debug!("Calendar {:?} already selected", calendar_id),
            Err(e) => {
                warn!("Calendar selection rejected: {}", e);
                self.state.update(|s| s.record_error(e.to_string()));
            }
        }
    }

    /// Make `calendar_id` the live selection of `division` and load it
    async fn activate_calendar(&self, division: &str, calendar_id: Option<String>) {
        let years = self.active_years();
        let activation = self.state.update(|s| {
            s.selected_calendar = calendar_id.clone();
            if let Some(scope) = s.divisions.get_mut(division) {
                scope.last_selected_calendar = calendar_id.clone();
            }
            s.clear_display();
            s.readiness.mark_not_ready(division);

            match calendar_id.as_deref() {
                None => {
                    s.readiness.mark_ready(division);
                    s.set_phase(division, DivisionPhase::Ready);
                    Activation::Done
                }
                Some(id) if s.cache.has_years(id, &years) => {
                    debug!("Cache hit for calendar {}", id);
                    s.hydrate_display();
                    s.readiness.mark_ready(division);
                    s.set_phase(division, DivisionPhase::Ready);
                    Activation::Done
                }
                Some(id) => {
                    s.set_phase(division, DivisionPhase::AllotmentsLoading);
                    s.begin_allotment_load();
                    Activation::Fetch {
                        token: s.scope_token(),
                        calendar_id: id.to_string(),
                    }
                }
            }
        });

        if let Activation::Fetch { token, calendar_id } = activation {
            self.load_calendar_allotments(division, token, &calendar_id).await;
        }
    }

    async fn load_calendar_allotments(&self, division: &str, token: ScopeToken, calendar_id: &str) {
        let years = self.active_years();
        let result = self.allotments.fetch_years(calendar_id, &years).await;

        self.state.update(|s| {
            s.finish_allotment_load();
            let current = s.is_current(&token);
            match &result {
                Ok(_) if current => {
                    s.hydrate_display();
                    s.readiness.mark_ready(division);
                    s.set_phase(division, DivisionPhase::Ready);
                }
                Ok(_) => debug!(
                    "Discarding allotments for calendar {}: selection moved on",
                    calendar_id
                ),
                Err(e) if current => {
                    s.set_phase(division, DivisionPhase::Error(e.to_string()));
                    s.record_error(e.to_string());
                }
                Err(e) => warn!("Stale allotment fetch for calendar {} failed: {}", calendar_id, e),
            }
        });
    }

    /// Bring the readiness flag of `division` back in line with what is loaded,
    /// fetching only what is missing
    pub async fn revalidate_readiness(&self, division: &str) {
        let years = self.active_years();
        let plan = self.state.update(|s| {
            if !s.phase(division).calendars_known() {
                return Revalidation::LoadDivision;
            }
            if s.selected_division.as_deref() != Some(division) {
                return Revalidation::Done;
            }
            match s.selected_calendar.clone() {
                None => {
                    s.readiness.mark_ready(division);
                    Revalidation::Done
                }
                Some(id) if s.cache.has_years(&id, &years) => {
                    if s.display.calendar_id.as_deref() != Some(id.as_str()) || s.display.is_empty() {
                        s.hydrate_display();
                    }
                    s.readiness.mark_ready(division);
                    s.set_phase(division, DivisionPhase::Ready);
                    Revalidation::Done
                }
                Some(id) => Revalidation::Activate(Some(id)),
            }
        });

        match plan {
            Revalidation::Done => {}
            Revalidation::LoadDivision => {
                let loaded = self.load_settings(division).await;
                self.settle_division(division, loaded).await;
            }
            Revalidation::Activate(calendar_id) => self.activate_calendar(division, calendar_id).await,
        }
    }

    /// Unload a division entirely: shadow copy, phase, readiness and the cache
    /// entries of its calendars
    pub fn cleanup_division(&self, division: &str) {
        let evicted = self.state.update(|s| {
            let evicted = match s.divisions.remove(division) {
                Some(scope) => s.cache.invalidate_many(scope.calendar_ids()),
                None => 0,
            };
            s.phases.remove(division);
            s.readiness.forget(division);
            if s.selected_division.as_deref() == Some(division) {
                s.selected_division = None;
                s.selected_calendar = None;
                s.clear_display();
            }
            evicted
        });
        info!("Cleaned up division {} ({} cache entries evicted)", division, evicted);
    }
}
