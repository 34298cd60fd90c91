//! Watch/Notify loop state.
//!
//! Each tick classifies every Worker in scope. A Worker earns exactly one
//! notification when it is seen finishing (`done`/`failed`) after having been
//! seen `working` or `waiting` during this watch session. Workers that are
//! already finished the first time we see them are history and stay silent.

use crate::classifier::Classifier;
use crate::status::{Scope, WorkerStatus, survey};
use chrono::{DateTime, Utc};
use ralph_proto::{ContainerRuntime, Notification, Notifier, ObservedState, Outcome, RuntimeError};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
struct Track {
    has_been_working: bool,
    has_been_notified: bool,
}

/// Per-session notification bookkeeping, keyed by container id so a
/// recreated Worker starts fresh.
#[derive(Debug, Default)]
pub struct WatchState {
    tracks: HashMap<String, Track>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation and returns the outcome to announce, if any.
    pub fn observe(&mut self, key: &str, state: ObservedState) -> Option<Outcome> {
        let first_sighting = !self.tracks.contains_key(key);
        let track = self.tracks.entry(key.to_string()).or_default();

        if state.is_active() {
            track.has_been_working = true;
            return None;
        }
        if !state.is_terminal() {
            return None;
        }
        if first_sighting {
            track.has_been_notified = true;
            return None;
        }
        if track.has_been_working && !track.has_been_notified {
            track.has_been_notified = true;
            return Some(if state == ObservedState::Done {
                Outcome::Success
            } else {
                Outcome::Failure
            });
        }
        None
    }

    /// Forgets Workers that no longer exist.
    pub fn retain(&mut self, live: &HashSet<String>) {
        self.tracks.retain(|key, _| live.contains(key));
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// What one tick saw and announced.
#[derive(Debug, Default)]
pub struct TickReport {
    pub statuses: Vec<WorkerStatus>,
    pub notifications: Vec<Notification>,
}

/// Drives watch ticks for one scope.
pub struct Watcher {
    scope: Scope,
    classifier: Classifier,
    state: WatchState,
}

impl Watcher {
    pub fn new(scope: Scope, classifier: Classifier) -> Self {
        Self {
            scope,
            classifier,
            state: WatchState::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Classifies every Worker once and delivers any due notifications.
    /// Delivery failures are logged and otherwise ignored.
    pub async fn tick(
        &mut self,
        runtime: &dyn ContainerRuntime,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> Result<TickReport, RuntimeError> {
        let statuses = survey(runtime, &self.classifier, &self.scope, now).await?;

        let live: HashSet<String> = statuses.iter().map(|s| s.id.clone()).collect();
        self.state.retain(&live);

        let mut notifications = Vec::new();
        for status in &statuses {
            let Some(outcome) = self.state.observe(&status.id, status.state) else {
                continue;
            };
            let notification = Notification::for_outcome(
                status.name.clone(),
                status.task_id.as_ref().map(ToString::to_string),
                status.project.clone(),
                outcome,
            );
            info!(worker = %status.name, outcome = ?outcome, "Worker finished");
            if let Err(e) = notifier.notify(&notification).await {
                warn!(worker = %status.name, error = %e, "Notification not delivered");
            }
            notifications.push(notification);
        }

        debug!(workers = statuses.len(), notified = notifications.len(), "Watch tick");
        Ok(TickReport {
            statuses,
            notifications,
        })
    }
}
