//! Remote measurement lifecycle.
//!
//! ```text
//! UNSUBMITTED --upload--> SUBMITTED
//! SUBMITTED   --accepted--> PROCESSING
//! SUBMITTED   --rejected--> FAILED
//! PROCESSING  --complete--> DONE
//! PROCESSING  --error-->    FAILED
//! DONE|FAILED --rerun-->    PROCESSING
//! SUBMITTED|PROCESSING|DONE|FAILED --delete--> DELETED
//! ```
//!
//! The registry records the last state confirmed by the service. It is only
//! written after a response has been received and parsed, and its lock is
//! never held across a request.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::warn;

use crate::error::{Result, SccError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasurementState {
    Unsubmitted,
    Submitted,
    Processing,
    Done,
    Failed,
    Deleted,
}

impl fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeasurementState::Unsubmitted => "UNSUBMITTED",
            MeasurementState::Submitted => "SUBMITTED",
            MeasurementState::Processing => "PROCESSING",
            MeasurementState::Done => "DONE",
            MeasurementState::Failed => "FAILED",
            MeasurementState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Inputs that move a measurement between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Upload,
    Accepted,
    Rejected,
    Complete,
    Error,
    Rerun,
    Delete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Event::Upload => "upload",
            Event::Accepted => "be accepted",
            Event::Rejected => "be rejected",
            Event::Complete => "complete",
            Event::Error => "fail",
            Event::Rerun => "rerun",
            Event::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl MeasurementState {
    /// The allowed-transition table. `None` means the event is not allowed.
    pub fn next(self, event: Event) -> Option<MeasurementState> {
        use Event::*;
        use MeasurementState::*;

        match (self, event) {
            (Unsubmitted, Upload) => Some(Submitted),
            (Submitted, Accepted) => Some(Processing),
            (Submitted, Rejected) => Some(Failed),
            (Processing, Complete) => Some(Done),
            (Processing, Error) => Some(Failed),
            (Done | Failed, Rerun) => Some(Processing),
            (Submitted | Processing | Done | Failed, Delete) => Some(Deleted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == MeasurementState::Deleted
    }

    /// Processing has finished, successfully or not.
    pub fn is_settled(self) -> bool {
        matches!(self, MeasurementState::Done | MeasurementState::Failed)
    }

    /// Events leading from `self` to an observed remote state, if the table
    /// allows it. Staying put is an empty path.
    fn path_to(self, observed: MeasurementState) -> Option<Vec<Event>> {
        use Event::*;
        use MeasurementState::*;

        if self == observed {
            return Some(Vec::new());
        }
        let path = match (self, observed) {
            (Submitted, Processing) => vec![Accepted],
            (Submitted, Done) => vec![Accepted, Complete],
            (Submitted, Failed) => vec![Rejected],
            (Processing, Done) => vec![Complete],
            (Processing, Failed) => vec![Error],
            (Done | Failed, Processing) => vec![Rerun],
            _ => return None,
        };
        Some(path)
    }

    /// Step through `events`; `None` if any step is not in the table.
    fn apply(self, events: &[Event]) -> Option<MeasurementState> {
        events
            .iter()
            .try_fold(self, |state, &event| state.next(event))
    }
}

/// Last known remote state of one measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeasurement {
    pub id: String,
    pub state: MeasurementState,
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<String, MeasurementState>,
    /// Ids with a state-changing request on the wire
    in_flight: HashSet<String>,
}

/// Thread-safe map of measurement id to lifecycle state.
#[derive(Debug, Default)]
pub struct MeasurementRegistry {
    inner: Mutex<Inner>,
}

/// Reservation for a state-changing request. Released on drop unless
/// committed.
#[must_use]
pub struct Transition<'a> {
    registry: &'a MeasurementRegistry,
    id: String,
    target: MeasurementState,
    committed: bool,
}

impl Transition<'_> {
    pub fn target(&self) -> MeasurementState {
        self.target
    }

    /// Record the new state once the service confirmed the request.
    pub fn commit(mut self) -> MeasurementState {
        let mut inner = self.registry.lock();
        inner.in_flight.remove(&self.id);
        inner.states.insert(self.id.clone(), self.target);
        self.committed = true;
        self.target
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.lock().in_flight.remove(&self.id);
        }
    }
}

impl MeasurementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves both maps consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Known state; untracked ids are `None`.
    pub fn state(&self, id: &str) -> Option<MeasurementState> {
        self.lock().states.get(id).copied()
    }

    pub fn snapshot(&self) -> Vec<RemoteMeasurement> {
        let mut all: Vec<RemoteMeasurement> = self
            .lock()
            .states
            .iter()
            .map(|(id, state)| RemoteMeasurement {
                id: id.clone(),
                state: *state,
            })
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Check that `event` is allowed for `id` and reserve the id until the
    /// request completes. Untracked ids count as `UNSUBMITTED`.
    pub fn begin(&self, id: &str, event: Event) -> Result<Transition<'_>> {
        let mut inner = self.lock();
        let state = inner
            .states
            .get(id)
            .copied()
            .unwrap_or(MeasurementState::Unsubmitted);

        if event == Event::Upload
            && (inner.in_flight.contains(id)
                || !matches!(
                    state,
                    MeasurementState::Unsubmitted | MeasurementState::Deleted
                ))
        {
            return Err(SccError::DuplicateUpload(id.to_string()));
        }
        if inner.in_flight.contains(id) {
            return Err(SccError::Rejected {
                status: None,
                message: format!("another request for {} is in progress", id),
            });
        }

        let target = state.next(event).ok_or_else(|| SccError::InvalidTransition {
            id: id.to_string(),
            state,
            event,
        })?;
        inner.in_flight.insert(id.to_string());

        Ok(Transition {
            registry: self,
            id: id.to_string(),
            target,
            committed: false,
        })
    }

    /// Apply a state observed on the service (poll or search) and return
    /// the recorded state.
    ///
    /// Observations the table can explain are stepped through it. Anything
    /// else means the service changed outside this client and the observed
    /// state is adopted, except that `DELETED` is never left: a deleted
    /// measurement may linger in listings for a while.
    pub fn observe(&self, id: &str, observed: MeasurementState) -> MeasurementState {
        let mut inner = self.lock();
        let Some(current) = inner.states.get(id).copied() else {
            inner.states.insert(id.to_string(), observed);
            return observed;
        };

        if current.is_terminal() {
            if observed != current {
                warn!(id = %id, remote = %observed, "Ignoring remote state of a deleted measurement");
            }
            return current;
        }

        let next = match current.path_to(observed).and_then(|path| current.apply(&path)) {
            Some(next) => next,
            None => {
                warn!(
                    id = %id,
                    local = %current,
                    remote = %observed,
                    "Remote state changed outside this client"
                );
                observed
            }
        };
        inner.states.insert(id.to_string(), next);
        next
    }

    /// Forget an id, e.g. when the service no longer knows it.
    pub fn forget(&self, id: &str) {
        self.lock().states.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MeasurementState::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(Unsubmitted.next(Event::Upload), Some(Submitted));
        assert_eq!(Submitted.next(Event::Accepted), Some(Processing));
        assert_eq!(Submitted.next(Event::Rejected), Some(Failed));
        assert_eq!(Processing.next(Event::Complete), Some(Done));
        assert_eq!(Processing.next(Event::Error), Some(Failed));
        assert_eq!(Done.next(Event::Rerun), Some(Processing));
        assert_eq!(Failed.next(Event::Rerun), Some(Processing));
        for state in [Submitted, Processing, Done, Failed] {
            assert_eq!(state.next(Event::Delete), Some(Deleted));
        }
    }

    #[test]
    fn test_disallowed_transitions() {
        assert_eq!(Unsubmitted.next(Event::Delete), None);
        assert_eq!(Unsubmitted.next(Event::Rerun), None);
        assert_eq!(Submitted.next(Event::Rerun), None);
        assert_eq!(Processing.next(Event::Rerun), None);
        assert_eq!(Done.next(Event::Upload), None);
        for event in [Event::Upload, Event::Rerun, Event::Delete, Event::Accepted] {
            assert_eq!(Deleted.next(event), None);
        }
    }

    #[test]
    fn test_second_upload_is_rejected_locally() {
        let registry = MeasurementRegistry::new();
        let transition = registry.begin("ABC", Event::Upload).unwrap();
        assert!(matches!(
            registry.begin("ABC", Event::Upload),
            Err(SccError::DuplicateUpload(_))
        ));
        assert_eq!(transition.commit(), Submitted);
        assert!(matches!(
            registry.begin("ABC", Event::Upload),
            Err(SccError::DuplicateUpload(_))
        ));
    }

    #[test]
    fn test_dropped_transition_releases_reservation() {
        let registry = MeasurementRegistry::new();
        drop(registry.begin("ABC", Event::Upload).unwrap());
        assert_eq!(registry.state("ABC"), None);
        assert!(registry.begin("ABC", Event::Upload).is_ok());
    }

    #[test]
    fn test_rerun_requires_settled_state() {
        let registry = MeasurementRegistry::new();
        registry.observe("ABC", Processing);
        assert!(matches!(
            registry.begin("ABC", Event::Rerun),
            Err(SccError::InvalidTransition { state: Processing, .. })
        ));

        registry.observe("ABC", Done);
        let t = registry.begin("ABC", Event::Rerun).unwrap();
        assert_eq!(t.commit(), Processing);
    }

    #[test]
    fn test_observe_steps_and_adopts() {
        let registry = MeasurementRegistry::new();
        registry.begin("ABC", Event::Upload).unwrap().commit();
        assert_eq!(registry.observe("ABC", Done), Done);
        assert_eq!(registry.state("ABC"), Some(Done));

        registry.begin("ABC", Event::Delete).unwrap().commit();
        assert_eq!(registry.state("ABC"), Some(Deleted));
        assert!(registry.begin("ABC", Event::Rerun).is_err());
    }

    #[test]
    fn test_path_to() {
        assert_eq!(
            Submitted.path_to(Done),
            Some(vec![Event::Accepted, Event::Complete])
        );
        assert_eq!(Submitted.path_to(Failed), Some(vec![Event::Rejected]));
        assert_eq!(Done.path_to(Done), Some(vec![]));
        assert_eq!(Done.path_to(Submitted), None);
    }

    #[test]
    fn test_every_path_lands_on_the_observed_state() {
        let all = [Unsubmitted, Submitted, Processing, Done, Failed, Deleted];
        for from in all {
            for to in all {
                if let Some(path) = from.path_to(to) {
                    assert_eq!(from.apply(&path), Some(to), "{} -> {}", from, to);
                }
            }
        }
    }

    #[test]
    fn test_deleted_is_never_left_by_observation() {
        let registry = MeasurementRegistry::new();
        registry.begin("ABC", Event::Upload).unwrap().commit();
        registry.observe("ABC", Done);
        registry.begin("ABC", Event::Delete).unwrap().commit();

        assert_eq!(registry.observe("ABC", Done), Deleted);
        assert_eq!(registry.observe("ABC", Processing), Deleted);
        assert_eq!(registry.state("ABC"), Some(Deleted));
    }

    #[test]
    fn test_rejected_submission_is_explained() {
        let registry = MeasurementRegistry::new();
        registry.begin("ABC", Event::Upload).unwrap().commit();
        assert_eq!(registry.observe("ABC", Failed), Failed);
        assert!(registry.begin("ABC", Event::Rerun).is_ok());
    }

    #[test]
    fn test_unexplained_observation_is_adopted() {
        let registry = MeasurementRegistry::new();
        registry.observe("ABC", Done);
        assert_eq!(registry.observe("ABC", Submitted), Submitted);
    }
}
