//! Observers - watch a saga run without steering it.
//!
//! # Notification Points
//!
//! The coordinator fires three hooks, always in-line with execution:
//!
//! ```text
//! step succeeds
//!  → on_saga_state_changed(entry)   ← before the repository save completes
//!  → repository.save(entry)
//!  → on_step_completed(step, state) ← after the save
//!
//! step fails
//!  → on_saga_state_changed(entry)
//!  → repository.save(entry)          (best-effort)
//!  → on_step_failed(step, state, error)
//!
//! step rolled back
//!  → on_saga_state_changed(entry)
//!  → repository.save(entry)          (best-effort)
//! ```
//!
//! The ordering against persistence is part of the contract: a state-changed
//! observer sees a transition that may not be durable yet, a step-completed
//! observer sees one that is.
//!
//! # Keep Hooks Fast
//!
//! Hooks are synchronous and run on the saga's own thread of control. They
//! observe, they don't act: no IO, no blocking, no mutation of saga state.
//! Hand anything heavy to a channel or a spawned task inside the observer.

use std::sync::Arc;

use crate::core::{LogEntry, SagaId, SagaState, StepKind};

// =============================================================================
// Saga Observer Trait
// =============================================================================

/// Subscriber to saga lifecycle notifications.
///
/// All hooks default to doing nothing, so implementations override only what
/// they care about.
///
/// # Example
///
/// ```ignore
/// use unwind::{SagaId, SagaObserver, SagaState, StepKind};
///
/// struct FailureCounter {
///     failures: Arc<AtomicUsize>,
/// }
///
/// impl SagaObserver for FailureCounter {
///     fn on_step_failed(&self, _: SagaId, _: StepKind, _: SagaState, _: &anyhow::Error) {
///         self.failures.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait SagaObserver: Send + Sync + 'static {
    /// A transition was recorded. Fires before the corresponding repository
    /// save completes; the new state is `entry.state`.
    fn on_saga_state_changed(&self, _saga_id: SagaId, _entry: &LogEntry) {}

    /// A step's forward action succeeded and its transition was persisted.
    fn on_step_completed(&self, _saga_id: SagaId, _step: StepKind, _state: SagaState) {}

    /// A step's forward action failed; rollback is about to begin.
    fn on_step_failed(
        &self,
        _saga_id: SagaId,
        _step: StepKind,
        _state: SagaState,
        _error: &anyhow::Error,
    ) {
    }
}

// =============================================================================
// Observer Registry
// =============================================================================

/// Registry of saga observers, notified in registration order.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: Vec<RegisteredObserver>,
}

struct RegisteredObserver {
    name: &'static str,
    observer: Arc<dyn SagaObserver>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Register an observer under a name (for debugging).
    pub fn register<O: SagaObserver>(&mut self, observer: O, name: &'static str) {
        self.observers.push(RegisteredObserver {
            name,
            observer: Arc::new(observer),
        });
    }

    pub fn saga_state_changed(&self, saga_id: SagaId, entry: &LogEntry) {
        for registered in &self.observers {
            registered.observer.on_saga_state_changed(saga_id, entry);
        }
    }

    pub fn step_completed(&self, saga_id: SagaId, step: StepKind, state: SagaState) {
        for registered in &self.observers {
            registered.observer.on_step_completed(saga_id, step, state);
        }
    }

    pub fn step_failed(
        &self,
        saga_id: SagaId,
        step: StepKind,
        state: SagaState,
        error: &anyhow::Error,
    ) {
        for registered in &self.observers {
            registered.observer.on_step_failed(saga_id, step, state, error);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.observers.iter().map(|r| r.name).collect();
        f.debug_struct("ObserverRegistry")
            .field("observers", &names)
            .finish()
    }
}

// =============================================================================
// Recording Observer (for testing)
// =============================================================================

/// Observer test double that records every notification.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::{Mutex, PoisonError};

    use super::*;

    /// One recorded notification, in arrival order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Observed {
        StateChanged {
            saga_id: SagaId,
            step: StepKind,
            state: SagaState,
        },
        StepCompleted {
            saga_id: SagaId,
            step: StepKind,
            state: SagaState,
        },
        StepFailed {
            saga_id: SagaId,
            step: StepKind,
            state: SagaState,
            error: String,
        },
    }

    /// Observer that records everything it sees for later assertions.
    ///
    /// Cloning shares the underlying record, so keep a clone before handing
    /// the observer to a coordinator:
    ///
    /// ```ignore
    /// let recorder = RecordingObserver::new();
    /// let coordinator = SagaCoordinator::new(repo).with_observer(recorder.clone());
    /// // ... execute ...
    /// assert_eq!(recorder.observed().len(), 4);
    /// ```
    #[derive(Clone, Default)]
    pub struct RecordingObserver {
        seen: Arc<Mutex<Vec<Observed>>>,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything observed so far, in order.
        pub fn observed(&self) -> Vec<Observed> {
            self.lock().clone()
        }

        /// Number of notifications observed so far.
        pub fn count(&self) -> usize {
            self.lock().len()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Observed>> {
            // A poisoned record is still the best diagnostic we have.
            self.seen.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl SagaObserver for RecordingObserver {
        fn on_saga_state_changed(&self, saga_id: SagaId, entry: &LogEntry) {
            self.lock().push(Observed::StateChanged {
                saga_id,
                step: entry.step,
                state: entry.state,
            });
        }

        fn on_step_completed(&self, saga_id: SagaId, step: StepKind, state: SagaState) {
            self.lock().push(Observed::StepCompleted {
                saga_id,
                step,
                state,
            });
        }

        fn on_step_failed(
            &self,
            saga_id: SagaId,
            step: StepKind,
            state: SagaState,
            error: &anyhow::Error,
        ) {
            self.lock().push(Observed::StepFailed {
                saga_id,
                step,
                state,
                error: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::{Observed, RecordingObserver};
    use super::*;

    fn entry(kind: &'static str, state: SagaState) -> LogEntry {
        LogEntry::new(StepKind::new(kind), state)
    }

    #[test]
    fn test_default_hooks_do_nothing() {
        struct Silent;
        impl SagaObserver for Silent {}

        let observer = Silent;
        let saga_id = SagaId::new();

        observer.on_saga_state_changed(saga_id, &entry("a", SagaState::Completed));
        observer.on_step_completed(saga_id, StepKind::new("a"), SagaState::Completed);
        observer.on_step_failed(
            saga_id,
            StepKind::new("a"),
            SagaState::Failed,
            &anyhow::anyhow!("boom"),
        );
    }

    #[test]
    fn test_registry_notifies_in_registration_order() {
        struct NamedProbe {
            name: &'static str,
            record: Arc<Mutex<Vec<String>>>,
        }

        impl SagaObserver for NamedProbe {
            fn on_step_completed(&self, _saga_id: SagaId, step: StepKind, _state: SagaState) {
                self.record
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", self.name, step));
            }
        }

        let record = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        registry.register(
            NamedProbe {
                name: "first",
                record: record.clone(),
            },
            "first_probe",
        );
        registry.register(
            NamedProbe {
                name: "second",
                record: record.clone(),
            },
            "second_probe",
        );

        registry.step_completed(SagaId::new(), StepKind::new("charge"), SagaState::Completed);

        assert_eq!(
            *record.lock().unwrap(),
            vec!["first:charge".to_string(), "second:charge".to_string()]
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_debug_lists_names() {
        let mut registry = ObserverRegistry::new();
        registry.register(RecordingObserver::new(), "recorder");

        let debug = format!("{:?}", registry);
        assert!(debug.contains("recorder"));
    }

    #[test]
    fn test_recording_observer_captures_all_hooks() {
        let recorder = RecordingObserver::new();
        let saga_id = SagaId::new();
        let charge = StepKind::new("charge");

        recorder.on_saga_state_changed(saga_id, &entry("charge", SagaState::Completed));
        recorder.on_step_completed(saga_id, charge, SagaState::Completed);
        recorder.on_step_failed(saga_id, charge, SagaState::Failed, &anyhow::anyhow!("boom"));

        let observed = recorder.observed();
        assert_eq!(observed.len(), 3);
        assert_eq!(
            observed[0],
            Observed::StateChanged {
                saga_id,
                step: charge,
                state: SagaState::Completed,
            }
        );
        assert_eq!(
            observed[1],
            Observed::StepCompleted {
                saga_id,
                step: charge,
                state: SagaState::Completed,
            }
        );
        assert!(matches!(
            &observed[2],
            Observed::StepFailed { error, .. } if error.contains("boom")
        ));
    }

    #[test]
    fn test_recording_observer_clones_share_storage() {
        let recorder = RecordingObserver::new();
        let clone = recorder.clone();

        recorder.on_step_completed(SagaId::new(), StepKind::new("a"), SagaState::Completed);

        assert_eq!(clone.count(), 1);
    }
}
