//! Core types for saga execution: identifiers, lifecycle states, and the
//! audit log entry.
//!
//! # Overview
//!
//! A saga is an ordered sequence of compensable steps driven by the
//! [`SagaCoordinator`](crate::SagaCoordinator). The types here are the
//! vocabulary everything else speaks:
//!
//! - [`SagaId`] identifies one saga run across the coordinator, the
//!   repository, and observers.
//! - [`SagaState`] is the coordinator-tracked lifecycle marker, distinct from
//!   the application's own business state object.
//! - [`StepKind`] is the stable identity token of a step. Dependency
//!   declarations and compensation eligibility both key on it.
//! - [`LogEntry`] records one transition: which step, what state it produced,
//!   and when.
//!
//! # Step Identity
//!
//! Two step instances sharing a [`StepKind`] are the same step as far as
//! dependencies and rollback are concerned. The token must stay stable once
//! entries referencing it have been persisted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one saga run.
///
/// Opaque and unique: the coordinator treats it as a key into the repository
/// and never inspects it. Use [`SagaId::new`] for a fresh random identifier,
/// or convert from an existing `Uuid` when the embedding application already
/// has one (an order id, a request id).
///
/// # Example
///
/// ```ignore
/// use unwind::SagaId;
///
/// let saga_id = SagaId::new();
///
/// // Reuse an application-level identifier
/// let saga_id = SagaId::from(order_uuid);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Create a new random saga identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SagaId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SagaId> for Uuid {
    fn from(id: SagaId) -> Uuid {
        id.0
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a saga.
///
/// The state cell starts at [`SagaState::NotStarted`] and afterwards only
/// ever holds values produced by a step's transition function
/// ([`SagaStep::next_state`](crate::SagaStep::next_state)). The state machine
/// is therefore step-defined, not globally fixed: each step decides what its
/// success and failure mean for the saga as a whole.
///
/// [`SagaState::Unknown`] is reserved for repository-reported ambiguity (for
/// example, a store that finds a partially written record and will not
/// guess). The coordinator never assigns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    /// No step has recorded a transition yet.
    NotStarted,
    /// Some work has been applied, but the saga is not finished.
    PartiallyCompleted,
    /// The saga finished successfully. Dependency gating and rollback
    /// eligibility both key on entries carrying this state.
    Completed,
    /// A step failed, or a completed step was rolled back.
    Failed,
    /// Persisted history cannot establish what happened.
    Unknown,
}

impl SagaState {
    /// Returns true if this is the `Completed` state.
    pub fn is_completed(&self) -> bool {
        matches!(self, SagaState::Completed)
    }

    /// Returns true if this is the `Failed` state.
    pub fn is_failed(&self) -> bool {
        matches!(self, SagaState::Failed)
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaState::NotStarted => write!(f, "not_started"),
            SagaState::PartiallyCompleted => write!(f, "partially_completed"),
            SagaState::Completed => write!(f, "completed"),
            SagaState::Failed => write!(f, "failed"),
            SagaState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Stable identity token for a step.
///
/// Used for dependency declarations, log-entry matching, and routing of
/// rollback work. Must not change once entries referencing it exist in a
/// repository.
///
/// `new` is const, so step implementations typically expose their kind as an
/// associated constant:
///
/// ```ignore
/// use unwind::StepKind;
///
/// const RESERVE_INVENTORY: StepKind = StepKind::new("reserve_inventory");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StepKind(&'static str);

impl StepKind {
    /// Create a step kind from a stable identifier.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Get the identifier string.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl From<&'static str> for StepKind {
    fn from(name: &'static str) -> Self {
        Self(name)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded state transition.
///
/// Entries are immutable once created and form an append-only sequence per
/// saga identifier. Relative order is significant: it is how the coordinator
/// answers "has this step already completed" during dependency gating and
/// rollback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// The step that produced this transition.
    pub step: StepKind,
    /// The saga state the transition produced.
    pub state: SagaState,
    /// When the transition was recorded.
    pub time: DateTime<Utc>,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(step: StepKind, state: SagaState) -> Self {
        Self {
            step,
            state,
            time: Utc::now(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} at {}", self.step, self.state, self.time)
    }
}
