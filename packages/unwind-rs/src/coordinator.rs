//! Saga orchestration: forward execution, dependency gating, and rollback.
//!
//! # Overview
//!
//! A [`SagaCoordinator`] drives a fixed, ordered list of steps against one
//! saga identifier and one shared state object. Steps run strictly one at a
//! time; the first failure flips the run into a reverse-order rollback of
//! everything the log recorded as completed.
//!
//! ```text
//! execute(saga_id, state, timeout)
//!     │
//!     ▼  for each step, in declaration order
//! dependencies met? ──no──► Err(DependencyUnmet), nothing rolled back
//!     │ yes
//! gate accepts current state? ──no──► skip step, continue
//!     │ yes
//! step.execute(state, cancel) ──err──► record Failed transition ──┐
//!     │ ok                                                        │
//! record Completed transition                                     ▼
//!     │                                   for each step, in REVERSE order,
//! step.publish_event(..) ──err──►──┘      if logged Completed:
//!     │                                       step.compensate(state, fresh)
//!     ▼                                       record Failed transition
//! next step ...                                   │
//!     │                                           ▼
//!     ▼                                   Ok(false), or
//! Ok(final state == Completed)            Err(CompensationFailed) if any
//!                                         undo action itself failed
//! ```
//!
//! # Timeout
//!
//! One wall-clock timeout bounds the entire forward pass. It is implemented
//! as a single cancellation token shared by every step of that pass: a timer
//! task fires the token at the deadline, each step receives the token for
//! cooperative observation, and the coordinator races every forward action
//! against it so that even a step that ignores the token is abandoned on
//! time. Rollback runs under a fresh, unbounded token: once a saga is
//! unwinding, finishing the undo work matters more than racing a clock.
//!
//! # Concurrency
//!
//! All per-run bookkeeping (the in-memory log and the current-state cell)
//! lives in a context value created inside [`SagaCoordinator::execute`], so
//! one coordinator can run any number of sagas concurrently. Each run still
//! needs its own state object: the `&mut S` borrow enforces that at compile
//! time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{LogEntry, SagaId, SagaState, StepKind};
use crate::error::{CompensationError, SagaError};
use crate::observer::{ObserverRegistry, SagaObserver};
use crate::repository::StateRepository;
use crate::step::SagaStep;

// =============================================================================
// Execution Context
// =============================================================================

/// Per-run bookkeeping: the in-memory log and the current-state cell.
///
/// Created at the start of one `execute` call and discarded at return. The
/// repository, not this context, is the durable record.
struct ExecutionContext {
    log: Vec<LogEntry>,
    current: SagaState,
}

impl ExecutionContext {
    fn new() -> Self {
        Self {
            log: Vec::new(),
            current: SagaState::NotStarted,
        }
    }

    /// Has `kind` been logged `Completed` in this run?
    ///
    /// Dependency gating and rollback eligibility both key on this; entries
    /// with any other state do not count.
    fn completed(&self, kind: StepKind) -> bool {
        self.log
            .iter()
            .any(|e| e.step == kind && e.state == SagaState::Completed)
    }

    /// First declared dependency with no `Completed` entry yet, if any.
    fn first_unmet(&self, deps: smallvec::SmallVec<[StepKind; 4]>) -> Option<StepKind> {
        deps.into_iter().find(|dep| !self.completed(*dep))
    }

    fn record(&mut self, step: StepKind, state: SagaState) -> LogEntry {
        self.current = state;
        let entry = LogEntry::new(step, state);
        self.log.push(entry.clone());
        entry
    }
}

/// How the forward pass ended, short of a fatal error.
enum ForwardFlow {
    /// Every step either ran or was skipped.
    Exhausted,
    /// A step failed; rollback is required.
    Failed {
        step: StepKind,
        error: anyhow::Error,
    },
}

// =============================================================================
// Saga Coordinator
// =============================================================================

/// Orchestrates an ordered list of compensable steps against a shared state
/// object, with an audit trail and automatic rollback on failure.
///
/// `S` is the application's own state type, threaded mutably through every
/// step. The coordinator itself holds no per-run state, so a single instance
/// (typically behind an `Arc`) serves many concurrent saga runs.
///
/// # Outcomes
///
/// [`SagaCoordinator::execute`] has exactly three observable outcomes:
///
/// | Outcome | Meaning |
/// |---------|---------|
/// | `Ok(true)` | every step ran or was skipped, final state is `Completed` |
/// | `Ok(false)` | a step failed (or the timeout fired) and rollback finished cleanly, or the run ended in a non-`Completed` state |
/// | `Err(_)` | a dependency was unmet, or rollback itself partially failed |
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use unwind::{SagaCoordinator, SagaId};
///
/// let coordinator = SagaCoordinator::new(PostgresAuditLog::connect(url).await?)
///     .with_step(ReserveInventory::new(stock))
///     .with_step(ChargePayment::new(gateway))
///     .with_step(ScheduleShipment::new(carrier))
///     .with_observer(FulfillmentMetrics::default());
///
/// // Catch mis-ordered dependency declarations at wiring time.
/// coordinator.validate()?;
///
/// let mut order = Order::new(cart);
/// let completed = coordinator
///     .execute(SagaId::new(), &mut order, Duration::from_secs(30))
///     .await?;
/// ```
pub struct SagaCoordinator<S> {
    steps: Vec<Arc<dyn SagaStep<S>>>,
    repository: Arc<dyn StateRepository>,
    observers: ObserverRegistry,
}

impl<S> SagaCoordinator<S>
where
    S: Send + Sync + 'static,
{
    /// Create a coordinator writing its audit trail to `repository`.
    pub fn new<R: StateRepository>(repository: R) -> Self {
        Self::from_arc(Arc::new(repository))
    }

    /// Create a coordinator from an already-shared repository.
    pub fn from_arc(repository: Arc<dyn StateRepository>) -> Self {
        Self {
            steps: Vec::new(),
            repository,
            observers: ObserverRegistry::new(),
        }
    }

    /// Append a step to the execution order (builder style).
    pub fn with_step<T: SagaStep<S>>(mut self, step: T) -> Self {
        self.add_step(step);
        self
    }

    /// Register an observer (builder style).
    pub fn with_observer<O: SagaObserver>(mut self, observer: O) -> Self {
        self.subscribe(observer);
        self
    }

    /// Append a step to the end of the execution order.
    pub fn add_step<T: SagaStep<S>>(&mut self, step: T) {
        self.steps.push(Arc::new(step));
    }

    /// Register an observer for transition and step notifications.
    pub fn subscribe<O: SagaObserver>(&mut self, observer: O) {
        self.observers
            .register(observer, std::any::type_name::<O>());
    }

    /// Number of registered steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Check that every declared dependency appears earlier in the step list.
    ///
    /// A static preflight for wiring time. It cannot account for gates
    /// skipping a dependency at runtime or for transition policies that
    /// never record `Completed`, so `execute` still re-checks dependencies
    /// against the actual log at each step's turn.
    pub fn validate(&self) -> Result<(), SagaError> {
        let mut seen: HashSet<StepKind> = HashSet::new();
        for step in &self.steps {
            for dep in step.dependencies() {
                if !seen.contains(&dep) {
                    return Err(SagaError::DependencyUnmet {
                        step: step.kind(),
                        missing: dep,
                    });
                }
            }
            seen.insert(step.kind());
        }
        Ok(())
    }

    /// Run the saga forward; on a step failure, roll back completed steps in
    /// reverse order.
    ///
    /// `timeout` bounds the whole forward pass, not each step. On expiry the
    /// in-flight step is treated as failed and rollback begins; rollback
    /// itself is not bound by the timeout.
    ///
    /// Returns `Ok(true)` only if the run ends with the saga state equal to
    /// `Completed`. The returned boolean is always consistent with the last
    /// recorded log entry for `saga_id`.
    pub async fn execute(
        &self,
        saga_id: SagaId,
        state: &mut S,
        timeout: Duration,
    ) -> Result<bool, SagaError> {
        debug!(%saga_id, steps = self.steps.len(), timeout = ?timeout, "saga run started");

        let mut ctx = ExecutionContext::new();

        // One token bounds the whole forward pass. The timer task fires it
        // at the deadline; `run_step` races every forward action against it
        // so steps that ignore the token are still abandoned on time.
        let cancel = CancellationToken::new();
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            }
        });

        let flow = self.forward(saga_id, state, &mut ctx, &cancel).await;
        timer.abort();

        match flow? {
            ForwardFlow::Exhausted => {
                let completed = ctx.current == SagaState::Completed;
                debug!(%saga_id, state = %ctx.current, entries = ctx.log.len(), "forward pass complete");
                Ok(completed)
            }
            ForwardFlow::Failed { step, error } => {
                let failures = self.compensate_completed(saga_id, state, &mut ctx).await;
                if failures.is_empty() {
                    Ok(false)
                } else {
                    Err(SagaError::CompensationFailed {
                        failed_step: step,
                        step_error: error,
                        compensation_errors: failures,
                    })
                }
            }
        }
    }

    /// The forward pass: gate, execute, and record each step in order.
    async fn forward(
        &self,
        saga_id: SagaId,
        state: &mut S,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ForwardFlow, SagaError> {
        for step in &self.steps {
            let kind = step.kind();

            if let Some(missing) = ctx.first_unmet(step.dependencies()) {
                warn!(%saga_id, step = %kind, %missing, "dependency unmet, aborting run");
                return Err(SagaError::DependencyUnmet {
                    step: kind,
                    missing,
                });
            }

            if !step.can_execute(ctx.current) {
                debug!(%saga_id, step = %kind, state = %ctx.current, "gate rejected step, skipping");
                continue;
            }

            if let Err(error) = self
                .run_step(saga_id, step.as_ref(), state, ctx, cancel)
                .await
            {
                self.record_failure(saga_id, step.as_ref(), ctx, &error).await;
                return Ok(ForwardFlow::Failed { step: kind, error });
            }
        }
        Ok(ForwardFlow::Exhausted)
    }

    /// One step's turn: forward action, transition bookkeeping, publication.
    ///
    /// Any error, whether from the action itself, the repository save, the
    /// publication hook, or the deadline firing, is returned to the caller
    /// and handled identically.
    async fn run_step(
        &self,
        saga_id: SagaId,
        step: &dyn SagaStep<S>,
        state: &mut S,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let kind = step.kind();

        tokio::select! {
            res = step.execute(state, cancel) => res?,
            _ = cancel.cancelled() => {
                bail!("saga timed out while running step {kind}");
            }
        }

        let next = step.next_state(ctx.current, true);
        let entry = ctx.record(kind, next);
        // State-changed observers fire before the save completes; the
        // completed notification fires after. Both orderings are contract.
        self.observers.saga_state_changed(saga_id, &entry);
        self.repository.save(saga_id, entry).await?;
        self.observers.step_completed(saga_id, kind, next);
        debug!(%saga_id, step = %kind, state = %next, "step completed");

        tokio::select! {
            res = step.publish_event(next, state, cancel) => res?,
            _ = cancel.cancelled() => {
                bail!("saga timed out while publishing events for step {kind}");
            }
        }

        Ok(())
    }

    /// Record the failure transition for a step whose turn errored.
    ///
    /// The save here is best-effort: the run is already headed into rollback
    /// and a broken store must not derail that.
    async fn record_failure(
        &self,
        saga_id: SagaId,
        step: &dyn SagaStep<S>,
        ctx: &mut ExecutionContext,
        error: &anyhow::Error,
    ) {
        let kind = step.kind();
        let next = step.next_state(ctx.current, false);
        let entry = ctx.record(kind, next);
        self.observers.saga_state_changed(saga_id, &entry);
        if let Err(e) = self.repository.save(saga_id, entry).await {
            warn!(%saga_id, step = %kind, error = %e, "failed to persist failure entry");
        }
        self.observers.step_failed(saga_id, kind, next, error);
        warn!(%saga_id, step = %kind, state = %next, error = %error, "step failed, rolling back");
    }

    /// Walk the full step list in reverse and undo every step the log
    /// recorded as `Completed`.
    ///
    /// Failed undo actions are collected rather than aborting the pass, so
    /// one bad compensation cannot strand the steps before it. Each
    /// successful undo is recorded as a `Failed` entry, persisted
    /// best-effort.
    async fn compensate_completed(
        &self,
        saga_id: SagaId,
        state: &mut S,
        ctx: &mut ExecutionContext,
    ) -> Vec<CompensationError> {
        // Fresh token: rollback is not bound by the forward-pass timeout.
        let cancel = CancellationToken::new();
        let mut failures = Vec::new();
        let mut rolled_back = 0usize;

        for step in self.steps.iter().rev() {
            let kind = step.kind();
            if !ctx.completed(kind) {
                continue;
            }

            debug!(%saga_id, step = %kind, "rolling back step");
            if let Err(error) = step.compensate(state, &cancel).await {
                warn!(%saga_id, step = %kind, error = %error, "rollback failed, continuing");
                failures.push(CompensationError { step: kind, error });
                continue;
            }
            rolled_back += 1;

            let entry = ctx.record(kind, SagaState::Failed);
            self.observers.saga_state_changed(saga_id, &entry);
            if let Err(e) = self.repository.save(saga_id, entry).await {
                warn!(%saga_id, step = %kind, error = %e, "failed to persist rollback entry");
            }
        }

        debug!(%saga_id, rolled_back, failed = failures.len(), "rollback complete");
        failures
    }
}

impl<S> std::fmt::Debug for SagaCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCoordinator")
            .field("step_count", &self.steps.len())
            .field("observer_count", &self.observers.len())
            .finish_non_exhaustive()
    }
}
