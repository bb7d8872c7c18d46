//! The step contract: one unit of forward work plus its undo.
//!
//! # Overview
//!
//! A [`SagaStep`] bundles five capabilities the coordinator calls at fixed
//! points of the run:
//!
//! | Capability      | Called when                          | May mutate state? |
//! |-----------------|--------------------------------------|-------------------|
//! | `execute`       | the step's turn in the forward pass  | yes               |
//! | `compensate`    | rollback after a later failure       | yes               |
//! | `can_execute`   | just before `execute` (gate)         | no                |
//! | `next_state`    | after `execute` resolves             | no                |
//! | `publish_event` | after a transition is persisted      | no                |
//!
//! Steps are stateless from the coordinator's point of view: all mutable work
//! happens on the shared state object (or on the step's own private fields,
//! at the implementor's risk since one step instance may serve many sagas).
//!
//! # Transition Policy
//!
//! `next_state` makes the saga's state machine step-defined. The default maps
//! success to [`SagaState::Completed`] and failure to [`SagaState::Failed`],
//! which keeps every successful step eligible as a dependency target and for
//! rollback. Workflows that want the saga-level state to track overall
//! progress can override it, for example recording
//! [`SagaState::PartiallyCompleted`] until the final step. Be deliberate with
//! that policy: dependency gating and rollback only recognize entries logged
//! exactly `Completed`.
//!
//! # Example
//!
//! ```ignore
//! use unwind::{async_trait, CancellationToken, SagaStep, StepKind};
//! use smallvec::{smallvec, SmallVec};
//!
//! const RESERVE_INVENTORY: StepKind = StepKind::new("reserve_inventory");
//! const CHARGE_PAYMENT: StepKind = StepKind::new("charge_payment");
//!
//! struct ChargePayment {
//!     gateway: PaymentGateway,
//! }
//!
//! #[async_trait]
//! impl SagaStep<Order> for ChargePayment {
//!     fn kind(&self) -> StepKind {
//!         CHARGE_PAYMENT
//!     }
//!
//!     fn dependencies(&self) -> SmallVec<[StepKind; 4]> {
//!         smallvec![RESERVE_INVENTORY]
//!     }
//!
//!     async fn execute(&self, order: &mut Order, cancel: &CancellationToken) -> anyhow::Result<()> {
//!         order.charge_id = Some(self.gateway.charge(order.total, cancel).await?);
//!         Ok(())
//!     }
//!
//!     async fn compensate(&self, order: &mut Order, _cancel: &CancellationToken) -> anyhow::Result<()> {
//!         if let Some(charge_id) = order.charge_id.take() {
//!             self.gateway.refund(charge_id).await?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;

use crate::core::{SagaState, StepKind};

/// One unit of forward work plus its compensating action.
///
/// `S` is the shared mutable state object the saga operates on. The
/// coordinator threads it through every step strictly one at a time, so
/// implementations never see concurrent access to it.
///
/// # Cancellation
///
/// The token passed to `execute` and `publish_event` fires when the whole-run
/// timeout expires. Steps should observe it cooperatively at their own await
/// points; the coordinator additionally abandons a step outright once the
/// token fires, so ignoring it costs progress reporting, not correctness.
/// `compensate` receives a fresh token that is not bound to the original
/// timeout: finishing undo work matters more than racing a clock.
#[async_trait]
pub trait SagaStep<S>: Send + Sync + 'static
where
    S: Send + Sync,
{
    /// Stable identity token for this step.
    ///
    /// Dependency declarations and rollback matching key on it; it must not
    /// change once log entries referencing it exist.
    fn kind(&self) -> StepKind;

    /// Step kinds that must have logged `Completed` before this step runs.
    ///
    /// Checked just-in-time at this step's turn against the current run's
    /// log, not used to reorder steps. An unmet dependency aborts the whole
    /// run without rollback, so declare dependencies that the step ordering
    /// actually satisfies.
    ///
    /// Defaults to no dependencies.
    fn dependencies(&self) -> SmallVec<[StepKind; 4]> {
        SmallVec::new()
    }

    /// Gate deciding whether this step runs given the current saga state.
    ///
    /// Returning `false` skips the step silently: no log entry, no
    /// notifications, no rollback later. Used for conditional/optional steps.
    ///
    /// Defaults to accepting every state.
    fn can_execute(&self, _current: SagaState) -> bool {
        true
    }

    /// Transition function applied after the forward action resolves.
    ///
    /// Defaults to `Completed` on success and `Failed` on failure. See the
    /// module docs before overriding: only `Completed` entries satisfy
    /// dependencies or qualify for rollback.
    fn next_state(&self, _current: SagaState, success: bool) -> SagaState {
        if success {
            SagaState::Completed
        } else {
            SagaState::Failed
        }
    }

    /// The forward action.
    ///
    /// Any error (including one produced by observing `cancel`) is treated as
    /// a step failure: the failure transition is recorded and rollback of
    /// previously completed steps begins.
    async fn execute(&self, state: &mut S, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// The compensating action, undoing whatever `execute` applied.
    ///
    /// Invoked during rollback only if this step's kind was logged
    /// `Completed` in the current run. Errors are collected and reported in
    /// [`SagaError::CompensationFailed`](crate::SagaError::CompensationFailed)
    /// without stopping the rollback of remaining steps.
    async fn compensate(&self, state: &mut S, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// Hook for publishing domain events after a successful transition is
    /// persisted.
    ///
    /// Runs after the repository save and the step-completed notification.
    /// An error here is treated as a failure of this step. By then the step
    /// is already logged `Completed`, so it will itself be rolled back.
    ///
    /// Defaults to doing nothing.
    async fn publish_event(
        &self,
        _current: SagaState,
        _state: &S,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
