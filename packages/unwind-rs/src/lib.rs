//! # Unwind
//!
//! A saga execution engine where steps run forward, failures unwind in
//! reverse, and every transition leaves an audit trail.
//!
//! ## Core Concepts
//!
//! Unwind separates **doing** from **recording**:
//! - [`SagaStep`] = the work (a forward action paired with a compensating undo)
//! - [`LogEntry`] = the record (which step, which state, when)
//!
//! The key principle: **the log drives recovery**. A step is rolled back if
//! and only if the run's log says it completed; nothing else is consulted.
//!
//! ## Architecture
//!
//! ```text
//! SagaCoordinator::execute(saga_id, state, timeout)
//!     │
//!     ▼ declaration order
//! ┌─► Step A.execute() ──► LogEntry(A, Completed) ──► StateRepository.save()
//! │                              │
//! │                              ├─► SagaObserver::on_saga_state_changed
//! │                              └─► SagaObserver::on_step_completed
//! ├─► Step B.execute() ──► LogEntry(B, Completed) ──► ...
//! │
//! └─► Step C.execute() ──► FAILS ──► LogEntry(C, Failed)
//!         │
//!         ▼ reverse order, `Completed` entries only
//!     Step B.compensate() ──► LogEntry(B, Failed)
//!     Step A.compensate() ──► LogEntry(A, Failed)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Steps run one at a time** - Declaration order, never reordered
//! 2. **The log is append-only** - Transitions are recorded, never edited
//! 3. **Rollback mirrors the log** - Reverse order, `Completed` entries only
//! 4. **Skipped means invisible** - A gate-rejected step leaves no entry and
//!    is never compensated
//! 5. **One deadline per run** - A single timeout bounds the forward pass;
//!    rollback is unbounded
//! 6. **Dependency violations are fatal** - A mis-wired saga aborts without
//!    rollback
//!
//! ## Guarantees
//!
//! - **Consistent outcome**: the boolean from [`SagaCoordinator::execute`]
//!   always agrees with the last recorded log entry
//! - **Rollback keeps going**: a failed undo is collected and reported in
//!   [`SagaError::CompensationFailed`], never stranding the steps before it
//! - **Concurrent runs**: one coordinator serves many sagas at once; all
//!   per-run bookkeeping is created inside `execute`
//!
//! Durability is the repository's job. Implement [`StateRepository`] over
//! your store of record; the bundled in-memory one is for tests.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use unwind::{async_trait, CancellationToken, SagaCoordinator, SagaId, SagaStep, StepKind};
//!
//! // 1. Define the shared state steps operate on
//! struct Order {
//!     reserved: bool,
//!     charged_cents: u64,
//! }
//!
//! // 2. Define steps (forward action + compensating undo)
//! struct ReserveInventory;
//!
//! #[async_trait]
//! impl SagaStep<Order> for ReserveInventory {
//!     fn kind(&self) -> StepKind {
//!         StepKind::new("reserve_inventory")
//!     }
//!
//!     async fn execute(&self, order: &mut Order, _cancel: &CancellationToken) -> anyhow::Result<()> {
//!         order.reserved = true;
//!         Ok(())
//!     }
//!
//!     async fn compensate(&self, order: &mut Order, _cancel: &CancellationToken) -> anyhow::Result<()> {
//!         order.reserved = false;
//!         Ok(())
//!     }
//! }
//!
//! // 3. Wire steps, storage, and observers together
//! let coordinator = SagaCoordinator::new(audit_log)
//!     .with_step(ReserveInventory)
//!     .with_step(ChargePayment::new(gateway))
//!     .with_observer(FulfillmentMetrics::default());
//!
//! // Catch mis-ordered dependency declarations at wiring time.
//! coordinator.validate()?;
//!
//! // 4. Run one saga to completion or clean rollback
//! let mut order = Order { reserved: false, charged_cents: 0 };
//! let completed = coordinator
//!     .execute(SagaId::new(), &mut order, Duration::from_secs(30))
//!     .await?;
//! ```
//!
//! ## What This Is Not
//!
//! Unwind is **not**:
//! - A distributed transaction manager
//! - A durable workflow runtime with scheduling, retries, and resumption
//! - A message broker or an event-sourcing store
//!
//! Unwind **is**:
//! > A saga execution engine where steps run forward, failures unwind in
//! > reverse, and every transition leaves an audit trail.

// Core modules
mod coordinator;
mod core;
mod error;
mod observer;
mod repository;
mod step;


// Re-export core types
pub use crate::core::{LogEntry, SagaId, SagaState, StepKind};

// Re-export error types
pub use crate::error::{CompensationError, SagaError};

// Re-export the coordinator (primary entry point)
pub use coordinator::SagaCoordinator;

// Re-export step types
pub use step::SagaStep;

// Re-export observer types
pub use observer::SagaObserver;

// Re-export repository types
pub use repository::{RepositoryError, StateRepository};

// Re-export testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub use observer::testing::{Observed, RecordingObserver};
#[cfg(any(test, feature = "testing"))]
pub use repository::testing::InMemoryRepository;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
