//! Durable storage for the saga audit trail.
//!
//! # The Contract
//!
//! 1. **Append-only.** `save` adds one entry to the log for a saga
//!    identifier. Implementations must not reorder or deduplicate.
//!
//! 2. **Load returns append order.** `load` returns every entry for an
//!    identifier exactly as saved. An unknown identifier yields an empty
//!    sequence, never an error.
//!
//! 3. **Concurrent across sagas.** The repository is the long-lived shared
//!    collaborator: many saga runs save and load through one instance at the
//!    same time, so implementations must be safe under concurrent access.
//!
//! The repository is an audit sink, not a resumable checkpoint store: the
//! coordinator writes through it during a run but never reads it back to
//! decide anything. A store that finds a record it cannot fully reconstruct
//! should surface it as an entry with [`SagaState::Unknown`](crate::SagaState::Unknown)
//! rather than guessing.

use async_trait::async_trait;

use crate::core::{LogEntry, SagaId};

// =============================================================================
// Repository Error
// =============================================================================

/// Errors from audit-trail storage.
///
/// Deliberately narrow: an append-only log has no revision to race on, so
/// there is no conflict case. Anything that goes wrong is a backend failure
/// (timeout, connection, serialization).
#[derive(Debug)]
pub enum RepositoryError {
    /// Storage backend failed (timeout, connection, serialization).
    Backend(anyhow::Error),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::Backend(e) => write!(f, "storage backend error: {}", e),
        }
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepositoryError::Backend(e) => Some(e.as_ref()),
        }
    }
}

impl From<anyhow::Error> for RepositoryError {
    fn from(err: anyhow::Error) -> Self {
        RepositoryError::Backend(err)
    }
}

// =============================================================================
// State Repository
// =============================================================================

/// Append-only store of [`LogEntry`] sequences keyed by saga identifier.
///
/// The coordinator saves one entry per recorded transition. How a save
/// failure affects the run depends on where it happens: during the forward
/// pass it is treated as a step failure (the saga rolls back), while entries
/// recording failures and rollbacks are saved best-effort so a broken store
/// cannot block the undo work itself.
#[async_trait]
pub trait StateRepository: Send + Sync + 'static {
    /// Append one entry to the log for this saga identifier.
    async fn save(&self, saga_id: SagaId, entry: LogEntry) -> Result<(), RepositoryError>;

    /// Return every entry for this saga identifier, in append order.
    ///
    /// Returns an empty sequence for an identifier that has never been
    /// saved to.
    async fn load(&self, saga_id: SagaId) -> Result<Vec<LogEntry>, RepositoryError>;
}

// =============================================================================
// In-Memory Repository (for testing)
// =============================================================================

/// In-memory repository for testing.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use dashmap::DashMap;

    use super::*;

    /// In-memory repository backed by a concurrent map.
    ///
    /// Appends to one saga's log are atomic (the map shard is locked for the
    /// duration of the push), so concurrent runs on distinct identifiers and
    /// even racing writers on one identifier stay well-formed.
    pub struct InMemoryRepository {
        logs: DashMap<SagaId, Vec<LogEntry>>,
    }

    impl InMemoryRepository {
        pub fn new() -> Self {
            Self {
                logs: DashMap::new(),
            }
        }

        /// Number of saga identifiers with at least one entry.
        pub fn saga_count(&self) -> usize {
            self.logs.len()
        }

        /// Number of entries recorded for one saga identifier.
        pub fn entry_count(&self, saga_id: SagaId) -> usize {
            self.logs.get(&saga_id).map(|log| log.len()).unwrap_or(0)
        }
    }

    impl Default for InMemoryRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl StateRepository for InMemoryRepository {
        async fn save(&self, saga_id: SagaId, entry: LogEntry) -> Result<(), RepositoryError> {
            self.logs.entry(saga_id).or_default().push(entry);
            Ok(())
        }

        async fn load(&self, saga_id: SagaId) -> Result<Vec<LogEntry>, RepositoryError> {
            Ok(self
                .logs
                .get(&saga_id)
                .map(|log| log.value().clone())
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::InMemoryRepository;
    use super::*;
    use crate::core::{SagaState, StepKind};

    fn entry(kind: &'static str, state: SagaState) -> LogEntry {
        LogEntry::new(StepKind::new(kind), state)
    }

    // =========================================================================
    // Repository Error Tests
    // =========================================================================

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Backend(anyhow::anyhow!("connection refused"));

        assert!(err.to_string().contains("storage backend error"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_repository_error_from_anyhow() {
        let err: RepositoryError = anyhow::anyhow!("disk full").into();

        assert!(matches!(err, RepositoryError::Backend(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    // =========================================================================
    // InMemoryRepository Tests
    // =========================================================================

    #[tokio::test]
    async fn test_load_unknown_id_returns_empty() {
        let repo = InMemoryRepository::new();

        let entries = repo.load(SagaId::new()).await.unwrap();

        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_save_appends_in_order() {
        let repo = InMemoryRepository::new();
        let saga_id = SagaId::new();

        repo.save(saga_id, entry("reserve", SagaState::Completed))
            .await
            .unwrap();
        repo.save(saga_id, entry("charge", SagaState::Completed))
            .await
            .unwrap();
        repo.save(saga_id, entry("ship", SagaState::Failed))
            .await
            .unwrap();

        let entries = repo.load(saga_id).await.unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.step.as_str()).collect();

        assert_eq!(kinds, vec!["reserve", "charge", "ship"]);
        assert_eq!(entries[2].state, SagaState::Failed);
    }

    #[tokio::test]
    async fn test_sagas_are_isolated() {
        let repo = InMemoryRepository::new();
        let first = SagaId::new();
        let second = SagaId::new();

        repo.save(first, entry("reserve", SagaState::Completed))
            .await
            .unwrap();
        repo.save(second, entry("charge", SagaState::Completed))
            .await
            .unwrap();
        repo.save(second, entry("ship", SagaState::Completed))
            .await
            .unwrap();

        assert_eq!(repo.saga_count(), 2);
        assert_eq!(repo.entry_count(first), 1);
        assert_eq!(repo.entry_count(second), 2);
        assert_eq!(repo.load(first).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_saves_to_distinct_sagas_keep_per_saga_order() {
        const STATES: [SagaState; 5] = [
            SagaState::NotStarted,
            SagaState::PartiallyCompleted,
            SagaState::Completed,
            SagaState::Failed,
            SagaState::Unknown,
        ];

        let repo = Arc::new(InMemoryRepository::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let repo = repo.clone();
            let saga_id = SagaId::new();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    repo.save(saga_id, entry("step", STATES[i % 5]))
                        .await
                        .unwrap();
                }
                saga_id
            }));
        }

        for handle in handles {
            let saga_id = handle.await.unwrap();
            let entries = repo.load(saga_id).await.unwrap();

            assert_eq!(entries.len(), 10);
            for (i, e) in entries.iter().enumerate() {
                assert_eq!(e.state, STATES[i % 5]);
            }
        }
        assert_eq!(repo.saga_count(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_writers_on_one_saga_lose_no_entries() {
        let repo = Arc::new(InMemoryRepository::new());
        let saga_id = SagaId::new();
        let mut handles = Vec::new();

        for _ in 0..4 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    repo.save(saga_id, entry("step", SagaState::Completed))
                        .await
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.entry_count(saga_id), 100);
    }
}
