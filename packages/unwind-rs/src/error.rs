//! Structured error types for saga execution.
//!
//! # Error Taxonomy
//!
//! A saga run distinguishes three failure shapes, and only two of them are
//! errors in the Rust sense:
//!
//! | Condition              | Surface                                  |
//! |------------------------|------------------------------------------|
//! | A step's forward action fails | `Ok(false)` after rollback |
//! | Dependency unmet at a step's turn | `Err(SagaError::DependencyUnmet)` |
//! | Rollback itself fails  | `Err(SagaError::CompensationFailed)`     |
//!
//! A step failure is the saga working as designed: the failure transition is
//! recorded and completed steps are rolled back. A dependency violation is a
//! wiring bug (steps were registered in an order their declarations don't
//! support), so it aborts the run without rollback rather than papering over
//! a misconfiguration. A rollback failure means the system may genuinely be
//! left partially applied, which the caller must hear about loudly.

use thiserror::Error;

use crate::core::StepKind;

// =============================================================================
// Compensation Error
// =============================================================================

/// One failed rollback action, collected during the compensation pass.
///
/// The pass does not stop on the first failure: every remaining completed
/// step still gets its chance to undo. Whatever failed ends up here.
#[derive(Debug)]
pub struct CompensationError {
    /// The step whose compensation failed.
    pub step: StepKind,
    /// The underlying error.
    pub error: anyhow::Error,
}

impl std::fmt::Display for CompensationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rollback of step {} failed: {}", self.step, self.error)
    }
}

impl std::error::Error for CompensationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

// =============================================================================
// Saga Error
// =============================================================================

/// Fatal outcomes of a saga run.
///
/// Ordinary step failures never show up here; they resolve to `Ok(false)`
/// after rollback. This enum is reserved for the cases where the coordinator
/// cannot deliver its usual guarantee.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step was reached whose declared dependency has no `Completed` entry
    /// in the log. Nothing is rolled back: this is a configuration error,
    /// not a runtime condition to recover from.
    #[error("step {step} requires {missing} to have completed first")]
    DependencyUnmet {
        /// The step that was about to run.
        step: StepKind,
        /// The dependency with no `Completed` entry.
        missing: StepKind,
    },

    /// A step failed and one or more rollback actions also failed, so some
    /// completed work may still be applied.
    #[error(
        "step {failed_step} failed ({step_error}); {} rollback action(s) also failed",
        compensation_errors.len()
    )]
    CompensationFailed {
        /// The step whose forward action triggered the rollback.
        failed_step: StepKind,
        /// The error from that step.
        step_error: anyhow::Error,
        /// Every rollback action that failed, in rollback order.
        compensation_errors: Vec<CompensationError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_unmet_display() {
        let err = SagaError::DependencyUnmet {
            step: StepKind::new("charge_payment"),
            missing: StepKind::new("reserve_inventory"),
        };

        assert!(err.to_string().contains("charge_payment"));
        assert!(err.to_string().contains("reserve_inventory"));
    }

    #[test]
    fn test_compensation_failed_display_counts_failures() {
        let err = SagaError::CompensationFailed {
            failed_step: StepKind::new("ship"),
            step_error: anyhow::anyhow!("carrier unavailable"),
            compensation_errors: vec![
                CompensationError {
                    step: StepKind::new("charge"),
                    error: anyhow::anyhow!("refund rejected"),
                },
                CompensationError {
                    step: StepKind::new("reserve"),
                    error: anyhow::anyhow!("stock ledger offline"),
                },
            ],
        };

        let display = err.to_string();
        assert!(display.contains("ship"));
        assert!(display.contains("carrier unavailable"));
        assert!(display.contains("2 rollback action(s)"));
    }

    #[test]
    fn test_compensation_error_display_and_source() {
        let err = CompensationError {
            step: StepKind::new("charge"),
            error: anyhow::anyhow!("refund rejected"),
        };

        assert!(err.to_string().contains("charge"));
        assert!(err.to_string().contains("refund rejected"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_is_pattern_matchable() {
        let err = SagaError::DependencyUnmet {
            step: StepKind::new("b"),
            missing: StepKind::new("a"),
        };

        match &err {
            SagaError::DependencyUnmet { step, missing } => {
                assert_eq!(*step, StepKind::new("b"));
                assert_eq!(*missing, StepKind::new("a"));
            }
            _ => panic!("expected DependencyUnmet"),
        }
    }
}
