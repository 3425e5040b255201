//! Verification helpers for testing tunnel orchestration
//!
//! Provides assertion helpers over the operations captured by a
//! [`RecordingExecutor`](sshpn::RecordingExecutor).

use sshpn_common::{OpTarget, Operation};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected step containing '{expected}' in {scope} operations, got {actual:?}")]
    StepNotFound {
        scope: String,
        expected: String,
        actual: Vec<String>,
    },

    #[error("Step containing '{unexpected}' should not have run")]
    UnexpectedStep { unexpected: String },

    #[error("Expected {expected} {what}, found {actual}")]
    CountMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Expected '{first}' before '{second}'")]
    OrderMismatch { first: String, second: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Operation execution verifier
pub struct OperationVerifier {
    operations: Vec<Operation>,
}

impl OperationVerifier {
    /// Create a new verifier over captured operations
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    /// Steps of every operation aimed at `target`, in order.
    pub fn steps_for(&self, target: OpTarget) -> Vec<String> {
        self.operations
            .iter()
            .filter(|op| op.target == target)
            .flat_map(|op| op.steps.iter().cloned())
            .collect()
    }

    /// Every step, in order.
    pub fn all_steps(&self) -> Vec<String> {
        self.operations
            .iter()
            .flat_map(|op| op.steps.iter().cloned())
            .collect()
    }

    /// Verify that a step containing `expected` ran on `target`
    pub fn assert_step_executed(&self, target: OpTarget, expected: &str) -> VerifyResult<()> {
        let steps = self.steps_for(target);
        if steps.iter().any(|s| s.contains(expected)) {
            Ok(())
        } else {
            Err(VerificationError::StepNotFound {
                scope: target.to_string(),
                expected: expected.to_string(),
                actual: steps,
            })
        }
    }

    /// Verify that no step anywhere contains `unexpected`
    pub fn assert_step_not_executed(&self, unexpected: &str) -> VerifyResult<()> {
        if self.all_steps().iter().any(|s| s.contains(unexpected)) {
            Err(VerificationError::UnexpectedStep {
                unexpected: unexpected.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Verify the number of operations executed
    pub fn assert_operation_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.operations.len();
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                what: "operations".to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify how many steps contain `fragment`
    pub fn assert_step_count(&self, fragment: &str, expected: usize) -> VerifyResult<()> {
        let actual = self
            .all_steps()
            .iter()
            .filter(|s| s.contains(fragment))
            .count();
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                what: format!("steps containing '{}'", fragment),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that the first step containing `first` precedes the first
    /// step containing `second`
    pub fn assert_ordered(&self, first: &str, second: &str) -> VerifyResult<()> {
        let steps = self.all_steps();
        let position = |needle: &str| steps.iter().position(|s| s.contains(needle));

        match (position(first), position(second)) {
            (Some(a), Some(b)) if a < b => Ok(()),
            _ => Err(VerificationError::OrderMismatch {
                first: first.to_string(),
                second: second.to_string(),
            }),
        }
    }

    /// Get all captured operations
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}
