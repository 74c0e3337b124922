//! Executor error types

use thiserror::Error;

use crate::computation::Selector;

/// Errors that can occur while building or computing values in an executor tree
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Arity mismatch in {context}: expected {expected} elements, got {got}")]
    ArityMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    #[error("Selection {selector} out of range for tuple of length {len}")]
    IndexOutOfRange { selector: Selector, len: usize },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Computation error in child {index}: {source}")]
    ChildComputation {
        index: usize,
        #[source]
        source: Box<ExecutorError>,
    },

    #[error("Cardinality mismatch: expected {expected} client values, got {got}")]
    CardinalityMismatch { expected: usize, got: usize },

    #[error("No clients hold a copy of the value")]
    EmptyPopulation,

    #[error("Unbound reference: {0}")]
    UnboundReference(String),

    #[error("Value is not owned by this executor: {0}")]
    ForeignValue(String),
}

impl ExecutorError {
    /// Wrap an error raised by the child at `index` of a fan-out
    pub fn child(index: usize, source: ExecutorError) -> Self {
        ExecutorError::ChildComputation {
            index,
            source: Box::new(source),
        }
    }

    /// True for failures raised while a backend or child was executing
    pub fn is_computation_error(&self) -> bool {
        matches!(
            self,
            ExecutorError::Computation(_) | ExecutorError::ChildComputation { .. }
        )
    }

    /// Child indexes from the outermost tier down to the tier that failed
    pub fn child_path(&self) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = self;
        while let ExecutorError::ChildComputation { index, source } = current {
            path.push(*index);
            current = source;
        }
        path
    }

    /// The innermost error, below every child wrapper
    pub fn root_cause(&self) -> &ExecutorError {
        let mut current = self;
        while let ExecutorError::ChildComputation { source, .. } = current {
            current = source;
        }
        current
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
