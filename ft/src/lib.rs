//! fedtree - hierarchical executor tree for federated computations
//!
//! Federated computations operate on values placed at a single SERVER or
//! spread across a population of CLIENTS. fedtree executes them on a tree of
//! executors that all honor one contract, so a client population can be split
//! across any number of tiers without changing what an operator means.
//!
//! # Core Concepts
//!
//! - **Uniform contract**: leaf coordinators and composing nodes both implement [`Executor`]
//! - **Concurrent fan-out**: every tier dispatches to its children at once, in child order
//! - **Decomposed reductions**: zero/accumulate/merge/report lets any depth reduce locally
//!
//! # Modules
//!
//! - [`executor`] - The Executor capability and value handles
//! - [`leaf`] - Leaf coordinator over concrete per-placement backends
//! - [`composing`] - Composing node over child executors
//! - [`intrinsics`] - Federated operator dispatch and reductions
//! - [`resolver`] - Root-side evaluation of lambdas, blocks and references
//! - [`topology`] - Tree shapes and construction
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod composing;
pub mod computation;
pub mod config;
pub mod data;
pub mod demo;
pub mod eager;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod intrinsics;
pub mod leaf;
pub mod placement;
pub mod program;
pub mod resolver;
pub mod tier;
pub mod topology;
pub mod types;
pub mod value;
pub mod yaml;

// Re-export commonly used types
pub use composing::ComposingNode;
pub use computation::{CompiledComputation, Computation, Expr, Intrinsic, Selector};
pub use config::{Config, TopologyConfig};
pub use data::Data;
pub use eager::EagerExecutor;
pub use error::{ExecutorError, Result};
pub use executor::{Executor, ExecutorRef, ExecutorValue, Payload, ValueRef};
pub use leaf::{LeafBackends, LeafCoordinator};
pub use placement::Placement;
pub use program::Program;
pub use resolver::ReferenceResolver;
pub use topology::TierSpec;
pub use types::{DType, Type};
