//! The uniform Executor capability implemented by every tier

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::computation::{Computation, Selector};
use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::types::Type;

/// What `create_value` ingests: plain data or a computation
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Data(Data),
    Computation(Computation),
}

impl From<Data> for Payload {
    fn from(data: Data) -> Self {
        Payload::Data(data)
    }
}

impl From<Computation> for Payload {
    fn from(comp: Computation) -> Self {
        Payload::Computation(comp)
    }
}

/// A value handle owned by exactly one executor
#[async_trait]
pub trait ExecutorValue: Send + Sync + fmt::Debug {
    /// Federated or unplaced type of this value
    fn type_signature(&self) -> &Type;

    /// Resolve to materialized data
    async fn compute(&self) -> Result<Data>;

    /// Upcast for recovering the owning executor's concrete value type
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub type ValueRef = Arc<dyn ExecutorValue>;

/// Recover an executor's own value type from a handle.
///
/// Handles created by a different executor are rejected: values never move
/// between executors except through `create_value`.
pub fn downcast_value<T: ExecutorValue + 'static>(value: ValueRef, owner: &str) -> Result<Arc<T>> {
    let type_signature = value.type_signature().to_string();
    value
        .into_any()
        .downcast::<T>()
        .map_err(|_| ExecutorError::ForeignValue(format!("{} value passed to {}", type_signature, owner)))
}

/// The execution contract shared by backends, leaf coordinators and composing nodes
#[async_trait]
pub trait Executor: Send + Sync {
    /// Ingest data or a computation, optionally with an explicit type
    async fn create_value(&self, value: Payload, type_spec: Option<Type>) -> Result<ValueRef>;

    /// Call a function value, with an argument unless the function takes none
    async fn create_call(&self, function: ValueRef, argument: Option<ValueRef>) -> Result<ValueRef>;

    /// Build an ordered, optionally named tuple of values
    async fn create_tuple(&self, elements: Vec<(Option<String>, ValueRef)>) -> Result<ValueRef>;

    /// Select one element of a tuple value
    async fn create_selection(&self, source: ValueRef, selector: Selector) -> Result<ValueRef>;

    /// Resolve a value to its final materialized result
    async fn compute(&self, value: &ValueRef) -> Result<Data> {
        debug!(type_signature = %value.type_signature(), "Executor::compute: called");
        value.compute().await
    }

    /// Release ownership of a value
    async fn dispose(&self, value: ValueRef) -> Result<()> {
        debug!(type_signature = %value.type_signature(), "Executor::dispose: called");
        drop(value);
        Ok(())
    }
}

/// Shared handle to any executor in a tree
pub type ExecutorRef = Arc<dyn Executor>;
