//! Behaviour shared by every federated tier
//!
//! [`FederatedTier`] is the per-tier handler table: leaf coordinators run the
//! CLIENTS handlers against their client backends, composing nodes delegate
//! them to their children. SERVER-side handlers are identical for both and
//! are provided here, running on the tier's server backend. The free
//! functions implement the non-federated half of the Executor contract in
//! terms of the handlers.

use async_trait::async_trait;
use futures::future::{BoxFuture, try_join_all};
use std::sync::Arc;
use tracing::debug;

use crate::computation::{CompiledComputation, Computation, Selector};
use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::executor::{ExecutorRef, ExecutorValue, Payload, ValueRef};
use crate::intrinsics::{Reduction, dispatch};
use crate::placement::Placement;
use crate::types::Type;
use crate::value::{FederatedValue, Repr};

#[async_trait]
pub trait FederatedTier: Send + Sync {
    /// Name used in logs and error messages
    fn tier_name(&self) -> &'static str;

    /// Backend holding SERVER-placed values; merges and reports run here
    fn server_backend(&self) -> &ExecutorRef;

    /// Backend running non-federated calls
    fn unplaced_backend(&self) -> &ExecutorRef;

    /// Total number of clients below this tier
    async fn num_clients(&self) -> Result<usize>;

    /// Replicate one value to every client (all-equal)
    async fn value_at_clients(&self, data: Data, member: Type) -> Result<Arc<FederatedValue>>;

    /// Distribute one value per client, in client order
    async fn clients_from_list(&self, items: Vec<Data>, member: Type) -> Result<Arc<FederatedValue>>;

    async fn eval_at_clients(&self, function: CompiledComputation) -> Result<Arc<FederatedValue>>;

    /// Apply a function to every member of a CLIENTS value
    async fn map_clients(
        &self,
        function: CompiledComputation,
        value: Arc<FederatedValue>,
    ) -> Result<Arc<FederatedValue>>;

    async fn broadcast(&self, value: Arc<FederatedValue>) -> Result<Arc<FederatedValue>>;

    async fn zip_at_clients(&self, fields: Vec<(Option<String>, Arc<FederatedValue>)>) -> Result<Arc<FederatedValue>>;

    async fn aggregate(&self, value: Arc<FederatedValue>, reduction: Reduction) -> Result<Arc<FederatedValue>>;

    async fn collect(&self, value: Arc<FederatedValue>) -> Result<Arc<FederatedValue>>;

    async fn value_at_server(&self, data: Data, member: Type) -> Result<Arc<FederatedValue>> {
        debug!(tier = self.tier_name(), %member, "value_at_server: called");
        let value = self
            .server_backend()
            .create_value(data.into(), Some(member.clone()))
            .await?;
        Ok(FederatedValue::server(value, member))
    }

    async fn eval_at_server(&self, function: CompiledComputation) -> Result<Arc<FederatedValue>> {
        debug!(tier = self.tier_name(), "eval_at_server: called");
        let server = self.server_backend();
        let function = server.create_value(Computation::Compiled(function).into(), None).await?;
        let result = server.create_call(function, None).await?;
        let member = result.type_signature().clone();
        Ok(FederatedValue::server(result, member))
    }

    /// Apply a function to a SERVER value
    async fn apply(&self, function: CompiledComputation, value: Arc<FederatedValue>) -> Result<Arc<FederatedValue>> {
        debug!(tier = self.tier_name(), "apply: called");
        let server = self.server_backend();
        let argument = value.server_value("federated_apply")?.clone();
        let function = server.create_value(Computation::Compiled(function).into(), None).await?;
        let result = server.create_call(function, Some(argument)).await?;
        let member = result.type_signature().clone();
        Ok(FederatedValue::server(result, member))
    }

    async fn zip_at_server(&self, fields: Vec<(Option<String>, Arc<FederatedValue>)>) -> Result<Arc<FederatedValue>> {
        debug!(tier = self.tier_name(), len = fields.len(), "zip_at_server: called");
        let elements = fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.server_value("federated_zip_at_server")?.clone())))
            .collect::<Result<Vec<_>>>()?;
        let zipped = self.server_backend().create_tuple(elements).await?;
        let member = zipped.type_signature().clone();
        Ok(FederatedValue::server(zipped, member))
    }

    /// Move partials to the server backend, merge them and apply the report
    async fn finish_aggregate(&self, partials: Vec<Data>, reduction: &Reduction) -> Result<Arc<FederatedValue>> {
        debug!(tier = self.tier_name(), partials = partials.len(), "finish_aggregate: called");
        let server = self.server_backend();
        let embedded = try_join_all(
            partials
                .into_iter()
                .map(|partial| server.create_value(partial.into(), Some(reduction.zero_type.clone()))),
        )
        .await?;
        let merged = reduce_pairwise(server, reduction, embedded).await?;
        let report = server
            .create_value(Computation::Compiled(reduction.report.clone()).into(), None)
            .await?;
        let result = server.create_call(report, Some(merged)).await?;
        let member = result.type_signature().clone();
        Ok(FederatedValue::server(result, member))
    }
}

/// Combine partials with `merge` as a balanced tree of adjacent pairs.
///
/// Only adjacent partials are ever merged, so the result depends on the
/// associativity of `merge` alone. No partials yields `zero`.
pub async fn reduce_pairwise(executor: &ExecutorRef, reduction: &Reduction, partials: Vec<ValueRef>) -> Result<ValueRef> {
    if partials.is_empty() {
        return executor
            .create_value(reduction.zero.clone().into(), Some(reduction.zero_type.clone()))
            .await;
    }

    let merge = executor
        .create_value(Computation::Compiled(reduction.merge.clone()).into(), None)
        .await?;
    let mut level = partials;
    while level.len() > 1 {
        let mut pairs = Vec::with_capacity(level.len() / 2);
        let mut carry = None;
        let mut iter = level.into_iter();
        loop {
            match (iter.next(), iter.next()) {
                (Some(left), Some(right)) => pairs.push((left, right)),
                (Some(last), None) => {
                    carry = Some(last);
                    break;
                }
                _ => break,
            }
        }
        level = try_join_all(pairs.into_iter().map(|(left, right)| {
            let merge = merge.clone();
            async move {
                let argument = executor.create_tuple(vec![(None, left), (None, right)]).await?;
                executor.create_call(merge, Some(argument)).await
            }
        }))
        .await?;
        level.extend(carry);
    }

    level
        .pop()
        .ok_or_else(|| ExecutorError::Computation("pairwise merge produced no result".to_string()))
}

/// `create_value` for a federated tier
pub async fn ingest<T: FederatedTier + ?Sized>(
    tier: &T,
    value: Payload,
    type_spec: Option<Type>,
) -> Result<Arc<FederatedValue>> {
    match value {
        Payload::Data(data) => {
            let ty = type_spec.unwrap_or_else(|| data.infer_type());
            embed(tier, data, ty).await
        }
        Payload::Computation(Computation::Literal { value, type_signature }) => embed(tier, value, type_signature).await,
        Payload::Computation(Computation::Compiled(comp)) => Ok(FederatedValue::function(comp)),
        Payload::Computation(Computation::Intrinsic(intrinsic)) => Ok(FederatedValue::intrinsic(intrinsic)),
        Payload::Computation(other) => Err(ExecutorError::UnsupportedOperator(format!(
            "{} cannot ingest an unresolved {} computation",
            tier.tier_name(),
            other.kind()
        ))),
    }
}

/// Place data according to its type, recursing through tuples that contain
/// federated elements
fn embed<'a, T: FederatedTier + ?Sized>(tier: &'a T, data: Data, ty: Type) -> BoxFuture<'a, Result<Arc<FederatedValue>>> {
    Box::pin(async move {
        match ty {
            Type::Federated {
                member,
                placement: Placement::Server,
                ..
            } => tier.value_at_server(data, *member).await,
            Type::Federated {
                member,
                placement: Placement::Clients,
                all_equal: true,
            } => tier.value_at_clients(data, *member).await,
            Type::Federated {
                member,
                placement: Placement::Clients,
                all_equal: false,
            } => match data {
                Data::List(items) => tier.clients_from_list(items, *member).await,
                other => Err(ExecutorError::TypeMismatch(format!(
                    "a {{{}}}@CLIENTS value needs one entry per client, found {}",
                    member, other
                ))),
            },
            Type::Federated { .. } => Err(ExecutorError::TypeMismatch(
                "UNPLACED cannot be used as a federated placement".to_string(),
            )),
            Type::Tuple(fields) if fields.iter().any(|(_, t)| t.contains_federated()) => {
                let values = match data {
                    Data::Tuple(values) if values.len() == fields.len() => values,
                    other => {
                        return Err(ExecutorError::TypeMismatch(format!(
                            "data {} does not conform to {}",
                            other,
                            Type::Tuple(fields)
                        )));
                    }
                };
                let mut elements = Vec::with_capacity(fields.len());
                for ((name, ty), (_, data)) in fields.into_iter().zip(values) {
                    elements.push((name, embed(tier, data, ty).await?));
                }
                Ok(FederatedValue::structure(elements))
            }
            ty => {
                let value = tier.unplaced_backend().create_value(data.into(), Some(ty)).await?;
                Ok(FederatedValue::embedded(value))
            }
        }
    })
}

/// `create_call` for a federated tier
pub async fn invoke<T: FederatedTier + ?Sized>(
    tier: &T,
    function: Arc<FederatedValue>,
    argument: Option<Arc<FederatedValue>>,
) -> Result<Arc<FederatedValue>> {
    match function.repr() {
        Repr::Intrinsic(intrinsic) => dispatch(tier, *intrinsic, argument).await,
        Repr::Function(comp) => {
            let backend = tier.unplaced_backend();
            let callable = backend.create_value(Computation::Compiled(comp.clone()).into(), None).await?;
            let argument = match &argument {
                Some(argument) => Some(unplaced_handle(tier, argument).await?),
                None => None,
            };
            Ok(FederatedValue::embedded(backend.create_call(callable, argument).await?))
        }
        _ => Err(ExecutorError::TypeMismatch(format!(
            "value of type {} is not callable",
            function.type_signature()
        ))),
    }
}

/// `create_selection` for a federated tier
pub async fn select<T: FederatedTier + ?Sized>(
    tier: &T,
    source: Arc<FederatedValue>,
    selector: Selector,
) -> Result<Arc<FederatedValue>> {
    match source.repr() {
        Repr::Structure(_) => source.select(&selector),
        Repr::Embedded(value) => Ok(FederatedValue::embedded(
            tier.unplaced_backend().create_selection(value.clone(), selector).await?,
        )),
        _ => Err(ExecutorError::TypeMismatch(format!(
            "cannot select {} from a value of type {}",
            selector,
            source.type_signature()
        ))),
    }
}

/// Handle of an unplaced value in the tier's unplaced backend
async fn unplaced_handle<T: FederatedTier + ?Sized>(tier: &T, value: &Arc<FederatedValue>) -> Result<ValueRef> {
    match value.repr() {
        Repr::Embedded(handle) => Ok(handle.clone()),
        Repr::Structure(_) if !value.type_signature().contains_federated() => {
            let data = value.compute().await?;
            tier.unplaced_backend()
                .create_value(data.into(), Some(value.type_signature().clone()))
                .await
        }
        _ => Err(ExecutorError::TypeMismatch(format!(
            "compiled functions take unplaced arguments, found {}",
            value.type_signature()
        ))),
    }
}
