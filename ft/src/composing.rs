//! ComposingNode - an interior tier of an executor tree
//!
//! Owns a server-tier backend and an ordered list of children, each of which
//! is any executor honoring the same contract (a leaf coordinator or another
//! composing node). A CLIENTS value at this tier holds one handle per child;
//! how a child spreads its slice over deeper tiers is invisible here.
//!
//! CLIENTS handlers are delegated to every child concurrently as intrinsic
//! calls on the child. `federated_aggregate` runs in two phases: children
//! reduce their slices with an identity report, then this node merges the
//! child partials on its server tier and applies the real report once.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::computation::{CompiledComputation, Computation, Intrinsic, Selector};
use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::executor::{Executor, ExecutorRef, ExecutorValue, Payload, ValueRef};
use crate::fanout::fan_out;
use crate::intrinsics::Reduction;
use crate::tier::{self, FederatedTier};
use crate::types::Type;
use crate::value::{FederatedValue, to_ref};

pub struct ComposingNode {
    server: ExecutorRef,
    children: Vec<ExecutorRef>,
    cardinalities: OnceCell<Vec<usize>>,
}

impl ComposingNode {
    pub fn new(server: ExecutorRef, children: Vec<ExecutorRef>) -> Self {
        info!(children = children.len(), "ComposingNode::new: created");
        Self {
            server,
            children,
            cardinalities: OnceCell::new(),
        }
    }

    /// Client count below each child, discovered once through the children
    /// themselves by summing an all-equal `1` at CLIENTS
    pub async fn cardinalities(&self) -> Result<&[usize]> {
        let counts = self
            .cardinalities
            .get_or_try_init(|| async {
                debug!(children = self.children.len(), "ComposingNode::cardinalities: discovering");
                fan_out(self.children.clone(), |_, child| async move {
                    let one = child
                        .create_value(Data::Int32(1).into(), Some(Type::at_clients(Type::int32(), true)))
                        .await?;
                    let total = delegate(&child, Intrinsic::FederatedSum, one).await?.compute().await?;
                    total
                        .as_i32()
                        .and_then(|count| usize::try_from(count).ok())
                        .ok_or_else(|| ExecutorError::TypeMismatch(format!("client count reported as {}", total)))
                })
                .await
            })
            .await?;
        Ok(counts)
    }

    /// Child handles of a CLIENTS value, checked against the child count
    fn slots(&self, value: &FederatedValue, context: &str) -> Result<Vec<ValueRef>> {
        let slots = value.client_values(context)?;
        if slots.len() != self.children.len() {
            return Err(ExecutorError::CardinalityMismatch {
                expected: self.children.len(),
                got: slots.len(),
            });
        }
        Ok(slots.to_vec())
    }

    fn paired(&self, value: &FederatedValue, context: &str) -> Result<Vec<(ExecutorRef, ValueRef)>> {
        Ok(self.children.iter().cloned().zip(self.slots(value, context)?).collect())
    }
}

/// Call an intrinsic on a child executor
async fn delegate(child: &ExecutorRef, intrinsic: Intrinsic, argument: ValueRef) -> Result<ValueRef> {
    let function = child.create_value(Computation::Intrinsic(intrinsic).into(), None).await?;
    child.create_call(function, Some(argument)).await
}

#[async_trait]
impl FederatedTier for ComposingNode {
    fn tier_name(&self) -> &'static str {
        "ComposingNode"
    }

    fn server_backend(&self) -> &ExecutorRef {
        &self.server
    }

    fn unplaced_backend(&self) -> &ExecutorRef {
        &self.server
    }

    async fn num_clients(&self) -> Result<usize> {
        Ok(self.cardinalities().await?.iter().sum())
    }

    async fn value_at_clients(&self, data: Data, member: Type) -> Result<Arc<FederatedValue>> {
        debug!(%member, children = self.children.len(), "ComposingNode::value_at_clients: called");
        let ty = Type::at_clients(member.clone(), true);
        let slots = fan_out(self.children.clone(), move |_, child| {
            let data = data.clone();
            let ty = ty.clone();
            async move { child.create_value(data.into(), Some(ty)).await }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, true))
    }

    async fn clients_from_list(&self, mut items: Vec<Data>, member: Type) -> Result<Arc<FederatedValue>> {
        debug!(%member, items = items.len(), "ComposingNode::clients_from_list: called");
        let counts = self.cardinalities().await?;
        let expected: usize = counts.iter().sum();
        if items.len() != expected {
            return Err(ExecutorError::CardinalityMismatch {
                expected,
                got: items.len(),
            });
        }

        let mut chunks = Vec::with_capacity(counts.len());
        for (child, count) in self.children.iter().zip(counts) {
            let rest = items.split_off(*count);
            chunks.push((child.clone(), std::mem::replace(&mut items, rest)));
        }
        let ty = Type::at_clients(member.clone(), false);
        let slots = fan_out(chunks, move |_, (child, chunk)| {
            let ty = ty.clone();
            async move { child.create_value(Data::List(chunk).into(), Some(ty)).await }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, false))
    }

    async fn eval_at_clients(&self, function: CompiledComputation) -> Result<Arc<FederatedValue>> {
        debug!(children = self.children.len(), "ComposingNode::eval_at_clients: called");
        let member = function.result_type()?.clone();
        let slots = fan_out(self.children.clone(), move |_, child| {
            let function = function.clone();
            async move {
                let callable = child.create_value(Computation::Compiled(function).into(), None).await?;
                delegate(&child, Intrinsic::FederatedEvalAtClients, callable).await
            }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, false))
    }

    async fn map_clients(
        &self,
        function: CompiledComputation,
        value: Arc<FederatedValue>,
    ) -> Result<Arc<FederatedValue>> {
        debug!(value = %value.type_signature(), "ComposingNode::map_clients: called");
        let member = function.result_type()?.clone();
        let pairs = self.paired(&value, "federated_map")?;
        let slots = fan_out(pairs, move |_, (child, slot)| {
            let function = function.clone();
            async move {
                let callable = child.create_value(Computation::Compiled(function).into(), None).await?;
                let argument = child.create_tuple(vec![(None, callable), (None, slot)]).await?;
                delegate(&child, Intrinsic::FederatedMap, argument).await
            }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, false))
    }

    async fn broadcast(&self, value: Arc<FederatedValue>) -> Result<Arc<FederatedValue>> {
        debug!(value = %value.type_signature(), "ComposingNode::broadcast: called");
        let member = value.member_type()?.clone();
        let data = value.server_value("federated_broadcast")?.compute().await?;
        let ty = Type::at_server(member.clone());
        let slots = fan_out(self.children.clone(), move |_, child| {
            let data = data.clone();
            let ty = ty.clone();
            async move {
                let at_server = child.create_value(data.into(), Some(ty)).await?;
                delegate(&child, Intrinsic::FederatedBroadcast, at_server).await
            }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, true))
    }

    async fn zip_at_clients(&self, fields: Vec<(Option<String>, Arc<FederatedValue>)>) -> Result<Arc<FederatedValue>> {
        debug!(len = fields.len(), "ComposingNode::zip_at_clients: called");
        let member = Type::Tuple(
            fields
                .iter()
                .map(|(name, value)| Ok((name.clone(), value.member_type()?.clone())))
                .collect::<Result<Vec<_>>>()?,
        );
        let columns = fields
            .iter()
            .map(|(_, value)| self.slots(value, "federated_zip_at_clients"))
            .collect::<Result<Vec<_>>>()?;
        let names: Vec<Option<String>> = fields.iter().map(|(name, _)| name.clone()).collect();

        let rows: Vec<(ExecutorRef, Vec<(Option<String>, ValueRef)>)> = self
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let row = names
                    .iter()
                    .cloned()
                    .zip(columns.iter().map(|column| column[i].clone()))
                    .collect();
                (child.clone(), row)
            })
            .collect();
        let slots = fan_out(rows, |_, (child, row)| async move {
            let tuple = child.create_tuple(row).await?;
            delegate(&child, Intrinsic::FederatedZipAtClients, tuple).await
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, false))
    }

    async fn aggregate(&self, value: Arc<FederatedValue>, reduction: Reduction) -> Result<Arc<FederatedValue>> {
        debug!(value = %value.type_signature(), "ComposingNode::aggregate: called");
        let pairs = self.paired(&value, "federated_aggregate")?;
        let partial = reduction.without_report();

        // Phase one: every child reduces its own slice, stopping before the report
        let partials = fan_out(pairs, move |_, (child, slot)| {
            let partial = partial.clone();
            async move {
                let zero = child.create_value(partial.zero.into(), Some(partial.zero_type)).await?;
                let mut functions = Vec::with_capacity(3);
                for function in [partial.accumulate, partial.merge, partial.report] {
                    functions.push((None, child.create_value(Computation::Compiled(function).into(), None).await?));
                }
                let mut arguments = vec![(None, slot), (None, zero)];
                arguments.extend(functions);
                let argument = child.create_tuple(arguments).await?;
                delegate(&child, Intrinsic::FederatedAggregate, argument).await?.compute().await
            }
        })
        .await?;

        // Phase two: merge child partials here and report once
        self.finish_aggregate(partials, &reduction).await
    }

    async fn collect(&self, value: Arc<FederatedValue>) -> Result<Arc<FederatedValue>> {
        debug!(value = %value.type_signature(), "ComposingNode::collect: called");
        let member = value.member_type()?.clone();
        let pairs = self.paired(&value, "federated_collect")?;
        let lists = fan_out(pairs, |_, (child, slot)| async move {
            delegate(&child, Intrinsic::FederatedCollect, slot).await?.compute().await
        })
        .await?;

        let mut items = Vec::new();
        for list in lists {
            match list {
                Data::List(collected) => items.extend(collected),
                other => {
                    return Err(ExecutorError::TypeMismatch(format!(
                        "child collected {} instead of a list",
                        other
                    )));
                }
            }
        }
        let sequence = Type::sequence(member);
        let collected = self
            .server
            .create_value(Data::List(items).into(), Some(sequence.clone()))
            .await?;
        Ok(FederatedValue::server(collected, sequence))
    }
}

#[async_trait]
impl Executor for ComposingNode {
    async fn create_value(&self, value: Payload, type_spec: Option<Type>) -> Result<ValueRef> {
        debug!(?type_spec, "ComposingNode::create_value: called");
        Ok(to_ref(tier::ingest(self, value, type_spec).await?))
    }

    async fn create_call(&self, function: ValueRef, argument: Option<ValueRef>) -> Result<ValueRef> {
        debug!(function = %function.type_signature(), "ComposingNode::create_call: called");
        let function = FederatedValue::from_ref(function, self.tier_name())?;
        let argument = argument
            .map(|argument| FederatedValue::from_ref(argument, self.tier_name()))
            .transpose()?;
        Ok(to_ref(tier::invoke(self, function, argument).await?))
    }

    async fn create_tuple(&self, elements: Vec<(Option<String>, ValueRef)>) -> Result<ValueRef> {
        debug!(len = elements.len(), "ComposingNode::create_tuple: called");
        let fields = elements
            .into_iter()
            .map(|(name, value)| Ok((name, FederatedValue::from_ref(value, self.tier_name())?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(to_ref(FederatedValue::structure(fields)))
    }

    async fn create_selection(&self, source: ValueRef, selector: Selector) -> Result<ValueRef> {
        debug!(%selector, "ComposingNode::create_selection: called");
        let source = FederatedValue::from_ref(source, self.tier_name())?;
        Ok(to_ref(tier::select(self, source, selector).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eager::EagerExecutor;
    use crate::leaf::LeafCoordinator;

    fn node(leaf_sizes: &[usize]) -> ComposingNode {
        let children = leaf_sizes
            .iter()
            .map(|n| Arc::new(LeafCoordinator::eager(*n)) as ExecutorRef)
            .collect();
        ComposingNode::new(Arc::new(EagerExecutor::new()), children)
    }

    #[tokio::test]
    async fn test_cardinalities_discovered_from_children() {
        let node = node(&[2, 3, 0]);
        assert_eq!(node.cardinalities().await.unwrap(), &[2, 3, 0]);
        assert_eq!(node.num_clients().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_all_equal_value_behind_empty_first_child() {
        let node = node(&[0, 2]);

        let replicated = node.value_at_clients(Data::Int32(10), Type::int32()).await.unwrap();
        assert_eq!(replicated.compute().await.unwrap(), Data::Int32(10));

        let at_server = node.value_at_server(Data::Int32(7), Type::int32()).await.unwrap();
        let broadcast = node.broadcast(at_server).await.unwrap();
        assert_eq!(broadcast.compute().await.unwrap(), Data::Int32(7));
    }

    #[tokio::test]
    async fn test_all_equal_value_without_clients() {
        let node = node(&[0, 0]);
        let replicated = node.value_at_clients(Data::Int32(10), Type::int32()).await.unwrap();

        assert!(matches!(replicated.compute().await, Err(ExecutorError::EmptyPopulation)));
    }

    #[tokio::test]
    async fn test_list_split_across_children_in_order() {
        let node = node(&[2, 3]);
        let items: Vec<Data> = (1..=5).map(Data::Int32).collect();
        let value = node
            .create_value(Data::List(items.clone()).into(), Some(Type::at_clients(Type::int32(), false)))
            .await
            .unwrap();

        assert_eq!(node.compute(&value).await.unwrap(), Data::List(items));
    }

    #[tokio::test]
    async fn test_list_length_must_match_total_clients() {
        let node = node(&[2, 3]);
        let err = node
            .create_value(
                Data::List(vec![Data::Int32(1); 4]).into(),
                Some(Type::at_clients(Type::int32(), false)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::CardinalityMismatch { expected: 5, got: 4 }));
    }

    #[tokio::test]
    async fn test_collect_concatenates_children() {
        let node = node(&[1, 2]);
        let value = node
            .create_value(
                Data::List(vec![Data::Int32(7), Data::Int32(8), Data::Int32(9)]).into(),
                Some(Type::at_clients(Type::int32(), false)),
            )
            .await
            .unwrap();
        let collect = node
            .create_value(Computation::intrinsic(Intrinsic::FederatedCollect).into(), None)
            .await
            .unwrap();
        let collected = node.create_call(collect, Some(value)).await.unwrap();

        assert_eq!(
            node.compute(&collected).await.unwrap(),
            Data::List(vec![Data::Int32(7), Data::Int32(8), Data::Int32(9)])
        );
    }

    #[tokio::test]
    async fn test_slot_count_checked_against_children() {
        let node = node(&[1, 1]);
        let stray = FederatedValue::clients(vec![], Type::int32(), false);
        let err = node
            .map_clients(CompiledComputation::identity(Type::int32()), stray)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::CardinalityMismatch { expected: 2, got: 0 }));
    }
}
