//! LeafCoordinator - the bottom tier of an executor tree
//!
//! Owns one concrete backend per placement: SERVER, UNPLACED, and one
//! backend per client. A CLIENTS value at this tier holds exactly one
//! backend handle per client backend, and every CLIENTS handler fans out
//! over the client backends concurrently.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::computation::{CompiledComputation, Computation, Selector};
use crate::data::Data;
use crate::eager::EagerExecutor;
use crate::error::{ExecutorError, Result};
use crate::executor::{Executor, ExecutorRef, ExecutorValue, Payload, ValueRef};
use crate::fanout::fan_out;
use crate::intrinsics::Reduction;
use crate::tier::{self, FederatedTier};
use crate::types::Type;
use crate::value::{FederatedValue, to_ref};

/// Explicit placement-to-backend mapping for a leaf
pub struct LeafBackends {
    pub server: ExecutorRef,
    pub clients: Vec<ExecutorRef>,
    pub unplaced: ExecutorRef,
}

impl LeafBackends {
    /// Fresh eager backends for `num_clients` clients
    pub fn eager(num_clients: usize) -> Self {
        Self {
            server: Arc::new(EagerExecutor::new()),
            clients: (0..num_clients)
                .map(|_| Arc::new(EagerExecutor::new()) as ExecutorRef)
                .collect(),
            unplaced: Arc::new(EagerExecutor::new()),
        }
    }
}

pub struct LeafCoordinator {
    server: ExecutorRef,
    clients: Vec<ExecutorRef>,
    unplaced: ExecutorRef,
}

impl LeafCoordinator {
    pub fn new(backends: LeafBackends) -> Self {
        info!(clients = backends.clients.len(), "LeafCoordinator::new: created");
        Self {
            server: backends.server,
            clients: backends.clients,
            unplaced: backends.unplaced,
        }
    }

    /// Leaf over fresh eager backends
    pub fn eager(num_clients: usize) -> Self {
        Self::new(LeafBackends::eager(num_clients))
    }

    /// Client handles of a CLIENTS value, checked against the client count
    fn slots(&self, value: &FederatedValue, context: &str) -> Result<Vec<ValueRef>> {
        let slots = value.client_values(context)?;
        if slots.len() != self.clients.len() {
            return Err(ExecutorError::CardinalityMismatch {
                expected: self.clients.len(),
                got: slots.len(),
            });
        }
        Ok(slots.to_vec())
    }

    /// Each client backend paired with its slot of a CLIENTS value
    fn paired(&self, value: &FederatedValue, context: &str) -> Result<Vec<(ExecutorRef, ValueRef)>> {
        Ok(self.clients.iter().cloned().zip(self.slots(value, context)?).collect())
    }
}

#[async_trait]
impl FederatedTier for LeafCoordinator {
    fn tier_name(&self) -> &'static str {
        "LeafCoordinator"
    }

    fn server_backend(&self) -> &ExecutorRef {
        &self.server
    }

    fn unplaced_backend(&self) -> &ExecutorRef {
        &self.unplaced
    }

    async fn num_clients(&self) -> Result<usize> {
        Ok(self.clients.len())
    }

    async fn value_at_clients(&self, data: Data, member: Type) -> Result<Arc<FederatedValue>> {
        debug!(%member, clients = self.clients.len(), "LeafCoordinator::value_at_clients: called");
        let ty = member.clone();
        let slots = fan_out(self.clients.clone(), move |_, client| {
            let data = data.clone();
            let ty = ty.clone();
            async move { client.create_value(data.into(), Some(ty)).await }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, true))
    }

    async fn clients_from_list(&self, items: Vec<Data>, member: Type) -> Result<Arc<FederatedValue>> {
        debug!(%member, items = items.len(), "LeafCoordinator::clients_from_list: called");
        if items.len() != self.clients.len() {
            return Err(ExecutorError::CardinalityMismatch {
                expected: self.clients.len(),
                got: items.len(),
            });
        }
        let ty = member.clone();
        let pairs: Vec<_> = self.clients.iter().cloned().zip(items).collect();
        let slots = fan_out(pairs, move |_, (client, item)| {
            let ty = ty.clone();
            async move { client.create_value(item.into(), Some(ty)).await }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, false))
    }

    async fn eval_at_clients(&self, function: CompiledComputation) -> Result<Arc<FederatedValue>> {
        debug!(clients = self.clients.len(), "LeafCoordinator::eval_at_clients: called");
        let member = function.result_type()?.clone();
        let slots = fan_out(self.clients.clone(), move |_, client| {
            let function = function.clone();
            async move {
                let callable = client.create_value(Computation::Compiled(function).into(), None).await?;
                client.create_call(callable, None).await
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
        debug!(value = %value.type_signature(), "LeafCoordinator::map_clients: called");
        let member = function.result_type()?.clone();
        let pairs = self.paired(&value, "federated_map")?;
        let slots = fan_out(pairs, move |_, (client, slot)| {
            let function = function.clone();
            async move {
                let callable = client.create_value(Computation::Compiled(function).into(), None).await?;
                client.create_call(callable, Some(slot)).await
            }
        })
        .await?;
        Ok(FederatedValue::clients(slots, member, false))
    }

    async fn broadcast(&self, value: Arc<FederatedValue>) -> Result<Arc<FederatedValue>> {
        debug!(value = %value.type_signature(), "LeafCoordinator::broadcast: called");
        let member = value.member_type()?.clone();
        let data = value.server_value("federated_broadcast")?.compute().await?;
        self.value_at_clients(data, member).await
    }

    async fn zip_at_clients(&self, fields: Vec<(Option<String>, Arc<FederatedValue>)>) -> Result<Arc<FederatedValue>> {
        debug!(len = fields.len(), "LeafCoordinator::zip_at_clients: called");
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

        // Transpose field-major columns into one row per client
        let rows: Vec<(ExecutorRef, Vec<(Option<String>, ValueRef)>)> = self
            .clients
            .iter()
            .enumerate()
            .map(|(i, client)| {
                let row = names
                    .iter()
                    .cloned()
                    .zip(columns.iter().map(|column| column[i].clone()))
                    .collect();
                (client.clone(), row)
            })
            .collect();
        let slots = fan_out(rows, |_, (client, row)| async move { client.create_tuple(row).await }).await?;
        Ok(FederatedValue::clients(slots, member, false))
    }

    async fn aggregate(&self, value: Arc<FederatedValue>, reduction: Reduction) -> Result<Arc<FederatedValue>> {
        debug!(value = %value.type_signature(), "LeafCoordinator::aggregate: called");
        let pairs = self.paired(&value, "federated_aggregate")?;
        let zero = reduction.zero.clone();
        let zero_type = reduction.zero_type.clone();
        let accumulate = reduction.accumulate.clone();

        // Fold each client's member into the zero on that client's backend
        let partials = fan_out(pairs, move |_, (client, slot)| {
            let zero = zero.clone();
            let zero_type = zero_type.clone();
            let accumulate = accumulate.clone();
            async move {
                let zero = client.create_value(zero.into(), Some(zero_type)).await?;
                let accumulate = client
                    .create_value(Computation::Compiled(accumulate).into(), None)
                    .await?;
                let argument = client.create_tuple(vec![(None, zero), (None, slot)]).await?;
                let partial = client.create_call(accumulate, Some(argument)).await?;
                partial.compute().await
            }
        })
        .await?;

        self.finish_aggregate(partials, &reduction).await
    }

    async fn collect(&self, value: Arc<FederatedValue>) -> Result<Arc<FederatedValue>> {
        debug!(value = %value.type_signature(), "LeafCoordinator::collect: called");
        let member = value.member_type()?.clone();
        let slots = self.slots(&value, "federated_collect")?;
        let items = fan_out(slots, |_, slot| async move { slot.compute().await }).await?;
        let sequence = Type::sequence(member);
        let collected = self
            .server
            .create_value(Data::List(items).into(), Some(sequence.clone()))
            .await?;
        Ok(FederatedValue::server(collected, sequence))
    }
}

#[async_trait]
impl Executor for LeafCoordinator {
    async fn create_value(&self, value: Payload, type_spec: Option<Type>) -> Result<ValueRef> {
        debug!(?type_spec, "LeafCoordinator::create_value: called");
        Ok(to_ref(tier::ingest(self, value, type_spec).await?))
    }

    async fn create_call(&self, function: ValueRef, argument: Option<ValueRef>) -> Result<ValueRef> {
        debug!(function = %function.type_signature(), "LeafCoordinator::create_call: called");
        let function = FederatedValue::from_ref(function, self.tier_name())?;
        let argument = argument
            .map(|argument| FederatedValue::from_ref(argument, self.tier_name()))
            .transpose()?;
        Ok(to_ref(tier::invoke(self, function, argument).await?))
    }

    async fn create_tuple(&self, elements: Vec<(Option<String>, ValueRef)>) -> Result<ValueRef> {
        debug!(len = elements.len(), "LeafCoordinator::create_tuple: called");
        let fields = elements
            .into_iter()
            .map(|(name, value)| Ok((name, FederatedValue::from_ref(value, self.tier_name())?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(to_ref(FederatedValue::structure(fields)))
    }

    async fn create_selection(&self, source: ValueRef, selector: Selector) -> Result<ValueRef> {
        debug!(%selector, "LeafCoordinator::create_selection: called");
        let source = FederatedValue::from_ref(source, self.tier_name())?;
        Ok(to_ref(tier::select(self, source, selector).await?))
    }
}
