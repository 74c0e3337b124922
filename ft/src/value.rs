//! Federated value model shared by leaf coordinators and composing nodes
//!
//! A value owned by a federated tier is one of:
//!
//! ```text
//! Embedded   handle in the tier's unplaced (server-tier) backend
//! Function   compiled computation, embedded lazily wherever it is called
//! Intrinsic  federated operator awaiting its argument
//! Structure  ordered, optionally named tuple of values of this tier
//! Server     single handle in the server backend
//! Clients    one handle per slot: per client backend at a leaf,
//!            per child executor at a composing node
//! ```

use async_trait::async_trait;
use futures::future::try_join_all;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::computation::{CompiledComputation, Intrinsic, Selector};
use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::executor::{ExecutorValue, ValueRef, downcast_value};
use crate::placement::Placement;
use crate::types::Type;

/// Internal representation of a [`FederatedValue`]
#[derive(Debug)]
pub enum Repr {
    Embedded(ValueRef),
    Function(CompiledComputation),
    Intrinsic(Intrinsic),
    Structure(Vec<(Option<String>, Arc<FederatedValue>)>),
    Server(ValueRef),
    Clients(Vec<ValueRef>),
}

/// A value owned by a leaf coordinator or composing node
#[derive(Debug)]
pub struct FederatedValue {
    repr: Repr,
    type_signature: Type,
    computed: OnceCell<Data>,
}

impl FederatedValue {
    fn new(repr: Repr, type_signature: Type) -> Arc<Self> {
        Arc::new(Self {
            repr,
            type_signature,
            computed: OnceCell::new(),
        })
    }

    pub fn embedded(value: ValueRef) -> Arc<Self> {
        let ty = value.type_signature().clone();
        Self::new(Repr::Embedded(value), ty)
    }

    pub fn function(comp: CompiledComputation) -> Arc<Self> {
        let ty = comp.type_signature.clone();
        Self::new(Repr::Function(comp), ty)
    }

    pub fn intrinsic(intrinsic: Intrinsic) -> Arc<Self> {
        Self::new(Repr::Intrinsic(intrinsic), Type::Intrinsic(intrinsic))
    }

    pub fn structure(fields: Vec<(Option<String>, Arc<FederatedValue>)>) -> Arc<Self> {
        let ty = Type::Tuple(
            fields
                .iter()
                .map(|(n, v)| (n.clone(), v.type_signature.clone()))
                .collect(),
        );
        Self::new(Repr::Structure(fields), ty)
    }

    /// Server-placed value; `member` is the type of the handle in the server backend
    pub fn server(value: ValueRef, member: Type) -> Arc<Self> {
        Self::new(Repr::Server(value), Type::at_server(member))
    }

    /// Clients-placed value with one handle per slot
    pub fn clients(slots: Vec<ValueRef>, member: Type, all_equal: bool) -> Arc<Self> {
        Self::new(Repr::Clients(slots), Type::at_clients(member, all_equal))
    }

    pub fn repr(&self) -> &Repr {
        &self.repr
    }

    /// Recover this tier's value from a handle passed in by a caller
    pub fn from_ref(value: ValueRef, owner: &str) -> Result<Arc<Self>> {
        downcast_value::<FederatedValue>(value, owner)
    }

    /// Member type of a federated value
    pub fn member_type(&self) -> Result<&Type> {
        self.type_signature
            .member()
            .ok_or_else(|| ExecutorError::TypeMismatch(format!("{} is not a federated type", self.type_signature)))
    }

    /// Elements of a structure that must have exactly `expected` entries
    pub fn elements(&self, context: &str, expected: usize) -> Result<Vec<Arc<FederatedValue>>> {
        match &self.repr {
            Repr::Structure(fields) if fields.len() == expected => Ok(fields.iter().map(|(_, v)| v.clone()).collect()),
            Repr::Structure(fields) => Err(ExecutorError::ArityMismatch {
                context: context.to_string(),
                expected,
                got: fields.len(),
            }),
            _ => Err(ExecutorError::ArityMismatch {
                context: context.to_string(),
                expected,
                got: 1,
            }),
        }
    }

    /// Named fields of a structure
    pub fn fields(&self, context: &str) -> Result<&[(Option<String>, Arc<FederatedValue>)]> {
        match &self.repr {
            Repr::Structure(fields) => Ok(fields),
            _ => Err(ExecutorError::TypeMismatch(format!(
                "{} expects a tuple, found {}",
                context, self.type_signature
            ))),
        }
    }

    /// The compiled computation held by a function value
    pub fn compiled(&self, context: &str) -> Result<&CompiledComputation> {
        match &self.repr {
            Repr::Function(comp) => Ok(comp),
            _ => Err(ExecutorError::TypeMismatch(format!(
                "{} expects a compiled function, found {}",
                context, self.type_signature
            ))),
        }
    }

    pub fn server_value(&self, context: &str) -> Result<&ValueRef> {
        match &self.repr {
            Repr::Server(value) => Ok(value),
            _ => Err(ExecutorError::TypeMismatch(format!(
                "{} expects a value at SERVER, found {}",
                context, self.type_signature
            ))),
        }
    }

    pub fn client_values(&self, context: &str) -> Result<&[ValueRef]> {
        match &self.repr {
            Repr::Clients(slots) => Ok(slots),
            _ => Err(ExecutorError::TypeMismatch(format!(
                "{} expects a value at CLIENTS, found {}",
                context, self.type_signature
            ))),
        }
    }

    /// Select an element of a structure
    pub fn select(&self, selector: &Selector) -> Result<Arc<FederatedValue>> {
        let fields = self.fields("selection")?;
        let index = selector.resolve(fields.iter().map(|(n, _)| n.as_deref()))?;
        Ok(fields[index].1.clone())
    }

    async fn materialize(&self) -> Result<Data> {
        match &self.repr {
            Repr::Embedded(value) | Repr::Server(value) => value.compute().await,
            Repr::Clients(slots) if self.type_signature.is_all_equal() => {
                // Slots of children without clients hold no copy
                for (i, slot) in slots.iter().enumerate() {
                    match slot.compute().await {
                        Err(ExecutorError::EmptyPopulation) => continue,
                        result => return result.map_err(|e| ExecutorError::child(i, e)),
                    }
                }
                Err(ExecutorError::EmptyPopulation)
            }
            Repr::Clients(slots) => {
                let computed = try_join_all(
                    slots
                        .iter()
                        .enumerate()
                        .map(|(i, slot)| async move { slot.compute().await.map_err(|e| ExecutorError::child(i, e)) }),
                )
                .await?;
                let mut items = Vec::with_capacity(computed.len());
                for (slot, data) in slots.iter().zip(computed) {
                    // A slot that is itself a non-all-equal CLIENTS value contributes its whole list
                    match (slot.type_signature(), data) {
                        (
                            Type::Federated {
                                placement: Placement::Clients,
                                all_equal: false,
                                ..
                            },
                            Data::List(nested),
                        ) => items.extend(nested),
                        (_, data) => items.push(data),
                    }
                }
                Ok(Data::List(items))
            }
            Repr::Structure(fields) => {
                let computed = try_join_all(fields.iter().map(|(_, v)| v.compute())).await?;
                Ok(Data::Tuple(
                    fields.iter().map(|(n, _)| n.clone()).zip(computed).collect(),
                ))
            }
            Repr::Function(_) | Repr::Intrinsic(_) => Err(ExecutorError::TypeMismatch(format!(
                "cannot materialize a value of functional type {}",
                self.type_signature
            ))),
        }
    }
}

#[async_trait]
impl ExecutorValue for FederatedValue {
    fn type_signature(&self) -> &Type {
        &self.type_signature
    }

    /// Materialize once; later calls return the cached result
    async fn compute(&self) -> Result<Data> {
        debug!(type_signature = %self.type_signature, "FederatedValue::compute: called");
        self.computed.get_or_try_init(|| self.materialize()).await.cloned()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Upcast a tier value to a handle
pub fn to_ref(value: Arc<FederatedValue>) -> ValueRef {
    value
}
