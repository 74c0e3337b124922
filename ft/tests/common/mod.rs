//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use fedtree::computation::{Computation, Expr, Intrinsic};
use fedtree::error::{ExecutorError, Result};
use fedtree::executor::downcast_value;
use fedtree::{
    ComposingNode, Data, EagerExecutor, Executor, ExecutorRef, ExecutorValue, LeafBackends, LeafCoordinator, Payload,
    Selector, TierSpec, Type, ValueRef,
};

/// Call counters shared between a probe and the backends it instruments
#[derive(Debug, Default)]
pub struct Probe {
    pub creates: AtomicUsize,
    pub calls: AtomicUsize,
    pub computes: AtomicUsize,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct InstrumentedValue {
    inner: ValueRef,
    probe: Arc<Probe>,
}

#[async_trait]
impl ExecutorValue for InstrumentedValue {
    fn type_signature(&self) -> &Type {
        self.inner.type_signature()
    }

    async fn compute(&self) -> Result<Data> {
        self.probe.computes.fetch_add(1, Ordering::SeqCst);
        self.inner.compute().await
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Eager backend that counts operations, can delay calls, and can be told to fail
pub struct InstrumentedExecutor {
    inner: EagerExecutor,
    probe: Arc<Probe>,
    call_delay_ms: AtomicU64,
    fail_calls: AtomicBool,
}

impl InstrumentedExecutor {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            inner: EagerExecutor::new(),
            probe,
            call_delay_ms: AtomicU64::new(0),
            fail_calls: AtomicBool::new(false),
        }
    }

    pub fn with_call_delay(self, delay: Duration) -> Self {
        self.call_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn failing(self) -> Self {
        self.fail_calls.store(true, Ordering::SeqCst);
        self
    }

    fn wrap(&self, inner: ValueRef) -> ValueRef {
        Arc::new(InstrumentedValue {
            inner,
            probe: self.probe.clone(),
        })
    }

    fn unwrap(value: ValueRef) -> Result<ValueRef> {
        Ok(downcast_value::<InstrumentedValue>(value, "InstrumentedExecutor")?.inner.clone())
    }
}

#[async_trait]
impl Executor for InstrumentedExecutor {
    async fn create_value(&self, value: Payload, type_spec: Option<Type>) -> Result<ValueRef> {
        self.probe.creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.wrap(self.inner.create_value(value, type_spec).await?))
    }

    async fn create_call(&self, function: ValueRef, argument: Option<ValueRef>) -> Result<ValueRef> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.call_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(ExecutorError::Computation("injected backend failure".to_string()));
        }
        let argument = argument.map(Self::unwrap).transpose()?;
        Ok(self.wrap(self.inner.create_call(Self::unwrap(function)?, argument).await?))
    }

    async fn create_tuple(&self, elements: Vec<(Option<String>, ValueRef)>) -> Result<ValueRef> {
        let elements = elements
            .into_iter()
            .map(|(name, value)| Ok((name, Self::unwrap(value)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.wrap(self.inner.create_tuple(elements).await?))
    }

    async fn create_selection(&self, source: ValueRef, selector: Selector) -> Result<ValueRef> {
        Ok(self.wrap(self.inner.create_selection(Self::unwrap(source)?, selector).await?))
    }
}

/// Leaf whose client backends are all instrumented with `probe`
pub fn instrumented_leaf(num_clients: usize, probe: &Arc<Probe>) -> LeafCoordinator {
    instrumented_leaf_with(num_clients, probe, |_, backend| backend)
}

/// Leaf whose client backends are instrumented and then adjusted per client index
pub fn instrumented_leaf_with(
    num_clients: usize,
    probe: &Arc<Probe>,
    adjust: impl Fn(usize, InstrumentedExecutor) -> InstrumentedExecutor,
) -> LeafCoordinator {
    let mut backends = LeafBackends::eager(0);
    backends.clients = (0..num_clients)
        .map(|i| Arc::new(adjust(i, InstrumentedExecutor::new(probe.clone()))) as ExecutorRef)
        .collect();
    LeafCoordinator::new(backends)
}

/// Composing node over the given children with an eager server tier
pub fn composing(children: Vec<ExecutorRef>) -> ExecutorRef {
    Arc::new(ComposingNode::new(Arc::new(EagerExecutor::new()), children))
}

/// Eager tree of the given uniform shape
pub fn tree(fanout: &[usize]) -> ExecutorRef {
    TierSpec::uniform(fanout).expect("non-empty fanout").build_root().expect("valid fanout")
}

pub fn int(value: i32) -> Computation {
    Computation::literal(value, Type::int32())
}

pub fn add_one() -> Computation {
    Computation::compiled(
        Expr::param().add(Expr::constant(1)),
        Type::function(Some(Type::int32()), Type::int32()),
    )
}

pub fn add_pair() -> Computation {
    Computation::compiled(
        Expr::param().at(0).add(Expr::param().at(1)),
        Type::function(Some(Type::tuple(vec![Type::int32(), Type::int32()])), Type::int32()),
    )
}

pub fn identity(ty: Type) -> Computation {
    Computation::compiled(Expr::param(), Type::function(Some(ty.clone()), ty))
}

pub fn at_clients(value: i32) -> Computation {
    Computation::federated(Intrinsic::FederatedValueAtClients, vec![int(value)])
}

pub fn at_server(value: i32) -> Computation {
    Computation::federated(Intrinsic::FederatedValueAtServer, vec![int(value)])
}

/// `{int32}@CLIENTS` list literal
pub fn client_list(values: impl IntoIterator<Item = i32>) -> Computation {
    Computation::literal(
        Data::List(values.into_iter().map(Data::Int32).collect()),
        Type::at_clients(Type::int32(), false),
    )
}
