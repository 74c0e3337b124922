//! EagerExecutor - local backend that runs compiled computations directly
//!
//! Stands in for the numeric engine: values are plain [`Data`] or compiled
//! functions, and a call evaluates the function's [`Expr`] against its
//! argument. Every placement of a leaf coordinator is backed by one of these.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::computation::{CompiledComputation, Computation, Expr, Selector};
use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::executor::{Executor, ExecutorValue, Payload, ValueRef, downcast_value};
use crate::types::Type;

#[derive(Debug)]
enum EagerRepr {
    Data(Data),
    Function(CompiledComputation),
}

/// A value held by an [`EagerExecutor`]
#[derive(Debug)]
pub struct EagerValue {
    repr: EagerRepr,
    type_signature: Type,
    live: Arc<AtomicUsize>,
}

impl EagerValue {
    fn new(repr: EagerRepr, type_signature: Type, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            repr,
            type_signature,
            live,
        }
    }

    fn data(&self) -> Result<&Data> {
        match &self.repr {
            EagerRepr::Data(data) => Ok(data),
            EagerRepr::Function(_) => Err(ExecutorError::TypeMismatch(format!(
                "expected data, found function {}",
                self.type_signature
            ))),
        }
    }
}

impl Drop for EagerValue {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutorValue for EagerValue {
    fn type_signature(&self) -> &Type {
        &self.type_signature
    }

    async fn compute(&self) -> Result<Data> {
        Ok(self.data()?.clone())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Backend executor interpreting compiled computations over plain data
#[derive(Debug, Default)]
pub struct EagerExecutor {
    live: Arc<AtomicUsize>,
}

impl EagerExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values created by this executor that are still alive
    pub fn live_values(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn wrap(&self, repr: EagerRepr, type_signature: Type) -> ValueRef {
        Arc::new(EagerValue::new(repr, type_signature, self.live.clone()))
    }
}

#[async_trait]
impl Executor for EagerExecutor {
    async fn create_value(&self, value: Payload, type_spec: Option<Type>) -> Result<ValueRef> {
        debug!(?type_spec, "EagerExecutor::create_value: called");
        match value {
            Payload::Data(data) => {
                let ty = type_spec.unwrap_or_else(|| data.infer_type());
                if ty.is_federated() || !data.conforms_to(&ty) {
                    return Err(ExecutorError::TypeMismatch(format!(
                        "data {} does not conform to {}",
                        data, ty
                    )));
                }
                Ok(self.wrap(EagerRepr::Data(data), ty))
            }
            Payload::Computation(Computation::Compiled(comp)) => {
                let ty = comp.type_signature.clone();
                Ok(self.wrap(EagerRepr::Function(comp), ty))
            }
            Payload::Computation(Computation::Literal { value, type_signature }) => {
                self.create_value(Payload::Data(value), Some(type_signature)).await
            }
            Payload::Computation(other) => Err(ExecutorError::UnsupportedOperator(format!(
                "eager backend cannot ingest a {} computation",
                other.kind()
            ))),
        }
    }

    async fn create_call(&self, function: ValueRef, argument: Option<ValueRef>) -> Result<ValueRef> {
        debug!(function = %function.type_signature(), "EagerExecutor::create_call: called");
        let function = downcast_value::<EagerValue>(function, "EagerExecutor")?;
        let comp = match &function.repr {
            EagerRepr::Function(comp) => comp,
            EagerRepr::Data(_) => {
                return Err(ExecutorError::TypeMismatch(format!(
                    "value of type {} is not callable",
                    function.type_signature
                )));
            }
        };

        let argument = match argument {
            Some(arg) => Some(downcast_value::<EagerValue>(arg, "EagerExecutor")?),
            None => None,
        };
        match (comp.parameter_type(), &argument) {
            (Some(expected), Some(arg)) if !expected.is_assignable_from(&arg.type_signature) => {
                return Err(ExecutorError::TypeMismatch(format!(
                    "expected argument of type {}, found {}",
                    expected, arg.type_signature
                )));
            }
            (Some(_), None) => {
                return Err(ExecutorError::ArityMismatch {
                    context: function.type_signature.to_string(),
                    expected: 1,
                    got: 0,
                });
            }
            (None, Some(_)) => {
                return Err(ExecutorError::ArityMismatch {
                    context: function.type_signature.to_string(),
                    expected: 0,
                    got: 1,
                });
            }
            _ => {}
        }

        let param = match &argument {
            Some(arg) => Some(arg.data()?),
            None => None,
        };
        let result = evaluate(&comp.expr, param)?;
        let result_type = comp.result_type()?.clone();
        if !result.conforms_to(&result_type) {
            return Err(ExecutorError::TypeMismatch(format!(
                "function result {} does not conform to declared {}",
                result, result_type
            )));
        }
        Ok(self.wrap(EagerRepr::Data(result), result_type))
    }

    async fn create_tuple(&self, elements: Vec<(Option<String>, ValueRef)>) -> Result<ValueRef> {
        debug!(len = elements.len(), "EagerExecutor::create_tuple: called");
        let mut fields = Vec::with_capacity(elements.len());
        let mut types = Vec::with_capacity(elements.len());
        for (name, element) in elements {
            let element = downcast_value::<EagerValue>(element, "EagerExecutor")?;
            fields.push((name.clone(), element.data()?.clone()));
            types.push((name, element.type_signature.clone()));
        }
        Ok(self.wrap(EagerRepr::Data(Data::Tuple(fields)), Type::Tuple(types)))
    }

    async fn create_selection(&self, source: ValueRef, selector: Selector) -> Result<ValueRef> {
        debug!(%selector, "EagerExecutor::create_selection: called");
        let source = downcast_value::<EagerValue>(source, "EagerExecutor")?;
        let fields = source.type_signature.fields().ok_or_else(|| {
            ExecutorError::TypeMismatch(format!("cannot select from non-tuple type {}", source.type_signature))
        })?;
        let index = selector.resolve(fields.iter().map(|(n, _)| n.as_deref()))?;
        let ty = fields[index].1.clone();
        let data = source.data()?.select(&Selector::Index(index))?;
        Ok(self.wrap(EagerRepr::Data(data), ty))
    }
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Evaluate an expression against the function's parameter
pub fn evaluate(expr: &Expr, param: Option<&Data>) -> Result<Data> {
    match expr {
        Expr::Param => param
            .cloned()
            .ok_or_else(|| ExecutorError::TypeMismatch("parameter referenced by a function without one".to_string())),
        Expr::Const(value) => Ok(value.clone()),
        Expr::Select(source, index) => evaluate(source, param)?.select(&Selector::Index(*index)),
        Expr::Tuple(elements) => Ok(Data::Tuple(
            elements
                .iter()
                .map(|(n, e)| Ok((n.clone(), evaluate(e, param)?)))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expr::Add(a, b) => binary(BinaryOp::Add, &evaluate(a, param)?, &evaluate(b, param)?),
        Expr::Sub(a, b) => binary(BinaryOp::Sub, &evaluate(a, param)?, &evaluate(b, param)?),
        Expr::Mul(a, b) => binary(BinaryOp::Mul, &evaluate(a, param)?, &evaluate(b, param)?),
        Expr::Div(a, b) => binary(BinaryOp::Div, &evaluate(a, param)?, &evaluate(b, param)?),
    }
}

/// Elementwise arithmetic over matching structures; a scalar right operand
/// is broadcast across a tuple.
fn binary(op: BinaryOp, lhs: &Data, rhs: &Data) -> Result<Data> {
    match (lhs, rhs) {
        (Data::Int32(a), Data::Int32(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div => a.checked_div(*b),
            };
            result
                .map(Data::Int32)
                .ok_or_else(|| ExecutorError::Computation(format!("int32 {:?} of {} and {} failed", op, a, b)))
        }
        (Data::Float32(a), Data::Float32(b)) => Ok(Data::Float32(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        })),
        (Data::Tuple(a), Data::Tuple(b)) => {
            if a.len() != b.len() {
                return Err(ExecutorError::ArityMismatch {
                    context: format!("{:?}", op),
                    expected: a.len(),
                    got: b.len(),
                });
            }
            Ok(Data::Tuple(
                a.iter()
                    .zip(b)
                    .map(|((n, x), (_, y))| Ok((n.clone(), binary(op, x, y)?)))
                    .collect::<Result<Vec<_>>>()?,
            ))
        }
        (Data::Tuple(a), scalar @ (Data::Int32(_) | Data::Float32(_))) => Ok(Data::Tuple(
            a.iter()
                .map(|(n, x)| Ok((n.clone(), binary(op, x, scalar)?)))
                .collect::<Result<Vec<_>>>()?,
        )),
        _ => Err(ExecutorError::TypeMismatch(format!(
            "unsupported operands for {:?}: {} and {}",
            op, lhs, rhs
        ))),
    }
}
