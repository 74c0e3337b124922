//! ReferenceResolver - evaluates the structural forms of a computation
//!
//! Lambdas, blocks and references are resolved here, at the root, into
//! closures over a lexical scope. Everything else (literals, compiled
//! functions, intrinsics, and calls to them) becomes a value of the target
//! executor, so the tree underneath only ever sees the forms it can place.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use crate::computation::Computation;
use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::executor::{ExecutorRef, ValueRef};
use crate::types::Type;

#[derive(Debug, Clone)]
enum Resolved {
    /// Value owned by the target executor
    Target(ValueRef),
    Closure {
        parameter: Option<(String, Option<Type>)>,
        body: Computation,
        scope: Scope,
    },
    Tuple(Vec<(Option<String>, Resolved)>),
}

#[derive(Debug)]
struct Binding {
    name: String,
    value: Resolved,
    parent: Scope,
}

/// Immutable linked list of name bindings; inner bindings shadow outer ones
#[derive(Debug, Clone, Default)]
struct Scope(Option<Arc<Binding>>);

impl Scope {
    fn bind(&self, name: String, value: Resolved) -> Scope {
        Scope(Some(Arc::new(Binding {
            name,
            value,
            parent: self.clone(),
        })))
    }

    fn lookup(&self, name: &str) -> Option<&Resolved> {
        let mut current = self.0.as_ref();
        while let Some(binding) = current {
            if binding.name == name {
                return Some(&binding.value);
            }
            current = binding.parent.0.as_ref();
        }
        None
    }
}

pub struct ReferenceResolver {
    target: ExecutorRef,
}

impl ReferenceResolver {
    pub fn new(target: ExecutorRef) -> Self {
        Self { target }
    }

    /// Resolve a closed computation to a value of the target executor
    pub async fn create_value(&self, comp: &Computation) -> Result<ValueRef> {
        debug!(kind = comp.kind(), "ReferenceResolver::create_value: called");
        let resolved = self.resolve(comp, &Scope::default()).await?;
        self.into_target(resolved).await
    }

    /// Call a target function value
    pub async fn create_call(&self, function: ValueRef, argument: Option<ValueRef>) -> Result<ValueRef> {
        self.target.create_call(function, argument).await
    }

    pub async fn compute(&self, value: &ValueRef) -> Result<Data> {
        self.target.compute(value).await
    }

    /// Evaluate a computation, calling it with `argument` when one is given
    pub async fn invoke(&self, comp: &Computation, argument: Option<(Data, Type)>) -> Result<Data> {
        debug!(kind = comp.kind(), has_argument = argument.is_some(), "ReferenceResolver::invoke: called");
        let resolved = self.resolve(comp, &Scope::default()).await?;
        let result = match argument {
            Some((data, ty)) => {
                let argument = self.target.create_value(data.into(), Some(ty)).await?;
                self.apply(resolved, Some(Resolved::Target(argument))).await?
            }
            None => resolved,
        };
        let value = self.into_target(result).await?;
        self.target.compute(&value).await
    }

    fn resolve<'a>(&'a self, comp: &'a Computation, scope: &'a Scope) -> BoxFuture<'a, Result<Resolved>> {
        Box::pin(async move {
            match comp {
                Computation::Literal { .. } | Computation::Compiled(_) | Computation::Intrinsic(_) => {
                    Ok(Resolved::Target(self.target.create_value(comp.clone().into(), None).await?))
                }
                Computation::Reference(name) => scope
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| ExecutorError::UnboundReference(name.clone())),
                Computation::Lambda {
                    parameter_name,
                    parameter_type,
                    result,
                } => Ok(Resolved::Closure {
                    parameter: parameter_name.clone().map(|name| (name, parameter_type.clone())),
                    body: (**result).clone(),
                    scope: scope.clone(),
                }),
                Computation::Block { locals, result } => {
                    let mut inner = scope.clone();
                    for (name, local) in locals {
                        let value = self.resolve(local, &inner).await?;
                        inner = inner.bind(name.clone(), value);
                    }
                    self.resolve(result, &inner).await
                }
                Computation::Tuple(elements) => {
                    let mut resolved = Vec::with_capacity(elements.len());
                    for (name, element) in elements {
                        resolved.push((name.clone(), self.resolve(element, scope).await?));
                    }
                    Ok(Resolved::Tuple(resolved))
                }
                Computation::Selection { source, selector } => match self.resolve(source, scope).await? {
                    Resolved::Tuple(mut elements) => {
                        let index = selector.resolve(elements.iter().map(|(n, _)| n.as_deref()))?;
                        Ok(elements.swap_remove(index).1)
                    }
                    Resolved::Target(value) => Ok(Resolved::Target(
                        self.target.create_selection(value, selector.clone()).await?,
                    )),
                    Resolved::Closure { .. } => Err(ExecutorError::TypeMismatch(format!(
                        "cannot select {} from a function",
                        selector
                    ))),
                },
                Computation::Call { function, argument } => {
                    let function = self.resolve(function, scope).await?;
                    let argument = match argument {
                        Some(argument) => Some(self.resolve(argument, scope).await?),
                        None => None,
                    };
                    self.apply(function, argument).await
                }
            }
        })
    }

    fn apply(&self, function: Resolved, argument: Option<Resolved>) -> BoxFuture<'_, Result<Resolved>> {
        Box::pin(async move {
            match function {
                Resolved::Closure { parameter, body, scope } => {
                    let scope = match (parameter, argument) {
                        (Some((name, expected)), Some(argument)) => {
                            if let (Some(expected), Resolved::Target(value)) = (&expected, &argument)
                                && !expected.is_assignable_from(value.type_signature())
                            {
                                return Err(ExecutorError::TypeMismatch(format!(
                                    "parameter {} expects {}, found {}",
                                    name,
                                    expected,
                                    value.type_signature()
                                )));
                            }
                            scope.bind(name, argument)
                        }
                        (None, None) => scope,
                        (parameter, argument) => {
                            return Err(ExecutorError::ArityMismatch {
                                context: "lambda".to_string(),
                                expected: usize::from(parameter.is_some()),
                                got: usize::from(argument.is_some()),
                            });
                        }
                    };
                    self.resolve(&body, &scope).await
                }
                Resolved::Target(function) => {
                    let argument = match argument {
                        Some(argument) => Some(self.into_target(argument).await?),
                        None => None,
                    };
                    Ok(Resolved::Target(self.target.create_call(function, argument).await?))
                }
                Resolved::Tuple(_) => Err(ExecutorError::TypeMismatch("a tuple is not callable".to_string())),
            }
        })
    }

    /// Materialize a resolved value as a target value; closures cannot cross
    fn into_target(&self, resolved: Resolved) -> BoxFuture<'_, Result<ValueRef>> {
        Box::pin(async move {
            match resolved {
                Resolved::Target(value) => Ok(value),
                Resolved::Tuple(elements) => {
                    let mut values = Vec::with_capacity(elements.len());
                    for (name, element) in elements {
                        values.push((name, self.into_target(element).await?));
                    }
                    self.target.create_tuple(values).await
                }
                Resolved::Closure { .. } => Err(ExecutorError::TypeMismatch(
                    "a lambda must be called before it can be passed to an executor".to_string(),
                )),
            }
        })
    }
}
