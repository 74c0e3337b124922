//! Computation AST consumed by the executor tree
//!
//! Computations arrive already type-checked and reduced to a closed set of
//! forms: literals, compiled functions, intrinsic references, lambdas,
//! blocks, calls, tuples, selections and references. Only the intrinsics get
//! federated treatment; every other form is handled by structural recursion.
//!
//! Compiled functions carry an [`Expr`], a small serializable expression
//! language that stands in for the numeric engine. Executors never inspect
//! it; they pass it to whichever backend ends up running the call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::types::Type;

/// The closed set of federated operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intrinsic {
    FederatedValueAtServer,
    FederatedValueAtClients,
    FederatedEvalAtServer,
    FederatedEvalAtClients,
    FederatedApply,
    FederatedMap,
    FederatedBroadcast,
    FederatedZipAtServer,
    FederatedZipAtClients,
    FederatedAggregate,
    FederatedSum,
    FederatedMean,
    FederatedWeightedMean,
    FederatedCollect,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 14] = [
        Intrinsic::FederatedValueAtServer,
        Intrinsic::FederatedValueAtClients,
        Intrinsic::FederatedEvalAtServer,
        Intrinsic::FederatedEvalAtClients,
        Intrinsic::FederatedApply,
        Intrinsic::FederatedMap,
        Intrinsic::FederatedBroadcast,
        Intrinsic::FederatedZipAtServer,
        Intrinsic::FederatedZipAtClients,
        Intrinsic::FederatedAggregate,
        Intrinsic::FederatedSum,
        Intrinsic::FederatedMean,
        Intrinsic::FederatedWeightedMean,
        Intrinsic::FederatedCollect,
    ];

    pub fn uri(&self) -> &'static str {
        match self {
            Intrinsic::FederatedValueAtServer => "federated_value_at_server",
            Intrinsic::FederatedValueAtClients => "federated_value_at_clients",
            Intrinsic::FederatedEvalAtServer => "federated_eval_at_server",
            Intrinsic::FederatedEvalAtClients => "federated_eval_at_clients",
            Intrinsic::FederatedApply => "federated_apply",
            Intrinsic::FederatedMap => "federated_map",
            Intrinsic::FederatedBroadcast => "federated_broadcast",
            Intrinsic::FederatedZipAtServer => "federated_zip_at_server",
            Intrinsic::FederatedZipAtClients => "federated_zip_at_clients",
            Intrinsic::FederatedAggregate => "federated_aggregate",
            Intrinsic::FederatedSum => "federated_sum",
            Intrinsic::FederatedMean => "federated_mean",
            Intrinsic::FederatedWeightedMean => "federated_weighted_mean",
            Intrinsic::FederatedCollect => "federated_collect",
        }
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

impl FromStr for Intrinsic {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        Intrinsic::ALL
            .iter()
            .copied()
            .find(|i| i.uri() == s)
            .ok_or_else(|| ExecutorError::UnsupportedOperator(s.to_string()))
    }
}

/// Tuple element selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Index(usize),
    Name(String),
}

impl Selector {
    /// Resolve to a position given the field names of a tuple
    pub fn resolve<'a>(&self, names: impl Iterator<Item = Option<&'a str>>) -> Result<usize> {
        let names: Vec<Option<&str>> = names.collect();
        let found = match self {
            Selector::Index(index) => (*index < names.len()).then_some(*index),
            Selector::Name(name) => names.iter().position(|n| *n == Some(name.as_str())),
        };
        found.ok_or_else(|| ExecutorError::IndexOutOfRange {
            selector: self.clone(),
            len: names.len(),
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(index) => write!(f, "[{}]", index),
            Selector::Name(name) => write!(f, ".{}", name),
        }
    }
}

/// Body of a compiled function, evaluated against its single parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Param,
    Const(Data),
    Select(Box<Expr>, usize),
    Tuple(Vec<(Option<String>, Expr)>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn param() -> Self {
        Expr::Param
    }

    pub fn constant(value: impl Into<Data>) -> Self {
        Expr::Const(value.into())
    }

    /// Positional element of a tuple-valued expression
    pub fn at(self, index: usize) -> Self {
        Expr::Select(Box::new(self), index)
    }

    pub fn tuple(elements: Vec<Expr>) -> Self {
        Expr::Tuple(elements.into_iter().map(|e| (None, e)).collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, other: Expr) -> Self {
        Expr::Add(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, other: Expr) -> Self {
        Expr::Sub(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, other: Expr) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(self, other: Expr) -> Self {
        Expr::Div(Box::new(self), Box::new(other))
    }
}

/// A function the numeric engine can run, with its declared signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledComputation {
    pub expr: Expr,
    pub type_signature: Type,
}

impl CompiledComputation {
    pub fn new(expr: Expr, type_signature: Type) -> Self {
        Self { expr, type_signature }
    }

    /// `(T -> T)` returning its argument
    pub fn identity(ty: Type) -> Self {
        Self::new(Expr::Param, Type::function(Some(ty.clone()), ty))
    }

    /// `( -> T)` returning a constant
    pub fn constant(value: Data) -> Self {
        let ty = value.infer_type();
        Self::new(Expr::Const(value), Type::function(None, ty))
    }

    pub fn parameter_type(&self) -> Option<&Type> {
        self.type_signature.as_function().and_then(|(p, _)| p)
    }

    pub fn result_type(&self) -> Result<&Type> {
        self.type_signature
            .as_function()
            .map(|(_, r)| r)
            .ok_or_else(|| ExecutorError::TypeMismatch(format!("{} is not a function type", self.type_signature)))
    }
}

/// Computation AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Computation {
    Literal {
        value: Data,
        type_signature: Type,
    },
    Compiled(CompiledComputation),
    Intrinsic(Intrinsic),
    Lambda {
        #[serde(default)]
        parameter_name: Option<String>,
        #[serde(default)]
        parameter_type: Option<Type>,
        result: Box<Computation>,
    },
    Block {
        locals: Vec<(String, Computation)>,
        result: Box<Computation>,
    },
    Call {
        function: Box<Computation>,
        #[serde(default)]
        argument: Option<Box<Computation>>,
    },
    Tuple(Vec<(Option<String>, Computation)>),
    Selection {
        source: Box<Computation>,
        selector: Selector,
    },
    Reference(String),
}

impl Computation {
    pub fn literal(value: impl Into<Data>, type_signature: Type) -> Self {
        Computation::Literal {
            value: value.into(),
            type_signature,
        }
    }

    pub fn compiled(expr: Expr, type_signature: Type) -> Self {
        Computation::Compiled(CompiledComputation::new(expr, type_signature))
    }

    pub fn intrinsic(intrinsic: Intrinsic) -> Self {
        Computation::Intrinsic(intrinsic)
    }

    pub fn lambda(parameter_name: &str, parameter_type: Type, result: Computation) -> Self {
        Computation::Lambda {
            parameter_name: Some(parameter_name.to_string()),
            parameter_type: Some(parameter_type),
            result: Box::new(result),
        }
    }

    /// Lambda without a parameter
    pub fn thunk(result: Computation) -> Self {
        Computation::Lambda {
            parameter_name: None,
            parameter_type: None,
            result: Box::new(result),
        }
    }

    pub fn block(locals: Vec<(&str, Computation)>, result: Computation) -> Self {
        Computation::Block {
            locals: locals.into_iter().map(|(n, c)| (n.to_string(), c)).collect(),
            result: Box::new(result),
        }
    }

    pub fn call(function: Computation, argument: Computation) -> Self {
        Computation::Call {
            function: Box::new(function),
            argument: Some(Box::new(argument)),
        }
    }

    pub fn call0(function: Computation) -> Self {
        Computation::Call {
            function: Box::new(function),
            argument: None,
        }
    }

    pub fn tuple(elements: Vec<Computation>) -> Self {
        Computation::Tuple(elements.into_iter().map(|c| (None, c)).collect())
    }

    pub fn named_tuple(fields: Vec<(&str, Computation)>) -> Self {
        Computation::Tuple(fields.into_iter().map(|(n, c)| (Some(n.to_string()), c)).collect())
    }

    pub fn select(source: Computation, selector: Selector) -> Self {
        Computation::Selection {
            source: Box::new(source),
            selector,
        }
    }

    pub fn reference(name: &str) -> Self {
        Computation::Reference(name.to_string())
    }

    /// Call an intrinsic; several arguments are passed as one unnamed tuple
    pub fn federated(intrinsic: Intrinsic, mut arguments: Vec<Computation>) -> Self {
        let argument = if arguments.len() == 1 {
            arguments.remove(0)
        } else {
            Computation::tuple(arguments)
        };
        Computation::call(Computation::intrinsic(intrinsic), argument)
    }

    /// Curry a function over a pair into nested one-argument lambdas:
    /// `(<A,B> -> R)` becomes `(arg0 -> (arg1 -> function(<arg0,arg1>)))`
    pub fn curried(function: Computation, first: Type, second: Type) -> Self {
        Computation::lambda(
            "arg0",
            first,
            Computation::lambda(
                "arg1",
                second,
                Computation::call(
                    function,
                    Computation::tuple(vec![Computation::reference("arg0"), Computation::reference("arg1")]),
                ),
            ),
        )
    }

    /// Short name of the node kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Computation::Literal { .. } => "literal",
            Computation::Compiled(_) => "compiled",
            Computation::Intrinsic(_) => "intrinsic",
            Computation::Lambda { .. } => "lambda",
            Computation::Block { .. } => "block",
            Computation::Call { .. } => "call",
            Computation::Tuple(_) => "tuple",
            Computation::Selection { .. } => "selection",
            Computation::Reference(_) => "reference",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_uri_round_trip() {
        for intrinsic in Intrinsic::ALL {
            assert_eq!(intrinsic.uri().parse::<Intrinsic>().unwrap(), intrinsic);
        }
        assert!(matches!(
            "federated_secure_sum".parse::<Intrinsic>(),
            Err(ExecutorError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn test_selector_resolve() {
        let names = [Some("a"), None, Some("c")];
        assert_eq!(Selector::Name("c".to_string()).resolve(names.iter().copied()).unwrap(), 2);
        assert_eq!(Selector::Index(1).resolve(names.iter().copied()).unwrap(), 1);
        assert!(Selector::Index(3).resolve(names.iter().copied()).is_err());
        assert!(Selector::Name("b".to_string()).resolve(names.iter().copied()).is_err());
    }

    #[test]
    fn test_federated_builder_packs_arguments() {
        let comp = Computation::federated(
            Intrinsic::FederatedMap,
            vec![Computation::reference("f"), Computation::reference("x")],
        );
        match comp {
            Computation::Call {
                function,
                argument: Some(argument),
            } => {
                assert_eq!(*function, Computation::Intrinsic(Intrinsic::FederatedMap));
                assert!(matches!(*argument, Computation::Tuple(ref e) if e.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_curried_shape() {
        let add = Computation::compiled(
            Expr::param().at(0).add(Expr::param().at(1)),
            Type::function(Some(Type::tuple(vec![Type::int32(), Type::int32()])), Type::int32()),
        );
        let curried = Computation::curried(add, Type::int32(), Type::int32());
        match curried {
            Computation::Lambda {
                parameter_name, result, ..
            } => {
                assert_eq!(parameter_name.as_deref(), Some("arg0"));
                assert_eq!(result.kind(), "lambda");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compiled_identity_signature() {
        let identity = CompiledComputation::identity(Type::int32());
        assert_eq!(identity.type_signature.to_string(), "(int32 -> int32)");
        assert_eq!(identity.result_type().unwrap(), &Type::int32());
        assert_eq!(identity.parameter_type(), Some(&Type::int32()));
    }

    #[test]
    fn test_computation_yaml() {
        let yaml = r#"
call:
  function:
    intrinsic: federated_sum
  argument:
    call:
      function:
        intrinsic: federated_value_at_clients
      argument:
        literal:
          value:
            int32: 10
          type_signature:
            tensor: int32
"#;
        let comp: Computation = crate::yaml::from_str(yaml).unwrap();
        assert_eq!(comp.kind(), "call");
    }
}
