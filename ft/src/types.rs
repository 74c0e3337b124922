//! Type signatures for values and computations

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::computation::Intrinsic;
use crate::placement::Placement;

/// Element type of a tensor value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Int32,
    Float32,
    Bool,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Int32 => write!(f, "int32"),
            DType::Float32 => write!(f, "float32"),
            DType::Bool => write!(f, "bool"),
        }
    }
}

/// Type signature of a value, federated or unplaced.
///
/// Tuple field names are optional metadata: field order is what identifies
/// an element, so assignability ignores names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Tensor(DType),
    Tuple(Vec<(Option<String>, Type)>),
    Sequence(Box<Type>),
    Function {
        #[serde(default)]
        parameter: Option<Box<Type>>,
        result: Box<Type>,
    },
    Federated {
        member: Box<Type>,
        placement: Placement,
        #[serde(default)]
        all_equal: bool,
    },
    /// Polymorphic federated operator; its concrete signature is fixed by
    /// the argument it is called with.
    Intrinsic(Intrinsic),
}

impl Type {
    pub fn int32() -> Self {
        Type::Tensor(DType::Int32)
    }

    pub fn float32() -> Self {
        Type::Tensor(DType::Float32)
    }

    pub fn bool() -> Self {
        Type::Tensor(DType::Bool)
    }

    /// Unnamed tuple
    pub fn tuple(elements: Vec<Type>) -> Self {
        Type::Tuple(elements.into_iter().map(|t| (None, t)).collect())
    }

    /// Tuple with every field named
    pub fn named(fields: Vec<(&str, Type)>) -> Self {
        Type::Tuple(fields.into_iter().map(|(n, t)| (Some(n.to_string()), t)).collect())
    }

    pub fn sequence(element: Type) -> Self {
        Type::Sequence(Box::new(element))
    }

    pub fn function(parameter: Option<Type>, result: Type) -> Self {
        Type::Function {
            parameter: parameter.map(Box::new),
            result: Box::new(result),
        }
    }

    pub fn at_server(member: Type) -> Self {
        Type::Federated {
            member: Box::new(member),
            placement: Placement::Server,
            all_equal: true,
        }
    }

    pub fn at_clients(member: Type, all_equal: bool) -> Self {
        Type::Federated {
            member: Box::new(member),
            placement: Placement::Clients,
            all_equal,
        }
    }

    /// Placement of a federated type; `Unplaced` for everything else
    pub fn placement(&self) -> Placement {
        match self {
            Type::Federated { placement, .. } => *placement,
            _ => Placement::Unplaced,
        }
    }

    /// Member type of a federated type
    pub fn member(&self) -> Option<&Type> {
        match self {
            Type::Federated { member, .. } => Some(member),
            _ => None,
        }
    }

    pub fn is_all_equal(&self) -> bool {
        matches!(self, Type::Federated { all_equal: true, .. })
    }

    pub fn is_federated(&self) -> bool {
        matches!(self, Type::Federated { .. })
    }

    /// Tuple fields, if this is a tuple type
    pub fn fields(&self) -> Option<&[(Option<String>, Type)]> {
        match self {
            Type::Tuple(fields) => Some(fields),
            _ => None,
        }
    }

    /// Whether a federated type occurs anywhere inside this type
    pub fn contains_federated(&self) -> bool {
        match self {
            Type::Federated { .. } => true,
            Type::Tuple(fields) => fields.iter().any(|(_, t)| t.contains_federated()),
            _ => false,
        }
    }

    /// Whether every tensor leaf of this (possibly nested) tuple is float32
    pub fn is_float_structure(&self) -> bool {
        match self {
            Type::Tensor(DType::Float32) => true,
            Type::Tuple(fields) => !fields.is_empty() && fields.iter().all(|(_, t)| t.is_float_structure()),
            _ => false,
        }
    }

    /// Parameter and result of a function type
    pub fn as_function(&self) -> Option<(Option<&Type>, &Type)> {
        match self {
            Type::Function { parameter, result } => Some((parameter.as_deref(), result)),
            _ => None,
        }
    }

    /// Whether a value of type `other` may be used where `self` is expected.
    ///
    /// Tuple names are ignored. An all-equal value is accepted where a
    /// non-all-equal one is expected, never the other way around.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Tensor(a), Type::Tensor(b)) => a == b,
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|((_, x), (_, y))| x.is_assignable_from(y))
            }
            (Type::Sequence(a), Type::Sequence(b)) => a.is_assignable_from(b),
            (
                Type::Function {
                    parameter: pa,
                    result: ra,
                },
                Type::Function {
                    parameter: pb,
                    result: rb,
                },
            ) => {
                let params_match = match (pa, pb) {
                    (None, None) => true,
                    (Some(a), Some(b)) => b.is_assignable_from(a),
                    _ => false,
                };
                params_match && ra.is_assignable_from(rb)
            }
            (
                Type::Federated {
                    member: ma,
                    placement: pa,
                    all_equal: ea,
                },
                Type::Federated {
                    member: mb,
                    placement: pb,
                    all_equal: eb,
                },
            ) => pa == pb && (*pa == Placement::Server || !ea || *eb) && ma.is_assignable_from(mb),
            (Type::Intrinsic(a), Type::Intrinsic(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(dtype) => write!(f, "{}", dtype),
            Type::Tuple(fields) => {
                write!(f, "<")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match name {
                        Some(name) => write!(f, "{}={}", name, ty)?,
                        None => write!(f, "{}", ty)?,
                    }
                }
                write!(f, ">")
            }
            Type::Sequence(element) => write!(f, "{}*", element),
            Type::Function { parameter, result } => match parameter {
                Some(parameter) => write!(f, "({} -> {})", parameter, result),
                None => write!(f, "( -> {})", result),
            },
            Type::Federated {
                member,
                placement,
                all_equal,
            } => {
                if *all_equal || *placement == Placement::Server {
                    write!(f, "{}@{}", member, placement)
                } else {
                    write!(f, "{{{}}}@{}", member, placement)
                }
            }
            Type::Intrinsic(intrinsic) => write!(f, "{}", intrinsic),
        }
    }
}
