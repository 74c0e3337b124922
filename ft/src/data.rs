//! Materialized plain data

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::computation::Selector;
use crate::error::{ExecutorError, Result};
use crate::placement::Placement;
use crate::types::{DType, Type};

/// Fully resolved data, as produced by `compute` and accepted by `create_value`.
///
/// A non-all-equal CLIENTS value materializes as a `List` with one entry per
/// client, in client order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Data {
    Int32(i32),
    Float32(f32),
    Bool(bool),
    Tuple(Vec<(Option<String>, Data)>),
    List(Vec<Data>),
}

impl Data {
    /// Unnamed tuple
    pub fn tuple(elements: Vec<Data>) -> Self {
        Data::Tuple(elements.into_iter().map(|d| (None, d)).collect())
    }

    /// Tuple with every field named
    pub fn named(fields: Vec<(&str, Data)>) -> Self {
        Data::Tuple(fields.into_iter().map(|(n, d)| (Some(n.to_string()), d)).collect())
    }

    /// Type of this data when no explicit type is supplied
    pub fn infer_type(&self) -> Type {
        match self {
            Data::Int32(_) => Type::int32(),
            Data::Float32(_) => Type::float32(),
            Data::Bool(_) => Type::bool(),
            Data::Tuple(fields) => Type::Tuple(fields.iter().map(|(n, d)| (n.clone(), d.infer_type())).collect()),
            Data::List(items) => Type::sequence(items.first().map(Data::infer_type).unwrap_or(Type::Tuple(vec![]))),
        }
    }

    /// Whether this data is a valid materialization of `ty`
    pub fn conforms_to(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Data::Int32(_), Type::Tensor(DType::Int32)) => true,
            (Data::Float32(_), Type::Tensor(DType::Float32)) => true,
            (Data::Bool(_), Type::Tensor(DType::Bool)) => true,
            (Data::Tuple(values), Type::Tuple(types)) => {
                values.len() == types.len() && values.iter().zip(types).all(|((_, d), (_, t))| d.conforms_to(t))
            }
            (Data::List(items), Type::Sequence(element)) => items.iter().all(|d| d.conforms_to(element)),
            (
                _,
                Type::Federated {
                    member,
                    placement,
                    all_equal,
                },
            ) => match placement {
                Placement::Clients if !all_equal => match self {
                    Data::List(items) => items.iter().all(|d| d.conforms_to(member)),
                    _ => false,
                },
                Placement::Unplaced => false,
                _ => self.conforms_to(member),
            },
            _ => false,
        }
    }

    /// Additive identity for a numeric (possibly nested tuple) type
    pub fn zero(ty: &Type) -> Result<Data> {
        match ty {
            Type::Tensor(DType::Int32) => Ok(Data::Int32(0)),
            Type::Tensor(DType::Float32) => Ok(Data::Float32(0.0)),
            Type::Tuple(fields) => Ok(Data::Tuple(
                fields
                    .iter()
                    .map(|(n, t)| Ok((n.clone(), Data::zero(t)?)))
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Err(ExecutorError::TypeMismatch(format!("no additive zero for type {}", other))),
        }
    }

    /// Select a tuple element by position or name
    pub fn select(&self, selector: &Selector) -> Result<Data> {
        match self {
            Data::Tuple(fields) => {
                let index = selector.resolve(fields.iter().map(|(n, _)| n.as_deref()))?;
                Ok(fields[index].1.clone())
            }
            other => Err(ExecutorError::TypeMismatch(format!(
                "cannot select {} from non-tuple data {}",
                selector, other
            ))),
        }
    }

    /// Render as JSON; tuples whose fields are all named become objects
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Data::Int32(v) => Value::from(*v),
            Data::Float32(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Data::Bool(v) => Value::Bool(*v),
            Data::Tuple(fields) if !fields.is_empty() && fields.iter().all(|(n, _)| n.is_some()) => Value::Object(
                fields
                    .iter()
                    .map(|(n, d)| (n.clone().unwrap_or_default(), d.to_json()))
                    .collect(),
            ),
            Data::Tuple(fields) => Value::Array(fields.iter().map(|(_, d)| d.to_json()).collect()),
            Data::List(items) => Value::Array(items.iter().map(Data::to_json).collect()),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Data::Int32(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i32> for Data {
    fn from(v: i32) -> Self {
        Data::Int32(v)
    }
}

impl From<f32> for Data {
    fn from(v: f32) -> Self {
        Data::Float32(v)
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Bool(v)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Int32(v) => write!(f, "{}", v),
            Data::Float32(v) => write!(f, "{:?}", v),
            Data::Bool(v) => write!(f, "{}", v),
            Data::Tuple(fields) => {
                write!(f, "<")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match name {
                        Some(name) => write!(f, "{}={}", name, value)?,
                        None => write!(f, "{}", value)?,
                    }
                }
                write!(f, ">")
            }
            Data::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_type() {
        let data = Data::named(vec![("a", Data::tuple(vec![Data::Int32(10), Data::Float32(2.0)]))]);
        assert_eq!(data.infer_type().to_string(), "<a=<int32,float32>>");
        assert_eq!(Data::List(vec![Data::Int32(1)]).infer_type(), Type::sequence(Type::int32()));
    }

    #[test]
    fn test_conforms_to_federated() {
        let clients = Type::at_clients(Type::int32(), false);
        assert!(Data::List(vec![Data::Int32(1), Data::Int32(2)]).conforms_to(&clients));
        assert!(!Data::Int32(1).conforms_to(&clients));
        assert!(Data::Int32(1).conforms_to(&Type::at_clients(Type::int32(), true)));
        assert!(Data::Int32(1).conforms_to(&Type::at_server(Type::int32())));
        assert!(!Data::Float32(1.0).conforms_to(&Type::int32()));
    }

    #[test]
    fn test_zero() {
        let ty = Type::named(vec![("a", Type::tuple(vec![Type::int32(), Type::float32()]))]);
        assert_eq!(
            Data::zero(&ty).unwrap(),
            Data::named(vec![("a", Data::tuple(vec![Data::Int32(0), Data::Float32(0.0)]))])
        );
        assert!(Data::zero(&Type::bool()).is_err());
    }

    #[test]
    fn test_select() {
        let data = Data::named(vec![("a", Data::Int32(1)), ("b", Data::Int32(2))]);
        assert_eq!(data.select(&Selector::Name("b".to_string())).unwrap(), Data::Int32(2));
        assert_eq!(data.select(&Selector::Index(0)).unwrap(), Data::Int32(1));
        assert!(matches!(
            data.select(&Selector::Index(2)),
            Err(ExecutorError::IndexOutOfRange { len: 2, .. })
        ));
        assert!(matches!(
            Data::Int32(1).select(&Selector::Index(0)),
            Err(ExecutorError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_to_json() {
        let data = Data::named(vec![("A", Data::Int32(10)), ("B", Data::Float32(2.5))]);
        assert_eq!(data.to_json(), serde_json::json!({"A": 10, "B": 2.5}));
        let data = Data::List(vec![Data::tuple(vec![Data::Int32(1), Data::Bool(true)])]);
        assert_eq!(data.to_json(), serde_json::json!([[1, true]]));
    }

    #[test]
    fn test_display() {
        let data = Data::tuple(vec![Data::Int32(10), Data::Float32(2.0)]);
        assert_eq!(data.to_string(), "<10,2.0>");
    }
}
