//! Intrinsic dispatch shared by every federated tier
//!
//! Each tier implements the primitive handlers of [`FederatedTier`];
//! [`dispatch`] parses the argument of an intrinsic call, applies implicit
//! zipping, and lowers `federated_sum`, `federated_mean` and
//! `federated_weighted_mean` to `federated_aggregate` with a fixed
//! [`Reduction`]. The lowering is therefore identical at every depth.

use std::sync::Arc;
use tracing::debug;

use crate::computation::{CompiledComputation, Expr, Intrinsic};
use crate::data::Data;
use crate::error::{ExecutorError, Result};
use crate::executor::ExecutorValue;
use crate::placement::Placement;
use crate::tier::FederatedTier;
use crate::types::{DType, Type};
use crate::value::{FederatedValue, Repr};

/// The zero/accumulate/merge/report decomposition of a reduction.
///
/// `accumulate` folds one member value into a partial:
/// `(<A, M> -> A)`; `merge` combines two partials: `(<A, A> -> A)` and must
/// be associative; `report` turns the final partial into the result:
/// `(A -> R)`. `A` is the type of `zero`.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub zero: Data,
    pub zero_type: Type,
    pub accumulate: CompiledComputation,
    pub merge: CompiledComputation,
    pub report: CompiledComputation,
}

impl Reduction {
    /// Plain addition of every member value
    pub fn sum(member: &Type) -> Result<Self> {
        let zero = Data::zero(member)?;
        let pair = Type::tuple(vec![member.clone(), member.clone()]);
        let add = CompiledComputation::new(
            Expr::param().at(0).add(Expr::param().at(1)),
            Type::function(Some(pair), member.clone()),
        );
        Ok(Self {
            zero,
            zero_type: member.clone(),
            accumulate: add.clone(),
            merge: add,
            report: CompiledComputation::identity(member.clone()),
        })
    }

    /// Running `<sum, count>` reported as `sum / count`
    pub fn mean(member: &Type) -> Result<Self> {
        if !member.is_float_structure() {
            return Err(ExecutorError::TypeMismatch(format!(
                "federated_mean requires float32 members, found {}",
                member
            )));
        }
        let accumulate = Expr::tuple(vec![
            Expr::param().at(0).at(0).add(Expr::param().at(1)),
            Expr::param().at(0).at(1).add(Expr::constant(1.0f32)),
        ]);
        Self::averaging(member, member, accumulate)
    }

    /// Running `<sum(v * w), sum(w)>` over zipped `<value, weight>` members
    pub fn weighted_mean(zipped: &Type) -> Result<Self> {
        let (value, weight) = match zipped.fields() {
            Some([(_, value), (_, weight)]) => (value, weight),
            _ => {
                return Err(ExecutorError::TypeMismatch(format!(
                    "federated_weighted_mean requires <value,weight> members, found {}",
                    zipped
                )));
            }
        };
        if !value.is_float_structure() || *weight != Type::Tensor(DType::Float32) {
            return Err(ExecutorError::TypeMismatch(format!(
                "federated_weighted_mean requires float32 values and weights, found {}",
                zipped
            )));
        }
        let accumulate = Expr::tuple(vec![
            Expr::param()
                .at(0)
                .at(0)
                .add(Expr::param().at(1).at(0).mul(Expr::param().at(1).at(1))),
            Expr::param().at(0).at(1).add(Expr::param().at(1).at(1)),
        ]);
        Self::averaging(value, zipped, accumulate)
    }

    fn averaging(value: &Type, input: &Type, accumulate: Expr) -> Result<Self> {
        let partial = Type::tuple(vec![value.clone(), Type::float32()]);
        let zero = Data::tuple(vec![Data::zero(value)?, Data::Float32(0.0)]);
        let merge = Expr::tuple(vec![
            Expr::param().at(0).at(0).add(Expr::param().at(1).at(0)),
            Expr::param().at(0).at(1).add(Expr::param().at(1).at(1)),
        ]);
        Ok(Self {
            zero,
            zero_type: partial.clone(),
            accumulate: CompiledComputation::new(
                accumulate,
                Type::function(Some(Type::tuple(vec![partial.clone(), input.clone()])), partial.clone()),
            ),
            merge: CompiledComputation::new(
                merge,
                Type::function(Some(Type::tuple(vec![partial.clone(), partial.clone()])), partial.clone()),
            ),
            report: CompiledComputation::new(
                Expr::param().at(0).div(Expr::param().at(1)),
                Type::function(Some(partial), value.clone()),
            ),
        })
    }

    /// Same reduction with `report` replaced by the identity on partials
    pub fn without_report(&self) -> Self {
        Self {
            report: CompiledComputation::identity(self.zero_type.clone()),
            ..self.clone()
        }
    }

    pub fn report_type(&self) -> Result<Type> {
        self.report.result_type().cloned()
    }
}

/// Run an intrinsic against a tier
pub async fn dispatch<T: FederatedTier + ?Sized>(
    tier: &T,
    intrinsic: Intrinsic,
    argument: Option<Arc<FederatedValue>>,
) -> Result<Arc<FederatedValue>> {
    debug!(tier = tier.tier_name(), %intrinsic, "dispatch: called");
    let context = intrinsic.uri();
    let arg = argument.ok_or_else(|| ExecutorError::ArityMismatch {
        context: context.to_string(),
        expected: 1,
        got: 0,
    })?;

    match intrinsic {
        Intrinsic::FederatedValueAtServer => {
            let (data, member) = unplaced_data(context, &arg).await?;
            tier.value_at_server(data, member).await
        }
        Intrinsic::FederatedValueAtClients => {
            let (data, member) = unplaced_data(context, &arg).await?;
            tier.value_at_clients(data, member).await
        }
        Intrinsic::FederatedEvalAtServer => tier.eval_at_server(thunk(context, &arg)?).await,
        Intrinsic::FederatedEvalAtClients => tier.eval_at_clients(thunk(context, &arg)?).await,
        Intrinsic::FederatedApply => {
            let [function, value] = pair(context, &arg)?;
            let value = ensure_federated(tier, value, Some(Placement::Server)).await?;
            tier.apply(function.compiled(context)?.clone(), value).await
        }
        Intrinsic::FederatedMap => {
            let [function, value] = pair(context, &arg)?;
            let function = function.compiled(context)?.clone();
            let value = ensure_federated(tier, value, None).await?;
            match value.type_signature().placement() {
                Placement::Server => tier.apply(function, value).await,
                _ => tier.map_clients(function, value).await,
            }
        }
        Intrinsic::FederatedBroadcast => {
            let value = ensure_federated(tier, arg, Some(Placement::Server)).await?;
            tier.broadcast(value).await
        }
        Intrinsic::FederatedZipAtServer => tier.zip_at_server(zippable(context, &arg, Placement::Server)?).await,
        Intrinsic::FederatedZipAtClients => tier.zip_at_clients(zippable(context, &arg, Placement::Clients)?).await,
        Intrinsic::FederatedAggregate => {
            let parts = arg.elements(context, 5)?;
            let value = ensure_federated(tier, parts[0].clone(), Some(Placement::Clients)).await?;
            let (zero, zero_type) = unplaced_data(context, &parts[1]).await?;
            let reduction = Reduction {
                zero,
                zero_type,
                accumulate: parts[2].compiled(context)?.clone(),
                merge: parts[3].compiled(context)?.clone(),
                report: parts[4].compiled(context)?.clone(),
            };
            tier.aggregate(value, reduction).await
        }
        Intrinsic::FederatedSum => {
            let value = ensure_federated(tier, arg, Some(Placement::Clients)).await?;
            let reduction = Reduction::sum(value.member_type()?)?;
            tier.aggregate(value, reduction).await
        }
        Intrinsic::FederatedMean => {
            let value = ensure_federated(tier, arg, Some(Placement::Clients)).await?;
            let reduction = Reduction::mean(value.member_type()?)?;
            tier.aggregate(value, reduction).await
        }
        Intrinsic::FederatedWeightedMean => {
            let [value, weight] = pair(context, &arg)?;
            let value = ensure_federated(tier, value, Some(Placement::Clients)).await?;
            let weight = ensure_federated(tier, weight, Some(Placement::Clients)).await?;
            let zipped = tier.zip_at_clients(vec![(None, value), (None, weight)]).await?;
            let reduction = Reduction::weighted_mean(zipped.member_type()?)?;
            tier.aggregate(zipped, reduction).await
        }
        Intrinsic::FederatedCollect => {
            let value = ensure_federated(tier, arg, Some(Placement::Clients)).await?;
            tier.collect(value).await
        }
    }
}

/// Accept a federated value, or a tuple of federated values that all share
/// one placement (zipped first). Anything else is a type mismatch.
pub async fn ensure_federated<T: FederatedTier + ?Sized>(
    tier: &T,
    value: Arc<FederatedValue>,
    placement: Option<Placement>,
) -> Result<Arc<FederatedValue>> {
    let found = match value.repr() {
        Repr::Structure(fields) if !fields.is_empty() => {
            let first = fields[0].1.type_signature().placement();
            let same = fields
                .iter()
                .all(|(_, v)| v.type_signature().is_federated() && v.type_signature().placement() == first);
            if !same {
                return Err(ExecutorError::TypeMismatch(format!(
                    "{} is neither federated nor a zippable tuple of federated values",
                    value.type_signature()
                )));
            }
            first
        }
        _ => value.type_signature().placement(),
    };

    if !found.is_federated() {
        return Err(ExecutorError::TypeMismatch(format!(
            "expected a federated value, found {}",
            value.type_signature()
        )));
    }
    if let Some(expected) = placement
        && expected != found
    {
        return Err(ExecutorError::TypeMismatch(format!(
            "expected a value at {}, found {}",
            expected,
            value.type_signature()
        )));
    }

    match value.repr() {
        Repr::Structure(fields) => {
            debug!(tier = tier.tier_name(), placement = %found, "ensure_federated: zipping tuple");
            let fields = fields.to_vec();
            match found {
                Placement::Server => tier.zip_at_server(fields).await,
                _ => tier.zip_at_clients(fields).await,
            }
        }
        _ => Ok(value),
    }
}

async fn unplaced_data(context: &str, value: &Arc<FederatedValue>) -> Result<(Data, Type)> {
    let ty = value.type_signature().clone();
    if ty.contains_federated() || matches!(ty, Type::Function { .. } | Type::Intrinsic(_)) {
        return Err(ExecutorError::TypeMismatch(format!(
            "{} expects an unplaced value, found {}",
            context, ty
        )));
    }
    Ok((value.compute().await?, ty))
}

fn thunk(context: &str, value: &Arc<FederatedValue>) -> Result<CompiledComputation> {
    let comp = value.compiled(context)?;
    if comp.parameter_type().is_some() {
        return Err(ExecutorError::ArityMismatch {
            context: context.to_string(),
            expected: 0,
            got: 1,
        });
    }
    Ok(comp.clone())
}

fn pair(context: &str, value: &Arc<FederatedValue>) -> Result<[Arc<FederatedValue>; 2]> {
    let mut elements = value.elements(context, 2)?;
    let second = elements.remove(1);
    let first = elements.remove(0);
    Ok([first, second])
}

fn zippable(
    context: &str,
    value: &Arc<FederatedValue>,
    placement: Placement,
) -> Result<Vec<(Option<String>, Arc<FederatedValue>)>> {
    let fields = value.fields(context)?;
    if let Some((_, bad)) = fields.iter().find(|(_, v)| v.type_signature().placement() != placement) {
        return Err(ExecutorError::TypeMismatch(format!(
            "{} expects every element at {}, found {}",
            context,
            placement,
            bad.type_signature()
        )));
    }
    Ok(fields.to_vec())
}
