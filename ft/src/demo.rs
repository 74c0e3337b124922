//! Built-in scenarios exercising every intrinsic family on a tree

use crate::computation::{Computation, Expr, Intrinsic, Selector};
use crate::data::Data;
use crate::program::Program;
use crate::types::Type;

/// A program and the result it must produce on a tree of `num_clients` clients
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub program: Program,
    pub expected: Data,
}

impl Scenario {
    fn new(name: &'static str, computation: Computation, expected: Data) -> Self {
        Self {
            name,
            program: Program::new(computation),
            expected,
        }
    }
}

fn add_one() -> Computation {
    Computation::compiled(
        Expr::param().add(Expr::constant(1)),
        Type::function(Some(Type::int32()), Type::int32()),
    )
}

fn add_pair() -> Computation {
    Computation::compiled(
        Expr::param().at(0).add(Expr::param().at(1)),
        Type::function(Some(Type::tuple(vec![Type::int32(), Type::int32()])), Type::int32()),
    )
}

fn int(value: i32) -> Computation {
    Computation::literal(value, Type::int32())
}

fn at_clients(value: i32) -> Computation {
    Computation::federated(Intrinsic::FederatedValueAtClients, vec![int(value)])
}

fn at_server(value: i32) -> Computation {
    Computation::federated(Intrinsic::FederatedValueAtServer, vec![int(value)])
}

/// Weights cycle through 1, 2, 3 across clients
fn weight(index: usize) -> f32 {
    (index % 3 + 1) as f32
}

pub fn scenarios(num_clients: usize) -> Vec<Scenario> {
    let n = i32::try_from(num_clients).unwrap_or(i32::MAX);
    let values: Vec<f32> = (1..=num_clients).map(|i| i as f32).collect();
    let weights: Vec<f32> = (0..num_clients).map(weight).collect();
    let floats = |xs: &[f32]| Data::List(xs.iter().copied().map(Data::Float32).collect());
    let clients_float = Type::at_clients(Type::float32(), false);

    let weighted = values.iter().zip(&weights).map(|(v, w)| v * w).sum::<f32>() / weights.iter().sum::<f32>();
    let mean = values.iter().sum::<f32>() / num_clients as f32;

    let swap = Computation::compiled(
        Expr::tuple(vec![Expr::param().at(1), Expr::param().at(0)]),
        Type::function(
            Some(Type::tuple(vec![Type::int32(), Type::int32()])),
            Type::tuple(vec![Type::int32(), Type::int32()]),
        ),
    );
    let plus_five = Computation::compiled(
        Expr::param().add(Expr::constant(5)),
        Type::function(Some(Type::int32()), Type::int32()),
    );

    vec![
        Scenario::new(
            "value_at_clients -> map(+1) -> sum",
            Computation::federated(
                Intrinsic::FederatedSum,
                vec![Computation::federated(Intrinsic::FederatedMap, vec![add_one(), at_clients(10)])],
            ),
            Data::Int32(11 * n),
        ),
        Scenario::new(
            "aggregate(zero=0, add, add, +5)",
            Computation::federated(
                Intrinsic::FederatedAggregate,
                vec![at_clients(10), int(0), add_pair(), add_pair(), plus_five],
            ),
            Data::Int32(10 * n + 5),
        ),
        Scenario {
            name: "mean of 1..N",
            program: Program::new(Computation::lambda(
                "x",
                clients_float.clone(),
                Computation::federated(Intrinsic::FederatedMean, vec![Computation::reference("x")]),
            ))
            .with_argument(floats(&values), clients_float.clone()),
            expected: Data::Float32(mean),
        },
        Scenario {
            name: "weighted mean of 1..N, weights 1,2,3,...",
            program: Program::new(Computation::lambda(
                "x",
                Type::tuple(vec![clients_float.clone(), clients_float.clone()]),
                Computation::federated(
                    Intrinsic::FederatedWeightedMean,
                    vec![
                        Computation::select(Computation::reference("x"), Selector::Index(0)),
                        Computation::select(Computation::reference("x"), Selector::Index(1)),
                    ],
                ),
            ))
            .with_argument(
                Data::tuple(vec![floats(&values), floats(&weights)]),
                Type::tuple(vec![clients_float.clone(), clients_float]),
            ),
            expected: Data::Float32(weighted),
        },
        Scenario::new(
            "value_at_server -> broadcast -> map(+1)",
            Computation::federated(
                Intrinsic::FederatedMap,
                vec![
                    add_one(),
                    Computation::federated(Intrinsic::FederatedBroadcast, vec![at_server(10)]),
                ],
            ),
            Data::List(vec![Data::Int32(11); num_clients]),
        ),
        Scenario::new(
            "zip_at_server <A=10,B=20>",
            Computation::federated(
                Intrinsic::FederatedZipAtServer,
                vec![Computation::named_tuple(vec![("A", at_server(10)), ("B", at_server(20))])],
            ),
            Data::named(vec![("A", Data::Int32(10)), ("B", Data::Int32(20))]),
        ),
        Scenario::new(
            "implicit zip -> map(swap)",
            Computation::federated(
                Intrinsic::FederatedMap,
                vec![swap, Computation::tuple(vec![at_clients(1), at_clients(2)])],
            ),
            Data::List(vec![Data::tuple(vec![Data::Int32(2), Data::Int32(1)]); num_clients]),
        ),
        Scenario::new(
            "eval_at_clients -> collect",
            Computation::federated(
                Intrinsic::FederatedCollect,
                vec![Computation::federated(
                    Intrinsic::FederatedEvalAtClients,
                    vec![Computation::compiled(
                        Expr::constant(5),
                        Type::function(None, Type::int32()),
                    )],
                )],
            ),
            Data::List(vec![Data::Int32(5); num_clients]),
        ),
    ]
}

/// Structural equality with a relative tolerance on float32 leaves
pub fn approx_eq(a: &Data, b: &Data) -> bool {
    match (a, b) {
        (Data::Float32(x), Data::Float32(y)) => {
            (x.is_nan() && y.is_nan()) || (x - y).abs() <= 1e-4 * x.abs().max(y.abs()).max(1.0)
        }
        (Data::Tuple(xs), Data::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|((nx, x), (ny, y))| nx == ny && approx_eq(x, y))
        }
        (Data::List(xs), Data::List(ys)) => xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| approx_eq(x, y)),
        _ => a == b,
    }
}
