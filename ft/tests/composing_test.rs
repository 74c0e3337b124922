//! Integration tests for executor trees
//!
//! Most scenarios run on the reference 2 x 3 x 2 tree: two middle composing
//! nodes, three leaves each, two clients per leaf, 12 clients in total.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use fedtree::computation::{Computation, Expr, Intrinsic, Selector};
use fedtree::demo::{self, approx_eq};
use fedtree::error::ExecutorError;
use fedtree::{Data, ExecutorRef, Program, ReferenceResolver, Type};
use proptest::prelude::*;

use common::*;

async fn run(root: &ExecutorRef, comp: Computation) -> fedtree::Result<Data> {
    ReferenceResolver::new(root.clone()).invoke(&comp, None).await
}

// =============================================================================
// Intrinsic semantics on the reference tree
// =============================================================================

#[tokio::test]
async fn test_value_at_clients_computes_single_value() {
    let root = tree(&[2, 3, 2]);
    assert_eq!(run(&root, at_clients(10)).await.unwrap(), Data::Int32(10));
}

#[tokio::test]
async fn test_all_equal_value_skips_child_without_clients() {
    let root = composing(vec![tree(&[0]), tree(&[2, 1])]);
    let broadcast = Computation::federated(Intrinsic::FederatedBroadcast, vec![at_server(7)]);

    assert_eq!(run(&root, at_clients(10)).await.unwrap(), Data::Int32(10));
    assert_eq!(run(&root, broadcast).await.unwrap(), Data::Int32(7));
}

#[tokio::test]
async fn test_eval_at_clients_runs_once_per_client() {
    let probe = Probe::new();
    let leaves = (0..3)
        .map(|_| Arc::new(instrumented_leaf(4, &probe)) as ExecutorRef)
        .collect();
    let root = composing(leaves);

    let five = Computation::compiled(Expr::constant(5), Type::function(None, Type::int32()));
    let result = run(&root, Computation::federated(Intrinsic::FederatedEvalAtClients, vec![five]))
        .await
        .unwrap();

    assert_eq!(result, Data::List(vec![Data::Int32(5); 12]));
    // One independent backend call per client
    assert_eq!(probe.calls(), 12);
}

#[tokio::test]
async fn test_map_then_sum() {
    let root = tree(&[2, 3, 2]);
    let mapped = Computation::federated(Intrinsic::FederatedMap, vec![add_one(), at_clients(10)]);

    assert_eq!(run(&root, mapped.clone()).await.unwrap(), Data::List(vec![Data::Int32(11); 12]));
    assert_eq!(
        run(&root, Computation::federated(Intrinsic::FederatedSum, vec![mapped]))
            .await
            .unwrap(),
        Data::Int32(132)
    );
}

#[tokio::test]
async fn test_aggregate_applies_report_once() {
    let root = tree(&[2, 3, 2]);
    let plus_five = Computation::compiled(
        Expr::param().add(Expr::constant(5)),
        Type::function(Some(Type::int32()), Type::int32()),
    );
    let comp = Computation::federated(
        Intrinsic::FederatedAggregate,
        vec![at_clients(10), int(0), add_pair(), add_pair(), plus_five],
    );

    assert_eq!(run(&root, comp).await.unwrap(), Data::Int32(125));
}

#[tokio::test]
async fn test_aggregate_nested_named_tuple() {
    let root = tree(&[2, 3, 2]);
    let member = Type::named(vec![("a", Type::tuple(vec![Type::int32(), Type::float32()]))]);
    let pair = Type::tuple(vec![member.clone(), member.clone()]);
    let add = Computation::compiled(
        Expr::param().at(0).add(Expr::param().at(1)),
        Type::function(Some(pair), member.clone()),
    );
    let report = Computation::compiled(
        Expr::param().add(Expr::constant(Data::named(vec![(
            "a",
            Data::tuple(vec![Data::Int32(5), Data::Float32(3.0)]),
        )]))),
        Type::function(Some(member.clone()), member.clone()),
    );
    let value = Computation::literal(
        Data::named(vec![("a", Data::tuple(vec![Data::Int32(10), Data::Float32(2.0)]))]),
        member.clone(),
    );
    let zero = Computation::literal(
        Data::named(vec![("a", Data::tuple(vec![Data::Int32(0), Data::Float32(0.0)]))]),
        member,
    );
    let comp = Computation::federated(
        Intrinsic::FederatedAggregate,
        vec![
            Computation::federated(Intrinsic::FederatedValueAtClients, vec![value]),
            zero,
            add.clone(),
            add,
            report,
        ],
    );

    assert_eq!(
        run(&root, comp).await.unwrap(),
        Data::named(vec![("a", Data::tuple(vec![Data::Int32(125), Data::Float32(27.0)]))])
    );
}

#[tokio::test]
async fn test_mean_and_weighted_mean() {
    let root = tree(&[2, 3, 2]);
    let clients_float = Type::at_clients(Type::float32(), false);
    let values = Data::List((1..=12).map(|i| Data::Float32(i as f32)).collect());
    let weights = Data::List((0..12).map(|i| Data::Float32((i % 3 + 1) as f32)).collect());

    let mean = Program::new(Computation::lambda(
        "x",
        clients_float.clone(),
        Computation::federated(Intrinsic::FederatedMean, vec![Computation::reference("x")]),
    ))
    .with_argument(values.clone(), clients_float.clone());
    assert_eq!(mean.run(root.clone()).await.unwrap(), Data::Float32(6.5));

    let weighted = Program::new(Computation::lambda(
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
        Data::tuple(vec![values, weights]),
        Type::tuple(vec![clients_float.clone(), clients_float]),
    );
    let result = weighted.run(root).await.unwrap();
    assert!(approx_eq(&result, &Data::Float32(164.0 / 24.0)), "got {}", result);
}

#[tokio::test]
async fn test_mean_rejects_integer_members() {
    let root = tree(&[2, 2]);
    let err = run(&root, Computation::federated(Intrinsic::FederatedMean, vec![at_clients(1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::TypeMismatch(_)));
}

#[tokio::test]
async fn test_broadcast_then_map() {
    let root = tree(&[2, 3, 2]);
    let comp = Computation::federated(
        Intrinsic::FederatedMap,
        vec![
            add_one(),
            Computation::federated(Intrinsic::FederatedBroadcast, vec![at_server(10)]),
        ],
    );
    assert_eq!(run(&root, comp).await.unwrap(), Data::List(vec![Data::Int32(11); 12]));
}

#[tokio::test]
async fn test_broadcast_is_all_equal() {
    let root = tree(&[2, 3, 2]);
    let resolver = ReferenceResolver::new(root.clone());
    let value = resolver
        .create_value(&Computation::federated(Intrinsic::FederatedBroadcast, vec![at_server(7)]))
        .await
        .unwrap();

    assert_eq!(value.type_signature().to_string(), "int32@CLIENTS");
    assert_eq!(resolver.compute(&value).await.unwrap(), Data::Int32(7));
}

#[tokio::test]
async fn test_map_and_apply_at_server() {
    let root = tree(&[2, 3, 2]);
    let mapped = Computation::federated(Intrinsic::FederatedMap, vec![add_one(), at_server(10)]);
    let applied = Computation::federated(Intrinsic::FederatedApply, vec![add_one(), at_server(10)]);

    assert_eq!(run(&root, mapped).await.unwrap(), Data::Int32(11));
    assert_eq!(run(&root, applied).await.unwrap(), Data::Int32(11));
}

#[tokio::test]
async fn test_zip_at_server() {
    let root = tree(&[2, 3, 2]);
    let unnamed = Computation::federated(
        Intrinsic::FederatedZipAtServer,
        vec![Computation::tuple(vec![at_server(10), at_server(20)])],
    );
    let named = Computation::federated(
        Intrinsic::FederatedZipAtServer,
        vec![Computation::named_tuple(vec![("A", at_server(10)), ("B", at_server(20))])],
    );

    assert_eq!(
        run(&root, unnamed).await.unwrap(),
        Data::tuple(vec![Data::Int32(10), Data::Int32(20)])
    );
    assert_eq!(
        run(&root, named).await.unwrap(),
        Data::named(vec![("A", Data::Int32(10)), ("B", Data::Int32(20))])
    );
}

#[tokio::test]
async fn test_zip_at_clients_transposes() {
    let root = tree(&[2, 3, 2]);
    let comp = Computation::federated(
        Intrinsic::FederatedZipAtClients,
        vec![Computation::tuple(vec![client_list(0..12), at_clients(20)])],
    );

    let expected = Data::List(
        (0..12)
            .map(|i| Data::tuple(vec![Data::Int32(i), Data::Int32(20)]))
            .collect(),
    );
    assert_eq!(run(&root, comp).await.unwrap(), expected);
}

#[tokio::test]
async fn test_collect_preserves_client_order() {
    let root = tree(&[2, 3, 2]);
    let comp = Computation::federated(Intrinsic::FederatedCollect, vec![client_list((0..12).rev())]);

    assert_eq!(
        run(&root, comp).await.unwrap(),
        Data::List((0..12).rev().map(Data::Int32).collect())
    );
}

#[tokio::test]
async fn test_curried_function_over_federated_values() {
    let root = tree(&[2, 3, 2]);
    let sum_pair = Computation::compiled(
        Expr::param().at(0).add(Expr::param().at(1)),
        Type::function(
            Some(Type::tuple(vec![Type::at_server(Type::int32()), Type::at_server(Type::int32())])),
            Type::int32(),
        ),
    );
    // Curry an intrinsic-level pipeline: zip the two server values, then add them
    let zip_then_add = Computation::lambda(
        "p",
        Type::tuple(vec![Type::at_server(Type::int32()), Type::at_server(Type::int32())]),
        Computation::federated(
            Intrinsic::FederatedApply,
            vec![add_pair(), Computation::reference("p")],
        ),
    );
    let curried = Computation::curried(
        zip_then_add,
        Type::at_server(Type::int32()),
        Type::at_server(Type::int32()),
    );
    let comp = Computation::call(Computation::call(curried, at_server(3)), at_server(4));

    assert_eq!(run(&root, comp).await.unwrap(), Data::Int32(7));
    // Compiled functions only take unplaced arguments
    let err = run(
        &root,
        Computation::call(sum_pair, Computation::tuple(vec![at_server(1), at_server(2)])),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExecutorError::TypeMismatch(_)));
}

// =============================================================================
// Implicit zipping and placement checks
// =============================================================================

#[tokio::test]
async fn test_implicit_zip_of_client_tuple() {
    let root = tree(&[2, 3, 2]);
    let comp = Computation::federated(
        Intrinsic::FederatedSum,
        vec![Computation::tuple(vec![at_clients(1), at_clients(2)])],
    );
    assert_eq!(
        run(&root, comp).await.unwrap(),
        Data::tuple(vec![Data::Int32(12), Data::Int32(24)])
    );
}

#[tokio::test]
async fn test_mixed_placement_tuple_is_type_mismatch() {
    let root = tree(&[2, 3, 2]);
    let comp = Computation::federated(
        Intrinsic::FederatedMap,
        vec![add_one(), Computation::tuple(vec![at_clients(1), at_server(2)])],
    );
    let err = run(&root, comp).await.unwrap_err();
    assert!(matches!(err, ExecutorError::TypeMismatch(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_wrong_placement_is_type_mismatch() {
    let root = tree(&[2, 3, 2]);
    let broadcast_clients = Computation::federated(Intrinsic::FederatedBroadcast, vec![at_clients(1)]);
    let sum_server = Computation::federated(Intrinsic::FederatedSum, vec![at_server(1)]);
    let sum_unplaced = Computation::federated(Intrinsic::FederatedSum, vec![int(1)]);

    for comp in [broadcast_clients, sum_server, sum_unplaced] {
        let err = run(&root, comp).await.unwrap_err();
        assert!(matches!(err, ExecutorError::TypeMismatch(_)), "got {:?}", err);
    }
}

#[tokio::test]
async fn test_intrinsic_arity_checked() {
    let root = tree(&[2, 2]);
    let comp = Computation::federated(
        Intrinsic::FederatedAggregate,
        vec![at_clients(1), int(0), add_pair()],
    );
    let err = run(&root, comp).await.unwrap_err();
    assert!(matches!(err, ExecutorError::ArityMismatch { expected: 5, got: 3, .. }));
}

#[tokio::test]
async fn test_client_list_length_checked() {
    let root = tree(&[2, 3, 2]);
    let err = run(&root, client_list(0..11)).await.unwrap_err();
    assert!(matches!(err, ExecutorError::CardinalityMismatch { expected: 12, got: 11 }));
}

// =============================================================================
// Failure, caching, concurrency and ordering
// =============================================================================

#[tokio::test]
async fn test_child_failure_reports_path() {
    let probe = Probe::new();
    let healthy = Arc::new(instrumented_leaf(2, &probe)) as ExecutorRef;
    let broken = Arc::new(instrumented_leaf_with(2, &probe, |i, backend| {
        if i == 1 { backend.failing() } else { backend }
    })) as ExecutorRef;
    let root = composing(vec![healthy, broken]);

    let err = run(
        &root,
        Computation::federated(Intrinsic::FederatedMap, vec![add_one(), at_clients(1)]),
    )
    .await
    .unwrap_err();

    assert!(err.is_computation_error());
    assert_eq!(err.child_path(), vec![1, 1]);
    assert!(matches!(err.root_cause(), ExecutorError::Computation(_)));
}

#[tokio::test]
async fn test_compute_is_cached() {
    let probe = Probe::new();
    let leaves = (0..2)
        .map(|_| Arc::new(instrumented_leaf(2, &probe)) as ExecutorRef)
        .collect();
    let root = composing(leaves);
    let resolver = ReferenceResolver::new(root.clone());

    let value = resolver
        .create_value(&Computation::federated(
            Intrinsic::FederatedMap,
            vec![add_one(), client_list(0..4)],
        ))
        .await
        .unwrap();
    let first = root.compute(&value).await.unwrap();
    let computes = probe.computes();
    let second = root.compute(&value).await.unwrap();

    assert_eq!(first, Data::List((1..5).map(Data::Int32).collect()));
    assert_eq!(first, second);
    assert!(computes >= 4);
    assert_eq!(probe.computes(), computes);

    root.dispose(value).await.unwrap();
}

#[tokio::test]
async fn test_clients_run_concurrently() {
    let probe = Probe::new();
    let delay = Duration::from_millis(100);
    let leaves = (0..4)
        .map(|_| Arc::new(instrumented_leaf_with(3, &probe, |_, b| b.with_call_delay(delay))) as ExecutorRef)
        .collect();
    let root = composing(leaves);

    let start = Instant::now();
    let result = run(
        &root,
        Computation::federated(Intrinsic::FederatedMap, vec![add_one(), at_clients(1)]),
    )
    .await
    .unwrap();

    assert_eq!(result, Data::List(vec![Data::Int32(2); 12]));
    // Sequential dispatch would take 12 x 100ms
    assert!(start.elapsed() < Duration::from_millis(600), "took {:?}", start.elapsed());
}

#[tokio::test]
async fn test_results_follow_client_order_not_completion_order() {
    let probe = Probe::new();
    // Earlier clients are slower, so completion order is reversed
    let leaves = (0..2)
        .map(|leaf| {
            Arc::new(instrumented_leaf_with(3, &probe, move |i, b| {
                b.with_call_delay(Duration::from_millis(60 - 20 * i as u64 - 10 * leaf as u64))
            })) as ExecutorRef
        })
        .collect();
    let root = composing(leaves);

    let result = run(
        &root,
        Computation::federated(Intrinsic::FederatedMap, vec![add_one(), client_list(0..6)]),
    )
    .await
    .unwrap();

    assert_eq!(result, Data::List((1..7).map(Data::Int32).collect()));
}

#[tokio::test]
async fn test_mixed_depth_tree() {
    let root = composing(vec![
        tree(&[3]),
        tree(&[2, 2]),
        composing(vec![tree(&[1]), tree(&[2, 1, 2])]),
    ]);
    let total = run(&root, Computation::federated(Intrinsic::FederatedSum, vec![at_clients(2)]))
        .await
        .unwrap();
    assert_eq!(total, Data::Int32(2 * (3 + 4 + 1 + 4)));
}

#[tokio::test]
async fn test_builtin_scenarios() {
    for fanout in [vec![2, 3, 2], vec![5], vec![1, 1, 1, 3]] {
        let spec = fedtree::TierSpec::uniform(&fanout).unwrap();
        let root = spec.build_root().unwrap();
        for scenario in demo::scenarios(spec.num_clients()) {
            let result = scenario.program.run(root.clone()).await.unwrap();
            assert!(
                approx_eq(&result, &scenario.expected),
                "{} on {:?}: got {}, expected {}",
                scenario.name,
                fanout,
                result,
                scenario.expected
            );
        }
    }
}

// =============================================================================
// Tree-shape independence
// =============================================================================

fn fanouts() -> impl Strategy<Value = Vec<usize>> {
    (prop::collection::vec(1usize..=3, 0..=2), 0usize..=3).prop_map(|(mut tiers, clients)| {
        tiers.push(clients);
        tiers
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sum_of_constant_scales_with_clients(fanout in fanouts(), c in -100i32..100) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let spec = fedtree::TierSpec::uniform(&fanout).unwrap();
        let n = spec.num_clients() as i32;

        let (sum, aggregate) = runtime.block_on(async {
            let root = spec.build_root().unwrap();
            let sum = run(&root, Computation::federated(Intrinsic::FederatedSum, vec![at_clients(c)]))
                .await
                .unwrap();
            let aggregate = run(
                &root,
                Computation::federated(
                    Intrinsic::FederatedAggregate,
                    vec![at_clients(c), int(0), add_pair(), add_pair(), identity(Type::int32())],
                ),
            )
            .await
            .unwrap();
            (sum, aggregate)
        });

        prop_assert_eq!(&sum, &Data::Int32(c * n));
        prop_assert_eq!(aggregate, sum);
    }
}
