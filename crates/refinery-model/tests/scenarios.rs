use std::collections::BTreeMap;

use refinery_model::refinery::{self, BUFFER_TANKS};
use refinery_model::{
    ComparisonTable, ExternalSolver, Horizon, LpProblem, ModelBuilder, ModelError, ModelInstance, NetworkDescriptor,
    QualityBound, RowKey, Scenario, ScenarioController, ScenarioId, Solution, SolutionStatus, Solver, Stream,
    TankAblation, VariableKey, extract, solve,
};
use rstest::rstest;

const TOLERANCE: f64 = 1e-6;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn st(material: &str, origin: &str, destination: &str) -> Stream {
    Stream::new(material, origin, destination)
}

fn build(network: &NetworkDescriptor, horizon: Horizon) -> ModelInstance {
    ModelBuilder::new(network, horizon).build().unwrap()
}

/// Variable values recorded in one column of the table
fn column_values(table: &ComparisonTable, scenario: &ScenarioId) -> BTreeMap<VariableKey, f64> {
    table
        .rows()
        .iter()
        .filter_map(|row| match row {
            RowKey::Variable(key) => Some((key.clone(), table.value(row, scenario)?)),
            _ => None,
        })
        .collect()
}

fn flow(values: &BTreeMap<VariableKey, f64>, stream: &Stream, period: u32) -> f64 {
    values[&VariableKey::flow(stream.clone(), period)]
}

fn assert_split_conservation(network: &NetworkDescriptor, horizon: &Horizon, values: &BTreeMap<VariableKey, f64>) {
    for group in network.split_groups().unwrap() {
        for t in horizon.periods() {
            let inbound: f64 = group.inbound.iter().map(|s| flow(values, s, t)).sum();
            let outbound: f64 = group.outbound.iter().map(|s| flow(values, s, t)).sum();
            assert!(
                close(inbound, outbound),
                "split {} period {}: in {} out {}",
                group.node,
                t,
                inbound,
                outbound
            );
        }
    }
}

fn assert_tank_invariants(network: &NetworkDescriptor, horizon: &Horizon, values: &BTreeMap<VariableKey, f64>) {
    for tank in &network.tanks {
        let mut previous = 0.0;
        for t in horizon.periods() {
            let inventory = values[&VariableKey::inventory(tank.name.clone(), t)];
            let inflow: f64 = tank.inbound.iter().map(|s| flow(values, s, t)).sum();
            let outflow: f64 = tank.outbound.iter().map(|s| flow(values, s, t)).sum();

            let expected = previous + horizon.period_length() * (inflow - outflow);
            assert!(close(inventory, expected), "{} period {}: {} != {}", tank.name, t, inventory, expected);
            assert!(inventory >= -TOLERANCE);

            let level = inventory * network.volume_conversion / tank.area();
            assert!(level <= tank.height * (1.0 + TOLERANCE), "{} overflows in period {}", tank.name, t);
            previous = inventory;
        }
    }
}

/// Returns the same status for every problem, without values
struct StubSolver(SolutionStatus);

impl ExternalSolver for StubSolver {
    fn solve(&self, _problem: &LpProblem) -> Solution {
        Solution::with_status(self.0)
    }
}

#[test]
fn test_single_period_with_fixed_crude() {
    let network = refinery::base_network();
    let mut instance = build(&network, Horizon::single());
    instance.fix_flow(&st("crude", "crude_source", "ad"), 1, 100_000.0).unwrap();

    let outcome = solve(&instance, &Solver::new());
    assert!(outcome.is_optimal(), "terminated with {}", outcome.termination);
    let values = &outcome.values;

    assert!(close(flow(values, &st("crude", "crude_source", "ad"), 1), 100_000.0));
    assert!(instance.violated_constraints(values, TOLERANCE).is_empty());

    for product in &network.products {
        let output = flow(values, &product.output, 1);
        let blended: f64 = product.components.iter().map(|s| flow(values, s, 1)).sum();
        assert!(close(output, blended), "{} blend: {} != {}", product.name, output, blended);
        assert!(output >= 10_000.0 * (1.0 - TOLERANCE));

        for spec in &product.specs {
            let quality: f64 = spec.coefficients.iter().map(|(s, c)| c * flow(values, s, 1)).sum();
            let slack = match spec.bound {
                QualityBound::Min => quality - spec.threshold * output,
                QualityBound::Max => spec.threshold * output - quality,
            };
            let scale = (spec.threshold * output).abs().max(1.0);
            assert!(slack >= -TOLERANCE * scale, "{} {} slack {}", product.name, spec.property, slack);
        }
    }

    // Objective is recomputable from the cost table and the recorded flows
    let record = extract(&instance, &outcome);
    let recomputed: f64 = network
        .costs
        .iter()
        .map(|(stream, cost)| {
            cost * record
                .value(&RowKey::Variable(VariableKey::flow(stream.clone(), 1)))
                .unwrap()
        })
        .sum();
    assert!(close(record.objective().unwrap(), recomputed));
    assert_split_conservation(&network, instance.horizon(), values);
}

#[test]
fn test_buffered_shutdown_study() {
    let network = refinery::buffered_network();
    let horizon = refinery::reference_horizon();
    let mut instance = build(&network, horizon);
    let scenarios = refinery::shutdown_scenarios();

    let table = ScenarioController::new(Solver::new()).run(&mut instance, &scenarios).unwrap();

    assert!(instance.is_running());
    assert_eq!(table.columns().len(), scenarios.len());

    // Tanks start empty, so a reformer outage in the first period leaves no
    // reformate to reach octane 93. The column is still recorded, all zeros.
    let starved = ScenarioId::Number(8);
    assert_eq!(table.text(&RowKey::Status, &starved), Some("failed"));
    assert_eq!(table.text(&RowKey::Termination, &starved), Some("infeasible"));
    assert_eq!(table.value(&RowKey::Objective, &starved), Some(0.0));
    assert!(column_values(&table, &starved).values().all(|v| *v == 0.0));

    for scenario in scenarios.iter().filter(|s| s.id != starved) {
        assert_eq!(table.text(&RowKey::Termination, &scenario.id), Some("optimal"));
        let values = column_values(&table, &scenario.id);
        assert_split_conservation(&network, &horizon, &values);
        assert_tank_invariants(&network, &horizon, &values);

        // The shut down unit processes nothing in its period
        for key in &scenario.shutdowns {
            assert_eq!(table.value(&RowKey::Shutdown(key.clone()), &scenario.id), Some(1.0));
            let unit = network.unit(&key.unit).unwrap();
            let throughput: f64 = unit
                .feeds
                .iter()
                .flat_map(|f| &f.streams)
                .map(|s| flow(&values, s, key.period))
                .sum();
            assert!(throughput.abs() <= TOLERANCE, "{} runs during {}", key.unit, key.period);
        }
    }
}

#[test]
fn test_ablation_persists_across_scenarios() {
    let network = refinery::buffered_network();
    let horizon = refinery::reference_horizon();
    let mut instance = build(&network, horizon);
    let ablation = refinery::tank_ablation(&["ccg_tk"]);
    let scenarios = refinery::shutdown_scenarios();

    let table = ScenarioController::new(Solver::new())
        .run_with_ablation(&mut instance, &ablation, &scenarios)
        .unwrap();

    assert_eq!(instance.fixed_flows().count(), 3 * 4);
    assert!(instance.is_running());
    for scenario in &scenarios {
        let values = column_values(&table, &scenario.id);
        for stream in &ablation.streams {
            for t in horizon.periods() {
                assert!(flow(&values, stream, t).abs() <= TOLERANCE);
            }
        }
        for tank in network.tanks.iter().filter(|t| t.name != "ccg_tk") {
            for t in horizon.periods() {
                assert!(values[&VariableKey::inventory(tank.name.clone(), t)].abs() <= TOLERANCE);
            }
        }
    }
}

#[test]
fn test_infeasible_scenario_keeps_its_column() {
    // With every buffer tank closed, losing the reformer in any period leaves
    // no gasoline component that reaches octane 93
    let network = refinery::buffered_network();
    let mut instance = build(&network, refinery::reference_horizon());
    let ablation = refinery::tank_ablation(&[]);
    assert_eq!(ablation.streams.len(), BUFFER_TANKS.len());

    let scenarios = vec![
        Scenario::numbered(1, [("cc", 3)]),
        Scenario::numbered(7, [("rf", 3), ("cc", 3)]),
        Scenario::named("cc-late", [("cc", 4)]),
    ];
    let table = ScenarioController::new(Solver::new())
        .run_with_ablation(&mut instance, &ablation, &scenarios)
        .unwrap();

    let failed = ScenarioId::Number(7);
    assert_eq!(table.columns().len(), 3);
    assert_eq!(table.text(&RowKey::Status, &failed), Some("failed"));
    assert_eq!(table.text(&RowKey::Termination, &failed), Some("infeasible"));
    assert_eq!(table.value(&RowKey::Objective, &failed), Some(0.0));
    assert!(column_values(&table, &failed).values().all(|v| *v == 0.0));

    // Scenarios on either side are unaffected
    assert_eq!(table.text(&RowKey::Termination, &ScenarioId::Number(1)), Some("optimal"));
    assert_eq!(table.text(&RowKey::Termination, &ScenarioId::from("cc-late")), Some("optimal"));
    assert!(instance.is_running());
}

#[test]
fn test_unreachable_demand_records_zeros() {
    let mut network = refinery::base_network();
    for product in &mut network.products {
        product.demand = Some(1e6);
    }
    let mut instance = build(&network, Horizon::single());
    let scenarios = vec![Scenario::numbered(1, [])];

    let table = ScenarioController::new(Solver::new()).run(&mut instance, &scenarios).unwrap();
    let id = ScenarioId::Number(1);
    assert_ne!(table.text(&RowKey::Termination, &id), Some("optimal"));
    assert_eq!(table.text(&RowKey::Status, &id), Some("failed"));
    assert_eq!(table.value(&RowKey::Objective, &id), Some(0.0));

    let values = column_values(&table, &id);
    assert_eq!(values.len(), instance.variables().len());
    assert!(values.values().all(|v| *v == 0.0));
}

#[test]
fn test_solver_failures_never_abort_the_run() {
    let mut instance = build(&refinery::base_network(), refinery::reference_horizon());
    let scenarios = refinery::shutdown_scenarios();
    let controller = ScenarioController::new(StubSolver(SolutionStatus::IterationLimit));

    let table = controller.run(&mut instance, &scenarios).unwrap();
    assert_eq!(table.columns().len(), 10);
    for scenario in &scenarios {
        assert_eq!(table.text(&RowKey::Termination, &scenario.id), Some("iteration_limit"));
        assert_eq!(table.value(&RowKey::Objective, &scenario.id), Some(0.0));
    }
    assert!(instance.is_running());
}

#[test]
fn test_extraction_is_deterministic() {
    let network = refinery::buffered_network();
    let instance = build(&network, refinery::reference_horizon());
    let outcome = solve(&instance, &Solver::new());

    let first = extract(&instance, &outcome);
    let second = extract(&instance, &outcome);
    assert_eq!(first, second);

    let rows: Vec<_> = first.rows().cloned().collect();
    let mut sorted = rows.clone();
    sorted.sort();
    assert_eq!(rows, sorted);
    assert_eq!(rows[..3], [RowKey::Status, RowKey::Termination, RowKey::Objective]);
}

#[test]
fn test_parallel_run_matches_sequential() {
    let network = refinery::base_network();
    let mut instance = build(&network, refinery::reference_horizon());
    let scenarios = refinery::shutdown_scenarios();
    let controller = ScenarioController::new(Solver::new());

    let parallel = controller.run_parallel(&instance, &scenarios).unwrap();
    let sequential = controller.run(&mut instance, &scenarios).unwrap();
    assert_eq!(parallel, sequential);
    assert_eq!(
        parallel.scenarios().cloned().collect::<Vec<_>>(),
        (1..=10).map(ScenarioId::Number).collect::<Vec<_>>()
    );
}

#[test]
fn test_configuration_errors_abort_before_solving() {
    let mut instance = build(&refinery::base_network(), refinery::reference_horizon());
    let controller = ScenarioController::new(StubSolver(SolutionStatus::Optimal));

    let unknown_unit = vec![Scenario::numbered(1, [("cc", 1)]), Scenario::numbered(2, [("hds", 1)])];
    assert!(matches!(
        controller.run(&mut instance, &unknown_unit),
        Err(ModelError::UnknownUnit(unit)) if unit == "hds"
    ));

    let bad_ablation = TankAblation::new([st("rfg", "rf", "rfg_tk")]);
    assert!(matches!(
        controller.run_with_ablation(&mut instance, &bad_ablation, &[]),
        Err(ModelError::UnknownStream { table, .. }) if table == "tank ablation"
    ));
    assert_eq!(instance.fixed_flows().count(), 0);
}

#[test]
fn test_topology_errors_name_the_table() {
    let mut network = refinery::base_network();
    network.costs.insert(st("lpg", "ad", "lpg_sp"), 5.0);
    let err = ModelBuilder::new(&network, Horizon::single()).build().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Stream lpg,ad,lpg_sp referenced by costs is not part of the network"
    );

    let mut network = refinery::buffered_network();
    network.tanks[1].inbound.clear();
    let err = ModelBuilder::new(&network, Horizon::single()).build().unwrap_err();
    assert!(matches!(err, ModelError::MissingTankMapping { tank, .. } if tank == "rfg_tk"));
}

#[test]
fn test_inconsistent_split_is_rejected() {
    let mut network = refinery::buffered_network();
    // The tank outlet no longer shares the bypass's outbound set
    network
        .split_points
        .insert(st("rfg", "rfg_tk", "rfg_sp"), [st("rfg", "rfg_sp", "pg_tk")].into());
    assert!(matches!(
        ModelBuilder::new(&network, Horizon::single()).build(),
        Err(ModelError::InconsistentSplit { node, material, .. }) if node == "rfg_sp" && material == "rfg"
    ));
}

#[test]
fn test_network_json_round_trip() {
    let network = refinery::buffered_network();
    let json = network.to_json().unwrap();
    let parsed = NetworkDescriptor::from_json(&json).unwrap();
    assert_eq!(parsed, network);

    let instance = build(&parsed, refinery::reference_horizon());
    assert_eq!(
        instance.variables().len(),
        build(&network, refinery::reference_horizon()).variables().len()
    );
}

#[rstest]
#[case("rf", refinery::buffered_network())]
#[case("cc", refinery::base_network())]
fn test_single_unit_shutdown(#[case] unit: &str, #[case] network: NetworkDescriptor) {
    let mut instance = build(&network, refinery::reference_horizon());
    let scenarios = vec![Scenario::named(unit, [(unit, 2)])];

    let table = ScenarioController::new(Solver::new()).run(&mut instance, &scenarios).unwrap();
    let id = ScenarioId::from(unit);
    assert_eq!(table.text(&RowKey::Termination, &id), Some("optimal"));

    let values = column_values(&table, &id);
    let throughput = |t: u32| -> f64 {
        network
            .unit(unit)
            .unwrap()
            .feeds
            .iter()
            .flat_map(|f| &f.streams)
            .map(|s| flow(&values, s, t))
            .sum()
    };
    assert!(throughput(2).abs() <= TOLERANCE);
    assert!(throughput(1) > 0.0);
    assert!(instance.is_running());
}

#[test]
fn test_reformer_outage_without_buffers_is_infeasible() {
    let mut instance = build(&refinery::base_network(), refinery::reference_horizon());
    let scenarios = vec![Scenario::named("rf", [("rf", 2)])];

    let table = ScenarioController::new(Solver::new()).run(&mut instance, &scenarios).unwrap();
    let id = ScenarioId::from("rf");
    assert_eq!(table.text(&RowKey::Termination, &id), Some("infeasible"));
    assert_eq!(table.value(&RowKey::Objective, &id), Some(0.0));
    assert!(instance.is_running());
}

#[rstest]
#[case(1.0)]
#[case(0.5)]
#[case(2.0)]
fn test_tank_recurrence_with_period_length(#[case] period_length: f64) {
    let network = refinery::buffered_network();
    let horizon = Horizon::new(3, period_length).unwrap();
    let mut instance = build(&network, horizon);
    let scenarios = vec![Scenario::numbered(1, [("rf", 2)])];

    let table = ScenarioController::new(Solver::new()).run(&mut instance, &scenarios).unwrap();
    let id = ScenarioId::Number(1);
    assert_eq!(table.text(&RowKey::Termination, &id), Some("optimal"));
    assert_tank_invariants(&network, &horizon, &column_values(&table, &id));
}
