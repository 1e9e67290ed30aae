//! Shutdown scenarios and the loop that evaluates them against one model.

use std::collections::BTreeSet;
use std::fmt;

use rayon::prelude::*;
use refinery_solver::Solver;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ModelError;
use crate::extract::{ResultRecord, extract, row_keys};
use crate::index::{Period, ShutdownKey, Stream};
use crate::instance::ModelInstance;
use crate::solve::{ExternalSolver, solve};
use crate::table::ComparisonTable;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioId {
    Number(u32),
    Name(String),
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioId::Number(n) => write!(f, "{}", n),
            ScenarioId::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for ScenarioId {
    fn from(n: u32) -> Self {
        ScenarioId::Number(n)
    }
}

impl From<&str> for ScenarioId {
    fn from(name: &str) -> Self {
        ScenarioId::Name(name.to_string())
    }
}

/// A named set of unit shutdowns. Each pair shuts `unit` down during `period`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    #[serde(default)]
    pub shutdowns: BTreeSet<ShutdownKey>,
}

impl Scenario {
    pub fn new<'p>(id: ScenarioId, shutdowns: impl IntoIterator<Item = (&'p str, Period)>) -> Self {
        Self {
            id,
            shutdowns: shutdowns
                .into_iter()
                .map(|(unit, period)| ShutdownKey::new(unit, period))
                .collect(),
        }
    }

    pub fn numbered<'p>(id: u32, shutdowns: impl IntoIterator<Item = (&'p str, Period)>) -> Self {
        Self::new(ScenarioId::Number(id), shutdowns)
    }

    pub fn named<'p>(id: &str, shutdowns: impl IntoIterator<Item = (&'p str, Period)>) -> Self {
        Self::new(ScenarioId::from(id), shutdowns)
    }

    /// Parse an ordered scenario list such as `[{"id": 1, "shutdowns": [["cc", 3]]}]`
    pub fn list_from_json(json: &str) -> Result<Vec<Scenario>, ModelError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Buffer-tank streams forced to zero flow for a whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankAblation {
    pub streams: BTreeSet<Stream>,
    /// Periods to pin; the whole horizon when absent
    #[serde(default)]
    pub periods: Option<Vec<Period>>,
}

impl TankAblation {
    pub fn new(streams: impl IntoIterator<Item = Stream>) -> Self {
        Self {
            streams: streams.into_iter().collect(),
            periods: None,
        }
    }

    pub fn with_periods(mut self, periods: Vec<Period>) -> Self {
        self.periods = Some(periods);
        self
    }

    /// Fix every listed stream to zero. Nothing is fixed unless all streams and periods are valid.
    pub fn apply(&self, instance: &mut ModelInstance) -> Result<(), ModelError> {
        if let Some(stream) = self.streams.iter().find(|s| !instance.is_tank_stream(s)) {
            return Err(ModelError::UnknownStream {
                table: "tank ablation".to_string(),
                stream: stream.clone(),
            });
        }
        let periods: Vec<Period> = match &self.periods {
            Some(periods) => periods.clone(),
            None => instance.horizon().periods().collect(),
        };

        let mut staged = instance.clone();
        for stream in &self.streams {
            for &period in &periods {
                staged.fix_flow(stream, period, 0.0)?;
            }
        }
        *instance = staged;
        Ok(())
    }
}

/// Sets a scenario's shutdown flags and clears exactly those flags when dropped,
/// including on unwind out of a panicking solver
pub struct ShutdownGuard<'a> {
    instance: &'a mut ModelInstance,
    engaged: Vec<ShutdownKey>,
}

impl<'a> ShutdownGuard<'a> {
    pub fn engage(instance: &'a mut ModelInstance, shutdowns: &BTreeSet<ShutdownKey>) -> Result<Self, ModelError> {
        let mut guard = Self {
            instance,
            engaged: Vec::with_capacity(shutdowns.len()),
        };
        for key in shutdowns {
            guard.instance.set_shutdown(key, true)?;
            guard.engaged.push(key.clone());
        }
        Ok(guard)
    }

    pub fn instance(&self) -> &ModelInstance {
        self.instance
    }
}

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        for key in &self.engaged {
            self.instance.release_shutdown(key);
        }
    }
}

/// Runs shutdown scenarios against a built model and collects one result column per scenario
pub struct ScenarioController<S = Solver> {
    solver: S,
}

impl Default for ScenarioController<Solver> {
    fn default() -> Self {
        Self::new(Solver::default())
    }
}

impl<S: ExternalSolver> ScenarioController<S> {
    pub fn new(solver: S) -> Self {
        Self { solver }
    }

    /// Check every scenario against the model before anything is solved
    pub fn validate(&self, instance: &ModelInstance, scenarios: &[Scenario]) -> Result<(), ModelError> {
        let mut seen = BTreeSet::new();
        for scenario in scenarios {
            if !seen.insert(&scenario.id) {
                return Err(ModelError::DuplicateScenario(scenario.id.clone()));
            }
            for key in &scenario.shutdowns {
                instance.check_shutdown_key(key)?;
            }
        }
        Ok(())
    }

    /// Solve one scenario. Its shutdown flags are set only for the duration of the call.
    pub fn evaluate(&self, instance: &mut ModelInstance, scenario: &Scenario) -> Result<ResultRecord, ModelError> {
        let guard = ShutdownGuard::engage(instance, &scenario.shutdowns)?;
        let outcome = solve(guard.instance(), &self.solver);

        if outcome.is_optimal() {
            info!(
                scenario = %scenario.id,
                objective = outcome.objective.unwrap_or(0.0),
                "scenario solved"
            );
        } else {
            warn!(
                scenario = %scenario.id,
                termination = %outcome.termination,
                "scenario did not solve to optimality"
            );
        }
        Ok(extract(guard.instance(), &outcome))
    }

    /// Evaluate `scenarios` in order on the shared instance. A scenario that
    /// fails to solve still gets its column; configuration errors abort
    /// before the first solve.
    pub fn run(&self, instance: &mut ModelInstance, scenarios: &[Scenario]) -> Result<ComparisonTable, ModelError> {
        self.validate(instance, scenarios)?;
        let mut table = ComparisonTable::new(row_keys(instance));
        for scenario in scenarios {
            let record = self.evaluate(instance, scenario)?;
            table.push_column(scenario.id.clone(), record)?;
        }
        Ok(table)
    }

    /// Like [`run`](Self::run), with `ablation` applied once up front. The
    /// ablation stays on the instance after the run.
    pub fn run_with_ablation(
        &self,
        instance: &mut ModelInstance,
        ablation: &TankAblation,
        scenarios: &[Scenario],
    ) -> Result<ComparisonTable, ModelError> {
        self.validate(instance, scenarios)?;
        ablation.apply(instance)?;
        info!(streams = ablation.streams.len(), "tank ablation applied");
        self.run(instance, scenarios)
    }
}

impl<S: ExternalSolver + Sync> ScenarioController<S> {
    /// Evaluate every scenario on its own clone of `instance`, in parallel.
    /// Columns come back in caller order.
    pub fn run_parallel(&self, instance: &ModelInstance, scenarios: &[Scenario]) -> Result<ComparisonTable, ModelError> {
        self.validate(instance, scenarios)?;
        let records: Vec<Result<ResultRecord, ModelError>> = scenarios
            .par_iter()
            .map(|scenario| {
                let mut local = instance.clone();
                self.evaluate(&mut local, scenario)
            })
            .collect();

        let mut table = ComparisonTable::new(row_keys(instance));
        for (scenario, record) in scenarios.iter().zip(records) {
            table.push_column(scenario.id.clone(), record?)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use refinery_solver::{LpProblem, Solution};

    use super::*;
    use crate::builder::ModelBuilder;
    use crate::refinery;

    struct PanickingSolver;

    impl ExternalSolver for PanickingSolver {
        fn solve(&self, _problem: &LpProblem) -> Solution {
            panic!("solver crashed");
        }
    }

    fn instance() -> ModelInstance {
        ModelBuilder::new(&refinery::base_network(), refinery::reference_horizon())
            .build()
            .unwrap()
    }

    #[test]
    fn test_scenario_ids_from_json() {
        let scenarios = Scenario::list_from_json(
            r#"[{"id": 1, "shutdowns": [["cc", 3]]}, {"id": "rf-late", "shutdowns": [["rf", 4], ["rf", 3]]}, {"id": 2}]"#,
        )
        .unwrap();
        assert_eq!(scenarios[0].id, ScenarioId::Number(1));
        assert_eq!(scenarios[1].id, ScenarioId::from("rf-late"));
        assert_eq!(scenarios[1].shutdowns.len(), 2);
        assert!(scenarios[2].shutdowns.is_empty());
        assert_eq!(scenarios[1].id.to_string(), "rf-late");
    }

    #[test]
    fn test_guard_resets_flags_on_drop() {
        let mut instance = instance();
        let scenario = Scenario::numbered(1, [("cc", 2), ("rf", 3)]);
        {
            let guard = ShutdownGuard::engage(&mut instance, &scenario.shutdowns).unwrap();
            assert_eq!(guard.instance().shutdown_flag(&ShutdownKey::new("cc", 2)), Some(true));
            assert_eq!(guard.instance().shutdown_flag(&ShutdownKey::new("cc", 3)), Some(false));
        }
        assert!(instance.is_running());
    }

    #[test]
    fn test_guard_resets_flags_on_partial_engage() {
        let mut instance = instance();
        let scenario = Scenario::numbered(1, [("cc", 2), ("zz", 1)]);
        assert!(matches!(
            ShutdownGuard::engage(&mut instance, &scenario.shutdowns),
            Err(ModelError::UnknownUnit(_))
        ));
        assert!(instance.is_running());
    }

    #[test]
    fn test_guard_resets_flags_when_solver_panics() {
        let mut instance = instance();
        let controller = ScenarioController::new(PanickingSolver);
        let scenario = Scenario::numbered(1, [("rf", 1)]);

        let result = catch_unwind(AssertUnwindSafe(|| controller.evaluate(&mut instance, &scenario)));
        assert!(result.is_err());
        assert!(instance.is_running());
    }

    #[test]
    fn test_validation_rejects_before_solving() {
        let mut instance = instance();
        let controller = ScenarioController::new(PanickingSolver);

        let scenarios = vec![Scenario::numbered(1, [("rf", 1)]), Scenario::numbered(2, [("cc", 9)])];
        assert!(matches!(
            controller.run(&mut instance, &scenarios),
            Err(ModelError::PeriodOutOfRange { period: 9, last: 4 })
        ));

        let scenarios = vec![Scenario::numbered(1, [("rf", 1)]), Scenario::numbered(1, [("cc", 1)])];
        assert!(matches!(
            controller.run(&mut instance, &scenarios),
            Err(ModelError::DuplicateScenario(ScenarioId::Number(1)))
        ));
    }

    #[test]
    fn test_ablation_is_all_or_nothing() {
        let mut instance = ModelBuilder::new(&refinery::buffered_network(), refinery::reference_horizon())
            .build()
            .unwrap();
        let inlet = Stream::new("srn", "srn_sp", "srn_tk");
        let ablation = TankAblation::new([inlet.clone()]).with_periods(vec![1, 5]);
        assert!(ablation.apply(&mut instance).is_err());
        assert_eq!(instance.fixed_flows().count(), 0);

        let ablation = TankAblation::new([inlet]);
        ablation.apply(&mut instance).unwrap();
        assert_eq!(instance.fixed_flows().count(), 4);
        assert!(instance.fixed_flows().all(|(_, value)| value == 0.0));
    }

    #[test]
    fn test_ablation_only_touches_tank_streams() {
        let mut instance = ModelBuilder::new(&refinery::buffered_network(), refinery::reference_horizon())
            .build()
            .unwrap();
        let bypass = Stream::new("srn", "srn_sp", "rf");
        let ablation = TankAblation::new([Stream::new("srn", "srn_sp", "srn_tk"), bypass.clone()]);
        match ablation.apply(&mut instance) {
            Err(ModelError::UnknownStream { table, stream }) => {
                assert_eq!(table, "tank ablation");
                assert_eq!(stream, bypass);
            }
            other => panic!("Expected UnknownStream, got {:?}", other),
        }
        assert_eq!(instance.fixed_flows().count(), 0);
        assert!(instance.is_tank_stream(&Stream::new("srn", "srn_tk", "rf")));
    }
}
