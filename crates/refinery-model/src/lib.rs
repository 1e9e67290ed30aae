mod builder;
mod error;
mod expr;
mod extract;
mod index;
mod instance;
mod network;
pub mod refinery;
mod scenario;
mod solve;
mod table;

pub use builder::ModelBuilder;
pub use error::ModelError;
pub use expr::{ConstraintFamily, ConstraintId, LinearExpr, ModelConstraint, Rhs};
pub use extract::{Cell, ResultRecord, RowKey, extract, row_keys};
pub use index::{Horizon, Period, ShutdownKey, Stream, VariableKey};
pub use instance::ModelInstance;
pub use network::{
    BARRELS_TO_CUBIC_METRES, ConversionUnit, Feed, NetworkDescriptor, Product, QualityBound, QualitySpec, SplitGroup,
    Tank,
};
pub use scenario::{Scenario, ScenarioController, ScenarioId, ShutdownGuard, TankAblation};
pub use solve::{ExternalSolver, SolveOutcome, SolveStatus, TerminationCondition, solve};
pub use table::{Column, ComparisonTable};

pub use refinery_solver::{ConstraintOp, LpProblem, Solution, SolutionStatus, Solver};
