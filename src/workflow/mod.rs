pub mod engine;
pub mod graph;
pub mod types;

pub use engine::{GraphExecutor, DEFAULT_MAX_STEPS};
pub use graph::{check_edge, PhaseMachine, UpdateOf};
pub use types::{PhaseState, PhaseTag, RunOutcome, RunReport};
