pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod metrics;
pub mod run;
pub mod session;
pub mod sim;
pub mod trace;

pub use config::{PathPolicy, SimConfig};
pub use dag::{default_pipeline, Dag, Node, NodeSpec, Op, PipelineSpec};
pub use engine::{Record, Records};
pub use error::{PipelineError, Result};
pub use evaluator::{Evaluation, Evaluator};
pub use functions::Fields;
pub use metrics::{collect_metrics, node_stats, Metrics, NodeStat};
pub use run::{ErrorResponse, RunId, RunInfo, RunLog, RunRequest, RunStatus};
pub use session::{SimId, SimInfo, SimRequest, StepResponse};
pub use sim::{Inputs, Simulation};
pub use trace::{ExecutionTrace, Recorder, TraceEntry};
