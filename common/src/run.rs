use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::PipelineSpec;
use crate::engine::Records;
use crate::metrics::{Metrics, NodeStat};
use crate::sim::Inputs;
use crate::trace::ExecutionTrace;

pub type RunId = String;

/* --------- Corridas completas --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Si falta, se usa el `name` del pipeline.
    #[serde(default)]
    pub name: Option<String>,

    pub pipeline: PipelineSpec,

    /// Colecciones iniciales por id de nodo fuente.
    #[serde(default)]
    pub inputs: Inputs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: RunId,
    pub name: String,
    pub status: RunStatus,

    /// Mensaje legible si la corrida falló.
    pub error: Option<String>,

    /// Orden topológico, vacío si el DAG no se pudo validar.
    pub order: Vec<String>,
    pub trace: Option<ExecutionTrace>,
    pub output: Records,
    pub metrics: Option<Metrics>,
    pub node_stats: Vec<NodeStat>,

    pub submitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: RunId,
    pub lines: Vec<String>,
}

/// Cuerpo de error de la API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
