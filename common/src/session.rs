use serde::{Deserialize, Serialize};

use crate::dag::PipelineSpec;
use crate::engine::Records;
use crate::sim::{Inputs, Simulation};
use crate::trace::TraceEntry;

pub type SimId = String;

/* --------- Simulaciones paso a paso --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRequest {
    pub pipeline: PipelineSpec,
    #[serde(default)]
    pub inputs: Inputs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimInfo {
    pub id: SimId,
    pub name: Option<String>,
    pub order: Vec<String>,
    /// Pasos ya ejecutados.
    pub stage: usize,
    /// Nodo que corre en el próximo paso (el resaltado).
    pub current: Option<String>,
    pub finished: bool,
    pub log: Vec<String>,
    /// Salida del último nodo ejecutado.
    pub last_output: Option<Records>,
    pub last_error: Option<String>,
}

impl SimInfo {
    pub fn from_simulation(id: &str, sim: &Simulation) -> Self {
        let last_output = sim
            .entries()
            .last()
            .and_then(|e| sim.output(&e.node_id))
            .cloned();

        Self {
            id: id.to_string(),
            name: sim.dag().name().map(str::to_string),
            order: sim.order().to_vec(),
            stage: sim.stage(),
            current: sim.current_node().map(str::to_string),
            finished: sim.is_finished(),
            log: sim.log(),
            last_output,
            last_error: sim.last_error().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    /// `None` si la simulación ya había terminado.
    pub entry: Option<TraceEntry>,
    pub sim: SimInfo,
}
