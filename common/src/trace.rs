use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::Op;
use crate::engine::Records;

/// Un paso ejecutado: qué nodo corrió, con qué entrada y qué produjo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Posición en el orden de ejecución, desde 0.
    pub step: usize,
    pub node_id: String,
    pub op: Op,
    /// Función aplicada, ej: "scale(2)".
    pub function: String,
    pub input: Records,
    pub output: Records,
    pub input_len: usize,
    pub output_len: usize,
    /// true si `input` u `output` se recortaron a `snapshot_limit`.
    pub truncated: bool,
    /// Línea de log legible.
    pub message: String,
    pub elapsed_us: u64,
}

/// Trace completo de una corrida. Se arma con `Recorder` y después
/// sólo se lee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pipeline: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    entries: Vec<TraceEntry>,
}

impl ExecutionTrace {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, node_id: &str) -> Option<&TraceEntry> {
        self.entries.iter().find(|e| e.node_id == node_id)
    }

    /// Ids de nodo en el orden en que corrieron.
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.node_id.as_str()).collect()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }
}

/// Arma el trace paso a paso.
#[derive(Debug, Clone)]
pub struct Recorder {
    run_id: String,
    pipeline: Option<String>,
    started_at: DateTime<Utc>,
    snapshot_limit: usize,
    entries: Vec<TraceEntry>,
}

/// Datos de un paso antes de registrarlo.
pub struct StepRecord<'a> {
    pub node_id: &'a str,
    pub op: Op,
    pub function: String,
    pub input: &'a Records,
    pub output: &'a Records,
    pub elapsed_us: u64,
}

impl Recorder {
    pub fn new(pipeline: Option<&str>, snapshot_limit: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            pipeline: pipeline.map(str::to_string),
            started_at: Utc::now(),
            snapshot_limit,
            entries: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn record(&mut self, step: StepRecord<'_>) -> &TraceEntry {
        let (input, in_cut) = snapshot(step.input, self.snapshot_limit);
        let (output, out_cut) = snapshot(step.output, self.snapshot_limit);

        let message = format!(
            "→ {} [{} {}]: {} → {} registros",
            step.node_id,
            step.op,
            step.function,
            step.input.len(),
            step.output.len()
        );
        debug!(run_id = %self.run_id, step = self.entries.len(), "{}", message);

        self.entries.push(TraceEntry {
            step: self.entries.len(),
            node_id: step.node_id.to_string(),
            op: step.op,
            function: step.function,
            input,
            output,
            input_len: step.input.len(),
            output_len: step.output.len(),
            truncated: in_cut || out_cut,
            message,
            elapsed_us: step.elapsed_us,
        });

        &self.entries[self.entries.len() - 1]
    }

    /// Vuelve al paso 0 con un run_id nuevo.
    pub fn reset(&mut self) {
        self.run_id = uuid::Uuid::new_v4().to_string();
        self.started_at = Utc::now();
        self.entries.clear();
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// Copia de lo registrado hasta ahora.
    pub fn snapshot(&self) -> ExecutionTrace {
        self.clone().seal()
    }

    pub fn seal(self) -> ExecutionTrace {
        ExecutionTrace {
            run_id: self.run_id,
            pipeline: self.pipeline,
            started_at: self.started_at,
            finished_at: Utc::now(),
            entries: self.entries,
        }
    }
}

fn snapshot(records: &Records, limit: usize) -> (Records, bool) {
    if records.len() > limit {
        (records[..limit].to_vec(), true)
    } else {
        (records.clone(), false)
    }
}
