use std::{collections::HashMap, time::Instant};

use tracing::{debug, warn};

use crate::config::{PathPolicy, SimConfig};
use crate::dag::{Dag, Node, Op};
use crate::engine::{
    normalize_records, op_filter, op_map, op_reduce_by_key, read_records_from_path, Records,
};
use crate::error::{PipelineError, Result};
use crate::evaluator::Evaluation;
use crate::functions::{Fields, Transform};
use crate::metrics::collect_metrics;
use crate::trace::{ExecutionTrace, Recorder, StepRecord, TraceEntry};

/// Colecciones iniciales por id de nodo.
pub type Inputs = HashMap<String, Records>;

/// Ejecución paso a paso de un DAG: cada `step()` corre exactamente
/// un nodo en orden topológico.
#[derive(Debug, Clone)]
pub struct Simulation {
    dag: Dag,
    inputs: Inputs,
    config: SimConfig,
    order: Vec<String>,
    cursor: usize,
    outputs: HashMap<String, Records>,
    recorder: Recorder,
    last_error: Option<String>,
}

impl Simulation {
    /// Falla con `CycleDetected` antes de ejecutar nada si el DAG tiene ciclos,
    /// o con `PathNotAllowed` si algún `path` no pasa la política de archivos.
    pub fn new(dag: Dag, inputs: Inputs, config: SimConfig) -> Result<Self> {
        let order = dag.topological_order()?;
        for node in dag.nodes() {
            if let Some(path) = &node.path {
                config.paths.resolve(&node.id, path)?;
            }
        }
        let recorder = Recorder::new(dag.name(), config.snapshot_limit);

        Ok(Self {
            dag,
            inputs,
            config,
            order,
            cursor: 0,
            outputs: HashMap::new(),
            recorder,
            last_error: None,
        })
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Cantidad de pasos ya ejecutados.
    pub fn stage(&self) -> usize {
        self.cursor
    }

    /// Nodo que corre en el próximo paso.
    pub fn current_node(&self) -> Option<&str> {
        self.order.get(self.cursor).map(String::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.order.len()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn output(&self, node_id: &str) -> Option<&Records> {
        self.outputs.get(node_id)
    }

    pub fn entries(&self) -> &[TraceEntry] {
        self.recorder.entries()
    }

    pub fn log(&self) -> Vec<String> {
        self.recorder.log_lines()
    }

    /// Trace parcial con los pasos corridos hasta ahora.
    pub fn trace(&self) -> ExecutionTrace {
        self.recorder.snapshot()
    }

    /// Corre el siguiente nodo. `Ok(None)` si ya no quedan.
    /// Si el nodo falla, la simulación queda parada en ese paso.
    pub fn step(&mut self) -> Result<Option<&TraceEntry>> {
        let Some(node_id) = self.order.get(self.cursor) else {
            return Ok(None);
        };
        let node = self
            .dag
            .node(node_id)
            .ok_or_else(|| PipelineError::UnknownNode(node_id.clone()))?;

        let started = Instant::now();
        let result = gather_input(node, &self.inputs, &self.outputs, &self.config.paths)
            .and_then(|input| {
                let output = execute_node(node, input.clone())?;
                if output.len() > self.config.max_records {
                    return Err(PipelineError::LimitExceeded {
                        node: node.id.clone(),
                        count: output.len(),
                        limit: self.config.max_records,
                    });
                }
                Ok((input, output))
            });

        let (input, output) = match result {
            Ok(pair) => pair,
            Err(e) => {
                warn!("paso {} ({}) falló: {}", self.cursor, node.id, e);
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.recorder.record(StepRecord {
            node_id: &node.id,
            op: node.op,
            function: node.transform.to_string(),
            input: &input,
            output: &output,
            elapsed_us: started.elapsed().as_micros() as u64,
        });

        self.outputs.insert(node.id.clone(), output);
        self.cursor += 1;
        self.last_error = None;

        Ok(self.recorder.entries().last())
    }

    /// Vuelve al paso 0, sin salidas ni log.
    pub fn reset(&mut self) {
        debug!("reset de la simulación (estaba en el paso {})", self.cursor);
        self.cursor = 0;
        self.outputs.clear();
        self.recorder.reset();
        self.last_error = None;
    }

    /// Corre los pasos que falten y devuelve el resultado completo.
    pub fn finish(mut self) -> Result<Evaluation> {
        while self.step()?.is_some() {}

        let terminal = self.dag.terminal_nodes();
        let mut final_output = Records::new();
        for id in &self.order {
            if terminal.contains(&id.as_str()) {
                if let Some(out) = self.outputs.get(id) {
                    final_output.extend(out.iter().cloned());
                }
            }
        }

        let metrics = collect_metrics(&final_output, &self.metrics_fields());
        let terminal: Vec<String> = terminal.into_iter().map(str::to_string).collect();

        Ok(Evaluation {
            trace: self.recorder.seal(),
            outputs: self.outputs,
            terminal,
            final_output,
            metrics,
        })
    }

    /// Campos de la última transformación del orden; source y sink
    /// sólo pasan datos.
    fn metrics_fields(&self) -> Fields {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.dag.node(id))
            .find(|n| !matches!(n.op, Op::Source | Op::Sink))
            .map(|n| n.fields.clone())
            .unwrap_or_default()
    }
}

/// Entrada de un nodo: la concatenación de las salidas de sus dependencias
/// en el orden de `deps`. Sin dependencias: la entrada inicial dada para
/// el nodo, o su `data`, o su `path`.
fn gather_input(
    node: &Node,
    inputs: &Inputs,
    outputs: &HashMap<String, Records>,
    paths: &PathPolicy,
) -> Result<Records> {
    if !node.deps.is_empty() {
        let mut input = Records::new();
        for dep in &node.deps {
            if let Some(out) = outputs.get(dep) {
                input.extend(out.iter().cloned());
            }
        }
        return Ok(input);
    }

    let raw = if let Some(given) = inputs.get(&node.id) {
        given.clone()
    } else if let Some(data) = &node.data {
        data.clone()
    } else if let Some(path) = &node.path {
        read_records_from_path(paths.resolve(&node.id, path)?)?
    } else if node.op == Op::Source {
        Records::new()
    } else {
        return Err(PipelineError::MissingInput(node.id.clone()));
    };

    Ok(normalize_records(raw, &node.fields))
}

fn execute_node(node: &Node, input: Records) -> Result<Records> {
    let fields = &node.fields;
    let out = match &node.transform {
        Transform::Source | Transform::Sink => Ok(input),
        Transform::Map(f) => op_map(input, |r| f.apply(r, fields)),
        Transform::Filter(p) => op_filter(input, |r| p.apply(r, fields)),
        Transform::ReduceByKey(c) => op_reduce_by_key(input, fields, *c),
    };
    out.map_err(|msg| PipelineError::transformation(&node.id, msg))
}
