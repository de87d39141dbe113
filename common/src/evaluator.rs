use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::SimConfig;
use crate::dag::{Dag, PipelineSpec};
use crate::engine::Records;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::sim::{Inputs, Simulation};
use crate::trace::ExecutionTrace;

/// Resultado de correr un pipeline completo.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub trace: ExecutionTrace,
    /// Salida completa de cada nodo (el trace guarda sólo snapshots).
    pub outputs: HashMap<String, Records>,
    /// Nodos de los que no depende nadie.
    pub terminal: Vec<String>,
    /// Salidas de los nodos terminales concatenadas en orden de ejecución.
    pub final_output: Records,
    pub metrics: Metrics,
}

impl Evaluation {
    pub fn output(&self, node_id: &str) -> Option<&Records> {
        self.outputs.get(node_id)
    }
}

/// Corre un DAG de principio a fin, en un solo hilo.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: SimConfig,
}

impl Evaluator {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(SimConfig::from_env())
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn evaluate(&self, dag: &Dag, inputs: Inputs) -> Result<Evaluation> {
        info!(
            "evaluando pipeline {} ({} nodos)",
            dag.name().unwrap_or("<sin nombre>"),
            dag.len()
        );

        let result = Simulation::new(dag.clone(), inputs, self.config.clone())
            .and_then(Simulation::finish);

        match &result {
            Ok(eval) => info!(
                "pipeline terminado: run_id={} pasos={} registros_finales={}",
                eval.trace.run_id(),
                eval.trace.len(),
                eval.final_output.len()
            ),
            Err(e) => warn!("pipeline abortado: {}", e),
        }

        result
    }

    pub fn evaluate_spec(&self, spec: PipelineSpec, inputs: Inputs) -> Result<Evaluation> {
        let dag = Dag::from_spec(spec)?;
        self.evaluate(&dag, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{default_pipeline, NodeSpec, Op};
    use crate::error::PipelineError;
    use serde_json::{json, Value};
    use std::collections::HashSet;

    fn node(id: &str, op: &str, deps: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            op: op.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            ..NodeSpec::default()
        }
    }

    fn with_fn(mut n: NodeSpec, name: &str, arg: Option<Value>) -> NodeSpec {
        n.fn_name = Some(name.to_string());
        n.arg = arg;
        n
    }

    fn frutas() -> Records {
        vec![
            json!(["apple", 1]),
            json!(["banana", 3]),
            json!(["apple", 2]),
            json!(["carrot", 5]),
            json!(["banana", 1]),
        ]
    }

    #[test]
    fn pipeline_por_defecto_da_apple_4_carrot_2() {
        let eval = Evaluator::default()
            .evaluate_spec(default_pipeline(), Inputs::new())
            .unwrap();

        assert_eq!(
            eval.final_output,
            vec![
                json!({"key": "apple", "value": 4}),
                json!({"key": "carrot", "value": 2}),
            ]
        );
        assert_eq!(eval.terminal, vec!["output"]);
        assert_eq!(eval.metrics.unique_keys, 2);
        assert_eq!(eval.metrics.max_value, Some(json!(4)));
        assert_eq!(
            eval.trace.order(),
            vec!["read", "map1", "filter1", "reduce1", "output"]
        );
    }

    #[test]
    fn ciclo_falla_antes_de_ejecutar_cualquier_transformacion() {
        // "malo" fallaría al ejecutarse (valor no numérico), pero el ciclo
        // entre b y c tiene que detectarse primero.
        let mut src = node("src", "source", &[]);
        src.data = Some(vec![json!(["a", "x"])]);
        let spec = PipelineSpec {
            name: None,
            nodes: vec![
                src,
                node("malo", "map", &["src"]),
                node("b", "filter", &["malo", "c"]),
                node("c", "filter", &["b"]),
            ],
            edges: vec![],
        };

        let err = Evaluator::default()
            .evaluate_spec(spec, Inputs::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::CycleDetected { .. }));
    }

    #[test]
    fn varias_dependencias_se_concatenan_en_orden() {
        let mut a = node("a", "source", &[]);
        a.data = Some(vec![json!(["x", 1])]);
        let mut b = node("b", "source", &[]);
        b.data = Some(vec![json!(["y", 2]), json!(["x", 3])]);

        let spec = PipelineSpec {
            name: Some("union".into()),
            nodes: vec![
                a,
                b,
                with_fn(node("todo", "map", &["b", "a"]), "identity", None),
                node("suma", "reduceByKey", &["todo"]),
            ],
            edges: vec![],
        };

        let eval = Evaluator::default().evaluate_spec(spec, Inputs::new()).unwrap();
        assert_eq!(
            eval.output("todo").unwrap(),
            &vec![
                json!({"key": "y", "value": 2}),
                json!({"key": "x", "value": 3}),
                json!({"key": "x", "value": 1}),
            ]
        );
        assert_eq!(
            eval.final_output,
            vec![json!({"key": "x", "value": 4}), json!({"key": "y", "value": 2})]
        );
    }

    #[test]
    fn error_de_funcion_se_reporta_con_el_nodo() {
        let mut src = node("src", "source", &[]);
        src.data = Some(vec![json!({"key": "a", "value": "uno"})]);
        let spec = PipelineSpec {
            name: None,
            nodes: vec![src, node("r", "reduceByKey", &["src"])],
            edges: vec![],
        };

        let err = Evaluator::default()
            .evaluate_spec(spec, Inputs::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::TransformationError { ref node, .. } if node == "r"));
    }

    #[test]
    fn wordcount_con_campos_propios_desde_texto() {
        let mut read = node("read", "source", &[]);
        read.data = Some(vec![json!("Hola"), json!("mundo"), json!("hola")]);

        let mut pares = with_fn(node("pares", "map", &["read"]), "pair_one", None);
        pares.key = Some("token".into());
        pares.value = Some("count".into());
        let mut lower = with_fn(node("lower", "map", &["pares"]), "to_lower", None);
        lower.key = Some("token".into());
        let mut agg = with_fn(node("agg", "reduceByKey", &["lower"]), "sum", None);
        agg.key = Some("token".into());
        agg.value = Some("count".into());

        let spec = PipelineSpec {
            name: Some("wordcount".into()),
            nodes: vec![read, pares, lower, agg, node("out", "sink", &["agg"])],
            edges: vec![],
        };

        let eval = Evaluator::default().evaluate_spec(spec, Inputs::new()).unwrap();
        assert_eq!(
            eval.final_output,
            vec![
                json!({"token": "hola", "count": 2}),
                json!({"token": "mundo", "count": 1}),
            ]
        );
        // las métricas usan los campos de la última transformación (agg)
        assert_eq!(eval.metrics.unique_keys, 2);
        assert_eq!(eval.metrics.max_value, Some(json!(2)));
    }

    /// DAGs generados de forma determinista: cadenas con ramas y uniones.
    fn generated_specs() -> Vec<PipelineSpec> {
        let mut specs = Vec::new();
        for size in 2..9usize {
            for seed in 0..4usize {
                let mut nodes = Vec::new();
                let mut src = node("n0", "source", &[]);
                src.data = Some(frutas());
                nodes.push(src);

                for i in 1..size {
                    let mut deps: Vec<String> = (0..i)
                        .filter(|j| (i * 7 + j * 3 + seed) % 4 == 0)
                        .map(|j| format!("n{j}"))
                        .collect();
                    if deps.is_empty() {
                        deps.push(format!("n{}", i - 1));
                    }
                    let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
                    let id = format!("n{i}");

                    let n = match (i + seed) % 3 {
                        0 => with_fn(node(&id, "map", &dep_refs), "scale", Some(json!(3))),
                        1 => with_fn(node(&id, "filter", &dep_refs), "value_gt", Some(json!(2))),
                        _ => with_fn(node(&id, "reduceByKey", &dep_refs), "max", None),
                    };
                    nodes.push(n);
                }

                specs.push(PipelineSpec {
                    name: Some(format!("gen-{size}-{seed}")),
                    nodes,
                    edges: vec![],
                });
            }
        }
        specs
    }

    #[test]
    fn dags_aciclicos_terminan_con_una_entrada_por_nodo() {
        for spec in generated_specs() {
            let total = spec.nodes.len();
            let eval = Evaluator::default()
                .evaluate_spec(spec.clone(), Inputs::new())
                .unwrap();

            assert_eq!(eval.trace.len(), total, "{:?}", spec.name);
            let distintos: HashSet<&str> = eval.trace.order().into_iter().collect();
            assert_eq!(distintos.len(), total);

            // cada nodo corre después de sus dependencias
            for (pos, entry) in eval.trace.entries().iter().enumerate() {
                let n = spec.nodes.iter().find(|n| n.id == entry.node_id).unwrap();
                for dep in &n.deps {
                    let dep_pos = eval.trace.order().iter().position(|id| id == dep).unwrap();
                    assert!(dep_pos < pos);
                }
            }
        }
    }

    #[test]
    fn propiedades_de_largo_por_tipo_de_operacion() {
        for spec in generated_specs() {
            let eval = Evaluator::default()
                .evaluate_spec(spec.clone(), Inputs::new())
                .unwrap();

            for entry in eval.trace.entries() {
                let input = eval
                    .trace
                    .entries()
                    .iter()
                    .filter(|e| {
                        spec.nodes
                            .iter()
                            .find(|n| n.id == entry.node_id)
                            .map(|n| n.deps.contains(&e.node_id))
                            .unwrap_or(false)
                    })
                    .map(|e| e.output_len)
                    .sum::<usize>();

                match entry.op {
                    Op::Map => assert_eq!(entry.output_len, entry.input_len),
                    Op::Filter => assert!(entry.output_len <= entry.input_len),
                    Op::ReduceByKey => {
                        let claves: HashSet<String> = eval.outputs[&entry.node_id]
                            .iter()
                            .map(|r| r["key"].to_string())
                            .collect();
                        assert_eq!(claves.len(), entry.output_len);
                        assert!(entry.output_len <= entry.input_len);
                    }
                    Op::Source | Op::Sink => {}
                }

                if entry.op != Op::Source {
                    assert_eq!(entry.input_len, input);
                }
            }
        }
    }
}
