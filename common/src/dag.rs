use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt, fs,
    path::Path,
};

use crate::engine::Records;
use crate::error::{PipelineError, Result};
use crate::functions::{Fields, Transform};

/* --------- Descripción JSON del pipeline --------- */

/// Pipeline tal como llega en el JSON subido.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeSpec>,
    /// (from, to); se suman a `deps` del nodo destino.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,

    /// "source", "map", "filter", "reduceByKey", "sink".
    /// También acepta `type` y los tipos del formato de subida
    /// ("transformation", "shuffle").
    #[serde(alias = "type")]
    pub op: String,

    /// Nombre de la función, se serializa como "fn" en el JSON.
    /// Ej: "scale", "key_not_equals", "sum".
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub fn_name: Option<String>,

    /// Argumento de la función, ej: 2 para scale o "banana" para key_not_equals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<Value>,

    /// Nombre del campo clave (default "key").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Nombre del campo valor (default "value").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,

    /// Datos en línea para nodos fuente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Records>,

    /// Archivo CSV / JSON / JSONL / texto para nodos fuente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl PipelineSpec {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/* --------- Operaciones --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Op {
    Source,
    Map,
    Filter,
    ReduceByKey,
    Sink,
}

impl Op {
    /// Interpreta el `op` de un nodo. Para el tipo genérico del formato de
    /// subida ("transformation") la operación sale del id del nodo:
    /// "map1" -> map, "filter1" -> filter.
    pub fn parse(node_id: &str, op: &str) -> Result<Op> {
        let parsed = match op {
            "source" | "read" => Some(Op::Source),
            "map" => Some(Op::Map),
            "filter" => Some(Op::Filter),
            "reduceByKey" | "reduce_by_key" | "reduce" | "shuffle" => Some(Op::ReduceByKey),
            "sink" | "output" => Some(Op::Sink),
            "transformation" => {
                let id = node_id.to_ascii_lowercase();
                if id.contains("map") {
                    Some(Op::Map)
                } else if id.contains("filter") {
                    Some(Op::Filter)
                } else if id.contains("reduce") {
                    Some(Op::ReduceByKey)
                } else {
                    None
                }
            }
            _ => None,
        };

        parsed.ok_or_else(|| PipelineError::UnknownOp {
            node: node_id.to_string(),
            op: op.to_string(),
        })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Source => "source",
            Op::Map => "map",
            Op::Filter => "filter",
            Op::ReduceByKey => "reduceByKey",
            Op::Sink => "sink",
        };
        f.pad(s)
    }
}

/* --------- DAG validado --------- */

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub op: Op,
    pub transform: Transform,
    pub fields: Fields,
    /// Dependencias sin repetidos, en el orden declarado.
    pub deps: Vec<String>,
    pub data: Option<Records>,
    pub path: Option<String>,
}

/// DAG de nodos. Garantiza ids únicos, dependencias existentes y funciones
/// resueltas. La aciclicidad se comprueba en `topological_order`.
#[derive(Debug, Clone)]
pub struct Dag {
    name: Option<String>,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Dag {
    pub fn from_spec(spec: PipelineSpec) -> Result<Self> {
        // 1) ids únicos
        let mut index: HashMap<String, usize> = HashMap::new();
        for (pos, n) in spec.nodes.iter().enumerate() {
            if index.insert(n.id.clone(), pos).is_some() {
                return Err(PipelineError::DuplicateNode(n.id.clone()));
            }
        }

        // 2) deps declarados + aristas, sin repetidos
        let mut deps: Vec<Vec<String>> = Vec::with_capacity(spec.nodes.len());
        for n in &spec.nodes {
            let mut seen = HashSet::new();
            deps.push(
                n.deps
                    .iter()
                    .filter(|d| seen.insert(d.as_str()))
                    .cloned()
                    .collect(),
            );
        }
        for (from, to) in &spec.edges {
            let Some(&pos) = index.get(to) else {
                return Err(PipelineError::UnknownNode(to.clone()));
            };
            if !deps[pos].contains(from) {
                deps[pos].push(from.clone());
            }
        }

        // 3) toda dependencia tiene que existir
        for (n, node_deps) in spec.nodes.iter().zip(&deps) {
            if let Some(missing) = node_deps.iter().find(|d| !index.contains_key(*d)) {
                return Err(PipelineError::MissingDependency {
                    node: n.id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        // 4) operación y función de cada nodo
        let mut nodes = Vec::with_capacity(spec.nodes.len());
        for (n, node_deps) in spec.nodes.into_iter().zip(deps) {
            let op = Op::parse(&n.id, &n.op)?;
            let transform = Transform::resolve(&n.id, op, n.fn_name.as_deref(), n.arg.as_ref())?;
            nodes.push(Node {
                fields: Fields::new(n.key.as_deref(), n.value.as_deref()),
                id: n.id,
                op,
                transform,
                deps: node_deps,
                data: n.data,
                path: n.path,
            });
        }

        Ok(Self {
            name: spec.name,
            nodes,
            index,
        })
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_spec(PipelineSpec::from_json(s)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_spec(PipelineSpec::from_path(path)?)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Nodos en el orden declarado.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodos de los que no depende nadie (salidas del pipeline).
    pub fn terminal_nodes(&self) -> Vec<&str> {
        let used: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.deps.iter().map(String::as_str))
            .collect();
        self.nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !used.contains(id))
            .collect()
    }

    /// Orden topológico (Kahn). Entre nodos listos gana el declarado antes,
    /// así el orden es estable para un mismo JSON.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (pos, node) in self.nodes.iter().enumerate() {
            for dep in &node.deps {
                let dep_pos = self.index[dep];
                dependents[dep_pos].push(pos);
                in_degree[pos] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&p| in_degree[p] == 0).collect();
        let mut sorted = Vec::with_capacity(n);

        while let Some(pos) = ready.pop_first() {
            sorted.push(self.nodes[pos].id.clone());
            for &next in &dependents[pos] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if sorted.len() != n {
            let nodes = (0..n)
                .filter(|&p| in_degree[p] > 0)
                .map(|p| self.nodes[p].id.clone())
                .collect();
            return Err(PipelineError::CycleDetected { nodes });
        }

        Ok(sorted)
    }
}

/* --------- Pipeline por defecto --------- */

/// El demo clásico:
/// read -> map1 (x2) -> filter1 (sin banana) -> reduce1 (suma) -> output
pub fn default_pipeline() -> PipelineSpec {
    let node = |id: &str, op: &str, deps: &[&str]| NodeSpec {
        id: id.to_string(),
        op: op.to_string(),
        deps: deps.iter().map(|d| d.to_string()).collect(),
        ..NodeSpec::default()
    };

    let mut read = node("read", "source", &[]);
    read.data = Some(vec![
        json!(["apple", 1]),
        json!(["banana", 1]),
        json!(["apple", 1]),
        json!(["carrot", 1]),
    ]);

    let mut map1 = node("map1", "map", &["read"]);
    map1.fn_name = Some("scale".to_string());
    map1.arg = Some(json!(2));

    let mut filter1 = node("filter1", "filter", &["map1"]);
    filter1.fn_name = Some("key_not_equals".to_string());
    filter1.arg = Some(json!("banana"));

    let mut reduce1 = node("reduce1", "reduceByKey", &["filter1"]);
    reduce1.fn_name = Some("sum".to_string());

    let output = node("output", "sink", &["reduce1"]);

    PipelineSpec {
        name: Some("default".to_string()),
        nodes: vec![read, map1, filter1, reduce1, output],
        edges: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_from(nodes: Vec<NodeSpec>, edges: Vec<(&str, &str)>) -> PipelineSpec {
        PipelineSpec {
            name: None,
            nodes,
            edges: edges
                .into_iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        }
    }

    fn n(id: &str, op: &str) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            op: op.to_string(),
            ..NodeSpec::default()
        }
    }

    #[test]
    fn op_display_respeta_el_ancho() {
        assert_eq!(format!("{:<8}|", Op::Map), "map     |");
        assert_eq!(format!("{:>12}", Op::ReduceByKey), " reduceByKey");
        assert_eq!(Op::Sink.to_string(), "sink");
    }

    #[test]
    fn orden_lineal() {
        // A -> B -> C
        let dag = Dag::from_spec(spec_from(
            vec![n("c", "sink"), n("b", "map"), n("a", "source")],
            vec![("a", "b"), ("b", "c")],
        ))
        .unwrap();

        assert_eq!(dag.topological_order().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(dag.terminal_nodes(), vec!["c"]);
    }

    #[test]
    fn diamante_desempata_por_orden_declarado() {
        //   A
        //  / \
        // C   B
        //  \ /
        //   D
        let dag = Dag::from_spec(spec_from(
            vec![n("a", "source"), n("c", "map"), n("b", "filter"), n("d", "sink")],
            vec![("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        ))
        .unwrap();

        assert_eq!(dag.topological_order().unwrap(), vec!["a", "c", "b", "d"]);
        assert_eq!(dag.node("d").unwrap().deps, vec!["b", "c"]);
    }

    #[test]
    fn id_duplicado_se_rechaza() {
        let err = Dag::from_spec(spec_from(vec![n("a", "source"), n("a", "map")], vec![]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateNode(id) if id == "a"));
    }

    #[test]
    fn dependencia_inexistente_se_rechaza() {
        let mut m = n("m", "map");
        m.deps = vec!["fantasma".to_string()];

        let err = Dag::from_spec(spec_from(vec![m], vec![])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingDependency { ref node, ref missing }
                if node == "m" && missing == "fantasma"
        ));

        // lo mismo si viene por una arista
        let err = Dag::from_spec(spec_from(vec![n("m", "map")], vec![("fantasma", "m")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingDependency { .. }));

        let err = Dag::from_spec(spec_from(vec![n("m", "map")], vec![("m", "fantasma")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownNode(id) if id == "fantasma"));
    }

    #[test]
    fn ciclo_se_detecta_en_el_orden() {
        // A -> B -> C -> B
        let dag = Dag::from_spec(spec_from(
            vec![n("a", "source"), n("b", "map"), n("c", "map")],
            vec![("a", "b"), ("b", "c"), ("c", "b")],
        ))
        .unwrap();

        let err = dag.topological_order().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CycleDetected { ref nodes } if nodes == &vec!["b".to_string(), "c".to_string()]
        ));
    }

    #[test]
    fn auto_dependencia_es_ciclo() {
        let mut m = n("m", "map");
        m.deps = vec!["m".to_string()];
        let dag = Dag::from_spec(spec_from(vec![m], vec![])).unwrap();
        assert!(matches!(
            dag.topological_order(),
            Err(PipelineError::CycleDetected { .. })
        ));
    }

    #[test]
    fn deps_repetidos_se_colapsan() {
        let mut m = n("m", "map");
        m.deps = vec!["a".to_string(), "a".to_string()];
        let dag = Dag::from_spec(spec_from(vec![n("a", "source"), m], vec![("a", "m")])).unwrap();
        assert_eq!(dag.node("m").unwrap().deps, vec!["a"]);
    }

    #[test]
    fn op_desconocida_se_rechaza() {
        let err = Dag::from_spec(spec_from(vec![n("x", "flat_map")], vec![])).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownOp { ref op, .. } if op == "flat_map"));
    }

    #[test]
    fn acepta_el_formato_de_subida_con_type_y_edges() {
        let json = r#"{
            "nodes": [
                {"id": "read", "type": "source"},
                {"id": "map1", "type": "transformation"},
                {"id": "filter1", "type": "transformation"},
                {"id": "reduce1", "type": "shuffle"},
                {"id": "output", "type": "sink"}
            ],
            "edges": [["read", "map1"], ["map1", "filter1"], ["filter1", "reduce1"], ["reduce1", "output"]]
        }"#;

        let dag = Dag::from_json(json).unwrap();
        let ops: Vec<Op> = dag.nodes().iter().map(|n| n.op).collect();
        assert_eq!(
            ops,
            vec![Op::Source, Op::Map, Op::Filter, Op::ReduceByKey, Op::Sink]
        );
        assert_eq!(
            dag.topological_order().unwrap(),
            vec!["read", "map1", "filter1", "reduce1", "output"]
        );
    }

    #[test]
    fn transformation_sin_pista_en_el_id_es_op_desconocida() {
        let err = Dag::from_spec(spec_from(vec![n("paso", "transformation")], vec![])).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownOp { .. }));
    }

    #[test]
    fn node_spec_serializa_fn_y_omite_vacios() {
        let spec = default_pipeline();
        let v = serde_json::to_value(&spec).unwrap();

        assert_eq!(v["nodes"][1]["fn"], json!("scale"));
        assert_eq!(v["nodes"][1]["arg"], json!(2));
        assert!(v["nodes"][0].get("deps").is_none());
        assert!(v.get("edges").is_none());

        let back: PipelineSpec = serde_json::from_value(v).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn pipeline_por_defecto_es_valido() {
        let dag = Dag::from_spec(default_pipeline()).unwrap();
        assert_eq!(dag.name(), Some("default"));
        assert_eq!(dag.len(), 5);
        assert_eq!(
            dag.topological_order().unwrap(),
            vec!["read", "map1", "filter1", "reduce1", "output"]
        );
    }
}
