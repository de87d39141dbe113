use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::dag::Op;
use crate::engine::Record;
use crate::functions::{Fields, GroupKey, Num};
use crate::trace::ExecutionTrace;

/// Métricas de evaluación de una colección (las del panel del simulador).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_records: usize,
    pub unique_keys: usize,
    /// Máximo del campo valor; `None` si no hay valores numéricos.
    pub max_value: Option<Value>,
}

/// Tamaños de entrada y salida de un nodo ejecutado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStat {
    pub node_id: String,
    pub op: Op,
    pub input_len: usize,
    pub output_len: usize,
}

/// Registros sin clave o con valor no numérico no cuentan para
/// `unique_keys` / `max_value`, pero sí para `total_records`.
pub fn collect_metrics(records: &[Record], fields: &Fields) -> Metrics {
    let mut keys: BTreeSet<GroupKey> = BTreeSet::new();
    let mut max: Option<Num> = None;

    for rec in records {
        if let Ok(k) = fields.key_of(rec).and_then(GroupKey::from_value) {
            keys.insert(k);
        }
        if let Ok(v) = fields.num_of(rec) {
            max = match max {
                Some(cur) if cur.compare(v) != Some(std::cmp::Ordering::Less) => Some(cur),
                _ => Some(v),
            };
        }
    }

    Metrics {
        total_records: records.len(),
        unique_keys: keys.len(),
        max_value: max.and_then(|n| n.to_value().ok()),
    }
}

pub fn node_stats(trace: &ExecutionTrace) -> Vec<NodeStat> {
    trace
        .entries()
        .iter()
        .map(|e| NodeStat {
            node_id: e.node_id.clone(),
            op: e.op,
            input_len: e.input_len,
            output_len: e.output_len,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cuenta_claves_unicas_y_maximo() {
        let recs = vec![
            json!({"key": "apple", "value": 4}),
            json!({"key": "carrot", "value": 2}),
            json!({"key": "apple", "value": 1.5}),
        ];

        let m = collect_metrics(&recs, &Fields::default());
        assert_eq!(m.total_records, 3);
        assert_eq!(m.unique_keys, 2);
        assert_eq!(m.max_value, Some(json!(4)));
    }

    #[test]
    fn claves_de_distinto_tipo_cuentan_por_separado() {
        let recs = vec![
            json!({"key": "1", "value": 1}),
            json!({"key": 1, "value": 1}),
            json!({"key": 1, "value": 3}),
        ];

        let m = collect_metrics(&recs, &Fields::default());
        assert_eq!(m.unique_keys, 2);
    }

    #[test]
    fn coleccion_vacia_o_sin_numeros() {
        let m = collect_metrics(&[], &Fields::default());
        assert_eq!(m.unique_keys, 0);
        assert_eq!(m.max_value, None);

        let m = collect_metrics(&[json!("suelto"), json!({"key": "a"})], &Fields::default());
        assert_eq!(m.total_records, 2);
        assert_eq!(m.unique_keys, 1);
        assert_eq!(m.max_value, None);
    }
}
