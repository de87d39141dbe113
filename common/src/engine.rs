use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::Path,
};

use crate::error::Result;
use crate::functions::{Combiner, Fields, FnResult, GroupKey, Num};

/// Tipo genérico de registro (fila de datos).
/// Usamos JSON para poder representar pares clave/valor, texto, CSV, etc.
pub type Record = Value;

/// Colección en memoria de registros.
pub type Records = Vec<Record>;

/* =========================
   Operadores genéricos
   ========================= */

/// map: aplica una función a cada registro y devuelve una nueva colección
/// del mismo largo.
pub fn op_map<F>(input: Records, f: F) -> FnResult<Records>
where
    F: Fn(&Record) -> FnResult<Record>,
{
    input.iter().map(f).collect()
}

/// filter: deja pasar sólo los registros que cumplan el predicado,
/// en el mismo orden.
pub fn op_filter<F>(input: Records, f: F) -> FnResult<Records>
where
    F: Fn(&Record) -> FnResult<bool>,
{
    let mut out = Vec::new();
    for rec in input.into_iter() {
        if f(&rec)? {
            out.push(rec);
        }
    }
    Ok(out)
}

/// reduce_by_key:
///   - Agrupa por `fields.key`.
///   - Combina `fields.value` con el combinador.
///   - Devuelve un registro `{ key: <clave>, value: <combinado> }` por clave.
pub fn op_reduce_by_key(input: Records, fields: &Fields, combiner: Combiner) -> FnResult<Records> {
    // clave de agrupación -> (clave original, acumulado)
    let mut acc: BTreeMap<GroupKey, (Value, Num)> = BTreeMap::new();

    for rec in input.iter() {
        let key = fields.key_of(rec)?;
        let group = GroupKey::from_value(key)?;
        let val = fields.num_of(rec)?;

        match acc.get_mut(&group) {
            Some((_, cur)) => *cur = combiner.combine(*cur, val)?,
            None => {
                acc.insert(group, (key.clone(), val));
            }
        }
    }

    // BTreeMap ya viene ordenado por clave
    acc.into_values()
        .map(|(key, val)| Ok(fields.pair(key, val.to_value()?)))
        .collect()
}

/// Convierte pares `[clave, valor]` en objetos `{key, value}`.
/// Lo demás queda igual.
pub fn normalize_records(input: Records, fields: &Fields) -> Records {
    input
        .into_iter()
        .map(|rec| match rec {
            Value::Array(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or(Value::Null);
                let key = pair.pop().unwrap_or(Value::Null);
                fields.pair(key, value)
            }
            other => other,
        })
        .collect()
}

/* =========================
   Lectura de archivos a Records
   ========================= */

/// Lee un CSV con encabezados. Las celdas numéricas se convierten a número.
pub fn read_csv_to_records<P: AsRef<Path>>(path: P) -> Result<Records> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    // Limpia BOM por si viene de Excel/Windows
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|c| c.is_empty()) {
            continue;
        }

        let mut obj = Map::new();
        for (idx, h) in headers.iter().enumerate() {
            obj.insert(h.clone(), parse_cell(row.get(idx).unwrap_or("")));
        }
        out.push(Value::Object(obj));
    }

    Ok(out)
}

fn parse_cell(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    json!(cell)
}

pub fn read_jsonl_to_records<P: AsRef<Path>>(path: P) -> Result<Records> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();

    for line_res in reader.lines() {
        let line = line_res?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: Value = serde_json::from_str(&line)?;
        out.push(rec);
    }

    Ok(out)
}

/// Archivo de texto: un registro string por línea no vacía.
pub fn read_text_to_records<P: AsRef<Path>>(path: P) -> Result<Records> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| json!(l))
        .collect())
}

/// Elige el lector por extensión:
/// csv -> CSV, json -> arreglo JSON (o un solo valor), jsonl -> JSONL,
/// cualquier otra -> texto.
pub fn read_records_from_path<P: AsRef<Path>>(path: P) -> Result<Records> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" => read_csv_to_records(path),
        "jsonl" | "ndjson" => read_jsonl_to_records(path),
        "json" => {
            let content = fs::read_to_string(path)?;
            match serde_json::from_str::<Value>(&content)? {
                Value::Array(items) => Ok(items),
                single => Ok(vec![single]),
            }
        }
        _ => read_text_to_records(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, io::Write, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("engine_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    /* ============
       OPERADORES
       ============ */

    #[test]
    fn op_map_aplica_funcion_a_cada_registro() {
        let input = vec![json!({"x": 1}), json!({"x": 2})];

        let out = op_map(input, |r| {
            let mut o = r.clone();
            let v = o["x"].as_i64().unwrap();
            o["x"] = json!(v * 10);
            Ok(o)
        })
        .unwrap();

        assert_eq!(out, vec![json!({"x": 10}), json!({"x": 20})]);
    }

    #[test]
    fn op_map_corta_en_el_primer_error() {
        let input = vec![json!(1), json!("dos"), json!(3)];

        let err = op_map(input, |r| {
            r.as_i64()
                .map(|v| json!(v + 1))
                .ok_or_else(|| format!("{r} no es entero"))
        })
        .unwrap_err();

        assert_eq!(err, "\"dos\" no es entero");
    }

    #[test]
    fn op_filter_filtra_por_predicado_y_conserva_orden() {
        let input = vec![json!({"x": 1}), json!({"x": 2}), json!({"x": 3})];

        let out = op_filter(input, |r| Ok(r["x"].as_i64().unwrap() % 2 == 1)).unwrap();

        assert_eq!(out, vec![json!({"x": 1}), json!({"x": 3})]);
    }

    #[test]
    fn op_reduce_by_key_agrupa_y_suma() {
        let input = vec![
            json!({"token": "b", "count": 1}),
            json!({"token": "a", "count": 1}),
            json!({"token": "a", "count": 2}),
        ];

        let fields = Fields::new(Some("token"), Some("count"));
        let out = op_reduce_by_key(input, &fields, Combiner::Sum).unwrap();

        // reduce_by_key ordena por clave
        assert_eq!(
            out,
            vec![
                json!({"token": "a", "count": 3}),
                json!({"token": "b", "count": 1}),
            ]
        );
    }

    #[test]
    fn op_reduce_by_key_con_max_y_claves_numericas() {
        let input = vec![
            json!({"key": 1, "value": 5}),
            json!({"key": 1, "value": 9}),
            json!({"key": 2, "value": 4}),
        ];

        let out = op_reduce_by_key(input, &Fields::default(), Combiner::Max).unwrap();

        assert_eq!(
            out,
            vec![json!({"key": 1, "value": 9}), json!({"key": 2, "value": 4})]
        );
    }

    #[test]
    fn op_reduce_by_key_no_mezcla_tipos_y_ordena_numeros_por_valor() {
        let input = vec![
            json!({"key": "1", "value": 1}),
            json!({"key": 1, "value": 2}),
            json!({"key": 10, "value": 1}),
            json!({"key": 2, "value": 1}),
            json!({"key": "true", "value": 1}),
            json!({"key": true, "value": 5}),
        ];

        let out = op_reduce_by_key(input, &Fields::default(), Combiner::Sum).unwrap();

        assert_eq!(
            out,
            vec![
                json!({"key": true, "value": 5}),
                json!({"key": 1, "value": 2}),
                json!({"key": 2, "value": 1}),
                json!({"key": 10, "value": 1}),
                json!({"key": "1", "value": 1}),
                json!({"key": "true", "value": 1}),
            ]
        );
    }

    #[test]
    fn op_reduce_by_key_falla_con_valor_no_numerico() {
        let input = vec![json!({"key": "a", "value": "x"})];
        let err = op_reduce_by_key(input, &Fields::default(), Combiner::Sum).unwrap_err();
        assert!(err.contains("no es numérico"));
    }

    #[test]
    fn op_reduce_by_key_sobre_entrada_vacia() {
        let out = op_reduce_by_key(Vec::new(), &Fields::default(), Combiner::Sum).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn normalize_records_convierte_pares() {
        let input = vec![json!(["apple", 1]), json!({"key": "b", "value": 2}), json!("x")];
        let out = normalize_records(input, &Fields::default());
        assert_eq!(
            out,
            vec![
                json!({"key": "apple", "value": 1}),
                json!({"key": "b", "value": 2}),
                json!("x"),
            ]
        );
    }

    /* =========================
       IO: CSV / JSONL / TEXTO
       ========================= */

    #[test]
    fn read_csv_to_records_lee_encabezados_y_numeros() {
        let tmp = temp_dir("read_csv");
        let csv_path = tmp.join("data.csv");
        let mut f = fs::File::create(&csv_path).unwrap();

        writeln!(f, "key,value").unwrap();
        writeln!(f, "apple,1").unwrap();
        writeln!(f, "banana, 2.5").unwrap();

        let recs = read_csv_to_records(csv_path.to_str().unwrap()).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0], json!({"key": "apple", "value": 1}));
        assert_eq!(recs[1]["value"], json!(2.5));
    }

    #[test]
    fn read_csv_to_records_soporta_archivo_vacio() {
        let tmp = temp_dir("read_csv_empty");
        let csv_path = tmp.join("data.csv");
        fs::File::create(&csv_path).unwrap(); // sin contenido

        let recs = read_csv_to_records(csv_path.to_str().unwrap()).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn read_jsonl_to_records_lee_un_objeto_por_linea() {
        let tmp = temp_dir("read_jsonl");
        let jsonl_path = tmp.join("data.jsonl");
        let mut f = fs::File::create(&jsonl_path).unwrap();

        writeln!(f, "{}", r#"{"x":1}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, "{}", r#"{"x":2, "y":"ok"}"#).unwrap();

        let recs = read_jsonl_to_records(jsonl_path.to_str().unwrap()).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["x"], json!(1));
        assert_eq!(recs[1]["y"], json!("ok"));
    }

    #[test]
    fn read_records_from_path_elige_lector_por_extension() {
        let tmp = temp_dir("read_by_ext");

        let json_path = tmp.join("pares.json");
        fs::write(&json_path, r#"[["apple", 1], ["carrot", 2]]"#).unwrap();
        let recs = read_records_from_path(json_path.to_str().unwrap()).unwrap();
        assert_eq!(recs, vec![json!(["apple", 1]), json!(["carrot", 2])]);

        let txt_path = tmp.join("palabras.txt");
        fs::write(&txt_path, "hola\n\n  mundo \n").unwrap();
        let recs = read_records_from_path(txt_path.to_str().unwrap()).unwrap();
        assert_eq!(recs, vec![json!("hola"), json!("mundo")]);
    }

    #[test]
    fn read_records_from_path_archivo_inexistente_devuelve_err() {
        let tmp = temp_dir("read_missing");
        let path = tmp.join("no_existe.jsonl");
        assert!(read_records_from_path(path.to_str().unwrap()).is_err());
    }
}
