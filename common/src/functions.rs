use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{cmp::Ordering, fmt};

use crate::dag::Op;
use crate::engine::Record;
use crate::error::{PipelineError, Result};

/// Resultado de aplicar una función a un registro. El error es sólo el
/// mensaje; el nodo lo agrega quien ejecuta.
pub type FnResult<T> = std::result::Result<T, String>;

/* =========================
   Campos clave / valor
   ========================= */

/// Nombres de los campos que leen las transformaciones por clave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fields {
    pub key: String,
    pub value: String,
}

impl Default for Fields {
    fn default() -> Self {
        Self {
            key: "key".to_string(),
            value: "value".to_string(),
        }
    }
}

impl Fields {
    pub fn new(key: Option<&str>, value: Option<&str>) -> Self {
        let default = Self::default();
        Self {
            key: key.map(str::to_string).unwrap_or(default.key),
            value: value.map(str::to_string).unwrap_or(default.value),
        }
    }

    pub fn key_of<'a>(&self, rec: &'a Record) -> FnResult<&'a Value> {
        field(rec, &self.key)
    }

    pub fn value_of<'a>(&self, rec: &'a Record) -> FnResult<&'a Value> {
        field(rec, &self.value)
    }

    /// Valor numérico del registro.
    pub fn num_of(&self, rec: &Record) -> FnResult<Num> {
        let v = self.value_of(rec)?;
        Num::from_value(v)
            .ok_or_else(|| format!("el valor {v} del campo '{}' no es numérico", self.value))
    }

    /// Construye `{ key: k, value: v }` con estos nombres de campo.
    pub fn pair(&self, key: Value, value: Value) -> Record {
        let mut obj = Map::new();
        obj.insert(self.key.clone(), key);
        obj.insert(self.value.clone(), value);
        Value::Object(obj)
    }
}

fn field<'a>(rec: &'a Record, name: &str) -> FnResult<&'a Value> {
    let obj = rec
        .as_object()
        .ok_or_else(|| format!("se esperaba un objeto y llegó {rec}"))?;
    obj.get(name)
        .ok_or_else(|| format!("el registro {rec} no tiene el campo '{name}'"))
}

/// Clave de agrupación. Conserva el tipo JSON: `"1"` y `1` son claves
/// distintas, y los números se ordenan por valor (2 antes que 10).
/// Orden entre tipos: bool < número < string.
#[derive(Debug, Clone)]
pub enum GroupKey {
    Bool(bool),
    Num(Num),
    Str(String),
}

impl GroupKey {
    pub fn from_value(key: &Value) -> FnResult<GroupKey> {
        match key {
            Value::String(s) => Ok(GroupKey::Str(s.clone())),
            Value::Bool(b) => Ok(GroupKey::Bool(*b)),
            Value::Number(_) => Num::from_value(key)
                .map(GroupKey::Num)
                .ok_or_else(|| format!("la clave {key} no se puede agrupar")),
            other => Err(format!("la clave {other} no se puede agrupar")),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            GroupKey::Bool(_) => 0,
            GroupKey::Num(_) => 1,
            GroupKey::Str(_) => 2,
        }
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (GroupKey::Bool(a), GroupKey::Bool(b)) => a.cmp(b),
            (GroupKey::Str(a), GroupKey::Str(b)) => a.cmp(b),
            (GroupKey::Num(Num::Int(a)), GroupKey::Num(Num::Int(b))) => a.cmp(b),
            // 1 y 1.0 son claves distintas: a igual valor, el entero va primero
            (GroupKey::Num(a), GroupKey::Num(b)) => a
                .as_f64()
                .total_cmp(&b.as_f64())
                .then_with(|| matches!(b, Num::Int(_)).cmp(&matches!(a, Num::Int(_)))),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

/* =========================
   Números
   ========================= */

/// Entero mientras ambos operandos sean enteros; si aparece un float,
/// se pasa a f64.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn from_value(v: &Value) -> Option<Num> {
        match v {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            _ => None,
        }
    }

    pub fn to_value(self) -> FnResult<Value> {
        match self {
            Num::Int(i) => Ok(json!(i)),
            Num::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| format!("resultado no finito: {f}")),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    pub fn add(self, other: Num) -> FnResult<Num> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .ok_or_else(|| format!("overflow al sumar {a} + {b}")),
            _ => Ok(Num::Float(self.as_f64() + other.as_f64())),
        }
    }

    pub fn mul(self, other: Num) -> FnResult<Num> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_mul(b)
                .map(Num::Int)
                .ok_or_else(|| format!("overflow al multiplicar {a} * {b}")),
            _ => Ok(Num::Float(self.as_f64() * other.as_f64())),
        }
    }

    pub fn compare(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Int(i) => write!(f, "{i}"),
            Num::Float(x) => write!(f, "{x}"),
        }
    }
}

/* =========================
   map
   ========================= */

#[derive(Debug, Clone, PartialEq)]
pub enum MapFn {
    Identity,
    /// value * factor
    Scale(Num),
    /// value + delta
    Add(Num),
    ToLower,
    ToUpper,
    /// "palabra" -> { key: "palabra", value: 1 }
    PairOne,
    /// intercambia clave y valor
    Swap,
}

impl MapFn {
    pub fn apply(&self, rec: &Record, fields: &Fields) -> FnResult<Record> {
        match self {
            MapFn::Identity => Ok(rec.clone()),
            MapFn::Scale(factor) => {
                let v = fields.num_of(rec)?.mul(*factor)?;
                with_field(rec, &fields.value, v.to_value()?)
            }
            MapFn::Add(delta) => {
                let v = fields.num_of(rec)?.add(*delta)?;
                with_field(rec, &fields.value, v.to_value()?)
            }
            MapFn::ToLower => map_key_str(rec, fields, |s| s.to_lowercase()),
            MapFn::ToUpper => map_key_str(rec, fields, |s| s.to_uppercase()),
            MapFn::PairOne => match rec {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                    Ok(fields.pair(rec.clone(), json!(1)))
                }
                other => Err(format!("pair_one espera un escalar y llegó {other}")),
            },
            MapFn::Swap => {
                let key = fields.key_of(rec)?.clone();
                let value = fields.value_of(rec)?.clone();
                let swapped = with_field(rec, &fields.key, value)?;
                with_field(&swapped, &fields.value, key)
            }
        }
    }
}

fn with_field(rec: &Record, name: &str, v: Value) -> FnResult<Record> {
    let mut obj = rec
        .as_object()
        .cloned()
        .ok_or_else(|| format!("se esperaba un objeto y llegó {rec}"))?;
    obj.insert(name.to_string(), v);
    Ok(Value::Object(obj))
}

fn map_key_str<F>(rec: &Record, fields: &Fields, f: F) -> FnResult<Record>
where
    F: Fn(&str) -> String,
{
    let key = fields.key_of(rec)?;
    let s = key
        .as_str()
        .ok_or_else(|| format!("la clave {key} no es texto"))?;
    with_field(rec, &fields.key, Value::String(f(s)))
}

/* =========================
   filter
   ========================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl CmpOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Gte => ord != Ordering::Less,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Lte => ord != Ordering::Greater,
            CmpOp::Eq => ord == Ordering::Equal,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CmpOp::Gt => "value_gt",
            CmpOp::Gte => "value_gte",
            CmpOp::Lt => "value_lt",
            CmpOp::Lte => "value_lte",
            CmpOp::Eq => "value_eq",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterFn {
    KeyEquals(Value),
    KeyNotEquals(Value),
    Value(CmpOp, Num),
    NonEmptyKey,
}

impl FilterFn {
    pub fn apply(&self, rec: &Record, fields: &Fields) -> FnResult<bool> {
        match self {
            FilterFn::KeyEquals(k) => Ok(fields.key_of(rec)? == k),
            FilterFn::KeyNotEquals(k) => Ok(fields.key_of(rec)? != k),
            FilterFn::Value(op, bound) => {
                let v = fields.num_of(rec)?;
                let ord = v
                    .compare(*bound)
                    .ok_or_else(|| format!("no se puede comparar {v} con {bound}"))?;
                Ok(op.holds(ord))
            }
            FilterFn::NonEmptyKey => Ok(match fields.key_of(rec)? {
                Value::String(s) => !s.trim().is_empty(),
                Value::Null => false,
                _ => true,
            }),
        }
    }
}

/* =========================
   reduceByKey
   ========================= */

/// Combinadores asociativos y conmutativos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combiner {
    Sum,
    Product,
    Min,
    Max,
}

impl Combiner {
    pub fn combine(self, a: Num, b: Num) -> FnResult<Num> {
        match self {
            Combiner::Sum => a.add(b),
            Combiner::Product => a.mul(b),
            Combiner::Min | Combiner::Max => {
                let ord = a
                    .compare(b)
                    .ok_or_else(|| format!("no se puede comparar {a} con {b}"))?;
                let keep_a = match self {
                    Combiner::Min => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                Ok(if keep_a { a } else { b })
            }
        }
    }

    fn name(self) -> &'static str {
        match self {
            Combiner::Sum => "sum",
            Combiner::Product => "product",
            Combiner::Min => "min",
            Combiner::Max => "max",
        }
    }
}

/* =========================
   Transformación resuelta de un nodo
   ========================= */

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Source,
    Sink,
    Map(MapFn),
    Filter(FilterFn),
    ReduceByKey(Combiner),
}

impl Transform {
    /// Resuelve el nombre de función (`fn` en el JSON) y su `arg`.
    /// Sin `fn`, cada operación usa la del demo clásico:
    /// map -> scale(2), filter -> key_not_equals("banana"), reduceByKey -> sum.
    pub fn resolve(node: &str, op: Op, fn_name: Option<&str>, arg: Option<&Value>) -> Result<Self> {
        let unknown = |name: &str| PipelineError::UnknownFunction {
            node: node.to_string(),
            op: op.to_string(),
            name: name.to_string(),
        };

        match op {
            Op::Source | Op::Sink => match fn_name {
                None => Ok(if op == Op::Source {
                    Transform::Source
                } else {
                    Transform::Sink
                }),
                Some(name) => Err(unknown(name)),
            },
            Op::Map => {
                let name = fn_name.unwrap_or("scale");
                let f = match name {
                    "identity" => MapFn::Identity,
                    "scale" => MapFn::Scale(num_arg(node, arg, Some(Num::Int(2)))?),
                    "add" => MapFn::Add(num_arg(node, arg, Some(Num::Int(1)))?),
                    "to_lower" => MapFn::ToLower,
                    "to_upper" => MapFn::ToUpper,
                    "pair_one" => MapFn::PairOne,
                    "swap" => MapFn::Swap,
                    other => return Err(unknown(other)),
                };
                Ok(Transform::Map(f))
            }
            Op::Filter => {
                let name = fn_name.unwrap_or("key_not_equals");
                let f = match name {
                    "key_equals" => FilterFn::KeyEquals(value_arg(node, arg, None)?),
                    "key_not_equals" => {
                        FilterFn::KeyNotEquals(value_arg(node, arg, Some(json!("banana")))?)
                    }
                    "value_gt" => FilterFn::Value(CmpOp::Gt, num_arg(node, arg, None)?),
                    "value_gte" => FilterFn::Value(CmpOp::Gte, num_arg(node, arg, None)?),
                    "value_lt" => FilterFn::Value(CmpOp::Lt, num_arg(node, arg, None)?),
                    "value_lte" => FilterFn::Value(CmpOp::Lte, num_arg(node, arg, None)?),
                    "value_eq" => FilterFn::Value(CmpOp::Eq, num_arg(node, arg, None)?),
                    "non_empty_key" => FilterFn::NonEmptyKey,
                    other => return Err(unknown(other)),
                };
                Ok(Transform::Filter(f))
            }
            Op::ReduceByKey => {
                let name = fn_name.unwrap_or("sum");
                let c = match name {
                    "sum" => Combiner::Sum,
                    "product" => Combiner::Product,
                    "min" => Combiner::Min,
                    "max" => Combiner::Max,
                    other => return Err(unknown(other)),
                };
                Ok(Transform::ReduceByKey(c))
            }
        }
    }
}

fn num_arg(node: &str, arg: Option<&Value>, default: Option<Num>) -> Result<Num> {
    match arg {
        Some(v) => Num::from_value(v).ok_or_else(|| PipelineError::InvalidArgument {
            node: node.to_string(),
            message: format!("se esperaba un número en 'arg' y llegó {v}"),
        }),
        None => default.ok_or_else(|| PipelineError::InvalidArgument {
            node: node.to_string(),
            message: "falta 'arg'".to_string(),
        }),
    }
}

fn value_arg(node: &str, arg: Option<&Value>, default: Option<Value>) -> Result<Value> {
    arg.cloned()
        .or(default)
        .ok_or_else(|| PipelineError::InvalidArgument {
            node: node.to_string(),
            message: "falta 'arg'".to_string(),
        })
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Source => write!(f, "source"),
            Transform::Sink => write!(f, "sink"),
            Transform::Map(m) => match m {
                MapFn::Identity => write!(f, "identity"),
                MapFn::Scale(n) => write!(f, "scale({n})"),
                MapFn::Add(n) => write!(f, "add({n})"),
                MapFn::ToLower => write!(f, "to_lower"),
                MapFn::ToUpper => write!(f, "to_upper"),
                MapFn::PairOne => write!(f, "pair_one"),
                MapFn::Swap => write!(f, "swap"),
            },
            Transform::Filter(p) => match p {
                FilterFn::KeyEquals(k) => write!(f, "key_equals({k})"),
                FilterFn::KeyNotEquals(k) => write!(f, "key_not_equals({k})"),
                FilterFn::Value(op, n) => write!(f, "{}({n})", op.name()),
                FilterFn::NonEmptyKey => write!(f, "non_empty_key"),
            },
            Transform::ReduceByKey(c) => write!(f, "{}", c.name()),
        }
    }
}
