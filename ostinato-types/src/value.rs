use serde::{Deserialize, Serialize};

/// A single OSC-style argument value.
///
/// Variant order matters for untagged deserialization: a JSON integer decodes
/// as `Int`, any other number as `Float`, so state files round-trip without
/// type drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Float(f32),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Numeric view of the value, if it has one. Strings parse, bools map to 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Integer view, truncating floats and parsing numeric strings.
    pub fn as_int(&self) -> Option<i32> {
        self.as_number().map(|n| n as i32)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v as f32)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// OSC-style type tag for one parameter value slot.
///
/// Parsed from a typetag string, one letter per slot: `i` int, `f` float,
/// `s` string, `T`/`F` fixed truth values, anything else (`*` by convention)
/// passes values through untyped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    Int,
    Float,
    Str,
    True,
    False,
    Any,
}

impl TypeTag {
    /// Parse a typetag string into one tag per value slot.
    pub fn parse(spec: &str) -> Vec<TypeTag> {
        spec.chars()
            .map(|c| match c {
                'i' => TypeTag::Int,
                'f' => TypeTag::Float,
                's' => TypeTag::Str,
                'T' => TypeTag::True,
                'F' => TypeTag::False,
                _ => TypeTag::Any,
            })
            .collect()
    }

    /// Coerce a value to this tag. Returns `None` when the value cannot be
    /// represented (e.g. a non-numeric string under an `i` tag).
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match self {
            TypeTag::Int => value.as_int().map(Value::Int),
            TypeTag::Float => value.as_number().map(|n| Value::Float(n as f32)),
            TypeTag::Str => Some(Value::Str(value.to_string())),
            TypeTag::True => Some(Value::Bool(true)),
            TypeTag::False => Some(Value::Bool(false)),
            TypeTag::Any => Some(value.clone()),
        }
    }
}
