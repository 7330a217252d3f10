//! Bound values: integer constants and struct/union layouts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a bound symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Layout,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Integer => f.write_str("integer constant"),
            ValueKind::Layout => f.write_str("struct layout"),
        }
    }
}

/// Value of a symbol for one target
///
/// Serialized untagged: integers as JSON numbers, layouts as objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Layout(StructLayout),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Layout(_) => ValueKind::Layout,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Layout(_) => None,
        }
    }

    pub fn as_layout(&self) -> Option<&StructLayout> {
        match self {
            Value::Layout(layout) => Some(layout),
            Value::Integer(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<StructLayout> for Value {
    fn from(layout: StructLayout) -> Self {
        Value::Layout(layout)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Layout(layout) => write!(
                f,
                "size={} align={} fields={}",
                layout.size,
                layout.align,
                layout.fields.len()
            ),
        }
    }
}

/// Memory layout of a C struct or union for a specific target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructLayout {
    pub size: u64,
    pub align: u64,
    pub fields: Vec<FieldLayout>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldLayout {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}
