//! Core types for wisp-ui.
//!
//! These types define the foundation that everything builds on.
//! Attribute values flow through the engine dynamically typed: a component
//! declares slots whose values are [`Value`]s, optionally constrained by a
//! [`DeclaredType`].

use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Index of a registered component class in the class registry.
pub type ClassId = usize;

/// Index of a live component instance in the instance arena.
pub type InstanceId = usize;

/// Handle to a node owned by the host tree.
pub type NodeKey = usize;

/// Identity of a bound event listener.
pub type ListenerId = usize;

/// Identity of a children collection.
pub type CollectionId = usize;

/// Identity of a declared-child reference (stable per class).
pub type ChildRefId = usize;

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed attribute value.
///
/// `Null` doubles as "unset": a slot whose cache holds no entry reports its
/// declared initial value, and a view attribute whose value is `Null` is
/// removed from the host node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The declared type this value would satisfy.
    pub fn type_of(&self) -> DeclaredType {
        match self {
            Value::Null => DeclaredType::Untyped,
            Value::Bool(_) => DeclaredType::Bool,
            Value::Int(_) => DeclaredType::Int,
            Value::Float(_) => DeclaredType::Float,
            Value::Str(_) => DeclaredType::Str,
            Value::List(_) => DeclaredType::List,
        }
    }

    /// Convert to the string the host tree should see for a view attribute.
    ///
    /// Boolean attributes follow the empty-string convention: `true` becomes
    /// `Some("")`, `false` and `Null` become `None` (attribute removed).
    pub fn view_value(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(true) => Some(String::new()),
            Value::Bool(false) => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

// =============================================================================
// DeclaredType
// =============================================================================

/// The type a slot was declared with.
///
/// `Untyped` slots accept anything. Typed slots can synthesize a zero value
/// when a model link needs one and neither side holds a value yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeclaredType {
    #[default]
    Untyped,
    Bool,
    Int,
    Float,
    Str,
    List,
}

impl DeclaredType {
    /// The zero value of this type (`Null` for untyped slots).
    pub fn zero_value(&self) -> Value {
        match self {
            DeclaredType::Untyped => Value::Null,
            DeclaredType::Bool => Value::Bool(false),
            DeclaredType::Int => Value::Int(0),
            DeclaredType::Float => Value::Float(0.0),
            DeclaredType::Str => Value::Str(String::new()),
            DeclaredType::List => Value::List(Vec::new()),
        }
    }
}

// =============================================================================
// Naming
// =============================================================================

/// Convert a `snake_case` or `CamelCase` identifier to `kebab-case`.
///
/// Slot and class names are kebab-cased once, at class-build time.
pub fn to_kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch == '_' {
            out.push('-');
            prev_lower = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
