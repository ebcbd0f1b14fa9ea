use super::{Branch, RootShape};

/// Content of a replicated item: either a plain JSON-like value or a nested
/// shared type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Any(serde_json::Value),
    Shared(Branch),
}

impl Value {
    pub fn null() -> Self {
        Value::Any(serde_json::Value::Null)
    }

    pub fn as_any(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Any(value) => Some(value),
            Value::Shared(_) => None,
        }
    }

    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            Value::Shared(branch) => Some(branch),
            Value::Any(_) => None,
        }
    }

    pub fn as_branch_mut(&mut self) -> Option<&mut Branch> {
        match self {
            Value::Shared(branch) => Some(branch),
            Value::Any(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_any().and_then(serde_json::Value::as_str)
    }

    /// Nested map, or `None` for plain values and nested arrays.
    pub fn as_map(&self) -> Option<&Branch> {
        self.as_branch()
            .filter(|branch| branch.shape() != RootShape::Sequential)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Any(serde_json::Value::Null))
    }

    /// Deep conversion into plain JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Any(value) => value.clone(),
            Value::Shared(branch) => branch.to_json(),
        }
    }

    pub(crate) fn merge_from(&mut self, other: &Value) {
        if let (Value::Shared(mine), Value::Shared(theirs)) = (self, other) {
            mine.merge_from(theirs);
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Any(value)
    }
}
