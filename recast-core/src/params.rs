// Recipe parameters: a JSON object supplied alongside the target path.
//
// Getters validate shape and report a `ParamError`, which surfaces as a
// precondition rejection when raised during analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use recast_model::{NodeId, SymbolPath};

use crate::analyzer::Rejection;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid parameter `{name}`: {reason}")]
pub struct ParamError {
    pub name: String,
    pub reason: String,
}

impl ParamError {
    fn new(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ParamError> for Rejection {
    fn from(err: ParamError) -> Self {
        Rejection::new(err.to_string())
    }
}

/// A statement range as given by the caller. `block` defaults to the
/// target method's body block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    #[serde(default)]
    pub block: Option<NodeId>,
    pub start: usize,
    pub end: usize,
}

/// Expression description for recipes that synthesize code
/// (`{"lit": "0"}`, `{"ref": "app::T::f"}`, `{"op": "==", "args": [..]}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprSpec {
    Literal {
        lit: Value,
    },
    Reference {
        #[serde(rename = "ref")]
        path: String,
    },
    Call {
        call: String,
        #[serde(default)]
        args: Vec<ExprSpec>,
    },
    New {
        new: String,
        #[serde(default)]
        args: Vec<ExprSpec>,
    },
    Operator {
        op: String,
        args: Vec<ExprSpec>,
    },
    This {
        this: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn text(&self, key: &str) -> Result<Option<String>, ParamError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(ParamError::new(key, format!("expected a string, got {other}"))),
        }
    }

    /// An identifier: non-empty, no whitespace, no path separator.
    pub fn name(&self, key: &str) -> Result<Option<String>, ParamError> {
        let Some(name) = self.text(key)? else {
            return Ok(None);
        };
        if name.is_empty() || name.contains(char::is_whitespace) || name.contains("::") {
            return Err(ParamError::new(key, format!("`{name}` is not a valid name")));
        }
        Ok(Some(name))
    }

    pub fn name_or(
        &self,
        key: &str,
        default: impl FnOnce() -> String,
    ) -> Result<String, ParamError> {
        Ok(self.name(key)?.unwrap_or_else(default))
    }

    pub fn require_name(&self, key: &str) -> Result<String, ParamError> {
        self.name(key)?
            .ok_or_else(|| ParamError::new(key, "is required"))
    }

    pub fn path(&self, key: &str) -> Result<Option<SymbolPath>, ParamError> {
        self.text(key)?
            .map(|s| s.parse().map_err(|e| ParamError::new(key, format!("{e}"))))
            .transpose()
    }

    pub fn require_path(&self, key: &str) -> Result<SymbolPath, ParamError> {
        self.path(key)?
            .ok_or_else(|| ParamError::new(key, "is required"))
    }

    fn strings(&self, key: &str) -> Result<Vec<String>, ParamError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ParamError::new(key, format!("expected strings, got {v}")))
                })
                .collect(),
            Some(other) => Err(ParamError::new(key, format!("expected a list, got {other}"))),
        }
    }

    pub fn names(&self, key: &str) -> Result<Vec<String>, ParamError> {
        let names = self.strings(key)?;
        if let Some(bad) = names.iter().find(|n| n.is_empty() || n.contains("::")) {
            return Err(ParamError::new(key, format!("`{bad}` is not a valid name")));
        }
        Ok(names)
    }

    pub fn paths(&self, key: &str) -> Result<Vec<SymbolPath>, ParamError> {
        self.strings(key)?
            .into_iter()
            .map(|s| s.parse().map_err(|e| ParamError::new(key, format!("{e}"))))
            .collect()
    }

    pub fn node(&self, key: &str) -> Result<Option<NodeId>, ParamError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => node_id(key, value).map(Some),
        }
    }

    pub fn require_node(&self, key: &str) -> Result<NodeId, ParamError> {
        self.node(key)?
            .ok_or_else(|| ParamError::new(key, "is required"))
    }

    pub fn nodes(&self, key: &str) -> Result<Vec<NodeId>, ParamError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(|v| node_id(key, v)).collect(),
            Some(value) => Ok(vec![node_id(key, value)?]),
        }
    }

    pub fn range(&self, key: &str) -> Result<Option<RangeSpec>, ParamError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let range: RangeSpec = serde_json::from_value(value.clone())
            .map_err(|e| ParamError::new(key, e.to_string()))?;
        if range.start >= range.end {
            return Err(ParamError::new(key, "range is empty"));
        }
        Ok(Some(range))
    }

    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ParamError> {
        match self.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(ParamError::new(key, format!("expected a boolean, got {other}"))),
        }
    }

    pub fn index(&self, key: &str) -> Result<Option<usize>, ParamError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| ParamError::new(key, format!("expected an index, got {value}"))),
        }
    }

    pub fn expr(&self, key: &str) -> Result<Option<ExprSpec>, ParamError> {
        self.get(key)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| ParamError::new(key, e.to_string()))
            })
            .transpose()
    }

    /// A string-to-string object, e.g. old name to new name.
    pub fn mapping(&self, key: &str) -> Result<BTreeMap<String, String>, ParamError> {
        match self.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_string()))
                        .ok_or_else(|| ParamError::new(key, format!("`{k}` maps to {v}")))
                })
                .collect(),
            Some(other) => Err(ParamError::new(key, format!("expected an object, got {other}"))),
        }
    }

    /// Parse one `key=value` CLI assignment. The value is read as JSON when
    /// it parses, as a plain string otherwise.
    pub fn parse_assignment(text: &str) -> Result<(String, Value), ParamError> {
        let (key, value) = text
            .split_once('=')
            .ok_or_else(|| ParamError::new(text, "expected key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParamError::new(text, "empty key"));
        }
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        Ok((key.to_string(), value))
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn node_id(key: &str, value: &Value) -> Result<NodeId, ParamError> {
    if let Some(n) = value.as_u64().and_then(|n| u32::try_from(n).ok()) {
        return Ok(NodeId(n));
    }
    value
        .as_str()
        .and_then(|s| s.strip_prefix('n').unwrap_or(s).parse::<u32>().ok())
        .map(NodeId)
        .ok_or_else(|| ParamError::new(key, format!("expected a node id, got {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_are_validated() {
        let params = Params::new().with("name", "basePrice").with("bad", "a b");
        assert_eq!(params.require_name("name").unwrap(), "basePrice");
        assert!(params.name("bad").is_err());
        assert!(params.require_name("missing").is_err());
        assert_eq!(params.name_or("missing", || "x".into()).unwrap(), "x");
    }

    #[test]
    fn node_ids_accept_numbers_and_prefixed_strings() {
        let params = Params::new().with("a", 7).with("b", "n12").with("c", json!([1, "n2"]));
        assert_eq!(params.node("a").unwrap(), Some(NodeId(7)));
        assert_eq!(params.node("b").unwrap(), Some(NodeId(12)));
        assert_eq!(params.nodes("c").unwrap(), vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn ranges_must_be_non_empty() {
        let ok = Params::new().with("range", json!({"start": 0, "end": 2}));
        assert_eq!(ok.range("range").unwrap().map(|r| r.end), Some(2));
        let empty = Params::new().with("range", json!({"start": 2, "end": 2}));
        assert!(empty.range("range").is_err());
    }

    #[test]
    fn expression_specs_parse_untagged() {
        let params = Params::new().with(
            "expr",
            json!({"op": "==", "args": [{"ref": "app::T::code"}, {"lit": 0}]}),
        );
        let ExprSpec::Operator { op, args } = params.expr("expr").unwrap().unwrap() else {
            panic!("expected an operator");
        };
        assert_eq!(op, "==");
        assert!(matches!(&args[0], ExprSpec::Reference { path } if path == "app::T::code"));
        assert!(matches!(&args[1], ExprSpec::Literal { .. }));
    }

    #[test]
    fn cli_assignments_prefer_json() {
        assert_eq!(Params::parse_assignment("n=3").unwrap(), ("n".into(), json!(3)));
        assert_eq!(
            Params::parse_assignment("name=basePrice").unwrap(),
            ("name".into(), json!("basePrice"))
        );
        assert!(Params::parse_assignment("novalue").is_err());
    }
}
