// Symbol paths: the opaque locators front-ends hand to the engine.
//
// A path is the chain of names from a root module down to the symbol,
// written `app::Order::price::basePrice`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SymbolPath(Vec<String>);

impl SymbolPath {
    pub const SEPARATOR: &'static str = "::";

    pub fn new(segments: Vec<String>) -> crate::Result<Self> {
        if segments.is_empty() {
            return Err(ModelError::UnresolvedPath("empty path".into()));
        }
        if let Some(bad) = segments.iter().find(|s| !is_valid_segment(s)) {
            return Err(ModelError::UnresolvedPath(format!(
                "invalid path segment `{bad}`"
            )));
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last segment: the symbol's own name.
    pub fn name(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    pub fn parent(&self) -> Option<SymbolPath> {
        (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn join(&self, name: &str) -> crate::Result<SymbolPath> {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self::new(segments)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.contains(':')
        && !segment.chars().any(char::is_whitespace)
}

impl FromStr for SymbolPath {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim().split(Self::SEPARATOR).map(str::to_string).collect())
    }
}

impl TryFrom<String> for SymbolPath {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SymbolPath> for String {
    fn from(path: SymbolPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for SymbolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(Self::SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_and_display() {
        let path: SymbolPath = "app::Order::price".parse().unwrap();
        assert_eq!(path.segments(), ["app", "Order", "price"]);
        assert_eq!(path.name(), "price");
        assert_eq!(path.to_string(), "app::Order::price");
        assert_eq!(path.parent().unwrap().to_string(), "app::Order");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!("".parse::<SymbolPath>().is_err());
        assert!("app::::Order".parse::<SymbolPath>().is_err());
        assert!("app::Ord er".parse::<SymbolPath>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let path: SymbolPath = "app::Order".parse().unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"app::Order\"");
        let back: SymbolPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn display_parse_roundtrip(
            segments in prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,8}", 1..5),
        ) {
            let path = SymbolPath::new(segments.clone()).unwrap();
            let reparsed: SymbolPath = path.to_string().parse().unwrap();
            prop_assert_eq!(reparsed.segments(), segments.as_slice());
        }
    }
}
