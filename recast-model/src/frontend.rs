// Front-end seam. A language front-end parses source into a `ProgramModel`
// and prints a model back; the engine never touches source text itself.
// `SnapshotFrontEnd` is the built-in front-end over the JSON snapshot format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Node, Parent, ProgramModel, Symbol};
use crate::validate::check_well_formed;
use crate::{ModelError, Result};

pub trait FrontEnd {
    type Source;

    fn load_model(&self, source: &Self::Source) -> Result<ProgramModel>;

    fn render(&self, model: &ProgramModel) -> Result<Self::Source>;
}

/// Serializable image of a model. Symbols are listed so that every scope's
/// members appear in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl ProgramModel {
    pub fn to_snapshot(&self) -> ModelSnapshot {
        let mut symbols = Vec::with_capacity(self.symbol_count());
        let mut stack: Vec<_> = self.roots().iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(symbol) = self.symbol(id) {
                symbols.push(symbol.clone());
            }
            stack.extend(self.members(id).iter().rev().copied());
        }
        ModelSnapshot {
            symbols,
            nodes: self.nodes().cloned().collect(),
        }
    }

    pub fn from_snapshot(snapshot: ModelSnapshot) -> Result<Self> {
        let mut model = ProgramModel::new();
        for symbol in snapshot.symbols {
            let id = symbol.id;
            if model.symbols.contains_key(&id) {
                return Err(ModelError::Snapshot(format!("duplicate symbol id {id}")));
            }
            match symbol.owner {
                Some(owner) => model.members.entry(owner).or_default().push(id),
                None => model.roots.push(id),
            }
            if let Some(body) = symbol.body {
                model.parents.insert(body, Parent::Body(id));
            }
            model.next_symbol = model.next_symbol.max(id.0 + 1);
            model.symbols.insert(id, symbol);
        }

        let mut parents = HashMap::new();
        for node in snapshot.nodes {
            let id = node.id;
            if model.nodes.contains_key(&id) {
                return Err(ModelError::Snapshot(format!("duplicate node id {id}")));
            }
            for child in &node.children {
                if parents.insert(*child, Parent::Node(id)).is_some() {
                    return Err(ModelError::Snapshot(format!("node {child} has two parents")));
                }
            }
            model.next_node = model.next_node.max(id.0 + 1);
            model.nodes.insert(id, node);
        }
        for (child, parent) in parents {
            if model.parents.insert(child, parent).is_some() {
                return Err(ModelError::Snapshot(format!(
                    "node {child} is both a body and a child"
                )));
            }
        }

        let violations = check_well_formed(&model);
        if !violations.is_empty() {
            return Err(ModelError::Snapshot(
                violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            ));
        }
        Ok(model)
    }
}

/// Front-end over pretty-printed JSON snapshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotFrontEnd;

impl FrontEnd for SnapshotFrontEnd {
    type Source = String;

    fn load_model(&self, source: &String) -> Result<ProgramModel> {
        let snapshot: ModelSnapshot =
            serde_json::from_str(source).map_err(|e| ModelError::Snapshot(e.to_string()))?;
        ProgramModel::from_snapshot(snapshot)
    }

    fn render(&self, model: &ProgramModel) -> Result<String> {
        serde_json::to_string_pretty(&model.to_snapshot())
            .map_err(|e| ModelError::Snapshot(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelBuilder;

    fn sample() -> ProgramModel {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let m = b.method(ty, "m");
        let _a = b.param(m, "a");
        let _z = b.param(m, "z");
        let read = b.read(f);
        let ret = b.ret(Some(read));
        b.body(m, vec![ret]);
        let zero = b.lit("0");
        b.init(f, zero);
        b.build().unwrap()
    }

    #[test]
    fn render_then_load_is_identity() {
        let model = sample();
        let text = SnapshotFrontEnd.render(&model).unwrap();
        let loaded = SnapshotFrontEnd.load_model(&text).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        let mut snapshot = sample().to_snapshot();
        snapshot.nodes.pop();
        let err = ProgramModel::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, ModelError::Snapshot(_)), "{err}");
    }

    #[test]
    fn invalid_json_is_a_snapshot_error() {
        let err = SnapshotFrontEnd.load_model(&"{ nope".to_string()).unwrap_err();
        assert!(matches!(err, ModelError::Snapshot(_)));
    }
}
