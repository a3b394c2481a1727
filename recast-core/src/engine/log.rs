// EditLog: the ordered audit record of one recipe application.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use recast_model::{Edit, EditKind, NodeId, ProgramModel, SymbolId};

use crate::params::Params;

/// Something a step produced that later steps or the postcondition need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    Symbol(SymbolId),
    Symbols(Vec<SymbolId>),
    Node(NodeId),
    Nodes(Vec<NodeId>),
    Name(String),
}

pub type Bindings = BTreeMap<String, Binding>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEdit {
    pub seq: usize,
    /// Step that issued the edit; nested recipes are prefixed `Recipe/step`.
    pub step: String,
    pub kind: EditKind,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub edit: Edit,
    pub inverse: Edit,
}

/// One `(editKind, beforeState, afterState)` row, the form a diff viewer
/// renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditTriple<'a> {
    pub kind: EditKind,
    pub before: &'a serde_json::Value,
    pub after: &'a serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditLog {
    pub transaction: Uuid,
    pub recipe: String,
    pub target: String,
    pub params: Params,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<AppliedEdit>,
    #[serde(default)]
    pub bindings: Bindings,
}

impl EditLog {
    pub fn new(recipe: &str, target: String, params: Params) -> Self {
        Self {
            transaction: Uuid::new_v4(),
            recipe: recipe.to_string(),
            target,
            params,
            started_at: Utc::now(),
            entries: Vec::new(),
            bindings: Bindings::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(
        &mut self,
        step: String,
        before: serde_json::Value,
        after: serde_json::Value,
        edit: Edit,
        inverse: Edit,
    ) {
        let seq = self.entries.len();
        self.entries.push(AppliedEdit {
            seq,
            step,
            kind: edit.kind(),
            before,
            after,
            edit,
            inverse,
        });
    }

    pub fn triples(&self) -> Vec<AuditTriple<'_>> {
        self.entries
            .iter()
            .map(|e| AuditTriple {
                kind: e.kind,
                before: &e.before,
                after: &e.after,
            })
            .collect()
    }

    /// Count of edits per kind.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Replay every inverse in reverse order.
    ///
    /// Each inverse was produced against the state its forward edit left
    /// behind, so replaying newest-first walks the model back through every
    /// intermediate state. A failure here means the model was touched
    /// outside this log.
    pub fn revert(&self, model: &mut ProgramModel) -> recast_model::Result<()> {
        for entry in self.entries.iter().rev() {
            model.apply(&entry.inverse)?;
        }
        debug!(
            transaction = %self.transaction,
            edits = self.entries.len(),
            "edit log reverted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_model::{ModelBuilder, Subject};

    #[test]
    fn revert_restores_the_model() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let mut model = b.build().unwrap();
        let original = model.clone();

        let mut log = EditLog::new("RenameField", "app::T::f".into(), Params::new());
        for name in ["g", "h"] {
            let edit = Edit::RenameSymbol {
                id: f,
                new_name: name.into(),
            };
            let before = model.state_of(Subject::Symbol(f));
            let inverse = model.apply(&edit).unwrap();
            let after = model.state_of(Subject::Symbol(f));
            log.push("rename".into(), before, after, edit, inverse);
        }
        assert_eq!(model.symbol(f).unwrap().name, "h");
        assert_eq!(log.summary()["RenameSymbol"], 2);
        assert_eq!(log.triples()[0].after["path"], "app::T::g");

        log.revert(&mut model).unwrap();
        assert_eq!(model, original);
    }

    #[test]
    fn log_serializes_entries() {
        let log = EditLog::new("InlineTemp", "app::T::m::x".into(), Params::new());
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["recipe"], "InlineTemp");
        assert!(json["entries"].as_array().unwrap().is_empty());
    }
}
