// Precondition Analyzer: decides whether a recipe applies to a target.
//
// Every predicate is a pure function of the model and the reference index.
// The analyzer refuses to run against an index built for another revision.

pub mod checks;
pub mod similarity;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use recast_model::{NodeId, ProgramModel, ReferenceIndex, Symbol, SymbolId};

use crate::config::AnalysisSection;
use crate::engine::{Binding, Bindings};
use crate::error::RefactoringError;
use crate::params::Params;
use crate::registry::RefactoringDescriptor;

// ── Verdicts ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    NameCollision,
    PolymorphicOverride,
    ExternalUse,
    Dissimilar,
}

/// A sub-condition that must be resolved before the recipe can apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
    /// Recipe that may make the target eligible when applied first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            conflicts: Vec::new(),
            suggestion: None,
        }
    }

    pub fn with_conflict(
        mut self,
        kind: ConflictKind,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        self.conflicts.push(Conflict {
            kind,
            subject: subject.into(),
            detail: detail.into(),
        });
        self
    }

    pub fn suggest(mut self, recipe: &str) -> Self {
        self.suggestion = Some(recipe.to_string());
        self
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)?;
        for conflict in &self.conflicts {
            write!(f, "; {}: {}", conflict.subject, conflict.detail)?;
        }
        if let Some(recipe) = &self.suggestion {
            write!(f, " (try {recipe} first)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Accepted => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }
}

impl From<Check> for Verdict {
    fn from(check: Check) -> Self {
        match check {
            Ok(()) => Self::Accepted,
            Err(rejection) => Self::Rejected(rejection),
        }
    }
}

/// Outcome of one predicate.
pub type Check = Result<(), Rejection>;

pub fn reject<T>(reason: impl Into<String>) -> Result<T, Rejection> {
    Err(Rejection::new(reason))
}

// ── Predicate inputs ──────────────────────────────────────────────────

/// Everything a precondition may look at.
#[derive(Debug, Clone, Copy)]
pub struct Analysis<'a> {
    pub model: &'a ProgramModel,
    pub index: &'a ReferenceIndex,
    pub target: SymbolId,
    pub params: &'a Params,
    pub config: &'a AnalysisSection,
}

impl<'a> Analysis<'a> {
    pub fn symbol(&self) -> Result<&'a Symbol, Rejection> {
        self.model
            .symbol(self.target)
            .ok_or_else(|| Rejection::new(format!("target {} does not exist", self.target)))
    }

    pub fn name(&self) -> String {
        self.model.qualified_name(self.target)
    }
}

/// Everything a postcondition may look at: the mutated model, a freshly
/// derived index, and what the steps bound while running.
#[derive(Debug, Clone, Copy)]
pub struct Verification<'a> {
    pub model: &'a ProgramModel,
    pub index: &'a ReferenceIndex,
    pub target: SymbolId,
    pub params: &'a Params,
    pub bindings: &'a Bindings,
}

impl Verification<'_> {
    pub fn symbol(&self, key: &str) -> Option<SymbolId> {
        match self.bindings.get(key)? {
            Binding::Symbol(id) => Some(*id),
            _ => None,
        }
    }

    pub fn symbols(&self, key: &str) -> Vec<SymbolId> {
        match self.bindings.get(key) {
            Some(Binding::Symbol(id)) => vec![*id],
            Some(Binding::Symbols(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn nodes(&self, key: &str) -> Vec<NodeId> {
        match self.bindings.get(key) {
            Some(Binding::Node(id)) => vec![*id],
            Some(Binding::Nodes(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }

    /// Fails unless the bound symbol exists in the model.
    pub fn exists(&self, key: &str) -> Check {
        match self.symbol(key) {
            Some(id) if self.model.symbol(id).is_some() => Ok(()),
            _ => reject(format!("`{key}` is missing after the edits")),
        }
    }

    pub fn target_exists(&self) -> bool {
        self.model.symbol(self.target).is_some()
    }
}

// ── Analyzer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct PreconditionAnalyzer<'c> {
    config: &'c AnalysisSection,
}

impl<'c> PreconditionAnalyzer<'c> {
    pub fn new(config: &'c AnalysisSection) -> Self {
        Self { config }
    }

    /// Check the target shape, then the recipe predicate.
    pub fn check(
        &self,
        descriptor: &RefactoringDescriptor,
        target: SymbolId,
        params: &Params,
        model: &ProgramModel,
        index: &ReferenceIndex,
    ) -> Result<Verdict, RefactoringError> {
        if !index.is_current(model) {
            return Err(RefactoringError::StaleIndex {
                index: index.revision(),
                model: model.revision(),
            });
        }
        let analysis = Analysis {
            model,
            index,
            target,
            params,
            config: self.config,
        };
        let verdict: Verdict = descriptor
            .shape
            .check(model, target)
            .and_then(|()| (descriptor.precondition)(&analysis))
            .into();
        match &verdict {
            Verdict::Accepted => debug!(
                recipe = descriptor.name(),
                target = %analysis.name(),
                "precondition accepted"
            ),
            Verdict::Rejected(rejection) => warn!(
                recipe = descriptor.name(),
                target = %analysis.name(),
                reason = %rejection.reason,
                "precondition rejected"
            ),
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_display_lists_conflicts_and_suggestion() {
        let rejection = Rejection::new("assigned more than once")
            .with_conflict(ConflictKind::NameCollision, "app::T", "`x` is taken")
            .suggest("SplitTemporaryVariable");
        assert_eq!(
            rejection.to_string(),
            "assigned more than once; app::T: `x` is taken (try SplitTemporaryVariable first)"
        );
    }

    #[test]
    fn verdict_serializes_with_tag() {
        let verdict = Verdict::Rejected(Rejection::new("parameter still read"));
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["verdict"], "rejected");
        assert_eq!(json["reason"], "parameter still read");
        let accepted = serde_json::to_value(Verdict::Accepted).unwrap();
        assert_eq!(accepted["verdict"], "accepted");
    }
}
