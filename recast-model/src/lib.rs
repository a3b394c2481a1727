pub mod builder;
pub mod edit;
pub mod frontend;
pub mod index;
pub mod model;
pub mod path;
pub mod validate;

use serde::{Deserialize, Serialize};

pub use builder::ModelBuilder;
pub use edit::{Anchor, Edit, EditKind, NodeRef, Subject, Subtree};
pub use frontend::{FrontEnd, ModelSnapshot, SnapshotFrontEnd};
pub use index::{AccessMode, ReferenceEdge, ReferenceIndex, Site, StatementRange};
pub use model::{Node, Parent, ProgramModel, Symbol};
pub use path::SymbolPath;
pub use validate::{Violation, check_well_formed};

/// Error type for structural edits on the program model.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The target scope already declares a symbol with this name.
    #[error("Name collision: `{name}` is already declared in {scope}")]
    NameCollision { scope: String, name: String },

    /// Deleting the symbol would orphan reference sites.
    #[error("Dangling reference: {symbol} is still referenced by {users} site(s)")]
    DanglingReference { symbol: String, users: usize },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(SymbolId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// The edit is structurally impossible (wrong owner kind, stale rewire, cycle).
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Unresolved path: {0}")]
    UnresolvedPath(String),

    /// A front-end snapshot could not be turned into a well-formed model.
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

// ── IDs ────────────────────────────────────────────────────────────

macro_rules! typed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(id: u32) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(SymbolId, "s");
typed_id!(NodeId, "n");

// ── Span type ──────────────────────────────────────────────────────

/// Source position supplied by the front-end. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

// ── Symbol kind ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Module,
    Type,
    Method,
    Field,
    Parameter,
    Local,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "Module",
            Self::Type => "Type",
            Self::Method => "Method",
            Self::Field => "Field",
            Self::Parameter => "Parameter",
            Self::Local => "Local",
        }
    }

    /// Whether a symbol of this kind may be declared inside `owner`.
    ///
    /// `None` stands for the model root, which only holds modules.
    pub fn may_be_owned_by(self, owner: Option<SymbolKind>) -> bool {
        match (self, owner) {
            (Self::Module, None | Some(Self::Module))
            | (Self::Type, Some(Self::Module | Self::Type))
            | (Self::Method | Self::Field, Some(Self::Module | Self::Type))
            | (Self::Parameter | Self::Local, Some(Self::Method)) => true,
            _ => false,
        }
    }

    /// Kinds whose value can be read or assigned.
    pub fn is_variable(self) -> bool {
        matches!(self, Self::Field | Self::Parameter | Self::Local)
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Modifiers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Package,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Package => "package",
            Self::Private => "private",
        }
    }
}

/// Visibility and mutability tags of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Modifiers {
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_constructor: bool,
}

impl Modifiers {
    pub fn private() -> Self {
        Self {
            visibility: Visibility::Private,
            ..Self::default()
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn finalized(mut self) -> Self {
        self.is_final = true;
        self
    }
}

// ── Node kind ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    /// Statement sequence.
    Block,
    /// `symbol = children[0]`.
    Assign,
    /// Invocation of `symbol`; children are the arguments.
    Call,
    /// Instantiation of the type `symbol`; children are the arguments.
    New,
    /// Read of `symbol`.
    Reference,
    /// Member access: `children[0]` is the receiver, `children[1]` the member.
    Select,
    This,
    Literal,
    /// Operator named by `text` applied to the children.
    Operator,
    /// `[condition, then-block, else-block?]`.
    Conditional,
    /// `[condition, body-block]`.
    Loop,
    Return,
    Break,
    Throw,
    /// `[body-block, handler-block]`.
    Try,
    Assert,
    /// Conversion of `children[0]` to the type `symbol`.
    Cast,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "Block",
            Self::Assign => "Assign",
            Self::Call => "Call",
            Self::New => "New",
            Self::Reference => "Reference",
            Self::Select => "Select",
            Self::This => "This",
            Self::Literal => "Literal",
            Self::Operator => "Operator",
            Self::Conditional => "Conditional",
            Self::Loop => "Loop",
            Self::Return => "Return",
            Self::Break => "Break",
            Self::Throw => "Throw",
            Self::Try => "Try",
            Self::Assert => "Assert",
            Self::Cast => "Cast",
        }
    }

    /// Kinds that name a symbol and therefore produce reference edges.
    pub fn is_referencing(self) -> bool {
        matches!(
            self,
            Self::Assign | Self::Call | Self::New | Self::Reference | Self::Cast
        )
    }

    /// Kinds that only ever appear in statement position.
    pub fn is_statement(self) -> bool {
        matches!(
            self,
            Self::Block
                | Self::Assign
                | Self::Conditional
                | Self::Loop
                | Self::Return
                | Self::Break
                | Self::Throw
                | Self::Try
                | Self::Assert
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(SymbolId(7).to_string(), "s7");
        assert_eq!(NodeId(12).to_string(), "n12");
    }

    #[test]
    fn ownership_rules() {
        assert!(SymbolKind::Module.may_be_owned_by(None));
        assert!(SymbolKind::Type.may_be_owned_by(Some(SymbolKind::Module)));
        assert!(SymbolKind::Local.may_be_owned_by(Some(SymbolKind::Method)));
        assert!(!SymbolKind::Local.may_be_owned_by(Some(SymbolKind::Type)));
        assert!(!SymbolKind::Field.may_be_owned_by(None));
        assert!(!SymbolKind::Method.may_be_owned_by(Some(SymbolKind::Method)));
    }

    #[test]
    fn modifiers_serde_defaults() {
        let m: Modifiers = serde_json::from_str("{}").unwrap();
        assert_eq!(m, Modifiers::default());
        assert_eq!(m.visibility, Visibility::Public);
    }
}
