// Atomic, invertible edits.
//
// `ProgramModel::apply` validates an edit against the current state, performs
// it, and returns the edit that undoes it. Replaying the returned inverses in
// reverse order restores the model exactly (see the rollback tests below).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::model::{Node, Parent, ProgramModel, Symbol};
use crate::{ModelError, Modifiers, NodeId, NodeKind, Result, SymbolId, SymbolKind};

/// Insertion point for a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Anchor {
    /// Becomes the body (or initializer) of the symbol, which must have none.
    Body(SymbolId),
    /// Inserted among `parent`'s children at `index`.
    Child { parent: NodeId, index: usize },
}

/// Owned, detached tree of nodes. `root` is one of `nodes`; order is free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtree {
    pub root: NodeId,
    pub nodes: Vec<Node>,
}

/// What a referencing node points at, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub target: SymbolId,
}

impl NodeRef {
    pub fn new(kind: NodeKind, target: SymbolId) -> Self {
        Self { kind, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "snake_case")]
pub enum Edit {
    InsertSymbol {
        symbol: Symbol,
        /// Position among the owner's members; appended when absent.
        index: Option<usize>,
    },
    DeleteSymbol {
        id: SymbolId,
    },
    MoveSymbol {
        id: SymbolId,
        new_owner: SymbolId,
        index: Option<usize>,
    },
    RenameSymbol {
        id: SymbolId,
        new_name: String,
    },
    RewireReference {
        node: NodeId,
        from: NodeRef,
        to: NodeRef,
    },
    RetypeHierarchyEdge {
        ty: SymbolId,
        new_supertype: Option<SymbolId>,
    },
    ChangeModifiers {
        id: SymbolId,
        modifiers: Modifiers,
    },
    RetypeSymbol {
        id: SymbolId,
        type_ref: Option<SymbolId>,
    },
    SetTag {
        id: SymbolId,
        key: String,
        value: Option<String>,
    },
    InsertSubtree {
        subtree: Subtree,
        at: Anchor,
    },
    RemoveSubtree {
        root: NodeId,
    },
    MoveSubtree {
        root: NodeId,
        to: Anchor,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditKind {
    InsertSymbol,
    DeleteSymbol,
    MoveSymbol,
    RenameSymbol,
    RewireReference,
    RetypeHierarchyEdge,
    ChangeModifiers,
    RetypeSymbol,
    SetTag,
    InsertSubtree,
    RemoveSubtree,
    MoveSubtree,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertSymbol => "InsertSymbol",
            Self::DeleteSymbol => "DeleteSymbol",
            Self::MoveSymbol => "MoveSymbol",
            Self::RenameSymbol => "RenameSymbol",
            Self::RewireReference => "RewireReference",
            Self::RetypeHierarchyEdge => "RetypeHierarchyEdge",
            Self::ChangeModifiers => "ChangeModifiers",
            Self::RetypeSymbol => "RetypeSymbol",
            Self::SetTag => "SetTag",
            Self::InsertSubtree => "InsertSubtree",
            Self::RemoveSubtree => "RemoveSubtree",
            Self::MoveSubtree => "MoveSubtree",
        }
    }
}

impl std::fmt::Display for EditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity an edit touches, for before/after state capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    Symbol(SymbolId),
    Node(NodeId),
}

impl Edit {
    pub fn kind(&self) -> EditKind {
        match self {
            Self::InsertSymbol { .. } => EditKind::InsertSymbol,
            Self::DeleteSymbol { .. } => EditKind::DeleteSymbol,
            Self::MoveSymbol { .. } => EditKind::MoveSymbol,
            Self::RenameSymbol { .. } => EditKind::RenameSymbol,
            Self::RewireReference { .. } => EditKind::RewireReference,
            Self::RetypeHierarchyEdge { .. } => EditKind::RetypeHierarchyEdge,
            Self::ChangeModifiers { .. } => EditKind::ChangeModifiers,
            Self::RetypeSymbol { .. } => EditKind::RetypeSymbol,
            Self::SetTag { .. } => EditKind::SetTag,
            Self::InsertSubtree { .. } => EditKind::InsertSubtree,
            Self::RemoveSubtree { .. } => EditKind::RemoveSubtree,
            Self::MoveSubtree { .. } => EditKind::MoveSubtree,
        }
    }

    pub fn subject(&self) -> Subject {
        match self {
            Self::InsertSymbol { symbol, .. } => Subject::Symbol(symbol.id),
            Self::DeleteSymbol { id }
            | Self::MoveSymbol { id, .. }
            | Self::RenameSymbol { id, .. }
            | Self::ChangeModifiers { id, .. }
            | Self::RetypeSymbol { id, .. }
            | Self::SetTag { id, .. } => Subject::Symbol(*id),
            Self::RetypeHierarchyEdge { ty, .. } => Subject::Symbol(*ty),
            Self::RewireReference { node, .. } => Subject::Node(*node),
            Self::InsertSubtree { subtree, .. } => Subject::Node(subtree.root),
            Self::RemoveSubtree { root } | Self::MoveSubtree { root, .. } => Subject::Node(*root),
        }
    }
}

impl ProgramModel {
    /// Apply one edit and return its inverse.
    pub fn apply(&mut self, edit: &Edit) -> Result<Edit> {
        let inverse = match edit {
            Edit::InsertSymbol { symbol, index } => self.insert_symbol(symbol.clone(), *index)?,
            Edit::DeleteSymbol { id } => self.delete_symbol(*id)?,
            Edit::MoveSymbol {
                id,
                new_owner,
                index,
            } => self.move_symbol(*id, *new_owner, *index)?,
            Edit::RenameSymbol { id, new_name } => self.rename_symbol(*id, new_name)?,
            Edit::RewireReference { node, from, to } => self.rewire(*node, *from, *to)?,
            Edit::RetypeHierarchyEdge { ty, new_supertype } => {
                self.retype_hierarchy(*ty, *new_supertype)?
            }
            Edit::ChangeModifiers { id, modifiers } => self.change_modifiers(*id, *modifiers)?,
            Edit::RetypeSymbol { id, type_ref } => self.retype_symbol(*id, *type_ref)?,
            Edit::SetTag { id, key, value } => self.set_tag(*id, key, value.clone())?,
            Edit::InsertSubtree { subtree, at } => self.insert_subtree(subtree.clone(), *at)?,
            Edit::RemoveSubtree { root } => self.remove_subtree(*root)?,
            Edit::MoveSubtree { root, to } => self.move_subtree(*root, *to)?,
        };
        self.revision += 1;
        trace!(kind = %edit.kind(), revision = self.revision, "edit applied");
        Ok(inverse)
    }

    /// JSON rendering of an entity's current state; `null` when absent.
    pub fn state_of(&self, subject: Subject) -> serde_json::Value {
        match subject {
            Subject::Symbol(id) => match self.symbols.get(&id) {
                Some(symbol) => serde_json::json!({
                    "path": self.qualified_name(id),
                    "symbol": symbol,
                }),
                None => serde_json::Value::Null,
            },
            Subject::Node(id) => match self.nodes.get(&id) {
                Some(node) => serde_json::json!({
                    "node": id,
                    "kind": node.kind,
                    "symbol": node.symbol.map(|s| self.qualified_name(s)),
                    "position": self.position(id),
                    "enclosing": self.enclosing_symbol(id).map(|s| self.qualified_name(s)),
                    "shape": self.shape(id),
                }),
                None => serde_json::Value::Null,
            },
        }
    }

    // ── Symbol edits ──────────────────────────────────────────────────

    fn scope_label(&self, owner: Option<SymbolId>) -> String {
        owner.map_or_else(|| "<root>".to_string(), |o| self.qualified_name(o))
    }

    fn check_name_free(
        &self,
        owner: Option<SymbolId>,
        name: &str,
        except: Option<SymbolId>,
    ) -> Result<()> {
        match self.member_named(owner, name) {
            Some(existing) if Some(existing) != except => Err(ModelError::NameCollision {
                scope: self.scope_label(owner),
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn check_owner(&self, kind: SymbolKind, owner: Option<SymbolId>) -> Result<()> {
        let owner_kind = match owner {
            Some(id) => Some(self.require(id)?.kind),
            None => None,
        };
        if kind.may_be_owned_by(owner_kind) {
            Ok(())
        } else {
            Err(ModelError::InvalidEdit(format!(
                "a {kind} cannot be declared in {}",
                owner_kind.map_or("the root scope", |k| k.as_str())
            )))
        }
    }

    fn check_type_target(&self, target: Option<SymbolId>) -> Result<()> {
        match target {
            Some(id) if self.require(id)?.kind != SymbolKind::Type => Err(ModelError::InvalidEdit(
                format!("{} is not a type", self.qualified_name(id)),
            )),
            _ => Ok(()),
        }
    }

    fn scope_mut(&mut self, owner: Option<SymbolId>) -> &mut Vec<SymbolId> {
        match owner {
            Some(owner) => self.members.entry(owner).or_default(),
            None => &mut self.roots,
        }
    }

    /// Remove `id` from its scope and return the index it occupied.
    fn detach_member(&mut self, owner: Option<SymbolId>, id: SymbolId) -> usize {
        let scope = self.scope_mut(owner);
        let index = scope.iter().position(|m| *m == id).unwrap_or(scope.len());
        if index < scope.len() {
            scope.remove(index);
        }
        if let Some(owner) = owner {
            if self.members.get(&owner).is_some_and(Vec::is_empty) {
                self.members.remove(&owner);
            }
        }
        index
    }

    fn attach_member(&mut self, owner: Option<SymbolId>, id: SymbolId, index: Option<usize>) {
        let scope = self.scope_mut(owner);
        let at = index.unwrap_or(scope.len()).min(scope.len());
        scope.insert(at, id);
    }

    fn insert_symbol(&mut self, symbol: Symbol, index: Option<usize>) -> Result<Edit> {
        if self.symbols.contains_key(&symbol.id) {
            return Err(ModelError::InvalidEdit(format!("{} already exists", symbol.id)));
        }
        if symbol.name.is_empty() {
            return Err(ModelError::InvalidEdit("symbol name is empty".into()));
        }
        if symbol.body.is_some() {
            return Err(ModelError::InvalidEdit(
                "symbols are inserted without a body".into(),
            ));
        }
        self.check_owner(symbol.kind, symbol.owner)?;
        self.check_name_free(symbol.owner, &symbol.name, None)?;
        self.check_type_target(symbol.type_ref)?;
        if symbol.supertype.is_some() {
            if symbol.kind != SymbolKind::Type {
                return Err(ModelError::InvalidEdit("only types have supertypes".into()));
            }
            self.check_type_target(symbol.supertype)?;
        }
        let id = symbol.id;
        let owner = symbol.owner;
        self.next_symbol = self.next_symbol.max(id.0 + 1);
        self.symbols.insert(id, symbol);
        self.attach_member(owner, id, index);
        Ok(Edit::DeleteSymbol { id })
    }

    /// Sites still naming `id`: nodes, declared types and supertype links.
    pub fn users_of_symbol(&self, id: SymbolId) -> usize {
        let nodes = self.nodes.values().filter(|n| n.symbol == Some(id)).count();
        let symbols = self
            .symbols
            .values()
            .filter(|s| s.type_ref == Some(id) || s.supertype == Some(id))
            .count();
        nodes + symbols
    }

    fn delete_symbol(&mut self, id: SymbolId) -> Result<Edit> {
        let symbol = self.require(id)?;
        if !self.members(id).is_empty() {
            return Err(ModelError::InvalidEdit(format!(
                "{} still declares members",
                self.qualified_name(id)
            )));
        }
        if symbol.body.is_some() {
            return Err(ModelError::InvalidEdit(format!(
                "{} still has a body",
                self.qualified_name(id)
            )));
        }
        let users = self.users_of_symbol(id);
        if users > 0 {
            return Err(ModelError::DanglingReference {
                symbol: self.qualified_name(id),
                users,
            });
        }
        let owner = symbol.owner;
        let index = self.detach_member(owner, id);
        let symbol = self
            .symbols
            .remove(&id)
            .ok_or(ModelError::UnknownSymbol(id))?;
        Ok(Edit::InsertSymbol {
            symbol,
            index: Some(index),
        })
    }

    fn move_symbol(
        &mut self,
        id: SymbolId,
        new_owner: SymbolId,
        index: Option<usize>,
    ) -> Result<Edit> {
        let symbol = self.require(id)?;
        let (kind, name, old_owner) = (symbol.kind, symbol.name.clone(), symbol.owner);
        let Some(old_owner) = old_owner else {
            return Err(ModelError::InvalidEdit("root modules cannot be moved".into()));
        };
        self.require(new_owner)?;
        if self.is_declared_within(new_owner, id) {
            return Err(ModelError::InvalidEdit(format!(
                "cannot move {} inside itself",
                self.qualified_name(id)
            )));
        }
        self.check_owner(kind, Some(new_owner))?;
        self.check_name_free(Some(new_owner), &name, Some(id))?;
        let old_index = self.detach_member(Some(old_owner), id);
        self.attach_member(Some(new_owner), id, index);
        if let Some(symbol) = self.symbols.get_mut(&id) {
            symbol.owner = Some(new_owner);
        }
        Ok(Edit::MoveSymbol {
            id,
            new_owner: old_owner,
            index: Some(old_index),
        })
    }

    fn rename_symbol(&mut self, id: SymbolId, new_name: &str) -> Result<Edit> {
        let symbol = self.require(id)?;
        if new_name.is_empty() {
            return Err(ModelError::InvalidEdit("symbol name is empty".into()));
        }
        let owner = symbol.owner;
        let old_name = symbol.name.clone();
        self.check_name_free(owner, new_name, Some(id))?;
        if let Some(symbol) = self.symbols.get_mut(&id) {
            symbol.name = new_name.to_string();
        }
        Ok(Edit::RenameSymbol {
            id,
            new_name: old_name,
        })
    }

    fn rewire(&mut self, node: NodeId, from: NodeRef, to: NodeRef) -> Result<Edit> {
        let current = self.require_node(node)?;
        if current.kind != from.kind || current.symbol != Some(from.target) {
            return Err(ModelError::InvalidEdit(format!(
                "stale rewire: {node} is not a {} of {}",
                from.kind, from.target
            )));
        }
        if !to.kind.is_referencing() {
            return Err(ModelError::InvalidEdit(format!(
                "{} nodes do not reference symbols",
                to.kind
            )));
        }
        self.require(to.target)?;
        if let Some(n) = self.nodes.get_mut(&node) {
            n.kind = to.kind;
            n.symbol = Some(to.target);
        }
        Ok(Edit::RewireReference {
            node,
            from: to,
            to: from,
        })
    }

    fn retype_hierarchy(&mut self, ty: SymbolId, new_supertype: Option<SymbolId>) -> Result<Edit> {
        if self.require(ty)?.kind != SymbolKind::Type {
            return Err(ModelError::InvalidEdit(format!(
                "{} is not a type",
                self.qualified_name(ty)
            )));
        }
        self.check_type_target(new_supertype)?;
        if let Some(sup) = new_supertype {
            if sup == ty || self.supertypes(sup).contains(&ty) {
                return Err(ModelError::InvalidEdit(format!(
                    "making {} extend {} would create an inheritance cycle",
                    self.qualified_name(ty),
                    self.qualified_name(sup)
                )));
            }
        }
        let old = self.symbols.get_mut(&ty).and_then(|s| {
            let old = s.supertype;
            s.supertype = new_supertype;
            old
        });
        Ok(Edit::RetypeHierarchyEdge {
            ty,
            new_supertype: old,
        })
    }

    fn change_modifiers(&mut self, id: SymbolId, modifiers: Modifiers) -> Result<Edit> {
        self.require(id)?;
        let symbol = self.symbols.get_mut(&id).ok_or(ModelError::UnknownSymbol(id))?;
        let old = std::mem::replace(&mut symbol.modifiers, modifiers);
        Ok(Edit::ChangeModifiers { id, modifiers: old })
    }

    fn retype_symbol(&mut self, id: SymbolId, type_ref: Option<SymbolId>) -> Result<Edit> {
        self.require(id)?;
        self.check_type_target(type_ref)?;
        let symbol = self.symbols.get_mut(&id).ok_or(ModelError::UnknownSymbol(id))?;
        let old = std::mem::replace(&mut symbol.type_ref, type_ref);
        Ok(Edit::RetypeSymbol { id, type_ref: old })
    }

    fn set_tag(&mut self, id: SymbolId, key: &str, value: Option<String>) -> Result<Edit> {
        let symbol = self.symbols.get_mut(&id).ok_or(ModelError::UnknownSymbol(id))?;
        let old = match value {
            Some(value) => symbol.tags.insert(key.to_string(), value),
            None => symbol.tags.remove(key),
        };
        Ok(Edit::SetTag {
            id,
            key: key.to_string(),
            value: old,
        })
    }

    // ── Tree edits ────────────────────────────────────────────────────

    fn check_anchor(&self, at: Anchor) -> Result<()> {
        match at {
            Anchor::Body(symbol) => {
                let s = self.require(symbol)?;
                if !matches!(s.kind, SymbolKind::Method | SymbolKind::Field) {
                    return Err(ModelError::InvalidEdit(format!(
                        "a {} has no body",
                        s.kind
                    )));
                }
                if s.body.is_some() {
                    return Err(ModelError::InvalidEdit(format!(
                        "{} already has a body",
                        self.qualified_name(symbol)
                    )));
                }
            }
            Anchor::Child { parent, index } => {
                let p = self.require_node(parent)?;
                if index > p.children.len() {
                    return Err(ModelError::InvalidEdit(format!(
                        "index {index} is out of bounds for {parent} ({} children)",
                        p.children.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Hang an already-stored, detached root at `at`.
    fn attach_root(&mut self, root: NodeId, at: Anchor) {
        match at {
            Anchor::Body(symbol) => {
                if let Some(s) = self.symbols.get_mut(&symbol) {
                    s.body = Some(root);
                }
                self.parents.insert(root, Parent::Body(symbol));
            }
            Anchor::Child { parent, index } => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.insert(index, root);
                }
                self.parents.insert(root, Parent::Node(parent));
            }
        }
    }

    /// Unhook an attached root and return where it was.
    fn detach_root(&mut self, root: NodeId) -> Result<Anchor> {
        let anchor = self
            .position(root)
            .ok_or_else(|| ModelError::InvalidEdit(format!("{root} is not attached")))?;
        match anchor {
            Anchor::Body(symbol) => {
                if let Some(s) = self.symbols.get_mut(&symbol) {
                    s.body = None;
                }
            }
            Anchor::Child { parent, index } => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.remove(index);
                }
            }
        }
        self.parents.remove(&root);
        Ok(anchor)
    }

    fn insert_subtree(&mut self, subtree: Subtree, at: Anchor) -> Result<Edit> {
        let Subtree { root, nodes } = subtree;
        let ids: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        if ids.len() != nodes.len() || !ids.contains(&root) {
            return Err(ModelError::InvalidEdit("malformed subtree".into()));
        }
        if let Some(clash) = ids.iter().find(|id| self.nodes.contains_key(id)) {
            return Err(ModelError::InvalidEdit(format!("{clash} already exists")));
        }
        let mut seen_as_child = HashSet::new();
        for node in &nodes {
            for child in &node.children {
                if !ids.contains(child) || *child == root || !seen_as_child.insert(*child) {
                    return Err(ModelError::InvalidEdit(format!(
                        "subtree child {child} is missing or shared"
                    )));
                }
            }
            if let Some(symbol) = node.symbol {
                self.require(symbol)?;
            }
        }
        if seen_as_child.len() + 1 != nodes.len() {
            return Err(ModelError::InvalidEdit("subtree is not connected".into()));
        }
        if let Anchor::Child { parent, .. } = at {
            if ids.contains(&parent) {
                return Err(ModelError::InvalidEdit("subtree anchored inside itself".into()));
            }
        }
        self.check_anchor(at)?;

        let max = nodes.iter().map(|n| n.id.0).max().unwrap_or(0);
        self.next_node = self.next_node.max(max + 1);
        for node in nodes {
            for child in &node.children {
                self.parents.insert(*child, Parent::Node(node.id));
            }
            self.nodes.insert(node.id, node);
        }
        self.attach_root(root, at);
        Ok(Edit::RemoveSubtree { root })
    }

    fn remove_subtree(&mut self, root: NodeId) -> Result<Edit> {
        let subtree = self.subtree(root)?;
        let at = self.detach_root(root)?;
        for node in &subtree.nodes {
            self.nodes.remove(&node.id);
            self.parents.remove(&node.id);
        }
        Ok(Edit::InsertSubtree { subtree, at })
    }

    fn move_subtree(&mut self, root: NodeId, to: Anchor) -> Result<Edit> {
        self.require_node(root)?;
        if let Anchor::Child { parent, .. } = to {
            self.require_node(parent)?;
            if self.is_within(parent, root) {
                return Err(ModelError::InvalidEdit(format!(
                    "cannot move {root} inside itself"
                )));
            }
        }
        let from = self.detach_root(root)?;
        if let Err(err) = self.check_anchor(to) {
            self.attach_root(root, from);
            return Err(err);
        }
        self.attach_root(root, to);
        Ok(Edit::MoveSubtree { root, to: from })
    }
}
