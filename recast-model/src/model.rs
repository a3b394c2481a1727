// The program model: a structural graph of symbols and the statement trees
// anchored at method bodies and field initializers.
//
// Symbols nest through `owner`; member order inside an owner is significant
// (parameter order). Statement and expression nodes form trees whose roots
// hang off `Symbol::body`. Reference edges are never stored here: they are
// derived by the `ReferenceIndex`.
//
// Every mutation goes through `ProgramModel::apply` (see `edit.rs`), which is
// the single place where the structural invariants are enforced.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::edit::{Anchor, Subtree};
use crate::path::SymbolPath;
use crate::{ModelError, Modifiers, NodeId, NodeKind, Result, Span, SymbolId, SymbolKind};

// ── Symbols ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub kind: SymbolKind,
    pub name: String,
    /// Declaring scope. `None` only for root modules.
    #[serde(default)]
    pub owner: Option<SymbolId>,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Declared type of a field, parameter or local; return type of a method.
    #[serde(default)]
    pub type_ref: Option<SymbolId>,
    /// Single-inheritance parent of a type.
    #[serde(default)]
    pub supertype: Option<SymbolId>,
    /// Root of a method body or field initializer.
    #[serde(default)]
    pub body: Option<NodeId>,
    /// Front-end and engine annotations (type codes, associations, variants).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Symbol {
    pub fn new(id: SymbolId, kind: SymbolKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            owner: None,
            modifiers: Modifiers::default(),
            type_ref: None,
            supertype: None,
            body: None,
            tags: BTreeMap::new(),
            span: None,
        }
    }

    pub fn owned_by(mut self, owner: SymbolId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_type(mut self, type_ref: Option<SymbolId>) -> Self {
        self.type_ref = type_ref;
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == SymbolKind::Method && self.modifiers.is_constructor
    }
}

// ── Nodes ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub symbol: Option<SymbolId>,
    /// Literal value or operator name.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            symbol: None,
            text: None,
            children: Vec::new(),
            span: None,
        }
    }

    pub fn with_symbol(mut self, symbol: SymbolId) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_children(mut self, children: Vec<NodeId>) -> Self {
        self.children = children;
        self
    }
}

/// Where an attached node hangs: directly off a symbol, or inside another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parent {
    Body(SymbolId),
    Node(NodeId),
}

// ── Model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ProgramModel {
    pub(crate) symbols: BTreeMap<SymbolId, Symbol>,
    /// Ordered members per owner. Owners without members have no entry.
    pub(crate) members: BTreeMap<SymbolId, Vec<SymbolId>>,
    pub(crate) roots: Vec<SymbolId>,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) parents: HashMap<NodeId, Parent>,
    pub(crate) next_symbol: u32,
    pub(crate) next_node: u32,
    pub(crate) revision: u64,
}

/// Structural identity: same symbols, same trees, same placement.
/// Id counters and the revision stamp are bookkeeping and do not count.
impl PartialEq for ProgramModel {
    fn eq(&self, other: &Self) -> bool {
        self.symbols == other.symbols
            && self.roots == other.roots
            && self.nodes == other.nodes
            && self.parents == other.parents
            && non_empty(&self.members).eq(non_empty(&other.members))
    }
}

impl Eq for ProgramModel {}

fn non_empty(
    members: &BTreeMap<SymbolId, Vec<SymbolId>>,
) -> impl Iterator<Item = (&SymbolId, &Vec<SymbolId>)> {
    members.iter().filter(|(_, list)| !list.is_empty())
}

impl ProgramModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented by every applied edit. The reference index records the
    /// revision it was derived from so staleness is detectable.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Order-independent hash of the structural state.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for symbol in self.symbols.values() {
            symbol.hash(&mut hasher);
        }
        for (owner, list) in non_empty(&self.members) {
            owner.hash(&mut hasher);
            list.hash(&mut hasher);
        }
        self.roots.hash(&mut hasher);
        for node in self.nodes.values() {
            node.hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn alloc_symbol_id(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    pub fn alloc_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    // ── Symbol queries ────────────────────────────────────────────────

    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(&id)
    }

    pub fn require(&self, id: SymbolId) -> Result<&Symbol> {
        self.symbols.get(&id).ok_or(ModelError::UnknownSymbol(id))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn roots(&self) -> &[SymbolId] {
        &self.roots
    }

    pub fn members(&self, owner: SymbolId) -> &[SymbolId] {
        self.members.get(&owner).map_or(&[], Vec::as_slice)
    }

    pub fn members_of_kind(&self, owner: SymbolId, kind: SymbolKind) -> Vec<SymbolId> {
        self.members(owner)
            .iter()
            .copied()
            .filter(|id| self.symbols.get(id).is_some_and(|s| s.kind == kind))
            .collect()
    }

    pub fn params(&self, method: SymbolId) -> Vec<SymbolId> {
        self.members_of_kind(method, SymbolKind::Parameter)
    }

    pub fn locals(&self, method: SymbolId) -> Vec<SymbolId> {
        self.members_of_kind(method, SymbolKind::Local)
    }

    pub fn fields(&self, ty: SymbolId) -> Vec<SymbolId> {
        self.members_of_kind(ty, SymbolKind::Field)
    }

    /// Methods declared by `ty`, constructors excluded.
    pub fn methods(&self, ty: SymbolId) -> Vec<SymbolId> {
        self.members_of_kind(ty, SymbolKind::Method)
            .into_iter()
            .filter(|id| !self.symbols[id].modifiers.is_constructor)
            .collect()
    }

    pub fn constructors(&self, ty: SymbolId) -> Vec<SymbolId> {
        self.members_of_kind(ty, SymbolKind::Method)
            .into_iter()
            .filter(|id| self.symbols[id].modifiers.is_constructor)
            .collect()
    }

    /// Look a name up in a single scope. `None` is the root scope.
    pub fn member_named(&self, owner: Option<SymbolId>, name: &str) -> Option<SymbolId> {
        let scope = match owner {
            Some(owner) => self.members(owner),
            None => &self.roots,
        };
        scope
            .iter()
            .copied()
            .find(|id| self.symbols.get(id).is_some_and(|s| s.name == name))
    }

    /// Look a member name up in `ty` and then along its supertype chain.
    pub fn find_in_hierarchy(&self, ty: SymbolId, name: &str) -> Option<SymbolId> {
        std::iter::once(ty)
            .chain(self.supertypes(ty))
            .find_map(|t| self.member_named(Some(t), name))
    }

    /// Nearest enclosing type of `symbol` (exclusive).
    pub fn owning_type(&self, symbol: SymbolId) -> Option<SymbolId> {
        self.owner_chain(symbol)
            .into_iter()
            .find(|id| self.symbols[id].kind == SymbolKind::Type)
    }

    pub fn owning_module(&self, symbol: SymbolId) -> Option<SymbolId> {
        self.owner_chain(symbol)
            .into_iter()
            .find(|id| self.symbols[id].kind == SymbolKind::Module)
    }

    /// Owners of `symbol`, nearest first.
    pub fn owner_chain(&self, symbol: SymbolId) -> Vec<SymbolId> {
        let mut chain = Vec::new();
        let mut current = self.symbols.get(&symbol).and_then(|s| s.owner);
        while let Some(id) = current {
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = self.symbols.get(&id).and_then(|s| s.owner);
        }
        chain
    }

    /// Whether `symbol` is `ancestor` or is (transitively) declared inside it.
    pub fn is_declared_within(&self, symbol: SymbolId, ancestor: SymbolId) -> bool {
        symbol == ancestor || self.owner_chain(symbol).contains(&ancestor)
    }

    pub fn qualified_name(&self, symbol: SymbolId) -> String {
        self.path_of(symbol)
            .map_or_else(|_| symbol.to_string(), |p| p.to_string())
    }

    pub fn path_of(&self, symbol: SymbolId) -> Result<SymbolPath> {
        let mut names = vec![self.require(symbol)?.name.clone()];
        for owner in self.owner_chain(symbol) {
            names.push(self.symbols[&owner].name.clone());
        }
        names.reverse();
        SymbolPath::new(names)
    }

    pub fn resolve(&self, path: &SymbolPath) -> Result<SymbolId> {
        let mut current: Option<SymbolId> = None;
        for segment in path.segments() {
            current = Some(
                self.member_named(current, segment)
                    .ok_or_else(|| ModelError::UnresolvedPath(path.to_string()))?,
            );
        }
        current.ok_or_else(|| ModelError::UnresolvedPath(path.to_string()))
    }

    // ── Hierarchy queries ─────────────────────────────────────────────

    /// Supertype chain of `ty`, nearest first. Stops on a cycle.
    pub fn supertypes(&self, ty: SymbolId) -> Vec<SymbolId> {
        let mut chain = Vec::new();
        let mut current = self.symbols.get(&ty).and_then(|s| s.supertype);
        while let Some(id) = current {
            if id == ty || chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = self.symbols.get(&id).and_then(|s| s.supertype);
        }
        chain
    }

    /// Direct subtypes of `ty`.
    pub fn subtypes(&self, ty: SymbolId) -> Vec<SymbolId> {
        self.symbols
            .values()
            .filter(|s| s.supertype == Some(ty))
            .map(|s| s.id)
            .collect()
    }

    pub fn all_subtypes(&self, ty: SymbolId) -> Vec<SymbolId> {
        let mut out = Vec::new();
        let mut stack = self.subtypes(ty);
        while let Some(sub) = stack.pop() {
            if out.contains(&sub) {
                continue;
            }
            out.push(sub);
            stack.extend(self.subtypes(sub));
        }
        out
    }

    pub fn is_subtype_of(&self, ty: SymbolId, ancestor: SymbolId) -> bool {
        self.supertypes(ty).contains(&ancestor)
    }

    // ── Node queries ──────────────────────────────────────────────────

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn require_node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(ModelError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn parent(&self, node: NodeId) -> Option<Parent> {
        self.parents.get(&node).copied()
    }

    /// Current placement of an attached node, in the form an edit accepts.
    pub fn position(&self, node: NodeId) -> Option<Anchor> {
        match self.parents.get(&node)? {
            Parent::Body(symbol) => Some(Anchor::Body(*symbol)),
            Parent::Node(parent) => {
                let index = self.nodes.get(parent)?.children.iter().position(|c| *c == node)?;
                Some(Anchor::Child {
                    parent: *parent,
                    index,
                })
            }
        }
    }

    /// Symbol whose body or initializer contains `node`.
    pub fn enclosing_symbol(&self, node: NodeId) -> Option<SymbolId> {
        let mut current = node;
        let mut steps = 0usize;
        loop {
            match self.parents.get(&current)? {
                Parent::Body(symbol) => return Some(*symbol),
                Parent::Node(parent) => current = *parent,
            }
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
        }
    }

    /// Whether `node` lies inside the subtree rooted at `ancestor` (inclusive).
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = node;
        let mut steps = 0usize;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parents.get(&current) {
                Some(Parent::Node(parent)) => current = *parent,
                _ => return false,
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
        }
    }

    /// Closest ancestor of `node` (inclusive) that is a direct child of a block,
    /// with the block and its index.
    pub fn statement_of(&self, node: NodeId) -> Option<(NodeId, usize)> {
        let mut current = node;
        let mut steps = 0usize;
        loop {
            let Parent::Node(parent) = *self.parents.get(&current)? else {
                return None;
            };
            let parent_node = self.nodes.get(&parent)?;
            if parent_node.kind == NodeKind::Block {
                let index = parent_node.children.iter().position(|c| *c == current)?;
                return Some((parent, index));
            }
            current = parent;
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
        }
    }

    /// Nodes of the subtree rooted at `root`, in preorder.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Every node of a symbol's body, in preorder.
    pub fn body_nodes(&self, symbol: SymbolId) -> Vec<NodeId> {
        self.symbols
            .get(&symbol)
            .and_then(|s| s.body)
            .map(|root| self.descendants(root))
            .unwrap_or_default()
    }

    /// Body statements of a method whose body is a block.
    pub fn body_statements(&self, method: SymbolId) -> Vec<NodeId> {
        self.symbols
            .get(&method)
            .and_then(|s| s.body)
            .and_then(|root| self.nodes.get(&root))
            .filter(|n| n.kind == NodeKind::Block)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Owned copy of an attached subtree.
    pub fn subtree(&self, root: NodeId) -> Result<Subtree> {
        self.require_node(root)?;
        let nodes = self
            .descendants(root)
            .into_iter()
            .map(|id| self.nodes[&id].clone())
            .collect();
        Ok(Subtree { root, nodes })
    }

    /// Deep copy of a subtree under fresh node ids, with symbol references
    /// substituted through `remap`. The copy is detached; attach it with an
    /// `InsertSubtree` edit.
    pub fn clone_subtree(
        &mut self,
        root: NodeId,
        remap: &HashMap<SymbolId, SymbolId>,
    ) -> Result<Subtree> {
        let original = self.subtree(root)?;
        let fresh: HashMap<NodeId, NodeId> = original
            .nodes
            .iter()
            .map(|n| (n.id, self.alloc_node_id()))
            .collect();
        let nodes = original
            .nodes
            .into_iter()
            .map(|mut node| {
                node.id = fresh[&node.id];
                node.children = node.children.iter().map(|c| fresh[c]).collect();
                if let Some(symbol) = node.symbol {
                    node.symbol = Some(remap.get(&symbol).copied().unwrap_or(symbol));
                }
                node
            })
            .collect();
        Ok(Subtree {
            root: fresh[&root],
            nodes,
        })
    }

    // ── Shapes ────────────────────────────────────────────────────────

    /// One line per node of the subtree, indented by depth, naming symbols
    /// through `namer`. Used for structural comparison and similarity scoring.
    pub fn shape_lines(&self, root: NodeId, namer: &dyn Fn(SymbolId) -> String) -> Vec<String> {
        let mut lines = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let mut line = format!("{}{}", "  ".repeat(depth), node.kind.as_str());
            if let Some(symbol) = node.symbol {
                line.push_str(&format!("[{}]", namer(symbol)));
            }
            if let Some(text) = &node.text {
                line.push_str(&format!("<{text}>"));
            }
            lines.push(line);
            stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        lines
    }

    pub fn shape(&self, root: NodeId) -> String {
        self.shape_lines(root, &|s| s.to_string()).join("\n")
    }

    /// Whether two subtrees are identical up to node ids.
    pub fn same_shape(&self, a: NodeId, b: NodeId) -> bool {
        self.shape(a) == self.shape(b)
    }

    /// Symbols named anywhere inside the subtree.
    pub fn symbols_referenced(&self, root: NodeId) -> HashSet<SymbolId> {
        self.descendants(root)
            .into_iter()
            .filter_map(|id| self.nodes[&id].symbol)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelBuilder;

    fn sample() -> (ProgramModel, SymbolId, SymbolId, SymbolId) {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let order = b.ty(app, "Order");
        let qty = b.field(order, "quantity");
        let price = b.method(order, "price");
        let read = b.read(qty);
        let ret = b.ret(Some(read));
        b.body(price, vec![ret]);
        (b.build().unwrap(), order, qty, price)
    }

    #[test]
    fn paths_resolve_both_ways() {
        let (model, order, _, price) = sample();
        let path = model.path_of(price).unwrap();
        assert_eq!(path.to_string(), "app::Order::price");
        assert_eq!(model.resolve(&path).unwrap(), price);
        assert_eq!(model.owning_type(price), Some(order));
        assert!(model.resolve(&"app::Nope".parse().unwrap()).is_err());
    }

    #[test]
    fn statement_of_finds_block_position() {
        let (model, _, qty, price) = sample();
        let read = model
            .body_nodes(price)
            .into_iter()
            .find(|n| model.node(*n).unwrap().symbol == Some(qty))
            .unwrap();
        let (block, index) = model.statement_of(read).unwrap();
        assert_eq!(Some(block), model.symbol(price).unwrap().body);
        assert_eq!(index, 0);
        assert_eq!(model.enclosing_symbol(read), Some(price));
    }

    #[test]
    fn clone_subtree_uses_fresh_ids_and_remaps() {
        let (mut model, order, qty, price) = sample();
        let other = model.alloc_symbol_id();
        let body = model.symbol(price).unwrap().body.unwrap();
        let remap = HashMap::from([(qty, other)]);
        let copy = model.clone_subtree(body, &remap).unwrap();
        assert_eq!(copy.nodes.len(), model.descendants(body).len());
        assert!(copy.nodes.iter().all(|n| model.node(n.id).is_none()));
        assert!(copy.nodes.iter().any(|n| n.symbol == Some(other)));
        assert!(model.fields(order).contains(&qty));
    }

    #[test]
    fn equality_ignores_bookkeeping() {
        let (model, ..) = sample();
        let mut copy = model.clone();
        copy.alloc_node_id();
        copy.revision += 3;
        assert_eq!(model, copy);
        assert_eq!(model.fingerprint(), copy.fingerprint());
    }
}
