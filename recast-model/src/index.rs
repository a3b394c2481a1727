// Reference index: derived who-reads/writes/calls/overrides-whom facts.
//
// The index is rebuilt from scratch from a model snapshot. Each body is an
// independent unit of work, so the scan runs in parallel and the per-body
// results are merged. The index is stamped with the model revision it was
// derived from; consulting it against any other revision is a bug.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::ProgramModel;
use crate::{NodeId, NodeKind, SymbolId, SymbolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessMode {
    Reads,
    Writes,
    Calls,
    Overrides,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reads => "Reads",
            Self::Writes => "Writes",
            Self::Calls => "Calls",
            Self::Overrides => "Overrides",
        }
    }
}

/// The user side of an edge: a node for reads/writes/calls, the overriding
/// method for overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Site {
    Node(NodeId),
    Symbol(SymbolId),
}

impl Site {
    pub fn node(self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Symbol(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub site: Site,
    /// Symbol whose body contains the site (the overriding method itself for
    /// `Overrides`).
    pub enclosing: SymbolId,
    pub target: SymbolId,
    pub mode: AccessMode,
}

/// Half-open run `start..end` of the statements of `block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementRange {
    pub block: NodeId,
    pub start: usize,
    pub end: usize,
}

impl StatementRange {
    pub fn new(block: NodeId, start: usize, end: usize) -> Self {
        Self { block, start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct BodyScan {
    edges: Vec<ReferenceEdge>,
    placement: Vec<(NodeId, NodeId, usize)>,
    nodes: Vec<(NodeId, SymbolId, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    revision: u64,
    edges: Vec<ReferenceEdge>,
    by_target: HashMap<SymbolId, Vec<usize>>,
    by_enclosing: HashMap<SymbolId, Vec<usize>>,
    /// Parent node and child index of every non-root node.
    placement: HashMap<NodeId, (NodeId, usize)>,
    enclosing: HashMap<NodeId, SymbolId>,
    /// Preorder position of a node within its body.
    order: HashMap<NodeId, usize>,
}

impl ReferenceIndex {
    pub fn build(model: &ProgramModel) -> Self {
        Self::build_with(model, true)
    }

    pub fn build_with(model: &ProgramModel, parallel: bool) -> Self {
        let owners: Vec<SymbolId> = model
            .symbols()
            .filter(|s| s.body.is_some())
            .map(|s| s.id)
            .collect();

        let scans: Vec<BodyScan> = if parallel {
            owners.par_iter().map(|owner| scan_body(model, *owner)).collect()
        } else {
            owners.iter().map(|owner| scan_body(model, *owner)).collect()
        };

        let mut index = Self {
            revision: model.revision(),
            ..Self::default()
        };
        for scan in scans {
            index.edges.extend(scan.edges);
            for (node, parent, position) in scan.placement {
                index.placement.insert(node, (parent, position));
            }
            for (node, owner, position) in scan.nodes {
                index.enclosing.insert(node, owner);
                index.order.insert(node, position);
            }
        }
        index.edges.extend(override_edges(model));

        for (i, edge) in index.edges.iter().enumerate() {
            index.by_target.entry(edge.target).or_default().push(i);
            index.by_enclosing.entry(edge.enclosing).or_default().push(i);
        }

        debug!(
            revision = index.revision,
            bodies = owners.len(),
            edges = index.edges.len(),
            "reference index built"
        );
        index
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_current(&self, model: &ProgramModel) -> bool {
        self.revision == model.revision()
    }

    pub fn edges(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    fn select<'a>(
        &'a self,
        slots: Option<&'a Vec<usize>>,
    ) -> impl Iterator<Item = &'a ReferenceEdge> + 'a {
        slots
            .into_iter()
            .flatten()
            .map(move |i| &self.edges[*i])
    }

    /// Every edge pointing at `symbol`.
    pub fn users_of(&self, symbol: SymbolId) -> Vec<&ReferenceEdge> {
        self.select(self.by_target.get(&symbol)).collect()
    }

    fn users_with_mode(&self, symbol: SymbolId, mode: AccessMode) -> Vec<&ReferenceEdge> {
        self.select(self.by_target.get(&symbol))
            .filter(|e| e.mode == mode)
            .collect()
    }

    pub fn reads_of(&self, symbol: SymbolId) -> Vec<&ReferenceEdge> {
        self.users_with_mode(symbol, AccessMode::Reads)
    }

    pub fn writes_of(&self, symbol: SymbolId) -> Vec<&ReferenceEdge> {
        self.users_with_mode(symbol, AccessMode::Writes)
    }

    pub fn calls_to(&self, symbol: SymbolId) -> Vec<&ReferenceEdge> {
        self.users_with_mode(symbol, AccessMode::Calls)
    }

    pub fn is_written_more_than_once(&self, local: SymbolId) -> bool {
        self.writes_of(local).len() > 1
    }

    /// Whether any read or write of `local` falls outside `range`.
    pub fn is_used_outside_range(&self, local: SymbolId, range: &StatementRange) -> bool {
        self.select(self.by_target.get(&local))
            .filter_map(|e| e.site.node())
            .any(|node| !self.range_contains(range, node))
    }

    pub fn range_contains(&self, range: &StatementRange, node: NodeId) -> bool {
        self.statement_of(node, range.block)
            .is_some_and(|i| i >= range.start && i < range.end)
    }

    /// Index of the statement of `block` that contains `node`, if any.
    pub fn statement_of(&self, node: NodeId, block: NodeId) -> Option<usize> {
        let mut current = node;
        let mut steps = 0usize;
        while let Some((parent, position)) = self.placement.get(&current) {
            if *parent == block {
                return Some(*position);
            }
            current = *parent;
            steps += 1;
            if steps > self.placement.len() {
                break;
            }
        }
        None
    }

    /// Distinct methods (or initialized fields) that call `method`, sorted.
    pub fn callers_of(&self, method: SymbolId) -> Vec<SymbolId> {
        let mut callers: Vec<SymbolId> = self
            .calls_to(method)
            .into_iter()
            .map(|e| e.enclosing)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        callers.sort();
        callers
    }

    /// Edges whose site lies in the body of `symbol`.
    pub fn references_within(&self, symbol: SymbolId) -> Vec<&ReferenceEdge> {
        self.select(self.by_enclosing.get(&symbol))
            .filter(|e| e.mode != AccessMode::Overrides)
            .collect()
    }

    /// Methods that directly override `method`.
    pub fn overridden_by(&self, method: SymbolId) -> Vec<SymbolId> {
        self.users_with_mode(method, AccessMode::Overrides)
            .into_iter()
            .map(|e| e.enclosing)
            .collect()
    }

    /// Supertype method that `method` overrides.
    pub fn overrides(&self, method: SymbolId) -> Option<SymbolId> {
        self.select(self.by_enclosing.get(&method))
            .find(|e| e.mode == AccessMode::Overrides && e.site == Site::Symbol(method))
            .map(|e| e.target)
    }

    /// Whether `method` takes part in dynamic dispatch in either direction.
    pub fn is_polymorphic(&self, method: SymbolId) -> bool {
        self.overrides(method).is_some() || !self.overridden_by(method).is_empty()
    }

    pub fn enclosing_of(&self, node: NodeId) -> Option<SymbolId> {
        self.enclosing.get(&node).copied()
    }

    pub fn order_of(&self, node: NodeId) -> Option<usize> {
        self.order.get(&node).copied()
    }

    /// Order-independent summary of every edge as `(enclosing, target, mode)`.
    /// Two models with equal signatures have the same reference structure even
    /// when node ids differ.
    pub fn edge_signature(&self) -> Vec<(SymbolId, SymbolId, AccessMode)> {
        let mut signature: Vec<_> = self
            .edges
            .iter()
            .map(|e| (e.enclosing, e.target, e.mode))
            .collect();
        signature.sort();
        signature
    }
}

fn access_mode(kind: NodeKind) -> Option<AccessMode> {
    match kind {
        NodeKind::Reference => Some(AccessMode::Reads),
        NodeKind::Assign => Some(AccessMode::Writes),
        NodeKind::Call | NodeKind::New => Some(AccessMode::Calls),
        _ => None,
    }
}

fn scan_body(model: &ProgramModel, owner: SymbolId) -> BodyScan {
    let mut scan = BodyScan::default();
    let Some(root) = model.symbol(owner).and_then(|s| s.body) else {
        return scan;
    };
    let mut stack = vec![root];
    let mut position = 0usize;
    while let Some(id) = stack.pop() {
        let Some(node) = model.node(id) else {
            continue;
        };
        scan.nodes.push((id, owner, position));
        position += 1;
        for (i, child) in node.children.iter().enumerate() {
            scan.placement.push((*child, id, i));
        }
        stack.extend(node.children.iter().rev().copied());

        if let (Some(mode), Some(target)) = (access_mode(node.kind), node.symbol) {
            scan.edges.push(ReferenceEdge {
                site: Site::Node(id),
                enclosing: owner,
                target,
                mode,
            });
        }
    }
    scan
}

fn override_edges(model: &ProgramModel) -> Vec<ReferenceEdge> {
    let mut edges = Vec::new();
    for method in model.symbols().filter(|s| s.kind == SymbolKind::Method) {
        if method.modifiers.is_constructor || method.modifiers.is_static {
            continue;
        }
        let Some(owner) = method.owner else { continue };
        if model.symbol(owner).is_none_or(|o| o.kind != SymbolKind::Type) {
            continue;
        }
        let arity = model.params(method.id).len();
        let overridden = model.supertypes(owner).into_iter().find_map(|sup| {
            model
                .member_named(Some(sup), &method.name)
                .filter(|m| {
                    model.symbol(*m).is_some_and(|s| {
                        s.kind == SymbolKind::Method && !s.modifiers.is_constructor
                    }) && model.params(*m).len() == arity
                })
        });
        if let Some(target) = overridden {
            edges.push(ReferenceEdge {
                site: Site::Symbol(method.id),
                enclosing: method.id,
                target,
                mode: AccessMode::Overrides,
            });
        }
    }
    edges
}
