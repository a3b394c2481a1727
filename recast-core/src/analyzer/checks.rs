// Predicates shared by many recipes. All are read-only.

use std::collections::BTreeSet;

use recast_model::{
    AccessMode, Node, NodeId, NodeKind, Parent, ProgramModel, ReferenceEdge, ReferenceIndex,
    StatementRange, SymbolId, SymbolKind, SymbolPath,
};

use super::{Check, ConflictKind, Rejection, reject};
use crate::params::RangeSpec;

/// `name` is not yet declared in `scope`.
pub fn name_free(model: &ProgramModel, scope: SymbolId, name: &str) -> Check {
    match model.member_named(Some(scope), name) {
        Some(existing) => Err(Rejection::new("name collision").with_conflict(
            ConflictKind::NameCollision,
            model.qualified_name(scope),
            format!("`{name}` is already declared as {}", model.qualified_name(existing)),
        )),
        None => Ok(()),
    }
}

/// `name` is free in `ty`, its supertypes and all its subtypes, so a new
/// member cannot accidentally override or be overridden.
pub fn name_free_in_hierarchy(model: &ProgramModel, ty: SymbolId, name: &str) -> Check {
    let mut related = vec![ty];
    related.extend(model.supertypes(ty));
    related.extend(model.all_subtypes(ty));
    let mut rejection: Option<Rejection> = None;
    for scope in related {
        if let Err(r) = name_free(model, scope, name) {
            rejection = Some(match rejection {
                Some(mut acc) => {
                    acc.conflicts.extend(r.conflicts);
                    acc
                }
                None => r,
            });
        }
    }
    rejection.map_or(Ok(()), Err)
}

pub fn resolve(model: &ProgramModel, path: &SymbolPath) -> Result<SymbolId, Rejection> {
    model
        .resolve(path)
        .map_err(|_| Rejection::new(format!("`{path}` does not exist")))
}

pub fn resolve_kind(
    model: &ProgramModel,
    path: &SymbolPath,
    kind: SymbolKind,
) -> Result<SymbolId, Rejection> {
    let id = resolve(model, path)?;
    expect_kind(model, id, kind)?;
    Ok(id)
}

pub fn expect_kind(model: &ProgramModel, id: SymbolId, kind: SymbolKind) -> Check {
    match model.symbol(id) {
        Some(s) if s.kind == kind => Ok(()),
        Some(s) => reject(format!(
            "{} is a {}, expected a {kind}",
            model.qualified_name(id),
            s.kind
        )),
        None => reject(format!("{id} does not exist")),
    }
}

pub fn owning_type(model: &ProgramModel, symbol: SymbolId) -> Result<SymbolId, Rejection> {
    model
        .owning_type(symbol)
        .ok_or_else(|| Rejection::new(format!(
            "{} is not declared in a type",
            model.qualified_name(symbol)
        )))
}

pub fn owning_method(model: &ProgramModel, variable: SymbolId) -> Result<SymbolId, Rejection> {
    model
        .symbol(variable)
        .and_then(|s| s.owner)
        .filter(|o| model.symbol(*o).is_some_and(|s| s.kind == SymbolKind::Method))
        .ok_or_else(|| Rejection::new(format!(
            "{} is not declared in a method",
            model.qualified_name(variable)
        )))
}

/// The method neither overrides nor is overridden.
pub fn not_polymorphic(model: &ProgramModel, index: &ReferenceIndex, method: SymbolId) -> Check {
    if !index.is_polymorphic(method) {
        return Ok(());
    }
    let mut rejection = Rejection::new("polymorphic override present");
    for other in index.overrides(method).into_iter().chain(index.overridden_by(method)) {
        rejection = rejection.with_conflict(
            ConflictKind::PolymorphicOverride,
            model.qualified_name(other),
            "declares the same signature",
        );
    }
    Err(rejection)
}

pub fn body_block(model: &ProgramModel, method: SymbolId) -> Result<NodeId, Rejection> {
    model
        .symbol(method)
        .and_then(|s| s.body)
        .filter(|b| model.node(*b).is_some_and(|n| n.kind == NodeKind::Block))
        .ok_or_else(|| Rejection::new(format!("{} has no body", model.qualified_name(method))))
}

/// `node` exists and lies in the body of `symbol`.
pub fn node_in<'m>(
    model: &'m ProgramModel,
    node: NodeId,
    symbol: SymbolId,
) -> Result<&'m Node, Rejection> {
    let found = model
        .node(node)
        .ok_or_else(|| Rejection::new(format!("node {node} does not exist")))?;
    if model.enclosing_symbol(node) == Some(symbol) {
        Ok(found)
    } else {
        reject(format!("node {node} is not inside {}", model.qualified_name(symbol)))
    }
}

pub fn expect_node_kind(node: &Node, kinds: &[NodeKind]) -> Check {
    if kinds.contains(&node.kind) {
        Ok(())
    } else {
        let expected: Vec<_> = kinds.iter().map(NodeKind::as_str).collect();
        reject(format!("node {} is a {}, expected {}", node.id, node.kind, expected.join(" or ")))
    }
}

/// The only write of a local, or the reason there is not exactly one.
pub fn single_write(
    model: &ProgramModel,
    index: &ReferenceIndex,
    local: SymbolId,
) -> Result<NodeId, Rejection> {
    let writes = index.writes_of(local);
    match writes.as_slice() {
        [one] => one
            .site
            .node()
            .ok_or_else(|| Rejection::new("write site is not a node")),
        [] => reject(format!("{} is never assigned", model.qualified_name(local))),
        _ => Err(Rejection::new("assigned more than once").suggest("SplitTemporaryVariable")),
    }
}

/// Member part of a `Select`: access through an explicit receiver.
pub fn is_qualified(model: &ProgramModel, node: NodeId) -> bool {
    receiver_of(model, node).is_some()
}

/// Receiver node when `node` is the member of a `Select`.
pub fn receiver_of(model: &ProgramModel, node: NodeId) -> Option<NodeId> {
    let Some(Parent::Node(parent)) = model.parent(node) else {
        return None;
    };
    let select = model.node(parent)?;
    (select.kind == NodeKind::Select && select.children.get(1) == Some(&node))
        .then(|| select.children[0])
}

/// Locals and parameters of `method` named inside the subtree, in
/// declaration order.
pub fn variables_used(model: &ProgramModel, roots: &[NodeId], method: SymbolId) -> Vec<SymbolId> {
    let used: BTreeSet<SymbolId> = roots
        .iter()
        .flat_map(|r| model.symbols_referenced(*r))
        .collect();
    model
        .members(method)
        .iter()
        .copied()
        .filter(|m| used.contains(m))
        .collect()
}

/// Whether evaluating the subtree may change state.
pub fn has_side_effects(model: &ProgramModel, root: NodeId) -> bool {
    model.descendants(root).into_iter().any(|id| {
        model
            .node(id)
            .is_some_and(|n| {
                matches!(
                    n.kind,
                    NodeKind::Assign | NodeKind::Throw | NodeKind::Return | NodeKind::Break
                )
            })
    })
}

/// Resolve a caller-supplied range against `method`'s body.
pub fn statement_range(
    model: &ProgramModel,
    method: SymbolId,
    spec: RangeSpec,
) -> Result<StatementRange, Rejection> {
    let block = match spec.block {
        Some(block) => {
            let node = node_in(model, block, method)?;
            expect_node_kind(node, &[NodeKind::Block])?;
            block
        }
        None => body_block(model, method)?,
    };
    let len = model.node(block).map_or(0, |n| n.children.len());
    if spec.end > len {
        return reject(format!(
            "range {}..{} exceeds the {len} statements of {block}",
            spec.start,
            spec.end
        ));
    }
    Ok(StatementRange::new(block, spec.start, spec.end))
}

/// Reference edges to `symbol` whose site lies outside `scope`.
pub fn users_outside<'i>(
    model: &ProgramModel,
    index: &'i ReferenceIndex,
    symbol: SymbolId,
    scope: SymbolId,
) -> Vec<&'i ReferenceEdge> {
    index
        .users_of(symbol)
        .into_iter()
        .filter(|e| {
            e.mode != AccessMode::Overrides && !model.is_declared_within(e.enclosing, scope)
        })
        .collect()
}

/// Nothing outside `scope` refers to `symbol`.
pub fn unused_outside(
    model: &ProgramModel,
    index: &ReferenceIndex,
    symbol: SymbolId,
    scope: SymbolId,
) -> Check {
    let outside = users_outside(model, index, symbol, scope);
    if outside.is_empty() {
        return Ok(());
    }
    let mut rejection = Rejection::new(format!(
        "{} is used outside {}",
        model.qualified_name(symbol),
        model.qualified_name(scope)
    ));
    let users: BTreeSet<SymbolId> = outside.iter().map(|e| e.enclosing).collect();
    for user in users {
        rejection = rejection.with_conflict(
            ConflictKind::ExternalUse,
            model.qualified_name(user),
            "still refers to it",
        );
    }
    Err(rejection)
}

/// No node anywhere refers to `symbol`.
pub fn unreferenced(model: &ProgramModel, index: &ReferenceIndex, symbol: SymbolId) -> Check {
    let users: Vec<_> = index
        .users_of(symbol)
        .into_iter()
        .filter(|e| e.mode != AccessMode::Overrides)
        .collect();
    if users.is_empty() {
        Ok(())
    } else {
        reject(format!(
            "{} is still referenced {} time(s)",
            model.qualified_name(symbol),
            users.len()
        ))
    }
}
