// Structural well-formedness check, run after every transaction and on every
// snapshot load.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::Serialize;

use crate::model::{Parent, ProgramModel};
use crate::{NodeId, NodeKind, SymbolId, SymbolKind};

/// A broken invariant, tagged with the rule that caught it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: &'static str,
    pub message: String,
}

impl Violation {
    fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

pub fn check_well_formed(model: &ProgramModel) -> Vec<Violation> {
    let mut violations = Vec::new();
    check_symbols(model, &mut violations);
    check_scopes(model, &mut violations);
    check_attachment(model, &mut violations);
    check_nodes(model, &mut violations);
    check_hierarchy(model, &mut violations);
    violations
}

fn check_symbols(model: &ProgramModel, out: &mut Vec<Violation>) {
    for symbol in model.symbols() {
        let name = model.qualified_name(symbol.id);
        let owner_kind = match symbol.owner {
            Some(owner) => match model.symbol(owner) {
                Some(o) => Some(o.kind),
                None => {
                    out.push(Violation::new("owner", format!("{name} has unknown owner {owner}")));
                    continue;
                }
            },
            None => None,
        };
        if !symbol.kind.may_be_owned_by(owner_kind) {
            out.push(Violation::new(
                "owner",
                format!("{name}: a {} cannot be declared there", symbol.kind),
            ));
        }
        let scope = match symbol.owner {
            Some(owner) => model.members(owner),
            None => model.roots(),
        };
        let listed = scope.iter().filter(|m| **m == symbol.id).count();
        if listed != 1 {
            out.push(Violation::new(
                "owner",
                format!("{name} is listed {listed} times by its scope"),
            ));
        }
        if let Some(body) = symbol.body {
            if !matches!(symbol.kind, SymbolKind::Method | SymbolKind::Field) {
                out.push(Violation::new("body", format!("{name}: a {} has no body", symbol.kind)));
            }
            if model.node(body).is_none() {
                out.push(Violation::new("body", format!("{name}: body {body} does not exist")));
            } else if model.parent(body) != Some(Parent::Body(symbol.id)) {
                out.push(Violation::new("body", format!(
                    "{name}: body {body} is not anchored here"
                )));
            }
        }
        for (what, target) in [("type", symbol.type_ref), ("supertype", symbol.supertype)] {
            if let Some(target) = target {
                if model.symbol(target).is_none_or(|t| t.kind != SymbolKind::Type) {
                    out.push(Violation::new(
                        "type-ref",
                        format!("{name}: {what} {target} is not a type"),
                    ));
                }
            }
        }
        if symbol.supertype.is_some() && symbol.kind != SymbolKind::Type {
            out.push(Violation::new("type-ref", format!("{name}: only types have supertypes")));
        }
    }
}

fn check_scopes(model: &ProgramModel, out: &mut Vec<Violation>) {
    let mut scopes: Vec<(Option<SymbolId>, &[SymbolId])> = vec![(None, model.roots())];
    scopes.extend(model.members.iter().map(|(owner, list)| (Some(*owner), list.as_slice())));
    for (owner, list) in scopes {
        let mut seen = HashSet::new();
        for id in list {
            let Some(symbol) = model.symbol(*id) else {
                out.push(Violation::new("owner", format!("scope lists unknown symbol {id}")));
                continue;
            };
            if symbol.owner != owner {
                out.push(Violation::new(
                    "owner",
                    format!("{} is listed by a scope that does not own it", symbol.name),
                ));
            }
            if !seen.insert(symbol.name.as_str()) {
                let scope = owner.map_or_else(|| "<root>".to_string(), |o| model.qualified_name(o));
                out.push(Violation::new(
                    "unique-name",
                    format!("`{}` is declared twice in {scope}", symbol.name),
                ));
            }
        }
    }
}

fn check_attachment(model: &ProgramModel, out: &mut Vec<Violation>) {
    for node in model.nodes() {
        match model.parent(node.id) {
            None => out.push(Violation::new("attachment", format!("{} is detached", node.id))),
            Some(Parent::Body(symbol)) => {
                if model.symbol(symbol).and_then(|s| s.body) != Some(node.id) {
                    out.push(Violation::new(
                        "attachment",
                        format!("{} claims to be the body of {symbol}", node.id),
                    ));
                }
            }
            Some(Parent::Node(parent)) => {
                let count = model
                    .node(parent)
                    .map_or(0, |p| p.children.iter().filter(|c| **c == node.id).count());
                if count != 1 {
                    out.push(Violation::new(
                        "attachment",
                        format!("{} appears {count} times under {parent}", node.id),
                    ));
                }
            }
        }
        for child in &node.children {
            if model.node(*child).is_none() {
                out.push(Violation::new(
                    "attachment",
                    format!("{} has unknown child {child}", node.id),
                ));
            }
        }
    }

    // Everything must hang off some body; anything else is a detached cycle.
    let reachable: usize = model
        .symbols()
        .filter_map(|s| s.body)
        .map(|root| model.descendants(root).len())
        .sum();
    if reachable != model.node_count() && out.iter().all(|v| v.rule != "attachment") {
        out.push(Violation::new(
            "attachment",
            format!(
                "{} node(s) are unreachable from any body",
                model.node_count().saturating_sub(reachable)
            ),
        ));
    }
}

fn arity_ok(model: &ProgramModel, kind: NodeKind, children: &[NodeId]) -> bool {
    let is_block = |i: usize| {
        children
            .get(i)
            .and_then(|c| model.node(*c))
            .is_some_and(|n| n.kind == NodeKind::Block)
    };
    match kind {
        NodeKind::Block | NodeKind::Call | NodeKind::New => true,
        NodeKind::Reference | NodeKind::This | NodeKind::Literal | NodeKind::Break => {
            children.is_empty()
        }
        NodeKind::Assign | NodeKind::Throw | NodeKind::Assert | NodeKind::Cast => {
            children.len() == 1
        }
        NodeKind::Return => children.len() <= 1,
        NodeKind::Operator => !children.is_empty(),
        NodeKind::Select => {
            children.len() == 2
                && model.node(children[1]).is_some_and(|m| {
                    matches!(m.kind, NodeKind::Reference | NodeKind::Call | NodeKind::Assign)
                })
        }
        NodeKind::Conditional => {
            (children.len() == 2 || children.len() == 3)
                && is_block(1)
                && (children.len() == 2 || is_block(2))
        }
        NodeKind::Loop => children.len() == 2 && is_block(1),
        NodeKind::Try => children.len() == 2 && is_block(0) && is_block(1),
    }
}

fn check_nodes(model: &ProgramModel, out: &mut Vec<Violation>) {
    for node in model.nodes() {
        if !arity_ok(model, node.kind, &node.children) {
            out.push(Violation::new(
                "arity",
                format!("{} {} has a malformed child list", node.kind, node.id),
            ));
        }
        if matches!(node.kind, NodeKind::Literal | NodeKind::Operator) && node.text.is_none() {
            out.push(Violation::new("arity", format!("{} {} has no text", node.kind, node.id)));
        }

        let Some(target) = node.symbol else {
            if node.kind.is_referencing() {
                out.push(Violation::new(
                    "reference",
                    format!("{} {} names no symbol", node.kind, node.id),
                ));
            }
            continue;
        };
        let Some(symbol) = model.symbol(target) else {
            out.push(Violation::new(
                "reference",
                format!("{} references unknown symbol {target}", node.id),
            ));
            continue;
        };
        let kind_ok = match node.kind {
            NodeKind::Assign | NodeKind::Reference => symbol.kind.is_variable(),
            NodeKind::Call => symbol.kind == SymbolKind::Method,
            NodeKind::New | NodeKind::Cast => symbol.kind == SymbolKind::Type,
            _ => false,
        };
        if !kind_ok {
            out.push(Violation::new(
                "reference",
                format!(
                    "{} {} cannot reference {} {}",
                    node.kind,
                    node.id,
                    symbol.kind,
                    model.qualified_name(target)
                ),
            ));
        }
        if matches!(symbol.kind, SymbolKind::Local | SymbolKind::Parameter)
            && model.enclosing_symbol(node.id) != symbol.owner
        {
            out.push(Violation::new(
                "locality",
                format!(
                    "{} is used outside its method (at {})",
                    model.qualified_name(target),
                    node.id
                ),
            ));
        }
    }
}

fn check_hierarchy(model: &ProgramModel, out: &mut Vec<Violation>) {
    let mut graph = DiGraph::<SymbolId, ()>::new();
    let mut index = HashMap::new();
    for symbol in model.symbols().filter(|s| s.kind == SymbolKind::Type) {
        index.insert(symbol.id, graph.add_node(symbol.id));
    }
    for symbol in model.symbols() {
        if let (Some(sub), Some(sup)) = (
            index.get(&symbol.id),
            symbol.supertype.and_then(|s| index.get(&s)),
        ) {
            graph.add_edge(*sub, *sup, ());
        }
    }
    if is_cyclic_directed(&graph) {
        out.push(Violation::new("hierarchy", "the inheritance hierarchy has a cycle"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelBuilder;

    #[test]
    fn well_formed_model_has_no_violations() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let m = b.method(ty, "m");
        let x = b.local(m, "x");
        let read = b.read(f);
        let assign = b.assign(x, read);
        b.body(m, vec![assign]);
        let model = b.build().unwrap();
        assert!(check_well_formed(&model).is_empty());
    }

    #[test]
    fn local_used_in_another_method_is_flagged() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let m = b.method(ty, "m");
        let other = b.method(ty, "other");
        let x = b.local(m, "x");
        let read = b.read(x);
        let ret = b.ret(Some(read));
        b.body(other, vec![ret]);
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("locality"), "{err}");
    }

    #[test]
    fn duplicate_names_are_flagged() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        b.field(ty, "x");
        b.method(ty, "x");
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("unique-name"), "{err}");
    }

    #[test]
    fn call_to_field_is_flagged() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let m = b.method(ty, "m");
        let call = b.call(f, vec![]);
        b.body(m, vec![call]);
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("reference"), "{err}");
    }
}
