// Simplifying conditional expressions.

use std::collections::{BTreeSet, HashMap};

use recast_model::{
    Anchor, Modifiers, Node, NodeId, NodeKind, Parent, ProgramModel, SymbolId, SymbolKind,
};

use super::composing::plan_extraction;
use super::support::{self, Chain, is_kind, is_operator, literal_text, name_of};
use crate::analyzer::checks;
use crate::analyzer::{Analysis, Check, Rejection, Verification, reject};
use crate::engine::{Binding, StepCx, StepResult};
use crate::error::StepError;
use crate::params::{Params, RangeSpec};
use crate::registry::{Recipe, Step, TargetShape};

pub fn recipes() -> Vec<Recipe> {
    vec![
        DECOMPOSE_CONDITIONAL,
        CONSOLIDATE_CONDITIONAL_EXPRESSION,
        CONSOLIDATE_DUPLICATE_CONDITIONAL_FRAGMENTS,
        REMOVE_CONTROL_FLAG,
        REPLACE_NESTED_CONDITIONAL_WITH_GUARD_CLAUSES,
        REPLACE_CONDITIONAL_WITH_POLYMORPHISM,
        INTRODUCE_NULL_OBJECT,
        INTRODUCE_ASSERTION,
    ]
}

/// The conditional named by `node` inside `method`.
fn conditional_in<'m>(
    model: &'m ProgramModel,
    params: &Params,
    method: SymbolId,
) -> Result<&'m Node, Rejection> {
    let node = checks::node_in(model, params.require_node("node")?, method)?;
    checks::expect_node_kind(node, &[NodeKind::Conditional])?;
    Ok(node)
}

fn condition_of(node: &Node) -> Result<NodeId, Rejection> {
    node.children
        .first()
        .copied()
        .ok_or_else(|| Rejection::new(format!("{} has no condition", node.id)))
}

fn then_of(node: &Node) -> Result<NodeId, Rejection> {
    node.children
        .get(1)
        .copied()
        .ok_or_else(|| Rejection::new(format!("{} has no branch", node.id)))
}

fn else_of(node: &Node) -> Option<NodeId> {
    node.children.get(2).copied()
}

fn statements(model: &ProgramModel, block: NodeId) -> Vec<NodeId> {
    model.node(block).map(|b| b.children.clone()).unwrap_or_default()
}

fn side_effect_free(model: &ProgramModel, expr: NodeId) -> Check {
    if checks::has_side_effects(model, expr) {
        reject(format!("condition at {expr} changes state"))
    } else {
        Ok(())
    }
}

fn is_static(model: &ProgramModel, method: SymbolId) -> bool {
    model.symbol(method).is_some_and(|m| m.modifiers.is_static)
}

// ── Decompose Conditional ─────────────────────────────────────────────

pub const DECOMPOSE_CONDITIONAL: Recipe = Recipe {
    name: "DecomposeConditional",
    shape: TargetShape::Method,
    precondition: decompose_pre,
    steps: &[
        Step {
            name: "extract condition",
            run: decompose_condition,
        },
        Step {
            name: "extract branches",
            run: decompose_branches,
        },
    ],
    postcondition: decompose_post,
};

/// The branches to extract with the name each gets, `then` first.
fn named_branches(node: &Node, params: &Params) -> Result<Vec<(NodeId, String)>, Rejection> {
    let mut branches = Vec::new();
    if let Some(name) = params.name("then")? {
        branches.push((then_of(node)?, name));
    }
    if let Some(name) = params.name("else")? {
        let otherwise =
            else_of(node).ok_or_else(|| Rejection::new("conditional has no else branch"))?;
        branches.push((otherwise, name));
    }
    Ok(branches)
}

fn whole_block(model: &ProgramModel, block: NodeId) -> Result<RangeSpec, Rejection> {
    let len = statements(model, block).len();
    if len == 0 {
        return reject(format!("branch {block} is empty"));
    }
    Ok(RangeSpec {
        block: Some(block),
        start: 0,
        end: len,
    })
}

fn decompose_pre(a: &Analysis<'_>) -> Check {
    let node = conditional_in(a.model, a.params, a.target)?;
    let condition = condition_of(node)?;
    let owner = checks::owning_type(a.model, a.target)?;
    let name = a.params.require_name("name")?;
    if is_kind(a.model, condition, NodeKind::Call) {
        return reject("condition is already a single call");
    }
    side_effect_free(a.model, condition)?;
    let branches = named_branches(node, a.params)?;
    let mut names = vec![name];
    for (block, branch_name) in &branches {
        plan_extraction(a.model, a.index, a.target, whole_block(a.model, *block)?)?;
        names.push(branch_name.clone());
    }
    support::distinct(&names)?;
    for name in &names {
        checks::name_free(a.model, owner, name)?;
    }
    Ok(())
}

fn decompose_condition(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let node = conditional_in(cx.model(), cx.params(), method)?;
    let condition = condition_of(node)?;
    let id = node.id;
    let name = cx.params().require_name("name")?;
    let is_static = is_static(cx.model(), method);
    let query = support::extract_expression(cx, method, condition, &name, is_static)?;
    cx.bind_symbol("condition", query);
    cx.bind("conditional", Binding::Node(id));
    Ok(())
}

fn decompose_branches(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let node = conditional_in(cx.model(), cx.params(), method)?;
    let branches = named_branches(node, cx.params())?;
    let mut extracted = Vec::new();
    for (block, name) in branches {
        let range = whole_block(cx.model(), block)?;
        let params = Params::new()
            .with("name", name)
            .with(
                "range",
                serde_json::to_value(range).map_err(|e| StepError::plan(e.to_string()))?,
            );
        let bound = cx.invoke("ExtractMethod", method, params)?;
        if let Some(Binding::Symbol(m)) = bound.get("method") {
            extracted.push(*m);
        }
    }
    cx.bind("branches", Binding::Symbols(extracted));
    Ok(())
}

fn decompose_post(v: &Verification<'_>) -> Check {
    v.exists("condition")?;
    let Some(Binding::Node(conditional)) = v.bindings.get("conditional") else {
        return reject("conditional was not recorded");
    };
    let condition = v.model.node(*conditional).and_then(|n| n.children.first().copied());
    match condition.and_then(|c| v.model.node(c)) {
        Some(call) if call.kind == NodeKind::Call && call.symbol == v.symbol("condition") => Ok(()),
        _ => reject("condition does not call the extracted query"),
    }
}

// ── Consolidate Conditional Expression ────────────────────────────────

pub const CONSOLIDATE_CONDITIONAL_EXPRESSION: Recipe = Recipe {
    name: "ConsolidateConditionalExpression",
    shape: TargetShape::Method,
    precondition: consolidate_pre,
    steps: &[
        Step {
            name: "combine conditions",
            run: consolidate_combine,
        },
        Step {
            name: "extract condition",
            run: consolidate_extract,
        },
    ],
    postcondition: consolidate_post,
};

/// Conditions to join and how.
#[derive(Debug)]
enum Consolidation {
    /// Consecutive `if (c_i) X` with identical `X`: `if (c_1 || .. || c_n) X`.
    Sequence(Vec<NodeId>),
    /// `if (a) { if (b) X }`: `if (a && b) X`.
    Nested { outer: NodeId, inner: NodeId },
}

impl Consolidation {
    fn first(&self) -> NodeId {
        match self {
            Self::Sequence(nodes) => nodes[0],
            Self::Nested { outer, .. } => *outer,
        }
    }
}

fn plan_consolidation(
    model: &ProgramModel,
    params: &Params,
    method: SymbolId,
) -> Result<Consolidation, Rejection> {
    let nodes = params.nodes("nodes")?;
    let mut conditionals = Vec::new();
    for id in &nodes {
        let node = checks::node_in(model, *id, method)?;
        checks::expect_node_kind(node, &[NodeKind::Conditional])?;
        if else_of(node).is_some() {
            return reject(format!("conditional {id} has an else branch"));
        }
        side_effect_free(model, condition_of(node)?)?;
        conditionals.push(node);
    }
    match conditionals.as_slice() {
        [] => reject("name the conditionals with `nodes`"),
        [outer] => {
            let inner = match statements(model, then_of(outer)?).as_slice() {
                [only] if is_kind(model, *only, NodeKind::Conditional) => *only,
                _ => return reject("the conditional does not just wrap another one"),
            };
            let inner_node = model
                .node(inner)
                .ok_or_else(|| Rejection::new("inner conditional vanished"))?;
            if else_of(inner_node).is_some() {
                return reject("the inner conditional has an else branch");
            }
            side_effect_free(model, condition_of(inner_node)?)?;
            Ok(Consolidation::Nested { outer: outer.id, inner })
        }
        [first, rest @ ..] => {
            let (block, start) = support::statement_slot(model, first.id)?;
            let body = then_of(first)?;
            for (offset, next) in rest.iter().enumerate() {
                if support::statement_slot(model, next.id)? != (block, start + offset + 1) {
                    return reject("conditionals are not consecutive statements of one block");
                }
                if !model.same_shape(body, then_of(next)?) {
                    return reject(format!("conditional {} does something different", next.id));
                }
            }
            Ok(Consolidation::Sequence(nodes))
        }
    }
}

fn consolidate_pre(a: &Analysis<'_>) -> Check {
    plan_consolidation(a.model, a.params, a.target)?;
    if let Some(name) = a.params.name("name")? {
        checks::name_free(a.model, checks::owning_type(a.model, a.target)?, &name)?;
    }
    Ok(())
}

fn consolidate_combine(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let plan = plan_consolidation(cx.model(), cx.params(), method)?;
    let first = plan.first();
    let condition = condition_of(cx.node(first)?)?;
    match plan {
        Consolidation::Sequence(nodes) => {
            let mut others = Vec::new();
            for node in &nodes[1..] {
                let c = condition_of(cx.node(*node)?)?;
                others.push(cx.clone_tree(c, &HashMap::new())?);
            }
            cx.wrap(condition, |t, inner| {
                let mut operands = vec![inner];
                operands.extend(others.into_iter().map(|o| t.graft(o)));
                t.op("||", operands)
            })?;
            for node in &nodes[1..] {
                cx.remove(*node)?;
            }
        }
        Consolidation::Nested { outer, inner } => {
            let inner_node = cx.node(inner)?.clone();
            let second = cx.clone_tree(condition_of(&inner_node)?, &HashMap::new())?;
            cx.wrap(condition, |t, first| {
                let second = t.graft(second);
                t.op("&&", vec![first, second])
            })?;
            let outer_block = then_of(cx.node(outer)?)?;
            let moved = statements(cx.model(), then_of(&inner_node)?);
            for (i, statement) in moved.into_iter().enumerate() {
                cx.move_node(
                    statement,
                    Anchor::Child {
                        parent: outer_block,
                        index: i,
                    },
                )?;
            }
            cx.remove(inner)?;
        }
    }
    cx.bind("conditional", Binding::Node(first));
    Ok(())
}

fn consolidate_extract(cx: &mut StepCx<'_>) -> StepResult {
    let Some(name) = cx.params().name("name")? else {
        return Ok(());
    };
    let method = cx.target();
    let conditional = cx.bound_node("conditional")?;
    let condition = condition_of(cx.node(conditional)?)?;
    let is_static = is_static(cx.model(), method);
    let query = support::extract_expression(cx, method, condition, &name, is_static)?;
    cx.bind_symbol("condition", query);
    Ok(())
}

fn consolidate_post(v: &Verification<'_>) -> Check {
    let Some(Binding::Node(conditional)) = v.bindings.get("conditional") else {
        return reject("conditional was not recorded");
    };
    let condition = v
        .model
        .node(*conditional)
        .and_then(|n| n.children.first().copied())
        .ok_or_else(|| Rejection::new("consolidated conditional vanished"))?;
    let combined = is_operator(v.model, condition, "||")
        || is_operator(v.model, condition, "&&")
        || v.model.node(condition).and_then(|n| n.symbol) == v.symbol("condition");
    if combined {
        Ok(())
    } else {
        reject("conditions were not combined")
    }
}

// ── Consolidate Duplicate Conditional Fragments ───────────────────────

pub const CONSOLIDATE_DUPLICATE_CONDITIONAL_FRAGMENTS: Recipe = Recipe {
    name: "ConsolidateDuplicateConditionalFragments",
    shape: TargetShape::Method,
    precondition: fragments_pre,
    steps: &[Step {
        name: "hoist shared statements",
        run: fragments_hoist,
    }],
    postcondition: fragments_post,
};

#[derive(Debug, Default)]
struct Fragments {
    /// Pairs `(then statement, else statement)` that can go before the conditional.
    leading: Vec<(NodeId, NodeId)>,
    /// Pairs that can go after it, last statement first.
    trailing: Vec<(NodeId, NodeId)>,
}

fn assigned(model: &ProgramModel, root: NodeId) -> BTreeSet<SymbolId> {
    model
        .descendants(root)
        .into_iter()
        .filter_map(|id| model.node(id))
        .filter(|n| n.kind == NodeKind::Assign)
        .filter_map(|n| n.symbol)
        .collect()
}

fn plan_fragments(model: &ProgramModel, node: &Node) -> Result<Fragments, Rejection> {
    let otherwise = else_of(node).ok_or_else(|| Rejection::new("conditional has no else branch"))?;
    if is_kind(model, otherwise, NodeKind::Block)
        && matches!(
            statements(model, otherwise).as_slice(),
            [only] if is_kind(model, *only, NodeKind::Conditional)
        )
    {
        return reject("else-if chains are not supported; consolidate each arm");
    }
    let then = statements(model, then_of(node)?);
    let other = statements(model, otherwise);
    let read_by_condition = model.symbols_referenced(condition_of(node)?);

    let mut fragments = Fragments::default();
    let mut back = 0;
    while back < then.len().min(other.len()) {
        let (a, b) = (then[then.len() - 1 - back], other[other.len() - 1 - back]);
        if !model.same_shape(a, b) {
            break;
        }
        fragments.trailing.push((a, b));
        back += 1;
    }
    let limit = then.len().min(other.len()) - back;
    for i in 0..limit {
        let (a, b) = (then[i], other[i]);
        if !model.same_shape(a, b)
            || assigned(model, a).iter().any(|s| read_by_condition.contains(s))
        {
            break;
        }
        fragments.leading.push((a, b));
    }
    if fragments.leading.is_empty() && fragments.trailing.is_empty() {
        return reject("branches share no statements");
    }
    Ok(fragments)
}

fn fragments_pre(a: &Analysis<'_>) -> Check {
    let node = conditional_in(a.model, a.params, a.target)?;
    support::statement_slot(a.model, node.id)?;
    plan_fragments(a.model, node)?;
    Ok(())
}

fn fragments_hoist(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let node = conditional_in(cx.model(), cx.params(), method)?.clone();
    let plan = plan_fragments(cx.model(), &node)?;
    let (block, mut at) = support::statement_slot(cx.model(), node.id)?;
    let mut hoisted = Vec::new();
    for (kept, dropped) in plan.leading {
        cx.move_node(kept, Anchor::Child { parent: block, index: at })?;
        cx.remove(dropped)?;
        hoisted.push(kept);
        at += 1;
    }
    for (kept, dropped) in plan.trailing {
        cx.move_node(
            kept,
            Anchor::Child {
                parent: block,
                index: at + 1,
            },
        )?;
        cx.remove(dropped)?;
        hoisted.push(kept);
    }

    // Drop what emptied out.
    if let Some(otherwise) = else_of(&node) {
        if statements(cx.model(), otherwise).is_empty() {
            cx.remove(otherwise)?;
            let then = then_of(&node)?;
            if statements(cx.model(), then).is_empty()
                && !checks::has_side_effects(cx.model(), condition_of(&node)?)
            {
                cx.remove(node.id)?;
            }
        }
    }
    cx.bind("hoisted", Binding::Nodes(hoisted));
    Ok(())
}

fn fragments_post(v: &Verification<'_>) -> Check {
    let Some(Binding::Nodes(hoisted)) = v.bindings.get("hoisted") else {
        return reject("nothing was hoisted");
    };
    let misplaced = hoisted.iter().find(|n| {
        let holder = v.model.statement_of(**n).and_then(|(block, _)| v.model.parent(block));
        !support::is_statement(v.model, **n)
            || matches!(holder, Some(Parent::Node(c)) if is_kind(v.model, c, NodeKind::Conditional))
    });
    match misplaced {
        Some(n) => reject(format!("{n} is still inside a branch")),
        None => Ok(()),
    }
}

// ── Remove Control Flag ───────────────────────────────────────────────

pub const REMOVE_CONTROL_FLAG: Recipe = Recipe {
    name: "RemoveControlFlag",
    shape: TargetShape::Local,
    precondition: control_flag_pre,
    steps: &[
        Step {
            name: "break instead of setting the flag",
            run: control_flag_break,
        },
        Step {
            name: "drop flag from loop condition",
            run: control_flag_condition,
        },
        Step {
            name: "delete flag",
            run: control_flag_delete,
        },
    ],
    postcondition: control_flag_post,
};

#[derive(Debug)]
struct ControlFlag {
    /// `flag = <initial>` before the loop.
    init: NodeId,
    lp: NodeId,
    /// Operand of the loop condition testing the flag.
    test: NodeId,
    /// `flag = <stop>` statements inside the loop.
    stops: Vec<NodeId>,
}

fn negates(model: &ProgramModel, node: NodeId, flag: SymbolId) -> bool {
    is_operator(model, node, "!")
        && model
            .node(node)
            .and_then(|n| n.children.first())
            .and_then(|c| model.node(*c))
            .is_some_and(|c| c.kind == NodeKind::Reference && c.symbol == Some(flag))
}

fn reads_flag(model: &ProgramModel, node: NodeId, flag: SymbolId) -> bool {
    model.node(node).is_some_and(|n| n.kind == NodeKind::Reference && n.symbol == Some(flag))
}

/// Every statement from `statement` up to `body` is the last of its block.
fn exits_last(model: &ProgramModel, statement: NodeId, body: NodeId) -> bool {
    let mut current = statement;
    loop {
        let Some((block, at)) = model.statement_of(current) else {
            return false;
        };
        if model.node(block).is_none_or(|b| at + 1 != b.children.len()) {
            return false;
        }
        if block == body {
            return true;
        }
        match model.parent(block) {
            Some(Parent::Node(holder)) if is_kind(model, holder, NodeKind::Conditional) => {
                current = holder;
            }
            _ => return false,
        }
    }
}

fn plan_control_flag(
    model: &ProgramModel,
    index: &recast_model::ReferenceIndex,
    flag: SymbolId,
) -> Result<ControlFlag, Rejection> {
    let method = checks::owning_method(model, flag)?;
    let lp = model
        .body_nodes(method)
        .into_iter()
        .filter(|n| is_kind(model, *n, NodeKind::Loop))
        .find(|n| {
            model
                .node(*n)
                .and_then(|l| l.children.first())
                .is_some_and(|c| model.symbols_referenced(*c).contains(&flag))
        })
        .ok_or_else(|| Rejection::new("no loop is controlled by the flag"))?;
    let loop_node = model.node(lp).ok_or_else(|| Rejection::new("loop vanished"))?;
    let (condition, body) = (loop_node.children[0], loop_node.children[1]);

    let test = if reads_flag(model, condition, flag) || negates(model, condition, flag) {
        condition
    } else if is_operator(model, condition, "&&") {
        model
            .node(condition)
            .into_iter()
            .flat_map(|c| c.children.iter().copied())
            .find(|o| reads_flag(model, *o, flag) || negates(model, *o, flag))
            .ok_or_else(|| Rejection::new("loop condition does not test the flag directly"))?
    } else {
        return reject("loop condition does not test the flag directly");
    };
    let initial = if negates(model, test, flag) { "false" } else {
        "true"
    };
    let stop = if initial == "true" { "false" } else {
        "true"
    };

    for edge in index.reads_of(flag) {
        if edge.site.node().is_none_or(|n| !model.is_within(n, test)) {
            return reject("flag is read outside the loop condition");
        }
    }
    let mut init = None;
    let mut stops = Vec::new();
    for edge in index.writes_of(flag) {
        let Some(write) = edge.site.node() else {
            continue;
        };
        let value = model.node(write).and_then(|w| w.children.first().copied());
        let literal = value.and_then(|v| literal_text(model, v));
        if model.is_within(write, body) {
            if literal != Some(stop) || !support::is_statement(model, write) {
                return reject(format!("assignment at {write} is not a plain `{stop}`"));
            }
            if !exits_last(model, write, body) {
                return reject(format!("statements run after the flag is set at {write}"));
            }
            let nested_loop = std::iter::successors(model.parent(write), |p| match p {
                Parent::Node(n) if *n != body => model.parent(*n),
                _ => None,
            })
            .any(|p| matches!(p, Parent::Node(n) if n != lp && is_kind(model, n, NodeKind::Loop)));
            if nested_loop {
                return reject(format!("assignment at {write} sits in a nested loop"));
            }
            stops.push(write);
        } else {
            let before = match (model.statement_of(write), model.statement_of(lp)) {
                (Some((b1, i1)), Some((b2, i2))) => {
                    b1 == b2 && i1 < i2 && support::is_statement(model, write)
                }
                _ => false,
            };
            if !before || literal != Some(initial) || init.replace(write).is_some() {
                return reject(format!("flag must be set to {initial} once, right before the loop"));
            }
        }
    }
    let init = init.ok_or_else(|| Rejection::new("flag is never initialised"))?;
    if stops.is_empty() {
        return reject("flag is never set inside the loop");
    }
    stops.sort();
    Ok(ControlFlag { init, lp, test, stops })
}

fn control_flag_pre(a: &Analysis<'_>) -> Check {
    if a.symbol()?.kind != SymbolKind::Local {
        return reject("target is not a local variable");
    }
    plan_control_flag(a.model, a.index, a.target)?;
    Ok(())
}

fn control_flag_break(cx: &mut StepCx<'_>) -> StepResult {
    let flag = cx.target();
    let index = cx.index();
    let plan = plan_control_flag(cx.model(), &index, flag)?;
    for stop in &plan.stops {
        cx.replace_with(*stop, |t| t.brk())?;
    }
    cx.bind("loop", Binding::Node(plan.lp));
    cx.bind("test", Binding::Node(plan.test));
    cx.bind("init", Binding::Node(plan.init));
    Ok(())
}

fn control_flag_condition(cx: &mut StepCx<'_>) -> StepResult {
    let lp = cx.bound_node("loop")?;
    let test = cx.bound_node("test")?;
    let condition = cx.node(lp)?.children[0];
    if condition == test {
        cx.replace_with(test, |t| t.lit("true"))?;
        return Ok(());
    }
    cx.remove(test)?;
    let left = cx.node(condition)?.children.len();
    if left == 1 {
        cx.unwrap(condition, 0)?;
    }
    Ok(())
}

fn control_flag_delete(cx: &mut StepCx<'_>) -> StepResult {
    let flag = cx.target();
    let init = cx.bound_node("init")?;
    cx.remove(init)?;
    cx.delete(flag)
}

fn control_flag_post(v: &Verification<'_>) -> Check {
    if v.target_exists() {
        return reject("flag still exists");
    }
    match v.bindings.get("loop") {
        Some(Binding::Node(lp)) if is_kind(v.model, *lp, NodeKind::Loop) => Ok(()),
        _ => reject("loop vanished"),
    }
}

// ── Replace Nested Conditional with Guard Clauses ─────────────────────

pub const REPLACE_NESTED_CONDITIONAL_WITH_GUARD_CLAUSES: Recipe = Recipe {
    name: "ReplaceNestedConditionalWithGuardClauses",
    shape: TargetShape::Method,
    precondition: guards_pre,
    steps: &[
        Step {
            name: "return from each arm",
            run: guards_return,
        },
        Step {
            name: "flatten chain",
            run: guards_flatten,
        },
    ],
    postcondition: guards_post,
};

#[derive(Debug)]
struct Guards {
    chain: Chain,
    /// `result = v` ending each arm (and the final else), when the method
    /// funnels its answer through a local.
    result: Option<(SymbolId, Vec<NodeId>, NodeId)>,
}

fn exits(model: &ProgramModel, block: NodeId) -> bool {
    statements(model, block)
        .last()
        .is_some_and(|s| {
            is_kind(model, *s, NodeKind::Return) || is_kind(model, *s, NodeKind::Throw)
        })
}

fn plan_guards(
    model: &ProgramModel,
    params: &Params,
    method: SymbolId,
) -> Result<Guards, Rejection> {
    let node = conditional_in(model, params, method)?;
    support::statement_slot(model, node.id)?;
    let chain = support::conditional_chain(model, node.id)
        .ok_or_else(|| Rejection::new("not a conditional chain"))?;
    if chain.arms.len() < 2 && chain.otherwise.is_none() {
        return reject("conditional has no else; it already reads as a guard clause");
    }
    let blocks: Vec<NodeId> = chain.arms.iter().map(|(_, b)| *b).chain(chain.otherwise).collect();
    if chain.arms.iter().all(|(_, b)| exits(model, *b)) {
        return Ok(Guards { chain, result: None });
    }

    // `if (a) result = x; else if (b) result = y; else result = z; return result;`
    let (block, at) = support::statement_slot(model, node.id)?;
    let after = statements(model, block).get(at + 1).copied();
    let returned = after
        .and_then(|r| model.node(r))
        .filter(|r| r.kind == NodeKind::Return)
        .and_then(|r| r.children.first().copied())
        .and_then(|v| model.node(v))
        .filter(|v| v.kind == NodeKind::Reference)
        .and_then(|v| v.symbol)
        .filter(|s| model.symbol(*s).is_some_and(|l| l.kind == SymbolKind::Local))
        .ok_or_else(|| Rejection::new("arms neither exit nor set the returned result"))?;
    let mut assigns = Vec::new();
    for b in &blocks {
        let last = statements(model, *b)
            .last()
            .copied()
            .filter(|s| {
                model
                    .node(*s)
                    .is_some_and(|n| n.kind == NodeKind::Assign && n.symbol == Some(returned))
            })
            .ok_or_else(|| Rejection::new(format!(
                "branch {b} does not end by setting the result"
            )))?;
        assigns.push(last);
    }
    let ret = after.ok_or_else(|| Rejection::new("no return follows the conditional"))?;
    Ok(Guards {
        chain,
        result: Some((returned, assigns, ret)),
    })
}

fn guards_pre(a: &Analysis<'_>) -> Check {
    plan_guards(a.model, a.params, a.target)?;
    Ok(())
}

fn guards_return(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let plan = plan_guards(cx.model(), cx.params(), method)?;
    cx.bind("conditional", Binding::Node(plan.chain.root));
    let Some((result, assigns, ret)) = plan.result else {
        return Ok(());
    };
    for assign in assigns {
        let value = cx.unwrap(assign, 0)?;
        cx.wrap(value, |t, inner| t.ret(Some(inner)))?;
    }
    if plan.chain.otherwise.is_some() {
        cx.remove(ret)?;
        let index = cx.index();
        if index.reads_of(result).is_empty() {
            for write in cx.use_sites(result) {
                cx.remove_statement_of(write)?;
            }
            cx.delete(result)?;
        }
    }
    Ok(())
}

fn guards_flatten(cx: &mut StepCx<'_>) -> StepResult {
    let root = cx.bound_node("conditional")?;
    let (block, at) = support::statement_slot(cx.model(), root)?;
    let mut next = at + 1;
    let mut current = root;
    let mut guards = vec![root];
    while let Some(otherwise) = else_of(cx.node(current)?) {
        let nested = match statements(cx.model(), otherwise).as_slice() {
            [only] if is_kind(cx.model(), *only, NodeKind::Conditional) => Some(*only),
            _ => None,
        };
        match nested {
            Some(inner) => {
                cx.move_node(inner, Anchor::Child { parent: block, index: next })?;
                cx.remove(otherwise)?;
                guards.push(inner);
                next += 1;
                current = inner;
            }
            None => {
                for statement in statements(cx.model(), otherwise) {
                    cx.move_node(statement, Anchor::Child { parent: block, index: next })?;
                    next += 1;
                }
                cx.remove(otherwise)?;
                break;
            }
        }
    }
    cx.bind("guards", Binding::Nodes(guards));
    Ok(())
}

fn guards_post(v: &Verification<'_>) -> Check {
    let Some(Binding::Nodes(guards)) = v.bindings.get("guards") else {
        return reject("guards were not recorded");
    };
    for guard in guards {
        let node = v.model.node(*guard).ok_or_else(|| Rejection::new(format!(
            "guard {guard} vanished"
        )))?;
        if else_of(node).is_some() {
            return reject(format!("guard {guard} still has an else branch"));
        }
        if !exits(v.model, then_of(node)?) {
            return reject(format!("guard {guard} does not leave the method"));
        }
    }
    Ok(())
}

// ── Replace Conditional with Polymorphism ─────────────────────────────

pub const REPLACE_CONDITIONAL_WITH_POLYMORPHISM: Recipe = Recipe {
    name: "ReplaceConditionalWithPolymorphism",
    shape: TargetShape::Method,
    precondition: polymorphism_pre,
    steps: &[
        Step {
            name: "override in each variant",
            run: polymorphism_overrides,
        },
        Step {
            name: "reduce base method",
            run: polymorphism_base,
        },
    ],
    postcondition: polymorphism_post,
};

/// Discriminant query and field of `owner`: the method tagged
/// `discriminant = <field>`.
fn discriminant(model: &ProgramModel, owner: SymbolId) -> Option<(SymbolId, String)> {
    model.methods(owner).into_iter().find_map(|m| {
        let field = model.symbol(m)?.tag(support::DISCRIMINANT)?;
        Some((m, field.to_string()))
    })
}

#[derive(Debug)]
struct Dispatch {
    chain: Chain,
    /// Variant type for each arm, in arm order.
    variants: Vec<SymbolId>,
}

fn plan_dispatch(
    model: &ProgramModel,
    params: &Params,
    method: SymbolId,
) -> Result<Dispatch, Rejection> {
    let owner = checks::owning_type(model, method)?;
    if is_static(model, method) {
        return reject("static methods cannot dispatch on the receiver");
    }
    let node = conditional_in(model, params, method)?;
    let table = support::variant_table(model, owner);
    let (query, field_name) = discriminant(model, owner)
        .filter(|_| !table.is_empty())
        .ok_or_else(|| {
            Rejection::new("type has no variant subclasses")
                .suggest("ReplaceTypeCodeWithSubclasses")
        })?;
    let field = model.member_named(Some(owner), &field_name);
    if model.body_statements(method).as_slice() != [node.id] {
        return Err(
            Rejection::new("conditional is not the whole method body").suggest("ExtractMethod")
        );
    }
    let chain = support::conditional_chain(model, node.id)
        .ok_or_else(|| Rejection::new("not a conditional chain"))?;

    let is_discriminant = |n: NodeId| {
        model
            .node(n)
            .is_some_and(|d| d.symbol.is_some() && (d.symbol == Some(query) || d.symbol == field))
    };
    let mut variants = Vec::new();
    for (condition, block) in &chain.arms {
        let constant = support::tested_constant(model, *condition, &field_name, &is_discriminant)
            .ok_or_else(|| Rejection::new(format!(
                "arm at {condition} does not test the type code"
            )))?;
        let variant = *table
            .get(&name_of(model, constant))
            .ok_or_else(|| Rejection::new(format!(
                "no subclass stands for {}",
                name_of(model, constant)
            )))?;
        if variants.contains(&variant) {
            return reject(format!("{} is tested twice", name_of(model, constant)));
        }
        if model.members(method).iter().any(|m| {
            model.symbol(*m).is_some_and(|s| s.kind == SymbolKind::Local)
                && model.symbols_referenced(*block).contains(m)
        }) {
            return Err(
                Rejection::new(format!("arm at {condition} uses locals of the method"))
                    .suggest("ExtractMethod"),
            );
        }
        variants.push(variant);
    }
    if chain.otherwise.is_none() && variants.len() != table.len() {
        return reject("not every variant is handled and there is no default branch");
    }
    Ok(Dispatch { chain, variants })
}

fn polymorphism_pre(a: &Analysis<'_>) -> Check {
    let plan = plan_dispatch(a.model, a.params, a.target)?;
    let name = name_of(a.model, a.target);
    for variant in &plan.variants {
        checks::name_free(a.model, *variant, &name)?;
    }
    Ok(())
}

fn polymorphism_overrides(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let plan = plan_dispatch(cx.model(), cx.params(), method)?;
    let owner = checks::owning_type(cx.model(), method)?;
    let source = cx.symbol(method)?.clone();
    let mut overrides = Vec::new();
    for ((_, block), variant) in plan.chain.arms.iter().zip(&plan.variants) {
        let modifiers = Modifiers {
            visibility: source.modifiers.visibility,
            ..Modifiers::default()
        };
        let copy = cx.add_method(*variant, &source.name, modifiers, source.type_ref)?;
        let remap: HashMap<SymbolId, SymbolId> =
            support::copy_params(cx, method, copy, &[])?.into_iter().collect();
        let tree = cx.clone_tree(*block, &remap)?;
        cx.insert(tree, Anchor::Body(copy))?;
        for used in cx.model().symbols_referenced(*block) {
            let declared_here = cx.model().symbol(used).is_some_and(|s| s.owner == Some(owner));
            if declared_here {
                support::open_to_subtypes(cx, used)?;
            }
        }
        overrides.push(copy);
    }
    cx.bind("overrides", Binding::Symbols(overrides));
    Ok(())
}

fn polymorphism_base(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let plan = plan_dispatch(cx.model(), cx.params(), method)?;
    let body = cx.body_block(method)?;
    match plan.chain.otherwise {
        Some(otherwise) => {
            for (i, statement) in statements(cx.model(), otherwise).into_iter().enumerate() {
                cx.move_node(statement, Anchor::Child { parent: body, index: i })?;
            }
            cx.remove(plan.chain.root)?;
        }
        // Every variant answers for itself.
        None => cx.remove(body)?,
    }
    Ok(())
}

fn polymorphism_post(v: &Verification<'_>) -> Check {
    let overrides = v.symbols("overrides");
    if overrides.is_empty() {
        return reject("no override was declared");
    }
    for o in overrides {
        if v.index.overrides(o) != Some(v.target) {
            return reject(format!(
                "{} does not override the base method",
                v.model.qualified_name(o)
            ));
        }
    }
    Ok(())
}

// ── Introduce Null Object ─────────────────────────────────────────────

pub const INTRODUCE_NULL_OBJECT: Recipe = Recipe {
    name: "IntroduceNullObject",
    shape: TargetShape::Type,
    precondition: null_object_pre,
    steps: &[
        Step {
            name: "declare null class",
            run: null_object_declare,
        },
        Step {
            name: "replace null checks",
            run: null_object_checks,
        },
        Step {
            name: "hand out the null object",
            run: null_object_returns,
        },
    ],
    postcondition: null_object_post,
};

const NULL: &str = "null";
const IS_NULL: &str = "isNull";

#[derive(Debug, Clone, Copy)]
struct NullCheck {
    op: NodeId,
    /// Operand position of the tested expression.
    tested: usize,
    negated: bool,
}

fn is_null(model: &ProgramModel, node: NodeId) -> bool {
    literal_text(model, node) == Some(NULL)
}

/// `x == null` and `x != null` where `x` is statically of type `ty`.
fn null_checks(model: &ProgramModel, ty: SymbolId) -> Vec<NullCheck> {
    let mut found: Vec<NullCheck> = model
        .nodes()
        .filter(|n| n.kind == NodeKind::Operator && n.children.len() == 2)
        .filter_map(|n| {
            let negated = match n.text.as_deref() {
                Some("==") => false,
                Some("!=") => true,
                _ => return None,
            };
            let tested = match (is_null(model, n.children[0]), is_null(model, n.children[1])) {
                (false, true) => 0,
                (true, false) => 1,
                _ => return None,
            };
            (support::static_type(model, n.children[tested]) == Some(ty)).then_some(NullCheck {
                op: n.id,
                tested,
                negated,
            })
        })
        .collect();
    found.sort_by_key(|c| c.op);
    found
}

/// `null` literals handed out where a `ty` is expected: returned from a
/// method declared to return it, or initialising a field of it.
fn null_sources(model: &ProgramModel, ty: SymbolId) -> Vec<NodeId> {
    let mut found: Vec<NodeId> = model
        .nodes()
        .filter(|n| is_null(model, n.id))
        .filter(|n| match model.parent(n.id) {
            Some(Parent::Node(p)) => {
                is_kind(model, p, NodeKind::Return)
                    && model
                        .enclosing_symbol(p)
                        .and_then(|m| model.symbol(m))
                        .is_some_and(|m| m.type_ref == Some(ty))
            }
            Some(Parent::Body(field)) => model
                .symbol(field)
                .is_some_and(|f| f.kind == SymbolKind::Field && f.type_ref == Some(ty)),
            None => false,
        })
        .map(|n| n.id)
        .collect();
    found.sort();
    found
}

fn null_name(model: &ProgramModel, ty: SymbolId, params: &Params) -> Result<String, Rejection> {
    Ok(params.name_or("name", || format!("Null{}", name_of(model, ty)))?)
}

fn null_object_pre(a: &Analysis<'_>) -> Check {
    let ty = a.target;
    if a.symbol()?.modifiers.is_final {
        return reject("type is final and cannot be subclassed");
    }
    let name = null_name(a.model, ty, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, ty)?, &name)?;
    checks::name_free_in_hierarchy(a.model, ty, IS_NULL)?;
    if null_checks(a.model, ty).is_empty() {
        return reject(format!("nothing compares a {} with null", a.name()));
    }
    Ok(())
}

fn answer(cx: &mut StepCx<'_>, method: SymbolId, value: &str) -> StepResult {
    let body = cx.build(|t| {
        let v = t.lit(value);
        let ret = t.ret(Some(v));
        t.block(vec![ret])
    });
    cx.insert(body, Anchor::Body(method))?;
    Ok(())
}

fn null_object_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let name = null_name(cx.model(), ty, cx.params())?;
    let module = support::module_of(cx.model(), ty)?;
    let null = cx.add_type(module, &name, Some(ty))?;
    let query = cx.add_method(ty, IS_NULL, Modifiers::default(), None)?;
    answer(cx, query, "false")?;
    let answer_true = cx.add_method(null, IS_NULL, Modifiers::default(), None)?;
    answer(cx, answer_true, "true")?;
    cx.bind_symbol("null", null);
    cx.bind_symbol("query", query);
    Ok(())
}

fn null_object_checks(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let query = cx.bound_symbol("query")?;
    for check in null_checks(cx.model(), ty) {
        let tested = cx.unwrap(check.op, check.tested)?;
        cx.wrap(tested, |t, inner| {
            let q = t.call(query, Vec::new());
            let asked = t.select(inner, q);
            if check.negated { t.op("!", vec![asked]) } else { asked }
        })?;
    }
    Ok(())
}

fn null_object_returns(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let null = cx.bound_symbol("null")?;
    for source in null_sources(cx.model(), ty) {
        cx.replace_with(source, |t| t.new_instance(null, Vec::new()))?;
    }
    Ok(())
}

fn null_object_post(v: &Verification<'_>) -> Check {
    v.exists("null")?;
    v.exists("query")?;
    let left = null_checks(v.model, v.target).len();
    if left == 0 {
        Ok(())
    } else {
        reject(format!("{left} null comparison(s) remain"))
    }
}

// ── Introduce Assertion ───────────────────────────────────────────────

pub const INTRODUCE_ASSERTION: Recipe = Recipe {
    name: "IntroduceAssertion",
    shape: TargetShape::Method,
    precondition: assertion_pre,
    steps: &[Step {
        name: "insert assertion",
        run: assertion_insert,
    }],
    postcondition: assertion_post,
};

fn assertion_spec(params: &Params) -> Result<crate::params::ExprSpec, Rejection> {
    params
        .expr("condition")?
        .ok_or_else(|| Rejection::new("invalid parameter `condition`: is required"))
}

fn assertion_pre(a: &Analysis<'_>) -> Check {
    let spec = assertion_spec(a.params)?;
    support::check_expr(a.model, &spec, Some(a.target))?;
    let body = checks::body_block(a.model, a.target)?;
    let at = a.params.index("at")?.unwrap_or(0);
    let len = statements(a.model, body).len();
    if at > len {
        return reject(format!("position {at} is past the {len} statements of the body"));
    }
    Ok(())
}

fn assertion_insert(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let spec = assertion_spec(cx.params())?;
    let at = cx.params().index("at")?.unwrap_or(0);
    let condition = cx.build_expr(&spec)?;
    let assertion = cx.build(|t| {
        let c = t.graft(condition);
        t.assert(c)
    });
    let body = cx.body_block(method)?;
    let node = cx.insert_statement(body, at, assertion)?;
    cx.bind("assertion", Binding::Node(node));
    Ok(())
}

fn assertion_post(v: &Verification<'_>) -> Check {
    match v.bindings.get("assertion") {
        Some(Binding::Node(node))
            if is_kind(v.model, *node, NodeKind::Assert)
                && v.model.enclosing_symbol(*node) == Some(v.target) =>
        {
            Ok(())
        }
        _ => reject("assertion is not in the method body"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecastConfig;
    use crate::session::Session;
    use recast_model::{ModelBuilder, check_well_formed};
    use serde_json::json;

    fn resolve(s: &Session, path: &str) -> Option<SymbolId> {
        s.snapshot().model.resolve(&path.parse().unwrap()).ok()
    }

    fn session(b: ModelBuilder) -> Session {
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn decompose_extracts_condition_and_branches() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let bill = b.ty(app, "Bill");
        let charge = b.method(bill, "charge");
        let day = b.param(charge, "day");
        let quantity = b.param(charge, "quantity");
        let total = b.local(charge, "total");
        let d = b.read(day);
        let start = b.lit("90");
        let condition = b.op("<", vec![d, start]);
        let q = b.read(quantity);
        let rate = b.lit("2");
        let winter = b.op("*", vec![q, rate]);
        let set_winter = b.assign(total, winter);
        let q = b.read(quantity);
        let set_summer = b.assign(total, q);
        let conditional = b.cond(condition, vec![set_winter], Some(vec![set_summer]));
        let t = b.read(total);
        let ret = b.ret(Some(t));
        b.body(charge, vec![conditional, ret]);
        let s = session(b);

        let params = Params::new()
            .with("node", conditional.0)
            .with("name", "isWinter")
            .with("then", "winterCharge");
        let verdict = s.check("DecomposeConditional", "app::Bill::charge", &params).unwrap();
        // `total` is assigned in the branch and read after it.
        assert!(!verdict.is_accepted());

        let params = Params::new().with("node", conditional.0).with("name", "isWinter");
        s.perform("DecomposeConditional", "app::Bill::charge", &params).unwrap();
        let query = resolve(&s, "app::Bill::isWinter").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(
            snapshot.model.symbol(query).unwrap().modifiers.visibility,
            recast_model::Visibility::Private
        );
        assert_eq!(snapshot.model.params(query).len(), 1);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    /// `disabilityAmount` with three guards returning zero.
    fn disability() -> (Session, Vec<NodeId>) {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let employee = b.ty(app, "Employee");
        let seniority = b.field(employee, "seniority");
        let months = b.field(employee, "monthsDisabled");
        let part_time = b.field(employee, "isPartTime");
        let amount = b.method(employee, "disabilityAmount");
        let mut conditionals = Vec::new();
        let checks = [
            (seniority, "<", "2"),
            (months, ">", "12"),
            (part_time, "==", "true"),
        ];
        for (field, op, limit) in checks {
            let f = b.read(field);
            let l = b.lit(limit);
            let test = b.op(op, vec![f, l]);
            let zero = b.lit("0");
            let ret = b.ret(Some(zero));
            conditionals.push(b.cond(test, vec![ret], None));
        }
        let rest = b.lit("100");
        let ret = b.ret(Some(rest));
        let mut statements = conditionals.clone();
        statements.push(ret);
        b.body(amount, statements);
        (session(b), conditionals)
    }

    #[test]
    fn consolidates_a_sequence_of_checks() {
        let (s, conditionals) = disability();
        let ids: Vec<u32> = conditionals.iter().map(|n| n.0).collect();
        let params = Params::new().with("nodes", json!(ids)).with("name", "isNotEligible");
        s.perform("ConsolidateConditionalExpression", "app::Employee::disabilityAmount", &params)
            .unwrap();
        let amount = resolve(&s, "app::Employee::disabilityAmount").unwrap();
        let query = resolve(&s, "app::Employee::isNotEligible").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.body_statements(amount).len(), 2);
        assert_eq!(snapshot.index.callers_of(query), vec![amount]);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn hoists_shared_trailing_statement() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let deal = b.ty(app, "Deal");
        let total = b.field(deal, "total");
        let special = b.field(deal, "special");
        let send = b.method(deal, "send");
        let price = b.method(deal, "close");
        let s_ = b.read(special);
        let p = b.lit("95");
        let set_special = b.assign(total, p);
        let first_send = b.call(send, vec![]);
        let p = b.lit("98");
        let set_regular = b.assign(total, p);
        let second_send = b.call(send, vec![]);
        let conditional = b.cond(
            s_,
            vec![set_special, first_send],
            Some(vec![set_regular, second_send]),
        );
        b.body(price, vec![conditional]);
        let s = session(b);

        let params = Params::new().with("node", conditional.0);
        s.perform("ConsolidateDuplicateConditionalFragments", "app::Deal::close", &params)
            .unwrap();
        let close = resolve(&s, "app::Deal::close").unwrap();
        let snapshot = s.snapshot();
        let body = snapshot.model.body_statements(close);
        assert_eq!(body.len(), 2);
        assert_eq!(body[1], first_send);
        assert!(snapshot.model.node(second_send).is_none());
    }

    #[test]
    fn control_flag_becomes_break() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let security = b.ty(app, "Security");
        let alert = b.method(security, "sendAlert");
        let check = b.method(security, "checkSecurity");
        let person = b.param(check, "person");
        let found = b.local(check, "found");
        let no = b.lit("false");
        let init = b.assign(found, no);
        let f = b.read(found);
        let not_found = b.op("!", vec![f]);
        let p = b.read(person);
        let don = b.lit("\"Don\"");
        let is_don = b.op("==", vec![p, don]);
        let raise = b.call(alert, vec![]);
        let yes = b.lit("true");
        let stop = b.assign(found, yes);
        let hit = b.cond(is_don, vec![raise, stop], None);
        let lp = b.while_loop(not_found, vec![hit]);
        b.body(check, vec![init, lp]);
        let s = session(b);

        s.perform("RemoveControlFlag", "app::Security::checkSecurity::found", &Params::new())
            .unwrap();
        assert!(resolve(&s, "app::Security::checkSecurity::found").is_none());
        let snapshot = s.snapshot();
        let condition = snapshot.model.node(lp).unwrap().children[0];
        assert_eq!(literal_text(&snapshot.model, condition), Some("true"));
        assert!(
            snapshot
                .model
                .descendants(lp)
                .into_iter()
                .any(|n| is_kind(&snapshot.model, n, NodeKind::Break))
        );
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn nested_result_becomes_guard_clauses() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let payroll = b.ty(app, "Payroll");
        let dead = b.field(payroll, "isDead");
        let separated = b.field(payroll, "isSeparated");
        let pay = b.method(payroll, "payAmount");
        let result = b.local(pay, "result");
        let d = b.read(dead);
        let v = b.lit("1");
        let set_dead = b.assign(result, v);
        let s_ = b.read(separated);
        let v = b.lit("2");
        let set_separated = b.assign(result, v);
        let v = b.lit("3");
        let set_normal = b.assign(result, v);
        let inner = b.cond(s_, vec![set_separated], Some(vec![set_normal]));
        let outer = b.cond(d, vec![set_dead], Some(vec![inner]));
        let r = b.read(result);
        let ret = b.ret(Some(r));
        b.body(pay, vec![outer, ret]);
        let s = session(b);

        let params = Params::new().with("node", outer.0);
        s.perform("ReplaceNestedConditionalWithGuardClauses", "app::Payroll::payAmount", &params)
            .unwrap();
        let pay = resolve(&s, "app::Payroll::payAmount").unwrap();
        assert!(resolve(&s, "app::Payroll::payAmount::result").is_none());
        let snapshot = s.snapshot();
        let body = snapshot.model.body_statements(pay);
        assert_eq!(body, vec![outer, inner, body[2]]);
        assert!(is_kind(&snapshot.model, body[2], NodeKind::Return));
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn type_code_switch_becomes_overrides() {
        let s = crate::recipes::data::tests::employees(true);
        s.perform("ReplaceTypeCodeWithSubclasses", "app::Employee::type", &Params::new()).unwrap();
        let pay = resolve(&s, "app::Employee::payAmount").unwrap();
        let conditional = s.snapshot().model.body_statements(pay)[0];
        let params = Params::new().with("node", conditional.0);
        let verdict = s
            .check("ReplaceConditionalWithPolymorphism", "app::Employee::payAmount", &params)
            .unwrap();
        // The switch is followed by a default return, so it is not the whole body.
        assert_eq!(verdict.rejection().unwrap().suggestion.as_deref(), Some("ExtractMethod"));
    }

    #[test]
    fn type_code_chain_becomes_overrides() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let employee = b.ty(app, "Employee");
        let kind = b.field(employee, "type");
        b.modifiers(kind, |m| m.visibility = recast_model::Visibility::Private);
        let mut constants = Vec::new();
        for (name, value) in [("ENGINEER", "0"), ("SALESMAN", "1")] {
            let constant = b.field(employee, name);
            b.modifiers(constant, |m| {
                m.is_static = true;
                m.is_final = true;
            });
            b.tag(constant, support::CODE_OF, "type");
            let v = b.lit(value);
            b.init(constant, v);
            constants.push(constant);
        }
        let query = b.method(employee, "getType");
        b.tag(query, support::DISCRIMINANT, "type");
        let t = b.read(kind);
        let ret = b.ret(Some(t));
        b.body(query, vec![ret]);
        for (name, code) in [("Engineer", "ENGINEER"), ("Salesman", "SALESMAN")] {
            let variant = b.subtype(app, name, employee);
            b.tag(variant, support::VARIANT, code);
        }
        let pay = b.method(employee, "payAmount");
        let mut arms = Vec::new();
        for (constant, amount) in constants.iter().zip(["100", "150"]) {
            let q = b.call(query, vec![]);
            let c = b.read(*constant);
            let test = b.op("==", vec![q, c]);
            let v = b.lit(amount);
            let ret = b.ret(Some(v));
            arms.push((test, ret));
        }
        let zero = b.lit("0");
        let fallback = b.ret(Some(zero));
        let inner = b.cond(arms[1].0, vec![arms[1].1], Some(vec![fallback]));
        let outer = b.cond(arms[0].0, vec![arms[0].1], Some(vec![inner]));
        b.body(pay, vec![outer]);
        let s = session(b);

        let params = Params::new().with("node", outer.0);
        s.perform("ReplaceConditionalWithPolymorphism", "app::Employee::payAmount", &params)
            .unwrap();
        let pay = resolve(&s, "app::Employee::payAmount").unwrap();
        let engineer = resolve(&s, "app::Engineer::payAmount").unwrap();
        assert!(resolve(&s, "app::Salesman::payAmount").is_some());
        let snapshot = s.snapshot();
        assert_eq!(snapshot.index.overrides(engineer), Some(pay));
        let base = snapshot.model.body_statements(pay);
        assert_eq!(base, vec![fallback]);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn null_checks_become_queries() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let customer = b.ty(app, "Customer");
        let site = b.ty(app, "Site");
        let holder = b.field(site, "customer");
        b.typed(holder, customer);
        let get = b.method(site, "getCustomer");
        b.typed(get, customer);
        let c = b.read(holder);
        let ret = b.ret(Some(c));
        b.body(get, vec![ret]);
        let plan = b.method(site, "plan");
        let c = b.call(get, vec![]);
        let null = b.lit("null");
        let test = b.op("==", vec![c, null]);
        let basic = b.lit("\"basic\"");
        let ret = b.ret(Some(basic));
        let check = b.cond(test, vec![ret], None);
        let premium = b.lit("\"premium\"");
        let ret = b.ret(Some(premium));
        b.body(plan, vec![check, ret]);
        let s = session(b);

        s.perform("IntroduceNullObject", "app::Customer", &Params::new()).unwrap();
        let null = resolve(&s, "app::NullCustomer").unwrap();
        let query = resolve(&s, "app::Customer::isNull").unwrap();
        let plan = resolve(&s, "app::Site::plan").unwrap();
        let snapshot = s.snapshot();
        let customer = resolve(&s, "app::Customer").unwrap();
        assert_eq!(snapshot.model.symbol(null).unwrap().supertype, Some(customer));
        assert_eq!(snapshot.index.callers_of(query), vec![plan]);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn assertion_is_inserted_first() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let project = b.ty(app, "Project");
        b.field(project, "expenseLimit");
        let cap = b.method(project, "cap");
        let amount = b.param(cap, "amount");
        let a = b.read(amount);
        let ret = b.ret(Some(a));
        b.body(cap, vec![ret]);
        let s = session(b);

        let condition = json!({
            "op": "!=",
            "args": [{"ref": "app::Project::expenseLimit"}, {"lit": "null"}],
        });
        let params = Params::new().with("condition", condition);
        s.perform("IntroduceAssertion", "app::Project::cap", &params).unwrap();
        let cap = resolve(&s, "app::Project::cap").unwrap();
        let snapshot = s.snapshot();
        let first = snapshot.model.body_statements(cap)[0];
        assert!(is_kind(&snapshot.model, first, NodeKind::Assert));

        let bad = Params::new().with("condition", json!({"ref": "app::Project::missing"}));
        assert!(!s.check("IntroduceAssertion", "app::Project::cap", &bad).unwrap().is_accepted());
    }
}
