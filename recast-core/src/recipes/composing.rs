// Composing methods: extracting, inlining and reshaping method bodies.

use std::collections::HashMap;

use recast_model::{
    Anchor, Modifiers, NodeId, NodeKind, Parent, ProgramModel, ReferenceIndex, SymbolId, SymbolKind,
};

use super::support::{self, is_kind, name_of};
use crate::analyzer::checks;
use crate::analyzer::similarity;
use crate::analyzer::{Analysis, Check, ConflictKind, Rejection, Verification, reject};
use crate::engine::{Binding, StepCx, StepResult};
use crate::error::StepError;
use crate::params::{Params, RangeSpec};
use crate::registry::{Recipe, Step, TargetShape};

pub fn recipes() -> Vec<Recipe> {
    vec![
        EXTRACT_METHOD,
        INLINE_METHOD,
        INLINE_TEMP,
        REPLACE_TEMP_WITH_QUERY,
        INTRODUCE_EXPLAINING_VARIABLE,
        SPLIT_TEMPORARY_VARIABLE,
        REMOVE_ASSIGNMENTS_TO_PARAMETERS,
        REPLACE_METHOD_WITH_METHOD_OBJECT,
        SUBSTITUTE_ALGORITHM,
    ]
}

// ── Extract Method ────────────────────────────────────────────────────

pub const EXTRACT_METHOD: Recipe = Recipe {
    name: "ExtractMethod",
    shape: TargetShape::Method,
    precondition: extract_method_pre,
    steps: &[
        Step {
            name: "declare method",
            run: extract_declare,
        },
        Step {
            name: "insert call",
            run: extract_call,
        },
        Step {
            name: "move statements",
            run: extract_move,
        },
    ],
    postcondition: extract_method_post,
};

/// What an extraction carries along.
#[derive(Debug)]
pub(crate) struct Extraction {
    pub statements: Vec<NodeId>,
    /// Variables the range reads that are needed outside it; they become
    /// parameters of the new method.
    pub passed: Vec<SymbolId>,
    /// Locals used only inside the range; they move with it.
    pub moved: Vec<SymbolId>,
}

fn require_range(params: &Params) -> Result<RangeSpec, Rejection> {
    params
        .range("range")?
        .ok_or_else(|| Rejection::new("invalid parameter `range`: is required"))
}

/// Whether a `break` is caught by a loop inside `statement`.
fn breaks_inside(model: &ProgramModel, node: NodeId, statement: NodeId) -> bool {
    let mut current = node;
    while current != statement {
        match model.parent(current) {
            Some(Parent::Node(parent)) => {
                if is_kind(model, parent, NodeKind::Loop) {
                    return true;
                }
                current = parent;
            }
            _ => return false,
        }
    }
    false
}

pub(crate) fn plan_extraction(
    model: &ProgramModel,
    index: &ReferenceIndex,
    method: SymbolId,
    spec: RangeSpec,
) -> Result<Extraction, Rejection> {
    if spec.start >= spec.end {
        return reject("statement range is empty");
    }
    let range = checks::statement_range(model, method, spec)?;
    let statements = model
        .node(range.block)
        .map(|b| b.children[range.start..range.end].to_vec())
        .unwrap_or_default();

    for statement in &statements {
        for id in model.descendants(*statement) {
            match model.node(id).map(|n| n.kind) {
                Some(NodeKind::Return) => return reject("range returns from the method"),
                Some(NodeKind::Break) if !breaks_inside(model, id, *statement) => {
                    return reject("range breaks out of an enclosing loop");
                }
                _ => {}
            }
        }
    }

    let mut passed = Vec::new();
    let mut moved = Vec::new();
    for var in checks::variables_used(model, &statements, method) {
        let Some(symbol) = model.symbol(var) else {
            continue;
        };
        let written_inside = index
            .writes_of(var)
            .iter()
            .filter_map(|e| e.site.node())
            .any(|n| index.range_contains(&range, n));
        let needed_outside =
            symbol.kind == SymbolKind::Parameter || index.is_used_outside_range(var, &range);
        match (needed_outside, written_inside) {
            (false, _) => moved.push(var),
            (true, false) => passed.push(var),
            (true, true) => {
                return reject(format!(
                    "`{}` is assigned in the range and used outside it",
                    symbol.name
                ));
            }
        }
    }
    Ok(Extraction {
        statements,
        passed,
        moved,
    })
}

fn extract_method_pre(a: &Analysis<'_>) -> Check {
    let name = a.params.require_name("name")?;
    let owner = support::owner_of(a.model, a.target)?;
    checks::name_free(a.model, owner, &name)?;
    plan_extraction(a.model, a.index, a.target, require_range(a.params)?)?;
    Ok(())
}

fn extract_declare(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let name = cx.params().require_name("name")?;
    let spec = require_range(cx.params())?;
    let index = cx.index();
    let plan = plan_extraction(cx.model(), &index, method, spec)?;

    let owner = support::owner_of(cx.model(), method)?;
    let mut modifiers = Modifiers::private();
    modifiers.is_static = cx.symbol(method)?.modifiers.is_static;
    let extracted = cx.add_method(owner, &name, modifiers, None)?;
    let mut params = Vec::new();
    for var in &plan.passed {
        let source = cx.symbol(*var)?.clone();
        params.push(cx.add_param(extracted, &source.name, source.type_ref, None)?);
    }

    cx.bind_symbol("method", extracted);
    cx.bind("passed", Binding::Symbols(plan.passed));
    cx.bind("params", Binding::Symbols(params));
    cx.bind("moved", Binding::Symbols(plan.moved));
    cx.bind("statements", Binding::Nodes(plan.statements));
    Ok(())
}

fn extract_call(cx: &mut StepCx<'_>) -> StepResult {
    let extracted = cx.bound_symbol("method")?;
    let passed = cx.bound_symbols("passed");
    let first = *cx
        .bound_nodes("statements")
        .first()
        .ok_or_else(|| StepError::plan("nothing to extract"))?;
    let (block, start) = support::statement_slot(cx.model(), first)?;
    let call = cx.build(|t| {
        let args = passed.iter().map(|v| t.read(*v)).collect();
        t.call(extracted, args)
    });
    let call = cx.insert_statement(block, start, call)?;
    cx.bind("call", Binding::Node(call));
    Ok(())
}

fn extract_move(cx: &mut StepCx<'_>) -> StepResult {
    let extracted = cx.bound_symbol("method")?;
    let statements = cx.bound_nodes("statements");
    let body = cx.ensure_body(extracted)?;
    for (i, statement) in statements.iter().enumerate() {
        cx.move_node(*statement, Anchor::Child { parent: body, index: i })?;
    }
    for local in cx.bound_symbols("moved") {
        cx.move_symbol(local, extracted, None)?;
    }
    let remap: HashMap<SymbolId, SymbolId> = cx
        .bound_symbols("passed")
        .into_iter()
        .zip(cx.bound_symbols("params"))
        .collect();
    for statement in statements {
        support::rewire_within(cx, statement, &remap)?;
    }
    Ok(())
}

fn extract_method_post(v: &Verification<'_>) -> Check {
    v.exists("method")?;
    let Some(extracted) = v.symbol("method") else {
        return reject("extracted method is not bound");
    };
    if v.index.callers_of(extracted) == vec![v.target] {
        Ok(())
    } else {
        reject("extracted method is not called from its origin")
    }
}

// ── Inline Method ─────────────────────────────────────────────────────

pub const INLINE_METHOD: Recipe = Recipe {
    name: "InlineMethod",
    shape: TargetShape::Method,
    precondition: inline_method_pre,
    steps: &[
        Step {
            name: "inline call sites",
            run: inline_sites,
        },
        Step {
            name: "delete method",
            run: inline_delete,
        },
    ],
    postcondition: target_gone,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InlineForm {
    /// The body is `return expr`; call sites take the expression.
    Expression(NodeId),
    /// The body is plain statements; call sites must be statements.
    Statements,
}

#[derive(Debug)]
struct InlinePlan {
    form: InlineForm,
    sites: Vec<NodeId>,
}

fn plan_inline(
    model: &ProgramModel,
    index: &ReferenceIndex,
    method: SymbolId,
) -> Result<InlinePlan, Rejection> {
    checks::body_block(model, method)?;
    if index.callers_of(method).contains(&method) {
        return reject("method is recursive");
    }
    for param in model.params(method) {
        if !index.writes_of(param).is_empty() {
            return Err(Rejection::new(format!(
                "parameter `{}` is assigned in the body",
                name_of(model, param)
            ))
            .suggest("RemoveAssignmentsToParameters"));
        }
    }

    let statements = model.body_statements(method);
    let returned = match statements.as_slice() {
        [only] => model
            .node(*only)
            .filter(|n| n.kind == NodeKind::Return && n.children.len() == 1)
            .map(|n| n.children[0]),
        _ => None,
    };
    let form = match returned {
        Some(expr) => {
            let locals = model.locals(method);
            if model.symbols_referenced(expr).iter().any(|s| locals.contains(s)) {
                return reject("returned expression reads local variables");
            }
            InlineForm::Expression(expr)
        }
        None if model
            .body_nodes(method)
            .iter()
            .any(|id| is_kind(model, *id, NodeKind::Return)) =>
        {
            return reject("body returns from more than one place");
        }
        None => InlineForm::Statements,
    };

    let owner = model.owning_type(method);
    let uses_own = owner.is_some_and(|o| !support::uses_of_members(model, method, o).is_empty())
        || !support::this_nodes(model, method).is_empty();
    let sites: Vec<NodeId> = index
        .calls_to(method)
        .into_iter()
        .filter_map(|e| e.site.node())
        .collect();
    let locals = model.locals(method);
    for site in &sites {
        if sites.iter().any(|other| other != site && model.is_within(*site, *other)) {
            return reject("call sites are nested inside each other's arguments");
        }
        if uses_own && !support::is_self_access(model, *site) {
            return reject(format!(
                "call at {site} goes through a receiver the body's member accesses cannot follow"
            ));
        }
        if form == InlineForm::Statements
            && !support::is_statement(model, support::access_root(model, *site))
        {
            return reject(format!("call at {site} uses a value the body does not return"));
        }
        let caller = model
            .enclosing_symbol(*site)
            .ok_or_else(|| Rejection::new(format!("call at {site} is detached")))?;
        let caller_kind = model.symbol(caller).map(|s| s.kind);
        if form == InlineForm::Statements && caller_kind != Some(SymbolKind::Method) {
            return reject(format!("call at {site} is not inside a method"));
        }
        for local in &locals {
            let name = name_of(model, *local);
            if form == InlineForm::Statements && model.member_named(Some(caller), &name).is_some() {
                return Err(Rejection::new("name collision").with_conflict(
                    ConflictKind::NameCollision,
                    model.qualified_name(caller),
                    format!("already declares `{name}`"),
                ));
            }
        }
    }
    Ok(InlinePlan { form, sites })
}

fn inline_method_pre(a: &Analysis<'_>) -> Check {
    checks::not_polymorphic(a.model, a.index, a.target)?;
    plan_inline(a.model, a.index, a.target)?;
    Ok(())
}

fn inline_sites(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let index = cx.index();
    let plan = plan_inline(cx.model(), &index, method)?;
    let params = cx.model().params(method);
    let locals = cx.model().locals(method);
    let single = plan.sites.len() == 1;

    for site in plan.sites {
        let caller = cx
            .model()
            .enclosing_symbol(site)
            .ok_or_else(|| StepError::plan(format!("call at {site} is detached")))?;
        let outer = support::access_root(cx.model(), site);
        let args = cx.node(site)?.children.clone();
        let mut bound = Vec::new();
        for (i, param) in params.iter().enumerate() {
            let arg = *args
                .get(i)
                .ok_or_else(|| StepError::plan(format!(
                    "call at {site} passes too few arguments"
                )))?;
            bound.push((*param, cx.clone_tree(arg, &HashMap::new())?));
        }

        match plan.form {
            InlineForm::Expression(expr) => {
                let at = cx.anchor_of(outer)?;
                let tree = cx.clone_tree(expr, &HashMap::new())?;
                cx.remove(outer)?;
                let root = cx.insert(tree, at)?;
                support::substitute(cx, root, &bound)?;
            }
            InlineForm::Statements => {
                let mut remap = HashMap::new();
                for local in &locals {
                    if single {
                        cx.move_symbol(*local, caller, None)?;
                    } else {
                        let source = cx.symbol(*local)?.clone();
                        remap.insert(*local, cx.add_local(caller, &source.name, source.type_ref)?);
                    }
                }
                let (block, position) = support::statement_slot(cx.model(), outer)?;
                let mut inserted = Vec::new();
                for (k, statement) in cx.model().body_statements(method).into_iter().enumerate() {
                    let tree = cx.clone_tree(statement, &remap)?;
                    inserted.push(cx.insert_statement(block, position + k, tree)?);
                }
                cx.remove(outer)?;
                for root in inserted {
                    support::substitute(cx, root, &bound)?;
                }
            }
        }
    }
    Ok(())
}

fn inline_delete(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    cx.delete_method(method)
}

fn target_gone(v: &Verification<'_>) -> Check {
    if v.target_exists() {
        reject(format!("{} still exists", v.model.qualified_name(v.target)))
    } else {
        Ok(())
    }
}

// ── Inline Temp ───────────────────────────────────────────────────────

pub const INLINE_TEMP: Recipe = Recipe {
    name: "InlineTemp",
    shape: TargetShape::Local,
    precondition: inline_temp_pre,
    steps: &[
        Step {
            name: "replace reads",
            run: inline_temp_reads,
        },
        Step {
            name: "remove assignment",
            run: remove_bound_assignment,
        },
        Step {
            name: "delete variable",
            run: delete_target,
        },
    ],
    postcondition: target_gone,
};

/// The only assignment of a temp, standing as a statement of its own.
#[derive(Debug, Clone, Copy)]
struct TempAssignment {
    write: NodeId,
    block: NodeId,
    position: usize,
    value: NodeId,
}

fn sole_assignment(
    model: &ProgramModel,
    index: &ReferenceIndex,
    local: SymbolId,
) -> Result<TempAssignment, Rejection> {
    let write = checks::single_write(model, index, local)?;
    let (block, position) = support::statement_slot(model, write)
        .map_err(|_| Rejection::new("assignment is nested inside another statement"))?;
    let value = model
        .node(write)
        .and_then(|n| n.children.first().copied())
        .ok_or_else(|| Rejection::new("assignment has no value"))?;
    for read in index.reads_of(local).into_iter().filter_map(|e| e.site.node()) {
        if !index.statement_of(read, block).is_some_and(|i| i > position) {
            return reject("variable is read before it is assigned");
        }
    }
    Ok(TempAssignment {
        write,
        block,
        position,
        value,
    })
}

fn inline_temp_pre(a: &Analysis<'_>) -> Check {
    let local = a.target;
    let method = checks::owning_method(a.model, local)?;
    let assignment = sole_assignment(a.model, a.index, local)?;
    if checks::has_side_effects(a.model, assignment.value) {
        return reject("assigned value has side effects");
    }
    for var in checks::variables_used(a.model, &[assignment.value], method) {
        if var == local {
            return reject("assigned value reads the variable itself");
        }
        let reassigned = a
            .index
            .writes_of(var)
            .iter()
            .filter_map(|e| e.site.node())
            .any(|n| {
                a.index
                    .statement_of(n, assignment.block)
                    .is_none_or(|i| i > assignment.position)
            });
        if reassigned {
            return reject(format!(
                "assigned value depends on `{}`, which changes afterwards",
                name_of(a.model, var)
            ));
        }
    }
    Ok(())
}

fn inline_temp_reads(cx: &mut StepCx<'_>) -> StepResult {
    let local = cx.target();
    let index = cx.index();
    let assignment = sole_assignment(cx.model(), &index, local)?;
    let reads: Vec<NodeId> = index
        .reads_of(local)
        .into_iter()
        .filter_map(|e| e.site.node())
        .collect();
    for read in reads {
        let copy = cx.clone_tree(assignment.value, &HashMap::new())?;
        cx.replace(read, copy)?;
    }
    cx.bind("assignment", Binding::Node(assignment.write));
    Ok(())
}

fn remove_bound_assignment(cx: &mut StepCx<'_>) -> StepResult {
    let write = cx.bound_node("assignment")?;
    cx.remove(write)
}

fn delete_target(cx: &mut StepCx<'_>) -> StepResult {
    let target = cx.target();
    cx.delete(target)
}

// ── Replace Temp with Query ───────────────────────────────────────────

pub const REPLACE_TEMP_WITH_QUERY: Recipe = Recipe {
    name: "ReplaceTempWithQuery",
    shape: TargetShape::Local,
    precondition: temp_query_pre,
    steps: &[
        Step {
            name: "declare query",
            run: temp_query_declare,
        },
        Step {
            name: "call query",
            run: temp_query_calls,
        },
        Step {
            name: "remove assignment",
            run: remove_bound_assignment,
        },
        Step {
            name: "delete variable",
            run: delete_target,
        },
    ],
    postcondition: temp_query_post,
};

fn temp_query_pre(a: &Analysis<'_>) -> Check {
    let local = a.target;
    let method = checks::owning_method(a.model, local)?;
    let assignment = sole_assignment(a.model, a.index, local)?;
    if checks::has_side_effects(a.model, assignment.value) {
        return reject("assigned value has side effects");
    }
    if !checks::variables_used(a.model, &[assignment.value], method).is_empty() {
        return reject("assigned value depends on local variables or parameters");
    }
    let name = a.params.name_or("name", || name_of(a.model, local))?;
    let owner = support::owner_of(a.model, method)?;
    checks::name_free(a.model, owner, &name)
}

fn temp_query_declare(cx: &mut StepCx<'_>) -> StepResult {
    let local = cx.target();
    let source = cx.symbol(local)?.clone();
    let name = cx.params().name_or("name", || source.name.clone())?;
    let method = source.owner.ok_or_else(|| StepError::plan("variable has no owner"))?;
    let owner = support::owner_of(cx.model(), method)?;

    let index = cx.index();
    let assignment = sole_assignment(cx.model(), &index, local)?;
    let mut modifiers = Modifiers::private();
    modifiers.is_static = cx.symbol(method)?.modifiers.is_static;
    let query = cx.add_method(owner, &name, modifiers, source.type_ref)?;
    let body = cx.build(|t| {
        let ret = t.ret(None);
        t.block(vec![ret])
    });
    let block = cx.insert(body, Anchor::Body(query))?;
    let ret = cx.node(block)?.children[0];
    cx.move_node(assignment.value, Anchor::Child { parent: ret, index: 0 })?;

    cx.bind_symbol("query", query);
    cx.bind("assignment", Binding::Node(assignment.write));
    Ok(())
}

fn temp_query_calls(cx: &mut StepCx<'_>) -> StepResult {
    let local = cx.target();
    let query = cx.bound_symbol("query")?;
    let reads: Vec<NodeId> = cx
        .index()
        .reads_of(local)
        .into_iter()
        .filter_map(|e| e.site.node())
        .collect();
    for read in reads {
        cx.rewire(read, NodeKind::Call, query)?;
    }
    Ok(())
}

fn temp_query_post(v: &Verification<'_>) -> Check {
    v.exists("query")?;
    if v.target_exists() {
        return reject("temporary still exists");
    }
    match v.symbol("query") {
        Some(query) if v.model.params(query).is_empty() => Ok(()),
        _ => reject("query takes arguments"),
    }
}

// ── Introduce Explaining Variable ─────────────────────────────────────

pub const INTRODUCE_EXPLAINING_VARIABLE: Recipe = Recipe {
    name: "IntroduceExplainingVariable",
    shape: TargetShape::Method,
    precondition: explaining_pre,
    steps: &[Step {
        name: "introduce variable",
        run: explaining_introduce,
    }],
    postcondition: explaining_post,
};

fn explaining_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    let node_id = a.params.require_node("node")?;
    let node = checks::node_in(a.model, node_id, method)?;
    if node.kind.is_statement() {
        return reject(format!("node {node_id} is a {}, not an expression", node.kind));
    }
    if checks::is_qualified(a.model, node_id) {
        return reject("node is the member of an access; name the whole access instead");
    }
    let Some((block, position)) = a.model.statement_of(node_id) else {
        return reject("node is not inside a statement");
    };
    let statement = a.model.node(block).map(|b| b.children[position]);
    if statement == Some(node_id) {
        return reject("node already stands as a statement");
    }
    if statement.is_some_and(|s| is_kind(a.model, s, NodeKind::Loop)) {
        return reject("expression is re-evaluated by a loop condition");
    }
    if checks::has_side_effects(a.model, node_id) {
        return reject("expression has side effects");
    }
    let name = a.params.require_name("name")?;
    checks::name_free(a.model, method, &name)
}

fn explaining_introduce(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let node = cx.params().require_node("node")?;
    let name = cx.params().require_name("name")?;
    let type_ref = support::static_type(cx.model(), node);
    let (block, position) = cx
        .model()
        .statement_of(node)
        .ok_or_else(|| StepError::plan("expression is not inside a statement"))?;

    let local = cx.add_local(method, &name, type_ref)?;
    let at = cx.anchor_of(node)?;
    let assign = cx.wrap(node, |t, inner| t.assign(local, inner))?;
    cx.move_node(assign, Anchor::Child { parent: block, index: position })?;
    let read = cx.build(|t| t.read(local));
    cx.insert(read, at)?;
    cx.bind_symbol("variable", local);
    Ok(())
}

fn explaining_post(v: &Verification<'_>) -> Check {
    v.exists("variable")?;
    match v.symbol("variable") {
        Some(local) if v.index.writes_of(local).len() == 1 => Ok(()),
        _ => reject("explaining variable is not assigned exactly once"),
    }
}

// ── Split Temporary Variable ──────────────────────────────────────────

pub const SPLIT_TEMPORARY_VARIABLE: Recipe = Recipe {
    name: "SplitTemporaryVariable",
    shape: TargetShape::Local,
    precondition: split_pre,
    steps: &[Step {
        name: "split assignments",
        run: split_assignments,
    }],
    postcondition: split_post,
};

#[derive(Debug)]
struct SplitPlan {
    /// Assignments in statement order.
    writes: Vec<NodeId>,
    /// Reads following each assignment, up to the next one.
    segments: Vec<Vec<NodeId>>,
}

fn plan_split(
    model: &ProgramModel,
    index: &ReferenceIndex,
    local: SymbolId,
) -> Result<SplitPlan, Rejection> {
    let mut slots = Vec::new();
    for write in index.writes_of(local).into_iter().filter_map(|e| e.site.node()) {
        let (block, position) = support::statement_slot(model, write)
            .map_err(|_| Rejection::new("assignments are not sequential statements of one block"))?;
        slots.push((block, position, write));
    }
    if slots.len() < 2 {
        return reject("assigned only once");
    }
    let block = slots[0].0;
    if slots.iter().any(|(b, _, _)| *b != block) {
        return reject("assignments are not sequential statements of one block");
    }
    slots.sort_by_key(|(_, position, _)| *position);
    for (_, _, write) in &slots {
        let value = model.node(*write).and_then(|n| n.children.first().copied());
        if value.is_some_and(|v| model.symbols_referenced(v).contains(&local)) {
            return reject("variable accumulates its own value");
        }
    }

    let mut segments = vec![Vec::new(); slots.len()];
    for read in index.reads_of(local).into_iter().filter_map(|e| e.site.node()) {
        let Some(position) = index.statement_of(read, block) else {
            return reject("variable is read outside the block that assigns it");
        };
        let Some(segment) = slots.iter().rposition(|(_, p, _)| *p < position) else {
            return reject("variable is read before its first assignment");
        };
        segments[segment].push(read);
    }
    Ok(SplitPlan {
        writes: slots.into_iter().map(|(_, _, w)| w).collect(),
        segments,
    })
}

fn split_names(
    model: &ProgramModel,
    local: SymbolId,
    params: &Params,
    count: usize,
) -> Result<Vec<String>, Rejection> {
    let given = params.names("names")?;
    if !given.is_empty() {
        if given.len() != count {
            return reject(format!("`names` must list {count} name(s)"));
        }
        return Ok(given);
    }
    let base = name_of(model, local);
    Ok((0..count).map(|k| format!("{base}{}", k + 2)).collect())
}

fn split_pre(a: &Analysis<'_>) -> Check {
    let method = checks::owning_method(a.model, a.target)?;
    let plan = plan_split(a.model, a.index, a.target)?;
    let names = split_names(a.model, a.target, a.params, plan.writes.len() - 1)?;
    support::distinct(&names)?;
    for name in &names {
        checks::name_free(a.model, method, name)?;
    }
    Ok(())
}

fn split_assignments(cx: &mut StepCx<'_>) -> StepResult {
    let local = cx.target();
    let source = cx.symbol(local)?.clone();
    let method = source.owner.ok_or_else(|| StepError::plan("variable has no owner"))?;
    let index = cx.index();
    let plan = plan_split(cx.model(), &index, local)?;
    let names = split_names(cx.model(), local, cx.params(), plan.writes.len() - 1)?;

    let mut locals = vec![local];
    for (k, name) in names.iter().enumerate() {
        let fresh = cx.add_local(method, name, source.type_ref)?;
        cx.rewire(plan.writes[k + 1], NodeKind::Assign, fresh)?;
        for read in &plan.segments[k + 1] {
            cx.rewire(*read, NodeKind::Reference, fresh)?;
        }
        locals.push(fresh);
    }
    cx.bind("locals", Binding::Symbols(locals));
    Ok(())
}

fn split_post(v: &Verification<'_>) -> Check {
    for local in v.symbols("locals") {
        if v.index.writes_of(local).len() != 1 {
            return reject(format!(
                "{} is still assigned more than once",
                v.model.qualified_name(local)
            ));
        }
    }
    Ok(())
}

// ── Remove Assignments to Parameters ──────────────────────────────────

pub const REMOVE_ASSIGNMENTS_TO_PARAMETERS: Recipe = Recipe {
    name: "RemoveAssignmentsToParameters",
    shape: TargetShape::Parameter,
    precondition: param_assign_pre,
    steps: &[Step {
        name: "introduce local",
        run: param_assign_local,
    }],
    postcondition: param_assign_post,
};

fn param_assign_pre(a: &Analysis<'_>) -> Check {
    let method = checks::owning_method(a.model, a.target)?;
    if a.index.writes_of(a.target).is_empty() {
        return reject("parameter is never assigned");
    }
    checks::body_block(a.model, method)?;
    let name = a.params.name_or("name", || "result".to_string())?;
    checks::name_free(a.model, method, &name)
}

fn param_assign_local(cx: &mut StepCx<'_>) -> StepResult {
    let param = cx.target();
    let source = cx.symbol(param)?.clone();
    let method = source.owner.ok_or_else(|| StepError::plan("parameter has no owner"))?;
    let name = cx.params().name_or("name", || "result".to_string())?;
    let sites = cx.use_sites(param);

    let local = cx.add_local(method, &name, source.type_ref)?;
    for site in sites {
        let kind = cx.node(site)?.kind;
        cx.rewire(site, kind, local)?;
    }
    let body = cx.body_block(method)?;
    let init = cx.build(|t| {
        let r = t.read(param);
        t.assign(local, r)
    });
    cx.insert_statement(body, 0, init)?;
    cx.bind_symbol("local", local);
    Ok(())
}

fn param_assign_post(v: &Verification<'_>) -> Check {
    v.exists("local")?;
    if v.index.writes_of(v.target).is_empty() {
        Ok(())
    } else {
        reject("parameter is still assigned")
    }
}

// ── Replace Method with Method Object ─────────────────────────────────

pub const REPLACE_METHOD_WITH_METHOD_OBJECT: Recipe = Recipe {
    name: "ReplaceMethodWithMethodObject",
    shape: TargetShape::Method,
    precondition: method_object_pre,
    steps: &[
        Step {
            name: "declare method object",
            run: method_object_declare,
        },
        Step {
            name: "move body into compute",
            run: method_object_compute,
        },
        Step {
            name: "delegate to method object",
            run: method_object_delegate,
        },
    ],
    postcondition: method_object_post,
};

fn method_object_names(
    model: &ProgramModel,
    params: &Params,
    method: SymbolId,
) -> Result<(String, String), Rejection> {
    let name = params.name_or("name", || support::capitalize(&name_of(model, method)))?;
    let owner = checks::owning_type(model, method)?;
    Ok((name, support::decapitalize(&name_of(model, owner))))
}

fn method_object_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    let symbol = a.symbol()?;
    if symbol.modifiers.is_static {
        return reject("static methods have no receiver to hand over");
    }
    checks::body_block(a.model, method)?;
    let (name, source) = method_object_names(a.model, a.params, method)?;
    checks::name_free(a.model, support::module_of(a.model, method)?, &name)?;
    if a.model.member_named(Some(method), &source).is_some() {
        return reject(format!("`{source}` is already a variable of the method"));
    }
    Ok(())
}

fn method_object_declare(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let (name, source_name) = method_object_names(cx.model(), cx.params(), method)?;
    let owner = checks::owning_type(cx.model(), method)?;
    let module = support::module_of(cx.model(), method)?;

    let object = cx.add_type(module, &name, None)?;
    let source = cx.add_field(object, &source_name, Modifiers::private().finalized(), Some(owner))?;
    let mut fields = Vec::new();
    for var in cx.model().members(method).to_vec() {
        let symbol = cx.symbol(var)?.clone();
        let field = cx.add_field(object, &symbol.name, Modifiers::private(), symbol.type_ref)?;
        fields.push((var, field));
    }
    let param_fields: Vec<SymbolId> = std::iter::once(source)
        .chain(
            fields
                .iter()
                .filter(|(var, _)| {
                    cx.model()
                        .symbol(*var)
                        .is_some_and(|s| s.kind == SymbolKind::Parameter)
                })
                .map(|(_, field)| *field),
        )
        .collect();
    support::assigning_constructor(cx, object, &param_fields)?;

    cx.bind_symbol("object", object);
    cx.bind_symbol("source", source);
    cx.bind("fields", Binding::Symbols(fields.iter().map(|(_, f)| *f).collect()));
    Ok(())
}

fn method_object_compute(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let object = cx.bound_symbol("object")?;
    let source = cx.bound_symbol("source")?;
    let owner = checks::owning_type(cx.model(), method)?;
    let remap: HashMap<SymbolId, SymbolId> = cx
        .model()
        .members(method)
        .iter()
        .copied()
        .zip(cx.bound_symbols("fields"))
        .collect();

    let returns = cx.symbol(method)?.type_ref;
    let compute = cx.add_method(object, "compute", Modifiers::default(), returns)?;
    let body = cx.body_block(method)?;
    let tree = cx.clone_tree(body, &remap)?;
    let copy = cx.insert(tree, Anchor::Body(compute))?;

    for this in support::this_nodes(cx.model(), compute) {
        cx.replace_with(this, |t| t.read(source))?;
    }
    for node in support::uses_of_members(cx.model(), compute, owner) {
        if !checks::is_qualified(cx.model(), node) {
            support::qualify(cx, node, source)?;
        }
    }
    cx.bind_symbol("compute", compute);
    cx.bind("body", Binding::Node(copy));
    Ok(())
}

fn method_object_delegate(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let object = cx.bound_symbol("object")?;
    let compute = cx.bound_symbol("compute")?;
    let body = cx.body_block(method)?;
    cx.remove(body)?;
    for local in cx.model().locals(method) {
        cx.delete(local)?;
    }
    let params = cx.model().params(method);
    let returns = support::returns_value(cx.model(), compute);
    let tree = cx.build(|t| {
        let mut args = vec![t.this()];
        args.extend(params.iter().map(|p| t.read(*p)));
        let instance = t.new_instance(object, args);
        let call = t.call(compute, Vec::new());
        let select = t.select(instance, call);
        let statement = if returns { t.ret(Some(select)) } else {
            select
        };
        t.block(vec![statement])
    });
    cx.insert(tree, Anchor::Body(method))?;
    Ok(())
}

fn method_object_post(v: &Verification<'_>) -> Check {
    v.exists("object")?;
    v.exists("compute")?;
    if v.model.locals(v.target).is_empty() {
        Ok(())
    } else {
        reject("original method still declares locals")
    }
}

// ── Substitute Algorithm ──────────────────────────────────────────────

pub const SUBSTITUTE_ALGORITHM: Recipe = Recipe {
    name: "SubstituteAlgorithm",
    shape: TargetShape::Method,
    precondition: substitute_pre,
    steps: &[
        Step {
            name: "remove old body",
            run: substitute_remove,
        },
        Step {
            name: "copy new body",
            run: substitute_copy,
        },
    ],
    postcondition: substitute_post,
};

fn replacement(model: &ProgramModel, params: &Params) -> Result<SymbolId, Rejection> {
    let path = params.require_path("with")?;
    let id = checks::resolve(model, &path)?;
    if model.symbol(id).is_some_and(|s| s.kind == SymbolKind::Method && !s.is_constructor()) {
        Ok(id)
    } else {
        reject(format!("`{path}` is not a method"))
    }
}

fn substitute_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    let with = replacement(a.model, a.params)?;
    if with == method {
        return reject("a method cannot replace itself");
    }
    checks::body_block(a.model, with)?;
    if a.model.params(with).len() != a.model.params(method).len() {
        return reject("replacement takes a different number of parameters");
    }
    let with_owner = a.model.owning_type(with);
    if with_owner != a.model.owning_type(method) {
        let foreign = with_owner
            .is_some_and(|o| !support::uses_of_members(a.model, with, o).is_empty())
            || !support::this_nodes(a.model, with).is_empty();
        if foreign {
            return reject("replacement uses members of another type");
        }
    }
    for local in a.model.locals(with) {
        let name = name_of(a.model, local);
        if a.model.params(method).iter().any(|p| name_of(a.model, *p) == name) {
            return reject(format!("replacement local `{name}` clashes with a parameter"));
        }
    }
    Ok(())
}

fn substitute_remove(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    if let Some(body) = cx.symbol(method)?.body {
        cx.remove(body)?;
    }
    for local in cx.model().locals(method) {
        cx.delete(local)?;
    }
    Ok(())
}

fn substitute_copy(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let with = replacement(cx.model(), cx.params())?;
    let mut remap: HashMap<SymbolId, SymbolId> = cx
        .model()
        .params(with)
        .into_iter()
        .zip(cx.model().params(method))
        .collect();
    for local in cx.model().locals(with) {
        let source = cx.symbol(local)?.clone();
        remap.insert(local, cx.add_local(method, &source.name, source.type_ref)?);
    }
    let body = cx.body_block(with)?;
    let tree = cx.clone_tree(body, &remap)?;
    cx.insert(tree, Anchor::Body(method))?;
    Ok(())
}

fn substitute_post(v: &Verification<'_>) -> Check {
    let with = replacement(v.model, v.params)?;
    let ours = similarity::body_profile(v.model, v.target);
    let theirs = similarity::body_profile(v.model, with);
    if ours == theirs {
        Ok(())
    } else {
        reject("new body does not match the replacement algorithm")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecastConfig;
    use crate::error::RefactoringError;
    use crate::session::Session;
    use recast_model::ModelBuilder;
    use serde_json::json;

    /// `Order.price()` with `basePrice` written once and `discountFactor`
    /// written in both branches of an if/else.
    fn pricing() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let order = b.ty(app, "Order");
        let quantity = b.field(order, "quantity");
        let item_price = b.field(order, "itemPrice");
        let price = b.method(order, "price");
        let base = b.local(price, "basePrice");
        let discount = b.local(price, "discountFactor");

        let q = b.read(quantity);
        let p = b.read(item_price);
        let product = b.op("*", vec![q, p]);
        let set_base = b.assign(base, product);
        let read_base = b.read(base);
        let thousand = b.lit("1000");
        let test = b.op(">", vec![read_base, thousand]);
        let high = b.lit("0.95");
        let set_high = b.assign(discount, high);
        let low = b.lit("0.98");
        let set_low = b.assign(discount, low);
        let branch = b.cond(test, vec![set_high], Some(vec![set_low]));
        let read_base = b.read(base);
        let read_discount = b.read(discount);
        let total = b.op("*", vec![read_base, read_discount]);
        let ret = b.ret(Some(total));
        b.body(price, vec![set_base, branch, ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn temp_with_one_write_becomes_a_query() {
        let s = pricing();
        s.perform("ReplaceTempWithQuery", "app::Order::price::basePrice", &Params::new())
            .unwrap();
        let snapshot = s.snapshot();
        let model = &snapshot.model;
        let query = model.resolve(&"app::Order::basePrice".parse().unwrap()).unwrap();
        assert!(model.params(query).is_empty());
        let price = model.resolve(&"app::Order::price".parse().unwrap()).unwrap();
        assert_eq!(model.locals(price).len(), 1);
        assert_eq!(snapshot.index.calls_to(query).len(), 2);
    }

    #[test]
    fn temp_written_twice_is_rejected() {
        let s = pricing();
        let err = s
            .perform("ReplaceTempWithQuery", "app::Order::price::discountFactor", &Params::new())
            .unwrap_err();
        let RefactoringError::PreconditionViolation { rejection, .. } = err else {
            panic!("expected a precondition violation");
        };
        assert_eq!(rejection.reason, "assigned more than once");
        assert_eq!(rejection.suggestion.as_deref(), Some("SplitTemporaryVariable"));
    }

    #[test]
    fn split_rejects_branch_assignments() {
        let s = pricing();
        let verdict = s
            .check("SplitTemporaryVariable", "app::Order::price::discountFactor", &Params::new())
            .unwrap();
        assert!(!verdict.is_accepted());
    }

    #[test]
    fn inline_temp_copies_the_value() {
        let s = pricing();
        s.perform("InlineTemp", "app::Order::price::basePrice", &Params::new()).unwrap();
        let snapshot = s.snapshot();
        let price = snapshot.model.resolve(&"app::Order::price".parse().unwrap()).unwrap();
        let multiplications = snapshot
            .model
            .body_nodes(price)
            .into_iter()
            .filter(|n| support::is_operator(&snapshot.model, *n, "*"))
            .count();
        assert_eq!(multiplications, 3);
    }

    /// `m(p) { t = p; f = t; return f; }`
    fn passthrough() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let m = b.method(ty, "m");
        let p = b.param(m, "p");
        let t = b.local(m, "t");
        let read_p = b.read(p);
        let set_t = b.assign(t, read_p);
        let read_t = b.read(t);
        let set_f = b.assign(f, read_t);
        let read_f = b.read(f);
        let ret = b.ret(Some(read_f));
        b.body(m, vec![set_t, set_f, ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn extract_then_inline_restores_edges() {
        let s = passthrough();
        let before = s.snapshot();
        let params = Params::new()
            .with("name", "store")
            .with("range", json!({"start": 0, "end": 2}));
        s.perform("ExtractMethod", "app::T::m", &params).unwrap();
        let extracted = s.snapshot();
        let store = extracted.model.resolve(&"app::T::store".parse().unwrap()).unwrap();
        assert_eq!(extracted.model.params(store).len(), 1);
        assert_eq!(extracted.model.locals(store).len(), 1);

        s.perform("InlineMethod", "app::T::store", &Params::new()).unwrap();
        let after = s.snapshot();
        assert_eq!(after.index.edge_signature(), before.index.edge_signature());
        let ids = |m: &ProgramModel| {
            let mut ids: Vec<SymbolId> = m.symbols().map(|s| s.id).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&after.model), ids(&before.model));
    }

    #[test]
    fn inline_needs_one_return_or_none() {
        let s = passthrough();
        s.perform("RemoveAssignmentsToParameters", "app::T::m::p", &Params::new())
            .unwrap_err();
        let verdict = s.check("InlineMethod", "app::T::m", &Params::new()).unwrap();
        assert_eq!(verdict.rejection().unwrap().reason, "body returns from more than one place");
    }

    #[test]
    fn extract_rejects_range_with_escaping_write() {
        let s = pricing();
        let verdict = s
            .check(
                "ExtractMethod",
                "app::Order::price",
                &Params::new().with("name", "x").with("range", json!({"start": 1, "end": 2})),
            )
            .unwrap();
        assert_eq!(
            verdict.rejection().unwrap().reason,
            "`discountFactor` is assigned in the range and used outside it"
        );
    }
}
