// Making method calls simpler: signatures, parameters, factories and
// error signalling.

use std::collections::HashMap;

use recast_model::{
    Anchor, Modifiers, NodeId, NodeKind, Parent, ProgramModel, ReferenceIndex, SymbolId, SymbolKind,
    Visibility,
};

use super::support::{self, is_kind, is_operator, literal_text, name_of, strip_this};
use crate::analyzer::checks;
use crate::analyzer::similarity;
use crate::analyzer::{Analysis, Check, ConflictKind, Rejection, Verification, reject};
use crate::engine::{Binding, StepCx, StepResult};
use crate::error::StepError;
use crate::params::Params;
use crate::registry::{Recipe, Step, TargetShape};

pub fn recipes() -> Vec<Recipe> {
    vec![
        RENAME_METHOD,
        ADD_PARAMETER,
        REMOVE_PARAMETER,
        SEPARATE_QUERY_FROM_MODIFIER,
        PARAMETERIZE_METHOD,
        REPLACE_PARAMETER_WITH_EXPLICIT_METHODS,
        PRESERVE_WHOLE_OBJECT,
        REPLACE_PARAMETER_WITH_METHOD,
        INTRODUCE_PARAMETER_OBJECT,
        REMOVE_SETTING_METHOD,
        HIDE_METHOD,
        REPLACE_CONSTRUCTOR_WITH_FACTORY_METHOD,
        ENCAPSULATE_DOWNCAST,
        REPLACE_ERROR_CODE_WITH_EXCEPTION,
        REPLACE_EXCEPTION_WITH_TEST,
    ]
}

fn call_nodes(index: &ReferenceIndex, method: SymbolId) -> Vec<NodeId> {
    index.calls_to(method).into_iter().filter_map(|e| e.site.node()).collect()
}

fn param_position(model: &ProgramModel, param: SymbolId) -> Result<(SymbolId, usize), Rejection> {
    let method = checks::owning_method(model, param)?;
    let position = model
        .params(method)
        .iter()
        .position(|p| *p == param)
        .ok_or_else(|| Rejection::new("parameter is not in its method's signature"))?;
    Ok((method, position))
}

fn params_by_name(
    model: &ProgramModel,
    method: SymbolId,
    names: &[String],
) -> Result<Vec<(SymbolId, usize)>, Rejection> {
    if names.is_empty() {
        return reject("no parameters named");
    }
    let params = model.params(method);
    names
        .iter()
        .map(|name| {
            params
                .iter()
                .position(|p| name_of(model, *p) == *name)
                .map(|i| (params[i], i))
                .ok_or_else(|| Rejection::new(format!(
                    "{} has no parameter `{name}`",
                    model.qualified_name(method)
                )))
        })
        .collect()
}

fn never_assigned(model: &ProgramModel, index: &ReferenceIndex, params: &[SymbolId]) -> Check {
    match params.iter().find(|p| !index.writes_of(**p).is_empty()) {
        Some(p) => Err(Rejection::new(format!(
            "parameter `{}` is assigned in the body",
            name_of(model, *p)
        ))
            .suggest("RemoveAssignmentsToParameters")),
        None => Ok(()),
    }
}

/// Remove the arguments at `positions` from a call.
fn drop_arguments(cx: &mut StepCx<'_>, site: NodeId, positions: &[usize]) -> StepResult {
    let mut positions = positions.to_vec();
    positions.sort_unstable();
    let args = cx.node(site)?.children.clone();
    for position in positions.into_iter().rev() {
        if let Some(arg) = args.get(position) {
            cx.remove(*arg)?;
        }
    }
    Ok(())
}

fn target_gone(v: &Verification<'_>) -> Check {
    if v.target_exists() {
        reject(format!("{} still exists", v.model.qualified_name(v.target)))
    } else {
        Ok(())
    }
}

// ── Rename Method ─────────────────────────────────────────────────────

pub const RENAME_METHOD: Recipe = Recipe {
    name: "RenameMethod",
    shape: TargetShape::Method,
    precondition: rename_pre,
    steps: &[Step {
        name: "rename",
        run: rename_family,
    }],
    postcondition: rename_post,
};

fn rename_pre(a: &Analysis<'_>) -> Check {
    let name = a.params.require_name("name")?;
    if a.symbol()?.name == name {
        return reject(format!("method is already named `{name}`"));
    }
    for method in support::override_family(a.index, a.target) {
        checks::name_free(a.model, support::owner_of(a.model, method)?, &name)?;
    }
    Ok(())
}

fn rename_family(cx: &mut StepCx<'_>) -> StepResult {
    let name = cx.params().require_name("name")?;
    let index = cx.index();
    for method in support::override_family(&index, cx.target()) {
        cx.rename(method, &name)?;
    }
    Ok(())
}

fn rename_post(v: &Verification<'_>) -> Check {
    let name = v.params.require_name("name")?;
    if v.model.symbol(v.target).is_some_and(|s| s.name == name) {
        Ok(())
    } else {
        reject("method does not carry the new name")
    }
}

// ── Add Parameter ─────────────────────────────────────────────────────

pub const ADD_PARAMETER: Recipe = Recipe {
    name: "AddParameter",
    shape: TargetShape::Method,
    precondition: add_param_pre,
    steps: &[
        Step {
            name: "add parameter",
            run: add_param_declare,
        },
        Step {
            name: "extend call sites",
            run: add_param_sites,
        },
    ],
    postcondition: add_param_post,
};

fn add_param_pre(a: &Analysis<'_>) -> Check {
    let name = a.params.require_name("name")?;
    checks::not_polymorphic(a.model, a.index, a.target)?;
    checks::name_free(a.model, a.target, &name)?;
    if let Some(path) = a.params.path("type")? {
        support::resolve_type(a.model, &path)?;
    }
    match a.params.expr("default")? {
        Some(spec) => support::check_expr(a.model, &spec, None),
        None if a.index.calls_to(a.target).is_empty() => Ok(()),
        None => reject("callers exist, so a `default` argument is required"),
    }
}

fn add_param_declare(cx: &mut StepCx<'_>) -> StepResult {
    let name = cx.params().require_name("name")?;
    let type_ref = match cx.params().path("type")? {
        Some(path) => Some(support::resolve_type(cx.model(), &path)?),
        None => None,
    };
    let param = cx.add_param(cx.target(), &name, type_ref, None)?;
    cx.bind_symbol("param", param);
    Ok(())
}

fn add_param_sites(cx: &mut StepCx<'_>) -> StepResult {
    let Some(spec) = cx.params().expr("default")? else {
        return Ok(());
    };
    for site in cx.call_sites(cx.target()) {
        let arg = cx.build_expr(&spec)?;
        let len = cx.node(site)?.children.len();
        cx.insert(arg, Anchor::Child { parent: site, index: len })?;
    }
    Ok(())
}

fn add_param_post(v: &Verification<'_>) -> Check {
    v.exists("param")?;
    let arity = v.model.params(v.target).len();
    for site in call_nodes(v.index, v.target) {
        if v.model.node(site).map(|n| n.children.len()) != Some(arity) {
            return reject(format!("call at {site} does not pass the new argument"));
        }
    }
    Ok(())
}

// ── Remove Parameter ──────────────────────────────────────────────────

pub const REMOVE_PARAMETER: Recipe = Recipe {
    name: "RemoveParameter",
    shape: TargetShape::Parameter,
    precondition: remove_param_pre,
    steps: &[
        Step {
            name: "drop arguments",
            run: remove_param_args,
        },
        Step {
            name: "delete parameter",
            run: delete_target,
        },
    ],
    postcondition: target_gone,
};

fn remove_param_pre(a: &Analysis<'_>) -> Check {
    let (method, _) = param_position(a.model, a.target)?;
    if !a.index.reads_of(a.target).is_empty() {
        return reject("parameter still read");
    }
    if !a.index.writes_of(a.target).is_empty() {
        return reject("parameter still assigned");
    }
    checks::not_polymorphic(a.model, a.index, method)
}

fn remove_param_args(cx: &mut StepCx<'_>) -> StepResult {
    let (method, position) = param_position(cx.model(), cx.target())?;
    for site in cx.call_sites(method) {
        drop_arguments(cx, site, &[position])?;
    }
    Ok(())
}

fn delete_target(cx: &mut StepCx<'_>) -> StepResult {
    let target = cx.target();
    cx.delete(target)
}

// ── Separate Query from Modifier ──────────────────────────────────────

pub const SEPARATE_QUERY_FROM_MODIFIER: Recipe = Recipe {
    name: "SeparateQueryFromModifier",
    shape: TargetShape::Method,
    precondition: separate_pre,
    steps: &[
        Step {
            name: "declare query",
            run: separate_query,
        },
        Step {
            name: "stop returning",
            run: separate_modifier,
        },
        Step {
            name: "update callers",
            run: separate_callers,
        },
    ],
    postcondition: separate_post,
};

fn field_assignment(model: &ProgramModel, node: NodeId) -> bool {
    model.node(strip_this(model, node)).is_some_and(|n| {
        n.kind == NodeKind::Assign
            && n.symbol
                .and_then(|s| model.symbol(s))
                .is_some_and(|s| s.kind == SymbolKind::Field)
    })
}

fn separate_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    checks::body_block(a.model, method)?;
    if !support::returns_value(a.model, method) {
        return reject("method returns nothing to query");
    }
    let statements = a.model.body_statements(method);
    if !statements.iter().any(|s| field_assignment(a.model, *s)) {
        return reject("method changes no fields at statement level");
    }
    for id in a.model.body_nodes(method) {
        if field_assignment(a.model, id)
            && !statements.contains(&support::access_root(a.model, id))
        {
            return reject("a field assignment is nested inside another statement");
        }
        if is_kind(a.model, id, NodeKind::Return)
            && a.model.node(id).is_some_and(|r| {
                r.children
                    .iter()
                    .any(|c| checks::has_side_effects(a.model, *c))
            })
        {
            return reject("returned value has side effects");
        }
    }
    let name = a.params.name_or("name", || format!(
        "{}Query",
        a.symbol().map(|s| s.name.clone()).unwrap_or_default()
    ))?;
    checks::name_free(a.model, support::owner_of(a.model, method)?, &name)?;
    for site in call_nodes(a.index, method) {
        if a.model.statement_of(site).is_none() {
            return reject(format!("call at {site} is not inside a statement"));
        }
    }
    Ok(())
}

fn separate_query(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let source = cx.symbol(method)?.clone();
    let name = cx.params().name_or("name", || format!("{}Query", source.name))?;
    let owner = support::owner_of(cx.model(), method)?;
    let (query, _) = support::copy_method(cx, method, owner, &name)?;
    let modifiers: Vec<NodeId> = cx
        .model()
        .body_statements(query)
        .into_iter()
        .filter(|s| field_assignment(cx.model(), *s))
        .collect();
    for statement in modifiers {
        cx.remove(statement)?;
    }
    cx.bind_symbol("query", query);
    Ok(())
}

fn separate_modifier(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let values: Vec<NodeId> = cx
        .model()
        .body_nodes(method)
        .into_iter()
        .filter_map(|id| {
            let node = cx.model().node(id)?;
            (node.kind == NodeKind::Return).then(|| node.children.first().copied()).flatten()
        })
        .collect();
    for value in values {
        cx.remove(value)?;
    }
    cx.retype(method, None)
}

fn separate_callers(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let query = cx.bound_symbol("query")?;
    for site in cx.call_sites(method) {
        let outer = support::access_root(cx.model(), site);
        if support::is_statement(cx.model(), outer) {
            continue;
        }
        let (block, position) = cx
            .model()
            .statement_of(outer)
            .ok_or_else(|| StepError::plan(format!("call at {site} is not inside a statement")))?;
        let modifier_call = cx.clone_tree(outer, &HashMap::new())?;
        cx.insert_statement(block, position, modifier_call)?;
        cx.rewire(site, NodeKind::Call, query)?;
    }
    Ok(())
}

fn separate_post(v: &Verification<'_>) -> Check {
    v.exists("query")?;
    if support::returns_value(v.model, v.target) {
        reject("modifier still returns a value")
    } else {
        Ok(())
    }
}

// ── Parameterize Method ───────────────────────────────────────────────

pub const PARAMETERIZE_METHOD: Recipe = Recipe {
    name: "ParameterizeMethod",
    shape: TargetShape::Method,
    precondition: parameterize_pre,
    steps: &[
        Step {
            name: "declare parameterized method",
            run: parameterize_declare,
        },
        Step {
            name: "redirect callers",
            run: parameterize_callers,
        },
        Step {
            name: "delete originals",
            run: parameterize_delete,
        },
    ],
    postcondition: parameterize_post,
};

/// The family of near-identical methods and the preorder position of the
/// single literal in which their bodies differ.
#[derive(Debug)]
struct Variation {
    methods: Vec<SymbolId>,
    position: usize,
}

fn plan_variation(
    model: &ProgramModel,
    params: &Params,
    method: SymbolId,
) -> Result<Variation, Rejection> {
    let owner = support::owner_of(model, method)?;
    let mut methods = vec![method];
    for path in params.paths("methods")? {
        let other = checks::resolve_kind(model, &path, SymbolKind::Method)?;
        if other == method || methods.contains(&other) {
            return reject(format!("`{path}` is listed twice"));
        }
        if model.symbol(other).and_then(|s| s.owner) != Some(owner) {
            return reject(format!("`{path}` is declared on another type"));
        }
        if model.params(other).len() != model.params(method).len() {
            return reject(format!("`{path}` takes a different number of parameters"));
        }
        methods.push(other);
    }
    if methods.len() < 2 {
        return reject("name at least one other method in `methods`");
    }
    let profiles: Vec<Vec<String>> = methods
        .iter()
        .map(|m| similarity::body_profile(model, *m))
        .collect();
    if profiles.iter().any(|p| p.len() != profiles[0].len()) {
        return reject("methods differ in structure");
    }
    let differing: Vec<usize> = (0..profiles[0].len())
        .filter(|i| profiles.iter().any(|p| p[*i] != profiles[0][*i]))
        .collect();
    let [position] = differing.as_slice() else {
        return reject(if differing.is_empty() {
            "methods do not differ"
        } else {
            "methods differ in more than one place"
        });
    };
    for m in &methods {
        let node = model.body_nodes(*m).get(*position).copied();
        if !node.is_some_and(|n| is_kind(model, n, NodeKind::Literal)) {
            return reject("methods differ in something other than a literal");
        }
    }
    Ok(Variation {
        methods,
        position: *position,
    })
}

fn parameterize_names(params: &Params) -> Result<(String, String), Rejection> {
    Ok((params.require_name("name")?, params.name_or("param", || "value".to_string())?))
}

fn parameterize_pre(a: &Analysis<'_>) -> Check {
    let variation = plan_variation(a.model, a.params, a.target)?;
    let (name, param) = parameterize_names(a.params)?;
    checks::name_free(a.model, support::owner_of(a.model, a.target)?, &name)?;
    if a.model.member_named(Some(a.target), &param).is_some() {
        return reject(format!("`{param}` is already a variable of the method"));
    }
    for method in &variation.methods {
        checks::not_polymorphic(a.model, a.index, *method)?;
    }
    Ok(())
}

fn parameterize_declare(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let variation = plan_variation(cx.model(), cx.params(), method)?;
    let (name, param_name) = parameterize_names(cx.params())?;
    let owner = support::owner_of(cx.model(), method)?;

    let (general, _) = support::copy_method(cx, method, owner, &name)?;
    let literal = cx
        .model()
        .body_nodes(general)
        .get(variation.position)
        .copied()
        .ok_or_else(|| StepError::plan("copied body lost the varying literal"))?;
    let type_ref = support::static_type(cx.model(), literal);
    let param = cx.add_param(general, &param_name, type_ref, None)?;
    cx.replace_with(literal, |t| t.read(param))?;

    cx.bind_symbol("method", general);
    cx.bind("originals", Binding::Symbols(variation.methods));
    cx.bind("position", Binding::Name(variation.position.to_string()));
    Ok(())
}

fn parameterize_callers(cx: &mut StepCx<'_>) -> StepResult {
    let general = cx.bound_symbol("method")?;
    let position: usize = cx
        .bound_name("position")?
        .parse()
        .map_err(|_| StepError::plan("bad literal position"))?;
    for method in cx.bound_symbols("originals") {
        let value = cx
            .model()
            .body_nodes(method)
            .get(position)
            .and_then(|n| literal_text(cx.model(), *n))
            .map(str::to_string)
            .ok_or_else(|| StepError::plan("original lost its literal"))?;
        for site in cx.call_sites(method) {
            cx.rewire(site, NodeKind::Call, general)?;
            let arg = cx.build(|t| t.lit(&value));
            let len = cx.node(site)?.children.len();
            cx.insert(arg, Anchor::Child { parent: site, index: len })?;
        }
    }
    Ok(())
}

fn parameterize_delete(cx: &mut StepCx<'_>) -> StepResult {
    for method in cx.bound_symbols("originals") {
        cx.delete_method(method)?;
    }
    Ok(())
}

fn parameterize_post(v: &Verification<'_>) -> Check {
    v.exists("method")?;
    target_gone(v)
}

// ── Replace Parameter with Explicit Methods ───────────────────────────

pub const REPLACE_PARAMETER_WITH_EXPLICIT_METHODS: Recipe = Recipe {
    name: "ReplaceParameterWithExplicitMethods",
    shape: TargetShape::Parameter,
    precondition: explicit_pre,
    steps: &[
        Step {
            name: "declare explicit methods",
            run: explicit_declare,
        },
        Step {
            name: "redirect callers",
            run: explicit_callers,
        },
        Step {
            name: "delete original",
            run: explicit_delete,
        },
    ],
    postcondition: explicit_post,
};

/// `(value, then-block, method name)` for each arm testing the parameter.
fn explicit_arms(
    model: &ProgramModel,
    param: SymbolId,
) -> Result<Vec<(String, NodeId, String)>, Rejection> {
    let (method, _) = param_position(model, param)?;
    let statements = model.body_statements(method);
    let [root] = statements.as_slice() else {
        return reject("body is not a single conditional");
    };
    let chain = support::conditional_chain(model, *root)
        .ok_or_else(|| Rejection::new("body is not a single conditional"))?;
    if chain.otherwise.is_some() {
        return reject("final else handles no explicit value");
    }
    let base = name_of(model, method);
    let reads_param = |id: NodeId| {
        model
            .node(id)
            .is_some_and(|x| x.kind == NodeKind::Reference && x.symbol == Some(param))
    };
    let mut arms = Vec::new();
    for (cond, then) in &chain.arms {
        let node = model.node(*cond).filter(|_| is_operator(model, *cond, "=="));
        let value = node.and_then(|n| match n.children.as_slice() {
            [a, b] if reads_param(*a) => literal_text(model, *b),
            [a, b] if reads_param(*b) => literal_text(model, *a),
            _ => None,
        });
        let Some(value) = value else {
            return reject(format!(
                "condition {cond} does not compare the parameter with a literal"
            ));
        };
        arms.push((
            value.to_string(),
            *then,
            format!("{base}{}", support::literal_fragment(value)),
        ));
    }
    let tests: usize = chain.arms.len();
    let other_reads = model
        .body_nodes(method)
        .into_iter()
        .filter(|id| {
            model
                .node(*id)
                .is_some_and(|n| n.kind == NodeKind::Reference && n.symbol == Some(param))
        })
        .count();
    if other_reads != tests {
        return reject("parameter is read outside the tests");
    }
    Ok(arms)
}

fn explicit_pre(a: &Analysis<'_>) -> Check {
    let (method, position) = param_position(a.model, a.target)?;
    checks::not_polymorphic(a.model, a.index, method)?;
    let arms = explicit_arms(a.model, a.target)?;
    let names: Vec<String> = arms.iter().map(|(_, _, n)| n.clone()).collect();
    support::distinct(&names)?;
    let owner = support::owner_of(a.model, method)?;
    for name in &names {
        checks::name_free(a.model, owner, name)?;
    }
    for site in call_nodes(a.index, method) {
        let passed = a
            .model
            .node(site)
            .and_then(|n| n.children.get(position))
            .and_then(|arg| literal_text(a.model, *arg));
        if !passed.is_some_and(|v| arms.iter().any(|(value, _, _)| value == v)) {
            return reject(format!("call at {site} passes a value no branch handles"));
        }
    }
    Ok(())
}

fn explicit_declare(cx: &mut StepCx<'_>) -> StepResult {
    let param = cx.target();
    let (method, _) = param_position(cx.model(), param)?;
    let owner = support::owner_of(cx.model(), method)?;
    let source = cx.symbol(method)?.clone();
    let mut created = Vec::new();
    for (_, then, name) in explicit_arms(cx.model(), param)? {
        let explicit = cx.add_method(owner, &name, source.modifiers, source.type_ref)?;
        let remap: HashMap<SymbolId, SymbolId> =
            support::copy_params(cx, method, explicit, &[param])?
                .into_iter()
                .collect();
        let body = cx.clone_tree(then, &remap)?;
        cx.insert(body, Anchor::Body(explicit))?;
        created.push(explicit);
    }
    cx.bind("methods", Binding::Symbols(created));
    Ok(())
}

fn explicit_callers(cx: &mut StepCx<'_>) -> StepResult {
    let param = cx.target();
    let (method, position) = param_position(cx.model(), param)?;
    let owner = support::owner_of(cx.model(), method)?;
    let arms = explicit_arms(cx.model(), param)?;
    for site in cx.call_sites(method) {
        let arg = cx.node(site)?.children[position];
        let value = literal_text(cx.model(), arg).unwrap_or_default().to_string();
        let name = arms
            .iter()
            .find(|(v, _, _)| *v == value)
            .map(|(_, _, n)| n.clone())
            .ok_or_else(|| StepError::plan(format!("no explicit method for {value}")))?;
        let explicit = support::member_of_kind(cx.model(), owner, &name, SymbolKind::Method)?;
        cx.remove(arg)?;
        cx.rewire(site, NodeKind::Call, explicit)?;
    }
    Ok(())
}

fn explicit_delete(cx: &mut StepCx<'_>) -> StepResult {
    let (method, _) = param_position(cx.model(), cx.target())?;
    cx.delete_method(method)
}

fn explicit_post(v: &Verification<'_>) -> Check {
    for method in v.symbols("methods") {
        if v.model.symbol(method).is_none() {
            return reject("an explicit method is missing");
        }
    }
    target_gone(v)
}

// ── Preserve Whole Object ─────────────────────────────────────────────

pub const PRESERVE_WHOLE_OBJECT: Recipe = Recipe {
    name: "PreserveWholeObject",
    shape: TargetShape::Method,
    precondition: whole_object_pre,
    steps: &[
        Step {
            name: "add whole-object parameter",
            run: whole_object_param,
        },
        Step {
            name: "read through the object",
            run: whole_object_reads,
        },
        Step {
            name: "update callers",
            run: whole_object_callers,
        },
        Step {
            name: "remove old parameters",
            run: whole_object_cleanup,
        },
    ],
    postcondition: whole_object_post,
};

/// Parameters fed from one object, the member each comes from, and the
/// object's type.
#[derive(Debug)]
struct WholeObject {
    replaced: Vec<(SymbolId, usize, NodeKind, SymbolId)>,
    ty: SymbolId,
    name: String,
}

fn plan_whole_object(
    model: &ProgramModel,
    index: &ReferenceIndex,
    method: SymbolId,
    params: &Params,
) -> Result<WholeObject, Rejection> {
    let named = params_by_name(model, method, &params.names("params")?)?;
    let sites = call_nodes(index, method);
    if sites.is_empty() {
        return reject("no call sites show where the values come from");
    }
    let mut members: Vec<Option<(NodeKind, SymbolId)>> = vec![None; named.len()];
    let mut ty = None;
    for site in &sites {
        let args = model.node(*site).map(|n| n.children.clone()).unwrap_or_default();
        let mut receiver_shape: Option<String> = None;
        for (k, (_, position)) in named.iter().enumerate() {
            let arg = args
                .get(*position)
                .and_then(|a| model.node(*a))
                .filter(|a| a.kind == NodeKind::Select && a.children.len() == 2);
            let Some(arg) = arg else {
                return reject(format!("call at {site} does not pass a member of an object"));
            };
            let (receiver, member) = (arg.children[0], arg.children[1]);
            let member_node = model.node(member).ok_or_else(|| Rejection::new("dangling member"))?;
            let found = match (member_node.kind, member_node.symbol) {
                (NodeKind::Reference, Some(s)) => (NodeKind::Reference, s),
                (NodeKind::Call, Some(s)) if member_node.children.is_empty() => (NodeKind::Call, s),
                _ => return reject(format!(
                    "call at {site} passes something other than a field or query"
                )),
            };
            if members[k].is_some_and(|m| m != found) {
                return reject("callers take the values from different members");
            }
            members[k] = Some(found);
            if checks::has_side_effects(model, receiver) {
                return reject(format!("call at {site} builds the object with side effects"));
            }
            let shape = model.shape(receiver);
            if receiver_shape.as_ref().is_some_and(|s| *s != shape) {
                return reject(format!("call at {site} takes the values from different objects"));
            }
            receiver_shape = Some(shape);
            let receiver_type = support::static_type(model, receiver)
                .ok_or_else(|| Rejection::new(format!(
                    "type of the object passed at {site} is unknown"
                )))?;
            if ty.is_some_and(|t| t != receiver_type) {
                return reject("callers pass objects of different types");
            }
            ty = Some(receiver_type);
        }
    }
    let ty = ty.ok_or_else(|| Rejection::new("no object found"))?;
    let name = params.name_or("name", || support::decapitalize(&name_of(model, ty)))?;
    let replaced = named
        .iter()
        .zip(members)
        .map(|((p, i), m)| {
            let (kind, member) = m.unwrap_or((NodeKind::Reference, *p));
            (*p, *i, kind, member)
        })
        .collect();
    Ok(WholeObject { replaced, ty, name })
}

fn whole_object_pre(a: &Analysis<'_>) -> Check {
    checks::not_polymorphic(a.model, a.index, a.target)?;
    let plan = plan_whole_object(a.model, a.index, a.target, a.params)?;
    let params: Vec<SymbolId> = plan.replaced.iter().map(|r| r.0).collect();
    never_assigned(a.model, a.index, &params)?;
    checks::name_free(a.model, a.target, &plan.name)
}

fn whole_object_param(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let index = cx.index();
    let plan = plan_whole_object(cx.model(), &index, method, cx.params())?;
    let whole = cx.add_param(method, &plan.name, Some(plan.ty), None)?;
    cx.bind_symbol("param", whole);
    cx.bind("replaced", Binding::Symbols(plan.replaced.iter().map(|r| r.0).collect()));
    Ok(())
}

fn whole_object_reads(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let whole = cx.bound_symbol("param")?;
    let index = cx.index();
    let plan = plan_whole_object(cx.model(), &index, method, cx.params())?;
    for (param, _, kind, member) in plan.replaced {
        for read in index.reads_of(param).into_iter().filter_map(|e| e.site.node()) {
            cx.replace_with(read, |t| {
                let r = t.read(whole);
                let m = if kind == NodeKind::Call {
                    t.call(member, Vec::new())
                } else {
                    t.read(member)
                };
                t.select(r, m)
            })?;
        }
    }
    Ok(())
}

fn whole_object_callers(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let index = cx.index();
    let plan = plan_whole_object(cx.model(), &index, method, cx.params())?;
    let positions: Vec<usize> = plan.replaced.iter().map(|r| r.1).collect();
    let first = positions[0];
    for site in call_nodes(&index, method) {
        let arg = cx.node(site)?.children[first];
        let receiver = cx.node(arg)?.children[0];
        let object = cx.clone_tree(receiver, &HashMap::new())?;
        let len = cx.node(site)?.children.len();
        cx.insert(object, Anchor::Child { parent: site, index: len })?;
        drop_arguments(cx, site, &positions)?;
    }
    Ok(())
}

fn whole_object_cleanup(cx: &mut StepCx<'_>) -> StepResult {
    for param in cx.bound_symbols("replaced") {
        cx.delete(param)?;
    }
    Ok(())
}

fn whole_object_post(v: &Verification<'_>) -> Check {
    v.exists("param")?;
    if v.symbols("replaced").iter().any(|p| v.model.symbol(*p).is_some()) {
        reject("replaced parameters still exist")
    } else {
        Ok(())
    }
}

// ── Replace Parameter with Method ─────────────────────────────────────

pub const REPLACE_PARAMETER_WITH_METHOD: Recipe = Recipe {
    name: "ReplaceParameterWithMethod",
    shape: TargetShape::Parameter,
    precondition: param_method_pre,
    steps: &[
        Step {
            name: "call the query in the body",
            run: param_method_reads,
        },
        Step {
            name: "drop arguments",
            run: remove_param_args,
        },
        Step {
            name: "delete parameter",
            run: delete_target,
        },
    ],
    postcondition: target_gone,
};

/// The zero-argument query every caller evaluates to produce the argument.
fn argument_query(
    model: &ProgramModel,
    index: &ReferenceIndex,
    param: SymbolId,
) -> Result<SymbolId, Rejection> {
    let (method, position) = param_position(model, param)?;
    let sites = call_nodes(index, method);
    if sites.is_empty() {
        return reject("no callers show how the argument is computed");
    }
    let mut query = None;
    for site in sites {
        let arg = model.node(site).and_then(|n| n.children.get(position).copied());
        let called = arg
            .map(|a| strip_this(model, a))
            .and_then(|a| model.node(a))
            .filter(|n| n.kind == NodeKind::Call && n.children.is_empty())
            .and_then(|n| n.symbol);
        let Some(called) = called else {
            return reject(format!("call at {site} does not pass the result of a query"));
        };
        if query.is_some_and(|q| q != called) {
            return reject("callers compute the argument differently");
        }
        query = Some(called);
    }
    let query = query.ok_or_else(|| Rejection::new("no query found"))?;
    let owner = checks::owning_type(model, method)?;
    let name = name_of(model, query);
    if model.find_in_hierarchy(owner, &name) != Some(query) {
        return reject(format!("`{name}` is not reachable from {}", model.qualified_name(owner)));
    }
    let static_method = model.symbol(method).is_some_and(|s| s.modifiers.is_static);
    if static_method && !model.symbol(query).is_some_and(|s| s.modifiers.is_static) {
        return reject("a static method cannot call an instance query");
    }
    Ok(query)
}

fn param_method_pre(a: &Analysis<'_>) -> Check {
    let (method, _) = param_position(a.model, a.target)?;
    checks::not_polymorphic(a.model, a.index, method)?;
    never_assigned(a.model, a.index, &[a.target])?;
    argument_query(a.model, a.index, a.target)?;
    Ok(())
}

fn param_method_reads(cx: &mut StepCx<'_>) -> StepResult {
    let param = cx.target();
    let index = cx.index();
    let query = argument_query(cx.model(), &index, param)?;
    for read in index.reads_of(param).into_iter().filter_map(|e| e.site.node()) {
        cx.replace_with(read, |t| t.call(query, Vec::new()))?;
    }
    Ok(())
}

// ── Introduce Parameter Object ────────────────────────────────────────

pub const INTRODUCE_PARAMETER_OBJECT: Recipe = Recipe {
    name: "IntroduceParameterObject",
    shape: TargetShape::Method,
    precondition: param_object_pre,
    steps: &[
        Step {
            name: "declare parameter object",
            run: param_object_declare,
        },
        Step {
            name: "pass the object",
            run: param_object_pass,
        },
        Step {
            name: "read through the object",
            run: param_object_reads,
        },
        Step {
            name: "remove old parameters",
            run: whole_object_cleanup,
        },
    ],
    postcondition: param_object_post,
};

fn param_object_names(params: &Params) -> Result<(String, String), Rejection> {
    let name = params.require_name("name")?;
    let param = params.name_or("param", || support::decapitalize(&name))?;
    Ok((name, param))
}

fn param_object_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    checks::not_polymorphic(a.model, a.index, method)?;
    let named = params_by_name(a.model, method, &a.params.names("params")?)?;
    let params: Vec<SymbolId> = named.iter().map(|n| n.0).collect();
    never_assigned(a.model, a.index, &params)?;
    let (name, param) = param_object_names(a.params)?;
    checks::name_free(a.model, support::module_of(a.model, method)?, &name)?;
    checks::name_free(a.model, method, &param)
}

fn param_object_declare(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let named = params_by_name(cx.model(), method, &cx.params().names("params")?)?;
    let (name, _) = param_object_names(cx.params())?;
    let module = support::module_of(cx.model(), method)?;
    let object = cx.add_type(module, &name, None)?;
    let mut fields = Vec::new();
    let mut getters = Vec::new();
    for (param, _) in &named {
        let source = cx.symbol(*param)?.clone();
        let modifiers = Modifiers::private().finalized();
        let field = cx.add_field(object, &source.name, modifiers, source.type_ref)?;
        getters.push(support::ensure_getter(cx, field, &support::getter_name(&source.name))?);
        fields.push(field);
    }
    support::assigning_constructor(cx, object, &fields)?;
    cx.bind_symbol("object", object);
    cx.bind("getters", Binding::Symbols(getters));
    cx.bind("replaced", Binding::Symbols(named.iter().map(|n| n.0).collect()));
    Ok(())
}

fn param_object_pass(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let object = cx.bound_symbol("object")?;
    let (_, param_name) = param_object_names(cx.params())?;
    let named = params_by_name(cx.model(), method, &cx.params().names("params")?)?;
    let positions: Vec<usize> = named.iter().map(|n| n.1).collect();
    let whole = cx.add_param(method, &param_name, Some(object), None)?;
    for site in cx.call_sites(method) {
        let args = cx.node(site)?.children.clone();
        let mut parts = Vec::new();
        for position in &positions {
            let arg = *args
                .get(*position)
                .ok_or_else(|| StepError::plan(format!(
                    "call at {site} passes too few arguments"
                )))?;
            parts.push(cx.clone_tree(arg, &HashMap::new())?);
        }
        let construction = cx.build(|t| {
            let args = parts.into_iter().map(|p| t.graft(p)).collect();
            t.new_instance(object, args)
        });
        let len = args.len();
        cx.insert(construction, Anchor::Child { parent: site, index: len })?;
        drop_arguments(cx, site, &positions)?;
    }
    cx.bind_symbol("param", whole);
    Ok(())
}

fn param_object_reads(cx: &mut StepCx<'_>) -> StepResult {
    let whole = cx.bound_symbol("param")?;
    let getters = cx.bound_symbols("getters");
    let replaced = cx.bound_symbols("replaced");
    for (param, getter) in replaced.into_iter().zip(getters) {
        for read in cx.use_sites(param) {
            cx.replace_with(read, |t| {
                let r = t.read(whole);
                let g = t.call(getter, Vec::new());
                t.select(r, g)
            })?;
        }
    }
    Ok(())
}

fn param_object_post(v: &Verification<'_>) -> Check {
    v.exists("object")?;
    whole_object_post(v)
}

// ── Remove Setting Method ─────────────────────────────────────────────

pub const REMOVE_SETTING_METHOD: Recipe = Recipe {
    name: "RemoveSettingMethod",
    shape: TargetShape::Method,
    precondition: remove_setter_pre,
    steps: &[
        Step {
            name: "assign directly",
            run: remove_setter_inline,
        },
        Step {
            name: "delete setter",
            run: remove_setter_delete,
        },
        Step {
            name: "make field final",
            run: remove_setter_freeze,
        },
    ],
    postcondition: remove_setter_post,
};

fn set_field(model: &ProgramModel, setter: SymbolId) -> Result<SymbolId, Rejection> {
    let owner = checks::owning_type(model, setter)?;
    let statements = model.body_statements(setter);
    let field = match statements.as_slice() {
        [only] => model.node(strip_this(model, *only)).and_then(|n| n.symbol),
        _ => None,
    };
    match field {
        Some(f)
            if support::is_setter_of(model, setter, f)
                && model.symbol(f).and_then(|s| s.owner) == Some(owner) =>
        {
            Ok(f)
        }
        _ => reject("method is not a plain setter of one of its type's fields"),
    }
}

fn remove_setter_pre(a: &Analysis<'_>) -> Check {
    set_field(a.model, a.target)?;
    let owner = checks::owning_type(a.model, a.target)?;
    checks::not_polymorphic(a.model, a.index, a.target)?;
    for site in call_nodes(a.index, a.target) {
        let caller = a.model.enclosing_symbol(site);
        let in_constructor = caller
            .and_then(|c| a.model.symbol(c))
            .is_some_and(|c| c.is_constructor() && c.owner == Some(owner));
        if !in_constructor {
            return Err(Rejection::new("setter is called after construction").with_conflict(
                ConflictKind::ExternalUse,
                caller.map(|c| a.model.qualified_name(c)).unwrap_or_default(),
                "calls the setter",
            ));
        }
        if !support::is_self_access(a.model, site)
            || !support::is_statement(a.model, support::access_root(a.model, site))
        {
            return reject(format!("call at {site} is not a plain statement on this object"));
        }
    }
    Ok(())
}

fn remove_setter_inline(cx: &mut StepCx<'_>) -> StepResult {
    let setter = cx.target();
    let field = set_field(cx.model(), setter)?;
    for site in cx.call_sites(setter) {
        let outer = support::access_root(cx.model(), site);
        let arg = *cx
            .node(site)?
            .children
            .first()
            .ok_or_else(|| StepError::plan(format!("call at {site} passes no value")))?;
        let value = cx.clone_tree(arg, &HashMap::new())?;
        let assignment = cx.build(|t| {
            let v = t.graft(value);
            t.assign(field, v)
        });
        cx.replace(outer, assignment)?;
    }
    cx.bind_symbol("field", field);
    Ok(())
}

fn remove_setter_delete(cx: &mut StepCx<'_>) -> StepResult {
    let setter = cx.target();
    cx.delete_method(setter)
}

fn remove_setter_freeze(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.bound_symbol("field")?;
    cx.update_modifiers(field, |m| m.is_final = true)
}

fn remove_setter_post(v: &Verification<'_>) -> Check {
    match v.symbol("field").and_then(|f| v.model.symbol(f)) {
        Some(field) if field.modifiers.is_final => target_gone(v),
        _ => reject("field is not final"),
    }
}

// ── Hide Method ───────────────────────────────────────────────────────

pub const HIDE_METHOD: Recipe = Recipe {
    name: "HideMethod",
    shape: TargetShape::Method,
    precondition: hide_pre,
    steps: &[Step {
        name: "make private",
        run: hide_method,
    }],
    postcondition: hide_post,
};

fn hide_pre(a: &Analysis<'_>) -> Check {
    if a.symbol()?.modifiers.visibility == Visibility::Private {
        return reject("method is already private");
    }
    checks::not_polymorphic(a.model, a.index, a.target)?;
    let owner = checks::owning_type(a.model, a.target)?;
    checks::unused_outside(a.model, a.index, a.target, owner)
}

fn hide_method(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    cx.update_modifiers(method, |m| m.visibility = Visibility::Private)
}

fn hide_post(v: &Verification<'_>) -> Check {
    if v.model.symbol(v.target).is_some_and(|s| s.modifiers.visibility == Visibility::Private) {
        Ok(())
    } else {
        reject("method is not private")
    }
}

// ── Replace Constructor with Factory Method ───────────────────────────

pub const REPLACE_CONSTRUCTOR_WITH_FACTORY_METHOD: Recipe = Recipe {
    name: "ReplaceConstructorWithFactoryMethod",
    shape: TargetShape::Constructor,
    precondition: factory_pre,
    steps: &[
        Step {
            name: "declare factory",
            run: factory_declare,
        },
        Step {
            name: "replace constructions",
            run: factory_redirect,
        },
        Step {
            name: "hide constructor",
            run: factory_hide,
        },
    ],
    postcondition: factory_post,
};

/// `New` nodes of the constructor's type whose arity matches it.
fn constructions(model: &ProgramModel, ctor: SymbolId) -> Vec<NodeId> {
    let ty = model.symbol(ctor).and_then(|s| s.owner);
    let arity = model.params(ctor).len();
    let mut nodes: Vec<NodeId> = model
        .nodes()
        .filter(|n| {
            n.kind == NodeKind::New
                && n.symbol.is_some()
                && n.symbol == ty
                && n.children.len() == arity
        })
        .map(|n| n.id)
        .collect();
    nodes.sort();
    nodes
}

fn factory_name(params: &Params) -> Result<String, Rejection> {
    Ok(params.name_or("name", || "create".to_string())?)
}

fn factory_pre(a: &Analysis<'_>) -> Check {
    let ty = support::owner_of(a.model, a.target)?;
    checks::name_free(a.model, ty, &factory_name(a.params)?)
}

fn factory_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ctor = cx.target();
    let ty = support::owner_of(cx.model(), ctor)?;
    let name = factory_name(cx.params())?;
    let sites = constructions(cx.model(), ctor);
    let modifiers = Modifiers {
        is_static: true,
        ..Modifiers::default()
    };
    let factory = cx.add_method(ty, &name, modifiers, Some(ty))?;
    let params: Vec<SymbolId> = support::copy_params(cx, ctor, factory, &[])?
        .into_iter()
        .map(|(_, p)| p)
        .collect();
    let body = cx.build(|t| {
        let args = params.iter().map(|p| t.read(*p)).collect();
        let instance = t.new_instance(ty, args);
        let ret = t.ret(Some(instance));
        t.block(vec![ret])
    });
    cx.insert(body, Anchor::Body(factory))?;
    cx.bind_symbol("factory", factory);
    cx.bind("sites", Binding::Nodes(sites));
    Ok(())
}

fn factory_redirect(cx: &mut StepCx<'_>) -> StepResult {
    let factory = cx.bound_symbol("factory")?;
    for site in cx.bound_nodes("sites") {
        cx.rewire(site, NodeKind::Call, factory)?;
    }
    Ok(())
}

fn factory_hide(cx: &mut StepCx<'_>) -> StepResult {
    let ctor = cx.target();
    cx.update_modifiers(ctor, |m| m.visibility = Visibility::Private)
}

fn factory_post(v: &Verification<'_>) -> Check {
    v.exists("factory")?;
    let outside: Vec<NodeId> = constructions(v.model, v.target)
        .into_iter()
        .filter(|n| v.model.enclosing_symbol(*n) != v.symbol("factory"))
        .collect();
    if outside.is_empty() {
        Ok(())
    } else {
        reject(format!("{} construction(s) bypass the factory", outside.len()))
    }
}

// ── Encapsulate Downcast ──────────────────────────────────────────────

pub const ENCAPSULATE_DOWNCAST: Recipe = Recipe {
    name: "EncapsulateDowncast",
    shape: TargetShape::Method,
    precondition: downcast_pre,
    steps: &[
        Step {
            name: "cast inside",
            run: downcast_inside,
        },
        Step {
            name: "drop caller casts",
            run: downcast_callers,
        },
    ],
    postcondition: downcast_post,
};

fn cast_around(model: &ProgramModel, site: NodeId) -> Option<(NodeId, SymbolId)> {
    let outer = support::access_root(model, site);
    let Some(Parent::Node(parent)) = model.parent(outer) else {
        return None;
    };
    let node = model.node(parent)?;
    (node.kind == NodeKind::Cast).then_some((parent, node.symbol?))
}

fn downcast_type(
    model: &ProgramModel,
    index: &ReferenceIndex,
    method: SymbolId,
) -> Result<SymbolId, Rejection> {
    let mut ty = None;
    let sites = call_nodes(index, method);
    if sites.is_empty() {
        return reject("method has no callers to relieve");
    }
    for site in sites {
        let Some((_, cast)) = cast_around(model, site) else {
            return reject(format!("call at {site} does not downcast the result"));
        };
        if ty.is_some_and(|t| t != cast) {
            return reject("callers do not all downcast to the same type");
        }
        ty = Some(cast);
    }
    ty.ok_or_else(|| Rejection::new("no downcast found"))
}

fn downcast_pre(a: &Analysis<'_>) -> Check {
    checks::body_block(a.model, a.target)?;
    checks::not_polymorphic(a.model, a.index, a.target)?;
    let ty = downcast_type(a.model, a.index, a.target)?;
    if a.symbol()?.type_ref == Some(ty) {
        return reject("method already returns the cast type");
    }
    Ok(())
}

fn downcast_inside(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let index = cx.index();
    let ty = downcast_type(cx.model(), &index, method)?;
    let values: Vec<NodeId> = cx
        .model()
        .body_nodes(method)
        .into_iter()
        .filter_map(|id| {
            let node = cx.model().node(id)?;
            (node.kind == NodeKind::Return).then(|| node.children.first().copied()).flatten()
        })
        .collect();
    for value in values {
        cx.wrap(value, |t, inner| t.cast(ty, inner))?;
    }
    cx.retype(method, Some(ty))?;
    cx.bind_symbol("type", ty);
    Ok(())
}

fn downcast_callers(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    for site in cx.call_sites(method) {
        if let Some((cast, _)) = cast_around(cx.model(), site) {
            cx.unwrap(cast, 0)?;
        }
    }
    Ok(())
}

fn downcast_post(v: &Verification<'_>) -> Check {
    match (v.symbol("type"), v.model.symbol(v.target)) {
        (Some(ty), Some(method)) if method.type_ref == Some(ty) => Ok(()),
        _ => reject("method does not return the cast type"),
    }
}

// ── Replace Error Code with Exception ─────────────────────────────────

pub const REPLACE_ERROR_CODE_WITH_EXCEPTION: Recipe = Recipe {
    name: "ReplaceErrorCodeWithException",
    shape: TargetShape::Method,
    precondition: error_code_pre,
    steps: &[
        Step {
            name: "throw instead of returning the code",
            run: error_code_throw,
        },
        Step {
            name: "rewrite callers",
            run: error_code_callers,
        },
    ],
    postcondition: error_code_post,
};

fn error_code(params: &Params) -> Result<String, Rejection> {
    Ok(params.text("code")?.unwrap_or_else(|| "-1".to_string()))
}

fn returned_literals(model: &ProgramModel, method: SymbolId) -> Vec<(NodeId, Option<String>)> {
    model
        .body_nodes(method)
        .into_iter()
        .filter_map(|id| {
            let node = model.node(id)?;
            if node.kind != NodeKind::Return {
                return None;
            }
            let value = node.children.first().map(|v| literal_text(model, *v).map(str::to_string));
            Some((id, value.flatten()))
        })
        .collect()
}

/// Conditional whose test is `call == code`, with `call` the site's access.
fn code_check(model: &ProgramModel, site: NodeId, code: &str) -> Option<NodeId> {
    let outer = support::access_root(model, site);
    let Some(Parent::Node(test)) = model.parent(outer) else {
        return None;
    };
    let test_node = model.node(test)?;
    if !is_operator(model, test, "==") || test_node.children.len() != 2 {
        return None;
    }
    if !test_node.children.iter().any(|c| literal_text(model, *c) == Some(code)) {
        return None;
    }
    let Some(Parent::Node(conditional)) = model.parent(test) else {
        return None;
    };
    model
        .node(conditional)
        .filter(|c| c.kind == NodeKind::Conditional && c.children.first() == Some(&test))
        .map(|c| c.id)
}

fn error_code_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    checks::body_block(a.model, method)?;
    let path = a.params.require_path("exception")?;
    support::resolve_type(a.model, &path)?;
    let code = error_code(a.params)?;
    let returns = returned_literals(a.model, method);
    if !returns.iter().any(|(_, v)| v.as_deref() == Some(code.as_str())) {
        return reject(format!("method never returns the code {code}"));
    }
    let computed = returns
        .iter()
        .any(|(id, v)| v.is_none() && a.model.node(*id).is_some_and(|r| !r.children.is_empty()));
    if computed {
        return reject("method returns computed values besides the code");
    }
    for site in call_nodes(a.index, method) {
        let outer = support::access_root(a.model, site);
        if !support::is_statement(a.model, outer) && code_check(a.model, site, &code).is_none() {
            return reject(format!(
                "call at {site} uses the result in a way that cannot be rewritten"
            ));
        }
    }
    Ok(())
}

fn error_code_throw(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let code = error_code(cx.params())?;
    let exception = support::resolve_type(cx.model(), &cx.params().require_path("exception")?)?;
    for (ret, value) in returned_literals(cx.model(), method) {
        match value {
            Some(v) if v == code => {
                cx.replace_with(ret, |t| {
                    let e = t.new_instance(exception, Vec::new());
                    t.throw(e)
                })?;
            }
            Some(_) => {
                let literal = cx.node(ret)?.children[0];
                cx.remove(literal)?;
            }
            None => {}
        }
    }
    cx.retype(method, None)
}

fn error_code_callers(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let code = error_code(cx.params())?;
    for site in cx.call_sites(method) {
        let Some(conditional) = code_check(cx.model(), site, &code) else {
            continue;
        };
        let outer = support::access_root(cx.model(), site);
        let (block, position) = support::statement_slot(cx.model(), conditional)?;
        let node = cx.node(conditional)?.clone();
        let then_statements = cx.node(node.children[1])?.children.clone();
        let else_statements = match node.children.get(2) {
            Some(e) => cx.node(*e)?.children.clone(),
            None => Vec::new(),
        };

        let guarded = cx.build(|t| t.try_catch(Vec::new(), Vec::new()));
        let guarded = cx.insert_statement(block, position, guarded)?;
        let (body, handler) = {
            let n = cx.node(guarded)?;
            (n.children[0], n.children[1])
        };
        cx.move_node(outer, Anchor::Child { parent: body, index: 0 })?;
        for (k, statement) in else_statements.into_iter().enumerate() {
            cx.move_node(statement, Anchor::Child { parent: body, index: k + 1 })?;
        }
        for (k, statement) in then_statements.into_iter().enumerate() {
            cx.move_node(statement, Anchor::Child { parent: handler, index: k })?;
        }
        cx.remove(conditional)?;
    }
    Ok(())
}

fn error_code_post(v: &Verification<'_>) -> Check {
    let code = error_code(v.params)?;
    if returned_literals(v.model, v.target)
        .iter()
        .any(|(_, value)| value.as_deref() == Some(code.as_str()))
    {
        reject("method still returns the error code")
    } else {
        Ok(())
    }
}

// ── Replace Exception with Test ───────────────────────────────────────

pub const REPLACE_EXCEPTION_WITH_TEST: Recipe = Recipe {
    name: "ReplaceExceptionWithTest",
    shape: TargetShape::Method,
    precondition: exception_test_pre,
    steps: &[Step {
        name: "test before the risky call",
        run: exception_test_rewrite,
    }],
    postcondition: exception_test_post,
};

fn guarded_block(model: &ProgramModel, method: SymbolId) -> Result<NodeId, Rejection> {
    let tries: Vec<NodeId> = model
        .body_statements(method)
        .into_iter()
        .filter(|s| is_kind(model, *s, NodeKind::Try))
        .collect();
    match tries.as_slice() {
        [only] => Ok(*only),
        [] => reject("body has no try statement to replace"),
        _ => reject("body has more than one try statement"),
    }
}

fn exception_test_pre(a: &Analysis<'_>) -> Check {
    guarded_block(a.model, a.target)?;
    let spec = a
        .params
        .expr("condition")?
        .ok_or_else(|| Rejection::new("invalid parameter `condition`: is required"))?;
    support::check_expr(a.model, &spec, Some(a.target))
}

fn exception_test_rewrite(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let guarded = guarded_block(cx.model(), method)?;
    let spec = cx
        .params()
        .expr("condition")?
        .ok_or_else(|| StepError::plan("no condition given"))?;
    let (block, position) = support::statement_slot(cx.model(), guarded)?;
    let (body, handler) = {
        let n = cx.node(guarded)?;
        (n.children[0], n.children[1])
    };
    let body_statements = cx.node(body)?.children.clone();
    let handler_statements = cx.node(handler)?.children.clone();

    let condition = cx.build_expr(&spec)?;
    let test = cx.build(|t| {
        let c = t.graft(condition);
        t.cond(c, Vec::new(), None)
    });
    let test = cx.insert_statement(block, position, test)?;
    let then = cx.node(test)?.children[1];
    for (k, statement) in handler_statements.into_iter().enumerate() {
        cx.move_node(statement, Anchor::Child { parent: then, index: k })?;
    }
    for (k, statement) in body_statements.into_iter().enumerate() {
        cx.move_node(statement, Anchor::Child { parent: block, index: position + 1 + k })?;
    }
    cx.remove(guarded)
}

fn exception_test_post(v: &Verification<'_>) -> Check {
    if v.model.body_nodes(v.target).iter().any(|n| is_kind(v.model, *n, NodeKind::Try)) {
        reject("try statement remains")
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecastConfig;
    use crate::session::Session;
    use recast_model::ModelBuilder;
    use serde_json::json;

    fn resolve(s: &Session, path: &str) -> Option<SymbolId> {
        s.snapshot().model.resolve(&path.parse().unwrap()).ok()
    }

    /// `Shape.setValue(name, v)` dispatching on a string parameter, called
    /// from `Client.run`.
    fn dispatcher() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let shape = b.ty(app, "Shape");
        let height = b.field(shape, "height");
        let width = b.field(shape, "width");
        let set = b.method(shape, "setValue");
        let name = b.param(set, "name");
        let value = b.param(set, "value");
        let n = b.read(name);
        let h = b.lit("\"height\"");
        let is_height = b.op("==", vec![n, h]);
        let v = b.read(value);
        let set_h = b.assign(height, v);
        let n = b.read(name);
        let w = b.lit("\"width\"");
        let is_width = b.op("==", vec![n, w]);
        let v = b.read(value);
        let set_w = b.assign(width, v);
        let inner = b.cond(is_width, vec![set_w], None);
        let outer = b.cond(is_height, vec![set_h], Some(vec![inner]));
        b.body(set, vec![outer]);

        let client = b.ty(app, "Client");
        let run = b.method(client, "run");
        let target = b.param(run, "s");
        b.typed(target, shape);
        let receiver = b.read(target);
        let which = b.lit("\"height\"");
        let ten = b.lit("10");
        let call = b.call(set, vec![which, ten]);
        let statement = b.select(receiver, call);
        b.body(run, vec![statement]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn rename_checks_collisions() {
        let s = dispatcher();
        let verdict = s
            .check("RenameMethod", "app::Shape::setValue", &Params::new().with("name", "height"))
            .unwrap();
        let rejection = verdict.rejection().unwrap();
        assert_eq!(rejection.conflicts[0].kind, ConflictKind::NameCollision);
        s.perform("RenameMethod", "app::Shape::setValue", &Params::new().with("name", "assign"))
            .unwrap();
        assert!(resolve(&s, "app::Shape::assign").is_some());
    }

    #[test]
    fn explicit_methods_replace_the_dispatch() {
        let s = dispatcher();
        s.perform(
            "ReplaceParameterWithExplicitMethods",
            "app::Shape::setValue::name",
            &Params::new(),
        )
            .unwrap();
        let height = resolve(&s, "app::Shape::setValueHeight").unwrap();
        assert!(resolve(&s, "app::Shape::setValueWidth").is_some());
        assert!(resolve(&s, "app::Shape::setValue").is_none());
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.params(height).len(), 1);
        let call = snapshot.index.calls_to(height)[0].site.node().unwrap();
        assert_eq!(snapshot.model.node(call).unwrap().children.len(), 1);
    }

    #[test]
    fn removing_a_read_parameter_is_rejected() {
        let s = dispatcher();
        let verdict = s
            .check("RemoveParameter", "app::Shape::setValue::value", &Params::new())
            .unwrap();
        assert_eq!(verdict.rejection().unwrap().reason, "parameter still read");
    }

    #[test]
    fn add_parameter_extends_callers() {
        let s = dispatcher();
        let params = Params::new().with("name", "notify").with("default", json!({"lit": "false"}));
        s.perform("AddParameter", "app::Shape::setValue", &params).unwrap();
        let snapshot = s.snapshot();
        let set = resolve(&s, "app::Shape::setValue").unwrap();
        assert_eq!(snapshot.model.params(set).len(), 3);
        let call = snapshot.index.calls_to(set)[0].site.node().unwrap();
        assert_eq!(snapshot.model.node(call).unwrap().children.len(), 3);
    }

    #[test]
    fn hide_method_requires_no_outside_callers() {
        let s = dispatcher();
        let verdict = s.check("HideMethod", "app::Shape::setValue", &Params::new()).unwrap();
        assert!(!verdict.is_accepted());
    }

    #[test]
    fn factory_replaces_constructions() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let employee = b.ty(app, "Employee");
        let ctor = b.constructor(employee);
        b.body(ctor, Vec::new());
        let client = b.ty(app, "Client");
        let make = b.method(client, "make");
        let new = b.new_instance(employee, Vec::new());
        let ret = b.ret(Some(new));
        b.body(make, vec![ret]);
        let s = Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap();
        s.perform("ReplaceConstructorWithFactoryMethod", "app::Employee::Employee", &Params::new())
            .unwrap();
        let factory = resolve(&s, "app::Employee::create").unwrap();
        let snapshot = s.snapshot();
        let make = resolve(&s, "app::Client::make").unwrap();
        assert_eq!(snapshot.index.callers_of(factory), vec![make]);
        let ctor = snapshot.model.symbol(ctor).unwrap();
        assert_eq!(ctor.modifiers.visibility, Visibility::Private);
    }
}
