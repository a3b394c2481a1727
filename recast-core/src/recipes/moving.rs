// Moving features between objects: methods, fields, whole classes and the
// delegation links between them.

use std::collections::BTreeSet;

use recast_model::{
    Anchor, Modifiers, NodeId, NodeKind, ProgramModel, ReferenceIndex, SymbolId, SymbolKind,
    Visibility,
};

use super::support::{self, is_kind, name_of, strip_this};
use crate::analyzer::checks::{self, receiver_of};
use crate::analyzer::{Analysis, Check, Rejection, Verification, reject};
use crate::engine::{Binding, StepCx, StepResult};
use crate::error::StepError;
use crate::params::Params;
use crate::registry::{Recipe, Step, TargetShape};

pub fn recipes() -> Vec<Recipe> {
    vec![
        MOVE_METHOD,
        MOVE_FIELD,
        EXTRACT_CLASS,
        INLINE_CLASS,
        HIDE_DELEGATE,
        REMOVE_MIDDLE_MAN,
        INTRODUCE_FOREIGN_METHOD,
        INTRODUCE_LOCAL_EXTENSION,
    ]
}

/// Destination type and the source field linking to it.
fn destination(
    model: &ProgramModel,
    source: SymbolId,
    params: &Params,
) -> Result<(SymbolId, Option<SymbolId>), Rejection> {
    let via = match params.name("via")? {
        Some(name) => Some(support::member_of_kind(model, source, &name, SymbolKind::Field)?),
        None => None,
    };
    let to = match (params.path("to")?, via) {
        (Some(path), _) => support::resolve_type(model, &path)?,
        (None, Some(via)) => model
            .symbol(via)
            .and_then(|s| s.type_ref)
            .ok_or_else(|| Rejection::new(format!(
                "{} has no declared type",
                model.qualified_name(via)
            )))?,
        (None, None) => return reject("name a destination with `to` or `via`"),
    };
    if to == source {
        return reject("destination is the source type");
    }
    if let Some(via) = via {
        if model.symbol(via).and_then(|s| s.type_ref) != Some(to) {
            return reject(format!(
                "{} does not hold a {}",
                model.qualified_name(via),
                model.qualified_name(to)
            ));
        }
        if model.symbol(via).is_some_and(|s| s.modifiers.is_static) {
            return reject(format!("{} is static", model.qualified_name(via)));
        }
    }
    Ok((to, via))
}

/// Remove a `via` hop from the access to `node`: `via.x` becomes `x` and
/// `r.via.x` becomes `r.x`.
fn drop_hop(cx: &mut StepCx<'_>, node: NodeId, via: SymbolId) -> StepResult {
    let Some(receiver) = receiver_of(cx.model(), node) else {
        return Ok(());
    };
    let receiver_node = cx.node(receiver)?.clone();
    match receiver_node.kind {
        NodeKind::Reference if receiver_node.symbol == Some(via) => {
            let select = support::access_root(cx.model(), node);
            cx.unwrap(select, 1)?;
        }
        NodeKind::Select
            if receiver_node
                .children
                .get(1)
                .and_then(|m| cx.model().node(*m))
                .is_some_and(|m| m.kind == NodeKind::Reference && m.symbol == Some(via)) =>
        {
            cx.unwrap(receiver, 0)?;
        }
        _ => {}
    }
    Ok(())
}

/// Members of `source` (or its supertypes) named in `symbol`'s body.
fn source_members_used(
    model: &ProgramModel,
    symbol: SymbolId,
    source: SymbolId,
) -> BTreeSet<SymbolId> {
    let mut types = vec![source];
    types.extend(model.supertypes(source));
    model
        .body_nodes(symbol)
        .into_iter()
        .filter_map(|id| model.node(id)?.symbol)
        .filter(|s| {
            model
                .symbol(*s)
                .is_some_and(|m| {
                    matches!(m.kind, SymbolKind::Field | SymbolKind::Method)
                        && m.owner.is_some_and(|o| types.contains(&o))
                })
        })
        .collect()
}

// ── Move Method ───────────────────────────────────────────────────────

pub const MOVE_METHOD: Recipe = Recipe {
    name: "MoveMethod",
    shape: TargetShape::Method,
    precondition: move_method_pre,
    steps: &[
        Step {
            name: "declare in destination",
            run: move_method_declare,
        },
        Step {
            name: "open source members",
            run: move_method_open,
        },
        Step {
            name: "delegate or delete original",
            run: move_method_original,
        },
    ],
    postcondition: move_method_post,
};

fn external_callers(index: &ReferenceIndex, method: SymbolId) -> Vec<SymbolId> {
    index.callers_of(method).into_iter().filter(|c| *c != method).collect()
}

fn move_method_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    let source = checks::owning_type(a.model, method)?;
    if a.symbol()?.modifiers.is_static {
        return reject("method is static");
    }
    checks::not_polymorphic(a.model, a.index, method)?;
    if a.index.callers_of(method).contains(&method) {
        return reject("method is recursive");
    }
    let (to, via) = destination(a.model, source, a.params)?;
    let name = a.params.name_or("name", || name_of(a.model, a.target))?;
    checks::name_free(a.model, to, &name)?;
    let source_param = support::decapitalize(&name_of(a.model, source));
    if a.model.member_named(Some(method), &source_param).is_some() {
        return reject(format!("`{source_param}` is already a variable of the method"));
    }
    if via.is_none() && !external_callers(a.index, method).is_empty() {
        return reject("method has callers; name a `via` field to delegate through");
    }
    Ok(())
}

fn move_method_declare(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let source = checks::owning_type(cx.model(), method)?;
    let (to, via) = destination(cx.model(), source, cx.params())?;
    let name = cx.params().name_or("name", || name_of(cx.model(), method))?;
    let (moved, _) = support::copy_method(cx, method, to, &name)?;

    // Accesses through the link become accesses on the new owner.
    if let Some(via) = via {
        let hops: Vec<NodeId> = cx
            .model()
            .body_nodes(moved)
            .into_iter()
            .filter(|id| {
                cx.model()
                    .node(*id)
                    .and_then(|n| n.symbol)
                    .and_then(|s| cx.model().symbol(s))
                    .is_some_and(|s| s.owner == Some(to))
            })
            .collect();
        for node in hops {
            drop_hop(cx, node, via)?;
        }
    }

    let own = support::uses_of_members(cx.model(), moved, source);
    let this = support::this_nodes(cx.model(), moved);
    if !own.is_empty() || !this.is_empty() {
        let source_param = support::decapitalize(&name_of(cx.model(), source));
        let param = cx.add_param(moved, &source_param, Some(source), None)?;
        for node in own {
            support::qualify(cx, node, param)?;
        }
        for node in support::this_nodes(cx.model(), moved) {
            cx.replace_with(node, |t| t.read(param))?;
        }
        cx.bind_symbol("source_param", param);
    }
    cx.bind_symbol("method", moved);
    if let Some(via) = via {
        cx.bind_symbol("via", via);
    }
    Ok(())
}

fn move_method_open(cx: &mut StepCx<'_>) -> StepResult {
    let moved = cx.bound_symbol("method")?;
    let source = checks::owning_type(cx.model(), cx.target())?;
    for member in source_members_used(cx.model(), moved, source) {
        support::open_to_module(cx, member)?;
    }
    Ok(())
}

fn move_method_original(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let moved = cx.bound_symbol("method")?;
    let index = cx.index();
    if external_callers(&index, method).is_empty() {
        return cx.delete_method(method);
    }
    let via = cx.bound_symbol("via")?;
    let pass_this = cx.bound_symbol("source_param").is_ok();
    if let Some(body) = cx.symbol(method)?.body {
        cx.remove(body)?;
    }
    for local in cx.model().locals(method) {
        cx.delete(local)?;
    }
    support::write_delegation(cx, method, Some(via), moved, pass_this)
}

fn move_method_post(v: &Verification<'_>) -> Check {
    v.exists("method")?;
    let moved = v.symbol("method").and_then(|m| v.model.symbol(m)).and_then(|m| m.owner);
    let source = v.model.symbol(v.target).and_then(|s| s.owner);
    if moved.is_some() && moved == source {
        return reject("method was not moved");
    }
    if v.target_exists() && v.symbol("via").is_none() {
        return reject("original remains without a link to delegate through");
    }
    Ok(())
}

// ── Move Field ────────────────────────────────────────────────────────

pub const MOVE_FIELD: Recipe = Recipe {
    name: "MoveField",
    shape: TargetShape::Field,
    precondition: move_field_pre,
    steps: &[
        Step {
            name: "route accesses through the link",
            run: move_field_route,
        },
        Step {
            name: "move declaration",
            run: move_field_declaration,
        },
    ],
    postcondition: move_field_post,
};

fn move_field_plan(
    model: &ProgramModel,
    field: SymbolId,
    params: &Params,
) -> Result<(SymbolId, SymbolId), Rejection> {
    let source = checks::owning_type(model, field)?;
    let (to, via) = destination(model, source, params)?;
    let via = via.ok_or_else(|| Rejection::new("invalid parameter `via`: is required"))?;
    if via == field {
        return reject("a field cannot be moved through itself");
    }
    Ok((to, via))
}

fn move_field_pre(a: &Analysis<'_>) -> Check {
    if a.symbol()?.modifiers.is_static {
        return reject("field is static");
    }
    let (to, _) = move_field_plan(a.model, a.target, a.params)?;
    checks::name_free(a.model, to, &name_of(a.model, a.target))
}

fn move_field_route(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let (_, via) = move_field_plan(cx.model(), field, cx.params())?;
    for node in cx.use_sites(field) {
        support::route_through(cx, node, via)?;
    }
    Ok(())
}

fn move_field_declaration(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let (to, _) = move_field_plan(cx.model(), field, cx.params())?;
    cx.move_symbol(field, to, None)?;
    let index = cx.index();
    let outside = index
        .users_of(field)
        .iter()
        .any(|e| !cx.model().is_declared_within(e.enclosing, to));
    if outside {
        support::open_to_module(cx, field)?;
    }
    cx.bind_symbol("to", to);
    Ok(())
}

fn move_field_post(v: &Verification<'_>) -> Check {
    let owner = v.model.symbol(v.target).and_then(|s| s.owner);
    if owner.is_some() && owner == v.symbol("to") {
        Ok(())
    } else {
        reject("field is not declared in the destination")
    }
}

// ── Extract Class ─────────────────────────────────────────────────────

pub const EXTRACT_CLASS: Recipe = Recipe {
    name: "ExtractClass",
    shape: TargetShape::Type,
    precondition: extract_class_pre,
    steps: &[
        Step {
            name: "declare class",
            run: extract_class_declare,
        },
        Step {
            name: "move fields",
            run: extract_class_fields,
        },
        Step {
            name: "move methods",
            run: extract_class_methods,
        },
    ],
    postcondition: extract_class_post,
};

#[derive(Debug)]
struct ClassSplit {
    name: String,
    link: String,
    fields: Vec<SymbolId>,
    methods: Vec<SymbolId>,
}

fn plan_split(
    model: &ProgramModel,
    source: SymbolId,
    params: &Params,
) -> Result<ClassSplit, Rejection> {
    let name = params.require_name("name")?;
    let link = params.name_or("link", || support::decapitalize(&name))?;
    let field_names = params.names("fields")?;
    let method_names = params.names("methods")?;
    if field_names.is_empty() {
        return reject("name at least one field to extract");
    }
    support::distinct(&field_names.iter().chain(&method_names).cloned().collect::<Vec<_>>())?;
    let fields = field_names
        .iter()
        .map(|n| support::member_of_kind(model, source, n, SymbolKind::Field))
        .collect::<Result<Vec<_>, _>>()?;
    let methods = method_names
        .iter()
        .map(|n| support::member_of_kind(model, source, n, SymbolKind::Method))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ClassSplit {
        name,
        link,
        fields,
        methods,
    })
}

fn extract_class_pre(a: &Analysis<'_>) -> Check {
    let split = plan_split(a.model, a.target, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, a.target)?, &split.name)?;
    checks::name_free(a.model, a.target, &split.link)?;
    for field in &split.fields {
        if a.model.symbol(*field).is_some_and(|f| f.modifiers.is_static) {
            return reject(format!("{} is static", a.model.qualified_name(*field)));
        }
    }
    for method in &split.methods {
        checks::not_polymorphic(a.model, a.index, *method)?;
        if a.model.symbol(*method).is_some_and(|m| m.modifiers.is_static || m.is_constructor()) {
            return reject(format!(
                "{} cannot be moved to an instance",
                a.model.qualified_name(*method)
            ));
        }
    }
    Ok(())
}

fn extract_class_declare(cx: &mut StepCx<'_>) -> StepResult {
    let source = cx.target();
    let split = plan_split(cx.model(), source, cx.params())?;
    let module = support::module_of(cx.model(), source)?;
    let extracted = cx.add_type(module, &split.name, None)?;
    let modifiers = Modifiers::private().finalized();
    let link = cx.add_field(source, &split.link, modifiers, Some(extracted))?;
    let init = cx.build(|t| t.new_instance(extracted, Vec::new()));
    cx.insert(init, Anchor::Body(link))?;
    cx.bind_symbol("class", extracted);
    cx.bind_symbol("link", link);
    cx.bind("fields", Binding::Symbols(split.fields));
    cx.bind("methods", Binding::Symbols(split.methods));
    Ok(())
}

fn nested_params(cx: &StepCx<'_>) -> Result<Params, StepError> {
    let extracted = cx.bound_symbol("class")?;
    let link = cx.bound_symbol("link")?;
    let to = cx.model().path_of(extracted)?.to_string();
    Ok(Params::new().with("to", to).with("via", name_of(cx.model(), link)))
}

fn extract_class_fields(cx: &mut StepCx<'_>) -> StepResult {
    let params = nested_params(cx)?;
    for field in cx.bound_symbols("fields") {
        cx.invoke("MoveField", field, params.clone())?;
    }
    Ok(())
}

fn extract_class_methods(cx: &mut StepCx<'_>) -> StepResult {
    let params = nested_params(cx)?;
    for method in cx.bound_symbols("methods") {
        let moved = cx.invoke("MoveMethod", method, params.clone())?;
        if let Some(Binding::Symbol(id)) = moved.get("method") {
            cx.bind_symbol(&format!("moved:{}", name_of(cx.model(), *id)), *id);
        }
    }
    Ok(())
}

fn extract_class_post(v: &Verification<'_>) -> Check {
    v.exists("class")?;
    let extracted = v.symbol("class");
    for field in v.symbols("fields") {
        if v.model.symbol(field).and_then(|f| f.owner) != extracted {
            return reject(format!("{} was not moved", v.model.qualified_name(field)));
        }
    }
    Ok(())
}

// ── Inline Class ──────────────────────────────────────────────────────

pub const INLINE_CLASS: Recipe = Recipe {
    name: "InlineClass",
    shape: TargetShape::Type,
    precondition: inline_class_pre,
    steps: &[
        Step {
            name: "move members",
            run: inline_class_members,
        },
        Step {
            name: "remove link",
            run: inline_class_link,
        },
        Step {
            name: "delete class",
            run: inline_class_delete,
        },
    ],
    postcondition: inline_class_post,
};

fn inline_class_plan(
    model: &ProgramModel,
    absorbed: SymbolId,
    params: &Params,
) -> Result<(SymbolId, SymbolId), Rejection> {
    let into = support::resolve_type(model, &params.require_path("into")?)?;
    if into == absorbed {
        return reject("a class cannot absorb itself");
    }
    let via_name = params.require_name("via")?;
    let via = support::member_of_kind(model, into, &via_name, SymbolKind::Field)?;
    if model.symbol(via).and_then(|s| s.type_ref) != Some(absorbed) {
        return reject(format!(
            "{} does not hold a {}",
            model.qualified_name(via),
            model.qualified_name(absorbed)
        ));
    }
    Ok((into, via))
}

fn inline_class_pre(a: &Analysis<'_>) -> Check {
    let absorbed = a.target;
    let (into, via) = inline_class_plan(a.model, absorbed, a.params)?;
    if a.symbol()?.supertype.is_some() || !a.model.subtypes(absorbed).is_empty() {
        return reject("class takes part in a hierarchy");
    }
    for ctor in a.model.constructors(absorbed) {
        if !a.model.params(ctor).is_empty() || !a.model.body_statements(ctor).is_empty() {
            return reject(format!(
                "{} does work that cannot be inlined",
                a.model.qualified_name(ctor)
            ));
        }
    }
    let typed: Vec<SymbolId> = a
        .model
        .symbols()
        .filter(|s| s.id != via && (s.type_ref == Some(absorbed) || s.supertype == Some(absorbed)))
        .map(|s| s.id)
        .collect();
    if let Some(other) = typed.first() {
        return reject(format!(
            "{} still declares the class as its type",
            a.model.qualified_name(*other)
        ));
    }
    for edge in a.index.users_of(absorbed) {
        if edge.enclosing != via {
            return reject(format!(
                "{} still refers to the class",
                a.model.qualified_name(edge.enclosing)
            ));
        }
    }
    for member in a.model.members(absorbed) {
        let symbol = a.model.require(*member).map_err(|e| Rejection::new(e.to_string()))?;
        if !symbol.is_constructor() {
            checks::name_free(a.model, into, &symbol.name)?;
        }
    }
    Ok(())
}

fn inline_class_members(cx: &mut StepCx<'_>) -> StepResult {
    let absorbed = cx.target();
    let (into, via) = inline_class_plan(cx.model(), absorbed, cx.params())?;
    let members: Vec<SymbolId> = cx.model().members(absorbed).to_vec();
    for member in members {
        if cx.symbol(member)?.is_constructor() {
            continue;
        }
        for node in cx.use_sites(member) {
            drop_hop(cx, node, via)?;
        }
        cx.move_symbol(member, into, None)?;
    }
    cx.bind_symbol("via", via);
    Ok(())
}

fn inline_class_link(cx: &mut StepCx<'_>) -> StepResult {
    let via = cx.bound_symbol("via")?;
    if !cx.use_sites(via).is_empty() {
        return Err(StepError::plan(format!("{} is still used", cx.model().qualified_name(via))));
    }
    cx.delete_field(via)
}

fn inline_class_delete(cx: &mut StepCx<'_>) -> StepResult {
    let absorbed = cx.target();
    cx.delete_type(absorbed)
}

fn inline_class_post(v: &Verification<'_>) -> Check {
    if v.target_exists() {
        reject("class still exists")
    } else {
        Ok(())
    }
}

// ── Hide Delegate ─────────────────────────────────────────────────────

pub const HIDE_DELEGATE: Recipe = Recipe {
    name: "HideDelegate",
    shape: TargetShape::Field,
    precondition: hide_delegate_pre,
    steps: &[
        Step {
            name: "declare delegating method",
            run: hide_delegate_declare,
        },
        Step {
            name: "redirect clients",
            run: hide_delegate_clients,
        },
    ],
    postcondition: hide_delegate_post,
};

/// The delegate's method to hide behind the server.
fn hidden_method(
    model: &ProgramModel,
    field: SymbolId,
    params: &Params,
) -> Result<SymbolId, Rejection> {
    let method = checks::resolve_kind(model, &params.require_path("method")?, SymbolKind::Method)?;
    let delegate = model.symbol(field).and_then(|f| f.type_ref);
    if delegate.is_none() || model.symbol(method).and_then(|m| m.owner) != delegate {
        return reject(format!(
            "{} is not a method of the type held by {}",
            model.qualified_name(method),
            model.qualified_name(field)
        ));
    }
    if model.symbol(method).is_some_and(|m| m.modifiers.is_static || m.is_constructor()) {
        return reject("only instance methods can be delegated");
    }
    Ok(method)
}

/// Whether `receiver` reaches the delegate through `field`, directly or via
/// one of its getters.
fn reaches_delegate(model: &ProgramModel, receiver: NodeId, field: SymbolId) -> bool {
    let member = match model.node(receiver) {
        Some(n) if n.kind == NodeKind::Select && n.children.len() == 2 => n.children[1],
        Some(_) => receiver,
        None => return false,
    };
    model.node(member).is_some_and(|n| match (n.kind, n.symbol) {
        (NodeKind::Reference, Some(s)) => s == field,
        (NodeKind::Call, Some(s)) => {
            n.children.is_empty() && support::is_getter_of(model, s, field)
        }
        _ => false,
    })
}

fn delegate_chains(
    model: &ProgramModel,
    index: &ReferenceIndex,
    field: SymbolId,
    method: SymbolId,
) -> Vec<NodeId> {
    index
        .calls_to(method)
        .into_iter()
        .filter_map(|e| e.site.node())
        .filter(|site| receiver_of(model, *site).is_some_and(|r| reaches_delegate(model, r, field)))
        .collect()
}

fn hide_delegate_pre(a: &Analysis<'_>) -> Check {
    let method = hidden_method(a.model, a.target, a.params)?;
    let server = checks::owning_type(a.model, a.target)?;
    let name = a.params.name_or("name", || name_of(a.model, method))?;
    checks::name_free(a.model, server, &name)?;
    if delegate_chains(a.model, a.index, a.target, method).is_empty() {
        return reject("no client reaches the method through this field");
    }
    Ok(())
}

fn hide_delegate_declare(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let method = hidden_method(cx.model(), field, cx.params())?;
    let server = checks::owning_type(cx.model(), field)?;
    let name = cx.params().name_or("name", || name_of(cx.model(), method))?;
    let index = cx.index();
    let chains = delegate_chains(cx.model(), &index, field, method);

    let returns = cx.symbol(method)?.type_ref;
    let delegating = cx.add_method(server, &name, Modifiers::default(), returns)?;
    support::copy_params(cx, method, delegating, &[])?;
    support::write_delegation(cx, delegating, Some(field), method, false)?;
    cx.bind_symbol("method", delegating);
    cx.bind("chains", Binding::Nodes(chains));
    Ok(())
}

fn hide_delegate_clients(cx: &mut StepCx<'_>) -> StepResult {
    let delegating = cx.bound_symbol("method")?;
    for site in cx.bound_nodes("chains") {
        let receiver = receiver_of(cx.model(), site)
            .ok_or_else(|| StepError::plan(format!("call at {site} lost its receiver")))?;
        cx.rewire(site, NodeKind::Call, delegating)?;
        if is_kind(cx.model(), receiver, NodeKind::Select) {
            cx.unwrap(receiver, 0)?;
        } else {
            let select = support::access_root(cx.model(), site);
            cx.unwrap(select, 1)?;
        }
    }
    Ok(())
}

fn hide_delegate_post(v: &Verification<'_>) -> Check {
    v.exists("method")?;
    let method = hidden_method(v.model, v.target, v.params)?;
    let remaining = delegate_chains(v.model, v.index, v.target, method)
        .into_iter()
        .filter(|site| v.model.enclosing_symbol(*site) != v.symbol("method"))
        .count();
    if remaining == 0 {
        Ok(())
    } else {
        reject(format!("{remaining} client(s) still reach through the delegate"))
    }
}

// ── Remove Middle Man ─────────────────────────────────────────────────

pub const REMOVE_MIDDLE_MAN: Recipe = Recipe {
    name: "RemoveMiddleMan",
    shape: TargetShape::Method,
    precondition: middle_man_pre,
    steps: &[
        Step {
            name: "ensure delegate getter",
            run: middle_man_getter,
        },
        Step {
            name: "call the delegate directly",
            run: middle_man_clients,
        },
        Step {
            name: "delete delegating method",
            run: middle_man_delete,
        },
    ],
    postcondition: middle_man_post,
};

/// `(field, delegate method)` when the body is exactly
/// `return field.m(params..)` or `field.m(params..)`.
fn delegation(model: &ProgramModel, method: SymbolId) -> Result<(SymbolId, SymbolId), Rejection> {
    let owner = checks::owning_type(model, method)?;
    let statements = model.body_statements(method);
    let [statement] = statements.as_slice() else {
        return reject("method does more than delegate");
    };
    let expr = match model.node(*statement) {
        Some(n) if n.kind == NodeKind::Return && n.children.len() == 1 => n.children[0],
        Some(n) if n.kind == NodeKind::Select => n.id,
        _ => return reject("method does more than delegate"),
    };
    let select = model
        .node(expr)
        .filter(|n| n.kind == NodeKind::Select && n.children.len() == 2)
        .ok_or_else(|| Rejection::new("method does more than delegate"))?;
    let field = model
        .node(strip_this(model, select.children[0]))
        .filter(|n| n.kind == NodeKind::Reference)
        .and_then(|n| n.symbol)
        .filter(|f| {
            model
                .symbol(*f)
                .is_some_and(|s| s.kind == SymbolKind::Field && s.owner == Some(owner))
        })
        .ok_or_else(|| Rejection::new("delegation does not go through a field of this type"))?;
    let call = model
        .node(select.children[1])
        .filter(|n| n.kind == NodeKind::Call)
        .ok_or_else(|| Rejection::new("method does more than delegate"))?;
    let params = model.params(method);
    let forwarded = call.children.len() == params.len()
        && call
            .children
            .iter()
            .zip(&params)
            .all(|(arg, p)| {
                model
                    .node(*arg)
                    .is_some_and(|n| n.kind == NodeKind::Reference && n.symbol == Some(*p))
            });
    if !forwarded {
        return reject("delegation does not forward the parameters unchanged");
    }
    let target = call.symbol.ok_or_else(|| Rejection::new("delegation calls nothing"))?;
    Ok((field, target))
}

fn middle_man_pre(a: &Analysis<'_>) -> Check {
    let (field, _) = delegation(a.model, a.target)?;
    checks::not_polymorphic(a.model, a.index, a.target)?;
    let getter = support::getter_name(&name_of(a.model, field));
    support::accessor_available(a.model, field, &getter, false)
}

fn middle_man_getter(cx: &mut StepCx<'_>) -> StepResult {
    let (field, _) = delegation(cx.model(), cx.target())?;
    let getter_name = support::getter_name(&name_of(cx.model(), field));
    let getter = support::ensure_getter(cx, field, &getter_name)?;
    cx.bind_symbol("getter", getter);
    Ok(())
}

fn middle_man_clients(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let (_, delegate) = delegation(cx.model(), method)?;
    let getter = cx.bound_symbol("getter")?;
    for site in cx.call_sites(method) {
        cx.rewire(site, NodeKind::Call, delegate)?;
        match receiver_of(cx.model(), site) {
            Some(receiver) => {
                cx.wrap(receiver, |t, inner| {
                    let g = t.call(getter, Vec::new());
                    t.select(inner, g)
                })?;
            }
            None => {
                cx.wrap(site, |t, inner| {
                    let g = t.call(getter, Vec::new());
                    t.select(g, inner)
                })?;
            }
        }
    }
    Ok(())
}

fn middle_man_delete(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    cx.delete_method(method)
}

fn middle_man_post(v: &Verification<'_>) -> Check {
    v.exists("getter")?;
    if v.target_exists() {
        reject("delegating method still exists")
    } else {
        Ok(())
    }
}

// ── Introduce Foreign Method ──────────────────────────────────────────

pub const INTRODUCE_FOREIGN_METHOD: Recipe = Recipe {
    name: "IntroduceForeignMethod",
    shape: TargetShape::Method,
    precondition: foreign_pre,
    steps: &[Step {
        name: "extract foreign method",
        run: foreign_extract,
    }],
    postcondition: foreign_post,
};

/// The server type the expression works on: the declared type of the
/// first variable it reads.
fn foreign_server(
    model: &ProgramModel,
    method: SymbolId,
    expr: NodeId,
) -> Result<SymbolId, Rejection> {
    let client = checks::owning_type(model, method)?;
    checks::variables_used(model, &[expr], method)
        .into_iter()
        .find_map(|v| model.symbol(v)?.type_ref.filter(|t| *t != client))
        .ok_or_else(|| Rejection::new("expression does not work on an object of another type"))
}

fn foreign_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    let expr = a.params.require_node("node")?;
    let node = checks::node_in(a.model, expr, method)?;
    if node.kind.is_statement() {
        return reject("node is a statement, not an expression");
    }
    if checks::has_side_effects(a.model, expr) {
        return reject("expression has side effects");
    }
    let client = checks::owning_type(a.model, method)?;
    let uses_client = a
        .model
        .symbols_referenced(expr)
        .into_iter()
        .any(|s| a.model.symbol(s).is_some_and(|s| s.owner == Some(client)))
        || a.model.descendants(expr).into_iter().any(|n| is_kind(a.model, n, NodeKind::This));
    if uses_client {
        return reject("expression uses members of the client; a foreign method sees only the server");
    }
    foreign_server(a.model, method, expr)?;
    checks::name_free(a.model, client, &a.params.require_name("name")?)
}

fn foreign_extract(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let expr = cx.params().require_node("node")?;
    let name = cx.params().require_name("name")?;
    let server = foreign_server(cx.model(), method, expr)?;
    let server_path = cx.model().qualified_name(server);
    let foreign = support::extract_expression(cx, method, expr, &name, true)?;
    cx.set_tag(foreign, support::FOREIGN_FOR, Some(&server_path))?;
    cx.bind_symbol("method", foreign);
    Ok(())
}

fn foreign_post(v: &Verification<'_>) -> Check {
    v.exists("method")?;
    match v.symbol("method").and_then(|m| v.model.symbol(m)) {
        Some(m) if m.modifiers.is_static && m.tag(support::FOREIGN_FOR).is_some() => Ok(()),
        _ => reject("foreign method is not a tagged static method"),
    }
}

// ── Introduce Local Extension ─────────────────────────────────────────

pub const INTRODUCE_LOCAL_EXTENSION: Recipe = Recipe {
    name: "IntroduceLocalExtension",
    shape: TargetShape::Type,
    precondition: extension_pre,
    steps: &[
        Step {
            name: "declare extension",
            run: extension_declare,
        },
        Step {
            name: "adopt foreign methods",
            run: extension_adopt,
        },
    ],
    postcondition: extension_post,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtensionMode {
    Subclass,
    Wrapper,
}

fn extension_mode(params: &Params) -> Result<ExtensionMode, Rejection> {
    match params.text("mode")?.as_deref() {
        None | Some("subclass") => Ok(ExtensionMode::Subclass),
        Some("wrapper") => Ok(ExtensionMode::Wrapper),
        Some(other) => reject(format!(
            "unknown extension mode `{other}`; use `subclass` or `wrapper`"
        )),
    }
}

fn foreign_methods(model: &ProgramModel, server: SymbolId) -> Vec<SymbolId> {
    let path = model.qualified_name(server);
    let mut methods: Vec<SymbolId> = model
        .symbols()
        .filter(|s| {
            s.kind == SymbolKind::Method && s.tag(support::FOREIGN_FOR) == Some(path.as_str())
        })
        .map(|s| s.id)
        .collect();
    methods.sort();
    methods
}

/// Public instance methods a wrapper forwards.
fn forwarded(model: &ProgramModel, server: SymbolId) -> Vec<SymbolId> {
    model
        .methods(server)
        .into_iter()
        .filter(|m| {
            model
                .symbol(*m)
                .is_some_and(|s| {
                    !s.modifiers.is_static && s.modifiers.visibility == Visibility::Public
                })
        })
        .collect()
}

fn extension_pre(a: &Analysis<'_>) -> Check {
    let server = a.target;
    let name = a.params.require_name("name")?;
    let mode = extension_mode(a.params)?;
    checks::name_free(a.model, support::module_of(a.model, server)?, &name)?;
    if mode == ExtensionMode::Subclass && a.symbol()?.modifiers.is_final {
        return reject("a final class cannot be subclassed; use mode `wrapper`");
    }
    let mut names: Vec<String> = foreign_methods(a.model, server)
        .into_iter()
        .map(|m| name_of(a.model, m))
        .collect();
    if mode == ExtensionMode::Wrapper {
        names.push("original".to_string());
        names.extend(forwarded(a.model, server).into_iter().map(|m| name_of(a.model, m)));
    }
    support::distinct(&names)
}

fn extension_declare(cx: &mut StepCx<'_>) -> StepResult {
    let server = cx.target();
    let name = cx.params().require_name("name")?;
    let module = support::module_of(cx.model(), server)?;
    let extension = match extension_mode(cx.params())? {
        ExtensionMode::Subclass => cx.add_type(module, &name, Some(server))?,
        ExtensionMode::Wrapper => {
            let extension = cx.add_type(module, &name, None)?;
            let modifiers = Modifiers::private().finalized();
            let original = cx.add_field(extension, "original", modifiers, Some(server))?;
            support::assigning_constructor(cx, extension, &[original])?;
            for method in forwarded(cx.model(), server) {
                let source = cx.symbol(method)?.clone();
                let forward =
                    cx.add_method(extension, &source.name, Modifiers::default(), source.type_ref)?;
                support::copy_params(cx, method, forward, &[])?;
                support::write_delegation(cx, forward, Some(original), method, false)?;
            }
            extension
        }
    };
    cx.bind_symbol("extension", extension);
    Ok(())
}

fn extension_adopt(cx: &mut StepCx<'_>) -> StepResult {
    let server = cx.target();
    let extension = cx.bound_symbol("extension")?;
    let adopted = foreign_methods(cx.model(), server);
    for method in &adopted {
        cx.move_symbol(*method, extension, None)?;
        cx.set_tag(*method, support::FOREIGN_FOR, None)?;
        cx.update_modifiers(*method, |m| m.visibility = Visibility::Public)?;
    }
    cx.bind("adopted", Binding::Symbols(adopted));
    Ok(())
}

fn extension_post(v: &Verification<'_>) -> Check {
    v.exists("extension")?;
    if foreign_methods(v.model, v.target).is_empty() {
        Ok(())
    } else {
        reject("foreign methods remain outside the extension")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ConflictKind;
    use crate::config::RecastConfig;
    use crate::session::Session;
    use recast_model::{ModelBuilder, check_well_formed};

    fn resolve(s: &Session, path: &str) -> Option<SymbolId> {
        s.snapshot().model.resolve(&path.parse().unwrap()).ok()
    }

    /// `Account` charging overdraft through its `AccountType`.
    fn bank(with_override: bool) -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let kind = b.ty(app, "AccountType");
        let premium = b.method(kind, "isPremium");
        let yes = b.lit("true");
        let ret = b.ret(Some(yes));
        b.body(premium, vec![ret]);

        let account = b.ty(app, "Account");
        let link = b.field(account, "accountType");
        b.typed(link, kind);
        let days = b.field(account, "daysOverdrawn");
        let rate = b.field(account, "interestRate");
        let charge = b.method(account, "overdraftCharge");
        let d = b.read(days);
        let two = b.lit("2");
        let product = b.op("*", vec![d, two]);
        let ret = b.ret(Some(product));
        b.body(charge, vec![ret]);
        let bank_charge = b.method(account, "bankCharge");
        let c = b.call(charge, Vec::new());
        let fee = b.lit("4.5");
        let sum = b.op("+", vec![c, fee]);
        let ret = b.ret(Some(sum));
        b.body(bank_charge, vec![ret]);
        let interest = b.method(account, "interest");
        let r = b.read(rate);
        let three = b.lit("3");
        let product = b.op("*", vec![r, three]);
        let ret = b.ret(Some(product));
        b.body(interest, vec![ret]);

        if with_override {
            let gold = b.subtype(app, "GoldAccount", account);
            let charge = b.method(gold, "overdraftCharge");
            let zero = b.lit("0");
            let ret = b.ret(Some(zero));
            b.body(charge, vec![ret]);
        }
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn move_method_is_rejected_with_an_override() {
        let s = bank(true);
        let params = Params::new().with("via", "accountType");
        let verdict = s.check("MoveMethod", "app::Account::overdraftCharge", &params).unwrap();
        let rejection = verdict.rejection().unwrap();
        assert_eq!(rejection.reason, "polymorphic override present");
        assert_eq!(rejection.conflicts[0].kind, ConflictKind::PolymorphicOverride);
    }

    #[test]
    fn move_method_leaves_a_delegate() {
        let s = bank(false);
        let params = Params::new().with("via", "accountType");
        s.perform("MoveMethod", "app::Account::overdraftCharge", &params).unwrap();
        let moved = resolve(&s, "app::AccountType::overdraftCharge").unwrap();
        let original = resolve(&s, "app::Account::overdraftCharge").unwrap();
        let snapshot = s.snapshot();
        let names: Vec<_> = snapshot
            .model
            .params(moved)
            .iter()
            .map(|p| snapshot.model.symbol(*p).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["account"]);
        assert_eq!(snapshot.index.callers_of(moved), vec![original]);
        let days = resolve(&s, "app::Account::daysOverdrawn").unwrap();
        assert_eq!(snapshot.model.symbol(days).unwrap().modifiers.visibility, Visibility::Package);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn move_field_routes_reads_through_the_link() {
        let s = bank(false);
        let params = Params::new().with("via", "accountType");
        s.perform("MoveField", "app::Account::interestRate", &params).unwrap();
        assert!(resolve(&s, "app::Account::interestRate").is_none());
        let rate = resolve(&s, "app::AccountType::interestRate").unwrap();
        let snapshot = s.snapshot();
        let read = snapshot.index.reads_of(rate)[0].site.node().unwrap();
        let receiver = receiver_of(&snapshot.model, read).unwrap();
        let link = resolve(&s, "app::Account::accountType").unwrap();
        assert_eq!(snapshot.model.node(receiver).unwrap().symbol, Some(link));
    }

    fn person() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let person = b.ty(app, "Person");
        b.field(person, "name");
        let area = b.field(person, "officeAreaCode");
        let number = b.field(person, "officeNumber");
        let phone = b.method(person, "getTelephoneNumber");
        let open = b.lit("\"(\"");
        let a = b.read(area);
        let close = b.lit("\") \"");
        let n = b.read(number);
        let text = b.op("+", vec![open, a, close, n]);
        let ret = b.ret(Some(text));
        b.body(phone, vec![ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn extract_class_then_inline_class() {
        let s = person();
        let params = Params::new()
            .with("name", "TelephoneNumber")
            .with("fields", serde_json::json!(["officeAreaCode", "officeNumber"]))
            .with("methods", serde_json::json!(["getTelephoneNumber"]))
            .with("link", "officeTelephone");
        s.perform("ExtractClass", "app::Person", &params).unwrap();
        assert!(resolve(&s, "app::TelephoneNumber::officeAreaCode").is_some());
        let moved = resolve(&s, "app::TelephoneNumber::getTelephoneNumber").unwrap();
        assert!(s.snapshot().model.params(moved).is_empty());
        assert!(resolve(&s, "app::Person::getTelephoneNumber").is_none());
        assert!(check_well_formed(&s.snapshot().model).is_empty());

        let params = Params::new().with("into", "app::Person").with("via", "officeTelephone");
        s.perform("InlineClass", "app::TelephoneNumber", &params).unwrap();
        assert!(resolve(&s, "app::TelephoneNumber").is_none());
        assert!(resolve(&s, "app::Person::officeNumber").is_some());
        assert!(resolve(&s, "app::Person::getTelephoneNumber").is_some());
        assert!(resolve(&s, "app::Person::officeTelephone").is_none());
        assert!(check_well_formed(&s.snapshot().model).is_empty());
    }

    /// `Client.find(p)` asking `p.getDepartment().getManager()`.
    fn departments() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let department = b.ty(app, "Department");
        let manager = b.field(department, "manager");
        let get_manager = b.method(department, "getManager");
        let m = b.read(manager);
        let ret = b.ret(Some(m));
        b.body(get_manager, vec![ret]);

        let person = b.ty(app, "Person");
        let dept = b.field(person, "department");
        b.typed(dept, department);
        let get_dept = b.method(person, "getDepartment");
        b.typed(get_dept, department);
        let d = b.read(dept);
        let ret = b.ret(Some(d));
        b.body(get_dept, vec![ret]);

        let client = b.ty(app, "Client");
        let find = b.method(client, "find");
        let p = b.param(find, "p");
        b.typed(p, person);
        let receiver = b.read(p);
        let getter = b.call(get_dept, Vec::new());
        let chain = b.select(receiver, getter);
        let call = b.call(get_manager, Vec::new());
        let outer = b.select(chain, call);
        let ret = b.ret(Some(outer));
        b.body(find, vec![ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn hide_delegate_and_remove_middle_man_are_inverse() {
        let s = departments();
        let before = s.snapshot().index.edge_signature();
        let params = Params::new().with("method", "app::Department::getManager");
        s.perform("HideDelegate", "app::Person::department", &params).unwrap();
        let hidden = resolve(&s, "app::Person::getManager").unwrap();
        let find = resolve(&s, "app::Client::find").unwrap();
        assert_eq!(s.snapshot().index.callers_of(hidden), vec![find]);

        s.perform("RemoveMiddleMan", "app::Person::getManager", &Params::new()).unwrap();
        assert!(resolve(&s, "app::Person::getManager").is_none());
        assert_eq!(s.snapshot().index.edge_signature(), before);
    }

    #[test]
    fn foreign_method_is_static_and_tagged() {
        let mut b = ModelBuilder::new();
        let lib = b.module("lib");
        let date = b.ty(lib, "Date");
        let get_date = b.method(date, "getDate");
        let app = b.module("app");
        let report = b.ty(app, "Report");
        let next = b.method(report, "start");
        let previous = b.param(next, "previousEnd");
        b.typed(previous, date);
        let r = b.read(previous);
        let day = b.call(get_date, Vec::new());
        let access = b.select(r, day);
        let one = b.lit("1");
        let sum = b.op("+", vec![access, one]);
        let built = b.new_instance(date, vec![sum]);
        let ret = b.ret(Some(built));
        b.body(next, vec![ret]);
        let s = Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap();

        let params = Params::new().with("node", built.0).with("name", "nextDay");
        s.perform("IntroduceForeignMethod", "app::Report::start", &params).unwrap();
        let foreign = resolve(&s, "app::Report::nextDay").unwrap();
        let snapshot = s.snapshot();
        let symbol = snapshot.model.symbol(foreign).unwrap();
        assert!(symbol.modifiers.is_static);
        assert_eq!(symbol.tag(support::FOREIGN_FOR), Some("lib::Date"));
        drop(snapshot);

        let params = Params::new().with("name", "MfDate");
        s.perform("IntroduceLocalExtension", "lib::Date", &params).unwrap();
        assert!(resolve(&s, "lib::MfDate::nextDay").is_some());
        assert!(resolve(&s, "app::Report::nextDay").is_none());
    }
}
