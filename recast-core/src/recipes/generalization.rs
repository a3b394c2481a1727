// Dealing with generalization: moving members along a hierarchy, creating
// and collapsing types, and trading inheritance for delegation.

use std::collections::HashMap;

use recast_model::{
    Anchor, Modifiers, NodeId, NodeKind, Parent, ProgramModel, ReferenceIndex, SymbolId, SymbolKind,
    Visibility,
};

use super::support::{self, is_kind, name_of, strip_this};
use crate::analyzer::checks::{self, receiver_of};
use crate::analyzer::{Analysis, Check, ConflictKind, Rejection, Verification, reject, similarity};
use crate::engine::{Binding, StepCx, StepResult};
use crate::error::StepError;
use crate::params::{Params, RangeSpec};
use crate::registry::{Recipe, Step, TargetShape};

pub fn recipes() -> Vec<Recipe> {
    vec![
        PULL_UP_FIELD,
        PULL_UP_METHOD,
        PULL_UP_CONSTRUCTOR_BODY,
        PUSH_DOWN_METHOD,
        PUSH_DOWN_FIELD,
        EXTRACT_SUBCLASS,
        EXTRACT_SUPERCLASS,
        COLLAPSE_HIERARCHY,
        FORM_TEMPLATE_METHOD,
        REPLACE_INHERITANCE_WITH_DELEGATION,
        REPLACE_DELEGATION_WITH_INHERITANCE,
    ]
}

fn supertype_of(model: &ProgramModel, ty: SymbolId) -> Result<SymbolId, Rejection> {
    model
        .symbol(ty)
        .and_then(|s| s.supertype)
        .ok_or_else(|| Rejection::new(format!("{} has no supertype", model.qualified_name(ty))))
}

/// Direct subtypes in declaration order.
fn subtypes_of(model: &ProgramModel, ty: SymbolId) -> Vec<SymbolId> {
    let mut subs = model.subtypes(ty);
    subs.sort();
    subs
}

/// Symbols named like `member` in the other direct subtypes of `sup`.
fn namesakes(model: &ProgramModel, member: SymbolId, sup: SymbolId) -> Vec<SymbolId> {
    let owner = model.symbol(member).and_then(|s| s.owner);
    let name = name_of(model, member);
    subtypes_of(model, sup)
        .into_iter()
        .filter(|s| Some(*s) != owner)
        .filter_map(|s| model.member_named(Some(s), &name))
        .collect()
}

fn dissimilar(
    model: &ProgramModel,
    what: &str,
    other: SymbolId,
    score: f64,
    threshold: f64,
) -> Rejection {
    Rejection::new(format!("{what} (heuristic)")).with_conflict(
        ConflictKind::Dissimilar,
        model.qualified_name(other),
        format!("similarity {score:.2} is below {threshold:.2}"),
    )
}

/// A field of another subtype can merge with `field`: same declaration,
/// used in a similar way.
fn field_matches(a: &Analysis<'_>, field: SymbolId, other: SymbolId) -> Check {
    let (f, o) = match (a.model.symbol(field), a.model.symbol(other)) {
        (Some(f), Some(o)) => (f, o),
        _ => return reject("field vanished"),
    };
    if o.kind != SymbolKind::Field {
        let reason = format!("`{}` means something else in another subtype", f.name);
        return Err(Rejection::new(reason).with_conflict(
            ConflictKind::NameCollision,
            a.model.qualified_name(other),
            format!("is a {}", o.kind),
        ));
    }
    if o.type_ref != f.type_ref || o.modifiers.is_static != f.modifiers.is_static {
        return reject(format!("{} is declared differently", a.model.qualified_name(other)));
    }
    let threshold = a.config.similarity_threshold;
    let score = similarity::score(
        &similarity::usage_profile(a.model, a.index, field),
        &similarity::usage_profile(a.model, a.index, other),
    );
    if score < threshold {
        let reason = "fields are not used in a similar way";
        return Err(dissimilar(a.model, reason, other, score, threshold));
    }
    Ok(())
}

/// A method of another subtype can merge with `method`: same arity, same
/// shape of body.
fn method_matches(a: &Analysis<'_>, method: SymbolId, other: SymbolId) -> Check {
    let name = name_of(a.model, method);
    match a.model.symbol(other) {
        Some(o) if o.kind == SymbolKind::Method && !o.is_constructor() => {}
        _ => {
            let reason = format!("`{name}` means something else in another subtype");
            return Err(Rejection::new(reason).with_conflict(
                ConflictKind::NameCollision,
                a.model.qualified_name(other),
                "is not a method",
            ));
        }
    }
    if a.model.params(other).len() != a.model.params(method).len() {
        return reject(format!("{} takes different parameters", a.model.qualified_name(other)));
    }
    let threshold = a.config.similarity_threshold;
    let score = similarity::score(
        &similarity::body_profile(a.model, method),
        &similarity::body_profile(a.model, other),
    );
    if score < threshold {
        let reason = "methods do not do the same thing";
        return Err(dissimilar(a.model, reason, other, score, threshold));
    }
    Ok(())
}

/// Fields and methods of `owner` named in `symbol`'s body that a copy
/// declared elsewhere could not reach. Overrides are reachable through
/// dispatch.
fn own_members_used(
    model: &ProgramModel,
    index: &ReferenceIndex,
    symbol: SymbolId,
    owner: SymbolId,
    allowed: &[SymbolId],
) -> Vec<SymbolId> {
    let mut used: Vec<SymbolId> = model
        .body_nodes(symbol)
        .into_iter()
        .filter_map(|id| model.node(id)?.symbol)
        .filter(|s| *s != symbol && !allowed.contains(s) && index.overrides(*s).is_none())
        .filter(|s| {
            model.symbol(*s).is_some_and(|m| {
                m.owner == Some(owner) && matches!(m.kind, SymbolKind::Field | SymbolKind::Method)
            })
        })
        .collect();
    used.sort();
    used.dedup();
    used
}

fn stranded(
    a: &Analysis<'_>,
    symbol: SymbolId,
    owner: SymbolId,
    into: &str,
    allowed: &[SymbolId],
) -> Check {
    let used = own_members_used(a.model, a.index, symbol, owner, allowed);
    let Some(member) = used.first().copied() else {
        return Ok(());
    };
    let suggestion = if a.model.symbol(member).is_some_and(|m| m.kind == SymbolKind::Field) {
        "PullUpField"
    } else {
        "PullUpMethod"
    };
    Err(Rejection::new(format!(
        "{} uses {}, which {into} does not have",
        a.model.qualified_name(symbol),
        a.model.qualified_name(member)
    ))
    .suggest(suggestion))
}

fn pulled_up(v: &Verification<'_>) -> Check {
    let into = v.symbol("into");
    if into.is_none() || v.model.symbol(v.target).and_then(|s| s.owner) != into {
        return reject("member is not declared in the supertype");
    }
    match v.symbols("duplicates").into_iter().find(|d| v.model.symbol(*d).is_some()) {
        Some(d) => reject(format!("{} still exists", v.model.qualified_name(d))),
        None => Ok(()),
    }
}

// ── Pull Up Field ─────────────────────────────────────────────────────

pub const PULL_UP_FIELD: Recipe = Recipe {
    name: "PullUpField",
    shape: TargetShape::Field,
    precondition: pull_up_field_pre,
    steps: &[
        Step {
            name: "move declaration",
            run: pull_up_move,
        },
        Step {
            name: "merge duplicates",
            run: pull_up_field_merge,
        },
    ],
    postcondition: pulled_up,
};

fn pull_up_field_pre(a: &Analysis<'_>) -> Check {
    let field = a.target;
    let owner = checks::owning_type(a.model, field)?;
    let sup = supertype_of(a.model, owner)?;
    checks::name_free(a.model, sup, &a.symbol()?.name)?;
    for other in namesakes(a.model, field, sup) {
        field_matches(a, field, other)?;
    }
    Ok(())
}

/// Shared first step of both pull-ups: record the namesakes, then move.
fn pull_up_move(cx: &mut StepCx<'_>) -> StepResult {
    let member = cx.target();
    let owner = checks::owning_type(cx.model(), member)?;
    let sup = supertype_of(cx.model(), owner)?;
    let duplicates = namesakes(cx.model(), member, sup);
    cx.move_symbol(member, sup, None)?;
    support::open_to_subtypes(cx, member)?;
    cx.bind_symbol("into", sup);
    cx.bind("duplicates", Binding::Symbols(duplicates));
    Ok(())
}

fn pull_up_field_merge(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    for duplicate in cx.bound_symbols("duplicates") {
        for node in cx.use_sites(duplicate) {
            let kind = cx.node(node)?.kind;
            cx.rewire(node, kind, field)?;
        }
        cx.delete_field(duplicate)?;
    }
    Ok(())
}

// ── Pull Up Method ────────────────────────────────────────────────────

pub const PULL_UP_METHOD: Recipe = Recipe {
    name: "PullUpMethod",
    shape: TargetShape::Method,
    precondition: pull_up_method_pre,
    steps: &[
        Step {
            name: "move declaration",
            run: pull_up_move,
        },
        Step {
            name: "remove duplicates",
            run: pull_up_method_merge,
        },
    ],
    postcondition: pulled_up,
};

fn pull_up_method_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    let owner = checks::owning_type(a.model, method)?;
    let sup = supertype_of(a.model, owner)?;
    checks::name_free(a.model, sup, &a.symbol()?.name)?;
    for other in namesakes(a.model, method, sup) {
        method_matches(a, method, other)?;
    }
    stranded(a, method, owner, &a.model.qualified_name(sup), &[])
}

fn pull_up_method_merge(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    for duplicate in cx.bound_symbols("duplicates") {
        for node in cx.call_sites(duplicate) {
            cx.rewire(node, NodeKind::Call, method)?;
        }
        cx.delete_method(duplicate)?;
    }
    Ok(())
}

// ── Pull Up Constructor Body ──────────────────────────────────────────

pub const PULL_UP_CONSTRUCTOR_BODY: Recipe = Recipe {
    name: "PullUpConstructorBody",
    shape: TargetShape::Constructor,
    precondition: constructor_body_pre,
    steps: &[
        Step {
            name: "declare supertype constructor",
            run: constructor_body_declare,
        },
        Step {
            name: "call it from each subtype",
            run: constructor_body_call,
        },
    ],
    postcondition: constructor_body_post,
};

/// Leading statements shared by every subtype constructor.
#[derive(Debug)]
struct SharedPrefix {
    sup: SymbolId,
    /// The target first, then one constructor per sibling subtype.
    ctors: Vec<SymbolId>,
    len: usize,
    /// Parameter positions the shared statements read.
    positions: Vec<usize>,
}

/// Whether `statement` of `ctor` could run in the supertype: it names only
/// parameters of `ctor` and symbols declared outside the subtypes.
fn runs_in_supertype(
    model: &ProgramModel,
    ctor: SymbolId,
    subs: &[SymbolId],
    statement: NodeId,
) -> bool {
    model.symbols_referenced(statement).into_iter().all(|s| match model.symbol(s) {
        Some(sym) if sym.owner == Some(ctor) => sym.kind == SymbolKind::Parameter,
        Some(sym) => !sym.owner.is_some_and(|o| subs.contains(&o)),
        None => false,
    })
}

fn plan_prefix(model: &ProgramModel, ctor: SymbolId) -> Result<SharedPrefix, Rejection> {
    let owner = checks::owning_type(model, ctor)?;
    let sup = supertype_of(model, owner)?;
    if !model.constructors(sup).is_empty() {
        return reject(format!("{} already declares a constructor", model.qualified_name(sup)));
    }
    let mut ctors = vec![ctor];
    for sub in subtypes_of(model, sup) {
        if sub == owner {
            continue;
        }
        match model.constructors(sub).first() {
            Some(c) => ctors.push(*c),
            None => return reject(format!(
                "{} has no constructor to share",
                model.qualified_name(sub)
            )),
        }
    }
    let subs = model.all_subtypes(sup);
    let bodies: Vec<Vec<NodeId>> = ctors.iter().map(|c| model.body_statements(*c)).collect();
    let mut len = 0;
    while bodies.iter().all(|b| b.len() > len) {
        let shape = similarity::tree_profile(model, bodies[0][len], ctor);
        let shared = ctors
            .iter()
            .zip(&bodies)
            .all(|(c, b)| similarity::tree_profile(model, b[len], *c) == shape);
        if !shared || !runs_in_supertype(model, ctor, &subs, bodies[0][len]) {
            break;
        }
        len += 1;
    }
    if len == 0 {
        return reject("constructors share no leading statements the supertype could run");
    }
    let params = model.params(ctor);
    let read: Vec<SymbolId> = bodies[0][..len]
        .iter()
        .flat_map(|s| model.symbols_referenced(*s))
        .collect();
    let positions = (0..params.len()).filter(|i| read.contains(&params[*i])).collect();
    Ok(SharedPrefix {
        sup,
        ctors,
        len,
        positions,
    })
}

fn constructor_body_pre(a: &Analysis<'_>) -> Check {
    plan_prefix(a.model, a.target)?;
    Ok(())
}

fn constructor_body_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ctor = cx.target();
    let plan = plan_prefix(cx.model(), ctor)?;
    let shared = cx.add_constructor(plan.sup)?;
    let params = cx.model().params(ctor);
    let mut remap = HashMap::new();
    for position in &plan.positions {
        let source = cx.symbol(params[*position])?.clone();
        let copy = cx.add_param(shared, &source.name, source.type_ref, None)?;
        remap.insert(source.id, copy);
    }
    let statements = cx.model().body_statements(ctor);
    let mut copies = Vec::new();
    for statement in &statements[..plan.len] {
        copies.push(cx.clone_tree(*statement, &remap)?);
    }
    let body = cx.build(|t| {
        let grafted = copies.into_iter().map(|c| t.graft(c)).collect();
        t.block(grafted)
    });
    cx.insert(body, Anchor::Body(shared))?;
    cx.bind_symbol("constructor", shared);
    cx.bind("constructors", Binding::Symbols(plan.ctors));
    cx.bind("shared", Binding::Name(plan.len.to_string()));
    Ok(())
}

fn constructor_body_call(cx: &mut StepCx<'_>) -> StepResult {
    let shared = cx.bound_symbol("constructor")?;
    let len: usize = cx
        .bound_name("shared")?
        .parse()
        .map_err(|_| StepError::plan("shared statement count was not recorded"))?;
    let positions: Vec<usize> = {
        let sup_params = cx.model().params(shared);
        let ctor = cx.target();
        let params = cx.model().params(ctor);
        sup_params
            .iter()
            .filter_map(|p| {
                let name = cx.model().symbol(*p)?.name.clone();
                params.iter().position(|q| cx.model().symbol(*q).is_some_and(|s| s.name == name))
            })
            .collect()
    };
    for ctor in cx.bound_symbols("constructors") {
        let statements = cx.model().body_statements(ctor);
        for statement in &statements[..len] {
            cx.remove(*statement)?;
        }
        let params = cx.model().params(ctor);
        let args: Vec<SymbolId> =
            positions.iter().filter_map(|i| params.get(*i).copied()).collect();
        let call = cx.build(|t| {
            let reads = args.iter().map(|a| t.read(*a)).collect();
            t.call(shared, reads)
        });
        let body = cx.body_block(ctor)?;
        cx.insert_statement(body, 0, call)?;
    }
    Ok(())
}

fn constructor_body_post(v: &Verification<'_>) -> Check {
    v.exists("constructor")?;
    let shared = v.symbol("constructor");
    for ctor in v.symbols("constructors") {
        let first = v.model.body_statements(ctor).first().copied();
        let calls = first
            .and_then(|f| v.model.node(f))
            .is_some_and(|n| n.kind == NodeKind::Call && n.symbol == shared);
        if !calls {
            return reject(format!(
                "{} does not start by calling the shared constructor",
                v.model.qualified_name(ctor)
            ));
        }
    }
    Ok(())
}

// ── Push Down Method / Field ──────────────────────────────────────────

/// Subtypes that receive a pushed-down member: those named in `to`, or every
/// direct subtype.
fn plan_descent(
    model: &ProgramModel,
    member: SymbolId,
    params: &Params,
) -> Result<Vec<SymbolId>, Rejection> {
    let owner = checks::owning_type(model, member)?;
    let subs = subtypes_of(model, owner);
    if subs.is_empty() {
        return reject(format!("{} has no subtypes", model.qualified_name(owner)));
    }
    let names = params.names("to")?;
    if names.is_empty() {
        return Ok(subs);
    }
    support::distinct(&names)?;
    names
        .iter()
        .map(|n| {
            subs.iter()
                .copied()
                .find(|s| name_of(model, *s) == *n)
                .ok_or_else(|| Rejection::new(format!(
                    "`{n}` is not a direct subtype of {}",
                    model.qualified_name(owner)
                )))
        })
        .collect()
}

/// Which of `targets` a use at `node` belongs to: the one its code is
/// declared in, or the static type of its receiver.
fn home_of(model: &ProgramModel, node: NodeId, targets: &[SymbolId]) -> Option<SymbolId> {
    let belongs = |ty: SymbolId| {
        targets
            .iter()
            .copied()
            .find(|t| *t == ty || model.supertypes(ty).contains(t))
    };
    let enclosing = model.enclosing_symbol(node)?;
    if let Some(home) = model.owning_type(enclosing).and_then(belongs) {
        return Some(home);
    }
    let receiver = receiver_of(model, node)?;
    support::static_type(model, receiver).and_then(belongs)
}

/// Every use of `member` has a home among `targets`.
fn uses_stay_below(a: &Analysis<'_>, member: SymbolId, targets: &[SymbolId]) -> Check {
    let mut rejection = Rejection::new(format!(
        "{} is used where the chosen subtypes cannot supply it",
        a.name()
    ));
    let mut homeless = false;
    for edge in a.index.users_of(member) {
        let Some(site) = edge.site.node() else {
            continue;
        };
        if home_of(a.model, site, targets).is_none() {
            homeless = true;
            rejection = rejection.with_conflict(
                ConflictKind::ExternalUse,
                a.model.qualified_name(edge.enclosing),
                format!("uses it at {site}"),
            );
        }
    }
    if homeless { Err(rejection) } else { Ok(()) }
}

pub const PUSH_DOWN_METHOD: Recipe = Recipe {
    name: "PushDownMethod",
    shape: TargetShape::Method,
    precondition: push_down_method_pre,
    steps: &[
        Step {
            name: "copy into subtypes",
            run: push_down_method_copy,
        },
        Step {
            name: "retarget callers",
            run: push_down_method_callers,
        },
    ],
    postcondition: pushed_down,
};

fn push_down_method_pre(a: &Analysis<'_>) -> Check {
    let method = a.target;
    let targets = plan_descent(a.model, method, a.params)?;
    if a.index.callers_of(method).contains(&method) {
        return reject("method is recursive");
    }
    if a.index.overrides(method).is_some() {
        let reason = "method overrides a supertype method; pushing it down changes dispatch";
        return Err(Rejection::new(reason).with_conflict(
            ConflictKind::PolymorphicOverride,
            a.name(),
            "overrides",
        ));
    }
    let name = name_of(a.model, method);
    for target in &targets {
        checks::name_free(a.model, *target, &name)?;
    }
    uses_stay_below(a, method, &targets)
}

fn push_down_method_copy(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let owner = checks::owning_type(cx.model(), method)?;
    let targets = plan_descent(cx.model(), method, cx.params())?;
    let name = name_of(cx.model(), method);
    let mut copies = Vec::new();
    for target in &targets {
        let (copy, _) = support::copy_method(cx, method, *target, &name)?;
        copies.push(copy);
    }
    let index = cx.index();
    let opened = own_members_used(cx.model(), &index, method, owner, &[]);
    for member in opened {
        support::open_to_subtypes(cx, member)?;
    }
    cx.bind("targets", Binding::Symbols(targets));
    cx.bind("copies", Binding::Symbols(copies));
    Ok(())
}

fn push_down_method_callers(cx: &mut StepCx<'_>) -> StepResult {
    let method = cx.target();
    let targets = cx.bound_symbols("targets");
    let copies = cx.bound_symbols("copies");
    for node in cx.call_sites(method) {
        let home = home_of(cx.model(), node, &targets)
            .and_then(|h| targets.iter().position(|t| *t == h))
            .ok_or_else(|| StepError::plan(format!("call at {node} has no subtype to go to")))?;
        cx.rewire(node, NodeKind::Call, copies[home])?;
    }
    cx.delete_method(method)
}

fn pushed_down(v: &Verification<'_>) -> Check {
    let copies = v.symbols("copies");
    if copies.is_empty() {
        return reject("nothing was pushed down");
    }
    let targets = v.symbols("targets");
    for (copy, target) in copies.iter().zip(&targets) {
        if v.model.symbol(*copy).and_then(|c| c.owner) != Some(*target) {
            return reject(format!(
                "{} did not receive the member",
                v.model.qualified_name(*target)
            ));
        }
    }
    if v.target_exists() && !copies.contains(&v.target) {
        return reject("the supertype still declares the member");
    }
    Ok(())
}

pub const PUSH_DOWN_FIELD: Recipe = Recipe {
    name: "PushDownField",
    shape: TargetShape::Field,
    precondition: push_down_field_pre,
    steps: &[Step {
        name: "declare in subtypes",
        run: push_down_field_declare,
    }],
    postcondition: pushed_down,
};

fn push_down_field_pre(a: &Analysis<'_>) -> Check {
    let field = a.target;
    let targets = plan_descent(a.model, field, a.params)?;
    let name = name_of(a.model, field);
    for target in &targets {
        checks::name_free(a.model, *target, &name)?;
    }
    uses_stay_below(a, field, &targets)
}

fn push_down_field_declare(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let targets = plan_descent(cx.model(), field, cx.params())?;
    let mut sites: Vec<(NodeId, usize)> = Vec::new();
    for node in cx.use_sites(field) {
        let home = home_of(cx.model(), node, &targets)
            .and_then(|h| targets.iter().position(|t| *t == h))
            .ok_or_else(|| StepError::plan(format!("use at {node} has no subtype to go to")))?;
        sites.push((node, home));
    }

    // The first subtype takes the declaration itself, the rest get copies.
    let source = cx.symbol(field)?.clone();
    let mut copies = vec![field];
    for target in &targets[1..] {
        let copy = cx.add_field(*target, &source.name, source.modifiers, source.type_ref)?;
        if let Some(init) = source.body {
            let tree = cx.clone_tree(init, &HashMap::new())?;
            cx.insert(tree, Anchor::Body(copy))?;
        }
        copies.push(copy);
    }
    for (node, home) in sites {
        if home > 0 {
            let kind = cx.node(node)?.kind;
            cx.rewire(node, kind, copies[home])?;
        }
    }
    cx.move_symbol(field, targets[0], None)?;
    cx.bind("targets", Binding::Symbols(targets));
    cx.bind("copies", Binding::Symbols(copies));
    Ok(())
}

// ── Extract Subclass ──────────────────────────────────────────────────

pub const EXTRACT_SUBCLASS: Recipe = Recipe {
    name: "ExtractSubclass",
    shape: TargetShape::Type,
    precondition: extract_subclass_pre,
    steps: &[
        Step {
            name: "declare subclass",
            run: extract_subclass_declare,
        },
        Step {
            name: "move features",
            run: extract_subclass_move,
        },
        Step {
            name: "create the subclass",
            run: extract_subclass_creations,
        },
    ],
    postcondition: extract_subclass_post,
};

#[derive(Debug)]
struct Specialization {
    name: String,
    features: Vec<SymbolId>,
    /// `new C(..)` expressions that should build the subclass instead.
    creations: Vec<NodeId>,
}

fn plan_specialization(
    model: &ProgramModel,
    index: &ReferenceIndex,
    ty: SymbolId,
    params: &Params,
) -> Result<Specialization, Rejection> {
    let name = params.require_name("name")?;
    let field_names = params.names("fields")?;
    let method_names = params.names("methods")?;
    if field_names.is_empty() && method_names.is_empty() {
        return reject("name the fields or methods only some instances use");
    }
    support::distinct(&field_names.iter().chain(&method_names).cloned().collect::<Vec<_>>())?;
    let mut features = Vec::new();
    for n in &field_names {
        features.push(support::member_of_kind(model, ty, n, SymbolKind::Field)?);
    }
    for n in &method_names {
        let method = support::member_of_kind(model, ty, n, SymbolKind::Method)?;
        if model.symbol(method).is_some_and(|m| m.is_constructor()) {
            return reject("constructors stay with the type");
        }
        checks::not_polymorphic(model, index, method)?;
        features.push(method);
    }
    for feature in &features {
        if model.symbol(*feature).is_some_and(|f| f.modifiers.is_static) {
            return reject(format!("{} is static", model.qualified_name(*feature)));
        }
    }

    let mut rejection = Rejection::new("features are used by code that stays in the type");
    let mut shared = false;
    for feature in &features {
        for edge in index.users_of(*feature) {
            if edge.site.node().is_some() && !features.contains(&edge.enclosing) {
                shared = true;
                rejection = rejection.with_conflict(
                    ConflictKind::ExternalUse,
                    model.qualified_name(edge.enclosing),
                    format!("uses {}", model.qualified_name(*feature)),
                );
            }
        }
    }
    if shared {
        return Err(rejection);
    }

    let creations = params.nodes("nodes")?;
    for node in &creations {
        if !model.node(*node).is_some_and(|n| n.kind == NodeKind::New && n.symbol == Some(ty)) {
            return reject(format!("{node} does not create a {}", model.qualified_name(ty)));
        }
    }
    Ok(Specialization {
        name,
        features,
        creations,
    })
}

fn extract_subclass_pre(a: &Analysis<'_>) -> Check {
    if a.symbol()?.modifiers.is_final {
        return reject("type is final");
    }
    let plan = plan_specialization(a.model, a.index, a.target, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, a.target)?, &plan.name)
}

/// A constructor of `sub` with the parameters of `ctor` that only calls it.
fn forwarding_constructor(
    cx: &mut StepCx<'_>,
    sub: SymbolId,
    ctor: SymbolId,
) -> Result<SymbolId, StepError> {
    let copy = cx.add_constructor(sub)?;
    let params: Vec<SymbolId> = support::copy_params(cx, ctor, copy, &[])?
        .into_iter()
        .map(|(_, p)| p)
        .collect();
    let body = cx.build(|t| {
        let args = params.iter().map(|p| t.read(*p)).collect();
        let call = t.call(ctor, args);
        t.block(vec![call])
    });
    cx.insert(body, Anchor::Body(copy))?;
    Ok(copy)
}

fn extract_subclass_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let index = cx.index();
    let plan = plan_specialization(cx.model(), &index, ty, cx.params())?;
    let module = support::module_of(cx.model(), ty)?;
    let sub = cx.add_type(module, &plan.name, Some(ty))?;
    let ctors = cx.model().constructors(ty);
    for ctor in ctors {
        forwarding_constructor(cx, sub, ctor)?;
    }
    cx.bind_symbol("subclass", sub);
    cx.bind("features", Binding::Symbols(plan.features));
    cx.bind("creations", Binding::Nodes(plan.creations));
    Ok(())
}

fn extract_subclass_move(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let sub = cx.bound_symbol("subclass")?;
    let features = cx.bound_symbols("features");
    for feature in &features {
        cx.move_symbol(*feature, sub, None)?;
    }
    let index = cx.index();
    let mut opened = Vec::new();
    for feature in &features {
        opened.extend(own_members_used(cx.model(), &index, *feature, ty, &[]));
    }
    for member in opened {
        support::open_to_subtypes(cx, member)?;
    }
    Ok(())
}

fn extract_subclass_creations(cx: &mut StepCx<'_>) -> StepResult {
    let sub = cx.bound_symbol("subclass")?;
    for node in cx.bound_nodes("creations") {
        cx.rewire(node, NodeKind::New, sub)?;
    }
    Ok(())
}

fn extract_subclass_post(v: &Verification<'_>) -> Check {
    v.exists("subclass")?;
    let sub = v.symbol("subclass");
    if v.model.symbol(sub.unwrap_or(v.target)).and_then(|s| s.supertype) != Some(v.target) {
        return reject("subclass does not extend the type");
    }
    if let Some(f) = v
        .symbols("features")
        .into_iter()
        .find(|f| v.model.symbol(*f).and_then(|s| s.owner) != sub)
    {
        return reject(format!("{} did not move", v.model.qualified_name(f)));
    }
    match v
        .nodes("creations")
        .into_iter()
        .find(|n| v.model.node(*n).and_then(|n| n.symbol) != sub)
    {
        Some(n) => reject(format!("{n} still creates the type")),
        None => Ok(()),
    }
}

// ── Extract Superclass ────────────────────────────────────────────────

pub const EXTRACT_SUPERCLASS: Recipe = Recipe {
    name: "ExtractSuperclass",
    shape: TargetShape::Type,
    precondition: extract_superclass_pre,
    steps: &[
        Step {
            name: "declare superclass",
            run: extract_superclass_declare,
        },
        Step {
            name: "pull up fields",
            run: extract_superclass_fields,
        },
        Step {
            name: "pull up methods",
            run: extract_superclass_methods,
        },
    ],
    postcondition: extract_superclass_post,
};

#[derive(Debug)]
struct Commonality {
    name: String,
    /// The target first.
    types: Vec<SymbolId>,
    fields: Vec<SymbolId>,
    methods: Vec<SymbolId>,
}

fn plan_commonality(
    model: &ProgramModel,
    ty: SymbolId,
    params: &Params,
) -> Result<Commonality, Rejection> {
    let name = params.require_name("name")?;
    let mut types = vec![ty];
    for path in params.paths("types")? {
        let other = support::resolve_type(model, &path)?;
        if types.contains(&other) {
            return reject(format!("`{path}` is listed twice"));
        }
        types.push(other);
    }
    let parent = model.symbol(ty).and_then(|s| s.supertype);
    let stray = types
        .iter()
        .find(|t| model.symbol(**t).and_then(|s| s.supertype) != parent);
    if let Some(other) = stray {
        return reject(format!("{} has a different supertype", model.qualified_name(*other)));
    }
    let field_names = params.names("fields")?;
    let method_names = params.names("methods")?;
    support::distinct(&field_names.iter().chain(&method_names).cloned().collect::<Vec<_>>())?;
    let fields = field_names
        .iter()
        .map(|n| support::member_of_kind(model, ty, n, SymbolKind::Field))
        .collect::<Result<Vec<_>, _>>()?;
    let methods = method_names
        .iter()
        .map(|n| support::member_of_kind(model, ty, n, SymbolKind::Method))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Commonality {
        name,
        types,
        fields,
        methods,
    })
}

fn extract_superclass_pre(a: &Analysis<'_>) -> Check {
    let plan = plan_commonality(a.model, a.target, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, a.target)?, &plan.name)?;
    let namesakes_of = |member: SymbolId| -> Vec<SymbolId> {
        let name = name_of(a.model, member);
        plan.types[1..]
            .iter()
            .filter_map(|t| a.model.member_named(Some(*t), &name))
            .collect()
    };
    for field in &plan.fields {
        for other in namesakes_of(*field) {
            field_matches(a, *field, other)?;
        }
    }
    let pulled: Vec<SymbolId> = plan.fields.iter().chain(&plan.methods).copied().collect();
    for method in &plan.methods {
        if a.model.symbol(*method).is_some_and(|m| m.is_constructor()) {
            return reject("constructors cannot be pulled up; use PullUpConstructorBody");
        }
        for other in namesakes_of(*method) {
            method_matches(a, *method, other)?;
        }
        stranded(a, *method, a.target, &plan.name, &pulled)?;
    }
    Ok(())
}

fn extract_superclass_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let plan = plan_commonality(cx.model(), ty, cx.params())?;
    let module = support::module_of(cx.model(), ty)?;
    let parent = cx.symbol(ty)?.supertype;
    let sup = cx.add_type(module, &plan.name, parent)?;
    for t in &plan.types {
        cx.set_supertype(*t, Some(sup))?;
    }
    cx.bind_symbol("superclass", sup);
    cx.bind("types", Binding::Symbols(plan.types));
    cx.bind("fields", Binding::Symbols(plan.fields));
    cx.bind("methods", Binding::Symbols(plan.methods));
    Ok(())
}

fn extract_superclass_fields(cx: &mut StepCx<'_>) -> StepResult {
    for field in cx.bound_symbols("fields") {
        cx.invoke("PullUpField", field, Params::new())?;
    }
    Ok(())
}

fn extract_superclass_methods(cx: &mut StepCx<'_>) -> StepResult {
    for method in cx.bound_symbols("methods") {
        cx.invoke("PullUpMethod", method, Params::new())?;
    }
    Ok(())
}

fn extract_superclass_post(v: &Verification<'_>) -> Check {
    v.exists("superclass")?;
    let sup = v.symbol("superclass");
    for t in v.symbols("types") {
        if v.model.symbol(t).and_then(|s| s.supertype) != sup {
            return reject(format!(
                "{} does not extend the new superclass",
                v.model.qualified_name(t)
            ));
        }
    }
    for member in v.symbols("fields").into_iter().chain(v.symbols("methods")) {
        if v.model.symbol(member).and_then(|s| s.owner) != sup {
            return reject(format!("{} was not pulled up", v.model.qualified_name(member)));
        }
    }
    Ok(())
}

// ── Collapse Hierarchy ────────────────────────────────────────────────

pub const COLLAPSE_HIERARCHY: Recipe = Recipe {
    name: "CollapseHierarchy",
    shape: TargetShape::Subtype,
    precondition: collapse_pre,
    steps: &[
        Step {
            name: "move members into supertype",
            run: collapse_members,
        },
        Step {
            name: "retarget references",
            run: collapse_references,
        },
    ],
    postcondition: collapse_post,
};

fn collapse_pre(a: &Analysis<'_>) -> Check {
    let ty = a.target;
    let sup = supertype_of(a.model, ty)?;
    let mut rejection = Rejection::new(format!(
        "{} and {} declare the same names",
        a.name(),
        a.model.qualified_name(sup)
    ));
    let mut clashes = false;
    for member in a.model.members(ty) {
        let Some(symbol) = a.model.symbol(*member) else {
            continue;
        };
        if symbol.is_constructor() {
            if !a.model.constructors(sup).is_empty() {
                return reject("both types declare constructors");
            }
            continue;
        }
        if let Some(existing) = a.model.member_named(Some(sup), &symbol.name) {
            clashes = true;
            rejection = rejection.with_conflict(
                ConflictKind::NameCollision,
                a.model.qualified_name(existing),
                format!("is also declared by {}", a.name()),
            );
        }
    }
    if clashes { Err(rejection) } else { Ok(()) }
}

fn collapse_members(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let sup = supertype_of(cx.model(), ty)?;
    let sup_name = name_of(cx.model(), sup);
    for member in cx.model().members(ty).to_vec() {
        let is_constructor = cx.symbol(member)?.is_constructor();
        cx.move_symbol(member, sup, None)?;
        if is_constructor {
            cx.rename(member, &sup_name)?;
        }
    }
    cx.bind_symbol("into", sup);
    Ok(())
}

fn collapse_references(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let sup = cx.bound_symbol("into")?;
    support::retarget_type(cx, ty, sup)?;
    for sub in subtypes_of(cx.model(), ty) {
        cx.set_supertype(sub, Some(sup))?;
    }
    cx.delete_type(ty)
}

fn collapse_post(v: &Verification<'_>) -> Check {
    if v.target_exists() {
        return reject("subtype still exists");
    }
    v.exists("into")
}

// ── Form Template Method ──────────────────────────────────────────────

pub const FORM_TEMPLATE_METHOD: Recipe = Recipe {
    name: "FormTemplateMethod",
    shape: TargetShape::Method,
    precondition: template_pre,
    steps: &[
        Step {
            name: "extract differing steps",
            run: template_extract,
        },
        Step {
            name: "declare template",
            run: template_declare,
        },
        Step {
            name: "remove subtype methods",
            run: template_remove,
        },
    ],
    postcondition: template_post,
};

#[derive(Debug)]
struct Template {
    sup: SymbolId,
    /// The target first, then its namesakes in sibling subtypes.
    methods: Vec<SymbolId>,
    /// Statement positions where the methods differ.
    differing: Vec<usize>,
    names: Vec<String>,
}

fn plan_template(
    model: &ProgramModel,
    method: SymbolId,
    params: &Params,
) -> Result<Template, Rejection> {
    let owner = checks::owning_type(model, method)?;
    let sup = supertype_of(model, owner)?;
    checks::name_free(model, sup, &name_of(model, method))?;
    let mut methods = vec![method];
    methods.extend(
        namesakes(model, method, sup)
            .into_iter()
            .filter(|m| {
                model
                    .symbol(*m)
                    .is_some_and(|s| s.kind == SymbolKind::Method && !s.is_constructor())
            }),
    );
    if methods.len() < 2 {
        return reject("no sibling subtype declares the method");
    }
    let arity = model.params(method).len();
    let differs = |m: &SymbolId| {
        model.params(*m).len() != arity || model.symbol(*m).is_some_and(|s| s.modifiers.is_static)
    };
    if methods.iter().any(differs) {
        return reject("methods differ in signature");
    }
    let bodies: Vec<Vec<NodeId>> = methods.iter().map(|m| model.body_statements(*m)).collect();
    if bodies.iter().any(|b| b.len() != bodies[0].len()) {
        return reject("methods take different numbers of steps");
    }

    let mut differing = Vec::new();
    for position in 0..bodies[0].len() {
        let shape = similarity::tree_profile(model, bodies[0][position], method);
        let same = methods
            .iter()
            .zip(&bodies)
            .all(|(m, b)| similarity::tree_profile(model, b[position], *m) == shape);
        if same {
            let own: Vec<SymbolId> = model
                .symbols_referenced(bodies[0][position])
                .into_iter()
                .filter(|s| {
                    model
                        .symbol(*s)
                        .is_some_and(|m| m.owner == Some(owner) && m.kind != SymbolKind::Type)
                })
                .collect();
            if let Some(member) = own.first() {
                return Err(Rejection::new(format!(
                    "a shared step uses {}, which {} does not have",
                    model.qualified_name(*member),
                    model.qualified_name(sup)
                ))
                .suggest("PullUpField"));
            }
            continue;
        }
        let returns = is_kind(model, bodies[0][position], NodeKind::Return);
        for (m, b) in methods.iter().zip(&bodies) {
            let statement = b[position];
            if is_kind(model, statement, NodeKind::Return) != returns {
                return reject(format!("step {position} returns in some methods only"));
            }
            if returns && model.node(statement).is_none_or(|n| n.children.is_empty()) {
                return reject(format!("step {position} returns no value"));
            }
            if !checks::variables_used(model, &[statement], *m).is_empty() {
                return Err(Rejection::new(format!(
                    "step {position} of {} uses its variables",
                    model.qualified_name(*m)
                ))
                .suggest("ReplaceTempWithQuery"));
            }
            let nested_exit = model
                .descendants(statement)
                .into_iter()
                .skip(1)
                .any(|n| is_kind(model, n, NodeKind::Return));
            if nested_exit {
                return reject(format!("step {position} returns from inside"));
            }
        }
        differing.push(position);
    }
    if differing.is_empty() {
        return Err(Rejection::new("methods are identical").suggest("PullUpMethod"));
    }
    let names = params.names("names")?;
    if names.len() != differing.len() {
        return reject(format!("name each of the {} differing steps in `names`", differing.len()));
    }
    support::distinct(&names)?;
    for name in &names {
        checks::name_free(model, sup, name)?;
        for m in &methods {
            checks::name_free(model, checks::owning_type(model, *m)?, name)?;
        }
    }
    Ok(Template {
        sup,
        methods,
        differing,
        names,
    })
}

fn template_pre(a: &Analysis<'_>) -> Check {
    plan_template(a.model, a.target, a.params)?;
    Ok(())
}

fn template_extract(cx: &mut StepCx<'_>) -> StepResult {
    let plan = plan_template(cx.model(), cx.target(), cx.params())?;
    let mut steps = Vec::new();
    for method in &plan.methods {
        for (position, name) in plan.differing.iter().zip(&plan.names) {
            let statement = cx.model().body_statements(*method)[*position];
            let step = if is_kind(cx.model(), statement, NodeKind::Return) {
                let expr = cx.node(statement)?.children[0];
                support::extract_expression(cx, *method, expr, name, false)?
            } else {
                let body = cx.body_block(*method)?;
                let range = RangeSpec {
                    block: Some(body),
                    start: *position,
                    end: position + 1,
                };
                let params = Params::new()
                    .with("name", name.as_str())
                    .with(
                        "range",
                        serde_json::to_value(range).map_err(|e| StepError::plan(e.to_string()))?,
                    );
                let bound = cx.invoke("ExtractMethod", *method, params)?;
                match bound.get("method") {
                    Some(Binding::Symbol(m)) => *m,
                    _ => return Err(StepError::plan("extracted step was not recorded")),
                }
            };
            cx.update_modifiers(step, |m| m.visibility = Visibility::Protected)?;
            steps.push(step);
        }
    }
    cx.bind_symbol("supertype", plan.sup);
    cx.bind("methods", Binding::Symbols(plan.methods));
    cx.bind("steps", Binding::Symbols(steps));
    Ok(())
}

fn template_declare(cx: &mut StepCx<'_>) -> StepResult {
    // Planning again would find identical methods once the steps are calls.
    let method = cx.target();
    let sup = cx.bound_symbol("supertype")?;
    let names = cx.params().names("names")?;
    let target_steps: Vec<SymbolId> =
        cx.bound_symbols("steps").into_iter().take(names.len()).collect();
    let mut remap = HashMap::new();
    let mut declared = Vec::new();
    for (step, name) in target_steps.iter().zip(&names) {
        let returns = cx.symbol(*step)?.type_ref;
        let modifiers = Modifiers::default().with_visibility(Visibility::Protected);
        let abstract_step = cx.add_method(sup, name, modifiers, returns)?;
        remap.insert(*step, abstract_step);
        declared.push(abstract_step);
    }
    let name = name_of(cx.model(), method);
    let (template, _) = support::copy_method(cx, method, sup, &name)?;
    if let Some(body) = cx.symbol(template)?.body {
        support::rewire_within(cx, body, &remap)?;
    }
    cx.bind_symbol("template", template);
    cx.bind("abstract", Binding::Symbols(declared));
    Ok(())
}

fn template_remove(cx: &mut StepCx<'_>) -> StepResult {
    let template = cx.bound_symbol("template")?;
    for method in cx.bound_symbols("methods") {
        for node in cx.call_sites(method) {
            cx.rewire(node, NodeKind::Call, template)?;
        }
        cx.delete_method(method)?;
    }
    Ok(())
}

fn template_post(v: &Verification<'_>) -> Check {
    v.exists("template")?;
    let methods = v.symbols("methods");
    if let Some(left) = methods.iter().find(|m| v.model.symbol(**m).is_some()) {
        return reject(format!("{} still exists", v.model.qualified_name(*left)));
    }
    for step in v.symbols("abstract") {
        if v.index.overridden_by(step).len() != methods.len() {
            return reject(format!(
                "{} is not overridden by every subtype",
                v.model.qualified_name(step)
            ));
        }
    }
    Ok(())
}

// ── Replace Inheritance with Delegation ───────────────────────────────

pub const REPLACE_INHERITANCE_WITH_DELEGATION: Recipe = Recipe {
    name: "ReplaceInheritanceWithDelegation",
    shape: TargetShape::Subtype,
    precondition: to_delegation_pre,
    steps: &[
        Step {
            name: "declare delegate",
            run: to_delegation_field,
        },
        Step {
            name: "forward inherited uses",
            run: to_delegation_forward,
        },
        Step {
            name: "drop supertype",
            run: to_delegation_detach,
        },
    ],
    postcondition: to_delegation_post,
};

fn delegate_name(model: &ProgramModel, ty: SymbolId, params: &Params) -> Result<String, Rejection> {
    let sup = supertype_of(model, ty)?;
    Ok(params.name_or("field", || support::decapitalize(&name_of(model, sup)))?)
}

/// `sup` and everything above it.
fn lineage(model: &ProgramModel, sup: SymbolId) -> Vec<SymbolId> {
    let mut chain = vec![sup];
    chain.extend(model.supertypes(sup));
    chain
}

/// Inherited members used on a `ty`: `(site, member, from inside ty)`.
fn inherited_uses(
    model: &ProgramModel,
    index: &ReferenceIndex,
    ty: SymbolId,
) -> Vec<(NodeId, SymbolId, bool)> {
    let Some(sup) = model.symbol(ty).and_then(|s| s.supertype) else {
        return Vec::new();
    };
    let chain = lineage(model, sup);
    let mut uses = Vec::new();
    for owner in &chain {
        for member in model.members(*owner) {
            let Some(symbol) = model.symbol(*member) else {
                continue;
            };
            if symbol.is_constructor()
                || symbol.modifiers.is_static
                || !matches!(symbol.kind, SymbolKind::Field | SymbolKind::Method)
            {
                continue;
            }
            for edge in index.users_of(*member) {
                let Some(site) = edge.site.node() else {
                    continue;
                };
                let inside = model.owning_type(edge.enclosing) == Some(ty);
                if inside && support::is_self_access(model, site) {
                    uses.push((site, *member, true));
                } else if receiver_of(model, site).and_then(|r| support::static_type(model, r))
                    == Some(ty)
                {
                    uses.push((site, *member, false));
                }
            }
        }
    }
    uses.sort();
    uses
}

fn to_delegation_pre(a: &Analysis<'_>) -> Check {
    let ty = a.target;
    let sup = supertype_of(a.model, ty)?;
    let name = delegate_name(a.model, ty, a.params)?;
    checks::name_free_in_hierarchy(a.model, ty, &name)?;
    if a.model.constructors(sup).iter().any(|c| !a.model.params(*c).is_empty()) {
        return reject(format!(
            "{} cannot be created without arguments",
            a.model.qualified_name(sup)
        ));
    }
    let chain = lineage(a.model, sup);
    let mut rejection = Rejection::new("the type overrides inherited behaviour");
    let mut overriding = false;
    for method in a.model.methods(ty) {
        let inherited = a
            .index
            .overrides(method)
            .is_some_and(|o| a.model.owning_type(o).is_some_and(|t| chain.contains(&t)));
        if inherited {
            overriding = true;
            rejection = rejection.with_conflict(
                ConflictKind::PolymorphicOverride,
                a.model.qualified_name(method),
                "overrides an inherited method",
            );
        }
    }
    if overriding {
        return Err(rejection);
    }
    for (site, member, inside) in inherited_uses(a.model, a.index, ty) {
        if !inside && a.model.symbol(member).is_some_and(|m| m.kind == SymbolKind::Field) {
            return Err(Rejection::new(format!(
                "{} is read through a {} at {site}",
                a.model.qualified_name(member),
                a.name()
            ))
            .suggest("EncapsulateField"));
        }
    }
    for member in a.model.members(ty) {
        let name = name_of(a.model, *member);
        let inherited = chain.iter().any(|c| a.model.member_named(Some(*c), &name).is_some());
        if inherited && !a.model.symbol(*member).is_some_and(|m| m.is_constructor()) {
            let reason = format!("`{name}` is declared on both sides");
            return Err(Rejection::new(reason).with_conflict(
                ConflictKind::NameCollision,
                a.model.qualified_name(*member),
                "shadows an inherited member",
            ));
        }
    }
    Ok(())
}

fn to_delegation_field(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let sup = supertype_of(cx.model(), ty)?;
    let name = delegate_name(cx.model(), ty, cx.params())?;
    let field = cx.add_field(ty, &name, Modifiers::private().finalized(), Some(sup))?;
    let init = cx.build(|t| t.new_instance(sup, Vec::new()));
    cx.insert(init, Anchor::Body(field))?;
    cx.bind_symbol("delegate", field);
    cx.bind_symbol("supertype", sup);
    Ok(())
}

fn to_delegation_forward(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let field = cx.bound_symbol("delegate")?;
    let index = cx.index();
    let uses = inherited_uses(cx.model(), &index, ty);
    let mut forwarders: HashMap<SymbolId, SymbolId> = HashMap::new();
    for (site, member, inside) in uses {
        if inside {
            support::qualify(cx, site, field)?;
            continue;
        }
        let forwarder = match forwarders.get(&member) {
            Some(f) => *f,
            None => {
                let source = cx.symbol(member)?.clone();
                let forwarder =
                    cx.add_method(ty, &source.name, Modifiers::default(), source.type_ref)?;
                support::copy_params(cx, member, forwarder, &[])?;
                support::write_delegation(cx, forwarder, Some(field), member, false)?;
                forwarders.insert(member, forwarder);
                forwarder
            }
        };
        cx.rewire(site, NodeKind::Call, forwarder)?;
    }
    let mut created: Vec<SymbolId> = forwarders.into_values().collect();
    created.sort();
    cx.bind("forwarders", Binding::Symbols(created));
    Ok(())
}

fn to_delegation_detach(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    cx.set_supertype(ty, None)
}

fn to_delegation_post(v: &Verification<'_>) -> Check {
    v.exists("delegate")?;
    if v.model.symbol(v.target).and_then(|s| s.supertype).is_some() {
        return reject("type still inherits");
    }
    let typed = v
        .symbol("delegate")
        .and_then(|d| v.model.symbol(d))
        .and_then(|d| d.type_ref);
    if typed == v.symbol("supertype") {
        Ok(())
    } else {
        reject("delegate does not hold the former supertype")
    }
}

// ── Replace Delegation with Inheritance ───────────────────────────────

pub const REPLACE_DELEGATION_WITH_INHERITANCE: Recipe = Recipe {
    name: "ReplaceDelegationWithInheritance",
    shape: TargetShape::Type,
    precondition: to_inheritance_pre,
    steps: &[
        Step {
            name: "inherit from delegate type",
            run: to_inheritance_extend,
        },
        Step {
            name: "remove forwarding methods",
            run: to_inheritance_forwarders,
        },
        Step {
            name: "remove delegate",
            run: to_inheritance_field,
        },
    ],
    postcondition: to_inheritance_post,
};

/// The method `method` forwards to when its body is `[return] field.m(params..)`.
fn forwarded(model: &ProgramModel, method: SymbolId, field: SymbolId) -> Option<SymbolId> {
    let statements = model.body_statements(method);
    let [statement] = statements.as_slice() else {
        return None;
    };
    let node = model.node(*statement)?;
    let expr = if node.kind == NodeKind::Return { *node.children.first()? } else {
        node.id
    };
    let select = model.node(expr)?;
    if select.kind != NodeKind::Select {
        return None;
    }
    let via = model.node(strip_this(model, select.children[0]))?;
    if via.kind != NodeKind::Reference || via.symbol != Some(field) {
        return None;
    }
    let call = model.node(select.children[1])?;
    let params = model.params(method);
    let passes = call.kind == NodeKind::Call
        && call.children.len() == params.len()
        && call
            .children
            .iter()
            .zip(&params)
            .all(|(arg, p)| {
                model
                    .node(*arg)
                    .is_some_and(|a| a.kind == NodeKind::Reference && a.symbol == Some(*p))
            });
    if passes { call.symbol } else { None }
}

#[derive(Debug)]
struct Absorption {
    field: SymbolId,
    delegate: SymbolId,
    /// `(forwarding method, delegate method)`.
    forwarders: Vec<(SymbolId, SymbolId)>,
}

fn plan_absorption(
    model: &ProgramModel,
    index: &ReferenceIndex,
    ty: SymbolId,
    params: &Params,
) -> Result<Absorption, Rejection> {
    if model.symbol(ty).and_then(|s| s.supertype).is_some() {
        return reject("type already has a supertype");
    }
    let name = params.require_name("field")?;
    let field = support::member_of_kind(model, ty, &name, SymbolKind::Field)?;
    let delegate = model
        .symbol(field)
        .and_then(|f| f.type_ref)
        .ok_or_else(|| Rejection::new(format!(
            "{} has no declared type",
            model.qualified_name(field)
        )))?;
    if delegate == ty || model.all_subtypes(ty).contains(&delegate) {
        return reject("the delegate type already extends this type");
    }
    checks::unused_outside(model, index, field, ty)?;
    let writes = index.writes_of(field);
    let outside_constructor = writes
        .iter()
        .any(|w| !model.symbol(w.enclosing).is_some_and(|s| s.is_constructor()));
    if writes.len() > 1 || outside_constructor {
        return Err(Rejection::new("the delegate may be shared or replaced")
            .suggest("ChangeReferenceToValue"));
    }
    let forwarders: Vec<(SymbolId, SymbolId)> = model
        .methods(ty)
        .into_iter()
        .filter_map(|m| Some((m, forwarded(model, m, field)?)))
        .collect();
    let chain = lineage(model, delegate);
    for member in model.members(ty) {
        let Some(symbol) = model.symbol(*member) else {
            continue;
        };
        if symbol.is_constructor()
            || *member == field
            || forwarders.iter().any(|(f, _)| f == member)
        {
            continue;
        }
        let inherited = chain
            .iter()
            .find_map(|c| model.member_named(Some(*c), &symbol.name));
        if let Some(existing) = inherited {
            let reason = format!("`{}` would shadow an inherited member", symbol.name);
            return Err(Rejection::new(reason).with_conflict(
                ConflictKind::NameCollision,
                model.qualified_name(existing),
                "is inherited",
            ));
        }
    }
    Ok(Absorption {
        field,
        delegate,
        forwarders,
    })
}

fn to_inheritance_pre(a: &Analysis<'_>) -> Check {
    plan_absorption(a.model, a.index, a.target, a.params)?;
    Ok(())
}

fn to_inheritance_extend(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let index = cx.index();
    let plan = plan_absorption(cx.model(), &index, ty, cx.params())?;
    cx.set_supertype(ty, Some(plan.delegate))?;
    cx.bind_symbol("field", plan.field);
    cx.bind_symbol("supertype", plan.delegate);
    let (forwarding, targets): (Vec<SymbolId>, Vec<SymbolId>) = plan.forwarders.into_iter().unzip();
    cx.bind("forwarding", Binding::Symbols(forwarding));
    cx.bind("forwarded", Binding::Symbols(targets));
    Ok(())
}

fn to_inheritance_forwarders(cx: &mut StepCx<'_>) -> StepResult {
    let forwarding = cx.bound_symbols("forwarding");
    let targets = cx.bound_symbols("forwarded");
    for (method, target) in forwarding.into_iter().zip(targets) {
        for node in cx.call_sites(method) {
            cx.rewire(node, NodeKind::Call, target)?;
        }
        cx.delete_method(method)?;
    }
    Ok(())
}

fn to_inheritance_field(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.bound_symbol("field")?;
    for node in cx.use_sites(field) {
        if is_kind(cx.model(), node, NodeKind::Assign) {
            cx.remove_statement_of(node)?;
            continue;
        }
        let holder = match cx.model().parent(node) {
            Some(Parent::Node(p)) => Some(p),
            _ => None,
        };
        let this_select = holder.filter(|p| {
            cx.model()
                .node(*p)
                .is_some_and(|n| n.kind == NodeKind::Select && n.children.first() == Some(&node))
        });
        match this_select {
            // `field.m()` becomes `m()`.
            Some(select) => {
                cx.unwrap(select, 1)?;
            }
            None => {
                let root = support::access_root(cx.model(), node);
                cx.replace_with(root, |t| t.this())?;
            }
        }
    }
    cx.delete_field(field)
}

fn to_inheritance_post(v: &Verification<'_>) -> Check {
    if v.model.symbol(v.target).and_then(|s| s.supertype) != v.symbol("supertype") {
        return reject("type does not inherit from the delegate type");
    }
    match v.symbol("field") {
        Some(f) if v.model.symbol(f).is_some() => reject("delegate field remains"),
        _ => Ok(()),
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

    /// `Employee` with `Salesman` and `Engineer`, each declaring `name` and a
    /// `describe` method returning it.
    fn staff() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let employee = b.ty(app, "Employee");
        let mut describes = Vec::new();
        for sub in ["Salesman", "Engineer"] {
            let ty = b.subtype(app, sub, employee);
            let name = b.field(ty, "name");
            let describe = b.method(ty, "describe");
            let n = b.read(name);
            let ret = b.ret(Some(n));
            b.body(describe, vec![ret]);
            describes.push((ty, describe));
        }
        let (salesman, describe) = describes[0];
        let report = b.ty(app, "Report");
        let print = b.method(report, "print");
        let who = b.param(print, "who");
        b.typed(who, salesman);
        let w = b.read(who);
        let call = b.call(describe, vec![]);
        let sel = b.select(w, call);
        let ret = b.ret(Some(sel));
        b.body(print, vec![ret]);
        session(b)
    }

    #[test]
    fn pull_up_merges_fields_and_methods() {
        let s = staff();
        s.perform("PullUpField", "app::Salesman::name", &Params::new()).unwrap();
        let name = resolve(&s, "app::Employee::name").unwrap();
        assert!(resolve(&s, "app::Engineer::name").is_none());

        s.perform("PullUpMethod", "app::Salesman::describe", &Params::new()).unwrap();
        let describe = resolve(&s, "app::Employee::describe").unwrap();
        assert!(resolve(&s, "app::Engineer::describe").is_none());
        let print = resolve(&s, "app::Report::print").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.index.callers_of(describe), vec![print]);
        assert_eq!(snapshot.index.reads_of(name).len(), 1);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn pull_up_method_needs_its_fields_first() {
        let s = staff();
        let verdict = s.check("PullUpMethod", "app::Salesman::describe", &Params::new()).unwrap();
        assert_eq!(verdict.rejection().unwrap().suggestion.as_deref(), Some("PullUpField"));
    }

    #[test]
    fn differently_used_fields_stay_apart() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let base = b.ty(app, "Shape");
        let circle = b.subtype(app, "Circle", base);
        let square = b.subtype(app, "Square", base);
        let r = b.field(circle, "size");
        let area = b.method(circle, "area");
        let a1 = b.read(r);
        let a2 = b.read(r);
        let pi = b.lit("3");
        let product = b.op("*", vec![pi, a1, a2]);
        let ret = b.ret(Some(product));
        b.body(area, vec![ret]);
        let side = b.field(square, "size");
        let grow = b.method(square, "grow");
        let one = b.lit("1");
        let assign = b.assign(side, one);
        let flag = b.lit("true");
        let lp = b.while_loop(flag, vec![assign]);
        b.body(grow, vec![lp]);
        let s = session(b);

        let verdict = s.check("PullUpField", "app::Circle::size", &Params::new()).unwrap();
        let rejection = verdict.rejection().unwrap();
        assert!(rejection.reason.contains("heuristic"));
        assert_eq!(rejection.conflicts[0].kind, ConflictKind::Dissimilar);
    }

    #[test]
    fn constructor_bodies_move_up() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let employee = b.ty(app, "Employee");
        let name = b.field(employee, "name");
        let mut ctors = Vec::new();
        for sub in ["Manager", "Clerk"] {
            let ty = b.subtype(app, sub, employee);
            let grade = b.field(ty, "grade");
            let ctor = b.constructor(ty);
            let n = b.param(ctor, "name");
            let g = b.param(ctor, "grade");
            let rn = b.read(n);
            let set_name = b.assign(name, rn);
            let rg = b.read(g);
            let set_grade = b.assign(grade, rg);
            b.body(ctor, vec![set_name, set_grade]);
            ctors.push(ctor);
        }
        let s = session(b);

        s.perform("PullUpConstructorBody", "app::Manager::Manager", &Params::new()).unwrap();
        let shared = resolve(&s, "app::Employee::Employee").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.params(shared).len(), 1);
        for ctor in ctors {
            let body = snapshot.model.body_statements(ctor);
            assert_eq!(body.len(), 2);
            assert_eq!(snapshot.model.node(body[0]).unwrap().symbol, Some(shared));
        }
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    /// `Job` with a `rate` field and `payFor` only `Contract` instances use.
    fn jobs() -> (Session, NodeId) {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let job = b.ty(app, "Job");
        let rate = b.field(job, "rate");
        let pay = b.method(job, "payFor");
        let hours = b.param(pay, "hours");
        let r = b.read(rate);
        let h = b.read(hours);
        let product = b.op("*", vec![r, h]);
        let ret = b.ret(Some(product));
        b.body(pay, vec![ret]);
        let contract = b.ty(app, "Contract");
        let sign = b.method(contract, "sign");
        let created = b.new_instance(job, vec![]);
        let ret = b.ret(Some(created));
        b.body(sign, vec![ret]);
        (session(b), created)
    }

    #[test]
    fn subclass_takes_the_features() {
        let (s, created) = jobs();
        let params = Params::new()
            .with("name", "HourlyJob")
            .with("fields", json!(["rate"]))
            .with("methods", json!(["payFor"]))
            .with("nodes", json!([created.0]));
        let log = s.perform("ExtractSubclass", "app::Job", &params).unwrap();
        let sub = resolve(&s, "app::HourlyJob").unwrap();
        assert_eq!(log.bindings.get("creations"), Some(&Binding::Nodes(vec![created])));
        assert!(resolve(&s, "app::HourlyJob::payFor").is_some());
        assert!(resolve(&s, "app::Job::rate").is_none());
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.node(created).unwrap().symbol, Some(sub));
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn push_down_needs_every_use_below() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let base = b.ty(app, "Account");
        let savings = b.subtype(app, "Savings", base);
        let _checking = b.subtype(app, "Checking", base);
        let interest = b.method(base, "interest");
        let zero = b.lit("0");
        let ret = b.ret(Some(zero));
        b.body(interest, vec![ret]);
        let report = b.method(savings, "report");
        let call = b.call(interest, vec![]);
        let ret = b.ret(Some(call));
        b.body(report, vec![ret]);
        let s = session(b);

        let params = Params::new().with("to", json!(["Savings"]));
        s.perform("PushDownMethod", "app::Account::interest", &params).unwrap();
        let copy = resolve(&s, "app::Savings::interest").unwrap();
        assert!(resolve(&s, "app::Account::interest").is_none());
        assert!(resolve(&s, "app::Checking::interest").is_none());
        let report = resolve(&s, "app::Savings::report").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.index.callers_of(copy), vec![report]);
    }

    #[test]
    fn push_down_field_copies_per_subtype() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let base = b.ty(app, "Vehicle");
        let mut subs = Vec::new();
        let quota = b.field(base, "quota");
        for name in ["Truck", "Van"] {
            let sub = b.subtype(app, name, base);
            let load = b.method(sub, "load");
            let one = b.lit("1");
            let assign = b.assign(quota, one);
            b.body(load, vec![assign]);
            subs.push(sub);
        }
        let s = session(b);

        s.perform("PushDownField", "app::Vehicle::quota", &Params::new()).unwrap();
        let truck = resolve(&s, "app::Truck::quota").unwrap();
        let van = resolve(&s, "app::Van::quota").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.index.writes_of(truck).len(), 1);
        assert_eq!(snapshot.index.writes_of(van).len(), 1);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn superclass_gathers_common_features() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        for ty in ["Department", "Staff"] {
            let t = b.ty(app, ty);
            let cost = b.field(t, "annualCost");
            let get = b.method(t, "getAnnualCost");
            let c = b.read(cost);
            let ret = b.ret(Some(c));
            b.body(get, vec![ret]);
        }
        let s = session(b);

        let params = Params::new()
            .with("name", "Party")
            .with("types", json!(["app::Staff"]))
            .with("fields", json!(["annualCost"]))
            .with("methods", json!(["getAnnualCost"]));
        s.perform("ExtractSuperclass", "app::Department", &params).unwrap();
        let party = resolve(&s, "app::Party").unwrap();
        assert!(resolve(&s, "app::Party::annualCost").is_some());
        assert!(resolve(&s, "app::Party::getAnnualCost").is_some());
        assert!(resolve(&s, "app::Staff::getAnnualCost").is_none());
        let snapshot = s.snapshot();
        let staff = resolve(&s, "app::Staff").unwrap();
        assert_eq!(snapshot.model.symbol(staff).unwrap().supertype, Some(party));
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn collapse_folds_subtype_into_parent() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let employee = b.ty(app, "Employee");
        let salesman = b.subtype(app, "Salesman", employee);
        b.field(salesman, "quota");
        let office = b.ty(app, "Office");
        let hire = b.method(office, "hire");
        let created = b.new_instance(salesman, vec![]);
        let ret = b.ret(Some(created));
        b.body(hire, vec![ret]);
        let s = session(b);

        s.perform("CollapseHierarchy", "app::Salesman", &Params::new()).unwrap();
        assert!(resolve(&s, "app::Salesman").is_none());
        assert!(resolve(&s, "app::Employee::quota").is_some());
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.node(created).unwrap().symbol, resolve(&s, "app::Employee"));
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn template_method_from_parallel_steps() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let statement = b.ty(app, "Statement");
        let header = b.method(statement, "header");
        let h = b.lit("\"Rentals\"");
        let ret = b.ret(Some(h));
        b.body(header, vec![ret]);
        for (sub, footer) in [("TextStatement", "\"--\""), ("HtmlStatement", "\"<hr>\"")] {
            let ty = b.subtype(app, sub, statement);
            let value = b.method(ty, "value");
            let call = b.call(header, vec![]);
            let f = b.lit(footer);
            let joined = b.op("+", vec![call, f]);
            let ret = b.ret(Some(joined));
            b.body(value, vec![ret]);
        }
        let s = session(b);

        let params = Params::new().with("names", json!(["footer"]));
        let verdict = s.check("FormTemplateMethod", "app::TextStatement::value", &params).unwrap();
        assert!(verdict.is_accepted());
        s.perform("FormTemplateMethod", "app::TextStatement::value", &params).unwrap();
        let template = resolve(&s, "app::Statement::value").unwrap();
        let footer = resolve(&s, "app::Statement::footer").unwrap();
        assert!(resolve(&s, "app::TextStatement::value").is_none());
        assert!(resolve(&s, "app::HtmlStatement::footer").is_some());
        let snapshot = s.snapshot();
        assert_eq!(snapshot.index.overridden_by(footer).len(), 2);
        assert!(snapshot.model.symbol(template).unwrap().body.is_some());
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    /// `Stack` inheriting from `Vector` and using `size` both ways.
    fn stack() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let vector = b.ty(app, "Vector");
        let size = b.method(vector, "size");
        let zero = b.lit("0");
        let ret = b.ret(Some(zero));
        b.body(size, vec![ret]);
        let stack = b.subtype(app, "Stack", vector);
        let is_empty = b.method(stack, "isEmpty");
        let call = b.call(size, vec![]);
        let zero = b.lit("0");
        let test = b.op("==", vec![call, zero]);
        let ret = b.ret(Some(test));
        b.body(is_empty, vec![ret]);
        let client = b.ty(app, "Client");
        let depth = b.method(client, "depth");
        let s_ = b.param(depth, "stack");
        b.typed(s_, stack);
        let r = b.read(s_);
        let call = b.call(size, vec![]);
        let sel = b.select(r, call);
        let ret = b.ret(Some(sel));
        b.body(depth, vec![ret]);
        session(b)
    }

    #[test]
    fn inheritance_becomes_delegation_and_back() {
        let s = stack();
        s.perform("ReplaceInheritanceWithDelegation", "app::Stack", &Params::new()).unwrap();
        let forwarder = resolve(&s, "app::Stack::size").unwrap();
        assert!(resolve(&s, "app::Stack::vector").is_some());
        let depth = resolve(&s, "app::Client::depth").unwrap();
        {
            let snapshot = s.snapshot();
            let stack = resolve(&s, "app::Stack").unwrap();
            assert_eq!(snapshot.model.symbol(stack).unwrap().supertype, None);
            assert_eq!(snapshot.index.callers_of(forwarder), vec![depth]);
            assert!(check_well_formed(&snapshot.model).is_empty());
        }

        let params = Params::new().with("field", "vector");
        s.perform("ReplaceDelegationWithInheritance", "app::Stack", &params).unwrap();
        assert!(resolve(&s, "app::Stack::vector").is_none());
        assert!(resolve(&s, "app::Stack::size").is_none());
        let size = resolve(&s, "app::Vector::size").unwrap();
        let snapshot = s.snapshot();
        let mut callers = snapshot.index.callers_of(size);
        callers.sort();
        let is_empty = resolve(&s, "app::Stack::isEmpty").unwrap();
        let mut expected = vec![depth, is_empty];
        expected.sort();
        assert_eq!(callers, expected);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }
}
