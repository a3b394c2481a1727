// Big refactorings: composites that run several recipes inside one
// transaction, so the whole reshaping commits or rolls back together.

use std::collections::HashMap;

use recast_model::{
    Anchor, Modifiers, NodeId, NodeKind, ProgramModel, ReferenceIndex, SymbolId, SymbolKind,
    Visibility,
};

use super::support::{self, name_of};
use super::{data, moving};
use crate::analyzer::checks::{self, receiver_of};
use crate::analyzer::{Analysis, Check, Rejection, Verification, reject};
use crate::engine::{Binding, Bindings, StepCx, StepResult};
use crate::error::StepError;
use crate::params::Params;
use crate::registry::{Recipe, Step, TargetShape};

pub fn recipes() -> Vec<Recipe> {
    vec![
        TEASE_APART_INHERITANCE,
        CONVERT_PROCEDURAL_DESIGN_TO_OBJECTS,
        SEPARATE_DOMAIN_FROM_PRESENTATION,
        EXTRACT_HIERARCHY,
    ]
}

fn bound_symbol(bindings: &Bindings, key: &str) -> Result<SymbolId, StepError> {
    match bindings.get(key) {
        Some(Binding::Symbol(id)) => Ok(*id),
        _ => Err(StepError::plan(format!("nested recipe did not bind `{key}`"))),
    }
}

fn path_text(cx: &StepCx<'_>, symbol: SymbolId) -> Result<String, StepError> {
    Ok(cx.model().path_of(symbol)?.to_string())
}

/// A private final field of `owner` holding a fresh `ty`.
fn holder_field(
    cx: &mut StepCx<'_>,
    owner: SymbolId,
    name: &str,
    ty: SymbolId,
) -> Result<SymbolId, StepError> {
    let field = cx.add_field(owner, name, Modifiers::private().finalized(), Some(ty))?;
    let init = cx.build(|t| t.new_instance(ty, Vec::new()));
    cx.insert(init, Anchor::Body(field))?;
    Ok(field)
}

// ── Tease Apart Inheritance ───────────────────────────────────────────

pub const TEASE_APART_INHERITANCE: Recipe = Recipe {
    name: "TeaseApartInheritance",
    shape: TargetShape::Supertype,
    precondition: tease_pre,
    steps: &[
        Step {
            name: "extract shared class",
            run: tease_extract,
        },
        Step {
            name: "declare variant hierarchy",
            run: tease_variants,
        },
        Step {
            name: "move variant behaviour",
            run: tease_move,
        },
    ],
    postcondition: tease_post,
};

/// The second dimension of a tangled hierarchy: a class extracted from the
/// root and one variant subclass per mapped subtype.
#[derive(Debug)]
struct Tease {
    class: String,
    link: String,
    fields: Vec<String>,
    /// `(subtype, variant name, its methods that move)`.
    variants: Vec<(SymbolId, String, Vec<SymbolId>)>,
}

fn plan_tease(
    model: &ProgramModel,
    index: &ReferenceIndex,
    ty: SymbolId,
    params: &Params,
) -> Result<Tease, Rejection> {
    let class = params.require_name("name")?;
    let link = params.name_or("link", || support::decapitalize(&class))?;
    let fields = params.names("fields")?;
    let mapping = params.mapping("variants")?;
    if mapping.is_empty() {
        return reject("map each subtype to its variant with `variants`");
    }
    let method_names = params.names("methods")?;
    if method_names.is_empty() {
        return reject("name the methods of the second dimension with `methods`");
    }
    support::distinct(&method_names)?;

    let subs = model.subtypes(ty);
    let module = support::module_of(model, ty)?;
    let mut names = vec![class.clone()];
    let mut variants = Vec::new();
    for (sub_name, variant) in &mapping {
        let sub = subs
            .iter()
            .copied()
            .find(|s| name_of(model, *s) == *sub_name)
            .ok_or_else(|| Rejection::new(format!(
                "`{sub_name}` is not a direct subtype of {}",
                model.qualified_name(ty)
            )))?;
        checks::name_free(model, module, variant)?;
        checks::name_free(model, sub, &support::decapitalize(variant))?;
        names.push(variant.clone());
        let mut methods = Vec::new();
        for name in &method_names {
            let Some(method) = model.member_named(Some(sub), name) else {
                continue;
            };
            let movable = model
                .symbol(method)
                .is_some_and(|m| {
                    m.kind == SymbolKind::Method && !m.is_constructor() && !m.modifiers.is_static
                });
            if !movable {
                return reject(format!(
                    "{} is not an instance method",
                    model.qualified_name(method)
                ));
            }
            checks::not_polymorphic(model, index, method)?;
            methods.push(method);
        }
        variants.push((sub, variant.clone(), methods));
    }
    support::distinct(&names)?;
    if variants.iter().all(|(_, _, methods)| methods.is_empty()) {
        return reject("no mapped subtype declares the named methods");
    }
    Ok(Tease {
        class,
        link,
        fields,
        variants,
    })
}

fn shared_class_params(plan: &Tease) -> Params {
    Params::new()
        .with("name", plan.class.as_str())
        .with("link", plan.link.as_str())
        .with("fields", plan.fields.clone())
}

fn tease_pre(a: &Analysis<'_>) -> Check {
    let plan = plan_tease(a.model, a.index, a.target, a.params)?;
    let params = shared_class_params(&plan);
    (moving::EXTRACT_CLASS.precondition)(&Analysis { params: &params, ..*a })
}

fn tease_extract(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let index = cx.index();
    let plan = plan_tease(cx.model(), &index, ty, cx.params())?;
    let bound = cx.invoke("ExtractClass", ty, shared_class_params(&plan))?;
    cx.bind_symbol("class", bound_symbol(&bound, "class")?);

    // Variant names are planned now, while they are still free.
    let mut movers = Vec::new();
    let mut subtypes = Vec::new();
    for (sub, variant, methods) in plan.variants {
        subtypes.push(sub);
        cx.bind(&format!("variant:{}", name_of(cx.model(), sub)), Binding::Name(variant));
        movers.extend(methods.into_iter().map(|m| (m, sub)));
    }
    cx.bind("subtypes", Binding::Symbols(subtypes));
    cx.bind("movers", Binding::Symbols(movers.iter().map(|(m, _)| *m).collect()));
    cx.bind("mover_homes", Binding::Symbols(movers.iter().map(|(_, s)| *s).collect()));
    Ok(())
}

fn tease_variants(cx: &mut StepCx<'_>) -> StepResult {
    let class = cx.bound_symbol("class")?;
    let module = support::module_of(cx.model(), class)?;
    let mut variants = Vec::new();
    let mut holders = Vec::new();
    for sub in cx.bound_symbols("subtypes") {
        let name = cx.bound_name(&format!("variant:{}", name_of(cx.model(), sub)))?;
        let variant = cx.add_type(module, &name, Some(class))?;
        holders.push(holder_field(cx, sub, &support::decapitalize(&name), variant)?);
        variants.push(variant);
    }
    cx.bind("variants", Binding::Symbols(variants));
    cx.bind("holders", Binding::Symbols(holders));
    Ok(())
}

fn tease_move(cx: &mut StepCx<'_>) -> StepResult {
    let subtypes = cx.bound_symbols("subtypes");
    let variants = cx.bound_symbols("variants");
    let holders = cx.bound_symbols("holders");
    let homes = cx.bound_symbols("mover_homes");
    for (method, home) in cx.bound_symbols("movers").into_iter().zip(homes) {
        let at = subtypes
            .iter()
            .position(|s| *s == home)
            .ok_or_else(|| StepError::plan("method lost its subtype"))?;
        let params = Params::new()
            .with("to", path_text(cx, variants[at])?)
            .with("via", name_of(cx.model(), holders[at]));
        cx.invoke("MoveMethod", method, params)?;
    }
    Ok(())
}

fn tease_post(v: &Verification<'_>) -> Check {
    v.exists("class")?;
    let class = v.symbol("class");
    let variants = v.symbols("variants");
    for variant in &variants {
        if v.model.symbol(*variant).and_then(|s| s.supertype) != class {
            return reject(format!(
                "{} does not extend the extracted class",
                v.model.qualified_name(*variant)
            ));
        }
    }
    let subtypes = v.symbols("subtypes");
    for (method, home) in v.symbols("movers").into_iter().zip(v.symbols("mover_homes")) {
        let Some(at) = subtypes.iter().position(|s| *s == home) else {
            return reject("variant bookkeeping is inconsistent");
        };
        let name = name_of(v.model, method);
        if v.model.member_named(variants.get(at).copied(), &name).is_none() {
            return reject(format!(
                "`{name}` did not reach {}",
                v.model.qualified_name(variants[at])
            ));
        }
    }
    Ok(())
}

// ── Convert Procedural Design to Objects ──────────────────────────────

pub const CONVERT_PROCEDURAL_DESIGN_TO_OBJECTS: Recipe = Recipe {
    name: "ConvertProceduralDesignToObjects",
    shape: TargetShape::Type,
    precondition: procedural_pre,
    steps: &[
        Step {
            name: "turn record into data class",
            run: procedural_record,
        },
        Step {
            name: "move procedures onto the record",
            run: procedural_move,
        },
    ],
    postcondition: procedural_post,
};

/// A static procedure taking the record as its parameter at `position`.
#[derive(Debug)]
struct Procedure {
    method: SymbolId,
    position: usize,
}

fn record_position(model: &ProgramModel, method: SymbolId, record: SymbolId) -> Option<usize> {
    let typed: Vec<usize> = model
        .params(method)
        .iter()
        .enumerate()
        .filter(|(_, p)| model.symbol(**p).and_then(|s| s.type_ref) == Some(record))
        .map(|(i, _)| i)
        .collect();
    match typed.as_slice() {
        [position] => Some(*position),
        _ => None,
    }
}

fn plan_procedures(
    model: &ProgramModel,
    index: &ReferenceIndex,
    record: SymbolId,
    params: &Params,
) -> Result<Vec<Procedure>, Rejection> {
    let paths = params.paths("procedures")?;
    if paths.is_empty() {
        return reject("name the procedures that work on the record with `procedures`");
    }
    let mut names = Vec::new();
    let mut procedures = Vec::new();
    for path in paths {
        let method = checks::resolve_kind(model, &path, SymbolKind::Method)?;
        let symbol = model
            .symbol(method)
            .ok_or_else(|| Rejection::new(format!("`{path}` does not exist")))?;
        if !symbol.modifiers.is_static || symbol.is_constructor() {
            return reject(format!("{path} is not a static procedure"));
        }
        if symbol.owner == Some(record) {
            return reject(format!("{path} already belongs to the record"));
        }
        let position = record_position(model, method, record).ok_or_else(|| {
            Rejection::new(format!("{path} must take exactly one {}", model.qualified_name(record)))
        })?;
        if index.callers_of(method).contains(&method) {
            return reject(format!("{path} is recursive"));
        }
        checks::name_free(model, record, &symbol.name)?;
        if let Some(owner) = symbol.owner {
            let private = model
                .body_nodes(method)
                .into_iter()
                .filter_map(|id| model.node(id)?.symbol)
                .find(|s| {
                    *s != method
                        && model.symbol(*s).is_some_and(|m| {
                            m.owner == Some(owner) && m.modifiers.visibility == Visibility::Private
                        })
                });
            if let Some(member) = private {
                return reject(format!(
                    "{path} uses {}, which stays private",
                    model.qualified_name(member)
                ));
            }
        }
        names.push(symbol.name.clone());
        procedures.push(Procedure { method, position });
    }
    support::distinct(&names)?;
    Ok(procedures)
}

fn procedural_pre(a: &Analysis<'_>) -> Check {
    plan_procedures(a.model, a.index, a.target, a.params)?;
    (data::REPLACE_RECORD_WITH_DATA_CLASS.precondition)(a)
}

fn procedural_record(cx: &mut StepCx<'_>) -> StepResult {
    let record = cx.target();
    let index = cx.index();
    let procedures = plan_procedures(cx.model(), &index, record, cx.params())?;
    cx.invoke("ReplaceRecordWithDataClass", record, Params::new())?;
    cx.bind("procedures", Binding::Symbols(procedures.iter().map(|p| p.method).collect()));
    Ok(())
}

/// Copy `procedure` onto the record as an instance method reading `this`
/// for the record parameter. Returns the copy.
fn adopt(
    cx: &mut StepCx<'_>,
    procedure: &Procedure,
    record: SymbolId,
) -> Result<SymbolId, StepError> {
    let name = name_of(cx.model(), procedure.method);
    let (copy, remap) = support::copy_method(cx, procedure.method, record, &name)?;
    cx.update_modifiers(copy, |m| m.is_static = false)?;
    let param = cx.model().params(procedure.method)[procedure.position];
    let own = remap
        .get(&param)
        .copied()
        .ok_or_else(|| StepError::plan("record parameter was not copied"))?;
    for node in cx.use_sites(own) {
        cx.replace_with(node, |t| t.this())?;
    }
    cx.delete(own)?;
    Ok(copy)
}

/// `proc(.., r, ..)` becomes `r.proc(..)`.
fn send_to_record(
    cx: &mut StepCx<'_>,
    call: NodeId,
    position: usize,
    copy: SymbolId,
) -> StepResult {
    let arg = cx.node(call)?.children.get(position).copied().ok_or_else(|| {
        StepError::plan(format!("call at {call} does not pass the record"))
    })?;
    let receiver = cx.clone_tree(arg, &HashMap::new())?;
    cx.remove(arg)?;
    cx.rewire(call, NodeKind::Call, copy)?;
    match receiver_of(cx.model(), call) {
        Some(old) => {
            cx.replace(old, receiver)?;
        }
        None => {
            cx.wrap(call, |t, inner| {
                let r = t.graft(receiver);
                t.select(r, inner)
            })?;
        }
    }
    Ok(())
}

fn procedural_move(cx: &mut StepCx<'_>) -> StepResult {
    let record = cx.target();
    let mut moved = Vec::new();
    for method in cx.bound_symbols("procedures") {
        let position = record_position(cx.model(), method, record)
            .ok_or_else(|| StepError::plan("procedure no longer takes the record"))?;
        let procedure = Procedure { method, position };
        let copy = adopt(cx, &procedure, record)?;
        for call in cx.call_sites(method) {
            send_to_record(cx, call, position, copy)?;
        }
        cx.delete_method(method)?;
        moved.push(copy);
    }
    cx.bind("moved", Binding::Symbols(moved));
    Ok(())
}

fn procedural_post(v: &Verification<'_>) -> Check {
    for method in v.symbols("moved") {
        let adopted = v
            .model
            .symbol(method)
            .is_some_and(|m| m.owner == Some(v.target) && !m.modifiers.is_static);
        if !adopted {
            return reject(format!(
                "{} is not an instance method of the record",
                v.model.qualified_name(method)
            ));
        }
    }
    match v.symbols("procedures").into_iter().find(|p| v.model.symbol(*p).is_some()) {
        Some(p) => reject(format!("{} still exists", v.model.qualified_name(p))),
        None => Ok(()),
    }
}

// ── Separate Domain from Presentation ─────────────────────────────────

pub const SEPARATE_DOMAIN_FROM_PRESENTATION: Recipe = Recipe {
    name: "SeparateDomainFromPresentation",
    shape: TargetShape::Type,
    precondition: separate_pre,
    steps: &[
        Step {
            name: "declare domain class",
            run: separate_declare,
        },
        Step {
            name: "move domain fields",
            run: separate_fields,
        },
        Step {
            name: "move domain logic",
            run: separate_methods,
        },
    ],
    postcondition: separate_post,
};

#[derive(Debug)]
struct Separation {
    domain: String,
    link: String,
    observed: Vec<String>,
    fields: Vec<SymbolId>,
    methods: Vec<SymbolId>,
}

fn plan_separation(
    model: &ProgramModel,
    index: &ReferenceIndex,
    ty: SymbolId,
    params: &Params,
) -> Result<Separation, Rejection> {
    let domain = params.require_name("name")?;
    let link = params.name_or("link", || support::decapitalize(&domain))?;
    let observed = params.names("observed")?;
    let field_names = params.names("fields")?;
    let method_names = params.names("methods")?;
    if field_names.is_empty() && method_names.is_empty() {
        return reject("name the domain `fields` or `methods` to separate");
    }
    support::distinct(
        &observed
            .iter()
            .chain(&field_names)
            .chain(&method_names)
            .cloned()
            .collect::<Vec<_>>(),
    )?;
    let mut fields = Vec::new();
    for name in &field_names {
        let field = support::member_of_kind(model, ty, name, SymbolKind::Field)?;
        if model.symbol(field).is_some_and(|f| f.modifiers.is_static) {
            return reject(format!("{} is static", model.qualified_name(field)));
        }
        fields.push(field);
    }
    let mut methods = Vec::new();
    for name in &method_names {
        let method = support::member_of_kind(model, ty, name, SymbolKind::Method)?;
        if model.symbol(method).is_some_and(|m| m.modifiers.is_static || m.is_constructor()) {
            return reject(format!(
                "{} cannot move to a domain instance",
                model.qualified_name(method)
            ));
        }
        checks::not_polymorphic(model, index, method)?;
        methods.push(method);
    }
    Ok(Separation {
        domain,
        link,
        observed,
        fields,
        methods,
    })
}

fn observed_params(plan: &Separation) -> Params {
    Params::new()
        .with("name", plan.domain.as_str())
        .with("link", plan.link.as_str())
        .with("fields", plan.observed.clone())
}

fn separate_pre(a: &Analysis<'_>) -> Check {
    let plan = plan_separation(a.model, a.index, a.target, a.params)?;
    if plan.observed.is_empty() {
        checks::name_free(a.model, support::module_of(a.model, a.target)?, &plan.domain)?;
        return checks::name_free(a.model, a.target, &plan.link);
    }
    let params = observed_params(&plan);
    (data::DUPLICATE_OBSERVED_DATA.precondition)(&Analysis { params: &params, ..*a })
}

fn separate_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let index = cx.index();
    let plan = plan_separation(cx.model(), &index, ty, cx.params())?;
    let (domain, link) = if plan.observed.is_empty() {
        let module = support::module_of(cx.model(), ty)?;
        let domain = cx.add_type(module, &plan.domain, None)?;
        (domain, holder_field(cx, ty, &plan.link, domain)?)
    } else {
        let bound = cx.invoke("DuplicateObservedData", ty, observed_params(&plan))?;
        (bound_symbol(&bound, "domain")?, bound_symbol(&bound, "link")?)
    };
    cx.bind_symbol("domain", domain);
    cx.bind_symbol("link", link);
    cx.bind("fields", Binding::Symbols(plan.fields));
    cx.bind("methods", Binding::Symbols(plan.methods));
    Ok(())
}

fn domain_params(cx: &StepCx<'_>) -> Result<Params, StepError> {
    let domain = cx.bound_symbol("domain")?;
    let link = cx.bound_symbol("link")?;
    Ok(Params::new()
        .with("to", path_text(cx, domain)?)
        .with("via", name_of(cx.model(), link)))
}

fn separate_fields(cx: &mut StepCx<'_>) -> StepResult {
    let params = domain_params(cx)?;
    for field in cx.bound_symbols("fields") {
        cx.invoke("MoveField", field, params.clone())?;
    }
    Ok(())
}

fn separate_methods(cx: &mut StepCx<'_>) -> StepResult {
    let params = domain_params(cx)?;
    let mut moved = Vec::new();
    for method in cx.bound_symbols("methods") {
        let bound = cx.invoke("MoveMethod", method, params.clone())?;
        moved.push(bound_symbol(&bound, "method")?);
    }
    cx.bind("moved", Binding::Symbols(moved));
    Ok(())
}

fn separate_post(v: &Verification<'_>) -> Check {
    v.exists("domain")?;
    let domain = v.symbol("domain");
    for member in v.symbols("fields").into_iter().chain(v.symbols("moved")) {
        if v.model.symbol(member).and_then(|m| m.owner) != domain {
            return reject(format!(
                "{} is not part of the domain class",
                v.model.qualified_name(member)
            ));
        }
    }
    Ok(())
}

// ── Extract Hierarchy ─────────────────────────────────────────────────

pub const EXTRACT_HIERARCHY: Recipe = Recipe {
    name: "ExtractHierarchy",
    shape: TargetShape::Type,
    precondition: hierarchy_pre,
    steps: &[
        Step {
            name: "split type code into subclasses",
            run: hierarchy_subclasses,
        },
        Step {
            name: "turn dispatching conditionals into overrides",
            run: hierarchy_overrides,
        },
    ],
    postcondition: hierarchy_post,
};

/// The type-code field a hierarchy is extracted along: `field` if named,
/// else the single field tagged as a type code.
fn code_field(model: &ProgramModel, ty: SymbolId, params: &Params) -> Result<SymbolId, Rejection> {
    if let Some(name) = params.name("field")? {
        return support::member_of_kind(model, ty, &name, SymbolKind::Field);
    }
    let tagged: Vec<SymbolId> = model
        .fields(ty)
        .into_iter()
        .filter(|f| model.symbol(*f).is_some_and(|s| s.tag(support::TYPE_CODE).is_some()))
        .collect();
    match tagged.as_slice() {
        [field] => Ok(*field),
        [] => Err(
            Rejection::new("type has no type code to split along").suggest("ExtractSubclass"),
        ),
        _ => reject("type has several type codes; choose one with `field`"),
    }
}

/// Methods of `owner` whose whole body is one conditional chain switching
/// on `field`, with the chain's root.
fn dispatchers(model: &ProgramModel, owner: SymbolId, field: SymbolId) -> Vec<(SymbolId, NodeId)> {
    let field_name = name_of(model, field);
    let is_discriminant = |n: NodeId| {
        model.node(n).and_then(|d| d.symbol).is_some_and(|s| {
            s == field
                || model.symbol(s).and_then(|q| q.tag(support::DISCRIMINANT))
                    == Some(field_name.as_str())
        })
    };
    model
        .methods(owner)
        .into_iter()
        .filter(|m| model.symbol(*m).is_some_and(|s| !s.modifiers.is_static && !s.is_constructor()))
        .filter_map(|method| {
            let body = model.body_statements(method);
            let [root] = body.as_slice() else {
                return None;
            };
            let chain = support::conditional_chain(model, *root)?;
            let locals = model.locals(method);
            let dispatches = chain.arms.iter().all(|(condition, block)| {
                support::tested_constant(model, *condition, &field_name, &is_discriminant).is_some()
                    && !model.symbols_referenced(*block).iter().any(|s| locals.contains(s))
            });
            dispatches.then_some((method, *root))
        })
        .collect()
}

fn hierarchy_pre(a: &Analysis<'_>) -> Check {
    let field = code_field(a.model, a.target, a.params)?;
    (data::REPLACE_TYPE_CODE_WITH_SUBCLASSES.precondition)(&Analysis { target: field, ..*a })
}

fn hierarchy_subclasses(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let field = code_field(cx.model(), ty, cx.params())?;
    let found = dispatchers(cx.model(), ty, field);
    let mut params = Params::new();
    if let Some(factory) = cx.params().get("factory") {
        params.insert("factory", factory.clone());
    }
    cx.invoke("ReplaceTypeCodeWithSubclasses", field, params)?;
    cx.bind("dispatchers", Binding::Symbols(found.iter().map(|(m, _)| *m).collect()));
    cx.bind("conditionals", Binding::Nodes(found.iter().map(|(_, n)| *n).collect()));
    Ok(())
}

fn hierarchy_overrides(cx: &mut StepCx<'_>) -> StepResult {
    let conditionals = cx.bound_nodes("conditionals");
    for (method, node) in cx.bound_symbols("dispatchers").into_iter().zip(conditionals) {
        let params = Params::new().with("node", node.0);
        cx.invoke("ReplaceConditionalWithPolymorphism", method, params)?;
    }
    Ok(())
}

fn hierarchy_post(v: &Verification<'_>) -> Check {
    if support::variant_table(v.model, v.target).is_empty() {
        return reject("type has no variant subclasses");
    }
    for method in v.symbols("dispatchers") {
        if v.index.overridden_by(method).is_empty() {
            return reject(format!(
                "{} is not overridden by the variants",
                v.model.qualified_name(method)
            ));
        }
    }
    Ok(())
}
