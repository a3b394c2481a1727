// Organizing data: accessors, value and reference objects, associations,
// constants and the type-code family.

use std::collections::{BTreeSet, HashMap};

use recast_model::{
    Anchor, Modifiers, NodeId, NodeKind, Parent, ProgramModel, ReferenceEdge, ReferenceIndex,
    SymbolId, SymbolKind, Visibility,
};

use super::support::{self, is_kind, is_operator, literal_text, name_of, strip_this};
use crate::analyzer::checks;
use crate::analyzer::{Analysis, Check, ConflictKind, Rejection, Verification, reject};
use crate::engine::{Binding, StepCx, StepResult};
use crate::error::StepError;
use crate::params::Params;
use crate::registry::{Recipe, Step, TargetShape};

pub fn recipes() -> Vec<Recipe> {
    vec![
        SELF_ENCAPSULATE_FIELD,
        ENCAPSULATE_FIELD,
        REPLACE_DATA_VALUE_WITH_OBJECT,
        CHANGE_VALUE_TO_REFERENCE,
        CHANGE_REFERENCE_TO_VALUE,
        REPLACE_ARRAY_WITH_OBJECT,
        DUPLICATE_OBSERVED_DATA,
        CHANGE_UNIDIRECTIONAL_ASSOCIATION_TO_BIDIRECTIONAL,
        CHANGE_BIDIRECTIONAL_ASSOCIATION_TO_UNIDIRECTIONAL,
        REPLACE_MAGIC_NUMBER_WITH_SYMBOLIC_CONSTANT,
        ENCAPSULATE_COLLECTION,
        REPLACE_RECORD_WITH_DATA_CLASS,
        REPLACE_TYPE_CODE_WITH_CLASS,
        REPLACE_TYPE_CODE_WITH_SUBCLASSES,
        REPLACE_TYPE_CODE_WITH_STATE_STRATEGY,
        REPLACE_SUBCLASS_WITH_FIELDS,
    ]
}

fn site_nodes<'i>(
    edges: impl IntoIterator<Item = &'i ReferenceEdge>,
    keep: impl Fn(SymbolId) -> bool,
) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = edges
        .into_iter()
        .filter(|e| keep(e.enclosing))
        .filter_map(|e| e.site.node())
        .collect();
    nodes.sort();
    nodes.dedup();
    nodes
}

fn constant_modifiers(visibility: Visibility) -> Modifiers {
    Modifiers {
        visibility,
        is_static: true,
        is_final: true,
        ..Modifiers::default()
    }
}

fn instance_field(a: &Analysis<'_>) -> Check {
    let field = a.symbol()?;
    if field.modifiers.is_static {
        return reject("field is static");
    }
    checks::owning_type(a.model, a.target)?;
    Ok(())
}

fn read_through(cx: &mut StepCx<'_>, node: NodeId, query: SymbolId) -> StepResult {
    let root = support::access_root(cx.model(), node);
    cx.wrap(root, |t, inner| {
        let q = t.call(query, Vec::new());
        t.select(inner, q)
    })?;
    Ok(())
}

// ── Self Encapsulate Field / Encapsulate Field ────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Methods of the field's owner, constructors excepted.
    Owner,
    /// Everything declared outside the owner.
    Clients,
}

/// Direct reads and writes of `field` within `scope`, skipping `exempt`.
fn direct_accesses(
    model: &ProgramModel,
    index: &ReferenceIndex,
    field: SymbolId,
    scope: Scope,
    exempt: &[SymbolId],
) -> (Vec<NodeId>, Vec<NodeId>) {
    let Some(owner) = model.symbol(field).and_then(|s| s.owner) else {
        return (Vec::new(), Vec::new());
    };
    let keep = |enclosing: SymbolId| {
        if enclosing == field || exempt.contains(&enclosing) {
            return false;
        }
        let inside = model.is_declared_within(enclosing, owner);
        match scope {
            Scope::Owner => {
                inside
                    && !model
                        .symbol(enclosing)
                        .is_some_and(|s| s.is_constructor() && s.owner == Some(owner))
            }
            Scope::Clients => !inside,
        }
    };
    (
        site_nodes(index.reads_of(field), keep),
        site_nodes(index.writes_of(field), keep),
    )
}

fn accessor_names(
    model: &ProgramModel,
    field: SymbolId,
    params: &Params,
) -> Result<(String, String), Rejection> {
    let name = name_of(model, field);
    let getter = params.name_or("getter", || support::getter_name(&name))?;
    let setter = params.name_or("setter", || support::setter_name(&name))?;
    Ok((getter, setter))
}

fn existing_accessors(model: &ProgramModel, field: SymbolId, params: &Params) -> Vec<SymbolId> {
    let Ok((getter, setter)) = accessor_names(model, field, params) else {
        return Vec::new();
    };
    let owner = model.symbol(field).and_then(|s| s.owner);
    [getter, setter]
        .iter()
        .filter_map(|n| model.member_named(owner, n))
        .filter(|m| {
            support::is_getter_of(model, *m, field) || support::is_setter_of(model, *m, field)
        })
        .collect()
}

fn encapsulation_pre(a: &Analysis<'_>, scope: Scope) -> Check {
    let field = a.target;
    checks::owning_type(a.model, field)?;
    let (getter, setter) = accessor_names(a.model, field, a.params)?;
    support::accessor_available(a.model, field, &getter, false)?;
    let exempt = existing_accessors(a.model, field, a.params);
    let (_, writes) = direct_accesses(a.model, a.index, field, scope, &exempt);
    if !writes.is_empty() {
        if a.symbol()?.modifiers.is_final {
            return reject("final field is assigned outside construction");
        }
        support::accessor_available(a.model, field, &setter, true)?;
    }
    Ok(())
}

fn declare_accessors(cx: &mut StepCx<'_>, scope: Scope) -> StepResult {
    let field = cx.target();
    let (getter_name, setter_name) = accessor_names(cx.model(), field, cx.params())?;
    let index = cx.index();
    let exempt = existing_accessors(cx.model(), field, cx.params());
    let (_, writes) = direct_accesses(cx.model(), &index, field, scope, &exempt);
    let getter = support::ensure_getter(cx, field, &getter_name)?;
    cx.bind_symbol("getter", getter);
    if !writes.is_empty() {
        let setter = support::ensure_setter(cx, field, &setter_name)?;
        cx.bind_symbol("setter", setter);
    }
    Ok(())
}

fn redirect_accesses(cx: &mut StepCx<'_>, scope: Scope) -> StepResult {
    let field = cx.target();
    let getter = cx.bound_symbol("getter")?;
    let setter = cx.bound_symbol("setter").ok();
    let exempt: Vec<SymbolId> = [Some(getter), setter].into_iter().flatten().collect();
    let index = cx.index();
    let (reads, writes) = direct_accesses(cx.model(), &index, field, scope, &exempt);
    for node in reads {
        cx.rewire(node, NodeKind::Call, getter)?;
    }
    if !writes.is_empty() {
        let setter =
            setter.ok_or_else(|| StepError::plan("writes remain but no setter was declared"))?;
        for node in writes {
            cx.rewire(node, NodeKind::Call, setter)?;
        }
    }
    Ok(())
}

fn no_direct_access(v: &Verification<'_>, scope: Scope) -> Check {
    let exempt: Vec<SymbolId> = ["getter", "setter"].iter().filter_map(|k| v.symbol(k)).collect();
    let (reads, writes) = direct_accesses(v.model, v.index, v.target, scope, &exempt);
    let left = reads.len() + writes.len();
    if left == 0 {
        Ok(())
    } else {
        reject(format!("{left} direct access(es) remain"))
    }
}

pub const SELF_ENCAPSULATE_FIELD: Recipe = Recipe {
    name: "SelfEncapsulateField",
    shape: TargetShape::Field,
    precondition: self_encapsulate_pre,
    steps: &[
        Step {
            name: "declare accessors",
            run: self_encapsulate_declare,
        },
        Step {
            name: "use accessors inside the class",
            run: self_encapsulate_redirect,
        },
    ],
    postcondition: self_encapsulate_post,
};

fn self_encapsulate_pre(a: &Analysis<'_>) -> Check {
    encapsulation_pre(a, Scope::Owner)
}

fn self_encapsulate_declare(cx: &mut StepCx<'_>) -> StepResult {
    declare_accessors(cx, Scope::Owner)
}

fn self_encapsulate_redirect(cx: &mut StepCx<'_>) -> StepResult {
    redirect_accesses(cx, Scope::Owner)
}

fn self_encapsulate_post(v: &Verification<'_>) -> Check {
    v.exists("getter")?;
    no_direct_access(v, Scope::Owner)
}

pub const ENCAPSULATE_FIELD: Recipe = Recipe {
    name: "EncapsulateField",
    shape: TargetShape::Field,
    precondition: encapsulate_pre,
    steps: &[
        Step {
            name: "declare accessors",
            run: encapsulate_declare,
        },
        Step {
            name: "redirect clients",
            run: encapsulate_redirect,
        },
        Step {
            name: "make field private",
            run: encapsulate_hide,
        },
    ],
    postcondition: encapsulate_post,
};

fn encapsulate_pre(a: &Analysis<'_>) -> Check {
    if a.symbol()?.modifiers.visibility == Visibility::Private {
        return reject("field is already private");
    }
    encapsulation_pre(a, Scope::Clients)
}

fn encapsulate_declare(cx: &mut StepCx<'_>) -> StepResult {
    declare_accessors(cx, Scope::Clients)
}

fn encapsulate_redirect(cx: &mut StepCx<'_>) -> StepResult {
    redirect_accesses(cx, Scope::Clients)
}

fn encapsulate_hide(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    cx.update_modifiers(field, |m| m.visibility = Visibility::Private)
}

fn encapsulate_post(v: &Verification<'_>) -> Check {
    v.exists("getter")?;
    if v.model.symbol(v.target).is_none_or(|f| f.modifiers.visibility != Visibility::Private) {
        return reject("field is not private");
    }
    let owner = checks::owning_type(v.model, v.target)?;
    checks::unused_outside(v.model, v.index, v.target, owner)
}

// ── Replace Data Value with Object ────────────────────────────────────

pub const REPLACE_DATA_VALUE_WITH_OBJECT: Recipe = Recipe {
    name: "ReplaceDataValueWithObject",
    shape: TargetShape::Field,
    precondition: data_value_pre,
    steps: &[
        Step {
            name: "declare value class",
            run: data_value_declare,
        },
        Step {
            name: "wrap assigned values",
            run: data_value_writes,
        },
        Step {
            name: "unwrap reads",
            run: data_value_reads,
        },
    ],
    postcondition: data_value_post,
};

fn data_value_names(
    model: &ProgramModel,
    field: SymbolId,
    params: &Params,
) -> Result<(String, String), Rejection> {
    let class = params.name_or("name", || support::capitalize(&name_of(model, field)))?;
    let value = params.name_or("value", || "value".to_string())?;
    Ok((class, value))
}

fn data_value_pre(a: &Analysis<'_>) -> Check {
    let field = a.target;
    checks::owning_type(a.model, field)?;
    let (class, _) = data_value_names(a.model, field, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, field)?, &class)?;
    if let Some(held) = a.symbol()?.type_ref {
        if !a.model.fields(held).is_empty() {
            return reject(format!(
                "field already holds an object of {}",
                a.model.qualified_name(held)
            ));
        }
    }
    Ok(())
}

fn data_value_declare(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let (class_name, value_name) = data_value_names(cx.model(), field, cx.params())?;
    let module = support::module_of(cx.model(), field)?;
    let held = cx.symbol(field)?.type_ref;
    let class = cx.add_type(module, &class_name, None)?;
    let value = cx.add_field(class, &value_name, Modifiers::private().finalized(), held)?;
    support::assigning_constructor(cx, class, &[value])?;
    let getter = support::ensure_getter(cx, value, &support::getter_name(&value_name))?;

    let index = cx.index();
    cx.bind(
        "reads",
        Binding::Nodes(site_nodes(index.reads_of(field), |e| e != field)),
    );
    cx.bind(
        "writes",
        Binding::Nodes(site_nodes(index.writes_of(field), |_| true)),
    );
    cx.bind_symbol("class", class);
    cx.bind_symbol("getter", getter);
    Ok(())
}

fn data_value_writes(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let class = cx.bound_symbol("class")?;
    let mut values: Vec<NodeId> = Vec::new();
    for write in cx.bound_nodes("writes") {
        values.extend(cx.node(write)?.children.first().copied());
    }
    values.extend(cx.symbol(field)?.body);
    for value in values {
        cx.wrap(value, |t, inner| t.new_instance(class, vec![inner]))?;
    }
    cx.retype(field, Some(class))
}

fn data_value_reads(cx: &mut StepCx<'_>) -> StepResult {
    let getter = cx.bound_symbol("getter")?;
    for read in cx.bound_nodes("reads") {
        read_through(cx, read, getter)?;
    }
    Ok(())
}

fn data_value_post(v: &Verification<'_>) -> Check {
    v.exists("class")?;
    if v.model.symbol(v.target).and_then(|f| f.type_ref) == v.symbol("class") {
        Ok(())
    } else {
        reject("field does not hold the value class")
    }
}

// ── Change Value to Reference ─────────────────────────────────────────

pub const CHANGE_VALUE_TO_REFERENCE: Recipe = Recipe {
    name: "ChangeValueToReference",
    shape: TargetShape::Type,
    precondition: to_reference_pre,
    steps: &[
        Step {
            name: "replace constructor with factory",
            run: to_reference_factory,
        },
        Step {
            name: "declare registry",
            run: to_reference_registry,
        },
    ],
    postcondition: to_reference_post,
};

const REGISTRY: &str = "instances";

fn factory_of(params: &Params) -> Result<String, Rejection> {
    Ok(params.name_or("factory", || "named".to_string())?)
}

fn only_constructor(model: &ProgramModel, ty: SymbolId) -> Result<SymbolId, Rejection> {
    match model.constructors(ty).as_slice() {
        [only] => Ok(*only),
        [] => reject("type declares no constructor to replace"),
        _ => reject("type declares several constructors"),
    }
}

fn to_reference_pre(a: &Analysis<'_>) -> Check {
    let ty = a.target;
    if a.symbol()?.tag(support::IDENTITY) == Some("reference") {
        return reject("type is already a reference object");
    }
    only_constructor(a.model, ty)?;
    checks::name_free(a.model, ty, &factory_of(a.params)?)?;
    checks::name_free(a.model, ty, REGISTRY)
}

fn to_reference_factory(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let ctor = only_constructor(cx.model(), ty)?;
    let name = factory_of(cx.params())?;
    let bound = cx.invoke(
        "ReplaceConstructorWithFactoryMethod",
        ctor,
        Params::new().with("name", name),
    )?;
    if let Some(Binding::Symbol(factory)) = bound.get("factory") {
        cx.bind_symbol("factory", *factory);
    }
    cx.bind_symbol("constructor", ctor);
    Ok(())
}

fn to_reference_registry(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let registry = cx.add_field(ty, REGISTRY, constant_modifiers(Visibility::Private), None)?;
    cx.set_tag(ty, support::IDENTITY, Some("reference"))?;
    cx.bind_symbol("registry", registry);
    Ok(())
}

fn to_reference_post(v: &Verification<'_>) -> Check {
    v.exists("factory")?;
    v.exists("registry")?;
    match v.symbol("constructor").and_then(|c| v.model.symbol(c)) {
        Some(ctor) if ctor.modifiers.visibility == Visibility::Private => Ok(()),
        _ => reject("constructor is still visible"),
    }
}

// ── Change Reference to Value ─────────────────────────────────────────

pub const CHANGE_REFERENCE_TO_VALUE: Recipe = Recipe {
    name: "ChangeReferenceToValue",
    shape: TargetShape::Type,
    precondition: to_value_pre,
    steps: &[
        Step {
            name: "make fields final",
            run: to_value_freeze,
        },
        Step {
            name: "declare equality",
            run: to_value_equality,
        },
        Step {
            name: "drop registry",
            run: to_value_registry,
        },
    ],
    postcondition: to_value_post,
};

fn instance_fields(model: &ProgramModel, ty: SymbolId) -> Vec<SymbolId> {
    model
        .fields(ty)
        .into_iter()
        .filter(|f| model.symbol(*f).is_some_and(|s| !s.modifiers.is_static))
        .collect()
}

fn to_value_pre(a: &Analysis<'_>) -> Check {
    let ty = a.target;
    let mut rejection =
        Rejection::new("object is changed after construction").suggest("RemoveSettingMethod");
    for field in instance_fields(a.model, ty) {
        for writer in support::writes_after_construction(a.model, a.index, field) {
            rejection = rejection.with_conflict(
                ConflictKind::ExternalUse,
                a.model.qualified_name(writer),
                format!("assigns {}", name_of(a.model, field)),
            );
        }
    }
    if !rejection.conflicts.is_empty() {
        return Err(rejection);
    }
    checks::name_free(a.model, ty, "equals")?;
    checks::name_free(a.model, ty, "hashCode")
}

fn to_value_freeze(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    for field in instance_fields(cx.model(), ty) {
        cx.update_modifiers(field, |m| m.is_final = true)?;
    }
    Ok(())
}

fn to_value_equality(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let fields = instance_fields(cx.model(), ty);
    let equals = cx.add_method(ty, "equals", Modifiers::default(), None)?;
    let other = cx.add_param(equals, "other", Some(ty), None)?;
    let body = cx.build(|t| {
        let mut terms: Vec<NodeId> = fields
            .iter()
            .map(|f| {
                let mine = t.read(*f);
                let o = t.read(other);
                let theirs = t.read(*f);
                let theirs = t.select(o, theirs);
                t.op("==", vec![mine, theirs])
            })
            .collect();
        let result = match terms.len() {
            0 => t.lit("true"),
            1 => terms.remove(0),
            _ => t.op("&&", terms),
        };
        let ret = t.ret(Some(result));
        t.block(vec![ret])
    });
    cx.insert(body, Anchor::Body(equals))?;

    let hash = cx.add_method(ty, "hashCode", Modifiers::default(), None)?;
    let body = cx.build(|t| {
        let mut reads: Vec<NodeId> = fields.iter().map(|f| t.read(*f)).collect();
        let result = match reads.len() {
            0 => t.lit("0"),
            1 => reads.remove(0),
            _ => t.op("^", reads),
        };
        let ret = t.ret(Some(result));
        t.block(vec![ret])
    });
    cx.insert(body, Anchor::Body(hash))?;
    cx.bind_symbol("equals", equals);
    Ok(())
}

fn to_value_registry(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    if cx.symbol(ty)?.tag(support::IDENTITY).is_none() {
        return Ok(());
    }
    cx.set_tag(ty, support::IDENTITY, None)?;
    if let Some(registry) = cx.model().member_named(Some(ty), REGISTRY) {
        if cx.use_sites(registry).is_empty() {
            cx.delete_field(registry)?;
        }
    }
    Ok(())
}

fn to_value_post(v: &Verification<'_>) -> Check {
    v.exists("equals")?;
    let mutable = instance_fields(v.model, v.target)
        .into_iter()
        .find(|f| v.model.symbol(*f).is_some_and(|s| !s.modifiers.is_final));
    match mutable {
        Some(f) => reject(format!("{} is not final", v.model.qualified_name(f))),
        None => Ok(()),
    }
}

// ── Replace Array with Object ─────────────────────────────────────────

pub const REPLACE_ARRAY_WITH_OBJECT: Recipe = Recipe {
    name: "ReplaceArrayWithObject",
    shape: TargetShape::Field,
    precondition: array_pre,
    steps: &[
        Step {
            name: "declare class",
            run: array_declare,
        },
        Step {
            name: "replace element access",
            run: array_accesses,
        },
        Step {
            name: "retype field",
            run: array_retype,
        },
    ],
    postcondition: array_post,
};

/// `a[i]` is `Operator "[]" [a, i]`; `a[i] = v` is `Operator "[]=" [a, i, v]`.
const LOAD: &str = "[]";
const STORE: &str = "[]=";

#[derive(Debug)]
struct ArrayUse {
    op: NodeId,
    element: String,
    store: bool,
}

#[derive(Debug)]
struct ArrayPlan {
    class: String,
    /// Element names in index order.
    elements: Vec<String>,
    uses: Vec<ArrayUse>,
}

fn plan_array(
    model: &ProgramModel,
    index: &ReferenceIndex,
    field: SymbolId,
    params: &Params,
) -> Result<ArrayPlan, Rejection> {
    let class = params.require_name("name")?;
    let mut slots: Vec<(usize, String)> = Vec::new();
    for (slot, name) in params.mapping("elements")? {
        let at: usize = slot
            .parse()
            .map_err(|_| Rejection::new(format!("element index `{slot}` is not a number")))?;
        slots.push((at, name));
    }
    if slots.is_empty() {
        return reject("name the array elements with `elements`");
    }
    slots.sort();
    let elements: Vec<String> = slots.iter().map(|(_, n)| n.clone()).collect();
    support::distinct(&elements)?;

    if !index.writes_of(field).is_empty() {
        return reject("array is reassigned; only element stores can be replaced");
    }
    let mut uses = Vec::new();
    for read in site_nodes(index.reads_of(field), |e| e != field) {
        let root = support::access_root(model, read);
        let op = match model.parent(root) {
            Some(Parent::Node(op))
                if (is_operator(model, op, LOAD) || is_operator(model, op, STORE))
                    && model.node(op).is_some_and(|n| n.children.first() == Some(&root)) =>
            {
                op
            }
            _ => return reject(format!("array escapes at {read}; every use must index it")),
        };
        let position = model
            .node(op)
            .and_then(|n| n.children.get(1))
            .and_then(|i| literal_text(model, *i))
            .ok_or_else(|| Rejection::new(format!("index at {op} is not a literal")))?;
        let element = position
            .parse::<usize>()
            .ok()
            .and_then(|at| slots.iter().find(|(s, _)| *s == at))
            .map(|(_, n)| n.clone())
            .ok_or_else(|| Rejection::new(format!("index {position} has no element name")))?;
        uses.push(ArrayUse {
            op,
            element,
            store: is_operator(model, op, STORE),
        });
    }
    Ok(ArrayPlan { class, elements, uses })
}

fn array_pre(a: &Analysis<'_>) -> Check {
    checks::owning_type(a.model, a.target)?;
    let plan = plan_array(a.model, a.index, a.target, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, a.target)?, &plan.class)
}

fn array_declare(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let index = cx.index();
    let plan = plan_array(cx.model(), &index, field, cx.params())?;
    let module = support::module_of(cx.model(), field)?;
    let class = cx.add_type(module, &plan.class, None)?;
    for element in &plan.elements {
        let slot = cx.add_field(class, element, Modifiers::private(), None)?;
        support::ensure_getter(cx, slot, &support::getter_name(element))?;
        support::ensure_setter(cx, slot, &support::setter_name(element))?;
    }
    cx.bind_symbol("class", class);
    Ok(())
}

fn array_accesses(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let class = cx.bound_symbol("class")?;
    let index = cx.index();
    let plan = plan_array(cx.model(), &index, field, cx.params())?;
    for access in plan.uses {
        let accessor = if access.store {
            support::setter_name(&access.element)
        } else {
            support::getter_name(&access.element)
        };
        let accessor = support::member_of_kind(cx.model(), class, &accessor, SymbolKind::Method)?;
        let value = if access.store {
            let v = *cx
                .node(access.op)?
                .children
                .get(2)
                .ok_or_else(|| StepError::plan(format!("store at {} has no value", access.op)))?;
            Some(cx.clone_tree(v, &HashMap::new())?)
        } else {
            None
        };
        let receiver = cx.unwrap(access.op, 0)?;
        cx.wrap(receiver, |t, inner| {
            let args = value.map(|v| vec![t.graft(v)]).unwrap_or_default();
            let call = t.call(accessor, args);
            t.select(inner, call)
        })?;
    }
    Ok(())
}

fn array_retype(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let class = cx.bound_symbol("class")?;
    cx.retype(field, Some(class))?;
    let instance = cx.build(|t| t.new_instance(class, Vec::new()));
    let init = cx.symbol(field)?.body;
    match init {
        Some(init) => {
            cx.replace(init, instance)?;
        }
        None => {
            cx.insert(instance, Anchor::Body(field))?;
        }
    }
    Ok(())
}

fn array_post(v: &Verification<'_>) -> Check {
    v.exists("class")?;
    let indexed = v
        .index
        .reads_of(v.target)
        .into_iter()
        .filter_map(|e| e.site.node())
        .any(|read| {
            let root = support::access_root(v.model, read);
            matches!(
                v.model.parent(root),
                Some(Parent::Node(op))
                    if is_operator(v.model, op, LOAD) || is_operator(v.model, op, STORE)
            )
        });
    if indexed {
        reject("field is still indexed as an array")
    } else {
        Ok(())
    }
}

// ── Duplicate Observed Data ───────────────────────────────────────────

pub const DUPLICATE_OBSERVED_DATA: Recipe = Recipe {
    name: "DuplicateObservedData",
    shape: TargetShape::Type,
    precondition: observed_pre,
    steps: &[
        Step {
            name: "declare domain class",
            run: observed_declare,
        },
        Step {
            name: "copy writes to the domain",
            run: observed_sync,
        },
        Step {
            name: "declare update",
            run: observed_update,
        },
    ],
    postcondition: observed_post,
};

const UPDATE: &str = "update";

#[derive(Debug)]
struct Observation {
    domain: String,
    link: String,
    fields: Vec<SymbolId>,
}

fn plan_observation(
    model: &ProgramModel,
    index: &ReferenceIndex,
    ty: SymbolId,
    params: &Params,
) -> Result<Observation, Rejection> {
    let domain = params.require_name("name")?;
    let link = params.name_or("link", || support::decapitalize(&domain))?;
    let names = params.names("fields")?;
    if names.is_empty() {
        return reject("name the observed fields with `fields`");
    }
    support::distinct(&names)?;
    let mut fields = Vec::new();
    for name in &names {
        let field = support::member_of_kind(model, ty, name, SymbolKind::Field)?;
        if model.symbol(field).is_some_and(|f| f.modifiers.is_static) {
            return reject(format!("{} is static", model.qualified_name(field)));
        }
        for edge in index.writes_of(field) {
            let Some(write) = edge.site.node() else {
                continue;
            };
            let inside = model.is_declared_within(edge.enclosing, ty)
                && support::is_self_access(model, write);
            if !inside || !support::is_statement(model, support::access_root(model, write)) {
                return reject(format!(
                    "{name} is assigned at {write} where the copy cannot follow"
                ));
            }
        }
        fields.push(field);
    }
    Ok(Observation { domain, link, fields })
}

fn observed_pre(a: &Analysis<'_>) -> Check {
    let plan = plan_observation(a.model, a.index, a.target, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, a.target)?, &plan.domain)?;
    checks::name_free(a.model, a.target, &plan.link)?;
    checks::name_free(a.model, a.target, UPDATE)
}

fn observed_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let index = cx.index();
    let plan = plan_observation(cx.model(), &index, ty, cx.params())?;
    let module = support::module_of(cx.model(), ty)?;
    let domain = cx.add_type(module, &plan.domain, None)?;
    let mut copies = Vec::new();
    for field in &plan.fields {
        let source = cx.symbol(*field)?.clone();
        let copy = cx.add_field(domain, &source.name, Modifiers::private(), source.type_ref)?;
        support::ensure_getter(cx, copy, &support::getter_name(&source.name))?;
        support::ensure_setter(cx, copy, &support::setter_name(&source.name))?;
        copies.push(copy);
    }
    let link = cx.add_field(ty, &plan.link, Modifiers::private().finalized(), Some(domain))?;
    let init = cx.build(|t| t.new_instance(domain, Vec::new()));
    cx.insert(init, Anchor::Body(link))?;
    let observer = cx.model().qualified_name(ty);
    cx.set_tag(domain, support::OBSERVED_BY, Some(&observer))?;
    cx.bind_symbol("domain", domain);
    cx.bind_symbol("link", link);
    cx.bind("fields", Binding::Symbols(plan.fields));
    cx.bind("copies", Binding::Symbols(copies));
    Ok(())
}

fn observed_sync(cx: &mut StepCx<'_>) -> StepResult {
    let link = cx.bound_symbol("link")?;
    let fields = cx.bound_symbols("fields");
    let domain = cx.bound_symbol("domain")?;
    for field in fields {
        let setter_name = support::setter_name(&name_of(cx.model(), field));
        let setter = support::member_of_kind(cx.model(), domain, &setter_name, SymbolKind::Method)?;
        let index = cx.index();
        let writes = site_nodes(index.writes_of(field), |_| true);
        for write in writes {
            let statement = support::access_root(cx.model(), write);
            let (block, at) = support::statement_slot(cx.model(), statement)?;
            let sync = cx.build(|t| {
                let l = t.read(link);
                let value = t.read(field);
                let call = t.call(setter, vec![value]);
                t.select(l, call)
            });
            cx.insert_statement(block, at + 1, sync)?;
        }
    }
    Ok(())
}

fn observed_update(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let link = cx.bound_symbol("link")?;
    let domain = cx.bound_symbol("domain")?;
    let mut pulls = Vec::new();
    for field in cx.bound_symbols("fields") {
        let getter_name = support::getter_name(&name_of(cx.model(), field));
        let getter =
            support::member_of_kind(cx.model(), domain, &getter_name, SymbolKind::Method)?;
        pulls.push((field, getter));
    }
    let update = cx.add_method(ty, UPDATE, Modifiers::default(), None)?;
    let body = cx.build(|t| {
        let statements = pulls
            .iter()
            .map(|(field, getter)| {
                let l = t.read(link);
                let g = t.call(*getter, Vec::new());
                let value = t.select(l, g);
                t.assign(*field, value)
            })
            .collect();
        t.block(statements)
    });
    cx.insert(body, Anchor::Body(update))?;
    cx.bind_symbol("update", update);
    Ok(())
}

fn observed_post(v: &Verification<'_>) -> Check {
    v.exists("domain")?;
    v.exists("update")?;
    for copy in v.symbols("copies") {
        if v.model.symbol(copy).and_then(|c| c.owner) != v.symbol("domain") {
            return reject(format!(
                "{} is not held by the domain class",
                v.model.qualified_name(copy)
            ));
        }
    }
    Ok(())
}

// ── Associations ──────────────────────────────────────────────────────

pub const CHANGE_UNIDIRECTIONAL_ASSOCIATION_TO_BIDIRECTIONAL: Recipe = Recipe {
    name: "ChangeUnidirectionalAssociationToBidirectional",
    shape: TargetShape::Field,
    precondition: to_bidirectional_pre,
    steps: &[
        Step {
            name: "declare back pointer",
            run: to_bidirectional_declare,
        },
        Step {
            name: "maintain back pointer",
            run: to_bidirectional_maintain,
        },
    ],
    postcondition: to_bidirectional_post,
};

fn back_name(
    model: &ProgramModel,
    forward: SymbolId,
    params: &Params,
) -> Result<String, Rejection> {
    let owner = checks::owning_type(model, forward)?;
    Ok(params.name_or("back", || support::decapitalize(&name_of(model, owner)))?)
}

fn held_type(model: &ProgramModel, field: SymbolId) -> Result<SymbolId, Rejection> {
    model
        .symbol(field)
        .and_then(|f| f.type_ref)
        .filter(|t| model.symbol(*t).is_some_and(|s| s.kind == SymbolKind::Type))
        .ok_or_else(|| Rejection::new("field does not hold an object of a declared type"))
}

fn to_bidirectional_pre(a: &Analysis<'_>) -> Check {
    instance_field(a)?;
    if a.symbol()?.tag(support::ASSOCIATION).is_some() {
        return reject("field is already part of an association");
    }
    let target = held_type(a.model, a.target)?;
    checks::name_free(a.model, target, &back_name(a.model, a.target, a.params)?)?;
    for write in site_nodes(a.index.writes_of(a.target), |_| true) {
        if !support::is_self_access(a.model, write)
            || !support::is_statement(a.model, support::access_root(a.model, write))
        {
            return reject(format!("assignment at {write} is not a plain statement on this object"));
        }
    }
    Ok(())
}

fn to_bidirectional_declare(cx: &mut StepCx<'_>) -> StepResult {
    let forward = cx.target();
    let owner = checks::owning_type(cx.model(), forward)?;
    let target = held_type(cx.model(), forward)?;
    let name = back_name(cx.model(), forward, cx.params())?;
    let modifiers = Modifiers::default().with_visibility(Visibility::Package);
    let back = cx.add_field(target, &name, modifiers, Some(owner))?;
    let forward_name = name_of(cx.model(), forward);
    cx.set_tag(forward, support::ASSOCIATION, Some("owner"))?;
    cx.set_tag(forward, support::INVERSE, Some(&name))?;
    cx.set_tag(back, support::ASSOCIATION, Some("inverse"))?;
    cx.set_tag(back, support::INVERSE, Some(&forward_name))?;
    cx.bind_symbol("back", back);
    Ok(())
}

fn to_bidirectional_maintain(cx: &mut StepCx<'_>) -> StepResult {
    let forward = cx.target();
    let back = cx.bound_symbol("back")?;
    let index = cx.index();
    for write in site_nodes(index.writes_of(forward), |_| true) {
        let statement = support::access_root(cx.model(), write);
        let (block, at) = support::statement_slot(cx.model(), statement)?;
        let link = cx.build(|t| {
            let f = t.read(forward);
            let me = t.this();
            let set = t.assign(back, me);
            t.select(f, set)
        });
        cx.insert_statement(block, at + 1, link)?;
    }
    Ok(())
}

fn to_bidirectional_post(v: &Verification<'_>) -> Check {
    v.exists("back")?;
    support::association_consistent(v.model, v.target)
}

pub const CHANGE_BIDIRECTIONAL_ASSOCIATION_TO_UNIDIRECTIONAL: Recipe = Recipe {
    name: "ChangeBidirectionalAssociationToUnidirectional",
    shape: TargetShape::Field,
    precondition: to_unidirectional_pre,
    steps: &[
        Step {
            name: "stop maintaining back pointer",
            run: to_unidirectional_unlink,
        },
        Step {
            name: "delete back pointer",
            run: to_unidirectional_delete,
        },
    ],
    postcondition: to_unidirectional_post,
};

fn forward_of(model: &ProgramModel, back: SymbolId) -> Result<SymbolId, Rejection> {
    let b = model.symbol(back).ok_or_else(|| Rejection::new("back pointer does not exist"))?;
    if b.tag(support::ASSOCIATION) != Some("inverse") {
        return reject("field is not the back pointer of an association");
    }
    let forward = b
        .type_ref
        .zip(b.tag(support::INVERSE))
        .and_then(|(owner, name)| model.member_named(Some(owner), name))
        .ok_or_else(|| Rejection::new("forward end of the association is missing"))?;
    support::association_consistent(model, forward)?;
    Ok(forward)
}

fn to_unidirectional_pre(a: &Analysis<'_>) -> Check {
    forward_of(a.model, a.target)?;
    let readers = a.index.reads_of(a.target);
    if !readers.is_empty() {
        let mut rejection = Rejection::new("back pointer is still read");
        for edge in readers {
            rejection = rejection.with_conflict(
                ConflictKind::ExternalUse,
                a.model.qualified_name(edge.enclosing),
                "navigates the back pointer",
            );
        }
        return Err(rejection);
    }
    for write in site_nodes(a.index.writes_of(a.target), |_| true) {
        if a.model.statement_of(write).is_none() {
            return reject(format!("assignment at {write} is not inside a statement"));
        }
    }
    Ok(())
}

fn to_unidirectional_unlink(cx: &mut StepCx<'_>) -> StepResult {
    let back = cx.target();
    let forward = forward_of(cx.model(), back)?;
    let index = cx.index();
    for write in site_nodes(index.writes_of(back), |_| true) {
        if cx.model().node(write).is_some() {
            cx.remove_statement_of(write)?;
        }
    }
    cx.bind_symbol("forward", forward);
    Ok(())
}

fn to_unidirectional_delete(cx: &mut StepCx<'_>) -> StepResult {
    let back = cx.target();
    let forward = cx.bound_symbol("forward")?;
    cx.delete_field(back)?;
    cx.set_tag(forward, support::ASSOCIATION, None)?;
    cx.set_tag(forward, support::INVERSE, None)
}

fn to_unidirectional_post(v: &Verification<'_>) -> Check {
    if v.target_exists() {
        return reject("back pointer still exists");
    }
    match v.symbol("forward").and_then(|f| v.model.symbol(f)) {
        Some(f) if f.tag(support::ASSOCIATION).is_none() => Ok(()),
        _ => reject("forward field still claims an association"),
    }
}

// ── Replace Magic Number with Symbolic Constant ───────────────────────

pub const REPLACE_MAGIC_NUMBER_WITH_SYMBOLIC_CONSTANT: Recipe = Recipe {
    name: "ReplaceMagicNumberWithSymbolicConstant",
    shape: TargetShape::Type,
    precondition: magic_pre,
    steps: &[
        Step {
            name: "declare constant",
            run: magic_declare,
        },
        Step {
            name: "replace literals",
            run: magic_replace,
        },
    ],
    postcondition: magic_post,
};

fn magic_value(params: &Params) -> Result<String, Rejection> {
    params
        .text("value")?
        .ok_or_else(|| Rejection::new("invalid parameter `value`: is required"))
}

/// Literals spelled `value` in bodies declared within `ty`, except `skip`.
fn occurrences(
    model: &ProgramModel,
    ty: SymbolId,
    value: &str,
    skip: Option<SymbolId>,
) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = model
        .nodes()
        .filter(|n| n.kind == NodeKind::Literal && n.text.as_deref() == Some(value))
        .filter(|n| {
            model
                .enclosing_symbol(n.id)
                .is_some_and(|s| s != ty && Some(s) != skip && model.is_declared_within(s, ty))
        })
        .map(|n| n.id)
        .collect();
    nodes.sort();
    nodes
}

fn magic_pre(a: &Analysis<'_>) -> Check {
    let value = magic_value(a.params)?;
    let name = a.params.require_name("name")?;
    if occurrences(a.model, a.target, &value, None).is_empty() {
        return reject(format!("literal {value} does not occur in {}", a.name()));
    }
    checks::name_free(a.model, a.target, &name)
}

fn magic_declare(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let value = magic_value(cx.params())?;
    let name = cx.params().require_name("name")?;
    let constant = cx.add_field(ty, &name, constant_modifiers(Visibility::Private), None)?;
    let init = cx.build(|t| t.lit(&value));
    cx.insert(init, Anchor::Body(constant))?;
    cx.bind_symbol("constant", constant);
    Ok(())
}

fn magic_replace(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    let constant = cx.bound_symbol("constant")?;
    let value = magic_value(cx.params())?;
    for node in occurrences(cx.model(), ty, &value, Some(constant)) {
        cx.replace_with(node, |t| t.read(constant))?;
    }
    Ok(())
}

fn magic_post(v: &Verification<'_>) -> Check {
    v.exists("constant")?;
    let value = magic_value(v.params)?;
    let left = occurrences(v.model, v.target, &value, v.symbol("constant")).len();
    if left == 0 {
        Ok(())
    } else {
        reject(format!("{left} occurrence(s) of {value} remain"))
    }
}

// ── Encapsulate Collection ────────────────────────────────────────────

pub const ENCAPSULATE_COLLECTION: Recipe = Recipe {
    name: "EncapsulateCollection",
    shape: TargetShape::Field,
    precondition: collection_pre,
    steps: &[
        Step {
            name: "declare add and remove",
            run: collection_modifiers,
        },
        Step {
            name: "return a read-only view",
            run: collection_getter,
        },
        Step {
            name: "delete setters",
            run: collection_setters,
        },
    ],
    postcondition: collection_post,
};

const READ_ONLY: &str = "unmodifiable";

fn element_name(
    model: &ProgramModel,
    field: SymbolId,
    params: &Params,
) -> Result<String, Rejection> {
    let plural = name_of(model, field);
    Ok(params.name_or("element", || {
        support::capitalize(plural.strip_suffix('s').unwrap_or(&plural))
    })?)
}

fn collection_setters_of(model: &ProgramModel, field: SymbolId) -> Vec<SymbolId> {
    let owner = model.symbol(field).and_then(|f| f.owner);
    owner
        .map(|o| model.methods(o))
        .unwrap_or_default()
        .into_iter()
        .filter(|m| support::is_setter_of(model, *m, field))
        .collect()
}

fn collection_pre(a: &Analysis<'_>) -> Check {
    instance_field(a)?;
    let field = a.target;
    let owner = checks::owning_type(a.model, field)?;
    let setters = collection_setters_of(a.model, field);
    let mut rejection = Rejection::new("collection is replaced after construction");
    for setter in &setters {
        for caller in a.index.callers_of(*setter) {
            rejection = rejection.with_conflict(
                ConflictKind::ExternalUse,
                a.model.qualified_name(caller),
                format!("calls {}", name_of(a.model, *setter)),
            );
        }
    }
    for writer in support::writes_after_construction(a.model, a.index, field) {
        if !setters.contains(&writer) {
            rejection = rejection.with_conflict(
                ConflictKind::ExternalUse,
                a.model.qualified_name(writer),
                "assigns the field",
            );
        }
    }
    if !rejection.conflicts.is_empty() {
        return Err(rejection);
    }
    let element = element_name(a.model, field, a.params)?;
    checks::name_free(a.model, owner, &format!("add{element}"))?;
    checks::name_free(a.model, owner, &format!("remove{element}"))?;
    let getter = support::getter_name(&name_of(a.model, field));
    support::accessor_available(a.model, field, &getter, false)
}

fn collection_modifiers(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let owner = checks::owning_type(cx.model(), field)?;
    let element = element_name(cx.model(), field, cx.params())?;
    let mut declared = Vec::new();
    for (verb, op) in [("add", "add"), ("remove", "remove")] {
        let method = cx.add_method(owner, &format!("{verb}{element}"), Modifiers::default(), None)?;
        let arg = cx.add_param(method, &support::decapitalize(&element), None, None)?;
        let body = cx.build(|t| {
            let f = t.read(field);
            let a = t.read(arg);
            let change = t.op(op, vec![f, a]);
            t.block(vec![change])
        });
        cx.insert(body, Anchor::Body(method))?;
        declared.push(method);
    }
    cx.bind("modifiers", Binding::Symbols(declared));
    Ok(())
}

fn collection_getter(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let getter_name = support::getter_name(&name_of(cx.model(), field));
    let getter = support::ensure_getter(cx, field, &getter_name)?;
    let statements = cx.model().body_statements(getter);
    if let Some(value) = statements
        .first()
        .and_then(|ret| cx.model().node(*ret))
        .and_then(|ret| ret.children.first().copied())
    {
        if !is_operator(cx.model(), value, READ_ONLY) {
            cx.wrap(value, |t, inner| t.op(READ_ONLY, vec![inner]))?;
        }
    }
    cx.bind_symbol("getter", getter);
    Ok(())
}

fn collection_setters(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    for setter in collection_setters_of(cx.model(), field) {
        cx.delete_method(setter)?;
    }
    Ok(())
}

fn collection_post(v: &Verification<'_>) -> Check {
    v.exists("getter")?;
    if v.symbols("modifiers").len() != 2 {
        return reject("add and remove were not declared");
    }
    if collection_setters_of(v.model, v.target).is_empty() {
        Ok(())
    } else {
        reject("a setter still replaces the collection")
    }
}

// ── Replace Record with Data Class ────────────────────────────────────

pub const REPLACE_RECORD_WITH_DATA_CLASS: Recipe = Recipe {
    name: "ReplaceRecordWithDataClass",
    shape: TargetShape::Type,
    precondition: record_pre,
    steps: &[Step {
        name: "encapsulate fields",
        run: record_encapsulate,
    }],
    postcondition: record_post,
};

fn record_pre(a: &Analysis<'_>) -> Check {
    let ty = a.target;
    if !a.model.methods(ty).is_empty() {
        return reject("type already has behaviour; it is not a plain record");
    }
    let fields = instance_fields(a.model, ty);
    if fields.is_empty() {
        return reject("record has no fields");
    }
    for field in fields {
        let name = name_of(a.model, field);
        checks::name_free(a.model, ty, &support::getter_name(&name))?;
        checks::name_free(a.model, ty, &support::setter_name(&name))?;
    }
    Ok(())
}

fn record_encapsulate(cx: &mut StepCx<'_>) -> StepResult {
    let ty = cx.target();
    for field in instance_fields(cx.model(), ty) {
        if cx.symbol(field)?.modifiers.visibility == Visibility::Private {
            let name = name_of(cx.model(), field);
            support::ensure_getter(cx, field, &support::getter_name(&name))?;
        } else {
            cx.invoke("EncapsulateField", field, Params::new())?;
        }
    }
    Ok(())
}

fn record_post(v: &Verification<'_>) -> Check {
    for field in instance_fields(v.model, v.target) {
        let symbol = v.model.require(field).map_err(|e| Rejection::new(e.to_string()))?;
        let getter = v.model.member_named(Some(v.target), &support::getter_name(&symbol.name));
        if symbol.modifiers.visibility != Visibility::Private || getter.is_none() {
            return reject(format!("{} is not encapsulated", v.model.qualified_name(field)));
        }
    }
    Ok(())
}

// ── Type codes ────────────────────────────────────────────────────────

/// A discriminant field with its code constants.
#[derive(Debug)]
struct TypeCode {
    owner: SymbolId,
    name: String,
    held: Option<SymbolId>,
    constants: Vec<(SymbolId, String)>,
}

fn type_code(model: &ProgramModel, field: SymbolId) -> Result<TypeCode, Rejection> {
    let symbol = model.symbol(field).ok_or_else(|| Rejection::new("field does not exist"))?;
    if symbol.tag(support::TYPE_CODE).is_none() {
        return reject(format!("field is not tagged `{}`", support::TYPE_CODE));
    }
    if symbol.modifiers.is_static {
        return reject("type code field is static");
    }
    Ok(TypeCode {
        owner: checks::owning_type(model, field)?,
        name: symbol.name.clone(),
        held: symbol.type_ref,
        constants: support::require_codes(model, field)?,
    })
}

/// Conditions anywhere in the model testing `field` against one of its codes.
fn code_tests(model: &ProgramModel, field: SymbolId, name: &str) -> Vec<NodeId> {
    let reads_field = |n: NodeId| {
        model.node(n).is_some_and(|n| {
            matches!(n.kind, NodeKind::Reference | NodeKind::Call)
                && n.symbol
                    .is_some_and(|s| s == field || support::is_getter_of(model, s, field))
        })
    };
    let mut tests: Vec<NodeId> = model
        .nodes()
        .filter(|n| n.kind == NodeKind::Conditional)
        .filter_map(|n| n.children.first().copied())
        .filter(|cond| support::tested_constant(model, *cond, name, &reads_field).is_some())
        .collect();
    tests.sort();
    tests
}

fn variant_names(
    model: &ProgramModel,
    module: SymbolId,
    code: &TypeCode,
) -> Result<Vec<String>, Rejection> {
    let names: Vec<String> = code
        .constants
        .iter()
        .map(|(c, _)| support::camel_case(&name_of(model, *c)))
        .collect();
    support::distinct(&names)?;
    for name in &names {
        checks::name_free(model, module, name)?;
    }
    Ok(names)
}

/// Static `name(code)` on `host`: one `if (code == K) return new V();` per
/// variant, then a throw for codes without one.
fn variant_factory(
    cx: &mut StepCx<'_>,
    host: SymbolId,
    name: &str,
    code_type: Option<SymbolId>,
    arms: &[(SymbolId, SymbolId)],
) -> Result<SymbolId, StepError> {
    let modifiers = Modifiers {
        is_static: true,
        ..Modifiers::default()
    };
    let factory = cx.add_method(host, name, modifiers, Some(host))?;
    let code = cx.add_param(factory, "code", code_type, None)?;
    let body = cx.build(|t| {
        let mut statements: Vec<NodeId> = arms
            .iter()
            .map(|(constant, variant)| {
                let c = t.read(code);
                let k = t.read(*constant);
                let test = t.op("==", vec![c, k]);
                let instance = t.new_instance(*variant, Vec::new());
                let ret = t.ret(Some(instance));
                t.cond(test, vec![ret], None)
            })
            .collect();
        let message = t.lit("\"unknown type code\"");
        statements.push(t.throw(message));
        t.block(statements)
    });
    cx.insert(body, Anchor::Body(factory))?;
    Ok(factory)
}

/// Method on `variant` overriding `query` with `return constant`.
fn constant_override(
    cx: &mut StepCx<'_>,
    variant: SymbolId,
    query: SymbolId,
    constant: SymbolId,
) -> StepResult {
    let q = cx.symbol(query)?.clone();
    let method = cx.add_method(variant, &q.name, Modifiers::default(), q.type_ref)?;
    let body = cx.build(|t| {
        let k = t.read(constant);
        let ret = t.ret(Some(k));
        t.block(vec![ret])
    });
    cx.insert(body, Anchor::Body(method))?;
    Ok(())
}

// ── Replace Type Code with Class ──────────────────────────────────────

pub const REPLACE_TYPE_CODE_WITH_CLASS: Recipe = Recipe {
    name: "ReplaceTypeCodeWithClass",
    shape: TargetShape::Field,
    precondition: code_class_pre,
    steps: &[
        Step {
            name: "declare code class",
            run: code_class_declare,
        },
        Step {
            name: "redirect codes",
            run: code_class_redirect,
        },
        Step {
            name: "delete old constants",
            run: code_class_cleanup,
        },
    ],
    postcondition: code_class_post,
};

fn code_class_name(
    model: &ProgramModel,
    field: SymbolId,
    params: &Params,
) -> Result<String, Rejection> {
    Ok(params.name_or("name", || support::capitalize(&name_of(model, field)))?)
}

fn code_class_pre(a: &Analysis<'_>) -> Check {
    let code = type_code(a.model, a.target)?;
    let name = code_class_name(a.model, a.target, a.params)?;
    checks::name_free(a.model, support::module_of(a.model, a.target)?, &name)?;
    if !code_tests(a.model, a.target, &code.name).is_empty() {
        return Err(Rejection::new("type code selects behaviour in conditionals")
            .suggest("ReplaceTypeCodeWithSubclasses"));
    }
    Ok(())
}

fn code_class_declare(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let code = type_code(cx.model(), field)?;
    let name = code_class_name(cx.model(), field, cx.params())?;
    let module = support::module_of(cx.model(), field)?;
    let class = cx.add_type(module, &name, None)?;
    let value = cx.add_field(class, "code", Modifiers::private().finalized(), code.held)?;
    let ctor = support::assigning_constructor(cx, class, &[value])?;
    cx.update_modifiers(ctor, |m| m.visibility = Visibility::Private)?;
    support::ensure_getter(cx, value, "getCode")?;
    let mut replacements = Vec::new();
    for (old, literal) in &code.constants {
        let constant_name = name_of(cx.model(), *old);
        let modifiers = constant_modifiers(Visibility::Public);
        let constant = cx.add_field(class, &constant_name, modifiers, Some(class))?;
        let init = cx.build(|t| {
            let v = t.lit(literal);
            t.new_instance(class, vec![v])
        });
        cx.insert(init, Anchor::Body(constant))?;
        replacements.push(constant);
    }
    cx.bind_symbol("class", class);
    cx.bind("old", Binding::Symbols(code.constants.iter().map(|(c, _)| *c).collect()));
    cx.bind("constants", Binding::Symbols(replacements));
    Ok(())
}

fn code_class_redirect(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let class = cx.bound_symbol("class")?;
    for (old, new) in cx.bound_symbols("old").into_iter().zip(cx.bound_symbols("constants")) {
        for node in cx.use_sites(old) {
            cx.rewire(node, NodeKind::Reference, new)?;
        }
    }
    cx.retype(field, Some(class))?;

    // Parameters assigned straight into the field and plain getters follow it.
    let index = cx.index();
    let mut followers = BTreeSet::new();
    for write in site_nodes(index.writes_of(field), |_| true) {
        let value = cx.node(write)?.children.first().copied();
        let source = value
            .and_then(|v| cx.model().node(v))
            .filter(|n| n.kind == NodeKind::Reference)
            .and_then(|n| n.symbol);
        if let Some(source) = source {
            if cx.symbol(source)?.kind == SymbolKind::Parameter {
                followers.insert(source);
            }
        }
    }
    let owner = checks::owning_type(cx.model(), field)?;
    for method in cx.model().methods(owner) {
        if support::is_getter_of(cx.model(), method, field) {
            followers.insert(method);
        }
    }
    for symbol in followers {
        cx.retype(symbol, Some(class))?;
    }
    Ok(())
}

fn code_class_cleanup(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    for old in cx.bound_symbols("old") {
        cx.delete_field(old)?;
    }
    cx.set_tag(field, support::TYPE_CODE, None)
}

fn code_class_post(v: &Verification<'_>) -> Check {
    v.exists("class")?;
    if v.model.symbol(v.target).and_then(|f| f.type_ref) != v.symbol("class") {
        return reject("field does not hold the code class");
    }
    if v.symbols("old").iter().any(|c| v.model.symbol(*c).is_some()) {
        return reject("old code constants remain");
    }
    Ok(())
}

// ── Replace Type Code with Subclasses ─────────────────────────────────

pub const REPLACE_TYPE_CODE_WITH_SUBCLASSES: Recipe = Recipe {
    name: "ReplaceTypeCodeWithSubclasses",
    shape: TargetShape::Field,
    precondition: code_subclasses_pre,
    steps: &[
        Step {
            name: "declare discriminant query",
            run: code_subclasses_query,
        },
        Step {
            name: "declare subclasses",
            run: code_subclasses_declare,
        },
        Step {
            name: "read through the query",
            run: code_subclasses_reads,
        },
        Step {
            name: "construct subclasses",
            run: code_subclasses_constructions,
        },
    ],
    postcondition: code_subclasses_post,
};

fn factory_name(params: &Params) -> Result<String, Rejection> {
    Ok(params.name_or("factory", || "create".to_string())?)
}

fn code_subclasses_pre(a: &Analysis<'_>) -> Check {
    let code = type_code(a.model, a.target)?;
    let writers = support::writes_after_construction(a.model, a.index, a.target);
    if !writers.is_empty() {
        let mut rejection = Rejection::new("type code changes after construction")
            .suggest("ReplaceTypeCodeWithStateStrategy");
        for writer in writers {
            rejection = rejection.with_conflict(
                ConflictKind::ExternalUse,
                a.model.qualified_name(writer),
                "assigns the type code",
            );
        }
        return Err(rejection);
    }
    if !a.model.subtypes(code.owner).is_empty() {
        return reject("type already has subtypes");
    }
    variant_names(a.model, support::module_of(a.model, a.target)?, &code)?;
    support::accessor_available(a.model, a.target, &support::getter_name(&code.name), false)?;
    checks::name_free(a.model, code.owner, &factory_name(a.params)?)
}

fn code_subclasses_query(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let name = name_of(cx.model(), field);
    let query = support::ensure_getter(cx, field, &support::getter_name(&name))?;
    cx.set_tag(query, support::DISCRIMINANT, Some(&name))?;
    cx.bind_symbol("query", query);
    Ok(())
}

fn code_subclasses_declare(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let code = type_code(cx.model(), field)?;
    let query = cx.bound_symbol("query")?;
    let module = support::module_of(cx.model(), field)?;
    let names = variant_names(cx.model(), module, &code)?;
    let mut arms = Vec::new();
    for ((constant, _), name) in code.constants.iter().zip(&names) {
        let variant = cx.add_type(module, name, Some(code.owner))?;
        let constant_name = name_of(cx.model(), *constant);
        cx.set_tag(variant, support::VARIANT, Some(&constant_name))?;
        support::open_to_subtypes(cx, *constant)?;
        constant_override(cx, variant, query, *constant)?;
        arms.push((*constant, variant));
    }
    let factory_name = factory_name(cx.params())?;
    let factory = variant_factory(cx, code.owner, &factory_name, code.held, &arms)?;
    cx.bind_symbol("factory", factory);
    cx.bind("variants", Binding::Symbols(arms.iter().map(|(_, v)| *v).collect()));
    Ok(())
}

fn code_subclasses_reads(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let query = cx.bound_symbol("query")?;
    let owner = checks::owning_type(cx.model(), field)?;
    let index = cx.index();
    let model = cx.model();
    let reads = site_nodes(index.reads_of(field), |e| {
        e != query
            && e != field
            && !model
                .symbol(e)
                .is_some_and(|s| s.is_constructor() && s.owner == Some(owner))
    });
    for read in reads {
        cx.rewire(read, NodeKind::Call, query)?;
    }
    Ok(())
}

/// `new Owner(.., K, ..)` becomes `new Variant(..)` for the variant of `K`.
fn code_subclasses_constructions(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let code = type_code(cx.model(), field)?;
    let factory = cx.bound_symbol("factory")?;
    let variants = cx.bound_symbols("variants");
    let model = cx.model();
    let mut retargets = Vec::new();
    for node in model.nodes().filter(|n| n.kind == NodeKind::New && n.symbol == Some(code.owner)) {
        if model.enclosing_symbol(node.id) == Some(factory) {
            continue;
        }
        let variant = node.children.iter().find_map(|arg| {
            let named = model.node(strip_this(model, *arg))?.symbol?;
            let at = code.constants.iter().position(|(c, _)| *c == named)?;
            variants.get(at).copied()
        });
        if let Some(variant) = variant {
            retargets.push((node.id, variant));
        }
    }
    retargets.sort();
    for (node, variant) in retargets {
        cx.rewire(node, NodeKind::New, variant)?;
    }
    Ok(())
}

fn code_subclasses_post(v: &Verification<'_>) -> Check {
    let code = type_code(v.model, v.target)?;
    let table = support::variant_table(v.model, code.owner);
    if table.len() != code.constants.len() {
        return reject("not every code has a subclass");
    }
    if support::discriminant_query(v.model, code.owner, &code.name).is_none() {
        return reject("discriminant query is missing");
    }
    Ok(())
}

// ── Replace Type Code with State/Strategy ─────────────────────────────

pub const REPLACE_TYPE_CODE_WITH_STATE_STRATEGY: Recipe = Recipe {
    name: "ReplaceTypeCodeWithStateStrategy",
    shape: TargetShape::Field,
    precondition: code_state_pre,
    steps: &[
        Step {
            name: "declare state classes",
            run: code_state_declare,
        },
        Step {
            name: "hold state object",
            run: code_state_hold,
        },
    ],
    postcondition: code_state_post,
};

fn state_name(model: &ProgramModel, field: SymbolId, params: &Params) -> Result<String, Rejection> {
    let owner = checks::owning_type(model, field)?;
    Ok(params.name_or("name", || format!(
        "{}{}",
        name_of(model, owner),
        support::capitalize(&name_of(model, field))
    ))?)
}

fn code_state_pre(a: &Analysis<'_>) -> Check {
    let code = type_code(a.model, a.target)?;
    let module = support::module_of(a.model, a.target)?;
    let name = state_name(a.model, a.target, a.params)?;
    checks::name_free(a.model, module, &name)?;
    let variants = variant_names(a.model, module, &code)?;
    if variants.contains(&name) {
        return reject(format!("`{name}` is also a variant name"));
    }
    Ok(())
}

fn code_state_declare(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let code = type_code(cx.model(), field)?;
    let module = support::module_of(cx.model(), field)?;
    let name = state_name(cx.model(), field, cx.params())?;
    let names = variant_names(cx.model(), module, &code)?;

    let state = cx.add_type(module, &name, None)?;
    let query_name = support::getter_name(&code.name);
    let query = cx.add_method(state, &query_name, Modifiers::default(), code.held)?;
    cx.set_tag(query, support::DISCRIMINANT, Some(&code.name))?;
    let mut arms = Vec::new();
    for ((constant, _), variant_name) in code.constants.iter().zip(&names) {
        let variant = cx.add_type(module, variant_name, Some(state))?;
        let constant_name = name_of(cx.model(), *constant);
        cx.set_tag(variant, support::VARIANT, Some(&constant_name))?;
        support::open_to_module(cx, *constant)?;
        constant_override(cx, variant, query, *constant)?;
        arms.push((*constant, variant));
    }
    let factory_name = factory_name(cx.params())?;
    let factory = variant_factory(cx, state, &factory_name, code.held, &arms)?;
    cx.bind_symbol("state", state);
    cx.bind_symbol("query", query);
    cx.bind_symbol("factory", factory);
    Ok(())
}

fn code_state_hold(cx: &mut StepCx<'_>) -> StepResult {
    let field = cx.target();
    let state = cx.bound_symbol("state")?;
    let query = cx.bound_symbol("query")?;
    let factory = cx.bound_symbol("factory")?;
    let index = cx.index();
    let reads = site_nodes(index.reads_of(field), |e| e != field);
    let mut values: Vec<NodeId> = Vec::new();
    for write in site_nodes(index.writes_of(field), |_| true) {
        values.extend(cx.node(write)?.children.first().copied());
    }
    values.extend(cx.symbol(field)?.body);

    for value in values {
        cx.wrap(value, |t, inner| t.call(factory, vec![inner]))?;
    }
    for read in reads {
        read_through(cx, read, query)?;
    }
    cx.retype(field, Some(state))?;
    let state_path = cx.model().qualified_name(state);
    cx.set_tag(field, support::STATE_OF, Some(&state_path))?;
    cx.set_tag(field, support::TYPE_CODE, None)
}

fn code_state_post(v: &Verification<'_>) -> Check {
    v.exists("state")?;
    let state = v.symbol("state");
    if v.model.symbol(v.target).and_then(|f| f.type_ref) != state {
        return reject("field does not hold the state object");
    }
    let codes = support::code_constants(v.model, v.target).len();
    let variants = state.map(|s| support::variant_table(v.model, s).len()).unwrap_or_default();
    if variants == codes {
        Ok(())
    } else {
        reject("not every code has a state class")
    }
}

// ── Replace Subclass with Fields ──────────────────────────────────────

pub const REPLACE_SUBCLASS_WITH_FIELDS: Recipe = Recipe {
    name: "ReplaceSubclassWithFields",
    shape: TargetShape::Supertype,
    precondition: subclass_fields_pre,
    steps: &[
        Step {
            name: "declare fields",
            run: subclass_fields_declare,
        },
        Step {
            name: "declare factories",
            run: subclass_fields_factories,
        },
        Step {
            name: "delete subclasses",
            run: subclass_fields_delete,
        },
    ],
    postcondition: subclass_fields_post,
};

#[derive(Debug)]
struct ConstantSubclasses {
    /// Base methods the subclasses answer with constants, with the field
    /// name each becomes.
    methods: Vec<(SymbolId, String)>,
    /// Per subclass: its factory name and the literal of each override, in
    /// `methods` order.
    subclasses: Vec<(SymbolId, String, Vec<NodeId>)>,
}

fn field_for(method: &str) -> String {
    ["get", "is"]
        .iter()
        .find_map(|prefix| {
            method
                .strip_prefix(prefix)
                .filter(|rest| rest.starts_with(char::is_uppercase))
        })
        .map_or_else(|| format!("{method}Value"), support::decapitalize)
}

/// The literal returned by a body `return <literal>`.
fn returned_literal(model: &ProgramModel, method: SymbolId) -> Option<NodeId> {
    match model.body_statements(method).as_slice() {
        [ret] => model
            .node(*ret)
            .filter(|r| r.kind == NodeKind::Return)
            .and_then(|r| r.children.first().copied())
            .filter(|v| is_kind(model, *v, NodeKind::Literal)),
        _ => None,
    }
}

fn plan_subclass_fields(
    model: &ProgramModel,
    index: &ReferenceIndex,
    base: SymbolId,
) -> Result<ConstantSubclasses, Rejection> {
    let subs = model.subtypes(base);
    if subs.is_empty() {
        return reject("type has no subclasses");
    }
    let mut varied: Option<BTreeSet<SymbolId>> = None;
    for sub in &subs {
        let name = model.qualified_name(*sub);
        if !model.subtypes(*sub).is_empty() || !model.fields(*sub).is_empty() {
            return reject(format!("{name} does more than vary constants"));
        }
        for ctor in model.constructors(*sub) {
            if !model.params(ctor).is_empty() || !model.body_statements(ctor).is_empty() {
                return reject(format!("{name} has a constructor that does work"));
            }
        }
        let mut overridden = BTreeSet::new();
        for method in model.methods(*sub) {
            let base_method = index
                .overrides(method)
                .filter(|m| model.symbol(*m).and_then(|s| s.owner) == Some(base))
                .ok_or_else(|| Rejection::new(format!(
                    "{} is not an override of the base",
                    model.qualified_name(method)
                )))?;
            if returned_literal(model, method).is_none() || !model.params(method).is_empty() {
                return reject(format!(
                    "{} does not return a constant",
                    model.qualified_name(method)
                ));
            }
            overridden.insert(base_method);
        }
        match &varied {
            None => varied = Some(overridden),
            Some(set) if *set == overridden => {}
            Some(_) => return reject("subclasses do not vary the same methods"),
        }
    }
    let varied = varied.unwrap_or_default();
    if varied.is_empty() {
        return reject("subclasses override nothing");
    }
    let methods: Vec<(SymbolId, String)> = model
        .methods(base)
        .into_iter()
        .filter(|m| varied.contains(m))
        .map(|m| (m, field_for(&name_of(model, m))))
        .collect();

    let mut subclasses = Vec::new();
    for sub in subs {
        let mut literals = Vec::new();
        for (base_method, _) in &methods {
            let literal = model
                .methods(sub)
                .into_iter()
                .find(|m| index.overrides(*m) == Some(*base_method))
                .and_then(|m| returned_literal(model, m))
                .ok_or_else(|| Rejection::new(format!(
                    "{} misses a constant",
                    model.qualified_name(sub)
                )))?;
            literals.push(literal);
        }
        subclasses.push((sub, format!("create{}", name_of(model, sub)), literals));
    }
    Ok(ConstantSubclasses { methods, subclasses })
}

fn subclass_fields_pre(a: &Analysis<'_>) -> Check {
    if !a.model.constructors(a.target).is_empty() {
        return reject("base type declares constructors");
    }
    let plan = plan_subclass_fields(a.model, a.index, a.target)?;
    let mut names: Vec<String> = plan.methods.iter().map(|(_, f)| f.clone()).collect();
    names.extend(plan.subclasses.iter().map(|(_, f, _)| f.clone()));
    support::distinct(&names)?;
    for name in &names {
        checks::name_free(a.model, a.target, name)?;
    }
    Ok(())
}

fn subclass_fields_declare(cx: &mut StepCx<'_>) -> StepResult {
    let base = cx.target();
    let index = cx.index();
    let plan = plan_subclass_fields(cx.model(), &index, base)?;
    let mut fields = Vec::new();
    for (method, field_name) in &plan.methods {
        let returns = cx.symbol(*method)?.type_ref;
        let field = cx.add_field(base, field_name, Modifiers::private().finalized(), returns)?;
        if let Some(body) = cx.symbol(*method)?.body {
            cx.remove(body)?;
        }
        let body = cx.build(|t| {
            let r = t.read(field);
            let ret = t.ret(Some(r));
            t.block(vec![ret])
        });
        cx.insert(body, Anchor::Body(*method))?;
        fields.push(field);
    }
    let ctor = support::assigning_constructor(cx, base, &fields)?;
    cx.update_modifiers(ctor, |m| m.visibility = Visibility::Protected)?;
    cx.bind("fields", Binding::Symbols(fields));
    Ok(())
}

fn subclass_fields_factories(cx: &mut StepCx<'_>) -> StepResult {
    let base = cx.target();
    let index = cx.index();
    let plan = plan_subclass_fields(cx.model(), &index, base)?;
    let modifiers = Modifiers {
        is_static: true,
        ..Modifiers::default()
    };
    for (sub, factory_name, literals) in plan.subclasses {
        let factory = cx.add_method(base, &factory_name, modifiers, Some(base))?;
        let mut args = Vec::new();
        for literal in literals {
            args.push(cx.clone_tree(literal, &HashMap::new())?);
        }
        let body = cx.build(|t| {
            let args = args.into_iter().map(|a| t.graft(a)).collect();
            let instance = t.new_instance(base, args);
            let ret = t.ret(Some(instance));
            t.block(vec![ret])
        });
        cx.insert(body, Anchor::Body(factory))?;

        let mut constructions: Vec<NodeId> = cx
            .model()
            .nodes()
            .filter(|n| n.kind == NodeKind::New && n.symbol == Some(sub))
            .map(|n| n.id)
            .collect();
        constructions.sort();
        for node in constructions {
            cx.replace_with(node, |t| t.call(factory, Vec::new()))?;
        }
    }
    Ok(())
}

fn subclass_fields_delete(cx: &mut StepCx<'_>) -> StepResult {
    let base = cx.target();
    for sub in cx.model().subtypes(base) {
        let index = cx.index();
        for method in cx.model().methods(sub) {
            if let Some(base_method) = index.overrides(method) {
                for site in cx.call_sites(method) {
                    cx.rewire(site, NodeKind::Call, base_method)?;
                }
            }
        }
        support::retarget_type(cx, sub, base)?;
        cx.delete_type(sub)?;
    }
    Ok(())
}

fn subclass_fields_post(v: &Verification<'_>) -> Check {
    if !v.model.subtypes(v.target).is_empty() {
        return reject("subclasses remain");
    }
    for field in v.symbols("fields") {
        if v.model.symbol(field).and_then(|f| f.owner) != Some(v.target) {
            return reject(format!("{} is not held by the base", v.model.qualified_name(field)));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RecastConfig;
    use crate::session::Session;
    use recast_model::{ModelBuilder, check_well_formed};

    fn resolve(s: &Session, path: &str) -> Option<SymbolId> {
        s.snapshot().model.resolve(&path.parse().unwrap()).ok()
    }

    /// `Range { low, high; includes(arg) }` with a public `low` read by a client.
    fn ranges() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let range = b.ty(app, "Range");
        let low = b.field(range, "low");
        b.modifiers(low, |m| m.visibility = Visibility::Public);
        let high = b.field(range, "high");
        let includes = b.method(range, "includes");
        let arg = b.param(includes, "arg");
        let a = b.read(arg);
        let l = b.read(low);
        let above = b.op(">=", vec![a, l]);
        let a = b.read(arg);
        let h = b.read(high);
        let below = b.op("<=", vec![a, h]);
        let both = b.op("&&", vec![above, below]);
        let ret = b.ret(Some(both));
        b.body(includes, vec![ret]);
        let grow = b.method(range, "grow");
        let factor = b.param(grow, "factor");
        let h = b.read(high);
        let f = b.read(factor);
        let product = b.op("*", vec![h, f]);
        let assign = b.assign(high, product);
        b.body(grow, vec![assign]);

        let client = b.ty(app, "Client");
        let show = b.method(client, "show");
        let r = b.param(show, "r");
        b.typed(r, range);
        let receiver = b.read(r);
        let member = b.read(low);
        let access = b.select(receiver, member);
        let ret = b.ret(Some(access));
        b.body(show, vec![ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn self_encapsulation_routes_internal_access() {
        let s = ranges();
        s.perform("SelfEncapsulateField", "app::Range::high", &Params::new()).unwrap();
        let high = resolve(&s, "app::Range::high").unwrap();
        let getter = resolve(&s, "app::Range::getHigh").unwrap();
        let setter = resolve(&s, "app::Range::setHigh").unwrap();
        let snapshot = s.snapshot();
        let users: Vec<SymbolId> =
            snapshot.index.users_of(high).iter().map(|e| e.enclosing).collect();
        assert!(users.iter().all(|u| *u == getter || *u == setter));
        let grow = resolve(&s, "app::Range::grow").unwrap();
        assert!(snapshot.index.callers_of(setter).contains(&grow));
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn encapsulate_field_hides_a_public_field() {
        let s = ranges();
        s.perform("EncapsulateField", "app::Range::low", &Params::new()).unwrap();
        let low = resolve(&s, "app::Range::low").unwrap();
        let getter = resolve(&s, "app::Range::getLow").unwrap();
        let show = resolve(&s, "app::Client::show").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.symbol(low).unwrap().modifiers.visibility, Visibility::Private);
        assert_eq!(snapshot.index.callers_of(getter), vec![show]);
        assert!(resolve(&s, "app::Range::setLow").is_none());

        let verdict = s.check("EncapsulateField", "app::Range::low", &Params::new()).unwrap();
        assert_eq!(verdict.rejection().unwrap().reason, "field is already private");
    }

    #[test]
    fn magic_number_becomes_a_constant() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let physics = b.ty(app, "Physics");
        let energy = b.method(physics, "potentialEnergy");
        let mass = b.param(energy, "mass");
        let m = b.read(mass);
        let g = b.lit("9.81");
        let product = b.op("*", vec![m, g]);
        let ret = b.ret(Some(product));
        b.body(energy, vec![ret]);
        let s = Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap();

        let params = Params::new().with("value", "9.81").with("name", "GRAVITATIONAL_CONSTANT");
        s.perform("ReplaceMagicNumberWithSymbolicConstant", "app::Physics", &params).unwrap();
        let constant = resolve(&s, "app::Physics::GRAVITATIONAL_CONSTANT").unwrap();
        let snapshot = s.snapshot();
        assert!(snapshot.model.symbol(constant).unwrap().modifiers.is_static);
        assert_eq!(snapshot.index.reads_of(constant).len(), 1);
        drop(snapshot);

        let params = Params::new().with("value", "9.81").with("name", "G");
        let verdict = s
            .check("ReplaceMagicNumberWithSymbolicConstant", "app::Physics", &params)
            .unwrap();
        assert!(!verdict.is_accepted());
    }

    /// `Order.customer` assigned in the constructor and read by `describe`.
    fn orders() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let order = b.ty(app, "Order");
        let customer = b.field(order, "customer");
        let ctor = b.constructor(order);
        let name = b.param(ctor, "name");
        let n = b.read(name);
        let assign = b.assign(customer, n);
        b.body(ctor, vec![assign]);
        let describe = b.method(order, "describe");
        let c = b.read(customer);
        let ret = b.ret(Some(c));
        b.body(describe, vec![ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn data_value_becomes_an_object() {
        let s = orders();
        let params = Params::new().with("value", "name");
        s.perform("ReplaceDataValueWithObject", "app::Order::customer", &params)
            .unwrap();
        let class = resolve(&s, "app::Customer").unwrap();
        let field = resolve(&s, "app::Order::customer").unwrap();
        let getter = resolve(&s, "app::Customer::getName").unwrap();
        let describe = resolve(&s, "app::Order::describe").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.symbol(field).unwrap().type_ref, Some(class));
        assert_eq!(snapshot.index.callers_of(getter), vec![describe]);
        assert!(
            snapshot
                .model
                .nodes()
                .any(|n| n.kind == NodeKind::New && n.symbol == Some(class))
        );
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn value_and_reference_objects() {
        let s = orders();
        s.perform("ReplaceDataValueWithObject", "app::Order::customer", &Params::new()).unwrap();
        s.perform("ChangeValueToReference", "app::Customer", &Params::new()).unwrap();
        let customer = resolve(&s, "app::Customer").unwrap();
        assert!(resolve(&s, "app::Customer::named").is_some());
        assert_eq!(
            s.snapshot().model.symbol(customer).unwrap().tag(support::IDENTITY),
            Some("reference")
        );

        s.perform("ChangeReferenceToValue", "app::Customer", &Params::new()).unwrap();
        assert!(resolve(&s, "app::Customer::equals").is_some());
        assert!(resolve(&s, "app::Customer::instances").is_none());
        assert_eq!(s.snapshot().model.symbol(customer).unwrap().tag(support::IDENTITY), None);
    }

    #[test]
    fn mutable_reference_cannot_become_a_value() {
        let s = ranges();
        let verdict = s.check("ChangeReferenceToValue", "app::Range", &Params::new()).unwrap();
        let rejection = verdict.rejection().unwrap();
        assert_eq!(rejection.suggestion.as_deref(), Some("RemoveSettingMethod"));
        assert_eq!(rejection.conflicts[0].subject, "app::Range::grow");
    }

    #[test]
    fn associations_change_direction_and_back() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let customer = b.ty(app, "Customer");
        let order = b.ty(app, "Order");
        let owner = b.field(order, "customer");
        b.typed(owner, customer);
        let set = b.method(order, "setCustomer");
        let arg = b.param(set, "arg");
        b.typed(arg, customer);
        let a = b.read(arg);
        let assign = b.assign(owner, a);
        b.body(set, vec![assign]);
        let s = Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap();
        let before = s.snapshot().index.edge_signature();

        s.perform(
            "ChangeUnidirectionalAssociationToBidirectional",
            "app::Order::customer",
            &Params::new(),
        )
            .unwrap();
        let back = resolve(&s, "app::Customer::order").unwrap();
        assert_eq!(s.snapshot().index.writes_of(back).len(), 1);

        s.perform(
            "ChangeBidirectionalAssociationToUnidirectional",
            "app::Customer::order",
            &Params::new(),
        )
            .unwrap();
        assert!(resolve(&s, "app::Customer::order").is_none());
        assert_eq!(s.snapshot().index.edge_signature(), before);
    }

    #[test]
    fn array_becomes_an_object() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let league = b.ty(app, "League");
        let row = b.field(league, "row");
        let record = b.method(league, "record");
        let r = b.read(row);
        let zero = b.lit("0");
        let team = b.lit("\"Liverpool\"");
        let store = b.op(STORE, vec![r, zero, team]);
        let r = b.read(row);
        let one = b.lit("1");
        let load = b.op(LOAD, vec![r, one]);
        let ret = b.ret(Some(load));
        b.body(record, vec![store, ret]);
        let s = Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap();

        let params = Params::new()
            .with("name", "Performance")
            .with("elements", serde_json::json!({"0": "name", "1": "wins"}));
        s.perform("ReplaceArrayWithObject", "app::League::row", &params).unwrap();
        let record = resolve(&s, "app::League::record").unwrap();
        let set_name = resolve(&s, "app::Performance::setName").unwrap();
        let get_wins = resolve(&s, "app::Performance::getWins").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.index.callers_of(set_name), vec![record]);
        assert_eq!(snapshot.index.callers_of(get_wins), vec![record]);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    /// `Employee` with an integer type code set at construction.
    pub(crate) fn employees(switch_on_code: bool) -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let employee = b.ty(app, "Employee");
        let kind = b.field(employee, "type");
        b.tag(kind, support::TYPE_CODE, "int");
        let mut constants = Vec::new();
        for (name, value) in [("ENGINEER", "0"), ("SALESMAN", "1"), ("MANAGER", "2")] {
            let constant = b.field(employee, name);
            b.modifiers(constant, |m| {
                m.visibility = Visibility::Public;
                m.is_static = true;
                m.is_final = true;
            });
            b.tag(constant, support::CODE_OF, "type");
            let v = b.lit(value);
            b.init(constant, v);
            constants.push(constant);
        }
        let ctor = b.constructor(employee);
        let code = b.param(ctor, "code");
        let c = b.read(code);
        let assign = b.assign(kind, c);
        b.body(ctor, vec![assign]);

        if switch_on_code {
            let pay = b.method(employee, "payAmount");
            let t = b.read(kind);
            let k = b.read(constants[0]);
            let test = b.op("==", vec![t, k]);
            let base = b.lit("100");
            let ret = b.ret(Some(base));
            let arm = b.cond(test, vec![ret], None);
            let zero = b.lit("0");
            let ret = b.ret(Some(zero));
            b.body(pay, vec![arm, ret]);
        }

        let payroll = b.ty(app, "Payroll");
        let hire = b.method(payroll, "hire");
        let k = b.read(constants[0]);
        let created = b.new_instance(employee, vec![k]);
        let ret = b.ret(Some(created));
        b.body(hire, vec![ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn type_code_with_class() {
        let s = employees(false);
        let params = Params::new().with("name", "EmployeeType");
        s.perform("ReplaceTypeCodeWithClass", "app::Employee::type", &params).unwrap();
        let class = resolve(&s, "app::EmployeeType").unwrap();
        let engineer = resolve(&s, "app::EmployeeType::ENGINEER").unwrap();
        assert!(resolve(&s, "app::Employee::ENGINEER").is_none());
        let employee = resolve(&s, "app::Employee").unwrap();
        let snapshot = s.snapshot();
        let ctor = snapshot.model.constructors(employee)[0];
        let code = snapshot.model.params(ctor)[0];
        assert_eq!(snapshot.model.symbol(code).unwrap().type_ref, Some(class));
        assert_eq!(snapshot.index.reads_of(engineer).len(), 1);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn switching_type_code_needs_subclasses() {
        let s = employees(true);
        let verdict = s
            .check("ReplaceTypeCodeWithClass", "app::Employee::type", &Params::new())
            .unwrap();
        assert_eq!(
            verdict.rejection().unwrap().suggestion.as_deref(),
            Some("ReplaceTypeCodeWithSubclasses")
        );
    }

    #[test]
    fn type_code_with_subclasses() {
        let s = employees(true);
        s.perform("ReplaceTypeCodeWithSubclasses", "app::Employee::type", &Params::new()).unwrap();
        let employee = resolve(&s, "app::Employee").unwrap();
        let engineer = resolve(&s, "app::Engineer").unwrap();
        let query = resolve(&s, "app::Employee::getType").unwrap();
        let pay = resolve(&s, "app::Employee::payAmount").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(support::variant_table(&snapshot.model, employee).len(), 3);
        assert_eq!(
            snapshot.model.symbol(engineer).unwrap().tag(support::VARIANT),
            Some("ENGINEER")
        );
        assert!(snapshot.index.callers_of(query).contains(&pay));
        let hire = resolve(&s, "app::Payroll::hire").unwrap();
        assert!(
            snapshot
                .model
                .body_nodes(hire)
                .into_iter()
                .any(|n| snapshot.model.node(n).unwrap().symbol == Some(engineer))
        );
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn type_code_with_state() {
        let s = employees(true);
        s.perform("ReplaceTypeCodeWithStateStrategy", "app::Employee::type", &Params::new())
            .unwrap();
        let state = resolve(&s, "app::EmployeeType").unwrap();
        let field = resolve(&s, "app::Employee::type").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.model.symbol(field).unwrap().type_ref, Some(state));
        assert_eq!(support::variant_table(&snapshot.model, state).len(), 3);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }

    #[test]
    fn subclasses_with_constant_methods_become_fields() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let person = b.ty(app, "Person");
        b.method(person, "isMale");
        b.method(person, "getCode");
        let mut subs = Vec::new();
        for (name, male, letter) in [("Male", "true", "\"M\""), ("Female", "false", "\"F\"")] {
            let sub = b.subtype(app, name, person);
            let m = b.method(sub, "isMale");
            let v = b.lit(male);
            let ret = b.ret(Some(v));
            b.body(m, vec![ret]);
            let c = b.method(sub, "getCode");
            let v = b.lit(letter);
            let ret = b.ret(Some(v));
            b.body(c, vec![ret]);
            subs.push(sub);
        }
        let client = b.ty(app, "Client");
        let make = b.method(client, "make");
        let created = b.new_instance(subs[0], Vec::new());
        let ret = b.ret(Some(created));
        b.body(make, vec![ret]);
        let s = Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap();

        s.perform("ReplaceSubclassWithFields", "app::Person", &Params::new()).unwrap();
        assert!(resolve(&s, "app::Male").is_none());
        assert!(resolve(&s, "app::Person::male").is_some());
        assert!(resolve(&s, "app::Person::code").is_some());
        let factory = resolve(&s, "app::Person::createMale").unwrap();
        let make = resolve(&s, "app::Client::make").unwrap();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.index.callers_of(factory), vec![make]);
        assert!(check_well_formed(&snapshot.model).is_empty());
    }
}
