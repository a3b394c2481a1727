// Helpers shared by the recipe modules: naming conventions, the
// tagged-variant table for type codes, association tags and a handful of
// recurring edit shapes.

use std::collections::{BTreeMap, HashMap, HashSet};

use recast_model::{
    Anchor, Modifiers, NodeId, NodeKind, Parent, ProgramModel, ReferenceIndex, Subtree, SymbolId,
    SymbolKind, SymbolPath, Visibility,
};

use crate::analyzer::checks::{self, receiver_of};
use crate::analyzer::{Check, Rejection, reject};
use crate::engine::{StepCx, StepResult};
use crate::error::StepError;
use crate::params::ExprSpec;

// ── Tags ──────────────────────────────────────────────────────────────

/// Discriminant field of a type code.
pub const TYPE_CODE: &str = "type_code";
/// Code constant, valued with the discriminant field's name.
pub const CODE_OF: &str = "code_of";
/// Subtype standing for one code constant.
pub const VARIANT: &str = "variant";
/// Query answering the discriminant.
pub const DISCRIMINANT: &str = "discriminant";
/// State field replacing a discriminant field.
pub const STATE_OF: &str = "state_of";
/// `owner` on the forward field of an association, `inverse` on the back pointer.
pub const ASSOCIATION: &str = "association";
/// Name of the field at the other end of an association.
pub const INVERSE: &str = "inverse";
/// Static helper hosted on a client for a server type it cannot change.
pub const FOREIGN_FOR: &str = "foreign_for";
/// `reference` on types whose instances are shared through a registry.
pub const IDENTITY: &str = "identity";
/// Domain type kept in sync with a presentation type, valued with its path.
pub const OBSERVED_BY: &str = "observed_by";

// ── Names ─────────────────────────────────────────────────────────────

pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn getter_name(field: &str) -> String {
    format!("get{}", capitalize(field))
}

pub fn setter_name(field: &str) -> String {
    format!("set{}", capitalize(field))
}

/// `SALES_MAN` becomes `SalesMan`.
pub fn camel_case(constant: &str) -> String {
    constant
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| capitalize(&part.to_lowercase()))
        .collect()
}

/// Identifier fragment for a literal: quotes and punctuation dropped.
pub fn literal_fragment(text: &str) -> String {
    capitalize(&text.chars().filter(char::is_ascii_alphanumeric).collect::<String>())
}

pub fn owner_of(model: &ProgramModel, symbol: SymbolId) -> Result<SymbolId, Rejection> {
    model
        .symbol(symbol)
        .and_then(|s| s.owner)
        .ok_or_else(|| Rejection::new(format!("{} has no owner", model.qualified_name(symbol))))
}

pub fn module_of(model: &ProgramModel, symbol: SymbolId) -> Result<SymbolId, Rejection> {
    model
        .owning_module(symbol)
        .ok_or_else(|| Rejection::new(format!(
            "{} is not inside a module",
            model.qualified_name(symbol)
        )))
}

pub fn name_of(model: &ProgramModel, symbol: SymbolId) -> String {
    model.symbol(symbol).map(|s| s.name.clone()).unwrap_or_default()
}

/// Member of `owner` called `name` with the given kind.
pub fn member_of_kind(
    model: &ProgramModel,
    owner: SymbolId,
    name: &str,
    kind: SymbolKind,
) -> Result<SymbolId, Rejection> {
    match model.member_named(Some(owner), name) {
        Some(id) if model.symbol(id).is_some_and(|s| s.kind == kind) => Ok(id),
        Some(_) => reject(format!("{}::{name} is not a {kind}", model.qualified_name(owner))),
        None => reject(format!("{} declares no `{name}`", model.qualified_name(owner))),
    }
}

pub fn resolve_type(model: &ProgramModel, path: &SymbolPath) -> Result<SymbolId, Rejection> {
    checks::resolve_kind(model, path, SymbolKind::Type)
}

/// Names must be pairwise distinct.
pub fn distinct(names: &[String]) -> Check {
    let mut seen = HashSet::new();
    match names.iter().find(|n| !seen.insert(n.as_str())) {
        Some(dup) => reject(format!("`{dup}` is requested twice")),
        None => Ok(()),
    }
}

// ── Node shapes ───────────────────────────────────────────────────────

pub fn literal_text(model: &ProgramModel, node: NodeId) -> Option<&str> {
    model
        .node(node)
        .filter(|n| n.kind == NodeKind::Literal)
        .and_then(|n| n.text.as_deref())
}

pub fn is_kind(model: &ProgramModel, node: NodeId, kind: NodeKind) -> bool {
    model.node(node).is_some_and(|n| n.kind == kind)
}

pub fn is_operator(model: &ProgramModel, node: NodeId, text: &str) -> bool {
    model
        .node(node)
        .is_some_and(|n| n.kind == NodeKind::Operator && n.text.as_deref() == Some(text))
}

/// `this.x` becomes `x`; anything else is returned unchanged.
pub fn strip_this(model: &ProgramModel, node: NodeId) -> NodeId {
    match model.node(node) {
        Some(n)
            if n.kind == NodeKind::Select
                && n.children.len() == 2
                && is_kind(model, n.children[0], NodeKind::This) =>
        {
            n.children[1]
        }
        _ => node,
    }
}

/// The expression standing for a member access: the enclosing `Select`
/// when `node` is its member, otherwise `node` itself.
pub fn access_root(model: &ProgramModel, node: NodeId) -> NodeId {
    match model.parent(node) {
        Some(Parent::Node(parent))
            if model
                .node(parent)
                .is_some_and(|p| p.kind == NodeKind::Select && p.children.get(1) == Some(&node)) =>
        {
            parent
        }
        _ => node,
    }
}

/// Whether `node` sits directly in a block.
pub fn is_statement(model: &ProgramModel, node: NodeId) -> bool {
    matches!(model.parent(node), Some(Parent::Node(p)) if is_kind(model, p, NodeKind::Block))
}

/// Block and index of a direct block child.
pub fn statement_slot(model: &ProgramModel, node: NodeId) -> Result<(NodeId, usize), Rejection> {
    match model.statement_of(node) {
        Some((block, index))
            if model.node(block).and_then(|b| b.children.get(index)) == Some(&node) =>
        {
            Ok((block, index))
        }
        _ => reject(format!("{node} is not a statement")),
    }
}

/// Accessed on the implicit receiver, either bare or through `this`.
pub fn is_self_access(model: &ProgramModel, node: NodeId) -> bool {
    match receiver_of(model, node) {
        None => true,
        Some(receiver) => is_kind(model, receiver, NodeKind::This),
    }
}

/// Static type of an expression, as far as the model declares it.
pub fn static_type(model: &ProgramModel, node: NodeId) -> Option<SymbolId> {
    let n = model.node(node)?;
    match n.kind {
        NodeKind::Reference | NodeKind::Call => model.symbol(n.symbol?)?.type_ref,
        NodeKind::New | NodeKind::Cast => n.symbol,
        NodeKind::This => model.enclosing_symbol(node).and_then(|s| model.owning_type(s)),
        NodeKind::Select => static_type(model, *n.children.get(1)?),
        _ => None,
    }
}

/// Whether a method hands a value back to its callers.
pub fn returns_value(model: &ProgramModel, method: SymbolId) -> bool {
    model.symbol(method).is_some_and(|s| s.type_ref.is_some())
        || model
            .body_nodes(method)
            .into_iter()
            .any(|id| {
                model
                    .node(id)
                    .is_some_and(|n| n.kind == NodeKind::Return && !n.children.is_empty())
            })
}

/// Nodes of `symbol`'s body naming a member declared directly by `ty`.
pub fn uses_of_members(model: &ProgramModel, symbol: SymbolId, ty: SymbolId) -> Vec<NodeId> {
    model
        .body_nodes(symbol)
        .into_iter()
        .filter(|id| {
            model
                .node(*id)
                .and_then(|n| n.symbol)
                .and_then(|s| model.symbol(s))
                .is_some_and(|s| {
                    s.owner == Some(ty) && matches!(s.kind, SymbolKind::Field | SymbolKind::Method)
                })
        })
        .collect()
}

pub fn this_nodes(model: &ProgramModel, symbol: SymbolId) -> Vec<NodeId> {
    model
        .body_nodes(symbol)
        .into_iter()
        .filter(|id| is_kind(model, *id, NodeKind::This))
        .collect()
}

/// Body `return f` (or `return this.f`).
pub fn is_getter_of(model: &ProgramModel, method: SymbolId, field: SymbolId) -> bool {
    match model.body_statements(method).as_slice() {
        [ret] => model.node(*ret).is_some_and(|r| {
            r.kind == NodeKind::Return
                && r.children.len() == 1
                && model
                    .node(strip_this(model, r.children[0]))
                    .is_some_and(|n| n.kind == NodeKind::Reference && n.symbol == Some(field))
        }),
        _ => false,
    }
}

/// One parameter and body `f = param` (or `this.f = param`).
pub fn is_setter_of(model: &ProgramModel, method: SymbolId, field: SymbolId) -> bool {
    let params = model.params(method);
    let [param] = params.as_slice() else {
        return false;
    };
    match model.body_statements(method).as_slice() {
        [statement] => model.node(strip_this(model, *statement)).is_some_and(|a| {
            a.kind == NodeKind::Assign
                && a.symbol == Some(field)
                && a.children.len() == 1
                && model
                    .node(a.children[0])
                    .is_some_and(|v| v.kind == NodeKind::Reference && v.symbol == Some(*param))
        }),
        _ => false,
    }
}

/// Accessor `name` on the field's owner: free, or already an accessor of
/// the right shape.
pub fn accessor_available(
    model: &ProgramModel,
    field: SymbolId,
    name: &str,
    setter: bool,
) -> Check {
    let owner = owner_of(model, field)?;
    match model.member_named(Some(owner), name) {
        None => Ok(()),
        Some(existing) if setter && is_setter_of(model, existing, field) => Ok(()),
        Some(existing) if !setter && is_getter_of(model, existing, field) => Ok(()),
        Some(_) => checks::name_free(model, owner, name),
    }
}

// ── Conditional chains ────────────────────────────────────────────────

/// `if (c1) {..} else if (c2) {..} else {..}` flattened into its arms.
#[derive(Debug, Clone)]
pub struct Chain {
    pub root: NodeId,
    /// `(condition, then-block)` per arm, outermost first.
    pub arms: Vec<(NodeId, NodeId)>,
    /// Final else block, when present.
    pub otherwise: Option<NodeId>,
}

pub fn conditional_chain(model: &ProgramModel, root: NodeId) -> Option<Chain> {
    let mut arms = Vec::new();
    let mut current = root;
    loop {
        let node = model.node(current)?;
        if node.kind != NodeKind::Conditional {
            return None;
        }
        arms.push((*node.children.first()?, *node.children.get(1)?));
        let Some(&otherwise) = node.children.get(2) else {
            return Some(Chain {
                root,
                arms,
                otherwise: None,
            });
        };
        match model.node(otherwise)?.children.as_slice() {
            [only] if is_kind(model, *only, NodeKind::Conditional) => current = *only,
            _ => {
                return Some(Chain {
                    root,
                    arms,
                    otherwise: Some(otherwise),
                });
            }
        }
    }
}

/// Constant tested by `cond` when it reads `<discriminant> == C`, in either
/// operand order. `C` must be a code constant of `field`.
pub fn tested_constant(
    model: &ProgramModel,
    cond: NodeId,
    field_name: &str,
    is_discriminant: &dyn Fn(NodeId) -> bool,
) -> Option<SymbolId> {
    let node = model.node(cond)?;
    if !is_operator(model, cond, "==") || node.children.len() != 2 {
        return None;
    }
    let constant = |id: NodeId| {
        model
            .node(strip_this(model, id))
            .filter(|n| n.kind == NodeKind::Reference)
            .and_then(|n| n.symbol)
            .filter(|s| model.symbol(*s).and_then(|c| c.tag(CODE_OF)) == Some(field_name))
    };
    let (a, b) = (node.children[0], node.children[1]);
    if is_discriminant(strip_this(model, a)) {
        constant(b)
    } else if is_discriminant(strip_this(model, b)) {
        constant(a)
    } else {
        None
    }
}

// ── Type codes ────────────────────────────────────────────────────────

/// Code constants of a discriminant field: static final fields of the same
/// owner tagged `code_of = <field>` with a literal initializer, in
/// declaration order, with their literal text.
pub fn code_constants(model: &ProgramModel, field: SymbolId) -> Vec<(SymbolId, String)> {
    let Some(symbol) = model.symbol(field) else {
        return Vec::new();
    };
    let Some(owner) = symbol.owner else {
        return Vec::new();
    };
    model
        .fields(owner)
        .into_iter()
        .filter_map(|c| {
            let constant = model.symbol(c)?;
            if constant.tag(CODE_OF) != Some(symbol.name.as_str())
                || !constant.modifiers.is_static
                || !constant.modifiers.is_final
            {
                return None;
            }
            let value = literal_text(model, constant.body?)?;
            Some((c, value.to_string()))
        })
        .collect()
}

/// Subtypes of `base` tagged with the code constant they stand for.
pub fn variant_table(model: &ProgramModel, base: SymbolId) -> BTreeMap<String, SymbolId> {
    model
        .subtypes(base)
        .into_iter()
        .filter_map(|s| Some((model.symbol(s)?.tag(VARIANT)?.to_string(), s)))
        .collect()
}

/// The generated query answering the discriminant named `field_name` among
/// the methods of `owner`.
pub fn discriminant_query(
    model: &ProgramModel,
    owner: SymbolId,
    field_name: &str,
) -> Option<SymbolId> {
    model
        .members_of_kind(owner, SymbolKind::Method)
        .into_iter()
        .find(|m| model.symbol(*m).and_then(|s| s.tag(DISCRIMINANT)) == Some(field_name))
}

/// Code constants of a discriminant field, or why there are too few.
pub fn require_codes(
    model: &ProgramModel,
    field: SymbolId,
) -> Result<Vec<(SymbolId, String)>, Rejection> {
    let constants = code_constants(model, field);
    if constants.len() < 2 {
        return reject(format!(
            "{} has {} code constant(s) tagged `{CODE_OF}`; at least two are needed",
            model.qualified_name(field),
            constants.len()
        ));
    }
    Ok(constants)
}

/// Writes of `field` outside the constructors and initializer of its owner.
pub fn writes_after_construction(
    model: &ProgramModel,
    index: &ReferenceIndex,
    field: SymbolId,
) -> Vec<SymbolId> {
    let owner = model.symbol(field).and_then(|s| s.owner);
    index
        .writes_of(field)
        .into_iter()
        .map(|e| e.enclosing)
        .filter(|enclosing| {
            *enclosing != field
                && !model
                    .symbol(*enclosing)
                    .is_some_and(|s| s.is_constructor() && s.owner == owner)
        })
        .collect()
}

// ── Associations ──────────────────────────────────────────────────────

/// Back-pointer invariant: the forward field is tagged `association = owner`
/// and names its inverse; the inverse lives on the forward field's type,
/// points back at the forward field's owner and is tagged
/// `association = inverse`, naming the forward field.
pub fn association_consistent(model: &ProgramModel, forward: SymbolId) -> Check {
    let name = model.qualified_name(forward);
    let Some(f) = model.symbol(forward) else {
        return reject(format!("{name} does not exist"));
    };
    if f.tag(ASSOCIATION) != Some("owner") {
        return reject(format!("{name} is not the owning end of an association"));
    }
    let (Some(target), Some(back_name)) = (f.type_ref, f.tag(INVERSE)) else {
        return reject(format!("{name} does not name its inverse"));
    };
    let Some(back) = model.member_named(Some(target), back_name) else {
        return reject(format!("inverse `{back_name}` of {name} is missing"));
    };
    let consistent = model.symbol(back).is_some_and(|b| {
        b.kind == SymbolKind::Field
            && b.tag(ASSOCIATION) == Some("inverse")
            && b.tag(INVERSE) == Some(f.name.as_str())
            && b.type_ref == f.owner
    });
    if consistent {
        Ok(())
    } else {
        reject(format!("inverse `{back_name}` of {name} does not point back"))
    }
}

// ── Overriding ────────────────────────────────────────────────────────

/// `method` with everything it overrides or is overridden by, transitively.
pub fn override_family(index: &ReferenceIndex, method: SymbolId) -> Vec<SymbolId> {
    let mut family = vec![method];
    let mut i = 0;
    while let Some(current) = family.get(i).copied() {
        for related in index.overrides(current).into_iter().chain(index.overridden_by(current)) {
            if !family.contains(&related) {
                family.push(related);
            }
        }
        i += 1;
    }
    family
}

// ── Expressions ───────────────────────────────────────────────────────

/// Resolve every path in an expression description. Locals and parameters
/// may only be named when they belong to `method`.
pub fn check_expr(model: &ProgramModel, spec: &ExprSpec, method: Option<SymbolId>) -> Check {
    let resolve = |path: &str, kinds: &[SymbolKind]| -> Check {
        let parsed: SymbolPath = path
            .parse()
            .map_err(|e| Rejection::new(format!("bad path `{path}`: {e}")))?;
        let id = checks::resolve(model, &parsed)?;
        let Some(symbol) = model.symbol(id) else {
            return reject(format!("`{path}` does not exist"));
        };
        if !kinds.contains(&symbol.kind) {
            return reject(format!("`{path}` is a {} and cannot be used here", symbol.kind));
        }
        if symbol.kind.is_variable() && symbol.kind != SymbolKind::Field && symbol.owner != method {
            return reject(format!("`{path}` is a variable of another method"));
        }
        Ok(())
    };
    let all = |args: &[ExprSpec]| args.iter().try_for_each(|a| check_expr(model, a, method));
    match spec {
        ExprSpec::Literal { .. } | ExprSpec::This { .. } => Ok(()),
        ExprSpec::Reference { path } => resolve(
            path,
            &[SymbolKind::Field, SymbolKind::Parameter, SymbolKind::Local],
        ),
        ExprSpec::Call { call, args } => {
            resolve(call, &[SymbolKind::Method])?;
            all(args)
        }
        ExprSpec::New { new, args } => {
            resolve(new, &[SymbolKind::Type])?;
            all(args)
        }
        ExprSpec::Operator { args, .. } if args.is_empty() => reject("operator without operands"),
        ExprSpec::Operator { args, .. } => all(args),
    }
}

// ── Edit shapes ───────────────────────────────────────────────────────

/// Make a member access go through `var`: `x` and `this.x` both become
/// `var.x`. Accesses on other receivers are left alone.
pub fn qualify(cx: &mut StepCx<'_>, node: NodeId, var: SymbolId) -> StepResult {
    match receiver_of(cx.model(), node) {
        Some(receiver) if is_kind(cx.model(), receiver, NodeKind::This) => {
            cx.replace_with(receiver, |t| t.read(var))?;
        }
        Some(_) => {}
        None => {
            cx.wrap(node, |t, inner| {
                let r = t.read(var);
                t.select(r, inner)
            })?;
        }
    }
    Ok(())
}

/// Insert `via` into an access path: `x.f` becomes `x.via.f` and bare `f`
/// becomes `via.f`.
pub fn route_through(cx: &mut StepCx<'_>, node: NodeId, via: SymbolId) -> StepResult {
    match receiver_of(cx.model(), node) {
        Some(receiver) => {
            cx.wrap(receiver, |t, inner| {
                let v = t.read(via);
                t.select(inner, v)
            })?;
        }
        None => {
            cx.wrap(node, |t, inner| {
                let v = t.read(via);
                t.select(v, inner)
            })?;
        }
    }
    Ok(())
}

/// Copy the parameters of `from` onto `to`, skipping `except`. Returns the
/// old-to-new mapping in parameter order.
pub fn copy_params(
    cx: &mut StepCx<'_>,
    from: SymbolId,
    to: SymbolId,
    except: &[SymbolId],
) -> Result<Vec<(SymbolId, SymbolId)>, StepError> {
    let mut pairs = Vec::new();
    for param in cx.model().params(from) {
        if except.contains(&param) {
            continue;
        }
        let source = cx.symbol(param)?.clone();
        let copy = cx.add_param(to, &source.name, source.type_ref, None)?;
        pairs.push((param, copy));
    }
    Ok(pairs)
}

/// Copy `method` into `owner` under `name`: modifiers, return type,
/// parameters, locals and body. Returns the copy and the symbol remap its
/// body was cloned with.
pub fn copy_method(
    cx: &mut StepCx<'_>,
    method: SymbolId,
    owner: SymbolId,
    name: &str,
) -> Result<(SymbolId, HashMap<SymbolId, SymbolId>), StepError> {
    let source = cx.symbol(method)?.clone();
    let copy = cx.add_method(owner, name, source.modifiers, source.type_ref)?;
    let mut remap = HashMap::from([(method, copy)]);
    for member in cx.model().members(method).to_vec() {
        let m = cx.symbol(member)?.clone();
        let id = cx.declare(m.kind, copy, &m.name, None, |s| {
            s.type_ref = m.type_ref;
            s.modifiers = m.modifiers;
        })?;
        remap.insert(member, id);
    }
    if let Some(body) = source.body {
        let tree = cx.clone_tree(body, &remap)?;
        cx.insert(tree, Anchor::Body(copy))?;
    }
    Ok((copy, remap))
}

/// Rewire every node of the subtree naming a key of `remap`.
pub fn rewire_within(
    cx: &mut StepCx<'_>,
    root: NodeId,
    remap: &HashMap<SymbolId, SymbolId>,
) -> StepResult {
    let targets: Vec<(NodeId, NodeKind, SymbolId)> = cx
        .model()
        .descendants(root)
        .into_iter()
        .filter_map(|id| {
            let node = cx.model().node(id)?;
            let to = remap.get(&node.symbol?)?;
            Some((id, node.kind, *to))
        })
        .collect();
    for (node, kind, to) in targets {
        cx.rewire(node, kind, to)?;
    }
    Ok(())
}

/// Give `method` the body `return via.target(params..)`, or a bare call
/// statement when nothing is returned. `pass_this` appends `this`.
pub fn write_delegation(
    cx: &mut StepCx<'_>,
    method: SymbolId,
    via: Option<SymbolId>,
    target: SymbolId,
    pass_this: bool,
) -> StepResult {
    let params = cx.model().params(method);
    let returns = returns_value(cx.model(), method) || returns_value(cx.model(), target);
    let tree = cx.build(|t| {
        let mut args: Vec<NodeId> = params.iter().map(|p| t.read(*p)).collect();
        if pass_this {
            args.push(t.this());
        }
        let call = t.call(target, args);
        let expr = match via {
            Some(v) => {
                let r = t.read(v);
                t.select(r, call)
            }
            None => call,
        };
        let statement = if returns { t.ret(Some(expr)) } else {
            expr
        };
        t.block(vec![statement])
    });
    cx.insert(tree, Anchor::Body(method))?;
    Ok(())
}

/// Public `get<Field>` returning the field, reusing an existing one.
pub fn ensure_getter(
    cx: &mut StepCx<'_>,
    field: SymbolId,
    name: &str,
) -> Result<SymbolId, StepError> {
    let f = cx.symbol(field)?.clone();
    let owner = f.owner.ok_or_else(|| StepError::plan("field has no owner"))?;
    if let Some(existing) = cx.model().member_named(Some(owner), name) {
        if is_getter_of(cx.model(), existing, field) {
            return Ok(existing);
        }
    }
    let mut modifiers = Modifiers::default();
    modifiers.is_static = f.modifiers.is_static;
    let getter = cx.add_method(owner, name, modifiers, f.type_ref)?;
    let tree = cx.build(|t| {
        let r = t.read(field);
        let ret = t.ret(Some(r));
        t.block(vec![ret])
    });
    cx.insert(tree, Anchor::Body(getter))?;
    Ok(getter)
}

/// Public `set<Field>(arg)` assigning the field, reusing an existing one.
pub fn ensure_setter(
    cx: &mut StepCx<'_>,
    field: SymbolId,
    name: &str,
) -> Result<SymbolId, StepError> {
    let f = cx.symbol(field)?.clone();
    let owner = f.owner.ok_or_else(|| StepError::plan("field has no owner"))?;
    if let Some(existing) = cx.model().member_named(Some(owner), name) {
        if is_setter_of(cx.model(), existing, field) {
            return Ok(existing);
        }
    }
    let mut modifiers = Modifiers::default();
    modifiers.is_static = f.modifiers.is_static;
    let setter = cx.add_method(owner, name, modifiers, None)?;
    let arg = cx.add_param(setter, "arg", f.type_ref, None)?;
    let tree = cx.build(|t| {
        let r = t.read(arg);
        let assign = t.assign(field, r);
        t.block(vec![assign])
    });
    cx.insert(tree, Anchor::Body(setter))?;
    Ok(setter)
}

/// Constructor of `ty` taking one parameter per field and assigning each.
pub fn assigning_constructor(
    cx: &mut StepCx<'_>,
    ty: SymbolId,
    fields: &[SymbolId],
) -> Result<SymbolId, StepError> {
    let ctor = cx.add_constructor(ty)?;
    let mut pairs = Vec::new();
    for field in fields {
        let f = cx.symbol(*field)?.clone();
        pairs.push((*field, cx.add_param(ctor, &f.name, f.type_ref, None)?));
    }
    let tree = cx.build(|t| {
        let statements = pairs
            .iter()
            .map(|(field, param)| {
                let r = t.read(*param);
                t.assign(*field, r)
            })
            .collect();
        t.block(statements)
    });
    cx.insert(tree, Anchor::Body(ctor))?;
    Ok(ctor)
}

/// Replace each read of a parameter inside `root` by a fresh copy of the
/// matching argument tree.
pub fn substitute(cx: &mut StepCx<'_>, root: NodeId, args: &[(SymbolId, Subtree)]) -> StepResult {
    let reads: Vec<(NodeId, usize)> = cx
        .model()
        .descendants(root)
        .into_iter()
        .filter_map(|id| {
            let node = cx.model().node(id)?;
            if node.kind != NodeKind::Reference {
                return None;
            }
            let i = args.iter().position(|(p, _)| Some(*p) == node.symbol)?;
            Some((id, i))
        })
        .collect();
    for (node, i) in reads {
        let copy = cx.reissue(&args[i].1);
        cx.replace(node, copy)?;
    }
    Ok(())
}

/// Move expression `expr` of `method` into a new private method `name` on
/// the same owner, passing the parameters and locals it reads, and leave a
/// call in its place. Returns the new method.
pub fn extract_expression(
    cx: &mut StepCx<'_>,
    method: SymbolId,
    expr: NodeId,
    name: &str,
    is_static: bool,
) -> Result<SymbolId, StepError> {
    let owner = owner_of(cx.model(), method)?;
    let used = checks::variables_used(cx.model(), &[expr], method);
    let returns = static_type(cx.model(), expr);
    let mut modifiers = Modifiers::private();
    modifiers.is_static = is_static;
    let query = cx.add_method(owner, name, modifiers, returns)?;
    let mut remap = HashMap::new();
    for var in &used {
        let source = cx.symbol(*var)?.clone();
        remap.insert(*var, cx.add_param(query, &source.name, source.type_ref, None)?);
    }

    let at = cx.anchor_of(expr)?;
    let body = cx.build(|t| {
        let ret = t.ret(None);
        t.block(vec![ret])
    });
    let block = cx.insert(body, Anchor::Body(query))?;
    let ret = cx.node(block)?.children[0];
    cx.move_node(expr, Anchor::Child { parent: ret, index: 0 })?;
    let call = cx.build(|t| {
        let args = used.iter().map(|v| t.read(*v)).collect();
        t.call(query, args)
    });
    cx.insert(call, at)?;
    rewire_within(cx, expr, &remap)?;
    Ok(query)
}

/// Point every `New` and `Cast` of `from` at `to`, and retype declarations.
pub fn retarget_type(cx: &mut StepCx<'_>, from: SymbolId, to: SymbolId) -> StepResult {
    let mut nodes: Vec<(NodeId, NodeKind)> = cx
        .model()
        .nodes()
        .filter(|n| n.symbol == Some(from) && matches!(n.kind, NodeKind::New | NodeKind::Cast))
        .map(|n| (n.id, n.kind))
        .collect();
    nodes.sort();
    for (node, kind) in nodes {
        cx.rewire(node, kind, to)?;
    }
    let mut typed: Vec<SymbolId> = cx
        .model()
        .symbols()
        .filter(|s| s.type_ref == Some(from))
        .map(|s| s.id)
        .collect();
    typed.sort();
    for symbol in typed {
        cx.retype(symbol, Some(to))?;
    }
    Ok(())
}

/// Widen a private member to package visibility so that other types of the
/// module can reach it.
pub fn open_to_module(cx: &mut StepCx<'_>, member: SymbolId) -> StepResult {
    if cx.symbol(member)?.modifiers.visibility == Visibility::Private {
        cx.update_modifiers(member, |m| m.visibility = Visibility::Package)?;
    }
    Ok(())
}

/// Widen a private member to protected so that subtypes can reach it.
pub fn open_to_subtypes(cx: &mut StepCx<'_>, member: SymbolId) -> StepResult {
    if cx.symbol(member)?.modifiers.visibility == Visibility::Private {
        cx.update_modifiers(member, |m| m.visibility = Visibility::Protected)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_model::ModelBuilder;

    #[test]
    fn naming_helpers() {
        assert_eq!(getter_name("basePrice"), "getBasePrice");
        assert_eq!(setter_name("x"), "setX");
        assert_eq!(camel_case("SALES_MAN"), "SalesMan");
        assert_eq!(decapitalize("Order"), "order");
        assert_eq!(literal_fragment("\"height\""), "Height");
    }

    #[test]
    fn chains_flatten_else_if() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let m = b.method(ty, "m");
        let c1 = b.read(f);
        let c2 = b.read(f);
        let one = b.lit("1");
        let r1 = b.ret(Some(one));
        let two = b.lit("2");
        let r2 = b.ret(Some(two));
        let three = b.lit("3");
        let r3 = b.ret(Some(three));
        let inner = b.cond(c2, vec![r2], Some(vec![r3]));
        let outer = b.cond(c1, vec![r1], Some(vec![inner]));
        b.body(m, vec![outer]);
        let model = b.build().unwrap();
        let chain = conditional_chain(&model, outer).unwrap();
        assert_eq!(chain.arms.len(), 2);
        assert!(chain.otherwise.is_some());
    }

    #[test]
    fn code_constants_need_tags_and_literals() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "Employee");
        let code = b.field(ty, "type");
        b.tag(code, TYPE_CODE, "true");
        for (name, value) in [("ENGINEER", "0"), ("SALESMAN", "1")] {
            let c = b.field(ty, name);
            b.modifiers(c, |m| {
                m.is_static = true;
                m.is_final = true;
            });
            b.tag(c, CODE_OF, "type");
            let lit = b.lit(value);
            b.init(c, lit);
        }
        let untagged = b.field(ty, "OTHER");
        let lit = b.lit("2");
        b.init(untagged, lit);
        let model = b.build().unwrap();
        let codes = code_constants(&model, code);
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[1].1, "1");
    }
}
