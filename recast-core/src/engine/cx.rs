// Step context: what a step template sees while it runs.
//
// Steps never touch the model directly. Every mutation goes through
// `StepCx::apply`, which records the edit, its inverse and the before/after
// state of the touched entity in the edit log.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use recast_model::{
    Anchor, Edit, Modifiers, Node, NodeId, NodeKind, NodeRef, ProgramModel, ReferenceIndex,
    Subtree, Symbol, SymbolId, SymbolKind, SymbolPath,
};

use super::log::{Binding, Bindings, EditLog};
use super::{CancelToken, StepResult};
use crate::analyzer::{Analysis, Verification};
use crate::config::RecastConfig;
use crate::error::StepError;
use crate::params::{ExprSpec, Params};
use crate::registry::{Registry, Step};

pub struct StepCx<'a> {
    model: &'a mut ProgramModel,
    log: &'a mut EditLog,
    target: SymbolId,
    params: &'a Params,
    registry: &'a Registry,
    config: &'a RecastConfig,
    cancel: &'a CancelToken,
    /// `Recipe/` for nested recipes, empty at the top level.
    scope: String,
    step: &'static str,
    index: Option<Arc<ReferenceIndex>>,
    bindings: Bindings,
}

impl std::fmt::Debug for StepCx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCx")
            .field("target", &self.target)
            .field("scope", &self.scope)
            .field("step", &self.step)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl<'a> StepCx<'a> {
    pub(crate) fn new(
        model: &'a mut ProgramModel,
        log: &'a mut EditLog,
        target: SymbolId,
        params: &'a Params,
        registry: &'a Registry,
        config: &'a RecastConfig,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            model,
            log,
            target,
            params,
            registry,
            config,
            cancel,
            scope: String::new(),
            step: "",
            index: None,
            bindings: Bindings::new(),
        }
    }

    /// Run steps in order; on failure report the failing step's label.
    pub(crate) fn run_steps(&mut self, steps: &[Step]) -> Result<(), (String, StepError)> {
        for step in steps {
            self.step = step.name;
            if self.cancel.is_cancelled() {
                return Err((self.label(), StepError::Cancelled));
            }
            trace!(step = %self.label(), "step started");
            (step.run)(self).map_err(|e| (self.label(), e))?;
        }
        Ok(())
    }

    pub(crate) fn into_bindings(self) -> Bindings {
        self.bindings
    }

    fn label(&self) -> String {
        format!("{}{}", self.scope, self.step)
    }

    // ── Inputs ────────────────────────────────────────────────────────

    pub fn target(&self) -> SymbolId {
        self.target
    }

    pub fn params(&self) -> &'a Params {
        self.params
    }

    pub fn model(&self) -> &ProgramModel {
        &*self.model
    }

    pub fn config(&self) -> &'a RecastConfig {
        self.config
    }

    /// Reference index for the current model state, rebuilt when stale.
    pub fn index(&mut self) -> Arc<ReferenceIndex> {
        match &self.index {
            Some(index) if index.is_current(self.model) => Arc::clone(index),
            _ => {
                let index = Arc::new(ReferenceIndex::build_with(
                    self.model,
                    self.config.analysis.parallel_index,
                ));
                self.index = Some(Arc::clone(&index));
                index
            }
        }
    }

    pub fn symbol(&self, id: SymbolId) -> Result<&Symbol, StepError> {
        Ok(self.model.require(id)?)
    }

    pub fn name_of(&self, id: SymbolId) -> Result<String, StepError> {
        Ok(self.symbol(id)?.name.clone())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, StepError> {
        Ok(self.model.require_node(id)?)
    }

    // ── Bindings ──────────────────────────────────────────────────────

    pub fn bind(&mut self, key: &str, binding: Binding) {
        self.bindings.insert(key.to_string(), binding);
    }

    pub fn bind_symbol(&mut self, key: &str, id: SymbolId) {
        self.bind(key, Binding::Symbol(id));
    }

    pub fn bound_symbol(&self, key: &str) -> Result<SymbolId, StepError> {
        match self.bindings.get(key) {
            Some(Binding::Symbol(id)) => Ok(*id),
            _ => Err(StepError::plan(format!("no symbol bound as `{key}`"))),
        }
    }

    pub fn bound_symbols(&self, key: &str) -> Vec<SymbolId> {
        match self.bindings.get(key) {
            Some(Binding::Symbol(id)) => vec![*id],
            Some(Binding::Symbols(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn bound_node(&self, key: &str) -> Result<NodeId, StepError> {
        match self.bindings.get(key) {
            Some(Binding::Node(id)) => Ok(*id),
            _ => Err(StepError::plan(format!("no node bound as `{key}`"))),
        }
    }

    pub fn bound_nodes(&self, key: &str) -> Vec<NodeId> {
        match self.bindings.get(key) {
            Some(Binding::Node(id)) => vec![*id],
            Some(Binding::Nodes(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn bound_name(&self, key: &str) -> Result<String, StepError> {
        match self.bindings.get(key) {
            Some(Binding::Name(name)) => Ok(name.clone()),
            _ => Err(StepError::plan(format!("no name bound as `{key}`"))),
        }
    }

    // ── Edits ─────────────────────────────────────────────────────────

    /// Apply one edit and record it.
    pub fn apply(&mut self, edit: Edit) -> StepResult {
        if self.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        let subject = edit.subject();
        let before = self.model.state_of(subject);
        let inverse = self.model.apply(&edit)?;
        let after = self.model.state_of(subject);
        let label = self.label();
        debug!(seq = self.log.len(), kind = %edit.kind(), step = %label, "edit applied");
        self.log.push(label, before, after, edit, inverse);
        Ok(())
    }

    /// Insert a new symbol configured by `configure` and return its id.
    pub fn declare(
        &mut self,
        kind: SymbolKind,
        owner: SymbolId,
        name: &str,
        index: Option<usize>,
        configure: impl FnOnce(&mut Symbol),
    ) -> Result<SymbolId, StepError> {
        let id = self.model.alloc_symbol_id();
        let mut symbol = Symbol::new(id, kind, name).owned_by(owner);
        configure(&mut symbol);
        self.apply(Edit::InsertSymbol { symbol, index })?;
        Ok(id)
    }

    pub fn add_type(
        &mut self,
        owner: SymbolId,
        name: &str,
        supertype: Option<SymbolId>,
    ) -> Result<SymbolId, StepError> {
        self.declare(SymbolKind::Type, owner, name, None, |s| s.supertype = supertype)
    }

    pub fn add_method(
        &mut self,
        owner: SymbolId,
        name: &str,
        modifiers: Modifiers,
        returns: Option<SymbolId>,
    ) -> Result<SymbolId, StepError> {
        self.declare(SymbolKind::Method, owner, name, None, |s| {
            s.modifiers = modifiers;
            s.type_ref = returns;
        })
    }

    pub fn add_constructor(&mut self, ty: SymbolId) -> Result<SymbolId, StepError> {
        let name = self.name_of(ty)?;
        self.declare(SymbolKind::Method, ty, &name, None, |s| {
            s.modifiers.is_constructor = true;
        })
    }

    pub fn add_field(
        &mut self,
        owner: SymbolId,
        name: &str,
        modifiers: Modifiers,
        type_ref: Option<SymbolId>,
    ) -> Result<SymbolId, StepError> {
        self.declare(SymbolKind::Field, owner, name, None, |s| {
            s.modifiers = modifiers;
            s.type_ref = type_ref;
        })
    }

    pub fn add_param(
        &mut self,
        method: SymbolId,
        name: &str,
        type_ref: Option<SymbolId>,
        index: Option<usize>,
    ) -> Result<SymbolId, StepError> {
        // Parameters precede locals in the member list.
        let index = index.or_else(|| Some(self.model.params(method).len()));
        let index = index.map(|i| self.param_slot(method, i));
        self.declare(SymbolKind::Parameter, method, name, index, |s| s.type_ref = type_ref)
    }

    /// Member-list position of the `i`th parameter slot.
    fn param_slot(&self, method: SymbolId, i: usize) -> usize {
        let members = self.model.members(method);
        let params = self.model.params(method);
        match params.get(i) {
            Some(p) => members.iter().position(|m| m == p).unwrap_or(members.len()),
            None => params
                .last()
                .and_then(|p| members.iter().position(|m| m == p))
                .map_or(0, |pos| pos + 1),
        }
    }

    pub fn add_local(
        &mut self,
        method: SymbolId,
        name: &str,
        type_ref: Option<SymbolId>,
    ) -> Result<SymbolId, StepError> {
        self.declare(SymbolKind::Local, method, name, None, |s| s.type_ref = type_ref)
    }

    pub fn rename(&mut self, id: SymbolId, new_name: &str) -> StepResult {
        self.apply(Edit::RenameSymbol {
            id,
            new_name: new_name.to_string(),
        })
    }

    pub fn move_symbol(
        &mut self,
        id: SymbolId,
        new_owner: SymbolId,
        index: Option<usize>,
    ) -> StepResult {
        self.apply(Edit::MoveSymbol {
            id,
            new_owner,
            index,
        })
    }

    pub fn set_modifiers(&mut self, id: SymbolId, modifiers: Modifiers) -> StepResult {
        if self.symbol(id)?.modifiers == modifiers {
            return Ok(());
        }
        self.apply(Edit::ChangeModifiers { id, modifiers })
    }

    pub fn update_modifiers(&mut self, id: SymbolId, f: impl FnOnce(&mut Modifiers)) -> StepResult {
        let mut modifiers = self.symbol(id)?.modifiers;
        f(&mut modifiers);
        self.set_modifiers(id, modifiers)
    }

    pub fn retype(&mut self, id: SymbolId, type_ref: Option<SymbolId>) -> StepResult {
        if self.symbol(id)?.type_ref == type_ref {
            return Ok(());
        }
        self.apply(Edit::RetypeSymbol { id, type_ref })
    }

    pub fn set_supertype(&mut self, ty: SymbolId, supertype: Option<SymbolId>) -> StepResult {
        if self.symbol(ty)?.supertype == supertype {
            return Ok(());
        }
        self.apply(Edit::RetypeHierarchyEdge {
            ty,
            new_supertype: supertype,
        })
    }

    pub fn set_tag(&mut self, id: SymbolId, key: &str, value: Option<&str>) -> StepResult {
        if self.symbol(id)?.tag(key) == value {
            return Ok(());
        }
        self.apply(Edit::SetTag {
            id,
            key: key.to_string(),
            value: value.map(str::to_string),
        })
    }

    pub fn delete(&mut self, id: SymbolId) -> StepResult {
        self.apply(Edit::DeleteSymbol { id })
    }

    /// Delete a method with its body, parameters and locals. Callers must
    /// already be gone.
    pub fn delete_method(&mut self, method: SymbolId) -> StepResult {
        if let Some(body) = self.symbol(method)?.body {
            self.remove(body)?;
        }
        for member in self.model.members(method).to_vec().into_iter().rev() {
            self.delete(member)?;
        }
        self.delete(method)
    }

    /// Delete a field with its initializer.
    pub fn delete_field(&mut self, field: SymbolId) -> StepResult {
        if let Some(init) = self.symbol(field)?.body {
            self.remove(init)?;
        }
        self.delete(field)
    }

    /// Delete a type and everything it declares, innermost first.
    pub fn delete_type(&mut self, ty: SymbolId) -> StepResult {
        for member in self.model.members(ty).to_vec().into_iter().rev() {
            match self.symbol(member)?.kind {
                SymbolKind::Method => self.delete_method(member)?,
                SymbolKind::Field => self.delete_field(member)?,
                SymbolKind::Type => self.delete_type(member)?,
                _ => self.delete(member)?,
            }
        }
        self.delete(ty)
    }

    // ── Trees ─────────────────────────────────────────────────────────

    /// Builder for a new detached subtree with fresh node ids.
    pub fn tree(&mut self) -> TreeBuilder<'_> {
        TreeBuilder {
            model: &mut *self.model,
            nodes: Vec::new(),
        }
    }

    /// Build a detached subtree in one go.
    pub fn build(&mut self, f: impl FnOnce(&mut TreeBuilder<'_>) -> NodeId) -> Subtree {
        let mut t = self.tree();
        let root = f(&mut t);
        t.finish(root)
    }

    pub fn clone_tree(
        &mut self,
        root: NodeId,
        remap: &HashMap<SymbolId, SymbolId>,
    ) -> Result<Subtree, StepError> {
        Ok(self.model.clone_subtree(root, remap)?)
    }

    /// Copy of a detached subtree under fresh node ids.
    pub fn reissue(&mut self, subtree: &Subtree) -> Subtree {
        let fresh: HashMap<NodeId, NodeId> = subtree
            .nodes
            .iter()
            .map(|n| (n.id, self.model.alloc_node_id()))
            .collect();
        let nodes = subtree
            .nodes
            .iter()
            .map(|n| {
                let mut node = n.clone();
                node.id = fresh[&n.id];
                node.children = n.children.iter().map(|c| fresh[c]).collect();
                node
            })
            .collect();
        Subtree {
            root: fresh[&subtree.root],
            nodes,
        }
    }

    /// Nodes calling `method`, in index order.
    pub fn call_sites(&mut self, method: SymbolId) -> Vec<NodeId> {
        self.index()
            .calls_to(method)
            .into_iter()
            .filter_map(|e| e.site.node())
            .collect()
    }

    /// Nodes reading or writing `symbol`.
    pub fn use_sites(&mut self, symbol: SymbolId) -> Vec<NodeId> {
        self.index()
            .users_of(symbol)
            .into_iter()
            .filter_map(|e| e.site.node())
            .collect()
    }

    /// Insert a statement into `block` at `index`.
    pub fn insert_statement(
        &mut self,
        block: NodeId,
        index: usize,
        subtree: Subtree,
    ) -> Result<NodeId, StepError> {
        self.insert(subtree, Anchor::Child { parent: block, index })
    }

    pub fn anchor_of(&self, node: NodeId) -> Result<Anchor, StepError> {
        self.model
            .position(node)
            .ok_or_else(|| StepError::plan(format!("{node} is not attached")))
    }

    pub fn insert(&mut self, subtree: Subtree, at: Anchor) -> Result<NodeId, StepError> {
        let root = subtree.root;
        self.apply(Edit::InsertSubtree { subtree, at })?;
        Ok(root)
    }

    pub fn remove(&mut self, root: NodeId) -> StepResult {
        self.apply(Edit::RemoveSubtree { root })
    }

    pub fn move_node(&mut self, root: NodeId, to: Anchor) -> StepResult {
        self.apply(Edit::MoveSubtree { root, to })
    }

    /// Replace `old` by a freshly built subtree at the same position.
    pub fn replace_with(
        &mut self,
        old: NodeId,
        build: impl FnOnce(&mut TreeBuilder<'_>) -> NodeId,
    ) -> Result<NodeId, StepError> {
        let at = self.anchor_of(old)?;
        self.remove(old)?;
        let subtree = {
            let mut t = self.tree();
            let root = build(&mut t);
            t.finish(root)
        };
        self.insert(subtree, at)
    }

    pub fn replace(&mut self, old: NodeId, subtree: Subtree) -> Result<NodeId, StepError> {
        let at = self.anchor_of(old)?;
        self.remove(old)?;
        self.insert(subtree, at)
    }

    /// Put `node` inside a new tree built around it. The builder receives
    /// the node (ids preserved) and returns the new root.
    pub fn wrap(
        &mut self,
        node: NodeId,
        build: impl FnOnce(&mut TreeBuilder<'_>, NodeId) -> NodeId,
    ) -> Result<NodeId, StepError> {
        let at = self.anchor_of(node)?;
        let inner = self.model.subtree(node)?;
        self.remove(node)?;
        let subtree = {
            let mut t = self.tree();
            let inner = t.graft(inner);
            let root = build(&mut t, inner);
            t.finish(root)
        };
        self.insert(subtree, at)
    }

    /// Replace `outer` by its `index`th child (ids preserved).
    pub fn unwrap(&mut self, outer: NodeId, index: usize) -> Result<NodeId, StepError> {
        let child = *self
            .node(outer)?
            .children
            .get(index)
            .ok_or_else(|| StepError::plan(format!("{outer} has no child {index}")))?;
        let at = self.anchor_of(outer)?;
        let kept = self.model.subtree(child)?;
        self.remove(outer)?;
        self.insert(kept, at)
    }

    pub fn rewire(&mut self, node: NodeId, kind: NodeKind, target: SymbolId) -> StepResult {
        let current = self.node(node)?;
        let from_target = current
            .symbol
            .ok_or_else(|| StepError::plan(format!("{node} references nothing")))?;
        let from = NodeRef::new(current.kind, from_target);
        let to = NodeRef::new(kind, target);
        if from == to {
            return Ok(());
        }
        self.apply(Edit::RewireReference { node, from, to })
    }

    /// The block body of `method`.
    pub fn body_block(&self, method: SymbolId) -> Result<NodeId, StepError> {
        let symbol = self.symbol(method)?;
        symbol
            .body
            .filter(|b| self.model.node(*b).is_some_and(|n| n.kind == NodeKind::Block))
            .ok_or_else(|| {
                StepError::plan(format!("{} has no block body", self.model.qualified_name(method)))
            })
    }

    /// The block body of `method`, created empty when absent.
    pub fn ensure_body(&mut self, method: SymbolId) -> Result<NodeId, StepError> {
        if self.symbol(method)?.body.is_none() {
            let subtree = {
                let mut t = self.tree();
                let block = t.block(Vec::new());
                t.finish(block)
            };
            self.insert(subtree, Anchor::Body(method))?;
        }
        self.body_block(method)
    }

    /// Append a statement to a block.
    pub fn append(&mut self, block: NodeId, subtree: Subtree) -> Result<NodeId, StepError> {
        let index = self.node(block)?.children.len();
        self.insert(subtree, Anchor::Child { parent: block, index })
    }

    /// Remove the statement containing `node`.
    pub fn remove_statement_of(&mut self, node: NodeId) -> StepResult {
        let (block, index) = self
            .model
            .statement_of(node)
            .ok_or_else(|| StepError::plan(format!("{node} is not inside a statement")))?;
        let statement = self.node(block)?.children[index];
        self.remove(statement)
    }

    /// Build an expression from its JSON description, resolving paths
    /// against the model.
    pub fn build_expr(&mut self, spec: &ExprSpec) -> Result<Subtree, StepError> {
        let resolved = resolve_spec(self.model, spec)?;
        let mut t = self.tree();
        let root = t.expr(&resolved);
        Ok(t.finish(root))
    }

    // ── Composition ───────────────────────────────────────────────────

    /// Run another recipe inside this transaction: its precondition against
    /// the current state, its steps logged under `Recipe/step`, then its
    /// postcondition. Returns what the nested steps bound.
    pub fn invoke(
        &mut self,
        recipe: &str,
        target: SymbolId,
        params: Params,
    ) -> Result<Bindings, StepError> {
        let descriptor = self
            .registry
            .lookup(recipe)
            .map_err(|e| StepError::plan(e.to_string()))?;
        let index = self.index();
        let analysis = Analysis {
            model: &*self.model,
            index: &index,
            target,
            params: &params,
            config: &self.config.analysis,
        };
        descriptor
            .shape
            .check(self.model, target)
            .and_then(|()| (descriptor.precondition)(&analysis))
            .map_err(|rejection| StepError::SubRecipe {
                recipe: descriptor.name().to_string(),
                rejection,
            })?;

        let scope = format!("{}{}/", self.scope, descriptor.name());
        let bindings = {
            let mut nested = StepCx {
                model: &mut *self.model,
                log: &mut *self.log,
                target,
                params: &params,
                registry: self.registry,
                config: self.config,
                cancel: self.cancel,
                scope,
                step: "",
                index: None,
                bindings: Bindings::new(),
            };
            nested.run_steps(descriptor.steps).map_err(|(_, e)| e)?;
            nested.bindings
        };

        let index = self.index();
        let verification = Verification {
            model: &*self.model,
            index: &index,
            target,
            params: &params,
            bindings: &bindings,
        };
        (descriptor.postcondition)(&verification).map_err(|rejection| {
            StepError::plan(format!("nested {} postcondition: {rejection}", descriptor.name()))
        })?;
        Ok(bindings)
    }
}

// ── Tree builder ──────────────────────────────────────────────────────

/// An expression description with paths already resolved.
#[derive(Debug, Clone)]
enum ResolvedExpr {
    Literal(String),
    Read(SymbolId),
    Call(SymbolId, Vec<ResolvedExpr>),
    New(SymbolId, Vec<ResolvedExpr>),
    Operator(String, Vec<ResolvedExpr>),
    This,
}

fn resolve_spec(model: &ProgramModel, spec: &ExprSpec) -> Result<ResolvedExpr, StepError> {
    let lookup = |path: &str, kinds: &[SymbolKind]| -> Result<SymbolId, StepError> {
        let path: SymbolPath = path
            .parse()
            .map_err(|e| StepError::plan(format!("bad path `{path}`: {e}")))?;
        let id = model.resolve(&path)?;
        if kinds.contains(&model.require(id)?.kind) {
            Ok(id)
        } else {
            Err(StepError::plan(format!("`{path}` cannot be used here")))
        }
    };
    let all = |args: &[ExprSpec]| -> Result<Vec<ResolvedExpr>, StepError> {
        args.iter().map(|a| resolve_spec(model, a)).collect()
    };
    Ok(match spec {
        ExprSpec::Literal { lit } => ResolvedExpr::Literal(match lit {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        ExprSpec::Reference { path } => ResolvedExpr::Read(lookup(
            path,
            &[SymbolKind::Field, SymbolKind::Parameter, SymbolKind::Local],
        )?),
        ExprSpec::Call { call, args } => {
            ResolvedExpr::Call(lookup(call, &[SymbolKind::Method])?, all(args)?)
        }
        ExprSpec::New { new, args } => {
            ResolvedExpr::New(lookup(new, &[SymbolKind::Type])?, all(args)?)
        }
        ExprSpec::Operator { op, args } => ResolvedExpr::Operator(op.clone(), all(args)?),
        ExprSpec::This { .. } => ResolvedExpr::This,
    })
}

/// Collects new nodes under fresh ids; `finish` hands them over as one
/// detached subtree.
pub struct TreeBuilder<'m> {
    model: &'m mut ProgramModel,
    nodes: Vec<Node>,
}

impl std::fmt::Debug for TreeBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl TreeBuilder<'_> {
    fn push(
        &mut self,
        kind: NodeKind,
        symbol: Option<SymbolId>,
        text: Option<&str>,
        children: Vec<NodeId>,
    ) -> NodeId {
        let id = self.model.alloc_node_id();
        let mut node = Node::new(id, kind).with_children(children);
        node.symbol = symbol;
        node.text = text.map(str::to_string);
        self.nodes.push(node);
        id
    }

    pub fn lit(&mut self, value: &str) -> NodeId {
        self.push(NodeKind::Literal, None, Some(value), Vec::new())
    }

    pub fn read(&mut self, symbol: SymbolId) -> NodeId {
        self.push(NodeKind::Reference, Some(symbol), None, Vec::new())
    }

    pub fn this(&mut self) -> NodeId {
        self.push(NodeKind::This, None, None, Vec::new())
    }

    pub fn call(&mut self, method: SymbolId, args: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Call, Some(method), None, args)
    }

    pub fn new_instance(&mut self, ty: SymbolId, args: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::New, Some(ty), None, args)
    }

    pub fn op(&mut self, operator: &str, operands: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Operator, None, Some(operator), operands)
    }

    pub fn select(&mut self, receiver: NodeId, member: NodeId) -> NodeId {
        self.push(NodeKind::Select, None, None, vec![receiver, member])
    }

    pub fn cast(&mut self, ty: SymbolId, expr: NodeId) -> NodeId {
        self.push(NodeKind::Cast, Some(ty), None, vec![expr])
    }

    pub fn assign(&mut self, target: SymbolId, value: NodeId) -> NodeId {
        self.push(NodeKind::Assign, Some(target), None, vec![value])
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Return, None, None, value.into_iter().collect())
    }

    pub fn brk(&mut self) -> NodeId {
        self.push(NodeKind::Break, None, None, Vec::new())
    }

    pub fn throw(&mut self, value: NodeId) -> NodeId {
        self.push(NodeKind::Throw, None, None, vec![value])
    }

    pub fn assert(&mut self, condition: NodeId) -> NodeId {
        self.push(NodeKind::Assert, None, None, vec![condition])
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Block, None, None, statements)
    }

    pub fn cond(
        &mut self,
        condition: NodeId,
        then: Vec<NodeId>,
        otherwise: Option<Vec<NodeId>>,
    ) -> NodeId {
        let then = self.block(then);
        let mut children = vec![condition, then];
        if let Some(otherwise) = otherwise {
            children.push(self.block(otherwise));
        }
        self.push(NodeKind::Conditional, None, None, children)
    }

    /// Conditional over already-built blocks.
    pub fn cond_blocks(
        &mut self,
        condition: NodeId,
        then: NodeId,
        otherwise: Option<NodeId>,
    ) -> NodeId {
        let mut children = vec![condition, then];
        children.extend(otherwise);
        self.push(NodeKind::Conditional, None, None, children)
    }

    pub fn while_loop(&mut self, condition: NodeId, body: Vec<NodeId>) -> NodeId {
        let body = self.block(body);
        self.push(NodeKind::Loop, None, None, vec![condition, body])
    }

    pub fn try_catch(&mut self, body: Vec<NodeId>, handler: Vec<NodeId>) -> NodeId {
        let body = self.block(body);
        let handler = self.block(handler);
        self.push(NodeKind::Try, None, None, vec![body, handler])
    }

    /// Take over the nodes of a detached subtree and return its root.
    pub fn graft(&mut self, subtree: Subtree) -> NodeId {
        self.nodes.extend(subtree.nodes);
        subtree.root
    }

    fn expr(&mut self, spec: &ResolvedExpr) -> NodeId {
        match spec {
            ResolvedExpr::Literal(value) => self.lit(value),
            ResolvedExpr::Read(symbol) => self.read(*symbol),
            ResolvedExpr::This => self.this(),
            ResolvedExpr::Call(method, args) => {
                let args = args.iter().map(|a| self.expr(a)).collect();
                self.call(*method, args)
            }
            ResolvedExpr::New(ty, args) => {
                let args = args.iter().map(|a| self.expr(a)).collect();
                self.new_instance(*ty, args)
            }
            ResolvedExpr::Operator(op, args) => {
                let args = args.iter().map(|a| self.expr(a)).collect();
                self.op(op, args)
            }
        }
    }

    pub fn finish(self, root: NodeId) -> Subtree {
        Subtree {
            root,
            nodes: self.nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_model::ModelBuilder;

    fn harness(f: impl FnOnce(&mut StepCx<'_>, SymbolId)) -> (ProgramModel, EditLog) {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let field = b.field(ty, "f");
        let m = b.method(ty, "m");
        let read = b.read(field);
        let ret = b.ret(Some(read));
        b.body(m, vec![ret]);
        let mut model = b.build().unwrap();
        let mut log = EditLog::new("Test", "app::T::m".into(), Params::new());
        let registry = Registry::default();
        let config = RecastConfig::default();
        let cancel = CancelToken::new();
        let params = Params::new();
        {
            let mut cx = StepCx::new(&mut model, &mut log, m, &params, &registry, &config, &cancel);
            f(&mut cx, m);
        }
        (model, log)
    }

    #[test]
    fn wrap_preserves_node_ids() {
        let (model, log) = harness(|cx, m| {
            let ret = cx.model().body_statements(m)[0];
            let read = cx.node(ret).unwrap().children[0];
            let ty = cx.model().owning_type(m).unwrap();
            let outer = cx.wrap(read, |t, inner| t.cast(ty, inner)).unwrap();
            assert_eq!(cx.node(outer).unwrap().children, vec![read]);
        });
        assert!(recast_model::check_well_formed(&model).is_empty());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn unwrap_keeps_the_chosen_child() {
        let (model, _) = harness(|cx, m| {
            let ret = cx.model().body_statements(m)[0];
            let read = cx.node(ret).unwrap().children[0];
            let ty = cx.model().owning_type(m).unwrap();
            let outer = cx.wrap(read, |t, inner| t.cast(ty, inner)).unwrap();
            let kept = cx.unwrap(outer, 0).unwrap();
            assert_eq!(kept, read);
        });
        assert!(recast_model::check_well_formed(&model).is_empty());
    }

    #[test]
    fn parameters_are_inserted_before_locals() {
        let (model, _) = harness(|cx, m| {
            cx.add_local(m, "tmp", None).unwrap();
            cx.add_param(m, "a", None, None).unwrap();
            cx.add_param(m, "first", None, Some(0)).unwrap();
        });
        let m = model.resolve(&"app::T::m".parse().unwrap()).unwrap();
        let names: Vec<_> = model
            .members(m)
            .iter()
            .map(|id| model.symbol(*id).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["first", "a", "tmp"]);
    }

    #[test]
    fn cancelled_context_refuses_edits() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let mut model = b.build().unwrap();
        let mut log = EditLog::new("Test", "app::T".into(), Params::new());
        let registry = Registry::default();
        let config = RecastConfig::default();
        let cancel = CancelToken::new();
        let params = Params::new();
        let mut cx = StepCx::new(&mut model, &mut log, ty, &params, &registry, &config, &cancel);
        cancel.cancel();
        assert_eq!(cx.rename(ty, "U").unwrap_err(), StepError::Cancelled);
    }
}
