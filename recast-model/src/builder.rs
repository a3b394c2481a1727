// Fluent construction of program models for front-ends and tests.
//
// Expressions and statements are created detached and become attached when
// handed to a parent (`assign`, `cond`, `body`, ...). `build` runs the
// well-formedness check, so every node must end up attached exactly once.

use crate::model::{Node, Parent, ProgramModel, Symbol};
use crate::validate::check_well_formed;
use crate::{ModelError, Modifiers, NodeId, NodeKind, SymbolId, SymbolKind, Visibility};

#[derive(Debug, Default)]
pub struct ModelBuilder {
    model: ProgramModel,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Symbols ───────────────────────────────────────────────────────

    fn declare(&mut self, owner: Option<SymbolId>, kind: SymbolKind, name: &str) -> SymbolId {
        let id = self.model.alloc_symbol_id();
        let mut symbol = Symbol::new(id, kind, name);
        symbol.owner = owner;
        self.model.symbols.insert(id, symbol);
        match owner {
            Some(owner) => self.model.members.entry(owner).or_default().push(id),
            None => self.model.roots.push(id),
        }
        id
    }

    pub fn module(&mut self, name: &str) -> SymbolId {
        self.declare(None, SymbolKind::Module, name)
    }

    pub fn ty(&mut self, owner: SymbolId, name: &str) -> SymbolId {
        self.declare(Some(owner), SymbolKind::Type, name)
    }

    pub fn subtype(&mut self, owner: SymbolId, name: &str, supertype: SymbolId) -> SymbolId {
        let id = self.ty(owner, name);
        self.symbol_mut(id).supertype = Some(supertype);
        id
    }

    pub fn field(&mut self, owner: SymbolId, name: &str) -> SymbolId {
        let id = self.declare(Some(owner), SymbolKind::Field, name);
        self.symbol_mut(id).modifiers.visibility = Visibility::Private;
        id
    }

    pub fn method(&mut self, owner: SymbolId, name: &str) -> SymbolId {
        self.declare(Some(owner), SymbolKind::Method, name)
    }

    /// Constructor of `ty`, named after it.
    pub fn constructor(&mut self, ty: SymbolId) -> SymbolId {
        let name = self.model.symbols[&ty].name.clone();
        let id = self.declare(Some(ty), SymbolKind::Method, &name);
        self.symbol_mut(id).modifiers.is_constructor = true;
        id
    }

    pub fn param(&mut self, method: SymbolId, name: &str) -> SymbolId {
        self.declare(Some(method), SymbolKind::Parameter, name)
    }

    pub fn local(&mut self, method: SymbolId, name: &str) -> SymbolId {
        self.declare(Some(method), SymbolKind::Local, name)
    }

    pub fn typed(&mut self, symbol: SymbolId, ty: SymbolId) -> &mut Self {
        self.symbol_mut(symbol).type_ref = Some(ty);
        self
    }

    pub fn modifiers(&mut self, symbol: SymbolId, f: impl FnOnce(&mut Modifiers)) -> &mut Self {
        f(&mut self.symbol_mut(symbol).modifiers);
        self
    }

    pub fn tag(&mut self, symbol: SymbolId, key: &str, value: &str) -> &mut Self {
        self.symbol_mut(symbol)
            .tags
            .insert(key.to_string(), value.to_string());
        self
    }

    fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        self.model
            .symbols
            .get_mut(&id)
            .unwrap_or_else(|| panic!("builder symbol {id} was never declared"))
    }

    // ── Nodes ─────────────────────────────────────────────────────────

    fn node(
        &mut self,
        kind: NodeKind,
        symbol: Option<SymbolId>,
        text: Option<&str>,
        children: Vec<NodeId>,
    ) -> NodeId {
        let id = self.model.alloc_node_id();
        for child in &children {
            self.model.parents.insert(*child, Parent::Node(id));
        }
        let mut node = Node::new(id, kind).with_children(children);
        node.symbol = symbol;
        node.text = text.map(str::to_string);
        self.model.nodes.insert(id, node);
        id
    }

    pub fn lit(&mut self, value: &str) -> NodeId {
        self.node(NodeKind::Literal, None, Some(value), Vec::new())
    }

    pub fn read(&mut self, symbol: SymbolId) -> NodeId {
        self.node(NodeKind::Reference, Some(symbol), None, Vec::new())
    }

    pub fn this(&mut self) -> NodeId {
        self.node(NodeKind::This, None, None, Vec::new())
    }

    pub fn call(&mut self, method: SymbolId, args: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::Call, Some(method), None, args)
    }

    pub fn new_instance(&mut self, ty: SymbolId, args: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::New, Some(ty), None, args)
    }

    pub fn op(&mut self, operator: &str, operands: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::Operator, None, Some(operator), operands)
    }

    /// `receiver.member`, where `member` is a reference, call or assignment.
    pub fn select(&mut self, receiver: NodeId, member: NodeId) -> NodeId {
        self.node(NodeKind::Select, None, None, vec![receiver, member])
    }

    pub fn cast(&mut self, ty: SymbolId, expr: NodeId) -> NodeId {
        self.node(NodeKind::Cast, Some(ty), None, vec![expr])
    }

    pub fn assign(&mut self, target: SymbolId, value: NodeId) -> NodeId {
        self.node(NodeKind::Assign, Some(target), None, vec![value])
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.node(NodeKind::Return, None, None, value.into_iter().collect())
    }

    pub fn brk(&mut self) -> NodeId {
        self.node(NodeKind::Break, None, None, Vec::new())
    }

    pub fn throw(&mut self, value: NodeId) -> NodeId {
        self.node(NodeKind::Throw, None, None, vec![value])
    }

    pub fn assert(&mut self, condition: NodeId) -> NodeId {
        self.node(NodeKind::Assert, None, None, vec![condition])
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::Block, None, None, statements)
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
        self.node(NodeKind::Conditional, None, None, children)
    }

    pub fn while_loop(&mut self, condition: NodeId, body: Vec<NodeId>) -> NodeId {
        let body = self.block(body);
        self.node(NodeKind::Loop, None, None, vec![condition, body])
    }

    pub fn try_catch(&mut self, body: Vec<NodeId>, handler: Vec<NodeId>) -> NodeId {
        let body = self.block(body);
        let handler = self.block(handler);
        self.node(NodeKind::Try, None, None, vec![body, handler])
    }

    /// Give `method` a block body made of `statements`. Returns the block.
    pub fn body(&mut self, method: SymbolId, statements: Vec<NodeId>) -> NodeId {
        let block = self.block(statements);
        self.anchor(method, block);
        block
    }

    /// Give `field` an initializer expression.
    pub fn init(&mut self, field: SymbolId, expr: NodeId) {
        self.anchor(field, expr);
    }

    fn anchor(&mut self, symbol: SymbolId, root: NodeId) {
        self.symbol_mut(symbol).body = Some(root);
        self.model.parents.insert(root, Parent::Body(symbol));
    }

    /// Finish the model, rejecting anything that is not well-formed.
    pub fn build(self) -> crate::Result<ProgramModel> {
        let violations = check_well_formed(&self.model);
        if violations.is_empty() {
            Ok(self.model)
        } else {
            Err(ModelError::Snapshot(
                violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_nodes_fail_the_build() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        b.method(ty, "m");
        b.lit("42");
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("detached"), "{err}");
    }

    #[test]
    fn constructor_takes_type_name() {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "Point");
        let ctor = b.constructor(ty);
        let model = b.build().unwrap();
        assert_eq!(model.symbol(ctor).unwrap().name, "Point");
        assert_eq!(model.constructors(ty), vec![ctor]);
        assert!(model.methods(ty).is_empty());
    }
}
