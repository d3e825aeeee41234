// builder.rs — System builder: name resolution and lowering
//
// Walks the surface AST, resolves identifiers against layered scopes,
// lowers expressions into the semantic pool and assembles the `System`.
// Leaf and access expressions receive their construction-time types here;
// operator expressions stay `VOID` until the type checker annotates them.
//
// Preconditions: `doc` is a well-formed AST from the parser.
// Postconditions: returns the system, the initial type table and all
//   accumulated diagnostics. Building continues past errors.
// Failure modes: duplicate declarations, unknown names, arity mismatches
//   produce `Diagnostic` entries; affected expressions degrade to typed
//   placeholders.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{self, Ident};
use crate::diag::Diagnostic;
use crate::eval::Interpreter;
use crate::ir::{
    ExprId, ExprKind, Frame, FrameEntry, Function, Instance, Prefixes, Query, State, Stmt, SymbolId,
    System, Template, Transition, Type, TypeMap, Variable,
};

/// Result of building a system from a document.
#[derive(Debug)]
pub struct BuildResult {
    pub system: System,
    pub types: TypeMap,
    pub diagnostics: Vec<Diagnostic>,
}

/// Build a system from a parsed document.
pub fn build(doc: &ast::Document) -> BuildResult {
    let mut system = System::new();
    let mut types = TypeMap::new();
    let diagnostics = {
        let mut lowerer = Lowerer::new(&mut system, &mut types);
        lowerer.run(doc);
        lowerer.finish()
    };
    BuildResult {
        system,
        types,
        diagnostics,
    }
}

/// Lower query lines against an already-built system, using its global
/// scope. Returns lowering diagnostics; queries are appended to the system.
pub fn add_queries(
    system: &mut System,
    types: &mut TypeMap,
    queries: &[ast::QueryDecl],
) -> Vec<Diagnostic> {
    let scope = system.globals_by_name.clone();
    let mut lowerer = Lowerer::new(system, types);
    lowerer.scopes = vec![scope];
    for query in queries {
        let expr = lowerer.lower_expr(&query.expr);
        lowerer.system.queries.push(Query {
            quant: query.quant,
            expr,
            span: query.span,
        });
    }
    lowerer.finish()
}

// ── Internal context ────────────────────────────────────────────────────────

struct Lowerer<'a> {
    system: &'a mut System,
    types: &'a mut TypeMap,
    diagnostics: Vec<Diagnostic>,
    scopes: Vec<HashMap<String, SymbolId>>,
    templates_by_name: HashMap<String, usize>,
    instances_by_name: HashMap<String, usize>,
}

impl<'a> Lowerer<'a> {
    fn new(system: &'a mut System, types: &'a mut TypeMap) -> Self {
        Self {
            system,
            types,
            diagnostics: Vec::new(),
            scopes: vec![HashMap::new()],
            templates_by_name: HashMap::new(),
            instances_by_name: HashMap::new(),
        }
    }

    fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn error(&mut self, span: ast::Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(span, message));
    }

    // ── Scopes ──

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Ident, ty: Type) -> SymbolId {
        let sym = self.system.symbols.add(name.name.clone(), ty);
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        if scope.insert(name.name.clone(), sym).is_some() {
            self.error(
                name.span,
                format!("duplicate declaration of '{}'", name.name),
            );
        }
        sym
    }

    fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    // ── Top level ──

    fn run(&mut self, doc: &ast::Document) {
        for decl in &doc.decls {
            match decl {
                ast::Decl::Var(var) => {
                    let mut vars = Vec::new();
                    self.lower_var_decl(var, &mut vars);
                    self.system.globals.extend(vars);
                }
                ast::Decl::Func(func) => {
                    let lowered = self.lower_function(func);
                    self.system.functions.push(lowered);
                }
                ast::Decl::Template(template) => self.lower_template(template),
                ast::Decl::Inst(inst) => self.lower_instance(inst),
                ast::Decl::System(line) => self.lower_system_line(line),
            }
        }
        self.system.globals_by_name = self.scopes[0].clone();
    }

    // ── Types ──

    /// Lower a type specifier, without declarator dimensions or the
    /// `const` prefix (applied by `declared_type` on the outermost layer).
    fn lower_base(&mut self, spec: &ast::TypeSpec) -> Type {
        match &spec.kind {
            ast::TypeSpecKind::Int(None) => Type::int(),
            ast::TypeSpecKind::Int(Some((lo, hi))) => {
                let lo = self.lower_expr(lo);
                let hi = self.lower_expr(hi);
                Type::bounded_int(lo, hi)
            }
            ast::TypeSpecKind::Bool => Type::boolean(),
            ast::TypeSpecKind::Clock => Type::clock(),
            ast::TypeSpecKind::Chan { urgent, broadcast } => {
                Type::channel().with_prefixes(Prefixes {
                    urgent: *urgent,
                    broadcast: *broadcast,
                    ..Prefixes::default()
                })
            }
            ast::TypeSpecKind::Struct(fields) => {
                let mut frame = Frame::default();
                for field in fields {
                    let base = self.lower_base(&field.spec);
                    for declarator in &field.declarators {
                        let ty =
                            self.wrap_dims(base.clone(), &declarator.array_dims, field.spec.constant);
                        frame.entries.push(FrameEntry {
                            name: Some(declarator.name.name.clone()),
                            ty,
                        });
                    }
                }
                let frame = self.system.frames.add(frame);
                Type::record(frame)
            }
            ast::TypeSpecKind::Void => Type::void(),
        }
    }

    /// Wrap array dimensions around a base type and set the outermost
    /// `const` prefix.
    fn wrap_dims(&mut self, base: Type, dims: &[ast::Expr], constant: bool) -> Type {
        let mut ty = base;
        for dim in dims.iter().rev() {
            let size = self.lower_expr(dim);
            ty = Type::array(size, ty);
        }
        ty.prefixes.constant = constant;
        ty
    }

    fn declared_type(&mut self, base: &Type, declarator: &ast::Declarator, constant: bool) -> Type {
        self.wrap_dims(base.clone(), &declarator.array_dims, constant)
    }

    // ── Variables ──

    fn lower_var_decl(&mut self, decl: &ast::VarDecl, out: &mut Vec<Variable>) {
        let base = self.lower_base(&decl.spec);
        for declarator in &decl.declarators {
            let ty = self.declared_type(&base, declarator, decl.spec.constant);
            let symbol = self.declare(&declarator.name, ty);
            let init = declarator.init.as_ref().map(|e| self.lower_expr(e));
            if decl.spec.constant {
                if let Some(init) = init {
                    let value = Interpreter::new(&self.system.exprs, &self.system.constants)
                        .evaluate(init)
                        .ok();
                    if let Some(value) = value {
                        self.system.constants.insert(symbol, value);
                    }
                }
            }
            out.push(Variable { symbol, init });
        }
    }

    // ── Functions ──

    fn lower_params(&mut self, params: &[ast::Param]) -> (Frame, Vec<(Ident, Type)>) {
        let mut frame = Frame::default();
        let mut lowered = Vec::new();
        for param in params {
            let base = self.lower_base(&param.spec);
            let mut ty = self.wrap_dims(base, &param.array_dims, param.spec.constant);
            ty.prefixes.reference = param.reference;
            frame.entries.push(FrameEntry {
                name: Some(param.name.name.clone()),
                ty: ty.clone(),
            });
            lowered.push((param.name.clone(), ty));
        }
        (frame, lowered)
    }

    fn lower_function(&mut self, func: &ast::FunctionDecl) -> Function {
        let ret = self.lower_base(&func.ret);
        let (frame, params) = self.lower_params(&func.params);
        let frame = self.system.frames.add(frame);
        let symbol = self.declare(&func.name, Type::function(frame, ret));

        self.push_scope();
        for (name, ty) in &params {
            self.declare(name, ty.clone());
        }
        let body = func.body.iter().map(|s| self.lower_stmt(s)).collect();
        self.pop_scope();

        Function { symbol, body }
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt) -> Stmt {
        match stmt {
            ast::Stmt::Empty(_) => Stmt::Empty,
            ast::Stmt::Expr(e) => Stmt::Expr(self.lower_expr(e)),
            ast::Stmt::Decl(decl) => self.lower_local_decl(decl),
            ast::Stmt::Block(stmts) => {
                self.push_scope();
                let lowered = stmts.iter().map(|s| self.lower_stmt(s)).collect();
                self.pop_scope();
                Stmt::Block(lowered)
            }
            ast::Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => Stmt::If {
                cond: self.lower_expr(cond),
                then_branch: Box::new(self.lower_stmt(then_branch)),
                else_branch: else_branch
                    .as_ref()
                    .map(|s| Box::new(self.lower_stmt(s))),
            },
            ast::Stmt::While { cond, body } => Stmt::While {
                cond: self.lower_expr(cond),
                body: Box::new(self.lower_stmt(body)),
            },
            ast::Stmt::DoWhile { body, cond } => Stmt::DoWhile {
                body: Box::new(self.lower_stmt(body)),
                cond: self.lower_expr(cond),
            },
            ast::Stmt::For {
                init,
                cond,
                step,
                body,
            } => Stmt::For {
                init: self.lower_expr(init),
                cond: self.lower_expr(cond),
                step: self.lower_expr(step),
                body: Box::new(self.lower_stmt(body)),
            },
            ast::Stmt::Switch { cond, arms } => Stmt::Switch {
                cond: self.lower_expr(cond),
                arms: arms.iter().map(|s| self.lower_stmt(s)).collect(),
            },
            ast::Stmt::Case { cond, body } => Stmt::Case {
                cond: self.lower_expr(cond),
                body: body.iter().map(|s| self.lower_stmt(s)).collect(),
            },
            ast::Stmt::DefaultCase { body, .. } => Stmt::DefaultCase {
                body: body.iter().map(|s| self.lower_stmt(s)).collect(),
            },
            ast::Stmt::Break(_) => Stmt::Break,
            ast::Stmt::Continue(_) => Stmt::Continue,
            ast::Stmt::Return { value, .. } => {
                Stmt::Return(value.as_ref().map(|e| self.lower_expr(e)))
            }
        }
    }

    /// Function-local declarations become symbols plus initializing
    /// assignment statements. Local constants go straight into the
    /// valuation when computable.
    fn lower_local_decl(&mut self, decl: &ast::VarDecl) -> Stmt {
        let base = self.lower_base(&decl.spec);
        let mut stmts = Vec::new();
        for declarator in &decl.declarators {
            let ty = self.declared_type(&base, declarator, decl.spec.constant);
            let symbol = self.declare(&declarator.name, ty.clone());
            let init = declarator.init.as_ref().map(|e| self.lower_expr(e));
            if decl.spec.constant {
                if let Some(init) = init {
                    let value = Interpreter::new(&self.system.exprs, &self.system.constants)
                        .evaluate(init)
                        .ok();
                    if let Some(value) = value {
                        self.system.constants.insert(symbol, value);
                    }
                }
            } else if let Some(init) = init {
                let span = declarator.name.span;
                let lhs = self.system.exprs.add(ExprKind::Ident(symbol), vec![], span);
                self.types.set(lhs, ty);
                let assign = self
                    .system
                    .exprs
                    .add(ExprKind::Assign, vec![lhs, init], span);
                self.types.set(assign, Type::void());
                stmts.push(Stmt::Expr(assign));
            }
        }
        if stmts.is_empty() {
            Stmt::Empty
        } else {
            Stmt::Block(stmts)
        }
    }

    // ── Templates ──

    fn lower_template(&mut self, template: &ast::TemplateDecl) {
        let symbol = self.declare(&template.name, Type::void());
        let (frame, params) = self.lower_params(&template.params);
        let params_frame = self.system.frames.add(frame);

        self.push_scope();
        let param_syms: Vec<SymbolId> = params
            .iter()
            .map(|(name, ty)| self.declare(name, ty.clone()))
            .collect();

        let mut locals = Vec::new();
        let mut functions = Vec::new();
        for decl in &template.decls {
            match decl {
                ast::Decl::Var(var) => self.lower_var_decl(var, &mut locals),
                ast::Decl::Func(func) => {
                    let lowered = self.lower_function(func);
                    functions.push(lowered);
                }
                _ => {}
            }
        }

        let mut state_index = HashMap::new();
        let mut states = Vec::new();
        for (idx, location) in template.states.iter().enumerate() {
            let state_sym = self.declare(&location.name, Type::void());
            state_index.insert(location.name.name.clone(), idx);
            let invariant = location.invariant.as_ref().map(|e| self.lower_expr(e));
            states.push(State {
                symbol: state_sym,
                invariant,
            });
        }

        let init = template.init.as_ref().and_then(|name| {
            let idx = state_index.get(&name.name).copied();
            if idx.is_none() {
                self.error(name.span, format!("unknown state '{}'", name.name));
            }
            idx
        });

        let mut transitions = Vec::new();
        for trans in &template.transitions {
            let source = state_index.get(&trans.source.name).copied();
            if source.is_none() {
                self.error(
                    trans.source.span,
                    format!("unknown state '{}'", trans.source.name),
                );
            }
            let target = state_index.get(&trans.target.name).copied();
            if target.is_none() {
                self.error(
                    trans.target.span,
                    format!("unknown state '{}'", trans.target.name),
                );
            }
            let (source, target) = match (source, target) {
                (Some(s), Some(t)) => (s, t),
                _ => continue,
            };

            let guard = trans.guard.as_ref().map(|e| self.lower_expr(e));
            let sync = trans.sync.as_ref().map(|label| {
                let channel = self.lower_expr(&label.channel);
                let sync = self
                    .system
                    .exprs
                    .add(ExprKind::Sync(label.dir), vec![channel], label.span);
                self.types.set(sync, Type::void());
                sync
            });
            let assign = trans.assign.as_ref().map(|e| self.lower_expr(e));
            transitions.push(Transition {
                source,
                target,
                guard,
                sync,
                assign,
                span: trans.span,
            });
        }
        self.pop_scope();

        self.templates_by_name
            .insert(template.name.name.clone(), self.system.templates.len());
        self.system.templates.push(Template {
            symbol,
            params: param_syms,
            params_frame,
            locals,
            functions,
            states,
            init,
            transitions,
        });
    }

    // ── Instantiation ──

    fn lower_instance(&mut self, inst: &ast::InstanceDecl) {
        let template_idx = match self.templates_by_name.get(&inst.template.name) {
            Some(&idx) => idx,
            None => {
                self.error(
                    inst.template.span,
                    format!("unknown template '{}'", inst.template.name),
                );
                return;
            }
        };

        let params = self.system.templates[template_idx].params.clone();
        if params.len() != inst.args.len() {
            self.error(
                inst.span,
                format!(
                    "wrong number of arguments to template '{}': expected {}, found {}",
                    inst.template.name,
                    params.len(),
                    inst.args.len()
                ),
            );
            return;
        }

        let mapping: Vec<(SymbolId, ExprId)> = params
            .into_iter()
            .zip(inst.args.iter())
            .map(|(param, arg)| (param, self.lower_expr(arg)))
            .collect();

        let symbol = self.declare(&inst.name, Type::void());
        self.instances_by_name
            .insert(inst.name.name.clone(), self.system.instances.len());
        self.system.instances.push(Instance {
            symbol,
            template: template_idx,
            mapping,
            span: inst.span,
        });
    }

    fn lower_system_line(&mut self, line: &ast::SystemLine) {
        for name in &line.processes {
            if let Some(&idx) = self.instances_by_name.get(&name.name) {
                self.system.processes.push(idx);
            } else if let Some(&template_idx) = self.templates_by_name.get(&name.name) {
                if self.system.templates[template_idx].params.is_empty() {
                    // A parameterless template named directly becomes an
                    // implicit instance.
                    let symbol = self.system.templates[template_idx].symbol;
                    let idx = self.system.instances.len();
                    self.system.instances.push(Instance {
                        symbol,
                        template: template_idx,
                        mapping: Vec::new(),
                        span: name.span,
                    });
                    self.system.processes.push(idx);
                } else {
                    self.error(
                        name.span,
                        format!(
                            "template '{}' has parameters and must be instantiated",
                            name.name
                        ),
                    );
                }
            } else {
                self.error(name.span, format!("unknown process '{}'", name.name));
            }
        }
    }

    // ── Expressions ──

    fn lower_expr(&mut self, expr: &ast::Expr) -> ExprId {
        let span = expr.span;
        match &expr.kind {
            ast::ExprKind::Int(value) => {
                let id = self.system.exprs.add(ExprKind::Constant(*value), vec![], span);
                self.types.set(id, Type::int());
                id
            }
            ast::ExprKind::Bool(value) => {
                let id = self
                    .system
                    .exprs
                    .add(ExprKind::Constant(*value as i32), vec![], span);
                self.types.set(id, Type::boolean());
                id
            }
            ast::ExprKind::Ident(name) => match self.lookup(name) {
                Some(symbol) => {
                    let ty = self.system.symbols.symbol(symbol).ty.clone();
                    let id = self.system.exprs.add(ExprKind::Ident(symbol), vec![], span);
                    self.types.set(id, ty);
                    id
                }
                None => {
                    self.error(span, format!("unknown identifier '{}'", name));
                    let id = self.system.exprs.add(ExprKind::Constant(0), vec![], span);
                    self.types.set(id, Type::int());
                    id
                }
            },
            ast::ExprKind::Index(base, index) => {
                let base_id = self.lower_expr(base);
                let index_id = self.lower_expr(index);
                let ty = match self.types.get(base_id).array_sub() {
                    Some(sub) => sub.clone(),
                    None => {
                        self.error(base.span, "subscripted value is not an array");
                        Type::void()
                    }
                };
                let id = self
                    .system
                    .exprs
                    .add(ExprKind::Index, vec![base_id, index_id], span);
                self.types.set(id, ty);
                id
            }
            ast::ExprKind::Field(base, field) => {
                let base_id = self.lower_expr(base);
                let (index, ty) = match self.types.get(base_id).record_frame() {
                    Some(frame_id) => {
                        let frame = self.system.frames.frame(frame_id);
                        match frame.index_of(&field.name) {
                            Some(idx) => (idx as u32, frame.entries[idx].ty.clone()),
                            None => {
                                self.error(
                                    field.span,
                                    format!("unknown field '{}'", field.name),
                                );
                                (0, Type::void())
                            }
                        }
                    }
                    None => {
                        self.error(field.span, format!("expression has no field '{}'", field.name));
                        (0, Type::void())
                    }
                };
                let id = self
                    .system
                    .exprs
                    .add(ExprKind::Field(index), vec![base_id], span);
                self.types.set(id, ty);
                id
            }
            ast::ExprKind::Call(callee, args) => {
                let callee_id = self.lower_expr(callee);
                let ret = match &self.types.get(callee_id).kind {
                    crate::ir::TypeKind::Function { ret, .. } => (**ret).clone(),
                    _ => Type::void(),
                };
                let mut sub = vec![callee_id];
                for arg in args {
                    sub.push(self.lower_expr(arg));
                }
                let id = self.system.exprs.add(ExprKind::Call, sub, span);
                self.types.set(id, ret);
                id
            }
            ast::ExprKind::Unary(op, operand) => {
                let kind = match op {
                    ast::UnOp::Not => ExprKind::Not,
                    ast::UnOp::Neg => ExprKind::Neg,
                };
                let operand = self.lower_expr(operand);
                self.add_operator(kind, vec![operand], span)
            }
            ast::ExprKind::Binary(op, lhs, rhs) => {
                let kind = match op {
                    ast::BinOp::Add => ExprKind::Add,
                    ast::BinOp::Sub => ExprKind::Sub,
                    ast::BinOp::Mul => ExprKind::Mul,
                    ast::BinOp::Div => ExprKind::Div,
                    ast::BinOp::Mod => ExprKind::Mod,
                    ast::BinOp::BitAnd => ExprKind::BitAnd,
                    ast::BinOp::BitOr => ExprKind::BitOr,
                    ast::BinOp::BitXor => ExprKind::BitXor,
                    ast::BinOp::Shl => ExprKind::Shl,
                    ast::BinOp::Shr => ExprKind::Shr,
                    ast::BinOp::And => ExprKind::And,
                    ast::BinOp::Or => ExprKind::Or,
                    ast::BinOp::Min => ExprKind::Min,
                    ast::BinOp::Max => ExprKind::Max,
                    ast::BinOp::Lt => ExprKind::Lt,
                    ast::BinOp::Le => ExprKind::Le,
                    ast::BinOp::Eq => ExprKind::Eq,
                    ast::BinOp::Ne => ExprKind::Ne,
                    ast::BinOp::Ge => ExprKind::Ge,
                    ast::BinOp::Gt => ExprKind::Gt,
                };
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.add_operator(kind, vec![lhs, rhs], span)
            }
            ast::ExprKind::Assign(op, lhs, rhs) => {
                let kind = match op {
                    ast::AssignOp::Assign => ExprKind::Assign,
                    ast::AssignOp::Add => ExprKind::AddAssign,
                    ast::AssignOp::Sub => ExprKind::SubAssign,
                    ast::AssignOp::Mul => ExprKind::MulAssign,
                    ast::AssignOp::Div => ExprKind::DivAssign,
                    ast::AssignOp::Mod => ExprKind::ModAssign,
                    ast::AssignOp::And => ExprKind::AndAssign,
                    ast::AssignOp::Or => ExprKind::OrAssign,
                    ast::AssignOp::Xor => ExprKind::XorAssign,
                    ast::AssignOp::Shl => ExprKind::ShlAssign,
                    ast::AssignOp::Shr => ExprKind::ShrAssign,
                };
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.add_operator(kind, vec![lhs, rhs], span)
            }
            ast::ExprKind::IncDec(op, operand) => {
                let kind = match op {
                    ast::IncDecOp::PostInc => ExprKind::PostInc,
                    ast::IncDecOp::PreInc => ExprKind::PreInc,
                    ast::IncDecOp::PostDec => ExprKind::PostDec,
                    ast::IncDecOp::PreDec => ExprKind::PreDec,
                };
                let operand = self.lower_expr(operand);
                self.add_operator(kind, vec![operand], span)
            }
            ast::ExprKind::Ternary(cond, then_e, else_e) => {
                let cond = self.lower_expr(cond);
                let then_e = self.lower_expr(then_e);
                let else_e = self.lower_expr(else_e);
                self.add_operator(ExprKind::Ternary, vec![cond, then_e, else_e], span)
            }
            ast::ExprKind::Comma(lhs, rhs) => {
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.add_operator(ExprKind::Comma, vec![lhs, rhs], span)
            }
            ast::ExprKind::List(items) => {
                let mut frame = Frame::default();
                let mut sub = Vec::new();
                for (designator, element) in items {
                    let element_id = self.lower_expr(element);
                    frame.entries.push(FrameEntry {
                        name: designator.as_ref().map(|d| d.name.clone()),
                        ty: self.types.get(element_id).clone(),
                    });
                    sub.push(element_id);
                }
                let frame = self.system.frames.add(frame);
                let id = self.system.exprs.add(ExprKind::List, sub, span);
                self.types.set(id, Type::record(frame));
                id
            }
            ast::ExprKind::Leadsto(lhs, rhs) => {
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.add_operator(ExprKind::Leadsto, vec![lhs, rhs], span)
            }
        }
    }

    fn add_operator(&mut self, kind: ExprKind, sub: Vec<ExprId>, span: ast::Span) -> ExprId {
        let id = self.system.exprs.add(kind, sub, span);
        self.types.set(id, Type::void());
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Base;
    use crate::parser;

    fn build_str(source: &str) -> BuildResult {
        let parsed = parser::parse_document(source, true);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        build(&parsed.output.unwrap())
    }

    #[test]
    fn globals_and_valuation() {
        let result = build_str("const int N = 3; const int M = N + 1; int x = M;");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert_eq!(result.system.globals.len(), 3);
        let n = result.system.globals[0].symbol;
        let m = result.system.globals[1].symbol;
        assert_eq!(result.system.constants.get(&n), Some(&3));
        assert_eq!(result.system.constants.get(&m), Some(&4));
    }

    #[test]
    fn identifier_types_are_assigned() {
        let result = build_str("clock c; int x = 1;");
        let var = &result.system.globals[1];
        let init = var.init.unwrap();
        assert_eq!(result.types.get(init).base(), Base::Int);
        let sym = &result.system.symbols.symbol(result.system.globals[0].symbol);
        assert_eq!(sym.ty.base(), Base::Clock);
    }

    #[test]
    fn duplicate_declaration_is_reported() {
        let result = build_str("int x; clock x;");
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("duplicate"));
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let result = build_str("int x = y;");
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("unknown identifier"));
    }

    #[test]
    fn template_states_and_transitions() {
        let result = build_str(
            "chan a;\n\
             process P() {\n\
               clock c;\n\
               state s0 { c <= 3 }, s1;\n\
               init s0;\n\
               trans s0 -> s1 { sync a!; };\n\
             }\n\
             P1 := P();\n\
             system P1;",
        );
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let template = &result.system.templates[0];
        assert_eq!(template.states.len(), 2);
        assert_eq!(template.init, Some(0));
        assert_eq!(template.transitions.len(), 1);
        assert!(template.transitions[0].sync.is_some());
        assert_eq!(result.system.processes.len(), 1);
    }

    #[test]
    fn instance_arity_mismatch() {
        let result = build_str(
            "process P(int a) { state s0; init s0; }\n\
             P1 := P();\n\
             system P1;",
        );
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.message.contains("wrong number of arguments")));
    }

    #[test]
    fn record_fields_resolve() {
        let result = build_str("struct { int x; int y; } p; int q = p.y;");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let init = result.system.globals[1].init.unwrap();
        let node = result.system.exprs.node(init);
        assert_eq!(node.kind, ExprKind::Field(1));
    }

    #[test]
    fn queries_lower_against_globals() {
        let mut result = build_str("int x;");
        let q = parser::parse_query("A[] x < 5").output.unwrap();
        let diags = add_queries(&mut result.system, &mut result.types, &[q]);
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(result.system.queries.len(), 1);
    }
}
