// ir.rs — Semantic model: types, symbols, frames, expression pool, system
//
// The system builder lowers the surface AST into this representation.
// Expressions live in a single arena (`ExprPool`) and are addressed by
// `ExprId`; their types live in a parallel side-table (`TypeMap`) whose
// slots are written at construction time for leaf and access expressions
// and exactly once more by the type checker for operator expressions.
//
// Preconditions: produced by `builder` from a parsed document.
// Postconditions: stable indices; nodes are never destroyed.
// Failure modes: none (data + pure queries only).
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::ast::{Span, SyncDir};

// ── Stable identifiers ───────────────────────────────────────────────────

/// Index of a symbol in the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Index of a frame in the frame pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

/// Index of an expression in the expression pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// Span for synthesized nodes that have no source location.
pub fn synth_span() -> Span {
    use chumsky::span::Span as _;
    Span::new((), 0..0)
}

// ── Types ────────────────────────────────────────────────────────────────

/// Base tag of a type, used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Void,
    Int,
    Bool,
    Clock,
    Channel,
    Array,
    Record,
    Diff,
    Invariant,
    Guard,
    Constraint,
    Function,
}

/// Declaration prefixes. Channel prefixes (`urgent`, `broadcast`) are only
/// meaningful when the base is `Channel`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prefixes {
    pub constant: bool,
    pub reference: bool,
    pub urgent: bool,
    pub broadcast: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub prefixes: Prefixes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Void,
    Bool,
    Clock,
    Channel,
    Diff,
    Invariant,
    Guard,
    Constraint,
    /// Integer with an optional declared range; both bounds empty means
    /// unbounded.
    Int(Option<(ExprId, ExprId)>),
    Array { size: ExprId, sub: Box<Type> },
    /// Nominally typed: two record types are equal iff the frames are the
    /// same frame.
    Record(FrameId),
    Function { params: FrameId, ret: Box<Type> },
}

pub static VOID: Type = Type {
    kind: TypeKind::Void,
    prefixes: Prefixes {
        constant: false,
        reference: false,
        urgent: false,
        broadcast: false,
    },
};

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            prefixes: Prefixes::default(),
        }
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    pub fn int() -> Self {
        Self::new(TypeKind::Int(None))
    }

    pub fn bounded_int(lower: ExprId, upper: ExprId) -> Self {
        Self::new(TypeKind::Int(Some((lower, upper))))
    }

    pub fn boolean() -> Self {
        Self::new(TypeKind::Bool)
    }

    pub fn clock() -> Self {
        Self::new(TypeKind::Clock)
    }

    pub fn channel() -> Self {
        Self::new(TypeKind::Channel)
    }

    pub fn diff() -> Self {
        Self::new(TypeKind::Diff)
    }

    pub fn invariant() -> Self {
        Self::new(TypeKind::Invariant)
    }

    pub fn guard() -> Self {
        Self::new(TypeKind::Guard)
    }

    pub fn constraint() -> Self {
        Self::new(TypeKind::Constraint)
    }

    pub fn record(frame: FrameId) -> Self {
        Self::new(TypeKind::Record(frame))
    }

    pub fn array(size: ExprId, sub: Type) -> Self {
        Self::new(TypeKind::Array {
            size,
            sub: Box::new(sub),
        })
    }

    pub fn function(params: FrameId, ret: Type) -> Self {
        Self::new(TypeKind::Function {
            params,
            ret: Box::new(ret),
        })
    }

    pub fn with_prefixes(mut self, prefixes: Prefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn base(&self) -> Base {
        match &self.kind {
            TypeKind::Void => Base::Void,
            TypeKind::Bool => Base::Bool,
            TypeKind::Clock => Base::Clock,
            TypeKind::Channel => Base::Channel,
            TypeKind::Diff => Base::Diff,
            TypeKind::Invariant => Base::Invariant,
            TypeKind::Guard => Base::Guard,
            TypeKind::Constraint => Base::Constraint,
            TypeKind::Int(_) => Base::Int,
            TypeKind::Array { .. } => Base::Array,
            TypeKind::Record(_) => Base::Record,
            TypeKind::Function { .. } => Base::Function,
        }
    }

    /// Declared range of an integer type, if any.
    pub fn int_range(&self) -> Option<(ExprId, ExprId)> {
        match self.kind {
            TypeKind::Int(range) => range,
            _ => None,
        }
    }

    pub fn array_size(&self) -> Option<ExprId> {
        match self.kind {
            TypeKind::Array { size, .. } => Some(size),
            _ => None,
        }
    }

    pub fn array_sub(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Array { sub, .. } => Some(sub),
            _ => None,
        }
    }

    pub fn record_frame(&self) -> Option<FrameId> {
        match self.kind {
            TypeKind::Record(frame) => Some(frame),
            _ => None,
        }
    }

    /// Strip array layers, yielding the element type.
    pub fn strip_arrays(&self) -> &Type {
        let mut ty = self;
        while let TypeKind::Array { sub, .. } = &ty.kind {
            ty = sub;
        }
        ty
    }
}

// ── Frames ───────────────────────────────────────────────────────────────

/// One entry of a frame. Entries of anonymous initializer-list frames may
/// carry a designator name; record and parameter frames always carry names.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub name: Option<String>,
    pub ty: Type,
}

/// An ordered sequence of named, typed entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub entries: Vec<FrameEntry>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.as_deref() == Some(name))
    }
}

#[derive(Debug, Default)]
pub struct Frames {
    frames: Vec<Frame>,
}

impl Frames {
    pub fn add(&mut self, frame: Frame) -> FrameId {
        let id = FrameId(self.frames.len() as u32);
        self.frames.push(frame);
        id
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0 as usize]
    }
}

// ── Symbols ──────────────────────────────────────────────────────────────

/// A resolved identifier with its declared type. Symbol equality is
/// identity (`SymbolId`).
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn add(&mut self, name: impl Into<String>, ty: Type) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name: name.into(),
            ty,
        });
        id
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// ── Expressions ──────────────────────────────────────────────────────────

/// Semantic expression kinds. Payloads that identify the node (constant
/// value, symbol, field index, sync direction) live in the kind; children
/// live in the node's `sub` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Constant(i32),
    Ident(SymbolId),
    /// Children: `[array, index]`.
    Index,
    /// Child: `[record]`; the payload is the resolved field index.
    Field(u32),
    /// Children: the list elements; designators live in the node's type
    /// frame.
    List,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    And,
    Or,
    Not,
    Min,
    Max,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    ShlAssign,
    ShrAssign,
    PostInc,
    PreInc,
    PostDec,
    PreDec,
    Neg,
    /// Children: `[cond, then, else]`.
    Ternary,
    /// Children: `[left, right]`; the value is the right operand.
    Comma,
    /// Children: `[callee, args...]`.
    Call,
    /// Children: `[phi, psi]` (queries only).
    Leadsto,
    /// Child: `[channel]`.
    Sync(SyncDir),
}

impl ExprKind {
    /// True for assignment, compound assignment and increment/decrement
    /// kinds — the kinds that write to their designated location.
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            ExprKind::Assign
                | ExprKind::AddAssign
                | ExprKind::SubAssign
                | ExprKind::MulAssign
                | ExprKind::DivAssign
                | ExprKind::ModAssign
                | ExprKind::AndAssign
                | ExprKind::OrAssign
                | ExprKind::XorAssign
                | ExprKind::ShlAssign
                | ExprKind::ShrAssign
                | ExprKind::PostInc
                | ExprKind::PreInc
                | ExprKind::PostDec
                | ExprKind::PreDec
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub sub: Vec<ExprId>,
    pub span: Span,
}

/// Expression arena. Nodes are immutable once added.
#[derive(Debug, Default)]
pub struct ExprPool {
    nodes: Vec<ExprNode>,
}

impl ExprPool {
    pub fn add(&mut self, kind: ExprKind, sub: Vec<ExprId>, span: Span) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(ExprNode { kind, sub, span });
        id
    }

    pub fn node(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0 as usize]
    }

    pub fn kind(&self, id: ExprId) -> ExprKind {
        self.node(id).kind
    }

    pub fn sub(&self, id: ExprId) -> &[ExprId] {
        &self.node(id).sub
    }

    pub fn span(&self, id: ExprId) -> Span {
        self.node(id).span
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True iff the expression reads any symbol in `vars`.
    pub fn depends_on(&self, e: ExprId, vars: &HashSet<SymbolId>) -> bool {
        let node = self.node(e);
        if let ExprKind::Ident(sym) = node.kind {
            if vars.contains(&sym) {
                return true;
            }
        }
        node.sub.iter().any(|&c| self.depends_on(c, vars))
    }

    /// True iff the expression contains an assignment, increment or
    /// decrement whose target resolves to a symbol in `vars`.
    pub fn changes_variable(&self, e: ExprId, vars: &HashSet<SymbolId>) -> bool {
        let node = self.node(e);
        if node.kind.is_assignment() {
            let mut targets = Vec::new();
            self.collect_targets(node.sub[0], &mut targets);
            if targets.iter().any(|s| vars.contains(s)) {
                return true;
            }
        }
        node.sub.iter().any(|&c| self.changes_variable(c, vars))
    }

    fn collect_targets(&self, e: ExprId, out: &mut Vec<SymbolId>) {
        let node = self.node(e);
        match node.kind {
            ExprKind::Ident(sym) => out.push(sym),
            ExprKind::Index | ExprKind::Field(_) => self.collect_targets(node.sub[0], out),
            ExprKind::Ternary => {
                self.collect_targets(node.sub[1], out);
                self.collect_targets(node.sub[2], out);
            }
            ExprKind::Comma => self.collect_targets(node.sub[1], out),
            kind if kind.is_assignment() => self.collect_targets(node.sub[0], out),
            _ => {}
        }
    }

    /// The symbol an expression designates, traced through field and array
    /// accesses, assignments and comma/ternary results.
    pub fn root_symbol(&self, e: ExprId) -> Option<SymbolId> {
        let node = self.node(e);
        match node.kind {
            ExprKind::Ident(sym) => Some(sym),
            ExprKind::Index | ExprKind::Field(_) | ExprKind::Sync(_) => {
                self.root_symbol(node.sub[0])
            }
            ExprKind::Ternary | ExprKind::Comma => self.root_symbol(node.sub[1]),
            kind if kind.is_assignment() => self.root_symbol(node.sub[0]),
            _ => None,
        }
    }

    /// Structural equality of two expressions: same kinds (including
    /// payloads), same shape. Used to compare declared range bounds.
    pub fn syntactically_equal(&self, a: ExprId, b: ExprId) -> bool {
        let na = self.node(a);
        let nb = self.node(b);
        na.kind == nb.kind
            && na.sub.len() == nb.sub.len()
            && na
                .sub
                .iter()
                .zip(nb.sub.iter())
                .all(|(&x, &y)| self.syntactically_equal(x, y))
    }
}

// ── Type side-table ──────────────────────────────────────────────────────

/// Parallel table mapping `ExprId` → `Type`. Slots default to `VOID`.
#[derive(Debug, Default)]
pub struct TypeMap {
    types: Vec<Type>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, e: ExprId) -> &Type {
        self.types.get(e.0 as usize).unwrap_or(&VOID)
    }

    pub fn set(&mut self, e: ExprId, ty: Type) {
        let idx = e.0 as usize;
        if idx >= self.types.len() {
            self.types.resize(idx + 1, Type::void());
        }
        self.types[idx] = ty;
    }
}

// ── System model ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Variable {
    pub symbol: SymbolId,
    pub init: Option<ExprId>,
}

/// An automaton location.
#[derive(Debug, Clone)]
pub struct State {
    pub symbol: SymbolId,
    pub invariant: Option<ExprId>,
}

/// An edge between two locations. Absent guard means `true`; absent
/// assignment means the no-op constant.
#[derive(Debug, Clone)]
pub struct Transition {
    pub source: usize,
    pub target: usize,
    pub guard: Option<ExprId>,
    pub sync: Option<ExprId>,
    pub assign: Option<ExprId>,
    pub span: Span,
}

/// A statement of a function body, lowered.
#[derive(Debug, Clone)]
pub enum Stmt {
    Empty,
    Expr(ExprId),
    Block(Vec<Stmt>),
    If {
        cond: ExprId,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: ExprId,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: ExprId,
    },
    For {
        init: ExprId,
        cond: ExprId,
        step: ExprId,
        body: Box<Stmt>,
    },
    Switch {
        cond: ExprId,
        arms: Vec<Stmt>,
    },
    Case {
        cond: ExprId,
        body: Vec<Stmt>,
    },
    DefaultCase {
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<ExprId>),
}

#[derive(Debug)]
pub struct Function {
    pub symbol: SymbolId,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct Template {
    pub symbol: SymbolId,
    pub params: Vec<SymbolId>,
    pub params_frame: FrameId,
    pub locals: Vec<Variable>,
    pub functions: Vec<Function>,
    pub states: Vec<State>,
    pub init: Option<usize>,
    pub transitions: Vec<Transition>,
}

/// An instantiated template: a mapping from parameter symbol to argument
/// expression, in parameter order.
#[derive(Debug)]
pub struct Instance {
    pub symbol: SymbolId,
    pub template: usize,
    pub mapping: Vec<(SymbolId, ExprId)>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Query {
    pub quant: Option<crate::ast::PathQuant>,
    pub expr: ExprId,
    pub span: Span,
}

/// The whole model: pools, declarations, templates, instances, queries and
/// the constant valuation.
#[derive(Debug)]
pub struct System {
    pub symbols: SymbolTable,
    pub frames: Frames,
    pub exprs: ExprPool,
    pub globals: Vec<Variable>,
    pub functions: Vec<Function>,
    pub templates: Vec<Template>,
    pub instances: Vec<Instance>,
    /// Indices into `instances`, in `system` line order.
    pub processes: Vec<usize>,
    pub queries: Vec<Query>,
    /// Values of constants whose initializers were computable.
    pub constants: HashMap<SymbolId, i32>,
    /// Global scope, kept for lowering queries after the build.
    pub globals_by_name: HashMap<String, SymbolId>,
    /// Interned `0` and `1` constants, used for implicit bool ranges.
    pub zero: ExprId,
    pub one: ExprId,
}

impl System {
    pub fn new() -> Self {
        let mut exprs = ExprPool::default();
        let zero = exprs.add(ExprKind::Constant(0), Vec::new(), synth_span());
        let one = exprs.add(ExprKind::Constant(1), Vec::new(), synth_span());
        Self {
            symbols: SymbolTable::default(),
            frames: Frames::default(),
            exprs,
            globals: Vec::new(),
            functions: Vec::new(),
            templates: Vec::new(),
            instances: Vec::new(),
            processes: Vec::new(),
            queries: Vec::new(),
            constants: HashMap::new(),
            globals_by_name: HashMap::new(),
            zero,
            one,
        }
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(kinds: &[(ExprKind, Vec<ExprId>)]) -> ExprPool {
        let mut pool = ExprPool::default();
        for (kind, sub) in kinds {
            pool.add(*kind, sub.clone(), synth_span());
        }
        pool
    }

    #[test]
    fn depends_on_reads_identifiers() {
        // x + 1 where x is symbol 0
        let pool = pool_with(&[
            (ExprKind::Ident(SymbolId(0)), vec![]),
            (ExprKind::Constant(1), vec![]),
            (ExprKind::Add, vec![ExprId(0), ExprId(1)]),
        ]);
        let mut set = HashSet::new();
        set.insert(SymbolId(0));
        assert!(pool.depends_on(ExprId(2), &set));
        set.clear();
        set.insert(SymbolId(7));
        assert!(!pool.depends_on(ExprId(2), &set));
    }

    #[test]
    fn changes_variable_traces_targets() {
        // x := 1
        let pool = pool_with(&[
            (ExprKind::Ident(SymbolId(3)), vec![]),
            (ExprKind::Constant(1), vec![]),
            (ExprKind::Assign, vec![ExprId(0), ExprId(1)]),
        ]);
        let mut set = HashSet::new();
        set.insert(SymbolId(3));
        assert!(pool.changes_variable(ExprId(2), &set));
        assert!(!pool.depends_on(ExprId(1), &set));
    }

    #[test]
    fn changes_variable_through_index() {
        // a[i]++ changes a, reads i
        let pool = pool_with(&[
            (ExprKind::Ident(SymbolId(0)), vec![]),
            (ExprKind::Ident(SymbolId(1)), vec![]),
            (ExprKind::Index, vec![ExprId(0), ExprId(1)]),
            (ExprKind::PostInc, vec![ExprId(2)]),
        ]);
        let mut a = HashSet::new();
        a.insert(SymbolId(0));
        assert!(pool.changes_variable(ExprId(3), &a));
        let mut i = HashSet::new();
        i.insert(SymbolId(1));
        assert!(!pool.changes_variable(ExprId(3), &i));
        assert!(pool.depends_on(ExprId(3), &i));
    }

    #[test]
    fn syntactic_equality() {
        // two copies of `n - 1`, one `n - 2`
        let pool = pool_with(&[
            (ExprKind::Ident(SymbolId(0)), vec![]),
            (ExprKind::Constant(1), vec![]),
            (ExprKind::Sub, vec![ExprId(0), ExprId(1)]),
            (ExprKind::Ident(SymbolId(0)), vec![]),
            (ExprKind::Constant(1), vec![]),
            (ExprKind::Sub, vec![ExprId(3), ExprId(4)]),
            (ExprKind::Constant(2), vec![]),
            (ExprKind::Sub, vec![ExprId(3), ExprId(6)]),
        ]);
        assert!(pool.syntactically_equal(ExprId(2), ExprId(5)));
        assert!(!pool.syntactically_equal(ExprId(2), ExprId(7)));
    }

    #[test]
    fn type_map_defaults_to_void() {
        let map = TypeMap::new();
        assert_eq!(map.get(ExprId(42)).base(), Base::Void);
    }

    #[test]
    fn strip_arrays_reaches_element_type() {
        let mut pool = ExprPool::default();
        let n = pool.add(ExprKind::Constant(3), vec![], synth_span());
        let ty = Type::array(n, Type::array(n, Type::clock()));
        assert_eq!(ty.strip_arrays().base(), Base::Clock);
    }
}
