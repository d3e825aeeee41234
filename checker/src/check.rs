// check.rs — Type checking and annotation
//
// Walks the built system and assigns a type to every expression occurring
// in initializers, invariants, guards, synchronizations, assignments,
// function bodies, instantiation arguments and queries. Structural rules
// (left values, side-effect freedom, range and parameter compatibility)
// are enforced along the way.
//
// Preconditions: the builder has finished; leaf and access expressions
//   carry their construction-time types.
// Postconditions: every operator expression reached by annotation has a
//   non-void type; all detectable errors are in the sink.
// Failure modes: none — diagnostics are recorded and checking continues.
// Side effects: writes operator types into the `TypeMap`.

use std::collections::HashSet;

use crate::ast::SyncDir;
use crate::diag::{Diagnostic, ErrorSink};
use crate::eval::{Interpreter, Range};
use crate::ir::{
    Base, ExprId, ExprKind, Function, Instance, Query, State, Stmt, SymbolId, System, Transition,
    Type, TypeKind, TypeMap, Variable,
};

/// Check a built system, annotating expression types and reporting all
/// detectable errors into the sink.
pub fn check(system: &System, types: &mut TypeMap, sink: &mut ErrorSink) {
    let persistent = persistent_set(system);
    let mut checker = TypeChecker {
        system,
        types,
        sink,
        persistent,
        context: Context::None,
    };
    checker.run();
}

/// Check only the queries appended at or after `start` — used when a query
/// buffer is checked against an already-checked system.
pub fn check_queries(system: &System, types: &mut TypeMap, sink: &mut ErrorSink, start: usize) {
    let persistent = persistent_set(system);
    let mut checker = TypeChecker {
        system,
        types,
        sink,
        persistent,
        context: Context::None,
    };
    for query in &system.queries[start..] {
        checker.check_query(query);
    }
}

// ── Persistent variables ─────────────────────────────────────────────────
//
// The writable state of the model: every non-constant declared variable
// plus every template parameter that is a reference or non-constant.
// Function locals are not part of the system's variable lists and are
// therefore excluded.

pub fn persistent_set(system: &System) -> HashSet<SymbolId> {
    let mut set = HashSet::new();
    let mut add_vars = |vars: &[Variable], set: &mut HashSet<SymbolId>| {
        for var in vars {
            if !system.symbols.symbol(var.symbol).ty.prefixes.constant {
                set.insert(var.symbol);
            }
        }
    };
    add_vars(&system.globals, &mut set);
    for template in &system.templates {
        add_vars(&template.locals, &mut set);
        for &param in &template.params {
            let ty = &system.symbols.symbol(param).ty;
            if ty.prefixes.reference || !ty.prefixes.constant {
                set.insert(param);
            }
        }
    }
    set
}

// ── Classification predicates ────────────────────────────────────────────

pub fn is_integer(types: &TypeMap, e: ExprId) -> bool {
    matches!(types.get(e).base(), Base::Int | Base::Bool)
}

pub fn is_clock(types: &TypeMap, e: ExprId) -> bool {
    types.get(e).base() == Base::Clock
}

pub fn is_record(types: &TypeMap, e: ExprId) -> bool {
    types.get(e).base() == Base::Record
}

pub fn is_diff(types: &TypeMap, e: ExprId) -> bool {
    types.get(e).base() == Base::Diff
}

/// A valid invariant is an invariant expression or an integer expression.
pub fn is_invariant(types: &TypeMap, e: ExprId) -> bool {
    types.get(e).base() == Base::Invariant || is_integer(types, e)
}

/// A valid guard is a guard expression or a valid invariant.
pub fn is_guard(types: &TypeMap, e: ExprId) -> bool {
    types.get(e).base() == Base::Guard || is_invariant(types, e)
}

/// A valid constraint is a constraint expression or a valid guard.
pub fn is_constraint(types: &TypeMap, e: ExprId) -> bool {
    types.get(e).base() == Base::Constraint || is_guard(types, e)
}

/// Capability of a channel type: urgent channels rank lowest, non-urgent
/// broadcast channels next, plain channels highest. An argument must have
/// at least the capability of the parameter it is bound to.
pub fn channel_capability(ty: &Type) -> i32 {
    if ty.prefixes.urgent {
        0
    } else if ty.prefixes.broadcast {
        1
    } else {
        2
    }
}

// ── Left values and unique references ────────────────────────────────────

/// True iff the expression designates a mutable storage location. An
/// inline if over integers is only a left value when both branches share
/// the same declared range, syntactically.
pub fn is_lhs_value(system: &System, types: &TypeMap, e: ExprId) -> bool {
    let pool = &system.exprs;
    let node = pool.node(e);
    match node.kind {
        ExprKind::Ident(sym) => !system.symbols.symbol(sym).ty.prefixes.constant,
        ExprKind::Field(_) | ExprKind::Index => is_lhs_value(system, types, node.sub[0]),
        ExprKind::PreInc
        | ExprKind::PreDec
        | ExprKind::Assign
        | ExprKind::AddAssign
        | ExprKind::SubAssign
        | ExprKind::MulAssign
        | ExprKind::DivAssign
        | ExprKind::ModAssign
        | ExprKind::AndAssign
        | ExprKind::OrAssign
        | ExprKind::XorAssign
        | ExprKind::ShlAssign
        | ExprKind::ShrAssign => is_lhs_value(system, types, node.sub[0]),
        ExprKind::Ternary => {
            if !is_lhs_value(system, types, node.sub[1])
                || !is_lhs_value(system, types, node.sub[2])
            {
                return false;
            }
            let (then_sym, else_sym) =
                match (pool.root_symbol(node.sub[1]), pool.root_symbol(node.sub[2])) {
                    (Some(t), Some(f)) => (t, f),
                    _ => return false,
                };
            let then_ty = system.symbols.symbol(then_sym).ty.strip_arrays();
            let else_ty = system.symbols.symbol(else_sym).ty.strip_arrays();
            if then_ty.base() != Base::Int {
                return true;
            }
            match (then_ty.int_range(), else_ty.int_range()) {
                (Some((tl, tu)), Some((fl, fu))) => {
                    pool.syntactically_equal(tl, fl) && pool.syntactically_equal(tu, fu)
                }
                (None, None) => true,
                _ => false,
            }
        }
        ExprKind::Comma => is_lhs_value(system, types, node.sub[1]),
        // Functions cannot return references.
        _ => false,
    }
}

/// A left value whose location is determined without reading any
/// persistent variable. `a[i]` is a left value, but not a unique reference
/// when `i` is a non-constant variable.
pub fn is_unique_reference(
    system: &System,
    types: &TypeMap,
    persistent: &HashSet<SymbolId>,
    e: ExprId,
) -> bool {
    let pool = &system.exprs;
    let node = pool.node(e);
    match node.kind {
        ExprKind::Ident(_) => !types.get(e).prefixes.constant,
        ExprKind::Field(_) => is_unique_reference(system, types, persistent, node.sub[0]),
        ExprKind::Index => {
            is_unique_reference(system, types, persistent, node.sub[0])
                && !pool.depends_on(node.sub[1], persistent)
        }
        ExprKind::PreInc
        | ExprKind::PreDec
        | ExprKind::Assign
        | ExprKind::AddAssign
        | ExprKind::SubAssign
        | ExprKind::MulAssign
        | ExprKind::DivAssign
        | ExprKind::ModAssign
        | ExprKind::AndAssign
        | ExprKind::OrAssign
        | ExprKind::XorAssign
        | ExprKind::ShlAssign
        | ExprKind::ShrAssign => is_unique_reference(system, types, persistent, node.sub[0]),
        ExprKind::Ternary => false,
        ExprKind::Comma => is_unique_reference(system, types, persistent, node.sub[1]),
        _ => false,
    }
}

// ── Checker ──────────────────────────────────────────────────────────────

/// Contextual role of the expression currently being checked; attached to
/// diagnostics as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    None,
    Declaration,
    Invariant,
    Guard,
    Sync,
    Assignment,
    Instantiation,
}

impl Context {
    fn hint(self) -> Option<&'static str> {
        match self {
            Context::None => None,
            Context::Declaration => Some("in declaration"),
            Context::Invariant => Some("in invariant"),
            Context::Guard => Some("in guard"),
            Context::Sync => Some("in synchronisation"),
            Context::Assignment => Some("in assignment"),
            Context::Instantiation => Some("in instantiation"),
        }
    }
}

/// A recoverable fault raised inside initializer checking, unwound to the
/// variable level and turned into a single diagnostic there.
struct InitFault {
    expr: ExprId,
    message: &'static str,
}

struct TypeChecker<'a> {
    system: &'a System,
    types: &'a mut TypeMap,
    sink: &'a mut ErrorSink,
    persistent: HashSet<SymbolId>,
    context: Context,
}

impl<'a> TypeChecker<'a> {
    fn run(&mut self) {
        let system = self.system;
        for var in &system.globals {
            self.check_variable_declaration(var);
        }
        for func in &system.functions {
            self.check_function(func);
        }
        for template in &system.templates {
            for var in &template.locals {
                self.check_variable_declaration(var);
            }
            for func in &template.functions {
                self.check_function(func);
            }
            for state in &template.states {
                self.check_state(state);
            }
            for trans in &template.transitions {
                self.check_transition(trans);
            }
        }
        for instance in &system.instances {
            self.check_instance(instance);
        }
        for query in &system.queries {
            self.check_query(query);
        }
    }

    // ── Diagnostics ──

    fn error(&mut self, e: ExprId, message: impl Into<String>) {
        let mut diag = Diagnostic::error(self.system.exprs.span(e), message);
        if let Some(hint) = self.context.hint() {
            diag = diag.with_hint(hint);
        }
        self.sink.push(diag);
    }

    fn warning(&mut self, e: ExprId, message: impl Into<String>) {
        let mut diag = Diagnostic::warning(self.system.exprs.span(e), message);
        if let Some(hint) = self.context.hint() {
            diag = diag.with_hint(hint);
        }
        self.sink.push(diag);
    }

    // ── Predicate helpers ──

    fn is_integer(&self, e: ExprId) -> bool {
        is_integer(&*self.types, e)
    }

    fn is_clock(&self, e: ExprId) -> bool {
        is_clock(&*self.types, e)
    }

    fn is_record(&self, e: ExprId) -> bool {
        is_record(&*self.types, e)
    }

    fn is_diff(&self, e: ExprId) -> bool {
        is_diff(&*self.types, e)
    }

    fn is_invariant(&self, e: ExprId) -> bool {
        is_invariant(&*self.types, e)
    }

    fn is_guard(&self, e: ExprId) -> bool {
        is_guard(&*self.types, e)
    }

    fn is_constraint(&self, e: ExprId) -> bool {
        is_constraint(&*self.types, e)
    }

    fn is_lhs_value(&self, e: ExprId) -> bool {
        is_lhs_value(self.system, &*self.types, e)
    }

    /// An expression is side effect free when it does not modify any
    /// persistent variable (function locals do not count).
    fn is_side_effect_free(&self, e: ExprId) -> bool {
        !self.system.exprs.changes_variable(e, &self.persistent)
    }

    fn depends_on_persistent(&self, e: ExprId) -> bool {
        self.system.exprs.depends_on(e, &self.persistent)
    }

    // ── Annotation (C3) ──

    /// Type check and annotate the expression, children first. Assigns a
    /// type to every operator node; leaf and access nodes keep their
    /// construction-time types. Does not compute integer ranges.
    fn annotate(&mut self, e: ExprId) {
        let system = self.system;
        for &child in system.exprs.sub(e) {
            self.annotate(child);
        }

        let sub = system.exprs.sub(e);
        let kind = system.exprs.kind(e);
        let ty = match kind {
            ExprKind::Eq | ExprKind::Ne => {
                if self.is_integer(sub[0]) && self.is_integer(sub[1]) {
                    Type::int()
                } else if self.same_record_frames(sub[0], sub[1]) {
                    Type::int()
                } else {
                    match self.type_of_binary_non_int(sub[0], kind, sub[1]) {
                        Some(ty) => ty,
                        None => {
                            self.error(e, "Invalid operands to binary operator");
                            Type::constraint()
                        }
                    }
                }
            }

            ExprKind::Add
            | ExprKind::Sub
            | ExprKind::Mul
            | ExprKind::Div
            | ExprKind::Mod
            | ExprKind::BitAnd
            | ExprKind::BitOr
            | ExprKind::BitXor
            | ExprKind::Shl
            | ExprKind::Shr
            | ExprKind::And
            | ExprKind::Or
            | ExprKind::Min
            | ExprKind::Max
            | ExprKind::Lt
            | ExprKind::Le
            | ExprKind::Ge
            | ExprKind::Gt => {
                if self.is_integer(sub[0]) && self.is_integer(sub[1]) {
                    Type::int()
                } else {
                    match self.type_of_binary_non_int(sub[0], kind, sub[1]) {
                        Some(ty) => ty,
                        None => {
                            self.error(e, "Invalid operands to binary operator");
                            Type::constraint()
                        }
                    }
                }
            }

            ExprKind::Not => {
                if self.is_integer(sub[0]) {
                    Type::int()
                } else if self.is_constraint(sub[0]) {
                    Type::constraint()
                } else {
                    self.error(e, "Invalid operation for type");
                    Type::int()
                }
            }

            ExprKind::Neg => {
                if !self.is_integer(sub[0]) {
                    self.error(e, "Invalid operation for type");
                }
                Type::int()
            }

            ExprKind::Assign => {
                let lhs_ty = self.types.get(sub[0]).clone();
                let rhs_ty = self.types.get(sub[1]).clone();
                if !self.are_assignment_compatible(&lhs_ty, &rhs_ty) {
                    self.error(e, "Incompatible types");
                } else if !self.is_lhs_value(sub[0]) {
                    self.error(sub[0], "Left hand side value expected");
                }
                lhs_ty
            }

            ExprKind::AddAssign
            | ExprKind::SubAssign
            | ExprKind::MulAssign
            | ExprKind::DivAssign
            | ExprKind::ModAssign
            | ExprKind::AndAssign
            | ExprKind::OrAssign
            | ExprKind::XorAssign
            | ExprKind::ShlAssign
            | ExprKind::ShrAssign => {
                if !self.is_integer(sub[0]) || !self.is_integer(sub[1]) {
                    self.error(e, "Non-integer types must use regular assignment operator.");
                } else if !self.is_lhs_value(sub[0]) {
                    self.error(sub[0], "Left hand side value expected");
                }
                self.types.get(sub[0]).clone()
            }

            ExprKind::PostInc | ExprKind::PreInc | ExprKind::PostDec | ExprKind::PreDec => {
                if self.types.get(sub[0]).base() != Base::Int {
                    self.error(e, "Argument must be an integer value");
                } else if !self.is_lhs_value(sub[0]) {
                    self.error(sub[0], "Left hand side value expected");
                }
                Type::int()
            }

            ExprKind::Ternary => {
                if !self.is_integer(sub[0]) {
                    self.error(e, "First argument of inline if must be an integer");
                }
                let then_ty = self.types.get(sub[1]).clone();
                let else_ty = self.types.get(sub[2]).clone();
                if !self.are_inline_if_compatible(&then_ty, &else_ty) {
                    self.error(e, "Incompatible arguments to inline if");
                }
                then_ty
            }

            ExprKind::Comma => {
                let left_ok =
                    self.is_integer(sub[0]) || self.is_clock(sub[0]) || self.is_record(sub[0]);
                let right_ok =
                    self.is_integer(sub[1]) || self.is_clock(sub[1]) || self.is_record(sub[1]);
                if !left_ok || !right_ok {
                    self.error(e, "Arguments must be of integer, clock or record type");
                }
                self.types.get(sub[1]).clone()
            }

            ExprKind::Call => {
                if self.types.get(sub[0]).base() != Base::Function {
                    self.error(sub[0], "A function name was expected here");
                } else {
                    self.check_function_call_arguments(e);
                }
                // The call's type is the declared return type, set by the
                // builder.
                return;
            }

            // Leaf and access expressions keep their construction-time
            // types; leads-to and sync wrappers stay untyped.
            ExprKind::Constant(_)
            | ExprKind::Ident(_)
            | ExprKind::Index
            | ExprKind::Field(_)
            | ExprKind::List
            | ExprKind::Leadsto
            | ExprKind::Sync(_) => return,
        };
        self.types.set(e, ty);
    }

    fn same_record_frames(&self, a: ExprId, b: ExprId) -> bool {
        match (
            self.types.get(a).record_frame(),
            self.types.get(b).record_frame(),
        ) {
            (Some(fa), Some(fb)) => fa == fb,
            _ => false,
        }
    }

    /// Typing of binary operators over non-integer operands; `None` means
    /// ill-typed. Branch order matters for `>=`/`>`: the invariant forms
    /// are matched before the clock-guard form.
    fn type_of_binary_non_int(&self, left: ExprId, op: ExprKind, right: ExprId) -> Option<Type> {
        let int_l = self.is_integer(left);
        let int_r = self.is_integer(right);
        let clk_l = self.is_clock(left);
        let clk_r = self.is_clock(right);
        let dif_l = self.is_diff(left);
        let dif_r = self.is_diff(right);

        match op {
            ExprKind::Add => {
                if int_l && clk_r || clk_l && int_r {
                    Some(Type::clock())
                } else if dif_l && int_r || int_l && dif_r {
                    Some(Type::diff())
                } else {
                    None
                }
            }
            ExprKind::Sub => {
                // Integer minus clock is rejected so clock guards stay
                // convertible to difference form.
                if clk_l && int_r {
                    Some(Type::clock())
                } else if dif_l && int_r || int_l && dif_r || clk_l && clk_r {
                    Some(Type::diff())
                } else {
                    None
                }
            }
            ExprKind::And => {
                if self.is_invariant(left) && self.is_invariant(right) {
                    Some(Type::invariant())
                } else if self.is_guard(left) && self.is_guard(right) {
                    Some(Type::guard())
                } else if self.is_constraint(left) && self.is_constraint(right) {
                    Some(Type::constraint())
                } else {
                    None
                }
            }
            ExprKind::Or => {
                if self.is_constraint(left) && self.is_constraint(right) {
                    Some(Type::constraint())
                } else {
                    None
                }
            }
            ExprKind::Lt | ExprKind::Le => {
                if clk_l && clk_r || clk_l && int_r || dif_l && int_r || int_l && dif_r {
                    Some(Type::invariant())
                } else if int_l && clk_r {
                    Some(Type::guard())
                } else {
                    None
                }
            }
            ExprKind::Eq => {
                if clk_l && clk_r || clk_l && int_r || int_l && clk_r || dif_l && int_r
                    || int_l && dif_r
                {
                    Some(Type::guard())
                } else {
                    None
                }
            }
            ExprKind::Ne => {
                if clk_l && clk_r || clk_l && int_r || int_l && clk_r || dif_l && int_r
                    || int_l && dif_r
                {
                    Some(Type::constraint())
                } else {
                    None
                }
            }
            ExprKind::Ge | ExprKind::Gt => {
                if clk_l && clk_r || int_l && clk_r || dif_l && int_r || int_l && dif_r {
                    Some(Type::invariant())
                } else if clk_l && self.is_guard(right) {
                    Some(Type::guard())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// True when an expression of type `rhs` may be assigned to a location
    /// of type `lhs`. Integer ranges are not considered here.
    fn are_assignment_compatible(&self, lhs: &Type, rhs: &Type) -> bool {
        match lhs.base() {
            Base::Clock | Base::Int | Base::Bool => {
                matches!(rhs.base(), Base::Int | Base::Bool)
            }
            Base::Record => {
                rhs.base() == Base::Record && lhs.record_frame() == rhs.record_frame()
            }
            _ => false,
        }
    }

    /// Result compatibility of the two branches of an inline if: integers
    /// with integers, clocks with clocks, channels with identical
    /// prefixes, arrays of equal declared size with compatible elements,
    /// records of the same frame.
    fn are_inline_if_compatible(&self, then_ty: &Type, else_ty: &Type) -> bool {
        match then_ty.base() {
            Base::Int | Base::Bool => matches!(else_ty.base(), Base::Int | Base::Bool),
            Base::Clock => else_ty.base() == Base::Clock,
            Base::Channel => {
                else_ty.base() == Base::Channel
                    && then_ty.prefixes.urgent == else_ty.prefixes.urgent
                    && then_ty.prefixes.broadcast == else_ty.prefixes.broadcast
            }
            Base::Array => {
                else_ty.base() == Base::Array
                    && self.system.exprs.syntactically_equal(
                        then_ty.array_size().expect("array type has a size"),
                        else_ty.array_size().expect("array type has a size"),
                    )
                    && self.are_inline_if_compatible(
                        then_ty.array_sub().expect("array type has an element type"),
                        else_ty.array_sub().expect("array type has an element type"),
                    )
            }
            Base::Record => then_ty.record_frame() == else_ty.record_frame(),
            _ => false,
        }
    }

    // ── Function calls (C6 entry) ──

    fn check_function_call_arguments(&mut self, e: ExprId) {
        let system = self.system;
        let sub = system.exprs.sub(e);
        let params_frame = match &self.types.get(sub[0]).kind {
            TypeKind::Function { params, .. } => *params,
            _ => return,
        };
        let params = system.frames.frame(params_frame);
        let args = &sub[1..];

        if params.len() > args.len() {
            self.error(e, "Too few arguments");
        } else if params.len() < args.len() {
            for &extra in &args[params.len()..] {
                self.error(extra, "Too many arguments");
            }
        } else {
            let interp = Interpreter::new(&system.exprs, &system.constants);
            for (param, &arg) in params.entries.iter().zip(args.iter()) {
                self.check_parameter_compatible(&interp, &param.ty, arg);
            }
        }
    }

    // ── Parameter compatibility (C6) ──

    fn check_parameter_compatible(&mut self, interp: &Interpreter, param: &Type, arg: ExprId) {
        let ref_ = param.prefixes.reference;
        let constant = param.prefixes.constant;
        let mut lhs = self.is_lhs_value(arg);

        let mut param_ty = param.clone();
        let mut arg_ty = self.types.get(arg).clone();

        // Implicit conversion between booleans and integers, for value
        // parameters only. A coerced argument is no longer a left value.
        if !ref_ {
            if param_ty.base() == Base::Int && arg_ty.base() == Base::Bool {
                arg_ty = Type::bounded_int(self.system.zero, self.system.one);
                lhs = false;
            }
            if param_ty.base() == Base::Bool && arg_ty.base() == Base::Int {
                arg_ty = Type::boolean();
                lhs = false;
            }
        }

        if ref_ && !constant && !lhs {
            self.error(arg, "Reference parameter requires left value argument");
            return;
        }

        // Strip array layers, comparing declared sizes along the way.
        while param_ty.base() == Base::Array {
            if arg_ty.base() != Base::Array {
                self.error(arg, "Incompatible argument to array parameter");
                return;
            }
            let param_size = param_ty.array_size().expect("array type has a size");
            let arg_size = arg_ty.array_size().expect("array type has a size");
            if let (Ok(p), Ok(a)) = (interp.evaluate(param_size), interp.evaluate(arg_size)) {
                if p != a {
                    self.error(arg, "Parameter array size does not match argument array size");
                }
            }
            param_ty = param_ty.array_sub().expect("array type has an element type").clone();
            arg_ty = arg_ty.array_sub().expect("array type has an element type").clone();
        }

        if param_ty.base() != arg_ty.base() {
            self.error(arg, "Incompatible argument");
            return;
        }

        match param_ty.base() {
            Base::Clock | Base::Bool => {}
            Base::Int => self.check_int_parameter(interp, &param_ty, &arg_ty, arg, ref_, constant, lhs),
            Base::Record => {
                if param_ty.record_frame() != arg_ty.record_frame() {
                    self.error(arg, "Argument has incompatible type");
                }
            }
            Base::Channel => {
                if channel_capability(&arg_ty) < channel_capability(&param_ty) {
                    self.error(arg, "Incompatible channel type");
                }
            }
            _ => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_int_parameter(
        &mut self,
        interp: &Interpreter,
        param_ty: &Type,
        arg_ty: &Type,
        arg: ExprId,
        ref_: bool,
        constant: bool,
        lhs: bool,
    ) {
        // A parameter without a declared range accepts everything.
        let param_range = match param_ty.int_range() {
            Some(range) => range,
            None => return,
        };

        if lhs {
            // The argument designates a location: compare declared ranges.
            let arg_range = arg_ty.int_range();
            let evaluated = arg_range.and_then(|bounds| {
                match (
                    interp.evaluate_range(param_range),
                    interp.evaluate_range(bounds),
                ) {
                    (Ok(p), Ok(a)) => Some((p, a)),
                    _ => None,
                }
            });
            match evaluated {
                Some((p_range, a_range)) => {
                    if ref_ && !constant && a_range != p_range {
                        self.error(arg, "Range of argument does not match range of formal parameter");
                    } else if ref_ && constant && !p_range.contains(a_range) {
                        self.error(
                            arg,
                            "Range of argument is outside of the range of the formal parameter",
                        );
                    } else if p_range.intersect(a_range).is_empty() {
                        self.error(
                            arg,
                            "Range of argument is outside of the range of the formal parameter",
                        );
                    }
                }
                None => {
                    // Declared ranges are not computable here. For
                    // reference parameters the bound expressions must
                    // match syntactically; otherwise the check is
                    // deferred to runtime.
                    if ref_ {
                        let pool = &self.system.exprs;
                        let equal = match arg_range {
                            Some((lo, hi)) => {
                                pool.syntactically_equal(param_range.0, lo)
                                    && pool.syntactically_equal(param_range.1, hi)
                            }
                            None => false,
                        };
                        if !equal {
                            self.error(
                                arg,
                                "Range of argument does not match range of formal parameter",
                            );
                        }
                    }
                }
            }
        } else {
            // Not a left value: try to evaluate the argument itself.
            if let Ok(p_range) = interp.evaluate_range(param_range) {
                if let Ok(values) = interp.evaluate_flat(arg) {
                    let mut a_range = Range::empty();
                    for value in values {
                        a_range = a_range.join(value);
                    }
                    if !p_range.contains(a_range) {
                        self.error(
                            arg,
                            "Range of argument is outside of the range of the formal parameter",
                        );
                    }
                }
            }
        }
    }

    // ── Initializers (C5) ──

    fn check_initialiser(&mut self, ty: &Type, init: ExprId) -> Result<(), InitFault> {
        let system = self.system;
        match &ty.kind {
            TypeKind::Array { size, sub } => {
                if system.exprs.kind(init) != ExprKind::List {
                    return Err(InitFault {
                        expr: init,
                        message: "Invalid array initialiser",
                    });
                }
                let interp = Interpreter::new(&system.exprs, &system.constants);
                let dim = interp.evaluate(*size).map_err(|_| InitFault {
                    expr: init,
                    message: "Arrays with parameterized size cannot have an initialiser",
                })?;

                let elements = system.exprs.sub(init);
                if elements.len() > dim.max(0) as usize {
                    return Err(InitFault {
                        expr: init,
                        message: "Excess elements in array initialiser",
                    });
                }

                let frame_id = self.types.get(init).record_frame();
                let names: Vec<Option<String>> = match frame_id {
                    Some(frame) => system
                        .frames
                        .frame(frame)
                        .entries
                        .iter()
                        .map(|entry| entry.name.clone())
                        .collect(),
                    None => vec![None; elements.len()],
                };
                for (index, &element) in elements.iter().enumerate() {
                    if names[index].is_some() {
                        return Err(InitFault {
                            expr: element,
                            message: "Unknown field specified in initialiser",
                        });
                    }
                    self.check_initialiser(sub, element)?;
                }

                if elements.len() < dim.max(0) as usize {
                    return Err(InitFault {
                        expr: init,
                        message: "Missing fields in initialiser",
                    });
                }
                Ok(())
            }

            TypeKind::Bool => {
                if !self.is_integer(init) {
                    return Err(InitFault {
                        expr: init,
                        message: "Invalid initialiser",
                    });
                }
                Ok(())
            }

            TypeKind::Int(range) => {
                if !self.is_integer(init) {
                    return Err(InitFault {
                        expr: init,
                        message: "Invalid initialiser",
                    });
                }
                // Without a declared range there is nothing more to check.
                let range = match range {
                    Some(range) => *range,
                    None => return Ok(()),
                };
                // Only verified when both the value and the range are
                // computable at analysis time.
                let interp = Interpreter::new(&system.exprs, &system.constants);
                match (interp.evaluate(init), interp.evaluate_range(range)) {
                    (Ok(value), Ok(range)) if !range.contains_value(value) => Err(InitFault {
                        expr: init,
                        message: "Initialiser is out of range",
                    }),
                    _ => Ok(()),
                }
            }

            TypeKind::Record(declared_frame) => {
                // An initializer that already carries the declared frame
                // (e.g. assignment of a whole record) is accepted as is.
                if self.types.get(init).record_frame() == Some(*declared_frame) {
                    return Ok(());
                }
                if system.exprs.kind(init) != ExprKind::List {
                    return Err(InitFault {
                        expr: init,
                        message: "Invalid initialiser for struct",
                    });
                }

                let fields = system.frames.frame(*declared_frame);
                let init_frame = self
                    .types
                    .get(init)
                    .record_frame()
                    .expect("list expressions carry a frame");
                let designators: Vec<Option<String>> = system
                    .frames
                    .frame(init_frame)
                    .entries
                    .iter()
                    .map(|entry| entry.name.clone())
                    .collect();
                let elements = system.exprs.sub(init);

                let mut has_init = vec![false; fields.len()];
                let mut current: usize = 0;
                for (index, &element) in elements.iter().enumerate() {
                    if let Some(name) = &designators[index] {
                        match fields.index_of(name) {
                            Some(idx) => current = idx,
                            None => {
                                self.error(element, "Unknown field");
                                break;
                            }
                        }
                    }
                    if current >= fields.len() {
                        self.error(element, "Excess elements in initialiser");
                        break;
                    }
                    if has_init[current] {
                        self.error(element, "Multiple initialisers for field");
                    } else {
                        has_init[current] = true;
                        let field_ty = fields.entries[current].ty.clone();
                        self.check_initialiser(&field_ty, element)?;
                    }
                    current += 1;
                }

                if has_init.iter().any(|done| !done) {
                    return Err(InitFault {
                        expr: init,
                        message: "Incomplete initialiser",
                    });
                }
                Ok(())
            }

            _ => Ok(()),
        }
    }

    /// Check the initializer of a variable or constant, converting any
    /// nested fault into a single diagnostic.
    fn check_variable_initialiser(&mut self, var: &Variable) {
        let init = match var.init {
            Some(init) => init,
            None => return,
        };
        self.annotate(init);
        if self.depends_on_persistent(init) {
            self.error(init, "Constant expression expected");
        } else if !self.is_side_effect_free(init) {
            self.error(init, "Initialiser must not have side effects");
        } else {
            let ty = self.system.symbols.symbol(var.symbol).ty.clone();
            if let Err(fault) = self.check_initialiser(&ty, init) {
                self.error(fault.expr, fault.message);
            }
        }
    }

    // ── Declared types ──

    fn annotate_and_expect_constant_integer(&mut self, e: ExprId) {
        self.annotate(e);
        if !self.is_integer(e) {
            self.error(e, "Integer expression expected");
        } else if self.depends_on_persistent(e) {
            self.error(e, "Constant expression expected");
        }
    }

    /// Validate the expressions embedded in a declared type: integer
    /// range bounds and array sizes must be constant integers; record
    /// field types are checked recursively.
    fn check_type(&mut self, ty: &Type) {
        match &ty.kind {
            TypeKind::Int(Some((lower, upper))) => {
                self.annotate_and_expect_constant_integer(*lower);
                self.annotate_and_expect_constant_integer(*upper);
            }
            TypeKind::Array { size, sub } => {
                self.annotate_and_expect_constant_integer(*size);
                self.check_type(sub);
            }
            TypeKind::Record(frame) => {
                let frame = *frame;
                let system = self.system;
                for entry in &system.frames.frame(frame).entries {
                    self.check_type(&entry.ty);
                }
            }
            _ => {}
        }
    }

    // ── Visitors (C7) ──

    fn check_variable_declaration(&mut self, var: &Variable) {
        self.context = Context::Declaration;
        let system = self.system;
        let ty = &system.symbols.symbol(var.symbol).ty;
        self.check_type(ty);
        self.check_variable_initialiser(var);
        self.context = Context::None;
    }

    fn check_state(&mut self, state: &State) {
        if let Some(invariant) = state.invariant {
            self.context = Context::Invariant;
            self.annotate(invariant);
            if !self.is_invariant(invariant) {
                self.error(invariant, "Invalid invariant expression");
            }
            if !self.is_side_effect_free(invariant) {
                self.error(invariant, "Invariant must be side effect free");
            }
            self.context = Context::None;
        }
    }

    fn check_transition(&mut self, trans: &Transition) {
        let system = self.system;

        if let Some(guard) = trans.guard {
            self.context = Context::Guard;
            self.annotate(guard);
            if !self.is_guard(guard) {
                self.error(guard, "Invalid guard");
            } else if !self.is_side_effect_free(guard) {
                self.error(guard, "Guard must be side effect free");
            }
        }

        if let Some(sync) = trans.sync {
            self.context = Context::Sync;
            self.annotate(sync);
            if !self.is_side_effect_free(sync) {
                self.error(sync, "Synchronisation must be side effect free");
            }

            let channel = system.exprs.sub(sync)[0];
            let channel_ty = self.types.get(channel).clone();
            if channel_ty.base() != Base::Channel {
                self.error(channel, "Channel expected here");
            } else {
                let has_clock_guard = match trans.guard {
                    Some(guard) => !self.is_integer(guard),
                    None => false,
                };
                let receives = matches!(system.exprs.kind(sync), ExprKind::Sync(SyncDir::Recv));

                if channel_ty.prefixes.urgent && has_clock_guard {
                    self.error(sync, "Clock guards are not allowed on urgent transitions.");
                }
                if channel_ty.prefixes.broadcast && receives && has_clock_guard {
                    self.error(sync, "Clock guards are not allowed on broadcast receivers.");
                }
            }
        }

        if let Some(assign) = trans.assign {
            self.context = Context::Assignment;
            self.annotate(assign);
            if !self.is_integer(assign) && !self.is_clock(assign) && !self.is_record(assign) {
                self.error(assign, "Invalid assignment expression");
            }
            // An explicit `1` is the conventional no-op and stays silent.
            let is_noop = matches!(system.exprs.kind(assign), ExprKind::Constant(1));
            if !is_noop && self.is_side_effect_free(assign) {
                self.warning(assign, "Expression does not have any effect");
            }
        }

        self.context = Context::None;
    }

    fn check_instance(&mut self, instance: &Instance) {
        let system = self.system;
        let mut interp = Interpreter::new(&system.exprs, &system.constants);
        interp.add_mapping(&instance.mapping);

        self.context = Context::Instantiation;
        for &(param, arg) in &instance.mapping {
            self.annotate(arg);

            if !self.is_side_effect_free(arg) {
                self.error(arg, "Argument must be side effect free");
                continue;
            }

            // Three acceptable shapes: a constant reference bound to a
            // computable argument, a reference bound to a unique location,
            // or a value parameter bound to a computable argument.
            let param_ty = &system.symbols.symbol(param).ty;
            let ref_ = param_ty.prefixes.reference;
            let constant = param_ty.prefixes.constant;
            let computable = !system.exprs.depends_on(arg, &self.persistent);

            let unique = ref_
                && is_unique_reference(system, &*self.types, &self.persistent, arg);
            if !(ref_ && constant && computable) && !(if ref_ { unique } else { computable }) {
                if ref_ && !constant && !self.is_lhs_value(arg) {
                    // The compatibility checker names the specific
                    // requirement that failed.
                    self.check_parameter_compatible(&interp, param_ty, arg);
                } else {
                    self.error(arg, "Incompatible argument");
                }
                continue;
            }

            self.check_parameter_compatible(&interp, param_ty, arg);
        }
        self.context = Context::None;
    }

    fn check_query(&mut self, query: &Query) {
        self.context = Context::None;
        let system = self.system;
        let expr = query.expr;
        self.annotate(expr);
        if !self.is_side_effect_free(expr) {
            self.error(expr, "Property must be side effect free");
        }

        let valid = if system.exprs.kind(expr) == ExprKind::Leadsto {
            let sub = system.exprs.sub(expr);
            self.is_constraint(sub[0]) && self.is_constraint(sub[1])
        } else {
            self.is_constraint(expr)
        };
        if !valid {
            self.error(expr, "Property must be a constraint");
        }
    }

    // ── Function bodies ──

    fn check_function(&mut self, func: &Function) {
        for stmt in &func.body {
            self.check_statement(stmt);
        }
    }

    fn check_assignment_expression_in_function(&mut self, e: ExprId) {
        if !self.is_integer(e) && !self.is_clock(e) && !self.is_record(e) {
            self.error(e, "Invalid expression in function");
        }
    }

    fn check_conditional_expression_in_function(&mut self, e: ExprId) {
        if !self.is_integer(e) {
            self.error(e, "Boolean expected here");
        }
    }

    fn check_statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Empty | Stmt::Break | Stmt::Continue => {}
            Stmt::Expr(e) => {
                self.annotate(*e);
                self.check_assignment_expression_in_function(*e);
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.check_statement(s);
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.annotate(*cond);
                self.check_conditional_expression_in_function(*cond);
                self.check_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_statement(else_branch);
                }
            }
            Stmt::While { cond, body } => {
                self.annotate(*cond);
                self.check_conditional_expression_in_function(*cond);
                self.check_statement(body);
            }
            Stmt::DoWhile { body, cond } => {
                self.annotate(*cond);
                self.check_conditional_expression_in_function(*cond);
                self.check_statement(body);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.annotate(*init);
                self.annotate(*cond);
                self.annotate(*step);
                self.check_assignment_expression_in_function(*init);
                self.check_conditional_expression_in_function(*cond);
                self.check_assignment_expression_in_function(*step);
                self.check_statement(body);
            }
            Stmt::Switch { cond, arms } => {
                self.annotate(*cond);
                if !self.is_integer(*cond) {
                    self.error(*cond, "Integer expression expected");
                }
                for arm in arms {
                    self.check_statement(arm);
                }
            }
            Stmt::Case { cond, body } => {
                self.annotate(*cond);
                if !self.is_integer(*cond) {
                    self.error(*cond, "Integer expression expected");
                }
                for s in body {
                    self.check_statement(s);
                }
            }
            Stmt::DefaultCase { body } => {
                for s in body {
                    self.check_statement(s);
                }
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.annotate(*value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{synth_span, ExprPool, Prefixes};

    #[test]
    fn channel_capability_ordering() {
        let plain = Type::channel();
        let urgent = Type::channel().with_prefixes(Prefixes {
            urgent: true,
            ..Prefixes::default()
        });
        let broadcast = Type::channel().with_prefixes(Prefixes {
            broadcast: true,
            ..Prefixes::default()
        });
        let urgent_broadcast = Type::channel().with_prefixes(Prefixes {
            urgent: true,
            broadcast: true,
            ..Prefixes::default()
        });
        assert_eq!(channel_capability(&urgent), 0);
        assert_eq!(channel_capability(&urgent_broadcast), 0);
        assert_eq!(channel_capability(&broadcast), 1);
        assert_eq!(channel_capability(&plain), 2);
    }

    #[test]
    fn predicate_lattice_is_ordered() {
        let mut pool = ExprPool::default();
        let mut types = TypeMap::new();

        let int_e = pool.add(ExprKind::Constant(1), vec![], synth_span());
        types.set(int_e, Type::int());
        let inv_e = pool.add(ExprKind::Lt, vec![], synth_span());
        types.set(inv_e, Type::invariant());
        let grd_e = pool.add(ExprKind::Lt, vec![], synth_span());
        types.set(grd_e, Type::guard());
        let con_e = pool.add(ExprKind::Or, vec![], synth_span());
        types.set(con_e, Type::constraint());

        // INT ⊂ INVARIANT ⊂ GUARD ⊂ CONSTRAINT
        assert!(is_invariant(&types, int_e));
        assert!(is_guard(&types, int_e));
        assert!(is_constraint(&types, int_e));

        assert!(is_invariant(&types, inv_e));
        assert!(!is_integer(&types, inv_e));

        assert!(is_guard(&types, grd_e));
        assert!(!is_invariant(&types, grd_e));

        assert!(is_constraint(&types, con_e));
        assert!(!is_guard(&types, con_e));
    }

    #[test]
    fn persistent_set_skips_constants() {
        use crate::parser;

        let parsed = parser::parse_document("const int N = 1; int x; clock c;", true);
        let result = crate::builder::build(&parsed.output.unwrap());
        let set = persistent_set(&result.system);
        let n = result.system.globals[0].symbol;
        let x = result.system.globals[1].symbol;
        let c = result.system.globals[2].symbol;
        assert!(!set.contains(&n));
        assert!(set.contains(&x));
        assert!(set.contains(&c));
    }
}
