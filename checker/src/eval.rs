// eval.rs — Partial constant evaluation
//
// Interprets expressions over a valuation of constants and instantiation
// parameters. Used by the type checker to compare declared ranges, array
// sizes and initializer values.
//
// Preconditions: expressions live in the pool the interpreter was built with.
// Postconditions: never mutates the pool; every failure is the recoverable
//   `NotComputable`.
// Failure modes: unbound symbols, non-constant kinds, division by zero,
//   arithmetic overflow.
// Side effects: none.

use std::collections::HashMap;

use crate::ir::{ExprId, ExprKind, ExprPool, SymbolId};

/// Recoverable "not computable at analysis time" indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotComputable;

pub type EvalResult<T> = Result<T, NotComputable>;

// ── Integer ranges ───────────────────────────────────────────────────────

/// A closed integer interval. The default value is the empty range, which
/// acts as the identity of `join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub lower: i32,
    pub upper: i32,
}

impl Range {
    pub fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    pub fn empty() -> Self {
        Self {
            lower: i32::MAX,
            upper: i32::MIN,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    pub fn contains(&self, other: Range) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    pub fn contains_value(&self, value: i32) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn intersect(&self, other: Range) -> Range {
        Range {
            lower: self.lower.max(other.lower),
            upper: self.upper.min(other.upper),
        }
    }

    /// Extend the range to cover `value`.
    pub fn join(&self, value: i32) -> Range {
        Range {
            lower: self.lower.min(value),
            upper: self.upper.max(value),
        }
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::empty()
    }
}

// ── Interpreter ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Binding {
    Value(i32),
    Expr(ExprId),
}

/// Evaluates expressions against a valuation. Pure with respect to the
/// pool; re-entrant.
pub struct Interpreter<'a> {
    exprs: &'a ExprPool,
    bindings: HashMap<SymbolId, Binding>,
}

impl<'a> Interpreter<'a> {
    pub fn new(exprs: &'a ExprPool, constants: &HashMap<SymbolId, i32>) -> Self {
        let bindings = constants
            .iter()
            .map(|(&sym, &v)| (sym, Binding::Value(v)))
            .collect();
        Self { exprs, bindings }
    }

    /// Add an instantiation mapping: parameter symbol → argument expression.
    pub fn add_mapping(&mut self, mapping: &[(SymbolId, ExprId)]) {
        for &(sym, arg) in mapping {
            self.bindings.insert(sym, Binding::Expr(arg));
        }
    }

    /// Evaluate to a single integer.
    pub fn evaluate(&self, e: ExprId) -> EvalResult<i32> {
        let node = self.exprs.node(e);
        let sub = &node.sub;
        match node.kind {
            ExprKind::Constant(v) => Ok(v),
            ExprKind::Ident(sym) => match self.bindings.get(&sym) {
                Some(Binding::Value(v)) => Ok(*v),
                Some(Binding::Expr(arg)) => self.evaluate(*arg),
                None => Err(NotComputable),
            },
            ExprKind::Neg => self.evaluate(sub[0])?.checked_neg().ok_or(NotComputable),
            ExprKind::Not => Ok((self.evaluate(sub[0])? == 0) as i32),
            ExprKind::Add => self.binary(sub, i32::checked_add),
            ExprKind::Sub => self.binary(sub, i32::checked_sub),
            ExprKind::Mul => self.binary(sub, i32::checked_mul),
            ExprKind::Div => self.binary(sub, i32::checked_div),
            ExprKind::Mod => self.binary(sub, i32::checked_rem),
            ExprKind::BitAnd => Ok(self.evaluate(sub[0])? & self.evaluate(sub[1])?),
            ExprKind::BitOr => Ok(self.evaluate(sub[0])? | self.evaluate(sub[1])?),
            ExprKind::BitXor => Ok(self.evaluate(sub[0])? ^ self.evaluate(sub[1])?),
            ExprKind::Shl => self.shift(sub, i32::checked_shl),
            ExprKind::Shr => self.shift(sub, i32::checked_shr),
            ExprKind::And => {
                Ok((self.evaluate(sub[0])? != 0 && self.evaluate(sub[1])? != 0) as i32)
            }
            ExprKind::Or => {
                Ok((self.evaluate(sub[0])? != 0 || self.evaluate(sub[1])? != 0) as i32)
            }
            ExprKind::Min => Ok(self.evaluate(sub[0])?.min(self.evaluate(sub[1])?)),
            ExprKind::Max => Ok(self.evaluate(sub[0])?.max(self.evaluate(sub[1])?)),
            ExprKind::Lt => Ok((self.evaluate(sub[0])? < self.evaluate(sub[1])?) as i32),
            ExprKind::Le => Ok((self.evaluate(sub[0])? <= self.evaluate(sub[1])?) as i32),
            ExprKind::Eq => Ok((self.evaluate(sub[0])? == self.evaluate(sub[1])?) as i32),
            ExprKind::Ne => Ok((self.evaluate(sub[0])? != self.evaluate(sub[1])?) as i32),
            ExprKind::Ge => Ok((self.evaluate(sub[0])? >= self.evaluate(sub[1])?) as i32),
            ExprKind::Gt => Ok((self.evaluate(sub[0])? > self.evaluate(sub[1])?) as i32),
            ExprKind::Ternary => {
                if self.evaluate(sub[0])? != 0 {
                    self.evaluate(sub[1])
                } else {
                    self.evaluate(sub[2])
                }
            }
            ExprKind::Comma => self.evaluate(sub[1]),
            _ => Err(NotComputable),
        }
    }

    /// Evaluate to a flattened value vector: lists yield the concatenation
    /// of their elements, everything else a single value.
    pub fn evaluate_flat(&self, e: ExprId) -> EvalResult<Vec<i32>> {
        if self.exprs.kind(e) == ExprKind::List {
            let mut values = Vec::new();
            for &element in self.exprs.sub(e) {
                values.extend(self.evaluate_flat(element)?);
            }
            Ok(values)
        } else {
            Ok(vec![self.evaluate(e)?])
        }
    }

    /// Evaluate a declared range (pair of bound expressions).
    pub fn evaluate_range(&self, bounds: (ExprId, ExprId)) -> EvalResult<Range> {
        Ok(Range::new(
            self.evaluate(bounds.0)?,
            self.evaluate(bounds.1)?,
        ))
    }

    fn binary(&self, sub: &[ExprId], op: fn(i32, i32) -> Option<i32>) -> EvalResult<i32> {
        op(self.evaluate(sub[0])?, self.evaluate(sub[1])?).ok_or(NotComputable)
    }

    fn shift(&self, sub: &[ExprId], op: fn(i32, u32) -> Option<i32>) -> EvalResult<i32> {
        let amount = self.evaluate(sub[1])?;
        if !(0..32).contains(&amount) {
            return Err(NotComputable);
        }
        op(self.evaluate(sub[0])?, amount as u32).ok_or(NotComputable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::synth_span;

    fn pool() -> ExprPool {
        ExprPool::default()
    }

    fn constant(p: &mut ExprPool, v: i32) -> ExprId {
        p.add(ExprKind::Constant(v), vec![], synth_span())
    }

    fn binary(p: &mut ExprPool, kind: ExprKind, l: ExprId, r: ExprId) -> ExprId {
        p.add(kind, vec![l, r], synth_span())
    }

    #[test]
    fn arithmetic() {
        let mut p = pool();
        let a = constant(&mut p, 6);
        let b = constant(&mut p, 4);
        let sum = binary(&mut p, ExprKind::Add, a, b);
        let quot = binary(&mut p, ExprKind::Div, a, b);
        let min = binary(&mut p, ExprKind::Min, a, b);
        let interp = Interpreter::new(&p, &HashMap::new());
        assert_eq!(interp.evaluate(sum), Ok(10));
        assert_eq!(interp.evaluate(quot), Ok(1));
        assert_eq!(interp.evaluate(min), Ok(4));
    }

    #[test]
    fn division_by_zero_is_not_computable() {
        let mut p = pool();
        let a = constant(&mut p, 1);
        let z = constant(&mut p, 0);
        let div = binary(&mut p, ExprKind::Div, a, z);
        let interp = Interpreter::new(&p, &HashMap::new());
        assert_eq!(interp.evaluate(div), Err(NotComputable));
    }

    #[test]
    fn unbound_symbol_is_not_computable() {
        let mut p = pool();
        let x = p.add(ExprKind::Ident(SymbolId(0)), vec![], synth_span());
        let interp = Interpreter::new(&p, &HashMap::new());
        assert_eq!(interp.evaluate(x), Err(NotComputable));
    }

    #[test]
    fn constant_valuation_and_mapping() {
        let mut p = pool();
        let x = p.add(ExprKind::Ident(SymbolId(0)), vec![], synth_span());
        let y = p.add(ExprKind::Ident(SymbolId(1)), vec![], synth_span());
        let sum = binary(&mut p, ExprKind::Add, x, y);
        let five = constant(&mut p, 5);

        let mut constants = HashMap::new();
        constants.insert(SymbolId(0), 3);
        let mut interp = Interpreter::new(&p, &constants);
        interp.add_mapping(&[(SymbolId(1), five)]);
        assert_eq!(interp.evaluate(sum), Ok(8));
    }

    #[test]
    fn flatten_lists() {
        let mut p = pool();
        let a = constant(&mut p, 1);
        let b = constant(&mut p, 2);
        let inner = p.add(ExprKind::List, vec![a, b], synth_span());
        let c = constant(&mut p, 3);
        let outer = p.add(ExprKind::List, vec![inner, c], synth_span());
        let interp = Interpreter::new(&p, &HashMap::new());
        assert_eq!(interp.evaluate_flat(outer), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn range_operations() {
        let r = Range::new(0, 10);
        assert!(r.contains(Range::new(2, 5)));
        assert!(!r.contains(Range::new(-1, 5)));
        assert!(r.contains_value(10));
        assert!(!r.contains_value(11));
        assert!(r.intersect(Range::new(11, 20)).is_empty());
        assert_eq!(Range::empty().join(7), Range::new(7, 7));
        assert_eq!(Range::new(3, 4).join(1), Range::new(1, 4));
    }

    #[test]
    fn ternary_and_comparisons() {
        let mut p = pool();
        let a = constant(&mut p, 2);
        let b = constant(&mut p, 3);
        let cond = binary(&mut p, ExprKind::Lt, a, b);
        let pick = p.add(ExprKind::Ternary, vec![cond, a, b], synth_span());
        let interp = Interpreter::new(&p, &HashMap::new());
        assert_eq!(interp.evaluate(pick), Ok(2));
    }
}
