// Property-based tests for checker invariants.
//
// Four categories:
// 1. Constant initializers: in-range values pass, out-of-range values
//    produce exactly one diagnostic
// 2. Lattice monotonicity of conjunction over boolean-valued expressions
// 3. Channel capability monotonicity (exhaustive over prefix combinations)
// 4. Closure properties of side-effect freedom and left values
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use tack::check;
use tack::diag::{DiagLevel, ErrorSink};
use tack::driver;
use tack::ir::{Base, ExprId, System, TypeMap};

// ── Test helpers ────────────────────────────────────────────────────────────

fn check_model(source: &str) -> (System, TypeMap, ErrorSink) {
    let mut system = System::new();
    let mut types = TypeMap::new();
    let mut sink = ErrorSink::new();
    driver::parse_xta_str(source, &mut system, &mut types, &mut sink, true);
    (system, types, sink)
}

fn error_messages(sink: &ErrorSink) -> Vec<String> {
    sink.diagnostics()
        .iter()
        .filter(|d| d.level == DiagLevel::Error)
        .map(|d| d.message.clone())
        .collect()
}

fn lattice_rank(base: Base) -> Option<u8> {
    match base {
        Base::Int | Base::Bool => Some(0),
        Base::Invariant => Some(1),
        Base::Guard => Some(2),
        Base::Constraint => Some(3),
        _ => None,
    }
}

// ── 1. Constant initializers ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn in_range_initialisers_pass(
        (lo, width, pick) in (-100..100i32, 0..50i32, 0..50i32)
    ) {
        let hi = lo + width;
        let value = lo + pick % (width + 1);
        let source = format!("int[{lo},{hi}] v = {value};");
        let (_, _, sink) = check_model(&source);
        let errors = error_messages(&sink);
        prop_assert!(errors.is_empty(), "unexpected errors for '{}': {:?}", source, errors);
    }

    #[test]
    fn out_of_range_initialisers_fail(
        (lo, width, above, off) in (-100..100i32, 0..50i32, proptest::bool::ANY, 0..50i32)
    ) {
        let hi = lo + width;
        let value = if above { hi + 1 + off } else { lo - 1 - off };
        let source = format!("int[{lo},{hi}] v = {value};");
        let (_, _, sink) = check_model(&source);
        let errors = error_messages(&sink);
        prop_assert_eq!(errors.len(), 1, "expected one error for '{}', got {:?}", source, &errors);
        prop_assert!(errors[0].contains("Initialiser is out of range"));
    }
}

// ── 2. Lattice monotonicity of conjunction ──────────────────────────────────

// Atoms over `clock x; int i;` with known lattice ranks.
const ATOMS: [(&str, u8); 4] = [
    ("i", 0),        // integer
    ("x < 1", 1),    // invariant
    ("1 < x", 2),    // guard
    ("x != 1", 3),   // constraint
];

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 50,
        .. ProptestConfig::default()
    })]

    #[test]
    fn conjunction_is_monotone(
        (left, right) in (0..ATOMS.len(), 0..ATOMS.len())
    ) {
        let (atom_l, rank_l) = ATOMS[left];
        let (atom_r, rank_r) = ATOMS[right];

        let mut system = System::new();
        let mut types = TypeMap::new();
        let mut sink = ErrorSink::new();
        driver::parse_xta_str("clock x; int i;", &mut system, &mut types, &mut sink, true);
        prop_assert!(!sink.has_errors());

        let query = format!("{atom_l} && {atom_r}");
        driver::check_queries_str(&query, &mut system, &mut types, &mut sink);
        prop_assert!(!sink.has_errors(), "query '{}' errored: {:?}", query, sink.diagnostics());

        let expr = system.queries[0].expr;
        let rank = lattice_rank(types.get(expr).base())
            .expect("conjunction of boolean-valued atoms has a lattice rank");
        prop_assert!(
            rank >= rank_l.max(rank_r),
            "'{}' ranked {} below operands ({}, {})",
            query, rank, rank_l, rank_r
        );
    }
}

// ── 3. Channel capability monotonicity (exhaustive) ─────────────────────────

#[test]
fn channel_capability_monotonicity() {
    let combos: [(&str, i32); 4] = [
        ("", 2),
        ("broadcast ", 1),
        ("urgent ", 0),
        ("urgent broadcast ", 0),
    ];

    for &(param_prefix, param_cap) in &combos {
        for &(arg_prefix, arg_cap) in &combos {
            let source = format!(
                "{arg_prefix}chan g;\n\
                 process T({param_prefix}chan &c) {{ state s0; init s0; }}\n\
                 T1 := T(g);\n\
                 system T1;"
            );
            let (_, _, sink) = check_model(&source);
            let errors = error_messages(&sink);
            if arg_cap < param_cap {
                assert_eq!(
                    errors.len(),
                    1,
                    "'{arg_prefix}chan' to '{param_prefix}chan' parameter: {errors:?}"
                );
                assert!(errors[0].contains("Incompatible channel type"));
            } else {
                assert!(
                    errors.is_empty(),
                    "'{arg_prefix}chan' to '{param_prefix}chan' parameter: {errors:?}"
                );
            }
        }
    }
}

// ── 4. Closure properties ───────────────────────────────────────────────────

// Assignment-label expressions with and without side effects.
const ASSIGN_SAMPLES: [&str; 6] = [
    "i := 1",
    "i++",
    "i + j",
    "i := j := 2",
    "i := 1, j := 2",
    "(i > 0 ? i : j) + 1",
];

fn walk_side_effect_closure(
    system: &System,
    persistent: &std::collections::HashSet<tack::ir::SymbolId>,
    e: ExprId,
) {
    if !system.exprs.changes_variable(e, persistent) {
        for &child in system.exprs.sub(e) {
            assert!(
                !system.exprs.changes_variable(child, persistent),
                "side-effect-free parent with side-effecting child"
            );
        }
    }
    for &child in system.exprs.sub(e) {
        walk_side_effect_closure(system, persistent, child);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        max_shrink_iters: 20,
        .. ProptestConfig::default()
    })]

    #[test]
    fn side_effect_freedom_is_closed_under_subexpressions(
        idx in 0..ASSIGN_SAMPLES.len()
    ) {
        let source = format!(
            "int i; int j;\n\
             process P() {{\n\
               state s0, s1;\n\
               init s0;\n\
               trans s0 -> s1 {{ assign {}; }};\n\
             }}\n\
             P1 := P();\n\
             system P1;",
            ASSIGN_SAMPLES[idx]
        );
        let (system, _, _) = check_model(&source);
        let persistent = check::persistent_set(&system);
        let assign = system.templates[0].transitions[0].assign.unwrap();
        walk_side_effect_closure(&system, &persistent, assign);
    }
}

#[test]
fn negation_destroys_lvalueness() {
    let (system, types, sink) = check_model(
        "int i;\n\
         process P() {\n\
           state s0, s1;\n\
           init s0;\n\
           trans s0 -> s1 { guard !i; };\n\
         }\n\
         P1 := P();\n\
         system P1;",
    );
    assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    let guard = system.templates[0].transitions[0].guard.unwrap();
    let operand = system.exprs.sub(guard)[0];
    assert!(check::is_lhs_value(&system, &types, operand));
    assert!(!check::is_lhs_value(&system, &types, guard));
}

#[test]
fn inline_if_lvalue_requires_both_branches() {
    let (system, types, sink) = check_model(
        "int i; int j;\n\
         process P() {\n\
           state s0, s1;\n\
           init s0;\n\
           trans s0 -> s1 { assign (i > 0 ? i : j) := 1; };\n\
         }\n\
         P1 := P();\n\
         system P1;",
    );
    assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    let assign = system.templates[0].transitions[0].assign.unwrap();
    let ternary = system.exprs.sub(assign)[0];
    assert!(check::is_lhs_value(&system, &types, ternary));
    for &branch in &system.exprs.sub(ternary)[1..] {
        assert!(check::is_lhs_value(&system, &types, branch));
    }
}

#[test]
fn inline_if_with_mismatched_ranges_is_not_an_lvalue() {
    let (_, _, sink) = check_model(
        "int[0,5] a; int[0,9] b; int c;\n\
         process P() {\n\
           state s0, s1;\n\
           init s0;\n\
           trans s0 -> s1 { assign (c ? a : b) := 1; };\n\
         }\n\
         P1 := P();\n\
         system P1;",
    );
    let errors = error_messages(&sink);
    assert!(
        errors.iter().any(|m| m.contains("Left hand side value expected")),
        "got {errors:?}"
    );
}
