//! End-to-end equivalence between interpreted and compiled loop execution.
//!
//! Every scenario runs the same program twice, once with the specializer
//! attached and once without, and compares the resulting scopes variable
//! by variable at the bit level. The dispatch counters then pin down which
//! path actually ran.

use mira_parser::{AstBuilder, Stmt};
use mira_runtime::{BinOp, RuntimeFault, Scope, Value};
use mira_vm::Interpreter;

/// Run `program` through both evaluators and assert the named variables
/// come out bit-identical. Returns the jitted evaluator for counter
/// checks.
fn run_both(program: &[Stmt], vars: &[&str]) -> (Interpreter, Scope) {
    let mut plain_scope = Scope::new();
    Interpreter::interpret_only()
        .run(&mut plain_scope, program)
        .expect("interpreted run");

    let mut jitted = Interpreter::new();
    let mut jit_scope = Scope::new();
    jitted.run(&mut jit_scope, program).expect("jitted run");

    for name in vars {
        assert_values_eq(name, plain_scope.get(name), jit_scope.get(name));
    }
    (jitted, jit_scope)
}

fn assert_values_eq(name: &str, a: Option<&Value>, b: Option<&Value>) {
    match (a, b) {
        (Some(Value::Scalar(x)), Some(Value::Scalar(y))) => {
            assert_eq!(x.to_bits(), y.to_bits(), "scalar '{name}' differs");
        }
        (a, b) => assert_eq!(a, b, "variable '{name}' differs"),
    }
}

fn stats(interp: &Interpreter) -> mira_jit::DispatchStats {
    *interp.jit().expect("jit attached").stats()
}

#[test]
fn accumulating_loop_matches_interpretation() {
    // a = 2; for i = 1:5 { b = a + i }
    let mut b = AstBuilder::new();
    let program = [
        b.assign("a", b.num(2.0)),
        b.for_stmt(
            "i",
            b.range(1.0, 5.0),
            vec![b.assign("b", b.binary(BinOp::Add, b.ident("a"), b.ident("i")))],
        ),
    ];
    let (jitted, scope) = run_both(&program, &["a", "b", "i"]);
    assert_eq!(scope.get("b"), Some(&Value::Scalar(7.0)));
    let s = stats(&jitted);
    assert_eq!(s.compiles, 1);
    assert_eq!(s.bailouts, 0);
}

#[test]
fn zero_trip_loop_touches_nothing() {
    let mut b = AstBuilder::new();
    let program = [
        b.assign("r", b.range(1.0, 0.0)),
        b.for_stmt(
            "i",
            b.ident("r"),
            vec![b.assign("b", b.binary(BinOp::Add, b.ident("i"), b.num(1.0)))],
        ),
    ];
    let (jitted, scope) = run_both(&program, &["b", "i"]);
    assert!(scope.get("b").is_none());
    assert!(scope.get("i").is_none());
    assert_eq!(stats(&jitted).compiles, 1);
}

#[test]
fn division_is_ieee_on_both_paths() {
    // d = 0; for i = 1:3 { d = i / (i - 2) }  -- hits a division by zero
    let mut b = AstBuilder::new();
    let program = [
        b.assign("d", b.num(0.0)),
        b.assign("last", b.num(0.0)),
        b.for_stmt(
            "i",
            b.range(1.0, 3.0),
            vec![
                b.assign(
                    "d",
                    b.binary(
                        BinOp::Div,
                        b.ident("i"),
                        b.binary(BinOp::Sub, b.ident("i"), b.num(2.0)),
                    ),
                ),
                b.if_stmt(vec![b.clause(
                    b.binary(BinOp::Eq, b.ident("i"), b.num(2.0)),
                    vec![b.assign("last", b.ident("d"))],
                )]),
            ],
        ),
    ];
    let (jitted, scope) = run_both(&program, &["d", "last", "i"]);
    // at i == 2 the quotient is 2/0
    assert_eq!(scope.get("last"), Some(&Value::Scalar(f64::INFINITY)));
    assert_eq!(stats(&jitted).compiles, 1);
}

#[test]
fn conditionals_inside_the_loop() {
    // c = 0; for i = 1:6 { if i > 4 { c = c + i } elseif i > 2 { c = c + 1 }
    //                      else { c = c - 1 } }
    let mut b = AstBuilder::new();
    let branch = b.if_stmt(vec![
        b.clause(
            b.binary(BinOp::Gt, b.ident("i"), b.num(4.0)),
            vec![b.assign("c", b.binary(BinOp::Add, b.ident("c"), b.ident("i")))],
        ),
        b.clause(
            b.binary(BinOp::Gt, b.ident("i"), b.num(2.0)),
            vec![b.assign("c", b.binary(BinOp::Add, b.ident("c"), b.num(1.0)))],
        ),
        b.else_clause(vec![b.assign("c", b.binary(BinOp::Sub, b.ident("c"), b.num(1.0)))]),
    ]);
    let program = [
        b.assign("c", b.num(0.0)),
        b.for_stmt("i", b.range(1.0, 6.0), vec![branch]),
    ];
    let (jitted, scope) = run_both(&program, &["c", "i"]);
    // -1 -1 +1 +1 +5 +6 = 11
    assert_eq!(scope.get("c"), Some(&Value::Scalar(11.0)));
    assert_eq!(stats(&jitted).compiles, 1);
}

#[test]
fn nested_loops_compile_as_one_unit() {
    let mut b = AstBuilder::new();
    let inner = b.for_stmt(
        "j",
        b.range(1.0, 2.0),
        vec![b.assign("s", b.binary(BinOp::Add, b.ident("s"), b.ident("j")))],
    );
    let program = [
        b.assign("s", b.num(0.0)),
        b.for_stmt("i", b.range(1.0, 3.0), vec![inner]),
    ];
    let (jitted, scope) = run_both(&program, &["s", "i", "j"]);
    // three outer trips of (1 + 2)
    assert_eq!(scope.get("s"), Some(&Value::Scalar(9.0)));
    let s = stats(&jitted);
    // the outer loop absorbs the inner one; only one site is dispatched
    assert_eq!(s.attempts, 1);
    assert_eq!(s.compiles, 1);
}

#[test]
fn guard_rejects_rebound_capture() {
    let mut b = AstBuilder::new();
    // all captures pre-bound so the compiled entry is reusable
    let header = [
        b.assign("a", b.num(2.0)),
        b.assign("b", b.num(0.0)),
        b.assign("i", b.num(0.0)),
    ];
    let the_loop = b.for_stmt(
        "i",
        b.range(1.0, 5.0),
        vec![b.assign("b", b.binary(BinOp::Add, b.ident("a"), b.ident("i")))],
    );

    let mut jitted = Interpreter::new();
    let mut scope = Scope::new();
    jitted.run(&mut scope, &header).expect("header");
    jitted.run(&mut scope, std::slice::from_ref(&the_loop)).expect("first run");
    assert_eq!(scope.get("b"), Some(&Value::Scalar(7.0)));

    // same types: cached entry runs again
    jitted.run(&mut scope, std::slice::from_ref(&the_loop)).expect("second run");
    let s = stats(&jitted);
    assert_eq!(s.compiles, 1);
    assert_eq!(s.hits, 1);
    assert_eq!(s.guard_misses, 0);

    // rebinding a to a matrix invalidates the signature; the loop is
    // interpreted and still computes the elementwise result
    scope.set("a", Value::matrix(vec![2.0, 2.0]));
    jitted.run(&mut scope, std::slice::from_ref(&the_loop)).expect("third run");
    let s = stats(&jitted);
    assert_eq!(s.guard_misses, 1);
    assert_eq!(s.compiles, 1);
    assert_eq!(scope.get("b"), Some(&Value::matrix(vec![7.0, 7.0])));

    // scalar a again: the entry is still cached and matches
    scope.set("a", Value::Scalar(2.0));
    scope.set("b", Value::Scalar(0.0));
    jitted.run(&mut scope, std::slice::from_ref(&the_loop)).expect("fourth run");
    let s = stats(&jitted);
    assert_eq!(s.hits, 2);
    assert_eq!(s.compiles, 1);
    assert_eq!(scope.get("b"), Some(&Value::Scalar(7.0)));
}

#[test]
fn unsupported_bodies_bail_once_and_interpret() {
    let mut b = AstBuilder::new();
    let the_loop = b.for_stmt(
        "i",
        b.range(1.0, 3.0),
        vec![
            b.assign("n", b.num(0.0)),
            b.while_stmt(
                b.binary(BinOp::Lt, b.ident("n"), b.ident("i")),
                vec![b.assign("n", b.binary(BinOp::Add, b.ident("n"), b.num(1.0)))],
            ),
        ],
    );
    let program = [the_loop];

    let (jitted, scope) = run_both(&program, &["n", "i"]);
    assert_eq!(scope.get("n"), Some(&Value::Scalar(3.0)));
    let s = stats(&jitted);
    assert_eq!(s.bailouts, 1);
    assert_eq!(s.compiles, 0);

    // re-running the same tree does not retry compilation
    let mut jitted = Interpreter::new();
    let mut scope = Scope::new();
    jitted.run(&mut scope, &program).expect("first");
    jitted.run(&mut scope, &program).expect("second");
    let s = stats(&jitted);
    assert_eq!(s.attempts, 2);
    assert_eq!(s.bailouts, 1);
}

#[test]
fn boxed_matrix_arithmetic_matches() {
    let mut b = AstBuilder::new();
    // the builder has no matrix literal helper; splice the constant in
    let m = mira_parser::Expr::Const(Value::matrix(vec![1.0, 2.0, 3.0]));
    let program = [
        b.assign("m", m),
        b.assign("s", b.num(0.0)),
        b.for_stmt(
            "i",
            b.range(1.0, 3.0),
            vec![b.assign("s", b.binary(BinOp::Add, b.ident("m"), b.ident("m")))],
        ),
    ];
    let (jitted, scope) = run_both(&program, &["s", "i", "m"]);
    assert_eq!(scope.get("s"), Some(&Value::matrix(vec![2.0, 4.0, 6.0])));
    assert_eq!(stats(&jitted).compiles, 1);
}

#[test]
fn refcounts_are_neutral_across_compiled_runs() {
    let mut b = AstBuilder::new();
    let the_loop = b.for_stmt(
        "i",
        b.range(1.0, 4.0),
        vec![b.assign("c", b.binary(BinOp::Add, b.ident("m"), b.ident("m")))],
    );

    let mut jitted = Interpreter::new();
    let mut scope = Scope::new();
    scope.set("m", Value::matrix(vec![1.0, 2.0]));
    let before = scope.get("m").and_then(Value::strong_count);

    jitted.run(&mut scope, std::slice::from_ref(&the_loop)).expect("run");
    assert_eq!(stats(&jitted).compiles, 1);
    assert_eq!(scope.get("c"), Some(&Value::matrix(vec![2.0, 4.0])));
    assert_eq!(scope.get("m").and_then(Value::strong_count), before);
}

#[test]
fn faults_inside_compiled_code_match_interpretation() {
    let mut b = AstBuilder::new();
    let the_loop = b.for_stmt(
        "i",
        b.range(1.0, 3.0),
        vec![b.assign("x", b.binary(BinOp::Add, b.ident("p"), b.ident("q")))],
    );
    let program = [the_loop];

    let setup = |scope: &mut Scope| {
        scope.set("p", Value::matrix(vec![1.0, 2.0]));
        scope.set("q", Value::matrix(vec![1.0, 2.0, 3.0]));
    };

    let mut plain_scope = Scope::new();
    setup(&mut plain_scope);
    let plain_err = Interpreter::interpret_only()
        .run(&mut plain_scope, &program)
        .unwrap_err();

    let mut jit_scope = Scope::new();
    setup(&mut jit_scope);
    let jit_err = Interpreter::new().run(&mut jit_scope, &program).unwrap_err();

    assert_eq!(plain_err, jit_err);
    assert!(matches!(jit_err, RuntimeFault::Nonconformant { lhs: 2, rhs: 3 }));
}

#[test]
fn reading_an_unbound_variable_faults_on_both_paths() {
    // for i = 1:3 { b = u }  with u never bound: the compiled read must
    // fault like the interpreted one, not hand out Undef
    let mut b = AstBuilder::new();
    let program = [b.for_stmt("i", b.range(1.0, 3.0), vec![b.assign("b", b.ident("u"))])];

    let plain_err = Interpreter::interpret_only()
        .run(&mut Scope::new(), &program)
        .unwrap_err();
    assert!(matches!(plain_err, RuntimeFault::Undefined(ref n) if n == "u"));

    let jit_err = Interpreter::new().run(&mut Scope::new(), &program).unwrap_err();
    assert!(matches!(jit_err, RuntimeFault::UndefinedOperand));
}

#[test]
fn ans_binding_matches() {
    // a bare expression statement inside the loop rebinds ans
    let mut b = AstBuilder::new();
    let program = [
        b.assign("a", b.num(10.0)),
        b.for_stmt(
            "i",
            b.range(1.0, 3.0),
            vec![b.expr_stmt(b.binary(BinOp::Mul, b.ident("a"), b.ident("i")))],
        ),
    ];
    let (jitted, scope) = run_both(&program, &["ans", "i", "a"]);
    assert_eq!(scope.get("ans"), Some(&Value::Scalar(30.0)));
    assert_eq!(stats(&jitted).compiles, 1);
}

#[test]
fn descending_and_fractional_ranges_match() {
    let mut b = AstBuilder::new();
    let program = [
        b.assign("s", b.num(0.0)),
        b.for_stmt(
            "i",
            b.range_by(5.0, -2.0, 0.0),
            vec![b.assign("s", b.binary(BinOp::Add, b.ident("s"), b.ident("i")))],
        ),
        b.assign("t", b.num(0.0)),
        b.for_stmt(
            "x",
            b.range_by(0.0, 0.3, 1.0),
            vec![b.assign("t", b.binary(BinOp::Add, b.ident("t"), b.ident("x")))],
        ),
    ];
    let (jitted, scope) = run_both(&program, &["s", "t", "i", "x"]);
    // 5 + 3 + 1 = 9
    assert_eq!(scope.get("s"), Some(&Value::Scalar(9.0)));
    assert_eq!(stats(&jitted).compiles, 2);
}
