//! End-to-end tests against the `Engine` surface, covering the concrete scenarios and
//! boundary behaviours.

use std::time::Duration;

use gza::{Engine, EngineConfig, RuntimeErrorKind, ScriptValue};

fn run(source: &str) -> ScriptValue {
    let mut engine = Engine::create(EngineConfig::new());
    engine.register_helpers().unwrap();
    let script = engine.load_script(source).unwrap();
    engine.run(&script).unwrap()
}

fn as_number(value: &ScriptValue) -> f64 {
    match value {
        ScriptValue::Number(n) => *n,
        other => panic!("expected a number, found {other:?}"),
    }
}

#[test]
fn literal_addition() {
    assert_eq!(as_number(&run("3 + 4")), 7.0);
}

#[test]
fn globals_and_arithmetic() {
    assert_eq!(as_number(&run("var x = 10; var y = 20; x + y * 2")), 50.0);
}

#[test]
fn numeric_for_accumulates() {
    assert_eq!(as_number(&run("var s = 0; for i = 1, 100 do s = s + i end; s")), 5050.0);
}

#[test]
fn string_concatenation() {
    let result = run(r#"var a = "hello"; var b = "world"; a .. " " .. b"#);
    assert!(matches!(result, ScriptValue::Str(s) if s == "hello world"));
}

#[test]
fn recursive_fibonacci() {
    let source = "function f(n) if n <= 1 then return n end return f(n-1) + f(n-2) end; f(10)";
    assert_eq!(as_number(&run(source)), 55.0);
}

#[test]
fn range_for_sums_array_elements() {
    let source = "var arr = [1, 2, 3]; var t = 0; for i in 0 .. 3 { t = t + arr[i] } t";
    assert_eq!(as_number(&run(source)), 6.0);
}

#[test]
fn generic_for_over_array_next_sums_values() {
    let source = "var arr = [10, 20, 30]; var total = 0; \
                  for i, v in array_next, arr, 0 do total = total + v end; total";
    assert_eq!(as_number(&run(source)), 60.0);
}

#[test]
fn generic_for_over_table_next_visits_every_field() {
    let source = "var t = {}; t.a = 1; t.b = 2; t.c = 3; var total = 0; \
                  for k, v in table_next, t, 0 do total = total + v end; total";
    assert_eq!(as_number(&run(source)), 6.0);
}

#[test]
fn infinite_loop_times_out() {
    let mut engine = Engine::create(EngineConfig::new().with_execution_timeout(Duration::from_millis(50)));
    let script = engine.load_script("while true do end").unwrap();
    let err = engine.run(&script).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::ExecutionTimeout);
}

#[test]
fn division_by_zero_is_an_error_not_nan() {
    let mut engine = Engine::create(EngineConfig::new());
    let script = engine.load_script("1 / 0").unwrap();
    let err = engine.run(&script).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
}

#[test]
fn modulo_by_zero_is_an_error() {
    let mut engine = Engine::create(EngineConfig::new());
    let script = engine.load_script("1 % 0").unwrap();
    let err = engine.run(&script).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
}

#[test]
fn array_index_at_length_extends_beyond_raises() {
    let mut engine = Engine::create(EngineConfig::new());
    let script = engine.load_script("var a = [1, 2]; a[2] = 3; a[2]").unwrap();
    assert_eq!(as_number(&engine.run(&script).unwrap()), 3.0);

    let mut engine = Engine::create(EngineConfig::new());
    let script = engine.load_script("var a = [1, 2]; a[5] = 3").unwrap();
    let err = engine.run(&script).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::IndexError);
}

#[test]
fn division_and_modulo_satisfy_the_floor_identity() {
    // `/` is true (non-truncating) division here, so the round-trip law from spec §8
    // is checked via floor(a / b) == (a - a % b) / b, which is exact for integer-valued
    // a, b (see DESIGN.md "division semantics"): that quotient times b plus a % b is a.
    assert_eq!(as_number(&run("((17 - 17 % 5) / 5) * 5 + (17 % 5)")), 17.0);
    assert_eq!(as_number(&run("((-17 - -17 % 5) / 5) * 5 + (-17 % 5)")), -17.0);
}

#[test]
fn string_concatenation_is_associative() {
    let left = run(r#"("a" .. "b") .. "c""#);
    let right = run(r#""a" .. ("b" .. "c")"#);
    let (ScriptValue::Str(l), ScriptValue::Str(r)) = (left, right) else { panic!("expected strings") };
    assert_eq!(l, r);
    assert_eq!(l, "abc");
}

#[test]
fn global_substitution_reproduces_captures_via_backreference() {
    let result = run(r#"str_replace("a=1,b=2", "(%a)=(%d)", "%1:%1")"#);
    assert!(matches!(result, ScriptValue::Str(s) if s == "a:a,b:b"));
}

#[test]
fn short_circuit_and_or_skip_the_right_operand() {
    // A right-hand side that would itself error (division by zero) must never run.
    assert!(matches!(run("false && (1 / 0 > 0)"), ScriptValue::Bool(false)));
    assert!(matches!(run("true || (1 / 0 > 0)"), ScriptValue::Bool(true)));
}

#[test]
fn statements_evaluate_to_nil() {
    assert!(matches!(run("var x = 5"), ScriptValue::Nil));
    assert!(matches!(run("var x = 5; x = 6"), ScriptValue::Nil));
}

#[test]
fn globals_persist_across_engine_loads() {
    let mut engine = Engine::create(EngineConfig::new());
    let first = engine.load_script("var counter = 41").unwrap();
    engine.run(&first).unwrap();
    let second = engine.load_script("counter = counter + 1; counter").unwrap();
    assert_eq!(as_number(&engine.run(&second).unwrap()), 42.0);
}

#[test]
fn security_violation_gated_by_capability() {
    let mut locked = Engine::create(EngineConfig::new().with_allow_io(false));
    locked
        .register_function(
            "probe_io",
            Box::new(|ctx: &mut gza::NativeContext, _args: &[ScriptValue]| {
                ctx.security.check_io("fs::read", std::path::Path::new("/tmp/x"))?;
                Ok(ScriptValue::Bool(true))
            }),
        )
        .unwrap();
    let script = locked.load_script("probe_io()").unwrap();
    let err = locked.run(&script).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::SecurityViolation);

    let mut permissive = Engine::create(EngineConfig::new().with_allow_io(true));
    permissive
        .register_function(
            "probe_io",
            Box::new(|ctx: &mut gza::NativeContext, _args: &[ScriptValue]| {
                ctx.security.check_io("fs::read", std::path::Path::new("/tmp/x"))?;
                Ok(ScriptValue::Bool(true))
            }),
        )
        .unwrap();
    let script = permissive.load_script("probe_io()").unwrap();
    assert!(matches!(permissive.run(&script).unwrap(), ScriptValue::Bool(true)));
}

#[test]
fn heap_is_reclaimed_after_deinit() {
    let mut engine = Engine::create(EngineConfig::new());
    let script = engine.load_script("var arr = [1, 2, 3]; var t = { a = 1 }").unwrap();
    engine.run(&script).unwrap();
    assert_eq!(engine.heap_stats().live_objects, 2);
    engine.deinit().unwrap();
}
