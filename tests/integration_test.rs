// ABOUTME: Comprehensive integration tests verifying all engine features work together

use jexl_engine::{Engine, HostObject, MapContext, Options, Permissions, Value};

fn cancellable_engine() -> Engine {
    Engine::new(
        Permissions::unrestricted(),
        Options {
            cancellable: true,
            ..Options::default()
        },
    )
}

fn engine() -> Engine {
    Engine::new(Permissions::unrestricted(), Options::default())
}

fn eval(engine: &Engine, source: &str) -> Value {
    let expr = engine.create_expression(source).expect("parse failed");
    let ctx = MapContext::new();
    expr.evaluate(&ctx).expect("evaluate failed")
}

fn run(engine: &Engine, source: &str) -> Value {
    let script = engine.create_script(source).expect("parse failed");
    let ctx = MapContext::new();
    script.execute(&ctx).expect("execute failed")
}

#[test]
fn test_basic_arithmetic() {
    let e = engine();
    assert_eq!(eval(&e, "2 + 3 * 4"), Value::Int64(14));
    assert_eq!(eval(&e, "(2 + 3) * 4"), Value::Int64(20));
    assert_eq!(eval(&e, "10 / 4"), Value::Float64(2.5));
    assert_eq!(eval(&e, "10 \\ 4"), Value::Int64(2));
    assert_eq!(eval(&e, "10 % 3"), Value::Int64(1));
}

#[test]
fn test_string_concatenation_vs_numeric_add() {
    let e = engine();
    assert_eq!(eval(&e, "'foo' + 'bar'"), Value::str("foobar"));
    assert_eq!(eval(&e, "'n = ' + 5"), Value::str("n = 5"));
}

#[test]
fn test_bigint_overflow_promotion() {
    let e = engine();
    let result = eval(&e, "9223372036854775807 + 1");
    assert!(matches!(result, Value::BigInt(_)), "expected overflow to promote to BigInt, got {:?}", result);
}

#[test]
fn test_null_widening_policy() {
    let e = engine();
    assert_eq!(eval(&e, "null + 5"), Value::Int64(5));
    assert_eq!(eval(&e, "null + null"), Value::Null);
}

#[test]
fn test_ternary_and_coalesce() {
    let e = engine();
    assert_eq!(eval(&e, "true ? 1 : 2"), Value::Int64(1));
    assert_eq!(eval(&e, "false ? 1 : 2"), Value::Int64(2));
    assert_eq!(eval(&e, "5 ? : 9"), Value::Int64(5));
    assert_eq!(eval(&e, "null ?? 7"), Value::Int64(7));
    assert_eq!(eval(&e, "3 ?? 7"), Value::Int64(3));
}

#[test]
fn test_safe_navigation_short_circuits() {
    let e = engine();
    let ctx = MapContext::new();
    let expr = e.create_expression("a?.b.c").unwrap();
    assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Null);
}

#[test]
fn test_lexical_scope_and_shadowing() {
    let e = engine();
    let result = run(&e, "var y = 42; for (var x : [5,17,20]) { if (x > 10) return x } y;");
    assert_eq!(result, Value::Int64(17));

    let shadow = run(&e, "var x = 1; { var x = 2; } x;");
    assert_eq!(shadow, Value::Int64(1));
}

#[test]
fn test_antish_dotted_variable_resolution() {
    let e = engine();
    let ctx = MapContext::new();
    ctx.insert("a.b.c".to_string(), Value::Int64(99));
    let expr = e.create_expression("a.b.c").unwrap();
    assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Int64(99));
}

#[test]
fn test_array_map_set_literals_and_indexing() {
    let e = engine();
    assert_eq!(eval(&e, "[1,2,3][1]"), Value::Int64(2));
    assert_eq!(eval(&e, "{a: 1, b: 2}.a"), Value::Int64(1));
    assert_eq!(eval(&e, "{a: 1, b: 2}['b']"), Value::Int64(2));
    assert_eq!(eval(&e, "[1,2,3].length"), Value::Int64(3));
}

#[test]
fn test_for_each_over_map_iterates_values() {
    let e = engine();
    let result = run(&e, "var sum = 0; for (var v : {a: 1, b: 2, c: 3}) { sum = sum + v } sum;");
    assert_eq!(result, Value::Int64(6));
}

#[test]
fn test_lambda_closure_capture() {
    let e = engine();
    let result = run(&e, "var make = (n) -> { (m) -> { n + m } }; var add5 = make(5); add5(3);");
    assert_eq!(result, Value::Int64(8));
}

#[test]
fn test_try_catch_recovers_from_error() {
    let e = engine();
    let result = run(&e, "var r = 0; try { r = 1 / 0; } catch (err) { r = -1; } r;");
    assert_eq!(result, Value::Int64(-1));
}

#[test]
fn test_glob_matches_operator() {
    let e = engine();
    assert_eq!(eval(&e, "'hello' =~ 'h*o'"), Value::Bool(true));
    assert_eq!(eval(&e, "'hello' =~ 'x*'"), Value::Bool(false));
}

#[test]
fn test_namespace_function_call() {
    let e = engine();
    assert_eq!(eval(&e, "math:abs(-5)"), Value::Int64(5));
    assert_eq!(eval(&e, "math:max(1, 9, 4)"), Value::Int64(9));
}

#[test]
fn test_free_variable_analysis() {
    let e = engine();
    let script = e.create_script("a.b + c['d'].e;").unwrap();
    let mut vars = script.get_variables();
    vars.sort();
    let mut expected = vec![
        vec!["a".to_string(), "b".to_string()],
        vec!["c".to_string(), "d".to_string(), "e".to_string()],
    ];
    expected.sort();
    assert_eq!(vars, expected);
}

#[test]
fn test_class_loader_invalidation_bumps_version() {
    let e = engine();
    let script = e.create_script("1 + 1;").unwrap();
    let before = e.introspector_version();
    e.set_class_loader();
    assert_eq!(e.introspector_version(), before + 1);
    let ctx = MapContext::new();
    assert_eq!(script.execute(&ctx).unwrap(), Value::Int64(2));
}

#[derive(Debug)]
struct Point {
    x: i64,
    y: i64,
}

impl HostObject for Point {
    fn class_name(&self) -> &str {
        "Point"
    }

    fn field_names(&self) -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        match name {
            "x" => Some(Value::Int64(self.x)),
            "y" => Some(Value::Int64(self.y)),
            _ => None,
        }
    }

    fn method_names(&self) -> Vec<String> {
        vec!["distance".to_string()]
    }

    fn call_method(
        &self,
        name: &str,
        _overload_index: usize,
        _args: &[Value],
    ) -> Option<Result<Value, jexl_engine::JexlError>> {
        match name {
            "distance" => Some(Ok(Value::Float64(((self.x * self.x + self.y * self.y) as f64).sqrt()))),
            _ => None,
        }
    }
}

#[test]
fn test_host_object_field_and_method_access() {
    let e = engine();
    let ctx = MapContext::new();
    ctx.insert("p".to_string(), Value::Object(std::rc::Rc::new(Point { x: 3, y: 4 })));
    let expr = e.create_expression("p.x + p.y").unwrap();
    assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Int64(7));

    let call = e.create_expression("p.distance()").unwrap();
    assert_eq!(call.evaluate(&ctx).unwrap(), Value::Float64(5.0));
}

#[test]
fn test_cancellation_stops_in_flight_execution() {
    let e = cancellable_engine();
    let script = e.create_script("var i = 0; for (var x : 1..1000000) { i = i + x; } i;").unwrap();
    let ctx = MapContext::new();
    let cancel = script.callable();
    cancel.cancel();
    assert!(script.execute_cancellable(&ctx, &cancel).is_err());
}

#[test]
fn test_uncancelled_callable_runs_to_completion() {
    let e = cancellable_engine();
    let script = e.create_script("var i = 0; for (var x : 1..5) { i = i + x; } i;").unwrap();
    let ctx = MapContext::new();
    let cancel = script.callable();
    assert_eq!(script.execute_cancellable(&ctx, &cancel).unwrap(), Value::Int64(10));
}

#[test]
fn test_strict_mode_errors_on_unknown_identifier() {
    let e = engine();
    let ctx = MapContext::new();
    let expr = e.create_expression("unknownVar + 1").unwrap();
    assert!(expr.evaluate(&ctx).is_err());
}

#[test]
fn test_lenient_mode_treats_unknown_as_null() {
    let e = Engine::new(
        Permissions::unrestricted(),
        Options {
            strict: false,
            ..Options::default()
        },
    );
    let ctx = MapContext::new();
    let expr = e.create_expression("unknownVar").unwrap();
    assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Null);
}
