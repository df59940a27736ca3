// Integration tests for the Lox interpreter.
//
// These drive complete programs through the compiler and VM and check the
// printed output (or the structured error). Covered here:
// - expressions, truthiness, and equality
// - global and local variables, scoping
// - control flow, break/continue
// - functions, closures, upvalue aliasing and closing
// - classes, initializers, fields, inheritance, super
// - runtime error messages and tracebacks
// - garbage collector behavior under stress mode

use std::sync::{Arc, Mutex};

use lox::errors::InterpretError;
use lox::vm::VM;

fn run_code(source: &str) -> Result<String, InterpretError> {
    let mut vm = VM::new();
    let buffer = Arc::new(Mutex::new(Vec::new()));
    vm.set_output(buffer.clone());
    vm.interpret(source)?;
    let output = buffer.lock().unwrap();
    Ok(String::from_utf8_lossy(&output).to_string())
}

fn run_stressed(source: &str) -> Result<String, InterpretError> {
    let mut vm = VM::new();
    vm.set_gc_stress(true);
    let buffer = Arc::new(Mutex::new(Vec::new()));
    vm.set_output(buffer.clone());
    vm.interpret(source)?;
    let output = buffer.lock().unwrap();
    Ok(String::from_utf8_lossy(&output).to_string())
}

fn expect_output(source: &str, expected: &str) {
    assert_eq!(run_code(source).expect("program should run"), expected);
}

fn expect_runtime_error(source: &str, message: &str) {
    match run_code(source) {
        Err(InterpretError::Runtime(error)) => assert_eq!(error.message, message),
        other => panic!("expected runtime error '{}', got {:?}", message, other),
    }
}

#[test]
fn test_expression_evaluation() {
    expect_output("print 1 + 2 * 3;", "7\n");
    expect_output("print (1 + 2) * 3;", "9\n");
    expect_output("print 10 / 4;", "2.5\n");
    expect_output("print -3 + 1;", "-2\n");
    expect_output("print !true;", "false\n");
    expect_output("print !nil;", "true\n");
    expect_output("print 1 < 2 and 2 <= 2;", "true\n");
    expect_output("print 1 > 2 or 2 >= 3;", "false\n");
}

#[test]
fn test_truthiness_follows_nil_and_false_only() {
    let source = r#"
        if (0) print "zero";
        if ("") print "empty";
        if (nil) print "nil"; else print "fell through";
    "#;
    expect_output(source, "zero\nempty\nfell through\n");
}

#[test]
fn test_equality_semantics() {
    expect_output("print nil == nil;", "true\n");
    expect_output("print 1 == 1;", "true\n");
    expect_output("print 1 == 2;", "false\n");
    expect_output(r#"print "a" == "a";"#, "true\n");
    expect_output(r#"print "a" == "b";"#, "false\n");
    expect_output(r#"print 1 == "1";"#, "false\n");
    expect_output("print true == 1;", "false\n");
}

#[test]
fn test_string_concatenation_and_interning() {
    expect_output(r#"var a = "foo"; var b = "bar"; print a + b;"#, "foobar\n");
    // Interning makes equality-by-identity exact: both evaluations of the
    // concatenation produce the same object.
    expect_output(r#"var a = "foo"; var b = "bar"; print a + b == a + b;"#, "true\n");
    expect_output(r#"print "foo" + "bar" == "foobar";"#, "true\n");
}

#[test]
fn test_block_scoping_shadows_and_restores() {
    let source = r#"
        var a = "outer";
        {
            var a = "inner";
            print a;
        }
        print a;
    "#;
    expect_output(source, "inner\nouter\n");
}

#[test]
fn test_while_and_for_loops() {
    expect_output(
        "var i = 0; var sum = 0; while (i < 5) { sum = sum + i; i = i + 1; } print sum;",
        "10\n",
    );
    expect_output(
        "var sum = 0; for (var i = 1; i <= 4; i = i + 1) { sum = sum + i; } print sum;",
        "10\n",
    );
}

#[test]
fn test_break_and_continue() {
    let source = r#"
        for (var i = 0; i < 10; i = i + 1) {
            if (i == 2) continue;
            if (i == 5) break;
            print i;
        }
    "#;
    expect_output(source, "0\n1\n3\n4\n");

    let nested = r#"
        var i = 0;
        while (true) {
            i = i + 1;
            if (i > 3) break;
            print i;
        }
    "#;
    expect_output(nested, "1\n2\n3\n");
}

#[test]
fn test_fibonacci_recursion() {
    let source = r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        print fib(10);
    "#;
    expect_output(source, "55\n");
}

#[test]
fn test_counter_closure() {
    let source = r#"
        fun makeCounter() {
            var i = 0;
            fun count() {
                i = i + 1;
                return i;
            }
            return count;
        }
        var c = makeCounter();
        print c();
        print c();
        print c();
    "#;
    expect_output(source, "1\n2\n3\n");
}

#[test]
fn test_closures_share_one_cell_per_variable() {
    let source = r#"
        var get;
        var set;
        fun make() {
            var x = 0;
            fun g() { return x; }
            fun s(v) { x = v; }
            get = g;
            set = s;
        }
        make();
        set(42);
        print get();
    "#;
    expect_output(source, "42\n");
}

#[test]
fn test_closure_reads_value_at_close_time() {
    let source = r#"
        var f;
        {
            var i = 1;
            fun show() { print i; }
            i = 2;
            f = show;
        }
        f();
    "#;
    expect_output(source, "2\n");
}

#[test]
fn test_global_aliasing_through_functions() {
    let source = r#"
        var x;
        fun a() { return x; }
        fun b(v) { x = v; }
        b(1);
        print a();
    "#;
    expect_output(source, "1\n");
}

#[test]
fn test_class_with_initializer_and_field_shadowing() {
    let source = r#"
        class Pair {
            init(a, b) {
                this.a = a;
                this.b = b;
            }
            sum() { return this.a + this.b; }
        }
        var p = Pair(3, 4);
        print p.sum();
        p.sum = 99;
        print p.sum;
    "#;
    expect_output(source, "7\n99\n");
}

#[test]
fn test_field_shadows_method_in_invocation() {
    let source = r#"
        class A { m() { return "method"; } }
        fun field() { return "field"; }
        var a = A();
        print a.m();
        a.m = field;
        print a.m();
    "#;
    expect_output(source, "method\nfield\n");
}

#[test]
fn test_inheritance_and_super() {
    let source = r#"
        class A { greet() { print "A"; } }
        class B < A {
            greet() {
                super.greet();
                print "B";
            }
        }
        B().greet();
    "#;
    expect_output(source, "A\nB\n");
}

#[test]
fn test_super_initializer_chain() {
    let source = r#"
        class Point {
            init(x, y) { this.x = x; this.y = y; }
        }
        class Point3 < Point {
            init(x, y, z) {
                super.init(x, y);
                this.z = z;
            }
        }
        var p = Point3(1, 2, 3);
        print p.x + p.y + p.z;
    "#;
    expect_output(source, "6\n");
}

#[test]
fn test_inherited_methods_are_callable_directly() {
    let source = r#"
        class A { who() { return "A"; } }
        class B < A {}
        print B().who();
    "#;
    expect_output(source, "A\n");
}

#[test]
fn test_this_captured_by_nested_function() {
    let source = r#"
        class T {
            m() {
                fun inner() { return this; }
                return inner();
            }
        }
        print T().m();
    "#;
    expect_output(source, "T instance\n");
}

#[test]
fn test_bare_return_in_initializer_yields_instance() {
    let source = r#"
        class A {
            init() {
                this.x = 1;
                return;
            }
        }
        print A().x;
    "#;
    expect_output(source, "1\n");
}

#[test]
fn test_value_printing_forms() {
    let source = r#"
        class Widget { m() {} }
        fun f() {}
        print Widget;
        print Widget();
        print Widget().m;
        print f;
        print clock;
        print nil;
        print true;
    "#;
    expect_output(
        source,
        "Widget\nWidget instance\n<fn m>\n<fn f>\n<native fn>\nnil\ntrue\n",
    );
}

#[test]
fn test_runtime_error_messages() {
    expect_runtime_error("print -\"s\";", "operand must be a number");
    expect_runtime_error("print 1 < \"2\";", "operands must be numbers");
    expect_runtime_error("print 1 + nil;", "operands must be two numbers or two strings");
    expect_runtime_error("print missing;", "undefined variable 'missing'");
    expect_runtime_error("true();", "can only call functions and classes");
    expect_runtime_error("var x = 3; print x.field;", "only instances have properties");
    expect_runtime_error("var x = 3; x.field = 1;", "only instances have fields");
    expect_runtime_error("var x = 3; x.m();", "only instances have methods");
    expect_runtime_error("class A {} print A().missing;", "undefined property 'missing'");
    expect_runtime_error("class A {} A().missing();", "undefined property 'missing'");
    expect_runtime_error("var NotAClass = 1; class B < NotAClass {}", "superclass must be a class");
    expect_runtime_error("fun f(a, b) {} f(1);", "expected 2 arguments but got 1");
    expect_runtime_error("class A {} A(1);", "expected 0 arguments but got 1");
}

#[test]
fn test_unbounded_recursion_overflows_the_frame_stack() {
    expect_runtime_error("fun f() { f(); } f();", "stack overflow");
}

#[test]
fn test_traceback_lists_frames_with_lines() {
    let source = "fun boom() {\n  return nil + 1;\n}\nboom();\n";
    match run_code(source) {
        Err(InterpretError::Runtime(error)) => {
            assert_eq!(error.message, "operands must be two numbers or two strings");
            assert_eq!(error.trace.len(), 2);
            assert_eq!(error.trace[0].line, 2);
            assert_eq!(error.trace[0].function.as_deref(), Some("boom"));
            assert_eq!(error.trace[1].line, 4);
            assert_eq!(error.trace[1].function, None);
        }
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn test_vm_survives_errors_across_interprets() {
    let mut vm = VM::new();
    let buffer = Arc::new(Mutex::new(Vec::new()));
    vm.set_output(buffer.clone());

    assert!(vm.interpret("var a = 1;").is_ok());
    assert!(vm.interpret("print a + nil;").is_err());
    // Globals persist and the stack is usable again after the error.
    assert!(vm.interpret("print a + 1;").is_ok());
    let output = buffer.lock().unwrap();
    assert_eq!(String::from_utf8_lossy(&output), "2\n");
}

#[test]
fn test_stress_gc_output_matches_normal_run() {
    let source = r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        class Node {
            init(value) { this.value = value; }
            describe() { return "node " + this.value; }
        }
        var parts = "";
        for (var i = 0; i < 20; i = i + 1) {
            parts = parts + "x";
        }
        print fib(12);
        print parts;
        print Node("n").describe();
    "#;

    let normal = run_code(source).expect("normal run");
    let stressed = run_stressed(source).expect("stressed run");
    assert_eq!(normal, stressed);
    assert_eq!(normal, "144\nxxxxxxxxxxxxxxxxxxxx\nnode n\n");
}

#[test]
fn test_stress_gc_keeps_reachable_objects_alive() {
    let source = r#"
        var keep = "keep";
        var sink = "";
        for (var i = 0; i < 40; i = i + 1) {
            sink = "garbage" + "garbage";
        }
        print keep + "!";
        print sink;
    "#;
    let output = run_stressed(source).expect("stressed run");
    assert_eq!(output, "keep!\ngarbagegarbage\n");
}

#[test]
fn test_compile_errors_do_not_execute() {
    match run_code("print 1; var = 2;") {
        Err(InterpretError::Compile(errors)) => {
            assert!(!errors.is_empty());
        }
        other => panic!("expected compile error, got {:?}", other),
    }
}
