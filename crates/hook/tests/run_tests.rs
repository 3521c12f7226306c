//! End-to-end scenarios: compile source, execute it on a fresh VM, and
//! check the returned value (and captured output).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use hook::{Error, Value, Vm};
use pretty_assertions::assert_eq;

#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> hook::Result<Value> {
    let mut vm = Vm::new();
    let closure = vm.compile("test.hk", source)?;
    vm.execute(closure, Vec::new())
}

fn run_int(source: &str) -> i64 {
    run(source).unwrap().as_int().expect("integer result")
}

fn run_with_output(source: &str) -> (Value, String) {
    let buffer = SharedBuffer::default();
    let mut vm = Vm::new();
    vm.set_output(Box::new(buffer.clone()));
    let closure = vm.compile("test.hk", source).unwrap();
    let value = vm.execute(closure, Vec::new()).unwrap();
    (value, buffer.contents())
}

#[test]
fn factorial_returns_3628800() {
    assert_eq!(
        run_int("fn fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } return fact(10);"),
        3628800
    );
}

#[test]
fn closure_counter_returns_3() {
    assert_eq!(
        run_int(
            "fn make_counter() { mut i = 0; return fn() { i = i + 1; return i; }; }\n\
             let c = make_counter(); c(); c(); return c();"
        ),
        3
    );
}

#[test]
fn array_ops_return_14() {
    assert_eq!(run_int("mut a = [3,1,2]; a[1] = 9; return a[0] + a[1] + a[2];"), 14);
}

#[test]
fn escape_sequences_decode_in_string_literals() {
    let result = run(r#"return "\tte\r\nst";"#).unwrap();
    let Value::String(s) = result else {
        panic!("expected string result");
    };
    assert_eq!(s.as_bytes(), b"\tte\r\nst");
}

#[test]
fn operator_precedence() {
    assert_eq!(run_int("return 1 + 2 * 3;"), 7);
    assert_eq!(run_int("return (1 + 2) * 3;"), 9);
    assert_eq!(
        run("return !true && false;").unwrap().to_string(),
        "false"
    );
}

#[test]
fn range_iteration_semantics() {
    assert_eq!(
        run("mut out = []; foreach (x in 1..3) { out[] = x; } return out;")
            .unwrap()
            .to_string(),
        "[1, 2, 3]"
    );
    assert_eq!(
        run("mut out = []; foreach (x in 3..1) { out[] = x; } return out;")
            .unwrap()
            .to_string(),
        "[3, 2, 1]"
    );
    assert_eq!(
        run("mut out = []; foreach (x in 5..5) { out[] = x; } return out;")
            .unwrap()
            .to_string(),
        "[5]"
    );
}

#[test]
fn truthiness_follows_the_falsey_flag() {
    assert_eq!(run_int("if (0) return 1; return 2;"), 1);
    assert_eq!(run_int("if (\"\") return 1; return 2;"), 1);
    assert_eq!(run_int("if (nil) return 1; return 2;"), 2);
    assert_eq!(run_int("if (false) return 1; return 2;"), 2);
}

#[test]
fn returning_without_value_yields_nil() {
    assert_eq!(run("return;").unwrap().to_string(), "nil");
    assert_eq!(run("let x = 1;").unwrap().to_string(), "nil");
}

#[test]
fn script_arguments_arrive_as_slot_one() {
    let mut vm = Vm::new();
    let closure = vm.compile("test.hk", "return args[1] + args[2];").unwrap();
    let arguments = vec![
        Value::String(Rc::new(hook::Str::from_chars("test.hk"))),
        Value::String(Rc::new(hook::Str::from_chars("foo"))),
        Value::String(Rc::new(hook::Str::from_chars("bar"))),
    ];
    let result = vm.execute(closure, arguments).unwrap();
    assert_eq!(result.to_string(), "foobar");
}

#[test]
fn print_and_println_write_to_the_configured_output() {
    let (_, output) = run_with_output(
        "print(\"x is \"); println(42); println([1, \"two\"]); println({ a: 1 });",
    );
    assert_eq!(output, "x is 42\n[1, \"two\"]\n{a: 1}\n");
}

#[test]
fn structs_print_their_fields() {
    let (_, output) = run_with_output(
        "struct Point { x, y } let p = Point { 1, 2 }; println(p);",
    );
    assert_eq!(output, "{x: 1, y: 2}\n");
}

#[test]
fn break_applies_to_the_innermost_loop() {
    assert_eq!(
        run_int(
            "mut total = 0;\n\
             for (mut i = 0; i < 3; i++) {\n\
               foreach (j in 1..5) {\n\
                 if (j > 2) break;\n\
                 total += j;\n\
               }\n\
             }\n\
             return total;"
        ),
        9
    );
}

#[test]
fn match_is_an_expression() {
    assert_eq!(
        run_int(
            "fn describe(n) { return match (n) { 0 => 100, 1 => 200, _ => 300 }; }\n\
             return describe(0) + describe(1) + describe(9);"
        ),
        600
    );
}

#[test]
fn del_and_append_reshape_arrays() {
    assert_eq!(
        run("mut a = [1, 2, 3]; del a[0]; a[] = 9; return a;").unwrap().to_string(),
        "[2, 3, 9]"
    );
}

#[test]
fn shared_arrays_are_copied_on_write() {
    assert_eq!(
        run(
            "let original = [1, 2];\n\
             mut copy = original;\n\
             copy[0] = 9;\n\
             return original[0] * 10 + copy[0];"
        )
        .unwrap()
        .to_string(),
        "19"
    );
}

#[test]
fn reference_counts_track_live_references() {
    let arr = Rc::new(hook::Array::new());
    let mut vm = Vm::new();
    vm.push_array(Rc::clone(&arr)).unwrap();
    assert_eq!(Rc::strong_count(&arr), 2);
    vm.push(Value::Array(Rc::clone(&arr))).unwrap();
    assert_eq!(Rc::strong_count(&arr), 3);
    vm.pop();
    vm.pop();
    assert_eq!(Rc::strong_count(&arr), 1);
}

#[test]
fn runtime_errors_unwind_every_frame() {
    let mut vm = Vm::new();
    let closure = vm
        .compile("test.hk", "fn f() { return 1 + \"x\"; } return f();")
        .unwrap();
    let err = vm.execute(closure, Vec::new()).unwrap_err();
    assert!(matches!(err, Error::Runtime { .. }));
    assert_eq!(vm.stack_len(), 0);
}

#[test]
fn lexical_errors_carry_position() {
    let err = run("let x = 1;\nlet y = \"oops;").unwrap_err();
    let text = err.to_string();
    assert!(text.contains("lexical error"));
    assert!(text.contains("test.hk:2"));
}

#[test]
fn syntax_errors_carry_position() {
    let err = run("let = 3;").unwrap_err();
    assert!(err.to_string().contains("syntax error"));
}

#[test]
fn imports_bring_module_members_into_scope() {
    assert_eq!(
        run_int("from arrays import { sum, max }; return sum([1, 2, 3]) + max([4, 7]);"),
        13
    );
    assert_eq!(run_int("import math as m; return m.abs(-5);"), 5);
}
