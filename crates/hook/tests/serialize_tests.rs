//! Bytecode persistence: serialize a compiled function tree, load it
//! back, and check that the result is structurally identical and runs to
//! the same value.

use std::fs::File;
use std::io::{Read, Write};
use std::rc::Rc;

use hook::{Closure, Function, Value, Vm};
use pretty_assertions::assert_eq;

const FACT: &str =
    "fn fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } return fact(10);";

fn compile(source: &str) -> (Vm, Rc<Closure>) {
    let vm = Vm::new();
    let closure = vm.compile("test.hk", source).unwrap();
    (vm, closure)
}

fn round_trip(function: &Function) -> Rc<Function> {
    let mut buf = Vec::new();
    function.serialize(&mut buf).unwrap();
    Function::deserialize(&mut buf.as_slice()).unwrap()
}

fn assert_same_shape(a: &Function, b: &Function) {
    assert_eq!(a.arity(), b.arity());
    assert_eq!(
        a.name().map(|n| n.to_string()),
        b.name().map(|n| n.to_string())
    );
    assert_eq!(a.file().to_string(), b.file().to_string());
    assert_eq!(a.chunk().code(), b.chunk().code());
    assert_eq!(a.chunk().lines(), b.chunk().lines());
    assert_eq!(a.chunk().consts().len(), b.chunk().consts().len());
    for (x, y) in a
        .chunk()
        .consts()
        .elements()
        .iter()
        .zip(b.chunk().consts().elements())
    {
        assert!(x.equal(y), "constant mismatch: {x} vs {y}");
    }
    assert_eq!(a.num_nonlocals(), b.num_nonlocals());
    assert_eq!(a.functions().len(), b.functions().len());
    for (x, y) in a.functions().iter().zip(b.functions()) {
        assert_same_shape(x, y);
    }
}

#[test]
fn round_trip_is_structurally_identical() {
    let (_, closure) = compile(FACT);
    let loaded = round_trip(&closure.function);
    assert_same_shape(&closure.function, &loaded);
}

#[test]
fn loaded_bytecode_runs_to_the_same_value() {
    let (mut vm, closure) = compile(FACT);
    let expected = vm
        .execute(Rc::clone(&closure), Vec::new())
        .unwrap()
        .as_int()
        .unwrap();

    let loaded = round_trip(&closure.function);
    let mut vm2 = Vm::new();
    let result = vm2
        .execute(Rc::new(Closure::new(loaded, Vec::new())), Vec::new())
        .unwrap();
    assert_eq!(result.as_int(), Some(expected));
    assert_eq!(expected, 3628800);
}

#[test]
fn round_trip_through_a_file() {
    let (_, closure) = compile("mut a = [3,1,2]; a[1] = 9; return a[0] + a[1] + a[2];");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.out");

    let mut out = File::create(&path).unwrap();
    closure.function.serialize(&mut out).unwrap();
    out.flush().unwrap();

    let mut bytes = Vec::new();
    File::open(&path)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    let loaded = Function::deserialize(&mut bytes.as_slice()).unwrap();

    let mut vm = Vm::new();
    let result = vm
        .execute(Rc::new(Closure::new(loaded, Vec::new())), Vec::new())
        .unwrap();
    assert_eq!(result.as_int(), Some(14));
}

#[test]
fn closures_survive_serialization() {
    let source = "fn make_counter() { mut i = 0; return fn() { i = i + 1; return i; }; }\n\
                  let c = make_counter(); c(); c(); return c();";
    let (_, closure) = compile(source);
    let loaded = round_trip(&closure.function);
    let mut vm = Vm::new();
    let result = vm
        .execute(Rc::new(Closure::new(loaded, Vec::new())), Vec::new())
        .unwrap();
    assert_eq!(result.as_int(), Some(3));
}

#[test]
fn corrupted_streams_are_rejected() {
    let (_, closure) = compile(FACT);
    let mut buf = Vec::new();
    closure.function.serialize(&mut buf).unwrap();

    // Flipping the magic, truncating, or clobbering the middle must all
    // surface as a load failure, never a panic.
    let mut bad_magic = buf.clone();
    bad_magic[0] ^= 0xff;
    assert!(Function::deserialize(&mut bad_magic.as_slice()).is_err());

    let truncated = &buf[..buf.len() / 3];
    assert!(Function::deserialize(&mut &truncated[..]).is_err());

    let mut bad_version = buf.clone();
    bad_version[4] = 0xee;
    assert!(Function::deserialize(&mut bad_version.as_slice()).is_err());
}

#[test]
fn constant_pools_hold_only_numbers_and_strings() {
    let (_, closure) = compile(
        "struct Point { x, y } let p = Point { 1.5, \"two\" }; return match (p.y) { \"two\" => 1, _ => 0 };",
    );
    fn check(function: &Function) {
        for constant in function.chunk().consts().elements() {
            assert!(matches!(constant, Value::Number(_) | Value::String(_)));
        }
        for child in function.functions() {
            check(child);
        }
    }
    check(&closure.function);
}
