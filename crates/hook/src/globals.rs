//! The default global natives.
//!
//! Installed into every VM at construction; hosts can replace any of them
//! (or add their own) with [`Vm::define_global`] before compiling, since
//! the compiler resolves global references against the registry by name.

use std::io::Write;
use std::rc::Rc;

use crate::callable::Native;
use crate::error::{Error, Result};
use crate::string::Str;
use crate::value::{Kind, Value};
use crate::vm::{Args, Vm};

pub(crate) fn install(vm: &mut Vm) {
    define(vm, "print", 1, print);
    define(vm, "println", 1, println);
    define(vm, "type", 1, type_of);
    define(vm, "len", 1, len);
    define(vm, "cap", 1, cap);
    define(vm, "is_empty", 1, is_empty);
    define(vm, "compare", 2, compare);
    define(vm, "to_string", 1, to_string);
    define(vm, "to_int", 1, to_int);
    define(vm, "to_float", 1, to_float);
    define(vm, "assert", 2, assert);
    define(vm, "panic", 1, panic);
    define(vm, "exit", 1, exit);
}

fn define<F>(vm: &mut Vm, name: &str, arity: i32, call: F)
where
    F: Fn(&mut Vm, Args) -> Result<()> + 'static,
{
    let native = Native::new(Rc::new(Str::from_chars(name)), arity, call);
    vm.define_global(name, Value::Native(Rc::new(native)));
}

fn write_value(vm: &mut Vm, value: &Value, newline: bool) -> Result<()> {
    let mut result = value.print(vm.output(), false);
    if result.is_ok() && newline {
        result = vm.output().write_all(b"\n");
    }
    result.map_err(|err| vm.runtime_error(format!("cannot write output: {err}")))
}

fn print(vm: &mut Vm, args: Args) -> Result<()> {
    let value = vm.arg(args, 1).clone();
    write_value(vm, &value, false)?;
    vm.push_nil()
}

fn println(vm: &mut Vm, args: Args) -> Result<()> {
    let value = vm.arg(args, 1).clone();
    write_value(vm, &value, true)?;
    vm.push_nil()
}

fn type_of(vm: &mut Vm, args: Args) -> Result<()> {
    let name = vm.arg(args, 1).type_name();
    vm.push_string_from_chars(name)
}

fn len(vm: &mut Vm, args: Args) -> Result<()> {
    let length = match vm.arg(args, 1) {
        Value::String(s) => s.len(),
        Value::Range(r) => r.len(),
        Value::Array(a) => a.len(),
        Value::Struct(s) => s.len(),
        Value::Instance(i) => i.len(),
        other => return Err(vm.type_error("string|range|array|struct|instance", other.type_name())),
    };
    vm.push_int(length as i64)
}

fn cap(vm: &mut Vm, args: Args) -> Result<()> {
    let capacity = match vm.arg(args, 1) {
        Value::String(s) => s.capacity(),
        Value::Array(a) => a.capacity(),
        other => return Err(vm.type_error("string|array", other.type_name())),
    };
    vm.push_int(capacity as i64)
}

fn is_empty(vm: &mut Vm, args: Args) -> Result<()> {
    let empty = match vm.arg(args, 1) {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Struct(s) => s.is_empty(),
        Value::Instance(i) => i.is_empty(),
        other => return Err(vm.type_error("string|array|struct|instance", other.type_name())),
    };
    vm.push_bool(empty)
}

fn compare(vm: &mut Vm, args: Args) -> Result<()> {
    let a = vm.arg(args, 1);
    let b = vm.arg(args, 2);
    let ordering = a.compare(b).map_err(|_| {
        vm.runtime_error(format!(
            "cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))
    })?;
    vm.push_int(match ordering {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

fn to_string(vm: &mut Vm, args: Args) -> Result<()> {
    let text = vm.arg(args, 1).to_string();
    vm.push_string_from_chars(&text)
}

fn to_int(vm: &mut Vm, args: Args) -> Result<()> {
    let value = vm.arg(args, 1);
    let result = match value {
        Value::Number(n) => n.trunc(),
        Value::String(s) => s
            .to_string()
            .parse::<f64>()
            .map(f64::trunc)
            .map_err(|_| vm.runtime_error(format!("cannot convert `{s}` to int")))?,
        other => return Err(vm.type_error("number|string", other.type_name())),
    };
    vm.push_number(result)
}

fn to_float(vm: &mut Vm, args: Args) -> Result<()> {
    let value = vm.arg(args, 1);
    let result = match value {
        Value::Number(n) => *n,
        Value::String(s) => s
            .to_string()
            .parse::<f64>()
            .map_err(|_| vm.runtime_error(format!("cannot convert `{s}` to float")))?,
        other => return Err(vm.type_error("number|string", other.type_name())),
    };
    vm.push_number(result)
}

/// `assert(cond)` or `assert(cond, message)`.
fn assert(vm: &mut Vm, args: Args) -> Result<()> {
    if vm.arg(args, 1).is_falsey() {
        let message = match vm.arg(args, 2) {
            Value::Nil => "assertion failed".to_string(),
            value => format!("assertion failed: {value}"),
        };
        return Err(vm.runtime_error(message));
    }
    vm.push_nil()
}

fn panic(vm: &mut Vm, args: Args) -> Result<()> {
    let message = vm.arg(args, 1).to_string();
    Err(vm.runtime_error(message))
}

/// Request process exit; a nil code exits with 0.
fn exit(vm: &mut Vm, args: Args) -> Result<()> {
    let code = match vm.arg(args, 1) {
        Value::Nil => 0,
        value => {
            if value.kind() != Kind::Number {
                return Err(vm.type_error("number", value.type_name()));
            }
            value.as_int().unwrap_or(0) as i32
        }
    };
    Err(Error::Exit(code))
}
