//! Built-in modules: `arrays`, `math`, and `strings`.
//!
//! Each module registers a loader with the VM's loader table at
//! construction; the loader runs once on the first `import` of the name
//! and its result is cached for the life of the VM. A module value is an
//! ordinary struct instance whose fields hold natives (and constants), so
//! `from m import { f }` destructures it like any other instance.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::callable::Native;
use crate::error::Result;
use crate::string::Str;
use crate::structs::{Instance, Struct};
use crate::value::Value;
use crate::vm::{Args, Vm};

pub(crate) fn register_builtins(vm: &mut Vm) {
    vm.register_module_loader("arrays", load_arrays);
    vm.register_module_loader("math", load_math);
    vm.register_module_loader("strings", load_strings);
}

fn native<F>(name: &str, arity: i32, call: F) -> Value
where
    F: Fn(&mut Vm, Args) -> Result<()> + 'static,
{
    Value::Native(Rc::new(Native::new(
        Rc::new(Str::from_chars(name)),
        arity,
        call,
    )))
}

/// Build a module instance from `(field, value)` pairs and push it.
fn push_module(vm: &mut Vm, name: &str, fields: Vec<(&str, Value)>) -> Result<()> {
    let mut struct_ = Struct::new(Some(Rc::new(Str::from_chars(name))));
    let mut values = Vec::with_capacity(fields.len());
    for (field, value) in fields {
        struct_.define_field(Rc::new(Str::from_chars(field)));
        values.push(value);
    }
    vm.push_instance(Rc::new(Instance::new(Rc::new(struct_), values)))
}

// ---------------------------------------------------------------------------
// arrays
// ---------------------------------------------------------------------------

fn load_arrays(vm: &mut Vm) -> Result<()> {
    push_module(
        vm,
        "arrays",
        vec![
            ("index_of", native("index_of", 2, arrays_index_of)),
            ("min", native("min", 1, arrays_min)),
            ("max", native("max", 1, arrays_max)),
            ("sum", native("sum", 1, arrays_sum)),
            ("avg", native("avg", 1, arrays_avg)),
            ("reverse", native("reverse", 1, arrays_reverse)),
            ("sort", native("sort", 1, arrays_sort)),
        ],
    )
}

fn arrays_index_of(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_array(args, 1)?;
    let Value::Array(arr) = vm.arg(args, 1).clone() else {
        unreachable!("checked above");
    };
    let needle = vm.arg(args, 2).clone();
    match arr.index_of(&needle) {
        Some(index) => vm.push_int(index as i64),
        None => vm.push_int(-1),
    }
}

fn arrays_extreme(vm: &mut Vm, args: Args, keep: Ordering) -> Result<()> {
    vm.check_argument_array(args, 1)?;
    let Value::Array(arr) = vm.arg(args, 1).clone() else {
        unreachable!("checked above");
    };
    let mut best: Option<Value> = None;
    for element in arr.elements() {
        match &best {
            None => best = Some(element.clone()),
            Some(current) => {
                let ordering = element.compare(current).map_err(|_| {
                    vm.runtime_error(format!(
                        "cannot compare {} and {}",
                        element.type_name(),
                        current.type_name()
                    ))
                })?;
                if ordering == keep {
                    best = Some(element.clone());
                }
            }
        }
    }
    vm.push(best.unwrap_or(Value::Nil))
}

fn arrays_min(vm: &mut Vm, args: Args) -> Result<()> {
    arrays_extreme(vm, args, Ordering::Less)
}

fn arrays_max(vm: &mut Vm, args: Args) -> Result<()> {
    arrays_extreme(vm, args, Ordering::Greater)
}

/// Sums the numeric elements; yields 0 as soon as a non-number is seen.
fn arrays_sum(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_array(args, 1)?;
    let Value::Array(arr) = vm.arg(args, 1).clone() else {
        unreachable!("checked above");
    };
    let mut total = 0.0;
    for element in arr.elements() {
        match element.as_number() {
            Some(n) => total += n,
            None => {
                total = 0.0;
                break;
            }
        }
    }
    vm.push_number(total)
}

fn arrays_avg(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_array(args, 1)?;
    let Value::Array(arr) = vm.arg(args, 1).clone() else {
        unreachable!("checked above");
    };
    if arr.is_empty() {
        return vm.push_number(0.0);
    }
    let mut total = 0.0;
    for element in arr.elements() {
        match element.as_number() {
            Some(n) => total += n,
            None => return vm.push_number(0.0),
        }
    }
    vm.push_number(total / arr.len() as f64)
}

fn arrays_reverse(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_array(args, 1)?;
    let Value::Array(arr) = vm.arg(args, 1).clone() else {
        unreachable!("checked above");
    };
    let mut elements: Vec<Value> = arr.elements().to_vec();
    elements.reverse();
    vm.push_array(Rc::new(crate::array::Array::from_elements(elements)))
}

fn arrays_sort(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_array(args, 1)?;
    let Value::Array(arr) = vm.arg(args, 1).clone() else {
        unreachable!("checked above");
    };
    let sorted = arr
        .sort()
        .map_err(|_| vm.runtime_error("cannot sort array with incomparable elements"))?;
    vm.push_array(Rc::new(sorted))
}

// ---------------------------------------------------------------------------
// math
// ---------------------------------------------------------------------------

fn load_math(vm: &mut Vm) -> Result<()> {
    push_module(
        vm,
        "math",
        vec![
            ("pi", Value::Number(std::f64::consts::PI)),
            ("e", Value::Number(std::f64::consts::E)),
            ("abs", math_unary("abs", f64::abs)),
            ("floor", math_unary("floor", f64::floor)),
            ("ceil", math_unary("ceil", f64::ceil)),
            ("round", math_unary("round", f64::round)),
            ("sqrt", math_unary("sqrt", f64::sqrt)),
            ("exp", math_unary("exp", f64::exp)),
            ("log", math_unary("log", f64::ln)),
            ("pow", native("pow", 2, math_pow)),
        ],
    )
}

fn math_unary(name: &'static str, apply: fn(f64) -> f64) -> Value {
    native(name, 1, move |vm, args| {
        vm.check_argument_number(args, 1)?;
        let n = vm.arg(args, 1).as_number().unwrap_or(0.0);
        vm.push_number(apply(n))
    })
}

fn math_pow(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_number(args, 1)?;
    vm.check_argument_number(args, 2)?;
    let base = vm.arg(args, 1).as_number().unwrap_or(0.0);
    let exponent = vm.arg(args, 2).as_number().unwrap_or(0.0);
    vm.push_number(base.powf(exponent))
}

// ---------------------------------------------------------------------------
// strings
// ---------------------------------------------------------------------------

fn load_strings(vm: &mut Vm) -> Result<()> {
    push_module(
        vm,
        "strings",
        vec![
            ("lower", strings_map("lower", Str::lower)),
            ("upper", strings_map("upper", Str::upper)),
            ("trim", strings_map("trim", Str::trim)),
            ("index_of", native("index_of", 2, strings_index_of)),
            ("split", native("split", 2, strings_split)),
            ("join", native("join", 2, strings_join)),
        ],
    )
}

fn strings_map(name: &'static str, apply: fn(&Str) -> Str) -> Value {
    native(name, 1, move |vm, args| {
        vm.check_argument_string(args, 1)?;
        let Value::String(s) = vm.arg(args, 1).clone() else {
            unreachable!("checked above");
        };
        vm.push_string(apply(&s))
    })
}

fn strings_index_of(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_string(args, 1)?;
    vm.check_argument_string(args, 2)?;
    let (Value::String(haystack), Value::String(needle)) =
        (vm.arg(args, 1).clone(), vm.arg(args, 2).clone())
    else {
        unreachable!("checked above");
    };
    match haystack.index_of(&needle) {
        Some(index) => vm.push_int(index as i64),
        None => vm.push_int(-1),
    }
}

fn strings_split(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_string(args, 1)?;
    vm.check_argument_string(args, 2)?;
    let (Value::String(s), Value::String(sep)) =
        (vm.arg(args, 1).clone(), vm.arg(args, 2).clone())
    else {
        unreachable!("checked above");
    };
    if sep.is_empty() {
        return Err(vm.runtime_error("empty separator"));
    }
    let mut pieces = Vec::new();
    let mut rest = s.as_bytes();
    loop {
        match rest
            .windows(sep.len())
            .position(|window| window == sep.as_bytes())
        {
            Some(at) => {
                pieces.push(Value::String(Rc::new(Str::from_bytes(&rest[..at]))));
                rest = &rest[at + sep.len()..];
            }
            None => {
                pieces.push(Value::String(Rc::new(Str::from_bytes(rest))));
                break;
            }
        }
    }
    vm.push_array(Rc::new(crate::array::Array::from_elements(pieces)))
}

fn strings_join(vm: &mut Vm, args: Args) -> Result<()> {
    vm.check_argument_array(args, 1)?;
    vm.check_argument_string(args, 2)?;
    let (Value::Array(arr), Value::String(sep)) =
        (vm.arg(args, 1).clone(), vm.arg(args, 2).clone())
    else {
        unreachable!("checked above");
    };
    let mut result = Str::new();
    for (i, element) in arr.elements().iter().enumerate() {
        let Value::String(piece) = element else {
            return Err(vm.type_error("string", element.type_name()));
        };
        if i > 0 {
            result.inplace_concat(&sep);
        }
        result.inplace_concat(piece);
    }
    vm.push_string(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<Value> {
        let mut vm = Vm::with_stack_size(256);
        let closure = vm.compile("test.hk", source)?;
        vm.execute(closure, Vec::new())
    }

    #[test]
    fn arrays_module() {
        assert_eq!(
            run("import arrays; return arrays.index_of([5, 6], 6);").unwrap().to_string(),
            "1"
        );
        assert_eq!(
            run("import arrays; return arrays.index_of([5, 6], 7);").unwrap().to_string(),
            "-1"
        );
        assert_eq!(
            run("import arrays; return arrays.min([3, 1, 2]);").unwrap().to_string(),
            "1"
        );
        assert_eq!(
            run("import arrays; return arrays.max([3, 1, 2]);").unwrap().to_string(),
            "3"
        );
        assert_eq!(
            run("import arrays; return arrays.sum([1, 2, 3]);").unwrap().to_string(),
            "6"
        );
        assert_eq!(
            run("import arrays; return arrays.avg([2, 4]);").unwrap().to_string(),
            "3"
        );
        assert_eq!(
            run("import arrays; return arrays.reverse([1, 2]);").unwrap().to_string(),
            "[2, 1]"
        );
        assert_eq!(
            run("import arrays; return arrays.sort([3, 1, 2]);").unwrap().to_string(),
            "[1, 2, 3]"
        );
    }

    #[test]
    fn arrays_sum_hides_non_numbers() {
        assert_eq!(
            run("import arrays; return arrays.sum([1, \"two\", 3]);").unwrap().to_string(),
            "0"
        );
    }

    #[test]
    fn math_module() {
        assert_eq!(
            run("import math; return math.abs(-3);").unwrap().to_string(),
            "3"
        );
        assert_eq!(
            run("import math; return math.pow(2, 10);").unwrap().to_string(),
            "1024"
        );
        assert_eq!(
            run("import math; return math.floor(2.7) + math.ceil(2.2);").unwrap().to_string(),
            "5"
        );
        assert_eq!(
            run("import math; return math.sqrt(16);").unwrap().to_string(),
            "4"
        );
    }

    #[test]
    fn strings_module() {
        assert_eq!(
            run("import strings; return strings.upper(\"hook\");").unwrap().to_string(),
            "HOOK"
        );
        assert_eq!(
            run("import strings; return strings.trim(\"  x \");").unwrap().to_string(),
            "x"
        );
        assert_eq!(
            run("import strings; return strings.split(\"a,b,c\", \",\");")
                .unwrap()
                .to_string(),
            "[\"a\", \"b\", \"c\"]"
        );
        assert_eq!(
            run("import strings; return strings.join([\"a\", \"b\"], \"-\");")
                .unwrap()
                .to_string(),
            "a-b"
        );
        assert_eq!(
            run("from strings import { lower }; return lower(\"ABC\");").unwrap().to_string(),
            "abc"
        );
    }

    #[test]
    fn module_cache_returns_the_same_instance() {
        assert_eq!(
            run("import math; import math as m2; return compare(math.pi, m2.pi);")
                .unwrap()
                .to_string(),
            "0"
        );
    }
}
