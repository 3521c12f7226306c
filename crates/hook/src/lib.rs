//! Hook — a small dynamically-typed scripting language.
//!
//! This crate compiles Hook source text to bytecode and executes it on a
//! stack-based virtual machine. It is built to be embedded: the host
//! constructs a [`Vm`], populates globals and module loaders, compiles
//! (or deserializes) a program into a [`Closure`], pushes it with its
//! arguments, and calls it.
//!
//! # Quick start
//!
//! ```
//! use hook::Vm;
//!
//! let mut vm = Vm::new();
//! let closure = vm
//!     .compile(
//!         "fact.hk",
//!         "fn fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } return fact(5);",
//!     )
//!     .unwrap();
//! let result = vm.execute(closure, Vec::new()).unwrap();
//! assert_eq!(result.as_int(), Some(120));
//! ```
//!
//! # Embedding natives
//!
//! ```
//! use std::rc::Rc;
//! use hook::{Native, Str, Value, Vm};
//!
//! let mut vm = Vm::new();
//! let native = Native::new(Rc::new(Str::from_chars("double")), 1, |vm, args| {
//!     vm.check_argument_number(args, 1)?;
//!     let n = vm.arg(args, 1).as_number().unwrap_or(0.0);
//!     vm.push_number(n * 2.0)
//! });
//! vm.define_global("double", Value::Native(Rc::new(native)));
//!
//! let closure = vm.compile("host.hk", "return double(21);").unwrap();
//! assert_eq!(vm.execute(closure, Vec::new()).unwrap().as_int(), Some(42));
//! ```
//!
//! # Language tour
//!
//! - Values: `nil`, booleans, numbers, strings, ranges (`1..10`), arrays,
//!   structs and instances, iterators, callables, userdata.
//! - Bindings: `let` (immutable) and `mut`; assignment, compound
//!   assignment, and `++`/`--`.
//! - Control flow: `if`/`if!`, `while`/`while!`, `do..while`, `loop`,
//!   `for`, `foreach`, `match`, `break`/`continue`.
//! - Functions: `fn` statements and literals, `=>` bodies, closures that
//!   capture enclosing bindings by value at creation.
//! - Destructuring: `let [a, _, b] = arr;` and `let { x, y } = inst;`.
//! - Modules: `import name;`, `import name as alias;`,
//!   `from name import { a, b };` — backed by a VM-scoped cache and a
//!   host-extensible loader table.
//!
//! Compiled function trees can be persisted with [`Function::serialize`]
//! and loaded back with [`Function::deserialize`]; the launcher uses this
//! for its `--compile`/`--run` options.

mod array;
mod callable;
mod chunk;
mod compiler;
mod dump;
mod encoding;
mod error;
mod globals;
mod iterator;
mod modules;
mod range;
mod scanner;
mod string;
mod structs;
mod value;
mod vm;

pub use array::Array;
pub use callable::{ARITY_VARIADIC, Closure, Function, Native, NativeFn};
pub use chunk::{Chunk, Line, OpCode, Operand};
pub use compiler::compile;
pub use dump::dump;
pub use error::{Error, Result};
pub use iterator::{Iter, UserIter};
pub use range::Range;
pub use scanner::{Scanner, Token, TokenKind};
pub use string::Str;
pub use structs::{Instance, Struct};
pub use value::{Flags, Incomparable, Kind, UserData, Value};
pub use vm::{Args, DEFAULT_CALL_DEPTH, DEFAULT_STACK_SIZE, ModuleLoaderFn, Vm};
