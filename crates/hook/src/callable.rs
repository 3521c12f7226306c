//! Callable objects: function prototypes, closures, and natives.
//!
//! A [`Function`] is the static half of a callable — arity, bytecode,
//! child prototypes, and the capture arity — immutable once the compiler
//! seals it behind an `Rc`. A [`Closure`] pairs a prototype with the
//! concrete captured values; captures live in a `RefCell` because
//! assignment to a non-local writes through the shared closure.
//! A [`Native`] is a prototype-less callable backed by host code.
//!
//! This module also owns the on-disk format: a `HKBC` magic, a format
//! version, then the recursive function record
//! `u32 arity · name · file · chunk · u32 n_children · children ·
//! u32 num_nonlocals`.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::encoding;
use crate::error::{Error, Result};
use crate::string::Str;
use crate::value::Value;
use crate::vm::{Args, Vm};

const MAGIC: &[u8; 4] = b"HKBC";
const VERSION: u32 = 1;

/// Arity of a variadic native: the VM passes the argument window through
/// unchanged and the native inspects the count itself.
pub const ARITY_VARIADIC: i32 = -1;

#[derive(Debug)]
pub struct Function {
    arity: usize,
    name: Option<Rc<Str>>,
    file: Rc<Str>,
    pub(crate) chunk: Chunk,
    functions: Vec<Rc<Function>>,
    pub(crate) num_nonlocals: usize,
}

impl Function {
    pub fn new(arity: usize, name: Option<Rc<Str>>, file: Rc<Str>) -> Self {
        Self {
            arity,
            name,
            file,
            chunk: Chunk::new(),
            functions: Vec::new(),
            num_nonlocals: 0,
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn name(&self) -> Option<&Rc<Str>> {
        self.name.as_ref()
    }

    pub fn file(&self) -> &Rc<Str> {
        &self.file
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn functions(&self) -> &[Rc<Function>] {
        &self.functions
    }

    pub fn num_nonlocals(&self) -> usize {
        self.num_nonlocals
    }

    /// Attach a nested prototype, returning its index for the `Closure`
    /// opcode operand.
    pub fn add_child(&mut self, child: Rc<Function>) -> usize {
        self.functions.push(child);
        self.functions.len() - 1
    }

    /// Write the magic, version, and recursive function record.
    pub fn serialize(&self, out: &mut dyn Write) -> std::io::Result<()> {
        out.write_all(MAGIC)?;
        encoding::write_u32(out, VERSION)?;
        self.write_record(out)
    }

    fn write_record(&self, out: &mut dyn Write) -> std::io::Result<()> {
        encoding::write_u32(out, self.arity as u32)?;
        match &self.name {
            Some(name) => {
                encoding::write_u8(out, 1)?;
                name.serialize(out)?;
            }
            None => encoding::write_u8(out, 0)?,
        }
        self.file.serialize(out)?;
        self.chunk.serialize(out)?;
        encoding::write_u32(out, self.functions.len() as u32)?;
        for child in &self.functions {
            child.write_record(out)?;
        }
        encoding::write_u32(out, self.num_nonlocals as u32)
    }

    /// Read back a persisted function tree, validating the magic, the
    /// version, and every chunk's structural invariants.
    pub fn deserialize(input: &mut dyn Read) -> Result<Rc<Function>> {
        let mut magic = [0u8; 4];
        if input.read_exact(&mut magic).is_err() || &magic != MAGIC {
            return Err(Error::InvalidBytecode);
        }
        if encoding::read_u32(input) != Some(VERSION) {
            return Err(Error::InvalidBytecode);
        }
        Self::read_record(input).ok_or(Error::InvalidBytecode)
    }

    fn read_record(input: &mut dyn Read) -> Option<Rc<Function>> {
        let arity = encoding::read_u32(input)? as usize;
        let name = match encoding::read_u8(input)? {
            0 => None,
            1 => Some(Rc::new(Str::deserialize(input)?)),
            _ => return None,
        };
        let file = Rc::new(Str::deserialize(input)?);
        let chunk = Chunk::deserialize(input)?;
        let n_children = encoding::read_u32(input)? as usize;
        let mut functions = Vec::with_capacity(n_children);
        for _ in 0..n_children {
            functions.push(Self::read_record(input)?);
        }
        let num_nonlocals = encoding::read_u32(input)? as usize;
        if !chunk.validate(functions.len()) {
            return None;
        }
        Some(Rc::new(Function {
            arity,
            name,
            file,
            chunk,
            functions,
            num_nonlocals,
        }))
    }
}

#[derive(Debug)]
pub struct Closure {
    pub function: Rc<Function>,
    /// One slot per non-local; written by `SetNonLocal`.
    pub(crate) nonlocals: RefCell<Vec<Value>>,
}

impl Closure {
    pub fn new(function: Rc<Function>, nonlocals: Vec<Value>) -> Self {
        debug_assert_eq!(nonlocals.len(), function.num_nonlocals);
        Self {
            function,
            nonlocals: RefCell::new(nonlocals),
        }
    }

    pub fn get_nonlocal(&self, index: usize) -> Value {
        self.nonlocals.borrow()[index].clone()
    }

    pub fn set_nonlocal(&self, index: usize, value: Value) {
        self.nonlocals.borrow_mut()[index] = value;
    }
}

/// Host function invoked synchronously by the VM. The callee and its
/// arguments sit in the window described by [`Args`]; the native must
/// leave exactly one result on top of the stack.
pub type NativeFn = dyn Fn(&mut Vm, Args) -> Result<()>;

pub struct Native {
    name: Rc<Str>,
    arity: i32,
    call: Rc<NativeFn>,
}

impl Native {
    pub fn new<F>(name: Rc<Str>, arity: i32, call: F) -> Self
    where
        F: Fn(&mut Vm, Args) -> Result<()> + 'static,
    {
        Self {
            name,
            arity,
            call: Rc::new(call),
        }
    }

    pub fn name(&self) -> &Rc<Str> {
        &self.name
    }

    pub fn arity(&self) -> i32 {
        self.arity
    }

    pub fn call(&self, vm: &mut Vm, args: Args) -> Result<()> {
        (self.call)(vm, args)
    }
}

impl std::fmt::Debug for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Native")
            .field("name", &self.name.to_string())
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}
