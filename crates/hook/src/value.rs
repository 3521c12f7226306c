//! The runtime value model.
//!
//! A [`Value`] is a tagged union: `nil`, booleans, and numbers are inline;
//! everything else is a reference-counted heap object behind an `Rc`.
//! "Uniquely owned" throughout the VM means `Rc::strong_count == 1`, which
//! is what the in-place opcodes test before mutating.
//!
//! The per-value [`Flags`] are derived from the tag. They exist so the hot
//! paths (truth test, iteration dispatch, callable dispatch) are a single
//! bitmask test instead of a tag match.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;

use bitflags::bitflags;

use crate::array::Array;
use crate::callable::{Closure, Native};
use crate::encoding;
use crate::iterator::Iter;
use crate::range::Range;
use crate::string::Str;
use crate::structs::{Instance, Struct};

// Serialized type tags; only numbers and strings are representable at
// the value layer.
const TAG_NUMBER: u8 = 0x02;
const TAG_STRING: u8 = 0x03;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const OBJECT   = 0x01;
        const FALSEY   = 0x02;
        const HASHABLE = 0x04;
        const ITERABLE = 0x08;
        const NATIVE   = 0x10;
    }
}

/// Host payloads exposed to scripts. Natives downcast by `tag`, then
/// through `as_any`; teardown is the ordinary `Drop`.
pub trait UserData {
    fn tag(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<Str>),
    Range(Rc<Range>),
    Array(Rc<Array>),
    Struct(Rc<Struct>),
    Instance(Rc<Instance>),
    Iterator(Rc<Iter>),
    Closure(Rc<Closure>),
    Native(Rc<Native>),
    UserData(Rc<dyn UserData>),
}

/// The surface type of a value, as reported to scripts and used by the
/// argument checkers. Closures and natives share the `Callable` kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Nil,
    Bool,
    Number,
    String,
    Range,
    Array,
    Struct,
    Instance,
    Iterator,
    Callable,
    UserData,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "nil",
            Kind::Bool => "bool",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Range => "range",
            Kind::Array => "array",
            Kind::Struct => "struct",
            Kind::Instance => "instance",
            Kind::Iterator => "iterator",
            Kind::Callable => "callable",
            Kind::UserData => "userdata",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker for a comparison between values with no defined ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incomparable;

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Bool(_) => Kind::Bool,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Range(_) => Kind::Range,
            Value::Array(_) => Kind::Array,
            Value::Struct(_) => Kind::Struct,
            Value::Instance(_) => Kind::Instance,
            Value::Iterator(_) => Kind::Iterator,
            Value::Closure(_) | Value::Native(_) => Kind::Callable,
            Value::UserData(_) => Kind::UserData,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn flags(&self) -> Flags {
        match self {
            Value::Nil => Flags::FALSEY,
            Value::Bool(b) => {
                if *b {
                    Flags::empty()
                } else {
                    Flags::FALSEY
                }
            }
            Value::Number(_) => Flags::empty(),
            Value::String(_) => Flags::OBJECT | Flags::HASHABLE,
            Value::Range(_) | Value::Array(_) => Flags::OBJECT | Flags::ITERABLE,
            Value::Native(_) => Flags::OBJECT | Flags::NATIVE,
            _ => Flags::OBJECT,
        }
    }

    /// Nil and false are falsey; everything else, including `0` and `""`,
    /// is truthy.
    pub fn is_truthy(&self) -> bool {
        !self.flags().contains(Flags::FALSEY)
    }

    pub fn is_falsey(&self) -> bool {
        self.flags().contains(Flags::FALSEY)
    }

    pub fn is_object(&self) -> bool {
        self.flags().contains(Flags::OBJECT)
    }

    pub fn is_iterable(&self) -> bool {
        self.flags().contains(Flags::ITERABLE)
    }

    /// A number is an integer iff truncation is the identity and the value
    /// fits in an `i64`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Number(n) => {
                if n.trunc() == *n && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    Some(*n as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Structural equality. Same tag required; numbers compare bitwise
    /// `==` on `f64`, containers compare structurally, the rest compare
    /// by pointer.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a.equal(b),
            (Value::Array(a), Value::Array(b)) => a.equal(b),
            (Value::Struct(a), Value::Struct(b)) => a.equal(b),
            (Value::Instance(a), Value::Instance(b)) => a.equal(b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::UserData(a), Value::UserData(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Total order over nil, bool, number, string, range, and array.
    /// Everything else — and any comparison involving NaN — is
    /// incomparable and surfaces as a runtime error at the ordering
    /// opcodes.
    pub fn compare(&self, other: &Value) -> Result<Ordering, Incomparable> {
        match (self, other) {
            (Value::Nil, Value::Nil) => Ok(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).ok_or(Incomparable),
            (Value::String(a), Value::String(b)) => Ok(a.compare(b)),
            (Value::Range(a), Value::Range(b)) => Ok(a.compare(b)),
            (Value::Array(a), Value::Array(b)) => a.compare(b),
            _ => Err(Incomparable),
        }
    }

    pub fn print(&self, out: &mut dyn Write, quoted: bool) -> std::io::Result<()> {
        match self {
            Value::Nil => out.write_all(b"nil"),
            Value::Bool(b) => out.write_all(if *b { b"true" } else { b"false" }),
            Value::Number(n) => write!(out, "{}", format_number(*n)),
            Value::String(s) => s.print(out, quoted),
            Value::Range(r) => write!(out, "{r}"),
            Value::Array(a) => a.print(out),
            Value::Struct(s) => match s.name() {
                Some(name) => write!(out, "<struct {} at {:p}>", name, Rc::as_ptr(s)),
                None => write!(out, "<struct at {:p}>", Rc::as_ptr(s)),
            },
            Value::Instance(i) => i.print(out),
            Value::Iterator(i) => write!(out, "<iterator at {:p}>", Rc::as_ptr(i)),
            Value::Closure(c) => match c.function.name() {
                Some(name) => write!(out, "<callable {} at {:p}>", name, Rc::as_ptr(c)),
                None => write!(out, "<callable at {:p}>", Rc::as_ptr(c)),
            },
            Value::Native(n) => {
                write!(out, "<callable {} at {:p}>", n.name(), Rc::as_ptr(n))
            }
            Value::UserData(u) => {
                write!(out, "<userdata at {:p}>", Rc::as_ptr(u) as *const u8)
            }
        }
    }

    /// Supported for numbers and strings only; the chunk and function
    /// layers compose these for constant pools.
    pub fn serialize(&self, out: &mut dyn Write) -> std::io::Result<()> {
        match self {
            Value::Number(n) => {
                encoding::write_u8(out, TAG_NUMBER)?;
                encoding::write_f64(out, *n)
            }
            Value::String(s) => {
                encoding::write_u8(out, TAG_STRING)?;
                s.serialize(out)
            }
            _ => unreachable!("only numbers and strings reach the serializer"),
        }
    }

    pub fn deserialize(input: &mut dyn Read) -> Option<Value> {
        match encoding::read_u8(input)? {
            TAG_NUMBER => Some(Value::Number(encoding::read_f64(input)?)),
            TAG_STRING => Some(Value::String(Rc::new(Str::deserialize(input)?))),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Vec::new();
        self.print(&mut buf, false).map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(&s.to_string()).finish(),
            Value::Range(r) => f.debug_tuple("Range").field(r).finish(),
            Value::Array(a) => f.debug_tuple("Array").field(a).finish(),
            Value::Struct(s) => f.debug_tuple("Struct").field(s).finish(),
            Value::Instance(i) => f.debug_tuple("Instance").field(i).finish(),
            Value::Iterator(i) => f.debug_tuple("Iterator").field(i).finish(),
            Value::Closure(c) => f.debug_tuple("Closure").field(c).finish(),
            Value::Native(n) => f.debug_tuple("Native").field(n).finish(),
            Value::UserData(u) => f.debug_tuple("UserData").field(&u.tag()).finish(),
        }
    }
}

/// Numbers print without a trailing `.0` when they hold an integer.
pub(crate) fn format_number(n: f64) -> String {
    if n.trunc() == n && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_derived_from_the_tag() {
        assert_eq!(Value::Nil.flags(), Flags::FALSEY);
        assert_eq!(Value::Bool(false).flags(), Flags::FALSEY);
        assert_eq!(Value::Bool(true).flags(), Flags::empty());
        assert!(
            Value::String(Rc::new(Str::from_chars("s")))
                .flags()
                .contains(Flags::HASHABLE)
        );
        assert!(
            Value::Array(Rc::new(Array::new()))
                .flags()
                .contains(Flags::ITERABLE)
        );
    }

    #[test]
    fn zero_and_empty_string_are_truthy() {
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::String(Rc::new(Str::new())).is_truthy());
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
    }

    #[test]
    fn integer_predicate() {
        assert_eq!(Value::Number(3.0).as_int(), Some(3));
        assert_eq!(Value::Number(-2.0).as_int(), Some(-2));
        assert_eq!(Value::Number(2.5).as_int(), None);
        assert_eq!(Value::Number(f64::NAN).as_int(), None);
        assert_eq!(Value::Bool(true).as_int(), None);
    }

    #[test]
    fn equality_requires_matching_tags() {
        assert!(!Value::Number(1.0).equal(&Value::Bool(true)));
        assert!(Value::Number(1.0).equal(&Value::Number(1.0)));
        assert!(
            Value::String(Rc::new(Str::from_chars("a")))
                .equal(&Value::String(Rc::new(Str::from_chars("a"))))
        );
    }

    #[test]
    fn nan_is_incomparable() {
        let nan = Value::Number(f64::NAN);
        assert_eq!(nan.compare(&Value::Number(1.0)), Err(Incomparable));
    }

    #[test]
    fn mixed_kinds_are_incomparable() {
        assert_eq!(
            Value::Number(1.0).compare(&Value::String(Rc::new(Str::from_chars("1")))),
            Err(Incomparable)
        );
    }

    #[test]
    fn ranges_compare_by_start_then_end() {
        let a = Value::Range(Rc::new(Range::new(1, 3)));
        let b = Value::Range(Rc::new(Range::new(3, 1)));
        assert_eq!(a.compare(&b), Ok(Ordering::Less));
    }

    #[test]
    fn printing_is_recursive_and_quotes_nested_strings() {
        let arr = Value::Array(Rc::new(Array::from_elements(vec![
            Value::Number(1.0),
            Value::String(Rc::new(Str::from_chars("two"))),
            Value::Nil,
        ])));
        assert_eq!(arr.to_string(), "[1, \"two\", nil]");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(3628800.0), "3628800");
    }

    #[test]
    fn value_serialize_round_trip() {
        let mut buf = Vec::new();
        Value::Number(2.5).serialize(&mut buf).unwrap();
        Value::String(Rc::new(Str::from_chars("hi")))
            .serialize(&mut buf)
            .unwrap();

        let mut cursor = buf.as_slice();
        assert!(
            Value::deserialize(&mut cursor)
                .unwrap()
                .equal(&Value::Number(2.5))
        );
        assert!(
            Value::deserialize(&mut cursor)
                .unwrap()
                .equal(&Value::String(Rc::new(Str::from_chars("hi"))))
        );
    }

    #[test]
    fn deserialize_rejects_unknown_tags() {
        let bytes = [0xffu8, 0, 0, 0];
        assert!(Value::deserialize(&mut bytes.as_slice()).is_none());
    }
}
