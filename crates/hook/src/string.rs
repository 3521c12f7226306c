//! Heap string objects.
//!
//! A [`Str`] is a grow-by-doubling byte buffer with its capacity rounded up
//! to the next power of two (minimum 8) and a lazily computed 32-bit
//! FNV-1a hash, cached as `-1` while invalid. Operations come in two
//! shapes, matching the rest of the object model: functional ones return a
//! fresh string, `inplace_` ones mutate the receiver and invalidate the
//! cached hash.
//!
//! Source text is UTF-8 tolerant, so the buffer holds raw bytes; indexing
//! a string from script code addresses bytes, not characters.

use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};

use crate::encoding;

const MIN_CAPACITY: usize = 8;

#[derive(Debug)]
pub struct Str {
    chars: Vec<u8>,
    capacity: usize,
    /// Cached FNV-1a hash; `-1` means not yet computed (or invalidated).
    hash: Cell<i64>,
}

impl Str {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty string whose buffer can hold at least `min_capacity`
    /// bytes without growing.
    pub fn with_capacity(min_capacity: usize) -> Self {
        let capacity = encoding::power_of_two_ceil(min_capacity.max(MIN_CAPACITY));
        let mut chars = Vec::new();
        chars.reserve(capacity);
        Self {
            chars,
            capacity,
            hash: Cell::new(-1),
        }
    }

    pub fn from_chars(chars: &str) -> Self {
        Self::from_bytes(chars.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut str = Self::with_capacity(bytes.len());
        str.chars.extend_from_slice(bytes);
        str
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.chars
    }

    /// Grow the buffer so it can hold at least `min_capacity` bytes. Never
    /// shrinks; the new capacity is the next power of two.
    pub fn ensure_capacity(&mut self, min_capacity: usize) {
        if min_capacity <= self.capacity {
            return;
        }
        let capacity = encoding::power_of_two_ceil(min_capacity);
        self.chars.reserve(capacity - self.chars.len());
        self.capacity = capacity;
    }

    /// Concatenation producing a fresh string; the receiver is untouched.
    pub fn concat(&self, other: &Str) -> Str {
        let mut result = Str::with_capacity(self.len() + other.len());
        result.chars.extend_from_slice(&self.chars);
        result.chars.extend_from_slice(&other.chars);
        result
    }

    pub fn inplace_concat_char(&mut self, c: u8) {
        self.ensure_capacity(self.len() + 1);
        self.chars.push(c);
        self.hash.set(-1);
    }

    pub fn inplace_concat_bytes(&mut self, bytes: &[u8]) {
        self.ensure_capacity(self.len() + bytes.len());
        self.chars.extend_from_slice(bytes);
        self.hash.set(-1);
    }

    pub fn inplace_concat(&mut self, other: &Str) {
        let bytes = other.chars.clone();
        self.inplace_concat_bytes(&bytes);
    }

    /// The FNV-1a hash of the current bytes, computed on first use and
    /// cached until the next mutation.
    pub fn hash(&self) -> u32 {
        if self.hash.get() == -1 {
            self.hash.set(i64::from(fnv1a(&self.chars)));
        }
        self.hash.get() as u32
    }

    pub fn compare(&self, other: &Str) -> Ordering {
        self.chars.cmp(&other.chars)
    }

    /// One-byte substring, used by string indexing.
    pub fn byte_at(&self, index: usize) -> Option<u8> {
        self.chars.get(index).copied()
    }

    /// The byte range `[start, end]`, clamped to the buffer; empty when the
    /// range does not intersect it.
    pub fn slice(&self, start: i64, end: i64) -> Str {
        let len = self.chars.len() as i64;
        let start = start.max(0);
        let end = end.min(len - 1);
        if start > end {
            return Str::new();
        }
        Str::from_bytes(&self.chars[start as usize..=end as usize])
    }

    pub fn index_of(&self, needle: &Str) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.chars
            .windows(needle.len())
            .position(|window| window == needle.as_bytes())
    }

    pub fn lower(&self) -> Str {
        Str::from_bytes(&self.chars.to_ascii_lowercase())
    }

    pub fn upper(&self) -> Str {
        Str::from_bytes(&self.chars.to_ascii_uppercase())
    }

    pub fn trim(&self) -> Str {
        let start = self
            .chars
            .iter()
            .position(|c| !c.is_ascii_whitespace())
            .unwrap_or(self.chars.len());
        let end = self
            .chars
            .iter()
            .rposition(|c| !c.is_ascii_whitespace())
            .map_or(start, |i| i + 1);
        Str::from_bytes(&self.chars[start..end])
    }

    pub fn print(&self, out: &mut dyn Write, quoted: bool) -> std::io::Result<()> {
        if quoted {
            out.write_all(b"\"")?;
            out.write_all(&self.chars)?;
            out.write_all(b"\"")
        } else {
            out.write_all(&self.chars)
        }
    }

    /// Format: `u32 capacity · u32 length · bytes · i32 hash`.
    pub fn serialize(&self, out: &mut dyn Write) -> std::io::Result<()> {
        encoding::write_u32(out, self.capacity as u32)?;
        encoding::write_u32(out, self.chars.len() as u32)?;
        out.write_all(&self.chars)?;
        encoding::write_i32(out, self.hash.get() as i32)
    }

    pub fn deserialize(input: &mut dyn Read) -> Option<Str> {
        let capacity = encoding::read_u32(input)? as usize;
        let length = encoding::read_u32(input)? as usize;
        if length > capacity || !capacity.is_power_of_two() || capacity < MIN_CAPACITY {
            return None;
        }
        let bytes = encoding::read_bytes(input, length)?;
        let hash = encoding::read_i32(input)?;
        let mut str = Str::with_capacity(capacity);
        str.chars.extend_from_slice(&bytes);
        str.hash.set(i64::from(hash));
        Some(str)
    }
}

impl Default for Str {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Str {
    fn clone(&self) -> Self {
        let mut str = Str::with_capacity(self.len());
        str.chars.extend_from_slice(&self.chars);
        str.hash.set(self.hash.get());
        str
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Self) -> bool {
        self.chars == other.chars
    }
}

impl Eq for Str {}

impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.chars))
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = 2166136261u32;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_power_of_two_and_at_least_eight() {
        assert_eq!(Str::new().capacity(), 8);
        assert_eq!(Str::with_capacity(9).capacity(), 16);
        assert_eq!(Str::from_chars("a longer string here").capacity(), 32);
    }

    #[test]
    fn ensure_capacity_never_shrinks() {
        let mut s = Str::with_capacity(64);
        s.ensure_capacity(8);
        assert_eq!(s.capacity(), 64);
        s.ensure_capacity(65);
        assert_eq!(s.capacity(), 128);
    }

    #[test]
    fn concat_yields_concatenated_bytes() {
        let a = Str::from_chars("foo");
        let b = Str::from_chars("bar");
        let c = a.concat(&b);
        assert_eq!(c.as_bytes(), b"foobar");
        assert_eq!(a.as_bytes(), b"foo");
    }

    #[test]
    fn hash_is_cached_and_invalidated_on_mutation() {
        let mut s = Str::from_chars("te");
        let before = s.hash();
        assert_eq!(before, fnv1a(b"te"));
        s.inplace_concat_bytes(b"st");
        assert_eq!(s.hash(), fnv1a(b"test"));
        assert_ne!(s.hash(), before);
    }

    #[test]
    fn compare_is_lexicographic_on_bytes() {
        let a = Str::from_chars("abc");
        let b = Str::from_chars("abd");
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
        assert_eq!(a.compare(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn slice_clamps_to_bounds() {
        let s = Str::from_chars("hello");
        assert_eq!(s.slice(1, 3).as_bytes(), b"ell");
        assert_eq!(s.slice(-2, 10).as_bytes(), b"hello");
        assert_eq!(s.slice(3, 1).as_bytes(), b"");
    }

    #[test]
    fn serialize_round_trip() {
        let s = Str::from_chars("round trip");
        let mut buf = Vec::new();
        s.serialize(&mut buf).unwrap();
        let back = Str::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.capacity(), s.capacity());
    }

    #[test]
    fn deserialize_rejects_bad_lengths() {
        let s = Str::from_chars("x");
        let mut buf = Vec::new();
        s.serialize(&mut buf).unwrap();
        buf.truncate(buf.len() - 6);
        assert!(Str::deserialize(&mut buf.as_slice()).is_none());
    }

    #[test]
    fn trim_strips_ascii_whitespace() {
        assert_eq!(Str::from_chars("  hi \t").trim().as_bytes(), b"hi");
        assert_eq!(Str::from_chars("   ").trim().as_bytes(), b"");
    }
}
