//! Heap array objects.
//!
//! Arrays use the same grow-by-doubling capacity discipline as strings.
//! Every mutating operation exists in two shapes: the functional one
//! returns a new array and leaves the receiver alone (the copy-on-write
//! path the VM takes when an array is shared), and the `inplace_` one
//! mutates the receiver (taken when the VM holds the only reference).

use std::cmp::Ordering;
use std::io::{Read, Write};

use crate::encoding;
use crate::value::{Incomparable, Value};

const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct Array {
    elements: Vec<Value>,
    capacity: usize,
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl Array {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(min_capacity: usize) -> Self {
        let capacity = encoding::power_of_two_ceil(min_capacity.max(MIN_CAPACITY));
        let mut elements = Vec::new();
        elements.reserve(capacity);
        Self { elements, capacity }
    }

    pub fn from_elements(elements: Vec<Value>) -> Self {
        let mut arr = Self::with_capacity(elements.len());
        arr.elements = elements;
        arr
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    /// Grow the buffer so it can hold at least `min_capacity` elements.
    /// Never shrinks.
    pub fn ensure_capacity(&mut self, min_capacity: usize) {
        if min_capacity <= self.capacity {
            return;
        }
        let capacity = encoding::power_of_two_ceil(min_capacity);
        self.elements.reserve(capacity - self.elements.len());
        self.capacity = capacity;
    }

    pub fn add(&self, value: Value) -> Array {
        let mut result = self.clone();
        result.inplace_add(value);
        result
    }

    pub fn inplace_add(&mut self, value: Value) {
        self.ensure_capacity(self.len() + 1);
        self.elements.push(value);
    }

    /// Replace the element at `index`; the index must be in bounds.
    pub fn set(&self, index: usize, value: Value) -> Array {
        let mut result = self.clone();
        result.inplace_set(index, value);
        result
    }

    pub fn inplace_set(&mut self, index: usize, value: Value) {
        self.elements[index] = value;
    }

    pub fn insert(&self, index: usize, value: Value) -> Array {
        let mut result = self.clone();
        result.inplace_insert(index, value);
        result
    }

    pub fn inplace_insert(&mut self, index: usize, value: Value) {
        self.ensure_capacity(self.len() + 1);
        self.elements.insert(index, value);
    }

    pub fn delete(&self, index: usize) -> Array {
        let mut result = self.clone();
        result.inplace_delete(index);
        result
    }

    pub fn inplace_delete(&mut self, index: usize) {
        self.elements.remove(index);
    }

    pub fn concat(&self, other: &Array) -> Array {
        let mut result = Array::with_capacity(self.len() + other.len());
        result.elements.extend_from_slice(&self.elements);
        result.elements.extend_from_slice(&other.elements);
        result
    }

    pub fn inplace_concat(&mut self, other: &Array) {
        self.ensure_capacity(self.len() + other.len());
        self.elements.extend_from_slice(&other.elements);
    }

    /// Elements of `self` that do not occur in `other`.
    pub fn diff(&self, other: &Array) -> Array {
        let mut result = Array::new();
        for element in &self.elements {
            if other.index_of(element).is_none() {
                result.inplace_add(element.clone());
            }
        }
        result
    }

    pub fn inplace_diff(&mut self, other: &Array) {
        self.elements.retain(|element| other.index_of(element).is_none());
    }

    pub fn clear(&self) -> Array {
        Array::new()
    }

    pub fn inplace_clear(&mut self) {
        self.elements.clear();
    }

    /// Linear scan using value equality.
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.elements.iter().position(|element| element.equal(value))
    }

    /// The element range `[start, end]`, clamped to the bounds; empty when
    /// the range does not intersect them.
    pub fn slice(&self, start: i64, end: i64) -> Array {
        let len = self.elements.len() as i64;
        let start = start.max(0);
        let end = end.min(len - 1);
        if start > end {
            return Array::new();
        }
        Array::from_elements(self.elements[start as usize..=end as usize].to_vec())
    }

    /// Insertion sort over the value total order; fails if any pair of
    /// elements is incomparable.
    pub fn sort(&self) -> Result<Array, Incomparable> {
        let mut result = self.clone();
        result.inplace_sort()?;
        Ok(result)
    }

    pub fn inplace_sort(&mut self) -> Result<(), Incomparable> {
        for i in 1..self.elements.len() {
            let mut j = i;
            while j > 0 {
                if self.elements[j - 1].compare(&self.elements[j])? != Ordering::Greater {
                    break;
                }
                self.elements.swap(j - 1, j);
                j -= 1;
            }
        }
        Ok(())
    }

    pub fn equal(&self, other: &Array) -> bool {
        self.len() == other.len()
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|(a, b)| a.equal(b))
    }

    /// Element-wise comparison, then by length.
    pub fn compare(&self, other: &Array) -> Result<Ordering, Incomparable> {
        for (a, b) in self.elements.iter().zip(&other.elements) {
            let ordering = a.compare(b)?;
            if ordering != Ordering::Equal {
                return Ok(ordering);
            }
        }
        Ok(self.len().cmp(&other.len()))
    }

    pub fn print(&self, out: &mut dyn Write) -> std::io::Result<()> {
        out.write_all(b"[")?;
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                out.write_all(b", ")?;
            }
            element.print(out, true)?;
        }
        out.write_all(b"]")
    }

    /// Serialized as `u32 length` followed by the value records. Only
    /// numbers and strings are representable, which is all a constant
    /// pool may contain.
    pub fn serialize(&self, out: &mut dyn Write) -> std::io::Result<()> {
        encoding::write_u32(out, self.elements.len() as u32)?;
        for element in &self.elements {
            element.serialize(out)?;
        }
        Ok(())
    }

    pub fn deserialize(input: &mut dyn Read) -> Option<Array> {
        let length = encoding::read_u32(input)? as usize;
        let mut arr = Array::with_capacity(length);
        for _ in 0..length {
            arr.elements.push(Value::deserialize(input)?);
        }
        Some(arr)
    }
}
