//! Little-endian primitives for the bytecode file format.
//!
//! Everything persisted to disk goes through these helpers so the format
//! stays independent of the host word size. Readers return `None` on a
//! short or exhausted stream; the callers translate that into
//! "unable to load bytecode" at the API boundary.

use std::io::{Read, Write};

pub(crate) fn write_u8(out: &mut dyn Write, value: u8) -> std::io::Result<()> {
    out.write_all(&[value])
}

pub(crate) fn write_u32(out: &mut dyn Write, value: u32) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub(crate) fn write_i32(out: &mut dyn Write, value: i32) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub(crate) fn write_f64(out: &mut dyn Write, value: f64) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub(crate) fn read_u8(input: &mut dyn Read) -> Option<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf).ok()?;
    Some(buf[0])
}

pub(crate) fn read_u32(input: &mut dyn Read) -> Option<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).ok()?;
    Some(u32::from_le_bytes(buf))
}

pub(crate) fn read_i32(input: &mut dyn Read) -> Option<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).ok()?;
    Some(i32::from_le_bytes(buf))
}

pub(crate) fn read_f64(input: &mut dyn Read) -> Option<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf).ok()?;
    Some(f64::from_le_bytes(buf))
}

pub(crate) fn read_bytes(input: &mut dyn Read, length: usize) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; length];
    input.read_exact(&mut buf).ok()?;
    Some(buf)
}

/// Round `n` up to the next power of two.
pub(crate) fn power_of_two_ceil(n: usize) -> usize {
    n.next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 7).unwrap();
        write_u32(&mut buf, 0xdead_beef).unwrap();
        write_i32(&mut buf, -1).unwrap();
        write_f64(&mut buf, 2.5).unwrap();

        let mut cursor = buf.as_slice();
        assert_eq!(read_u8(&mut cursor), Some(7));
        assert_eq!(read_u32(&mut cursor), Some(0xdead_beef));
        assert_eq!(read_i32(&mut cursor), Some(-1));
        assert_eq!(read_f64(&mut cursor), Some(2.5));
        assert_eq!(read_u8(&mut cursor), None);
    }

    #[test]
    fn short_reads_yield_none() {
        let mut cursor: &[u8] = &[1, 2];
        assert_eq!(read_u32(&mut cursor), None);
    }

    #[test]
    fn power_of_two_ceil_rounds_up() {
        assert_eq!(power_of_two_ceil(1), 1);
        assert_eq!(power_of_two_ceil(8), 8);
        assert_eq!(power_of_two_ceil(9), 16);
        assert_eq!(power_of_two_ceil(1000), 1024);
    }
}
