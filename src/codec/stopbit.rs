//! Stop-bit variable-length integer and double codec.
//!
//! The wire format packs 7 bits per byte, little-endian: every byte with the
//! high bit set continues into the next, and the terminating byte has the
//! high bit clear.  Small non-negative values are one byte; `300` is
//! `AC 02`; the largest unsigned value takes 10 bytes.
//!
//! Negative longs are written as the continuation-flagged groups of the
//! *complement* `!n`, terminated by a bare `0x00` byte.  A decoder that sees
//! the `0x00` terminator after at least one continuation byte complements
//! the accumulated value; the canonical non-negative encoding never produces
//! that shape (its final group is non-zero), so the two ranges cannot be
//! confused.  `-1` is the two bytes `80 00`.
//!
//! Doubles are encoded by bit-reversing the IEEE-754 representation and
//! writing it as an unsigned stop-bit value: the mantissa's trailing zero
//! bits (ubiquitous in integers and short decimals) become leading zeros,
//! so such values take few bytes while every bit pattern, NaN payloads
//! included, round-trips exactly.

use crate::bytes::Bytes;
use crate::error::{BytesError, Result};

/// Most bytes any single stop-bit value may occupy before its terminator.
pub const MAX_STOP_BIT_BYTES: u32 = 10;

/// Write a non-negative value as canonical stop-bit groups.
pub fn write_stop_bit_unsigned(out: &mut Bytes, mut value: u64) -> Result<()> {
    while value > 0x7F {
        out.write_u8((value as u8 & 0x7F) | 0x80)?;
        value >>= 7;
    }
    out.write_u8(value as u8)
}

/// Write a signed value; negatives use the complement-and-terminate form.
pub fn write_stop_bit(out: &mut Bytes, value: i64) -> Result<()> {
    if value >= 0 {
        return write_stop_bit_unsigned(out, value as u64);
    }
    let mut v = !(value as u64);
    loop {
        out.write_u8((v as u8 & 0x7F) | 0x80)?;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    out.write_u8(0)
}

/// Decode one stop-bit value as `(accumulated, negated)`.
fn read_stop_bit_raw(input: &mut Bytes) -> Result<(u64, bool)> {
    let mut acc: u64 = 0;
    let mut shift: u32 = 0;
    let mut count: u32 = 0;
    loop {
        let b = input.read_u8()?;
        if b & 0x80 == 0 {
            // Terminator.  A zero terminator after a continuation byte is
            // the negation marker.
            if b == 0 && shift > 0 {
                return Ok((acc, true));
            }
            return Ok((acc | ((b as u64) << shift), false));
        }
        count += 1;
        if count > MAX_STOP_BIT_BYTES {
            return Err(BytesError::Arithmetic(format!(
                "stop-bit value exceeds {} bytes",
                MAX_STOP_BIT_BYTES
            )));
        }
        acc |= ((b & 0x7F) as u64) << shift;
        shift += 7;
    }
}

/// Read a signed stop-bit value.
pub fn read_stop_bit(input: &mut Bytes) -> Result<i64> {
    let (acc, negated) = read_stop_bit_raw(input)?;
    Ok(if negated { !acc as i64 } else { acc as i64 })
}

/// Read an unsigned stop-bit value.
pub fn read_stop_bit_unsigned(input: &mut Bytes) -> Result<u64> {
    let (acc, negated) = read_stop_bit_raw(input)?;
    Ok(if negated { !acc } else { acc })
}

/// Write a double in the bit-reversed stop-bit form.
pub fn write_stop_bit_double(out: &mut Bytes, value: f64) -> Result<()> {
    write_stop_bit_unsigned(out, value.to_bits().reverse_bits())
}

/// Read a double written by [`write_stop_bit_double`].
pub fn read_stop_bit_double(input: &mut Bytes) -> Result<f64> {
    Ok(f64::from_bits(read_stop_bit_unsigned(input)?.reverse_bits()))
}
