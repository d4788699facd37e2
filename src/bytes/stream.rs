//! Streaming and absolute typed I/O for [`Bytes`].
//!
//! Streaming operations advance the cursor by the width of the type; the
//! write side runs the elastic bounds check first, so a successful call
//! leaves the bytes in place and the positions advanced, and a failed call
//! leaves the cursor untouched.  Absolute (`*_at`) operations delegate to
//! the store without moving the cursor.

use super::Bytes;
use crate::codec::stopbit;
use crate::error::{BytesError, Result};

macro_rules! streaming_access {
    ($read:ident, $write:ident, $read_at:ident, $write_at:ident, $ty:ty, $width:expr) => {
        /// Read at the read position and advance by the type width.
        pub fn $read(&mut self) -> Result<$ty> {
            self.read_check($width)?;
            let v = self.store.$read(self.read_position)?;
            self.advance_read($width);
            Ok(v)
        }

        /// Write at the write position and advance by the type width.
        pub fn $write(&mut self, value: $ty) -> Result<()> {
            self.write_check_offset(self.write_position, $width)?;
            self.store.$write(self.write_position, value)?;
            self.advance_written($width);
            Ok(())
        }

        /// Read at an absolute offset without moving the cursor.
        pub fn $read_at(&self, offset: u64) -> Result<$ty> {
            self.store.$read(offset)
        }

        /// Write at an absolute offset without moving the cursor.
        pub fn $write_at(&self, offset: u64, value: $ty) -> Result<()> {
            self.store.$write(offset, value)
        }
    };
}

impl Bytes {
    streaming_access!(read_u8, write_u8, read_u8_at, write_u8_at, u8, 1);
    streaming_access!(read_i8, write_i8, read_i8_at, write_i8_at, i8, 1);
    streaming_access!(read_u16, write_u16, read_u16_at, write_u16_at, u16, 2);
    streaming_access!(read_i16, write_i16, read_i16_at, write_i16_at, i16, 2);
    streaming_access!(read_u32, write_u32, read_u32_at, write_u32_at, u32, 4);
    streaming_access!(read_i32, write_i32, read_i32_at, write_i32_at, i32, 4);
    streaming_access!(read_u64, write_u64, read_u64_at, write_u64_at, u64, 8);
    streaming_access!(read_i64, write_i64, read_i64_at, write_i64_at, i64, 8);
    streaming_access!(read_f32, write_f32, read_f32_at, write_f32_at, f32, 4);
    streaming_access!(read_f64, write_f64, read_f64_at, write_f64_at, f64, 8);

    /// The byte at the read position without advancing, or -1 when none
    /// remains.
    pub fn peek_unsigned_byte(&self) -> i32 {
        if self.read_remaining() == 0 {
            return -1;
        }
        self.store.peek_unsigned_byte(self.read_position)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Volatile / ordered / CAS (absolute offsets)
    // ─────────────────────────────────────────────────────────────────────

    /// Acquire-load at an aligned absolute offset.
    pub fn read_volatile_u32(&self, offset: u64) -> Result<u32> {
        self.store.read_volatile_u32(offset)
    }

    /// Acquire-load at an aligned absolute offset.
    pub fn read_volatile_u64(&self, offset: u64) -> Result<u64> {
        self.store.read_volatile_u64(offset)
    }

    /// Release-store at an aligned absolute offset.
    pub fn write_ordered_u32(&self, offset: u64, value: u32) -> Result<()> {
        self.store.write_ordered_u32(offset, value)
    }

    /// Release-store at an aligned absolute offset.
    pub fn write_ordered_u64(&self, offset: u64, value: u64) -> Result<()> {
        self.store.write_ordered_u64(offset, value)
    }

    /// Sequentially consistent compare-and-swap at an aligned absolute
    /// offset.
    pub fn compare_and_swap_u32(&self, offset: u64, expected: u32, new: u32) -> Result<bool> {
        self.store.cas_u32(offset, expected, new)
    }

    /// Sequentially consistent compare-and-swap at an aligned absolute
    /// offset.
    pub fn compare_and_swap_u64(&self, offset: u64, expected: u64, new: u64) -> Result<bool> {
        self.store.cas_u64(offset, expected, new)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stop-bit codec
    // ─────────────────────────────────────────────────────────────────────

    /// Write a stop-bit coded long.
    pub fn write_stop_bit(&mut self, value: i64) -> Result<()> {
        stopbit::write_stop_bit(self, value)
    }

    /// Read a stop-bit coded long.
    pub fn read_stop_bit(&mut self) -> Result<i64> {
        stopbit::read_stop_bit(self)
    }

    /// Write a stop-bit coded double.
    pub fn write_stop_bit_double(&mut self, value: f64) -> Result<()> {
        stopbit::write_stop_bit_double(self, value)
    }

    /// Read a stop-bit coded double.
    pub fn read_stop_bit_double(&mut self) -> Result<f64> {
        stopbit::read_stop_bit_double(self)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Strings
    // ─────────────────────────────────────────────────────────────────────

    /// Write a stop-bit length-prefixed UTF-8 string; `None` writes the
    /// null marker (length -1).
    pub fn write_utf8(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            None => self.write_stop_bit(-1),
            Some(s) => {
                self.write_stop_bit(s.len() as i64)?;
                self.write_slice(s.as_bytes())
            }
        }
    }

    /// Read a string written by [`write_utf8`](Self::write_utf8).
    pub fn read_utf8(&mut self) -> Result<Option<String>> {
        let len = self.read_stop_bit()?;
        if len < 0 {
            if len != -1 {
                return Err(BytesError::UtfDataFormat(format!(
                    "invalid string length {}",
                    len
                )));
            }
            return Ok(None);
        }
        let mut buf = vec![0u8; len as usize];
        self.read_slice(&mut buf)?;
        String::from_utf8(buf)
            .map(Some)
            .map_err(|e| BytesError::UtfDataFormat(e.to_string()))
    }

    /// Write a stop-bit length-prefixed 8-bit (ISO-8859-1) string; every
    /// character must be a Latin-1 code point.
    pub fn write_8bit(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            None => self.write_stop_bit(-1),
            Some(s) => {
                let count = s.chars().count() as i64;
                self.write_stop_bit(count)?;
                for c in s.chars() {
                    let code = c as u32;
                    if code > 0xFF {
                        return Err(BytesError::UtfDataFormat(format!(
                            "character {:?} is not representable in 8-bit text",
                            c
                        )));
                    }
                    self.write_u8(code as u8)?;
                }
                Ok(())
            }
        }
    }

    /// Read a string written by [`write_8bit`](Self::write_8bit).
    pub fn read_8bit(&mut self) -> Result<Option<String>> {
        let len = self.read_stop_bit()?;
        if len < 0 {
            if len != -1 {
                return Err(BytesError::UtfDataFormat(format!(
                    "invalid string length {}",
                    len
                )));
            }
            return Ok(None);
        }
        let mut out = String::with_capacity(len as usize);
        for _ in 0..len {
            out.push(self.read_u8()? as char);
        }
        Ok(Some(out))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Bulk
    // ─────────────────────────────────────────────────────────────────────

    /// Read exactly `dst.len()` bytes, advancing the read position.
    pub fn read_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        self.read_check(dst.len() as u64)?;
        self.store.read_into(self.read_position, dst)?;
        self.advance_read(dst.len() as u64);
        Ok(())
    }

    /// Write all of `src`, advancing the write position.
    pub fn write_slice(&mut self, src: &[u8]) -> Result<()> {
        self.write_check_offset(self.write_position, src.len() as u64)?;
        self.store.write_from(self.write_position, src)?;
        self.advance_written(src.len() as u64);
        Ok(())
    }

    /// Copy `other`'s readable window into this cursor, advancing this
    /// cursor's write position.  `other`'s positions are untouched.
    pub fn write_bytes(&mut self, other: &Bytes) -> Result<()> {
        self.write_bytes_range(other, other.read_position(), other.read_remaining())
    }

    /// Copy `len` bytes of `other` starting at absolute `offset`.
    pub fn write_bytes_range(&mut self, other: &Bytes, offset: u64, len: u64) -> Result<()> {
        self.write_check_offset(self.write_position, len)?;
        self.store
            .write_store(self.write_position, other.store(), offset, len)?;
        self.advance_written(len);
        Ok(())
    }

    /// Copy `len` bytes from raw memory, advancing the write position.
    ///
    /// # Safety
    /// `src` must be valid for `len` bytes of reads.
    pub unsafe fn native_write(&mut self, src: *const u8, len: u64) -> Result<()> {
        self.write_check_offset(self.write_position, len)?;
        self.store.native_write(self.write_position, src, len)?;
        self.advance_written(len);
        Ok(())
    }

    /// Copy `len` readable bytes to raw memory, advancing the read position.
    ///
    /// # Safety
    /// `dst` must be valid for `len` bytes of writes.
    pub unsafe fn native_read(&mut self, dst: *mut u8, len: u64) -> Result<()> {
        self.read_check(len)?;
        self.store.native_read(self.read_position, dst, len)?;
        self.advance_read(len);
        Ok(())
    }

    /// Overlap-safe move of `len` bytes between absolute offsets.
    pub fn move_range(&self, from: u64, to: u64, len: u64) -> Result<()> {
        self.store.move_range(from, to, len)
    }

    /// Zero the absolute range `[from, to)`.
    pub fn zero_out(&self, from: u64, to: u64) -> Result<()> {
        self.store.zero_out(from, to)
    }
}
