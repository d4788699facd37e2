//! A type-tagged wrapper that catches miswritten binary protocols.
//!
//! Every typed write prefixes a one-byte [`BinaryTag`]; every typed read
//! checks the tag before decoding the value.  A mismatch fails with
//! `IllegalState("Expected X but was Y")`, pointing straight at the first
//! place where writer and reader disagree.  Intended for tests and protocol
//! bring-up; the tags are written into the stream, so both ends must use
//! the guarded variant.

use super::Bytes;
use crate::error::{BytesError, Result};

/// One-byte type codes written ahead of each guarded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryTag {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    StopBit = 5,
    Float32 = 6,
    Float64 = 7,
}

impl BinaryTag {
    fn from_byte(b: u8) -> Option<BinaryTag> {
        Some(match b {
            1 => BinaryTag::Int8,
            2 => BinaryTag::Int16,
            3 => BinaryTag::Int32,
            4 => BinaryTag::Int64,
            5 => BinaryTag::StopBit,
            6 => BinaryTag::Float32,
            7 => BinaryTag::Float64,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            BinaryTag::Int8 => "INT8",
            BinaryTag::Int16 => "INT16",
            BinaryTag::Int32 => "INT32",
            BinaryTag::Int64 => "INT64",
            BinaryTag::StopBit => "STOP_BIT",
            BinaryTag::Float32 => "FLOAT32",
            BinaryTag::Float64 => "FLOAT64",
        }
    }
}

/// A cursor whose typed operations are tag-checked.
pub struct GuardedBytes {
    inner: Bytes,
}

macro_rules! guarded_access {
    ($read:ident, $write:ident, $ty:ty, $tag:expr) => {
        pub fn $write(&mut self, value: $ty) -> Result<()> {
            self.write_tag($tag)?;
            self.inner.$write(value)
        }

        pub fn $read(&mut self) -> Result<$ty> {
            self.expect_tag($tag)?;
            self.inner.$read()
        }
    };
}

impl GuardedBytes {
    /// Guard an existing cursor.
    pub fn new(inner: Bytes) -> GuardedBytes {
        GuardedBytes { inner }
    }

    /// Unwrap the underlying cursor.
    pub fn into_inner(self) -> Bytes {
        self.inner
    }

    /// The wrapped cursor, for operations that need no guard.
    pub fn bytes(&self) -> &Bytes {
        &self.inner
    }

    /// Mutable access to the wrapped cursor.
    pub fn bytes_mut(&mut self) -> &mut Bytes {
        &mut self.inner
    }

    fn write_tag(&mut self, tag: BinaryTag) -> Result<()> {
        self.inner.write_u8(tag as u8)
    }

    fn expect_tag(&mut self, expected: BinaryTag) -> Result<()> {
        let b = self.inner.read_u8()?;
        match BinaryTag::from_byte(b) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(BytesError::IllegalState(format!(
                "Expected {} but was {}",
                expected.name(),
                actual.name()
            ))),
            None => Err(BytesError::IllegalState(format!(
                "Expected {} but was 0x{:02X}",
                expected.name(),
                b
            ))),
        }
    }

    guarded_access!(read_u8, write_u8, u8, BinaryTag::Int8);
    guarded_access!(read_i8, write_i8, i8, BinaryTag::Int8);
    guarded_access!(read_u16, write_u16, u16, BinaryTag::Int16);
    guarded_access!(read_i16, write_i16, i16, BinaryTag::Int16);
    guarded_access!(read_u32, write_u32, u32, BinaryTag::Int32);
    guarded_access!(read_i32, write_i32, i32, BinaryTag::Int32);
    guarded_access!(read_u64, write_u64, u64, BinaryTag::Int64);
    guarded_access!(read_i64, write_i64, i64, BinaryTag::Int64);
    guarded_access!(read_f32, write_f32, f32, BinaryTag::Float32);
    guarded_access!(read_f64, write_f64, f64, BinaryTag::Float64);

    pub fn write_stop_bit(&mut self, value: i64) -> Result<()> {
        self.write_tag(BinaryTag::StopBit)?;
        self.inner.write_stop_bit(value)
    }

    pub fn read_stop_bit(&mut self) -> Result<i64> {
        self.expect_tag(BinaryTag::StopBit)?;
        self.inner.read_stop_bit()
    }
}

impl std::fmt::Debug for GuardedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedBytes")
            .field("inner", &self.inner)
            .finish()
    }
}
