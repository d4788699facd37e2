//! The binary method-dispatch protocol: a stop-bit coded stream of
//! `<message-id> <argument block>` records.
//!
//! The writer side proxies a typed interface: the caller implements their
//! trait for a type holding a [`MethodWriter`] and routes every method
//! through [`MethodWriter::write_event`], which writes the message id as a
//! stop-bit long followed by the encoded arguments.  Records are
//! all-or-nothing: any encoding failure rolls the write position back to the
//! record start before the error propagates.
//!
//! The reader side demultiplexes: handlers register
//! `(message_id, name, decode_fn)` on a [`MethodReaderBuilder`]; ids below
//! [`DENSE_DISPATCH_LIMIT`] dispatch through a dense table and larger ids
//! through a hash map.  Per-record decode failures are logged against the
//! method name and swallowed, the cursor resynchronised to the read limit,
//! so one bad record cannot desynchronise the stream.  Unknown ids go to
//! the default parselet, whose stock behaviour is to skip the rest of the
//! readable window.
//!
//! A writer and reader sharing the same id registrations round-trip every
//! representable argument type loss-lessly.

use std::collections::HashMap;

use crate::bytes::{Bytes, HexDumpBytes};
use crate::codec::stopbit;
use crate::error::{BytesError, Result};

/// Message ids below this bound dispatch through a dense array.
pub const DENSE_DISPATCH_LIMIT: u64 = 1000;

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

/// The writer's output seam: a plain cursor, or a hex-dump cursor that also
/// records method names as annotations.
pub trait WireSink {
    fn out(&mut self) -> &mut Bytes;

    /// Record a human-readable note for the bytes about to be written.
    /// No-op for plain cursors.
    fn note(&mut self, _text: &str) {}
}

impl WireSink for Bytes {
    fn out(&mut self) -> &mut Bytes {
        self
    }
}

impl WireSink for HexDumpBytes {
    fn out(&mut self) -> &mut Bytes {
        self.bytes_mut()
    }

    fn note(&mut self, text: &str) {
        self.comment(text);
    }
}

/// Encodes method calls as records on a sink.
pub struct MethodWriter<S: WireSink> {
    sink: S,
}

impl<S: WireSink> MethodWriter<S> {
    pub fn new(sink: S) -> MethodWriter<S> {
        MethodWriter { sink }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Write one record: the message id as a stop-bit long, then whatever
    /// `encode` produces.  On any failure the write position is rolled back
    /// to the record start and the error propagates.
    pub fn write_event(
        &mut self,
        name: &str,
        message_id: u64,
        encode: impl FnOnce(&mut Bytes) -> Result<()>,
    ) -> Result<()> {
        let checkpoint = self.sink.out().write_position();
        self.sink.note(name);
        let out = self.sink.out();
        let outcome = match stopbit::write_stop_bit_unsigned(out, message_id) {
            Ok(()) => encode(out),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                self.sink.out().roll_back_write_to(checkpoint)?;
                Err(e)
            }
        }
    }

    /// Called by proxies for methods with no registered message id: the call
    /// is logged and nothing is written.
    pub fn skip_unknown(&mut self, name: &str) {
        log::warn!("method {} has no message id; call skipped", name);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader
// ─────────────────────────────────────────────────────────────────────────────

/// Decodes one record's argument block and invokes the handler.
pub type MethodDecoder = Box<dyn FnMut(&mut Bytes) -> Result<()>>;

/// Fallback consumer for unregistered message ids.
pub type Parselet = Box<dyn FnMut(u64, &mut Bytes) -> Result<()>>;

struct Handler {
    name: String,
    decode: MethodDecoder,
}

/// Builds the dispatch table for a [`MethodReader`].
#[derive(Default)]
pub struct MethodReaderBuilder {
    dense: Vec<Option<Handler>>,
    sparse: HashMap<u64, Handler>,
    default_parselet: Option<Parselet>,
}

impl MethodReaderBuilder {
    pub fn new() -> MethodReaderBuilder {
        MethodReaderBuilder::default()
    }

    /// Register a decoder for `message_id`.  `name` is used in diagnostics.
    pub fn on(
        mut self,
        message_id: u64,
        name: &str,
        decode: impl FnMut(&mut Bytes) -> Result<()> + 'static,
    ) -> Self {
        let handler = Handler {
            name: name.to_string(),
            decode: Box::new(decode),
        };
        if message_id < DENSE_DISPATCH_LIMIT {
            let index = message_id as usize;
            if self.dense.len() <= index {
                self.dense.resize_with(index + 1, || None);
            }
            self.dense[index] = Some(handler);
        } else {
            self.sparse.insert(message_id, handler);
        }
        self
    }

    /// Replace the fallback for unregistered ids.  The stock fallback skips
    /// the rest of the readable window.
    pub fn default_parselet(
        mut self,
        parselet: impl FnMut(u64, &mut Bytes) -> Result<()> + 'static,
    ) -> Self {
        self.default_parselet = Some(Box::new(parselet));
        self
    }

    pub fn build(self) -> MethodReader {
        let default_parselet = self.default_parselet.unwrap_or_else(|| {
            Box::new(|id, source: &mut Bytes| {
                log::debug!("unknown message id {}; skipping record", id);
                let limit = source.read_limit();
                source.set_read_position(limit)
            })
        });
        MethodReader {
            dense: self.dense,
            sparse: self.sparse,
            default_parselet,
        }
    }
}

/// Demultiplexes records back into handler calls.
pub struct MethodReader {
    dense: Vec<Option<Handler>>,
    sparse: HashMap<u64, Handler>,
    default_parselet: Parselet,
}

impl MethodReader {
    fn lookup<'a>(
        dense: &'a mut [Option<Handler>],
        sparse: &'a mut HashMap<u64, Handler>,
        message_id: u64,
    ) -> Option<&'a mut Handler> {
        if message_id < DENSE_DISPATCH_LIMIT {
            dense.get_mut(message_id as usize)?.as_mut()
        } else {
            sparse.get_mut(&message_id)
        }
    }

    /// Consume one record from `source`.
    ///
    /// Returns `false` without touching the cursor when no byte remains.
    /// A handler's decode failure is logged against the method name and the
    /// cursor resynchronised to the read limit; the record still counts as
    /// consumed.
    pub fn read_one(&mut self, source: &mut Bytes) -> Result<bool> {
        if source.read_remaining() < 1 {
            return Ok(false);
        }
        let message_id = stopbit::read_stop_bit_unsigned(source)?;
        match Self::lookup(&mut self.dense, &mut self.sparse, message_id) {
            Some(handler) => {
                if let Err(e) = (handler.decode)(source) {
                    log::warn!("failed to decode call to {}: {}", handler.name, e);
                    let limit = source.read_limit();
                    source.set_read_position(limit)?;
                }
            }
            None => (self.default_parselet)(message_id, source)?,
        }
        Ok(true)
    }

    /// Consume records until the source is empty; returns how many were
    /// read.
    pub fn read_all(&mut self, source: &mut Bytes) -> Result<usize> {
        let mut count = 0;
        while self.read_one(source)? {
            count += 1;
        }
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument codecs beyond the cursor primitives
// ─────────────────────────────────────────────────────────────────────────────

/// A value that writes and reads itself as a record argument.
pub trait Marshallable {
    fn write_marshallable(&self, out: &mut Bytes) -> Result<()>;
    fn read_marshallable(&mut self, source: &mut Bytes) -> Result<()>;
}

/// Write `other`'s readable window as a stop-bit length-prefixed nested
/// block.
pub fn write_nested(out: &mut Bytes, other: &Bytes) -> Result<()> {
    let len = other.read_remaining();
    stopbit::write_stop_bit_unsigned(out, len)?;
    out.write_bytes(other)
}

/// Read a nested block into a standalone heap cursor.
pub fn read_nested(source: &mut Bytes) -> Result<Bytes> {
    let len = stopbit::read_stop_bit_unsigned(source)?;
    if len > source.read_remaining() {
        return Err(BytesError::BufferUnderflow {
            offset: source.read_position(),
            available: source.read_remaining(),
        });
    }
    let mut data = vec![0u8; len as usize];
    source.read_slice(&mut data)?;
    Ok(Bytes::wrap_vec(data))
}

/// Write an enum (or any symbolic constant) by name.
pub fn write_enum_name(out: &mut Bytes, name: &str) -> Result<()> {
    out.write_8bit(Some(name))
}

/// Read an enum name written by [`write_enum_name`].
pub fn read_enum_name(source: &mut Bytes) -> Result<String> {
    source.read_8bit()?.ok_or_else(|| {
        BytesError::InvalidMarshallable("null where an enum name was expected".to_string())
    })
}
