//! A cursor wrapper that records positional annotations and renders the
//! written bytes as an annotated hex dump.
//!
//! Annotations live in a side list keyed by the write position at the time
//! they were added; they are never written into the byte stream.  The
//! rendering groups 16 bytes per line with an 8-digit offset column and
//! appends the comments whose position falls on that line, indented to
//! their recorded depth.

use super::Bytes;
use crate::error::Result;

struct Note {
    position: u64,
    indent: usize,
    text: String,
}

/// A cursor with an attached annotation buffer.
pub struct HexDumpBytes {
    inner: Bytes,
    notes: Vec<Note>,
    indent: usize,
}

impl HexDumpBytes {
    /// Attach an annotation buffer to `inner`.
    pub fn new(inner: Bytes) -> HexDumpBytes {
        HexDumpBytes {
            inner,
            notes: Vec::new(),
            indent: 0,
        }
    }

    /// Drop the annotations and return the cursor.
    pub fn into_inner(self) -> Bytes {
        self.inner
    }

    /// The wrapped cursor.
    pub fn bytes(&self) -> &Bytes {
        &self.inner
    }

    /// Mutable access to the wrapped cursor; writes through here are still
    /// covered by the dump.
    pub fn bytes_mut(&mut self) -> &mut Bytes {
        &mut self.inner
    }

    /// Record `text` against the current write position.
    pub fn comment(&mut self, text: &str) {
        self.notes.push(Note {
            position: self.inner.write_position(),
            indent: self.indent,
            text: text.to_string(),
        });
    }

    /// Increase the indent depth of subsequent comments.
    pub fn indent(&mut self) {
        self.indent += 1;
    }

    /// Decrease the indent depth of subsequent comments.
    pub fn outdent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Render `[start, write_position)` as an annotated hex dump.
    pub fn to_hex_string(&self) -> String {
        let start = self.inner.start();
        let end = self.inner.write_position();
        let mut out = String::new();
        let mut row = [0u8; 16];
        let mut offset = start;
        while offset < end {
            let n = ((end - offset) as usize).min(16);
            if self.inner.store().read_into(offset, &mut row[..n]).is_err() {
                break;
            }
            out.push_str(&format!("{:08x} ", offset));
            for (i, byte) in row[..n].iter().enumerate() {
                if i == 8 {
                    out.push(' ');
                }
                out.push_str(&format!(" {:02x}", byte));
            }
            // Pad short rows so the comment column lines up.
            for i in n..16 {
                if i == 8 {
                    out.push(' ');
                }
                out.push_str("   ");
            }
            for note in self
                .notes
                .iter()
                .filter(|t| t.position >= offset && t.position < offset + n as u64)
            {
                out.push_str("  ; ");
                for _ in 0..note.indent {
                    out.push_str("  ");
                }
                out.push_str(&note.text);
            }
            out.push('\n');
            offset += n as u64;
        }
        // Comments recorded at the end of the stream (position == end).
        for note in self.notes.iter().filter(|t| t.position == end) {
            out.push_str(&format!("{:08x}", end));
            out.push_str(&" ".repeat(50));
            out.push_str("  ; ");
            out.push_str(&note.text);
            out.push('\n');
        }
        out
    }
}

// Write passthroughs used when composing with record writers.
impl HexDumpBytes {
    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.inner.write_u8(v)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.inner.write_u32(v)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.inner.write_u64(v)
    }

    pub fn write_stop_bit(&mut self, v: i64) -> Result<()> {
        self.inner.write_stop_bit(v)
    }

    pub fn write_utf8(&mut self, v: Option<&str>) -> Result<()> {
        self.inner.write_utf8(v)
    }
}

impl std::fmt::Debug for HexDumpBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HexDumpBytes")
            .field("inner", &self.inner)
            .field("notes", &self.notes.len())
            .finish()
    }
}
