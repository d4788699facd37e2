// Integration tests for the guarded (type-tagged) cursor and the hex-dump
// renderer.

use rawbytes::error::BytesError;
use rawbytes::{Bytes, GuardedBytes, HexDumpBytes};

// ─────────────────────────────────────────────────────────────────────────────
// Guarded round trips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn guarded_typed_values_round_trip() {
    let mut g = GuardedBytes::new(Bytes::elastic().unwrap());
    g.write_u8(0xAB).unwrap();
    g.write_i16(-1234).unwrap();
    g.write_u32(0xDEAD_BEEF).unwrap();
    g.write_i64(i64::MIN).unwrap();
    g.write_stop_bit(300).unwrap();
    g.write_f32(2.5).unwrap();
    g.write_f64(-0.125).unwrap();

    assert_eq!(g.read_u8().unwrap(), 0xAB);
    assert_eq!(g.read_i16().unwrap(), -1234);
    assert_eq!(g.read_u32().unwrap(), 0xDEAD_BEEF);
    assert_eq!(g.read_i64().unwrap(), i64::MIN);
    assert_eq!(g.read_stop_bit().unwrap(), 300);
    assert_eq!(g.read_f32().unwrap(), 2.5);
    assert_eq!(g.read_f64().unwrap(), -0.125);
}

#[test]
fn guarded_tags_cost_one_byte_each() {
    let mut g = GuardedBytes::new(Bytes::elastic().unwrap());
    g.write_u32(1).unwrap();
    // One tag byte plus four value bytes.
    assert_eq!(g.bytes().write_position(), 5);
}

#[test]
fn mismatched_read_names_both_types() {
    let mut g = GuardedBytes::new(Bytes::elastic().unwrap());
    g.write_u32(7).unwrap();
    let err = g.read_i64().unwrap_err();
    match err {
        BytesError::IllegalState(msg) => {
            assert_eq!(msg, "Expected INT64 but was INT32");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn garbage_tag_is_reported_as_hex() {
    let mut inner = Bytes::elastic().unwrap();
    inner.write_u8(0x7E).unwrap();
    let mut g = GuardedBytes::new(inner);
    let err = g.read_u8().unwrap_err();
    match err {
        BytesError::IllegalState(msg) => {
            assert_eq!(msg, "Expected INT8 but was 0x7E");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn guarded_stream_is_not_plain_compatible() {
    // The tag bytes are in the stream: a plain reader sees them.
    let mut g = GuardedBytes::new(Bytes::elastic().unwrap());
    g.write_u8(9).unwrap();
    let mut plain = g.into_inner();
    assert_eq!(plain.read_u8().unwrap(), 1); // INT8 tag
    assert_eq!(plain.read_u8().unwrap(), 9);
}

// ─────────────────────────────────────────────────────────────────────────────
// Hex dump rendering
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn hex_dump_shows_offsets_bytes_and_comments() {
    let mut h = HexDumpBytes::new(Bytes::elastic().unwrap());
    h.comment("header");
    h.write_u32(0x0403_0201).unwrap();
    h.indent();
    h.comment("body");
    h.write_slice_through(b"ABCDEFGHIJKLMNOP");
    let dump = h.to_hex_string();

    assert!(dump.contains("00000000"), "{}", dump);
    assert!(dump.contains("01 02 03 04"), "{}", dump);
    assert!(dump.contains("; header"), "{}", dump);
    assert!(dump.contains(";   body"), "{}", dump);
    // 20 bytes written: two rows.
    assert_eq!(dump.lines().count(), 2, "{}", dump);
}

#[test]
fn annotations_are_not_part_of_the_stream() {
    let mut h = HexDumpBytes::new(Bytes::elastic().unwrap());
    h.comment("invisible");
    h.write_u64(42).unwrap();
    let mut inner = h.into_inner();
    assert_eq!(inner.read_remaining(), 8);
    assert_eq!(inner.read_u64().unwrap(), 42);
}

// Helper extension used above: bulk write through the dump wrapper.
trait WriteSliceThrough {
    fn write_slice_through(&mut self, data: &[u8]);
}

impl WriteSliceThrough for HexDumpBytes {
    fn write_slice_through(&mut self, data: &[u8]) {
        self.bytes_mut().write_slice(data).unwrap();
    }
}
