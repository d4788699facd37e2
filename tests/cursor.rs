// Integration tests for the Bytes cursor layer: position/limit discipline,
// elastic growth, clear/flip idempotence, mark/reset, and the decorated
// overflow diagnostics.

use rawbytes::error::BytesError;
use rawbytes::Bytes;

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn assert_invariants(b: &Bytes) {
    assert!(b.start() <= b.read_position());
    assert!(b.read_position() <= b.read_limit());
    assert!(b.read_position() <= b.write_position());
    assert!(b.write_position() <= b.write_limit());
    assert!(b.write_limit() <= b.capacity());
}

// ─────────────────────────────────────────────────────────────────────────────
// Elastic growth
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn elastic_native_grows_past_initial_capacity() {
    // Initial capacity 8; writing 16 bytes must upgrade the store in place.
    let mut b = Bytes::elastic_with_capacity(8).unwrap();
    assert_eq!(b.real_capacity(), 8);
    let data: Vec<u8> = (1u8..=16).collect();
    b.write_slice(&data).unwrap();

    assert!(b.real_capacity() >= 16);
    // Growth rounds to a whole page.
    assert_eq!(b.real_capacity() % 4096, 0);
    assert_eq!(b.write_position(), 16);
    assert_eq!(b.to_vec(), data);
    assert_invariants(&b);
}

#[test]
fn elastic_growth_preserves_earlier_bytes() {
    let mut b = Bytes::elastic_with_capacity(16).unwrap();
    b.write_u64(0x1122_3344_5566_7788).unwrap();
    b.write_u64(0x99AA_BBCC_DDEE_FF00).unwrap();
    // Force several growth steps.
    for i in 0..2_000u32 {
        b.write_u32(i).unwrap();
    }
    assert_eq!(b.read_u64().unwrap(), 0x1122_3344_5566_7788);
    assert_eq!(b.read_u64().unwrap(), 0x99AA_BBCC_DDEE_FF00);
    for i in 0..2_000u32 {
        assert_eq!(b.read_u32().unwrap(), i);
    }
    assert_invariants(&b);
}

#[test]
fn elastic_heap_cursor_grows_too() {
    let mut b = Bytes::elastic_on_heap();
    let data = vec![0xA5u8; 10_000];
    b.write_slice(&data).unwrap();
    assert_eq!(b.to_vec(), data);
}

// ─────────────────────────────────────────────────────────────────────────────
// Write limit and decorated overflow
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn write_past_limit_is_decorated_and_writes_nothing() {
    let mut b = Bytes::elastic_with_capacity(8).unwrap();
    b.set_write_limit(4).unwrap();
    let err = b.write_slice(&[1, 2, 3, 4, 5]).unwrap_err();
    match &err {
        BytesError::DecoratedBufferOverflow(msg) => {
            assert!(
                msg.contains("attempt to write 5 bytes to 5 limit: 4"),
                "unexpected message: {}",
                msg
            );
        }
        other => panic!("expected decorated overflow, got {:?}", other),
    }
    // No bytes written, positions untouched.
    assert_eq!(b.write_position(), 0);
    assert_eq!(b.read_remaining(), 0);
    assert_invariants(&b);
}

#[test]
fn writes_up_to_the_limit_still_succeed() {
    let mut b = Bytes::elastic_with_capacity(8).unwrap();
    b.set_write_limit(4).unwrap();
    b.write_slice(&[1, 2, 3, 4]).unwrap();
    assert_eq!(b.write_position(), 4);
    assert!(b.write_u8(5).is_err());
}

#[test]
fn fixed_cursor_rejects_overflow() {
    let store = rawbytes::BytesStore::on_heap(4, &rawbytes::ReferenceOwner::new("t"));
    let mut b = Bytes::wrap_store_for_write(store).unwrap();
    b.write_u32(7).unwrap();
    assert!(b.write_u8(1).is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed round trips and offsets
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn typed_values_round_trip_bit_for_bit() {
    let mut b = Bytes::elastic().unwrap();
    b.write_i32(-123_456).unwrap();
    b.write_i64(i64::MIN).unwrap();
    b.write_f32(1.5e-30).unwrap();
    b.write_f64(-std::f64::consts::E).unwrap();
    b.write_u16(0xFFFE).unwrap();

    assert_eq!(b.read_i32().unwrap(), -123_456);
    assert_eq!(b.read_i64().unwrap(), i64::MIN);
    assert_eq!(b.read_f32().unwrap().to_bits(), 1.5e-30f32.to_bits());
    assert_eq!(
        b.read_f64().unwrap().to_bits(),
        (-std::f64::consts::E).to_bits()
    );
    assert_eq!(b.read_u16().unwrap(), 0xFFFE);
}

#[test]
fn consecutive_typed_writes_advance_by_their_width() {
    let mut b = Bytes::elastic().unwrap();
    let p0 = b.write_position();
    b.write_u8(1).unwrap();
    let p1 = b.write_position();
    b.write_u16(2).unwrap();
    let p2 = b.write_position();
    b.write_u32(3).unwrap();
    let p3 = b.write_position();
    b.write_u64(4).unwrap();
    let p4 = b.write_position();
    assert_eq!(p1 - p0, 1);
    assert_eq!(p2 - p1, 2);
    assert_eq!(p3 - p2, 4);
    assert_eq!(p4 - p3, 8);
}

#[test]
fn absolute_access_does_not_move_the_cursor() {
    let mut b = Bytes::elastic().unwrap();
    b.write_u64(0).unwrap();
    b.write_u32_at(4, 0xAABB_CCDD).unwrap();
    assert_eq!(b.write_position(), 8);
    assert_eq!(b.read_u32_at(4).unwrap(), 0xAABB_CCDD);
    assert_eq!(b.read_position(), 0);
}

#[test]
fn strings_round_trip_including_null() {
    let mut b = Bytes::elastic().unwrap();
    b.write_utf8(Some("héllo wörld")).unwrap();
    b.write_utf8(None).unwrap();
    b.write_8bit(Some("latin-1 ÿ")).unwrap();
    b.write_8bit(None).unwrap();

    assert_eq!(b.read_utf8().unwrap().as_deref(), Some("héllo wörld"));
    assert_eq!(b.read_utf8().unwrap(), None);
    assert_eq!(b.read_8bit().unwrap().as_deref(), Some("latin-1 ÿ"));
    assert_eq!(b.read_8bit().unwrap(), None);
}

#[test]
fn non_latin1_text_is_rejected_by_write_8bit() {
    let mut b = Bytes::elastic().unwrap();
    assert!(matches!(
        b.write_8bit(Some("snowman ☃")),
        Err(BytesError::UtfDataFormat(_))
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// clear / flip / mark / reset
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn clear_is_idempotent() {
    let mut b = Bytes::elastic().unwrap();
    b.write_slice(b"some data").unwrap();
    b.clear();
    let snapshot = (
        b.read_position(),
        b.read_limit(),
        b.write_position(),
        b.write_limit(),
    );
    b.clear();
    assert_eq!(
        snapshot,
        (
            b.read_position(),
            b.read_limit(),
            b.write_position(),
            b.write_limit()
        )
    );
    assert_eq!(b.read_remaining(), 0);
}

#[test]
fn flip_undone_restores_the_read_window() {
    let mut b = Bytes::elastic().unwrap();
    b.write_slice(b"0123456789").unwrap();
    let written = b.write_position();

    // Flip: read the first half...
    let mut head = [0u8; 5];
    b.read_slice(&mut head).unwrap();
    assert_eq!(&head, b"01234");

    // ...then undo: read_position back to start, read_limit back to the
    // previous write position.
    b.set_read_position(b.start()).unwrap();
    b.set_read_limit(written).unwrap();
    assert_eq!(b.read_remaining(), 10);
    let mut all = [0u8; 10];
    b.read_slice(&mut all).unwrap();
    assert_eq!(&all, b"0123456789");
}

#[test]
fn reset_without_mark_fails() {
    let mut b = Bytes::elastic().unwrap();
    assert!(matches!(b.reset(), Err(BytesError::InvalidMark)));
    b.write_slice(b"abcd").unwrap();
    b.mark();
    let mut two = [0u8; 2];
    b.read_slice(&mut two).unwrap();
    b.reset().unwrap();
    assert_eq!(b.read_remaining(), 4);
}

#[test]
fn clear_and_pad_reserves_a_prefix() {
    let mut b = Bytes::elastic().unwrap();
    b.write_slice(b"overwritten").unwrap();
    b.clear_and_pad(8).unwrap();
    assert_eq!(b.write_position(), 8);
    assert_eq!(b.read_position(), 8);
    b.write_slice(b"payload").unwrap();
    // The pad can be filled backwards with absolute writes.
    b.write_u64_at(0, 0xFEED_FACE_CAFE_BEEF).unwrap();
    assert_eq!(b.read_u64_at(0).unwrap(), 0xFEED_FACE_CAFE_BEEF);
}

// ─────────────────────────────────────────────────────────────────────────────
// Under-reads
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reading_past_the_limit_underflows() {
    let mut b = Bytes::elastic().unwrap();
    b.write_u16(77).unwrap();
    assert_eq!(b.read_u16().unwrap(), 77);
    assert!(matches!(
        b.read_u8(),
        Err(BytesError::BufferUnderflow { .. })
    ));
}

#[test]
fn skip_respects_the_read_window() {
    let mut b = Bytes::elastic().unwrap();
    b.write_slice(b"abcdef").unwrap();
    b.skip(4).unwrap();
    assert_eq!(b.read_u8().unwrap(), b'e');
    assert!(b.skip(2).is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity vs content comparison
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn content_equal_compares_windows_not_identity() {
    let mut a = Bytes::elastic().unwrap();
    let mut b = Bytes::elastic_on_heap();
    a.write_slice(b"same bytes").unwrap();
    b.write_slice(b"same bytes").unwrap();
    assert!(!a.same_store(&b));
    assert!(a.content_equal(&b));

    b.write_u8(b'!').unwrap();
    assert!(!a.content_equal(&b));
}

#[test]
fn write_bytes_copies_the_readable_window() {
    let mut src = Bytes::elastic().unwrap();
    src.write_slice(b"payload!").unwrap();
    let mut dst = Bytes::elastic().unwrap();
    dst.write_bytes(&src).unwrap();
    assert_eq!(dst.to_vec(), b"payload!");
    // Source positions untouched.
    assert_eq!(src.read_remaining(), 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// std::io interop
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cursor_works_as_io_read_write() {
    use std::io::{Read, Write};
    let mut b = Bytes::elastic().unwrap();
    b.write_all(b"through std::io").unwrap();
    let mut out = String::new();
    b.read_to_string(&mut out).unwrap();
    assert_eq!(out, "through std::io");
}

// ─────────────────────────────────────────────────────────────────────────────
// Thread affinity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cross_thread_write_is_detected() {
    let mut b = Bytes::elastic().unwrap();
    b.write_u8(1).unwrap();
    std::thread::scope(|s| {
        s.spawn(|| {
            let err = b.write_u8(2).unwrap_err();
            assert!(matches!(err, BytesError::ThreadingIllegalState(_)));
            // After an explicit reset the new thread may take over.
            b.single_threaded_check_reset();
            b.write_u8(3).unwrap();
        });
    });
}
