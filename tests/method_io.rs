// Integration tests for the method writer/reader protocol: a typed proxy
// round trip, unknown-id fallback, per-record decode-failure recovery, and
// the all-or-nothing record checkpoint.

use std::cell::RefCell;
use std::rc::Rc;

use rawbytes::error::{BytesError, Result};
use rawbytes::method::{
    read_enum_name, read_nested, write_enum_name, write_nested, Marshallable, MethodReaderBuilder,
    MethodWriter, WireSink,
};
use rawbytes::{Bytes, HexDumpBytes};

// ─────────────────────────────────────────────────────────────────────────────
// A small typed interface and its writer proxy
// ─────────────────────────────────────────────────────────────────────────────

const SAY_ID: u64 = 1;

trait ChatOut {
    fn say(&mut self, count: i32, text: &str) -> Result<()>;
}

struct ChatWriter<S: WireSink> {
    writer: MethodWriter<S>,
}

impl<S: WireSink> ChatOut for ChatWriter<S> {
    fn say(&mut self, count: i32, text: &str) -> Result<()> {
        self.writer.write_event("say", SAY_ID, |out| {
            out.write_stop_bit(count as i64)?;
            out.write_utf8(Some(text))
        })
    }
}

fn capturing_reader(
    calls: Rc<RefCell<Vec<(i32, String)>>>,
) -> rawbytes::MethodReader {
    MethodReaderBuilder::new()
        .on(SAY_ID, "say", move |source| {
            let count = source.read_stop_bit()? as i32;
            let text = source.read_utf8()?.ok_or_else(|| {
                BytesError::InvalidMarshallable("say text must not be null".to_string())
            })?;
            calls.borrow_mut().push((count, text));
            Ok(())
        })
        .build()
}

// ─────────────────────────────────────────────────────────────────────────────
// Round trip
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn proxy_call_round_trips_through_the_reader() {
    let mut proxy = ChatWriter {
        writer: MethodWriter::new(Bytes::elastic().unwrap()),
    };
    proxy.say(42, "hi").unwrap();

    let mut source = proxy.writer.into_sink();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut reader = capturing_reader(calls.clone());

    assert!(reader.read_one(&mut source).unwrap());
    assert!(!reader.read_one(&mut source).unwrap());
    assert_eq!(calls.borrow().as_slice(), &[(42, "hi".to_string())]);
}

#[test]
fn many_records_demultiplex_in_order() {
    let mut proxy = ChatWriter {
        writer: MethodWriter::new(Bytes::elastic().unwrap()),
    };
    for i in 0..100 {
        proxy.say(i, &format!("msg-{}", i)).unwrap();
    }
    let mut source = proxy.writer.into_sink();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut reader = capturing_reader(calls.clone());
    assert_eq!(reader.read_all(&mut source).unwrap(), 100);
    let calls = calls.borrow();
    assert_eq!(calls.len(), 100);
    assert_eq!(calls[99], (99, "msg-99".to_string()));
}

#[test]
fn large_message_ids_dispatch_through_the_sparse_table() {
    let big_id = 1_000_000;
    let mut writer = MethodWriter::new(Bytes::elastic().unwrap());
    writer
        .write_event("ping", big_id, |out| out.write_stop_bit(7))
        .unwrap();
    let mut source = writer.into_sink();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    let mut reader = MethodReaderBuilder::new()
        .on(big_id, "ping", move |source| {
            seen2.borrow_mut().push(source.read_stop_bit()?);
            Ok(())
        })
        .build();
    assert!(reader.read_one(&mut source).unwrap());
    assert_eq!(seen.borrow().as_slice(), &[7]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Unknown ids and decode failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unknown_id_goes_to_the_default_parselet() {
    let mut writer = MethodWriter::new(Bytes::elastic().unwrap());
    writer
        .write_event("mystery", 77, |out| out.write_u64(0xAAAA_BBBB))
        .unwrap();
    let mut source = writer.into_sink();

    let unknown = Rc::new(RefCell::new(Vec::new()));
    let unknown2 = unknown.clone();
    let mut reader = MethodReaderBuilder::new()
        .on(SAY_ID, "say", |_| Ok(()))
        .default_parselet(move |id, source| {
            unknown2.borrow_mut().push(id);
            let limit = source.read_limit();
            source.set_read_position(limit)
        })
        .build();

    assert!(reader.read_one(&mut source).unwrap());
    assert!(!reader.read_one(&mut source).unwrap());
    assert_eq!(unknown.borrow().as_slice(), &[77]);
}

#[test]
fn stock_parselet_skips_unknown_records() {
    let mut writer = MethodWriter::new(Bytes::elastic().unwrap());
    writer
        .write_event("mystery", 99, |out| out.write_slice(&[0u8; 32]))
        .unwrap();
    let mut source = writer.into_sink();
    let mut reader = MethodReaderBuilder::new().build();
    assert!(reader.read_one(&mut source).unwrap());
    assert_eq!(source.read_remaining(), 0);
}

#[test]
fn decode_failure_is_swallowed_and_resynchronises() {
    // A record whose argument block is shorter than the decoder expects.
    let mut writer = MethodWriter::new(Bytes::elastic().unwrap());
    writer
        .write_event("say", SAY_ID, |out| out.write_stop_bit(1))
        .unwrap();
    let mut source = writer.into_sink();

    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut reader = capturing_reader(calls.clone());

    // The truncated record is consumed (true), logged, and skipped.
    assert!(reader.read_one(&mut source).unwrap());
    assert_eq!(source.read_remaining(), 0);
    assert!(calls.borrow().is_empty());
    assert!(!reader.read_one(&mut source).unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Record atomicity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn failed_encoding_rolls_the_record_back() {
    let mut writer = MethodWriter::new(Bytes::elastic().unwrap());
    writer
        .write_event("first", SAY_ID, |out| out.write_stop_bit(10))
        .unwrap();
    let before = writer.sink().write_position();

    let err = writer.write_event("second", SAY_ID, |out| {
        out.write_u64(0xFFFF)?;
        Err(BytesError::InvalidMarshallable("validation failed".to_string()))
    });
    assert!(err.is_err());
    // The partial record is gone; the first record is intact.
    assert_eq!(writer.sink().write_position(), before);

    let mut source = writer.into_sink();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut reader = capturing_reader(calls.clone());
    // Only the decodable first record remains; its decoder fails on the
    // missing string and is swallowed, so the stream still drains cleanly.
    assert_eq!(reader.read_all(&mut source).unwrap(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument codecs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

impl Marshallable for Point {
    fn write_marshallable(&self, out: &mut Bytes) -> Result<()> {
        out.write_stop_bit(self.x)?;
        out.write_stop_bit(self.y)
    }

    fn read_marshallable(&mut self, source: &mut Bytes) -> Result<()> {
        self.x = source.read_stop_bit()?;
        self.y = source.read_stop_bit()?;
        Ok(())
    }
}

#[test]
fn marshallable_and_nested_arguments_round_trip() {
    let mut payload = Bytes::elastic().unwrap();
    payload.write_slice(b"nested block").unwrap();

    let mut out = Bytes::elastic().unwrap();
    let point = Point { x: -5, y: 1_000 };
    point.write_marshallable(&mut out).unwrap();
    write_nested(&mut out, &payload).unwrap();
    write_enum_name(&mut out, "RETRY").unwrap();

    let mut back = Point::default();
    back.read_marshallable(&mut out).unwrap();
    assert_eq!(back, point);
    let nested = read_nested(&mut out).unwrap();
    assert_eq!(nested.to_vec(), b"nested block");
    assert_eq!(read_enum_name(&mut out).unwrap(), "RETRY");
}

// ─────────────────────────────────────────────────────────────────────────────
// Hex-dump sink
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn hex_dump_sink_records_method_names() {
    let sink = HexDumpBytes::new(Bytes::elastic().unwrap());
    let mut proxy = ChatWriter {
        writer: MethodWriter::new(sink),
    };
    proxy.say(3, "dump me").unwrap();

    let dump = proxy.writer.sink().to_hex_string();
    assert!(dump.contains("say"), "dump missing method name:\n{}", dump);
    assert!(dump.contains("00000000"), "dump missing offsets:\n{}", dump);
}
