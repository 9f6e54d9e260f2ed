use crate::delete_request::DeleteRequest;
use crate::error::QuartzError;
use crate::get_request::GetRequest;
use crate::plan::{deserialize_plan_step, StepKind};
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::*;
use crate::writer::Writer;
use crate::write_multiple_request::WriteMultipleRequest;
use chrono::DateTime;
use std::error::Error;
use std::result::Result;
use std::time::Duration;

#[test]
fn test_mixed_primitives_round_trip() -> Result<(), Box<dyn Error>> {
    let mut writer = Writer::new();
    writer.write_i32(1234567);
    writer.write_packed_i32(-98765);
    writer.write_i16(-513);
    writer.write_bool(true);
    writer.write_float64(-1234.5678);
    writer.write_string("a string with ünïcödé");
    writer.write_packed_i64(987654321012345);
    writer.write_binary(&[9, 8, 7, 6]);
    let mut reader = Reader::new().from_bytes(writer.bytes());
    assert_eq!(reader.read_i32()?, 1234567);
    assert_eq!(reader.read_packed_i32()?, -98765);
    assert_eq!(reader.read_i16()?, -513);
    assert!(reader.read_bool()?);
    assert_eq!(reader.read_float64()?, -1234.5678);
    assert_eq!(reader.read_string()?, "a string with ünïcödé");
    assert_eq!(reader.read_packed_i64()?, 987654321012345);
    assert_eq!(reader.read_binary()?, vec![9, 8, 7, 6]);
    Ok(())
}

fn full_map() -> Result<MapValue, Box<dyn Error>> {
    let ts = DateTime::parse_from_rfc3339("2024-03-01T10:20:30.123Z")?;
    let mut inner = MapValue::new();
    inner.put_str("city", "Anytown");
    inner.put_i32("zip", 12345);
    let m = MapValue::new()
        .i32("i", -42)
        .i64("l", 1 << 40)
        .column("d", 2.5f64)
        .column("b", true)
        .str("s", "hello")
        .timestamp("ts", &ts)
        .column("num", crate::types::bd_from_str("123456789.000000001")?)
        .column("arr", vec![1i32, 2, 3])
        .column("bin", BinaryValue { data: vec![1, 2] })
        .column("map", inner)
        .column("n", FieldValue::Null)
        .column("jn", FieldValue::JsonNull);
    Ok(m)
}

// Law: decode(encode(v)) == v, with Record and Map compared by their
// keys and values.
#[test]
fn test_field_value_round_trip() -> Result<(), Box<dyn Error>> {
    let m = full_map()?;
    let mut w = Writer::new();
    w.write_field_value(&FieldValue::Map(m.clone_internal()));
    let mut r = Reader::new().from_bytes(w.bytes());
    let decoded = r.read_field_value()?;
    assert_eq!(decoded, FieldValue::Map(m));
    Ok(())
}

#[test]
fn test_record_and_map_compare_equal() -> Result<(), Box<dyn Error>> {
    let m = full_map()?;
    // a Record written with the dedicated tag decodes as a Record and
    // still equals the Map form
    let mut w = Writer::new();
    w.write_field_value(&FieldValue::Record(m.clone_internal()));
    let mut r = Reader::new().from_bytes(w.bytes());
    let decoded = r.read_field_value()?;
    assert!(matches!(decoded, FieldValue::Record(_)));
    assert_eq!(decoded, FieldValue::Map(m));
    Ok(())
}

// Law: a response map containing unknown short tokens parses; the
// unknown values, complex ones included, are skipped structurally.
#[test]
fn test_unknown_fields_are_skipped() -> Result<(), Box<dyn Error>> {
    let mut w = Writer::new();
    let mut ns = Serializer::start_request(&mut w);
    ns.write_i32_field(ERROR_CODE, 0);
    // unknown primitive
    ns.write_string_field("zz", "ignore me");
    // unknown complex value with nesting
    let mut unknown = MapValue::new();
    unknown.put_array(
        "inner",
        vec![FieldValue::Integer(1), FieldValue::String("x".to_string())],
    );
    ns.write_map_field("zy", &unknown);
    ns.write_bool_field(SUCCESS, true);
    ns.end_request();

    let mut r = Reader::new().from_bytes(w.bytes());
    let res = DeleteRequest::deserialize(&mut r)?;
    assert!(res.success());
    Ok(())
}

// Law: every encoded request begins with the 2-byte big-endian serial
// version of the client.
#[test]
fn test_request_version_prefix() {
    let mut w = Writer::new();
    w.write_i16(SERIAL_VERSION_4);
    let req = GetRequest::new("users").key(MapValue::new().i32("id", 1));
    req.serialize_internal(&mut w, &Duration::from_millis(5000), -1);
    assert!(w.size() > 2);
    assert_eq!(w.bytes()[0], 0);
    assert_eq!(w.bytes()[1], 4);
    // a downgrade patch rewrites only the prefix
    let mut w2 = w;
    w2.write_i16_at_offset(SERIAL_VERSION_3, 0).unwrap();
    assert_eq!(w2.bytes()[1], 3);
}

// The serialized request is a single map with Header and Payload
// entries; check the header contents by walking it back.
#[test]
fn test_request_header_layout() -> Result<(), Box<dyn Error>> {
    let mut w = Writer::new();
    let req = GetRequest::new("users").key(MapValue::new().i32("id", 1));
    req.serialize_internal(&mut w, &Duration::from_millis(5000), 7);

    let mut r = Reader::new().from_bytes(w.bytes());
    let decoded = r.read_field_value()?;
    let top = decoded.get_map_value()?;
    assert_eq!(top.len(), 2);
    let header = top.get_map(HEADER).expect("missing header");
    assert_eq!(header.get_i32(VERSION), Some(SERIAL_VERSION_4 as i32));
    assert_eq!(header.get_string(TABLE_NAME), Some("users".to_string()));
    assert_eq!(header.get_i32(OP_CODE), Some(OpCode::Get as i32));
    assert_eq!(header.get_i32(TIMEOUT), Some(5000));
    assert_eq!(header.get_i32(TOPO_SEQ_NUM), Some(7));
    let payload = top.get_map(PAYLOAD).expect("missing payload");
    assert!(payload.get_map(KEY).is_some());
    Ok(())
}

// Law: an aborted batch reports Success=false with the failing index
// and result, and no per-op results.
#[test]
fn test_write_multiple_failure_assembly() -> Result<(), Box<dyn Error>> {
    let mut w = Writer::new();
    let mut ns = Serializer::start_request(&mut w);
    ns.write_i32_field(ERROR_CODE, 0);
    ns.start_map(WM_FAILURE);
    ns.write_i32_field(WM_FAIL_INDEX, 1);
    ns.start_map(WM_FAIL_RESULT);
    ns.write_bool_field(SUCCESS, false);
    ns.end_map(WM_FAIL_RESULT);
    ns.end_map(WM_FAILURE);
    ns.end_request();

    let mut r = Reader::new().from_bytes(w.bytes());
    let res = WriteMultipleRequest::deserialize(&mut r)?;
    assert!(!res.success());
    assert_eq!(res.failed_operation_index(), 1);
    assert!(!res.failed_operation_result().unwrap().success());
    assert!(res.results().is_empty());
    Ok(())
}

#[test]
fn test_write_multiple_success_assembly() -> Result<(), Box<dyn Error>> {
    let mut w = Writer::new();
    let mut ns = Serializer::start_request(&mut w);
    ns.write_i32_field(ERROR_CODE, 0);
    ns.start_array(WM_SUCCESS);
    for _ in 0..2 {
        ns.start_map("");
        ns.write_bool_field(SUCCESS, true);
        ns.write_binary_field(ROW_VERSION, &[1, 2, 3]);
        ns.end_map("");
        ns.incr_size(1);
    }
    ns.end_array(WM_SUCCESS);
    ns.end_request();

    let mut r = Reader::new().from_bytes(w.bytes());
    let res = WriteMultipleRequest::deserialize(&mut r)?;
    assert!(res.success());
    assert_eq!(res.failed_operation_index(), -1);
    assert_eq!(res.results().len(), 2);
    assert!(res.results()[0].success());
    Ok(())
}

// Error codes in the response map surface as typed failures.
#[test]
fn test_error_code_surfaces() {
    let mut w = Writer::new();
    let mut ns = Serializer::start_request(&mut w);
    ns.write_i32_field(ERROR_CODE, 2);
    ns.write_string_field(EXCEPTION, "table not found: users");
    ns.end_request();

    let mut r = Reader::new().from_bytes(w.bytes());
    let err = MapWalker::check_reader_for_error(&mut r).unwrap_err();
    assert_eq!(err.code, crate::QuartzErrorCode::TableNotFound);
    assert!(err.message.contains("users"));
}

// TTL expirations round up to the next boundary in UTC; the duration
// from the reference is always within [n, n+1) units.
#[test]
fn test_ttl_expiration_rounding() -> Result<(), QuartzError> {
    let reference = DateTime::parse_from_rfc3339("2024-01-01T12:34:56Z").unwrap();
    let ttl = TimeToLive::of_days(30);
    let exp = ttl.to_expiration_time(&reference);
    assert_eq!(exp.to_rfc3339(), "2024-02-01T00:00:00+00:00");
    let elapsed = exp.timestamp_millis() - reference.timestamp_millis();
    assert!(elapsed >= 30 * 86_400_000);
    assert!(elapsed < 31 * 86_400_000);

    // an expiry landing exactly on a boundary stays put
    let reference = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap();
    let exp = TimeToLive::of_days(2).to_expiration_time(&reference);
    assert_eq!(exp.to_rfc3339(), "2024-01-03T00:00:00+00:00");

    let reference = DateTime::parse_from_rfc3339("2024-01-01T05:10:00Z").unwrap();
    let exp = TimeToLive::of_hours(3).to_expiration_time(&reference);
    assert_eq!(exp.to_rfc3339(), "2024-01-01T09:00:00+00:00");
    Ok(())
}

#[test]
fn test_ttl_wire_strings() {
    assert_eq!(TimeToLive::of_days(5).to_wire_string(), "5 DAYS");
    assert_eq!(TimeToLive::of_hours(36).to_wire_string(), "36 HOURS");
    assert!(TimeToLive::do_not_expire().is_do_not_expire());
}

#[test]
fn test_durability_wire_packing() {
    // three 2-bit groups: master | replica << 2 | ack << 4
    assert_eq!(Durability::commit_sync().to_wire(), 1 | (1 << 2) | (3 << 4));
    assert_eq!(
        Durability::commit_no_sync().to_wire(),
        2 | (2 << 2) | (3 << 4)
    );
    assert_eq!(
        Durability::commit_write_no_sync().to_wire(),
        3 | (3 << 2) | (3 << 4)
    );
}

// Deserialize a hand-built Sort(Const) driver plan and check the tree.
#[test]
fn test_plan_deserialization() -> Result<(), Box<dyn Error>> {
    let mut w = Writer::new();
    // sort step
    w.write_byte(StepKind::Sorting as u8);
    w.write_i32(2); // result_reg
    w.write_i32(0); // state_pos
    for _ in 0..4 {
        w.write_i32(0); // location
    }
    // input: const step
    w.write_byte(StepKind::Const as u8);
    w.write_i32(1); // result_reg
    w.write_i32(0); // state_pos
    for _ in 0..4 {
        w.write_i32(0); // location
    }
    w.write_field_value(&FieldValue::Integer(7));
    // sort fields and specs
    w.write_packed_i32(1);
    w.write_string("name");
    w.write_packed_i32(1);
    w.write_bool(false); // is_desc
    w.write_bool(true); // nulls_first

    let mut r = Reader::new().from_bytes(w.bytes());
    let step = deserialize_plan_step(&mut r)?;
    assert_eq!(step.get_kind(), StepKind::Sorting);
    assert_eq!(r.offset, r.buf.len());
    Ok(())
}

#[test]
fn test_reader_skip_complex_value() -> Result<(), Box<dyn Error>> {
    let mut w = Writer::new();
    w.write_field_value(&FieldValue::Map(full_map()?));
    w.write_field_value(&FieldValue::Integer(99));
    let mut r = Reader::new().from_bytes(w.bytes());
    r.skip_field_value()?;
    assert_eq!(r.read_field_value()?, FieldValue::Integer(99));
    Ok(())
}
