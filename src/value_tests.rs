use crate::step_sort::SortSpec;
use crate::types;
use crate::types::FieldValue;
use crate::types::MapValue;
use crate::types::ToFieldValue;
use std::error::Error;
use std::result::Result;

fn get_string(fv: &FieldValue) -> Option<&String> {
    if let FieldValue::String(s) = fv {
        Some(s)
    } else {
        None
    }
}

#[test]
fn test_basic_mapvalue() -> Result<(), Box<dyn Error>> {
    let mut m = types::MapValue::new();
    m.put_i32("i32val", 5);
    m.put_bool("boolval", true);
    m.put_i64("i64val", 123456789);
    m.put_float64("floatval", 2345.0023456);
    m.put_str("strval", "This is a string value");
    let mut arr = Vec::<FieldValue>::new();
    arr.push("array element 1".to_field_value());
    arr.push("array element 2".to_field_value());
    arr.push(FieldValue::Long(12121212));
    m.put_array("arrval", arr);
    m.put_binary("binval", vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(m.get_i32("i32val").ok_or("i32val doesn't exist")?, 5);
    assert!(m.get_bool("boolval").ok_or("boolval doesn't exist")?);
    assert_eq!(
        m.get_float64("floatval").ok_or("floatval doesn't exist")?,
        2345.0023456
    );
    assert_eq!(
        m.get_i64("i64val").ok_or("i64val doesn't exist")?,
        123456789
    );
    assert_eq!(
        m.get_string("strval").ok_or("strval doesn't exist")?,
        "This is a string value"
    );
    let arr_result = m.get_array("arrval").ok_or("arrval doesn't exist")?;
    assert_eq!(arr_result.len(), 3);
    assert_eq!(
        get_string(&arr_result[0]).ok_or("not a string")?,
        "array element 1"
    );
    assert_eq!(m.get_binary("binval").ok_or("binval doesn't exist")?.len(), 6);
    // typed getter on the wrong type yields None
    assert_eq!(m.get_i32("strval"), None);
    Ok(())
}

#[test]
fn test_mapvalue_preserves_insertion_order() {
    let mut m = MapValue::new();
    m.put_str("zeta", "1");
    m.put_str("alpha", "2");
    m.put_str("mid", "3");
    // replacing a value must not move the key
    m.put_str("zeta", "9");
    let keys: Vec<&String> = m.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    assert_eq!(m.get_string("zeta"), Some("9".to_string()));
    assert_eq!(m.len(), 3);
}

#[test]
fn test_mapvalue_take_field_value() -> Result<(), Box<dyn Error>> {
    let mut m = MapValue::new().i32("a", 1).i32("b", 2);
    let v = m.take_field_value("a")?;
    assert_eq!(v, FieldValue::Integer(1));
    assert_eq!(m.len(), 1);
    assert!(m.take_field_value("a").is_err());
    Ok(())
}

// Law: map equality is order-insensitive; a Record equals a Map with
// the same keys and values.
#[test]
fn test_map_equality_ignores_order() {
    let m1 = MapValue::new().i32("a", 1).str("b", "x");
    let m2 = MapValue::new().str("b", "x").i32("a", 1);
    assert_eq!(m1, m2);
    assert_eq!(
        FieldValue::Record(m1.clone_internal()),
        FieldValue::Map(m2.clone_internal())
    );
    let m3 = MapValue::new().i32("a", 2).str("b", "x");
    assert_ne!(m1, m3);
}

// Law: a row converted to JSON and parsed back is equivalent, modulo
// numeric widening and timestamp formatting.
#[test]
fn test_json_round_trip() -> Result<(), Box<dyn Error>> {
    let mut m = MapValue::new();
    m.put_i32("id", 7);
    m.put_str("name", "Jane");
    m.put_float64("score", 1.25);
    m.put_bool("active", true);
    m.put_field_value("missing", FieldValue::JsonNull);
    m.put_array(
        "tags",
        vec!["a".to_field_value(), "b".to_field_value()],
    );
    let mut inner = MapValue::new();
    inner.put_i64("big", 1 << 40);
    m.put_field_value("nested", FieldValue::Map(inner));

    let json = m.to_json_string()?;
    let back = MapValue::from_json_string(&json)?;
    assert_eq!(back, m);
    Ok(())
}

#[test]
fn test_json_number_parsing_widens() {
    // small integers parse as Integer, larger as Long, decimals as Double
    let v: serde_json::Value = serde_json::from_str("[5, 5000000000, 1.5]").unwrap();
    let fv = v.to_field_value();
    let arr = fv.get_array_value().unwrap();
    assert!(matches!(arr[0], FieldValue::Integer(5)));
    assert!(matches!(arr[1], FieldValue::Long(5000000000)));
    assert!(matches!(arr[2], FieldValue::Double(_)));
}

#[test]
fn test_json_null_maps_to_json_null() -> Result<(), Box<dyn Error>> {
    let m = MapValue::from_json_string("{\"a\": null, \"b\": 1}")?;
    assert_eq!(
        m.get_field_value("a").unwrap(),
        &FieldValue::JsonNull
    );
    Ok(())
}

// sort_results orders rows ascending on the named fields by default,
// honoring descending and nulls-first flags per field.
#[test]
fn test_sort_results_ordering() {
    let fields = vec!["name".to_string()];
    let specs = vec![SortSpec::default()];
    let mut rows = vec![
        MapValue::new().str("name", "carol").i32("id", 3),
        MapValue::new().str("name", "alice").i32("id", 1),
        MapValue::new().str("name", "bob").i32("id", 2),
    ];
    rows.sort_by(|a, b| types::sort_results(a, b, &fields, &specs));
    let ids: Vec<i32> = rows.iter().map(|r| r.get_i32("id").unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let specs = vec![SortSpec {
        is_desc: true,
        nulls_first: false,
    }];
    rows.sort_by(|a, b| types::sort_results(a, b, &fields, &specs));
    let ids: Vec<i32> = rows.iter().map(|r| r.get_i32("id").unwrap()).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[test]
fn test_sort_places_specials_first_ascending() {
    let fields = vec!["v".to_string()];
    let specs = vec![SortSpec::default()];
    let mut rows = vec![
        MapValue::new().column("v", FieldValue::Null).i32("id", 9),
        MapValue::new().i32("v", 5).i32("id", 1),
        MapValue::new().i32("v", 7).i32("id", 2),
    ];
    rows.sort_by(|a, b| types::sort_results(a, b, &fields, &specs));
    let ids: Vec<i32> = rows.iter().map(|r| r.get_i32("id").unwrap()).collect();
    assert_eq!(ids, vec![9, 1, 2]);
}

#[test]
fn test_numeric_cross_type_equality() {
    // the total order treats equal numerics of different widths as equal
    assert_eq!(FieldValue::Integer(5), FieldValue::Long(5));
    assert_eq!(FieldValue::Long(5), FieldValue::Double(5.0));
    assert_ne!(FieldValue::Integer(5), FieldValue::Long(6));
}

#[test]
fn test_size_estimate_grows_with_content() {
    let small = MapValue::new().i32("a", 1);
    let mut big = MapValue::new().i32("a", 1);
    big.put_str("blob", &"x".repeat(10000));
    assert!(big.size_estimate() > small.size_estimate() + 10000);
}
