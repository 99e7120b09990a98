use std::collections::BTreeMap;

use proptest::prelude::*;
use treegen_runtime::cbor::{ArrayWriter, MapWriter, Reader, Slice, Writer};

/// In-memory CBOR value used to drive the round-trip property.
#[derive(Clone, Debug, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(String, Value)>),
}

fn write_into_map(writer: &mut MapWriter, key: &str, value: &Value) {
    match value {
        Value::Null => writer.write_null(key).unwrap(),
        Value::Bool(v) => writer.write_bool(key, *v).unwrap(),
        Value::Int(v) => writer.write_int(key, *v).unwrap(),
        Value::Float(v) => writer.write_float(key, *v).unwrap(),
        Value::String(v) => writer.write_string(key, v).unwrap(),
        Value::Bytes(v) => writer.write_bytes(key, v).unwrap(),
        Value::Array(items) => {
            let mut inner = writer.start_array(key).unwrap();
            for item in items {
                write_into_array(&mut inner, item);
            }
            inner.close().unwrap();
        }
        Value::Map(entries) => {
            let mut inner = writer.start_map(key).unwrap();
            for (key, item) in entries {
                write_into_map(&mut inner, key, item);
            }
            inner.close().unwrap();
        }
    }
}

fn write_into_array(writer: &mut ArrayWriter, value: &Value) {
    match value {
        Value::Null => writer.write_null().unwrap(),
        Value::Bool(v) => writer.write_bool(*v).unwrap(),
        Value::Int(v) => writer.write_int(*v).unwrap(),
        Value::Float(v) => writer.write_float(*v).unwrap(),
        Value::String(v) => writer.write_string(v).unwrap(),
        Value::Bytes(v) => writer.write_bytes(v).unwrap(),
        Value::Array(items) => {
            let mut inner = writer.start_array().unwrap();
            for item in items {
                write_into_array(&mut inner, item);
            }
            inner.close().unwrap();
        }
        Value::Map(entries) => {
            let mut inner = writer.start_map().unwrap();
            for (key, item) in entries {
                write_into_map(&mut inner, key, item);
            }
            inner.close().unwrap();
        }
    }
}

fn read_value(slice: Slice<'_>) -> Value {
    if slice.is_null() {
        Value::Null
    } else if slice.is_bool() {
        Value::Bool(slice.as_bool().unwrap())
    } else if slice.is_int() {
        Value::Int(slice.as_int().unwrap())
    } else if slice.is_float() {
        Value::Float(slice.as_float().unwrap())
    } else if slice.is_string() {
        Value::String(slice.as_string().unwrap())
    } else if slice.is_bytes() {
        Value::Bytes(slice.as_bytes().unwrap())
    } else if slice.is_array() {
        Value::Array(slice.as_array().unwrap().into_iter().map(read_value).collect())
    } else {
        Value::Map(
            slice
                .as_map()
                .unwrap()
                .into_iter()
                .map(|(key, value)| (key, read_value(value)))
                .collect(),
        )
    }
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>()
            .prop_filter("finite doubles only", |v| v.is_finite())
            .prop_map(Value::Float),
        ".*".prop_map(Value::String),
        proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 64, 8, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            proptest::collection::btree_map(".*", inner, 0..8)
                .prop_map(|map: BTreeMap<String, Value>| Value::Map(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn write_read_round_trip(entries in proptest::collection::btree_map(".*", arb_value(), 0..6)) {
        let mut writer = Writer::new();
        let mut map = writer.start();
        for (key, value) in &entries {
            write_into_map(&mut map, key, value);
        }
        map.close().unwrap();

        let reader = Reader::new(writer.into_bytes().unwrap()).unwrap();
        let back = read_value(reader.root());
        prop_assert_eq!(back, Value::Map(entries.into_iter().collect()));
    }
}

const UNSIGNED_SAMPLES: [i64; 11] = [
    0,
    1,
    23,
    24,
    255,
    256,
    65535,
    65536,
    4294967295,
    4294967296,
    9223372036854775807,
];

/// Hand-encoded fixture: a 9-element array exercising every supported
/// kind and all integer head widths.
fn fixture() -> Vec<u8> {
    let mut bytes = vec![0x89, 0xf6, 0xf4, 0xf5];
    // 11 unsigned integers, definite-length array
    bytes.push(0x8b);
    bytes.extend_from_slice(&[0x00, 0x01, 0x17]);
    bytes.extend_from_slice(&[0x18, 0x18, 0x18, 0xff]);
    bytes.extend_from_slice(&[0x19, 0x01, 0x00, 0x19, 0xff, 0xff]);
    bytes.extend_from_slice(&[0x1a, 0x00, 0x01, 0x00, 0x00]);
    bytes.extend_from_slice(&[0x1a, 0xff, 0xff, 0xff, 0xff]);
    bytes.extend_from_slice(&[0x1b, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
    bytes.extend_from_slice(&[0x1b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    // negatives of the first ten, indefinite-length array with break
    bytes.push(0x9f);
    bytes.extend_from_slice(&[0x20, 0x21, 0x37]);
    bytes.extend_from_slice(&[0x38, 0x18, 0x38, 0xff]);
    bytes.extend_from_slice(&[0x39, 0x01, 0x00, 0x39, 0xff, 0xff]);
    bytes.extend_from_slice(&[0x3a, 0x00, 0x01, 0x00, 0x00]);
    bytes.extend_from_slice(&[0x3a, 0xff, 0xff, 0xff, 0xff]);
    bytes.extend_from_slice(&[0x3b, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
    bytes.push(0xff);
    // double
    bytes.push(0xfb);
    bytes.extend_from_slice(&3.14159265359f64.to_be_bytes());
    // "hello"
    bytes.push(0x65);
    bytes.extend_from_slice(b"hello");
    // byte string "world"
    bytes.push(0x45);
    bytes.extend_from_slice(b"world");
    // {"a": "b", "c": "d"}
    bytes.extend_from_slice(&[0xa2, 0x61, b'a', 0x61, b'b', 0x61, b'c', 0x61, b'd']);
    bytes
}

#[test]
fn reads_mixed_fixture() {
    let reader = Reader::new(fixture()).unwrap();
    let items = reader.root().as_array().unwrap();
    assert_eq!(items.len(), 9);

    assert!(items[0].is_null());
    assert!(!items[1].as_bool().unwrap());
    assert!(items[2].as_bool().unwrap());

    let unsigned: Vec<i64> = items[3]
        .as_array()
        .unwrap()
        .into_iter()
        .map(|item| item.as_int().unwrap())
        .collect();
    assert_eq!(unsigned, UNSIGNED_SAMPLES);

    let negative: Vec<i64> = items[4]
        .as_array()
        .unwrap()
        .into_iter()
        .map(|item| item.as_int().unwrap())
        .collect();
    let expected: Vec<i64> = UNSIGNED_SAMPLES[..10].iter().map(|v| -1 - v).collect();
    assert_eq!(negative, expected);

    assert_eq!(items[5].as_float().unwrap(), 3.14159265359);
    assert_eq!(items[6].as_string().unwrap(), "hello");
    assert_eq!(items[7].as_bytes().unwrap(), b"world");

    let map = items[8].as_map().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["a"].as_string().unwrap(), "b");
    assert_eq!(map["c"].as_string().unwrap(), "d");
}

#[test]
fn rejects_two_to_the_sixty_three() {
    let err = Reader::new(vec![0x1b, 0x80, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
    assert!(err.to_string().starts_with("invalid CBOR"));
}

#[test]
fn writes_and_rereads_seed_map() {
    let ints: [i64; 10] = [
        3,
        0x34,
        0x3456,
        0x3456789a,
        0x3456789abcdef012,
        -3,
        -0x34,
        -0x3456,
        -0x3456789a,
        -0x3456789abcdef012,
    ];

    let mut writer = Writer::new();
    let mut map = writer.start();
    map.write_null("null").unwrap();
    map.write_bool("false", false).unwrap();
    map.write_bool("true", true).unwrap();
    let mut array = map.start_array("int-array").unwrap();
    for value in ints {
        array.write_int(value).unwrap();
    }
    array.close().unwrap();
    map.write_float("pi", 3.14159265359).unwrap();
    map.write_string("string", "hello").unwrap();
    map.write_bytes("binary", b"world").unwrap();
    map.close().unwrap();

    let reader = Reader::new(writer.into_bytes().unwrap()).unwrap();
    let entries = reader.root().as_map().unwrap();
    assert_eq!(entries.len(), 7);
    assert!(entries["null"].is_null());
    assert!(!entries["false"].as_bool().unwrap());
    assert!(entries["true"].as_bool().unwrap());
    let back: Vec<i64> = entries["int-array"]
        .as_array()
        .unwrap()
        .into_iter()
        .map(|item| item.as_int().unwrap())
        .collect();
    assert_eq!(back, ints);
    assert_eq!(entries["pi"].as_float().unwrap(), 3.14159265359);
    assert_eq!(entries["string"].as_string().unwrap(), "hello");
    assert_eq!(entries["binary"].as_bytes().unwrap(), b"world");
}

#[test]
fn inner_writer_blocks_outer() {
    let mut writer = Writer::new();
    let mut map = writer.start();
    let mut inner = map.start_map("child").unwrap();
    assert!(map.write_int("outer", 1).is_err());
    assert!(map.start_array("outer").is_err());
    inner.write_int("x", 1).unwrap();
    inner.close().unwrap();
    map.write_int("outer", 1).unwrap();
    map.close().unwrap();
    assert!(Reader::new(writer.into_bytes().unwrap()).is_ok());
}
