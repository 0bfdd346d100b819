// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use proptest::prelude::*;

use rpc_wire::codec::{deserialize, pack, serialize, unpack, Body, Envelope};
use rpc_wire::value::{Blob, RegExp, Timestamp};
use rpc_wire::Value;

fn kitchen_sink() -> Value {
    Value::object([
        ("nothing", Value::Undefined),
        ("null", Value::Null),
        ("nan", Value::from(f64::NAN)),
        ("big", Value::bigint(i128::MIN)),
        ("when", Value::from(Timestamp::from_millis(1_700_000_000_123))),
        ("never", Value::from(Timestamp::invalid())),
        ("far", Value::from(Timestamp::from_millis(281_474_976_710_656))),
        ("bce", Value::from(Timestamp::from_millis(-62_198_755_200_000))),
        ("pattern", Value::from(RegExp::new("^a/b$", "gi"))),
        ("home", Value::url("https://example.com/a?b=c")),
        (
            "tags",
            Value::set([Value::from("a"), Value::Undefined, Value::bigint(3)]),
        ),
        (
            "index",
            Value::map([
                (Value::set([Value::from(1)]), Value::from("set key")),
                (Value::from(Timestamp::from_millis(0)), Value::map([])),
            ]),
        ),
        ("list", Value::array([Value::Undefined, Value::array([])])),
        ("1", Value::from("numeric key")),
    ])
}

#[test]
fn kitchen_sink_over_json() {
    let value = kitchen_sink();
    let wire = serialize(value.clone()).to_json_vec().unwrap();
    let back = deserialize(Envelope::from_json_slice(&wire).unwrap()).unwrap();
    assert_eq!(back, value);
}

#[test]
fn kitchen_sink_with_blobs_over_multipart() {
    let mut value = kitchen_sink();
    if let Value::Object(obj) = &mut value {
        obj.insert("file", Value::from(Blob::new("text/csv", &b"a,b\r\n1,2\r\n"[..])));
        obj.insert(
            "more",
            Value::array([Value::from(Blob::new("application/octet-stream", Bytes::new()))]),
        );
    }
    let (content_type, bytes) = pack(value.clone()).unwrap().into_wire();
    let back = unpack(Body::from_wire(&content_type, bytes).unwrap()).unwrap();
    assert_eq!(back, value);
}

fn arb_blob() -> impl Strategy<Value = Blob> {
    (
        prop::sample::select(vec!["image/png", "text/plain", "application/octet-stream"]),
        prop::collection::vec(any::<u8>(), 0..32),
    )
        .prop_map(|(ct, bytes)| Blob::new(ct, bytes))
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        // dyadic fractions survive a decimal round trip exactly
        any::<i32>().prop_map(|n| Value::from(f64::from(n) / 4.0)),
        Just(Value::from(f64::NAN)),
        ".{0,12}".prop_map(Value::from),
        any::<i128>().prop_map(Value::bigint),
        (-8_640_000_000_000_000i64..=8_640_000_000_000_000)
            .prop_map(|ms| Value::from(Timestamp::from_millis(ms))),
        ("[a-z/.*]{0,8}", "[gimsuy]{0,3}").prop_map(|(s, f)| Value::from(RegExp::new(s, f))),
        "https://[a-z]{1,8}\\.test/[a-z]{0,6}".prop_map(Value::url),
        arb_blob().prop_map(Value::from),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::array),
            prop::collection::vec(("[a-z0-9]{0,6}", inner.clone()), 0..6).prop_map(Value::object),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::set),
            prop::collection::vec((inner.clone(), inner), 0..4).prop_map(Value::map),
        ]
    })
}

proptest! {
    #[test]
    fn packed_values_come_back_equal(value in arb_value()) {
        let (content_type, bytes) = pack(value.clone()).unwrap().into_wire();
        let back = unpack(Body::from_wire(&content_type, bytes).unwrap()).unwrap();
        prop_assert_eq!(back, value);
    }
}
