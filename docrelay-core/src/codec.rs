//! Wire codec between JSON and native BSON values.
//!
//! Requests and replies travel as plain JSON, which has no notion of object ids,
//! dates, binary payloads or regular expressions. Those values are carried as tagged
//! objects following MongoDB Extended JSON v2:
//!
//! | BSON | wire |
//! |---|---|
//! | ObjectId | `{"$oid": "5f1d7c0e8e4b2a0012345678"}` |
//! | DateTime | `{"$date": "2020-07-26T12:00:00.000Z"}` or `{"$date": {"$numberLong": "-1"}}` |
//! | Binary | `{"$binary": {"base64": "AQID", "subType": "00"}}` |
//! | Regex | `{"$regularExpression": {"pattern": "^a", "options": "i"}}` |
//! | Int64 | `{"$numberLong": "42"}` |
//! | Decimal128 | `{"$numberDecimal": "1.50"}` |
//! | Double (non-finite) | `{"$numberDouble": "NaN"}` |
//! | Timestamp | `{"$timestamp": {"t": 1, "i": 2}}` |
//! | MinKey / MaxKey | `{"$minKey": 1}` / `{"$maxKey": 1}` |
//!
//! Objects carrying any other `$`-prefixed key, such as query or update operators,
//! are plain documents. For every value the codec produces,
//! `decode(&encode(&v)?)? == v`.

use base64::{Engine, engine::general_purpose::STANDARD};
use bson::{
    Binary, Bson, DateTime, Decimal128, Document, Regex, Timestamp, oid::ObjectId,
    spec::BinarySubtype,
};
use chrono::SecondsFormat;
use serde_json::{Map, Number, Value, json};

use crate::error::{StoreError, StoreResult};

const TAGS: [&str; 10] = [
    "$oid",
    "$date",
    "$binary",
    "$regularExpression",
    "$numberLong",
    "$numberDecimal",
    "$numberDouble",
    "$timestamp",
    "$minKey",
    "$maxKey",
];

/// Largest timestamp (9999-12-31T23:59:59.999Z) written in RFC 3339 form.
const MAX_RFC3339_MILLIS: i64 = 253_402_300_799_999;

/// Decodes a wire value into its native BSON form.
///
/// # Errors
///
/// Returns [`StoreError::MalformedPayload`] if a tagged object does not have the
/// shape its tag requires.
pub fn decode(value: &Value) -> StoreResult<Bson> {
    match value {
        Value::Null => Ok(Bson::Null),
        Value::Bool(b) => Ok(Bson::Boolean(*b)),
        Value::Number(n) => decode_number(n),
        Value::String(s) => Ok(Bson::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(decode)
            .collect::<StoreResult<Vec<_>>>()
            .map(Bson::Array),
        Value::Object(map) => match map.keys().find(|key| TAGS.contains(&key.as_str())) {
            Some(tag) => decode_tagged(tag, map),
            None => decode_map(map).map(Bson::Document),
        },
    }
}

/// Decodes a wire value that must be an object into a BSON document.
pub fn decode_document(value: &Value) -> StoreResult<Document> {
    match decode(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(StoreError::malformed(format!(
            "expected an object, found {:?}",
            other.element_type()
        ))),
    }
}

/// Encodes a native BSON value into its wire form.
///
/// # Errors
///
/// Returns [`StoreError::MalformedPayload`] for BSON types that have no wire tag
/// (JavaScript code, symbols, DB pointers and `undefined`).
pub fn encode(value: &Bson) -> StoreResult<Value> {
    Ok(match value {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => json!({ "$numberLong": i.to_string() }),
        Bson::Decimal128(d) => json!({ "$numberDecimal": d.to_string() }),
        Bson::Double(f) => match Number::from_f64(*f) {
            Some(n) => Value::Number(n),
            None => json!({ "$numberDouble": non_finite_name(*f) }),
        },
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(encode).collect::<StoreResult<_>>()?),
        Bson::Document(doc) => Value::Object(encode_map(doc)?),
        Bson::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
        Bson::DateTime(dt) => encode_date(dt),
        Bson::Binary(bin) => json!({
            "$binary": {
                "base64": STANDARD.encode(&bin.bytes),
                "subType": format!("{:02x}", u8::from(bin.subtype)),
            }
        }),
        Bson::RegularExpression(re) => json!({
            "$regularExpression": {
                "pattern": re.pattern.as_str(),
                "options": re.options.as_str(),
            }
        }),
        Bson::Timestamp(ts) => json!({ "$timestamp": { "t": ts.time, "i": ts.increment } }),
        Bson::MinKey => json!({ "$minKey": 1 }),
        Bson::MaxKey => json!({ "$maxKey": 1 }),
        other => {
            return Err(StoreError::malformed(format!(
                "{:?} values have no wire encoding",
                other.element_type()
            )));
        }
    })
}

/// Encodes a BSON document into a wire object.
pub fn encode_document(doc: &Document) -> StoreResult<Value> {
    encode_map(doc).map(Value::Object)
}

fn decode_number(n: &Number) -> StoreResult<Bson> {
    if let Some(i) = n.as_i64() {
        return Ok(i32::try_from(i).map(Bson::Int32).unwrap_or(Bson::Int64(i)));
    }
    if n.is_u64() {
        return Err(StoreError::malformed(format!(
            "integer {n} does not fit in a signed 64-bit integer"
        )));
    }

    n.as_f64()
        .map(Bson::Double)
        .ok_or_else(|| StoreError::malformed(format!("unrepresentable number {n}")))
}

fn decode_map(map: &Map<String, Value>) -> StoreResult<Document> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), decode(value)?)))
        .collect()
}

fn encode_map(doc: &Document) -> StoreResult<Map<String, Value>> {
    doc.iter()
        .map(|(key, value)| Ok((key.clone(), encode(value)?)))
        .collect()
}

fn decode_tagged(tag: &str, map: &Map<String, Value>) -> StoreResult<Bson> {
    // The legacy binary form is the only tag spanning two keys.
    if tag == "$binary" && map.len() == 2 {
        return match (map.get("$binary"), map.get("$type")) {
            (Some(Value::String(b64)), Some(Value::String(subtype))) => {
                decode_binary(b64, subtype)
            }
            _ => Err(bad_tag(tag, "expected {\"$binary\": <base64>, \"$type\": <hex>}")),
        };
    }

    if map.len() != 1 {
        return Err(bad_tag(tag, "tagged objects must not carry other fields"));
    }

    let body = &map[tag];

    match tag {
        "$oid" => match body {
            Value::String(hex) => ObjectId::parse_str(hex)
                .map(Bson::ObjectId)
                .map_err(|_| bad_tag(tag, "expected 24 hexadecimal characters")),
            _ => Err(bad_tag(tag, "expected a string")),
        },
        "$date" => decode_date(body).map(Bson::DateTime),
        "$binary" => match body {
            Value::Object(inner) if inner.len() == 2 => {
                match (inner.get("base64"), inner.get("subType")) {
                    (Some(Value::String(b64)), Some(Value::String(subtype))) => {
                        decode_binary(b64, subtype)
                    }
                    _ => Err(bad_tag(tag, "expected {\"base64\": .., \"subType\": ..}")),
                }
            }
            _ => Err(bad_tag(tag, "expected {\"base64\": .., \"subType\": ..}")),
        },
        "$regularExpression" => match body {
            Value::Object(inner) if inner.len() == 2 => {
                match (inner.get("pattern"), inner.get("options")) {
                    (Some(Value::String(pattern)), Some(Value::String(options))) => {
                        regex(pattern, options).map(Bson::RegularExpression)
                    }
                    _ => Err(bad_tag(tag, "expected {\"pattern\": .., \"options\": ..}")),
                }
            }
            _ => Err(bad_tag(tag, "expected {\"pattern\": .., \"options\": ..}")),
        },
        "$numberLong" => decode_long(body).map(Bson::Int64),
        "$numberDecimal" => match body {
            Value::String(s) => s
                .parse::<Decimal128>()
                .map(Bson::Decimal128)
                .map_err(|_| bad_tag(tag, "expected a decimal string")),
            _ => Err(bad_tag(tag, "expected a string")),
        },
        "$numberDouble" => match body {
            Value::String(s) => match s.as_str() {
                "NaN" => Ok(Bson::Double(f64::NAN)),
                "Infinity" => Ok(Bson::Double(f64::INFINITY)),
                "-Infinity" => Ok(Bson::Double(f64::NEG_INFINITY)),
                other => other
                    .parse::<f64>()
                    .map(Bson::Double)
                    .map_err(|_| bad_tag(tag, "expected a decimal string")),
            },
            _ => Err(bad_tag(tag, "expected a string")),
        },
        "$timestamp" => match body {
            Value::Object(inner) if inner.len() == 2 => {
                let part = |name: &str| {
                    inner
                        .get(name)
                        .and_then(Value::as_u64)
                        .and_then(|v| u32::try_from(v).ok())
                };
                match (part("t"), part("i")) {
                    (Some(time), Some(increment)) => {
                        Ok(Bson::Timestamp(Timestamp { time, increment }))
                    }
                    _ => Err(bad_tag(tag, "expected {\"t\": u32, \"i\": u32}")),
                }
            }
            _ => Err(bad_tag(tag, "expected {\"t\": u32, \"i\": u32}")),
        },
        "$minKey" if body == &json!(1) => Ok(Bson::MinKey),
        "$maxKey" if body == &json!(1) => Ok(Bson::MaxKey),
        _ => Err(bad_tag(tag, "expected 1")),
    }
}

fn decode_date(body: &Value) -> StoreResult<DateTime> {
    match body {
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(DateTime::from_chrono)
            .map_err(|e| bad_tag("$date", &e.to_string())),
        Value::Number(n) => n
            .as_i64()
            .map(DateTime::from_millis)
            .ok_or_else(|| bad_tag("$date", "expected integer milliseconds")),
        Value::Object(inner) if inner.len() == 1 && inner.contains_key("$numberLong") => {
            decode_long(&inner["$numberLong"]).map(DateTime::from_millis)
        }
        _ => Err(bad_tag("$date", "expected an RFC 3339 string or {\"$numberLong\": ..}")),
    }
}

fn encode_date(dt: &DateTime) -> Value {
    let millis = dt.timestamp_millis();

    if (0..=MAX_RFC3339_MILLIS).contains(&millis) {
        json!({ "$date": dt.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true) })
    } else {
        json!({ "$date": { "$numberLong": millis.to_string() } })
    }
}

fn decode_long(body: &Value) -> StoreResult<i64> {
    body.as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| bad_tag("$numberLong", "expected a decimal string"))
}

fn decode_binary(b64: &str, subtype: &str) -> StoreResult<Bson> {
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| bad_tag("$binary", &e.to_string()))?;
    let subtype = match subtype.len() {
        1 | 2 => u8::from_str_radix(subtype, 16)
            .map_err(|_| bad_tag("$binary", "subType must be one or two hex digits"))?,
        _ => return Err(bad_tag("$binary", "subType must be one or two hex digits")),
    };

    Ok(Bson::Binary(Binary {
        subtype: BinarySubtype::from(subtype),
        bytes,
    }))
}

pub(crate) fn regex(pattern: &str, options: &str) -> StoreResult<Regex> {
    Ok(Regex {
        pattern: pattern
            .to_string()
            .try_into()
            .map_err(|_| bad_tag("$regularExpression", "pattern contains a NUL byte"))?,
        options: options
            .to_string()
            .try_into()
            .map_err(|_| bad_tag("$regularExpression", "options contain a NUL byte"))?,
    })
}

fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn bad_tag(tag: &str, reason: &str) -> StoreError {
    StoreError::malformed(format!("invalid {tag} value: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use proptest::prelude::*;

    #[test]
    fn decodes_object_ids_inside_query_operators() {
        let query = json!({ "_id": { "$in": [{ "$oid": "5f1d7c0e8e4b2a0012345678" }] } });
        let decoded = decode_document(&query).unwrap();

        assert_eq!(
            decoded,
            doc! { "_id": { "$in": [ObjectId::parse_str("5f1d7c0e8e4b2a0012345678").unwrap()] } }
        );
    }

    #[test]
    fn keeps_update_operators_as_documents() {
        let update = json!({ "$set": { "name": "Ann" }, "$inc": { "visits": 1 } });

        assert_eq!(
            decode_document(&update).unwrap(),
            doc! { "$set": { "name": "Ann" }, "$inc": { "visits": 1 } }
        );
    }

    #[test]
    fn preserves_field_order() {
        let decoded = decode_document(&json!({ "b": 1, "a": -1 })).unwrap();

        assert_eq!(decoded.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn integers_narrow_to_int32_when_they_fit() {
        assert_eq!(decode(&json!(7)).unwrap(), Bson::Int32(7));
        assert_eq!(decode(&json!(3_000_000_000i64)).unwrap(), Bson::Int64(3_000_000_000));
        assert_eq!(decode(&json!(1.5)).unwrap(), Bson::Double(1.5));
    }

    #[test]
    fn dates_accept_every_documented_form() {
        let expected = Bson::DateTime(DateTime::from_millis(1_595_764_800_000));

        assert_eq!(decode(&json!({ "$date": "2020-07-26T12:00:00.000Z" })).unwrap(), expected);
        assert_eq!(decode(&json!({ "$date": "2020-07-26T14:00:00+02:00" })).unwrap(), expected);
        assert_eq!(decode(&json!({ "$date": 1_595_764_800_000i64 })).unwrap(), expected);
        assert_eq!(
            decode(&json!({ "$date": { "$numberLong": "1595764800000" } })).unwrap(),
            expected
        );
    }

    #[test]
    fn encodes_dates_relaxed_inside_the_rfc3339_range() {
        assert_eq!(
            encode(&Bson::DateTime(DateTime::from_millis(1_595_764_800_000))).unwrap(),
            json!({ "$date": "2020-07-26T12:00:00.000Z" })
        );
        assert_eq!(
            encode(&Bson::DateTime(DateTime::from_millis(-1))).unwrap(),
            json!({ "$date": { "$numberLong": "-1" } })
        );
    }

    #[test]
    fn binary_accepts_canonical_and_legacy_forms() {
        let expected = Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: vec![1, 2, 3],
        });

        assert_eq!(
            decode(&json!({ "$binary": { "base64": "AQID", "subType": "00" } })).unwrap(),
            expected
        );
        assert_eq!(decode(&json!({ "$binary": "AQID", "$type": "0" })).unwrap(), expected);
        assert_eq!(
            encode(&expected).unwrap(),
            json!({ "$binary": { "base64": "AQID", "subType": "00" } })
        );
    }

    #[test]
    fn malformed_tags_are_rejected() {
        let cases = [
            json!({ "$oid": "not-an-id" }),
            json!({ "$oid": 12 }),
            json!({ "$oid": "5f1d7c0e8e4b2a0012345678", "name": "extra" }),
            json!({ "$date": "yesterday" }),
            json!({ "$date": true }),
            json!({ "$binary": { "base64": "!!!", "subType": "00" } }),
            json!({ "$binary": { "base64": "AQID", "subType": "100" } }),
            json!({ "$regularExpression": { "pattern": "^a" } }),
            json!({ "$numberLong": "12.5" }),
            json!({ "$numberDecimal": 1.5 }),
            json!({ "$numberDecimal": "one and a half" }),
            json!({ "$timestamp": { "t": -1, "i": 0 } }),
            json!({ "$minKey": 0 }),
        ];

        for case in cases {
            match decode(&json!({ "nested": [case.clone()] })) {
                Err(StoreError::MalformedPayload(_)) => {}
                other => panic!("expected malformed payload for {case}, got {other:?}"),
            }
        }
    }

    #[test]
    fn decimals_keep_their_digits() {
        let decoded = decode(&json!({ "$numberDecimal": "1.50" })).unwrap();

        assert_eq!(decoded, Bson::Decimal128("1.50".parse().unwrap()));
        assert_eq!(encode(&decoded).unwrap(), json!({ "$numberDecimal": "1.50" }));
    }

    #[test]
    fn integers_beyond_int64_are_rejected() {
        assert!(matches!(
            decode(&json!({ "big": u64::MAX })),
            Err(StoreError::MalformedPayload(_))
        ));
        assert_eq!(decode(&json!(i64::MAX)).unwrap(), Bson::Int64(i64::MAX));
    }

    #[test]
    fn decode_document_rejects_non_objects() {
        assert!(matches!(
            decode_document(&json!([1, 2])),
            Err(StoreError::MalformedPayload(_))
        ));
    }

    #[test]
    fn untagged_types_fail_to_encode() {
        let code = Bson::JavaScriptCode("function () {}".to_string());

        assert!(matches!(encode(&code), Err(StoreError::MalformedPayload(_))));
    }

    #[test]
    fn non_finite_doubles_are_tagged() {
        assert_eq!(
            encode(&Bson::Double(f64::NEG_INFINITY)).unwrap(),
            json!({ "$numberDouble": "-Infinity" })
        );
        assert!(matches!(
            decode(&json!({ "$numberDouble": "NaN" })).unwrap(),
            Bson::Double(f) if f.is_nan()
        ));
    }

    fn arb_extended() -> impl Strategy<Value = Bson> {
        prop_oneof![
            any::<[u8; 12]>().prop_map(|bytes| Bson::ObjectId(ObjectId::from_bytes(bytes))),
            any::<i64>().prop_map(|millis| Bson::DateTime(DateTime::from_millis(millis))),
            (any::<u8>(), prop::collection::vec(any::<u8>(), 0..64)).prop_map(
                |(subtype, bytes)| Bson::Binary(Binary {
                    subtype: BinarySubtype::from(subtype),
                    bytes,
                })
            ),
            ("[a-z^$.*+?()|\\\\]{0,16}", "[imsux]{0,4}").prop_map(|(pattern, options)| {
                Bson::RegularExpression(regex(&pattern, &options).unwrap())
            }),
            any::<i64>().prop_map(Bson::Int64),
            any::<i32>().prop_map(Bson::Int32),
            (any::<i64>(), -30i32..30).prop_map(|(coefficient, exponent)| {
                Bson::Decimal128(format!("{coefficient}E{exponent}").parse().unwrap())
            }),
            prop::num::f64::NORMAL.prop_map(Bson::Double),
            (any::<u32>(), any::<u32>())
                .prop_map(|(time, increment)| Bson::Timestamp(Timestamp { time, increment })),
            "\\PC{0,16}".prop_map(Bson::String),
            Just(Bson::MinKey),
            Just(Bson::MaxKey),
            Just(Bson::Null),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Bson> {
        arb_extended().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Bson::Array),
                prop::collection::vec(("[a-z_]{1,8}", inner), 0..6).prop_map(|fields| {
                    Bson::Document(fields.into_iter().collect::<Document>())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn round_trips_every_extended_type(value in arb_extended()) {
            prop_assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
        }

        #[test]
        fn round_trips_nested_documents(value in arb_value()) {
            prop_assert_eq!(decode(&encode(&value).unwrap()).unwrap(), value);
        }

        #[test]
        fn round_trips_through_json_text(value in arb_value()) {
            let text = serde_json::to_string(&encode(&value).unwrap()).unwrap();
            let parsed: Value = serde_json::from_str(&text).unwrap();

            prop_assert_eq!(decode(&parsed).unwrap(), value);
        }
    }
}
