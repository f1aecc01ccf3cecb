use super::*;
use crate::doc;

#[test]
fn round_trips_scalars() {
    let mut doc = Document::new();
    doc.insert("double", 1.5f64);
    doc.insert("string", "hello");
    doc.insert("bool", true);
    doc.insert("int32", 42i32);
    doc.insert("int64", 9_000_000_000i64);
    doc.insert("null", Bson::Null);
    doc.insert("oid", ObjectId::new());
    doc.insert("date", DateTime::from_millis(-1000));
    doc.insert(
        "nested",
        doc! { "a".to_string() => Bson::Int32(1), "b".to_string() => Bson::String("x".into()) },
    );
    doc.insert("array", Bson::Array(vec![Bson::Int32(1), Bson::Int32(2), Bson::Int32(3)]));

    let bytes = encode(&doc);
    assert_eq!(bytes.len(), i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize);

    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded, doc);
}

#[test]
fn preserves_field_order() {
    let mut doc = Document::new();
    doc.insert("z", 1i32);
    doc.insert("a", 2i32);
    doc.insert("m", 3i32);
    let bytes = encode(&doc);
    let decoded = decode(&bytes).unwrap();
    let keys: Vec<&String> = decoded.keys().collect();
    assert_eq!(keys, vec!["z", "a", "m"]);
}

#[test]
fn truncated_document_is_an_error() {
    let mut doc = Document::new();
    doc.insert("x", 1i32);
    let mut bytes = encode(&doc);
    bytes.truncate(bytes.len() - 2);
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TruncatedDocument);
}

#[test]
fn strict_int32_decode_rejects_oversized_int64() {
    let value = Bson::Int64(i64::MAX);
    assert!(value.as_i32_strict().is_err());
    assert_eq!(Bson::Int32(5).as_i32_strict().unwrap(), 5);
}

#[test]
fn lazy_decode_defers_field_errors() {
    let mut doc = Document::new();
    doc.insert("a", 1i32);
    doc.insert("b", "hello");
    let bytes = encode(&doc);
    let lazy = raw::LazyDocument::new(&bytes).unwrap();
    assert_eq!(lazy.get("a").unwrap(), Some(Bson::Int32(1)));
    assert_eq!(lazy.get("missing").unwrap(), None);
}

#[test]
fn extended_json_number_long_round_trips() {
    let json: serde_json::Value =
        serde_json::from_str(r#"{"a": {"$numberLong": "9223372036854775807"}}"#).unwrap();
    let doc = extjson::document_from_json(&json).unwrap();
    assert_eq!(doc.get_i64("a"), Some(i64::MAX));

    let reencoded = extjson::document_to_json(&doc);
    let doc2 = extjson::document_from_json(&reencoded).unwrap();
    assert_eq!(doc, doc2);
}

#[test]
fn decimal128_round_trips_through_extended_json() {
    let mut doc = Document::new();
    doc.insert("d", Bson::Decimal128(Decimal128::parse_str("1.50").unwrap()));
    let json = extjson::document_to_json(&doc);
    let back = extjson::document_from_json(&json).unwrap();
    assert_eq!(doc, back);
}
