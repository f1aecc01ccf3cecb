//! Extended JSON (canonical form) conversion, used for human-readable dumps and for parsing
//! fixtures such as `{"a": {"$numberLong": "9223372036854775807"}}`.

use serde_json::{json, Map, Value};

use super::{
    datetime::DateTime,
    decimal128::Decimal128,
    document::Document,
    error::{Error, ErrorKind},
    oid::ObjectId,
    Binary,
    BinarySubtype,
    Bson,
    CodeWithScope,
    Regex,
    Timestamp,
};

pub fn document_to_json(doc: &Document) -> Value {
    let mut map = Map::new();
    for (key, value) in doc.iter() {
        map.insert(key.clone(), bson_to_json(value));
    }
    Value::Object(map)
}

pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Double(d) => {
            if d.is_finite() {
                json!(d)
            } else if d.is_nan() {
                json!({ "$numberDouble": "NaN" })
            } else if *d > 0.0 {
                json!({ "$numberDouble": "Infinity" })
            } else {
                json!({ "$numberDouble": "-Infinity" })
            }
        }
        Bson::String(s) => Value::String(s.clone()),
        Bson::Document(d) => document_to_json(d),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Binary(Binary { subtype, bytes }) => json!({
            "$binary": {
                "base64": base64_encode(bytes),
                "subType": format!("{:02x}", subtype.tag()),
            }
        }),
        Bson::Undefined => json!({ "$undefined": true }),
        Bson::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::DateTime(dt) => json!({ "$date": { "$numberLong": dt.millis().to_string() } }),
        Bson::Null => Value::Null,
        Bson::RegularExpression(Regex { pattern, options }) => json!({
            "$regularExpression": { "pattern": pattern, "options": options }
        }),
        Bson::DbPointer { namespace, id } => json!({
            "$dbPointer": { "$ref": namespace, "$id": { "$oid": id.to_hex() } }
        }),
        Bson::JavaScriptCode(code) => json!({ "$code": code }),
        Bson::Symbol(s) => json!({ "$symbol": s }),
        Bson::JavaScriptCodeWithScope(CodeWithScope { code, scope }) => json!({
            "$code": code,
            "$scope": document_to_json(scope),
        }),
        Bson::Int32(i) => json!({ "$numberInt": i.to_string() }),
        Bson::Timestamp(Timestamp { time, increment }) => json!({
            "$timestamp": { "t": time, "i": increment }
        }),
        Bson::Int64(i) => json!({ "$numberLong": i.to_string() }),
        Bson::Decimal128(d) => json!({ "$numberDecimal": d.to_string() }),
        Bson::MinKey => json!({ "$minKey": 1 }),
        Bson::MaxKey => json!({ "$maxKey": 1 }),
    }
}

pub fn document_from_json(value: &Value) -> Result<Document, Error> {
    match json_to_bson(value)? {
        Bson::Document(d) => Ok(d),
        _ => Err(Error::new(0, ErrorKind::InvalidUtf8)),
    }
}

pub fn json_to_bson(value: &Value) -> Result<Bson, Error> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Bson::Int32(i as i32)
                } else {
                    Bson::Int64(i)
                }
            } else {
                Bson::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_to_bson(item)?);
            }
            Bson::Array(out)
        }
        Value::Object(map) => parse_extended_object(map)?,
    })
}

fn parse_extended_object(map: &Map<String, Value>) -> Result<Bson, Error> {
    if map.len() == 1 {
        if let Some(v) = map.get("$oid") {
            let s = v.as_str().ok_or_else(|| Error::new(0, ErrorKind::InvalidUtf8))?;
            return Ok(Bson::ObjectId(ObjectId::parse_str(s)?));
        }
        if let Some(v) = map.get("$numberInt") {
            let s = as_number_string(v)?;
            let i: i32 = s.parse().map_err(|_| Error::new(0, ErrorKind::NumericConversion))?;
            return Ok(Bson::Int32(i));
        }
        if let Some(v) = map.get("$numberLong") {
            let s = as_number_string(v)?;
            let i: i64 = s.parse().map_err(|_| Error::new(0, ErrorKind::NumericConversion))?;
            return Ok(Bson::Int64(i));
        }
        if let Some(v) = map.get("$numberDouble") {
            let s = as_number_string(v)?;
            let d = match s.as_str() {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse().map_err(|_| Error::new(0, ErrorKind::NumericConversion))?,
            };
            return Ok(Bson::Double(d));
        }
        if let Some(v) = map.get("$numberDecimal") {
            let s = as_number_string(v)?;
            return Ok(Bson::Decimal128(Decimal128::parse_str(&s)?));
        }
        if let Some(v) = map.get("$symbol") {
            let s = v.as_str().ok_or_else(|| Error::new(0, ErrorKind::InvalidUtf8))?;
            return Ok(Bson::Symbol(s.to_string()));
        }
        if let Some(v) = map.get("$code") {
            let s = v.as_str().ok_or_else(|| Error::new(0, ErrorKind::InvalidUtf8))?;
            return Ok(Bson::JavaScriptCode(s.to_string()));
        }
        if let Some(v) = map.get("$minKey") {
            let _ = v;
            return Ok(Bson::MinKey);
        }
        if let Some(v) = map.get("$maxKey") {
            let _ = v;
            return Ok(Bson::MaxKey);
        }
        if map.get("$undefined").is_some() {
            return Ok(Bson::Undefined);
        }
        if let Some(Value::Object(date)) = map.get("$date") {
            if let Some(v) = date.get("$numberLong") {
                let s = as_number_string(v)?;
                let millis: i64 = s.parse().map_err(|_| Error::new(0, ErrorKind::NumericConversion))?;
                return Ok(Bson::DateTime(DateTime::from_millis(millis)));
            }
        }
    }

    if let (Some(code), Some(scope)) = (map.get("$code"), map.get("$scope")) {
        let code = code.as_str().ok_or_else(|| Error::new(0, ErrorKind::InvalidUtf8))?.to_string();
        let scope = document_from_json(scope)?;
        return Ok(Bson::JavaScriptCodeWithScope(CodeWithScope { code, scope }));
    }

    if let Some(Value::Object(ts)) = map.get("$timestamp") {
        let t = ts.get("t").and_then(Value::as_u64).unwrap_or(0) as u32;
        let i = ts.get("i").and_then(Value::as_u64).unwrap_or(0) as u32;
        return Ok(Bson::Timestamp(Timestamp { time: t, increment: i }));
    }

    if let Some(Value::Object(re)) = map.get("$regularExpression") {
        let pattern = re.get("pattern").and_then(Value::as_str).unwrap_or_default().to_string();
        let options = re.get("options").and_then(Value::as_str).unwrap_or_default().to_string();
        return Ok(Bson::RegularExpression(Regex { pattern, options }));
    }

    if let Some(Value::Object(bin)) = map.get("$binary") {
        let base64 = bin.get("base64").and_then(Value::as_str).unwrap_or_default();
        let subtype = bin
            .get("subType")
            .and_then(Value::as_str)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0);
        let bytes = base64_decode(base64)?;
        return Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::from_tag(subtype),
            bytes,
        }));
    }

    let mut doc = Document::new();
    for (key, value) in map {
        doc.insert(key.clone(), json_to_bson(value)?);
    }
    Ok(Bson::Document(doc))
}

fn as_number_string(v: &Value) -> Result<String, Error> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::new(0, ErrorKind::InvalidUtf8)),
    }
}

const B64_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        let n = ((b0 as u32) << 16) | ((b1 as u32) << 8) | b2 as u32;
        out.push(B64_ALPHABET[(n >> 18) as usize & 0x3F] as char);
        out.push(B64_ALPHABET[(n >> 12) as usize & 0x3F] as char);
        out.push(if chunk.len() > 1 { B64_ALPHABET[(n >> 6) as usize & 0x3F] as char } else { '=' });
        out.push(if chunk.len() > 2 { B64_ALPHABET[n as usize & 0x3F] as char } else { '=' });
    }
    out
}

fn base64_decode(s: &str) -> Result<Vec<u8>, Error> {
    fn val(c: u8) -> Option<u32> {
        match c {
            b'A'..=b'Z' => Some((c - b'A') as u32),
            b'a'..=b'z' => Some((c - b'a' + 26) as u32),
            b'0'..=b'9' => Some((c - b'0' + 52) as u32),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }
    let filtered: Vec<u8> = s.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(filtered.len() * 3 / 4);
    for chunk in filtered.chunks(4) {
        let mut n: u32 = 0;
        for &c in chunk {
            n = (n << 6) | val(c).ok_or_else(|| Error::new(0, ErrorKind::InvalidUtf8))?;
        }
        n <<= 6 * (4 - chunk.len() as u32);
        let bytes_out = match chunk.len() {
            4 => 3,
            3 => 2,
            2 => 1,
            _ => 0,
        };
        let all = n.to_be_bytes();
        out.extend_from_slice(&all[1..1 + bytes_out]);
    }
    Ok(out)
}
