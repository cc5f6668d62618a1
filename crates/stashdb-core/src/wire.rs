//! Persisted document shape
//!
//! Documents are stored as JSON. Values JSON cannot express natively use
//! single-key tagged objects:
//!
//! | Value        | JSON                                                     |
//! |--------------|----------------------------------------------------------|
//! | `Id`         | `{"$oid": "<hex>"}`                                      |
//! | `Blob`       | `{"$blob": "<hex>"}`                                     |
//! | `DateTime`   | `{"$date": "<rfc3339>"}`                                 |
//! | `Binary`     | `{"$binary": "<base64>"}`                                |
//! | `Array`      | `{"$array": {"dtype": "f64", "shape": [3], "data": "<base64>"}}` |
//! | non-finite   | `{"$float": "nan" \| "inf" \| "-inf"}`                   |
//!
//! JSON numbers that fit in an `i64` decode as `Int`, everything else as
//! `Float`.
//!
//! Field names beginning with `$` are written with one extra leading `$`
//! (`$date` becomes `$$date`) so they never collide with a tag. On read a
//! `$$` prefix loses one `$`; other keys are taken as written.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Number, Value as Json};
use thiserror::Error;

use crate::array::{DType, NdArray};
use crate::ids::{BlobHandle, DocumentId};
use crate::value::{Document, Value};

/// Errors converting between JSON and documents
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Expected a JSON object for a document, found {0}")]
    NotAnObject(&'static str),

    #[error("Invalid {tag} value: {details}")]
    InvalidTag { tag: &'static str, details: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

const TAG_OID: &str = "$oid";
const TAG_BLOB: &str = "$blob";
const TAG_DATE: &str = "$date";
const TAG_BINARY: &str = "$binary";
const TAG_ARRAY: &str = "$array";
const TAG_FLOAT: &str = "$float";

/// Convert a document to its JSON form
pub fn to_json(doc: &Document) -> Json {
    Json::Object(
        doc.iter()
            .map(|(k, v)| (escape_key(k).into_owned(), value_to_json(v)))
            .collect(),
    )
}

/// Serialize a document to a compact JSON string
pub fn to_string(doc: &Document) -> String {
    to_json(doc).to_string()
}

/// Serialize a document to an indented JSON string
pub fn to_string_pretty(doc: &Document) -> String {
    serde_json::to_string_pretty(&to_json(doc)).unwrap_or_else(|_| to_string(doc))
}

/// Convert a JSON object to a document
pub fn from_json(json: &Json) -> Result<Document, WireError> {
    match json {
        Json::Object(map) => object_to_document(map),
        other => Err(WireError::NotAnObject(json_kind(other))),
    }
}

/// Parse a JSON string into a document
pub fn from_str(s: &str) -> Result<Document, WireError> {
    let json: Json = serde_json::from_str(s)?;
    from_json(&json)
}

/// Convert a single value to its JSON form
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(x) => match Number::from_f64(*x) {
            Some(n) => Json::Number(n),
            None => json!({ TAG_FLOAT: non_finite_name(*x) }),
        },
        Value::String(s) => Json::String(s.clone()),
        Value::Binary(bytes) => json!({ TAG_BINARY: BASE64.encode(bytes) }),
        Value::DateTime(dt) => json!({ TAG_DATE: dt.to_rfc3339_opts(SecondsFormat::AutoSi, true) }),
        Value::Id(id) => json!({ TAG_OID: id.to_hex() }),
        Value::Blob(handle) => json!({ TAG_BLOB: handle.to_hex() }),
        Value::Array(array) => json!({
            TAG_ARRAY: {
                "dtype": array.dtype().name(),
                "shape": array.shape(),
                "data": BASE64.encode(array.as_bytes()),
            }
        }),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Document(doc) => to_json(doc),
    }
}

fn json_to_value(json: &Json) -> Result<Value, WireError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(
            items
                .iter()
                .map(json_to_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Json::Object(map) => match tagged(map) {
            Some((tag, inner)) => decode_tagged(tag, inner)?,
            None => Value::Document(object_to_document(map)?),
        },
    })
}

fn object_to_document(map: &Map<String, Json>) -> Result<Document, WireError> {
    let mut doc = Document::new();
    for (k, v) in map {
        doc.insert(unescape_key(k), json_to_value(v)?);
    }
    Ok(doc)
}

fn escape_key(key: &str) -> Cow<'_, str> {
    if key.starts_with('$') {
        Cow::Owned(format!("${}", key))
    } else {
        Cow::Borrowed(key)
    }
}

fn unescape_key(key: &str) -> &str {
    match key.strip_prefix('$') {
        Some(rest) if rest.starts_with('$') => rest,
        _ => key,
    }
}

/// A single-key object whose key is a known tag
fn tagged(map: &Map<String, Json>) -> Option<(&'static str, &Json)> {
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    let tag = [TAG_OID, TAG_BLOB, TAG_DATE, TAG_BINARY, TAG_ARRAY, TAG_FLOAT]
        .into_iter()
        .find(|t| *t == key.as_str())?;
    Some((tag, inner))
}

fn decode_tagged(tag: &'static str, inner: &Json) -> Result<Value, WireError> {
    let invalid = |details: String| WireError::InvalidTag { tag, details };

    if tag == TAG_ARRAY {
        return decode_array(inner).map(Value::Array).map_err(invalid);
    }

    let text = inner
        .as_str()
        .ok_or_else(|| invalid(format!("expected a string, found {}", json_kind(inner))))?;

    match tag {
        TAG_OID => text
            .parse::<DocumentId>()
            .map(Value::Id)
            .map_err(|e| invalid(e.to_string())),
        TAG_BLOB => text
            .parse::<BlobHandle>()
            .map(Value::Blob)
            .map_err(|e| invalid(e.to_string())),
        TAG_DATE => DateTime::parse_from_rfc3339(text)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|e| invalid(e.to_string())),
        TAG_BINARY => BASE64
            .decode(text)
            .map(Value::Binary)
            .map_err(|e| invalid(e.to_string())),
        TAG_FLOAT => match text {
            "nan" => Ok(Value::Float(f64::NAN)),
            "inf" => Ok(Value::Float(f64::INFINITY)),
            "-inf" => Ok(Value::Float(f64::NEG_INFINITY)),
            other => Err(invalid(format!("unknown non-finite float '{}'", other))),
        },
        _ => Err(invalid("unknown tag".to_string())),
    }
}

fn decode_array(inner: &Json) -> Result<NdArray, String> {
    let dtype_name = inner
        .get("dtype")
        .and_then(Json::as_str)
        .ok_or("missing dtype")?;
    let dtype = DType::from_name(dtype_name).ok_or_else(|| format!("unknown dtype '{}'", dtype_name))?;

    let shape = inner
        .get("shape")
        .and_then(Json::as_array)
        .ok_or("missing shape")?
        .iter()
        .map(|d| d.as_u64().and_then(|d| usize::try_from(d).ok()))
        .collect::<Option<Vec<usize>>>()
        .ok_or("shape must hold non-negative integers")?;

    let data = inner
        .get("data")
        .and_then(Json::as_str)
        .ok_or("missing data")?;
    let data = BASE64.decode(data).map_err(|e| e.to_string())?;

    NdArray::from_raw(dtype, shape, data).map_err(|e| e.to_string())
}

fn non_finite_name(x: f64) -> &'static str {
    if x.is_nan() {
        "nan"
    } else if x.is_sign_positive() {
        "inf"
    } else {
        "-inf"
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_reserved_shape() {
        let id = DocumentId::new();
        let handle = BlobHandle::new();
        let mut d = doc! { "item" => "A", "measurement" => handle };
        d.set_id(id);
        d.set_np_object_ids(&[handle]);

        let json = to_json(&d);
        assert_eq!(json["_id"]["$oid"], id.to_hex());
        assert_eq!(json["measurement"]["$blob"], handle.to_hex());
        assert_eq!(json["_npObjectIDs"][0]["$blob"], handle.to_hex());
        assert_eq!(json["item"], "A");
    }

    #[test]
    fn test_document_survives_json() {
        let d = doc! {
            "int" => 7,
            "float" => 2.5,
            "text" => "hello",
            "flag" => true,
            "none" => Value::Null,
            "when" => Utc::now(),
            "raw" => Value::Binary(vec![0, 1, 2, 255]),
            "ref" => DocumentId::new(),
            "list" => vec![Value::Int(1), Value::from("two")],
            "nested" => doc! { "blob" => BlobHandle::new() },
            "arr" => NdArray::from_vec(vec![1.5f32, -2.0]),
        };
        let back = from_str(&to_string(&d)).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_numbers_normalize() {
        let d = from_str(r#"{"a": 3, "b": 3.0, "c": 18446744073709551615}"#).unwrap();
        assert_eq!(d.get("a"), Some(&Value::Int(3)));
        assert_eq!(d.get("b"), Some(&Value::Float(3.0)));
        assert!(matches!(d.get("c"), Some(Value::Float(_))));
    }

    #[test]
    fn test_non_finite_floats() {
        let d = doc! { "inf" => f64::INFINITY, "nan" => f64::NAN };
        let back = from_str(&to_string(&d)).unwrap();
        assert_eq!(back.get("inf"), Some(&Value::Float(f64::INFINITY)));
        assert!(matches!(back.get("nan"), Some(Value::Float(x)) if x.is_nan()));
    }

    #[test]
    fn test_multi_key_dollar_object_is_a_document() {
        let d = from_str(r#"{"x": {"$oid": "abc", "other": 1}}"#).unwrap();
        assert!(d.get("x").unwrap().as_document().is_some());
    }

    #[test]
    fn test_dollar_keys_survive_json() {
        let hex = DocumentId::new().to_hex();
        let d = doc! {
            "meta" => doc! { "$date" => "yesterday" },
            "ref" => doc! { "$oid" => hex.as_str() },
            "$$odd" => 1,
            "list" => vec![Value::from(doc! { "$array" => 2 })],
        };

        let json = to_json(&d);
        assert_eq!(json["meta"]["$$date"], "yesterday");
        assert!(json.get("$$$odd").is_some());

        let back = from_str(&to_string(&d)).unwrap();
        assert_eq!(back, d);
        assert!(back.get_path("ref").unwrap().as_document().is_some());
    }

    #[test]
    fn test_unescaped_dollar_keys_read_as_written() {
        let d = from_str(r#"{"x": {"$note": 1, "y": 2}}"#).unwrap();
        assert_eq!(d.get_path("x.$note"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_invalid_tags() {
        assert!(matches!(
            from_str(r#"{"x": {"$oid": "zzz"}}"#).unwrap_err(),
            WireError::InvalidTag { tag: "$oid", .. }
        ));
        assert!(matches!(
            from_str(r#"{"x": {"$array": {"dtype": "f64", "shape": [2], "data": "AAAAAAAAAAA="}}}"#)
                .unwrap_err(),
            WireError::InvalidTag { tag: "$array", .. }
        ));
    }

    #[test]
    fn test_top_level_must_be_object() {
        assert!(matches!(
            from_str("[1, 2]").unwrap_err(),
            WireError::NotAnObject("array")
        ));
        assert!(matches!(from_str("{").unwrap_err(), WireError::Json(_)));
    }
}
