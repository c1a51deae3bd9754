//! One JSON form for every library's JSON serialization.
//!
//! Libraries disagree on the version (v1 `identifier`/`caveats` objects,
//! v2 `i`/`c` objects), on base64 alphabets and padding, and on key order.
//! [`normalize_json`] decodes any of them to bytes and re-emits a single
//! document: text fields as strings when they are UTF-8 (`*64` otherwise),
//! signatures as lowercase hex, binary fields as unpadded URL-safe base64.

use base64::Engine as _;
use macaroon_compat_bridge::codec::{decode_base64_lenient, decode_hex, encode_hex};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("macaroon JSON does not parse: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("macaroon JSON is not an object")]
    NotObject,

    #[error("macaroon JSON has unknown shape (no identifier, i or i64 field)")]
    UnknownShape,

    #[error("field {field:?}: {reason}")]
    Field { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Canonical {
    location: String,
    #[serde(flatten)]
    identifier: Blob<'static>,
    signature: String,
    caveats: Vec<CanonicalCaveat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct CanonicalCaveat {
    #[serde(flatten)]
    cid: Blob<'static>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cl: Option<String>,
}

/// Bytes that print as `<name>` when they are UTF-8 and `<name>64` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Blob<'a> {
    name: &'a str,
    bytes: Vec<u8>,
}

impl Serialize for Blob<'_> {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = s.serialize_map(Some(1))?;
        match std::str::from_utf8(&self.bytes) {
            Ok(text) => map.serialize_entry(self.name, text)?,
            Err(_) => {
                map.serialize_entry(&format!("{}64", self.name), &b64(&self.bytes))?;
            }
        }
        map.end()
    }
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn normalize_json(data: &[u8]) -> Result<String, CanonicalError> {
    let doc: Value = serde_json::from_slice(data)?;
    let Value::Object(obj) = &doc else {
        return Err(CanonicalError::NotObject);
    };
    let canonical = if obj.contains_key("identifier") {
        from_v1(obj)?
    } else if obj.contains_key("i") || obj.contains_key("i64") {
        from_v2(obj)?
    } else {
        return Err(CanonicalError::UnknownShape);
    };
    Ok(serde_json::to_string(&canonical)?)
}

fn field_err(field: &str, reason: impl ToString) -> CanonicalError {
    CanonicalError::Field {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn opt_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, CanonicalError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(field_err(key, format!("expected a string, found {other}"))),
    }
}

fn req_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a str, CanonicalError> {
    opt_str(obj, key)?.ok_or_else(|| field_err(key, "missing"))
}

fn base64_field(key: &str, s: &str) -> Result<Vec<u8>, CanonicalError> {
    decode_base64_lenient(s).map_err(|e| field_err(key, e))
}

/// v2 stores a field as `<key>` (text) or `<key>64` (base64).
fn v2_bytes(obj: &Map<String, Value>, key: &str) -> Result<Option<Vec<u8>>, CanonicalError> {
    let key64 = format!("{key}64");
    match (opt_str(obj, key)?, opt_str(obj, &key64)?) {
        (Some(_), Some(_)) => Err(field_err(key, format!("both {key} and {key64} present"))),
        (Some(text), None) => Ok(Some(text.as_bytes().to_vec())),
        (None, Some(enc)) => Ok(Some(base64_field(&key64, enc)?)),
        (None, None) => Ok(None),
    }
}

fn caveat_list<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
) -> Result<Vec<&'a Map<String, Value>>, CanonicalError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|c| c.as_object().ok_or_else(|| field_err(key, "caveat is not an object")))
            .collect(),
        Some(_) => Err(field_err(key, "expected an array")),
    }
}

fn nonempty(s: Option<&str>) -> Option<String> {
    s.filter(|s| !s.is_empty()).map(str::to_string)
}

fn from_v1(obj: &Map<String, Value>) -> Result<Canonical, CanonicalError> {
    let signature = decode_hex(req_str(obj, "signature")?).map_err(|e| field_err("signature", e))?;
    let caveats = caveat_list(obj, "caveats")?
        .into_iter()
        .map(|c| -> Result<CanonicalCaveat, CanonicalError> {
            let vid = match nonempty(opt_str(c, "vid")?) {
                Some(v) => Some(b64(&base64_field("vid", &v)?)),
                None => None,
            };
            Ok(CanonicalCaveat {
                cid: Blob {
                    name: "cid",
                    bytes: req_str(c, "cid")?.as_bytes().to_vec(),
                },
                vid,
                cl: nonempty(opt_str(c, "cl")?),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Canonical {
        location: opt_str(obj, "location")?.unwrap_or_default().to_string(),
        identifier: Blob {
            name: "identifier",
            bytes: req_str(obj, "identifier")?.as_bytes().to_vec(),
        },
        signature: encode_hex(&signature),
        caveats,
    })
}

fn from_v2(obj: &Map<String, Value>) -> Result<Canonical, CanonicalError> {
    if let Some(v) = obj.get("v") {
        if v.as_u64() != Some(2) {
            return Err(field_err("v", format!("unsupported version {v}")));
        }
    }
    let identifier = v2_bytes(obj, "i")?.ok_or_else(|| field_err("i", "missing"))?;
    let signature = v2_bytes(obj, "s")?.ok_or_else(|| field_err("s", "missing"))?;
    let caveats = caveat_list(obj, "c")?
        .into_iter()
        .map(|c| -> Result<CanonicalCaveat, CanonicalError> {
            Ok(CanonicalCaveat {
                cid: Blob {
                    name: "cid",
                    bytes: v2_bytes(c, "i")?.ok_or_else(|| field_err("c.i", "missing"))?,
                },
                vid: v2_bytes(c, "v")?.filter(|v| !v.is_empty()).map(|v| b64(&v)),
                cl: nonempty(opt_str(c, "l")?),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Canonical {
        location: opt_str(obj, "l")?.unwrap_or_default().to_string(),
        identifier: Blob {
            name: "identifier",
            bytes: identifier,
        },
        signature: encode_hex(&signature),
        caveats,
    })
}
