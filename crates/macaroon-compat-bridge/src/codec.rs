//! Host values rendered as literal source text for a remote runtime, and
//! decoding of the JSON that comes back.
//!
//! Byte strings never cross the text channel raw: they are sent as base64
//! wrapped in the runtime's own decode call. Binary results have to come
//! back as text (hex or base64) and are decoded by the caller.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::handles::SymbolicHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Float(f64),
    Predicates(BTreeMap<String, bool>),
}

impl HostValue {
    pub fn bytes(data: impl AsRef<[u8]>) -> Self {
        HostValue::Bytes(data.as_ref().to_vec())
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Text(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Text(s)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Int(n)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        HostValue::Float(f)
    }
}

impl From<BTreeMap<String, bool>> for HostValue {
    fn from(t: BTreeMap<String, bool>) -> Self {
        HostValue::Predicates(t)
    }
}

/// Literal syntax of one remote runtime.
pub trait ValueCodec: Send + Sync {
    fn dialect(&self) -> &'static str;

    fn bytes(&self, data: &[u8]) -> String;

    fn text(&self, s: &str) -> String;

    fn int(&self, n: i64) -> String {
        n.to_string()
    }

    /// Non-finite floats have no literal form in either runtime; passing one
    /// is a caller bug.
    fn float(&self, f: f64) -> String {
        assert!(f.is_finite(), "cannot encode non-finite float {f}");
        format!("{f:?}")
    }

    fn predicates(&self, table: &BTreeMap<String, bool>) -> String;

    fn encode(&self, v: &HostValue) -> String {
        match v {
            HostValue::Bytes(b) => self.bytes(b),
            HostValue::Text(s) => self.text(s),
            HostValue::Int(n) => self.int(*n),
            HostValue::Float(f) => self.float(*f),
            HostValue::Predicates(t) => self.predicates(t),
        }
    }

    /// Statement that makes `expr` the value reported back to the host.
    fn result_of(&self, expr: &str) -> String;

    /// Statement binding `expr` to `handle` in the remote namespace.
    fn assign(&self, handle: &SymbolicHandle, expr: &str) -> String {
        format!("{handle} = {expr}")
    }

    /// Statement evaluating `expr` for its side effects only.
    fn statement(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn list(&self, items: &[String]) -> String {
        format!("[{}]", items.join(", "))
    }
}

/// Python 2/3 source literals. Requires `base64` to be imported remotely.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonCodec;

impl ValueCodec for PythonCodec {
    fn dialect(&self) -> &'static str {
        "python"
    }

    fn bytes(&self, data: &[u8]) -> String {
        format!("base64.b64decode(\"{}\")", b64_std().encode(data))
    }

    fn text(&self, s: &str) -> String {
        python_unicode_literal(s)
    }

    fn predicates(&self, table: &BTreeMap<String, bool>) -> String {
        let entries: Vec<String> = table
            .iter()
            .map(|(k, v)| format!("{}: {}", self.text(k), if *v { "True" } else { "False" }))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }

    fn result_of(&self, expr: &str) -> String {
        format!("result = {expr}")
    }
}

/// ASCII-only `u"..."` literal, valid in both Python 2 and Python 3
/// regardless of the source encoding the interpreter assumes.
fn python_unicode_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 3);
    out.push_str("u\"");
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if c.is_ascii() => out.push(c),
            c if (c as u32) <= 0xffff => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    out.push('"');
    out
}

/// JavaScript (Node) source literals. Requires `sjcl` loaded as `state.sjcl`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsCodec;

impl ValueCodec for JsCodec {
    fn dialect(&self) -> &'static str {
        "javascript"
    }

    /// Keys and other binary arguments are sjcl bit arrays.
    fn bytes(&self, data: &[u8]) -> String {
        format!("state.sjcl.codec.base64.toBits(\"{}\")", b64_std().encode(data))
    }

    fn text(&self, s: &str) -> String {
        js_string_literal(s)
    }

    fn predicates(&self, table: &BTreeMap<String, bool>) -> String {
        let entries: Vec<String> = table
            .iter()
            .map(|(k, v)| format!("{}: {}", js_string_literal(k), v))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }

    fn result_of(&self, expr: &str) -> String {
        expr.to_string()
    }

    // The value of a JS statement is reported back, so assignments and
    // calls are voided to keep remote objects out of the reply.
    fn assign(&self, handle: &SymbolicHandle, expr: &str) -> String {
        format!("void ({handle} = {expr})")
    }

    fn statement(&self, expr: &str) -> String {
        format!("void ({expr})")
    }
}

fn js_string_literal(s: &str) -> String {
    // JSON string syntax is valid JS; the two line separators are escaped
    // for engines predating ES2019.
    let json = Value::String(s.to_string()).to_string();
    json.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029")
}

fn b64_std() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

pub fn decode<T: DeserializeOwned>(raw: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(raw)
}

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s.trim()).map_err(|e| format!("invalid hex: {e}"))
}

/// Decodes standard or URL-safe base64, padded or not.
pub fn decode_base64_lenient(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
    let s = s.trim();
    let url = s.contains('-') || s.contains('_');
    let padded = s.ends_with('=');
    match (url, padded) {
        (false, true) => STANDARD.decode(s),
        (false, false) => STANDARD_NO_PAD.decode(s),
        (true, true) => URL_SAFE.decode(s),
        (true, false) => URL_SAFE_NO_PAD.decode(s),
    }
}
