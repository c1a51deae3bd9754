//! Line framing shared by the host and the remote loop programs.
//!
//! Request: `base64(utf8(expression)) "\n"`.
//! Response: `base64(utf8(json)) "\n"` where the JSON document is
//! `{"result": <any>, "exception": <any>}` and at most one side is populated.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Longest response line accepted from a remote runtime.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid base64 frame: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("frame payload is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("cannot parse response {raw:?}: {source}")]
    Json {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Value>,
}

/// A decoded response: exactly one of a value or a remote exception.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Value),
    Exception(Value),
}

impl From<WireResponse> for Reply {
    fn from(resp: WireResponse) -> Self {
        match resp.exception {
            Some(exc) if !exception_is_empty(&exc) => Reply::Exception(exc),
            _ => Reply::Value(resp.result.unwrap_or(Value::Null)),
        }
    }
}

impl From<&Reply> for WireResponse {
    fn from(reply: &Reply) -> Self {
        match reply {
            Reply::Value(v) => WireResponse {
                result: Some(v.clone()),
                exception: None,
            },
            Reply::Exception(e) => WireResponse {
                result: None,
                exception: Some(e.clone()),
            },
        }
    }
}

fn exception_is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn strip_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub fn encode_request(expr: &str) -> Vec<u8> {
    let mut out = b64().encode(expr.as_bytes()).into_bytes();
    out.push(b'\n');
    out
}

pub fn decode_request(line: &[u8]) -> Result<String, FrameError> {
    let bytes = b64().decode(strip_line_end(line))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn encode_response(reply: &Reply) -> Vec<u8> {
    let wire = WireResponse::from(reply);
    // Value has no non-string map keys, so serialization cannot fail.
    let json = serde_json::to_vec(&wire).unwrap_or_else(|_| b"{}".to_vec());
    let mut out = b64().encode(json).into_bytes();
    out.push(b'\n');
    out
}

pub fn decode_response(line: &[u8]) -> Result<Reply, FrameError> {
    let bytes = b64().decode(strip_line_end(line))?;
    let wire: WireResponse = serde_json::from_slice(&bytes).map_err(|source| FrameError::Json {
        raw: String::from_utf8_lossy(&bytes).into_owned(),
        source,
    })?;
    Ok(Reply::from(wire))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frames_survive_awkward_text() {
        let cases = [
            "",
            "result = True",
            "def f():\n\treturn 1\nresult = f()\n",
            "s = \"quoted \\\"inner\\\" text\"",
            "x = u\"Москва ∃χ: ∀ι∈χ: ι≠∅ ♔\"",
            "\r\n\r\n",
        ];
        for expr in cases {
            let frame = encode_request(expr);
            assert_eq!(frame.last(), Some(&b'\n'));
            assert_eq!(
                frame.iter().filter(|b| **b == b'\n').count(),
                1,
                "frame for {expr:?} must be a single line"
            );
            assert_eq!(decode_request(&frame).expect("decode"), expr);
        }
    }

    #[test]
    fn response_with_exception_wins_over_result() {
        let line = encode_response(&Reply::Exception(json!("boom")));
        assert_eq!(
            decode_response(&line).expect("decode"),
            Reply::Exception(json!("boom"))
        );
    }

    #[test]
    fn null_or_empty_exception_means_success() {
        for raw in [
            json!({"result": 3, "exception": null}),
            json!({"result": 3, "exception": ""}),
            json!({"result": 3}),
        ] {
            let line = b64().encode(serde_json::to_vec(&raw).expect("json"));
            assert_eq!(
                decode_response(line.as_bytes()).expect("decode"),
                Reply::Value(json!(3))
            );
        }
    }

    #[test]
    fn absent_result_decodes_as_null() {
        let line = b64().encode(b"{}");
        assert_eq!(
            decode_response(line.as_bytes()).expect("decode"),
            Reply::Value(Value::Null)
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let err = decode_response(b"%%% not base64 %%%\n").expect_err("must reject");
        assert!(matches!(err, FrameError::Base64(_)));

        let line = b64().encode(b"not json");
        let err = decode_response(line.as_bytes()).expect_err("must reject");
        match err {
            FrameError::Json { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut line = b64().encode(br#"{"result":"ok"}"#).into_bytes();
        line.extend_from_slice(b"\r\n");
        assert_eq!(
            decode_response(&line).expect("decode"),
            Reply::Value(json!("ok"))
        );
    }
}
