//! Minimal remote runtime speaking the bridge wire protocol.
//!
//! A request that parses as JSON evaluates to itself. `raise <msg>` raises,
//! `exit` quits without answering, `garble` answers with invalid base64 and
//! `garble-json` with base64 of something that is not JSON. Anything else
//! evaluates to the request text.

use std::io::{self, BufRead, Write};

use macaroon_compat_bridge::frame::{self, Reply};
use serde_json::{json, Value};

fn answer(expr: &str) -> Option<Vec<u8>> {
    let expr = expr.trim();
    if expr == "exit" {
        return None;
    }
    if expr == "garble" {
        return Some(b"*** not base64 ***\n".to_vec());
    }
    if expr == "garble-json" {
        // base64("not json")
        return Some(b"bm90IGpzb24=\n".to_vec());
    }
    let reply = if let Some(msg) = expr.strip_prefix("raise ") {
        Reply::Exception(json!({"name": "Raised", "message": msg}))
    } else {
        match serde_json::from_str::<Value>(expr) {
            Ok(v) => Reply::Value(v),
            Err(_) => Reply::Value(Value::String(expr.to_string())),
        }
    };
    Some(frame::encode_response(&reply))
}

fn run() -> io::Result<()> {
    let stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();

    for line in stdin.split(b'\n') {
        let line = line?;
        let reply = match frame::decode_request(&line) {
            Ok(expr) => answer(&expr),
            Err(e) => Some(frame::encode_response(&Reply::Exception(json!({
                "name": "FrameError",
                "message": e.to_string(),
            })))),
        };
        let Some(reply) = reply else { break };
        stdout.write_all(&reply)?;
        stdout.flush()?;
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("macaroon-compat-echo: io error: {e}");
        std::process::exit(1);
    }
}
