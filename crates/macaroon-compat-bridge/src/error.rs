use std::fmt;
use std::io;

use serde_json::Value;
use thiserror::Error;

use crate::frame::FrameError;

/// Exception payload raised inside a remote runtime.
///
/// The payload is kept verbatim: Python sends a formatted traceback string,
/// Node sends `{name, message}`. Use [`RemoteException::message`] for a
/// human-readable line and [`RemoteException::payload`] for diagnosis.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteException(Value);

impl RemoteException {
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }

    pub fn message(&self) -> String {
        match &self.0 {
            Value::String(s) => s.trim_end().to_string(),
            Value::Object(obj) => {
                let message = obj.get("message").and_then(Value::as_str);
                let name = obj.get("name").and_then(Value::as_str);
                match (name, message) {
                    (Some(name), Some(message)) => format!("{name}: {message}"),
                    (None, Some(message)) => message.to_string(),
                    _ => self.0.to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cannot start {runtime} runtime ({command}): {source}")]
    Start {
        runtime: String,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{runtime} runtime setup failed at {step}: {source}")]
    Setup {
        runtime: String,
        step: String,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("{runtime} runtime is unusable after failed setup: {reason}")]
    Unusable { runtime: String, reason: String },

    #[error("{runtime} runtime i/o failure: {source}")]
    Io {
        runtime: String,
        #[source]
        source: io::Error,
    },

    #[error("{runtime} runtime closed its response stream")]
    UnexpectedEof { runtime: String },

    #[error("{runtime} runtime sent a malformed response frame: {source}")]
    FrameDecode {
        runtime: String,
        #[source]
        source: FrameError,
    },

    #[error("{runtime} runtime sent an unparseable response: {source}")]
    ResponseDecode {
        runtime: String,
        #[source]
        source: FrameError,
    },

    #[error("eval error in {runtime} on {expression:?}: {exception}")]
    RemoteEval {
        runtime: String,
        expression: String,
        exception: RemoteException,
    },

    #[error("cannot decode result of {expression:?} from {runtime}: {reason}")]
    ResultDecode {
        runtime: String,
        expression: String,
        reason: String,
    },
}

impl BridgeError {
    pub fn runtime(&self) -> &str {
        match self {
            BridgeError::Start { runtime, .. }
            | BridgeError::Setup { runtime, .. }
            | BridgeError::Unusable { runtime, .. }
            | BridgeError::Io { runtime, .. }
            | BridgeError::UnexpectedEof { runtime }
            | BridgeError::FrameDecode { runtime, .. }
            | BridgeError::ResponseDecode { runtime, .. }
            | BridgeError::RemoteEval { runtime, .. }
            | BridgeError::ResultDecode { runtime, .. } => runtime,
        }
    }

    /// The remote runtime raised while evaluating; the bridge itself is intact.
    pub fn is_remote(&self) -> bool {
        matches!(self, BridgeError::RemoteEval { .. })
    }

    pub fn remote_exception(&self) -> Option<&RemoteException> {
        match self {
            BridgeError::RemoteEval { exception, .. } => Some(exception),
            _ => None,
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            BridgeError::RemoteEval { expression, .. }
            | BridgeError::ResultDecode { expression, .. } => Some(expression),
            _ => None,
        }
    }
}
