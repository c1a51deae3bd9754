//! Scripted remote runtimes for adapter unit tests.

use std::sync::{Arc, Mutex};

use macaroon_compat_bridge::{
    Evaluator, JsCodec, PythonCodec, RequestLog, Scripted, ScriptedTransport, Setup, ValueCodec,
};
use serde_json::Value;

type Responder = Arc<Mutex<Box<dyn FnMut(&str) -> Result<Value, Value> + Send>>>;

/// Answers each statement through a closure (`Err` is a remote exception)
/// and records what was sent.
pub(crate) struct Script {
    responder: Responder,
    log: RequestLog,
}

impl Script {
    pub(crate) fn new(f: impl FnMut(&str) -> Result<Value, Value> + Send + 'static) -> Self {
        Self {
            responder: Arc::new(Mutex::new(Box::new(f))),
            log: RequestLog::default(),
        }
    }

    pub(crate) fn null() -> Self {
        Self::new(|_| Ok(Value::Null))
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.log.requests()
    }

    fn transport(&self) -> ScriptedTransport {
        let responder = Arc::clone(&self.responder);
        ScriptedTransport::new(move |expr| {
            let mut f = responder.lock().unwrap_or_else(|e| e.into_inner());
            match f(expr) {
                Ok(v) => Scripted::value(v),
                Err(e) => Scripted::exception(e),
            }
        })
        .with_log(self.log.clone())
    }

    fn evaluator(&self, runtime: &str, codec: Arc<dyn ValueCodec>) -> Arc<Evaluator> {
        Arc::new(Evaluator::new(
            runtime,
            Box::new(self.transport()),
            codec,
            Setup::none(),
        ))
    }
}

pub(crate) fn python_evaluator(script: &Script) -> Arc<Evaluator> {
    script.evaluator("python3", Arc::new(PythonCodec))
}

pub(crate) fn node_evaluator(script: &Script) -> Arc<Evaluator> {
    script.evaluator("node", Arc::new(JsCodec))
}
