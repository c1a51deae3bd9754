use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::{self, ValueCodec};
use crate::error::{BridgeError, RemoteException};
use crate::frame::{self, FrameError, Reply};
use crate::handles::{HandleAllocator, SymbolicHandle};
use crate::runtime::{RuntimeProfile, Setup};
use crate::transport::Transport;

enum Lifecycle {
    Fresh,
    Ready,
    Unusable(String),
}

struct Inner {
    transport: Box<dyn Transport>,
    lifecycle: Lifecycle,
}

/// Synchronous "evaluate one expression" channel to one remote runtime.
///
/// The runtime is started and set up lazily on first use. Every request
/// holds the lock for its full send/receive round trip, so callers sharing
/// an Evaluator are served one at a time and responses stay matched to
/// requests by stream order.
pub struct Evaluator {
    runtime: String,
    codec: Arc<dyn ValueCodec>,
    setup: Setup,
    handles: HandleAllocator,
    inner: Mutex<Inner>,
}

impl Evaluator {
    pub fn new(
        runtime: impl Into<String>,
        transport: Box<dyn Transport>,
        codec: Arc<dyn ValueCodec>,
        setup: Setup,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            codec,
            setup,
            handles: HandleAllocator::new(),
            inner: Mutex::new(Inner {
                transport,
                lifecycle: Lifecycle::Fresh,
            }),
        }
    }

    pub fn from_profile(profile: &RuntimeProfile) -> Self {
        Self::new(
            profile.kind.as_str(),
            Box::new(profile.transport()),
            profile.kind.codec(),
            profile.setup.clone(),
        )
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn codec(&self) -> &dyn ValueCodec {
        self.codec.as_ref()
    }

    pub fn setup(&self) -> &Setup {
        &self.setup
    }

    pub fn new_handle(&self, prefix: &str) -> SymbolicHandle {
        self.handles.new_handle(prefix)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.lock().lifecycle, Lifecycle::Ready)
    }

    /// Starts the runtime and runs setup if that has not happened yet.
    pub fn start(&self) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        self.ensure_ready(&mut inner)
    }

    /// Forgets a failed setup so the next call tries again. The child
    /// process, if one was spawned, is kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if let Lifecycle::Unusable(_) = inner.lifecycle {
            inner.lifecycle = Lifecycle::Fresh;
        }
    }

    /// Evaluates `expr` and returns the raw JSON result (`null` when the
    /// runtime reported nothing).
    pub fn eval(&self, expr: &str) -> Result<Value, BridgeError> {
        let mut inner = self.lock();
        self.ensure_ready(&mut inner)?;
        self.round_trip(&mut inner, expr)
    }

    /// Evaluates `expr` for its side effects only.
    pub fn exec(&self, expr: &str) -> Result<(), BridgeError> {
        self.eval(expr).map(|_| ())
    }

    /// Evaluates `expr` and decodes the result into `T`.
    pub fn eval_as<T: DeserializeOwned>(&self, expr: &str) -> Result<T, BridgeError> {
        let raw = self.eval(expr)?;
        codec::decode(raw).map_err(|e| BridgeError::ResultDecode {
            runtime: self.runtime.clone(),
            expression: expr.to_string(),
            reason: e.to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_ready(&self, inner: &mut Inner) -> Result<(), BridgeError> {
        match &inner.lifecycle {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::Unusable(reason) => {
                return Err(BridgeError::Unusable {
                    runtime: self.runtime.clone(),
                    reason: reason.clone(),
                })
            }
            Lifecycle::Fresh => {}
        }

        if let Err(source) = inner.transport.start() {
            let err = BridgeError::Start {
                runtime: self.runtime.clone(),
                command: inner.transport.describe(),
                source,
            };
            warn!(runtime = %self.runtime, error = %err, "remote runtime failed to start");
            inner.lifecycle = Lifecycle::Unusable(err.to_string());
            return Err(err);
        }

        let sanity = self.setup.sanity.iter().map(|s| ("sanity check", s.as_str()));
        let steps = self
            .setup
            .steps
            .iter()
            .map(|s| (s.label.as_str(), s.source.as_str()));
        for (step, source) in sanity.chain(steps) {
            if let Err(e) = self.round_trip(inner, source) {
                let err = BridgeError::Setup {
                    runtime: self.runtime.clone(),
                    step: step.to_string(),
                    source: Box::new(e),
                };
                warn!(runtime = %self.runtime, error = %err, "remote runtime setup failed");
                inner.lifecycle = Lifecycle::Unusable(err.to_string());
                return Err(err);
            }
        }

        info!(
            runtime = %self.runtime,
            steps = self.setup.steps.len(),
            "remote runtime ready"
        );
        inner.lifecycle = Lifecycle::Ready;
        Ok(())
    }

    fn round_trip(&self, inner: &mut Inner, expr: &str) -> Result<Value, BridgeError> {
        debug!(runtime = %self.runtime, expr, "eval");
        let request = frame::encode_request(expr);

        let line = inner
            .transport
            .send(&request)
            .and_then(|()| inner.transport.recv_line());
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                inner.lifecycle = Lifecycle::Unusable("response stream closed".to_string());
                return Err(BridgeError::UnexpectedEof {
                    runtime: self.runtime.clone(),
                });
            }
            Err(source) => {
                inner.lifecycle = Lifecycle::Unusable(format!("i/o failure: {source}"));
                return Err(BridgeError::Io {
                    runtime: self.runtime.clone(),
                    source,
                });
            }
        };

        let reply = frame::decode_response(&line).map_err(|e| match e {
            FrameError::Json { .. } => BridgeError::ResponseDecode {
                runtime: self.runtime.clone(),
                source: e,
            },
            FrameError::Base64(_) | FrameError::Utf8(_) => BridgeError::FrameDecode {
                runtime: self.runtime.clone(),
                source: e,
            },
        })?;

        match reply {
            Reply::Value(v) => {
                debug!(runtime = %self.runtime, result = %v, "eval ok");
                Ok(v)
            }
            Reply::Exception(exc) => {
                debug!(runtime = %self.runtime, exception = %exc, "eval raised");
                Err(BridgeError::RemoteEval {
                    runtime: self.runtime.clone(),
                    expression: expr.to_string(),
                    exception: RemoteException::new(exc),
                })
            }
        }
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("runtime", &self.runtime)
            .field("dialect", &self.codec.dialect())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PythonCodec;
    use crate::runtime::SetupStep;
    use crate::transport::{Scripted, ScriptedTransport};
    use serde_json::json;
    use std::io;

    fn python_setup() -> Setup {
        let mut setup = Setup::with_sanity("result = True");
        setup.push(SetupStep::python_import("json"));
        setup
    }

    fn evaluator(transport: ScriptedTransport, setup: Setup) -> Evaluator {
        Evaluator::new("python3", Box::new(transport), Arc::new(PythonCodec), setup)
    }

    #[test]
    fn lazy_start_runs_setup_once() {
        let t = ScriptedTransport::new(|expr| match expr {
            "result = True" => Scripted::value(json!(true)),
            "result = 1 + 1" => Scripted::value(json!(2)),
            _ => Scripted::null(),
        });
        let log = t.log();
        let ev = evaluator(t, python_setup());
        assert_eq!(log.starts(), 0);
        assert!(!ev.is_ready());

        assert_eq!(ev.eval_as::<i64>("result = 1 + 1").expect("eval"), 2);
        assert_eq!(ev.eval_as::<i64>("result = 1 + 1").expect("eval"), 2);

        assert_eq!(log.starts(), 1);
        assert_eq!(
            log.requests(),
            vec![
                "result = True",
                "global json; import json",
                "result = 1 + 1",
                "result = 1 + 1",
            ]
        );
        assert!(ev.is_ready());
    }

    #[test]
    fn remote_exception_keeps_expression_and_payload() {
        let t = ScriptedTransport::new(|expr| {
            if expr.contains("boom") {
                Scripted::exception(json!("Traceback\nValueError: boom\n"))
            } else {
                Scripted::null()
            }
        });
        let ev = evaluator(t, Setup::none());
        let err = ev.exec("raise ValueError('boom')").expect_err("must raise");
        match &err {
            BridgeError::RemoteEval {
                expression,
                exception,
                ..
            } => {
                assert_eq!(expression, "raise ValueError('boom')");
                assert!(exception.message().ends_with("ValueError: boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // A remote exception does not poison the evaluator.
        ev.exec("pass").expect("still usable");
    }

    #[test]
    fn failed_sanity_check_makes_evaluator_unusable() {
        let t = ScriptedTransport::new(|_| Scripted::exception(json!("NameError")));
        let log = t.log();
        let ev = evaluator(t, python_setup());

        let err = ev.exec("result = 1").expect_err("setup must fail");
        match &err {
            BridgeError::Setup { step, source, .. } => {
                assert_eq!(step, "sanity check");
                assert!(source.is_remote());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = ev.exec("result = 1").expect_err("still unusable");
        assert!(matches!(err, BridgeError::Unusable { .. }), "{err:?}");
        assert_eq!(log.len(), 1, "no retry without reset");
    }

    #[test]
    fn failed_import_names_the_step_and_reset_retries() {
        let fail_import = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = Arc::clone(&fail_import);
        let t = ScriptedTransport::new(move |expr| {
            if expr.contains("import json") && flag.load(std::sync::atomic::Ordering::SeqCst) {
                Scripted::exception(json!("ImportError: No module named json"))
            } else {
                Scripted::value(json!(true))
            }
        });
        let log = t.log();
        let ev = evaluator(t, python_setup());

        let err = ev.start().expect_err("import fails");
        match &err {
            BridgeError::Setup { step, .. } => assert_eq!(step, "import json"),
            other => panic!("unexpected error: {other:?}"),
        }

        fail_import.store(false, std::sync::atomic::Ordering::SeqCst);
        ev.reset();
        ev.start().expect("setup after reset");
        assert!(ev.is_ready());
        assert_eq!(log.starts(), 1, "process is not respawned");
    }

    #[test]
    fn start_failure_is_reported_as_start() {
        let t = ScriptedTransport::new(|_| Scripted::null()).failing_start(io::ErrorKind::NotFound);
        let ev = evaluator(t, Setup::none());
        let err = ev.exec("pass").expect_err("start fails");
        match err {
            BridgeError::Start { runtime, source, .. } => {
                assert_eq!(runtime, "python3");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn closed_stream_is_unexpected_eof_and_fatal() {
        let t = ScriptedTransport::new(|_| Scripted::Close);
        let ev = evaluator(t, Setup::none());
        let err = ev.exec("pass").expect_err("eof");
        assert!(matches!(err, BridgeError::UnexpectedEof { .. }), "{err:?}");
        let err = ev.exec("pass").expect_err("fatal");
        assert!(matches!(err, BridgeError::Unusable { .. }), "{err:?}");
    }

    #[test]
    fn protocol_corruption_is_surfaced() {
        let t = ScriptedTransport::new(|expr| match expr {
            "garble" => Scripted::Raw(b"***".to_vec()),
            "not-json" => Scripted::Raw(b"bm90IGpzb24=".to_vec()),
            _ => Scripted::value(json!("text")),
        });
        let ev = evaluator(t, Setup::none());

        let err = ev.exec("garble").expect_err("bad frame");
        assert!(matches!(err, BridgeError::FrameDecode { .. }), "{err:?}");

        let err = ev.exec("not-json").expect_err("bad json");
        assert!(matches!(err, BridgeError::ResponseDecode { .. }), "{err:?}");

        let err = ev.eval_as::<u64>("text").expect_err("shape mismatch");
        assert!(matches!(err, BridgeError::ResultDecode { .. }), "{err:?}");
    }

    #[test]
    fn concurrent_callers_never_interleave() {
        let t = ScriptedTransport::new(|expr| Scripted::value(json!(expr)));
        let ev = Arc::new(evaluator(t, python_setup()));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let ev = Arc::clone(&ev);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let expr = format!("\"{i}-{j}\"");
                        let got: String = ev.eval_as(&expr).expect("eval");
                        assert_eq!(got, expr);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("join");
        }
    }
}
