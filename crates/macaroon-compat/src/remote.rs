//! Plumbing shared by the adapters that drive a library through an
//! [`Evaluator`].

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use macaroon_compat_bridge::{BridgeError, Evaluator, SymbolicHandle, ValueCodec};
use serde::de::DeserializeOwned;

use crate::error::AdapterError;
use crate::interface::Macaroon;

/// Which adapter operation a remote evaluation belongs to; decides the
/// semantic error a remote exception turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Construct,
    Caveat,
    Bind,
    Verify,
    Serialize,
    Inspect,
}

impl Stage {
    fn rejection(self, reason: String) -> AdapterError {
        match self {
            Stage::Construct => AdapterError::Construction(reason),
            Stage::Caveat => AdapterError::Caveat(reason),
            Stage::Bind => AdapterError::Bind(reason),
            Stage::Verify => AdapterError::verification(reason),
            Stage::Serialize => AdapterError::Serialization(reason),
            Stage::Inspect => AdapterError::Serialization(reason),
        }
    }
}

/// Maps a bridge failure to the adapter taxonomy. Only a remote exception
/// is a library verdict; everything else stays a bridge failure.
pub(crate) fn adapter_error(stage: Stage, err: BridgeError) -> AdapterError {
    match err.remote_exception() {
        Some(exc) if stage != Stage::Inspect => stage.rejection(last_line(&exc.message())),
        _ => AdapterError::Bridge(err),
    }
}

/// Python reports a whole traceback; the final line names the exception.
fn last_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or(message)
        .to_string()
}

/// One library loaded into one remote runtime.
pub struct RemoteLibrary {
    name: &'static str,
    prefix: &'static str,
    evaluator: Arc<Evaluator>,
}

impl RemoteLibrary {
    pub fn new(name: &'static str, prefix: &'static str, evaluator: Arc<Evaluator>) -> Self {
        Self {
            name,
            prefix,
            evaluator,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }

    pub(crate) fn codec(&self) -> &dyn ValueCodec {
        self.evaluator.codec()
    }

    pub(crate) fn new_handle(&self) -> SymbolicHandle {
        self.evaluator.new_handle(self.prefix)
    }

    pub(crate) fn exec(&self, stage: Stage, stmt: &str) -> Result<(), AdapterError> {
        self.evaluator
            .exec(stmt)
            .map_err(|e| adapter_error(stage, e))
    }

    /// Evaluates `expr` for its side effects.
    pub(crate) fn call(&self, stage: Stage, expr: &str) -> Result<(), AdapterError> {
        self.exec(stage, &self.codec().statement(expr))
    }

    /// Evaluates `expr` as the reported result and decodes it into `T`.
    pub(crate) fn result<T: DeserializeOwned>(
        &self,
        stage: Stage,
        expr: &str,
    ) -> Result<T, AdapterError> {
        let stmt = self.codec().result_of(expr);
        self.evaluator
            .eval_as(&stmt)
            .map_err(|e| adapter_error(stage, e))
    }

    /// Binds a fresh handle to `expr` and returns it.
    pub(crate) fn bind_new(
        self: &Arc<Self>,
        stage: Stage,
        expr: &str,
    ) -> Result<RemoteHandle, AdapterError> {
        let handle = self.new_handle();
        self.exec(stage, &self.codec().assign(&handle, expr))?;
        Ok(RemoteHandle {
            library: Arc::clone(self),
            handle,
        })
    }

    pub(crate) fn decode_error(&self, expr: &str, reason: impl fmt::Display) -> AdapterError {
        AdapterError::Bridge(BridgeError::ResultDecode {
            runtime: self.evaluator.runtime().to_string(),
            expression: expr.to_string(),
            reason: reason.to_string(),
        })
    }
}

impl fmt::Debug for RemoteLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLibrary")
            .field("name", &self.name)
            .field("runtime", &self.evaluator.runtime())
            .finish()
    }
}

/// A remote object: its name plus the library namespace it lives in.
#[derive(Clone)]
pub struct RemoteHandle {
    library: Arc<RemoteLibrary>,
    handle: SymbolicHandle,
}

impl RemoteHandle {
    pub fn handle(&self) -> &SymbolicHandle {
        &self.handle
    }

    pub(crate) fn library(&self) -> &Arc<RemoteLibrary> {
        &self.library
    }

    pub(crate) fn same_namespace(&self, other: &RemoteHandle) -> bool {
        Arc::ptr_eq(self.library.evaluator(), other.library.evaluator())
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.library.name,
            self.library.evaluator.runtime(),
            self.handle
        )
    }
}

/// Recovers the concrete macaroon type behind `m` and checks that it lives
/// in the same remote namespace as `anchor`.
pub(crate) fn same_kind<'a, T>(
    anchor: &RemoteHandle,
    m: &'a dyn Macaroon,
    project: impl Fn(&T) -> &RemoteHandle,
) -> Result<&'a T, AdapterError>
where
    T: 'static,
{
    let Some(found) = m.as_any().downcast_ref::<T>() else {
        return Err(AdapterError::ForeignMacaroon(format!(
            "{m:?} is not a {} macaroon",
            type_name::<T>().rsplit("::").next().unwrap_or("remote")
        )));
    };
    if !anchor.same_namespace(project(found)) {
        return Err(AdapterError::ForeignMacaroon(format!(
            "{m:?} lives in a different runtime than {anchor:?}"
        )));
    }
    Ok(found)
}
