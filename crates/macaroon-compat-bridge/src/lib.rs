//! Synchronous expression-evaluation bridge to long-lived interpreter
//! processes (Python, Node) speaking a base64 line protocol.

pub mod codec;
pub mod error;
pub mod evaluator;
pub mod frame;
pub mod handles;
pub mod runtime;
pub mod transport;

pub use codec::{HostValue, JsCodec, PythonCodec, ValueCodec};
pub use error::{BridgeError, RemoteException};
pub use evaluator::Evaluator;
pub use frame::{FrameError, Reply};
pub use handles::{HandleAllocator, SymbolicHandle};
pub use runtime::{RuntimeKind, RuntimeProfile, Setup, SetupStep};
pub use transport::{ProcessTransport, RequestLog, Scripted, ScriptedTransport, Transport};
