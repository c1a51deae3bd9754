use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::info;

use crate::frame::{self, Reply, MAX_LINE_BYTES};

/// Byte-stream pair connecting the host to one remote runtime.
///
/// `start` must be idempotent. `recv_line` returns `Ok(None)` when the
/// stream closes before a complete line arrives.
pub trait Transport: Send {
    fn describe(&self) -> String;

    fn is_started(&self) -> bool;

    fn start(&mut self) -> io::Result<()>;

    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    fn recv_line(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// A child process driven over its stdin/stdout. Stderr is inherited so
/// tracebacks printed by the remote runtime stay visible.
pub struct ProcessTransport {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    running: Option<Running>,
}

struct Running {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl ProcessTransport {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            current_dir: None,
            running: None,
        }
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// OS process id of the running child, if started.
    pub fn id(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.child.id())
    }

    fn not_started() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "transport not started")
    }
}

impl Transport for ProcessTransport {
    fn describe(&self) -> String {
        let mut out = self.program.to_string_lossy().into_owned();
        for a in &self.args {
            out.push(' ');
            out.push_str(&a.to_string_lossy());
        }
        out
    }

    fn is_started(&self) -> bool {
        self.running.is_some()
    }

    fn start(&mut self) -> io::Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        info!(command = %self.describe(), "starting remote runtime");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn()?;
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "cannot attach child stdin/stdout",
                ));
            }
        };
        info!(pid = child.id(), "remote runtime started");

        self.running = Some(Running {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let running = self.running.as_mut().ok_or_else(Self::not_started)?;
        running.stdin.write_all(frame)?;
        running.stdin.flush()
    }

    fn recv_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let running = self.running.as_mut().ok_or_else(Self::not_started)?;
        read_line_capped(&mut running.stdout, MAX_LINE_BYTES)
    }
}

/// Reads one `\n`-terminated line (terminator included).
///
/// Returns `Ok(None)` on EOF, including EOF in the middle of a line.
pub fn read_line_capped<R: BufRead>(reader: &mut R, cap: usize) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    loop {
        let (done, used) = {
            let buf = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    line.extend_from_slice(&buf[..=i]);
                    (true, i + 1)
                }
                None => {
                    line.extend_from_slice(buf);
                    (false, buf.len())
                }
            }
        };
        reader.consume(used);
        if line.len() > cap {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("response line exceeds {cap} bytes"),
            ));
        }
        if done {
            return Ok(Some(line));
        }
    }
}

/// What a [`ScriptedTransport`] sends back for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Reply(Reply),
    /// Raw bytes written as the response line (a trailing newline is added).
    Raw(Vec<u8>),
    /// Close the response stream without answering.
    Close,
}

impl Scripted {
    pub fn value(v: Value) -> Self {
        Scripted::Reply(Reply::Value(v))
    }

    pub fn null() -> Self {
        Scripted::Reply(Reply::Value(Value::Null))
    }

    pub fn exception(v: Value) -> Self {
        Scripted::Reply(Reply::Exception(v))
    }
}

#[derive(Debug, Default)]
struct LogState {
    starts: usize,
    requests: Vec<String>,
}

/// Shared view of everything a [`ScriptedTransport`] received.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<LogState>>);

impl RequestLog {
    fn with<T>(&self, f: impl FnOnce(&mut LogState) -> T) -> T {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn starts(&self) -> usize {
        self.with(|s| s.starts)
    }

    pub fn requests(&self) -> Vec<String> {
        self.with(|s| s.requests.clone())
    }

    pub fn last(&self) -> Option<String> {
        self.with(|s| s.requests.last().cloned())
    }

    pub fn len(&self) -> usize {
        self.with(|s| s.requests.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Responder = Box<dyn FnMut(&str) -> Scripted + Send>;

/// In-memory transport answering each request through a closure.
///
/// Used for tests and dry runs: no process is spawned, but frames still go
/// through the real encoder and decoder.
pub struct ScriptedTransport {
    name: String,
    responder: Responder,
    start_error: Option<io::ErrorKind>,
    started: bool,
    closed: bool,
    pending: VecDeque<Vec<u8>>,
    log: RequestLog,
}

impl ScriptedTransport {
    pub fn new(responder: impl FnMut(&str) -> Scripted + Send + 'static) -> Self {
        Self {
            name: "scripted".to_string(),
            responder: Box::new(responder),
            start_error: None,
            started: false,
            closed: false,
            pending: VecDeque::new(),
            log: RequestLog::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every `start` fail with the given error kind.
    pub fn failing_start(mut self, kind: io::ErrorKind) -> Self {
        self.start_error = Some(kind);
        self
    }

    /// Record into `log` instead of a fresh one.
    pub fn with_log(mut self, log: RequestLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }
}

impl Transport for ScriptedTransport {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn start(&mut self) -> io::Result<()> {
        if self.started {
            return Ok(());
        }
        if let Some(kind) = self.start_error {
            return Err(io::Error::new(kind, "scripted start failure"));
        }
        self.log.with(|s| s.starts += 1);
        self.started = true;
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if !self.started {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport not started"));
        }
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted stream closed"));
        }
        let expr = frame::decode_request(frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.log.with(|s| s.requests.push(expr.clone()));
        match (self.responder)(&expr) {
            Scripted::Reply(reply) => self.pending.push_back(frame::encode_response(&reply)),
            Scripted::Raw(mut raw) => {
                raw.push(b'\n');
                self.pending.push_back(raw);
            }
            Scripted::Close => self.closed = true,
        }
        Ok(())
    }

    fn recv_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.pending.pop_front())
    }
}
