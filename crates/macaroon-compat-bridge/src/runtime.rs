use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::codec::{JsCodec, PythonCodec, ValueCodec};
use crate::transport::ProcessTransport;

pub const ENV_RUNTIMES_DIR: &str = "MCOMPAT_RUNTIMES_DIR";

const RUNTIMES_REL: &str = "runtimes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuntimeKind {
    Python2,
    Python3,
    Node,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 3] = [
        RuntimeKind::Python2,
        RuntimeKind::Python3,
        RuntimeKind::Node,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Python2 => "python2",
            RuntimeKind::Python3 => "python3",
            RuntimeKind::Node => "node",
        }
    }

    pub fn default_program(self) -> &'static str {
        self.as_str()
    }

    /// Loop program path relative to the runtimes directory.
    pub fn interp_rel_path(self) -> &'static str {
        match self {
            RuntimeKind::Python2 | RuntimeKind::Python3 => "python/interp.py",
            RuntimeKind::Node => "node/interp.js",
        }
    }

    pub fn codec(self) -> Arc<dyn ValueCodec> {
        match self {
            RuntimeKind::Python2 | RuntimeKind::Python3 => Arc::new(PythonCodec),
            RuntimeKind::Node => Arc::new(JsCodec),
        }
    }

    /// Expression that must evaluate to `true` in a healthy runtime.
    pub fn sanity_expr(self) -> &'static str {
        match self {
            RuntimeKind::Python2 | RuntimeKind::Python3 => "result = True",
            RuntimeKind::Node => "true;",
        }
    }

    /// Setup every profile of this kind starts with, before library imports.
    pub fn base_setup(self) -> Setup {
        let mut setup = Setup::with_sanity(self.sanity_expr());
        match self {
            RuntimeKind::Python2 | RuntimeKind::Python3 => {
                setup.push(SetupStep::python_import("base64"));
                setup.push(SetupStep::python_import("json"));
                setup.push(SetupStep::new("define mcompat_text", PY_TEXT_HELPER));
            }
            RuntimeKind::Node => {}
        }
        setup
    }
}

const PY_TEXT_HELPER: &str = "
global mcompat_text
def mcompat_text(v):
    if isinstance(v, bytes):
        return v.decode('utf-8')
    return v
";

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeKindParseError {
    value: String,
}

impl fmt::Display for RuntimeKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid runtime {:?} (expected one of: python2, python3, node)",
            self.value
        )
    }
}

impl std::error::Error for RuntimeKindParseError {}

impl FromStr for RuntimeKind {
    type Err = RuntimeKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "python2" | "py2" => Ok(RuntimeKind::Python2),
            "python3" | "py3" | "python" => Ok(RuntimeKind::Python3),
            "node" | "nodejs" | "js" => Ok(RuntimeKind::Node),
            _ => Err(RuntimeKindParseError { value: s }),
        }
    }
}

/// One setup statement run after the sanity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub label: String,
    pub source: String,
}

impl SetupStep {
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
        }
    }

    /// `global <top>; import <module>` so the name survives into later requests.
    pub fn python_import(module: &str) -> Self {
        let sym = module.split('.').next().unwrap_or(module);
        Self::new(
            format!("import {module}"),
            format!("global {sym}; import {module}"),
        )
    }

    pub fn node_require(sym: &str, module: &str) -> Self {
        Self::new(
            format!("require {module}"),
            format!("void (state.{sym} = require(\"{module}\"))"),
        )
    }
}

/// One-time environment setup of an Evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Setup {
    pub sanity: Option<String>,
    pub steps: Vec<SetupStep>,
}

impl Setup {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_sanity(expr: impl Into<String>) -> Self {
        Self {
            sanity: Some(expr.into()),
            steps: Vec::new(),
        }
    }

    /// Appends `step` unless a step with the same label is already present.
    pub fn push(&mut self, step: SetupStep) {
        if !self.steps.iter().any(|s| s.label == step.label) {
            self.steps.push(step);
        }
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = SetupStep>) {
        for step in steps {
            self.push(step);
        }
    }
}

/// How to launch and prepare one remote runtime.
#[derive(Debug, Clone)]
pub struct RuntimeProfile {
    pub kind: RuntimeKind,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub setup: Setup,
}

impl RuntimeProfile {
    pub fn new(kind: RuntimeKind, program: impl Into<OsString>, runtimes_dir: &Path) -> Self {
        Self {
            kind,
            program: program.into(),
            args: vec![runtimes_dir.join(kind.interp_rel_path()).into_os_string()],
            setup: kind.base_setup(),
        }
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = SetupStep>) -> Self {
        self.setup.extend(steps);
        self
    }

    pub fn transport(&self) -> ProcessTransport {
        ProcessTransport::new(self.program.clone(), self.args.clone())
    }
}

pub fn default_runtimes_dir() -> Result<PathBuf, String> {
    if let Some(dir) = std::env::var_os(ENV_RUNTIMES_DIR) {
        let dir = PathBuf::from(dir);
        if dir.is_dir() {
            return Ok(dir);
        }
        return Err(format!(
            "{ENV_RUNTIMES_DIR} points at {}, which is not a directory",
            dir.display()
        ));
    }
    runtimes_dir_from_exe(std::env::current_exe().ok().as_deref())
}

pub fn runtimes_dir_from_exe(exe: Option<&Path>) -> Result<PathBuf, String> {
    let mut checked: Vec<PathBuf> = Vec::new();

    let rel = PathBuf::from(RUNTIMES_REL);
    checked.push(rel.clone());
    if rel.is_dir() {
        return Ok(rel);
    }

    if let Some(exe_dir) = exe.and_then(Path::parent) {
        for base in [Some(exe_dir), exe_dir.parent()] {
            let Some(base) = base else { continue };
            let cand = base.join(RUNTIMES_REL);
            checked.push(cand.clone());
            if cand.is_dir() {
                return Ok(cand);
            }
        }
    }

    let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if let Some(workspace_root) = crate_dir.parent().and_then(|p| p.parent()) {
        let abs = workspace_root.join(RUNTIMES_REL);
        checked.push(abs.clone());
        if abs.is_dir() {
            return Ok(abs);
        }
    }

    let checked = checked
        .into_iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Err(format!(
        "could not locate the runtimes directory (expected {RUNTIMES_REL}/)\n\nlooked for:\n{checked}\n\nfix:\n  - set {ENV_RUNTIMES_DIR}, or\n  - run from the repository root"
    ))
}
