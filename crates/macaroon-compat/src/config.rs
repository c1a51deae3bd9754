use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use macaroon_compat_bridge::runtime::{self, RuntimeKind};
use serde::Serialize;
use thiserror::Error;

use crate::error::AdapterError;
use crate::registry::ImplementationId;

pub const ENV_PYTHON2: &str = "MCOMPAT_PYTHON2";
pub const ENV_PYTHON3: &str = "MCOMPAT_PYTHON3";
pub const ENV_NODE: &str = "MCOMPAT_NODE";
pub const ENV_IMPLS: &str = "MCOMPAT_IMPLS";
pub const ENV_NONCE: &str = "MCOMPAT_NONCE";

pub const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid nonce mode {0:?} (expected zero or random)")]
    InvalidNonce(String),

    #[error("unknown implementation {name:?} (known: {known})")]
    UnknownImplementation { name: String, known: String },

    #[error("implementation {0:?} is listed more than once")]
    DuplicateImplementation(String),

    #[error("no implementations are enabled")]
    NoImplementations,

    #[error("{0}")]
    RuntimesDir(String),
}

/// Where third-party caveat nonces come from, for libraries that accept one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceSource {
    /// All-zero nonces; third-party signatures are reproducible.
    #[default]
    Zero,
    Random,
}

impl NonceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            NonceSource::Zero => "zero",
            NonceSource::Random => "random",
        }
    }

    pub fn nonce(self) -> Result<[u8; NONCE_LEN], AdapterError> {
        let mut buf = [0u8; NONCE_LEN];
        if self == NonceSource::Random {
            getrandom::getrandom(&mut buf)
                .map_err(|e| AdapterError::Caveat(format!("cannot read random nonce: {e}")))?;
        }
        Ok(buf)
    }
}

impl fmt::Display for NonceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NonceSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(NonceSource::Zero),
            "random" => Ok(NonceSource::Random),
            other => Err(ConfigError::InvalidNonce(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// `None` means discover it (see [`runtime::default_runtimes_dir`]).
    pub runtimes_dir: Option<PathBuf>,
    pub python2: OsString,
    pub python3: OsString,
    pub node: OsString,
    /// Enabled implementations; the first one is the oracle baseline.
    pub implementations: Vec<ImplementationId>,
    pub nonce: NonceSource,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runtimes_dir: None,
            python2: RuntimeKind::Python2.default_program().into(),
            python3: RuntimeKind::Python3.default_program().into(),
            node: RuntimeKind::Node.default_program().into(),
            implementations: ImplementationId::DEFAULT.to_vec(),
            nonce: NonceSource::Zero,
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(dir) = lookup(runtime::ENV_RUNTIMES_DIR) {
            cfg.runtimes_dir = Some(PathBuf::from(dir));
        }
        if let Some(p) = lookup(ENV_PYTHON2) {
            cfg.python2 = p;
        }
        if let Some(p) = lookup(ENV_PYTHON3) {
            cfg.python3 = p;
        }
        if let Some(p) = lookup(ENV_NODE) {
            cfg.node = p;
        }
        if let Some(list) = lookup(ENV_IMPLS) {
            cfg.implementations = parse_implementations(&list.to_string_lossy())?;
        }
        if let Some(mode) = lookup(ENV_NONCE) {
            cfg.nonce = mode.to_string_lossy().parse()?;
        }
        Ok(cfg)
    }

    pub fn program(&self, kind: RuntimeKind) -> &OsString {
        match kind {
            RuntimeKind::Python2 => &self.python2,
            RuntimeKind::Python3 => &self.python3,
            RuntimeKind::Node => &self.node,
        }
    }

    pub fn resolve_runtimes_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.runtimes_dir {
            Some(dir) if dir.is_dir() => Ok(dir.clone()),
            Some(dir) => Err(ConfigError::RuntimesDir(format!(
                "runtimes directory {} does not exist",
                dir.display()
            ))),
            None => runtime::default_runtimes_dir().map_err(ConfigError::RuntimesDir),
        }
    }

    /// Runtimes needed by the enabled implementations, each listed once.
    pub fn runtimes(&self) -> Vec<RuntimeKind> {
        let mut out: Vec<RuntimeKind> = Vec::new();
        for id in &self.implementations {
            if !out.contains(&id.runtime()) {
                out.push(id.runtime());
            }
        }
        out
    }
}

/// Parses a comma-separated implementation list, keeping its order.
pub fn parse_implementations(list: &str) -> Result<Vec<ImplementationId>, ConfigError> {
    let mut out: Vec<ImplementationId> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id: ImplementationId = name.parse()?;
        if out.contains(&id) {
            return Err(ConfigError::DuplicateImplementation(id.to_string()));
        }
        out.push(id);
    }
    if out.is_empty() {
        return Err(ConfigError::NoImplementations);
    }
    Ok(out)
}
