use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use macaroon_compat_bridge::{Evaluator, RuntimeKind, RuntimeProfile, SetupStep};
use serde::Serialize;
use tracing::debug;

use crate::adapters::{jsmacaroon, libmacaroons, pymacaroons};
use crate::adapters::{JsMacaroonPackage, LibMacaroonsPackage, PyMacaroonsPackage};
use crate::config::{ConfigError, HarnessConfig};
use crate::interface::{DischargePolicy, Package};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ImplementationId {
    #[serde(rename = "pymacaroons-py3")]
    PyMacaroonsPy3,
    #[serde(rename = "pymacaroons-py2")]
    PyMacaroonsPy2,
    #[serde(rename = "libmacaroons-py3")]
    LibMacaroonsPy3,
    #[serde(rename = "libmacaroons-py2")]
    LibMacaroonsPy2,
    #[serde(rename = "jsmacaroon")]
    JsMacaroon,
}

impl ImplementationId {
    pub const ALL: [ImplementationId; 5] = [
        ImplementationId::PyMacaroonsPy3,
        ImplementationId::PyMacaroonsPy2,
        ImplementationId::LibMacaroonsPy3,
        ImplementationId::LibMacaroonsPy2,
        ImplementationId::JsMacaroon,
    ];

    /// Enabled when nothing is configured. Python 2 variants are opt-in.
    pub const DEFAULT: [ImplementationId; 3] = [
        ImplementationId::PyMacaroonsPy3,
        ImplementationId::LibMacaroonsPy3,
        ImplementationId::JsMacaroon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImplementationId::PyMacaroonsPy3 => "pymacaroons-py3",
            ImplementationId::PyMacaroonsPy2 => "pymacaroons-py2",
            ImplementationId::LibMacaroonsPy3 => "libmacaroons-py3",
            ImplementationId::LibMacaroonsPy2 => "libmacaroons-py2",
            ImplementationId::JsMacaroon => "jsmacaroon",
        }
    }

    pub fn runtime(self) -> RuntimeKind {
        match self {
            ImplementationId::PyMacaroonsPy3 | ImplementationId::LibMacaroonsPy3 => {
                RuntimeKind::Python3
            }
            ImplementationId::PyMacaroonsPy2 | ImplementationId::LibMacaroonsPy2 => {
                RuntimeKind::Python2
            }
            ImplementationId::JsMacaroon => RuntimeKind::Node,
        }
    }

    pub fn setup_steps(self) -> Vec<SetupStep> {
        match self {
            ImplementationId::PyMacaroonsPy3 | ImplementationId::PyMacaroonsPy2 => {
                pymacaroons::setup_steps()
            }
            ImplementationId::LibMacaroonsPy3 | ImplementationId::LibMacaroonsPy2 => {
                libmacaroons::setup_steps()
            }
            ImplementationId::JsMacaroon => jsmacaroon::setup_steps(),
        }
    }

    fn package(self, evaluator: Arc<Evaluator>, cfg: &HarnessConfig) -> Box<dyn Package> {
        match self {
            ImplementationId::PyMacaroonsPy3 | ImplementationId::PyMacaroonsPy2 => {
                Box::new(PyMacaroonsPackage::new(evaluator, cfg.nonce))
            }
            ImplementationId::LibMacaroonsPy3 | ImplementationId::LibMacaroonsPy2 => {
                Box::new(LibMacaroonsPackage::new(evaluator))
            }
            ImplementationId::JsMacaroon => Box::new(JsMacaroonPackage::new(evaluator)),
        }
    }
}

impl fmt::Display for ImplementationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImplementationId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ImplementationId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownImplementation {
                name: s.to_string(),
                known: ImplementationId::ALL.map(ImplementationId::as_str).join(", "),
            })
    }
}

/// One entry of the registry: a name, the runtime it runs in and its package.
pub struct Implementation {
    name: String,
    runtime: String,
    package: Box<dyn Package>,
}

impl Implementation {
    pub fn new(
        name: impl Into<String>,
        runtime: impl Into<String>,
        package: Box<dyn Package>,
    ) -> Self {
        Self {
            name: name.into(),
            runtime: runtime.into(),
            package,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn package(&self) -> &dyn Package {
        self.package.as_ref()
    }

    pub fn discharge_policy(&self) -> DischargePolicy {
        self.package.discharge_policy()
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("name", &self.name)
            .field("runtime", &self.runtime)
            .field("discharge_policy", &self.discharge_policy())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImplementationInfo {
    pub name: String,
    pub runtime: String,
    pub discharge_policy: DischargePolicy,
    pub baseline: bool,
}

/// Ordered, immutable set of implementations. The first entry is the
/// oracle baseline.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<Implementation>,
}

impl Registry {
    pub fn new(entries: Vec<Implementation>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::NoImplementations);
        }
        for (i, e) in entries.iter().enumerate() {
            if entries[..i].iter().any(|prev| prev.name == e.name) {
                return Err(ConfigError::DuplicateImplementation(e.name.clone()));
            }
        }
        Ok(Self { entries })
    }

    /// Builds one Evaluator per runtime in use, with the setup steps of
    /// every library loaded into it, and one package per implementation.
    pub fn from_config(cfg: &HarnessConfig) -> Result<Self, ConfigError> {
        if cfg.implementations.is_empty() {
            return Err(ConfigError::NoImplementations);
        }
        let runtimes_dir = cfg.resolve_runtimes_dir()?;

        let mut profiles: BTreeMap<RuntimeKind, RuntimeProfile> = BTreeMap::new();
        for id in &cfg.implementations {
            let kind = id.runtime();
            let profile = profiles
                .remove(&kind)
                .unwrap_or_else(|| RuntimeProfile::new(kind, cfg.program(kind), &runtimes_dir));
            profiles.insert(kind, profile.with_steps(id.setup_steps()));
        }

        let evaluators: BTreeMap<RuntimeKind, Arc<Evaluator>> = profiles
            .iter()
            .map(|(kind, profile)| {
                debug!(
                    runtime = %kind,
                    steps = profile.setup.steps.len(),
                    "configured runtime"
                );
                (*kind, Arc::new(Evaluator::from_profile(profile)))
            })
            .collect();

        let mut entries = Vec::with_capacity(cfg.implementations.len());
        for id in &cfg.implementations {
            let Some(evaluator) = evaluators.get(&id.runtime()) else {
                continue;
            };
            entries.push(Implementation::new(
                id.as_str(),
                id.runtime().as_str(),
                id.package(Arc::clone(evaluator), cfg),
            ));
        }
        Self::new(entries)
    }

    pub fn entries(&self) -> &[Implementation] {
        &self.entries
    }

    pub fn baseline(&self) -> &Implementation {
        &self.entries[0]
    }

    pub fn get(&self, name: &str) -> Option<&Implementation> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A registry restricted to `names`, keeping registry order.
    pub fn select(self, names: &[String]) -> Result<Self, ConfigError> {
        for n in names {
            if !self.entries.iter().any(|e| &e.name == n) {
                return Err(ConfigError::UnknownImplementation {
                    name: n.clone(),
                    known: self
                        .entries
                        .iter()
                        .map(|e| e.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }
        let entries = self
            .entries
            .into_iter()
            .filter(|e| names.contains(&e.name))
            .collect();
        Self::new(entries)
    }

    pub fn describe(&self) -> Vec<ImplementationInfo> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| ImplementationInfo {
                name: e.name.clone(),
                runtime: e.runtime.clone(),
                discharge_policy: e.discharge_policy(),
                baseline: i == 0,
            })
            .collect()
    }
}
