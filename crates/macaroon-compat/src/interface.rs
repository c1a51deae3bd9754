//! The capability set every implementation under test exposes.
//!
//! A [`Macaroon`] is a handle to a token held by some implementation; for
//! bridged libraries it only names an object living in a remote runtime.
//! Every `with_*` and `bind` call returns a new handle and leaves the
//! receiver untouched, so one base macaroon can be branched freely.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::AdapterError;

/// Predicate table used to satisfy first-party caveats during verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Checker(BTreeMap<String, bool>);

impl Checker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, condition: impl Into<String>) -> Self {
        self.0.insert(condition.into(), true);
        self
    }

    pub fn deny(mut self, condition: impl Into<String>) -> Self {
        self.0.insert(condition.into(), false);
        self
    }

    pub fn check(&self, condition: &str) -> Result<(), String> {
        if self.0.get(condition).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(format!("condition {condition:?} not met"))
        }
    }

    pub fn table(&self) -> &BTreeMap<String, bool> {
        &self.0
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for Checker {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// How an implementation treats discharges that are unused or used twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DischargePolicy {
    /// Every presented discharge must be used exactly once.
    #[default]
    Strict,
    /// Unused and reused discharges are accepted.
    Lenient,
}

impl DischargePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DischargePolicy::Strict => "strict",
            DischargePolicy::Lenient => "lenient",
        }
    }
}

impl fmt::Display for DischargePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Macaroon: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn marshal_json(&self) -> Result<Vec<u8>, AdapterError>;

    fn marshal_binary(&self) -> Result<Vec<u8>, AdapterError>;

    fn with_first_party_caveat(&self, condition: &str) -> Result<Box<dyn Macaroon>, AdapterError>;

    /// `root_key` is the caveat key shared with the third party, never the
    /// macaroon's own root key.
    fn with_third_party_caveat(
        &self,
        root_key: &[u8],
        condition: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError>;

    /// Binds this discharge macaroon to `primary` for presentation.
    fn bind(&self, primary: &dyn Macaroon) -> Result<Box<dyn Macaroon>, AdapterError>;

    fn verify(
        &self,
        root_key: &[u8],
        checker: &Checker,
        discharges: &[Box<dyn Macaroon>],
    ) -> Result<(), AdapterError>;

    /// Raw signature bytes, whatever encoding the library uses natively.
    fn signature(&self) -> Result<Vec<u8>, AdapterError>;
}

pub trait Package: Send + Sync {
    fn discharge_policy(&self) -> DischargePolicy {
        DischargePolicy::Strict
    }

    fn new_macaroon(
        &self,
        root_key: &[u8],
        id: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError>;

    fn unmarshal_json(&self, data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError>;

    fn unmarshal_binary(&self, data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError>;
}
