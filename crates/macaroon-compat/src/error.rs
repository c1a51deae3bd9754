use std::fmt;

use macaroon_compat_bridge::BridgeError;
use serde::Serialize;
use thiserror::Error;

/// Why a library rejected a verification, recovered from its error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyErrorClass {
    ConditionNotMet,
    DischargeNotFound,
    DischargeUnused,
    DischargeReused,
    SignatureMismatch,
    Other,
}

impl VerifyErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            VerifyErrorClass::ConditionNotMet => "condition_not_met",
            VerifyErrorClass::DischargeNotFound => "discharge_not_found",
            VerifyErrorClass::DischargeUnused => "discharge_unused",
            VerifyErrorClass::DischargeReused => "discharge_reused",
            VerifyErrorClass::SignatureMismatch => "signature_mismatch",
            VerifyErrorClass::Other => "other",
        }
    }

    /// Keyword classification; the first matching rule wins, so the
    /// discharge rules are tested before the generic condition wording.
    pub fn classify(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        let any = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

        if any(&["more than once", "reused", "used twice", "multiple times"]) {
            VerifyErrorClass::DischargeReused
        } else if any(&["not used", "unused", "never used"]) {
            VerifyErrorClass::DischargeUnused
        } else if any(&[
            "cannot find discharge",
            "no discharge",
            "discharge not found",
            "missing discharge",
            "discharge macaroon not found",
        ]) {
            VerifyErrorClass::DischargeNotFound
        } else if any(&[
            "signature mismatch",
            "signatures do not match",
            "invalid signature",
            "signature does not match",
            "decryption failed",
        ]) {
            VerifyErrorClass::SignatureMismatch
        } else if any(&["not met", "not satisfied", "unsatisfied", "unmet"]) {
            VerifyErrorClass::ConditionNotMet
        } else {
            VerifyErrorClass::Other
        }
    }
}

impl fmt::Display for VerifyErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("cannot construct macaroon: {0}")]
    Construction(String),

    #[error("cannot add caveat: {0}")]
    Caveat(String),

    #[error("cannot bind discharge: {0}")]
    Bind(String),

    #[error("verification failed ({class}): {reason}")]
    Verification {
        class: VerifyErrorClass,
        reason: String,
    },

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A macaroon from another package or runtime was passed in.
    #[error("foreign macaroon: {0}")]
    ForeignMacaroon(String),

    /// Transport or protocol failure; never a library verdict.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl AdapterError {
    pub fn verification(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        AdapterError::Verification {
            class: VerifyErrorClass::classify(&reason),
            reason,
        }
    }

    pub fn unsupported(what: &str) -> Self {
        AdapterError::Serialization(format!("{what} is not supported by this implementation"))
    }

    pub fn is_bridge(&self) -> bool {
        matches!(self, AdapterError::Bridge(_))
    }

    /// Failures of the harness itself rather than of the library under test.
    pub fn is_harness(&self) -> bool {
        matches!(self, AdapterError::Bridge(_) | AdapterError::ForeignMacaroon(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::Construction(_) => "construction",
            AdapterError::Caveat(_) => "caveat",
            AdapterError::Bind(_) => "bind",
            AdapterError::Verification { .. } => "verification",
            AdapterError::Serialization(_) => "serialization",
            AdapterError::ForeignMacaroon(_) => "foreign_macaroon",
            AdapterError::Bridge(_) => "bridge",
        }
    }

    pub fn verify_class(&self) -> Option<VerifyErrorClass> {
        match self {
            AdapterError::Verification { class, .. } => Some(*class),
            _ => None,
        }
    }
}
