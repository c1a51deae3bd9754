//! Runs one scenario against every registered implementation and compares
//! each outcome with the baseline's.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AdapterError, VerifyErrorClass};
use crate::interface::DischargePolicy;
use crate::registry::{Implementation, Registry};

/// A library-level failure, as reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorView {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<VerifyErrorClass>,
    pub message: String,
}

impl From<&AdapterError> for ErrorView {
    fn from(err: &AdapterError) -> Self {
        Self {
            kind: err.kind(),
            class: err.verify_class(),
            message: err.to_string(),
        }
    }
}

/// Bridge failure met while running a case; never compared across
/// implementations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarnessError {
    pub implementation: String,
    pub runtime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub message: String,
}

impl HarnessError {
    pub fn new(imp: &Implementation, err: &AdapterError) -> Self {
        let bridge = match err {
            AdapterError::Bridge(b) => Some(b),
            _ => None,
        };
        Self {
            implementation: imp.name().to_string(),
            runtime: bridge.map_or(imp.runtime(), |b| b.runtime()).to_string(),
            expression: bridge.and_then(|b| b.expression()).map(str::to_string),
            payload: bridge
                .and_then(|b| b.remote_exception())
                .map(|e| e.payload().clone()),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { value: Value },
    Failed { error: ErrorView },
    Harness { error: String },
}

impl Outcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Ok { value } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorView> {
        match self {
            Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_harness(&self) -> bool {
        matches!(self, Outcome::Harness { .. })
    }

    /// Short form used in expectation reports.
    pub fn describe(&self) -> String {
        match self {
            Outcome::Ok { value } => format!("success ({value})"),
            Outcome::Failed { error } => format!("failure ({})", error.message),
            Outcome::Harness { error } => format!("harness error ({error})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImplementationOutcome {
    pub implementation: String,
    pub discharge_policy: DischargePolicy,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    UnexpectedSuccess {
        implementation: String,
        baseline: String,
        baseline_error: ErrorView,
        value: Value,
    },
    UnexpectedFailure {
        implementation: String,
        baseline: String,
        baseline_value: Value,
        error: ErrorView,
    },
    ValueMismatch {
        implementation: String,
        baseline: String,
        expected: Value,
        actual: Value,
    },
    ExpectationMismatch {
        implementation: String,
        expected: String,
        actual: String,
    },
}

impl Inconsistency {
    pub fn implementation(&self) -> &str {
        match self {
            Inconsistency::UnexpectedSuccess { implementation, .. }
            | Inconsistency::UnexpectedFailure { implementation, .. }
            | Inconsistency::ValueMismatch { implementation, .. }
            | Inconsistency::ExpectationMismatch { implementation, .. } => implementation,
        }
    }
}

/// What a case expected of one implementation, when it disagrees with what
/// happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub case: String,
    /// `None` when no implementation could serve as baseline.
    pub baseline: Option<String>,
    pub outcomes: Vec<ImplementationOutcome>,
    pub inconsistencies: Vec<Inconsistency>,
    pub harness_errors: Vec<HarnessError>,
}

impl ConsistencyReport {
    pub fn new(case: impl Into<String>) -> Self {
        Self {
            case: case.into(),
            baseline: None,
            outcomes: Vec::new(),
            inconsistencies: Vec::new(),
            harness_errors: Vec::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.inconsistencies.is_empty() && self.harness_errors.is_empty()
    }

    pub fn outcome(&self, implementation: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.implementation == implementation)
            .map(|o| &o.outcome)
    }

    /// Records `result` for `imp`; a harness failure becomes a harness error.
    pub fn record(&mut self, imp: &Implementation, result: Result<Value, AdapterError>) {
        let outcome = match result {
            Ok(value) => Outcome::Ok { value },
            Err(err) if err.is_harness() => {
                warn!(
                    case = %self.case,
                    implementation = imp.name(),
                    error = %err,
                    "harness error"
                );
                self.harness_errors.push(HarnessError::new(imp, &err));
                Outcome::Harness {
                    error: err.to_string(),
                }
            }
            Err(err) => Outcome::Failed {
                error: ErrorView::from(&err),
            },
        };
        debug!(
            case = %self.case,
            implementation = imp.name(),
            outcome = %outcome.describe(),
            "outcome"
        );
        self.outcomes.push(ImplementationOutcome {
            implementation: imp.name().to_string(),
            discharge_policy: imp.discharge_policy(),
            outcome,
        });
    }

    /// Adds an expectation mismatch for every implementation `check` rejects.
    /// Harness outcomes are skipped.
    pub fn expect_each(
        &mut self,
        mut check: impl FnMut(&ImplementationOutcome) -> Option<Mismatch>,
    ) {
        let found: Vec<Inconsistency> = self
            .outcomes
            .iter()
            .filter(|o| !o.outcome.is_harness())
            .filter_map(|o| {
                check(o).map(|m| Inconsistency::ExpectationMismatch {
                    implementation: o.implementation.clone(),
                    expected: m.expected,
                    actual: m.actual,
                })
            })
            .collect();
        for inc in found {
            warn!(case = %self.case, implementation = inc.implementation(), "expectation not met");
            self.inconsistencies.push(inc);
        }
    }

    /// Compares every recorded outcome with the baseline: the first
    /// implementation that is not a known exception and did not hit a
    /// harness error.
    ///
    /// Registry order still decides, but a known exception at the front is
    /// passed over: its outcome may legitimately differ, and the rest must
    /// not be judged against it.
    pub fn compare(&mut self, known_exceptions: &[&str]) {
        let excepted = |name: &str| known_exceptions.contains(&name);
        let Some(base) = self
            .outcomes
            .iter()
            .position(|o| !o.outcome.is_harness() && !excepted(&o.implementation))
        else {
            warn!(case = %self.case, "no implementation can serve as baseline");
            return;
        };
        let baseline = self.outcomes[base].clone();
        self.baseline = Some(baseline.implementation.clone());

        let mut found = Vec::new();
        for (i, o) in self.outcomes.iter().enumerate() {
            if i == base || o.outcome.is_harness() {
                continue;
            }
            let implementation = o.implementation.clone();
            let base_name = baseline.implementation.clone();
            match (&baseline.outcome, &o.outcome) {
                (Outcome::Failed { error }, Outcome::Ok { value })
                    if !excepted(&implementation) =>
                {
                    found.push(Inconsistency::UnexpectedSuccess {
                        implementation,
                        baseline: base_name,
                        baseline_error: error.clone(),
                        value: value.clone(),
                    });
                }
                (Outcome::Ok { value }, Outcome::Failed { error }) => {
                    found.push(Inconsistency::UnexpectedFailure {
                        implementation,
                        baseline: base_name,
                        baseline_value: value.clone(),
                        error: error.clone(),
                    });
                }
                (Outcome::Ok { value: expected }, Outcome::Ok { value: actual })
                    if expected != actual =>
                {
                    found.push(Inconsistency::ValueMismatch {
                        implementation,
                        baseline: base_name,
                        expected: expected.clone(),
                        actual: actual.clone(),
                    });
                }
                _ => {}
            }
        }
        for inc in &found {
            warn!(
                case = %self.case,
                implementation = inc.implementation(),
                "inconsistent with baseline"
            );
        }
        self.inconsistencies.extend(found);
    }
}

/// Runs `scenario` once per implementation, in registry order, and compares
/// the outcomes. Implementations named in `known_exceptions` may succeed
/// where the baseline fails.
pub fn check_consistency(
    registry: &Registry,
    case: impl Into<String>,
    known_exceptions: &[&str],
    mut scenario: impl FnMut(&Implementation) -> Result<Value, AdapterError>,
) -> ConsistencyReport {
    let mut report = ConsistencyReport::new(case);
    for imp in registry.entries() {
        report.record(imp, scenario(imp));
    }
    report.compare(known_exceptions);
    report
}
