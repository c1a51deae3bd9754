use std::process::ExitCode;

use serde::Serialize;

use crate::config::NonceSource;
use crate::oracle::ConsistencyReport;
use crate::registry::ImplementationInfo;

pub const REPORT_SCHEMA_VERSION: &str = "macaroon-compat.report@0.1.0";

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub cases: Vec<ConsistencyReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl SuiteReport {
    pub fn new(suite: &'static str) -> Self {
        Self {
            suite,
            cases: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn inconsistent_cases(&self) -> usize {
        self.cases.iter().filter(|c| !c.is_consistent()).count()
    }

    pub fn harness_errors(&self) -> usize {
        self.cases.iter().map(|c| c.harness_errors.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub cases: usize,
    pub inconsistent: usize,
    pub harness_errors: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: &'static str,
    pub ok: bool,
    pub nonce: NonceSource,
    pub implementations: Vec<ImplementationInfo>,
    pub summary: Summary,
    pub suites: Vec<SuiteReport>,
}

impl RunReport {
    pub fn new(
        implementations: Vec<ImplementationInfo>,
        nonce: NonceSource,
        suites: Vec<SuiteReport>,
    ) -> Self {
        let summary = suites.iter().fold(Summary::default(), |acc, s| Summary {
            cases: acc.cases + s.cases.len(),
            inconsistent: acc.inconsistent + s.inconsistent_cases(),
            harness_errors: acc.harness_errors + s.harness_errors(),
            skipped: acc.skipped + s.skipped.len(),
        });
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            ok: summary.inconsistent == 0 && summary.harness_errors == 0,
            nonce,
            implementations,
            summary,
            suites,
        }
    }

    /// 0 when clean, 1 when implementations disagree, 2 when the harness
    /// itself failed.
    pub fn exit_code(&self) -> ExitCode {
        if self.summary.harness_errors > 0 {
            ExitCode::from(2)
        } else if self.summary.inconsistent > 0 {
            ExitCode::from(1)
        } else {
            ExitCode::SUCCESS
        }
    }
}
