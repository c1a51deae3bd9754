//! Differential compatibility harness for macaroon libraries.
//!
//! Each library is driven through a [`Package`] adapter, most of them living
//! in a remote interpreter reached through `macaroon_compat_bridge`. The
//! [`oracle`] runs one scenario against every registered implementation and
//! reports where they disagree with the first one.

pub mod adapters;
pub mod canonical;
pub mod config;
pub mod error;
pub mod interface;
pub mod oracle;
pub mod registry;
pub mod remote;
pub mod report;
pub mod scenario;
pub mod suites;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, HarnessConfig, NonceSource};
pub use error::{AdapterError, VerifyErrorClass};
pub use interface::{Checker, DischargePolicy, Macaroon, Package};
pub use oracle::{check_consistency, ConsistencyReport, Inconsistency};
pub use registry::{Implementation, ImplementationId, Registry};
pub use report::{RunReport, SuiteReport, REPORT_SCHEMA_VERSION};
pub use suites::{run_suite, SuiteName};
