//! Structured results returned by the isolated runtime.
//!
//! An `ExecReport` is regenerated fresh for every attempt and never merged
//! across attempts. The runtime owns how the signals are produced; this
//! crate only defines the contract and aggregates it into gate results.

use serde::{Deserialize, Serialize};

/// Raw signals collected from one isolated execution of patched content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecReport {
    /// Whether the patched content compiled / type-checked at all.
    pub compiled: bool,
    /// Style violations, one human-readable line each.
    #[serde(default)]
    pub lint_errors: Vec<String>,
    /// Type errors, one human-readable line each.
    #[serde(default)]
    pub type_errors: Vec<String>,
    #[serde(default)]
    pub test: TestReport,
    #[serde(default)]
    pub security: SecurityReport,
}

/// Test outcome counts plus failure details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    /// One entry per failing test, already formatted for humans.
    #[serde(default)]
    pub details: Vec<String>,
}

/// Security policy violations found in the patched content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    #[serde(default)]
    pub violations: Vec<String>,
}
