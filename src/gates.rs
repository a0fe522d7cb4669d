//! Quality gate aggregation.
//!
//! Four independent checks - style, types, tests, security - are always
//! evaluated from one `ExecReport` and folded into a single result. The
//! overall verdict is the logical AND of the four gates; there is no partial
//! credit and no gate ordering at evaluation time. Ordering only matters for
//! refinement priority, where type errors outrank test failures, which
//! outrank security violations, which outrank style issues.

use crate::error::SandboxFailure;
use crate::report::ExecReport;
use crate::sandbox::{Sandbox, SandboxRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many violations the human-readable summary shows per failing gate.
const SUMMARY_VIOLATIONS_PER_GATE: usize = 3;
/// Diagnostics view limits, tuned for refinement-prompt budgets.
const DIAGNOSTIC_STYLE_LIMIT: usize = 10;
const DIAGNOSTIC_TYPE_LIMIT: usize = 10;
const DIAGNOSTIC_TEST_LIMIT: usize = 5;
const DIAGNOSTIC_SECURITY_LIMIT: usize = 5;

/// Per-gate pass flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePass {
    pub style: bool,
    pub types: bool,
    pub tests: bool,
    pub security: bool,
}

impl GatePass {
    pub fn all(&self) -> bool {
        self.style && self.types && self.tests && self.security
    }
}

/// Aggregated verdict for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    /// True iff all four gates passed.
    pub ok: bool,
    pub passed: GatePass,
    pub report: ExecReport,
    /// Human-readable per-gate summary.
    pub summary: String,
}

/// Evaluate the four gates from a fresh execution report.
pub fn evaluate_gates(report: ExecReport) -> GateResult {
    let passed = GatePass {
        style: report.lint_errors.is_empty(),
        types: report.compiled && report.type_errors.is_empty(),
        tests: report.test.failed == 0,
        security: report.security.violations.is_empty(),
    };
    let ok = passed.all();
    let summary = build_gate_summary(&passed, &report);
    GateResult {
        ok,
        passed,
        report,
        summary,
    }
}

/// Submit patched content to the isolated runtime and aggregate the report.
///
/// A runtime that fails to start or exceeds `timeout` is a fatal condition
/// for the attempt, surfaced as an error so the controller aborts instead of
/// refining against diagnostics that do not exist.
pub async fn run_quality_gates(
    sandbox: &dyn Sandbox,
    request: SandboxRequest,
    timeout: Duration,
) -> Result<GateResult, SandboxFailure> {
    let report = match tokio::time::timeout(timeout, sandbox.execute(request)).await {
        Ok(Ok(report)) => report,
        Ok(Err(failure)) => {
            tracing::warn!(%failure, "sandbox execution failed");
            return Err(failure);
        }
        Err(_) => {
            tracing::warn!(?timeout, "sandbox execution timed out");
            return Err(SandboxFailure::TimedOut(timeout));
        }
    };

    let result = evaluate_gates(report);
    tracing::debug!(
        ok = result.ok,
        style = result.passed.style,
        types = result.passed.types,
        tests = result.passed.tests,
        security = result.passed.security,
        "quality gates evaluated"
    );
    Ok(result)
}

/// Human-readable pass/fail summary with the first few violations per
/// failing gate.
pub fn build_gate_summary(passed: &GatePass, report: &ExecReport) -> String {
    let mut lines = vec![
        "=== QUALITY GATES SUMMARY ===".to_string(),
        String::new(),
        format!(
            "Style:    {}",
            if passed.style {
                "PASS".to_string()
            } else {
                format!("FAIL ({} errors)", report.lint_errors.len())
            }
        ),
        format!(
            "Types:    {}",
            if passed.types {
                "PASS".to_string()
            } else {
                format!("FAIL ({} errors)", report.type_errors.len())
            }
        ),
        format!(
            "Tests:    {}",
            if passed.tests {
                "PASS".to_string()
            } else {
                format!(
                    "FAIL ({} failed, {} passed)",
                    report.test.failed, report.test.passed
                )
            }
        ),
        format!(
            "Security: {}",
            if passed.security {
                "PASS".to_string()
            } else {
                format!("FAIL ({} violations)", report.security.violations.len())
            }
        ),
        String::new(),
    ];

    let mut push_section = |title: &str, entries: &[String]| {
        if entries.is_empty() {
            return;
        }
        lines.push(format!("{title} (first {SUMMARY_VIOLATIONS_PER_GATE}):"));
        for entry in entries.iter().take(SUMMARY_VIOLATIONS_PER_GATE) {
            lines.push(format!("  - {entry}"));
        }
        lines.push(String::new());
    };

    if !passed.style {
        push_section("Style errors", &report.lint_errors);
    }
    if !passed.types {
        push_section("Type errors", &report.type_errors);
    }
    if !passed.tests {
        push_section("Test failures", &report.test.details);
    }
    if !passed.security {
        push_section("Security violations", &report.security.violations);
    }

    lines.join("\n")
}

/// Diagnostics view for refinement prompts: bounded per-gate issue lists.
pub fn format_diagnostics(report: &ExecReport) -> String {
    let sections = [
        "=== STYLE DIAGNOSTICS ===".to_string(),
        if report.lint_errors.is_empty() {
            "No style violations".to_string()
        } else {
            report
                .lint_errors
                .iter()
                .take(DIAGNOSTIC_STYLE_LIMIT)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n")
        },
        String::new(),
        "=== TYPE DIAGNOSTICS ===".to_string(),
        if report.compiled && report.type_errors.is_empty() {
            "No type errors".to_string()
        } else if report.type_errors.is_empty() {
            "Compilation failed with no detailed type errors".to_string()
        } else {
            report
                .type_errors
                .iter()
                .take(DIAGNOSTIC_TYPE_LIMIT)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n")
        },
        String::new(),
        "=== TEST DIAGNOSTICS ===".to_string(),
        if report.test.failed == 0 {
            format!("All tests passed ({} passed)", report.test.passed)
        } else {
            format!(
                "{} tests failed, {} passed\n{}",
                report.test.failed,
                report.test.passed,
                report
                    .test
                    .details
                    .iter()
                    .take(DIAGNOSTIC_TEST_LIMIT)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        },
        String::new(),
        "=== SECURITY DIAGNOSTICS ===".to_string(),
        if report.security.violations.is_empty() {
            "No security violations".to_string()
        } else {
            report
                .security
                .violations
                .iter()
                .take(DIAGNOSTIC_SECURITY_LIMIT)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n")
        },
    ];
    sections.join("\n")
}

/// Issue categories ranked for refinement priority: type errors, then test
/// failures, then security violations, then style issues.
pub fn extract_critical_errors(report: &ExecReport) -> Vec<String> {
    let mut errors = Vec::new();

    if !report.compiled || !report.type_errors.is_empty() {
        errors.push(format!(
            "Type checking failed: {}",
            report
                .type_errors
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }
    if report.test.failed > 0 {
        errors.push(format!(
            "{} tests failed: {}",
            report.test.failed,
            report
                .test
                .details
                .iter()
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }
    if !report.security.violations.is_empty() {
        errors.push(format!(
            "Security violations: {}",
            report
                .security
                .violations
                .iter()
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }
    if !report.lint_errors.is_empty() {
        errors.push(format!(
            "Style errors: {}",
            report
                .lint_errors
                .iter()
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }

    errors
}
