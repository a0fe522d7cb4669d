//! Prompt assembly for generation and refinement requests.
//!
//! The ops prompt asks for strict JSON conforming to the operation schema;
//! the refinement prompt replays the original task with the failing gates'
//! diagnostics and an explicit fix-priority ordering. Prompts are plain
//! strings - the generator backend owns everything past this point.

use crate::gates::{extract_critical_errors, format_diagnostics, GateResult};
use crate::generate::GenerationContext;
use crate::util::truncate;

/// Per-file excerpt budget when embedding current content into a prompt.
const MAX_FILE_EXCERPT_CHARS: usize = 20_000;
/// Budget for each repository reference example.
const MAX_EXAMPLE_CHARS: usize = 4_000;

/// Strict output contract appended to every ops prompt.
const OPS_OUTPUT_CONTRACT: &str = r#"# OUTPUT FORMAT (STRICT JSON ONLY)

Output STRICT JSON of this shape:

{ "ops": [
  { "type": "insert_after",  "path": "...", "anchor": "...", "code": "...", "occur": 1 },
  { "type": "insert_before", "path": "...", "anchor": "...", "code": "...", "occur": 1 },
  { "type": "replace_between", "path": "...", "start": "...", "end": "...", "code": "..." },
  { "type": "append_if_missing", "path": "...", "mustContain": "...", "code": "..." },
  { "type": "upsert_import", "path": "...", "spec": "...", "from": "..." }
] }

Rules:
- Copy anchors exactly from the current file content. Keep anchors short but unique.
- "occur" is 1-based and optional; it defaults to the first occurrence.
- "code" must be complete and compile-ready. No placeholders, no TODO.
- Prefer modifying existing files over creating new ones.
- No prose. No markdown. JSON ONLY."#;

/// Build the prompt for a fresh generation attempt.
pub fn build_ops_prompt(task: &str, context: &GenerationContext) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push("# TASK".to_string());
    parts.push(task.to_string());
    parts.push(String::new());

    if let Some(hints) = &context.convention_hints {
        if !hints.trim().is_empty() {
            parts.push("# REPO CONVENTIONS (MUST FOLLOW)".to_string());
            parts.push(hints.trim().to_string());
            parts.push(String::new());
        }
    }

    if !context.examples.is_empty() {
        parts.push("# EXAMPLES FROM THIS REPO (mirror these patterns)".to_string());
        for (i, example) in context.examples.iter().enumerate() {
            parts.push(format!("## Example {}:", i + 1));
            parts.push("```".to_string());
            parts.push(truncate(example, MAX_EXAMPLE_CHARS));
            parts.push("```".to_string());
        }
        parts.push(String::new());
    }

    if !context.files.is_empty() {
        parts.push("# CURRENT FILE CONTENT".to_string());
        for file in &context.files {
            parts.push(format!("## {}", file.path));
            parts.push("```".to_string());
            parts.push(truncate(&file.content, MAX_FILE_EXCERPT_CHARS));
            parts.push("```".to_string());
        }
        parts.push(String::new());
    }

    parts.push(OPS_OUTPUT_CONTRACT.to_string());
    parts.join("\n")
}

/// Build the task text for a refinement attempt from the previous attempt's
/// gate result. The generator gets the original task back, never the
/// previous diff - a refinement replaces the old attempt wholesale.
pub fn build_refinement_task(original_task: &str, gate: &GateResult) -> String {
    let critical = extract_critical_errors(&gate.report);
    let critical_section = if critical.is_empty() {
        "None recorded".to_string()
    } else {
        critical.join("\n")
    };

    format!(
        "ORIGINAL TASK:\n{original_task}\n\n\
         PREVIOUS ATTEMPT FAILED QUALITY GATES.\n\n\
         CRITICAL ISSUES TO FIX:\n{critical_section}\n\n\
         DETAILED DIAGNOSTICS:\n{diagnostics}\n\n\
         Fix these issues and re-solve the original task from scratch.\n\
         Priority order:\n\
         1. Fix type errors first\n\
         2. Fix test failures second\n\
         3. Fix security violations third\n\
         4. Fix style errors last\n\n\
         Make MINIMAL changes. Do not repeat the same mistakes.",
        diagnostics = format_diagnostics(&gate.report),
    )
}

/// Feedback task used when the previous attempt's operations could not be
/// applied at all (bad anchors, inverted markers). There are no gate
/// diagnostics in this case; the apply error is the only signal.
pub fn build_apply_failure_task(original_task: &str, error: &str) -> String {
    format!(
        "ORIGINAL TASK:\n{original_task}\n\n\
         THE PREVIOUS EDIT OPERATIONS FAILED TO APPLY:\n{error}\n\n\
         Re-read the current file content carefully and produce corrected \
         operations with anchors copied exactly from it."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::evaluate_gates;
    use crate::ops::FileSnapshot;
    use crate::report::{ExecReport, TestReport};

    #[test]
    fn ops_prompt_contains_task_and_contract() {
        let prompt = build_ops_prompt("Add logging to the handler", &GenerationContext::default());
        assert!(prompt.starts_with("# TASK"));
        assert!(prompt.contains("Add logging to the handler"));
        assert!(prompt.contains("STRICT JSON"));
        assert!(prompt.contains("upsert_import"));
    }

    #[test]
    fn ops_prompt_embeds_hints_examples_and_files() {
        let context = GenerationContext {
            convention_hints: Some("- handlers live in src/handlers/".to_string()),
            examples: vec!["export function exampleHandler() {}".to_string()],
            files: vec![FileSnapshot {
                path: "src/app.ts".to_string(),
                content: "const app = express();\n".to_string(),
            }],
        };
        let prompt = build_ops_prompt("task", &context);
        assert!(prompt.contains("REPO CONVENTIONS"));
        assert!(prompt.contains("handlers live in"));
        assert!(prompt.contains("## Example 1:"));
        assert!(prompt.contains("## src/app.ts"));
        assert!(prompt.contains("const app = express();"));
    }

    #[test]
    fn ops_prompt_truncates_oversized_files() {
        let context = GenerationContext {
            convention_hints: None,
            examples: vec![],
            files: vec![FileSnapshot {
                path: "big.ts".to_string(),
                content: "x".repeat(100_000),
            }],
        };
        let prompt = build_ops_prompt("task", &context);
        assert!(prompt.len() < 60_000);
        assert!(prompt.contains("..."));
    }

    #[test]
    fn refinement_task_carries_diagnostics_and_priorities() {
        let gate = evaluate_gates(ExecReport {
            compiled: false,
            type_errors: vec!["expected string, found number".to_string()],
            test: TestReport {
                passed: 1,
                failed: 1,
                details: vec!["test_handler failed".to_string()],
            },
            ..ExecReport::default()
        });
        let refined = build_refinement_task("original task text", &gate);
        assert!(refined.contains("ORIGINAL TASK:\noriginal task text"));
        assert!(refined.contains("expected string, found number"));
        assert!(refined.contains("test_handler failed"));
        assert!(refined.contains("1. Fix type errors first"));
        let types_pos = refined.find("Fix type errors").unwrap();
        let tests_pos = refined.find("Fix test failures").unwrap();
        assert!(types_pos < tests_pos);
    }

    #[test]
    fn apply_failure_task_names_the_error() {
        let out = build_apply_failure_task("do a thing", "anchor not found (insert_after): xyz");
        assert!(out.contains("do a thing"));
        assert!(out.contains("anchor not found (insert_after): xyz"));
    }
}
