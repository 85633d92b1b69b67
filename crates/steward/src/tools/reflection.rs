//! Structured reflection on operation failures.
//!
//! A failed operation is reported back to the model as text that names what
//! happened and what to do differently, instead of a bare error string.

use crate::error::{OperationError, SandboxRule};

/// Format a failed operation for the model.
pub fn format_operation_failure(tool_name: &str, arguments: &str, error: &OperationError) -> String {
    let mut msg = format!("Error [{}] from '{tool_name}':\n  {error}\n", error.kind());

    let suggestions = suggestions_for(error);
    if !suggestions.is_empty() {
        msg.push_str("\nHow to recover:\n");
        for suggestion in &suggestions {
            msg.push_str(&format!("  - {suggestion}\n"));
        }
    }

    let args_preview: String = arguments.chars().take(200).collect();
    msg.push_str(&format!("\nArguments used: {args_preview}"));
    if arguments.chars().count() > 200 {
        msg.push_str("...");
    }

    msg
}

fn suggestions_for(error: &OperationError) -> Vec<&'static str> {
    match error {
        OperationError::Input(text) => {
            let lower = text.to_lowercase();
            let mut out = Vec::new();
            if lower.contains("does not exist") || lower.contains("not found") {
                out.push("Check the path. Read the parent directory listing with run_command `ls` first.");
            }
            if lower.contains("json") || lower.contains("argument") {
                out.push("Send arguments as valid JSON matching the parameter schema.");
            }
            if out.is_empty() {
                out.push("Correct the arguments and try again.");
            }
            out
        }
        OperationError::Validation { .. } => vec![
            "The file was restored to its previous state; nothing was changed.",
            "Fix the structural problem named above (unbalanced delimiters, parse error) before writing again.",
        ],
        OperationError::Sandbox(v) => match v.rule {
            SandboxRule::OutsideRoot => vec!["Use a path relative to the workspace root, without `..`."],
            SandboxRule::SensitiveFile => {
                vec!["Credential and secret files cannot be modified. Leave them alone."]
            }
            SandboxRule::CriticalFile => vec![
                "Manifests, lockfiles and version-control metadata cannot be deleted or moved. Edit them in place instead.",
            ],
            SandboxRule::WorkspaceRoot => vec!["Target a file inside the workspace, not the root."],
            SandboxRule::CommandNotAllowed => {
                vec!["Use one of the allow-listed programs named above."]
            }
            SandboxRule::DestructiveCommand => {
                vec!["This command is refused outright. Do not retry it in any form."]
            }
            SandboxRule::MalformedCommand => vec![
                "Put only the executable name in `program` and every argument as a separate list item.",
            ],
        },
        OperationError::RetryExceeded(_) => vec![
            "This exact operation will not run again. Change the content, target or command.",
        ],
        OperationError::Execution(text) => {
            if text.to_lowercase().contains("timed out") {
                vec!["The command took too long. Narrow it down or run a smaller step."]
            } else {
                vec!["Read the output above, fix the cause, then run a corrected command."]
            }
        }
        OperationError::Cancelled => vec![],
        OperationError::Io(_) => vec!["Check that the path is a regular, readable file."],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxViolation;
    use std::path::PathBuf;

    #[test]
    fn validation_failure_says_nothing_changed() {
        let err = OperationError::Validation {
            path: PathBuf::from("a.json"),
            reason: "invalid JSON: EOF".into(),
            source_preserved: None,
        };
        let text = format_operation_failure("write_file", r#"{"path":"a.json"}"#, &err);
        assert!(text.contains("validation_error"));
        assert!(text.contains("restored"));
        assert!(text.contains("a.json"));
    }

    #[test]
    fn sandbox_failure_names_rule() {
        let err: OperationError = SandboxViolation::new(SandboxRule::CommandNotAllowed, "'curl'").into();
        let text = format_operation_failure("run_command", "{}", &err);
        assert!(text.contains("command not allowed"));
        assert!(text.contains("allow-listed"));
    }

    #[test]
    fn long_arguments_truncated() {
        let args = "x".repeat(500);
        let text = format_operation_failure("write_file", &args, &OperationError::input("bad"));
        assert!(text.ends_with("..."));
    }
}
