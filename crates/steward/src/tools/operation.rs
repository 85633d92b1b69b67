//! The closed set of operations the model may request.
//!
//! Each tool call is parsed into an [`Operation`] variant up front. From
//! there every variant answers the same questions: its fingerprint, its
//! targets for ordering, its sandbox check, and how to apply it against a
//! [`Workspace`].

use crate::ToolDef;
use crate::error::{OperationError, SandboxViolation};
use crate::tools::core::{parse_tool_args, truncate_result, validate_arguments};
use crate::tools::dag::PlannedOperation;
use crate::tools::exec::{CommandOutput, CommandRunner};
use crate::tools::mutation::{DeleteReport, MutationProtocol, MutationReport};
use crate::tools::retry_guard::OperationFingerprint;
use crate::tools::sandbox::{PathAccess, SandboxPolicy};
use crate::tools::spec::ToolSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const MOVE_FILE: &str = "move_file";
pub const DELETE_FILE: &str = "delete_file";
pub const RUN_COMMAND: &str = "run_command";

// ── Arguments ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// File path relative to the workspace root.
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// File path relative to the workspace root. Missing directories are created.
    pub path: String,
    /// The complete new content of the file.
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveFileArgs {
    /// Existing file to move, relative to the workspace root.
    pub from: String,
    /// Destination path, relative to the workspace root.
    pub to: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFileArgs {
    /// File to delete, relative to the workspace root.
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunCommandArgs {
    /// Bare executable name, e.g. "cargo". No paths, no spaces.
    pub program: String,
    /// Arguments, one list item each. Never a single shell string.
    #[serde(default)]
    pub args: Vec<String>,
}

// ── Operation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Write,
    Move,
    Delete,
    Execute,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::Execute => "execute",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read { path: String },
    Write { path: String, content: String },
    Move { from: String, to: String },
    Delete { path: String },
    Execute { program: String, args: Vec<String> },
}

/// Everything an operation needs to run.
pub struct Workspace {
    pub policy: Arc<SandboxPolicy>,
    pub mutations: MutationProtocol,
    pub runner: CommandRunner,
    pub max_result_bytes: usize,
}

/// Successful result of applying an operation.
#[derive(Debug, Clone)]
pub enum OperationOutput {
    Read { path: PathBuf, content: String },
    Mutated(MutationReport),
    Deleted(DeleteReport),
    Executed(CommandOutput),
}

impl Operation {
    /// Function definitions offered to the model.
    pub fn definitions() -> Vec<ToolDef> {
        vec![
            ToolSpec::builder(READ_FILE)
                .purpose("Read a text file from the workspace")
                .when_to_use("Before changing a file, or to inspect code, config or docs")
                .when_not_to_use("To list directories or search; use run_command with ls or rg")
                .parameters_for::<ReadFileArgs>()
                .example(r#"read_file(path="src/lib.rs")"#, "the file's text")
                .output_format("The file content, truncated if very large")
                .to_tool_def(),
            ToolSpec::builder(WRITE_FILE)
                .purpose("Create or replace a file with complete new content")
                .when_to_use("To create a file or rewrite one you have read")
                .when_not_to_use("To rename a file; use move_file")
                .parameters_for::<WriteFileArgs>()
                .example(
                    r#"write_file(path="config.json", content="{\"debug\": true}")"#,
                    "committed after the JSON parses",
                )
                .output_format(
                    "Confirmation, or a validation error; on error the file is restored unchanged",
                )
                .to_tool_def(),
            ToolSpec::builder(MOVE_FILE)
                .purpose("Move or rename a file")
                .when_to_use("To rename or relocate a file while keeping its content")
                .when_not_to_use("To copy a file; read it and write_file the copy")
                .parameters_for::<MoveFileArgs>()
                .example(r#"move_file(from="src/old.rs", to="src/new.rs")"#, "source removed")
                .output_format("Confirmation with whether the source was preserved")
                .to_tool_def(),
            ToolSpec::builder(DELETE_FILE)
                .purpose("Delete a single file; it can be restored with undo")
                .when_to_use("When a file is obsolete")
                .when_not_to_use("For directories, manifests, lockfiles or credential files")
                .parameters_for::<DeleteFileArgs>()
                .disambiguate("you want to rename a file", MOVE_FILE, "a move keeps the content")
                .output_format("Confirmation with the undo id")
                .to_tool_def(),
            ToolSpec::builder(RUN_COMMAND)
                .purpose("Run an allow-listed program in the workspace root")
                .when_to_use("To build, test, list files, or search code")
                .when_not_to_use("To edit files; use write_file")
                .parameters_for::<RunCommandArgs>()
                .example(
                    r#"run_command(program="cargo", args=["test", "--lib"])"#,
                    "stdout and stderr of the test run",
                )
                .output_format("stdout, then stderr after a [stderr] marker; non-zero exit is an error")
                .to_tool_def(),
        ]
    }

    /// Parse a tool call. Unknown tools and schema violations are input errors.
    pub fn from_call(name: &str, arguments: &str) -> Result<Self, OperationError> {
        let schema = match name {
            READ_FILE => crate::json_schema_for::<ReadFileArgs>(),
            WRITE_FILE => crate::json_schema_for::<WriteFileArgs>(),
            MOVE_FILE => crate::json_schema_for::<MoveFileArgs>(),
            DELETE_FILE => crate::json_schema_for::<DeleteFileArgs>(),
            RUN_COMMAND => crate::json_schema_for::<RunCommandArgs>(),
            other => {
                return Err(OperationError::input(format!(
                    "unknown operation '{other}'; available: {READ_FILE}, {WRITE_FILE}, \
                     {MOVE_FILE}, {DELETE_FILE}, {RUN_COMMAND}"
                )));
            }
        };
        let value = validate_arguments(name, &schema, arguments).map_err(OperationError::Input)?;

        let op = match name {
            READ_FILE => {
                let a: ReadFileArgs = parse_tool_args(value).map_err(OperationError::Input)?;
                Operation::Read { path: a.path }
            }
            WRITE_FILE => {
                let a: WriteFileArgs = parse_tool_args(value).map_err(OperationError::Input)?;
                Operation::Write {
                    path: a.path,
                    content: a.content,
                }
            }
            MOVE_FILE => {
                let a: MoveFileArgs = parse_tool_args(value).map_err(OperationError::Input)?;
                Operation::Move { from: a.from, to: a.to }
            }
            DELETE_FILE => {
                let a: DeleteFileArgs = parse_tool_args(value).map_err(OperationError::Input)?;
                Operation::Delete { path: a.path }
            }
            _ => {
                let a: RunCommandArgs = parse_tool_args(value).map_err(OperationError::Input)?;
                Operation::Execute {
                    program: a.program,
                    args: a.args,
                }
            }
        };
        Ok(op)
    }

    /// Fingerprint for a call that could not be parsed.
    pub fn invalid_fingerprint(name: &str, arguments: &str) -> OperationFingerprint {
        OperationFingerprint::new("invalid", name, arguments)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Read { .. } => OperationKind::Read,
            Operation::Write { .. } => OperationKind::Write,
            Operation::Move { .. } => OperationKind::Move,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Execute { .. } => OperationKind::Execute,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Read { .. })
    }

    /// Short description of what the operation touches.
    pub fn target_label(&self) -> String {
        match self {
            Operation::Read { path } | Operation::Write { path, .. } | Operation::Delete { path } => {
                path.clone()
            }
            Operation::Move { from, to } => format!("{from} -> {to}"),
            Operation::Execute { program, args } if args.is_empty() => program.clone(),
            Operation::Execute { program, args } => format!("{program} {}", args.join(" ")),
        }
    }

    pub fn fingerprint(&self, policy: &SandboxPolicy) -> OperationFingerprint {
        let norm = |p: &str| policy.display_path(&policy.lexical_target(p));
        let kind = self.kind().as_str();
        match self {
            Operation::Read { path } | Operation::Delete { path } => {
                OperationFingerprint::new(kind, &norm(path), "")
            }
            Operation::Write { path, content } => {
                OperationFingerprint::new(kind, &norm(path), content)
            }
            Operation::Move { from, to } => OperationFingerprint::new(kind, &norm(from), &norm(to)),
            Operation::Execute { program, args } => {
                OperationFingerprint::new(kind, program, &args.join("\u{1f}"))
            }
        }
    }

    /// Ordering facts for wave planning.
    pub fn plan(&self, policy: &SandboxPolicy) -> PlannedOperation {
        let targets = match self {
            Operation::Read { path } | Operation::Write { path, .. } | Operation::Delete { path } => {
                vec![policy.lexical_target(path)]
            }
            Operation::Move { from, to } => {
                vec![policy.lexical_target(from), policy.lexical_target(to)]
            }
            Operation::Execute { .. } => vec![],
        };
        PlannedOperation {
            targets,
            mutating: self.is_mutating(),
            exclusive: matches!(self, Operation::Execute { .. }),
            fingerprint: Some(self.fingerprint(policy)),
        }
    }

    /// Sandbox check without side effects.
    pub fn validate(&self, policy: &SandboxPolicy) -> Result<(), SandboxViolation> {
        match self {
            Operation::Read { path } => policy.validate_path(path, PathAccess::Read).map(drop),
            Operation::Write { path, .. } => policy.validate_path(path, PathAccess::Write).map(drop),
            Operation::Move { from, to } => {
                policy.validate_path(from, PathAccess::Delete)?;
                policy.validate_path(to, PathAccess::Write).map(drop)
            }
            Operation::Delete { path } => policy.validate_path(path, PathAccess::Delete).map(drop),
            Operation::Execute { program, args } => policy.validate_command(program, args),
        }
    }

    /// Execute against the workspace. Mutations go through the mutation
    /// protocol and are not interruptible; commands honor `cancel`.
    pub async fn apply(
        &self,
        ws: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<OperationOutput, OperationError> {
        match self {
            Operation::Read { path } => {
                let target = ws.policy.validate_path(path, PathAccess::Read)?;
                if target.is_dir() {
                    return Err(OperationError::input(format!(
                        "{path} is a directory; use run_command with ls to list it"
                    )));
                }
                let bytes = match tokio::fs::read(&target).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(OperationError::input(format!("{path} does not exist")));
                    }
                    Err(e) => return Err(e.into()),
                };
                let content = truncate_result(
                    String::from_utf8_lossy(&bytes).into_owned(),
                    ws.max_result_bytes,
                );
                Ok(OperationOutput::Read {
                    path: target,
                    content,
                })
            }
            Operation::Write { path, content } => ws
                .mutations
                .apply(path, content.as_bytes())
                .map(OperationOutput::Mutated),
            Operation::Move { from, to } => {
                ws.mutations.move_file(from, to).map(OperationOutput::Mutated)
            }
            Operation::Delete { path } => ws.mutations.delete(path).map(OperationOutput::Deleted),
            Operation::Execute { program, args } => {
                ws.policy.validate_command(program, args)?;
                ws.runner
                    .run(program, args, cancel)
                    .await
                    .map(OperationOutput::Executed)
            }
        }
    }
}

impl OperationOutput {
    /// Text returned to the model as the tool result.
    pub fn render(&self, policy: &SandboxPolicy, max_bytes: usize) -> String {
        let text = match self {
            OperationOutput::Read { content, .. } => content.clone(),
            OperationOutput::Mutated(r) => {
                let verb = if r.created { "Created" } else { "Updated" };
                let mut s = format!(
                    "{verb} {} ({} bytes, validation: {}). Committed.",
                    policy.display_path(&r.path),
                    r.bytes_written,
                    r.validator
                );
                if let Some(preserved) = r.source_preserved {
                    s.push_str(&format!(" Source preserved: {preserved}."));
                }
                s
            }
            OperationOutput::Deleted(r) => format!(
                "Deleted {} ({} bytes). Undo id: {}.",
                policy.display_path(&r.path),
                r.bytes,
                r.undo_id
            ),
            OperationOutput::Executed(out) => out.render(),
        };
        truncate_result(text, max_bytes)
    }

    pub fn source_preserved(&self) -> Option<bool> {
        match self {
            OperationOutput::Mutated(r) => r.source_preserved,
            _ => None,
        }
    }

    pub fn undo_id(&self) -> Option<u64> {
        match self {
            OperationOutput::Deleted(r) => Some(r.undo_id),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            OperationOutput::Executed(out) => Some(out.exit_code),
            _ => None,
        }
    }
}
