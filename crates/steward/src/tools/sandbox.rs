//! Workspace sandbox: path confinement and command allow-listing.
//!
//! [`SandboxPolicy`] is pure validation. It never touches file contents and
//! never runs anything; it only answers whether a path or command may be
//! used, and names the rule that was broken when it may not.
//!
//! Paths are resolved to absolute form before any check. `..` segments are
//! folded lexically and the deepest existing ancestor is canonicalized, so a
//! symlink that points outside the root is caught the same way as a literal
//! `../` escape.

use crate::error::{SandboxRule, SandboxViolation, StewardError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// What an operation intends to do with a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAccess {
    Read,
    Write,
    Delete,
}

/// Executables runnable without further configuration.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "cargo", "rustc", "rustfmt", "git", "ls", "cat", "grep", "rg", "find", "head", "tail", "wc",
    "echo", "pwd", "diff", "make", "npm", "node", "python3", "python", "go", "pytest",
];

/// Lowercased file-name patterns that mark credentials and secrets.
///
/// A pattern starting with `.` matches the whole name (`.env`), a dotted
/// prefix of it (`.env.local`) or the extension (`server.key`). Any other
/// pattern matches as a whole token of the name, delimited by the name's
/// edges or non-alphanumeric characters (`aws_credentials.json`).
pub const SENSITIVE_PATTERNS: &[&str] = &[
    ".env",
    "id_rsa",
    "id_ed25519",
    "id_ecdsa",
    ".pem",
    ".key",
    ".p12",
    "credentials",
    "secrets",
    ".npmrc",
    ".pypirc",
    ".netrc",
];

/// File names that must never be deleted or moved away.
pub const CRITICAL_FILES: &[&str] = &[
    "Cargo.toml",
    "Cargo.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "go.mod",
    "go.sum",
    "pyproject.toml",
    "requirements.txt",
    "Gemfile",
    "Gemfile.lock",
    "pom.xml",
    "build.gradle",
];

/// Version-control metadata directories. Nothing inside them may be written
/// or deleted.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

static DESTRUCTIVE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\brm\s+(?:-\S+\s+)*(?:-[A-Za-z]*[rR][A-Za-z]*|--recursive)\s+(?:-\S+\s+)*(?:/\*?|~/?|\.{1,2}/?|\*|/[^\s/]+/?)(?:\s|;|$)",
            "recursive delete of a root-level path",
        ),
        (r"--no-preserve-root", "recursive delete of /"),
        (r":\(\)\s*\{", "fork bomb"),
        (
            r"\bof=/dev/(?:sd|hd|nvme|xvd|vd|disk|mmcblk)",
            "raw device write",
        ),
        (
            r">\s*/dev/(?:sd|hd|nvme|xvd|vd|disk|mmcblk)",
            "raw device write",
        ),
        (r"\bmkfs(?:\.\w+)?\b", "filesystem format"),
        (r"\bfind\s+/\s.*-delete\b", "recursive delete of /"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("destructive pattern compiles"), label))
    .collect()
});

/// Whether the lowercased file name `name` matches sensitive `pattern`.
fn matches_sensitive(name: &str, pattern: &str) -> bool {
    if let Some(ext) = pattern.strip_prefix('.') {
        return name == pattern
            || name.starts_with(&format!("{pattern}."))
            || Path::new(name)
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(ext));
    }
    let bytes = name.as_bytes();
    let is_word = |i: usize| bytes.get(i).is_some_and(|b| b.is_ascii_alphanumeric());
    name.match_indices(pattern).any(|(start, _)| {
        let end = start + pattern.len();
        (start == 0 || !is_word(start - 1)) && !is_word(end)
    })
}

/// Tunable parts of the policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Executable names that may be run. Replaces the default list.
    pub allowed_commands: Vec<String>,
    /// Added to [`SENSITIVE_PATTERNS`].
    pub extra_sensitive_patterns: Vec<String>,
    /// Added to [`CRITICAL_FILES`].
    pub extra_critical_files: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            extra_sensitive_patterns: Vec::new(),
            extra_critical_files: Vec::new(),
        }
    }
}

/// Path and command policy for one workspace root.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    root: PathBuf,
    allowed_commands: Vec<String>,
    sensitive_patterns: Vec<String>,
    critical_files: Vec<String>,
}

impl SandboxPolicy {
    /// Build a policy rooted at `root`, which must exist.
    pub fn new(root: impl AsRef<Path>, config: &SandboxConfig) -> Result<Self, StewardError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            StewardError::workspace(format!("cannot open workspace {}: {e}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(StewardError::workspace(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }

        let sensitive_patterns = SENSITIVE_PATTERNS
            .iter()
            .map(|s| (*s).to_string())
            .chain(config.extra_sensitive_patterns.iter().map(|s| s.to_lowercase()))
            .collect();
        let critical_files = CRITICAL_FILES
            .iter()
            .map(|s| (*s).to_string())
            .chain(config.extra_critical_files.iter().cloned())
            .collect();

        Ok(Self {
            root,
            allowed_commands: config.allowed_commands.clone(),
            sensitive_patterns,
            critical_files,
        })
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` and check it against every rule for `access`.
    ///
    /// Returns the resolved absolute path to operate on.
    pub fn validate_path(&self, path: &str, access: PathAccess) -> Result<PathBuf, SandboxViolation> {
        if path.trim().is_empty() {
            return Err(SandboxViolation::new(SandboxRule::OutsideRoot, "empty path"));
        }

        let lexical = self.lexical_target(path);
        if !lexical.starts_with(&self.root) {
            return Err(SandboxViolation::new(
                SandboxRule::OutsideRoot,
                format!("{path} resolves outside the workspace"),
            ));
        }

        let resolved = resolve_existing_prefix(&lexical).map_err(|e| {
            SandboxViolation::new(SandboxRule::OutsideRoot, format!("cannot resolve {path}: {e}"))
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(SandboxViolation::new(
                SandboxRule::OutsideRoot,
                format!("{path} escapes the workspace through a symlink"),
            ));
        }

        if access == PathAccess::Read {
            return Ok(resolved);
        }

        if resolved == self.root {
            return Err(SandboxViolation::new(
                SandboxRule::WorkspaceRoot,
                "the workspace root itself cannot be modified",
            ));
        }

        let relative = resolved.strip_prefix(&self.root).unwrap_or(&resolved);
        if relative
            .components()
            .any(|c| VCS_DIRS.iter().any(|d| c.as_os_str() == *d))
        {
            return Err(SandboxViolation::new(
                SandboxRule::CriticalFile,
                format!("{} is inside version-control metadata", relative.display()),
            ));
        }

        let file_name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lowered = file_name.to_lowercase();
        if let Some(pattern) = self
            .sensitive_patterns
            .iter()
            .find(|p| matches_sensitive(&lowered, p))
        {
            return Err(SandboxViolation::new(
                SandboxRule::SensitiveFile,
                format!("{} matches sensitive pattern '{pattern}'", relative.display()),
            ));
        }

        if access == PathAccess::Delete && self.critical_files.iter().any(|c| *c == file_name) {
            return Err(SandboxViolation::new(
                SandboxRule::CriticalFile,
                format!("{} is a critical project file", relative.display()),
            ));
        }

        Ok(resolved)
    }

    /// Check an executable and its literal argument list.
    pub fn validate_command(&self, program: &str, args: &[String]) -> Result<(), SandboxViolation> {
        if program.is_empty()
            || program.starts_with('-')
            || program.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(SandboxViolation::new(
                SandboxRule::MalformedCommand,
                format!(
                    "'{program}' is not a bare executable name; pass arguments as a list"
                ),
            ));
        }

        let command_line = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some((_, label)) = DESTRUCTIVE_PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(&command_line))
        {
            return Err(SandboxViolation::new(
                SandboxRule::DestructiveCommand,
                format!("{label}: {command_line}"),
            ));
        }

        if !self.allowed_commands.iter().any(|c| c == program) {
            return Err(SandboxViolation::new(
                SandboxRule::CommandNotAllowed,
                format!(
                    "'{program}' is not on the allow-list ({})",
                    self.allowed_commands.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Absolute, lexically normalized form of `path` without touching the
    /// filesystem. Used to compare operation targets for ordering.
    pub fn lexical_target(&self, path: &str) -> PathBuf {
        let joined = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.root.join(path)
        };
        normalize_lexically(&joined)
    }

    /// Path relative to the root for display, falling back to the input.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut rest = Vec::new();
    while existing.symlink_metadata().is_err() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize()?;
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
