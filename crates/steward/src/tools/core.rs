//! Argument checking, logging, and result shaping shared by every operation.

use tracing::{debug, info, trace};

/// Maximum size (in bytes) for an operation result before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Check raw JSON arguments against a tool's parameter schema.
///
/// Returns `Err` with one line per schema violation. An unusable schema
/// skips validation.
pub fn validate_arguments(
    tool_name: &str,
    schema: &serde_json::Value,
    arguments: &str,
) -> Result<serde_json::Value, String> {
    let args_value: serde_json::Value = serde_json::from_str(arguments).map_err(|e| {
        format!(
            "invalid JSON arguments for '{tool_name}': {e}. \
             Provide valid JSON matching the parameter schema."
        )
    })?;

    let Ok(validator) = jsonschema::validator_for(schema) else {
        return Ok(args_value);
    };

    let errors: Vec<String> = validator
        .iter_errors(&args_value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(args_value)
    } else {
        Err(format!(
            "argument validation failed for '{tool_name}':\n{}",
            errors.join("\n")
        ))
    }
}

/// Deserialize an already-validated argument value into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| format!("invalid arguments: {e}"))
}

/// Log an operation request at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[op] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[op] {name} full args ({} bytes)", arguments.len());
    trace!("[op] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes, cutting on a character
/// boundary, and append a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let total = s.len();
    let mut out = s;
    out.truncate(cut);
    out.push_str(&format!("...\n[truncated: {total} bytes total]"));
    out
}
