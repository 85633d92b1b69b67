//! System prompt for the coding agent.

/// Returns the coding-focused system prompt.
///
/// Kept short: the operation descriptions sent with every request carry the
/// per-tool guidance.
pub fn coding_system_prompt() -> String {
    "\
You are a coding assistant working inside a single project directory. You \
can read, write, move and delete files, and run allow-listed commands.

Guidelines:
- Read files before changing them, and write complete file contents.
- Every write is checked for structural validity. A failed check restores \
the file; fix the problem instead of repeating the same write.
- An operation reported as BLOCKED will not run again unchanged. Change \
the approach.
- Paths are relative to the project root. Nothing outside it is reachable.
- Commands take an argument list, not a shell string.
- Explain what you changed when you are done."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_mentions_the_guard() {
        let prompt = coding_system_prompt();
        assert!(prompt.contains("coding assistant"));
        assert!(prompt.contains("BLOCKED"));
    }
}
