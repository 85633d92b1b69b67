//! Structural validators run after every file mutation.
//!
//! A validator answers one question: is the new content still structurally
//! sound for its file type? It does not compile or type-check anything.
//! Files with no matching validator always pass.

use std::path::Path;

/// Post-write structural check for one family of files.
pub trait Validator: Send + Sync {
    /// Short name recorded in mutation reports.
    fn name(&self) -> &'static str;

    fn applies_to(&self, path: &Path) -> bool;

    /// `Err` carries a human-readable reason, ideally with a line number.
    fn validate(&self, path: &Path, content: &[u8]) -> Result<(), String>;
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn as_utf8(content: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(content).map_err(|e| format!("content is not valid UTF-8: {e}"))
}

// ── JSON ───────────────────────────────────────────────────────────

pub struct JsonValidator;

impl Validator for JsonValidator {
    fn name(&self) -> &'static str {
        "json"
    }

    fn applies_to(&self, path: &Path) -> bool {
        matches!(extension(path).as_str(), "json" | "ipynb")
    }

    fn validate(&self, _path: &Path, content: &[u8]) -> Result<(), String> {
        serde_json::from_slice::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| format!("invalid JSON: {e}"))
    }
}

// ── TOML ───────────────────────────────────────────────────────────

pub struct TomlValidator;

impl Validator for TomlValidator {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn applies_to(&self, path: &Path) -> bool {
        extension(path) == "toml"
    }

    fn validate(&self, _path: &Path, content: &[u8]) -> Result<(), String> {
        let text = as_utf8(content)?;
        toml::from_str::<toml::Table>(text)
            .map(|_| ())
            .map_err(|e| format!("invalid TOML: {}", e.message()))
    }
}

// ── Brace languages ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rust,
    /// C, C++, Java, C#, Kotlin, Swift.
    CLike,
    /// JavaScript and TypeScript: backtick template strings.
    Script,
    /// Go: backtick raw strings without escapes.
    Go,
    /// CSS and SCSS: block comments only.
    Css,
}

impl Dialect {
    fn for_extension(ext: &str) -> Option<Self> {
        Some(match ext {
            "rs" => Dialect::Rust,
            "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "java" | "cs" | "kt" | "kts"
            | "swift" => Dialect::CLike,
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts" => Dialect::Script,
            "go" => Dialect::Go,
            "css" | "scss" | "less" => Dialect::Css,
            _ => return None,
        })
    }
}

/// Checks that `()`, `[]` and `{}` balance, skipping strings and comments.
pub struct DelimiterValidator;

impl Validator for DelimiterValidator {
    fn name(&self) -> &'static str {
        "delimiters"
    }

    fn applies_to(&self, path: &Path) -> bool {
        Dialect::for_extension(&extension(path)).is_some()
    }

    fn validate(&self, path: &Path, content: &[u8]) -> Result<(), String> {
        let dialect = Dialect::for_extension(&extension(path)).unwrap_or(Dialect::CLike);
        check_delimiters(as_utf8(content)?, dialect)
    }
}

/// Keywords after which `/` begins a regex literal in script dialects.
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    dialect: Dialect,
    /// Open delimiters with the line they appeared on.
    stack: Vec<(char, usize)>,
}

fn check_delimiters(src: &str, dialect: Dialect) -> Result<(), String> {
    let mut lx = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        dialect,
        stack: Vec::new(),
    };
    lx.run()
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn prev_is_ident(&self) -> bool {
        self.pos > 0
            && self
                .chars
                .get(self.pos - 1)
                .is_some_and(|c| c.is_alphanumeric() || *c == '_')
    }

    fn run(&mut self) -> Result<(), String> {
        while let Some(c) = self.peek(0) {
            match c {
                '/' if self.peek(1) == Some('/') && self.dialect != Dialect::Css => {
                    self.skip_line_comment()
                }
                '/' if self.peek(1) == Some('*') => self.skip_block_comment()?,
                '/' if self.dialect == Dialect::Script && self.regex_allowed() => {
                    if !self.try_skip_regex() {
                        self.bump();
                    }
                }
                '"' => self.skip_string('"', true)?,
                '`' if self.dialect == Dialect::Script => self.skip_string('`', true)?,
                '`' if self.dialect == Dialect::Go => self.skip_string('`', false)?,
                '\'' if self.dialect == Dialect::Rust => self.skip_rust_quote()?,
                '\'' => self.skip_string('\'', true)?,
                'r' if self.dialect == Dialect::Rust && !self.prev_is_ident() => {
                    if !self.try_skip_raw_string()? {
                        self.bump();
                    }
                }
                'b' if self.dialect == Dialect::Rust
                    && !self.prev_is_ident()
                    && self.peek(1) == Some('r') =>
                {
                    self.bump();
                    if !self.try_skip_raw_string()? {
                        self.bump();
                    }
                }
                '(' | '[' | '{' => {
                    self.stack.push((c, self.line));
                    self.bump();
                }
                ')' | ']' | '}' => {
                    let line = self.line;
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match self.stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            return Err(format!(
                                "line {line}: '{c}' does not match '{open}' opened at line {open_line}"
                            ));
                        }
                        None => return Err(format!("line {line}: unexpected '{c}'")),
                    }
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }

        match self.stack.last() {
            Some((open, line)) => Err(format!("'{open}' opened at line {line} is never closed")),
            None => Ok(()),
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), String> {
        let start = self.line;
        self.bump();
        self.bump();
        let mut depth = 1;
        while depth > 0 {
            match (self.peek(0), self.peek(1)) {
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                }
                (Some('/'), Some('*')) if self.dialect == Dialect::Rust => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => {
                    return Err(format!("block comment opened at line {start} is never closed"));
                }
            }
        }
        Ok(())
    }

    fn skip_string(&mut self, quote: char, escapes: bool) -> Result<(), String> {
        let start = self.line;
        self.bump();
        loop {
            match self.bump() {
                Some('\\') if escapes => {
                    self.bump();
                }
                Some(c) if c == quote => return Ok(()),
                Some(_) => {}
                None => {
                    return Err(format!("string opened at line {start} is never closed"));
                }
            }
        }
    }

    /// Whether a `/` here starts a regex literal rather than a division:
    /// true after an operator, an opening delimiter, or a keyword such as
    /// `return`.
    fn regex_allowed(&self) -> bool {
        let before = &self.chars[..self.pos];
        let Some(end) = before.iter().rposition(|c| !c.is_whitespace()) else {
            return true;
        };
        let prev = before[end];
        if prev.is_alphanumeric() || prev == '_' || prev == '$' {
            let start = before[..=end]
                .iter()
                .rposition(|c| !(c.is_alphanumeric() || *c == '_' || *c == '$'))
                .map_or(0, |i| i + 1);
            let word: String = before[start..=end].iter().collect();
            return REGEX_KEYWORDS.contains(&word.as_str());
        }
        !matches!(prev, ')' | ']' | '"' | '\'' | '`' | '.')
    }

    /// At `/`: skip `/pattern/flags` when it closes on the same line, honoring
    /// escapes and `[...]` classes. Leaves the position untouched otherwise.
    fn try_skip_regex(&mut self) -> bool {
        let mut end = self.pos + 1;
        let mut in_class = false;
        loop {
            match self.chars.get(end) {
                None | Some('\n') => return false,
                Some('\\') => end += 2,
                Some('[') => {
                    in_class = true;
                    end += 1;
                }
                Some(']') => {
                    in_class = false;
                    end += 1;
                }
                Some('/') if !in_class => break,
                Some(_) => end += 1,
            }
        }
        if end == self.pos + 1 {
            return false;
        }
        self.pos = end + 1;
        while self.peek(0).is_some_and(|c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        true
    }

    /// `'a'`, `'\n'` and `'\u{1F600}'` are char literals; `'a` is a lifetime.
    fn skip_rust_quote(&mut self) -> Result<(), String> {
        match (self.peek(1), self.peek(2)) {
            (Some('\\'), _) => self.skip_string('\'', true),
            (Some(c), Some('\'')) if c != '\'' => {
                self.bump();
                self.bump();
                self.bump();
                Ok(())
            }
            _ => {
                self.bump();
                Ok(())
            }
        }
    }

    /// At `r`: skip `r"..."` / `r#"..."#`. Returns false if this `r` does
    /// not start a raw string.
    fn try_skip_raw_string(&mut self) -> Result<bool, String> {
        let mut hashes = 0;
        while self.peek(1 + hashes) == Some('#') {
            hashes += 1;
        }
        if self.peek(1 + hashes) != Some('"') {
            return Ok(false);
        }
        let start = self.line;
        for _ in 0..(2 + hashes) {
            self.bump();
        }
        loop {
            match self.bump() {
                Some('"') if (0..hashes).all(|i| self.peek(i) == Some('#')) => {
                    for _ in 0..hashes {
                        self.bump();
                    }
                    return Ok(true);
                }
                Some(_) => {}
                None => {
                    return Err(format!("raw string opened at line {start} is never closed"));
                }
            }
        }
    }
}

// ── Registry ───────────────────────────────────────────────────────

/// Ordered set of validators; the first that applies to a path decides.
pub struct ValidatorRegistry {
    validators: Vec<Box<dyn Validator>>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self {
            validators: vec![
                Box::new(JsonValidator),
                Box::new(TomlValidator),
                Box::new(DelimiterValidator),
            ],
        }
    }
}

impl ValidatorRegistry {
    /// A registry with no validators: every write passes.
    pub fn empty() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    /// Add a validator ahead of the built-in ones.
    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.insert(0, Box::new(validator));
        self
    }

    /// Validate `content` as the new body of `path`. Returns the name of the
    /// validator that passed, or `"none"` if no validator applies.
    pub fn validate(&self, path: &Path, content: &[u8]) -> Result<&'static str, String> {
        let Some(validator) = self.validators.iter().find(|v| v.applies_to(path)) else {
            return Ok("none");
        };
        validator.validate(path, content).map(|()| validator.name())
    }
}
