//! Interactive read-eval-print loop over a long-lived sandbox context

use crate::runtime::error::ScriptError;
use crate::sandbox::output::{ScriptOutput, Stream};
use crate::sandbox::SandboxBackend;
use crate::source::{ScriptKind, SourcePreprocessor};
use regex::Regex;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const PROMPT: &str = "> ";
const CONTINUATION_PROMPT: &str = "... ";

const HELP: &str = "\
.clear    Clear the screen
.exit     Exit the REPL
.help     Print this help message
.load     Load and evaluate a file: .load <file>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Ctrl-C at the prompt
    Interrupted,
    /// Ctrl-D or end of input
    Eof,
}

/// Source of REPL input lines
pub trait LineReader {
    fn read_line(&mut self, prompt: &str) -> ReadOutcome;

    fn add_history(&mut self, _entry: &str) {}
}

/// Terminal input with line editing and history
pub struct EditorReader {
    editor: DefaultEditor,
}

impl EditorReader {
    pub fn new() -> Result<Self, ScriptError> {
        let editor = DefaultEditor::new()
            .map_err(|e| ScriptError::internal(format!("failed to start line editor: {e}")))?;
        Ok(Self { editor })
    }
}

impl LineReader for EditorReader {
    fn read_line(&mut self, prompt: &str) -> ReadOutcome {
        match self.editor.readline(prompt) {
            Ok(line) => ReadOutcome::Line(line),
            Err(ReadlineError::Interrupted) => ReadOutcome::Interrupted,
            Err(ReadlineError::Eof) => ReadOutcome::Eof,
            Err(e) => {
                debug!("Readline error: {}", e);
                ReadOutcome::Eof
            }
        }
    }

    fn add_history(&mut self, entry: &str) {
        let _ = self.editor.add_history_entry(entry);
    }
}

/// Replays a fixed list of lines, then reports end of input
#[derive(Debug, Default)]
pub struct ScriptedReader {
    lines: VecDeque<String>,
}

impl ScriptedReader {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl LineReader for ScriptedReader {
    fn read_line(&mut self, _prompt: &str) -> ReadOutcome {
        match self.lines.pop_front() {
            Some(line) => ReadOutcome::Line(line),
            None => ReadOutcome::Eof,
        }
    }
}

enum Control {
    Continue,
    Exit,
}

/// One interactive session. Bindings persist across inputs; a thrown error
/// is printed and the session carries on.
pub struct ReplSession<'a, B: SandboxBackend> {
    backend: &'a B,
    context: B::Context,
    preprocessor: &'a SourcePreprocessor,
    output: Arc<dyn ScriptOutput>,
    kind: ScriptKind,
    cwd: PathBuf,
    exit_code: Option<i32>,
    await_token: Regex,
    simple_declaration: Regex,
    destructuring_declaration: Regex,
}

impl<'a, B: SandboxBackend> ReplSession<'a, B> {
    pub fn new(
        backend: &'a B,
        context: B::Context,
        preprocessor: &'a SourcePreprocessor,
        output: Arc<dyn ScriptOutput>,
        typescript: bool,
    ) -> Result<Self, ScriptError> {
        let pattern = |p: &str| {
            Regex::new(p).map_err(|e| ScriptError::internal(format!("invalid REPL pattern: {e}")))
        };

        Ok(Self {
            backend,
            context,
            preprocessor,
            output,
            kind: if typescript {
                ScriptKind::Ts
            } else {
                ScriptKind::Js
            },
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            exit_code: None,
            await_token: pattern(r"\bawait\b")?,
            simple_declaration: pattern(r"(?m)(^|;)(\s*)(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=")?,
            destructuring_declaration: pattern(
                r"(?m)(^|;)(\s*)(?:const|let|var)\s*\{([^}]*)\}\s*=\s*([^;\n]+);",
            )?,
        })
    }

    /// Directory `.load` paths are resolved against
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = cwd;
        self
    }

    /// Read and evaluate until `.exit`, `process.exit` or end of input.
    /// Returns the exit code requested by the session.
    pub fn run(&mut self, reader: &mut dyn LineReader) -> Result<i32, ScriptError> {
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() {
                PROMPT
            } else {
                CONTINUATION_PROMPT
            };

            let line = match reader.read_line(prompt) {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Interrupted => {
                    if buffer.is_empty() {
                        self.output
                            .write_line(Stream::Stdout, "(To exit, press Ctrl+D or type .exit)");
                    }
                    buffer.clear();
                    continue;
                }
                ReadOutcome::Eof => break,
            };

            if buffer.is_empty() && line.trim_start().starts_with('.') {
                reader.add_history(&line);
                match self.handle_command(line.trim())? {
                    Control::Continue if self.exit_code.is_none() => continue,
                    Control::Continue | Control::Exit => break,
                }
            }

            match line.strip_suffix('\\') {
                Some(stripped) => {
                    buffer.push_str(stripped);
                    buffer.push('\n');
                    continue;
                }
                None => {
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
            }

            if needs_continuation(&buffer) {
                continue;
            }

            let input = std::mem::take(&mut buffer);
            if input.trim().is_empty() {
                continue;
            }
            reader.add_history(input.trim_end());
            let result = self.eval_input(&input);
            self.print(result);
            if self.exit_code.is_some() {
                break;
            }
        }

        Ok(self.exit_code.unwrap_or(0))
    }

    /// Evaluate one complete input, returning the display form of its value
    pub fn eval_input(&mut self, input: &str) -> Result<Option<String>, ScriptError> {
        let prepared = self
            .preprocessor
            .prepare(input, self.kind, "<repl>", false)?;
        let code = self.to_evaluable(&prepared.code);
        let outcome = self.backend.evaluate(&mut self.context, &code)?;
        if outcome.exit_code.is_some() {
            self.exit_code = outcome.exit_code;
            return Ok(None);
        }
        Ok(outcome.value)
    }

    /// Inputs using `await` run inside an async wrapper. Their top-level
    /// declarations are rewritten onto `globalThis` so they outlive it.
    fn to_evaluable(&self, code: &str) -> String {
        if !self.await_token.is_match(code) {
            return code.to_string();
        }

        let body = self.hoist_declarations(code);
        let trimmed = body.trim().trim_end_matches(';');
        if is_single_expression(trimmed) {
            format!("(async () => ({trimmed}))()")
        } else {
            format!("(async () => {{{body}\n}})()")
        }
    }

    fn hoist_declarations(&self, code: &str) -> String {
        let code = self
            .destructuring_declaration
            .replace_all(code, |caps: &regex::Captures| {
                let targets = caps[3]
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| match part.split_once(':') {
                        Some((source, local)) => {
                            format!("{}: globalThis.{}", source.trim(), local.trim())
                        }
                        None => format!("{part}: globalThis.{part}"),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}{}({{ {} }} = ({}));", &caps[1], &caps[2], targets, caps[4].trim())
            });
        self.simple_declaration
            .replace_all(&code, "${1}${2}globalThis.${3} =")
            .into_owned()
    }

    fn handle_command(&mut self, line: &str) -> Result<Control, ScriptError> {
        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        match command {
            ".exit" => return Ok(Control::Exit),
            ".help" => {
                for line in HELP.lines() {
                    self.output.write_line(Stream::Stdout, line);
                }
            }
            ".clear" => self.output.clear(),
            ".load" => {
                if argument.is_empty() {
                    self.output
                        .write_line(Stream::Stderr, "Usage: .load <file>");
                } else {
                    let path = self.cwd.join(argument);
                    let result = self.load_file(&path);
                    self.print(result);
                }
            }
            other => self.output.write_line(
                Stream::Stderr,
                &format!("Invalid REPL keyword {other}, type .help for commands"),
            ),
        }
        Ok(Control::Continue)
    }

    fn load_file(&mut self, path: &Path) -> Result<Option<String>, ScriptError> {
        let text = std::fs::read_to_string(path).map_err(|_| ScriptError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let previous = self.kind;
        if ScriptKind::from_path(path) != ScriptKind::Js {
            self.kind = ScriptKind::from_path(path);
        }
        let result = self.eval_input(&text);
        self.kind = previous;
        result
    }

    fn print(&self, result: Result<Option<String>, ScriptError>) {
        match result {
            Ok(Some(value)) => self.output.write_line(Stream::Stdout, &value),
            Ok(None) => {}
            Err(error) => {
                let message = match error.stack() {
                    Some(stack) => format!("Uncaught {stack}"),
                    None => format!("Uncaught {error}"),
                };
                self.output.write_line(Stream::Stderr, &message);
            }
        }
    }
}

/// Whether `input` has unclosed brackets, parentheses, braces or template
/// literals. Strings and comments are skipped.
pub fn needs_continuation(input: &str) -> bool {
    let mut depth: i32 = 0;
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                '\\' => {
                    chars.next();
                }
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = ' ';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }

    depth > 0 || quote == Some('`')
}

/// A lone expression that can be wrapped in parentheses and returned
fn is_single_expression(code: &str) -> bool {
    const STATEMENT_KEYWORDS: &[&str] = &[
        "const ", "let ", "var ", "if ", "if(", "for ", "for(", "while ", "while(", "function ",
        "class ", "return ", "throw ", "try ", "try{", "switch ", "do ", "do{", "{",
    ];
    !code.is_empty()
        && !code.contains(';')
        && !code.contains('\n')
        && !STATEMENT_KEYWORDS.iter().any(|k| code.starts_with(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_on_open_brackets() {
        assert!(needs_continuation("function f() {\n"));
        assert!(needs_continuation("const a = [1,\n"));
        assert!(needs_continuation("const s = `line\n"));
        assert!(!needs_continuation("const a = [1, 2];\n"));
        assert!(!needs_continuation("const s = '{';\n"));
        assert!(!needs_continuation("// {\n"));
        assert!(!needs_continuation("/* ( */ 1\n"));
    }

    #[test]
    fn test_single_expression_detection() {
        assert!(is_single_expression("await sleep(1)"));
        assert!(is_single_expression("1 + 2"));
        assert!(!is_single_expression("const x = await f()"));
        assert!(!is_single_expression("await a(); await b()"));
        assert!(!is_single_expression("{ a: 1 }"));
    }

    #[test]
    fn test_scripted_reader_ends_with_eof() {
        let mut reader = ScriptedReader::new(["1"]);
        assert_eq!(reader.read_line(PROMPT), ReadOutcome::Line("1".to_string()));
        assert_eq!(reader.read_line(PROMPT), ReadOutcome::Eof);
    }
}
