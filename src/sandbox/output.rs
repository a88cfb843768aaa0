use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Destination of everything a script prints
pub trait ScriptOutput: Send + Sync {
    fn write_line(&self, stream: Stream, line: &str);

    /// Raw text, no newline appended
    fn write(&self, stream: Stream, text: &str);

    /// Clear the terminal, if there is one
    fn clear(&self);
}

/// Writes to the process's stdout and stderr
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl ScriptOutput for ConsoleOutput {
    fn write_line(&self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "{line}");
                let _ = stdout.flush();
            }
            Stream::Stderr => {
                let mut stderr = std::io::stderr().lock();
                let _ = writeln!(stderr, "{line}");
            }
        }
    }

    fn write(&self, stream: Stream, text: &str) {
        match stream {
            Stream::Stdout => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            Stream::Stderr => {
                let _ = std::io::stderr().lock().write_all(text.as_bytes());
            }
        }
    }

    fn clear(&self) {
        let _ = execute!(std::io::stdout(), Clear(ClearType::All), MoveTo(0, 0));
    }
}

/// Keeps output in memory
#[derive(Debug, Default)]
pub struct CapturedOutput {
    lines: Mutex<Vec<(Stream, String)>>,
    clears: Mutex<usize>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self, stream: Stream) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn stdout(&self) -> Vec<String> {
        self.lines(Stream::Stdout)
    }

    pub fn stderr(&self) -> Vec<String> {
        self.lines(Stream::Stderr)
    }

    pub fn clear_count(&self) -> usize {
        *self.clears.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ScriptOutput for CapturedOutput {
    fn write_line(&self, stream: Stream, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((stream, line.to_string()));
    }

    fn write(&self, stream: Stream, text: &str) {
        self.write_line(stream, text.strip_suffix('\n').unwrap_or(text));
    }

    fn clear(&self) {
        *self.clears.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}
