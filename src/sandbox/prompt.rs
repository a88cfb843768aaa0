use crate::sandbox::error::HostError;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Interactive questions asked by a script
pub trait Prompter: Send + Sync {
    fn question(&self, prompt: &str, default: Option<&str>) -> Result<String, HostError>;

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, HostError> {
        let hint = if default { "Y/n" } else { "y/N" };
        let answer = self.question(&format!("{prompt} ({hint})"), None)?;
        Ok(match answer.trim().to_ascii_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }
}

/// Reads answers from the terminal with line editing
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn question(&self, prompt: &str, default: Option<&str>) -> Result<String, HostError> {
        let mut editor = DefaultEditor::new().map_err(|e| HostError::Prompt(e.to_string()))?;
        let prompt = match default {
            Some(default) => format!("{prompt} [{default}] "),
            None => format!("{prompt} "),
        };

        match editor.readline(&prompt) {
            Ok(line) if line.trim().is_empty() => Ok(default.unwrap_or_default().to_string()),
            Ok(line) => Ok(line),
            Err(ReadlineError::Interrupted) => Err(HostError::Prompt("interrupted".to_string())),
            Err(ReadlineError::Eof) => Ok(default.unwrap_or_default().to_string()),
            Err(e) => Err(HostError::Prompt(e.to_string())),
        }
    }
}

/// Answers questions from a fixed list, for non-interactive runs
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn question(&self, prompt: &str, default: Option<&str>) -> Result<String, HostError> {
        self.asked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        let answer = self
            .answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match answer {
            Some(answer) if answer.is_empty() => Ok(default.unwrap_or_default().to_string()),
            Some(answer) => Ok(answer),
            None => Ok(default.unwrap_or_default().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_answers_and_defaults() {
        let prompter = ScriptedPrompter::new(["alice", ""]);
        assert_eq!(prompter.question("Name?", None).unwrap(), "alice");
        assert_eq!(prompter.question("Port?", Some("8080")).unwrap(), "8080");
        assert_eq!(prompter.question("More?", Some("x")).unwrap(), "x");
        assert_eq!(prompter.asked(), vec!["Name?", "Port?", "More?"]);
    }

    #[test]
    fn test_confirm_parsing() {
        let prompter = ScriptedPrompter::new(["yes", "n", ""]);
        assert!(prompter.confirm("Deploy?", false).unwrap());
        assert!(!prompter.confirm("Deploy?", true).unwrap());
        assert!(prompter.confirm("Deploy?", true).unwrap());
    }
}
