use crate::source::error::SourceError;
use crate::source::markdown::MarkdownExtractor;
use crate::source::script::{ScriptKind, ScriptSource};
use crate::source::transpile::{Loader, TranspileOptions, Transpiler};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Script body after extraction and transpilation, before wrapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub code: String,
    pub transpiled: bool,
    /// Static `import`/`export` statements at the start of a line
    pub static_module_syntax: bool,
}

/// Turns raw script text into JavaScript the sandbox can evaluate
pub struct SourcePreprocessor {
    transpiler: Arc<dyn Transpiler>,
    markdown: MarkdownExtractor,
    module_token: Regex,
    static_module: Regex,
}

impl SourcePreprocessor {
    pub fn new(transpiler: Arc<dyn Transpiler>) -> Result<Self, SourceError> {
        Ok(Self {
            transpiler,
            markdown: MarkdownExtractor::new()?,
            module_token: Regex::new(r"\b(?:import|export)\b")?,
            static_module: Regex::new(r#"(?m)^[ \t]*(?:import[\s{*'"]|export[\s{*])"#)?,
        })
    }

    /// Full pipeline for an entry script: prepare, then wrap in an async entry point
    pub fn preprocess(
        &self,
        source: &ScriptSource,
        force_typescript: bool,
    ) -> Result<String, SourceError> {
        let filename = source.filename().display().to_string();
        let prepared = self.prepare(source.raw_text(), source.kind(), &filename, force_typescript)?;
        Ok(wrap_async(&prepared.code))
    }

    /// Strip the shebang, extract Markdown blocks and transpile when required
    pub fn prepare(
        &self,
        raw_text: &str,
        kind: ScriptKind,
        filename: &str,
        force_typescript: bool,
    ) -> Result<PreparedSource, SourceError> {
        let text = strip_shebang(raw_text);

        let (code, loader) = match kind {
            ScriptKind::Md => {
                let extracted = self.markdown.extract(text);
                debug!(
                    "Extracted {} code block(s) from {}",
                    extracted.block_count, filename
                );
                let loader = (extracted.has_typescript || force_typescript).then_some(Loader::Ts);
                (extracted.code, loader)
            }
            ScriptKind::Ts => (text.to_string(), Some(Loader::Ts)),
            ScriptKind::Tsx => (text.to_string(), Some(Loader::Tsx)),
            ScriptKind::Js if force_typescript => (text.to_string(), Some(Loader::Ts)),
            ScriptKind::Js => (text.to_string(), None),
        };

        let loader = match loader {
            Some(loader) => Some(loader),
            None if self.has_module_syntax(&code) => Some(Loader::Js),
            None => None,
        };

        let static_module_syntax = self.has_static_module_syntax(&code);

        match loader {
            Some(loader) => {
                debug!("Transpiling {} with {:?} loader", filename, loader);
                let options = TranspileOptions::for_loader(loader);
                let code = self.transpiler.transpile(&code, filename, &options)?;
                Ok(PreparedSource {
                    code,
                    transpiled: true,
                    static_module_syntax,
                })
            }
            None => Ok(PreparedSource {
                code,
                transpiled: false,
                static_module_syntax,
            }),
        }
    }

    /// Permissive check for ES module syntax: any `import` or `export` token
    pub fn has_module_syntax(&self, code: &str) -> bool {
        self.module_token.is_match(code)
    }

    /// Strict check: an `import` or `export` statement starting a line
    pub fn has_static_module_syntax(&self, code: &str) -> bool {
        self.static_module.is_match(code)
    }
}

/// Drop the first line when it is a `#!` interpreter line
pub fn strip_shebang(text: &str) -> &str {
    if !text.starts_with("#!") {
        return text;
    }
    match text.find('\n') {
        Some(index) => &text[index + 1..],
        None => "",
    }
}

/// Body of an immediately invoked async function, starting on line one
pub fn wrap_async(body: &str) -> String {
    format!("(async () => {{{body}\n}})()")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::error::TranspileError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTranspiler {
        calls: Mutex<Vec<Loader>>,
    }

    impl Transpiler for RecordingTranspiler {
        fn transpile(
            &self,
            code: &str,
            _filename: &str,
            options: &TranspileOptions,
        ) -> Result<String, TranspileError> {
            self.calls.lock().unwrap().push(options.loader);
            Ok(format!("/*transpiled*/{code}"))
        }
    }

    fn preprocessor() -> (Arc<RecordingTranspiler>, SourcePreprocessor) {
        let transpiler = Arc::new(RecordingTranspiler::default());
        let preprocessor = SourcePreprocessor::new(transpiler.clone()).unwrap();
        (transpiler, preprocessor)
    }

    #[test]
    fn test_strip_shebang() {
        assert_eq!(strip_shebang("#!/usr/bin/env rustle\nlog.info(1)"), "log.info(1)");
        assert_eq!(strip_shebang("log.info(1)\n#!not first"), "log.info(1)\n#!not first");
        assert_eq!(strip_shebang("#!only"), "");
    }

    #[test]
    fn test_wrap_keeps_first_line() {
        let wrapped = wrap_async("await sleep(1);\nthrow new Error('x');");
        assert_eq!(wrapped.lines().count(), 3);
        assert!(wrapped.starts_with("(async () => {await sleep(1);"));
        assert!(wrapped.ends_with("})()"));
    }

    #[test]
    fn test_plain_javascript_is_not_transpiled() {
        let (transpiler, preprocessor) = preprocessor();
        let prepared = preprocessor
            .prepare("log.info('hi')", ScriptKind::Js, "a.js", false)
            .unwrap();
        assert!(!prepared.transpiled);
        assert!(transpiler.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_module_syntax_routes_through_js_loader() {
        let (transpiler, preprocessor) = preprocessor();
        let prepared = preprocessor
            .prepare("import x from 'y';", ScriptKind::Js, "a.js", false)
            .unwrap();
        assert!(prepared.transpiled);
        assert!(prepared.static_module_syntax);
        assert_eq!(*transpiler.calls.lock().unwrap(), vec![Loader::Js]);
    }

    #[test]
    fn test_typescript_flag_and_kinds() {
        let (transpiler, preprocessor) = preprocessor();
        preprocessor.prepare("let a = 1", ScriptKind::Js, "a.js", true).unwrap();
        preprocessor.prepare("let a = 1", ScriptKind::Tsx, "a.tsx", false).unwrap();
        assert_eq!(*transpiler.calls.lock().unwrap(), vec![Loader::Ts, Loader::Tsx]);
    }

    #[test]
    fn test_markdown_with_typescript_block() {
        let (transpiler, preprocessor) = preprocessor();
        let prepared = preprocessor
            .prepare("```ts\nlet a: number = 1\n```\n", ScriptKind::Md, "a.md", false)
            .unwrap();
        assert_eq!(prepared.code, "/*transpiled*/let a: number = 1");
        assert_eq!(*transpiler.calls.lock().unwrap(), vec![Loader::Ts]);
    }
}
