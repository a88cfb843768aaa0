//! Fenced code block extraction for Markdown scripts

use crate::source::error::SourceError;
use regex::Regex;

/// Language tags whose fenced blocks are executed
const JAVASCRIPT_TAGS: &[&str] = &["js", "javascript", "mjs", "cjs", "rustle"];
const TYPESCRIPT_TAGS: &[&str] = &["ts", "typescript", "mts"];

/// Executable code pulled out of a Markdown document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkdownCode {
    pub code: String,
    pub block_count: usize,
    pub has_typescript: bool,
}

pub struct MarkdownExtractor {
    fence_regex: Regex,
}

impl MarkdownExtractor {
    pub fn new() -> Result<Self, SourceError> {
        Ok(Self {
            fence_regex: Regex::new(
                r"(?m)^[ \t]*```[ \t]*([A-Za-z0-9_+.\-]*)[^\n]*\n((?s:.*?))^[ \t]*```[ \t]*\r?$",
            )?,
        })
    }

    /// Concatenate every recognized block in document order, separated by a blank line.
    ///
    /// A document without matching blocks yields empty code.
    pub fn extract(&self, markdown: &str) -> MarkdownCode {
        let mut blocks = Vec::new();
        let mut has_typescript = false;

        for captures in self.fence_regex.captures_iter(markdown) {
            let tag = captures
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();

            let is_typescript = TYPESCRIPT_TAGS.contains(&tag.as_str());
            if !is_typescript && !JAVASCRIPT_TAGS.contains(&tag.as_str()) {
                continue;
            }
            has_typescript |= is_typescript;

            let body = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
            let body = body.strip_suffix('\n').unwrap_or(body);
            let body = body.strip_suffix('\r').unwrap_or(body);
            blocks.push(body.to_string());
        }

        MarkdownCode {
            block_count: blocks.len(),
            code: blocks.join("\n\n"),
            has_typescript,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_blocks_in_order() {
        let extractor = MarkdownExtractor::new().unwrap();
        let doc = "# Title\n\n```js\nlog.info(1)\n```\n\nprose\n\n```javascript\nlog.info(2)\n```\n";
        let extracted = extractor.extract(doc);
        assert_eq!(extracted.code, "log.info(1)\n\nlog.info(2)");
        assert_eq!(extracted.block_count, 2);
        assert!(!extracted.has_typescript);
    }

    #[test]
    fn test_skips_unrecognized_languages() {
        let extractor = MarkdownExtractor::new().unwrap();
        let doc = "```bash\necho hi\n```\n```ts\nconst x: number = 1;\n```\n";
        let extracted = extractor.extract(doc);
        assert_eq!(extracted.code, "const x: number = 1;");
        assert!(extracted.has_typescript);
    }

    #[test]
    fn test_no_blocks_is_empty() {
        let extractor = MarkdownExtractor::new().unwrap();
        let extracted = extractor.extract("just prose\n\n    indented code\n");
        assert_eq!(extracted, MarkdownCode::default());
    }

    #[test]
    fn test_unterminated_fence_is_ignored() {
        let extractor = MarkdownExtractor::new().unwrap();
        let extracted = extractor.extract("```js\nlog.info(1)\n");
        assert_eq!(extracted.block_count, 0);
    }
}
