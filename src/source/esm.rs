//! Lowering of ES module syntax into calls on the sandbox module shim.
//!
//! Static `import` declarations become `await __import(...)` bindings, `export`
//! forms become assignments on the enclosing `exports` object, and dynamic
//! `import()` calls are routed to `__import`. The rewrite is line-oriented and
//! keeps the line count of every replaced statement so stack traces stay close
//! to the original source.

use crate::source::error::SourceError;
use regex::{Captures, Regex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredSource {
    pub code: String,
    /// Whether any static import/export statement was rewritten
    pub module_syntax: bool,
}

pub struct EsmLowering {
    import_from: Regex,
    import_bare: Regex,
    export_star: Regex,
    export_list: Regex,
    export_default: Regex,
    export_default_decl: Regex,
    export_decl: Regex,
    export_pattern_decl: Regex,
    dynamic_import: Regex,
    import_meta: Regex,
}

const MODULE_STRING: &str = r#"(?:"([^"\n]+)"|'([^'\n]+)')"#;

impl EsmLowering {
    pub fn new() -> Result<Self, SourceError> {
        Ok(Self {
            import_from: Regex::new(&format!(
                r"(?m)^([ \t]*)import\s+((?:[\w$]+\s*,\s*)?(?:\*\s*as\s+[\w$]+|\{{[^}}]*\}}|[\w$]+))\s*from\s*{MODULE_STRING}[ \t]*;?"
            ))?,
            import_bare: Regex::new(&format!(
                r"(?m)^([ \t]*)import\s*{MODULE_STRING}[ \t]*;?"
            ))?,
            export_star: Regex::new(&format!(
                r"(?m)^([ \t]*)export\s*\*\s*(?:as\s+([\w$]+)\s+)?from\s*{MODULE_STRING}[ \t]*;?"
            ))?,
            export_list: Regex::new(&format!(
                r"(?m)^([ \t]*)export\s*\{{([^}}]*)\}}(?:\s*from\s*{MODULE_STRING})?[ \t]*;?"
            ))?,
            export_default: Regex::new(r"(?m)^([ \t]*)export\s+default\s+")?,
            export_default_decl: Regex::new(
                r"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function(?:\s*\*\s*|\s+)|class\s+)([\w$]+)",
            )?,
            export_decl: Regex::new(
                r"(?m)^([ \t]*)export\s+((?:async\s+)?function(?:\s*\*)?|class|const|let|var)\s*([\w$]+)",
            )?,
            export_pattern_decl: Regex::new(r"(?m)^([ \t]*)export\s+(const|let|var)\s*([\{\[])")?,
            dynamic_import: Regex::new(r"(^|[^\w$.])import\s*\(")?,
            import_meta: Regex::new(r"(^|[^\w$.])import\.meta\b")?,
        })
    }

    pub fn lower(&self, code: &str) -> LoweredSource {
        let mut temp_counter = 0usize;
        let mut exported: Vec<(String, String)> = Vec::new();
        let mut module_syntax = false;

        let code = self.import_from.replace_all(code, |caps: &Captures| {
            module_syntax = true;
            let indent = &caps[1];
            let specifier = module_specifier(caps, 3);
            temp_counter += 1;
            let temp = format!("__module_{temp_counter}");
            let statement = lower_import_clause(&caps[2], &import_expr(&specifier), &temp);
            preserve_lines(&caps[0], format!("{indent}{statement}"))
        });

        let code = self.import_bare.replace_all(&code, |caps: &Captures| {
            module_syntax = true;
            let specifier = module_specifier(caps, 2);
            preserve_lines(
                &caps[0],
                format!("{}{};", &caps[1], import_expr(&specifier)),
            )
        });

        let code = self.export_star.replace_all(&code, |caps: &Captures| {
            module_syntax = true;
            let specifier = module_specifier(caps, 3);
            let statement = match caps.get(2) {
                Some(alias) => format!("exports.{} = {};", alias.as_str(), import_expr(&specifier)),
                None => {
                    temp_counter += 1;
                    let temp = format!("__star_{temp_counter}");
                    format!(
                        "{{ const {temp} = {}; for (const __key of Object.keys({temp})) if (__key !== \"default\") exports[__key] = {temp}[__key]; }}",
                        import_expr(&specifier)
                    )
                }
            };
            preserve_lines(&caps[0], format!("{}{statement}", &caps[1]))
        });

        let code = self.lower_exports(&code, &mut temp_counter, &mut exported, &mut module_syntax);

        let code = self.export_pattern_decl.replace_all(&code, |caps: &Captures| {
            module_syntax = true;
            format!("{}{} {}", &caps[1], &caps[2], &caps[3])
        });

        let code = self.dynamic_import.replace_all(&code, "${1}__import(");
        let code = self.import_meta.replace_all(&code, "${1}__meta");

        let mut code = code.into_owned();
        if !exported.is_empty() {
            code.push('\n');
            let trailer: Vec<String> = exported
                .iter()
                .map(|(local, name)| format!("exports.{name} = {local};"))
                .collect();
            code.push_str(&trailer.join(" "));
        }

        LoweredSource {
            code,
            module_syntax,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ExportForm {
    DefaultDecl,
    Default,
    List,
    Decl,
}

impl EsmLowering {
    /// Rewrite `export` lists, declarations and defaults in a single pass so the
    /// trailer assigns exported names in source order
    fn lower_exports(
        &self,
        code: &str,
        temp_counter: &mut usize,
        exported: &mut Vec<(String, String)>,
        module_syntax: &mut bool,
    ) -> String {
        let mut found: Vec<(usize, ExportForm, Captures<'_>)> = Vec::new();
        let forms = [
            (ExportForm::DefaultDecl, &self.export_default_decl),
            (ExportForm::Default, &self.export_default),
            (ExportForm::List, &self.export_list),
            (ExportForm::Decl, &self.export_decl),
        ];
        for (form, regex) in forms {
            for caps in regex.captures_iter(code) {
                let start = caps.get(0).map_or(0, |m| m.start());
                found.push((start, form, caps));
            }
        }
        found.sort_by_key(|(start, form, _)| (*start, *form));

        let mut out = String::with_capacity(code.len());
        let mut cursor = 0;
        for (start, form, caps) in found {
            if start < cursor {
                continue;
            }
            let end = caps.get(0).map_or(start, |m| m.end());
            let replacement = match form {
                ExportForm::DefaultDecl => {
                    let name = &caps[3];
                    // `export default class extends Base` has no binding name
                    if name == "extends" {
                        continue;
                    }
                    exported.push((name.to_string(), "default".to_string()));
                    format!("{}{}{name}", &caps[1], &caps[2])
                }
                ExportForm::Default => format!("{}exports.default = ", &caps[1]),
                ExportForm::List => {
                    let bindings = parse_export_bindings(&caps[2]);
                    let statement = if caps.get(3).is_some() || caps.get(4).is_some() {
                        let specifier = module_specifier(&caps, 3);
                        *temp_counter += 1;
                        let temp = format!("__reexport_{temp_counter}");
                        let assignments: Vec<String> = bindings
                            .iter()
                            .map(|(local, name)| format!("exports.{name} = {temp}.{local};"))
                            .collect();
                        format!(
                            "{{ const {temp} = {}; {} }}",
                            import_expr(&specifier),
                            assignments.join(" ")
                        )
                    } else {
                        exported.extend(bindings);
                        String::new()
                    };
                    preserve_lines(&caps[0], format!("{}{statement}", &caps[1]))
                }
                ExportForm::Decl => {
                    let name = caps[3].to_string();
                    exported.push((name.clone(), name.clone()));
                    format!("{}{} {name}", &caps[1], &caps[2])
                }
            };
            *module_syntax = true;
            out.push_str(&code[cursor..start]);
            out.push_str(&replacement);
            cursor = end;
        }
        out.push_str(&code[cursor..]);
        out
    }
}

fn module_specifier(caps: &Captures, first_group: usize) -> String {
    caps.get(first_group)
        .or_else(|| caps.get(first_group + 1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn import_expr(specifier: &str) -> String {
    let quoted = serde_json::to_string(specifier).unwrap_or_else(|_| format!("\"{specifier}\""));
    format!("await __import({quoted})")
}

/// Pad a replacement with the newlines the original statement spanned
fn preserve_lines(original: &str, mut replacement: String) -> String {
    let lines = original.matches('\n').count();
    for _ in 0..lines {
        replacement.push('\n');
    }
    replacement
}

fn lower_import_clause(clause: &str, source: &str, temp: &str) -> String {
    let clause = clause.trim();

    let (default_binding, rest) = if clause.starts_with('{') || clause.starts_with('*') {
        (None, clause)
    } else {
        match clause.split_once(',') {
            Some((first, rest)) => (Some(first.trim()), rest.trim()),
            None => (Some(clause), ""),
        }
    };

    let namespace = rest
        .strip_prefix('*')
        .map(|r| r.trim_start().trim_start_matches("as").trim().to_string());

    let named = rest
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .map(parse_import_bindings);

    match (default_binding, namespace, named) {
        (None, Some(ns), None) => format!("const {ns} = {source};"),
        (None, None, Some(named)) if named.is_empty() => format!("{source};"),
        (None, None, Some(named)) => format!("const {{ {} }} = {source};", named.join(", ")),
        (default_binding, namespace, named) => {
            let mut statement = format!("const {temp} = {source};");
            if let Some(name) = default_binding {
                statement.push_str(&format!(" const {name} = {temp}.default;"));
            }
            if let Some(ns) = namespace {
                statement.push_str(&format!(" const {ns} = {temp};"));
            }
            if let Some(named) = named.filter(|n| !n.is_empty()) {
                statement.push_str(&format!(" const {{ {} }} = {temp};", named.join(", ")));
            }
            statement
        }
    }
}

/// `a, b as c` inside an import clause, as destructuring entries
fn parse_import_bindings(inner: &str) -> Vec<String> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|binding| !binding.is_empty() && !binding.starts_with("type "))
        .map(|binding| match binding.split_once(" as ") {
            Some((imported, local)) => format!("{}: {}", imported.trim(), local.trim()),
            None => binding.to_string(),
        })
        .collect()
}

/// `a, b as c` inside an export clause, as (local, exported) pairs
fn parse_export_bindings(inner: &str) -> Vec<(String, String)> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|binding| !binding.is_empty() && !binding.starts_with("type "))
        .map(|binding| match binding.split_once(" as ") {
            Some((local, exported)) => (local.trim().to_string(), exported.trim().to_string()),
            None => (binding.to_string(), binding.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(code: &str) -> LoweredSource {
        EsmLowering::new().unwrap().lower(code)
    }

    #[test]
    fn test_default_and_named_imports() {
        let lowered = lower("import chalk, { red as r, blue } from 'chalk';\nr('x');");
        assert!(lowered.module_syntax);
        assert_eq!(
            lowered.code,
            "const __module_1 = await __import(\"chalk\"); const chalk = __module_1.default; const { red: r, blue } = __module_1;\nr('x');"
        );
    }

    #[test]
    fn test_namespace_and_side_effect_imports() {
        let lowered = lower("import * as path from \"path\";\nimport './setup.js';");
        assert_eq!(
            lowered.code,
            "const path = await __import(\"path\");\nawait __import(\"./setup.js\");"
        );
    }

    #[test]
    fn test_multiline_import_keeps_line_count() {
        let source = "import {\n  a,\n  b\n} from 'mod';\nconsole.log(a);";
        let lowered = lower(source);
        assert_eq!(
            lowered.code.matches('\n').count(),
            source.matches('\n').count()
        );
        assert!(lowered.code.starts_with("const { a, b } = await __import(\"mod\");"));
    }

    #[test]
    fn test_exports_become_assignments() {
        let lowered = lower(
            "export const answer = 42;\nexport function greet() {}\nconst hidden = 1;\nexport { hidden as visible };\nexport default answer;",
        );
        assert!(lowered.code.contains("const answer = 42;"));
        assert!(lowered.code.contains("function greet() {}"));
        assert!(lowered.code.contains("exports.default = answer;"));
        assert!(lowered
            .code
            .ends_with("exports.answer = answer; exports.greet = greet; exports.visible = hidden;"));
    }

    #[test]
    fn test_named_default_declarations_stay_bound() {
        let lowered = lower(
            "export default function add(a, b) { return a + b; }\nadd.answer = 42;",
        );
        assert!(lowered.module_syntax);
        assert!(lowered.code.starts_with("function add(a, b) { return a + b; }\nadd.answer = 42;"));
        assert!(lowered.code.ends_with("exports.default = add;"));

        let lowered = lower("export default class Widget {}\nWidget.kind = 'w';");
        assert!(lowered.code.starts_with("class Widget {}"));
        assert!(lowered.code.ends_with("exports.default = Widget;"));
    }

    #[test]
    fn test_anonymous_defaults_stay_expressions() {
        assert_eq!(
            lower("export default function () {}").code,
            "exports.default = function () {}"
        );
        assert_eq!(
            lower("export default class extends Base {}").code,
            "exports.default = class extends Base {}"
        );
        assert_eq!(
            lower("export default async function* gen() {}").code,
            "async function* gen() {}\nexports.default = gen;"
        );
    }

    #[test]
    fn test_reexports() {
        let lowered = lower("export * from './a.js';\nexport { x as y } from './b.js';");
        assert!(lowered
            .code
            .contains("{ const __star_1 = await __import(\"./a.js\"); for (const __key of Object.keys(__star_1))"));
        assert!(lowered
            .code
            .contains("{ const __reexport_2 = await __import(\"./b.js\"); exports.y = __reexport_2.x; }"));
    }

    #[test]
    fn test_dynamic_import_and_meta() {
        let lowered = lower("const m = await import('lodash');\nconsole.log(import.meta.url);");
        assert!(!lowered.module_syntax);
        assert_eq!(
            lowered.code,
            "const m = await __import('lodash');\nconsole.log(__meta.url);"
        );
    }

    #[test]
    fn test_plain_code_is_untouched() {
        let source = "const important = 1;\nobj.import(2);";
        let lowered = lower(source);
        assert_eq!(lowered.code, source);
        assert!(!lowered.module_syntax);
    }
}
