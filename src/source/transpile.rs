//! TypeScript, JSX and ES module transpilation

use crate::source::error::{SourceError, TranspileError};
use crate::source::esm::EsmLowering;
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions};
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc::span::SourceType;
use oxc::transformer::{TransformOptions, Transformer};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Language level of emitted code
pub const BASELINE_TARGET: &str = "es2022";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    Js,
    Ts,
    Tsx,
}

impl Loader {
    fn source_type(self) -> SourceType {
        match self {
            Loader::Js => SourceType::mjs(),
            Loader::Ts => SourceType::ts(),
            Loader::Tsx => SourceType::tsx(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleFormat {
    /// Keep `import`/`export` statements as written
    Esm,
    /// Lower `import`/`export` onto the sandbox's `__import`/`exports` shim
    CommonjsCompatible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranspileOptions {
    pub format: ModuleFormat,
    pub target: String,
    pub loader: Loader,
    pub inline_source_map: bool,
}

impl TranspileOptions {
    pub fn for_loader(loader: Loader) -> Self {
        Self {
            format: ModuleFormat::CommonjsCompatible,
            target: BASELINE_TARGET.to_string(),
            loader,
            inline_source_map: true,
        }
    }
}

/// Source text plus options in, executable JavaScript out
pub trait Transpiler: Send + Sync {
    fn transpile(
        &self,
        code: &str,
        filename: &str,
        options: &TranspileOptions,
    ) -> Result<String, TranspileError>;
}

/// Transpiler built on the oxc parser, transformer and code generator
pub struct OxcTranspiler {
    lowering: EsmLowering,
}

impl OxcTranspiler {
    pub fn new() -> Result<Self, SourceError> {
        Ok(Self {
            lowering: EsmLowering::new()?,
        })
    }
}

impl Transpiler for OxcTranspiler {
    fn transpile(
        &self,
        code: &str,
        filename: &str,
        options: &TranspileOptions,
    ) -> Result<String, TranspileError> {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, code, options.loader.source_type()).parse();
        if parsed.panicked || !parsed.errors.is_empty() {
            let errors: Vec<String> = parsed.errors.iter().map(|e| format!("{e}")).collect();
            return Err(TranspileError::new(filename, errors.join("\n")));
        }

        let mut program = parsed.program;
        let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();

        let path = Path::new(filename);
        let transformed = Transformer::new(&allocator, path, &TransformOptions::default())
            .build_with_scoping(scoping, &mut program);
        if !transformed.errors.is_empty() {
            let errors: Vec<String> = transformed.errors.iter().map(|e| format!("{e}")).collect();
            return Err(TranspileError::new(filename, errors.join("\n")));
        }

        let codegen_options = CodegenOptions {
            source_map_path: options.inline_source_map.then(|| path.to_path_buf()),
            ..CodegenOptions::default()
        };
        let generated = Codegen::new().with_options(codegen_options).build(&program);

        let mut output = match options.format {
            ModuleFormat::CommonjsCompatible => self.lowering.lower(&generated.code).code,
            ModuleFormat::Esm => generated.code,
        };

        if let Some(map) = generated.map {
            output.push_str("\n//# sourceMappingURL=");
            output.push_str(&map.to_data_url());
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transpile(code: &str, loader: Loader) -> Result<String, TranspileError> {
        let mut options = TranspileOptions::for_loader(loader);
        options.inline_source_map = false;
        OxcTranspiler::new().unwrap().transpile(code, "test.ts", &options)
    }

    #[test]
    fn test_strips_type_annotations() {
        let output = transpile("const x: number = 1;\nconsole.log(x + 1);", Loader::Ts).unwrap();
        assert!(output.contains("const x = 1;"));
        assert!(!output.contains(": number"));
    }

    #[test]
    fn test_lowers_imports_for_commonjs_format() {
        let output = transpile("import { red } from 'chalk';\nred('x');", Loader::Js).unwrap();
        assert!(output.contains("await __import(\"chalk\")"));
        assert!(!output.contains("import {"));
    }

    #[test]
    fn test_syntax_error_names_file() {
        let error = transpile("const = ;", Loader::Ts).unwrap_err();
        assert_eq!(error.file, "test.ts");
        assert!(!error.message.is_empty());
    }

    #[test]
    fn test_inline_source_map_is_appended() {
        let options = TranspileOptions::for_loader(Loader::Ts);
        let output = OxcTranspiler::new()
            .unwrap()
            .transpile("let a: string = 'x';", "inline.ts", &options)
            .unwrap();
        assert!(output.contains("//# sourceMappingURL=data:application/json"));
    }
}
