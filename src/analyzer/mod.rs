//! Static Analyzer (C5): per-file-type reference extraction. Dispatch is by
//! extension; each language implementation is a narrow `LanguageAnalyzer`
//! behind a trait — the spec leaves *how* parsing happens out of scope, only
//! constraining *what* must come back, so these are heuristic/regex
//! extractors in the same spirit as the teacher's `SymbolExtractor` /
//! `RegexExtractor` split (`read_symbols.rs`, `symbols_regex.rs`), not full
//! language parsers.

mod css;
mod html;
mod javascript;
mod markdown;
mod python;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One decorator/annotation usage, tagged with what kind of definition it decorates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecoratorUsage {
    pub name: String,
    pub target_kind: TargetKind,
    pub target_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Function,
    Method,
    NestedFunction,
    Class,
    NestedClass,
}

/// A Python-style import: `import x as y` or `from a.b import c as d`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRef {
    /// Local binding name introduced by this import (the name call sites use).
    pub local_name: String,
    /// Dotted module path as written (e.g. `a.b`), empty for bare `import x`.
    pub module: String,
    /// Relative-import level (number of leading dots); 0 for absolute.
    pub level: u32,
}

/// The structured record every analyzer returns, matching spec.md §4.5.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: String,
    pub file_type: String,
    pub imports: Vec<ImportRef>,
    pub links: Vec<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub calls: Vec<String>,
    pub attribute_accesses: Vec<String>,
    pub inheritance: Vec<(String, String)>, // (class_name, base_name)
    pub type_references: Vec<String>,
    pub globals_defined: Vec<String>,
    pub exports: Vec<String>,
    pub code_blocks: Vec<String>, // fenced code block language tags
    pub scripts: Vec<String>,    // <script src=...>
    pub stylesheets: Vec<String>, // <link rel=stylesheet> / @import
    pub images: Vec<String>,
    pub decorators_used: Vec<DecoratorUsage>,
    pub exceptions_handled: Vec<String>,
    pub with_contexts_used: Vec<String>,
    pub size: u64,
    pub error: Option<String>,
    pub skipped: bool,
}

impl FileAnalysis {
    fn skeleton(file_path: &str, file_type: &str, size: u64) -> Self {
        FileAnalysis {
            file_path: file_path.to_string(),
            file_type: file_type.to_string(),
            size,
            ..Default::default()
        }
    }

    fn skipped(file_path: &str, file_type: &str, reason: &str) -> Self {
        FileAnalysis {
            file_path: file_path.to_string(),
            file_type: file_type.to_string(),
            skipped: true,
            error: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// Narrow per-language extraction interface; the pre-pass (exclusion,
/// binary/UTF-8 sniffing, mini-tracker filtering) happens once in
/// `analyze_file` before any implementation is consulted.
trait LanguageAnalyzer {
    fn analyze(&self, content: &str, file_path: &str) -> FileAnalysis;
}

/// Reject binary content: a NUL byte anywhere in the first 1 KiB.
fn looks_binary(bytes: &[u8]) -> bool {
    let probe_len = bytes.len().min(1024);
    memchr::memchr(0, &bytes[..probe_len]).is_some()
}

/// Full pre-pass + dispatch for a single file. `excluded` is the caller's
/// exclusion verdict (already computed by the orchestrator from config).
pub fn analyze_file(path: &Path, excluded: bool) -> FileAnalysis {
    let file_path = path.to_string_lossy().into_owned();
    let file_type = crate::path_utils::get_file_type(&file_path);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if excluded {
        return FileAnalysis::skipped(&file_path, file_type, "excluded by configuration");
    }
    if name.ends_with("_module.md") {
        return FileAnalysis::skipped(&file_path, file_type, "mini-tracker file, not analyzed");
    }

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => return FileAnalysis::skipped(&file_path, file_type, &format!("read error: {e}")),
    };
    if looks_binary(&bytes) {
        return FileAnalysis::skipped(&file_path, file_type, "binary content detected");
    }
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => return FileAnalysis::skipped(&file_path, file_type, "not valid UTF-8"),
    };
    let size = content.len() as u64;

    if file_type == "md" && file_path.to_lowercase().ends_with(".rst") {
        return FileAnalysis::skipped(&file_path, file_type, "rst parsing not implemented");
    }

    let analyzer: Box<dyn LanguageAnalyzer> = match file_type {
        "py" => Box::new(python::PythonAnalyzer),
        "js" => Box::new(javascript::JavaScriptAnalyzer),
        "md" => Box::new(markdown::MarkdownAnalyzer),
        "html" => Box::new(html::HtmlAnalyzer),
        "css" => Box::new(css::CssAnalyzer),
        _ => {
            let mut a = FileAnalysis::skeleton(&file_path, file_type, size);
            a.skipped = false;
            return a;
        }
    };
    let mut result = analyzer.analyze(&content, &file_path);
    result.size = size;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn binary_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blob.py");
        fs::write(&file, [0u8, 1, 2, 3, b'x']).unwrap();
        let result = analyze_file(&file, false);
        assert!(result.skipped);
        assert_eq!(result.error.as_deref(), Some("binary content detected"));
    }

    #[test]
    fn excluded_file_is_skipped_without_reading() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("missing_but_excluded.py");
        let result = analyze_file(&file, true);
        assert!(result.skipped);
    }

    #[test]
    fn mini_tracker_files_are_never_analyzed() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("pkg_module.md");
        fs::write(&file, "template content").unwrap();
        let result = analyze_file(&file, false);
        assert!(result.skipped);
    }

    #[test]
    fn rst_files_are_not_parsed_per_open_question_resolution() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("guide.rst");
        fs::write(&file, "Some text [link](./other.rst)").unwrap();
        let result = analyze_file(&file, false);
        assert!(result.skipped);
        assert_eq!(result.error.as_deref(), Some("rst parsing not implemented"));
    }
}
