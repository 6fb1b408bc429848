//! Regex-based JavaScript/TypeScript extraction: import sources, function
//! and class declarations (including arrow-function assignment), and the
//! several `export` forms, mirroring the original tool's JS regex set.

use lazy_static::lazy_static;
use regex::Regex;

use super::{FileAnalysis, ImportRef, LanguageAnalyzer};

lazy_static! {
    static ref IMPORT: Regex = Regex::new(
        r#"import(?:["'\s]*(?:[\w*{}\n\r\s,]+)from\s*)?["']([^"']+)["']|\brequire\s*\(\s*["']([^"']+)["']\s*\)|import\s*\(\s*["']([^"']+)["']\s*\)"#
    ).unwrap();
    static ref FUNC: Regex = Regex::new(r"(?:async\s+)?function\s*\*?\s*([a-zA-Z_$][\w$]*)\s*\(").unwrap();
    static ref ARROW: Regex = Regex::new(r"(?:const|let|var)\s+([a-zA-Z_$][\w$]*)\s*=\s*(?:async\s*)?\([^)]*\)\s*=>").unwrap();
    static ref CLASS: Regex = Regex::new(r"class\s+([a-zA-Z_$][\w$]*)").unwrap();
    static ref EXPORT_FUNC: Regex = Regex::new(r"export\s+(?:async\s+)?function\s*\*?\s*([a-zA-Z_$][\w$]*)").unwrap();
    static ref EXPORT_CLASS: Regex = Regex::new(r"export\s+class\s+([a-zA-Z_$][\w$]*)").unwrap();
    static ref EXPORT_VAR: Regex = Regex::new(r"export\s+(?:const|let|var)\s+([a-zA-Z_$][\w$]*)").unwrap();
    static ref EXPORT_DEFAULT_IDENT: Regex = Regex::new(r"export\s+default\s+([a-zA-Z_$][\w$]*);").unwrap();
    static ref EXPORT_NAMED_BLOCK: Regex = Regex::new(r"export\s*\{\s*([^}]+)\s*\}").unwrap();
}

pub struct JavaScriptAnalyzer;

impl LanguageAnalyzer for JavaScriptAnalyzer {
    fn analyze(&self, content: &str, file_path: &str) -> FileAnalysis {
        let mut a = FileAnalysis {
            file_path: file_path.to_string(),
            file_type: "js".to_string(),
            ..Default::default()
        };

        for caps in IMPORT.captures_iter(content) {
            let module = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str());
            if let Some(module) = module {
                a.imports.push(ImportRef {
                    local_name: module.rsplit('/').next().unwrap_or(module).to_string(),
                    module: module.to_string(),
                    level: 0,
                });
            }
        }

        for caps in FUNC.captures_iter(content) {
            a.functions.push(caps[1].to_string());
        }
        for caps in ARROW.captures_iter(content) {
            a.functions.push(caps[1].to_string());
        }
        for caps in CLASS.captures_iter(content) {
            a.classes.push(caps[1].to_string());
        }

        for caps in EXPORT_FUNC.captures_iter(content) {
            a.exports.push(caps[1].to_string());
        }
        for caps in EXPORT_CLASS.captures_iter(content) {
            a.exports.push(caps[1].to_string());
        }
        for caps in EXPORT_VAR.captures_iter(content) {
            a.exports.push(caps[1].to_string());
        }
        for caps in EXPORT_DEFAULT_IDENT.captures_iter(content) {
            a.exports.push(caps[1].to_string());
        }
        for caps in EXPORT_NAMED_BLOCK.captures_iter(content) {
            for item in caps[1].split(',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let exported = item.split(" as ").last().unwrap_or(item).trim();
                a.exports.push(exported.to_string());
            }
        }

        a
    }
}
