//! Regex-based CSS extraction: `@import` rules, filtered to relative targets.

use lazy_static::lazy_static;
use regex::Regex;

use super::{FileAnalysis, ImportRef, LanguageAnalyzer};

lazy_static! {
    static ref CSS_IMPORT: Regex =
        Regex::new(r#"(?i)@import\s+(?:url\s*\(\s*)?["']?([^"')\s]+[^"')]*?)["']?(?:\s*\))?;"#).unwrap();
}

const SKIP_PREFIXES: &[&str] = &["#", "http:", "https:", "data:"];

fn is_relative(url: &str) -> bool {
    !SKIP_PREFIXES.iter().any(|p| url.starts_with(p))
}

pub struct CssAnalyzer;

impl LanguageAnalyzer for CssAnalyzer {
    fn analyze(&self, content: &str, file_path: &str) -> FileAnalysis {
        let mut a = FileAnalysis {
            file_path: file_path.to_string(),
            file_type: "css".to_string(),
            ..Default::default()
        };

        for caps in CSS_IMPORT.captures_iter(content) {
            let url = caps[1].trim();
            if is_relative(url) {
                a.imports.push(ImportRef {
                    local_name: url.rsplit('/').next().unwrap_or(url).to_string(),
                    module: url.to_string(),
                    level: 0,
                });
            }
        }

        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_relative_at_import_urls() {
        let src = "@import url('./base.css');\n@import \"./theme.css\";\n@import 'https://fonts.example.com/x.css';\n";
        let a = CssAnalyzer.analyze(src, "main.css");
        let modules: Vec<&str> = a.imports.iter().map(|i| i.module.as_str()).collect();
        assert!(modules.contains(&"./base.css"));
        assert!(modules.contains(&"./theme.css"));
        assert!(!modules.iter().any(|m| m.contains("fonts.example.com")));
    }
}
