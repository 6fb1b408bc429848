//! Regex-based Markdown extraction: inline links (filtered to relative
//! targets, same exclusion list as the original) and fenced code block
//! language tags.

use lazy_static::lazy_static;
use regex::Regex;

use super::{FileAnalysis, LanguageAnalyzer};

lazy_static! {
    static ref LINK: Regex = Regex::new(r"\[(?:[^\]]+)\]\(([^)]+)\)").unwrap();
    static ref CODE_BLOCK: Regex = Regex::new(r"(?s)```(\w+)?\n.*?```").unwrap();
}

const SKIP_PREFIXES: &[&str] = &["#", "http:", "https:", "mailto:", "tel:"];

fn is_relative(url: &str) -> bool {
    !SKIP_PREFIXES.iter().any(|p| url.starts_with(p))
}

pub struct MarkdownAnalyzer;

impl LanguageAnalyzer for MarkdownAnalyzer {
    fn analyze(&self, content: &str, file_path: &str) -> FileAnalysis {
        let mut a = FileAnalysis {
            file_path: file_path.to_string(),
            file_type: "md".to_string(),
            ..Default::default()
        };

        for caps in LINK.captures_iter(content) {
            let url = caps[1].trim();
            if is_relative(url) {
                a.links.push(url.to_string());
            }
        }
        for caps in CODE_BLOCK.captures_iter(content) {
            let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("text").to_lowercase();
            a.code_blocks.push(lang);
        }

        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_links_kept_external_links_dropped() {
        let src = "See [guide](./guide.md) and [site](https://example.com).";
        let a = MarkdownAnalyzer.analyze(src, "readme.md");
        assert_eq!(a.links, vec!["./guide.md".to_string()]);
    }

    #[test]
    fn fenced_code_blocks_capture_language_tag() {
        let src = "```rust\nfn main() {}\n```\n\n```\nplain\n```\n";
        let a = MarkdownAnalyzer.analyze(src, "readme.md");
        assert_eq!(a.code_blocks, vec!["rust".to_string(), "text".to_string()]);
    }
}
