//! Regex-based HTML extraction: `<a href>`, `<script src>`, `<img src>`,
//! and `<link rel="stylesheet" href>` resources, filtered to relative targets.

use lazy_static::lazy_static;
use regex::Regex;

use super::{FileAnalysis, LanguageAnalyzer};

lazy_static! {
    static ref A_HREF: Regex = Regex::new(r#"(?i)<a\s+(?:[^>]*?\s+)?href=(["'])(?P<url>[^"']+?)\1"#).unwrap();
    static ref SCRIPT_SRC: Regex = Regex::new(r#"(?i)<script\s+(?:[^>]*?\s+)?src=(["'])(?P<url>[^"']+?)\1"#).unwrap();
    static ref IMG_SRC: Regex = Regex::new(r#"(?i)<img\s+(?:[^>]*?\s+)?src=(["'])(?P<url>[^"']+?)\1"#).unwrap();
    static ref LINK_TAG: Regex = Regex::new(r"(?i)<link([^>]+)>").unwrap();
    static ref HREF_ATTR: Regex = Regex::new(r#"(?i)href=(["'])(?P<url>[^"']+?)\1"#).unwrap();
    static ref REL_STYLESHEET: Regex = Regex::new(r#"(?i)rel=(["'])stylesheet\1"#).unwrap();
}

const SKIP_PREFIXES: &[&str] = &["#", "http:", "https:", "mailto:", "tel:", "data:"];

fn is_relative(url: &str) -> bool {
    !SKIP_PREFIXES.iter().any(|p| url.starts_with(p))
}

pub struct HtmlAnalyzer;

impl LanguageAnalyzer for HtmlAnalyzer {
    fn analyze(&self, content: &str, file_path: &str) -> FileAnalysis {
        let mut a = FileAnalysis {
            file_path: file_path.to_string(),
            file_type: "html".to_string(),
            ..Default::default()
        };

        for caps in A_HREF.captures_iter(content) {
            let url = &caps["url"];
            if is_relative(url) {
                a.links.push(url.to_string());
            }
        }
        for caps in SCRIPT_SRC.captures_iter(content) {
            let url = &caps["url"];
            if is_relative(url) {
                a.scripts.push(url.to_string());
            }
        }
        for caps in IMG_SRC.captures_iter(content) {
            let url = &caps["url"];
            if is_relative(url) {
                a.images.push(url.to_string());
            }
        }
        for caps in LINK_TAG.captures_iter(content) {
            let tag = &caps[1];
            if let (Some(href), true) = (HREF_ATTR.captures(tag), REL_STYLESHEET.is_match(tag)) {
                let url = &href["url"];
                if is_relative(url) {
                    a.stylesheets.push(url.to_string());
                }
            }
        }

        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_relative_resources_by_category() {
        let src = r#"<a href="./page.html">x</a><script src="./app.js"></script><img src="logo.png"><link rel="stylesheet" href="./style.css">"#;
        let a = HtmlAnalyzer.analyze(src, "index.html");
        assert_eq!(a.links, vec!["./page.html".to_string()]);
        assert_eq!(a.scripts, vec!["./app.js".to_string()]);
        assert_eq!(a.images, vec!["logo.png".to_string()]);
        assert_eq!(a.stylesheets, vec!["./style.css".to_string()]);
    }

    #[test]
    fn external_and_anchor_links_are_dropped() {
        let src = r#"<a href="#top">top</a><a href="https://example.com">ext</a>"#;
        let a = HtmlAnalyzer.analyze(src, "index.html");
        assert!(a.links.is_empty());
    }
}
