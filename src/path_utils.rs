//! Path normalization, project-root discovery, and the hierarchical-key regexes.
//! Mirrors `cline_utils.dependency_system.utils.path_utils`.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

lazy_static! {
    /// `^[0-9]+[A-Z][a-z0-9]*$` — a full hierarchical key.
    pub static ref HIERARCHICAL_KEY_PATTERN: Regex = Regex::new(r"^\d+[A-Z][a-z0-9]*$").unwrap();
    /// Splits a key into alternating digit-run / non-digit-run tokens for natural sort.
    pub static ref KEY_PATTERN: Regex = Regex::new(r"\d+|\D+").unwrap();
}

const ROOT_INDICATORS: &[&str] = &[
    ".git",
    ".clinerules",
    "pyproject.toml",
    "setup.py",
    "package.json",
    "Cargo.toml",
    "CMakeLists.txt",
];

/// Normalize a path: made absolute against the current directory, forward
/// slashes only, lower-cased only on case-insensitive filesystems (Windows).
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let p = Path::new(path);
    let abs: PathBuf = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    };
    let normalized = normalize_components(&abs);
    #[cfg(windows)]
    let normalized = normalized.to_lowercase();
    normalized
}

/// `normpath`-style dot-segment collapsing without touching the filesystem.
fn normalize_components(path: &Path) -> String {
    use std::path::Component;
    let mut out: Vec<String> = Vec::new();
    let mut prefix = String::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().replace('\\', "/"),
            Component::RootDir => {}
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(seg) => out.push(seg.to_string_lossy().into_owned()),
        }
    }
    let joined = out.join("/");
    if !prefix.is_empty() {
        format!("{prefix}/{joined}")
    } else {
        format!("/{joined}")
    }
}

/// Classify a path's file type by extension, used by the analyzer dispatcher
/// and the embedding preprocessor. Mirrors `get_file_type`/`get_file_type_for_key`.
pub fn get_file_type(file_path: &str) -> &'static str {
    let ext = Path::new(file_path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "py",
        "js" | "ts" | "jsx" | "tsx" => "js",
        "md" | "rst" => "md",
        "html" | "htm" => "html",
        "css" => "css",
        _ => "generic",
    }
}

/// Walk upward from the current directory looking for a root indicator file.
/// Falls back to the current directory if none is found.
pub fn get_project_root() -> PathBuf {
    let mut current = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    loop {
        for indicator in ROOT_INDICATORS {
            if current.join(indicator).exists() {
                return current;
            }
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => break,
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// True if `path` lies inside (or equals) `parent_path` after normalization.
pub fn is_subpath(path: &str, parent_path: &str) -> bool {
    let norm_path = normalize_path(path);
    let norm_parent = normalize_path(parent_path);
    if !norm_path.starts_with(&norm_parent) {
        return false;
    }
    if norm_parent.ends_with('/') {
        return true;
    }
    norm_path.len() == norm_parent.len() || norm_path[norm_parent.len()..].starts_with('/')
}

/// Glob-lite exclusion check: `*` in a pattern becomes a substring regex wildcard,
/// otherwise it's treated as a path prefix.
pub fn is_path_excluded(path: &str, excluded_paths: &[String]) -> bool {
    if excluded_paths.is_empty() {
        return false;
    }
    let norm_path = normalize_path(path);
    for excluded in excluded_paths {
        if excluded.contains('*') {
            let pattern = regex::escape(excluded).replace(r"\*", ".*");
            if let Ok(re) = Regex::new(&pattern) {
                if re.is_match(&norm_path) {
                    return true;
                }
            }
        } else {
            let norm_excluded = normalize_path(excluded);
            if norm_path == norm_excluded || norm_path.starts_with(&norm_excluded) {
                return true;
            }
        }
    }
    false
}

/// Split a hierarchical key into numeric/non-numeric runs for natural ordering.
pub fn sort_key_tokens(key: &str) -> Vec<SortToken> {
    KEY_PATTERN
        .find_iter(key)
        .map(|m| match m.as_str().parse::<u64>() {
            Ok(n) => SortToken::Num(n),
            Err(_) => SortToken::Str(m.as_str().to_string()),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortToken {
    Num(u64),
    Str(String),
}

/// Natural-order sort of hierarchical keys (`sort_keys` in the original).
pub fn sort_keys(keys: &mut [String]) {
    keys.sort_by(|a, b| sort_key_tokens(a).cmp(&sort_key_tokens(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_sort_matches_boundary_case() {
        let mut keys = vec![
            "2Ab10".to_string(),
            "1A".to_string(),
            "2Ab2".to_string(),
            "2Aa".to_string(),
        ];
        sort_keys(&mut keys);
        assert_eq!(keys, vec!["1A", "2Aa", "2Ab2", "2Ab10"]);
    }

    #[test]
    fn subpath_requires_separator_boundary() {
        assert!(is_subpath("/a/b/c", "/a/b"));
        assert!(!is_subpath("/a/bc", "/a/b"));
        assert!(is_subpath("/a/b", "/a/b"));
    }

    #[test]
    fn file_type_classification() {
        assert_eq!(get_file_type("foo.py"), "py");
        assert_eq!(get_file_type("foo.tsx"), "js");
        assert_eq!(get_file_type("README.rst"), "md");
        assert_eq!(get_file_type("index.html"), "html");
        assert_eq!(get_file_type("style.css"), "css");
        assert_eq!(get_file_type("data.bin"), "generic");
    }
}
