//! Dependency Suggester (C7): turns static analysis + semantic similarity
//! into per-target-key suggestion characters, combined by priority. Mirrors
//! `cline_utils.dependency_system.analysis.dependency_suggester`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use aho_corasick::AhoCorasick;

use crate::analyzer::FileAnalysis;
use crate::config::{Config, Thresholds};
use crate::embeddings::{cosine_similarity, ensure_embedding, similarity_to_char, Encoder};
use crate::grid::merge_chars;
use crate::key_manager::KeyMap;
use crate::path_utils::normalize_path;

const JS_EXTENSIONS: &[&str] = &[".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs"];
const LINK_SKIP_PREFIXES: &[&str] = &["#", "mailto:", "tel:"];

/// Fold suggestions for the same target key down to one character, using the
/// grid's priority/merge rule (equal-priority `<`/`>` collapses to `x`).
pub fn combine_suggestions(suggestions: &[(String, char)]) -> HashMap<String, char> {
    let mut combined: HashMap<String, char> = HashMap::new();
    for (key, ch) in suggestions {
        combined
            .entry(key.clone())
            .and_modify(|incumbent| *incumbent = merge_chars(*incumbent, *ch))
            .or_insert(*ch);
    }
    combined
}

/// Scheme/protocol markers that make a link external rather than a path into
/// the project tree. `"://"` matches anywhere (`git://`, `ssh://`, ...);
/// `"//"` and `"data:"` only count as a scheme when anchored at position 0.
const SCHEME_PATTERNS: &[&str] = &["://", "//", "data:"];

fn scheme_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| AhoCorasick::new(SCHEME_PATTERNS).expect("static pattern set always compiles"))
}

fn has_scheme_or_external(url: &str) -> bool {
    if url.is_empty() {
        return true;
    }
    scheme_matcher()
        .find_iter(url)
        .any(|m| SCHEME_PATTERNS[m.pattern().as_usize()] == "://" || m.start() == 0)
}

fn clean_url(url: &str) -> &str {
    url.split('#').next().unwrap_or("").split('?').next().unwrap_or("")
}

/// Resolve a dotted Python module name (with relative-import `level`) to the
/// candidate absolute file paths it could refer to, filtered to paths inside
/// `project_root`.
fn convert_python_import_to_paths(module: &str, level: u32, source_dir: &Path, project_root: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if level > 0 {
        let mut base_dir = source_dir.to_path_buf();
        let mut ok = true;
        for _ in 0..level.saturating_sub(1) {
            match base_dir.parent() {
                Some(p) if p.starts_with(project_root) => base_dir = p.to_path_buf(),
                _ => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            if module.is_empty() {
                candidates.push(base_dir.join("__init__.py"));
            } else {
                let rel = module.replace('.', "/");
                let base = base_dir.join(&rel);
                candidates.push(base.with_extension("py"));
                candidates.push(base.join("__init__.py"));
            }
        }
    } else if !module.is_empty() {
        let rel = module.replace('.', "/");
        let base = project_root.join(&rel);
        candidates.push(base.with_extension("py"));
        candidates.push(base.join("__init__.py"));
    }

    candidates.retain(|p| p.starts_with(project_root));
    candidates
}

/// Map `local_name -> resolved key` for every import in `analysis`, used to
/// resolve the leading identifier of a call/attribute-access/base-class
/// expression to a tracked file.
fn build_import_map(analysis: &FileAnalysis, source_path: &Path, project_root: &Path, key_map: &KeyMap) -> HashMap<String, String> {
    let source_dir = source_path.parent().unwrap_or(project_root);
    let mut map = HashMap::new();
    for import in &analysis.imports {
        let candidates = convert_python_import_to_paths(&import.module, import.level, source_dir, project_root);
        for candidate in candidates {
            let norm = normalize_path(&candidate.to_string_lossy());
            if let Some(key) = key_map.key_of(&norm) {
                map.insert(import.local_name.clone(), key.to_string());
                break;
            }
        }
    }
    map
}

fn resolve_head(import_map: &HashMap<String, String>, expr: &str) -> Option<String> {
    let head = expr.split('.').next()?;
    import_map.get(head).cloned()
}

/// Calls ('>'), attribute accesses ('>'), and inheritance ('<') resolved
/// through the file's own import map.
fn identify_structural_dependencies(analysis: &FileAnalysis, import_map: &HashMap<String, String>, source_key: &str) -> Vec<(String, char)> {
    let mut out = Vec::new();
    for call in &analysis.calls {
        if let Some(target) = resolve_head(import_map, call) {
            if target != source_key {
                out.push((target, '>'));
            }
        }
    }
    for attr in &analysis.attribute_accesses {
        if let Some(target) = resolve_head(import_map, attr) {
            if target != source_key {
                out.push((target, '>'));
            }
        }
    }
    for (_, base) in &analysis.inheritance {
        if let Some(target) = resolve_head(import_map, base) {
            if target != source_key {
                out.push((target, '<'));
            }
        }
    }
    out
}

/// Explicit Python `import`/`from` dependencies resolved to tracked files, '>'.
fn identify_python_explicit(analysis: &FileAnalysis, source_path: &Path, project_root: &Path, key_map: &KeyMap, source_key: &str) -> Vec<(String, char)> {
    let source_dir = source_path.parent().unwrap_or(project_root);
    let mut out = Vec::new();
    for import in &analysis.imports {
        let candidates = convert_python_import_to_paths(&import.module, import.level, source_dir, project_root);
        for candidate in candidates {
            let norm = normalize_path(&candidate.to_string_lossy());
            if let Some(key) = key_map.key_of(&norm) {
                if key != source_key {
                    out.push((key.to_string(), '>'));
                }
                break;
            }
        }
    }
    out
}

/// Explicit JS/TS relative-import dependencies resolved to tracked files, '>'.
/// Bare package specifiers (`react`, `lodash`) and URLs are not project files
/// and are skipped.
fn identify_javascript_explicit(analysis: &FileAnalysis, source_path: &Path, key_map: &KeyMap, source_key: &str) -> Vec<(String, char)> {
    let source_dir = source_path.parent().unwrap_or(Path::new("."));
    let mut out = Vec::new();
    for import in &analysis.imports {
        let spec = &import.module;
        if spec.is_empty() || !(spec.starts_with('.') || spec.starts_with('/')) || spec.starts_with("http:") || spec.starts_with("https:") {
            continue;
        }
        let resolved_base = source_dir.join(spec);
        let has_extension = JS_EXTENSIONS.iter().any(|ext| spec.to_lowercase().ends_with(ext));
        let mut candidates = Vec::new();
        if has_extension {
            candidates.push(resolved_base.clone());
        } else {
            for ext in JS_EXTENSIONS {
                candidates.push(PathBuf::from(format!("{}{ext}", resolved_base.to_string_lossy())));
            }
            for ext in JS_EXTENSIONS {
                candidates.push(resolved_base.join(format!("index{ext}")));
            }
        }
        for candidate in candidates {
            let norm = normalize_path(&candidate.to_string_lossy());
            if let Some(key) = key_map.key_of(&norm) {
                if key != source_key {
                    out.push((key.to_string(), '>'));
                }
                break;
            }
        }
    }
    out
}

/// Markdown link dependencies resolved to tracked files, 'd'.
fn identify_markdown_dependencies(analysis: &FileAnalysis, source_path: &Path, key_map: &KeyMap, source_key: &str) -> Vec<(String, char)> {
    let source_dir = source_path.parent().unwrap_or(Path::new("."));
    let mut out = Vec::new();
    for link in &analysis.links {
        if link.is_empty() || link.starts_with('#') || has_scheme_or_external(link) || link.starts_with("mailto:") || link.starts_with("tel:") {
            continue;
        }
        let cleaned = clean_url(link);
        if cleaned.is_empty() {
            continue;
        }
        let resolved = source_dir.join(cleaned);
        let mut candidates = vec![resolved.clone()];
        if resolved.extension().is_none() {
            candidates.push(PathBuf::from(format!("{}.md", resolved.to_string_lossy())));
            candidates.push(PathBuf::from(format!("{}.rst", resolved.to_string_lossy())));
            candidates.push(resolved.join("index.md"));
            candidates.push(resolved.join("README.md"));
        }
        for candidate in candidates {
            let norm = normalize_path(&candidate.to_string_lossy());
            if let Some(key) = key_map.key_of(&norm) {
                if key != source_key {
                    out.push((key.to_string(), 'd'));
                }
                break;
            }
        }
    }
    out
}

/// HTML resource dependencies: scripts/same-origin links become '>', anything
/// recognizably a stylesheet or a link to another doc becomes 'd'.
fn identify_html_dependencies(analysis: &FileAnalysis, source_path: &Path, key_map: &KeyMap, source_key: &str) -> Vec<(String, char)> {
    let source_dir = source_path.parent().unwrap_or(Path::new("."));
    let mut urls: Vec<(&str, &str)> = Vec::new();
    for l in &analysis.links {
        urls.push((l.as_str(), "link"));
    }
    for s in &analysis.scripts {
        urls.push((s.as_str(), "script"));
    }
    for s in &analysis.stylesheets {
        urls.push((s.as_str(), "style"));
    }
    for i in &analysis.images {
        urls.push((i.as_str(), "image"));
    }

    let mut out = Vec::new();
    for (url, resource_type) in urls {
        if url.is_empty() || url.starts_with('#') || has_scheme_or_external(url) || url.starts_with("mailto:") || url.starts_with("tel:") {
            continue;
        }
        let cleaned = clean_url(url);
        if cleaned.is_empty() {
            continue;
        }
        let resolved = source_dir.join(cleaned);
        let norm = normalize_path(&resolved.to_string_lossy());
        if let Some(key) = key_map.key_of(&norm) {
            if key == source_key {
                continue;
            }
            let ext = resolved.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
            let dep_char = if resource_type == "style" || ext == "css" {
                'd'
            } else if resource_type == "script" || matches!(ext.as_str(), "js" | "ts" | "mjs") {
                '>'
            } else if resource_type == "link" && matches!(ext.as_str(), "html" | "htm" | "md" | "rst") {
                'd'
            } else {
                '>'
            };
            out.push((key.to_string(), dep_char));
        }
    }
    out
}

/// CSS `@import` dependencies resolved to tracked files, '>'.
fn identify_css_dependencies(analysis: &FileAnalysis, source_path: &Path, key_map: &KeyMap, source_key: &str) -> Vec<(String, char)> {
    let source_dir = source_path.parent().unwrap_or(Path::new("."));
    let mut out = Vec::new();
    for import in &analysis.imports {
        let url = &import.module;
        if url.is_empty() || url.starts_with('#') || has_scheme_or_external(url) {
            continue;
        }
        let cleaned = clean_url(url);
        if cleaned.is_empty() {
            continue;
        }
        let resolved = source_dir.join(cleaned);
        let norm = normalize_path(&resolved.to_string_lossy());
        if let Some(key) = key_map.key_of(&norm) {
            if key != source_key {
                out.push((key.to_string(), '>'));
            }
        }
    }
    out
}

/// Semantic similarity against every other tracked *file* key (directories
/// are never semantically compared), mapped to 's'/'S' via the configured
/// thresholds.
#[allow(clippy::too_many_arguments)]
pub fn suggest_semantic_dependencies(
    project_root: &Path,
    config: &Config,
    encoder: &dyn Encoder,
    key_map: &KeyMap,
    file_key: &str,
    thresholds: &Thresholds,
) -> Vec<(String, char)> {
    let Some(source_path) = key_map.path_of(file_key) else { return Vec::new() };
    let source_abs = PathBuf::from(source_path);
    if source_abs.is_dir() {
        return Vec::new();
    }
    let Ok(source_rel) = source_abs.strip_prefix(project_root) else { return Vec::new() };
    let source_rel = source_rel.to_string_lossy().into_owned();
    let Ok(source_vector) = ensure_embedding(project_root, config, encoder, file_key, &source_abs, &source_rel, false) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (other_key, other_path) in key_map.entries() {
        if other_key == file_key {
            continue;
        }
        let other_abs = PathBuf::from(other_path);
        if other_abs.is_dir() {
            continue;
        }
        let Ok(other_rel) = other_abs.strip_prefix(project_root) else { continue };
        let other_rel = other_rel.to_string_lossy().into_owned();
        let Ok(other_vector) = ensure_embedding(project_root, config, encoder, other_key, &other_abs, &other_rel, false) else {
            continue;
        };
        let similarity = cosine_similarity(&source_vector, &other_vector);
        if let Some(ch) = similarity_to_char(similarity, thresholds) {
            out.push((other_key.to_string(), ch));
        }
    }
    out
}

/// Full suggestion pipeline for one file: explicit/structural dependencies
/// (language-dependent) plus semantic similarity, combined by priority.
#[allow(clippy::too_many_arguments)]
pub fn suggest_dependencies_for_file(
    file_key: &str,
    analysis: &FileAnalysis,
    key_map: &KeyMap,
    project_root: &Path,
    config: &Config,
    encoder: &dyn Encoder,
) -> HashMap<String, char> {
    if analysis.skipped || analysis.error.is_some() {
        return HashMap::new();
    }
    let Some(source_path_str) = key_map.path_of(file_key) else { return HashMap::new() };
    let source_path = PathBuf::from(source_path_str);

    let mut suggestions = Vec::new();
    match analysis.file_type.as_str() {
        "py" => {
            suggestions.extend(identify_python_explicit(analysis, &source_path, project_root, key_map, file_key));
            let import_map = build_import_map(analysis, &source_path, project_root, key_map);
            suggestions.extend(identify_structural_dependencies(analysis, &import_map, file_key));
        }
        "js" => {
            suggestions.extend(identify_javascript_explicit(analysis, &source_path, key_map, file_key));
        }
        "md" => {
            suggestions.extend(identify_markdown_dependencies(analysis, &source_path, key_map, file_key));
        }
        "html" => {
            suggestions.extend(identify_html_dependencies(analysis, &source_path, key_map, file_key));
        }
        "css" => {
            suggestions.extend(identify_css_dependencies(analysis, &source_path, key_map, file_key));
        }
        _ => {}
    }

    suggestions.extend(suggest_semantic_dependencies(project_root, config, encoder, key_map, file_key, &config.thresholds));

    combine_suggestions(&suggestions)
}

/// Given `source > target` (or any non-`p`/`.` char), compute the reciprocal
/// cell: `>` implies the target depends back with `<`, `<` implies `>`, and
/// everything else (`x`, `d`, `s`, `S`) is its own mirror. Equal-priority
/// collisions with what's already there are merged via the usual rule.
pub fn reciprocal_char(ch: char) -> char {
    match ch {
        '>' => '<',
        '<' => '>',
        other => other,
    }
}
