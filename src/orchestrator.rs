//! Project Orchestrator (C9): wires key generation, static analysis,
//! embeddings, suggestions, reciprocal-edge generation, hierarchical
//! module-level rollup, and tracker writes into one end-to-end pass.
//! Mirrors `cline_utils.dependency_system.analysis.project_analyzer` and
//! `io.update_main_tracker`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::analyzer::{self, FileAnalysis};
use crate::config::Config;
use crate::embeddings::{ensure_embedding, Encoder};
use crate::grid::{compress, merge_chars, PLACEHOLDER_CHAR};
use crate::key_manager::KeyMap;
use crate::path_utils::{is_subpath, normalize_path, sort_keys};
use crate::suggester::{reciprocal_char, suggest_dependencies_for_file};
use crate::tracker::{self, TrackerKind};

/// Adaptive batch size per spec.md §5: quarters under 100 items, tenths
/// under 1000, twentieths beyond that. Always at least 1.
pub fn compute_batch_size(n: usize) -> usize {
    let divisor = if n < 100 {
        4
    } else if n < 1000 {
        10
    } else {
        20
    };
    (n / divisor).max(1)
}

fn thread_pool() -> rayon::ThreadPool {
    let workers = (num_cpus() * 2).min(32).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .unwrap_or_else(|_| rayon::ThreadPoolBuilder::new().build().expect("default rayon pool"))
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Run the static analyzer over every file key in `key_map`, in parallel,
/// preserving a stable `key -> FileAnalysis` map (order doesn't matter for a
/// map, but each file is analyzed exactly once regardless of batch sizing).
pub fn analyze_all(key_map: &KeyMap) -> HashMap<String, FileAnalysis> {
    let file_keys: Vec<(String, PathBuf)> = key_map
        .entries()
        .filter(|(_, path)| !Path::new(path).is_dir())
        .map(|(k, v)| (k.to_string(), PathBuf::from(v)))
        .collect();
    let batch_size = compute_batch_size(file_keys.len());
    thread_pool().install(|| {
        file_keys
            .par_iter()
            .with_min_len(batch_size)
            .map(|(key, path)| (key.clone(), analyzer::analyze_file(path, false)))
            .collect()
    })
}

/// Ensure every tracked file has an up-to-date embedding vector, in parallel.
/// Returns the count of files (re)encoded.
pub fn generate_embeddings_all(project_root: &Path, config: &Config, encoder: &dyn Encoder, key_map: &KeyMap, force: bool) -> usize {
    let file_keys: Vec<(String, PathBuf)> = key_map
        .entries()
        .filter(|(_, path)| !Path::new(path).is_dir())
        .map(|(k, v)| (k.to_string(), PathBuf::from(v)))
        .collect();
    let batch_size = compute_batch_size(file_keys.len());
    thread_pool().install(|| {
        file_keys
            .par_iter()
            .with_min_len(batch_size)
            .filter_map(|(key, abs_path)| {
                let rel_path = abs_path.strip_prefix(project_root).ok()?.to_string_lossy().into_owned();
                ensure_embedding(project_root, config, encoder, key, abs_path, &rel_path, force).ok()
            })
            .count()
    })
}

/// Per-file suggestion graph: `source_key -> (target_key -> char)`.
pub fn compute_suggestions_all(
    project_root: &Path,
    config: &Config,
    encoder: &dyn Encoder,
    key_map: &KeyMap,
    analyses: &HashMap<String, FileAnalysis>,
) -> HashMap<String, HashMap<String, char>> {
    // Collected into a `Vec` first: `with_min_len`'s batch-size hint needs an
    // `IndexedParallelIterator`, which `HashMap`'s own `par_iter()` isn't.
    let entries: Vec<(&String, &FileAnalysis)> = analyses.iter().collect();
    let batch_size = compute_batch_size(entries.len());
    thread_pool().install(|| {
        entries
            .par_iter()
            .with_min_len(batch_size)
            .map(|(key, analysis)| {
                let suggestions = suggest_dependencies_for_file(key, analysis, key_map, project_root, config, encoder);
                ((*key).clone(), suggestions)
            })
            .collect()
    })
}

/// For every `source -> target: char` edge, add the mirrored `target ->
/// source` edge (`>`/`<` flip, everything else mirrors itself), merged by
/// priority against whatever is already there.
pub fn add_reciprocal_edges(suggestions: &mut HashMap<String, HashMap<String, char>>) {
    let additions: Vec<(String, String, char)> = suggestions
        .iter()
        .flat_map(|(source, targets)| {
            targets
                .iter()
                .map(move |(target, ch)| (target.clone(), source.clone(), reciprocal_char(*ch)))
        })
        .collect();
    for (row_key, col_key, ch) in additions {
        let row = suggestions.entry(row_key).or_default();
        row.entry(col_key)
            .and_modify(|incumbent| *incumbent = merge_chars(*incumbent, ch))
            .or_insert(ch);
    }
}

/// Module (directory) keys under the configured code roots — the rows/columns
/// of the main tracker.
pub fn main_key_filter(project_root: &Path, config: &Config, key_map: &KeyMap) -> HashMap<String, String> {
    let abs_roots: HashSet<String> = config
        .code_root_directories
        .iter()
        .map(|p| normalize_path(&project_root.join(p).to_string_lossy()))
        .collect();
    key_map
        .entries()
        .filter(|(_, path)| Path::new(path).is_dir())
        .filter(|(_, path)| abs_roots.iter().any(|root| *path == root || is_subpath(path, root)))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Keys (files and directories) under the configured documentation roots —
/// the doc tracker's scope.
pub fn doc_key_filter(project_root: &Path, config: &Config, key_map: &KeyMap) -> HashMap<String, String> {
    let abs_roots: HashSet<String> = config
        .doc_directories
        .iter()
        .map(|p| normalize_path(&project_root.join(p).to_string_lossy()))
        .collect();
    key_map
        .entries()
        .filter(|(_, path)| abs_roots.iter().any(|root| *path == root || is_subpath(path, root)))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A module's own key/path plus every key whose path is a direct child of
/// it (one level of nesting, not the full subtree) — a mini-tracker's scope.
pub fn mini_key_filter(module_path: &str, key_map: &KeyMap) -> HashMap<String, String> {
    let norm_module = normalize_path(module_path);
    key_map
        .entries()
        .filter(|(_, path)| {
            *path == norm_module
                || Path::new(path)
                    .parent()
                    .map(|p| normalize_path(&p.to_string_lossy()) == norm_module)
                    .unwrap_or(false)
        })
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Map every file path to the nearest module directory (from `module_keys`)
/// that contains it, by longest-prefix match.
fn build_file_to_module(key_map: &KeyMap, module_paths: &[&str]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (_, file_path) in key_map.entries().filter(|(_, p)| !Path::new(p).is_dir()) {
        let best = module_paths
            .iter()
            .filter(|m| is_subpath(file_path, m))
            .max_by_key(|m| m.len());
        if let Some(module) = best {
            out.insert(file_path.to_string(), module.to_string());
        }
    }
    out
}

/// Roll the per-file suggestion graph up to the module level: a foreign
/// (cross-module) file-to-file edge becomes a module-to-module edge, kept at
/// the highest priority seen for that (source module, target module) pair.
fn aggregate_to_modules(
    file_suggestions: &HashMap<String, HashMap<String, char>>,
    key_map: &KeyMap,
    module_keys: &HashMap<String, String>,
) -> HashMap<String, HashMap<String, char>> {
    let module_paths: Vec<&str> = module_keys.values().map(|s| s.as_str()).collect();
    let file_to_module: HashMap<String, String> = build_file_to_module(key_map, &module_paths);
    // path -> key, for both files and directories.
    let path_to_key: HashMap<String, String> = key_map.entries().map(|(k, v)| (v.to_string(), k.to_string())).collect();
    let module_path_to_key: HashMap<String, String> = module_keys.iter().map(|(k, v)| (v.clone(), k.clone())).collect();

    let resolve_module_key = |path: &str| -> Option<String> {
        if let Some(module_path) = file_to_module.get(path) {
            return module_path_to_key.get(module_path).cloned();
        }
        // Not a file under a tracked module: the path may already *be* a module.
        path_to_key.get(path).filter(|k| module_keys.contains_key(k.as_str())).cloned()
    };

    let mut aggregated: HashMap<String, HashMap<String, char>> = HashMap::new();
    for (source_file_key, targets) in file_suggestions {
        let Some(source_path) = key_map.path_of(source_file_key) else { continue };
        let Some(source_module_key) = resolve_module_key(source_path) else { continue };

        for (target_file_key, ch) in targets {
            if *ch == PLACEHOLDER_CHAR {
                continue;
            }
            let Some(target_path) = key_map.path_of(target_file_key) else { continue };
            let Some(target_module_key) = resolve_module_key(target_path) else { continue };
            if target_module_key == source_module_key {
                continue;
            }
            let row = aggregated.entry(source_module_key.clone()).or_default();
            row.entry(target_module_key)
                .and_modify(|incumbent| *incumbent = merge_chars(*incumbent, *ch))
                .or_insert(*ch);
        }
    }
    aggregated
}

/// Fixed-point hierarchical rollup: a parent module inherits each child's
/// foreign dependencies (never a dependency pointing back into the parent's
/// own subtree), bounded to `module_keys.len()` passes.
fn hierarchy_rollup(module_keys: &HashMap<String, String>, aggregated: &mut HashMap<String, HashMap<String, char>>) {
    let mut sorted_keys: Vec<String> = module_keys.keys().cloned().collect();
    sort_keys(&mut sorted_keys);

    let mut hierarchy: HashMap<String, Vec<String>> = HashMap::new();
    for parent in &sorted_keys {
        let parent_path = &module_keys[parent];
        for child in &sorted_keys {
            if child == parent {
                continue;
            }
            let child_path = &module_keys[child];
            let is_direct_child = child_path.starts_with(&format!("{parent_path}/"))
                && Path::new(child_path).parent().map(|p| normalize_path(&p.to_string_lossy())) == Some(parent_path.clone());
            if is_direct_child {
                hierarchy.entry(parent.clone()).or_default().push(child.clone());
            }
        }
    }

    let descendants_of = |parent: &str, hierarchy: &HashMap<String, Vec<String>>| -> HashSet<String> {
        let mut seen = HashSet::new();
        seen.insert(parent.to_string());
        let mut queue: Vec<String> = hierarchy.get(parent).cloned().unwrap_or_default();
        while let Some(child) = queue.pop() {
            if seen.insert(child.clone()) {
                queue.extend(hierarchy.get(&child).cloned().unwrap_or_default());
            }
        }
        seen
    };

    let max_passes = sorted_keys.len().max(1);
    for _ in 0..max_passes {
        let mut changed = false;
        for parent in &sorted_keys {
            let all_descendants = descendants_of(parent, &hierarchy);
            let children = hierarchy.get(parent).cloned().unwrap_or_default();
            for child in &children {
                let child_deps: Vec<(String, char)> = aggregated.get(child).map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect()).unwrap_or_default();
                for (target, ch) in child_deps {
                    if target == *parent || all_descendants.contains(&target) {
                        continue;
                    }
                    let row = aggregated.entry(parent.clone()).or_default();
                    let before = row.get(&target).copied();
                    let merged = before.map(|b| merge_chars(b, ch)).unwrap_or(ch);
                    if before != Some(merged) {
                        row.insert(target, merged);
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Compress a `target_key -> char` suggestion row against a sorted key list
/// into an RLE string ready to feed `tracker::update_tracker`'s suggestion list.
pub fn suggestions_to_triples(suggestions: &HashMap<String, HashMap<String, char>>) -> Vec<(String, String, char)> {
    let mut out = Vec::new();
    for (source, targets) in suggestions {
        for (target, ch) in targets {
            if *ch != PLACEHOLDER_CHAR {
                out.push((source.clone(), target.clone(), *ch));
            }
        }
    }
    out
}

#[allow(dead_code)]
fn placeholder_row(len: usize) -> String {
    compress(&PLACEHOLDER_CHAR.to_string().repeat(len))
}

pub struct AnalyzeReport {
    pub files_analyzed: usize,
    pub embeddings_generated: usize,
    pub main_tracker_modules: usize,
    pub doc_tracker_keys: usize,
    pub mini_trackers_written: usize,
}

/// The full pipeline: generate keys, analyze, embed, suggest, aggregate, and
/// write the doc tracker, every mini tracker, and the main tracker.
pub fn analyze_project(
    project_root: &Path,
    config: &Config,
    encoder: &dyn Encoder,
    key_map: &KeyMap,
    _force_analysis: bool,
    force_embeddings: bool,
) -> anyhow::Result<AnalyzeReport> {
    let backups_dir = project_root.join(&config.paths.backups_dir);

    let analyses = analyze_all(key_map);
    let embeddings_generated = generate_embeddings_all(project_root, config, encoder, key_map, force_embeddings);

    let mut file_suggestions = compute_suggestions_all(project_root, config, encoder, key_map, &analyses);
    add_reciprocal_edges(&mut file_suggestions);

    // Doc tracker: flat, all relevant keys in one grid.
    let doc_keys = doc_key_filter(project_root, config, key_map);
    let doc_key_list: Vec<String> = doc_keys.keys().cloned().collect();
    let doc_suggestions = suggestions_to_triples(&file_suggestions)
        .into_iter()
        .filter(|(s, t, _)| doc_keys.contains_key(s) && doc_keys.contains_key(t))
        .collect::<Vec<_>>();
    let doc_tracker_path = tracker::tracker_path(project_root, config, TrackerKind::Doc, None);
    tracker::update_tracker(&doc_tracker_path, TrackerKind::Doc, &doc_key_list, &doc_keys, &doc_suggestions, &backups_dir)?;

    // Mini trackers: one per module directory under the code roots.
    let module_keys = main_key_filter(project_root, config, key_map);
    let mut mini_trackers_written = 0;
    for (module_key, module_path) in &module_keys {
        let mini_keys = mini_key_filter(module_path, key_map);
        if mini_keys.len() <= 1 {
            continue; // nothing but the module itself: no point writing a tracker.
        }
        let mut mini_key_list: Vec<String> = mini_keys.keys().cloned().collect();
        sort_keys(&mut mini_key_list);
        let mini_suggestions = suggestions_to_triples(&file_suggestions)
            .into_iter()
            .filter(|(s, t, _)| mini_keys.contains_key(s) && mini_keys.contains_key(t))
            .collect::<Vec<_>>();
        let mini_path = tracker::tracker_path(project_root, config, TrackerKind::Mini, Some(Path::new(module_path)));
        tracker::update_tracker(&mini_path, TrackerKind::Mini, &mini_key_list, &mini_keys, &mini_suggestions, &backups_dir)?;
        mini_trackers_written += 1;
        let _ = module_key;
    }

    // Main tracker: module-level rollup of the per-file suggestion graph.
    let mut module_suggestions = aggregate_to_modules(&file_suggestions, key_map, &module_keys);
    hierarchy_rollup(&module_keys, &mut module_suggestions);
    let module_key_list: Vec<String> = module_keys.keys().cloned().collect();
    let module_triples = suggestions_to_triples(&module_suggestions);
    let main_tracker_path = tracker::tracker_path(project_root, config, TrackerKind::Main, None);
    tracker::update_tracker(&main_tracker_path, TrackerKind::Main, &module_key_list, &module_keys, &module_triples, &backups_dir)?;

    Ok(AnalyzeReport {
        files_analyzed: analyses.len(),
        embeddings_generated,
        main_tracker_modules: module_keys.len(),
        doc_tracker_keys: doc_keys.len(),
        mini_trackers_written,
    })
}
