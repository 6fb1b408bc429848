//! Tracker I/O (C8): parse/emit tracker files, backups, merge, remove,
//! and the update algorithm that drives per-tracker suggestion application.
//! Mirrors `cline_utils.dependency_system.io.tracker_io`.

mod export;

pub use export::{export_tracker, ExportFormat};

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::Config;
use crate::grid::{compress, decompress, Grid, DIAGONAL_CHAR, EMPTY_CHAR, PLACEHOLDER_CHAR};
use crate::path_utils::{normalize_path, sort_keys, HIERARCHICAL_KEY_PATTERN};

pub const MARKER_START: &str = "<!-- keygrid:mini-tracker:start -->";
pub const MARKER_END: &str = "<!-- keygrid:mini-tracker:end -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Main,
    Doc,
    Mini,
}

/// In-memory form of a parsed tracker file.
#[derive(Debug, Clone, Default)]
pub struct TrackerData {
    pub keys: HashMap<String, String>,
    /// Compressed row per key.
    pub grid: HashMap<String, String>,
    pub last_key_edit: String,
    pub last_grid_edit: String,
}

lazy_static! {
    static ref KEY_SECTION: Regex =
        Regex::new(r"(?s)---KEY_DEFINITIONS_START---\n(.*?)\n---KEY_DEFINITIONS_END---").unwrap();
    static ref GRID_SECTION: Regex = Regex::new(r"(?s)---GRID_START---\n(.*?)\n---GRID_END---").unwrap();
    static ref KEY_DEF_LINE: Regex = Regex::new(r"^([a-zA-Z0-9]+)\s*:\s*(.*)$").unwrap();
    static ref GRID_ROW_LINE: Regex = Regex::new(r"^([a-zA-Z0-9]+)\s*=\s*(.*)$").unwrap();
    static ref LAST_KEY_EDIT: Regex = Regex::new(r"(?mi)^last_KEY_edit\s*:\s*(.*)$").unwrap();
    static ref LAST_GRID_EDIT: Regex = Regex::new(r"(?mi)^last_GRID_edit\s*:\s*(.*)$").unwrap();
}

fn valid_key(k: &str) -> bool {
    HIERARCHICAL_KEY_PATTERN.is_match(k)
}

pub fn tracker_path(project_root: &Path, config: &Config, kind: TrackerKind, module_path: Option<&Path>) -> PathBuf {
    match kind {
        TrackerKind::Main => project_root.join(&config.paths.memory_dir).join(&config.paths.main_tracker_filename),
        TrackerKind::Doc => project_root.join(&config.paths.memory_dir).join(&config.paths.doc_tracker_filename),
        TrackerKind::Mini => {
            let module_path = module_path.expect("mini tracker requires a module path");
            let module_name = module_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            module_path.join(format!("{module_name}_module.md"))
        }
    }
}

/// Tolerant parse: malformed lines are skipped, a missing file returns an
/// empty structure rather than an error.
pub fn read_tracker_file(path: &Path) -> TrackerData {
    let Ok(content) = std::fs::read_to_string(path) else {
        return TrackerData::default();
    };

    let mut keys = HashMap::new();
    if let Some(caps) = KEY_SECTION.captures(&content) {
        for line in caps[1].lines() {
            let line = line.trim();
            if line.is_empty() || line.to_lowercase().starts_with("key definitions:") {
                continue;
            }
            if let Some(m) = KEY_DEF_LINE.captures(line) {
                let k = m[1].to_string();
                if valid_key(&k) {
                    keys.insert(k, normalize_path(m[2].trim()));
                } else {
                    eprintln!("[keygrid] WARN: skipping invalid key format in {}: '{k}'", path.display());
                }
            }
        }
    }

    let mut grid = HashMap::new();
    if let Some(caps) = GRID_SECTION.captures(&content) {
        let mut lines: Vec<&str> = caps[1].lines().collect();
        if let Some(first) = lines.first() {
            let t = first.trim();
            if t.to_uppercase().starts_with("X ") || t == "X" {
                lines.remove(0);
            }
        }
        for line in lines {
            let line = line.trim();
            if let Some(m) = GRID_ROW_LINE.captures(line) {
                let k = m[1].to_string();
                if valid_key(&k) {
                    grid.insert(k, m[2].trim().to_string());
                } else {
                    eprintln!("[keygrid] WARN: grid row key '{k}' in {} has invalid format, skipping", path.display());
                }
            }
        }
    }

    let last_key_edit = LAST_KEY_EDIT.captures(&content).map(|c| c[1].trim().to_string()).unwrap_or_default();
    let last_grid_edit = LAST_GRID_EDIT.captures(&content).map(|c| c[1].trim().to_string()).unwrap_or_default();

    TrackerData { keys, grid, last_key_edit, last_grid_edit }
}

/// Everything outside the mini-tracker marker pair, verbatim. Returns the
/// default header template when the file doesn't exist yet or has no markers.
fn split_mini_envelope(content: &str, module_name: &str) -> (String, String) {
    match (content.find(MARKER_START), content.find(MARKER_END)) {
        (Some(s), Some(e)) if e > s => {
            let pre = content[..s + MARKER_START.len()].to_string();
            let post = content[e..].to_string();
            (pre, post)
        }
        _ => (
            format!("# {module_name} Module Dependency Tracker\n\n{MARKER_START}"),
            MARKER_END.to_string(),
        ),
    }
}

/// Write tracker data to disk: sorts keys, rebuilds/validates the grid,
/// writes atomically (temp file + rename). `mini_envelope` supplies the
/// verbatim pre/post content for mini trackers; `None` for main/doc.
pub fn write_tracker_file(
    path: &Path,
    keys: &HashMap<String, String>,
    grid: &HashMap<String, String>,
    last_key_edit: &str,
    last_grid_edit: &str,
    mini_envelope: Option<(&str, &str)>,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut sorted_keys: Vec<String> = keys.keys().cloned().collect();
    sort_keys(&mut sorted_keys);

    let final_grid = rebuild_grid_rows(&sorted_keys, grid);
    let built = Grid::from_rows(sorted_keys.clone(), final_grid.clone());
    if let Err(e) = built.validate() {
        anyhow::bail!("aborting write to {}: grid validation failed: {e}", path.display());
    }

    let mut body = String::new();
    body.push_str("---KEY_DEFINITIONS_START---\n");
    body.push_str("Key Definitions:\n");
    for key in &sorted_keys {
        body.push_str(&format!("{key}: {}\n", normalize_path(&keys[key])));
    }
    body.push_str("---KEY_DEFINITIONS_END---\n\n");
    body.push_str(&format!("last_KEY_edit: {last_key_edit}\n"));
    body.push_str(&format!("last_GRID_edit: {last_grid_edit}\n\n"));
    body.push_str("---GRID_START---\n");
    if sorted_keys.is_empty() {
        body.push_str("X \n");
    } else {
        body.push_str(&format!("X {}\n", sorted_keys.join(" ")));
        for key in &sorted_keys {
            body.push_str(&format!("{key} = {}\n", final_grid.get(key).map(|s| s.as_str()).unwrap_or("")));
        }
    }
    body.push_str("---GRID_END---\n");

    let content = match mini_envelope {
        Some((pre, post)) => format!("{pre}\n\n{body}\n{post}\n"),
        None => body,
    };

    // Hold an exclusive flock on a sibling lock file for the duration of the
    // temp-write-then-rename so two concurrent `keygrid` runs can't
    // interleave writes to the same tracker.
    let lock_path = path.with_extension("lock");
    let lock_file = OpenOptions::new().create(true).write(true).open(&lock_path)?;
    lock_file.lock_exclusive()?;

    let tmp_path = path.with_extension("tmp-write");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    lock_file.unlock()?;
    Ok(())
}

/// Rebuild each row to the expected size, carrying over valid existing rows
/// and re-initializing (placeholder + correct diagonal) anything missing,
/// wrong-length, or undecodable.
fn rebuild_grid_rows(sorted_keys: &[String], grid: &HashMap<String, String>) -> HashMap<String, String> {
    let n = sorted_keys.len();
    let key_to_idx: HashMap<&str, usize> = sorted_keys.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
    let mut out = HashMap::with_capacity(n);
    for key in sorted_keys {
        let row_list = grid
            .get(key)
            .and_then(|compressed| {
                let decompressed = decompress(compressed);
                if decompressed.chars().count() == n {
                    Some(decompressed.chars().collect::<Vec<char>>())
                } else {
                    None
                }
            })
            .unwrap_or_else(|| {
                let mut row = vec![PLACEHOLDER_CHAR; n];
                if let Some(&idx) = key_to_idx.get(key.as_str()) {
                    row[idx] = DIAGONAL_CHAR;
                }
                row
            });
        out.insert(key.clone(), compress(&row_list.into_iter().collect::<String>()));
    }
    out
}

/// Timestamped backup, keeping only the two most recent per tracker basename.
pub fn backup_tracker_file(path: &Path, backups_dir: &Path) -> anyhow::Result<PathBuf> {
    if !path.exists() {
        anyhow::bail!("tracker file not found for backup: {}", path.display());
    }
    std::fs::create_dir_all(backups_dir)?;

    let base_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();
    let backup_name = format!("{base_name}.{timestamp}.bak");
    let backup_path = backups_dir.join(&backup_name);
    std::fs::copy(path, &backup_path)?;

    prune_backups(backups_dir, &base_name)?;
    Ok(backup_path)
}

fn prune_backups(backups_dir: &Path, base_name: &str) -> anyhow::Result<()> {
    let prefix = format!("{base_name}.");
    let mut backups: Vec<(chrono::NaiveDateTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(backups_dir)?.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(rest) = name.strip_prefix(&prefix) {
            if let Some(ts_str) = rest.strip_suffix(".bak") {
                if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(ts_str, "%Y%m%d_%H%M%S_%6f") {
                    backups.push((ts, entry.path()));
                }
            }
        }
    }
    backups.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in backups.into_iter().skip(2) {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}

/// Union of two trackers' key definitions (primary wins on path conflicts)
/// and a cell-by-cell grid merge (placeholder loses; primary wins otherwise).
/// Distinct from `apply_suggestions`, which only ever fills placeholders.
pub fn merge_trackers(primary_path: &Path, secondary_path: &Path, output_path: &Path, backups_dir: &Path) -> anyhow::Result<TrackerData> {
    if output_path == primary_path && primary_path.exists() {
        backup_tracker_file(primary_path, backups_dir)?;
    } else if output_path == secondary_path && secondary_path.exists() {
        backup_tracker_file(secondary_path, backups_dir)?;
    }

    let primary = read_tracker_file(primary_path);
    let secondary = read_tracker_file(secondary_path);

    if primary.keys.is_empty() && secondary.keys.is_empty() {
        anyhow::bail!("both trackers are empty or unreadable, nothing to merge");
    }
    if primary.keys.is_empty() {
        write_tracker_file(output_path, &secondary.keys, &secondary.grid, &secondary.last_key_edit, &secondary.last_grid_edit, None)?;
        return Ok(secondary);
    }
    if secondary.keys.is_empty() {
        write_tracker_file(output_path, &primary.keys, &primary.grid, &primary.last_key_edit, &primary.last_grid_edit, None)?;
        return Ok(primary);
    }

    let mut merged_keys = secondary.keys.clone();
    for (k, v) in &primary.keys {
        merged_keys.insert(k.clone(), v.clone());
    }
    let mut merged_keys_list: Vec<String> = merged_keys.keys().cloned().collect();
    sort_keys(&mut merged_keys_list);

    let mut primary_keys_list: Vec<String> = primary.keys.keys().cloned().collect();
    sort_keys(&mut primary_keys_list);
    let mut secondary_keys_list: Vec<String> = secondary.keys.keys().cloned().collect();
    sort_keys(&mut secondary_keys_list);

    let merged_grid = merge_grids(&primary.grid, &secondary.grid, &primary_keys_list, &secondary_keys_list, &merged_keys_list);

    let last_grid_edit = format!(
        "Merged from {} and {} on {}",
        primary_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        secondary_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        chrono::Local::now().to_rfc3339(),
    );
    let last_key_edit = if !primary.last_key_edit.is_empty() { primary.last_key_edit.clone() } else { secondary.last_key_edit.clone() };

    let merged = TrackerData {
        keys: merged_keys,
        grid: merged_grid,
        last_key_edit,
        last_grid_edit,
    };
    write_tracker_file(output_path, &merged.keys, &merged.grid, &merged.last_key_edit, &merged.last_grid_edit, None)?;
    Ok(merged)
}

fn merge_grids(
    primary_grid: &HashMap<String, String>,
    secondary_grid: &HashMap<String, String>,
    primary_keys_list: &[String],
    secondary_keys_list: &[String],
    merged_keys_list: &[String],
) -> HashMap<String, String> {
    let n = merged_keys_list.len();
    let primary_decomp = safe_decompress(primary_grid, primary_keys_list);
    let secondary_decomp = safe_decompress(secondary_grid, secondary_keys_list);

    let primary_idx: HashMap<&str, usize> = primary_keys_list.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
    let secondary_idx: HashMap<&str, usize> = secondary_keys_list.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();

    let mut rows: HashMap<String, Vec<char>> = HashMap::new();
    for (i, key) in merged_keys_list.iter().enumerate() {
        let mut row = vec![PLACEHOLDER_CHAR; n];
        row[i] = DIAGONAL_CHAR;
        rows.insert(key.clone(), row);
    }

    for (row_i, row_key) in merged_keys_list.iter().enumerate() {
        for (col_i, col_key) in merged_keys_list.iter().enumerate() {
            if row_i == col_i {
                continue;
            }
            let primary_val = primary_decomp
                .get(row_key)
                .zip(primary_idx.get(col_key.as_str()))
                .and_then(|(row, &idx)| row.get(idx).copied());
            let secondary_val = secondary_decomp
                .get(row_key)
                .zip(secondary_idx.get(col_key.as_str()))
                .and_then(|(row, &idx)| row.get(idx).copied());

            let final_val = match (primary_val, secondary_val) {
                (Some(p), _) if p != PLACEHOLDER_CHAR => p,
                (_, Some(s)) if s != PLACEHOLDER_CHAR => s,
                _ => PLACEHOLDER_CHAR,
            };
            rows.get_mut(row_key).unwrap()[col_i] = final_val;
        }
    }

    rows.into_iter().map(|(k, chars)| (k, compress(&chars.into_iter().collect::<String>()))).collect()
}

fn safe_decompress(grid: &HashMap<String, String>, keys_list: &[String]) -> HashMap<String, Vec<char>> {
    let key_set: HashSet<&str> = keys_list.iter().map(|s| s.as_str()).collect();
    let mut out = HashMap::new();
    for (key, compressed) in grid {
        if !key_set.contains(key.as_str()) {
            continue;
        }
        let decompressed = decompress(compressed);
        if decompressed.chars().count() == keys_list.len() {
            out.insert(key.clone(), decompressed.chars().collect());
        }
    }
    out
}

/// Drop `file_path`'s key from the definitions and its row/column from the
/// grid. Backs up before mutating. Returns `false` (no-op) if the file isn't
/// present in the tracker.
pub fn remove_file_from_tracker(path: &Path, file_path: &str, backups_dir: &Path) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("tracker file '{}' not found", path.display());
    }
    backup_tracker_file(path, backups_dir)?;

    let existing = read_tracker_file(path);
    let norm_target = normalize_path(file_path);
    let Some(key_to_remove) = existing.keys.iter().find(|(_, v)| **v == norm_target).map(|(k, _)| k.clone()) else {
        return Ok(false);
    };

    let mut old_keys_list: Vec<String> = existing.keys.keys().cloned().collect();
    sort_keys(&mut old_keys_list);
    let idx_to_remove = old_keys_list.iter().position(|k| *k == key_to_remove).expect("key present");

    let final_keys: HashMap<String, String> = existing.keys.into_iter().filter(|(k, _)| *k != key_to_remove).collect();
    let mut final_sorted: Vec<String> = final_keys.keys().cloned().collect();
    sort_keys(&mut final_sorted);

    let mut final_grid = HashMap::new();
    for (row_key, compressed_row) in &existing.grid {
        if *row_key == key_to_remove {
            continue;
        }
        let decompressed: Vec<char> = decompress(compressed_row).chars().collect();
        if decompressed.len() == old_keys_list.len() {
            let mut new_row = decompressed;
            new_row.remove(idx_to_remove);
            final_grid.insert(row_key.clone(), compress(&new_row.into_iter().collect::<String>()));
        }
        // rows with a stale length are left out; write_tracker_file re-initializes them.
    }

    let last_key_edit = format!("Removed key: {key_to_remove} ({})", Path::new(&norm_target).file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
    let last_grid_edit = format!("Grid adjusted for removal of key: {key_to_remove}");

    write_tracker_file(path, &final_keys, &final_grid, &last_key_edit, &last_grid_edit, None)?;
    Ok(true)
}

/// Overwrite placeholder cells only; any conflict with a non-placeholder
/// incumbent is logged and the incumbent kept. Distinct from `merge_trackers`.
pub fn apply_suggestions(grid: &mut HashMap<String, String>, sorted_keys: &[String], suggestions: &[(String, String, char)]) {
    let key_to_idx: HashMap<&str, usize> = sorted_keys.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
    for (source, target, ch) in suggestions {
        let (Some(&src_idx), Some(&tgt_idx)) = (key_to_idx.get(source.as_str()), key_to_idx.get(target.as_str())) else {
            continue;
        };
        if src_idx == tgt_idx {
            continue;
        }
        let row = grid.entry(source.clone()).or_insert_with(|| {
            let mut chars = vec![PLACEHOLDER_CHAR; sorted_keys.len()];
            chars[src_idx] = DIAGONAL_CHAR;
            compress(&chars.into_iter().collect::<String>())
        });
        match crate::grid::get_char_at(row, tgt_idx) {
            Ok(current) if current == PLACEHOLDER_CHAR => {
                if let Ok(updated) = crate::grid::set_char_at(row, tgt_idx, *ch) {
                    *row = updated;
                }
            }
            Ok(current) if current != *ch => {
                eprintln!("[keygrid] WARN: suggestion conflict at ({source}, {target}): keeping '{current}' over '{ch}'");
            }
            _ => {}
        }
    }
}

/// Determine added/removed keys relative to the existing tracker, rebuild
/// the grid to the new key set, apply suggestions to placeholders only, and
/// write the result. Mini trackers preserve their template envelope verbatim.
pub fn update_tracker(
    tracker_path: &Path,
    kind: TrackerKind,
    relevant_keys: &[String],
    key_map: &HashMap<String, String>,
    suggestions: &[(String, String, char)],
    backups_dir: &Path,
) -> anyhow::Result<TrackerData> {
    let mut sorted_keys = relevant_keys.to_vec();
    sort_keys(&mut sorted_keys);

    let existed = tracker_path.exists();
    let raw_content = if existed { std::fs::read_to_string(tracker_path).unwrap_or_default() } else { String::new() };
    if existed {
        backup_tracker_file(tracker_path, backups_dir)?;
    }
    let existing = if existed { read_tracker_file(tracker_path) } else { TrackerData::default() };

    let existing_key_set: HashSet<&str> = existing.keys.keys().map(|s| s.as_str()).collect();
    let new_key_set: HashSet<&str> = sorted_keys.iter().map(|s| s.as_str()).collect();
    let added: Vec<&str> = new_key_set.difference(&existing_key_set).copied().collect();
    let removed: Vec<&str> = existing_key_set.difference(&new_key_set).copied().collect();

    let mut grid = rebuild_grid_rows(&sorted_keys, &existing.grid);
    apply_suggestions(&mut grid, &sorted_keys, suggestions);

    let keys: HashMap<String, String> = sorted_keys
        .iter()
        .filter_map(|k| key_map.get(k).map(|p| (k.clone(), p.clone())))
        .collect();

    let last_key_edit = if added.is_empty() && removed.is_empty() {
        "No key changes".to_string()
    } else {
        format!("Added: [{}], Removed: [{}]", added.join(", "), removed.join(", "))
    };
    let last_grid_edit = if suggestions.is_empty() { "Grid structure updated".to_string() } else { format!("Applied {} suggestions", suggestions.len()) };

    let mini_envelope_owned;
    let mini_envelope = if kind == TrackerKind::Mini {
        let module_name = tracker_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
            .trim_end_matches("_module")
            .to_string();
        mini_envelope_owned = split_mini_envelope(&raw_content, &module_name);
        Some((mini_envelope_owned.0.as_str(), mini_envelope_owned.1.as_str()))
    } else {
        None
    };

    write_tracker_file(tracker_path, &keys, &grid, &last_key_edit, &last_grid_edit, mini_envelope)?;

    Ok(TrackerData { keys, grid, last_key_edit, last_grid_edit })
}
