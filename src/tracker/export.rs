//! Tracker export (C8 auxiliary): render a parsed tracker to an external
//! format for consumption outside the tool. Mirrors `tracker_io.export_tracker`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::grid::{decompress, DIAGONAL_CHAR, EMPTY_CHAR, PLACEHOLDER_CHAR};
use crate::path_utils::sort_keys;

use super::TrackerData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Md,
    Json,
    Csv,
    Dot,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(ExportFormat::Md),
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            "dot" | "graphviz" => Some(ExportFormat::Dot),
            _ => None,
        }
    }
}

/// Render `tracker` as `format`. `md` returns the tracker file's own
/// content verbatim (the caller is expected to have the source bytes handy;
/// here we re-serialize from parsed data, which round-trips the same info).
pub fn export_tracker(tracker_path: &Path, data: &TrackerData, format: ExportFormat) -> anyhow::Result<String> {
    match format {
        ExportFormat::Md => export_md(tracker_path, data),
        ExportFormat::Json => export_json(data),
        ExportFormat::Csv => export_csv(data),
        ExportFormat::Dot => Ok(export_dot(data)),
    }
}

fn export_md(tracker_path: &Path, _data: &TrackerData) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(tracker_path)?;
    Ok(content)
}

fn export_json(data: &TrackerData) -> anyhow::Result<String> {
    #[derive(serde::Serialize)]
    struct ExportedTracker<'a> {
        keys: &'a HashMap<String, String>,
        grid: &'a HashMap<String, String>,
        last_key_edit: &'a str,
        last_grid_edit: &'a str,
    }
    let exported = ExportedTracker {
        keys: &data.keys,
        grid: &data.grid,
        last_key_edit: &data.last_key_edit,
        last_grid_edit: &data.last_grid_edit,
    };
    Ok(serde_json::to_string_pretty(&exported)?)
}

fn export_csv(data: &TrackerData) -> anyhow::Result<String> {
    let mut sorted_keys: Vec<String> = data.keys.keys().cloned().collect();
    sort_keys(&mut sorted_keys);

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(["Source Key", "Source Path", "Target Key", "Target Path", "Dependency Type"])?;
    for source_key in &sorted_keys {
        let Some(row) = data.grid.get(source_key) else { continue };
        let decompressed: Vec<char> = decompress(row).chars().collect();
        let source_path = data.keys.get(source_key).map(String::as_str).unwrap_or("");
        for (idx, target_key) in sorted_keys.iter().enumerate() {
            let Some(&ch) = decompressed.get(idx) else { continue };
            if ch == EMPTY_CHAR || ch == DIAGONAL_CHAR || ch == PLACEHOLDER_CHAR {
                continue;
            }
            let target_path = data.keys.get(target_key).map(String::as_str).unwrap_or("");
            writer.write_record([source_key.as_str(), source_path, target_key.as_str(), target_path, &ch.to_string()])?;
        }
    }
    let bytes = writer.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}

fn basename(path: &str) -> &str {
    Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or(path)
}

/// `(color, style, arrowhead)` for a dependency character, matching the
/// original tool's GraphViz export styling.
fn edge_style(ch: char) -> (&'static str, &'static str, &'static str) {
    match ch {
        '>' => ("blue", "solid", "normal"),
        '<' => ("green", "solid", "oinv"),
        'x' => ("red", "dashed", "odot"),
        'd' => ("orange", "solid", "normal"),
        'S' => ("dimgrey", "bold", "normal"),
        's' => ("grey", "dotted", "normal"),
        _ => ("black", "solid", "normal"),
    }
}

fn export_dot(data: &TrackerData) -> String {
    let mut sorted_keys: Vec<String> = data.keys.keys().cloned().collect();
    sort_keys(&mut sorted_keys);

    let mut out = String::from("digraph dependencies {\n    rankdir=LR;\n    node [shape=box];\n\n");
    for key in &sorted_keys {
        let path = data.keys.get(key).map(String::as_str).unwrap_or("");
        let _ = writeln!(out, "    \"{key}\" [label=\"{key}\\n{}\"];", basename(path));
    }
    out.push('\n');

    for (row_idx, source_key) in sorted_keys.iter().enumerate() {
        let Some(row) = data.grid.get(source_key) else { continue };
        let decompressed: Vec<char> = decompress(row).chars().collect();
        for (col_idx, target_key) in sorted_keys.iter().enumerate() {
            if col_idx == row_idx {
                continue;
            }
            let Some(&ch) = decompressed.get(col_idx) else { continue };
            if ch == EMPTY_CHAR || ch == PLACEHOLDER_CHAR {
                continue;
            }
            let (color, style, arrowhead) = edge_style(ch);
            let _ = writeln!(
                out,
                "    \"{source_key}\" -> \"{target_key}\" [color={color}, style={style}, arrowhead={arrowhead}];"
            );
        }
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TrackerData {
        let mut keys = HashMap::new();
        keys.insert("1A".to_string(), "/root/a.py".to_string());
        keys.insert("1B".to_string(), "/root/b.py".to_string());
        let mut grid = HashMap::new();
        grid.insert("1A".to_string(), "o>".to_string());
        grid.insert("1B".to_string(), "<o".to_string());
        TrackerData {
            keys,
            grid,
            last_key_edit: "1A".to_string(),
            last_grid_edit: "1A".to_string(),
        }
    }

    #[test]
    fn csv_export_skips_diagonal_and_placeholder() {
        let data = sample();
        let csv = export_csv(&data).unwrap();
        assert!(csv.contains("1A,/root/a.py,1B,/root/b.py,>"));
        assert!(csv.contains("1B,/root/b.py,1A,/root/a.py,<"));
        assert!(!csv.contains(",o\n"));
    }

    #[test]
    fn dot_export_styles_arrow_chars() {
        let data = sample();
        let dot = export_dot(&data);
        assert!(dot.contains("digraph dependencies"));
        assert!(dot.contains("color=blue"));
        assert!(dot.contains("color=green"));
    }

    #[test]
    fn json_export_round_trips_keys() {
        let data = sample();
        let json = export_json(&data).unwrap();
        assert!(json.contains("\"1A\""));
        assert!(json.contains("last_key_edit"));
    }

    #[test]
    fn parse_recognizes_all_known_formats() {
        assert_eq!(ExportFormat::parse("MD"), Some(ExportFormat::Md));
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("csv"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("dot"), Some(ExportFormat::Dot));
        assert_eq!(ExportFormat::parse("xml"), None);
    }
}
