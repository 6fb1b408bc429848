//! keygrid: project-wide dependency tracking engine. Hierarchical keys over
//! a project tree, static + semantic dependency discovery, RLE-compressed
//! grid trackers. CLI entry point — dispatches to the library modules the
//! way the teacher's `main.rs` dispatches `rtk <subcommand>` to its own
//! per-concern modules.

mod analyzer;
mod cache;
mod config;
mod embeddings;
mod grid;
mod key_manager;
mod orchestrator;
mod path_utils;
mod suggester;
mod tracker;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use config::Config;
use embeddings::Encoder;
use key_manager::{GenerateKeysOptions, KeyMap};
use tracker::{ExportFormat, TrackerKind};

#[derive(Parser)]
#[command(
    name = "keygrid",
    version,
    about = "Project-wide dependency tracking: hierarchical keys, static + semantic discovery, RLE grid trackers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk roots, assign hierarchical keys, and write a tracker's key definitions.
    GenerateKeys {
        /// Root directories to walk, in assignment order.
        roots: Vec<PathBuf>,
        /// Override the tracker's output path (main/doc only; mini trackers
        /// always write to their module directory).
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long = "tracker_type", default_value = "main")]
        tracker_type: String,
    },
    /// Encode (or refresh) every tracked file's embedding vector.
    GenerateEmbeddings {
        roots: Vec<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Full pipeline: analyze, embed, suggest, write doc/mini/main trackers.
    AnalyzeProject {
        #[arg(long)]
        force_analysis: bool,
        #[arg(long)]
        force_embeddings: bool,
    },
    /// Recompute suggestions for exactly the keys already defined in a tracker.
    SuggestDependencies {
        #[arg(long)]
        tracker: PathBuf,
        #[arg(long = "tracker_type")]
        tracker_type: String,
    },
    /// RLE-compress a raw dependency-character string.
    Compress { value: String },
    /// RLE-decompress a dependency-character string.
    Decompress { value: String },
    /// Read the character at a decompressed index of a row string.
    #[command(name = "get_char")]
    GetChar { value: String, idx: usize },
    /// Write one cell of one tracker row, in place.
    #[command(name = "set_char")]
    SetChar {
        idx: usize,
        ch: char,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        key: String,
    },
    /// Drop a file's key and its row/column from a tracker.
    RemoveFile {
        path: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Render a tracker file as md/json/csv/dot.
    ExportTracker {
        path: PathBuf,
        #[arg(long, default_value = "md")]
        format: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// A deterministic feature-hashed bag-of-words encoder: every whitespace/
/// punctuation-delimited token is hashed (`xxh3_64`) into one of `DIM`
/// buckets with a sign derived from the hash's top bit, the standard
/// hashing-trick construction for a model-free but reproducible embedding.
/// The real project's actual embedding model is an external collaborator
/// the orchestrator only ever sees through the `Encoder` trait; this is the
/// concrete implementation the CLI binary wires in.
struct HashingEncoder {
    dim: usize,
}

impl HashingEncoder {
    const DEFAULT_DIM: usize = 384;

    fn new() -> Self {
        HashingEncoder { dim: Self::DEFAULT_DIM }
    }
}

impl Encoder for HashingEncoder {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if token.is_empty() {
                continue;
            }
            let hash = xxhash_rust::xxh3::xxh3_64(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if hash & (1 << 63) != 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::GenerateKeys { roots, output, tracker_type } => cmd_generate_keys(&roots, output.as_deref(), &tracker_type),
        Commands::GenerateEmbeddings { roots, force } => cmd_generate_embeddings(&roots, force),
        Commands::AnalyzeProject { force_analysis, force_embeddings } => cmd_analyze_project(force_analysis, force_embeddings),
        Commands::SuggestDependencies { tracker, tracker_type } => cmd_suggest_dependencies(&tracker, &tracker_type),
        Commands::Compress { value } => {
            println!("{}", grid::compress(&value));
            Ok(())
        }
        Commands::Decompress { value } => {
            println!("{}", grid::decompress(&value));
            Ok(())
        }
        Commands::GetChar { value, idx } => {
            let ch = grid::get_char_at(&value, idx)?;
            println!("{ch}");
            Ok(())
        }
        Commands::SetChar { idx, ch, output, key } => cmd_set_char(idx, ch, &output, &key),
        Commands::RemoveFile { path, output } => cmd_remove_file(&path, &output),
        Commands::ExportTracker { path, format, output } => cmd_export_tracker(&path, &format, output.as_deref()),
    }
}

fn parse_tracker_kind(tracker_type: &str) -> Result<TrackerKind> {
    match tracker_type {
        "main" => Ok(TrackerKind::Main),
        "doc" => Ok(TrackerKind::Doc),
        "mini" => Ok(TrackerKind::Mini),
        other => bail!("unknown tracker_type '{other}' (expected main, doc, or mini)"),
    }
}

fn resolved_key_map(project_root: &Path, config: &Config, roots: &[PathBuf]) -> Result<KeyMap> {
    let resolved = key_manager::resolve_exclusions(config, project_root);
    let opts = GenerateKeysOptions {
        excluded_dirs: &resolved.excluded_dirs,
        excluded_extensions: &resolved.excluded_extensions,
        excluded_path_prefixes: &resolved.excluded_path_prefixes,
    };
    key_manager::generate_keys(roots, &opts).context("generating keys")
}

/// Every configured code + doc root, absolute, for commands that need a
/// project-wide key map rather than whatever roots were passed on the CLI.
fn configured_roots(project_root: &Path, config: &Config) -> Vec<PathBuf> {
    config
        .code_root_directories
        .iter()
        .chain(config.doc_directories.iter())
        .map(|r| project_root.join(r))
        .filter(|p| p.exists())
        .collect()
}

fn cmd_generate_keys(roots: &[PathBuf], output: Option<&Path>, tracker_type: &str) -> Result<()> {
    let project_root = path_utils::get_project_root();
    let config = Config::load(&project_root);
    let kind = parse_tracker_kind(tracker_type)?;
    let key_map = resolved_key_map(&project_root, &config, roots)?;
    println!("[keygrid] assigned {} keys ({} new)", key_map.key_to_path.len(), key_map.new_keys.len());

    let backups_dir = project_root.join(&config.paths.backups_dir);
    match kind {
        TrackerKind::Main => {
            let keys = orchestrator::main_key_filter(&project_root, &config, &key_map);
            let path = output.map(PathBuf::from).unwrap_or_else(|| tracker::tracker_path(&project_root, &config, TrackerKind::Main, None));
            let key_list: Vec<String> = keys.keys().cloned().collect();
            tracker::update_tracker(&path, TrackerKind::Main, &key_list, &keys, &[], &backups_dir)?;
            println!("[keygrid] wrote main tracker: {}", path.display());
        }
        TrackerKind::Doc => {
            let keys = orchestrator::doc_key_filter(&project_root, &config, &key_map);
            let path = output.map(PathBuf::from).unwrap_or_else(|| tracker::tracker_path(&project_root, &config, TrackerKind::Doc, None));
            let key_list: Vec<String> = keys.keys().cloned().collect();
            tracker::update_tracker(&path, TrackerKind::Doc, &key_list, &keys, &[], &backups_dir)?;
            println!("[keygrid] wrote doc tracker: {}", path.display());
        }
        TrackerKind::Mini => {
            let module_keys = orchestrator::main_key_filter(&project_root, &config, &key_map);
            let mut written = 0;
            for module_path in module_keys.values() {
                let mini_keys = orchestrator::mini_key_filter(module_path, &key_map);
                if mini_keys.len() <= 1 {
                    continue;
                }
                let key_list: Vec<String> = mini_keys.keys().cloned().collect();
                let path = tracker::tracker_path(&project_root, &config, TrackerKind::Mini, Some(Path::new(module_path)));
                tracker::update_tracker(&path, TrackerKind::Mini, &key_list, &mini_keys, &[], &backups_dir)?;
                written += 1;
            }
            println!("[keygrid] wrote {written} mini trackers");
        }
    }
    Ok(())
}

fn cmd_generate_embeddings(roots: &[PathBuf], force: bool) -> Result<()> {
    let project_root = path_utils::get_project_root();
    let config = Config::load(&project_root);
    let key_map = resolved_key_map(&project_root, &config, roots)?;
    let encoder = HashingEncoder::new();
    let count = orchestrator::generate_embeddings_all(&project_root, &config, &encoder, &key_map, force);
    println!("[keygrid] generated/refreshed {count} embeddings");
    Ok(())
}

fn cmd_analyze_project(force_analysis: bool, force_embeddings: bool) -> Result<()> {
    let project_root = path_utils::get_project_root();
    let config = Config::load(&project_root);
    let roots = configured_roots(&project_root, &config);
    if roots.is_empty() {
        bail!("no configured code_root_directories/doc_directories exist under {}", project_root.display());
    }
    let key_map = resolved_key_map(&project_root, &config, &roots)?;
    let encoder = HashingEncoder::new();
    let report = orchestrator::analyze_project(&project_root, &config, &encoder, &key_map, force_analysis, force_embeddings)?;
    println!(
        "[keygrid] analyzed {} files, {} embeddings, {} main-tracker modules, {} doc-tracker keys, {} mini trackers",
        report.files_analyzed, report.embeddings_generated, report.main_tracker_modules, report.doc_tracker_keys, report.mini_trackers_written
    );
    Ok(())
}

fn cmd_suggest_dependencies(tracker_path: &Path, tracker_type: &str) -> Result<()> {
    let kind = parse_tracker_kind(tracker_type)?;
    let project_root = path_utils::get_project_root();
    let config = Config::load(&project_root);
    let roots = configured_roots(&project_root, &config);
    let key_map = resolved_key_map(&project_root, &config, &roots)?;
    let encoder = HashingEncoder::new();

    let existing = tracker::read_tracker_file(tracker_path);
    if existing.keys.is_empty() {
        bail!("tracker '{}' has no key definitions to suggest against", tracker_path.display());
    }
    let relevant_keys: std::collections::HashMap<String, String> = existing.keys.clone();
    let mut relevant_key_list: Vec<String> = relevant_keys.keys().cloned().collect();
    path_utils::sort_keys(&mut relevant_key_list);

    let mut triples = Vec::new();
    for key in &relevant_key_list {
        if Path::new(&relevant_keys[key]).is_dir() {
            continue;
        }
        let analysis = analyzer::analyze_file(Path::new(&relevant_keys[key]), false);
        let suggestions = suggester::suggest_dependencies_for_file(key, &analysis, &key_map, &project_root, &config, &encoder);
        for (target, ch) in suggestions {
            if relevant_keys.contains_key(&target) {
                triples.push((key.clone(), target, ch));
            }
        }
    }

    let backups_dir = project_root.join(&config.paths.backups_dir);
    tracker::update_tracker(tracker_path, kind, &relevant_key_list, &relevant_keys, &triples, &backups_dir)?;
    println!("[keygrid] applied {} suggestions to {}", triples.len(), tracker_path.display());
    Ok(())
}

fn cmd_set_char(idx: usize, ch: char, output: &Path, key: &str) -> Result<()> {
    let mut data = tracker::read_tracker_file(output);
    let row = data.grid.get(key).ok_or_else(|| anyhow::anyhow!("key '{key}' not found in tracker {}", output.display()))?;
    let new_row = grid::set_char_at(row, idx, ch)?;
    data.grid.insert(key.to_string(), new_row);
    tracker::write_tracker_file(output, &data.keys, &data.grid, &data.last_key_edit, "Cell updated via set-char", None)?;
    println!("[keygrid] set ({key}, index {idx}) = '{ch}' in {}", output.display());
    Ok(())
}

fn cmd_remove_file(path: &Path, output: &Path) -> Result<()> {
    let project_root = path_utils::get_project_root();
    let config = Config::load(&project_root);
    let backups_dir = project_root.join(&config.paths.backups_dir);
    let removed = tracker::remove_file_from_tracker(output, &path.to_string_lossy(), &backups_dir)?;
    if removed {
        println!("[keygrid] removed '{}' from {}", path.display(), output.display());
    } else {
        println!("[keygrid] '{}' was not present in {}", path.display(), output.display());
    }
    Ok(())
}

fn cmd_export_tracker(path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let fmt = ExportFormat::parse(format).ok_or_else(|| anyhow::anyhow!("unsupported export format '{format}' (expected md, json, csv, or dot)"))?;
    let data = tracker::read_tracker_file(path);
    let rendered = tracker::export_tracker(path, &data, fmt)?;
    match output {
        Some(out_path) => {
            std::fs::write(out_path, rendered)?;
            println!("[keygrid] exported {} -> {}", path.display(), out_path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_encoder_is_deterministic_and_order_sensitive_to_content() {
        let encoder = HashingEncoder::new();
        let a = encoder.encode("def helper(): pass");
        let b = encoder.encode("def helper(): pass");
        assert_eq!(a, b);
        let c = encoder.encode("class Widget: pass");
        assert_ne!(a, c);
    }

    #[test]
    fn parse_tracker_kind_rejects_unknown_values() {
        assert!(parse_tracker_kind("main").is_ok());
        assert!(parse_tracker_kind("doc").is_ok());
        assert!(parse_tracker_kind("mini").is_ok());
        assert!(parse_tracker_kind("bogus").is_err());
    }
}
