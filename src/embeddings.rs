//! Embedding Manager (C6): black-box text encoding, `.npy` persistence, and
//! cosine similarity against the configured thresholds. Mirrors
//! `cline_utils.dependency_system.utils.embedding_manager`; the encoder
//! itself is an external collaborator per spec.md's "out of scope" list, so
//! `Encoder` is a narrow trait the orchestrator supplies an implementation
//! for (same shape as the teacher's `SymbolExtractor` seam in `read_symbols.rs`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::path_utils::{get_file_type, normalize_path};

/// A black-box `text -> vector` encoder. Device selection and model loading
/// are the caller's concern; this trait only has to produce a vector.
pub trait Encoder {
    fn encode(&self, text: &str) -> Vec<f32>;
}

/// Strip `import`/`from` lines and double-weight function/class definitions,
/// matching the original tool's Python preprocessing so identical embeddings
/// are produced for identical inputs.
pub fn preprocess_for_embedding(content: &str, file_type: &str) -> String {
    if file_type != "py" {
        return content.to_string();
    }
    let mut kept = String::new();
    let mut extra = String::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
            continue;
        }
        kept.push_str(line);
        kept.push('\n');
        if trimmed.starts_with("def ") || trimmed.starts_with("async def ") || trimmed.starts_with("class ") {
            extra.push_str(line);
            extra.push('\n');
        }
    }
    kept.push_str(&extra);
    kept
}

/// Per-subtree sidecar recording model identity and the `(path, mtime)` the
/// stored vector was computed from, per spec.md §6's `metadata.json` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub version: String,
    pub model: String,
    pub keys: HashMap<String, KeyMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMeta {
    pub path: String,
    pub mtime: u64,
}

impl EmbeddingMetadata {
    fn new(model: &str) -> Self {
        EmbeddingMetadata {
            version: "1.0".to_string(),
            model: model.to_string(),
            keys: HashMap::new(),
        }
    }

    pub fn load_or_default(path: &Path, model: &str) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| EmbeddingMetadata::new(model))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Where a key's vector and the subtree `metadata.json` for it live, mirroring
/// the source tree under `embeddings_dir`.
pub fn embedding_paths(project_root: &Path, config: &Config, rel_path: &str) -> (PathBuf, PathBuf) {
    let embeddings_root = project_root.join(&config.paths.embeddings_dir);
    let vector_path = embeddings_root.join(format!("{rel_path}.npy"));
    let metadata_path = vector_path
        .parent()
        .unwrap_or(&embeddings_root)
        .join("metadata.json");
    (vector_path, metadata_path)
}

/// Encode (or reuse a cached vector for) one file, persisting to `.npy` and
/// updating the subtree's `metadata.json`. Returns the vector.
pub fn ensure_embedding(
    project_root: &Path,
    config: &Config,
    encoder: &dyn Encoder,
    key: &str,
    abs_path: &Path,
    rel_path: &str,
    force: bool,
) -> anyhow::Result<Vec<f32>> {
    let (vector_path, metadata_path) = embedding_paths(project_root, config, rel_path);
    let model_name = if get_file_type(rel_path) == "py" {
        &config.models.code_model_name
    } else {
        &config.models.doc_model_name
    };
    let mut metadata = EmbeddingMetadata::load_or_default(&metadata_path, model_name);

    let mtime = crate::cache::file_mtime_secs(abs_path).unwrap_or(0);
    let up_to_date = !force
        && vector_path.exists()
        && metadata
            .keys
            .get(key)
            .map(|k| k.mtime == mtime && k.path == normalize_path(&abs_path.to_string_lossy()))
            .unwrap_or(false);

    if up_to_date {
        if let Ok(v) = read_npy(&vector_path) {
            return Ok(v);
        }
    }

    let content = std::fs::read_to_string(abs_path)?;
    let file_type = get_file_type(rel_path);
    let text = preprocess_for_embedding(&content, file_type);
    let vector = encoder.encode(&text);
    write_npy(&vector_path, &vector)?;

    metadata.keys.insert(
        key.to_string(),
        KeyMeta {
            path: normalize_path(&abs_path.to_string_lossy()),
            mtime,
        },
    );
    metadata.save(&metadata_path)?;

    Ok(vector)
}

/// Cosine similarity of two L2-normalized vectors, clamped to `[0, 1]`.
/// A zero-norm vector yields similarity `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Map a similarity score to a suggestion character per the two-threshold rule.
pub fn similarity_to_char(sim: f32, thresholds: &crate::config::Thresholds) -> Option<char> {
    if sim >= thresholds.code_similarity as f32 {
        Some('S')
    } else if sim >= thresholds.doc_similarity as f32 {
        Some('s')
    } else {
        None
    }
}

/// Minimal NPY v1.0 writer for a 1-D little-endian float32 array — the
/// format spec.md §6 calls for, without pulling in a numpy-interop crate.
pub fn write_npy(path: &Path, vector: &[f32]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut bytes = Vec::with_capacity(128 + vector.len() * 4);
    bytes.extend_from_slice(b"\x93NUMPY");
    bytes.push(1); // major version
    bytes.push(0); // minor version

    let header_dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        vector.len()
    );
    // Header length (incl. padding + trailing \n) must make the total
    // preamble a multiple of 64 bytes, per the NPY format spec.
    let unpadded_len = 10 + header_dict.len() + 1;
    let padded_len = unpadded_len.div_ceil(64) * 64;
    let pad = padded_len - unpadded_len;
    let mut header = header_dict;
    header.push_str(&" ".repeat(pad));
    header.push('\n');

    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn read_npy(path: &Path) -> anyhow::Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    anyhow::ensure!(bytes.len() >= 10 && &bytes[0..6] == b"\x93NUMPY", "not a valid .npy file");
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    anyhow::ensure!(bytes.len() >= data_start, "truncated .npy header");
    let data = &bytes[data_start..];
    anyhow::ensure!(data.len() % 4 == 0, "truncated .npy payload");
    let vector = data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEncoder;
    impl Encoder for StubEncoder {
        fn encode(&self, text: &str) -> Vec<f32> {
            vec![text.len() as f32, 1.0, 0.0]
        }
    }

    #[test]
    fn npy_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vec.npy");
        let original = vec![0.1f32, -0.2, 3.5, 0.0];
        write_npy(&path, &original).unwrap();
        let read_back = read_npy(&path).unwrap();
        assert_eq!(original, read_back);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let zero = vec![0.0f32, 0.0];
        let other = vec![1.0f32, 1.0];
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
    }

    #[test]
    fn threshold_mapping_follows_s5_scenario() {
        let thresholds = crate::config::Thresholds {
            code_similarity: 0.8,
            doc_similarity: 0.65,
        };
        assert_eq!(similarity_to_char(0.72, &thresholds), Some('s'));
        assert_eq!(similarity_to_char(0.83, &thresholds), Some('S'));
        assert_eq!(similarity_to_char(0.5, &thresholds), None);
    }

    #[test]
    fn python_preprocessing_strips_imports_and_duplicates_defs() {
        let src = "import os\nfrom x import y\n\ndef foo():\n    pass\n";
        let out = preprocess_for_embedding(src, "py");
        assert!(!out.contains("import os"));
        assert_eq!(out.matches("def foo():").count(), 2);
    }

    #[test]
    fn non_python_preprocessing_is_identity() {
        let src = "const x = 1;\n";
        assert_eq!(preprocess_for_embedding(src, "js"), src);
    }

    #[test]
    fn ensure_embedding_reuses_unchanged_vector() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        let file = root.join("src").join("a.py");
        std::fs::write(&file, "def helper():\n    pass\n").unwrap();
        let config = Config::default();
        let encoder = StubEncoder;

        let v1 = ensure_embedding(root, &config, &encoder, "1Aa1", &file, "src/a.py", false).unwrap();
        let v2 = ensure_embedding(root, &config, &encoder, "1Aa1", &file, "src/a.py", false).unwrap();
        assert_eq!(v1, v2);
    }
}
