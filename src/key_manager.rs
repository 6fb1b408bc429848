//! Key Manager (C3): walks roots, applies exclusions, assigns hierarchical
//! keys. Mirrors `cline_utils.dependency_system.core.key_manager`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::path_utils::{get_file_type, is_path_excluded, normalize_path};

/// Injective key -> normalized-path map plus bookkeeping for what changed
/// on this scan.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    pub key_to_path: HashMap<String, String>,
    pub new_keys: Vec<String>,
}

impl KeyMap {
    pub fn path_of(&self, key: &str) -> Option<&str> {
        self.key_to_path.get(key).map(|s| s.as_str())
    }

    pub fn key_of(&self, path: &str) -> Option<&str> {
        let norm = normalize_path(path);
        self.key_to_path
            .iter()
            .find(|(_, v)| **v == norm)
            .map(|(k, _)| k.as_str())
    }

    pub fn file_type_of(&self, key: &str) -> Option<&'static str> {
        self.path_of(key).map(get_file_type)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.key_to_path.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[cfg(test)]
    pub fn from_map(key_to_path: HashMap<String, String>) -> Self {
        KeyMap { key_to_path, new_keys: Vec::new() }
    }
}

pub struct GenerateKeysOptions<'a> {
    pub excluded_dirs: &'a HashSet<String>,
    pub excluded_extensions: &'a HashSet<String>,
    /// Absolute, already-glob-expanded exclusion prefixes (from
    /// `excluded_paths`), combined with normalized `excluded_dirs` by the
    /// caller per spec.md §4.1.
    pub excluded_path_prefixes: &'a [String],
}

/// Walk `root_paths` in order, assigning `1A`, `1B`, ... to top-level roots
/// and recursing with sorted, case-sensitive directory listings. Returns the
/// accumulated key map across all roots (stable: rerunning on an unchanged
/// tree reassigns the same keys in the same order — P6).
pub fn generate_keys(root_paths: &[impl AsRef<Path>], opts: &GenerateKeysOptions) -> anyhow::Result<KeyMap> {
    let mut key_map = KeyMap::default();
    let mut next_root_letter: u32 = 0;

    for root in root_paths {
        let root = root.as_ref();
        anyhow::ensure!(root.exists(), "root path '{}' does not exist", root.display());
        let dir_letter = letter_for(next_root_letter);
        next_root_letter += 1;
        let root_key = format!("1{dir_letter}");
        let norm_root = normalize_path(&root.to_string_lossy());
        if is_excluded(&norm_root, opts) {
            continue;
        }
        insert_new(&mut key_map, &root_key, &norm_root);
        process_directory(root, &root_key, 1, opts, &mut key_map)?;
    }
    Ok(key_map)
}

fn letter_for(ordinal: u32) -> char {
    char::from_u32('A' as u32 + ordinal).unwrap_or('Z')
}

fn sub_letter_for(ordinal: u32) -> char {
    char::from_u32('a' as u32 + ordinal).unwrap_or('z')
}

fn insert_new(key_map: &mut KeyMap, key: &str, path: &str) {
    if !key_map.key_to_path.contains_key(key) {
        key_map.key_to_path.insert(key.to_string(), path.to_string());
        key_map.new_keys.push(key.to_string());
    }
}

fn is_excluded(norm_path: &str, opts: &GenerateKeysOptions) -> bool {
    is_path_excluded(norm_path, opts.excluded_path_prefixes)
}

fn process_directory(
    dir_path: &Path,
    parent_key: &str,
    tier: u32,
    opts: &GenerateKeysOptions,
    key_map: &mut KeyMap,
) -> anyhow::Result<()> {
    let mut entries: Vec<std::fs::DirEntry> = match std::fs::read_dir(dir_path) {
        Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
        Err(e) => {
            eprintln!("[keygrid] WARN: cannot read directory {}: {e}", dir_path.display());
            return Ok(());
        }
    };
    // Case-sensitive sort by file name, matching `sorted(os.listdir())`.
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut file_count: u32 = 1;
    let mut subdir_count: u32 = 0;

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if opts.excluded_dirs.contains(&name) || name == ".gitkeep" {
            continue;
        }
        if name.ends_with("_module.md") {
            continue;
        }
        let item_path = dir_path.join(&name);
        let norm_item = normalize_path(&item_path.to_string_lossy());
        if is_excluded(&norm_item, opts) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_file() {
            let ext = Path::new(&name)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            if opts.excluded_extensions.contains(&ext) {
                continue;
            }
            let file_key = format!("{parent_key}{file_count}");
            insert_new(key_map, &file_key, &norm_item);
            file_count += 1;
        } else if file_type.is_dir() {
            let subdir_letter = sub_letter_for(subdir_count);
            subdir_count += 1;
            let subdir_key = format!("{}{}{}", tier + 1, &parent_key[1..], subdir_letter);
            insert_new(key_map, &subdir_key, &norm_item);
            process_directory(&item_path, &subdir_key, tier + 1, opts, key_map)?;
        }
    }
    Ok(())
}

/// Resolved, ready-to-use exclusion sets for one `generate_keys` call, built
/// from a `Config` plus the project root. `excluded_dirs`/`excluded_extensions`
/// stay as name/extension sets (checked per directory entry); `excluded_paths`
/// (absolute or glob) are combined with each excluded-dir name turned into an
/// absolute prefix under the project root, per spec.md §4.1/§4.3.
pub struct ResolvedExclusions {
    pub excluded_dirs: HashSet<String>,
    pub excluded_extensions: HashSet<String>,
    pub excluded_path_prefixes: Vec<String>,
}

pub fn resolve_exclusions(config: &crate::config::Config, project_root: &Path) -> ResolvedExclusions {
    let excluded_dirs: HashSet<String> = config.excluded_dirs.iter().cloned().collect();
    let excluded_extensions: HashSet<String> = config.excluded_extensions.iter().cloned().collect();

    let mut excluded_path_prefixes: Vec<String> = config
        .excluded_dirs
        .iter()
        .map(|d| normalize_path(&project_root.join(d).to_string_lossy()))
        .collect();
    excluded_path_prefixes.extend(config.excluded_paths.iter().cloned());

    ResolvedExclusions {
        excluded_dirs,
        excluded_extensions,
        excluded_path_prefixes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn opts() -> (HashSet<String>, HashSet<String>) {
        (HashSet::new(), HashSet::new())
    }

    #[test]
    fn deterministic_tier_and_letter_assignment() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("src");
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("a.py"), "").unwrap();
        fs::write(root.join("pkg").join("util.py"), "").unwrap();

        let (excluded_dirs, excluded_extensions) = opts();
        let gen_opts = GenerateKeysOptions {
            excluded_dirs: &excluded_dirs,
            excluded_extensions: &excluded_extensions,
            excluded_path_prefixes: &[],
        };
        let km = generate_keys(&[root.clone()], &gen_opts).unwrap();

        let root_key = "1A";
        assert_eq!(km.path_of(root_key), Some(normalize_path(&root.to_string_lossy())).as_deref());
        // 'a.py' sorts before 'pkg' case-sensitively (lowercase 'a' < lowercase 'p').
        assert!(km.path_of("1A1").unwrap().ends_with("a.py"));
        assert!(km.path_of("2Aa").unwrap().ends_with("pkg"));
        assert!(km.path_of("2Aa1").unwrap().ends_with("util.py"));
    }

    #[test]
    fn rescan_of_unchanged_tree_is_byte_identical_p6() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("src");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.py"), "").unwrap();
        fs::write(root.join("b.py"), "").unwrap();

        let (excluded_dirs, excluded_extensions) = opts();
        let gen_opts = GenerateKeysOptions {
            excluded_dirs: &excluded_dirs,
            excluded_extensions: &excluded_extensions,
            excluded_path_prefixes: &[],
        };
        let first = generate_keys(&[root.clone()], &gen_opts).unwrap();
        let second = generate_keys(&[root.clone()], &gen_opts).unwrap();

        let mut first_keys: Vec<_> = first.key_to_path.into_iter().collect();
        let mut second_keys: Vec<_> = second.key_to_path.into_iter().collect();
        first_keys.sort();
        second_keys.sort();
        assert_eq!(first_keys, second_keys);
    }

    #[test]
    fn excludes_dotfiles_mini_trackers_and_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("src");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(".hidden"), "").unwrap();
        fs::write(root.join("foo_module.md"), "").unwrap();
        fs::write(root.join("bin.pyc"), "").unwrap();
        fs::write(root.join("keep.py"), "").unwrap();

        let excluded_dirs = HashSet::new();
        let mut excluded_extensions = HashSet::new();
        excluded_extensions.insert(".pyc".to_string());
        let gen_opts = GenerateKeysOptions {
            excluded_dirs: &excluded_dirs,
            excluded_extensions: &excluded_extensions,
            excluded_path_prefixes: &[],
        };
        let km = generate_keys(&[root.clone()], &gen_opts).unwrap();
        let paths: Vec<&str> = km.key_to_path.values().map(|s| s.as_str()).collect();
        assert!(paths.iter().any(|p| p.ends_with("keep.py")));
        assert!(!paths.iter().any(|p| p.ends_with(".hidden")));
        assert!(!paths.iter().any(|p| p.ends_with("foo_module.md")));
        assert!(!paths.iter().any(|p| p.ends_with("bin.pyc")));
    }
}
