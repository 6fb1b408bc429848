//! Cache Layer (C2): named in-memory LRU caches, each guarded by its own
//! mutex, plus `(path, mtime)`-keyed file reads with cascading invalidation.
//! Mirrors `cline_utils.dependency_system.utils.cache_manager`; the LRU
//! storage itself is modeled on the teacher's content-addressed caches in
//! `memory_layer/cache.rs`, swapped from a SQLite-backed artifact store to
//! plain in-process `lru::LruCache` maps since nothing here needs to survive
//! past a single run.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use lru::LruCache;
use regex::Regex;
use serde_json::Value;

const DEFAULT_CAPACITY: usize = 512;

/// One named cache: string keys to arbitrary JSON-serializable values, plus
/// a reverse dependency-key -> declaring-keys map mirroring the original
/// `*_cache_dependencies` dicts.
struct NamedCache {
    entries: Mutex<LruCache<String, Value>>,
    dependents: Mutex<HashMap<String, Vec<String>>>,
}

impl NamedCache {
    fn new(capacity: usize) -> Self {
        NamedCache {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
            dependents: Mutex::new(HashMap::new()),
        }
    }
}

/// The fixed set of named caches the pipeline shares across a run:
/// `tracker_data`, `file_analysis`, `file_contents`, `ast_cache`,
/// `embeddings_similarity`, `path`, `metadata`.
pub struct CacheManager {
    caches: HashMap<&'static str, NamedCache>,
}

pub const CACHE_NAMES: &[&str] = &[
    "tracker_data",
    "file_analysis",
    "file_contents",
    "ast_cache",
    "embeddings_similarity",
    "path",
    "metadata",
];

impl Default for CacheManager {
    fn default() -> Self {
        let mut caches = HashMap::new();
        for name in CACHE_NAMES {
            caches.insert(*name, NamedCache::new(DEFAULT_CAPACITY));
        }
        CacheManager { caches }
    }
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache(&self, name: &str) -> &NamedCache {
        self.caches
            .get(name)
            .unwrap_or_else(|| panic!("unknown cache name: {name}"))
    }

    pub fn get(&self, cache_name: &str, key: &str) -> Option<Value> {
        self.cache(cache_name).entries.lock().unwrap().get(key).cloned()
    }

    /// Insert `key -> value`. `dependencies`, if given, declares that this
    /// entry should be dropped whenever any of those dependency keys is
    /// invalidated via `invalidate_dependency_key` — mirroring
    /// `set_in_*_cache`'s optional `dependencies` parameter.
    pub fn put(&self, cache_name: &str, key: &str, value: Value, dependencies: Option<&[String]>) {
        let cache = self.cache(cache_name);
        cache.entries.lock().unwrap().put(key.to_string(), value);
        if let Some(deps) = dependencies {
            let mut dependents = cache.dependents.lock().unwrap();
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(key.to_string());
            }
        }
    }

    /// Drop every entry whose key matches `pattern` in every named cache.
    /// Used for cascading invalidation: a write to path `p` invalidates all
    /// `(p, *)`-keyed entries across `tracker_data`, `file_analysis`, etc.
    pub fn invalidate_matching(&self, pattern: &str) -> anyhow::Result<usize> {
        let re = Regex::new(pattern)?;
        let mut removed = 0;
        for cache in self.caches.values() {
            let mut guard = cache.entries.lock().unwrap();
            let stale: Vec<String> = guard.iter().map(|(k, _)| k.clone()).filter(|k| re.is_match(k)).collect();
            for key in stale {
                guard.pop(&key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Invalidate every entry in `cache_name` that declared `dependency_key`
    /// as one of its dependencies, then recursively invalidate entries that
    /// in turn declared *those* entries' keys as a dependency — mirroring
    /// `invalidate_dependent_entries`'s walk up the `*_cache_dependencies`
    /// chain one popped key at a time.
    pub fn invalidate_dependency_key(&self, cache_name: &str, dependency_key: &str) {
        let cache = self.cache(cache_name);
        let dependent_keys = {
            let mut dependents = cache.dependents.lock().unwrap();
            dependents.remove(dependency_key)
        };
        let Some(dependent_keys) = dependent_keys else { return };
        let mut entries = cache.entries.lock().unwrap();
        for dep_key in dependent_keys {
            if entries.pop(&dep_key).is_some() {
                drop(entries);
                self.invalidate_dependency_key(cache_name, &dep_key);
                entries = cache.entries.lock().unwrap();
            }
        }
    }

    pub fn clear(&self, cache_name: &str) {
        self.cache(cache_name).entries.lock().unwrap().clear();
    }

    pub fn clear_all(&self) {
        for cache in self.caches.values() {
            cache.entries.lock().unwrap().clear();
        }
    }

    pub fn len(&self, cache_name: &str) -> usize {
        self.cache(cache_name).entries.lock().unwrap().len()
    }
}

/// Current mtime of `path` as seconds since the epoch, or `None` if the file
/// can't be stat'd. Used to build `(path, mtime)` cache keys.
pub fn file_mtime_secs(path: &Path) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

pub fn file_cache_key(path: &Path, mtime: u64) -> String {
    format!("{}:{mtime}", path.to_string_lossy())
}

/// Read and UTF-8-decode a file, served from `file_contents` keyed on
/// `(path, mtime)` so a modification transparently yields a cache miss.
pub fn read_file_cached(cache: &CacheManager, path: &Path) -> anyhow::Result<String> {
    let mtime = file_mtime_secs(path).unwrap_or(0);
    let key = file_cache_key(path, mtime);
    if let Some(Value::String(s)) = cache.get("file_contents", &key) {
        return Ok(s);
    }
    let content = std::fs::read_to_string(path)?;
    cache.put("file_contents", &key, Value::String(content.clone()), None);
    Ok(content)
}

/// Compares `path`'s current mtime against `last_known_mtime`; on a
/// mismatch, invalidates every cache entry keyed on that path (across all
/// named caches) and returns the fresh mtime.
pub fn check_file_modified(cache: &CacheManager, path: &Path, last_known_mtime: Option<u64>) -> anyhow::Result<(bool, Option<u64>)> {
    let current = file_mtime_secs(path);
    if current != last_known_mtime {
        let escaped = regex::escape(&path.to_string_lossy());
        cache.invalidate_matching(&format!("^{escaped}:"))?;
        return Ok((true, current));
    }
    Ok((false, current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn put_then_get_round_trips() {
        let cache = CacheManager::new();
        cache.put("path", "1A", Value::String("/src/main.py".into()), None);
        assert_eq!(cache.get("path", "1A"), Some(Value::String("/src/main.py".into())));
        assert_eq!(cache.get("path", "missing"), None);
    }

    #[test]
    fn invalidate_matching_clears_across_all_named_caches() {
        let cache = CacheManager::new();
        cache.put("tracker_data", "/a.py:100", Value::Bool(true), None);
        cache.put("file_analysis", "/a.py:100:false", Value::Bool(true), None);
        cache.put("file_analysis", "/b.py:100:false", Value::Bool(true), None);

        let removed = cache.invalidate_matching(r"^/a\.py:").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.get("tracker_data", "/a.py:100"), None);
        assert!(cache.get("file_analysis", "/b.py:100:false").is_some());
    }

    #[test]
    fn invalidate_dependency_key_cascades_transitively() {
        let cache = CacheManager::new();
        // "mod:a" depends on key "file:a.py"; "rollup:x" in turn depends on
        // "mod:a" itself, so invalidating "file:a.py" must also drop
        // "rollup:x" once "mod:a" is popped — mirroring
        // `invalidate_dependent_entries`'s walk up the chain.
        cache.put(
            "tracker_data",
            "mod:a",
            Value::Bool(true),
            Some(&["file:a.py".to_string()]),
        );
        cache.put(
            "tracker_data",
            "rollup:x",
            Value::Bool(true),
            Some(&["mod:a".to_string()]),
        );
        cache.put("tracker_data", "unrelated", Value::Bool(true), None);

        cache.invalidate_dependency_key("tracker_data", "file:a.py");

        assert_eq!(cache.get("tracker_data", "mod:a"), None);
        assert_eq!(cache.get("tracker_data", "rollup:x"), None);
        assert!(cache.get("tracker_data", "unrelated").is_some());
    }

    #[test]
    fn check_file_modified_detects_mtime_change_and_invalidates() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f.py");
        fs::write(&file, "a = 1").unwrap();
        let cache = CacheManager::new();
        let mtime0 = file_mtime_secs(&file);
        let key = file_cache_key(&file, mtime0.unwrap());
        cache.put("file_contents", &key, Value::String("a = 1".into()), None);

        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::write(&file, "a = 2").unwrap();
        // Force a detectable mtime bump on filesystems with coarse resolution.
        let bumped = SystemTime::now() + std::time::Duration::from_secs(2);
        let _ = filetime_touch(&file, bumped);

        let (changed, _new_mtime) = check_file_modified(&cache, &file, mtime0).unwrap();
        assert!(changed);
        assert_eq!(cache.get("file_contents", &key), None);
    }

    fn filetime_touch(path: &Path, time: SystemTime) -> std::io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(time)
    }
}
