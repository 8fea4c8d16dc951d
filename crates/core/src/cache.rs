use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::fingerprint::fingerprint;
use crate::search::SearchMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: String,
    pub context_data: Value,
}

/// Keyed store of previously computed search results.
///
/// Entries are write-once by convention: keys embed every input that affects
/// the result, so a given key is never expected to hold two different values.
pub trait ResultCache {
    /// Returns `None` for missing keys and for entries that cannot be parsed.
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError>;
}

impl<C: ResultCache + ?Sized> ResultCache for &C {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        (**self).get(key)
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        (**self).put(key, entry)
    }
}

/// Inputs that identify one cached search result.
#[derive(Debug, Clone)]
pub struct CacheKey<'a> {
    pub method: SearchMethod,
    pub project: &'a str,
    pub row: usize,
    pub community_level: u32,
    pub response_type: &'a str,
    pub query: &'a str,
}

impl CacheKey<'_> {
    pub fn render(&self) -> String {
        format!(
            "{}_search_{}_{}_{}_{}_{}",
            self.method.as_str(),
            self.project,
            self.row,
            self.community_level,
            slug(self.response_type),
            fingerprint(self.query)
        )
    }
}

fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

const MAX_PREFIX_CHARS: usize = 96;

/// One JSON file per key under `dir`.
#[derive(Debug, Clone)]
pub struct FileResultCache {
    dir: PathBuf,
}

impl FileResultCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

/// Readable prefix plus a digest of the full key. The prefix drops characters
/// that are unsafe in file names, so distinct keys can share it; the digest
/// keeps their files apart.
fn file_stem(key: &str) -> String {
    let prefix: String = key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_PREFIX_CHARS)
        .collect();
    let digest = blake3::hash(key.as_bytes());
    format!("{prefix}-{}", hex::encode(&digest.as_bytes()[..16]))
}

impl ResultCache for FileResultCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "unreadable cache entry: {err}");
                }
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(path = %path.display(), "corrupt cache entry treated as miss: {err}");
                None
            }
        }
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        tmp.write_all(&bytes).map_err(|source| CacheError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(&path).map_err(|source| CacheError::Persist {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "cache entry written");
        Ok(())
    }
}

/// In-process cache for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ResultCache for MemoryResultCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), entry.clone());
        Ok(())
    }
}
