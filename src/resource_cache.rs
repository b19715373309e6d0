//! Static resource cache (C5): request path -> in-memory file snapshot.
//!
//! Grounded on `examples/original_source/include/io/resource_locator.h`
//! (`"static" + path` resolution, extension-keyed MIME lookup). Entries
//! never evict — `spec.md` §9's Design Notes flag this as a known limit
//! rather than a defect to fix blindly; see `DESIGN.md`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::mime;

struct Entry {
    bytes: Arc<Vec<u8>>,
    mime: &'static str,
    hits: AtomicU64,
}

/// A resolved static resource: shared bytes plus its MIME type.
#[derive(Clone)]
pub struct CachedResource {
    /// File contents, shared with the cache (no copy on hit).
    pub bytes: Arc<Vec<u8>>,
    /// MIME type resolved from the file extension.
    pub mime: &'static str,
}

/// Maps request paths to file snapshots rooted at a fixed directory.
pub struct ResourceCache {
    root: PathBuf,
    table: Mutex<HashMap<String, Arc<Entry>>>,
}

impl ResourceCache {
    /// Creates a cache rooted at `root` (e.g. `./static`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `path` (leading slash included) against the cache, reading
    /// and caching the backing file on first access. Returns `None` if the
    /// file cannot be read.
    pub fn locate(&self, path: &str) -> Option<CachedResource> {
        let mut table = self.table.lock().unwrap();

        if let Some(entry) = table.get(path) {
            entry.hits.fetch_add(1, Ordering::Relaxed);
            return Some(CachedResource {
                bytes: entry.bytes.clone(),
                mime: entry.mime,
            });
        }

        let fs_path = self.resolve(path);
        let bytes = std::fs::read(&fs_path).ok()?;
        let mime = mime::lookup(path);
        let entry = Arc::new(Entry {
            bytes: Arc::new(bytes),
            mime,
            hits: AtomicU64::new(1),
        });

        table.insert(path.to_string(), entry.clone());
        Some(CachedResource {
            bytes: entry.bytes.clone(),
            mime: entry.mime,
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Number of distinct paths currently cached. Used by diagnostics/tests.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    /// Whether any path is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<Path> for ResourceCache {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}
