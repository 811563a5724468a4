//! Whole-document JSON store.
//!
//! All state (users, devices, notifications) lives in one JSON file that is
//! rewritten in full on every mutation. The file is owned by a single
//! [`Store`]; every read-modify-write goes through [`Store::mutate`], which
//! holds one lock across apply + persist so concurrent requests cannot drop
//! each other's changes.
//!
//! A missing, unreadable or corrupt file never fails a request: the store
//! falls back to the seed document and logs a warning.

pub mod model;

pub use model::{
    Database, Device, Notification, NotificationKind, NotificationStatus, Permission, Role,
    ShareGrant, User, DEFAULT_ROOT_ADMIN,
};

use crate::error::DashboardResult;
use anyhow::Context;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Store {
    /// `None` for in-memory stores.
    path: Option<PathBuf>,
    doc: Mutex<Database>,
}

impl Store {
    /// Open (or create) the store file at `path`.
    pub fn open(path: &Path) -> Self {
        let doc = load(path);
        Self {
            path: Some(path.to_path_buf()),
            doc: Mutex::new(doc),
        }
    }

    /// Create a store that never touches disk (for tests).
    pub fn in_memory(doc: Database) -> Self {
        Self {
            path: None,
            doc: Mutex::new(doc),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the current document.
    pub fn read<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let doc = self.doc.lock();
        f(&doc)
    }

    /// Apply `f` to a working copy of the document and persist it.
    ///
    /// The in-memory document is replaced only after `f` succeeded and the
    /// write landed, so a failed operation has no visible side effect.
    pub fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Database) -> DashboardResult<T>,
    ) -> DashboardResult<T> {
        let mut doc = self.doc.lock();
        let mut working = doc.clone();
        let out = f(&mut working)?;
        if let Some(ref path) = self.path {
            save(path, &working)?;
        }
        *doc = working;
        Ok(out)
    }

    /// Clone of the current document.
    pub fn snapshot(&self) -> Database {
        self.doc.lock().clone()
    }
}

/// Load the document at `path`, falling back to the seed.
///
/// A missing file is created with the seed document. A corrupt file is left
/// alone; the next successful mutation overwrites it.
pub fn load(path: &Path) -> Database {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(doc) => {
                tracing::debug!(path = %path.display(), "store loaded");
                doc
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "corrupted store file, using seed data"
                );
                Database::seed()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let seed = Database::seed();
            match save(path, &seed) {
                Ok(()) => tracing::info!(path = %path.display(), "store created with seed data"),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to write seed store"
                ),
            }
            seed
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read store file, using seed data"
            );
            Database::seed()
        }
    }
}

/// Write the whole document to `path` atomically (temp file + rename).
pub fn save(path: &Path, doc: &Database) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create store directory: {}", dir.display()))?;

    let json = serde_json::to_string_pretty(doc).context("failed to serialize store")?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(json.as_bytes())
        .context("failed to write store contents")?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace store file: {}", path.display()))?;
    Ok(())
}
