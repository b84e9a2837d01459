use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{KrownoError, Result};
use crate::hash::sha256;

/// One unique content blob in the pool.
#[derive(Clone, Debug)]
pub struct DedupEntry {
    pub hash: [u8; 32],
    pub size: u64,
    pub refcount: u64,
    /// Location relative to the pool root: `<hex[..2]>/<hex>`.
    pub rel_path: PathBuf,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DedupStats {
    pub unique: u64,
    pub total_refs: u64,
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    pub savings_pct: f64,
}

/// Content-addressable copy-on-write file pool keyed by SHA-256,
/// ref-counted. Not safe for concurrent mutation; callers serialise.
pub struct DedupStore {
    pool: PathBuf,
    index: BTreeMap<String, DedupEntry>,
}

impl DedupStore {
    pub fn create(pool: impl Into<PathBuf>) -> Result<Self> {
        let pool = pool.into();
        fs::create_dir_all(&pool)?;
        Ok(Self {
            pool,
            index: BTreeMap::new(),
        })
    }

    pub fn pool_dir(&self) -> &Path {
        &self.pool
    }

    /// Register a file's content. Returns `true` iff the content was
    /// new; a repeated content only bumps the refcount.
    pub fn add(&mut self, path: &Path) -> Result<bool> {
        let hash = sha256::digest_file(path)?;
        let id = hex::encode(hash);
        if let Some(entry) = self.index.get_mut(&id) {
            entry.refcount += 1;
            debug!(id = %id, refcount = entry.refcount, "duplicate content");
            return Ok(false);
        }

        let shard = self.pool.join(&id[..2]);
        fs::create_dir_all(&shard)?;
        let dst = shard.join(&id);
        fs::copy(path, &dst).map_err(|e| KrownoError::from_io_path(e, path))?;
        let size = fs::metadata(&dst)?.len();
        self.index.insert(
            id.clone(),
            DedupEntry {
                hash,
                size,
                refcount: 1,
                rel_path: PathBuf::from(&id[..2]).join(&id),
            },
        );
        Ok(true)
    }

    /// Pool location for a candidate file's content, if stored.
    pub fn lookup(&self, path: &Path) -> Result<Option<PathBuf>> {
        let id = hex::encode(sha256::digest_file(path)?);
        Ok(self.index.get(&id).map(|e| self.pool.join(&e.rel_path)))
    }

    /// Drop one reference to a file's content. The physical blob is
    /// removed only when the refcount reaches zero. Returns `true` when
    /// the blob was physically deleted.
    pub fn release(&mut self, path: &Path) -> Result<bool> {
        let id = hex::encode(sha256::digest_file(path)?);
        let Some(entry) = self.index.get_mut(&id) else {
            return Ok(false);
        };
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return Ok(false);
        }
        let victim = self.pool.join(&entry.rel_path);
        self.index.remove(&id);
        fs::remove_file(&victim)?;
        Ok(true)
    }

    pub fn stats(&self) -> DedupStats {
        let mut stats = DedupStats {
            unique: self.index.len() as u64,
            ..Default::default()
        };
        for entry in self.index.values() {
            stats.total_refs += entry.refcount;
            stats.logical_bytes += entry.size * entry.refcount;
            stats.physical_bytes += entry.size;
        }
        if stats.logical_bytes > 0 {
            stats.savings_pct = (stats.logical_bytes - stats.physical_bytes) as f64
                / stats.logical_bytes as f64
                * 100.0;
        }
        stats
    }
}
