//! Path-level operations on the stats filesystem.
//!
//! [`StatsCore`] is the process-wide context: it is built once at startup,
//! shared with the FUSE adapter, and dropped at exit. Every filesystem verb
//! is a [`PathOps`] method; verbs the filesystem does not support return
//! [`NgxError::Unsupported`] explicitly.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::NgxConfig;
use crate::error::{NgxError, Result};
use crate::fs::resolver::{self, EntryKind};
use crate::state::attr_cache::{AttributeCache, EntryAttr};
use crate::state::counter::StatusCounter;

/// One method per filesystem verb, addressed by absolute path.
pub trait PathOps {
    fn getattr(&self, path: &str) -> Result<EntryAttr>;
    fn open(&self, path: &str) -> Result<()>;
    fn access(&self, path: &str) -> Result<()>;
    fn read(&self, path: &str, offset: u64, size: u32) -> Result<Vec<u8>>;
    fn write(&self, path: &str, data: &[u8]) -> Result<u32>;
    fn truncate(&self, path: &str) -> Result<()>;
    fn release(&self, path: &str) -> Result<()>;
    fn readdir(&self, path: &str) -> Result<Vec<(&'static str, EntryKind)>>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    fn rmdir(&self, path: &str) -> Result<()>;
    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;
    fn create(&self, path: &str, mode: u32) -> Result<()>;
    fn unlink(&self, path: &str) -> Result<()>;
    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()>;
    fn chmod(&self, path: &str, mode: u32) -> Result<()>;
    fn utimens(&self, path: &str) -> Result<()>;
}

pub struct StatsCore {
    counter: StatusCounter,
    cache: AttributeCache,
}

impl StatsCore {
    pub fn new(uid: u32, gid: u32, lock_timeout: Duration) -> Self {
        Self {
            counter: StatusCounter::new(lock_timeout),
            cache: AttributeCache::new(uid, gid, lock_timeout),
        }
    }

    pub fn from_config(config: &NgxConfig) -> Self {
        Self::new(config.uid, config.gid, config.lock_timeout)
    }

    pub fn counter(&self) -> &StatusCounter {
        &self.counter
    }

    pub fn cache(&self) -> &AttributeCache {
        &self.cache
    }

    /// Current counts, or an empty string if the counter lock is unavailable.
    pub fn snapshot(&self) -> String {
        match self.counter.snapshot() {
            Ok(s) => s,
            Err(e) => {
                error!("snapshot degraded to empty: {}", e);
                String::new()
            }
        }
    }

    /// Resolve `path` and materialize its record, failing for unknown paths.
    fn known(&self, path: &str) -> Result<(u64, EntryKind)> {
        let (hash, kind) = resolver::classify_path(path);
        match self.cache.lookup(hash) {
            Ok(_) => Ok((hash, kind)),
            Err(NgxError::NotFound { .. }) => Err(NgxError::not_found(path)),
            Err(e) => Err(e),
        }
    }

    fn counter_file(&self, path: &str, op: &'static str) -> Result<u64> {
        match self.known(path)? {
            (hash, EntryKind::CounterFile) => Ok(hash),
            (_, EntryKind::Directory) => Err(NgxError::unsupported(op, path)),
            (_, EntryKind::Unknown) => Err(NgxError::not_found(path)),
        }
    }
}

impl PathOps for StatsCore {
    fn getattr(&self, path: &str) -> Result<EntryAttr> {
        let (hash, _) = self.known(path)?;
        self.cache.attr(hash)
    }

    fn open(&self, path: &str) -> Result<()> {
        self.known(path).map(|_| ())
    }

    fn access(&self, path: &str) -> Result<()> {
        self.known(path).map(|_| ())
    }

    fn read(&self, path: &str, offset: u64, size: u32) -> Result<Vec<u8>> {
        let (_, kind) = self.known(path)?;
        if kind != EntryKind::CounterFile {
            return Err(NgxError::not_found(path));
        }
        let snapshot = self.snapshot();
        let bytes = snapshot.as_bytes();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= bytes.len() {
            return Ok(Vec::new());
        }
        let end = std::cmp::min(start.saturating_add(size as usize), bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<u32> {
        let hash = self.counter_file(path, "write")?;

        // Only the first byte carries the class; the payload is not stored.
        match data.first() {
            Some(&byte) => {
                let class = i32::from(byte) - i32::from(b'0');
                match self.counter.increment(class) {
                    Ok(true) => debug!("counted status class {}", class),
                    Ok(false) => {}
                    Err(e) => error!("increment of class {} dropped: {}", class, e),
                }
            }
            None => debug!("empty write to {}", path),
        }

        if let Err(e) = self.cache.record_write(hash) {
            warn!("write time not recorded for {}: {}", path, e);
        }

        // Malformed payloads still report the full length.
        Ok(u32::try_from(data.len()).unwrap_or(u32::MAX))
    }

    fn truncate(&self, path: &str) -> Result<()> {
        self.counter_file(path, "truncate")?;
        match self.counter.reset() {
            Ok(()) => debug!("counters reset via truncate"),
            Err(e) => error!("reset skipped: {}", e),
        }
        Ok(())
    }

    fn release(&self, path: &str) -> Result<()> {
        let (hash, _) = self.known(path)?;
        match self.cache.commit_pending(hash) {
            Ok(true) => debug!("committed write time for {}", path),
            Ok(false) => {}
            Err(e) => warn!("write time not committed for {}: {}", path, e),
        }
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<(&'static str, EntryKind)>> {
        match self.known(path)? {
            (_, EntryKind::Directory) => Ok(resolver::list_dir().to_vec()),
            _ => Err(NgxError::NotADirectory {
                path: path.to_string(),
            }),
        }
    }

    fn rename(&self, from: &str, _to: &str) -> Result<()> {
        Err(NgxError::unsupported("rename", from))
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        Err(NgxError::unsupported("rmdir", path))
    }

    fn mkdir(&self, path: &str, _mode: u32) -> Result<()> {
        Err(NgxError::unsupported("mkdir", path))
    }

    fn create(&self, path: &str, _mode: u32) -> Result<()> {
        Err(NgxError::unsupported("create", path))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        Err(NgxError::unsupported("unlink", path))
    }

    fn chown(&self, path: &str, _uid: Option<u32>, _gid: Option<u32>) -> Result<()> {
        Err(NgxError::unsupported("chown", path))
    }

    fn chmod(&self, path: &str, _mode: u32) -> Result<()> {
        Err(NgxError::unsupported("chmod", path))
    }

    fn utimens(&self, path: &str) -> Result<()> {
        Err(NgxError::unsupported("utimens", path))
    }
}
