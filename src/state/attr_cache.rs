use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{NgxError, Result};
use crate::fs::resolver::{self, EntryKind, COUNTER_NAME, ROOT_PATH};

/// Reported size of every virtual entry.
pub const ENTRY_SIZE: u64 = 4096;
pub const ENTRY_PERM: u16 = 0o777;

/// Index of a record in the cache arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(usize);

#[derive(Debug, Clone, Copy)]
struct EntryTimes {
    atime: SystemTime,
    mtime: SystemTime,
    /// Time of the most recent write, committed to mtime/atime on release.
    pending_write: SystemTime,
}

/// A synthetic filesystem node. Identity fields are fixed at creation;
/// only the timestamps mutate.
#[derive(Debug)]
pub struct VirtualEntry {
    pub kind: EntryKind,
    pub ino: u64,
    pub name: &'static str,
    pub uid: u32,
    pub gid: u32,
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u64,
    pub ctime: SystemTime,
    times: Mutex<EntryTimes>,
}

/// Point-in-time copy of a [`VirtualEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttr {
    pub kind: EntryKind,
    pub ino: u64,
    pub name: &'static str,
    pub uid: u32,
    pub gid: u32,
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub pending_write: SystemTime,
}

impl VirtualEntry {
    fn new(kind: EntryKind, ino: u64, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        let name = match kind {
            EntryKind::CounterFile => COUNTER_NAME,
            _ => ROOT_PATH,
        };
        Self {
            kind,
            ino,
            name,
            uid,
            gid,
            perm: ENTRY_PERM,
            nlink: 1,
            size: ENTRY_SIZE,
            blocks: 1,
            ctime: now,
            times: Mutex::new(EntryTimes {
                atime: now,
                mtime: now,
                pending_write: now,
            }),
        }
    }

    fn times(&self, timeout: Duration) -> Result<parking_lot::MutexGuard<'_, EntryTimes>> {
        self.times
            .try_lock_for(timeout)
            .ok_or(NgxError::LockUnavailable {
                what: "entry timestamps",
            })
    }

    pub fn attr(&self, timeout: Duration) -> Result<EntryAttr> {
        let times = *self.times(timeout)?;
        Ok(EntryAttr {
            kind: self.kind,
            ino: self.ino,
            name: self.name,
            uid: self.uid,
            gid: self.gid,
            perm: self.perm,
            nlink: self.nlink,
            size: self.size,
            blocks: self.blocks,
            atime: times.atime,
            mtime: times.mtime,
            ctime: self.ctime,
            pending_write: times.pending_write,
        })
    }

    /// Stamp a write at the current time without touching mtime/atime.
    /// The clock is read under the timestamp lock so concurrent writers
    /// stamp in lock order.
    pub fn record_write(&self, timeout: Duration) -> Result<()> {
        let mut times = self.times(timeout)?;
        let now = SystemTime::now();
        if now > times.pending_write {
            times.pending_write = now;
        }
        Ok(())
    }

    /// Stamp a write at `at`. The pending time never moves backwards.
    pub fn record_write_at(&self, at: SystemTime, timeout: Duration) -> Result<()> {
        let mut times = self.times(timeout)?;
        if at > times.pending_write {
            times.pending_write = at;
        }
        Ok(())
    }

    /// Commit the pending write time if it differs from mtime.
    /// Returns whether the timestamps changed.
    pub fn commit_pending(&self, timeout: Duration) -> Result<bool> {
        let mut times = self.times(timeout)?;
        if times.pending_write == times.mtime {
            return Ok(false);
        }
        times.mtime = times.pending_write;
        times.atime = times.pending_write;
        Ok(true)
    }
}

/// Arena of virtual entries keyed by path hash. Only the two reserved
/// hashes ever get a record; records are never evicted.
pub struct AttributeCache {
    index: DashMap<u64, EntryHandle>,
    arena: RwLock<Vec<Arc<VirtualEntry>>>,
    uid: u32,
    gid: u32,
    lock_timeout: Duration,
}

impl AttributeCache {
    pub fn new(uid: u32, gid: u32, lock_timeout: Duration) -> Self {
        Self {
            index: DashMap::new(),
            arena: RwLock::new(Vec::with_capacity(2)),
            uid,
            gid,
            lock_timeout,
        }
    }

    /// Find the record for `hash`, materializing it on first access.
    pub fn lookup(&self, hash: u64) -> Result<EntryHandle> {
        let kind = resolver::classify(hash);
        if kind == EntryKind::Unknown {
            return Err(NgxError::not_found(format!("ino {:#018x}", hash)));
        }

        if let Some(handle) = self.index.get(&hash) {
            return Ok(*handle);
        }

        // The shard write lock held by the entry API makes creation
        // single-writer; racing callers see the occupied slot.
        match self.index.entry(hash) {
            Entry::Occupied(o) => Ok(*o.get()),
            Entry::Vacant(v) => {
                let mut arena = self
                    .arena
                    .try_write_for(self.lock_timeout)
                    .ok_or(NgxError::LockUnavailable {
                        what: "attribute arena",
                    })?;
                let handle = EntryHandle(arena.len());
                arena.push(Arc::new(VirtualEntry::new(kind, hash, self.uid, self.gid)));
                v.insert(handle);
                debug!("created {:?} entry ino={:#x} at slot {}", kind, hash, handle.0);
                Ok(handle)
            }
        }
    }

    pub fn entry(&self, handle: EntryHandle) -> Result<Arc<VirtualEntry>> {
        let arena = self
            .arena
            .try_read_for(self.lock_timeout)
            .ok_or(NgxError::LockUnavailable {
                what: "attribute arena",
            })?;
        arena
            .get(handle.0)
            .cloned()
            .ok_or_else(|| NgxError::not_found(format!("slot {}", handle.0)))
    }

    /// Lookup and fetch the shared record in one step.
    pub fn get(&self, hash: u64) -> Result<Arc<VirtualEntry>> {
        let handle = self.lookup(hash)?;
        self.entry(handle)
    }

    pub fn attr(&self, hash: u64) -> Result<EntryAttr> {
        self.get(hash)?.attr(self.lock_timeout)
    }

    pub fn record_write(&self, hash: u64) -> Result<()> {
        self.get(hash)?.record_write(self.lock_timeout)
    }

    pub fn record_write_at(&self, hash: u64, at: SystemTime) -> Result<()> {
        self.get(hash)?.record_write_at(at, self.lock_timeout)
    }

    pub fn commit_pending(&self, hash: u64) -> Result<bool> {
        self.get(hash)?.commit_pending(self.lock_timeout)
    }

    /// Number of materialized records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
