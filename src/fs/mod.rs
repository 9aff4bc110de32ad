pub mod attr;
pub mod ops;
pub mod resolver;

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    AccessFlags, BsdFileFlags, Errno, FileHandle, FileType, Filesystem, FopenFlags, Generation,
    INodeNo, KernelConfig, LockOwner, OpenFlags, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, RenameFlags,
    Request, TimeOrNow, WriteFlags,
};
use tracing::{debug, info, warn};

use self::attr::*;
use self::ops::{PathOps, StatsCore};
use self::resolver::{EntryKind, ROOT_PATH};
use crate::config::NgxConfig;
use crate::error::NgxError;

const TTL: Duration = Duration::from_secs(1);

/// Map a core error onto the errno returned to the kernel.
pub fn to_errno(e: &NgxError) -> Errno {
    match e {
        NgxError::NotFound { .. } => Errno::ENOENT,
        // Disabled verbs look like a permission problem to callers.
        NgxError::Unsupported { .. } => Errno::EACCES,
        NgxError::NotADirectory { .. } => Errno::ENOTDIR,
        NgxError::LockUnavailable { .. } => Errno::EAGAIN,
        NgxError::Io(_) | NgxError::Mount(_) | NgxError::Config(_) => Errno::EIO,
    }
}

/// Absolute path of `name` inside the root directory.
fn child_path(name: &OsStr) -> Option<String> {
    name.to_str().map(|n| format!("/{}", n))
}

/// FUSE bridge: translates inode-addressed kernel requests into [`PathOps`]
/// calls on the shared [`StatsCore`].
pub struct NgxFs {
    pub config: NgxConfig,
    pub core: Arc<StatsCore>,
}

impl NgxFs {
    pub fn new(config: NgxConfig, core: Arc<StatsCore>) -> Self {
        Self { config, core }
    }

    /// Path for an inode, or the errno to reply with.
    fn path_of(ino: INodeNo) -> Result<&'static str, Errno> {
        ino_to_path(u64::from(ino)).ok_or(Errno::ENOENT)
    }

    /// Resolve a directory entry, requiring the parent to be the root.
    fn resolve_child(&self, parent: INodeNo, name: &OsStr) -> Result<String, Errno> {
        let parent_path = Self::path_of(parent)?;
        if parent_path != ROOT_PATH {
            return Err(to_errno(&NgxError::NotADirectory {
                path: parent_path.to_string(),
            }));
        }
        child_path(name).ok_or(Errno::ENOENT)
    }

    fn reply_attr(&self, path: &str, reply: ReplyAttr) {
        match self.core.getattr(path) {
            Ok(attr) => reply.attr(&TTL, &entry_to_file_attr(&attr)),
            Err(e) => reply.error(to_errno(&e)),
        }
    }
}

impl Filesystem for NgxFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::io::Result<()> {
        info!("ngxfs filesystem initialized at {}", self.config.mountpoint.display());
        // Materialize both entries so their creation time is the mount time.
        for path in [ROOT_PATH, resolver::COUNTER_PATH] {
            if let Err(e) = self.core.getattr(path) {
                warn!("could not create {}: {}", path, e);
            }
        }
        Ok(())
    }

    fn destroy(&mut self) {
        info!(
            "ngxfs filesystem shutting down, final counts {}",
            self.core.snapshot().trim_end()
        );
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", u64::from(parent), name);

        let path = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.core.getattr(&path) {
            Ok(attr) => reply.entry(&TTL, &entry_to_file_attr(&attr), Generation(0)),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        debug!("getattr(ino={})", u64::from(ino));

        match Self::path_of(ino) {
            Ok(path) => self.reply_attr(path, reply),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        debug!("setattr(ino={}, size={:?})", u64::from(ino), size);

        let path = match Self::path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        let result = if let Some(mode) = mode {
            self.core.chmod(path, mode)
        } else if uid.is_some() || gid.is_some() {
            self.core.chown(path, uid, gid)
        } else if size.is_some() {
            // Any truncate of the counter file resets the counts. The kernel
            // may send mtime alongside the size; that is not a utimens.
            self.core.truncate(path)
        } else if atime.is_some() || mtime.is_some() {
            self.core.utimens(path)
        } else {
            Ok(())
        };

        match result {
            Ok(()) => self.reply_attr(path, reply),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        debug!("open(ino={}, flags={})", u64::from(ino), flags.0);

        let path = match Self::path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.core.open(path) {
            Ok(()) if path == resolver::COUNTER_PATH => {
                // Bypass the page cache so reads are not clipped to the
                // advertised size.
                reply.opened(FileHandle(0), FopenFlags::FOPEN_DIRECT_IO)
            }
            Ok(()) => reply.opened(FileHandle(0), FopenFlags::empty()),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, offset={}, size={})", u64::from(ino), offset, size);

        let path = match Self::path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.core.read(path, offset, size) {
            Ok(bytes) => reply.data(&bytes),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, offset={}, size={})", u64::from(ino), offset, data.len());

        let path = match Self::path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        match self.core.write(path, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn flush(&self, _req: &Request, ino: INodeNo, _fh: FileHandle, _lock_owner: LockOwner, reply: ReplyEmpty) {
        debug!("flush(ino={})", u64::from(ino));
        reply.ok();
    }

    fn release(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={})", u64::from(ino));

        let result = Self::path_of(ino).and_then(|p| self.core.release(p).map_err(|e| to_errno(&e)));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        debug!("opendir(ino={})", u64::from(ino));

        match Self::path_of(ino) {
            Ok(ROOT_PATH) => reply.opened(FileHandle(0), FopenFlags::empty()),
            Ok(path) => reply.error(to_errno(&NgxError::NotADirectory {
                path: path.to_string(),
            })),
            Err(e) => reply.error(e),
        }
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", u64::from(ino), offset);

        let path = match Self::path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let entries = match self.core.readdir(path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(to_errno(&e));
                return;
            }
        };

        for (i, (name, kind)) in entries.iter().enumerate().skip(offset as usize) {
            let entry_ino = match kind {
                EntryKind::CounterFile => resolver::counter_hash(),
                _ => ROOT_INO,
            };
            let file_type: FileType = kind_to_filetype(*kind);
            if reply.add(INodeNo(entry_ino), (i + 1) as u64, file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&self, _req: &Request, _ino: INodeNo, _fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        reply.ok();
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, mode={:#o})", u64::from(parent), name, mode);

        let err = self
            .resolve_child(parent, name)
            .and_then(|p| self.core.create(&p, mode).map_err(|e| to_errno(&e)))
            .err()
            .unwrap_or(Errno::EACCES);
        reply.error(err);
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:#o})", u64::from(parent), name, mode);

        let err = self
            .resolve_child(parent, name)
            .and_then(|p| self.core.mkdir(&p, mode).map_err(|e| to_errno(&e)))
            .err()
            .unwrap_or(Errno::EACCES);
        reply.error(err);
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", u64::from(parent), name);

        let result = self
            .resolve_child(parent, name)
            .and_then(|p| self.core.unlink(&p).map_err(|e| to_errno(&e)));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", u64::from(parent), name);

        let result = self
            .resolve_child(parent, name)
            .and_then(|p| self.core.rmdir(&p).map_err(|e| to_errno(&e)));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        _flags: RenameFlags,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            u64::from(parent),
            name,
            u64::from(newparent),
            newname
        );

        let from = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let to = child_path(newname).unwrap_or_default();
        match self.core.rename(&from, &to) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn symlink(
        &self,
        _req: &Request,
        parent: INodeNo,
        link_name: &OsStr,
        _target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        debug!("symlink(parent={}, name={:?})", u64::from(parent), link_name);
        let path = child_path(link_name).unwrap_or_default();
        reply.error(to_errno(&NgxError::unsupported("symlink", path)));
    }

    fn link(
        &self,
        _req: &Request,
        ino: INodeNo,
        _newparent: INodeNo,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let path = ino_to_path(u64::from(ino)).unwrap_or_default();
        reply.error(to_errno(&NgxError::unsupported("link", path)));
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        // Two entries, no free space.
        reply.statfs(2, 0, 0, 2, 0, BLOCK_SIZE, 255, BLOCK_SIZE);
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={:?})", u64::from(ino), mask);

        let result = Self::path_of(ino).and_then(|p| self.core.access(p).map_err(|e| to_errno(&e)));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }
}
