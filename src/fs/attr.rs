/// Conversions between core records and fuser types.
use fuser::{FileAttr, FileType, INodeNo};

use crate::fs::resolver::{self, EntryKind, COUNTER_PATH, ROOT_PATH};
use crate::state::attr_cache::EntryAttr;

/// Inode the kernel uses for the mount root.
pub const ROOT_INO: u64 = 1;

pub const BLOCK_SIZE: u32 = 512;

pub fn kind_to_filetype(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        _ => FileType::RegularFile,
    }
}

/// Kernel inode for a path hash. The root is pinned to [`ROOT_INO`].
pub fn hash_to_ino(hash: u64) -> u64 {
    if hash == resolver::root_hash() {
        ROOT_INO
    } else {
        hash
    }
}

/// Path for a kernel inode, if it names one of the virtual entries.
pub fn ino_to_path(ino: u64) -> Option<&'static str> {
    if ino == ROOT_INO {
        return Some(ROOT_PATH);
    }
    match resolver::classify(ino) {
        EntryKind::Directory => Some(ROOT_PATH),
        EntryKind::CounterFile => Some(COUNTER_PATH),
        EntryKind::Unknown => None,
    }
}

pub fn entry_to_file_attr(attr: &EntryAttr) -> FileAttr {
    FileAttr {
        ino: INodeNo(hash_to_ino(attr.ino)),
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: kind_to_filetype(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}
