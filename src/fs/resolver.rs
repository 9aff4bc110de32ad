/// Path identity and classification for the two virtual entries.
use xxhash_rust::xxh64::xxh64;

pub const ROOT_PATH: &str = "/";
pub const COUNTER_PATH: &str = "/access.log";
pub const COUNTER_NAME: &str = "access.log";

/// Seed used for every path hash.
const PATH_HASH_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    CounterFile,
    Unknown,
}

/// Hash a canonical path string into its 64-bit identity.
/// Collisions are not resolved.
pub fn resolve(path: &str) -> u64 {
    xxh64(path.as_bytes(), PATH_HASH_SEED)
}

pub fn root_hash() -> u64 {
    resolve(ROOT_PATH)
}

pub fn counter_hash() -> u64 {
    resolve(COUNTER_PATH)
}

pub fn classify(hash: u64) -> EntryKind {
    if hash == root_hash() {
        EntryKind::Directory
    } else if hash == counter_hash() {
        EntryKind::CounterFile
    } else {
        EntryKind::Unknown
    }
}

/// Resolve and classify in one step.
pub fn classify_path(path: &str) -> (u64, EntryKind) {
    let hash = resolve(path);
    (hash, classify(hash))
}

/// The root listing is static and independent of runtime state.
pub fn list_dir() -> [(&'static str, EntryKind); 3] {
    [
        (".", EntryKind::Directory),
        ("..", EntryKind::Directory),
        (COUNTER_NAME, EntryKind::CounterFile),
    ]
}
