use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Owner reported for every synthetic entry unless overridden.
pub const NOBODY_UID: u32 = 65534;
pub const NOGROUP_GID: u32 = 65534;

#[derive(Parser, Debug)]
#[command(name = "ngxfs", about = "NGXFS: nginx status code stats as a FUSE filesystem")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount the stats filesystem
    Mount {
        /// Path to the mount point (must be an existing directory)
        #[arg(default_value = "/mnt/nginx")]
        mountpoint: PathBuf,

        /// Log every filesystem operation
        #[arg(long)]
        debug: bool,

        /// Log file path
        #[arg(long, default_value = "/tmp/ngxfs.log")]
        log_file: PathBuf,

        /// Owner uid reported for the virtual entries
        #[arg(long, default_value_t = NOBODY_UID)]
        uid: u32,

        /// Owner gid reported for the virtual entries
        #[arg(long, default_value_t = NOGROUP_GID)]
        gid: u32,

        /// Milliseconds to wait for an internal lock before degrading
        #[arg(long, default_value_t = 250)]
        lock_timeout_ms: u64,

        /// Only allow the mounting user to access the filesystem
        #[arg(long)]
        no_allow_other: bool,
    },
    /// Unmount a stats filesystem
    Unmount {
        /// Path to the mount point
        mountpoint: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct NgxConfig {
    pub mountpoint: PathBuf,
    pub debug: bool,
    pub log_file: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub lock_timeout: Duration,
    pub allow_other: bool,
}

impl Default for NgxConfig {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::from("/mnt/nginx"),
            debug: false,
            log_file: PathBuf::from("/tmp/ngxfs.log"),
            uid: NOBODY_UID,
            gid: NOGROUP_GID,
            lock_timeout: Duration::from_millis(250),
            allow_other: true,
        }
    }
}
