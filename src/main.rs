use std::fs::File;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use ngxfs::config::{Cli, Command, NgxConfig};
use ngxfs::error::{NgxError, Result};
use ngxfs::fs::ops::StatsCore;
use ngxfs::fs::NgxFs;

/// Write-end of the self-pipe used for signal notification.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_handler(_sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, [0u8].as_ptr() as *const libc::c_void, 1);
        }
    }
}

enum ShutdownAction {
    /// Second signal, or a busy mount the user wants gone.
    ForceUnmount,
    /// FUSE session ended on its own, or the unmount on first signal succeeded.
    ExternalUnmount,
}

/// Attempt a regular (non-forced) unmount. Returns true if the mount was
/// removed, i.e. nobody had it busy.
fn try_unmount(mountpoint: &Path) -> bool {
    std::process::Command::new("umount")
        .arg(mountpoint)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Wait up to `timeout_ms` for a byte on the signal pipe and consume it.
fn signal_pending(pipe: &mut File, timeout_ms: libc::c_int) -> bool {
    let mut pfd = libc::pollfd {
        fd: pipe.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    if unsafe { libc::poll(&mut pfd, 1, timeout_ms) } <= 0 {
        return false;
    }
    let mut buf = [0u8; 1];
    matches!(pipe.read(&mut buf), Ok(1))
}

/// Serve until the session ends or a signal asks us to stop. The first
/// signal unmounts if nothing holds the mount; a second one forces it.
fn wait_for_shutdown(
    guard: &std::thread::JoinHandle<std::io::Result<()>>,
    mountpoint: &Path,
) -> Result<ShutdownAction> {
    let (read_end, write_end) = nix::unistd::pipe().map_err(std::io::Error::from)?;
    let mut signals = File::from(read_end);
    SIGNAL_PIPE.store(write_end.as_raw_fd(), Ordering::Relaxed);

    unsafe {
        use nix::sys::signal::{signal, SigHandler, Signal};
        signal(Signal::SIGINT, SigHandler::Handler(signal_handler)).ok();
        signal(Signal::SIGTERM, SigHandler::Handler(signal_handler)).ok();
    }

    let mut busy = false;
    let action = loop {
        if guard.is_finished() {
            break ShutdownAction::ExternalUnmount;
        }
        if !signal_pending(&mut signals, 200) {
            continue;
        }
        if busy {
            eprintln!("ngxfs: force unmounting...");
            break ShutdownAction::ForceUnmount;
        }
        if try_unmount(mountpoint) {
            eprintln!("ngxfs: unmounting (received signal)...");
            break ShutdownAction::ExternalUnmount;
        }
        busy = true;
        warn!("unmount refused, {} is busy", mountpoint.display());
        eprintln!("ngxfs: mount is busy, signal again to force unmount");
    };

    // Unregister before the write end closes.
    SIGNAL_PIPE.store(-1, Ordering::Relaxed);
    drop(write_end);
    Ok(action)
}

/// The mountpoint must already exist and be a directory.
fn check_mountpoint(mountpoint: &Path) -> Result<PathBuf> {
    let mountpoint = std::fs::canonicalize(mountpoint).map_err(|e| {
        NgxError::Config(format!(
            "failed to access mountpoint {}: {}",
            mountpoint.display(),
            e
        ))
    })?;
    if !mountpoint.is_dir() {
        return Err(NgxError::Config(format!(
            "mountpoint is not a directory: {}",
            mountpoint.display()
        )));
    }
    Ok(mountpoint)
}

fn init_logging(config: &NgxConfig) -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = config
        .log_file
        .parent()
        .unwrap_or_else(|| Path::new("/tmp"));
    let log_name = config
        .log_file
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("ngxfs.log"));
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if config.debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        );
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("ngxfs: failed to set tracing subscriber: {}", e);
    }
    guard
}

fn mount_options(allow_other: bool) -> fuser::Config {
    let mut fuse_config = fuser::Config::default();
    fuse_config.mount_options = vec![
        fuser::MountOption::FSName("ngxfs".to_string()),
        fuser::MountOption::AutoUnmount,
    ];
    fuse_config.acl = if allow_other {
        fuser::SessionACL::All
    } else {
        fuser::SessionACL::Owner
    };
    fuse_config
}

fn run_mount(config: NgxConfig) -> Result<()> {
    info!(
        "ngxfs starting: mountpoint={}, owner={}:{}",
        config.mountpoint.display(),
        config.uid,
        config.gid
    );

    // Built once here, shared with the FUSE session, dropped at exit.
    let core = Arc::new(StatsCore::from_config(&config));
    let mountpoint = config.mountpoint.clone();

    info!("Mounting ngxfs filesystem...");
    let fs = NgxFs::new(config.clone(), Arc::clone(&core));
    let session = match fuser::spawn_mount2(fs, &mountpoint, &mount_options(config.allow_other)) {
        Ok(session) => session,
        Err(e)
            if config.allow_other
                && (e.raw_os_error() == Some(libc::EPERM) || e.to_string().contains("allow_other")) =>
        {
            info!("Retrying mount without allow_other...");
            let retry = NgxFs::new(config.clone(), Arc::clone(&core));
            fuser::spawn_mount2(retry, &mountpoint, &mount_options(false))
                .map_err(|e| NgxError::Mount(e.to_string()))?
        }
        Err(e) => return Err(NgxError::Mount(e.to_string())),
    };

    info!("ngxfs mounted at {}", mountpoint.display());

    let action = wait_for_shutdown(&session.guard, &mountpoint)?;

    match action {
        ShutdownAction::ForceUnmount => {
            if let Err(e) = session.umount_and_join() {
                error!("Error during unmount, trying force unmount: {}", e);
                let mp = mountpoint.to_string_lossy();
                let _ = std::process::Command::new("umount")
                    .args(["-f", &*mp])
                    .status();
            }
        }
        ShutdownAction::ExternalUnmount => {
            if let Err(e) = session.join() {
                error!("Error joining FUSE session: {}", e);
            }
        }
    }

    info!("final counts {}", core.snapshot().trim_end());
    eprintln!("ngxfs: unmounted {}", mountpoint.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Mount {
            mountpoint,
            debug,
            log_file,
            uid,
            gid,
            lock_timeout_ms,
            no_allow_other,
        } => {
            let mountpoint = check_mountpoint(&mountpoint).unwrap_or_else(|e| {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            });

            let config = NgxConfig {
                mountpoint,
                debug,
                log_file,
                uid,
                gid,
                lock_timeout: Duration::from_millis(lock_timeout_ms),
                allow_other: !no_allow_other,
            };

            let _log_guard = init_logging(&config);

            if let Err(e) = run_mount(config) {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        Command::Unmount { mountpoint } => {
            unmount(&mountpoint);
        }
    }
}

fn unmount(mountpoint: &Path) {
    let mountpoint = std::fs::canonicalize(mountpoint).unwrap_or_else(|e| {
        eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
        std::process::exit(1);
    });
    let mp = mountpoint.to_string_lossy();
    eprintln!("Unmounting {}...", mp);

    let output = std::process::Command::new("umount").arg(&*mp).output();

    if matches!(&output, Ok(o) if o.status.success()) {
        eprintln!("Successfully unmounted {}", mp);
        return;
    }

    if let Ok(ref o) = output {
        let stderr = String::from_utf8_lossy(&o.stderr);
        if stderr.contains("busy") {
            eprintln!(
                "Mount point is busy. Make sure nothing is using {}, then try again.",
                mp
            );
            std::process::exit(1);
        }
    }

    // fusermount handles mounts owned by an unprivileged user.
    let status = std::process::Command::new("fusermount")
        .args(["-u", &*mp])
        .status();

    if matches!(status, Ok(s) if s.success()) {
        eprintln!("Successfully unmounted {}", mp);
        return;
    }

    eprintln!("Failed to unmount {}. Try: sudo umount -f {}", mp, mp);
    std::process::exit(1);
}
