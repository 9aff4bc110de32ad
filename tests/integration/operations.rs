use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use ngxfs::error::NgxError;
use ngxfs::fs::ops::PathOps;
use ngxfs::fs::resolver::{EntryKind, COUNTER_PATH, ROOT_PATH};

use crate::helpers::{new_core, parse_snapshot};

fn read_all(core: &impl PathOps) -> String {
    String::from_utf8(core.read(COUNTER_PATH, 0, 4096).unwrap()).unwrap()
}

#[test]
fn test_write_then_read() {
    let core = new_core();
    core.truncate(COUNTER_PATH).unwrap();
    assert_eq!(core.write(COUNTER_PATH, b"5").unwrap(), 1);
    assert_eq!(read_all(&core), "0,0,0,0,1\n");
}

#[test]
fn test_only_first_byte_counts() {
    let core = new_core();
    assert_eq!(core.write(COUNTER_PATH, b"2xx\n").unwrap(), 4);
    assert_eq!(core.write(COUNTER_PATH, b"404").unwrap(), 3);
    assert_eq!(core.write(COUNTER_PATH, b"7abc").unwrap(), 4);
    assert_eq!(core.write(COUNTER_PATH, b"").unwrap(), 0);
    assert_eq!(core.write(COUNTER_PATH, b"x1").unwrap(), 2);
    assert_eq!(read_all(&core), "0,1,0,1,0\n");
}

#[test]
fn test_truncate_resets_counter_file() {
    let core = new_core();
    for payload in [b"1", b"2", b"3", b"3", b"5"] {
        core.write(COUNTER_PATH, payload).unwrap();
    }
    assert_eq!(read_all(&core), "1,1,2,0,1\n");

    core.truncate(COUNTER_PATH).unwrap();
    assert_eq!(read_all(&core), "0,0,0,0,0\n");
}

#[test]
fn test_truncate_directory_unsupported() {
    let core = new_core();
    core.write(COUNTER_PATH, b"4").unwrap();
    let err = core.truncate(ROOT_PATH).unwrap_err();
    assert!(matches!(err, NgxError::Unsupported { op: "truncate", .. }), "{:?}", err);
    // Counts untouched.
    assert_eq!(read_all(&core), "0,0,0,1,0\n");

    assert!(matches!(
        core.truncate("/missing").unwrap_err(),
        NgxError::NotFound { .. }
    ));
}

#[test]
fn test_getattr_known_and_unknown() {
    let core = new_core();
    assert_eq!(core.getattr(ROOT_PATH).unwrap().kind, EntryKind::Directory);
    assert_eq!(core.getattr(COUNTER_PATH).unwrap().kind, EntryKind::CounterFile);
    for path in ["/other", "/access.log.1", "/dir/access.log"] {
        assert!(matches!(
            core.getattr(path).unwrap_err(),
            NgxError::NotFound { .. }
        ));
    }
    assert_eq!(core.cache().len(), 2);
}

#[test]
fn test_open_and_access_are_existence_checks() {
    let core = new_core();
    core.open(COUNTER_PATH).unwrap();
    core.open(ROOT_PATH).unwrap();
    core.access(COUNTER_PATH).unwrap();
    assert!(matches!(core.open("/x").unwrap_err(), NgxError::NotFound { .. }));
    assert!(matches!(core.access("/x").unwrap_err(), NgxError::NotFound { .. }));
}

#[test]
fn test_read_only_on_counter_file() {
    let core = new_core();
    assert!(matches!(
        core.read(ROOT_PATH, 0, 4096).unwrap_err(),
        NgxError::NotFound { .. }
    ));
    assert!(matches!(
        core.read("/stats", 0, 4096).unwrap_err(),
        NgxError::NotFound { .. }
    ));
}

#[test]
fn test_read_honours_offset_and_size() {
    let core = new_core();
    core.write(COUNTER_PATH, b"1").unwrap();
    assert_eq!(core.read(COUNTER_PATH, 0, 3).unwrap(), b"1,0");
    assert_eq!(core.read(COUNTER_PATH, 2, 4096).unwrap(), b"0,0,0,0\n");
    assert!(core.read(COUNTER_PATH, 10, 4096).unwrap().is_empty());
    assert!(core.read(COUNTER_PATH, u64::MAX, 4096).unwrap().is_empty());
}

#[test]
fn test_write_outside_counter_file() {
    let core = new_core();
    assert!(matches!(
        core.write(ROOT_PATH, b"2").unwrap_err(),
        NgxError::Unsupported { .. }
    ));
    assert!(matches!(
        core.write("/other.log", b"2").unwrap_err(),
        NgxError::NotFound { .. }
    ));
    assert_eq!(read_all(&core), "0,0,0,0,0\n");
}

#[test]
fn test_readdir() {
    let core = new_core();
    let names: Vec<_> = core
        .readdir(ROOT_PATH)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec![".", "..", "access.log"]);

    // Static regardless of state.
    core.write(COUNTER_PATH, b"3").unwrap();
    assert_eq!(core.readdir(ROOT_PATH).unwrap().len(), 3);

    assert!(matches!(
        core.readdir(COUNTER_PATH).unwrap_err(),
        NgxError::NotADirectory { .. }
    ));
    assert!(matches!(
        core.readdir("/sub").unwrap_err(),
        NgxError::NotFound { .. }
    ));
}

#[test]
fn test_write_time_committed_on_release() {
    let core = new_core();
    let created = core.getattr(COUNTER_PATH).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    core.write(COUNTER_PATH, b"2").unwrap();
    let written = core.getattr(COUNTER_PATH).unwrap();
    assert_eq!(written.mtime, created.mtime, "write must not touch mtime");

    core.release(COUNTER_PATH).unwrap();
    let released = core.getattr(COUNTER_PATH).unwrap();
    assert!(released.mtime > created.mtime);
    assert_eq!(released.atime, released.mtime);
    assert_eq!(released.mtime, written.pending_write);

    // Second release without an intervening write is a no-op.
    core.release(COUNTER_PATH).unwrap();
    assert_eq!(core.getattr(COUNTER_PATH).unwrap().mtime, released.mtime);
}

#[test]
fn test_release_without_write_keeps_times() {
    let core = new_core();
    let created = core.getattr(ROOT_PATH).unwrap();
    core.release(ROOT_PATH).unwrap();
    core.release(COUNTER_PATH).unwrap();
    assert_eq!(core.getattr(ROOT_PATH).unwrap().mtime, created.mtime);
    assert!(matches!(
        core.release("/gone").unwrap_err(),
        NgxError::NotFound { .. }
    ));
}

#[test]
fn test_unsupported_verbs() {
    let core = new_core();
    let results = [
        ("rename", core.rename(COUNTER_PATH, "/moved")),
        ("rmdir", core.rmdir(ROOT_PATH)),
        ("mkdir", core.mkdir("/new", 0o755)),
        ("create", core.create("/new.log", 0o644)),
        ("unlink", core.unlink(COUNTER_PATH)),
        ("chown", core.chown(COUNTER_PATH, Some(0), Some(0))),
        ("chmod", core.chmod(COUNTER_PATH, 0o600)),
        ("utimens", core.utimens(COUNTER_PATH)),
    ];
    for (verb, result) in results {
        match result {
            Err(NgxError::Unsupported { op, .. }) => assert_eq!(op, verb),
            other => panic!("{} returned {:?}", verb, other),
        }
    }
    assert!(core.getattr(COUNTER_PATH).is_ok());
}

#[test]
fn test_random_payloads_only_count_leading_class_digit() {
    let core = new_core();
    let mut rng = rand::thread_rng();
    let mut expected = [0u64; 5];

    for _ in 0..2000 {
        let len = rng.gen_range(0..16);
        let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        if let Some(&b) = payload.first() {
            if (b'1'..=b'5').contains(&b) {
                expected[usize::from(b - b'1')] += 1;
            }
        }
        assert_eq!(core.write(COUNTER_PATH, &payload).unwrap() as usize, payload.len());
    }

    assert_eq!(parse_snapshot(&read_all(&core)), expected);
}

#[test]
fn test_concurrent_writers_and_readers() {
    let core = Arc::new(new_core());
    let writers: Vec<_> = (1..=5)
        .map(|class| {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                let payload = [b'0' + class as u8];
                for _ in 0..200 {
                    core.write(COUNTER_PATH, &payload).unwrap();
                    core.release(COUNTER_PATH).unwrap();
                }
            })
        })
        .collect();
    let reader = {
        let core = Arc::clone(&core);
        thread::spawn(move || {
            for _ in 0..200 {
                let counts = parse_snapshot(&read_all(&*core));
                assert!(counts.iter().all(|c| *c <= 200));
            }
        })
    };
    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(read_all(&*core), "200,200,200,200,200\n");
}

#[test]
fn test_lock_failures_are_retryable() {
    let err = NgxError::LockUnavailable {
        what: "status counter",
    };
    assert!(err.is_retryable());
    assert!(!NgxError::not_found("/x").is_retryable());
    assert!(!NgxError::unsupported("mkdir", "/x").is_retryable());
}
