use std::time::Duration;

use ngxfs::config::{NOBODY_UID, NOGROUP_GID};
use ngxfs::fs::ops::StatsCore;

/// A fresh core with the default owner and lock timeout.
pub fn new_core() -> StatsCore {
    StatsCore::new(NOBODY_UID, NOGROUP_GID, Duration::from_millis(250))
}

/// Parse `"c1,c2,c3,c4,c5\n"` into its five counts.
pub fn parse_snapshot(snapshot: &str) -> [u64; 5] {
    assert!(snapshot.ends_with('\n'), "snapshot must end with a newline: {:?}", snapshot);
    let fields: Vec<u64> = snapshot
        .trim_end()
        .split(',')
        .map(|f| f.parse().expect("counter field is not a number"))
        .collect();
    assert_eq!(fields.len(), 5, "snapshot must have five fields: {:?}", snapshot);
    [fields[0], fields[1], fields[2], fields[3], fields[4]]
}
