//! Synthetic FUSE filesystem exposing HTTP response-class counters.
//!
//! A web server writes one byte per response (`'1'`..`'5'`) to
//! `<mount>/access.log`; reading the same file returns `"c1,c2,c3,c4,c5\n"`.
//! Truncating it resets the counts.

pub mod config;
pub mod error;
pub mod fs;
pub mod state;
