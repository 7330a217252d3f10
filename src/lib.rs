//! uapi-registry - Per-target registry of Linux UAPI constants and layouts
//!
//! This library extracts integer constants and struct layouts from installed
//! kernel UAPI headers for each target, freezes them into immutable
//! versioned snapshots, validates cross-target divergences against a
//! variance policy, and resolves (domain, symbol, target) lookups with no
//! fallback values.

pub mod cli;
pub mod config;
pub mod extract;
#[cfg(target_os = "linux")]
pub mod host;
pub mod manifest;
pub mod registry;
pub mod resolve;
pub mod snapshot;
pub mod target;
pub mod validate;
pub mod value;
