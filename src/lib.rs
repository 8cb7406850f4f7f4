//! codemend library crate
//!
//! Exposes the pipeline modules so benchmarks and tests can exercise the
//! core paths without going through CLI startup.

pub mod cache;
pub mod config;
pub mod consensus;
pub mod directory;
pub mod edit;
pub mod oracle;
pub mod pipeline;
pub mod scope;
pub mod skeleton;
pub mod task;
pub mod util;
