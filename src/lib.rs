// sqldbdiff: chunked data comparison between an upstream Oracle schema and a
// downstream MySQL-compatible schema (TiDB and friends). Tables are split into
// disjoint ranges against one consistent upstream snapshot, chunk metadata is
// persisted so a run can resume, and each chunk is compared two-sided by a
// bounded worker pool. Differences are written as INSERT/DELETE repair SQL.

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod digest;
pub mod executor;
pub mod gate;
pub mod logger;
pub mod meta;
pub mod planner;
pub mod progress;
pub mod report;
pub mod value;

use std::sync::{Mutex, MutexGuard};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

// Run modes recorded in the metadata store.
pub const DIFF_MODE: &str = "diff";
pub const CHECK_MODE: &str = "check";
pub const REVERSE_MODE: &str = "reverse";

// Lock helper that converts PoisonError into a readable error for `?` use.
pub(crate) fn lock_or_err<'a, T>(m: &'a Mutex<T>, ctx: &str) -> Result<MutexGuard<'a, T>> {
    m.lock()
        .map_err(|_| format!("{}: mutex poisoned", ctx).into())
}
