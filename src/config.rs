// Run configuration. Embedders fill this in from their own config surface;
// connection handling for the two databases lives outside the crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Upstream Oracle schema holding the tables to compare.
    pub source_schema: String,
    /// Downstream MySQL-compatible schema the repair SQL targets.
    pub target_schema: String,
    /// Metadata store database file, relative to `work_dir`.
    pub meta_schema: String,
    /// Tables to compare. Empty means every table in the upstream schema.
    pub tables: Vec<String>,
    /// When false, chunk and task state is wiped before the run starts.
    pub enable_checkpoint: bool,
    /// Skip the external table-structure check.
    pub ignore_struct_check: bool,
    /// Compare row counts only instead of CRC row digests.
    pub only_check_rows: bool,
    /// Comparison workers per table (0 = number of CPUs).
    pub diff_threads: usize,
    /// Upper bound on rows per numeric-range chunk.
    pub chunk_rows: u64,
    /// Capacity of the per-table result channel.
    pub buffer_size: usize,
    /// Repair SQL output file, relative to `work_dir`. Truncated on open.
    pub fix_sql_file: String,
    /// Working directory for the repair file, meta store and check artifacts.
    pub work_dir: PathBuf,
    /// Optional path for the end-of-run summary as JSON.
    pub summary_json: Option<PathBuf>,
    /// Optional wall-clock bound for the run in seconds.
    pub max_run_secs: Option<u64>,
    /// Render per-table progress bars (suppressed in debug logging mode).
    pub enable_progress: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            source_schema: String::new(),
            target_schema: String::new(),
            meta_schema: "sqldbdiff_meta.db".to_string(),
            tables: Vec::new(),
            enable_checkpoint: true,
            ignore_struct_check: false,
            only_check_rows: false,
            diff_threads: 0,
            chunk_rows: 100_000,
            buffer_size: 1024,
            fix_sql_file: "fix.sql".to_string(),
            work_dir: PathBuf::from("."),
            summary_json: None,
            max_run_secs: None,
            enable_progress: true,
        }
    }
}

impl DiffConfig {
    // Effective comparison worker count.
    pub fn worker_count(&self) -> usize {
        if self.diff_threads > 0 {
            self.diff_threads
        } else {
            num_cpus::get()
        }
    }

    pub fn fix_sql_path(&self) -> PathBuf {
        self.work_dir.join(&self.fix_sql_file)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.work_dir.join(&self.meta_schema)
    }

    // Artifact the external structure checker leaves behind.
    pub fn check_file_path(&self) -> PathBuf {
        self.work_dir
            .join(format!("check_{}.sql", self.source_schema.to_lowercase()))
    }
}
