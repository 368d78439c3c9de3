// Per-table comparison driver. For one table: load the surviving chunks, open
// a bounded result channel, fan chunk comparisons across a worker pool, and
// drain results into the repair sink from a single thread. The sender is
// cloned into workers and dropped by the spawner once the pool has joined, so
// the channel closes exactly once and the drain exits on its own.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rayon::ThreadPoolBuilder;

use crate::adapter::{SourceDb, TargetDb};
use crate::config::DiffConfig;
use crate::logger;
use crate::meta::{ChunkMeta, ErrorRecord, MetaStore, STATUS_FAILED};
use crate::progress::ProgressManager;
use crate::report::{render_report, report_chunk, ReportSummary};
use crate::{lock_or_err, Result, DIFF_MODE};

// Serialized append target for repair fragments. All workers across all
// tables write through one of these; each fragment is written whole under the
// mutex so fragments never interleave.
#[derive(Clone)]
pub struct RepairSink {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl RepairSink {
    // Truncate-on-open; appended to for the rest of the run.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| format!("open fix sql file [{}] failed: {}", path.display(), e))?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn write_fragment(&self, text: &str) -> Result<()> {
        let mut guard = lock_or_err(&self.out, "write repair fragment")?;
        writeln!(guard, "{}", text).map_err(|e| format!("fix sql file write failed: {}", e))?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut guard = lock_or_err(&self.out, "flush repair file")?;
        guard
            .flush()
            .map_err(|e| format!("fix sql file flush failed: {}", e).into())
    }
}

pub struct Executor<'a> {
    cfg: &'a DiffConfig,
    target_schema: String,
    source: &'a dyn SourceDb,
    target: &'a dyn TargetDb,
    meta: &'a MetaStore,
    sink: RepairSink,
    progress: &'a ProgressManager,
    deadline: Option<Instant>,
}

impl<'a> Executor<'a> {
    pub fn new(
        cfg: &'a DiffConfig,
        source: &'a dyn SourceDb,
        target: &'a dyn TargetDb,
        meta: &'a MetaStore,
        sink: RepairSink,
        progress: &'a ProgressManager,
    ) -> Self {
        let deadline = cfg
            .max_run_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        Self {
            cfg,
            target_schema: cfg.target_schema.to_uppercase(),
            source,
            target,
            meta,
            sink,
            progress,
            deadline,
        }
    }

    // Compare every surviving chunk of one table. Returns the number of
    // chunks that failed and stayed persisted for a later resume; an Err is
    // an infrastructure failure and fatal to the run.
    pub fn diff_table(&self, schema: &str, table: &str) -> Result<usize> {
        let start = Instant::now();
        let chunks = self.meta.list_chunks(schema, table)?;
        if chunks.is_empty() {
            return Ok(0);
        }
        let bar = self.progress.new_chunk_bar(table, chunks.len() as u64);

        let (tx, rx) = mpsc::sync_channel::<ReportSummary>(self.cfg.buffer_size.max(1));
        let drain_sink = self.sink.clone();
        let drain = thread::Builder::new()
            .name("repair-drain".to_string())
            .spawn(move || -> Result<()> {
                for report in rx {
                    drain_sink.write_fragment(&render_report(&report))?;
                }
                Ok(())
            })
            .map_err(|e| format!("spawn repair drain failed: {}", e))?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.cfg.worker_count())
            .build()
            .map_err(|e| format!("build diff pool: {}", e))?;
        let failed = AtomicUsize::new(0);
        pool.install(|| {
            use rayon::prelude::*;
            chunks.par_iter().for_each_with(tx, |tx, chunk| {
                self.run_chunk(chunk, tx, &failed);
                if let Some(b) = &bar {
                    b.inc(1);
                }
            });
        });
        // tx clones are gone with the workers; the drain sees the close.
        drain
            .join()
            .map_err(|_| "repair drain thread panicked")??;
        if let Some(b) = &bar {
            b.finish();
        }

        logger::debug(&format!(
            "Timing: diff table [{}.{}] {} chunks took {:?}",
            schema,
            table,
            chunks.len(),
            start.elapsed()
        ));
        Ok(failed.load(Ordering::Relaxed))
    }

    fn run_chunk(&self, chunk: &ChunkMeta, tx: &SyncSender<ReportSummary>, failed: &AtomicUsize) {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.log_chunk_error(chunk, "run deadline exceeded before chunk dispatch");
                failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        match report_chunk(
            &self.target_schema,
            chunk,
            self.source,
            self.target,
            self.cfg.only_check_rows,
        ) {
            Ok(Some(report)) => {
                if tx.send(report).is_err() {
                    self.log_chunk_error(chunk, "repair drain is gone, fragment dropped");
                    failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                self.delete_chunk(chunk, failed);
            }
            Ok(None) => self.delete_chunk(chunk, failed),
            Err(e) => {
                self.log_chunk_error(chunk, &format!("data diff record report failed: {}", e));
                failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // The chunk row is only removed after its result has been delivered; a
    // failed delete keeps the chunk for the next resume.
    fn delete_chunk(&self, chunk: &ChunkMeta, failed: &AtomicUsize) {
        if let Err(e) = self
            .meta
            .delete_chunk(&chunk.source_schema, &chunk.source_table, &chunk.range)
        {
            self.log_chunk_error(
                chunk,
                &format!("delete [data_diff_meta] record failed: {}", e),
            );
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn log_chunk_error(&self, chunk: &ChunkMeta, error: &str) {
        let rec = ErrorRecord {
            schema: chunk.source_schema.clone(),
            table: chunk.source_table.clone(),
            run_mode: DIFF_MODE.to_string(),
            info_source: DIFF_MODE.to_string(),
            status: STATUS_FAILED.to_string(),
            detail: chunk.describe(),
            error: error.to_string(),
        };
        logger::error(&format!("{}: {}", chunk.describe(), error));
        if let Err(e) = self.meta.log_error(&rec) {
            logger::error(&format!(
                "append [table_error_detail] failed for {}: {}",
                chunk.describe(),
                e
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Shared in-memory writer for observing sink output.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn fragments_do_not_interleave() {
        let buf = SharedBuf::default();
        let sink = RepairSink::from_writer(Box::new(buf.clone()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let sink = sink.clone();
            handles.push(thread::spawn(move || {
                let fragment = format!("/* chunk {} */\nDELETE FROM T WHERE ID={};", i, i);
                for _ in 0..50 {
                    sink.write_fragment(&fragment).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let data = buf.0.lock().unwrap().clone();
        let text = String::from_utf8(data).unwrap();
        // Every two-line block must appear whole, never spliced.
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 8 * 50 * 2);
        for pair in lines.chunks(2) {
            let id: usize = pair[0]
                .trim_start_matches("/* chunk ")
                .trim_end_matches(" */")
                .parse()
                .unwrap();
            assert_eq!(pair[1], format!("DELETE FROM T WHERE ID={};", id));
        }
    }
}
