// Top-level orchestration: build the work set, decide resume vs fresh, run the
// gate, then drive part tables (chunks already persisted) before wait tables
// (plan, then compare). Tables are processed serially; parallelism lives
// inside the planner and the per-table executor.

use std::fs;
use std::time::Instant;

use serde::Serialize;

use crate::adapter::{version_at_least, SourceDb, SourceEnv, TargetDb};
use crate::config::DiffConfig;
use crate::executor::{Executor, RepairSink};
use crate::gate::{
    PreGate, StructChecker, ORACLE_MIN_VERSION, ORACLE_TABLE_COLLATION_MIN_VERSION,
};
use crate::logger;
use crate::meta::MetaStore;
use crate::planner::Planner;
use crate::progress::ProgressManager;
use crate::{Result, DIFF_MODE};

// End-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct DiffOutcome {
    pub table_totals: usize,
    pub table_success: usize,
    pub table_failed: usize,
    pub fix_sql_file: String,
}

pub fn run_diff(
    cfg: &DiffConfig,
    source: &dyn SourceDb,
    target: &dyn TargetDb,
    checker: &dyn StructChecker,
) -> Result<DiffOutcome> {
    let start = Instant::now();
    let schema = cfg.source_schema.to_uppercase();
    logger::info(&format!("diff table oracle to mysql start, schema [{}]", schema));

    let version = source.db_version()?;
    if !version_at_least(&version, ORACLE_MIN_VERSION) {
        return Err(format!(
            "oracle db version [{}] is less than minimum supported [{}]",
            version, ORACLE_MIN_VERSION
        )
        .into());
    }

    let meta = MetaStore::open(&cfg.meta_path())?;

    // Work set: configured tables, or everything in the upstream schema.
    let tables: Vec<String> = if cfg.tables.is_empty() {
        source.list_tables(&schema)?
    } else {
        cfg.tables.iter().map(|t| t.to_uppercase()).collect()
    };
    if tables.is_empty() {
        logger::warn(&format!("there are no table objects in the oracle schema [{}]", schema));
        return Ok(outcome(cfg, 0, 0));
    }

    // A poisoned error log blocks the run until the operator clears it.
    let prior = meta.count_errors(&schema, DIFF_MODE)?;
    if prior > 0 {
        return Err(format!(
            "schema [{}] mode [{}] task failed, table [table_error_detail] exist failed error, please clear and rerunning",
            schema, DIFF_MODE
        )
        .into());
    }

    for table in &tables {
        meta.ensure_wait(&schema, table, DIFF_MODE)?;
    }

    // Without checkpointing every run starts from scratch.
    if !cfg.enable_checkpoint {
        meta.truncate_chunks()?;
        for table in &tables {
            meta.delete_table_task(&schema, table, DIFF_MODE)?;
            meta.ensure_wait(&schema, table, DIFF_MODE)?;
        }
    }

    let wait_tables = meta.list_wait(&schema, DIFF_MODE)?;
    let part_tables = meta.list_part(&schema, DIFF_MODE)?;
    if wait_tables.is_empty() && part_tables.is_empty() {
        logger::info(&format!(
            "all oracle table data diff finished, schema [{}], cost {:?}",
            schema,
            start.elapsed()
        ));
        return Ok(outcome(cfg, tables.len(), 0));
    }

    let broken = meta.resume_check(&schema, &part_tables)?;
    if !broken.is_empty() {
        return Err(format!(
            "checkpoint isn't consistent for tables [{}], please rerunning with [enable_checkpoint = false]",
            broken.join(", ")
        )
        .into());
    }

    let mut work_set: Vec<String> = part_tables.clone();
    work_set.extend(wait_tables.iter().cloned());

    let gate = PreGate::new(cfg, source, target, &meta, checker);
    gate.run(&schema, &work_set)?;

    // Upstream environment for downstream query construction: the planner's
    // projections and split predicates depend on the character set and the
    // comparison collations, so capture them once here.
    let mut env = SourceEnv {
        character_set: source.character_set()?,
        nls_comp: source.nls_comp()?,
        table_collations: Default::default(),
    };
    if version_at_least(&version, ORACLE_TABLE_COLLATION_MIN_VERSION) {
        env.table_collations = source.table_collations(&schema)?;
    }
    logger::debug(&format!(
        "oracle version [{}] character set [{}] nls comp [{}], mysql version [{}], table totals [{}]",
        version,
        env.character_set,
        env.nls_comp,
        target.db_version()?,
        work_set.len()
    ));

    let sink = RepairSink::create(&cfg.fix_sql_path())?;
    let progress = ProgressManager::new(cfg.enable_progress && !logger::is_debug());
    let executor = Executor::new(cfg, source, target, &meta, sink.clone(), &progress);

    let mut failed_tables = 0usize;

    // Tables with persisted chunks resume first; the planner never sees them.
    for table in &part_tables {
        if diff_one(&executor, &meta, &schema, table)? {
            failed_tables += 1;
        }
    }

    if !wait_tables.is_empty() {
        let planner = Planner::new(cfg, source, &meta, &env);
        planner.plan_tables(&schema, &wait_tables, &progress)?;
        for table in &wait_tables {
            if diff_one(&executor, &meta, &schema, table)? {
                failed_tables += 1;
            }
        }
    }

    sink.flush()?;

    let failed_logged = meta.distinct_error_tables(&schema, DIFF_MODE)? as usize;
    let failed = failed_tables.max(failed_logged);
    let result = outcome(cfg, work_set.len(), failed);

    if let Some(path) = &cfg.summary_json {
        let json = serde_json::to_string_pretty(&result)?;
        fs::write(path, json)?;
    }

    if failed == 0 {
        logger::info(&format!(
            "diff table oracle to mysql finished, table totals [{}], success [{}], failed [0], fix sql file [{}], cost {:?}",
            result.table_totals,
            result.table_success,
            result.fix_sql_file,
            start.elapsed()
        ));
    } else {
        logger::warn(&format!(
            "diff table oracle to mysql finished, table totals [{}], success [{}], failed [{}], failed detail please see table [table_error_detail], cost {:?}",
            result.table_totals,
            result.table_success,
            result.table_failed,
            start.elapsed()
        ));
    }
    Ok(result)
}

// Compare one table; true means it failed and stays resumable.
fn diff_one(executor: &Executor, meta: &MetaStore, schema: &str, table: &str) -> Result<bool> {
    let start = Instant::now();
    logger::debug(&format!("diff single table [{}.{}] start", schema, table));
    let failed_chunks = executor.diff_table(schema, table)?;
    if failed_chunks > 0 {
        logger::error(&format!(
            "diff table [{}.{}] has {} failed chunks, detail see [table_error_detail], please rerunning",
            schema, table, failed_chunks
        ));
        return Ok(true);
    }
    meta.mark_done(schema, table, DIFF_MODE)?;
    logger::debug(&format!(
        "diff single table [{}.{}] finished, cost {:?}",
        schema,
        table,
        start.elapsed()
    ));
    Ok(false)
}

fn outcome(cfg: &DiffConfig, totals: usize, failed: usize) -> DiffOutcome {
    DiffOutcome {
        table_totals: totals,
        table_success: totals.saturating_sub(failed),
        table_failed: failed,
        fix_sql_file: cfg.fix_sql_path().display().to_string(),
    }
}
