// Chunk synthesis. One snapshot SCN is captured for the whole batch; every
// chunk of a table carries it so all chunks see the same upstream state. Split
// policy per table: uniform ranges over a numeric key column, else equality on
// a low-cardinality leading index column, else one full-scan chunk. A table's
// plan is persisted atomically and flips the task to part; on failure the
// table stays wait.

use std::time::Instant;

use rayon::ThreadPoolBuilder;

use crate::adapter::{mysql_projection, oracle_projection, ColumnBounds, SourceDb, SourceEnv};
use crate::config::DiffConfig;
use crate::logger;
use crate::meta::{ChunkMeta, MetaStore};
use crate::progress::ProgressManager;
use crate::{Result, DIFF_MODE};

// Range matching every row of an un-splittable table.
pub const FULL_RANGE: &str = "1 = 1";

pub struct Planner<'a> {
    cfg: &'a DiffConfig,
    source: &'a dyn SourceDb,
    meta: &'a MetaStore,
    env: &'a SourceEnv,
}

impl<'a> Planner<'a> {
    pub fn new(
        cfg: &'a DiffConfig,
        source: &'a dyn SourceDb,
        meta: &'a MetaStore,
        env: &'a SourceEnv,
    ) -> Self {
        Self {
            cfg,
            source,
            meta,
            env,
        }
    }

    // Plans all wait tables in parallel and returns the captured SCN.
    pub fn plan_tables(
        &self,
        schema: &str,
        tables: &[String],
        progress: &ProgressManager,
    ) -> Result<u64> {
        let start = Instant::now();
        let scn = self.source.snapshot_scn()?;
        let bar = progress.new_plan_bar(tables.len() as u64);
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.cfg.worker_count())
            .build()
            .map_err(|e| format!("build planner pool: {}", e))?;
        pool.install(|| {
            use rayon::prelude::*;
            tables.par_iter().try_for_each(|table| -> Result<()> {
                self.plan_table(schema, table, scn).map_err(|e| {
                    format!("pre split table [{}.{}] chunk failed: {}", schema, table, e)
                })?;
                if let Some(b) = &bar {
                    b.inc(1);
                }
                Ok(())
            })
        })?;
        if let Some(b) = &bar {
            b.finish();
        }
        logger::debug(&format!(
            "Timing: split chunks for {} tables took {:?}",
            tables.len(),
            start.elapsed()
        ));
        Ok(scn)
    }

    fn plan_table(&self, schema: &str, table: &str, scn: u64) -> Result<()> {
        let columns = self.source.table_columns(schema, table)?;
        let source_info = oracle_projection(&columns, self.env);
        let target_info = mysql_projection(&columns, self.env);
        let (ranges, number_column) = self.split_ranges(schema, table, scn)?;
        let chunks: Vec<ChunkMeta> = ranges
            .into_iter()
            .map(|range| ChunkMeta {
                source_schema: schema.to_string(),
                source_table: table.to_string(),
                source_column_info: source_info.clone(),
                target_column_info: target_info.clone(),
                range,
                number_column: number_column.clone(),
                snapshot_scn: scn,
            })
            .collect();
        self.meta.store_table_plan(schema, table, DIFF_MODE, &chunks)?;
        logger::debug(&format!(
            "table [{}.{}] split into {} chunks at scn {}",
            schema,
            table,
            chunks.len(),
            scn
        ));
        Ok(())
    }

    fn split_ranges(&self, schema: &str, table: &str, scn: u64) -> Result<(Vec<String>, String)> {
        if let Some(column) = self.source.numeric_key_column(schema, table)? {
            if let Some(bounds) = self.source.column_bounds(schema, table, &column, scn)? {
                let ranges = numeric_ranges(&column, bounds, self.cfg.chunk_rows);
                return Ok((ranges, column));
            }
        }
        // Equality predicates over text values only select the same rows on
        // both sides under binary comparison semantics.
        if self.env.binary_collation_for(table) {
            if let Some((column, values)) =
                self.source.low_cardinality_values(schema, table, scn)?
            {
                let ranges = values
                    .into_iter()
                    .map(|v| format!("{} = {}", column, v))
                    .collect();
                return Ok((ranges, String::new()));
            }
        }
        Ok((vec![FULL_RANGE.to_string()], String::new()))
    }
}

// Uniform cut points over [min, max]. The edge ranges are open-ended so rows
// landing outside the sampled bounds (including downstream-only strays) still
// belong to exactly one chunk.
fn numeric_ranges(column: &str, bounds: ColumnBounds, chunk_rows: u64) -> Vec<String> {
    let chunk_rows = chunk_rows.max(1);
    let span = (bounds.max - bounds.min) as u64 + 1;
    let buckets = bounds.rows.div_ceil(chunk_rows).max(1).min(span);
    if buckets <= 1 {
        return vec![FULL_RANGE.to_string()];
    }
    let width = span.div_ceil(buckets).max(1) as i64;
    let mut cuts = Vec::new();
    let mut cut = bounds.min.saturating_add(width);
    while cut <= bounds.max && (cuts.len() as u64) < buckets - 1 {
        cuts.push(cut);
        cut = cut.saturating_add(width);
    }
    if cuts.is_empty() {
        return vec![FULL_RANGE.to_string()];
    }
    let mut ranges = Vec::with_capacity(cuts.len() + 1);
    ranges.push(format!("{} < {}", column, cuts[0]));
    for pair in cuts.windows(2) {
        ranges.push(format!(
            "{} >= {} AND {} < {}",
            column, pair[0], column, pair[1]
        ));
    }
    ranges.push(format!("{} >= {}", column, cuts[cuts.len() - 1]));
    ranges
}
