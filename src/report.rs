// Reconciler: turns one chunk into an equality verdict or a repair fragment.
// Both sides are fetched concurrently and joined before either result is read.
// CRC mode emits DELETE statements for downstream-only rows and INSERT
// statements for upstream-only rows; rows mode only reports count mismatches.

use crate::adapter::{
    source_chunk_query, source_count_query, target_chunk_query, target_count_query, SourceDb,
    TargetDb,
};
use crate::digest::RowDigest;
use crate::logger;
use crate::meta::ChunkMeta;
use crate::value::{where_predicate, zip_row};
use crate::Result;

// Per-chunk comparison outcome handed to the repair drain.
#[derive(Debug, Clone)]
pub enum ReportSummary {
    Crc {
        fragment: String,
        source_name: String,
        target_name: String,
        range: String,
    },
    Rows {
        source_name: String,
        target_name: String,
        source_rows: i64,
        target_rows: i64,
        range: String,
    },
}

// Compare one chunk. Ok(None) means the two sides are equal.
pub fn report_chunk(
    target_schema: &str,
    chunk: &ChunkMeta,
    source: &dyn SourceDb,
    target: &dyn TargetDb,
    only_check_rows: bool,
) -> Result<Option<ReportSummary>> {
    if only_check_rows {
        report_check_rows(target_schema, chunk, source, target)
    } else {
        report_check_crc32(target_schema, chunk, source, target)
    }
}

fn report_check_crc32(
    target_schema: &str,
    chunk: &ChunkMeta,
    source: &dyn SourceDb,
    target: &dyn TargetDb,
) -> Result<Option<ReportSummary>> {
    let source_query = source_chunk_query(chunk);
    let target_query = target_chunk_query(chunk, target_schema);
    let ordered = !chunk.number_column.is_empty();

    let (source_res, target_res) = rayon::join(
        || source.row_digest(&source_query, ordered),
        || target.row_digest(&target_query, ordered),
    );
    let source_digest =
        source_res.map_err(|e| format!("get oracle data row strings failed: {}", e))?;
    let target_digest =
        target_res.map_err(|e| format!("get mysql data row strings failed: {}", e))?;

    if source_digest.crc32 == target_digest.crc32 {
        logger::debug(&format!(
            "chunk equal {} crc32 [{}]",
            chunk.describe(),
            source_digest.crc32
        ));
        return Ok(None);
    }

    let fragment = build_fix_fragment(target_schema, chunk, &source_digest, &target_digest)?;
    if fragment.is_empty() {
        // CRC mismatch but identical sets: only the fold order differed.
        return Ok(None);
    }
    Ok(Some(ReportSummary::Crc {
        fragment,
        source_name: format!("{}.{}", chunk.source_schema, chunk.source_table),
        target_name: format!("{}.{}", target_schema, chunk.source_table),
        range: chunk.range.clone(),
    }))
}

// DELETE statements for downstream-extra rows first, then INSERTs for
// upstream-extra rows, each block under a commented summary header.
fn build_fix_fragment(
    target_schema: &str,
    chunk: &ChunkMeta,
    source_digest: &RowDigest,
    target_digest: &RowDigest,
) -> Result<String> {
    let counts_table = render_table(
        &["DATABASE", "DATA COUNTS SQL", "CRC32"],
        &[
            vec![
                "ORACLE".to_string(),
                source_count_query(chunk),
                source_digest.crc32.to_string(),
            ],
            vec![
                "MySQL".to_string(),
                target_count_query(chunk, target_schema),
                target_digest.crc32.to_string(),
            ],
        ],
    );
    let target_name = format!("{}.{}", target_schema, chunk.source_table);
    let mut fix_sql = String::new();

    let target_more = target_digest.rows_missing_from(source_digest);
    if !target_more.is_empty() {
        fix_sql.push_str("/*\n");
        fix_sql.push_str(&format!(
            " mysql table [{}] chunk [{}] data rows are more\n",
            target_name, chunk.range
        ));
        fix_sql.push_str(&counts_table);
        fix_sql.push_str("*/\n");
        for row in &target_more {
            let pairs = zip_row(&target_digest.columns, row).map_err(|e| {
                format!(
                    "mysql table [{}] chunk [{}]: {}",
                    target_name, chunk.range, e
                )
            })?;
            let conds: Vec<String> = pairs
                .iter()
                .map(|(col, val)| where_predicate(col, val))
                .collect();
            fix_sql.push_str(&format!(
                "DELETE FROM {} WHERE {};\n",
                target_name,
                conds.join(" AND ")
            ));
        }
    }

    let source_more = source_digest.rows_missing_from(target_digest);
    if !source_more.is_empty() {
        fix_sql.push_str("/*\n");
        fix_sql.push_str(&format!(
            " mysql table [{}] chunk [{}] data rows are less\n",
            target_name, chunk.range
        ));
        fix_sql.push_str(&counts_table);
        fix_sql.push_str("*/\n");
        let insert_prefix = format!(
            "INSERT INTO {} ({}) VALUES (",
            target_name,
            source_digest.columns.join(",")
        );
        for row in &source_more {
            fix_sql.push_str(&format!("{}{});\n", insert_prefix, row));
        }
    }

    Ok(fix_sql)
}

fn report_check_rows(
    target_schema: &str,
    chunk: &ChunkMeta,
    source: &dyn SourceDb,
    target: &dyn TargetDb,
) -> Result<Option<ReportSummary>> {
    let source_query = source_count_query(chunk);
    let target_query = target_count_query(chunk, target_schema);

    let (source_res, target_res) = rayon::join(
        || source.row_count(&source_query),
        || target.row_count(&target_query),
    );
    let source_rows = source_res.map_err(|e| format!("get oracle table rows failed: {}", e))?;
    let target_rows = target_res.map_err(|e| format!("get mysql table rows failed: {}", e))?;

    if source_rows == target_rows {
        logger::debug(&format!(
            "chunk equal {} rows [{}]",
            chunk.describe(),
            source_rows
        ));
        return Ok(None);
    }
    Ok(Some(ReportSummary::Rows {
        source_name: format!("{}.{}", chunk.source_schema, chunk.source_table),
        target_name: format!("{}.{}", target_schema, chunk.source_table),
        source_rows,
        target_rows,
        range: chunk.range.clone(),
    }))
}

// Text written to the repair file for one summary.
pub fn render_report(report: &ReportSummary) -> String {
    match report {
        ReportSummary::Crc { fragment, .. } => fragment.clone(),
        ReportSummary::Rows {
            source_name,
            target_name,
            source_rows,
            target_rows,
            range,
        } => {
            let table = render_table(
                &[
                    "SOURCE TABLE",
                    "SOURCE TABLE COUNTS",
                    "TARGET TABLE",
                    "TARGET TABLE COUNTS",
                    "RANGE",
                ],
                &[vec![
                    source_name.clone(),
                    source_rows.to_string(),
                    target_name.clone(),
                    target_rows.to_string(),
                    range.clone(),
                ]],
            );
            format!(
                "/*\n mysql table [{}] chunk [{}] data rows aren't equal\n{}*/\n",
                target_name, range, table
            )
        }
    }
}

// Minimal aligned text table for the commented headers.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() && cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }
    let render_line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<1$}", c, widths[i]))
            .collect();
        format!(" {}\n", padded.join(" | "))
    };
    let mut out = render_line(&headers.iter().map(|h| h.to_string()).collect::<Vec<_>>());
    for row in rows {
        out.push_str(&render_line(row));
    }
    out
}
