// Durable engine state in a SQLite database: per-table task status, persisted
// chunk rows, and the append-only error log. One connection behind a mutex;
// every call is its own transaction, and repeated writes with identical keys
// are tolerated so the resume protocol stays idempotent.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::{lock_or_err, Result};

pub const STATUS_WAIT: &str = "wait";
pub const STATUS_PART: &str = "part";
pub const STATUS_DONE: &str = "done";
pub const STATUS_FAILED: &str = "Failed";

// One partition of a table planned for comparison as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMeta {
    pub source_schema: String,
    pub source_table: String,
    pub source_column_info: String,
    pub target_column_info: String,
    pub range: String,
    // Empty means no deterministic ordering for this chunk.
    pub number_column: String,
    pub snapshot_scn: u64,
}

impl ChunkMeta {
    // Compact identity used in error detail and logs.
    pub fn describe(&self) -> String {
        format!(
            "table [{}.{}] chunk [{}] scn [{}]",
            self.source_schema, self.source_table, self.range, self.snapshot_scn
        )
    }
}

#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub schema: String,
    pub table: String,
    pub run_mode: String,
    pub info_source: String,
    pub status: String,
    pub detail: String,
    pub error: String,
}

// Row shape returned to the operator tool.
#[derive(Debug, Clone)]
pub struct ErrorRow {
    pub table: String,
    pub info_source: String,
    pub error: String,
    pub created_at: String,
}

pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wait_sync_meta (\
                source_schema_name TEXT NOT NULL,\
                source_table_name TEXT NOT NULL,\
                sync_mode TEXT NOT NULL,\
                sync_status TEXT NOT NULL,\
                PRIMARY KEY (source_schema_name, source_table_name, sync_mode)\
            );\
            CREATE TABLE IF NOT EXISTS data_diff_meta (\
                source_schema_name TEXT NOT NULL,\
                source_table_name TEXT NOT NULL,\
                source_column_info TEXT NOT NULL,\
                target_column_info TEXT NOT NULL,\
                \"range\" TEXT NOT NULL,\
                number_column TEXT NOT NULL,\
                snapshot_scn INTEGER NOT NULL\
            );\
            CREATE TABLE IF NOT EXISTS table_error_detail (\
                source_schema_name TEXT NOT NULL,\
                source_table_name TEXT NOT NULL,\
                run_mode TEXT NOT NULL,\
                info_sources TEXT NOT NULL,\
                run_status TEXT NOT NULL,\
                detail TEXT NOT NULL,\
                error TEXT NOT NULL,\
                created_at TEXT NOT NULL DEFAULT (datetime('now'))\
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Idempotent insert of a wait row; an existing row keeps its status.
    pub fn ensure_wait(&self, schema: &str, table: &str, mode: &str) -> Result<()> {
        let conn = lock_or_err(&self.conn, "ensure wait")?;
        conn.execute(
            "INSERT INTO wait_sync_meta (source_schema_name, source_table_name, sync_mode, sync_status) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (source_schema_name, source_table_name, sync_mode) DO NOTHING",
            params![schema, table, mode, STATUS_WAIT],
        )?;
        Ok(())
    }

    pub fn list_wait(&self, schema: &str, mode: &str) -> Result<Vec<String>> {
        self.list_status(schema, mode, STATUS_WAIT)
    }

    pub fn list_part(&self, schema: &str, mode: &str) -> Result<Vec<String>> {
        self.list_status(schema, mode, STATUS_PART)
    }

    fn list_status(&self, schema: &str, mode: &str, status: &str) -> Result<Vec<String>> {
        let conn = lock_or_err(&self.conn, "list tables")?;
        let mut stmt = conn.prepare(
            "SELECT source_table_name FROM wait_sync_meta \
             WHERE source_schema_name = ?1 AND sync_mode = ?2 AND sync_status = ?3 \
             ORDER BY source_table_name",
        )?;
        let rows = stmt.query_map(params![schema, mode, status], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn mark_done(&self, schema: &str, table: &str, mode: &str) -> Result<()> {
        self.set_status(schema, table, mode, STATUS_DONE)
    }

    fn set_status(&self, schema: &str, table: &str, mode: &str, status: &str) -> Result<()> {
        let conn = lock_or_err(&self.conn, "set table status")?;
        conn.execute(
            "UPDATE wait_sync_meta SET sync_status = ?4 \
             WHERE source_schema_name = ?1 AND source_table_name = ?2 AND sync_mode = ?3",
            params![schema, table, mode, status],
        )?;
        Ok(())
    }

    pub fn delete_table_task(&self, schema: &str, table: &str, mode: &str) -> Result<()> {
        let conn = lock_or_err(&self.conn, "delete table task")?;
        conn.execute(
            "DELETE FROM wait_sync_meta \
             WHERE source_schema_name = ?1 AND source_table_name = ?2 AND sync_mode = ?3",
            params![schema, table, mode],
        )?;
        Ok(())
    }

    // Part tables whose checkpoint state is internally inconsistent: zero
    // surviving chunks, or chunks captured under more than one snapshot.
    pub fn resume_check(&self, schema: &str, part_tables: &[String]) -> Result<Vec<String>> {
        let conn = lock_or_err(&self.conn, "resume check")?;
        let mut broken = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT COUNT(1), COUNT(DISTINCT snapshot_scn) FROM data_diff_meta \
             WHERE source_schema_name = ?1 AND source_table_name = ?2",
        )?;
        for table in part_tables {
            let (chunks, snapshots): (i64, i64) =
                stmt.query_row(params![schema, table], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
            if chunks == 0 || snapshots > 1 {
                broken.push(table.clone());
            }
        }
        Ok(broken)
    }

    // Persist one table's chunk plan and flip the task to part, atomically.
    // Replaces any half-written plan from an earlier failed attempt.
    pub fn store_table_plan(
        &self,
        schema: &str,
        table: &str,
        mode: &str,
        chunks: &[ChunkMeta],
    ) -> Result<()> {
        let mut conn = lock_or_err(&self.conn, "store table plan")?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM data_diff_meta WHERE source_schema_name = ?1 AND source_table_name = ?2",
            params![schema, table],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO data_diff_meta \
                 (source_schema_name, source_table_name, source_column_info, target_column_info, \"range\", number_column, snapshot_scn) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for c in chunks {
                stmt.execute(params![
                    c.source_schema,
                    c.source_table,
                    c.source_column_info,
                    c.target_column_info,
                    c.range,
                    c.number_column,
                    c.snapshot_scn as i64,
                ])?;
            }
        }
        tx.execute(
            "UPDATE wait_sync_meta SET sync_status = ?4 \
             WHERE source_schema_name = ?1 AND source_table_name = ?2 AND sync_mode = ?3",
            params![schema, table, mode, STATUS_PART],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_chunks(&self, schema: &str, table: &str) -> Result<Vec<ChunkMeta>> {
        let conn = lock_or_err(&self.conn, "list chunks")?;
        let mut stmt = conn.prepare(
            "SELECT source_schema_name, source_table_name, source_column_info, target_column_info, \"range\", number_column, snapshot_scn \
             FROM data_diff_meta WHERE source_schema_name = ?1 AND source_table_name = ?2 \
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![schema, table], |row| {
            Ok(ChunkMeta {
                source_schema: row.get(0)?,
                source_table: row.get(1)?,
                source_column_info: row.get(2)?,
                target_column_info: row.get(3)?,
                range: row.get(4)?,
                number_column: row.get(5)?,
                snapshot_scn: row.get::<_, i64>(6)? as u64,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn delete_chunk(&self, schema: &str, table: &str, range: &str) -> Result<()> {
        let conn = lock_or_err(&self.conn, "delete chunk")?;
        conn.execute(
            "DELETE FROM data_diff_meta \
             WHERE source_schema_name = ?1 AND source_table_name = ?2 AND \"range\" = ?3",
            params![schema, table, range],
        )?;
        Ok(())
    }

    // Wipe all chunk state; used when checkpointing is disabled.
    pub fn truncate_chunks(&self) -> Result<()> {
        let conn = lock_or_err(&self.conn, "truncate chunks")?;
        conn.execute("DELETE FROM data_diff_meta", [])?;
        Ok(())
    }

    pub fn count_errors(&self, schema: &str, run_mode: &str) -> Result<i64> {
        let conn = lock_or_err(&self.conn, "count errors")?;
        let count = conn.query_row(
            "SELECT COUNT(1) FROM table_error_detail \
             WHERE source_schema_name = ?1 AND run_mode = ?2 AND run_status = ?3",
            params![schema, run_mode, STATUS_FAILED],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_errors_by_source(
        &self,
        schema: &str,
        run_mode: &str,
        info_source: &str,
    ) -> Result<i64> {
        let conn = lock_or_err(&self.conn, "count errors by source")?;
        let count = conn.query_row(
            "SELECT COUNT(1) FROM table_error_detail \
             WHERE source_schema_name = ?1 AND run_mode = ?2 AND info_sources = ?3 AND run_status = ?4",
            params![schema, run_mode, info_source, STATUS_FAILED],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // Distinct tables with failed records; drives the end-of-run report.
    pub fn distinct_error_tables(&self, schema: &str, run_mode: &str) -> Result<i64> {
        let conn = lock_or_err(&self.conn, "distinct error tables")?;
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT source_table_name) FROM table_error_detail \
             WHERE source_schema_name = ?1 AND run_mode = ?2 AND run_status = ?3",
            params![schema, run_mode, STATUS_FAILED],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // Append-only.
    pub fn log_error(&self, rec: &ErrorRecord) -> Result<()> {
        let conn = lock_or_err(&self.conn, "log error")?;
        conn.execute(
            "INSERT INTO table_error_detail \
             (source_schema_name, source_table_name, run_mode, info_sources, run_status, detail, error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rec.schema,
                rec.table,
                rec.run_mode,
                rec.info_source,
                rec.status,
                rec.detail,
                rec.error
            ],
        )?;
        Ok(())
    }

    pub fn list_errors(&self, schema: &str, run_mode: &str) -> Result<Vec<ErrorRow>> {
        let conn = lock_or_err(&self.conn, "list errors")?;
        let mut stmt = conn.prepare(
            "SELECT source_table_name, info_sources, error, created_at FROM table_error_detail \
             WHERE source_schema_name = ?1 AND run_mode = ?2 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![schema, run_mode], |row| {
            Ok(ErrorRow {
                table: row.get(0)?,
                info_source: row.get(1)?,
                error: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // Operator action behind the "clear and rerun" gate message.
    pub fn clear_errors(&self, schema: &str, run_mode: &str) -> Result<usize> {
        let conn = lock_or_err(&self.conn, "clear errors")?;
        let n = conn.execute(
            "DELETE FROM table_error_detail WHERE source_schema_name = ?1 AND run_mode = ?2",
            params![schema, run_mode],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DIFF_MODE;

    fn store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let m = MetaStore::open(&dir.path().join("meta.db")).unwrap();
        (dir, m)
    }

    fn chunk(table: &str, range: &str, scn: u64) -> ChunkMeta {
        ChunkMeta {
            source_schema: "S".to_string(),
            source_table: table.to_string(),
            source_column_info: "\"ID\"".to_string(),
            target_column_info: "`ID`".to_string(),
            range: range.to_string(),
            number_column: "ID".to_string(),
            snapshot_scn: scn,
        }
    }

    #[test]
    fn ensure_wait_is_idempotent_and_keeps_status() {
        let (_dir, m) = store();
        m.ensure_wait("S", "T1", DIFF_MODE).unwrap();
        m.ensure_wait("S", "T1", DIFF_MODE).unwrap();
        assert_eq!(m.list_wait("S", DIFF_MODE).unwrap(), vec!["T1"]);

        m.store_table_plan("S", "T1", DIFF_MODE, &[chunk("T1", "1 = 1", 5)])
            .unwrap();
        m.ensure_wait("S", "T1", DIFF_MODE).unwrap();
        assert!(m.list_wait("S", DIFF_MODE).unwrap().is_empty());
        assert_eq!(m.list_part("S", DIFF_MODE).unwrap(), vec!["T1"]);
    }

    #[test]
    fn store_plan_replaces_and_flips_to_part() {
        let (_dir, m) = store();
        m.ensure_wait("S", "T1", DIFF_MODE).unwrap();
        m.store_table_plan("S", "T1", DIFF_MODE, &[chunk("T1", "ID >= 1 AND ID < 3", 5)])
            .unwrap();
        m.store_table_plan(
            "S",
            "T1",
            DIFF_MODE,
            &[
                chunk("T1", "ID >= 1 AND ID < 3", 6),
                chunk("T1", "ID >= 3 AND ID <= 4", 6),
            ],
        )
        .unwrap();
        let chunks = m.list_chunks("S", "T1").unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.snapshot_scn == 6));
    }

    #[test]
    fn chunk_lifecycle_delete_and_done() {
        let (_dir, m) = store();
        m.ensure_wait("S", "T1", DIFF_MODE).unwrap();
        m.store_table_plan(
            "S",
            "T1",
            DIFF_MODE,
            &[
                chunk("T1", "ID >= 1 AND ID < 3", 5),
                chunk("T1", "ID >= 3 AND ID <= 4", 5),
            ],
        )
        .unwrap();
        m.delete_chunk("S", "T1", "ID >= 1 AND ID < 3").unwrap();
        assert_eq!(m.list_chunks("S", "T1").unwrap().len(), 1);
        m.mark_done("S", "T1", DIFF_MODE).unwrap();
        assert!(m.list_part("S", DIFF_MODE).unwrap().is_empty());
    }

    #[test]
    fn resume_check_flags_inconsistent_tables() {
        let (_dir, m) = store();
        for t in ["T1", "T2", "T3"] {
            m.ensure_wait("S", t, DIFF_MODE).unwrap();
        }
        // T1: healthy. T2: part with zero chunks. T3: mixed snapshots.
        m.store_table_plan("S", "T1", DIFF_MODE, &[chunk("T1", "1 = 1", 5)])
            .unwrap();
        m.store_table_plan("S", "T2", DIFF_MODE, &[chunk("T2", "1 = 1", 5)])
            .unwrap();
        m.delete_chunk("S", "T2", "1 = 1").unwrap();
        m.store_table_plan(
            "S",
            "T3",
            DIFF_MODE,
            &[chunk("T3", "ID >= 1 AND ID < 3", 5), chunk("T3", "ID >= 3 AND ID <= 4", 9)],
        )
        .unwrap();
        let broken = m
            .resume_check("S", &["T1".into(), "T2".into(), "T3".into()])
            .unwrap();
        assert_eq!(broken, vec!["T2".to_string(), "T3".to_string()]);
    }

    #[test]
    fn error_log_counts_and_clear() {
        let (_dir, m) = store();
        let rec = ErrorRecord {
            schema: "S".to_string(),
            table: "T1".to_string(),
            run_mode: DIFF_MODE.to_string(),
            info_source: DIFF_MODE.to_string(),
            status: STATUS_FAILED.to_string(),
            detail: "table [S.T1] chunk [1 = 1] scn [5]".to_string(),
            error: "boom".to_string(),
        };
        m.log_error(&rec).unwrap();
        m.log_error(&rec).unwrap();
        assert_eq!(m.count_errors("S", DIFF_MODE).unwrap(), 2);
        assert_eq!(m.count_errors_by_source("S", DIFF_MODE, DIFF_MODE).unwrap(), 2);
        assert_eq!(m.distinct_error_tables("S", DIFF_MODE).unwrap(), 1);
        assert_eq!(m.list_errors("S", DIFF_MODE).unwrap().len(), 2);
        assert_eq!(m.clear_errors("S", DIFF_MODE).unwrap(), 2);
        assert_eq!(m.count_errors("S", DIFF_MODE).unwrap(), 0);
    }
}
