// Database adapters. The engine sees two capability traits: SourceDb for the
// upstream Oracle side (which alone can produce a flashback SCN) and TargetDb
// for the downstream MySQL-compatible side. OracleSource and MysqlTarget
// implement them on top of SqlExecutor, the narrow driver contract supplied by
// the embedder; both feed fetched rows through the same canonical encoder so
// the two sides agree bit-exactly.

use std::collections::HashMap;

use crate::digest::{fold_rows, RowDigest};
use crate::meta::ChunkMeta;
use crate::value::{canonical_row, canonical_value, SqlValue};
use crate::Result;

// Distinct-value cap above which an equality split is not attempted.
pub const LOW_CARDINALITY_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Number,
    Text,
    DateTime,
    Binary,
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

// Numeric min/max and row count for a split column, captured under one SCN.
#[derive(Debug, Clone, Copy)]
pub struct ColumnBounds {
    pub min: i64,
    pub max: i64,
    pub rows: u64,
}

// Upstream environment captured once per run and threaded into query
// construction: the database character set, the comparison collation, and the
// per-table collation overrides where the upstream version records them.
#[derive(Debug, Clone, Default)]
pub struct SourceEnv {
    pub character_set: String,
    pub nls_comp: String,
    pub table_collations: HashMap<String, String>,
}

impl SourceEnv {
    // Character set name without the language/territory prefix.
    pub fn charset_name(&self) -> &str {
        self.character_set
            .rsplit('.')
            .next()
            .unwrap_or(&self.character_set)
    }

    // Text columns compare byte-identically across the two drivers only when
    // both sides already speak UTF-8; anything else is converted server-side.
    pub fn needs_charset_conversion(&self) -> bool {
        !matches!(self.charset_name(), "AL32UTF8" | "UTF8")
    }

    // Collation governing one table's text comparisons.
    pub fn collation_for(&self, table: &str) -> &str {
        self.table_collations
            .get(table)
            .map(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.nls_comp)
    }

    // Equality predicates over text values match across dialects only under
    // binary comparison semantics; BINARY_CI/BINARY_AI do not qualify.
    pub fn binary_collation_for(&self, table: &str) -> bool {
        self.collation_for(table).eq_ignore_ascii_case("BINARY")
    }
}

// Driver contract. Executes SQL and returns result column names plus typed
// rows. Connection pooling, credentials and dialect drivers live with the
// embedder; temporal columns are expected back as text in the form the
// projections request.
pub trait SqlExecutor: Send + Sync {
    fn query(&self, sql: &str) -> Result<(Vec<String>, Vec<Vec<SqlValue>>)>;
}

// Upstream capability set.
pub trait SourceDb: Send + Sync {
    fn db_version(&self) -> Result<String>;
    fn character_set(&self) -> Result<String>;
    fn nls_sort(&self) -> Result<String>;
    fn nls_comp(&self) -> Result<String>;
    fn schema_collation(&self, schema: &str) -> Result<String>;
    fn table_collations(&self, schema: &str) -> Result<HashMap<String, String>>;
    fn list_tables(&self, schema: &str) -> Result<Vec<String>>;
    fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnSpec>>;
    // Monotonic consistent-read token for flashback queries.
    fn snapshot_scn(&self) -> Result<u64>;
    fn numeric_key_column(&self, schema: &str, table: &str) -> Result<Option<String>>;
    fn column_bounds(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        scn: u64,
    ) -> Result<Option<ColumnBounds>>;
    fn low_cardinality_values(
        &self,
        schema: &str,
        table: &str,
        scn: u64,
    ) -> Result<Option<(String, Vec<String>)>>;
    fn row_digest(&self, query: &str, ordered: bool) -> Result<RowDigest>;
    fn row_count(&self, query: &str) -> Result<i64>;
}

// Downstream capability set.
pub trait TargetDb: Send + Sync {
    fn db_version(&self) -> Result<String>;
    fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;
    fn row_digest(&self, query: &str, ordered: bool) -> Result<RowDigest>;
    fn row_count(&self, query: &str) -> Result<i64>;
}

pub struct OracleSource<E> {
    exec: E,
}

impl<E: SqlExecutor> OracleSource<E> {
    pub fn new(exec: E) -> Self {
        Self { exec }
    }

    fn scalar(&self, sql: &str) -> Result<SqlValue> {
        let (_, rows) = self.exec.query(sql)?;
        rows.into_iter()
            .next()
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| format!("query returned no rows: {}", sql).into())
    }

    fn scalar_text(&self, sql: &str) -> Result<String> {
        Ok(plain_text(self.scalar(sql)?))
    }
}

impl<E: SqlExecutor> SourceDb for OracleSource<E> {
    fn db_version(&self) -> Result<String> {
        self.scalar_text(
            "SELECT VERSION FROM PRODUCT_COMPONENT_VERSION WHERE PRODUCT LIKE 'Oracle%'",
        )
    }

    fn character_set(&self) -> Result<String> {
        self.scalar_text("SELECT USERENV('LANGUAGE') FROM DUAL")
    }

    fn nls_sort(&self) -> Result<String> {
        self.scalar_text("SELECT VALUE FROM NLS_DATABASE_PARAMETERS WHERE PARAMETER = 'NLS_SORT'")
    }

    fn nls_comp(&self) -> Result<String> {
        self.scalar_text("SELECT VALUE FROM NLS_DATABASE_PARAMETERS WHERE PARAMETER = 'NLS_COMP'")
    }

    fn schema_collation(&self, schema: &str) -> Result<String> {
        self.scalar_text(&format!(
            "SELECT DEFAULT_COLLATION FROM DBA_USERS WHERE USERNAME = '{}'",
            schema
        ))
    }

    fn table_collations(&self, schema: &str) -> Result<HashMap<String, String>> {
        let sql = format!(
            "SELECT TABLE_NAME, DEFAULT_COLLATION FROM DBA_TABLES WHERE OWNER = '{}'",
            schema
        );
        let (_, rows) = self.exec.query(&sql)?;
        let mut map = HashMap::new();
        for row in rows {
            if row.len() == 2 {
                map.insert(plain_text(row[0].clone()), plain_text(row[1].clone()));
            }
        }
        Ok(map)
    }

    fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT TABLE_NAME FROM DBA_TABLES WHERE OWNER = '{}' ORDER BY TABLE_NAME",
            schema
        );
        let (_, rows) = self.exec.query(&sql)?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.into_iter().next())
            .map(plain_text)
            .collect())
    }

    fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnSpec>> {
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE FROM DBA_TAB_COLUMNS WHERE OWNER = '{}' AND TABLE_NAME = '{}' ORDER BY COLUMN_ID",
            schema, table
        );
        let (_, rows) = self.exec.query(&sql)?;
        let mut cols = Vec::new();
        for row in rows {
            if row.len() == 2 {
                let name = plain_text(row[0].clone());
                let kind = column_kind(&plain_text(row[1].clone()));
                cols.push(ColumnSpec { name, kind });
            }
        }
        if cols.is_empty() {
            return Err(format!("table {}.{} has no columns", schema, table).into());
        }
        Ok(cols)
    }

    fn snapshot_scn(&self) -> Result<u64> {
        let v = self.scalar("SELECT CURRENT_SCN FROM V$DATABASE")?;
        value_to_i64(&v)
            .map(|n| n as u64)
            .ok_or_else(|| format!("current scn isn't numeric: {:?}", v).into())
    }

    fn numeric_key_column(&self, schema: &str, table: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT ACC.COLUMN_NAME FROM DBA_CONSTRAINTS AC JOIN DBA_CONS_COLUMNS ACC ON AC.OWNER = ACC.OWNER AND AC.CONSTRAINT_NAME = ACC.CONSTRAINT_NAME WHERE AC.CONSTRAINT_TYPE = 'P' AND AC.OWNER = '{}' AND AC.TABLE_NAME = '{}' ORDER BY ACC.POSITION",
            schema, table
        );
        let (_, rows) = self.exec.query(&sql)?;
        // Only a single-column primary key supports range math.
        if rows.len() != 1 {
            return Ok(None);
        }
        let name = match rows.into_iter().next().and_then(|r| r.into_iter().next()) {
            Some(v) => plain_text(v),
            None => return Ok(None),
        };
        let cols = self.table_columns(schema, table)?;
        Ok(cols
            .iter()
            .find(|c| c.name == name && c.kind == ColumnKind::Number)
            .map(|c| c.name.clone()))
    }

    fn column_bounds(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        scn: u64,
    ) -> Result<Option<ColumnBounds>> {
        let sql = format!(
            "SELECT MIN(\"{0}\"), MAX(\"{0}\"), COUNT(1) FROM \"{1}\".\"{2}\" AS OF SCN {3}",
            column, schema, table, scn
        );
        let (_, rows) = self.exec.query(&sql)?;
        let row = match rows.into_iter().next() {
            Some(r) if r.len() == 3 => r,
            _ => return Ok(None),
        };
        let (min, max, count) = (
            value_to_i64(&row[0]),
            value_to_i64(&row[1]),
            value_to_i64(&row[2]),
        );
        match (min, max, count) {
            (Some(min), Some(max), Some(rows)) if rows > 0 => Ok(Some(ColumnBounds {
                min,
                max,
                rows: rows as u64,
            })),
            _ => Ok(None),
        }
    }

    fn low_cardinality_values(
        &self,
        schema: &str,
        table: &str,
        scn: u64,
    ) -> Result<Option<(String, Vec<String>)>> {
        let sql = format!(
            "SELECT COLUMN_NAME FROM DBA_IND_COLUMNS WHERE TABLE_OWNER = '{}' AND TABLE_NAME = '{}' AND COLUMN_POSITION = 1 ORDER BY INDEX_NAME",
            schema, table
        );
        let (_, rows) = self.exec.query(&sql)?;
        let column = match rows.into_iter().next().and_then(|r| r.into_iter().next()) {
            Some(v) => plain_text(v),
            None => return Ok(None),
        };
        let distinct = format!(
            "SELECT DISTINCT \"{0}\" FROM \"{1}\".\"{2}\" AS OF SCN {3}",
            column, schema, table, scn
        );
        let (_, rows) = self.exec.query(&distinct)?;
        if rows.is_empty() || rows.len() > LOW_CARDINALITY_MAX {
            return Ok(None);
        }
        let mut values: Vec<String> = rows
            .into_iter()
            .filter_map(|r| r.into_iter().next())
            .map(|v| canonical_value(&v))
            .collect();
        values.sort();
        Ok(Some((column, values)))
    }

    fn row_digest(&self, query: &str, ordered: bool) -> Result<RowDigest> {
        let (columns, rows) = self.exec.query(query)?;
        Ok(fold_rows(
            columns,
            rows.iter().map(|r| canonical_row(r)),
            ordered,
        ))
    }

    fn row_count(&self, query: &str) -> Result<i64> {
        let v = self.scalar(query)?;
        value_to_i64(&v).ok_or_else(|| format!("count isn't numeric: {:?}", v).into())
    }
}

pub struct MysqlTarget<E> {
    exec: E,
}

impl<E: SqlExecutor> MysqlTarget<E> {
    pub fn new(exec: E) -> Self {
        Self { exec }
    }

    fn scalar(&self, sql: &str) -> Result<SqlValue> {
        let (_, rows) = self.exec.query(sql)?;
        rows.into_iter()
            .next()
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| format!("query returned no rows: {}", sql).into())
    }
}

impl<E: SqlExecutor> TargetDb for MysqlTarget<E> {
    fn db_version(&self) -> Result<String> {
        Ok(plain_text(self.scalar("SELECT VERSION()")?))
    }

    fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(1) FROM information_schema.TABLES WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}'",
            schema, table
        );
        let v = self.scalar(&sql)?;
        Ok(value_to_i64(&v).unwrap_or(0) > 0)
    }

    fn row_digest(&self, query: &str, ordered: bool) -> Result<RowDigest> {
        let (columns, rows) = self.exec.query(query)?;
        Ok(fold_rows(
            columns,
            rows.iter().map(|r| canonical_row(r)),
            ordered,
        ))
    }

    fn row_count(&self, query: &str) -> Result<i64> {
        let v = self.scalar(query)?;
        value_to_i64(&v).ok_or_else(|| format!("count isn't numeric: {:?}", v).into())
    }
}

// SELECT list in upstream dialect. Temporal columns are normalized server-side
// into the canonical text form, and text columns are converted to AL32UTF8
// when the upstream character set is something else (ZHS16GBK and friends), so
// both drivers hand back identical strings.
pub fn oracle_projection(cols: &[ColumnSpec], env: &SourceEnv) -> String {
    cols.iter()
        .map(|c| match c.kind {
            ColumnKind::DateTime => format!(
                "TO_CHAR(\"{0}\",'YYYY-MM-DD HH24:MI:SS') \"{0}\"",
                c.name
            ),
            ColumnKind::Text if env.needs_charset_conversion() => {
                format!("CONVERT(\"{0}\",'AL32UTF8') \"{0}\"", c.name)
            }
            _ => format!("\"{}\"", c.name),
        })
        .collect::<Vec<_>>()
        .join(",")
}

// SELECT list in downstream dialect, column-for-column aligned with the
// upstream projection, including the charset normalization.
pub fn mysql_projection(cols: &[ColumnSpec], env: &SourceEnv) -> String {
    cols.iter()
        .map(|c| match c.kind {
            ColumnKind::DateTime => format!(
                "DATE_FORMAT(`{0}`,'%Y-%m-%d %H:%i:%s') AS `{0}`",
                c.name
            ),
            ColumnKind::Text if env.needs_charset_conversion() => {
                format!("CONVERT(`{0}` USING utf8mb4) AS `{0}`", c.name)
            }
            _ => format!("`{}`", c.name),
        })
        .collect::<Vec<_>>()
        .join(",")
}

// Upstream chunk SELECT with flashback read and optional deterministic order.
pub fn source_chunk_query(chunk: &ChunkMeta) -> String {
    let mut q = format!(
        "SELECT {} FROM \"{}\".\"{}\" AS OF SCN {} WHERE {}",
        chunk.source_column_info,
        chunk.source_schema,
        chunk.source_table,
        chunk.snapshot_scn,
        chunk.range
    );
    if !chunk.number_column.is_empty() {
        q.push_str(&format!(" ORDER BY \"{}\" DESC", chunk.number_column));
    }
    q
}

pub fn target_chunk_query(chunk: &ChunkMeta, target_schema: &str) -> String {
    let mut q = format!(
        "SELECT {} FROM `{}`.`{}` WHERE {}",
        chunk.target_column_info, target_schema, chunk.source_table, chunk.range
    );
    if !chunk.number_column.is_empty() {
        q.push_str(&format!(" ORDER BY `{}` DESC", chunk.number_column));
    }
    q
}

pub fn source_count_query(chunk: &ChunkMeta) -> String {
    format!(
        "SELECT COUNT(1) FROM \"{}\".\"{}\" AS OF SCN {} WHERE {}",
        chunk.source_schema, chunk.source_table, chunk.snapshot_scn, chunk.range
    )
}

pub fn target_count_query(chunk: &ChunkMeta, target_schema: &str) -> String {
    format!(
        "SELECT COUNT(1) FROM `{}`.`{}` WHERE {}",
        target_schema, chunk.source_table, chunk.range
    )
}

// Dotted numeric version ordinal; component-wise so 10.0 sorts above 9.0.
pub fn version_ordinal(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<u64>()
                .unwrap_or(0)
        })
        .collect()
}

pub fn version_at_least(version: &str, minimum: &str) -> bool {
    version_ordinal(version) >= version_ordinal(minimum)
}

fn column_kind(data_type: &str) -> ColumnKind {
    let upper = data_type.to_uppercase();
    if upper.starts_with("NUMBER")
        || upper.starts_with("FLOAT")
        || upper.starts_with("BINARY_FLOAT")
        || upper.starts_with("BINARY_DOUBLE")
        || upper.starts_with("INTEGER")
    {
        ColumnKind::Number
    } else if upper.starts_with("DATE") || upper.starts_with("TIMESTAMP") {
        ColumnKind::DateTime
    } else if upper.starts_with("RAW") || upper.starts_with("LONG RAW") || upper.starts_with("BLOB")
    {
        ColumnKind::Binary
    } else {
        ColumnKind::Text
    }
}

// Unquoted rendering for metadata scalars (names, versions, parameters).
fn plain_text(v: SqlValue) -> String {
    match v {
        SqlValue::Null => String::new(),
        SqlValue::Int(n) => n.to_string(),
        SqlValue::Real(f) => format!("{}", f),
        SqlValue::Text(s) => s,
        SqlValue::Bytes(b) => hex::encode_upper(b),
    }
}

fn value_to_i64(v: &SqlValue) -> Option<i64> {
    match v {
        SqlValue::Int(n) => Some(*n),
        SqlValue::Real(f) => Some(*f as i64),
        SqlValue::Text(s) => s.parse().ok(),
        _ => None,
    }
}
