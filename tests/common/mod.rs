// Shared test fixtures: in-memory fakes for the two database adapters and the
// external structure checker, plus a tiny evaluator for the range predicates
// the planner emits.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use sqldbdiff::adapter::{ColumnBounds, ColumnKind, ColumnSpec, SourceDb, TargetDb};
use sqldbdiff::config::DiffConfig;
use sqldbdiff::digest::{fold_rows, RowDigest};
use sqldbdiff::gate::StructChecker;
use sqldbdiff::value::{canonical_row, canonical_value, SqlValue};
use sqldbdiff::Result;

pub struct FakeTable {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<SqlValue>>,
    pub numeric_key: Option<String>,
}

pub struct FakeSource {
    pub version: String,
    pub charset: String,
    pub nls: String,
    pub scn: u64,
    // When set, any snapshot capture fails the run: proves the planner was
    // never invoked on a resume path.
    pub refuse_snapshot: bool,
    pub tables: BTreeMap<String, FakeTable>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            version: "12.2.0.1.0".to_string(),
            charset: "AMERICAN_AMERICA.AL32UTF8".to_string(),
            nls: "BINARY".to_string(),
            scn: 73122,
            refuse_snapshot: false,
            tables: BTreeMap::new(),
        }
    }

    pub fn add_table(
        &mut self,
        name: &str,
        columns: &[(&str, ColumnKind)],
        numeric_key: Option<&str>,
        rows: Vec<Vec<SqlValue>>,
    ) {
        self.tables.insert(
            name.to_string(),
            FakeTable {
                columns: columns
                    .iter()
                    .map(|(n, k)| ColumnSpec {
                        name: n.to_string(),
                        kind: *k,
                    })
                    .collect(),
                rows,
                numeric_key: numeric_key.map(|s| s.to_string()),
            },
        );
    }
}

impl SourceDb for FakeSource {
    fn db_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    fn character_set(&self) -> Result<String> {
        Ok(self.charset.clone())
    }

    fn nls_sort(&self) -> Result<String> {
        Ok(self.nls.clone())
    }

    fn nls_comp(&self) -> Result<String> {
        Ok(self.nls.clone())
    }

    fn schema_collation(&self, _schema: &str) -> Result<String> {
        Ok("BINARY".to_string())
    }

    fn table_collations(&self, _schema: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .tables
            .keys()
            .map(|t| (t.clone(), "BINARY".to_string()))
            .collect())
    }

    fn list_tables(&self, _schema: &str) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn table_columns(&self, _schema: &str, table: &str) -> Result<Vec<ColumnSpec>> {
        let t = self
            .tables
            .get(table)
            .ok_or_else(|| format!("unknown table {}", table))?;
        Ok(t.columns.clone())
    }

    fn snapshot_scn(&self) -> Result<u64> {
        if self.refuse_snapshot {
            return Err("snapshot capture refused by fixture".into());
        }
        Ok(self.scn)
    }

    fn numeric_key_column(&self, _schema: &str, table: &str) -> Result<Option<String>> {
        Ok(self.tables.get(table).and_then(|t| t.numeric_key.clone()))
    }

    fn column_bounds(
        &self,
        _schema: &str,
        table: &str,
        column: &str,
        _scn: u64,
    ) -> Result<Option<ColumnBounds>> {
        let t = self
            .tables
            .get(table)
            .ok_or_else(|| format!("unknown table {}", table))?;
        let idx = column_index(t, column)?;
        let mut values: Vec<i64> = t.rows.iter().filter_map(|r| as_i64(&r[idx])).collect();
        if values.is_empty() {
            return Ok(None);
        }
        values.sort();
        Ok(Some(ColumnBounds {
            min: values[0],
            max: values[values.len() - 1],
            rows: t.rows.len() as u64,
        }))
    }

    fn low_cardinality_values(
        &self,
        _schema: &str,
        _table: &str,
        _scn: u64,
    ) -> Result<Option<(String, Vec<String>)>> {
        Ok(None)
    }

    fn row_digest(&self, query: &str, ordered: bool) -> Result<RowDigest> {
        digest_tables(&self.tables, query, ordered)
    }

    fn row_count(&self, query: &str) -> Result<i64> {
        count_tables(&self.tables, query)
    }
}

pub struct FakeTarget {
    pub version: String,
    pub tables: BTreeMap<String, FakeTable>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self {
            version: "8.0.11-TiDB-v6.1.0".to_string(),
            tables: BTreeMap::new(),
        }
    }

    pub fn add_table(
        &mut self,
        name: &str,
        columns: &[(&str, ColumnKind)],
        rows: Vec<Vec<SqlValue>>,
    ) {
        self.tables.insert(
            name.to_string(),
            FakeTable {
                columns: columns
                    .iter()
                    .map(|(n, k)| ColumnSpec {
                        name: n.to_string(),
                        kind: *k,
                    })
                    .collect(),
                rows,
                numeric_key: None,
            },
        );
    }
}

impl TargetDb for FakeTarget {
    fn db_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    fn table_exists(&self, _schema: &str, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    fn row_digest(&self, query: &str, ordered: bool) -> Result<RowDigest> {
        digest_tables(&self.tables, query, ordered)
    }

    fn row_count(&self, query: &str) -> Result<i64> {
        count_tables(&self.tables, query)
    }
}

// Structure checker that drops a canned artifact into the working directory.
pub struct FakeChecker {
    pub work_dir: PathBuf,
    pub delta: String,
}

impl FakeChecker {
    pub fn clean(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            delta: String::new(),
        }
    }
}

impl StructChecker for FakeChecker {
    fn run(&self, schema: &str) -> Result<()> {
        let path = self
            .work_dir
            .join(format!("check_{}.sql", schema.to_lowercase()));
        fs::write(&path, &self.delta)?;
        Ok(())
    }
}

pub fn test_config(dir: &Path) -> DiffConfig {
    DiffConfig {
        source_schema: "S".to_string(),
        target_schema: "TGT".to_string(),
        diff_threads: 2,
        work_dir: dir.to_path_buf(),
        enable_progress: false,
        ..DiffConfig::default()
    }
}

pub fn two_col_rows(data: &[(i64, &str)]) -> Vec<Vec<SqlValue>> {
    data.iter()
        .map(|(id, s)| vec![SqlValue::Int(*id), SqlValue::Text(s.to_string())])
        .collect()
}

// ---- query evaluation over the fixture tables ----

fn digest_tables(
    tables: &BTreeMap<String, FakeTable>,
    query: &str,
    ordered: bool,
) -> Result<RowDigest> {
    let parsed = parse_query(query)?;
    let t = tables
        .get(&parsed.table)
        .ok_or_else(|| format!("unknown table {}", parsed.table))?;
    let mut rows: Vec<&Vec<SqlValue>> = t
        .rows
        .iter()
        .filter(|r| range_matches(t, &parsed.range, r))
        .collect();
    if let Some(order_col) = &parsed.order_column {
        let idx = column_index(t, order_col)?;
        rows.sort_by_key(|r| std::cmp::Reverse(as_i64(&r[idx]).unwrap_or(i64::MIN)));
    }
    let columns: Vec<String> = t.columns.iter().map(|c| c.name.clone()).collect();
    Ok(fold_rows(
        columns,
        rows.into_iter().map(|r| canonical_row(r)),
        ordered,
    ))
}

fn count_tables(tables: &BTreeMap<String, FakeTable>, query: &str) -> Result<i64> {
    let parsed = parse_query(query)?;
    let t = tables
        .get(&parsed.table)
        .ok_or_else(|| format!("unknown table {}", parsed.table))?;
    Ok(t.rows
        .iter()
        .filter(|r| range_matches(t, &parsed.range, r))
        .count() as i64)
}

struct ParsedQuery {
    table: String,
    range: String,
    order_column: Option<String>,
}

// Understands exactly the SELECT shapes the engine's query builders emit.
fn parse_query(sql: &str) -> Result<ParsedQuery> {
    let from_idx = sql
        .find(" FROM ")
        .ok_or_else(|| format!("unparseable query: {}", sql))?;
    let rest = &sql[from_idx + 6..];
    let where_idx = rest
        .find(" WHERE ")
        .ok_or_else(|| format!("query without range: {}", sql))?;
    let table = rest[..where_idx]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .trim_matches(|c| c == '"' || c == '`')
        .to_string();
    let mut range = rest[where_idx + 7..].to_string();
    let mut order_column = None;
    if let Some(idx) = range.find(" ORDER BY ") {
        let col = range[idx + 10..]
            .trim()
            .trim_end_matches("DESC")
            .trim()
            .trim_matches(|c| c == '"' || c == '`')
            .to_string();
        order_column = Some(col);
        range.truncate(idx);
    }
    Ok(ParsedQuery {
        table,
        range: range.trim().to_string(),
        order_column,
    })
}

fn range_matches(table: &FakeTable, range: &str, row: &[SqlValue]) -> bool {
    if range == "1 = 1" {
        return true;
    }
    range
        .split(" AND ")
        .all(|cond| cond_matches(table, cond.trim(), row))
}

fn cond_matches(table: &FakeTable, cond: &str, row: &[SqlValue]) -> bool {
    let parts: Vec<&str> = cond.splitn(3, ' ').collect();
    if parts.len() != 3 {
        panic!("unsupported predicate: {}", cond);
    }
    let idx = match column_index(table, parts[0]) {
        Ok(i) => i,
        Err(_) => return false,
    };
    match parts[1] {
        ">=" | "<" | "<=" => {
            let bound: i64 = parts[2].parse().expect("numeric bound");
            let v = match as_i64(&row[idx]) {
                Some(v) => v,
                None => return false,
            };
            match parts[1] {
                ">=" => v >= bound,
                "<" => v < bound,
                _ => v <= bound,
            }
        }
        "=" => canonical_value(&row[idx]) == parts[2],
        other => panic!("unsupported operator: {}", other),
    }
}

fn column_index(table: &FakeTable, name: &str) -> Result<usize> {
    table
        .columns
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| format!("unknown column {}", name).into())
}

fn as_i64(v: &SqlValue) -> Option<i64> {
    match v {
        SqlValue::Int(n) => Some(*n),
        SqlValue::Real(f) => Some(*f as i64),
        _ => None,
    }
}
