// Canonical row encoding shared by both database adapters.
// Every fetched row is rendered into one comma-delimited text form; the same
// renderer runs on both sides, so identical tuples always produce identical
// strings and the canonical values double as SQL literals for the repair
// statements. Divergence here is a correctness bug, not a cosmetic one.

use crate::Result;

// Typed value as handed over by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

// Canonical literal for one value:
//   NULL     -> NULL
//   numbers  -> fixed decimal, no trailing zeros, no exponent form
//   text     -> single-quoted, embedded quotes doubled
//   binary   -> 0x-prefixed uppercase hex
pub fn canonical_value(v: &SqlValue) -> String {
    match v {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Int(n) => n.to_string(),
        SqlValue::Real(f) => format_decimal(*f),
        SqlValue::Text(s) => quote_text(s),
        SqlValue::Bytes(b) => format!("0x{}", hex::encode_upper(b)),
    }
}

// Canonical comma-delimited form of one row.
pub fn canonical_row(values: &[SqlValue]) -> String {
    let parts: Vec<String> = values.iter().map(canonical_value).collect();
    parts.join(",")
}

// Split a canonical row back into its values, honoring quoted text so commas
// inside string literals do not break the row apart.
pub fn split_row(row: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = row.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                current.push(c);
                if in_quote {
                    // A doubled quote stays inside the literal.
                    if chars.peek() == Some(&'\'') {
                        current.push(chars.next().unwrap());
                    } else {
                        in_quote = false;
                    }
                } else {
                    in_quote = true;
                }
            }
            ',' if !in_quote => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

// WHERE predicate for one column/value pair. Equality against NULL never
// matches, so NULL values render as IS NULL.
pub fn where_predicate(column: &str, value: &str) -> String {
    if value == "NULL" {
        format!("{} IS NULL", column)
    } else {
        format!("{}={}", column, value)
    }
}

// Zip a canonical row against a column list, failing when the counts drift
// apart (the symptom of adapter canonicalization disagreement).
pub fn zip_row(columns: &[String], row: &str) -> Result<Vec<(String, String)>> {
    let values = split_row(row);
    if values.len() != columns.len() {
        return Err(format!(
            "column counts [{}] isn't match values counts [{}] for row [{}]",
            columns.len(),
            values.len(),
            row
        )
        .into());
    }
    Ok(columns.iter().cloned().zip(values).collect())
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

// Fixed decimal rendering without trailing zeros or exponent notation.
fn format_decimal(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e15 {
        return format!("{}", f.trunc() as i64);
    }
    let mut s = format!("{:.10}", f);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_value_goldens() {
        assert_eq!(canonical_value(&SqlValue::Null), "NULL");
        assert_eq!(canonical_value(&SqlValue::Int(42)), "42");
        assert_eq!(canonical_value(&SqlValue::Int(-7)), "-7");
        assert_eq!(canonical_value(&SqlValue::Real(2.0)), "2");
        assert_eq!(canonical_value(&SqlValue::Real(2.50)), "2.5");
        assert_eq!(canonical_value(&SqlValue::Real(-0.125)), "-0.125");
        assert_eq!(canonical_value(&SqlValue::Text("a".to_string())), "'a'");
        assert_eq!(
            canonical_value(&SqlValue::Text("it's".to_string())),
            "'it''s'"
        );
        assert_eq!(
            canonical_value(&SqlValue::Bytes(vec![0xDE, 0xAD])),
            "0xDEAD"
        );
    }

    #[test]
    fn decimal_never_uses_exponent_form() {
        let rendered = canonical_value(&SqlValue::Real(1e20));
        assert!(!rendered.contains('e') && !rendered.contains('E'));
        assert!(rendered.starts_with("100000000000000000000"));
    }

    #[test]
    fn row_round_trips_through_split() {
        let row = canonical_row(&[
            SqlValue::Int(1),
            SqlValue::Text("a,b".to_string()),
            SqlValue::Text("it's".to_string()),
            SqlValue::Null,
        ]);
        assert_eq!(row, "1,'a,b','it''s',NULL");
        assert_eq!(split_row(&row), vec!["1", "'a,b'", "'it''s'", "NULL"]);
    }

    #[test]
    fn zip_detects_count_drift() {
        let cols = vec!["C1".to_string(), "C2".to_string()];
        let pairs = zip_row(&cols, "1,'a'").unwrap();
        assert_eq!(pairs[0], ("C1".to_string(), "1".to_string()));
        assert!(zip_row(&cols, "1").is_err());
    }

    #[test]
    fn null_predicate_uses_is_null() {
        assert_eq!(where_predicate("C1", "NULL"), "C1 IS NULL");
        assert_eq!(where_predicate("C1", "3"), "C1=3");
    }
}
