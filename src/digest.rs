// Row digests: the canonical row set plus a CRC-32 folded over the canonical
// stream. Ordered results chain one hasher in result order; unordered results
// XOR per-row CRCs into a commutative accumulator so two sides that scan in
// different orders still compare equal.

use ahash::AHashSet;
use crc32fast::Hasher;

#[derive(Debug, Clone, Default)]
pub struct RowDigest {
    pub columns: Vec<String>,
    pub rows: AHashSet<String>,
    pub crc32: u32,
}

impl RowDigest {
    // Rows present here but absent from `other`, sorted for stable output.
    pub fn rows_missing_from(&self, other: &RowDigest) -> Vec<String> {
        let mut extra: Vec<String> = self.rows.difference(&other.rows).cloned().collect();
        extra.sort();
        extra
    }
}

// Fold canonical rows into a digest. `ordered` must reflect whether the query
// carried an ORDER BY clause.
pub fn fold_rows<I>(columns: Vec<String>, rows: I, ordered: bool) -> RowDigest
where
    I: IntoIterator<Item = String>,
{
    let mut set = AHashSet::new();
    let mut chained = Hasher::new();
    let mut acc: u32 = 0;
    for row in rows {
        if ordered {
            chained.update(row.as_bytes());
        } else {
            let mut h = Hasher::new();
            h.update(row.as_bytes());
            acc ^= h.finalize();
        }
        set.insert(row);
    }
    let crc32 = if ordered { chained.finalize() } else { acc };
    RowDigest {
        columns,
        rows: set,
        crc32,
    }
}
