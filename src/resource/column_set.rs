//! Column set merge
//!
//! Appends the shared baseline columns to a table's own columns, skipping
//! any baseline column whose name the table already declares.

use super::column::Column;
use std::collections::HashSet;

/// Merge `baseline` into `specific`.
///
/// Specific columns keep their order and win on name clashes; baseline
/// columns not yet present follow in baseline order.
pub fn merge(baseline: &[Column], specific: Vec<Column>) -> Vec<Column> {
    let mut seen: HashSet<String> = specific.iter().map(|c| c.name.clone()).collect();
    let mut merged = specific;

    for column in baseline {
        if seen.insert(column.name.clone()) {
            merged.push(column.clone());
        }
    }

    merged
}
