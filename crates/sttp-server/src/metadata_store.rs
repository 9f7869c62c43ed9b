//! Holds the publisher's measurement catalog: the process-wide intern
//! table plus the tabular metadata served by `MetadataRefresh` (§4.4).
//!
//! Filter-predicate evaluation is intentionally narrow — a single
//! `column op literal` comparison, matching the one-clause filters shown in
//! §8's S2 scenario — rather than a general expression evaluator. The wire
//! contract (`FilterExpression`) is fully general; this store just doesn't
//! need more than equality/inequality to serve the catalog it owns.

use std::sync::RwLock;

use sttp_core::{FilterExpression, InternTable, MeasurementKey, Table, TabularDataSet, Value};
use uuid::Uuid;

/// The publisher's measurement catalog and identity registry.
pub struct MetadataStore {
    intern: InternTable,
    dataset: RwLock<TabularDataSet>,
}

impl MetadataStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { intern: InternTable::new(), dataset: RwLock::new(TabularDataSet::default()) }
    }

    /// The process-wide measurement-key intern table.
    #[must_use]
    pub fn intern_table(&self) -> &InternTable {
        &self.intern
    }

    /// Replaces the full metadata dataset (e.g. on device/point reload).
    pub fn replace_dataset(&self, dataset: TabularDataSet) {
        *self.dataset.write().unwrap_or_else(|e| e.into_inner()) = dataset;
    }

    /// Registers one measurement in both the intern table and the
    /// `MeasurementDetail` table, creating the table if this is the first
    /// row.
    pub fn register_measurement(&self, signal_id: Uuid, source: &str, numeric_id: u64, tag: &str, signal_type: &str) {
        self.intern.get_or_intern(signal_id, source, numeric_id);

        let mut dataset = self.dataset.write().unwrap_or_else(|e| e.into_inner());
        let table = match dataset.tables.iter_mut().find(|t| t.name == "MeasurementDetail") {
            Some(t) => t,
            None => {
                dataset.tables.push(Table::new(
                    "MeasurementDetail",
                    vec![
                        "SignalID".into(),
                        "Source".into(),
                        "ID".into(),
                        "PointTag".into(),
                        "SignalType".into(),
                    ],
                ));
                dataset.tables.last_mut().expect("table was just pushed")
            },
        };
        let _ = table.push_row(vec![
            Value::Text(signal_id.to_string()),
            Value::Text(source.to_string()),
            Value::Integer(numeric_id as i64),
            Value::Text(tag.to_string()),
            Value::Text(signal_type.to_string()),
        ]);
    }

    /// Builds the dataset to serve for a `MetadataRefresh`, applying `FILTER`
    /// clauses when present. An empty filter list returns the full catalog.
    #[must_use]
    pub fn dataset_for_filters(&self, filters: &[FilterExpression]) -> TabularDataSet {
        let dataset = self.dataset.read().unwrap_or_else(|e| e.into_inner());
        if filters.is_empty() {
            return dataset.clone();
        }

        let mut tables = Vec::new();
        for filter in filters {
            let Some(table) = dataset.table(&filter.table) else { continue };
            let mut filtered = Table::new(table.name.clone(), table.columns.clone());
            for row in &table.rows {
                if row_matches(table, row, &filter.predicate) {
                    let _ = filtered.push_row(row.clone());
                }
            }
            if let Some(column) = &filter.order_by {
                if let Some(idx) = table.columns.iter().position(|c| c == column) {
                    filtered.rows.sort_by(|a, b| cell_cmp(&a[idx], &b[idx]));
                }
            }
            if let Some(top) = filter.top {
                filtered.rows.truncate(top as usize);
            }
            tables.push(filtered);
        }
        TabularDataSet { tables }
    }

    /// Resolves `Subscribe`'s raw `inputMeasurementKeys` tokens into
    /// interned [`MeasurementKey`]s, in the order requested. A token is
    /// either a signal-ID GUID or a `SOURCE:NUMERIC_ID` pair; unresolvable
    /// tokens are silently skipped (the subscription proceeds with whatever
    /// did resolve, matching §4.5's non-fatal handling of unknown keys).
    #[must_use]
    pub fn resolve_keys(&self, tokens: &[String]) -> Vec<MeasurementKey> {
        tokens
            .iter()
            .filter_map(|token| {
                if let Ok(id) = Uuid::parse_str(token) {
                    return self.intern.lookup_by_signal_id(id);
                }
                let (source, numeric_id) = token.split_once(':')?;
                let numeric_id: u64 = numeric_id.parse().ok()?;
                self.intern.lookup_by_source_numeric(source, numeric_id)
            })
            .collect()
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_matches(table: &Table, row: &[Value], predicate: &str) -> bool {
    let Some((column, op, literal)) = parse_predicate(predicate) else { return true };
    let Some(idx) = table.columns.iter().position(|c| c == column) else { return true };
    let equal = cell_eq_literal(&row[idx], literal);
    match op {
        "<>" | "!=" => !equal,
        _ => equal,
    }
}

fn parse_predicate(predicate: &str) -> Option<(&str, &str, &str)> {
    for op in ["<>", "!=", "="] {
        if let Some((left, right)) = predicate.split_once(op) {
            return Some((left.trim(), op, right.trim()));
        }
    }
    None
}

fn cell_eq_literal(value: &Value, literal: &str) -> bool {
    let literal = literal.trim_matches('\'').trim_matches('"');
    match value {
        Value::Text(s) => s == literal,
        Value::Integer(i) => literal.parse::<i64>().is_ok_and(|l| *i == l),
        Value::Real(r) => literal.parse::<f64>().is_ok_and(|l| (*r - l).abs() < f64::EPSILON),
        Value::Boolean(b) => literal.parse::<bool>().is_ok_and(|l| *b == l),
        Value::Null => literal.eq_ignore_ascii_case("null"),
    }
}

fn cell_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Real(x), Value::Real(y)) => x.total_cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_filter_by_not_equal() {
        let store = MetadataStore::new();
        store.register_measurement(Uuid::from_u128(1), "DEV1", 1, "DEV1:FREQ", "FREQ");
        store.register_measurement(Uuid::from_u128(2), "DEV1", 2, "DEV1:STAT", "STAT");

        let filters = sttp_core::metadata::parse_filter_expressions(
            "FILTER MeasurementDetail WHERE SignalType <> 'STAT'",
        )
        .unwrap();
        let dataset = store.dataset_for_filters(&filters);
        assert_eq!(dataset.tables[0].rows.len(), 1);
    }

    #[test]
    fn resolve_keys_accepts_guid_and_source_numeric_tokens() {
        let store = MetadataStore::new();
        store.register_measurement(Uuid::from_u128(7), "DEV1", 3, "DEV1:VOLT", "VPHM");

        let resolved = store.resolve_keys(&[Uuid::from_u128(7).to_string(), "DEV1:3".to_string()]);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0], resolved[1]);
    }

    #[test]
    fn unresolvable_token_is_skipped() {
        let store = MetadataStore::new();
        let resolved = store.resolve_keys(&["nonexistent:99".to_string()]);
        assert!(resolved.is_empty());
    }
}
