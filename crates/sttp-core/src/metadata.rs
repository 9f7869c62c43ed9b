//! Metadata exchange: generic tabular dataset model, filter-expression
//! parsing, and CBOR+GZip wire serialization (§4.4).
//!
//! The wire contract only requires a generic tabular ingest — named tables
//! such as device/measurement/phasor detail and schema version are a
//! convention of what the two ends agree to exchange, not something this
//! layer hard-codes.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// A single cell value in a tabular dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent/NULL.
    Null,
    /// UTF-8 text.
    Text(String),
    /// A signed integer.
    Integer(i64),
    /// A floating-point number.
    Real(f64),
    /// A boolean.
    Boolean(bool),
}

/// One table: a name, an ordered column schema, and rows of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name (e.g. `MeasurementDetail`, `DeviceDetail`, `PhasorDetail`,
    /// `SchemaVersion`).
    pub name: String,
    /// Column names, in row order.
    pub columns: Vec<String>,
    /// Rows, each with exactly `columns.len()` cells.
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Builds an empty table with the given name and column schema.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self { name: name.into(), columns, rows: Vec::new() }
    }

    /// Appends a row, validating its width against the column schema.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SessionError::MetadataMalformed(format!(
                "table {}: row has {} cells, schema has {}",
                self.name,
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }
}

/// A full metadata response: an unordered bundle of named tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularDataSet {
    /// Tables in this dataset.
    pub tables: Vec<Table>,
}

impl TabularDataSet {
    /// Looks up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Serializes to CBOR, optionally GZip-wrapping per the negotiated
    /// `CompressMetadata` operational mode.
    pub fn to_wire_bytes(&self, compress: bool) -> Result<Vec<u8>> {
        let mut cbor = Vec::new();
        ciborium::into_writer(self, &mut cbor)
            .map_err(|e| SessionError::MetadataMalformed(e.to_string()))?;

        if !compress {
            return Ok(cbor);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&cbor).map_err(|e| SessionError::MetadataMalformed(e.to_string()))?;
        encoder.finish().map_err(|e| SessionError::MetadataMalformed(e.to_string()))
    }

    /// Deserializes a metadata response, transparently GZip-decompressing
    /// when `compressed` is set.
    pub fn from_wire_bytes(bytes: &[u8], compressed: bool) -> Result<Self> {
        let cbor: Vec<u8> = if compressed {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| SessionError::MetadataMalformed(e.to_string()))?;
            out
        } else {
            bytes.to_vec()
        };
        ciborium::from_reader(cbor.as_slice()).map_err(|e| SessionError::MetadataMalformed(e.to_string()))
    }
}

/// One parsed `FILTER <table> WHERE <predicate> [ORDER BY <field>] [TOP <n>]`
/// clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpression {
    /// Table the filter applies to.
    pub table: String,
    /// Raw predicate text, passed through uninterpreted by this layer.
    pub predicate: String,
    /// Optional sort field.
    pub order_by: Option<String>,
    /// Optional row cap.
    pub top: Option<u32>,
}

/// Parses a `;`-separated list of filter expressions sent alongside
/// `MetadataRefresh`.
pub fn parse_filter_expressions(input: &str) -> Result<Vec<FilterExpression>> {
    input.split(';').map(str::trim).filter(|s| !s.is_empty()).map(parse_one_filter).collect()
}

fn parse_one_filter(clause: &str) -> Result<FilterExpression> {
    let tokens: Vec<&str> = clause.split_whitespace().collect();
    let malformed = || SessionError::MetadataMalformed(format!("malformed filter expression: {clause}"));

    if tokens.first().map(|t| t.eq_ignore_ascii_case("FILTER")) != Some(true) {
        return Err(malformed());
    }
    let table = tokens.get(1).ok_or_else(malformed)?.to_string();
    if tokens.get(2).map(|t| t.eq_ignore_ascii_case("WHERE")) != Some(true) {
        return Err(malformed());
    }

    let rest = &tokens[3..];
    let order_idx =
        rest.windows(2).position(|w| w[0].eq_ignore_ascii_case("ORDER") && w[1].eq_ignore_ascii_case("BY"));
    let top_idx = rest.iter().position(|t| t.eq_ignore_ascii_case("TOP"));

    let predicate_end = [order_idx, top_idx].into_iter().flatten().min().unwrap_or(rest.len());
    if predicate_end == 0 {
        return Err(malformed());
    }
    let predicate = rest[..predicate_end].join(" ");

    let order_by = order_idx.and_then(|i| rest.get(i + 2)).map(|s| s.to_string());
    let top = match top_idx {
        Some(i) => Some(rest.get(i + 1).ok_or_else(malformed)?.parse::<u32>().map_err(|_| malformed())?),
        None => None,
    };

    Ok(FilterExpression { table, predicate, order_by, top })
}
