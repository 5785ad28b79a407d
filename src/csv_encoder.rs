//! CSV serialization of a warehouse result set.

use crate::error::{RelayError, Result};
use crate::types::{CellValue, ResultRow, TableSchema};

/// Encodes `rows` in `schema` column order: one header line, then one line per
/// row. Missing columns and nulls become empty fields. An empty schema yields
/// an empty document.
pub fn encode<'a, I>(schema: &TableSchema, rows: I) -> Result<String>
where
    I: IntoIterator<Item = &'a ResultRow>,
{
    if schema.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());

    writer
        .write_record(&schema.columns)
        .map_err(|e| RelayError::Encode(e.to_string()))?;

    let mut fields: Vec<String> = Vec::with_capacity(schema.columns.len());
    for row in rows {
        fields.clear();
        fields.extend(
            schema
                .columns
                .iter()
                .map(|column| row.get(column).unwrap_or(&CellValue::Null).to_string()),
        );
        writer
            .write_record(&fields)
            .map_err(|e| RelayError::Encode(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| RelayError::Encode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RelayError::Encode(e.to_string()))
}
