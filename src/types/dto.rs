use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single scalar cell as returned by the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(true) => f.write_str("True"),
            CellValue::Bool(false) => f.write_str("False"),
            CellValue::Integer(v) => write!(f, "{v}"),
            CellValue::Float(v) => f.write_str(&float_text(*v)),
            CellValue::Text(v) => f.write_str(v),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::Timestamp(ts) => {
                if ts.nanosecond() / 1_000 == 0 {
                    write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S+00:00"))
                } else {
                    write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f+00:00"))
                }
            }
        }
    }
}

/// Shortest round-trip text with Python's float conventions: integral values
/// keep a `.0`, and magnitudes below 1e-4 or from 1e16 up use an exponent
/// with an explicit sign and at least two digits.
fn float_text(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let sci = format!("{v:e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Ordered column names of one result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One warehouse record keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    cells: HashMap<String, CellValue>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.cells.insert(column.into(), value);
    }

    pub fn with(mut self, column: impl Into<String>, value: CellValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub schema: TableSchema,
    pub rows: Vec<ResultRow>,
}

/// Status and body exactly as the upload target returned them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub status_code: u16,
    pub body: String,
}

/// JSON body of every `GET /` response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RelayResponse {
    Success {
        response_code: u16,
        response_text: String,
    },
    Error {
        error: String,
    },
}

impl From<UploadResult> for RelayResponse {
    fn from(result: UploadResult) -> Self {
        RelayResponse::Success {
            response_code: result.status_code,
            response_text: result.body,
        }
    }
}
