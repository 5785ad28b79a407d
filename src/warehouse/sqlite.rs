use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;

use super::{Dialect, Warehouse};
use crate::error::{RelayError, Result};
use crate::types::{CellValue, QueryResult, ResultRow, TableSchema};

/// A local SQLite file standing in for the warehouse, e.g. for dry runs
/// against an exported snapshot.
pub struct SqliteWarehouse {
    path: PathBuf,
}

impl SqliteWarehouse {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn cell(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(v) => CellValue::Integer(v),
        ValueRef::Real(v) => CellValue::Float(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            CellValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn execute_sql_query(conn: &Connection, sql: &str) -> rusqlite::Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = ResultRow::new();
        for (i, name) in columns.iter().enumerate() {
            record.insert(name.clone(), cell(row.get_ref(i)?));
        }
        out.push(record);
    }

    Ok(QueryResult {
        schema: TableSchema { columns },
        rows: out,
    })
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str) -> Result<QueryResult> {
        let path = self.path.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<QueryResult> {
            let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
            execute_sql_query(&conn, &sql)
        })
        .await
        .map_err(|e| RelayError::SourceQuery(format!("query task failed: {e}")))?
        .map_err(|e| RelayError::SourceQuery(e.to_string()))
    }
}
