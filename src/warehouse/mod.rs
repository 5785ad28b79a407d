//! Warehouse reader: builds the export statement for one configured table and
//! materializes the full result through a pluggable backend.

mod bigquery;
mod sqlite;

pub use bigquery::BigQueryWarehouse;
pub use sqlite::SqliteWarehouse;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{Config, WarehouseConfig};
use crate::error::Result;
use crate::types::QueryResult;

/// Which rows a request exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    All,
    Yesterday,
}

impl Mode {
    /// Unknown or missing selectors mean `All`; this never fails.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("yesterday") => Mode::Yesterday,
            _ => Mode::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::All => "all",
            Mode::Yesterday => "yesterday",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    BigQuery,
    Sqlite,
}

/// Builds the export statement. "Yesterday" is the current UTC date minus one
/// day, evaluated by the warehouse when the statement runs.
pub fn build_query(dialect: Dialect, table: &str, date_column: &str, mode: Mode) -> String {
    let (table, column) = match dialect {
        Dialect::BigQuery => (
            format!("`{}`", table.replace('`', "")),
            format!("`{}`", date_column.replace('`', "")),
        ),
        Dialect::Sqlite => (
            format!("\"{}\"", table.replace('"', "\"\"")),
            format!("\"{}\"", date_column.replace('"', "\"\"")),
        ),
    };
    let mut sql = format!("SELECT * FROM {table}");
    if mode == Mode::Yesterday {
        let predicate = match dialect {
            Dialect::BigQuery => {
                format!("DATE({column}) = DATE_SUB(CURRENT_DATE('UTC'), INTERVAL 1 DAY)")
            }
            Dialect::Sqlite => format!("date({column}) = date('now', '-1 day')"),
        };
        sql.push_str(" WHERE ");
        sql.push_str(&predicate);
    }
    sql
}

/// A query service that returns a fully materialized result set.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn query(&self, sql: &str) -> Result<QueryResult>;
}

/// Reads the configured table through a [`Warehouse`] backend.
pub struct Reader {
    backend: Arc<dyn Warehouse>,
    table: String,
    date_column: String,
}

impl Reader {
    pub fn new(
        backend: Arc<dyn Warehouse>,
        table: impl Into<String>,
        date_column: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            table: table.into(),
            date_column: date_column.into(),
        }
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        let backend: Arc<dyn Warehouse> = match &config.warehouse {
            WarehouseConfig::BigQuery {
                project,
                access_token,
            } => Arc::new(BigQueryWarehouse::new(
                http,
                project.clone(),
                access_token.clone(),
            )),
            WarehouseConfig::Sqlite { path } => Arc::new(SqliteWarehouse::new(path.clone())),
        };
        Self::new(backend, config.table.clone(), config.date_column.clone())
    }

    pub fn statement(&self, mode: Mode) -> String {
        build_query(
            self.backend.dialect(),
            &self.table,
            &self.date_column,
            mode,
        )
    }

    pub async fn fetch(&self, mode: Mode) -> Result<QueryResult> {
        let sql = self.statement(mode);
        info!(mode = mode.as_str(), table = %self.table, "querying warehouse");
        let result = self.backend.query(&sql).await?;
        info!(
            columns = result.schema.columns.len(),
            rows = result.rows.len(),
            "warehouse query finished"
        );
        Ok(result)
    }
}
