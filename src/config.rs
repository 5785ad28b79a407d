use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{RelayError, Result};

pub const DEFAULT_TABLE: &str = "myposter-data-hub.mp_mkt_4_crm.crm_emarsys_order_article";
pub const DEFAULT_ENDPOINT: &str =
    "https://admin.scarabresearch.com/hapi/merchant/1B86E9D84EC2F51F/sales-data/api";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATE_COLUMN: &str = "timestamp";

/// Where rows are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseConfig {
    BigQuery {
        project: String,
        access_token: Option<String>,
    },
    Sqlite {
        path: PathBuf,
    },
}

/// Process configuration, read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub token: String,
    pub table: String,
    pub endpoint: String,
    pub port: u16,
    pub date_column: String,
    pub warehouse: WarehouseConfig,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("INHABER_TOKEN").unwrap_or_default();
        let table =
            non_empty(lookup("BIGQUERY_TABLE")).unwrap_or_else(|| DEFAULT_TABLE.to_string());
        let endpoint =
            non_empty(lookup("API_ENDPOINT")).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let port = lookup("PORT")
            .and_then(|v| v.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let date_column = non_empty(lookup("DATE_COLUMN"))
            .unwrap_or_else(|| DEFAULT_DATE_COLUMN.to_string());

        let warehouse = match non_empty(lookup("SQLITE_PATH")) {
            Some(path) => WarehouseConfig::Sqlite {
                path: PathBuf::from(path),
            },
            None => {
                let project = match non_empty(lookup("BIGQUERY_PROJECT")) {
                    Some(p) => p,
                    None => table_project(&table)?,
                };
                WarehouseConfig::BigQuery {
                    project,
                    access_token: non_empty(lookup("GOOGLE_OAUTH_ACCESS_TOKEN")),
                }
            }
        };

        Ok(Self {
            token,
            table,
            endpoint,
            port,
            date_column,
            warehouse,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

fn table_project(table: &str) -> Result<String> {
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() == 3 && parts.iter().all(|p| !p.is_empty()) {
        Ok(parts[0].to_string())
    } else {
        Err(RelayError::Config(format!(
            "BIGQUERY_TABLE must be project.dataset.table when BIGQUERY_PROJECT is unset, got {table}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.table, DEFAULT_TABLE);
        assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.date_column, "timestamp");
        assert!(cfg.token.is_empty());
        assert_eq!(
            cfg.warehouse,
            WarehouseConfig::BigQuery {
                project: "myposter-data-hub".into(),
                access_token: None,
            }
        );
        assert_eq!(cfg.bind_addr().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn explicit_values_win() {
        let cfg = Config::from_lookup(lookup(&[
            ("INHABER_TOKEN", "tok"),
            ("BIGQUERY_TABLE", "p.d.t"),
            ("API_ENDPOINT", "http://localhost:9/x"),
            ("PORT", "9000"),
            ("BIGQUERY_PROJECT", "billing"),
            ("GOOGLE_OAUTH_ACCESS_TOKEN", "ya29"),
        ]))
        .unwrap();
        assert_eq!(cfg.token, "tok");
        assert_eq!(cfg.port, 9000);
        assert_eq!(
            cfg.warehouse,
            WarehouseConfig::BigQuery {
                project: "billing".into(),
                access_token: Some("ya29".into()),
            }
        );
    }

    #[test]
    fn bad_port_falls_back() {
        let cfg = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn sqlite_path_selects_sqlite_backend() {
        let cfg = Config::from_lookup(lookup(&[
            ("SQLITE_PATH", "/tmp/orders.db"),
            ("BIGQUERY_TABLE", "orders"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.warehouse,
            WarehouseConfig::Sqlite {
                path: PathBuf::from("/tmp/orders.db")
            }
        );
    }

    #[test]
    fn unqualified_table_needs_project() {
        let err = Config::from_lookup(lookup(&[("BIGQUERY_TABLE", "orders")])).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
