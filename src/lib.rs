#![forbid(unsafe_code)]

pub mod config;
pub mod csv_encoder;
pub mod error;
pub mod server;
pub mod types;
pub mod upload;
pub mod warehouse;

pub use config::{Config, WarehouseConfig};
pub use error::{RelayError, Result};
pub use server::{build_router, run_pipeline, serve, AppState};
pub use types::{CellValue, QueryResult, RelayResponse, ResultRow, TableSchema, UploadResult};
pub use upload::{HttpUploader, Uploader};
pub use warehouse::{
    build_query, BigQueryWarehouse, Dialect, Mode, Reader, SqliteWarehouse, Warehouse,
};
