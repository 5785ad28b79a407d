pub mod dto;

pub use dto::{CellValue, QueryResult, RelayResponse, ResultRow, TableSchema, UploadResult};
