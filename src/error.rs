use thiserror::Error;

/// Failure of one relay pipeline stage.
///
/// The `Display` text is what callers see in the `error` field of the JSON
/// response; there is no machine-readable classification beyond it.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Warehouse connectivity, authorization or SQL failure.
    #[error("warehouse query failed: {0}")]
    SourceQuery(String),

    /// Network failure while posting the CSV.
    #[error("upload failed: {0}")]
    Transport(String),

    #[error("csv encoding failed: {0}")]
    Encode(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
