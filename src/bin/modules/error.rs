use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    /// Errors originating from the core defeq library calculations.
    #[error("Calculation error: {0}")]
    Calculation(#[from] defeq::DefeqError),

    /// I/O errors associated with a specific file path.
    #[error("I/O error for '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// General I/O errors not tied to a specific file.
    #[error("I/O error: {0}")]
    GenericIo(#[from] std::io::Error),

    /// Errors serializing results to JSON.
    #[error("Failed to write JSON output: {0}")]
    Json(#[from] serde_json::Error),

    /// Command-line arguments that parse but cannot be combined.
    #[error("Invalid arguments: {0}")]
    InvalidArgument(String),
}
