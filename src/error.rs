use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaccyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("No extractor registered for data source: {0}")]
    UnknownExtractor(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, WaccyError>;
