use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("No composite index on collection '{collection}': {details}")]
    IndexUnavailable { collection: String, details: String },

    #[error("Could not parse query intent: {0}")]
    ParseFailure(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Invalid query intent: {0}")]
    ValidationFailure(String),

    #[error("Summary generation failed: {0}")]
    SummaryFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(any(feature = "gemini", feature = "firestore"))]
impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        QueryError::NetworkFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
