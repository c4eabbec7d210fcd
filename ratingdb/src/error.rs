use thiserror::Error;

#[derive(Error, Debug)]
pub enum RatingDbError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Transaction contention: {collection}/{id} still conflicting after {attempts} attempts")]
    Contention {
        collection: String,
        id: String,
        attempts: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RatingDbError>;
