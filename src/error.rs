use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: i64 },

    #[error("Conflicting session {session_id} ({status}) from {starts_at} to {ends_at}")]
    SessionConflict {
        session_id: i64,
        status: String,
        starts_at: String,
        ends_at: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AttendError>;
