use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown workflow phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown task status: {0}")]
    UnknownTaskStatus(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
