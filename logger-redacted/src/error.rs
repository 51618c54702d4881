use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Invalid redaction pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}
