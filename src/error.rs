use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Hardware error: {0}")]
    Hardware(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid zone index: {0}")]
    InvalidZone(usize),
    #[error("Unknown program: {0}")]
    UnknownProgram(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
