use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Structured store error: {0}")]
    Store(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Text generation error: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
