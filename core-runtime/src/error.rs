use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
