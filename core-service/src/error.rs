use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine bootstrap failed: {0}")]
    Bootstrap(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
