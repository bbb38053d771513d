use thiserror::Error;

pub type MedvaultResult<T> = Result<T, MedvaultError>;

#[derive(Debug, Error)]
pub enum MedvaultError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
