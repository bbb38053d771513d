pub mod config;
pub mod error;

pub use config::MedvaultConfig;
pub use error::{MedvaultError, MedvaultResult};
