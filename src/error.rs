use thiserror::Error;

/// Errors surfaced by the energy manager at runtime.
///
/// Internal invariant violations are not represented here; those panic.
#[derive(Debug, Error)]
pub enum EnergyManagerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid schedule grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid energy flow request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<validator::ValidationErrors> for EnergyManagerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        EnergyManagerError::InvalidConfig(errors.to_string())
    }
}

impl From<figment::Error> for EnergyManagerError {
    fn from(error: figment::Error) -> Self {
        EnergyManagerError::InvalidConfig(error.to_string())
    }
}

pub type Result<T, E = EnergyManagerError> = std::result::Result<T, E>;
