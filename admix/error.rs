use crate::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Fatal failures of the estimation pipeline.
///
/// Every variant is raised before any result state exists; advisory conditions
/// travel with the result as [`crate::types::Diagnostic`] values instead.
#[derive(Error, Debug)]
pub enum AdmixError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid dimension configuration: {0}")]
    InvalidDimensionConfig(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Genotype matrix entry at marker {marker}, individual {individual} is not finite ({value})")]
    InvalidGenotype {
        marker: usize,
        individual: usize,
        value: f64,
    },

    #[error("Linear algebra backend failed: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error("Failed to read or write file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
