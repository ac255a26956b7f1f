use thiserror::Error;

#[derive(Error, Debug)]
pub enum FareHexError {
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Config parsing failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Invalid cell encoding: {0}")]
    InvalidEncoding(String),
}

impl From<parquet::errors::ParquetError> for FareHexError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        FareHexError::Parquet(e.to_string())
    }
}
