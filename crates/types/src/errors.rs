use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid duration {0:?}, expected a number followed by ms, s, m or h")]
    InvalidDuration(String),

    #[error("invalid {field} {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write report {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}
