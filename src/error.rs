use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{tool} failed: {reason}")]
    CommandFailed { tool: &'static str, reason: String },

    #[error("Could not parse {tool} output: {output:?}")]
    Unparsable { tool: &'static str, output: String },

    #[error("No successful samples")]
    NoSuccessfulSamples,

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
