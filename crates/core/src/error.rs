use std::path::PathBuf;

/// Result alias that carries the custom [`TracksError`] type.
pub type Result<T> = std::result::Result<T, TracksError>;

/// Common error type for the core crate.
///
/// Only analysis and setup failures surface through this type. Missing
/// features and transport hiccups during emission are logged and absorbed
/// where they happen.
#[derive(Debug, thiserror::Error)]
pub enum TracksError {
    /// Free-form message for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Envelope could not be encoded or decoded.
    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("failed to decode audio file '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
    /// A pool key was written twice during one analysis run.
    #[error("feature `{0}` was already written during this run")]
    DuplicateFeature(String),
    #[error("feature `{0}` is not present in the pool")]
    MissingFeature(String),
    #[error("extractor failed during the {pass} pass: {reason}")]
    Extractor { pass: &'static str, reason: String },
}

impl TracksError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for TracksError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TracksError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
