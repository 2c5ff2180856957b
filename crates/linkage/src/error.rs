use std::fmt;

#[derive(Debug)]
pub enum LinkError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (unknown source, bad step reference, etc.).
    ConfigValidation(String),
    /// A step or fusion entry references a source that does not exist.
    UnknownSource(String),
    /// Every configured join column was missing from one side or the other.
    NoUsableColumns { requested: usize },
    /// Missing required column in input data.
    MissingColumn { source: String, column: String },
    /// The pipeline's base source could not be fetched.
    BaseSourceFailed { source: String, reason: String },
    /// IO error (file read, CSV decode, etc.).
    Io(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::UnknownSource(name) => write!(f, "unknown source: {name}"),
            Self::NoUsableColumns { requested } => {
                write!(f, "none of the {requested} configured join column(s) exist on both sides")
            }
            Self::MissingColumn { source, column } => {
                write!(f, "source '{source}': missing column '{column}'")
            }
            Self::BaseSourceFailed { source, reason } => {
                write!(f, "base source '{source}' failed: {reason}")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for LinkError {}

/// Failure reported by a collaborator `RecordSource`. Captured per-source by
/// the pipeline; a panicking fetch thread is mapped into one of these too.
#[derive(Debug)]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SourceError {}
