use thiserror::Error;

#[derive(Error, Debug)]
pub enum FieldTrialError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Malformed input in \"{field}\": {message}")]
    MalformedInput { field: String, message: String },
    #[error("Unresolved {kind} reference: {name}")]
    UnresolvedReference { kind: &'static str, name: String },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

impl FieldTrialError {
    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            field: field.into(),
            message: message.into(),
        }
    }
    pub fn unresolved(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            kind,
            name: name.into(),
        }
    }
    /// The offending field name, when the error is tied to one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MalformedInput { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FieldTrialError>;

// Helper conversions
impl From<rusqlite::Error> for FieldTrialError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<serde_json::Error> for FieldTrialError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(format!("document encoding: {e}"))
    }
}
impl From<::config::ConfigError> for FieldTrialError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
