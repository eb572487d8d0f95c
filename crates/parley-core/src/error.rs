use thiserror::Error;

use crate::content::Role;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Unsupported content: {kind} cannot be sent under the {role} role")]
    UnsupportedContentKind { role: Role, kind: &'static str },

    #[error("Unsupported role: {0}")]
    UnsupportedRole(String),

    #[error("Incomplete stream: event source ended before the response was finalized")]
    IncompleteStream,

    #[error("Backend error ({kind}): {message}")]
    Backend { kind: String, message: String },

    #[error("Malformed wire message: {0}")]
    MalformedWire(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParleyError>;
