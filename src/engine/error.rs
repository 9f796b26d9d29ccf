use crate::model::{Ms, format_rfc3339};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Referenced task is absent.
    NotFound(String),
    /// `end <= start`.
    InvalidInterval { start: Ms, end: Ms },
    UnknownEngineer(String),
    AlreadyExists(String),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "task not found: {id}"),
            EngineError::InvalidInterval { start, end } => write!(
                f,
                "invalid interval: end {} is not after start {}",
                format_rfc3339(*end),
                format_rfc3339(*start)
            ),
            EngineError::UnknownEngineer(id) => write!(f, "unknown engineer: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
