use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    UnknownCommand,
    SpawnFailed,
    Conflict,
    NotFound,
    CommandFailed,
    Timeout,
    Io,
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnknownCommand => "unknown_command",
            Self::SpawnFailed => "spawn_failed",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::CommandFailed => "command_failed",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }
}

/// Failure payload flattened into an `{ok: false}` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid {kind} request: {message}")]
    InvalidRequest { kind: String, message: String },
    #[error("unknown message type")]
    UnknownCommand { kind: Option<String> },
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("download already active for {key}")]
    Conflict { key: String },
    #[error("no active download found")]
    NotFound { key: String },
    #[error("`{command}` failed (code={})", display_code(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: Option<String>,
    },
    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("internal error: {message}")]
    Internal { message: String },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl HostError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::UnknownCommand { .. } => ErrorType::UnknownCommand,
            Self::Spawn { .. } => ErrorType::SpawnFailed,
            Self::Conflict { .. } => ErrorType::Conflict,
            Self::NotFound { .. } => ErrorType::NotFound,
            Self::CommandFailed { .. } => ErrorType::CommandFailed,
            Self::Timeout { .. } => ErrorType::Timeout,
            Self::Io { .. } => ErrorType::Io,
            Self::Internal { .. } => ErrorType::Internal,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        let stderr = match self {
            Self::CommandFailed { stderr, .. } => stderr.clone().filter(|s| !s.is_empty()),
            _ => None,
        };
        ErrorBody {
            error: self.to_string(),
            code: self.error_type(),
            stderr,
        }
    }
}
