//! Wire shapes exchanged with the browser extension.

use media_fetch_host_error::HostError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::parser::{FormatCandidate, NO_PLAYABLE_STREAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    Exec,
    List,
    CheckFormat,
    StartDownload,
    CancelDownload,
    OpenFile,
}

impl CommandKind {
    /// Accepts the current names and the `host:` names used by older
    /// extension builds.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "exec" | "host:exec" => Some(Self::Exec),
            "list" | "host:list" => Some(Self::List),
            "check-format" | "host:ytdlp-check" => Some(Self::CheckFormat),
            "start-download" | "host:ytdlp-download" => Some(Self::StartDownload),
            "cancel-download" | "host:ytdlp-cancel" => Some(Self::CancelDownload),
            "open-file" | "host:open-file" => Some(Self::OpenFile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::List => "list",
            Self::CheckFormat => "check-format",
            Self::StartDownload => "start-download",
            Self::CancelDownload => "cancel-download",
            Self::OpenFile => "open-file",
        }
    }

    /// Kind named by a raw message, if it names a known one.
    pub fn of_message(message: &Value) -> Option<Self> {
        message_type(message).and_then(Self::parse)
    }
}

fn message_type(message: &Value) -> Option<&str> {
    message
        .get("type")
        .or_else(|| message.get("kind"))
        .and_then(Value::as_str)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[serde(default = "default_list_path")]
    pub path: String,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFormatRequest {
    #[serde(alias = "ytdlpPath")]
    pub tool_path: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDownloadRequest {
    #[serde(alias = "ytdlpPath")]
    pub tool_path: String,
    pub format_id: String,
    pub url: String,
    pub output_path: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelDownloadRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFileRequest {
    pub filepath: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exec(ExecRequest),
    List(ListRequest),
    CheckFormat(CheckFormatRequest),
    StartDownload(StartDownloadRequest),
    CancelDownload(CancelDownloadRequest),
    OpenFile(OpenFileRequest),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Exec(_) => CommandKind::Exec,
            Self::List(_) => CommandKind::List,
            Self::CheckFormat(_) => CommandKind::CheckFormat,
            Self::StartDownload(_) => CommandKind::StartDownload,
            Self::CancelDownload(_) => CommandKind::CancelDownload,
            Self::OpenFile(_) => CommandKind::OpenFile,
        }
    }

    pub fn from_value(message: Value) -> Result<Self, HostError> {
        let name = message_type(&message).map(str::to_string);
        let kind = name
            .as_deref()
            .and_then(CommandKind::parse)
            .ok_or(HostError::UnknownCommand { kind: name })?;

        Ok(match kind {
            CommandKind::Exec => Self::Exec(fields(kind, message)?),
            CommandKind::List => Self::List(fields(kind, message)?),
            CommandKind::CheckFormat => Self::CheckFormat(fields(kind, message)?),
            CommandKind::StartDownload => Self::StartDownload(fields(kind, message)?),
            CommandKind::CancelDownload => Self::CancelDownload(fields(kind, message)?),
            CommandKind::OpenFile => Self::OpenFile(fields(kind, message)?),
        })
    }
}

fn fields<T: DeserializeOwned>(kind: CommandKind, message: Value) -> Result<T, HostError> {
    serde_json::from_value(message).map_err(|err| HostError::InvalidRequest {
        kind: kind.as_str().to_string(),
        message: err.to_string(),
    })
}

/// Request-correlated reply. Exactly one is written per inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<CommandKind>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Response {
    pub fn success<T: Serialize>(kind: CommandKind, payload: &T) -> Self {
        match to_object(payload) {
            Ok(body) => Self {
                ok: true,
                kind: Some(kind),
                body,
            },
            Err(err) => Self::failure(
                Some(kind),
                &HostError::Internal {
                    message: format!("failed to serialize response: {err}"),
                },
            ),
        }
    }

    pub fn failure(kind: Option<CommandKind>, error: &HostError) -> Self {
        let body = to_object(&error.to_error_body()).unwrap_or_else(|_| {
            let mut body = Map::new();
            body.insert("error".to_string(), Value::String(error.to_string()));
            body
        });
        Self {
            ok: false,
            kind,
            body,
        }
    }

    /// Last frame written before the host exits on a broken channel.
    pub fn fatal(reason: impl std::fmt::Display) -> Self {
        let mut body = Map::new();
        body.insert(
            "error".to_string(),
            Value::String(format!("fatal: {reason}")),
        );
        Self {
            ok: false,
            kind: None,
            body,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

fn to_object<T: Serialize>(payload: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            Ok(map)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub dir: bool,
    pub file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatCheck {
    pub url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FormatCheck {
    pub fn from_selection(url: impl Into<String>, best: Option<FormatCandidate>) -> Self {
        match best {
            Some(candidate) => Self {
                url: url.into(),
                success: true,
                resolution: Some(candidate.resolution()),
                filesize: Some(candidate.filesize().to_string()),
                format_id: candidate.format_id,
                error: None,
            },
            None => Self::failed(url, NO_PLAYABLE_STREAM),
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            format_id: None,
            resolution: None,
            filesize: None,
            error: Some(error.into()),
        }
    }
}

/// Confirms a command was accepted; says nothing about completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
}

impl Acknowledgement {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: None,
            filepath: None,
        }
    }
}

/// Unsolicited download notifications, keyed by the download key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostEvent {
    Progress {
        key: String,
        percent: f64,
        output: String,
    },
    Complete {
        key: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filepath: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Progress { key, .. } | Self::Complete { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Response(Response),
    Event(HostEvent),
}
