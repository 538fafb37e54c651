use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Instant;

use futures::FutureExt;
use media_fetch_host_error::HostError;
use serde_json::Value;

use crate::command::run_captured;
use crate::config::HostConfig;
use crate::parser::OutputParser;
use crate::protocol::{
    Acknowledgement, CancelDownloadRequest, CheckFormatRequest, Command, CommandKind,
    DirectoryEntry, DirectoryListing, ExecOutput, ExecRequest, FormatCheck, ListRequest,
    OpenFileRequest, Response, StartDownloadRequest,
};
use crate::spawner::LaunchSpec;
use crate::supervisor::{DownloadRequest, Supervisor};

/// Routes one decoded message to its handler. Every outcome, including a
/// panicking handler, becomes exactly one [`Response`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: HostConfig,
    supervisor: Supervisor,
    parser: &'static OutputParser,
}

impl Dispatcher {
    pub fn new(config: HostConfig, supervisor: Supervisor) -> Self {
        Self {
            config,
            supervisor,
            parser: OutputParser::shared(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn dispatch(&self, message: Value) -> Response {
        let kind = CommandKind::of_message(&message);
        let command = match Command::from_value(message) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(kind = ?kind, code = err.error_type().as_str(), error = %err, "rejected message");
                return Response::failure(kind, &err);
            }
        };

        let kind = command.kind();
        let started = Instant::now();
        let result = AssertUnwindSafe(self.handle(command)).catch_unwind().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(response)) => {
                tracing::info!(kind = kind.as_str(), elapsed_ms, "handled message");
                response
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    code = err.error_type().as_str(),
                    elapsed_ms,
                    error = %err,
                    "message failed"
                );
                Response::failure(Some(kind), &err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(kind = kind.as_str(), panic = %message, "handler panicked");
                Response::failure(Some(kind), &HostError::Internal { message })
            }
        }
    }

    async fn handle(&self, command: Command) -> Result<Response, HostError> {
        match command {
            Command::Exec(request) => self.exec(request).await,
            Command::List(request) => self.list(request).await,
            Command::CheckFormat(request) => self.check_format(request).await,
            Command::StartDownload(request) => self.start_download(request).await,
            Command::CancelDownload(request) => self.cancel_download(request).await,
            Command::OpenFile(request) => self.open_file(request).await,
        }
    }

    async fn exec(&self, request: ExecRequest) -> Result<Response, HostError> {
        let launch = LaunchSpec::new(request.command, request.args);
        tracing::info!(command = %launch.display(), "exec");
        let output = run_captured(&launch, self.config.exec_timeout).await?;
        if !output.success() {
            return Err(output.into_failure(&launch));
        }
        Ok(Response::success(
            CommandKind::Exec,
            &ExecOutput {
                stdout: output.stdout,
                stderr: output.stderr,
            },
        ))
    }

    async fn list(&self, request: ListRequest) -> Result<Response, HostError> {
        let path = request.path;
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|err| HostError::io(format!("failed to list {path}"), err))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|err| HostError::io(format!("failed to list {path}"), err))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| HostError::io(format!("failed to stat entry in {path}"), err))?;
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                dir: file_type.is_dir(),
                file: file_type.is_file(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!(path = %path, count = entries.len(), "listed directory");

        Ok(Response::success(
            CommandKind::List,
            &DirectoryListing { path, entries },
        ))
    }

    async fn check_format(&self, request: CheckFormatRequest) -> Result<Response, HostError> {
        let CheckFormatRequest { tool_path, url } = request;
        let launch = LaunchSpec::new(tool_path, vec!["--list-formats".to_string(), url.clone()]);
        tracing::info!(url = %url, command = %launch.display(), "checking formats");

        let output = match run_captured(&launch, self.config.check_timeout).await {
            Ok(output) => output,
            Err(HostError::Timeout { timeout_ms, .. }) => {
                tracing::warn!(url = %url, timeout_ms, "format listing timed out");
                let check = FormatCheck::failed(
                    &url,
                    format!("format listing timed out after {timeout_ms}ms"),
                );
                return Ok(Response::success(CommandKind::CheckFormat, &check));
            }
            Err(err) => return Err(err),
        };
        let check = if output.success() {
            FormatCheck::from_selection(&url, self.parser.select_best_format(&output.stdout))
        } else {
            let code = output
                .code
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            tracing::warn!(url = %url, code = %code, stderr = %output.stderr.trim(), "format listing failed");
            FormatCheck::failed(&url, format!("format listing failed (code={code})"))
        };
        tracing::info!(
            url = %url,
            success = check.success,
            format_id = ?check.format_id,
            resolution = ?check.resolution,
            filesize = ?check.filesize,
            "format check finished"
        );
        Ok(Response::success(CommandKind::CheckFormat, &check))
    }

    async fn start_download(&self, request: StartDownloadRequest) -> Result<Response, HostError> {
        let StartDownloadRequest {
            tool_path,
            format_id,
            url,
            output_path,
            filename,
        } = request;
        let filepath = Path::new(&output_path)
            .join(&filename)
            .to_string_lossy()
            .into_owned();
        let launch = LaunchSpec::new(
            tool_path,
            vec![
                "-f".to_string(),
                format_id,
                url.clone(),
                "-o".to_string(),
                filepath.clone(),
                "--newline".to_string(),
                "--no-warnings".to_string(),
            ],
        );

        self.supervisor
            .start(DownloadRequest {
                key: url.clone(),
                launch,
                filepath: filepath.clone(),
            })
            .await?;

        Ok(Response::success(
            CommandKind::StartDownload,
            &Acknowledgement {
                message: "download started".to_string(),
                key: Some(url),
                filepath: Some(filepath),
            },
        ))
    }

    async fn cancel_download(&self, request: CancelDownloadRequest) -> Result<Response, HostError> {
        self.supervisor.cancel(&request.url).await?;
        Ok(Response::success(
            CommandKind::CancelDownload,
            &Acknowledgement {
                message: "download cancelled".to_string(),
                key: Some(request.url),
                filepath: None,
            },
        ))
    }

    async fn open_file(&self, request: OpenFileRequest) -> Result<Response, HostError> {
        let launch = self.config.open_file_launch(&request.filepath);
        tracing::info!(filepath = %request.filepath, command = %launch.display(), "opening file");
        let output = run_captured(&launch, self.config.exec_timeout).await?;
        if !output.success() {
            return Err(output.into_failure(&launch));
        }
        Ok(Response::success(
            CommandKind::OpenFile,
            &Acknowledgement::new("file opened"),
        ))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
