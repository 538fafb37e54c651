use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::config::{HostConfig, DEFAULT_CHECK_TIMEOUT, DEFAULT_EXEC_TIMEOUT};
use crate::framing::{DEFAULT_MAX_INBOUND_FRAME, HEADER_LEN};
use crate::logging::{default_log_file, LogTarget};

#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "media-fetch-host", bin_name = "media-fetch-host")]
#[command(about = "Native-messaging host for the media-fetch browser extension", version)]
pub struct HostCli {
    /// Append logs to this file as well as stderr.
    #[arg(long, env = "MEDIA_FETCH_HOST_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log to stderr only. Wins over `--log-file`.
    #[arg(long)]
    pub no_log_file: bool,

    #[arg(long, env = "MEDIA_FETCH_HOST_EXEC_TIMEOUT_MS")]
    pub exec_timeout_ms: Option<u64>,

    #[arg(long, env = "MEDIA_FETCH_HOST_CHECK_TIMEOUT_MS")]
    pub check_timeout_ms: Option<u64>,

    #[arg(long, env = "MEDIA_FETCH_HOST_MAX_FRAME_BYTES")]
    pub max_frame_bytes: Option<usize>,

    /// Program used by `open-file` instead of the platform opener.
    #[arg(long, env = "MEDIA_FETCH_HOST_OPENER")]
    pub opener: Option<PathBuf>,

    /// Arguments the browser appends when launching the host (caller
    /// origin, manifest path). Logged and otherwise ignored.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub caller: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("{flag} must be greater than zero")]
    ZeroTimeout { flag: &'static str },
    #[error("--max-frame-bytes must be at least {min}, got {value}")]
    FrameLimitTooSmall { value: usize, min: usize },
}

impl HostCli {
    pub fn log_target(&self) -> LogTarget {
        if self.no_log_file {
            return LogTarget::StderrOnly;
        }
        LogTarget::File(self.log_file.clone().unwrap_or_else(default_log_file))
    }

    pub fn to_config(&self) -> Result<HostConfig, CliError> {
        let exec_timeout = timeout_from(self.exec_timeout_ms, "--exec-timeout-ms")?
            .unwrap_or(DEFAULT_EXEC_TIMEOUT);
        let check_timeout = timeout_from(self.check_timeout_ms, "--check-timeout-ms")?
            .unwrap_or(DEFAULT_CHECK_TIMEOUT);
        let max_frame_bytes = self.max_frame_bytes.unwrap_or(DEFAULT_MAX_INBOUND_FRAME);
        if max_frame_bytes <= HEADER_LEN {
            return Err(CliError::FrameLimitTooSmall {
                value: max_frame_bytes,
                min: HEADER_LEN + 1,
            });
        }
        Ok(HostConfig {
            exec_timeout,
            check_timeout,
            max_frame_bytes,
            opener: self.opener.clone(),
        })
    }
}

fn timeout_from(ms: Option<u64>, flag: &'static str) -> Result<Option<Duration>, CliError> {
    match ms {
        Some(0) => Err(CliError::ZeroTimeout { flag }),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}

/// Browsers launch the host with arguments of their own choosing, so a
/// parse failure must not keep the host from starting. Help and version
/// requests still print and exit.
pub fn parse_host_cli() -> HostCli {
    match HostCli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            eprintln!("ignoring command line: {err}");
            HostCli::default()
        }
    }
}
