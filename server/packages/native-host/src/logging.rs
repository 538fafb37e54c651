use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_DIR_NAME: &str = "media-fetch-host";
const LOG_FILE_NAME: &str = "host.log";

/// Where log lines go besides stderr. Stdout carries the protocol and is
/// never used for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    StderrOnly,
    File(PathBuf),
}

pub fn default_log_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(LOG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(format!(".{LOG_DIR_NAME}")))
        .join(LOG_FILE_NAME)
}

pub fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn init_logging(target: &LogTarget) {
    let (file, open_error) = match target {
        LogTarget::StderrOnly => (None, None),
        LogTarget::File(path) => match open_log_file(path) {
            Ok(file) => (Some(file), None),
            Err(err) => (None, Some((path.clone(), err))),
        },
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = file.map(|file| {
        tracing_logfmt::builder()
            .layer()
            .with_writer(Mutex::new(file))
            .boxed()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    if let Some((path, err)) = open_error {
        tracing::warn!(path = %path.display(), error = %err, "failed to open log file; logging to stderr only");
    }
}
