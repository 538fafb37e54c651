use std::path::PathBuf;
use std::time::Duration;

use crate::framing::DEFAULT_MAX_INBOUND_FRAME;
use crate::spawner::LaunchSpec;

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub exec_timeout: Duration,
    pub check_timeout: Duration,
    pub max_frame_bytes: usize,
    /// Program that opens a finished file; the platform default when unset.
    pub opener: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_INBOUND_FRAME,
            opener: None,
        }
    }
}

impl HostConfig {
    pub fn open_file_launch(&self, filepath: &str) -> LaunchSpec {
        match &self.opener {
            Some(opener) => LaunchSpec::new(opener.clone(), vec![filepath.to_string()]),
            None => platform_opener(filepath),
        }
    }
}

#[cfg(windows)]
fn platform_opener(filepath: &str) -> LaunchSpec {
    // `start` treats the first quoted argument as a window title.
    LaunchSpec::new(
        "cmd.exe",
        vec![
            "/c".to_string(),
            "start".to_string(),
            String::new(),
            filepath.to_string(),
        ],
    )
}

#[cfg(target_os = "macos")]
fn platform_opener(filepath: &str) -> LaunchSpec {
    LaunchSpec::new("open", vec![filepath.to_string()])
}

#[cfg(not(any(windows, target_os = "macos")))]
fn platform_opener(filepath: &str) -> LaunchSpec {
    LaunchSpec::new("xdg-open", vec![filepath.to_string()])
}
