//! Native-messaging host: length-prefixed JSON over stdio, dispatched to
//! short commands and supervised long-running downloads.

pub mod cli;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod framing;
pub mod host;
pub mod logging;
pub mod parser;
pub mod protocol;
pub mod spawner;
pub mod supervisor;
pub mod testing;

pub use config::HostConfig;
pub use dispatcher::Dispatcher;
pub use framing::{FrameReader, FrameWriter, FramingError};
pub use host::run_host;
pub use media_fetch_host_error::{ErrorType, HostError};
pub use parser::{FormatCandidate, OutputParser};
pub use protocol::{Command, CommandKind, HostEvent, Response};
pub use spawner::{LaunchSpec, ProcessSpawner, TokioSpawner};
pub use supervisor::Supervisor;
