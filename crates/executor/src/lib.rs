//! Command execution engine for the scanning platform.
//!
//! Wraps external reconnaissance CLIs behind two consumption modes: buffered
//! (wait for completion, get the combined output) and streaming (pull
//! normalized lines or decoded JSON values as they arrive). Progress and the
//! final status are persisted through the [`record::CommandStore`]
//! collaborator owned by the surrounding platform.

pub mod config;
pub mod error;
pub mod executor;
pub mod json_stream;
pub mod normalize;
pub mod process;
pub mod reader;
pub mod record;
pub mod request;

pub use config::ExecutorConfig;
pub use error::ExecutorError;
pub use executor::{BufferedOutput, CommandExecutor, StreamItem, run_command, stream_command};
pub use record::{CommandRecord, CommandStore, InMemoryCommandStore, RecordId};
pub use request::{ExecutionContext, ExecutionRequest};
