pub mod config;
pub mod core;
pub mod errors;
pub mod pipeline;
pub mod reader;
pub mod shutdown;
pub mod writer;


pub use crate::config::PipelineConfig;
pub use crate::core::{Buffer, SyncQueue, DEFAULT_POP_TIMEOUT};
pub use crate::errors::{ConfigError, InitError, PipelineError, PopError, PushError, SourceError};
