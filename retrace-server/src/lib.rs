pub mod cli;
pub mod core;
pub mod logs;
pub mod summarization;

pub use crate::cli::{Cli, Config};
pub use crate::core::{start_continuous_recording, RecorderHandle, FLUSH_INTERVAL};
pub use crate::summarization::{spawn_summarization_loop, HttpSummarizer, Summarizer};
