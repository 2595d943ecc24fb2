//! Log aggregation core for pipetail
//!
//! This crate turns task and pipeline executions into tagged log streams.
//! A [`Reader`] resolves the run, discovers the pods backing each task
//! (including retry attempts), and multiplexes per-step container logs into
//! a pair of channels: one for [`Log`] records, one for recoverable errors.

mod error;
mod pipeline;
mod reader;
mod steps;
mod task;

#[cfg(test)]
mod testutil;

pub use error::Error;
pub use reader::{DEFAULT_ACTIVITY_TIMEOUT, Options, Reader};

/// Sentinel line marking the end of one step's stream. Emitted exactly once
/// per step attempt, after every line of that attempt.
pub const EOFLOG: &str = "EOFLOG";

/// One emitted log record, tagged with enough context to demultiplex the
/// merged stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    /// Task the line belongs to, as derived by the reader.
    pub task: String,
    /// Human-friendly task name, when the run declares one.
    pub task_display_name: String,
    /// Step the line belongs to.
    pub step: String,
    /// The log line, or [`EOFLOG`].
    pub line: String,
}

impl Log {
    /// True for the end-of-step sentinel; callers render it as a separator.
    pub fn is_eof(&self) -> bool {
        self.line == EOFLOG
    }
}
