//! Reader error kinds.

use pipetail_k8s::{ClusterError, PodError};
use thiserror::Error;

/// Errors surfaced while reading run logs.
///
/// Construction-time failures come back as the synchronous result of
/// [`crate::Reader::read`]; everything else rides the error channel next to
/// the log stream so one broken step or pod never stalls the rest.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unable to get TaskRun {run}: {source}")]
    TaskRunNotFound {
        run: String,
        #[source]
        source: ClusterError,
    },

    #[error("Unable to get PipelineRun {run}: {source}")]
    PipelineRunNotFound {
        run: String,
        #[source]
        source: ClusterError,
    },

    #[error("task {0} has not started yet")]
    TaskNotStarted(String),

    #[error("pod for taskrun {0} not available yet")]
    PodNotAvailable(String),

    /// The run's summary condition reports failure.
    #[error("task {task} has failed: {message}")]
    TaskFailed { task: String, message: String },

    /// The pipeline failed before any task was scheduled.
    #[error("pipelinerun {run} has failed: {message}")]
    PipelineRunFailed { run: String, message: String },

    /// A pod could not be read; later attempt pods are still tried.
    #[error("task {task} failed: {reason}")]
    PodUnreachable { task: String, reason: String },

    /// Opening one step's log endpoint failed; the remaining steps are
    /// still read.
    #[error("error in getting logs for step {step}: {source}")]
    StepLogsUnavailable {
        step: String,
        #[source]
        source: ClusterError,
    },

    /// Mid-stream transport failure on one step.
    #[error("failed to get logs for {step}: {source}")]
    StepStream {
        step: String,
        #[source]
        source: ClusterError,
    },

    /// Pod-name discovery hit the activity timeout.
    #[error("task {0} has not started yet or pod for task not yet available")]
    DiscoveryTimeout(String),

    #[error(transparent)]
    Pod(#[from] PodError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
