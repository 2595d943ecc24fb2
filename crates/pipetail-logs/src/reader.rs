//! Reader configuration and the shared entry point.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pipetail_k8s::Cluster;

use crate::{Error, Log};

/// Default bound on how long pod-name discovery waits for the platform.
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub(crate) const CHANNEL_CAPACITY: usize = 32;

/// Reader configuration, as resolved by the CLI.
#[derive(Clone, Debug)]
pub struct Options {
    /// Namespace of the run.
    pub ns: String,
    /// Name of the task or pipeline execution.
    pub run: String,
    /// Tail live output instead of returning once available logs are read.
    pub follow: bool,
    /// Ask the platform to prepend an RFC3339 timestamp to every line.
    pub timestamps: bool,
    /// Include init steps in the output.
    pub all_steps: bool,
    /// Step-name allow-list; empty means every step.
    pub steps: Vec<String>,
    /// Retry count the task is configured with, for live pod discovery.
    pub retries: usize,
    /// Bound on pod-name discovery in live mode.
    pub activity_timeout: Duration,
    /// Caller-supplied task label overriding the derived name.
    pub task: Option<String>,
    /// Ordinal used for the `"Task <N>"` fallback name.
    pub number: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ns: "default".to_string(),
            run: String::new(),
            follow: false,
            timestamps: false,
            all_steps: false,
            steps: Vec::new(),
            retries: 0,
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            task: None,
            number: 0,
        }
    }
}

pub(crate) enum RunKind {
    Task,
    Pipeline,
}

/// Streams the logs of one task or pipeline execution.
pub struct Reader {
    pub(crate) kind: RunKind,
    pub(crate) cluster: Arc<dyn Cluster>,
    pub(crate) opts: Options,
    /// Derived task name used to tag emitted records.
    pub(crate) task: String,
    pub(crate) display_name: String,
    /// When attached (pipeline children), construction-time task failures
    /// are reported here instead of aborting the read.
    pub(crate) err_sink: Option<mpsc::Sender<Error>>,
    pub(crate) cancel: CancellationToken,
}

impl Reader {
    /// Reader over a single task execution.
    pub fn task_reader(cluster: Arc<dyn Cluster>, opts: Options) -> Self {
        Self::new(RunKind::Task, cluster, opts)
    }

    /// Reader over a pipeline execution and all of its child tasks.
    pub fn pipeline_reader(cluster: Arc<dyn Cluster>, opts: Options) -> Self {
        Self::new(RunKind::Pipeline, cluster, opts)
    }

    fn new(kind: RunKind, cluster: Arc<dyn Cluster>, opts: Options) -> Self {
        let task = opts.task.clone().unwrap_or_default();
        Self {
            kind,
            cluster,
            opts,
            display_name: task.clone(),
            task,
            err_sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that tears down every stream this reader spawns. Cancelling it
    /// drains the workers and closes both channels.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve the run and start streaming.
    ///
    /// Returns the (logs, errors) channel pair; both close once every
    /// producer has finished. Failures that prevent streaming from starting
    /// at all are the returned error.
    pub async fn read(
        &mut self,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>), Error> {
        match self.kind {
            RunKind::Task => self.read_task_log().await,
            RunKind::Pipeline => self.read_pipeline_log().await,
        }
    }

    /// Route a construction-time failure: to the sink when one is attached,
    /// otherwise as the start error.
    pub(crate) async fn start_error(
        &self,
        err: Error,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>), Error> {
        let Some(sink) = &self.err_sink else {
            return Err(err);
        };
        let _ = sink.send(err).await;

        // hand back channels that are already closed
        let (_, logs) = mpsc::channel(1);
        let (_, errs) = mpsc::channel(1);
        Ok((logs, errs))
    }
}

/// Send unless the reader is being torn down. Returns false when the send
/// did not happen and the caller should stop producing.
pub(crate) async fn send_or_cancelled<T>(
    cancel: &CancellationToken,
    tx: &mpsc::Sender<T>,
    value: T,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}

/// Receive from a channel that may already be closed out; a closed-out slot
/// never resolves, letting `select!` wait on the other one.
pub(crate) async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
