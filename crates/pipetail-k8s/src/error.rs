//! Cluster and pod error kinds.

use thiserror::Error;

/// Errors from talking to the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The named resource does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Any other API error.
    #[error(transparent)]
    Api(#[from] kube::Error),

    /// Client construction or kubeconfig resolution failed.
    #[error("kubeconfig error: {0}")]
    Config(String),

    /// The log transport failed mid-stream.
    #[error("log stream error: {0}")]
    Stream(String),
}

/// Errors from waiting on a pod or inspecting its containers.
#[derive(Debug, Error)]
pub enum PodError {
    /// The pod is being deleted before logs could be read.
    #[error("failed to run the pod {0}")]
    FailedToRun(String),

    /// The pod cannot become ready, e.g. an image pull failure. The message
    /// is taken verbatim from the pod condition.
    #[error("{0}")]
    NotReady(String),

    /// The watch closed before the pod reached a readable state.
    #[error("watch on pod {0} ended unexpectedly")]
    WatchEnded(String),

    /// A step container terminated with a non-zero exit code.
    #[error("container {container} has failed: [{reason}]")]
    ContainerFailed { container: String, reason: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
