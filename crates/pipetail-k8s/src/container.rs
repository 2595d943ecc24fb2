//! Per-container log access.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pod::PodRef;
use crate::{ClusterError, PodError};

const LINE_CHANNEL_CAPACITY: usize = 32;

/// One container inside a pod.
pub struct Container {
    name: String,
    pod: PodRef,
}

impl Container {
    pub(crate) fn new(pod: PodRef, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pod,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_reader(&self, follow: bool, timestamps: bool) -> ContainerLogReader {
        ContainerLogReader {
            pod: self.pod.clone(),
            container: self.name.clone(),
            follow,
            timestamps,
        }
    }

    /// Check how the container ended, once its log stream has closed.
    ///
    /// A non-zero terminated state means the step failed and the pod's
    /// remaining steps will never produce useful output.
    pub async fn status(&self) -> Result<(), PodError> {
        let pod = self.pod.get().await?;
        let Some(status) = pod.status else {
            return Ok(());
        };

        let statuses = status
            .container_statuses
            .into_iter()
            .flatten()
            .chain(status.init_container_statuses.into_iter().flatten());
        for cs in statuses {
            if cs.name != self.name {
                continue;
            }
            if let Some(term) = cs.state.and_then(|s| s.terminated)
                && term.exit_code != 0
            {
                let reason = term.message.or(term.reason).unwrap_or_default();
                return Err(PodError::ContainerFailed {
                    container: self.name.clone(),
                    reason,
                });
            }
        }

        Ok(())
    }
}

/// Streams one container's log endpoint as parsed lines.
pub struct ContainerLogReader {
    pod: PodRef,
    container: String,
    follow: bool,
    timestamps: bool,
}

impl ContainerLogReader {
    /// Open the stream and hand back a (lines, errors) channel pair.
    ///
    /// Both channels close once the platform ends the stream. A mid-stream
    /// transport failure produces a single error record and then closes.
    /// Failure to open the stream at all is the returned error.
    pub async fn read(
        &self,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<String>, mpsc::Receiver<ClusterError>), ClusterError> {
        let stream = self
            .pod
            .cluster
            .container_logs(
                &self.pod.ns,
                &self.pod.name,
                &self.container,
                self.follow,
                self.timestamps,
            )
            .await?;

        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let mut stream = stream;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(line)) => {
                            if line_tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            let _ = err_tx.send(err).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Ok((line_rx, err_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
    };
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn pod_with_container_state(state: Option<ContainerState>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "step-build".to_string(),
                    state,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_step_failure() {
        let pod = pod_with_container_state(Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 1,
                reason: Some("Error".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }));
        let cluster = Arc::new(FakeCluster::new().with_pod(pod));

        let pod_ref = PodRef::new(cluster, "ns", "p");
        let err = pod_ref.container("step-build").status().await.unwrap_err();
        assert_eq!(err.to_string(), "container step-build has failed: [Error]");
    }

    #[tokio::test]
    async fn clean_exit_passes_the_status_check() {
        let pod = pod_with_container_state(Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 0,
                ..Default::default()
            }),
            ..Default::default()
        }));
        let cluster = Arc::new(FakeCluster::new().with_pod(pod));

        let pod_ref = PodRef::new(cluster, "ns", "p");
        assert!(pod_ref.container("step-build").status().await.is_ok());
    }

    #[tokio::test]
    async fn reader_forwards_lines_then_closes() {
        let pod = pod_with_container_state(None);
        let cluster = Arc::new(
            FakeCluster::new()
                .with_pod(pod)
                .with_container_logs("ns", "p", "step-build", &["one", "two"]),
        );

        let pod_ref = PodRef::new(cluster, "ns", "p");
        let reader = pod_ref.container("step-build").log_reader(false, false);
        let (mut lines, mut errs) = reader.read(CancellationToken::new()).await.unwrap();

        assert_eq!(lines.recv().await.as_deref(), Some("one"));
        assert_eq!(lines.recv().await.as_deref(), Some("two"));
        assert!(lines.recv().await.is_none());
        assert!(errs.recv().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_is_reported_once_then_closed() {
        let pod = pod_with_container_state(None);
        let cluster = Arc::new(
            FakeCluster::new()
                .with_pod(pod)
                .with_container_logs("ns", "p", "step-build", &["only"])
                .with_container_stream_error("ns", "p", "step-build", "connection reset"),
        );

        let pod_ref = PodRef::new(cluster, "ns", "p");
        let reader = pod_ref.container("step-build").log_reader(false, false);
        let (mut lines, mut errs) = reader.read(CancellationToken::new()).await.unwrap();

        assert_eq!(lines.recv().await.as_deref(), Some("only"));
        let err = errs.recv().await.expect("one transport error");
        assert!(err.to_string().contains("connection reset"));
        assert!(lines.recv().await.is_none());
        assert!(errs.recv().await.is_none());
    }
}
