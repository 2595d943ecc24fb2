//! The cluster seam and its kube-backed implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use kube::config::KubeConfigOptions;
use kube::runtime::{WatchStreamExt, watcher};
use tracing::warn;

use pipetail_types::{PipelineRun, TaskRun};

use crate::ClusterError;

/// Snapshots of a task execution as its status changes.
pub type RunEvents = BoxStream<'static, TaskRun>;

/// Snapshots of a pod as it moves through its lifecycle. Deletions are
/// delivered as a final snapshot of the removed pod.
pub type PodEvents = BoxStream<'static, Pod>;

/// Lines of a container log, already split on newlines.
pub type LogLines = BoxStream<'static, Result<String, ClusterError>>;

/// Everything the log readers consume from the pipeline platform.
///
/// The production implementation is [`KubeCluster`]; tests use
/// [`crate::testing::FakeCluster`].
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn task_run(&self, ns: &str, name: &str) -> Result<TaskRun, ClusterError>;

    /// Watch a single task execution by name. The stream replays the current
    /// state, then yields a snapshot per status change.
    async fn watch_task_run(&self, ns: &str, name: &str) -> Result<RunEvents, ClusterError>;

    async fn pipeline_run(&self, ns: &str, name: &str) -> Result<PipelineRun, ClusterError>;

    async fn pod(&self, ns: &str, name: &str) -> Result<Pod, ClusterError>;

    /// Watch a single pod by name, informer-style: current state first,
    /// then every add/update/delete.
    async fn watch_pod(&self, ns: &str, name: &str) -> Result<PodEvents, ClusterError>;

    /// Open the log endpoint of one container.
    async fn container_logs(
        &self,
        ns: &str,
        pod: &str,
        container: &str,
        follow: bool,
        timestamps: bool,
    ) -> Result<LogLines, ClusterError>;
}

/// Create a client for the given kubeconfig context, or infer the
/// environment's default configuration when no context is named.
pub async fn client_for_context(context: Option<&str>) -> Result<kube::Client, ClusterError> {
    let config = match context {
        Some(ctx) => kube::Config::from_kubeconfig(&KubeConfigOptions {
            context: Some(ctx.to_string()),
            ..Default::default()
        })
        .await
        .map_err(|e| ClusterError::Config(format!("failed to load context {ctx}: {e}")))?,
        None => kube::Config::infer()
            .await
            .map_err(|e| ClusterError::Config(e.to_string()))?,
    };

    kube::Client::try_from(config).map_err(|e| ClusterError::Config(e.to_string()))
}

/// [`Cluster`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn name_selector(name: &str) -> watcher::Config {
        watcher::Config::default().fields(&format!("metadata.name={name}"))
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn task_run(&self, ns: &str, name: &str) -> Result<TaskRun, ClusterError> {
        let api: Api<TaskRun> = Api::namespaced(self.client.clone(), ns);
        api.get(name)
            .await
            .map_err(|e| not_found_or_api("taskrun", name, e))
    }

    async fn watch_task_run(&self, ns: &str, name: &str) -> Result<RunEvents, ClusterError> {
        let api: Api<TaskRun> = Api::namespaced(self.client.clone(), ns);
        let events = watcher(api, Self::name_selector(name))
            .default_backoff()
            .applied_objects()
            .filter_map(|res| async move {
                match res {
                    Ok(run) => Some(run),
                    Err(err) => {
                        warn!(error = %err, "task run watch error");
                        None
                    }
                }
            })
            .boxed();
        Ok(events)
    }

    async fn pipeline_run(&self, ns: &str, name: &str) -> Result<PipelineRun, ClusterError> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), ns);
        api.get(name)
            .await
            .map_err(|e| not_found_or_api("pipelinerun", name, e))
    }

    async fn pod(&self, ns: &str, name: &str) -> Result<Pod, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        api.get(name)
            .await
            .map_err(|e| not_found_or_api("pod", name, e))
    }

    async fn watch_pod(&self, ns: &str, name: &str) -> Result<PodEvents, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        // The raw event stream is used here because a deleted pod must still
        // reach the waiter as a snapshot.
        let events = watcher(api, Self::name_selector(name))
            .default_backoff()
            .filter_map(|res| async move {
                match res {
                    Ok(watcher::Event::Apply(pod))
                    | Ok(watcher::Event::InitApply(pod))
                    | Ok(watcher::Event::Delete(pod)) => Some(pod),
                    Ok(_) => None,
                    Err(err) => {
                        warn!(error = %err, "pod watch error");
                        None
                    }
                }
            })
            .boxed();
        Ok(events)
    }

    async fn container_logs(
        &self,
        ns: &str,
        pod: &str,
        container: &str,
        follow: bool,
        timestamps: bool,
    ) -> Result<LogLines, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let params = LogParams {
            container: Some(container.to_string()),
            follow,
            timestamps,
            ..Default::default()
        };

        let stream = api
            .log_stream(pod, &params)
            .await
            .map_err(|e| not_found_or_api("pod", pod, e))?;

        Ok(stream
            .lines()
            .map(|res| res.map_err(|e| ClusterError::Stream(e.to_string())))
            .boxed())
    }
}

fn not_found_or_api(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        _ => ClusterError::Api(err),
    }
}
