//! In-memory cluster fake for exercising readers without an API server.
//!
//! [`FakeCluster`] is a builder-style [`Cluster`] implementation: seed it
//! with resources, scripted watch events, and container log content, then
//! hand it to a reader behind an `Arc`. Watches replay the stored state
//! first (informer semantics), then any scripted events, then stay open
//! unless [`FakeCluster::with_closing_watches`] was used.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use k8s_openapi::api::core::v1::Pod;
use parking_lot::Mutex;

use pipetail_types::{PipelineRun, TaskRun};

use crate::{Cluster, ClusterError, LogLines, PodEvents, RunEvents};

type Key = (String, String);
type LogKey = (String, String, String);

#[derive(Default)]
pub struct FakeCluster {
    task_runs: Mutex<HashMap<Key, TaskRun>>,
    pipeline_runs: Mutex<HashMap<Key, PipelineRun>>,
    pods: Mutex<HashMap<Key, Pod>>,
    task_run_events: Mutex<HashMap<Key, Vec<TaskRun>>>,
    pod_events: Mutex<HashMap<Key, Vec<Pod>>>,
    logs: Mutex<HashMap<LogKey, Vec<Result<String, String>>>>,
    log_open_errors: Mutex<HashMap<LogKey, String>>,
    close_watches: bool,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_run(self, run: TaskRun) -> Self {
        let key = meta_key(&run.metadata);
        self.task_runs.lock().insert(key, run);
        self
    }

    pub fn with_pipeline_run(self, run: PipelineRun) -> Self {
        let key = meta_key(&run.metadata);
        self.pipeline_runs.lock().insert(key, run);
        self
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        let key = meta_key(&pod.metadata);
        self.pods.lock().insert(key, pod);
        self
    }

    /// Script extra task run snapshots delivered after the stored state.
    pub fn with_task_run_events(self, ns: &str, name: &str, events: Vec<TaskRun>) -> Self {
        self.task_run_events
            .lock()
            .insert(key(ns, name), events);
        self
    }

    /// Script extra pod snapshots delivered after the stored state.
    pub fn with_pod_events(self, ns: &str, name: &str, events: Vec<Pod>) -> Self {
        self.pod_events.lock().insert(key(ns, name), events);
        self
    }

    pub fn with_container_logs(self, ns: &str, pod: &str, container: &str, lines: &[&str]) -> Self {
        let entries = lines.iter().map(|l| Ok(l.to_string())).collect();
        self.logs
            .lock()
            .insert(log_key(ns, pod, container), entries);
        self
    }

    /// Append a mid-stream transport failure after any scripted lines.
    pub fn with_container_stream_error(
        self,
        ns: &str,
        pod: &str,
        container: &str,
        message: &str,
    ) -> Self {
        self.logs
            .lock()
            .entry(log_key(ns, pod, container))
            .or_default()
            .push(Err(message.to_string()));
        self
    }

    /// Make opening the container's log endpoint fail outright.
    pub fn with_container_log_open_error(
        self,
        ns: &str,
        pod: &str,
        container: &str,
        message: &str,
    ) -> Self {
        self.log_open_errors
            .lock()
            .insert(log_key(ns, pod, container), message.to_string());
        self
    }

    /// End watch streams after replay instead of leaving them open.
    pub fn with_closing_watches(mut self) -> Self {
        self.close_watches = true;
        self
    }
}

fn key(ns: &str, name: &str) -> Key {
    (ns.to_string(), name.to_string())
}

fn log_key(ns: &str, pod: &str, container: &str) -> LogKey {
    (ns.to_string(), pod.to_string(), container.to_string())
}

fn meta_key(meta: &kube::api::ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn task_run(&self, ns: &str, name: &str) -> Result<TaskRun, ClusterError> {
        self.task_runs
            .lock()
            .get(&key(ns, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "taskrun",
                name: name.to_string(),
            })
    }

    async fn watch_task_run(&self, ns: &str, name: &str) -> Result<RunEvents, ClusterError> {
        let k = key(ns, name);
        let mut events = Vec::new();
        if let Some(run) = self.task_runs.lock().get(&k) {
            events.push(run.clone());
        }
        events.extend(
            self.task_run_events
                .lock()
                .get(&k)
                .cloned()
                .unwrap_or_default(),
        );

        let replay = stream::iter(events);
        if self.close_watches {
            Ok(replay.boxed())
        } else {
            Ok(replay.chain(stream::pending()).boxed())
        }
    }

    async fn pipeline_run(&self, ns: &str, name: &str) -> Result<PipelineRun, ClusterError> {
        self.pipeline_runs
            .lock()
            .get(&key(ns, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "pipelinerun",
                name: name.to_string(),
            })
    }

    async fn pod(&self, ns: &str, name: &str) -> Result<Pod, ClusterError> {
        self.pods
            .lock()
            .get(&key(ns, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            })
    }

    async fn watch_pod(&self, ns: &str, name: &str) -> Result<PodEvents, ClusterError> {
        let k = key(ns, name);
        let mut events = Vec::new();
        if let Some(pod) = self.pods.lock().get(&k) {
            events.push(pod.clone());
        }
        events.extend(self.pod_events.lock().get(&k).cloned().unwrap_or_default());

        let replay = stream::iter(events);
        if self.close_watches {
            Ok(replay.boxed())
        } else {
            Ok(replay.chain(stream::pending()).boxed())
        }
    }

    async fn container_logs(
        &self,
        ns: &str,
        pod: &str,
        container: &str,
        _follow: bool,
        _timestamps: bool,
    ) -> Result<LogLines, ClusterError> {
        let k = log_key(ns, pod, container);
        if let Some(msg) = self.log_open_errors.lock().get(&k) {
            return Err(ClusterError::Stream(msg.clone()));
        }

        let entries = self.logs.lock().get(&k).cloned().unwrap_or_default();
        Ok(stream::iter(
            entries
                .into_iter()
                .map(|res| res.map_err(ClusterError::Stream)),
        )
        .boxed())
    }
}
