//! Pod lifecycle: fetch, wait-until-readable, container access.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::container::Container;
use crate::{Cluster, ClusterError, PodError};

/// Handle on a single named pod.
#[derive(Clone)]
pub struct PodRef {
    pub(crate) name: String,
    pub(crate) ns: String,
    pub(crate) cluster: Arc<dyn Cluster>,
}

impl PodRef {
    pub fn new(cluster: Arc<dyn Cluster>, ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns: ns.into(),
            cluster,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self) -> Result<Pod, ClusterError> {
        self.cluster.pod(&self.ns, &self.name).await
    }

    /// Block until the pod first reaches a state logs can be read from.
    ///
    /// Resolves on the first decisive event: a readable phase (Running,
    /// Succeeded, Failed) yields the pod, a pending deletion or an
    /// image-pull style condition yields an error. Dropping the returned
    /// future tears the watch down.
    pub async fn wait(&self) -> Result<Pod, PodError> {
        // make sure the pod exists before watching for it
        self.get().await?;

        let mut events = self.cluster.watch_pod(&self.ns, &self.name).await?;
        while let Some(pod) = events.next().await {
            debug!(
                pod = %self.name,
                phase = ?pod.status.as_ref().and_then(|s| s.phase.as_deref()),
                "pod event"
            );
            if let Some(outcome) = check_pod_status(pod) {
                return outcome;
            }
        }

        Err(PodError::WatchEnded(self.name.clone()))
    }

    pub fn container(&self, name: impl Into<String>) -> Container {
        Container::new(self.clone(), name)
    }
}

/// Decide whether a pod snapshot ends the wait.
///
/// `None` means the pod is not yet in a readable state and the watch
/// continues.
fn check_pod_status(pod: Pod) -> Option<Result<Pod, PodError>> {
    if pod.metadata.deletion_timestamp.is_some() {
        let name = pod.metadata.name.clone().unwrap_or_default();
        return Some(Err(PodError::FailedToRun(name)));
    }

    let readable = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|p| matches!(p, "Succeeded" | "Running" | "Failed"));
    if readable {
        return Some(Ok(pod));
    }

    // Surface image pull trouble instead of waiting on a pod that will
    // never start.
    if let Some(conditions) = pod.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        for c in conditions {
            if (c.type_ == "Initialized" || c.type_ == "ContainersReady") && c.status == "Unknown" {
                return Some(Err(PodError::NotReady(
                    c.message.clone().unwrap_or_default(),
                )));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    fn pod_with_phase(phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn readable_phases_end_the_wait() {
        for phase in ["Running", "Succeeded", "Failed"] {
            let outcome = check_pod_status(pod_with_phase(phase));
            assert!(matches!(outcome, Some(Ok(_))), "phase {phase}");
        }
    }

    #[test]
    fn pending_pod_keeps_waiting() {
        assert!(check_pod_status(pod_with_phase("Pending")).is_none());
        assert!(check_pod_status(pod_with_phase("Unknown")).is_none());
    }

    #[test]
    fn deletion_is_a_failure() {
        let mut pod = pod_with_phase("Running");
        pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let outcome = check_pod_status(pod);
        match outcome {
            Some(Err(PodError::FailedToRun(name))) => assert_eq!(name, "p"),
            other => panic!("expected FailedToRun, got {other:?}"),
        }
    }

    #[test]
    fn unknown_init_condition_reports_its_message() {
        let mut pod = pod_with_phase("Pending");
        pod.status.as_mut().unwrap().conditions = Some(vec![PodCondition {
            type_: "Initialized".to_string(),
            status: "Unknown".to_string(),
            message: Some("ImagePullBackOff".to_string()),
            ..Default::default()
        }]);

        let outcome = check_pod_status(pod);
        match outcome {
            Some(Err(PodError::NotReady(msg))) => assert_eq!(msg, "ImagePullBackOff"),
            other => panic!("expected NotReady, got {other:?}"),
        }
    }

    #[test]
    fn true_conditions_are_not_decisive() {
        let mut pod = pod_with_phase("Pending");
        pod.status.as_mut().unwrap().conditions = Some(vec![PodCondition {
            type_: "ContainersReady".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]);

        assert!(check_pod_status(pod).is_none());
    }
}
