//! Builders shared by the reader tests.

use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodCondition,
    PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use tokio::sync::mpsc;

use pipetail_types::{TaskRun, TaskRunSpec, TaskRunStatus};

use crate::Log;

fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(ns.to_string()),
        ..Default::default()
    }
}

fn now() -> Time {
    Time(chrono::Utc::now())
}

/// A finished task run with the given current pod and retry history.
pub fn done_task_run(ns: &str, name: &str, pod_name: &str, retries: &[&str]) -> TaskRun {
    TaskRun {
        metadata: meta(ns, name),
        spec: TaskRunSpec::default(),
        status: Some(TaskRunStatus {
            start_time: Some(now()),
            completion_time: Some(now()),
            pod_name: Some(pod_name.to_string()),
            retries_status: retries
                .iter()
                .map(|p| TaskRunStatus {
                    pod_name: Some(p.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
    }
}

/// A started task run that has not completed.
pub fn running_task_run(ns: &str, name: &str, pod_name: Option<&str>) -> TaskRun {
    TaskRun {
        metadata: meta(ns, name),
        spec: TaskRunSpec::default(),
        status: Some(TaskRunStatus {
            start_time: Some(now()),
            pod_name: pod_name.map(str::to_string),
            ..Default::default()
        }),
    }
}

/// A succeeded pod with one terminated step container per name.
pub fn succeeded_pod(ns: &str, name: &str, steps: &[&str]) -> Pod {
    let containers: Vec<Container> = steps
        .iter()
        .map(|s| Container {
            name: format!("step-{s}"),
            ..Default::default()
        })
        .collect();
    let statuses: Vec<ContainerStatus> = steps
        .iter()
        .map(|s| ContainerStatus {
            name: format!("step-{s}"),
            state: Some(terminated(0, None)),
            ..Default::default()
        })
        .collect();

    Pod {
        metadata: meta(ns, name),
        spec: Some(PodSpec {
            containers,
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Succeeded".to_string()),
            container_statuses: Some(statuses),
            ..Default::default()
        }),
    }
}

/// A pending pod carrying one status condition.
pub fn pending_pod_with_condition(
    ns: &str,
    name: &str,
    cond_type: &str,
    status: &str,
    message: &str,
) -> Pod {
    Pod {
        metadata: meta(ns, name),
        spec: Some(PodSpec::default()),
        status: Some(PodStatus {
            phase: Some("Pending".to_string()),
            conditions: Some(vec![PodCondition {
                type_: cond_type.to_string(),
                status: status.to_string(),
                message: Some(message.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Add a terminated init step container to the pod.
pub fn add_init_step(pod: &mut Pod, step: &str) {
    let container_name = format!("step-{step}");
    pod.spec
        .get_or_insert_with(Default::default)
        .init_containers
        .get_or_insert_with(Vec::new)
        .push(Container {
            name: container_name.clone(),
            ..Default::default()
        });
    pod.status
        .get_or_insert_with(Default::default)
        .init_container_statuses
        .get_or_insert_with(Vec::new)
        .push(ContainerStatus {
            name: container_name,
            state: Some(terminated(0, None)),
            ..Default::default()
        });
}

/// Mark one container as terminated with a non-zero exit.
pub fn fail_container(pod: &mut Pod, container: &str, reason: &str) {
    if let Some(statuses) = pod
        .status
        .as_mut()
        .and_then(|s| s.container_statuses.as_mut())
    {
        for cs in statuses {
            if cs.name == container {
                cs.state = Some(terminated(1, Some(reason)));
            }
        }
    }
}

fn terminated(exit_code: i32, reason: Option<&str>) -> ContainerState {
    ContainerState {
        terminated: Some(ContainerStateTerminated {
            exit_code,
            reason: reason.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Drain the log channel to completion.
pub async fn collect_logs(mut rx: mpsc::Receiver<Log>) -> Vec<Log> {
    let mut logs = Vec::new();
    while let Some(log) = rx.recv().await {
        logs.push(log);
    }
    logs
}

/// Drain the log channel down to (step, line) pairs.
pub async fn collect_step_lines(rx: mpsc::Receiver<Log>) -> Vec<(String, String)> {
    collect_logs(rx)
        .await
        .into_iter()
        .map(|l| (l.step, l.line))
        .collect()
}
