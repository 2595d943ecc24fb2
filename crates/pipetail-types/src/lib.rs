//! Shared types for pipetail
//!
//! This crate contains the pipeline platform's resource types (task runs,
//! pipeline runs) and the derived accessors the log readers rely on.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Label carrying the task's role inside a pipeline.
pub const PIPELINE_TASK_LABEL: &str = "tekton.dev/pipelineTask";

/// Step containers are named after the step with this prefix.
pub const STEP_CONTAINER_PREFIX: &str = "step-";

// ============================================================================
// Conditions
// ============================================================================

/// A status condition on a run resource.
///
/// The first condition in a status summarizes the run: `status == "False"`
/// means the run failed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn is_false(&self) -> bool {
        self.status == "False"
    }
}

// ============================================================================
// TaskRun
// ============================================================================

/// Spec of a single task execution.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "tekton.dev",
    version = "v1",
    kind = "TaskRun",
    namespaced,
    status = "TaskRunStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    /// Human-friendly name shown alongside the task name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Reference to a task template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,
    /// Inline task definition with an ordered step list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<TaskSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// A step declared in a task spec: a named container image.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    pub name: String,
    #[serde(default)]
    pub image: String,
}

/// Status of a task execution.
///
/// `retries_status` holds the full status of every earlier attempt, oldest
/// first; `pod_name` is the current attempt.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retries_status: Vec<TaskRunStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl TaskRun {
    pub fn is_done(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.completion_time.is_some())
    }

    pub fn has_started(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.start_time.is_some())
    }

    /// True when the summary condition reports failure.
    pub fn is_failure(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.first())
            .is_some_and(Condition::is_false)
    }

    /// Message of the summary condition, when one exists.
    pub fn condition_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.first())
            .and_then(|c| c.message.as_deref())
    }

    /// Name of the pod backing the current attempt, if known.
    pub fn pod_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.pod_name.as_deref())
            .filter(|n| !n.is_empty())
    }

    /// Pod names of earlier attempts, oldest first.
    pub fn retry_pod_names(&self) -> Vec<&str> {
        self.status
            .as_ref()
            .map(|s| {
                s.retries_status
                    .iter()
                    .filter_map(|r| r.pod_name.as_deref())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn retries_done(&self) -> usize {
        self.status
            .as_ref()
            .map(|s| s.retries_status.len())
            .unwrap_or(0)
    }

    /// The task's role inside its pipeline, from the platform label.
    pub fn pipeline_task_label(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(PIPELINE_TASK_LABEL))
            .map(String::as_str)
    }

    pub fn task_ref_name(&self) -> Option<&str> {
        self.spec.task_ref.as_ref().map(|r| r.name.as_str())
    }
}

// ============================================================================
// PipelineRun
// ============================================================================

/// Spec of a pipeline execution.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "tekton.dev",
    version = "v1",
    kind = "PipelineRun",
    namespaced,
    status = "PipelineRunStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRef {
    pub name: String,
}

/// Status of a pipeline execution.
///
/// `child_references` lists the child task executions in the pipeline's
/// declared DAG emission order.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_references: Vec<ChildReference>,
}

/// One child of a pipeline execution.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildReference {
    #[serde(default)]
    pub kind: String,
    /// Name of the child task execution.
    pub name: String,
    /// The task's role in the pipeline definition.
    pub pipeline_task_name: String,
}

impl PipelineRun {
    pub fn is_failure(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.first())
            .is_some_and(Condition::is_false)
    }

    /// Message of the summary condition, when one exists.
    pub fn condition_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.first())
            .and_then(|c| c.message.as_deref())
    }

    /// Child task executions in declared order.
    pub fn task_run_children(&self) -> Vec<ChildReference> {
        self.status
            .as_ref()
            .map(|s| {
                s.child_references
                    .iter()
                    .filter(|c| c.kind.is_empty() || c.kind == "TaskRun")
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_run_from_json(json: &str) -> TaskRun {
        serde_json::from_str(json).expect("valid task run json")
    }

    #[test]
    fn task_run_accessors_follow_status() {
        let tr = task_run_from_json(
            r#"{
                "apiVersion": "tekton.dev/v1",
                "kind": "TaskRun",
                "metadata": {
                    "name": "build",
                    "namespace": "ns",
                    "labels": {"tekton.dev/pipelineTask": "compile"}
                },
                "spec": {"taskRef": {"name": "builder"}},
                "status": {
                    "startTime": "2024-01-01T10:00:00Z",
                    "completionTime": "2024-01-01T10:05:00Z",
                    "podName": "build-pod",
                    "retriesStatus": [
                        {"podName": "build-pod-retry0"},
                        {"podName": "build-pod-retry1"}
                    ],
                    "conditions": [
                        {"type": "Succeeded", "status": "False", "message": "boom"}
                    ]
                }
            }"#,
        );

        assert!(tr.is_done());
        assert!(tr.has_started());
        assert!(tr.is_failure());
        assert_eq!(tr.condition_message(), Some("boom"));
        assert_eq!(tr.pod_name(), Some("build-pod"));
        assert_eq!(
            tr.retry_pod_names(),
            vec!["build-pod-retry0", "build-pod-retry1"]
        );
        assert_eq!(tr.retries_done(), 2);
        assert_eq!(tr.pipeline_task_label(), Some("compile"));
        assert_eq!(tr.task_ref_name(), Some("builder"));
    }

    #[test]
    fn task_run_without_status_is_inert() {
        let tr = task_run_from_json(
            r#"{
                "apiVersion": "tekton.dev/v1",
                "kind": "TaskRun",
                "metadata": {"name": "pending", "namespace": "ns"},
                "spec": {}
            }"#,
        );

        assert!(!tr.is_done());
        assert!(!tr.has_started());
        assert!(!tr.is_failure());
        assert_eq!(tr.pod_name(), None);
        assert!(tr.retry_pod_names().is_empty());
    }

    #[test]
    fn empty_pod_name_is_treated_as_unset() {
        let tr = task_run_from_json(
            r#"{
                "apiVersion": "tekton.dev/v1",
                "kind": "TaskRun",
                "metadata": {"name": "t", "namespace": "ns"},
                "spec": {},
                "status": {"podName": ""}
            }"#,
        );

        assert_eq!(tr.pod_name(), None);
    }

    #[test]
    fn pipeline_children_keep_declared_order() {
        let pr: PipelineRun = serde_json::from_str(
            r#"{
                "apiVersion": "tekton.dev/v1",
                "kind": "PipelineRun",
                "metadata": {"name": "deploy", "namespace": "ns"},
                "spec": {"pipelineRef": {"name": "release"}},
                "status": {
                    "childReferences": [
                        {"kind": "TaskRun", "name": "deploy-build", "pipelineTaskName": "build"},
                        {"kind": "Run", "name": "deploy-custom", "pipelineTaskName": "custom"},
                        {"kind": "TaskRun", "name": "deploy-test", "pipelineTaskName": "test"}
                    ]
                }
            }"#,
        )
        .expect("valid pipeline run json");

        let children = pr.task_run_children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "deploy-build");
        assert_eq!(children[0].pipeline_task_name, "build");
        assert_eq!(children[1].name, "deploy-test");
    }
}
