//! Step enumeration and filtering for one pod.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{ContainerState, ContainerStatus, Pod};

use pipetail_types::STEP_CONTAINER_PREFIX;

/// One step container, with its user-visible name and last observed state.
pub(crate) struct Step {
    pub name: String,
    pub container: String,
    pub state: Option<ContainerState>,
}

impl Step {
    /// A container still in Waiting has produced no logs yet. Containers
    /// without a reported state count as started.
    pub fn has_started(&self) -> bool {
        self.state.as_ref().is_none_or(|s| s.waiting.is_none())
    }
}

/// Steps of the pod in declaration order: init steps first when requested,
/// then regular steps intersected with the allow-list.
pub(crate) fn filter_steps(pod: &Pod, all_steps: bool, allow: &[String]) -> Vec<Step> {
    let mut steps = Vec::new();
    if all_steps {
        steps.extend(init_steps_of(pod));
    }

    let regular = steps_of(pod);
    if allow.is_empty() {
        steps.extend(regular);
    } else {
        steps.extend(
            regular
                .into_iter()
                .filter(|s| allow.iter().any(|a| a == &s.name)),
        );
    }

    steps
}

fn steps_of(pod: &Pod) -> Vec<Step> {
    let states =
        state_by_container(pod.status.as_ref().and_then(|s| s.container_statuses.as_ref()));
    pod.spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|c| step_for(&c.name, &states))
        .collect()
}

fn init_steps_of(pod: &Pod) -> Vec<Step> {
    let states = state_by_container(
        pod.status
            .as_ref()
            .and_then(|s| s.init_container_statuses.as_ref()),
    );
    pod.spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|c| step_for(&c.name, &states))
        .collect()
}

fn step_for(container: &str, states: &HashMap<String, ContainerState>) -> Step {
    Step {
        name: container
            .strip_prefix(STEP_CONTAINER_PREFIX)
            .unwrap_or(container)
            .to_string(),
        container: container.to_string(),
        state: states.get(container).cloned(),
    }
}

fn state_by_container(statuses: Option<&Vec<ContainerStatus>>) -> HashMap<String, ContainerState> {
    statuses
        .map(|list| {
            list.iter()
                .filter_map(|cs| cs.state.clone().map(|state| (cs.name.clone(), state)))
                .collect()
        })
        .unwrap_or_default()
}
