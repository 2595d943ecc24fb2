//! Reading the logs of a single task execution.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pipetail_k8s::{Cluster, PodError, PodRef};
use pipetail_types::TaskRun;

use crate::reader::{CHANNEL_CAPACITY, Reader, recv_or_pending, send_or_cancelled};
use crate::steps::{Step, filter_steps};
use crate::{EOFLOG, Error, Log};

impl Reader {
    pub(crate) async fn read_task_log(
        &mut self,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>), Error> {
        let run = self
            .cluster
            .task_run(&self.opts.ns, &self.opts.run)
            .await
            .map_err(|e| Error::TaskRunNotFound {
                run: self.opts.run.clone(),
                source: e,
            })?;

        self.form_task_name(&run);
        debug!(task = %self.task, follow = self.opts.follow, "reading task logs");

        if !run.is_done() && self.opts.follow {
            self.read_live_task_logs(run).await
        } else {
            self.read_available_task_logs(run).await
        }
    }

    /// Derive the name records are tagged with: caller-supplied label, then
    /// the pipeline-role label, then the task reference, then the ordinal.
    fn form_task_name(&mut self, run: &TaskRun) {
        if self.task.is_empty() {
            self.task = run
                .pipeline_task_label()
                .map(str::to_string)
                .or_else(|| run.task_ref_name().map(str::to_string))
                .unwrap_or_else(|| format!("Task {}", self.opts.number));
        }
        self.display_name = run
            .spec
            .display_name
            .clone()
            .unwrap_or_else(|| self.task.clone());
    }

    /// Live mode: pod names arrive from a watch on the task execution and
    /// are streamed as they appear.
    async fn read_live_task_logs(
        &mut self,
        run: TaskRun,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>), Error> {
        let (pod_rx, pod_err_rx) = self.task_run_pod_names(run).await?;
        Ok(self.read_pod_logs(pod_rx, Some(pod_err_rx), true))
    }

    /// Available mode: the pods are already recorded in the status, retries
    /// first, the current attempt last.
    async fn read_available_task_logs(
        &mut self,
        run: TaskRun,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>), Error> {
        if !run.has_started() {
            return self
                .start_error(Error::TaskNotStarted(self.task.clone()))
                .await;
        }

        // A run that failed on startup still has logs worth reading when a
        // sink is attached; standalone it is the caller's answer.
        if let Some(err) = has_task_run_failed(&run, &self.task) {
            match &self.err_sink {
                Some(sink) => {
                    let _ = sink.send(err).await;
                }
                None => return Err(err),
            }
        }

        let Some(current) = run.pod_name() else {
            return self
                .start_error(Error::PodNotAvailable(self.opts.run.clone()))
                .await;
        };

        let mut names: Vec<String> = run
            .retry_pod_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        names.push(current.to_string());

        let (pod_tx, pod_rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for name in names {
                if pod_tx.send(name).await.is_err() {
                    return;
                }
            }
        });

        Ok(self.read_pod_logs(pod_rx, None, false))
    }

    /// Watch the task execution until every attempt pod is known.
    ///
    /// Names are yielded in attempt order and deduplicated. Discovery ends
    /// once the current pod name is set and no further retries are
    /// scheduled, or on the activity timeout.
    async fn task_run_pod_names(
        &self,
        run: TaskRun,
    ) -> Result<(mpsc::Receiver<String>, mpsc::Receiver<Error>), Error> {
        let mut events = self
            .cluster
            .watch_task_run(&self.opts.ns, &self.opts.run)
            .await?;

        let (pod_tx, pod_rx) = mpsc::channel(4);
        let (err_tx, err_rx) = mpsc::channel(1);

        let task = self.task.clone();
        let retries = self.opts.retries;
        let activity_timeout = self.opts.activity_timeout;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            use futures::StreamExt;

            let mut run = run;
            let mut seen: HashSet<String> = HashSet::new();

            let mut initial: Vec<String> = run
                .retry_pod_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            if let Some(current) = run.pod_name() {
                initial.push(current.to_string());
            }
            for name in initial {
                if seen.insert(name.clone()) && pod_tx.send(name).await.is_err() {
                    return;
                }
            }

            let deadline = tokio::time::sleep(activity_timeout);
            tokio::pin!(deadline);
            let mut timed_out = false;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = &mut deadline, if !timed_out => {
                        timed_out = true;
                        if let Some(err) = has_task_run_failed(&run, &task) {
                            let _ = err_tx.send(err).await;
                            return;
                        }
                        if run.has_started() && run.pod_name().is_some() {
                            if !are_retries_scheduled(&run, retries) {
                                return;
                            }
                            // more attempts are expected, stay on the watch
                        } else {
                            let _ = err_tx.send(Error::DiscoveryTimeout(task.clone())).await;
                            return;
                        }
                    }
                    event = events.next() => match event {
                        Some(update) => {
                            run = update;
                            if let Some(name) = run.pod_name().map(str::to_string) {
                                if seen.insert(name.clone()) && pod_tx.send(name).await.is_err() {
                                    return;
                                }
                                if !are_retries_scheduled(&run, retries) {
                                    debug!(task = %task, "pod discovery complete");
                                    return;
                                }
                            }
                        }
                        None => return,
                    },
                }
            }
        });

        Ok((pod_rx, err_rx))
    }

    /// Fan pod names into per-step log streams on a fresh channel pair.
    fn read_pod_logs(
        &self,
        pod_rx: mpsc::Receiver<String>,
        pod_err_rx: Option<mpsc::Receiver<Error>>,
        follow: bool,
    ) -> (mpsc::Receiver<Log>, mpsc::Receiver<Error>) {
        let (log_tx, log_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);

        // discovery errors join the task's error stream
        if let Some(mut pod_errs) = pod_err_rx {
            let err_tx = err_tx.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                while let Some(err) = pod_errs.recv().await {
                    if !send_or_cancelled(&cancel, &err_tx, err).await {
                        return;
                    }
                }
            });
        }

        let stream = TaskStream {
            cluster: self.cluster.clone(),
            ns: self.opts.ns.clone(),
            task: self.task.clone(),
            display_name: self.display_name.clone(),
            follow,
            timestamps: self.opts.timestamps,
            all_steps: self.opts.all_steps,
            steps: self.opts.steps.clone(),
            cancel: self.cancel.clone(),
        };

        tokio::spawn(async move {
            let mut pod_rx = pod_rx;
            loop {
                let name = tokio::select! {
                    _ = stream.cancel.cancelled() => return,
                    next = pod_rx.recv() => match next {
                        Some(name) => name,
                        None => return,
                    },
                };
                stream.stream_pod(name, &log_tx, &err_tx).await;
            }
        });

        (log_rx, err_rx)
    }
}

/// Everything a streaming worker needs, detached from the reader.
struct TaskStream {
    cluster: Arc<dyn Cluster>,
    ns: String,
    task: String,
    display_name: String,
    follow: bool,
    timestamps: bool,
    all_steps: bool,
    steps: Vec<String>,
    cancel: CancellationToken,
}

impl TaskStream {
    /// Stream every selected step of one attempt pod, in order.
    async fn stream_pod(
        &self,
        pod_name: String,
        log_tx: &mpsc::Sender<Log>,
        err_tx: &mpsc::Sender<Error>,
    ) {
        debug!(task = %self.task, pod = %pod_name, "streaming pod");
        let pod_ref = PodRef::new(self.cluster.clone(), &self.ns, &pod_name);

        let fetched = if self.follow {
            pod_ref.wait().await
        } else {
            pod_ref.get().await.map_err(PodError::from)
        };

        let pod = match fetched {
            Ok(pod) => pod,
            Err(err) => {
                // a later attempt pod may still be readable
                let err = Error::PodUnreachable {
                    task: self.task.clone(),
                    reason: err.to_string().trim().to_string(),
                };
                send_or_cancelled(&self.cancel, err_tx, err).await;
                return;
            }
        };

        let steps = filter_steps(&pod, self.all_steps, &self.steps);
        self.read_steps_logs(steps, &pod_ref, log_tx, err_tx).await;
    }

    async fn read_steps_logs(
        &self,
        steps: Vec<Step>,
        pod_ref: &PodRef,
        log_tx: &mpsc::Sender<Log>,
        err_tx: &mpsc::Sender<Error>,
    ) {
        for step in steps {
            if !self.follow && !step.has_started() {
                continue;
            }

            let container = pod_ref.container(&step.container);
            let reader = container.log_reader(self.follow, self.timestamps);
            let (lines, errs) = match reader.read(self.cancel.clone()).await {
                Ok(pair) => pair,
                Err(err) => {
                    let err = Error::StepLogsUnavailable {
                        step: step.name.clone(),
                        source: err,
                    };
                    if !send_or_cancelled(&self.cancel, err_tx, err).await {
                        return;
                    }
                    continue;
                }
            };

            let mut lines = Some(lines);
            let mut errs = Some(errs);
            while lines.is_some() || errs.is_some() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    line = recv_or_pending(&mut lines) => match line {
                        Some(line) => {
                            if log_tx.send(self.log(&step.name, line)).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            lines = None;
                            let eof = self.log(&step.name, EOFLOG.to_string());
                            if log_tx.send(eof).await.is_err() {
                                return;
                            }
                        }
                    },
                    err = recv_or_pending(&mut errs) => match err {
                        Some(err) => {
                            let err = Error::StepStream {
                                step: step.name.clone(),
                                source: err,
                            };
                            if err_tx.send(err).await.is_err() {
                                return;
                            }
                        }
                        None => errs = None,
                    },
                }
            }

            if let Err(err) = container.status().await {
                // the task failed mid-stream, the remaining steps are dead
                send_or_cancelled(&self.cancel, err_tx, Error::from(err)).await;
                return;
            }
        }
    }

    fn log(&self, step: &str, line: String) -> Log {
        Log {
            task: self.task.clone(),
            task_display_name: self.display_name.clone(),
            step: step.to_string(),
            line,
        }
    }
}

fn has_task_run_failed(run: &TaskRun, task: &str) -> Option<Error> {
    if run.is_failure() {
        Some(Error::TaskFailed {
            task: task.to_string(),
            message: run.condition_message().unwrap_or_default().to_string(),
        })
    } else {
        None
    }
}

/// More attempts are expected while the run is not done and fewer retries
/// than configured have been recorded.
fn are_retries_scheduled(run: &TaskRun, configured: usize) -> bool {
    if run.is_done() {
        return false;
    }
    run.retries_done() < configured
}
