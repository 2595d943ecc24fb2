//! Reading the logs of a pipeline execution by fanning out to its tasks.

use tokio::sync::mpsc;
use tracing::debug;

use crate::reader::{CHANNEL_CAPACITY, Reader};
use crate::{Error, Log};

impl Reader {
    /// Resolve the pipeline execution and merge the streams of its child
    /// tasks.
    ///
    /// Children are read in the platform's declared order: sequentially
    /// when not following (the merged stream is the concatenation), and
    /// concurrently when following (records interleave, tagged per task).
    /// The merged channels close only after every child is done; a child's
    /// failure never aborts its siblings.
    pub(crate) async fn read_pipeline_log(
        &mut self,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>), Error> {
        let run = self
            .cluster
            .pipeline_run(&self.opts.ns, &self.opts.run)
            .await
            .map_err(|e| Error::PipelineRunNotFound {
                run: self.opts.run.clone(),
                source: e,
            })?;

        let children = run.task_run_children();
        debug!(pipeline = %self.opts.run, children = children.len(), "reading pipeline logs");

        // a pipeline that failed before scheduling anything has no logs
        if children.is_empty() && run.is_failure() {
            return Err(Error::PipelineRunFailed {
                run: self.opts.run.clone(),
                message: run.condition_message().unwrap_or_default().to_string(),
            });
        }

        let (log_tx, log_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut readers = Vec::with_capacity(children.len());
        for (i, child) in children.into_iter().enumerate() {
            let mut opts = self.opts.clone();
            opts.run = child.name;
            opts.task = None;
            opts.number = i + 1;

            let mut reader = Reader::task_reader(self.cluster.clone(), opts);
            reader.err_sink = Some(err_tx.clone());
            reader.cancel = self.cancel.clone();
            readers.push(reader);
        }

        let follow = self.opts.follow;
        tokio::spawn(async move {
            if follow {
                let mut children = Vec::with_capacity(readers.len());
                for reader in readers {
                    let log_tx = log_tx.clone();
                    let err_tx = err_tx.clone();
                    children.push(tokio::spawn(pump_child(reader, log_tx, err_tx)));
                }
                for child in children {
                    let _ = child.await;
                }
            } else {
                for reader in readers {
                    pump_child(reader, log_tx.clone(), err_tx.clone()).await;
                }
            }
        });

        Ok((log_rx, err_rx))
    }
}

/// Read one child task and forward its two channels into the merged pair.
/// A start error is forwarded like any other record.
async fn pump_child(
    mut reader: Reader,
    log_tx: mpsc::Sender<Log>,
    err_tx: mpsc::Sender<Error>,
) {
    match reader.read_task_log().await {
        Err(err) => {
            let _ = err_tx.send(err).await;
        }
        Ok((mut logs, mut errs)) => {
            let forward_logs = async {
                while let Some(log) = logs.recv().await {
                    if log_tx.send(log).await.is_err() {
                        break;
                    }
                }
            };
            let forward_errs = async {
                while let Some(err) = errs.recv().await {
                    if err_tx.send(err).await.is_err() {
                        break;
                    }
                }
            };
            tokio::join!(forward_logs, forward_errs);
        }
    }
}
