//! Line-oriented rendering of the merged log stream.

use std::io::Write;

use tokio::sync::mpsc;

use pipetail_logs::{Error, Log};

/// Drain both channels, logs to stdout and errors to stderr. Returns
/// whether any error record was seen.
pub async fn write(
    mut logs: mpsc::Receiver<Log>,
    mut errs: mpsc::Receiver<Error>,
    prefix: bool,
) -> bool {
    let mut logs_open = true;
    let mut errs_open = true;
    let mut had_errors = false;
    let stdout = std::io::stdout();

    while logs_open || errs_open {
        tokio::select! {
            log = logs.recv(), if logs_open => match log {
                Some(log) => render(&stdout, &log, prefix),
                None => logs_open = false,
            },
            err = errs.recv(), if errs_open => match err {
                Some(err) => {
                    had_errors = true;
                    eprintln!("{err}");
                }
                None => errs_open = false,
            },
        }
    }

    had_errors
}

fn render(stdout: &std::io::Stdout, log: &Log, prefix: bool) {
    let mut out = stdout.lock();
    if log.is_eof() {
        // blank separator between steps
        let _ = writeln!(out);
    } else if prefix {
        let _ = writeln!(out, "[{} : {}] {}", log.task, log.step, log.line);
    } else {
        let _ = writeln!(out, "{}", log.line);
    }
}
