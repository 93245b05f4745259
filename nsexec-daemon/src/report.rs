//! Background exit-status reporting

use std::sync::Arc;
use std::time::SystemTime;

use nsexec_core::{ExitStatus, ProcessEvent};

use crate::pipes::{Report, ServerEnds};
use crate::runner::{PreparedCommand, ProcessRunner};

/// Wait for a started command and report its exit status to the caller
///
/// Runs as its own task, one per started command. It holds the only
/// handle on the command and the server pipe ends; both are released
/// whether the wait or the status write fails.
pub async fn report_exit_status(
    runner: Arc<dyn ProcessRunner>,
    mut command: PreparedCommand,
    server: ServerEnds,
) -> Report {
    let path = command.path().to_string();

    let outcome = runner.wait(&mut command).await;
    drop(command);

    // Pipe writes can block if the caller stops reading.
    let report = match tokio::task::spawn_blocking(move || server.report(outcome)).await {
        Ok(report) => report,
        Err(e) => Report {
            status: ExitStatus::UNKNOWN,
            delivered: false,
            errors: vec![format!("reporting task failed: {e}")],
        },
    };

    let event = if report.errors.is_empty() {
        ProcessEvent::Exited {
            path,
            status: report.status,
            timestamp: SystemTime::now(),
        }
    } else {
        ProcessEvent::ReportFailed {
            path,
            message: report.errors.join("; "),
            timestamp: SystemTime::now(),
        }
    };
    event.emit_trace();

    report
}
