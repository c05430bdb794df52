//! Event sources backed by long-running OS tools.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::{SourceError, SourceResult};

/// Run `program` and forward every stdout line that `parse` accepts.
///
/// Returns `Ok(())` once the receiver is gone. The tool exiting on its
/// own is an error: the source can no longer deliver events.
pub(crate) async fn stream_lines<T, F>(
    program: &str,
    args: &[&str],
    mut parse: F,
    tx: mpsc::Sender<T>,
) -> SourceResult<()>
where
    F: FnMut(&str) -> Option<T>,
{
    let io_error = |e: std::io::Error| SourceError::Io {
        program: program.to_string(),
        reason: e.to_string(),
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SourceError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;
    tracing::info!(program, ?args, "event source started");

    let stdout = child.stdout.take().ok_or_else(|| SourceError::Io {
        program: program.to_string(),
        reason: "stdout not captured".to_string(),
    })?;
    let mut lines = BufReader::new(stdout).lines();

    while let Some(line) = lines.next_line().await.map_err(io_error)? {
        tracing::trace!(program, %line, "event source line");
        let Some(event) = parse(&line) else {
            continue;
        };
        if tx.send(event).await.is_err() {
            tracing::debug!(program, "event receiver closed");
            return Ok(());
        }
    }

    let status = child.wait().await.map_err(io_error)?;
    Err(SourceError::Exited {
        program: program.to_string(),
        status: status.to_string(),
    })
}
