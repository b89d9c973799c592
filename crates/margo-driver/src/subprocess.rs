use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::DriverError;

/// Driver subprocesses (helm, docker compose) are never expected to run past
/// this; a hung subprocess is killed and reported as a failure rather than
/// blocking the executor forever. spec.md §5: "Driver calls may run up to
/// 10 min (deploy/update on large Helm charts)."
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Run `binary args...` in `workdir`, merging stdout and stderr into one log
/// buffer (each line also mirrored to tracing), with a hard wall-clock
/// timeout. Returns `(exit_code, combined_output)`; a non-zero exit code is
/// not itself an error here, the caller decides what exit codes mean.
pub async fn run(binary: &str, args: &[&str], workdir: &Path, envs: &[(&str, &str)]) -> Result<(i32, String), DriverError> {
    run_with_timeout(binary, args, workdir, envs, DEFAULT_TIMEOUT).await
}

pub async fn run_with_timeout(
    binary: &str,
    args: &[&str],
    workdir: &Path,
    envs: &[(&str, &str)],
    timeout: Duration,
) -> Result<(i32, String), DriverError> {
    debug!(binary, ?args, workdir = %workdir.display(), "running driver subprocess");

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(workdir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .envs(envs.iter().copied());

    let mut child = cmd.spawn().map_err(|e| DriverError::Internal(format!("spawn {binary}: {e}")))?;

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let mut log = String::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let tx1 = tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx1.send(line);
        }
    });

    let tx2 = tx.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx2.send(line);
        }
    });

    drop(tx);

    let collect = async {
        while let Some(line) = rx.recv().await {
            debug!(target: "margo::driver", "{}", line);
            log.push_str(&line);
            log.push('\n');
        }
    };
    let timed_out = tokio::time::timeout(timeout, collect).await.is_err();

    stdout_task.await.ok();
    stderr_task.await.ok();

    if timed_out {
        let _ = child.kill().await;
        return Err(DriverError::Internal(format!(
            "{binary} {} timed out after {}s",
            args.first().copied().unwrap_or(""),
            timeout.as_secs(),
        )));
    }

    let status = child.wait().await.map_err(|e| DriverError::Internal(format!("wait {binary}: {e}")))?;

    let code = status.code().unwrap_or(-1);
    if code != 0 {
        warn!(binary, code, "driver subprocess exited non-zero");
    }
    Ok((code, log))
}
