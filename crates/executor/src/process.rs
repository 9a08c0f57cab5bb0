use std::{io, process::Stdio, time::Duration};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use tokio::process::Command;
use tracing::{debug, warn};
use utils::shell::get_shell_command;

use crate::{error::ExecutorError, request::ExecutionRequest};

/// Grace window between the polite stop signal and the forced kill.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Return code persisted when the real one is unknown (killed by signal,
/// wait failure, or persistence fallback).
pub const SENTINEL_RETURN_CODE: i64 = -1;

/// Launch the request's command with both output pipes captured and stdin
/// detached. The child is spawned as a process group so termination reaches
/// any helpers the tool forks.
///
/// Argv mode is preferred; shell mode is logged as a security-relevant event
/// because it is injection-prone.
pub fn spawn(request: &ExecutionRequest) -> Result<AsyncGroupChild, ExecutorError> {
    let mut command = if request.shell {
        warn!(command = %request.command, "spawning through shell (injection-prone)");
        let (shell_cmd, shell_arg) = get_shell_command();
        let mut command = Command::new(shell_cmd);
        command.arg(shell_arg).arg(&request.command);
        command
    } else {
        let args = shlex::split(&request.command)
            .filter(|args| !args.is_empty())
            .ok_or_else(|| {
                ExecutorError::Spawn(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "empty or unparsable command",
                ))
            })?;
        let mut command = Command::new(&args[0]);
        command.args(&args[1..]);
        command
    };

    command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &request.cwd {
        command.current_dir(cwd);
    }

    let child = command.group_spawn()?;
    debug!(pid = child.id(), command = %request.command, "process launched");
    Ok(child)
}

/// Graceful-then-forced stop: SIGTERM to the process group, wait the grace
/// period, then kill the group if it is still alive.
pub async fn terminate(child: &mut AsyncGroupChild) {
    #[cfg(unix)]
    {
        use command_group::{Signal, UnixChildExt};

        if let Err(e) = child.signal(Signal::SIGTERM) {
            debug!(error = %e, "SIGTERM not delivered, process likely exited");
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
        warn!(pid = child.id(), "process survived SIGTERM grace period, killing group");
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed, process already gone");
    }
}

/// Block until the process exits and map its status to the persisted code.
/// Safe to call after the process has already been reaped.
pub async fn wait_code(child: &mut AsyncGroupChild) -> i64 {
    match child.wait().await {
        Ok(status) => status.code().map(i64::from).unwrap_or(SENTINEL_RETURN_CODE),
        Err(e) => {
            warn!(error = %e, "failed to wait on process");
            SENTINEL_RETURN_CODE
        }
    }
}
