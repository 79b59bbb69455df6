//! Command execution
//!
//! Runs the job command as `<shell> -c <command>` inside the working directory,
//! with the runner's environment. While the child runs, two relay tasks copy
//! its stdout and stderr to the runner's own streams (and optionally into
//! stdout.log / stderr.log). Both pipes are drained until EOF no matter what
//! happens to the destinations, so the child never blocks on a full pipe.
//!
//! There is no timeout: simulations may run for as long as the surrounding
//! batch system allows.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use simrun_core::{ExecutionResult, exit};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::RunnerError;

pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";

const RELAY_BUFFER_SIZE: usize = 8192;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Runs job commands through a shell
pub struct CommandExecutor {
    shell: String,
    capture_logs: bool,
    relay: bool,
}

impl CommandExecutor {
    /// Creates an executor that relays child output to this process's stdout/stderr
    ///
    /// # Arguments
    /// * `shell` - Shell binary invoked with `-c`
    /// * `capture_logs` - Also write the child's output to log files in the working directory
    pub fn new(shell: impl Into<String>, capture_logs: bool) -> Self {
        Self {
            shell: shell.into(),
            capture_logs,
            relay: true,
        }
    }

    /// Drains child output without echoing it
    #[cfg(test)]
    pub fn quiet(mut self) -> Self {
        self.relay = false;
        self
    }

    /// Runs `command` in `workdir` and waits for it to exit
    ///
    /// A non-zero exit is returned as a regular result. Only failing to start
    /// (or lose track of) the shell is an error.
    pub async fn execute(
        &self,
        command: &str,
        workdir: &Path,
    ) -> Result<ExecutionResult, RunnerError> {
        info!("Running '{}' in {}", command, workdir.display());

        let mut child = Command::new(&self.shell);
        child.arg("-c").arg(command);

        let logs = self
            .capture_logs
            .then(|| (workdir.join(STDOUT_LOG), workdir.join(STDERR_LOG)));
        self.run(child, &self.shell, workdir, logs).await
    }

    /// Runs `<interpreter> -ex <script>` in `workdir`
    ///
    /// Output is captured to `<log_dir>/<script stem>.stdout.log` and
    /// `.stderr.log`, so several scripts can share one log directory.
    pub async fn execute_script(
        &self,
        interpreter: &str,
        script: &Path,
        workdir: &Path,
        log_dir: &Path,
    ) -> Result<ExecutionResult, RunnerError> {
        info!("Running {} -ex {}", interpreter, script.display());

        let mut child = Command::new(interpreter);
        child.arg("-ex").arg(script);

        let stem = script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string());
        let logs = self.capture_logs.then(|| {
            (
                log_dir.join(format!("{}.stdout.log", stem)),
                log_dir.join(format!("{}.stderr.log", stem)),
            )
        });
        self.run(child, interpreter, workdir, logs).await
    }

    async fn run(
        &self,
        mut command: Command,
        program: &str,
        workdir: &Path,
        logs: Option<(PathBuf, PathBuf)>,
    ) -> Result<ExecutionResult, RunnerError> {
        let started_at = chrono::Utc::now();
        let mut child = command
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| start_error(program, source))?;

        debug!("Command started with PID {:?}", child.id());

        let (stdout_path, stderr_path) = logs.unzip();

        let stdout_task = child.stdout.take().map(|stdout| {
            let sink: Sink = if self.relay {
                Box::new(tokio::io::stdout())
            } else {
                Box::new(tokio::io::sink())
            };
            tokio::spawn(relay(stdout, sink, stdout_path))
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            let sink: Sink = if self.relay {
                Box::new(tokio::io::stderr())
            } else {
                Box::new(tokio::io::sink())
            };
            tokio::spawn(relay(stderr, sink, stderr_path))
        });

        let status = child
            .wait()
            .await
            .map_err(|source| start_error(program, source))?;

        let stdout_log = join_relay(stdout_task, "stdout").await;
        let stderr_log = join_relay(stderr_task, "stderr").await;
        let finished_at = chrono::Utc::now();

        let exit_code = exit_code_of(status);
        info!(
            "Command exited with code {} after {}s",
            exit_code,
            (finished_at - started_at).num_seconds()
        );

        Ok(ExecutionResult {
            exit_code,
            stdout_log,
            stderr_log,
            started_at,
            finished_at,
        })
    }
}

fn start_error(program: &str, source: std::io::Error) -> RunnerError {
    RunnerError::ExecutionStart {
        shell: program.to_string(),
        source,
    }
}

/// Copies `reader` to `sink` until EOF, teeing into `log_path` if given
///
/// Write failures on either destination disable that destination but never
/// stop the draining. The log file is created on the first byte, so silent
/// streams leave no file behind.
///
/// # Returns
/// The log file path, when one was written
async fn relay<R>(mut reader: R, mut sink: Sink, log_path: Option<PathBuf>) -> Option<PathBuf>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];
    let mut sink_ok = true;
    let mut log: Option<tokio::fs::File> = None;
    let mut log_failed = false;

    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to read command output: {}", e);
                break;
            }
        };
        let chunk = &buffer[..read];

        if sink_ok {
            if let Err(e) = write_flush(&mut sink, chunk).await {
                warn!("Failed to relay command output: {}", e);
                sink_ok = false;
            }
        }

        if let (Some(path), false) = (&log_path, log_failed) {
            if log.is_none() {
                match tokio::fs::File::create(path).await {
                    Ok(file) => log = Some(file),
                    Err(e) => {
                        warn!("Failed to create {}: {}", path.display(), e);
                        log_failed = true;
                    }
                }
            }

            if let Some(file) = log.as_mut() {
                if let Err(e) = file.write_all(chunk).await {
                    warn!("Failed to write {}: {}", path.display(), e);
                    log_failed = true;
                }
            }
        }
    }

    let mut file = log?;
    if let Err(e) = file.flush().await {
        warn!("Failed to flush command log: {}", e);
    }
    log_path
}

async fn write_flush(sink: &mut Sink, chunk: &[u8]) -> std::io::Result<()> {
    sink.write_all(chunk).await?;
    sink.flush().await
}

async fn join_relay(
    task: Option<tokio::task::JoinHandle<Option<PathBuf>>>,
    stream: &str,
) -> Option<PathBuf> {
    match task?.await {
        Ok(path) => path,
        Err(e) => {
            warn!("{} relay task failed: {}", stream, e);
            None
        }
    }
}

/// Shell convention: the exit status, or 128 + signal number
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return exit::from_signal(signal);
        }
    }

    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> CommandExecutor {
        CommandExecutor::new("/bin/sh", true).quiet()
    }

    #[tokio::test]
    async fn test_exit_code_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();

        let ok = executor().execute("true", dir.path()).await.unwrap();
        assert!(ok.success());

        let failed = executor().execute("exit 7", dir.path()).await.unwrap();
        assert_eq!(failed.exit_code, 7);
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn test_runs_in_working_directory_with_shell_features() {
        let dir = tempfile::tempdir().unwrap();

        let result = executor()
            .execute("echo A -y 10 -o out.nc | tr A B > out.nc && pwd > where.txt", dir.path())
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.nc")).unwrap(),
            "B -y 10 -o out.nc\n"
        );
        let reported = std::fs::read_to_string(dir.path().join("where.txt")).unwrap();
        assert_eq!(
            std::fs::canonicalize(reported.trim()).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_inherits_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = std::env::var("PATH").unwrap_or_default();

        executor()
            .execute("printf '%s' \"$PATH\" > path.txt", dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("path.txt")).unwrap(), path);
    }

    #[tokio::test]
    async fn test_output_is_captured_to_logs() {
        let dir = tempfile::tempdir().unwrap();

        let result = executor()
            .execute("echo progress; echo warning >&2", dir.path())
            .await
            .unwrap();

        assert_eq!(result.stdout_log, Some(dir.path().join(STDOUT_LOG)));
        assert_eq!(result.stderr_log, Some(dir.path().join(STDERR_LOG)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(STDOUT_LOG)).unwrap(),
            "progress\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join(STDERR_LOG)).unwrap(),
            "warning\n"
        );
    }

    #[tokio::test]
    async fn test_silent_streams_leave_no_log() {
        let dir = tempfile::tempdir().unwrap();

        let result = executor().execute("true", dir.path()).await.unwrap();

        assert_eq!(result.stdout_log, None);
        assert_eq!(result.stderr_log, None);
        assert!(!dir.path().join(STDOUT_LOG).exists());
    }

    #[tokio::test]
    async fn test_capture_disabled() {
        let dir = tempfile::tempdir().unwrap();

        let result = CommandExecutor::new("/bin/sh", false)
            .quiet()
            .execute("echo hello", dir.path())
            .await
            .unwrap();

        assert_eq!(result.stdout_log, None);
        assert!(!dir.path().join(STDOUT_LOG).exists());
    }

    #[tokio::test]
    async fn test_large_output_does_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();

        // Far more than a pipe buffer on both streams
        let result = executor()
            .execute(
                "i=0; while [ $i -lt 20000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done",
                dir.path(),
            )
            .await
            .unwrap();

        assert!(result.success());
        let stdout = std::fs::read_to_string(dir.path().join(STDOUT_LOG)).unwrap();
        assert_eq!(stdout.lines().count(), 20000);
        assert_eq!(stdout.lines().last(), Some("line-19999"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_maps_to_shell_convention() {
        let dir = tempfile::tempdir().unwrap();

        let result = executor().execute("kill -TERM $$", dir.path()).await.unwrap();

        assert_eq!(result.exit_code, 128 + 15);
    }

    #[tokio::test]
    async fn test_script_runs_with_errexit_and_logs_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        let script = dir.path().join("spinup.sh");
        std::fs::write(&script, "echo started\nfalse\necho unreachable > after.txt\n").unwrap();

        let result = executor()
            .execute_script("/bin/sh", &script, dir.path(), &logs)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(!dir.path().join("after.txt").exists());
        assert_eq!(result.stdout_log, Some(logs.join("spinup.stdout.log")));
        assert_eq!(
            std::fs::read_to_string(logs.join("spinup.stdout.log")).unwrap(),
            "started\n"
        );
        // -x traces each command on stderr
        let trace = std::fs::read_to_string(logs.join("spinup.stderr.log")).unwrap();
        assert!(trace.contains("echo started"));
    }

    #[tokio::test]
    async fn test_missing_shell_is_a_start_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = CommandExecutor::new("/nonexistent/shell", true)
            .quiet()
            .execute("true", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::ExecutionStart { .. }));
        assert_eq!(err.exit_code(), exit::EXECUTION_START);
    }
}
