// CLI fallback - runs commands through vtysh, which fans out to every daemon
//
// Invocation: `<vtysh> [options...] -c "<command>"`, or with sudo enabled
// `/usr/bin/sudo <vtysh> [options...] -c "<command>"`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use super::TransportError;

/// Executable used for privilege elevation
pub const SUDO_PATH: &str = "/usr/bin/sudo";

/// Settings for invoking the vtysh command-line tool
#[derive(Debug, Clone)]
pub struct Vtysh {
    /// Path of the vtysh binary
    path: PathBuf,

    /// Run vtysh through sudo
    sudo: bool,

    /// Extra arguments inserted before `-c <command>`
    options: Vec<String>,

    /// Wall-clock limit for one invocation; the child is killed on expiry
    timeout: Duration,
}

impl Vtysh {
    pub fn new(path: impl Into<PathBuf>, sudo: bool, options: Vec<String>, timeout: Duration) -> Self {
        Vtysh {
            path: path.into(),
            sudo,
            options,
            timeout,
        }
    }

    /// Builds the program and argument vector for one command
    pub fn argv(&self, command: &str) -> (PathBuf, Vec<String>) {
        let mut args = Vec::with_capacity(self.options.len() + 3);
        let program = if self.sudo {
            args.push(self.path.display().to_string());
            PathBuf::from(SUDO_PATH)
        } else {
            self.path.clone()
        };
        args.extend(self.options.iter().cloned());
        args.push("-c".to_string());
        args.push(command.to_string());
        (program, args)
    }

    /// Runs one command and returns its standard output.
    ///
    /// # Errors
    /// - [`TransportError::Spawn`] if the process cannot be started
    /// - [`TransportError::CommandTimeout`] if it outlives the timeout; the
    ///   child is killed and the output captured so far is kept
    /// - [`TransportError::CommandFailed`] on a non-zero exit
    ///
    /// Both command errors carry stderr and stdout with newlines flattened
    /// to spaces.
    pub async fn execute(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        let (program, args) = self.argv(command);
        let invocation = format!("{} {}", program.display(), args.join(" "));
        debug!(invocation = %invocation, "executing vtysh command");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        let mut stdout = PipeReader::spawn(child.stdout.take());
        let mut stderr = PipeReader::spawn(child.stderr.take());

        let waited = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await;
            stdout.closed().await;
            stderr.closed().await;
            status
        })
        .await;

        match waited {
            Ok(Ok(status)) if status.success() => Ok(stdout.take()),
            Ok(Ok(status)) => Err(TransportError::CommandFailed {
                invocation,
                status: status.to_string(),
                stderr: flatten(&stderr.take()),
                stdout: flatten(&stdout.take()),
            }),
            Ok(Err(source)) => Err(TransportError::Spawn {
                program: program.display().to_string(),
                source,
            }),
            Err(_) => {
                // Already gone if only a grandchild kept the pipes open
                if let Err(e) = child.kill().await {
                    debug!(invocation = %invocation, error = %e, "failed to kill vtysh");
                }
                Err(TransportError::CommandTimeout {
                    invocation,
                    timeout: self.timeout,
                    stderr: flatten(&stderr.take()),
                    stdout: flatten(&stdout.take()),
                })
            }
        }
    }
}

/// Drains one child pipe in the background.
///
/// The bytes are shared with the caller so that a timed-out command still
/// reports what it wrote before it was killed.
struct PipeReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PipeReader {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        PipeReader { buffer, task }
    }

    /// Resolves once the pipe reaches EOF
    async fn closed(&mut self) {
        let _ = (&mut self.task).await;
    }

    /// Everything read so far
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn flatten(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    /// Writes an executable shell script standing in for vtysh
    fn fake_vtysh(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("vtysh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_argv_plain() {
        let vtysh = Vtysh::new("/usr/bin/vtysh", false, vec![], Duration::from_secs(1));
        let (program, args) = vtysh.argv("show version");
        assert_eq!(program, PathBuf::from("/usr/bin/vtysh"));
        assert_eq!(args, vec!["-c", "show version"]);
    }

    #[test]
    fn test_argv_sudo_and_options() {
        let vtysh = Vtysh::new(
            "/usr/bin/vtysh",
            true,
            vec!["--vty_socket".to_string(), "/run/frr".to_string()],
            Duration::from_secs(1),
        );
        let (program, args) = vtysh.argv("show bfd peers json");
        assert_eq!(program, PathBuf::from(SUDO_PATH));
        assert_eq!(
            args,
            vec!["/usr/bin/vtysh", "--vty_socket", "/run/frr", "-c", "show bfd peers json"]
        );
    }

    #[tokio::test]
    async fn test_execute_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_vtysh(&dir, r#"printf '%s|%s' "$1" "$2""#);

        let vtysh = Vtysh::new(path, false, vec![], Duration::from_secs(5));
        let output = vtysh.execute("show version").await.unwrap();
        assert_eq!(output, b"-c|show version");
    }

    #[tokio::test]
    async fn test_execute_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_vtysh(&dir, "printf '%% Unknown command\\nline two\\n' >&2\nexit 1");

        let vtysh = Vtysh::new(path, false, vec![], Duration::from_secs(5));
        let err = vtysh.execute("show nonsense").await.unwrap_err();

        match &err {
            TransportError::CommandFailed { stderr, .. } => {
                assert_eq!(stderr, "% Unknown command line two ");
            }
            other => panic!("expected command failure, got {:?}", other),
        }
        assert!(err.to_string().contains("show nonsense"));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_vtysh(&dir, "sleep 10");

        let timeout = Duration::from_millis(200);
        let vtysh = Vtysh::new(path, false, vec![], timeout);
        let start = Instant::now();
        let err = vtysh.execute("show version").await.unwrap_err();

        assert!(err.is_timeout(), "unexpected error: {}", err);
        assert!(start.elapsed() < timeout + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_execute_timeout_keeps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_vtysh(&dir, "echo 'daemon wedged' >&2\nsleep 10");

        let timeout = Duration::from_millis(300);
        let vtysh = Vtysh::new(path, false, vec![], timeout);
        let start = Instant::now();
        let err = vtysh.execute("show bfd peers json").await.unwrap_err();

        match &err {
            TransportError::CommandTimeout { stderr, .. } => assert_eq!(stderr, "daemon wedged "),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(err.to_string().contains("daemon wedged"));
        assert!(start.elapsed() < timeout + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_execute_missing_binary() {
        let vtysh = Vtysh::new(
            "/nonexistent/vtysh",
            false,
            vec![],
            Duration::from_secs(1),
        );
        let err = vtysh.execute("show version").await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }
}
