// Daemon socket client - talks to one FRR daemon over its VTY unix socket
//
// Protocol: the client writes `<command>\0`, the daemon answers with the
// command output followed by a NUL terminator. One connection per command.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use super::TransportError;

/// Size of each read from the daemon socket
pub const READ_CHUNK_SIZE: usize = 4096;

/// Connection descriptor for the per-daemon VTY sockets.
///
/// Holds no connection state: every [`VtySocket::execute`] call opens,
/// uses and closes its own socket, so one descriptor can be shared by any
/// number of concurrent collector tasks.
#[derive(Debug, Clone)]
pub struct VtySocket {
    /// Directory containing `<daemon>.vty` sockets (e.g. /var/run/frr)
    dir_path: PathBuf,

    /// Deadline applied to the whole call: connect, write and all reads
    timeout: Duration,
}

impl VtySocket {
    pub fn new(dir_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        VtySocket {
            dir_path: dir_path.into(),
            timeout,
        }
    }

    /// Path of the socket for an endpoint, `<dir>/<endpoint>.vty`
    pub fn socket_path(&self, endpoint: &str) -> PathBuf {
        self.dir_path.join(format!("{}.vty", endpoint))
    }

    /// Sends one command to `<dir>/<endpoint>.vty` and returns the response
    /// with the trailing NUL terminator stripped.
    ///
    /// # Errors
    /// Connection failures, deadline expiry (`io::ErrorKind::TimedOut`) and
    /// responses that end before the terminator (`io::ErrorKind::UnexpectedEof`)
    /// are all reported as [`TransportError::Socket`]. Bytes read before the
    /// failure are discarded.
    pub async fn execute(&self, endpoint: &str, command: &str) -> Result<Vec<u8>, TransportError> {
        let path = self.socket_path(endpoint);
        debug!(socket = %path.display(), command, "executing daemon socket command");

        let result = match tokio::time::timeout(self.timeout, exchange(&path, command)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no complete response within {:?}", self.timeout),
            )),
        };

        result.map_err(|source| TransportError::Socket { path, source })
    }
}

/// Runs one request/response exchange on a fresh connection
async fn exchange(path: &Path, command: &str) -> io::Result<Vec<u8>> {
    let mut stream = UnixStream::connect(path).await?;

    let mut request = Vec::with_capacity(command.len() + 1);
    request.extend_from_slice(command.as_bytes());
    request.push(0);
    stream.write_all(&request).await?;

    let mut response = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "connection closed after {} bytes without response terminator",
                    response.len()
                ),
            ));
        }
        response.extend_from_slice(&chunk[..n]);

        // Only a NUL at the end of everything received so far terminates the
        // response; a NUL followed by more data in the same read does not.
        if response.last() == Some(&0) {
            break;
        }
    }

    while response.last() == Some(&0) {
        response.pop();
    }
    Ok(response)
}
