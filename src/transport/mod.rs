// Transport module - how commands reach the FRR daemons
//
// Collectors never touch sockets or subprocesses. They ask the
// `Dispatcher` for a command category (BGP, OSPF, zebra, ...) and the
// dispatcher routes it over whichever transport was selected at startup:
// - direct per-daemon VTY sockets (default, recommended)
// - the vtysh command-line tool (CLI fallback)
//
// BFD is the exception: bfdd's VTY socket rejects `show bfd peers json`,
// so BFD commands always go through vtysh.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub mod socket;
pub mod vtysh;

pub use socket::VtySocket;
pub use vtysh::Vtysh;

/// Errors raised while talking to a daemon
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connect, write, read or deadline failure on a daemon socket, or a
    /// response that ended before its terminator
    #[error("daemon socket {}: {source}", path.display())]
    Socket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The child was killed on expiry; carries whatever it wrote until then
    #[error("command {invocation} timed out after {timeout:?}: stderr: {stderr}: stdout: {stdout}")]
    CommandTimeout {
        invocation: String,
        timeout: Duration,
        stderr: String,
        stdout: String,
    },

    #[error("command {invocation} failed: {status}: stderr: {stderr}: stdout: {stdout}")]
    CommandFailed {
        invocation: String,
        status: String,
        stderr: String,
        stdout: String,
    },

    #[error("instance-addressed commands are not supported by the vtysh transport")]
    InstancesUnsupported,
}

impl TransportError {
    /// True when the call was cut short by its deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Socket { source, .. } => source.kind() == io::ErrorKind::TimedOut,
            TransportError::CommandTimeout { .. } => true,
            _ => false,
        }
    }
}

/// FRR daemons that expose a VTY socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Daemon {
    Bgpd,
    Ospfd,
    Pimd,
    Zebra,
    Vrrpd,
    Ldpd,
}

impl Daemon {
    /// Socket endpoint name, the file stem of `<dir>/<name>.vty`
    pub fn endpoint(&self) -> &'static str {
        match self {
            Daemon::Bgpd => "bgpd",
            Daemon::Ospfd => "ospfd",
            Daemon::Pimd => "pimd",
            Daemon::Zebra => "zebra",
            Daemon::Vrrpd => "vrrpd",
            Daemon::Ldpd => "ldpd",
        }
    }
}

/// Transport selected once at startup
#[derive(Debug, Clone)]
pub enum CommandTransport {
    /// One VTY socket per daemon
    Socket(VtySocket),

    /// Every command goes through the vtysh binary
    Vtysh(Vtysh),
}

/// Routes command categories to the configured transport.
///
/// Cheap to share: it only holds immutable settings, every call opens its
/// own socket or spawns its own process.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    transport: CommandTransport,

    /// Used for BFD whatever the transport
    vtysh: Vtysh,
}

impl Dispatcher {
    pub fn new(transport: CommandTransport, vtysh: Vtysh) -> Self {
        Dispatcher { transport, vtysh }
    }

    /// Whether instance-addressed commands (e.g. `ospfd-2.vty`) can be routed
    pub fn supports_instances(&self) -> bool {
        matches!(self.transport, CommandTransport::Socket(_))
    }

    /// Executes a command against the daemon owning its category
    pub async fn execute(&self, daemon: Daemon, command: &str) -> Result<Vec<u8>, TransportError> {
        match &self.transport {
            CommandTransport::Socket(socket) => socket.execute(daemon.endpoint(), command).await,
            CommandTransport::Vtysh(vtysh) => vtysh.execute(command).await,
        }
    }

    pub async fn bgp(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.execute(Daemon::Bgpd, command).await
    }

    pub async fn ospf(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.execute(Daemon::Ospfd, command).await
    }

    /// Executes an OSPF command against one numbered ospfd instance.
    ///
    /// Only available with the socket transport; vtysh has no syntax for
    /// addressing an instance. Collectors check [`Dispatcher::supports_instances`]
    /// when they are constructed, so this error is not expected at scrape time.
    pub async fn ospf_instance(&self, instance: u16, command: &str) -> Result<Vec<u8>, TransportError> {
        match &self.transport {
            CommandTransport::Socket(socket) => {
                let endpoint = format!("{}-{}", Daemon::Ospfd.endpoint(), instance);
                socket.execute(&endpoint, command).await
            }
            CommandTransport::Vtysh(_) => Err(TransportError::InstancesUnsupported),
        }
    }

    pub async fn pim(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.execute(Daemon::Pimd, command).await
    }

    pub async fn zebra(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.execute(Daemon::Zebra, command).await
    }

    pub async fn vrrp(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.execute(Daemon::Vrrpd, command).await
    }

    pub async fn ldp(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.execute(Daemon::Ldpd, command).await
    }

    /// Always runs through vtysh, even with the socket transport
    pub async fn bfd(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.vtysh.execute(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    fn default_vtysh() -> Vtysh {
        Vtysh::new("/usr/bin/vtysh", false, vec![], Duration::from_secs(1))
    }

    /// Answers every command on `<dir>/<endpoint>.vty` with `<endpoint>:<command>`
    fn echo_daemon(dir: &std::path::Path, endpoint: &str) {
        let listener = UnixListener::bind(dir.join(format!("{}.vty", endpoint))).unwrap();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            loop {
                let (mut conn, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 1024];
                let n = conn.read(&mut buf).await.unwrap();
                let command = String::from_utf8_lossy(&buf[..n]).trim_end_matches('\0').to_string();
                let reply = format!("{}:{}\0", endpoint, command);
                conn.write_all(reply.as_bytes()).await.unwrap();
            }
        });
    }

    #[test]
    fn test_daemon_endpoints() {
        assert_eq!(Daemon::Bgpd.endpoint(), "bgpd");
        assert_eq!(Daemon::Zebra.endpoint(), "zebra");
        assert_eq!(Daemon::Ldpd.endpoint(), "ldpd");
    }

    #[tokio::test]
    async fn test_socket_routing_per_category() {
        let dir = tempfile::tempdir().unwrap();
        for endpoint in ["bgpd", "ospfd", "ospfd-3", "zebra", "ldpd"] {
            echo_daemon(dir.path(), endpoint);
        }

        let dispatcher = Dispatcher::new(
            CommandTransport::Socket(VtySocket::new(dir.path(), Duration::from_secs(1))),
            default_vtysh(),
        );

        assert!(dispatcher.supports_instances());
        assert_eq!(dispatcher.bgp("show bgp").await.unwrap(), b"bgpd:show bgp");
        assert_eq!(dispatcher.ospf("show ip ospf").await.unwrap(), b"ospfd:show ip ospf");
        assert_eq!(
            dispatcher.ospf_instance(3, "show ip ospf").await.unwrap(),
            b"ospfd-3:show ip ospf"
        );
        assert_eq!(dispatcher.zebra("show version").await.unwrap(), b"zebra:show version");
        assert_eq!(
            dispatcher.ldp("show mpls ldp neighbor json").await.unwrap(),
            b"ldpd:show mpls ldp neighbor json"
        );
    }

    #[tokio::test]
    async fn test_bfd_runs_vtysh_with_socket_transport() {
        let dir = tempfile::tempdir().unwrap();
        echo_daemon(dir.path(), "bfdd");
        let script = dir.path().join("vtysh");
        std::fs::write(&script, "#!/bin/sh\nprintf 'vtysh:%s' \"$2\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dispatcher = Dispatcher::new(
            CommandTransport::Socket(VtySocket::new(dir.path(), Duration::from_secs(1))),
            Vtysh::new(script, false, vec![], Duration::from_secs(5)),
        );

        assert_eq!(
            dispatcher.bfd("show bfd peers json").await.unwrap(),
            b"vtysh:show bfd peers json"
        );
    }

    #[tokio::test]
    async fn test_vtysh_rejects_instances() {
        let dispatcher = Dispatcher::new(CommandTransport::Vtysh(default_vtysh()), default_vtysh());

        assert!(!dispatcher.supports_instances());
        let err = dispatcher.ospf_instance(1, "show ip ospf").await.unwrap_err();
        assert!(matches!(err, TransportError::InstancesUnsupported));
    }

    #[test]
    fn test_timeout_classification() {
        let err = TransportError::Socket {
            path: PathBuf::from("/var/run/frr/bgpd.vty"),
            source: io::Error::new(io::ErrorKind::TimedOut, "deadline"),
        };
        assert!(err.is_timeout());

        let err = TransportError::Socket {
            path: PathBuf::from("/var/run/frr/bgpd.vty"),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(!err.is_timeout());

        let err = TransportError::CommandTimeout {
            invocation: "/usr/bin/vtysh -c show version".to_string(),
            timeout: Duration::from_millis(300),
            stderr: "daemon wedged ".to_string(),
            stdout: String::new(),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "command /usr/bin/vtysh -c show version timed out after 300ms: stderr: daemon wedged : stdout: "
        );
    }
}
