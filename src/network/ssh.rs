// file: src/network/ssh.rs
// version: 2.0.0
// guid: t0u1v2w3-x4y5-6789-0123-456789tuvwxy

//! SSH client for remote node operations
//!
//! `ssh2` is blocking; callers run these methods on the blocking pool.

use super::executor::CommandOutput;
use crate::config::NodeConfig;
use crate::error::InstallerError;
use crate::Result;
use ssh2::Session;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One authenticated session to one node
pub struct SshClient {
    session: Option<Session>,
    host: String,
    user: String,
}

impl SshClient {
    /// Connect and authenticate, failing if it takes longer than the node's SSH timeout
    pub fn connect(node: &NodeConfig) -> Result<Self> {
        info!("Connecting to {} as {}", node.address(), node.ssh_user);

        let timeout = node.ssh_timeout();
        let addr = resolve(node)?;
        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            InstallerError::connectivity(&node.host, format!("Failed to connect to {}: {}", addr, e))
        })?;

        let mut session = Session::new().map_err(|e| {
            InstallerError::connectivity(&node.host, format!("Failed to create SSH session: {}", e))
        })?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(timeout));
        session.handshake().map_err(|e| {
            InstallerError::connectivity(&node.host, format!("SSH handshake failed: {}", e))
        })?;

        authenticate(&session, node)?;

        info!("SSH connection established to {}", node.host);
        Ok(Self {
            session: Some(session),
            host: node.host.clone(),
            user: node.ssh_user.clone(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| InstallerError::connectivity(&self.host, "No active SSH session"))
    }

    fn transport_error(&self, context: &str, e: impl std::fmt::Display) -> InstallerError {
        InstallerError::connectivity(&self.host, format!("{}: {}", context, e))
    }

    fn io_error(&self, context: &str, e: std::io::Error, command: &str) -> InstallerError {
        if e.kind() == ErrorKind::TimedOut {
            InstallerError::timeout(format!(
                "Command timed out on {}: {}",
                self.host, command
            ))
        } else {
            self.transport_error(context, e)
        }
    }

    /// Execute a command, escalating through sudo for non-root users
    pub fn execute(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let wrapped = privileged(command, &self.user);
        debug!("Executing on {}: {}", self.host, command);

        let session = self.session()?;
        session.set_timeout(millis(timeout));

        let mut channel = session
            .channel_session()
            .map_err(|e| self.transport_error("Failed to create SSH channel", e))?;
        channel
            .exec(&wrapped)
            .map_err(|e| self.transport_error("Failed to execute command", e))?;

        // Both streams share one channel window; draining them in turns keeps a
        // chatty stderr from stalling stdout.
        session.set_blocking(false);
        let drained = {
            let mut out = channel.stream(0);
            let mut err = channel.stderr();
            drain_streams(&mut out, &mut err, || channel.eof(), Instant::now() + timeout)
        };
        session.set_blocking(true);
        let (stdout, stderr) =
            drained.map_err(|e| self.io_error("Failed to read command output", e, command))?;

        channel
            .wait_close()
            .map_err(|e| self.transport_error("Failed to close SSH channel", e))?;
        let exit_status = channel
            .exit_status()
            .map_err(|e| self.transport_error("Failed to get exit status", e))?;

        if exit_status != 0 {
            debug!("Command on {} exited with {}", self.host, exit_status);
        }
        Ok(CommandOutput::new(exit_status, stdout, stderr))
    }

    /// Download a file from the node over SCP
    pub fn download_file(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        info!(
            "Downloading {}:{} to {}",
            self.host,
            remote_path,
            local_path.display()
        );

        let session = self.session()?;
        let (mut remote_file, stat) = session
            .scp_recv(Path::new(remote_path))
            .map_err(|e| self.transport_error("Failed to create SCP receive channel", e))?;

        let mut contents = Vec::new();
        remote_file
            .read_to_end(&mut contents)
            .map_err(|e| self.transport_error("Failed to read remote file", e))?;

        if contents.len() as u64 != stat.size() {
            return Err(self.transport_error(
                "File size mismatch during download",
                format!("expected {} bytes, got {}", stat.size(), contents.len()),
            ));
        }

        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local_path, contents)?;

        let closed = remote_file
            .send_eof()
            .and_then(|_| remote_file.wait_eof());
        closed.map_err(|e| self.transport_error("Failed to finish SCP transfer", e))?;
        remote_file
            .close()
            .map_err(|e| self.transport_error("Failed to close SCP channel", e))?;
        remote_file
            .wait_close()
            .map_err(|e| self.transport_error("Failed to close SCP channel", e))?;

        info!("File download completed");
        Ok(())
    }

    /// Disconnect SSH session
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "installation finished", None);
            info!("SSH session to {} disconnected", self.host);
        }
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Read `stdout` and `stderr` in turns until both report end of stream
///
/// Readers may be non-blocking: `WouldBlock` means no data yet. An empty
/// read only closes a stream once `finished` reports end of input, and the
/// read fails with `TimedOut` once `deadline` passes.
fn drain_streams<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut finished: impl FnMut() -> bool,
    deadline: Instant,
) -> std::io::Result<(String, String)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_open = true;
    let mut err_open = true;
    let mut buf = [0u8; 8192];

    while out_open || err_open {
        let mut progressed = false;
        if out_open {
            match read_chunk(stdout, &mut buf, &mut out)? {
                Some(0) => out_open = !finished(),
                Some(_) => progressed = true,
                None => {}
            }
        }
        if err_open {
            match read_chunk(stderr, &mut buf, &mut err)? {
                Some(0) => err_open = !finished(),
                Some(_) => progressed = true,
                None => {}
            }
        }

        if progressed || !(out_open || err_open) {
            continue;
        }
        if Instant::now() >= deadline {
            return Err(std::io::Error::new(
                ErrorKind::TimedOut,
                "command output not complete before timeout",
            ));
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// `Some(n)` bytes appended (0 at end of stream), `None` when nothing is ready
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8], sink: &mut Vec<u8>) -> std::io::Result<Option<usize>> {
    match reader.read(buf) {
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(Some(n))
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => Ok(None),
        Err(e) => Err(e),
    }
}

fn millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn resolve(node: &NodeConfig) -> Result<SocketAddr> {
    node.address()
        .to_socket_addrs()
        .map_err(|e| {
            InstallerError::connectivity(&node.host, format!("Failed to resolve {}: {}", node.host, e))
        })?
        .next()
        .ok_or_else(|| InstallerError::connectivity(&node.host, "Host resolved to no addresses"))
}

/// Try key file, then password, then the SSH agent
fn authenticate(session: &Session, node: &NodeConfig) -> Result<()> {
    let user = node.ssh_user.as_str();
    let mut attempts = Vec::new();

    if let Some(key) = node.expanded_key_path() {
        match session.userauth_pubkey_file(user, None, &key, node.ssh_key_passphrase.as_deref()) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("Key authentication to {} failed: {}", node.host, e);
                attempts.push(format!("key {}: {}", key.display(), e));
            }
        }
    }

    if let Some(password) = node.ssh_password.as_deref() {
        match session.userauth_password(user, password) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("Password authentication to {} failed: {}", node.host, e);
                attempts.push(format!("password: {}", e));
            }
        }
    }

    match session.userauth_agent(user) {
        Ok(()) if session.authenticated() => Ok(()),
        Ok(()) => {
            attempts.push("agent: not authenticated".to_string());
            Err(auth_failure(node, &attempts))
        }
        Err(e) => {
            attempts.push(format!("agent: {}", e));
            Err(auth_failure(node, &attempts))
        }
    }
}

fn auth_failure(node: &NodeConfig, attempts: &[String]) -> InstallerError {
    InstallerError::connectivity(
        &node.host,
        format!(
            "SSH authentication failed for {}: {}",
            node.ssh_user,
            attempts.join("; ")
        ),
    )
}

/// Wrap a command so it runs as root regardless of the login user
pub fn privileged(command: &str, user: &str) -> String {
    if user == "root" {
        command.to_string()
    } else {
        format!("sudo -n bash -c '{}'", command.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_leaves_root_commands_alone() {
        assert_eq!(privileged("kubeadm reset -f", "root"), "kubeadm reset -f");
    }

    #[test]
    fn test_privileged_quotes_single_quotes() {
        let wrapped = privileged("echo 'connectivity_test'", "ubuntu");
        assert_eq!(
            wrapped,
            r"sudo -n bash -c 'echo '\''connectivity_test'\'''"
        );
    }

    /// Hands out `chunks` one per read, answering `WouldBlock` in between
    struct Trickle {
        chunks: Vec<Vec<u8>>,
        ready: bool,
    }

    impl Trickle {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().rev().map(|c| c.to_vec()).collect(),
                ready: false,
            }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.ready {
                self.ready = true;
                return Err(ErrorKind::WouldBlock.into());
            }
            self.ready = false;
            match self.chunks.pop() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_drain_streams_reads_heavy_stderr_alongside_stdout() {
        // Arrange
        let noise = vec![b'w'; 64 * 1024];
        let mut stdout = Trickle::new(&[b"node-1   Ready\n"]);
        let mut stderr = std::io::Cursor::new(noise.clone());

        // Act
        let (out, err) = drain_streams(
            &mut stdout,
            &mut stderr,
            || true,
            Instant::now() + Duration::from_secs(5),
        )
        .unwrap();

        // Assert
        assert_eq!(out, "node-1   Ready\n");
        assert_eq!(err.len(), noise.len());
    }

    #[test]
    fn test_drain_streams_times_out_on_silent_command() {
        struct Silent;
        impl Read for Silent {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(ErrorKind::WouldBlock.into())
            }
        }

        let result = drain_streams(
            &mut Silent,
            &mut Silent,
            || false,
            Instant::now() + Duration::from_millis(30),
        );

        assert_eq!(result.unwrap_err().kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_secs(30)), 30_000);
        assert_eq!(millis(Duration::from_secs(u64::MAX / 1000)), u32::MAX);
    }
}
