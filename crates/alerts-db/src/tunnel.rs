//! SSH local port forward to the database host.
//!
//! Runs the system `ssh` client as a child process (`ssh -N -L ...`); the
//! child is killed when the tunnel is dropped.

use std::process::Stdio;
use std::time::Duration;

use alerts_core::config::{SshTunnelConfig, expand_path};
use alerts_core::error::{AlertsError, Result};
use tokio::process::{Child, Command};

const READY_TIMEOUT: Duration = Duration::from_secs(15);
const READY_POLL: Duration = Duration::from_millis(200);

pub struct SshTunnel {
    child: Child,
    local_port: u16,
}

impl SshTunnel {
    /// Start the forward and wait until the local port accepts connections.
    pub async fn open(
        ssh: &SshTunnelConfig,
        remote_host: &str,
        remote_port: u16,
        local_port: u16,
    ) -> Result<Self> {
        let key = expand_path(&ssh.key_path);
        if !key.is_file() {
            return Err(AlertsError::config(format!("SSH key not found: {}", key.display())));
        }
        let local_port = match local_port {
            0 => free_local_port()?,
            port => port,
        };

        let args = ssh_args(ssh, &key.display().to_string(), remote_host, remote_port, local_port);
        tracing::info!(
            "Opening SSH tunnel {}@{}:{} → {remote_host}:{remote_port} on 127.0.0.1:{local_port}",
            ssh.user,
            ssh.host,
            ssh.port
        );
        let child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AlertsError::source(format!("cannot start ssh: {e}")))?;

        let mut tunnel = Self { child, local_port };
        tunnel.wait_ready().await?;
        Ok(tunnel)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// False once the ssh process has exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn wait_ready(&mut self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Err(AlertsError::source(format!("ssh exited early: {status}")));
            }
            if tokio::net::TcpStream::connect(("127.0.0.1", self.local_port))
                .await
                .is_ok()
            {
                tracing::debug!("SSH tunnel ready on port {}", self.local_port);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AlertsError::Timeout(format!(
                    "SSH tunnel not ready after {}s",
                    READY_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }
}

/// Arguments for `ssh`: no remote command, fail if the forward cannot bind,
/// never prompt.
pub fn ssh_args(
    ssh: &SshTunnelConfig,
    key_path: &str,
    remote_host: &str,
    remote_port: u16,
    local_port: u16,
) -> Vec<String> {
    vec![
        "-N".into(),
        "-o".into(),
        "ExitOnForwardFailure=yes".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        "ServerAliveInterval=30".into(),
        "-i".into(),
        key_path.into(),
        "-p".into(),
        ssh.port.to_string(),
        "-L".into(),
        format!("127.0.0.1:{local_port}:{remote_host}:{remote_port}"),
        format!("{}@{}", ssh.user, ssh.host),
    ]
}

fn free_local_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
