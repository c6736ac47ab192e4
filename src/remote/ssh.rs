//! SSH transport for remote dispatch.
//!
//! The dispatcher only speaks to [`RemoteConnector`] and [`RemoteSession`];
//! [`SshConnector`] is the `ssh2` implementation used in production.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use ssh2::Session;

use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::models::RemoteHost;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An authenticated connection to one host.
pub trait RemoteSession: Send {
    /// Run `command` through the remote shell, optionally feeding `stdin`.
    fn exec(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput>;

    /// Copy a local file to `remote` with the given permission bits.
    fn push(&mut self, local: &Path, remote: &str, mode: i32) -> Result<()>;

    /// Copy `remote` into `local`, returning the number of bytes written.
    fn pull(&mut self, remote: &str, local: &Path) -> Result<u64>;

    /// File names (not paths) in a remote directory.
    fn list_dir(&mut self, remote: &str) -> Result<Vec<String>>;

    /// Upper bound for each blocking call that follows.
    fn set_timeout(&mut self, _timeout: Duration) {}
}

/// Opens sessions; shared by every dispatch worker.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, host: &RemoteHost) -> Result<Box<dyn RemoteSession>>;
}

/// `ssh2`-backed connector.
#[derive(Debug, Clone)]
pub struct SshConnector {
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(identity_file: Option<PathBuf>, connect_timeout: Duration) -> Self {
        Self { identity_file, connect_timeout }
    }

    /// Identity files tried after the agent, in order.
    fn identity_candidates(&self) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = self.identity_file.iter().cloned().collect();
        if let Some(home) = std::env::var_os("HOME") {
            let ssh_dir = PathBuf::from(home).join(".ssh");
            candidates.push(ssh_dir.join("id_ed25519"));
            candidates.push(ssh_dir.join("id_rsa"));
        }
        candidates
    }

    fn authenticate(&self, session: &Session, user: &str) -> Result<()> {
        match session.userauth_agent(user) {
            Ok(()) if session.authenticated() => {
                debug!("Authenticated {} via ssh-agent", user);
                return Ok(());
            }
            Ok(()) => {}
            Err(e) => debug!("ssh-agent authentication unavailable: {}", e),
        }

        let mut attempted = Vec::new();
        for key in self.identity_candidates() {
            if !key.exists() {
                continue;
            }
            match session.userauth_pubkey_file(user, None, &key, None) {
                Ok(()) if session.authenticated() => {
                    debug!("Authenticated {} with {}", user, key.display());
                    return Ok(());
                }
                Ok(()) => attempted.push(key.display().to_string()),
                Err(e) => {
                    debug!("Key {} rejected: {}", key.display(), e);
                    attempted.push(key.display().to_string());
                }
            }
        }

        if attempted.is_empty() {
            bail!("authentication failed for {}: no agent identity and no key files found", user);
        }
        bail!("authentication failed for {} (tried agent, {})", user, attempted.join(", "))
    }
}

impl RemoteConnector for SshConnector {
    fn connect(&self, host: &RemoteHost) -> Result<Box<dyn RemoteSession>> {
        let address = (host.address.as_str(), host.port)
            .to_socket_addrs()
            .context(format!("Failed to resolve {}", host.address))?
            .next()
            .ok_or_else(|| anyhow!("{} resolved to no addresses", host.address))?;

        let tcp = TcpStream::connect_timeout(&address, self.connect_timeout)
            .context(format!("Failed to connect to {}:{}", host.address, host.port))?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(self.connect_timeout));
        session.handshake().context("Failed to perform SSH handshake")?;
        self.authenticate(&session, &host.user)?;

        // the dispatcher re-arms the timeout with the host's remaining budget
        info!("Connected to {}", host);
        Ok(Box::new(SshSession { session }))
    }
}

struct SshSession {
    session: Session,
}

/// `ssh2` reads 0 as "no timeout", so the bound never drops below 1ms.
fn timeout_millis(timeout: Duration) -> u32 {
    timeout.as_millis().clamp(1, u32::MAX as u128) as u32
}

impl RemoteSession for SshSession {
    fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(timeout_millis(timeout));
    }

    fn exec(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput> {
        let mut channel = self.session.channel_session().context("Failed to open channel")?;
        channel.exec(command).context(format!("Failed to start '{}'", command))?;

        if let Some(input) = stdin {
            channel.write_all(input).context("Failed to write remote stdin")?;
        }
        channel.send_eof().context("Failed to close remote stdin")?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).context("Failed to read remote stdout")?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .context("Failed to read remote stderr")?;

        channel.wait_close().context("Failed to close channel")?;
        let exit_status = channel.exit_status().context("No exit status")?;

        Ok(ExecOutput { stdout, stderr, exit_status })
    }

    fn push(&mut self, local: &Path, remote: &str, mode: i32) -> Result<()> {
        let mut source = File::open(local).context(format!("Failed to open {}", local.display()))?;
        let size = source.metadata()?.len();

        let mut channel = self
            .session
            .scp_send(Path::new(remote), mode, size, None)
            .context(format!("Failed to start upload to {}", remote))?;
        copy_buffered(&mut source, &mut channel).context(format!("Upload to {} failed", remote))?;

        channel.send_eof()?;
        channel.wait_eof()?;
        channel.close()?;
        channel.wait_close()?;
        debug!("Pushed {} ({} bytes) to {}", local.display(), size, remote);
        Ok(())
    }

    fn pull(&mut self, remote: &str, local: &Path) -> Result<u64> {
        let (mut channel, stat) = self
            .session
            .scp_recv(Path::new(remote))
            .context(format!("Failed to start download of {}", remote))?;

        let mut dest = File::create(local).context(format!("Failed to create {}", local.display()))?;
        let copied = copy_buffered(&mut channel, &mut dest).context(format!("Download of {} failed", remote))?;
        dest.sync_all()?;

        channel.send_eof()?;
        channel.wait_eof()?;
        channel.close()?;
        channel.wait_close()?;

        if copied != stat.size() {
            let _ = fs::remove_file(local);
            bail!("short download of {}: {} of {} bytes", remote, copied, stat.size());
        }
        Ok(copied)
    }

    fn list_dir(&mut self, remote: &str) -> Result<Vec<String>> {
        let sftp = self.session.sftp().context("Failed to create SFTP subsystem")?;
        let entries = sftp
            .readdir(Path::new(remote))
            .context(format!("Failed to list {}", remote))?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }
}

fn copy_buffered<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<u64> {
    let mut buffer = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}
