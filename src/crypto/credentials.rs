//! Secrets and usernames supplied by the operator.
//!
//! Acquisition code never reads the terminal itself; it asks a
//! [`CredentialProvider`], so automation and tests can substitute their own.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};

/// A secret held in memory only as long as it is needed.
///
/// The buffer is overwritten with zeros on drop. There is deliberately no
/// `Display` impl and `Debug` prints a placeholder.
pub struct Passphrase {
    bytes: Vec<u8>,
}

impl Passphrase {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl Clone for Passphrase {
    fn clone(&self) -> Self {
        Self::new(self.bytes.clone())
    }
}

impl PartialEq for Passphrase {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        for byte in self.bytes.iter_mut() {
            // volatile so the wipe is not optimised away
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }
}

/// Source of the remote username and the `Password`-mode passphrase.
pub trait CredentialProvider: Send + Sync {
    fn username(&self) -> Result<String>;
    fn passphrase(&self) -> Result<Passphrase>;
}

/// Interactive prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl CredentialProvider for TerminalPrompt {
    fn username(&self) -> Result<String> {
        let tty = open_tty()?;
        let user = prompt_line(&tty, "Username: ", true)?;
        if user.is_empty() {
            bail!("no username entered");
        }
        Ok(user)
    }

    fn passphrase(&self) -> Result<Passphrase> {
        let tty = open_tty()?;
        let first = Passphrase::from(prompt_line(&tty, "Encryption passphrase: ", false)?);
        if first.is_empty() {
            bail!("empty passphrase");
        }
        let second = Passphrase::from(prompt_line(&tty, "Verify passphrase: ", false)?);
        if first != second {
            bail!("passphrases do not match");
        }
        Ok(first)
    }
}

fn open_tty() -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")
        .context("No controlling terminal for interactive prompt")
}

/// Print `prompt` and read one line, optionally with echo disabled.
fn prompt_line(tty: &File, prompt: &str, echo: bool) -> Result<String> {
    let mut writer = tty;
    writer.write_all(prompt.as_bytes())?;
    writer.flush()?;

    let guard = if echo { None } else { Some(EchoGuard::disable(tty)?) };
    let mut line = String::new();
    let read = BufReader::new(tty).read_line(&mut line);
    drop(guard);
    read.context("Failed to read from terminal")?;

    let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed_len);
    Ok(line)
}

/// Restores the terminal's original mode when dropped.
struct EchoGuard {
    fd: i32,
    original: libc::termios,
}

impl EchoGuard {
    fn disable(tty: &File) -> Result<Self> {
        let fd = tty.as_raw_fd();
        let mut term: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut term) } != 0 {
            return Err(io::Error::last_os_error()).context("tcgetattr failed");
        }
        let original = term;
        term.c_lflag &= !libc::ECHO;
        term.c_lflag |= libc::ECHONL;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &term) } != 0 {
            return Err(io::Error::last_os_error()).context("tcsetattr failed");
        }
        Ok(Self { fd, original })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.original);
        }
    }
}

/// Passphrase read once from a byte stream (stdin on remote invocations).
///
/// Only the first line is used; later calls return the same secret.
pub struct StdinSecret<R: Read + Send> {
    source: Mutex<Option<R>>,
    cached: Mutex<Option<Passphrase>>,
}

impl StdinSecret<io::Stdin> {
    pub fn stdin() -> Self {
        Self::from_reader(io::stdin())
    }
}

impl<R: Read + Send> StdinSecret<R> {
    pub fn from_reader(reader: R) -> Self {
        Self { source: Mutex::new(Some(reader)), cached: Mutex::new(None) }
    }
}

impl<R: Read + Send> CredentialProvider for StdinSecret<R> {
    fn username(&self) -> Result<String> {
        Err(anyhow!("no username available from a piped secret"))
    }

    fn passphrase(&self) -> Result<Passphrase> {
        let mut cached = self.cached.lock().map_err(|_| anyhow!("secret lock poisoned"))?;
        if let Some(secret) = cached.as_ref() {
            return Ok(secret.clone());
        }

        let reader = self
            .source
            .lock()
            .map_err(|_| anyhow!("secret lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("secret stream already consumed"))?;

        let mut line = String::new();
        BufReader::new(reader)
            .read_line(&mut line)
            .context("Failed to read passphrase from stdin")?;
        let secret = Passphrase::from(line.trim_end_matches(['\r', '\n']));
        line.clear();

        if secret.is_empty() {
            bail!("empty passphrase on stdin");
        }
        *cached = Some(secret.clone());
        Ok(secret)
    }
}

/// Fixed credentials for automation and tests.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub username: Option<String>,
    pub passphrase: Option<Passphrase>,
}

impl StaticCredentials {
    pub fn new(username: Option<String>, passphrase: Option<&str>) -> Self {
        Self { username, passphrase: passphrase.map(Passphrase::from) }
    }
}

impl CredentialProvider for StaticCredentials {
    fn username(&self) -> Result<String> {
        self.username.clone().ok_or_else(|| anyhow!("no username configured"))
    }

    fn passphrase(&self) -> Result<Passphrase> {
        self.passphrase.clone().ok_or_else(|| anyhow!("no passphrase configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_debug_is_redacted() {
        let secret = Passphrase::from("hunter2");
        assert_eq!(format!("{:?}", secret), "Passphrase(<redacted>)");
        assert_eq!(secret.expose(), b"hunter2");
    }

    #[test]
    fn test_stdin_secret_reads_first_line_once() {
        let provider = StdinSecret::from_reader(Cursor::new(b"s3cret\nignored\n".to_vec()));
        assert_eq!(provider.passphrase().unwrap().expose(), b"s3cret");
        assert_eq!(provider.passphrase().unwrap().expose(), b"s3cret");
        assert!(provider.username().is_err());
    }

    #[test]
    fn test_stdin_secret_rejects_empty() {
        let provider = StdinSecret::from_reader(Cursor::new(b"\n".to_vec()));
        assert!(provider.passphrase().is_err());
    }

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new(Some("ir".into()), Some("pw"));
        assert_eq!(creds.username().unwrap(), "ir");
        assert_eq!(creds.passphrase().unwrap().expose(), b"pw");

        let empty = StaticCredentials::new(None, None);
        assert!(empty.username().is_err());
        assert!(empty.passphrase().is_err());
    }
}
