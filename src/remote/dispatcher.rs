use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::GandalfConfig;
use crate::constants::{
    ARCHIVE_EXTENSION, DISPATCH_SUMMARY_FILE, ENCRYPTED_EXTENSION, KEY_FILE_NAME, PARTIAL_SUFFIX,
    REMOTE_CLEANUP_TIMEOUT_SECS, TOOL_NAME,
};
use crate::crypto::Passphrase;
use crate::error::GandalfError;
use crate::models::{AcquisitionJob, EncryptionMethod, RemoteHost};
use crate::remote::ssh::{shell_quote, RemoteConnector, RemoteSession};

/// Everything a worker needs to acquire one host; identical for all hosts.
#[derive(Debug, Clone)]
pub struct RemotePlan {
    /// Local copy of the engine pushed to each host
    pub engine: PathBuf,
    pub workdir: String,
    pub sudo: bool,
    pub method: EncryptionMethod,
    pub memory_dump: bool,
    pub access_times: bool,
    pub output_dir: PathBuf,
}

impl RemotePlan {
    pub fn new(job: &AcquisitionJob, config: &GandalfConfig, engine: PathBuf) -> Self {
        Self {
            engine,
            workdir: config.remote.workdir.trim_end_matches('/').to_string(),
            sudo: config.remote.sudo,
            method: job.encryption_method,
            memory_dump: job.flags.memory_dump,
            access_times: job.flags.access_times,
            output_dir: job.output_dir.clone(),
        }
    }

    pub fn remote_engine(&self) -> String {
        format!("{}/{}", self.workdir, TOOL_NAME)
    }

    pub fn remote_output(&self) -> String {
        format!("{}/acquisitions", self.workdir)
    }

    fn sudo_prefix(&self) -> &'static str {
        if self.sudo {
            "sudo -n "
        } else {
            ""
        }
    }

    /// Command line that runs the pushed engine in local mode.
    pub fn remote_command(&self) -> String {
        let mut command = format!(
            "{}{} {} Local -o {}",
            self.sudo_prefix(),
            shell_quote(&self.remote_engine()),
            self.method,
            shell_quote(&self.remote_output())
        );
        if self.memory_dump {
            command.push_str(" -m");
        }
        if self.access_times {
            command.push_str(" -a");
        }
        if self.method == EncryptionMethod::Password {
            command.push_str(" --passphrase-stdin");
        }
        command
    }

    /// Local destination of a host's package.
    pub fn local_package(&self, host: &RemoteHost) -> PathBuf {
        let extension = match self.method {
            EncryptionMethod::None => ARCHIVE_EXTENSION.to_string(),
            _ => format!("{}.{}", ARCHIVE_EXTENSION, ENCRYPTED_EXTENSION),
        };
        self.output_dir.join(format!("{}.{}", host.address, extension))
    }

    /// Local destination of a host's key file (`Key` mode).
    pub fn local_key(&self, host: &RemoteHost) -> PathBuf {
        self.output_dir.join(format!("{}.{}", host.address, KEY_FILE_NAME))
    }
}

/// Per-host result line of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostOutcome {
    pub host: String,
    pub succeeded: bool,
    pub package: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

/// Result of a whole remote batch, written as `dispatch-summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub started_at: String,
    pub method: String,
    pub hosts: Vec<HostOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.hosts.iter().filter(|h| h.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.hosts.len() - self.succeeded()
    }

    /// `0` all hosts acquired, `2` partial, `3` none.
    pub fn exit_code(&self) -> i32 {
        match (self.succeeded(), self.failed()) {
            (_, 0) => 0,
            (0, _) => 3,
            _ => 2,
        }
    }

    pub fn write_summary(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(DISPATCH_SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize dispatch summary")?;
        fs::write(&path, json).context(format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

type Pulled = (PathBuf, Option<PathBuf>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Running,
    Published,
    Abandoned,
}

/// Time budget of one host, shared by its worker and the task awaiting it.
///
/// Files only reach the output directory through [`HostDeadline::publish`],
/// and never once the awaiting side has called [`HostDeadline::abandon`].
#[derive(Debug, Clone)]
struct HostDeadline {
    expires: Instant,
    stage: Arc<Mutex<Stage>>,
}

impl HostDeadline {
    fn new(budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            // an absurd budget saturates at a year
            expires: now.checked_add(budget).unwrap_or(now + Duration::from_secs(365 * 24 * 3600)),
            stage: Arc::new(Mutex::new(Stage::Running)),
        }
    }

    fn stage(&self) -> std::sync::MutexGuard<'_, Stage> {
        self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, stage: Stage) -> Result<Duration> {
        if stage == Stage::Abandoned {
            bail!("host abandoned");
        }
        let left = self.expires.saturating_duration_since(Instant::now());
        if left.is_zero() {
            bail!("host deadline passed");
        }
        Ok(left)
    }

    /// Time left before the deadline.
    fn remaining(&self) -> Result<Duration> {
        let stage = *self.stage();
        self.check(stage)
    }

    /// Run `step` only while the host is still wanted.
    fn publish<T>(&self, step: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut stage = self.stage();
        self.check(*stage)?;
        let value = step()?;
        *stage = Stage::Published;
        Ok(value)
    }

    /// Stop the worker from publishing. Returns `false` when it already has.
    fn abandon(&self) -> bool {
        let mut stage = self.stage();
        if *stage == Stage::Published {
            return false;
        }
        *stage = Stage::Abandoned;
        true
    }
}

/// Acquire every host through `connector`, at most `workers` at a time.
///
/// Each host is isolated: any failure, timeout or cancellation becomes a
/// failed [`HostOutcome`] and the batch carries on. Results keep input order.
pub async fn dispatch(
    hosts: Vec<RemoteHost>,
    plan: RemotePlan,
    connector: Arc<dyn RemoteConnector>,
    secret: Option<Passphrase>,
    workers: usize,
    host_timeout: Duration,
    cancel: CancellationToken,
) -> Result<BatchReport, GandalfError> {
    if plan.method == EncryptionMethod::Password && secret.is_none() {
        return Err(GandalfError::InvalidArgument("Password mode requires a passphrase".into()));
    }
    fs::create_dir_all(&plan.output_dir)
        .context(format!("Failed to create {}", plan.output_dir.display()))?;

    let started_at = Utc::now().to_rfc3339();
    let batch_id = Uuid::new_v4().to_string();
    info!("Dispatch {} to {} host(s), {} worker(s)", batch_id, hosts.len(), workers.max(1));

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let plan = Arc::new(plan);
    let secret = Arc::new(secret);

    let futures = hosts.into_iter().map(|host| {
        let semaphore = Arc::clone(&semaphore);
        let plan = Arc::clone(&plan);
        let connector = Arc::clone(&connector);
        let secret = Arc::clone(&secret);
        let cancel = cancel.clone();

        async move {
            let start = Instant::now();
            let label = host.to_string();

            // the permit stays here so an abandoned worker does not hold a slot
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    if cancel.is_cancelled() {
                        Err(anyhow!("cancelled before start"))
                    } else {
                        println!("[*] Acquiring {}", label);
                        let deadline = HostDeadline::new(host_timeout);
                        let worker_deadline = deadline.clone();
                        let worker_host = host.clone();
                        let task = tokio::task::spawn_blocking(move || {
                            acquire_host(
                                connector.as_ref(),
                                &worker_host,
                                &plan,
                                Option::as_ref(&secret),
                                &worker_deadline,
                            )
                        });
                        supervise(task, &deadline, host_timeout, &cancel).await
                    }
                }
                Err(e) => Err(anyhow!("worker pool closed: {}", e)),
            };

            let elapsed_secs = start.elapsed().as_secs_f64();
            match result {
                Ok((package, key_file)) => {
                    println!("[+] {}: {} ({:.1}s)", label, package.display(), elapsed_secs);
                    HostOutcome {
                        host: label,
                        succeeded: true,
                        package: Some(package),
                        key_file,
                        error: None,
                        elapsed_secs,
                    }
                }
                Err(e) => {
                    let failure = GandalfError::Remote { host: label.clone(), cause: e };
                    println!("[-] {}", failure);
                    error!("{}", failure);
                    HostOutcome {
                        host: label,
                        succeeded: false,
                        package: None,
                        key_file: None,
                        error: Some(failure.to_string()),
                        elapsed_secs,
                    }
                }
            }
        }
    });

    let outcomes = join_all(futures).await;
    let report = BatchReport {
        batch_id,
        started_at,
        method: plan.method.to_string(),
        hosts: outcomes,
    };

    match report.write_summary(&plan.output_dir) {
        Ok(path) => info!("Dispatch summary written to {}", path.display()),
        Err(e) => warn!("{:#}", e),
    }
    println!("[*] Remote batch: {} succeeded, {} failed", report.succeeded(), report.failed());
    Ok(report)
}

/// Wait for a host's worker until its deadline or a batch cancellation.
async fn supervise(
    mut task: JoinHandle<Result<Pulled>>,
    deadline: &HostDeadline,
    host_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Pulled> {
    let expires = tokio::time::Instant::from_std(deadline.expires);
    let interrupted = tokio::select! {
        joined = tokio::time::timeout_at(expires, &mut task) => match joined {
            Ok(joined) => return worker_result(joined),
            Err(_) => anyhow!("timed out after {:?}", host_timeout),
        },
        _ = cancel.cancelled() => anyhow!("cancelled"),
    };

    if deadline.abandon() {
        return Err(interrupted);
    }
    // its files are already in place; only the return is outstanding
    worker_result(task.await)
}

fn worker_result(joined: Result<Result<Pulled>, JoinError>) -> Result<Pulled> {
    joined.map_err(|e| anyhow!("worker panicked: {}", e))?
}

/// Point the session's timeout at whatever is left of the host budget.
fn arm(session: &mut dyn RemoteSession, deadline: &HostDeadline) -> Result<()> {
    let left = deadline.remaining()?;
    session.set_timeout(left);
    Ok(())
}

/// Connect, run the remote steps, and always attempt cleanup.
fn acquire_host(
    connector: &dyn RemoteConnector,
    host: &RemoteHost,
    plan: &RemotePlan,
    secret: Option<&Passphrase>,
    deadline: &HostDeadline,
) -> Result<Pulled> {
    let package = plan.local_package(host);
    let key = plan.local_key(host);
    if package.exists() || (plan.method == EncryptionMethod::Key && key.exists()) {
        bail!("{} already exists locally; refusing to overwrite", package.display());
    }

    let mut session = connector.connect(host)?;
    let result = run_remote_steps(session.as_mut(), plan, secret, &package, &key, deadline);

    // cleanup has its own budget so a timed-out host is not left with the engine
    session.set_timeout(Duration::from_secs(REMOTE_CLEANUP_TIMEOUT_SECS));
    let cleanup = format!("{}rm -rf {}", plan.sudo_prefix(), shell_quote(&plan.workdir));
    match session.exec(&cleanup, None) {
        Ok(output) if output.success() => debug!("Removed {} on {}", plan.workdir, host),
        Ok(output) => warn!("Cleanup on {} exited {}: {}", host, output.exit_status, output.stderr.trim()),
        Err(e) => warn!("Cleanup on {} failed: {:#}", host, e),
    }

    result
}

fn run_remote_steps(
    session: &mut dyn RemoteSession,
    plan: &RemotePlan,
    secret: Option<&Passphrase>,
    package: &Path,
    key: &Path,
    deadline: &HostDeadline,
) -> Result<Pulled> {
    arm(session, deadline)?;
    let prepare = session.exec(&format!("mkdir -p {}", shell_quote(&plan.workdir)), None)?;
    if !prepare.success() {
        bail!("could not create {}: {}", plan.workdir, prepare.stderr.trim());
    }

    arm(session, deadline)?;
    session
        .push(&plan.engine, &plan.remote_engine(), 0o755)
        .context("push of acquisition engine failed")?;

    let stdin = match (plan.method, secret) {
        (EncryptionMethod::Password, Some(secret)) => {
            let mut line = secret.expose().to_vec();
            line.push(b'\n');
            Some(Passphrase::new(line))
        }
        _ => None,
    };
    let command = plan.remote_command();
    debug!("Remote command: {}", command);
    arm(session, deadline)?;
    let run = session.exec(&command, stdin.as_ref().map(|s| s.expose()))?;
    drop(stdin);
    if !run.success() {
        bail!("remote acquisition exited {}: {}", run.exit_status, last_line(&run.stderr));
    }

    if plan.sudo {
        // root-owned output, including the 0600 key file, must be readable to pull
        arm(session, deadline)?;
        let owner = session.exec(&format!("sudo -n chown -R \"$(id -u)\" {}", shell_quote(&plan.remote_output())), None)?;
        if !owner.success() {
            warn!("chown of remote output failed: {}", owner.stderr.trim());
        }
    }

    arm(session, deadline)?;
    let names = session.list_dir(&plan.remote_output())?;
    let remote_name = select_package(&names)
        .ok_or_else(|| anyhow!("no archive found in {}", plan.remote_output()))?;
    let remote_path = format!("{}/{}", plan.remote_output(), remote_name);

    let mut wanted = vec![(remote_path, package.to_path_buf())];
    if plan.method == EncryptionMethod::Key {
        wanted.push((format!("{}/{}", plan.remote_output(), KEY_FILE_NAME), key.to_path_buf()));
    }

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (remote, local) in &wanted {
        match stage_pull(session, deadline, remote, local) {
            Ok(partial) => staged.push((partial, local.clone())),
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        }
    }
    publish_pulls(deadline, &staged)?;

    let key_file = (plan.method == EncryptionMethod::Key).then(|| key.to_path_buf());
    Ok((package.to_path_buf(), key_file))
}

/// Download `remote` next to `local` under a partial name.
fn stage_pull(session: &mut dyn RemoteSession, deadline: &HostDeadline, remote: &str, local: &Path) -> Result<PathBuf> {
    arm(session, deadline)?;
    let partial = PathBuf::from(format!("{}.{}", local.display(), PARTIAL_SUFFIX));
    match session.pull(remote, &partial) {
        Ok(bytes) => {
            debug!("Pulled {} ({} bytes) to {}", remote, bytes, partial.display());
            Ok(partial)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e.context(format!("retrieval of {} failed", remote)))
        }
    }
}

/// Move every staged download into place, all or nothing, while the host
/// is still wanted.
fn publish_pulls(deadline: &HostDeadline, staged: &[(PathBuf, PathBuf)]) -> Result<()> {
    let published = deadline.publish(|| {
        for (done, (partial, local)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(partial, local) {
                for (_, placed) in &staged[..done] {
                    let _ = fs::remove_file(placed);
                }
                return Err(anyhow!(e).context(format!("Failed to move {} into place", local.display())));
            }
        }
        Ok(())
    });
    if published.is_err() {
        discard(staged);
    }
    published
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (partial, _) in staged {
        let _ = fs::remove_file(partial);
    }
}

/// First encrypted container, else first plain archive, by name.
pub fn select_package(names: &[String]) -> Option<String> {
    let mut sorted: Vec<&String> = names.iter().collect();
    sorted.sort();

    let encrypted = format!(".{}.{}", ARCHIVE_EXTENSION, ENCRYPTED_EXTENSION);
    let plain = format!(".{}", ARCHIVE_EXTENSION);
    sorted
        .iter()
        .find(|n| n.ends_with(&encrypted))
        .or_else(|| sorted.iter().find(|n| n.ends_with(&plain)))
        .map(|n| n.to_string())
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output").trim()
}
