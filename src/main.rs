use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio_util::sync::CancellationToken;

use gandalf::cli::Args;
use gandalf::config::{load_or_default, GandalfConfig};
use gandalf::constants::{RUNTIME_SHUTDOWN_GRACE_SECS, SSH_CONNECT_TIMEOUT_SECS};
use gandalf::crypto::{CredentialProvider, StdinSecret, TerminalPrompt};
use gandalf::error::GandalfError;
use gandalf::models::{AcquisitionJob, EncryptionMethod, Mode};
use gandalf::orchestrator::run_local;
use gandalf::preflight;
use gandalf::privileges::report_privileges;
use gandalf::remote::{dispatch, resolve_targets, RemotePlan, SshConnector};

fn main() {
    let args = Args::parse();

    if let Err(e) = initialize_logging(args.verbose) {
        eprintln!("[!] {:#}", e);
    }

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[!] {}", e);
            1
        }
    };
    process::exit(code);
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> anyhow::Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(log_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
        .context("Failed to initialize logger")?;
    Ok(())
}

fn run(args: Args) -> Result<i32, GandalfError> {
    if let Some(path) = &args.init_config {
        GandalfConfig::default().save_to_yaml_file(path)?;
        return Ok(0);
    }

    let job = args.into_job()?;
    let config = load_or_default(args.config.as_deref())?;

    // dependency checks only matter where the collection actually runs
    let required_tools = match job.mode {
        Mode::Local => config.required_tools.clone(),
        Mode::Remote => Vec::new(),
    };
    preflight::check(&required_tools)?;
    report_privileges();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();

    let outcome = runtime.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current artifact");
                interrupt.cancel();
            }
        });

        match job.mode {
            Mode::Local => run_local_mode(job, config, cancel).await,
            Mode::Remote => run_remote_mode(job, config, cancel).await,
        }
    });

    // a timed-out host may still be blocked in its SSH session
    runtime.shutdown_timeout(Duration::from_secs(RUNTIME_SHUTDOWN_GRACE_SECS));
    outcome
}

async fn run_local_mode(job: AcquisitionJob, config: GandalfConfig, cancel: CancellationToken) -> Result<i32, GandalfError> {
    let credentials: Box<dyn CredentialProvider> = if job.passphrase_from_stdin {
        Box::new(StdinSecret::stdin())
    } else {
        Box::new(TerminalPrompt)
    };

    let report = tokio::task::spawn_blocking(move || run_local(&job, &config, credentials.as_ref(), &cancel))
        .await
        .map_err(|e| anyhow!("acquisition worker failed: {}", e))??;

    info!(
        "{} acquired in {:.1}s: {}",
        report.hostname,
        report.elapsed.as_secs_f64(),
        report.package.display()
    );
    if let Some(key) = &report.key_file {
        println!("[!] Key file {} is required to decrypt; store it separately", key.display());
    }
    Ok(0)
}

async fn run_remote_mode(job: AcquisitionJob, config: GandalfConfig, cancel: CancellationToken) -> Result<i32, GandalfError> {
    let prompt = TerminalPrompt;
    let user = match &job.remote.user {
        Some(user) => user.clone(),
        None => prompt.username()?,
    };
    // one passphrase for the whole batch, asked before any host is touched
    let secret = match job.encryption_method {
        EncryptionMethod::Password => Some(prompt.passphrase()?),
        _ => None,
    };

    let hosts = resolve_targets(&job.remote, &user, config.remote.port)?;
    let engine = std::env::current_exe().context("Cannot locate the running executable")?;
    let connector = Arc::new(SshConnector::new(
        config.remote.identity_file.clone(),
        Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS),
    ));
    let plan = RemotePlan::new(&job, &config, engine);

    let report = dispatch(
        hosts,
        plan,
        connector,
        secret,
        config.remote.workers,
        config.remote.host_timeout(),
        cancel,
    )
    .await?;

    Ok(report.exit_code())
}
