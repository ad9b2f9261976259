use anyhow::{Context, Result, bail};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::Settings;
use crate::core::lifecycle::LifecycleManager;
use crate::core::report;
use crate::core::scheduler::{CronTriggerEngine, JobStatus};
use crate::core::storage::JobStore;
use crate::core::terminal::{self, GuideSection, print_info, print_step, print_success, print_warn};
use crate::interfaces::telegram::TelegramGateway;
use crate::logging;
use crate::platform::{NativePlatform, Platform};
use crate::plugins::builtin_catalog;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Bot")
        .command("run", "Start the bot (default)")
        .print();

    GuideSection::new("Jobs")
        .command("jobs", "List stored plugin jobs")
        .command("status <job_id>", "Show one job in detail")
        .command("enable <job_id>", "Mark a job enabled")
        .command("disable <job_id>", "Mark a job disabled")
        .print();

    GuideSection::new("Options")
        .command("--data-dir <path>", "Use another data directory")
        .command("help", "Show this guide")
        .print();

    println!(
        "\n {} {} [--data-dir <path>] <command> [job_id]\n",
        style("Usage:").bold(),
        style("plugbot").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CliCommand {
    Run,
    Jobs,
    Status(String),
    Enable(String),
    Disable(String),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub command: CliCommand,
    pub data_dir: Option<PathBuf>,
}

/// `args[0]` is the binary name. Flags may appear anywhere.
pub(crate) fn parse_cli_args(args: &[String]) -> Result<CliArgs, String> {
    let mut data_dir = None;
    let mut positional: Vec<&str> = Vec::new();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    data_dir = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    return Err("--data-dir needs a path".to_string());
                }
            }
            "--help" | "-h" => {
                positional.insert(0, "help");
                i += 1;
            }
            other => {
                positional.push(other);
                i += 1;
            }
        }
    }

    let job_id = |cmd: &str| -> Result<String, String> {
        positional
            .get(1)
            .map(|s| s.to_string())
            .ok_or_else(|| format!("'{}' needs a job id", cmd))
    };

    let command = match positional.first().copied() {
        None | Some("run") => CliCommand::Run,
        Some("jobs") | Some("list") => CliCommand::Jobs,
        Some("status") => CliCommand::Status(job_id("status")?),
        Some("enable") => CliCommand::Enable(job_id("enable")?),
        Some("disable") => CliCommand::Disable(job_id("disable")?),
        Some("help") => CliCommand::Help,
        Some(other) => return Err(format!("Unknown command '{}'", other)),
    };
    Ok(CliArgs { command, data_dir })
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let parsed = match parse_cli_args(&args) {
        Ok(parsed) => parsed,
        Err(msg) => {
            print_help();
            bail!(msg);
        }
    };

    if parsed.command == CliCommand::Help {
        print_help();
        return Ok(());
    }

    let data_dir = parsed.data_dir.unwrap_or_else(NativePlatform::data_dir);
    let settings = Settings::load(&data_dir).await?;

    match parsed.command {
        CliCommand::Run => run_bot(settings).await,
        CliCommand::Jobs => list_jobs(&settings).await,
        CliCommand::Status(job_id) => show_status(&settings, &job_id).await,
        CliCommand::Enable(job_id) => set_active(&settings, &job_id, true).await,
        CliCommand::Disable(job_id) => set_active(&settings, &job_id, false).await,
        CliCommand::Help => Ok(()),
    }
}

async fn run_bot(settings: Settings) -> Result<()> {
    logging::init(&settings);
    terminal::print_banner();

    let creds = settings.validate_for_run()?;
    print_step("Starting plugbot");
    terminal::print_status("Data dir", &settings.data_dir.display().to_string());
    terminal::print_status("Job store", &settings.storage_dir().display().to_string());
    let settings = Arc::new(settings);
    let store = Arc::new(JobStore::open(settings.storage_dir()).await?);
    let triggers = Arc::new(CronTriggerEngine::new().await?);
    let gateway = Arc::new(TelegramGateway::new(
        &creds.token,
        settings.poll_timeout_secs,
    ));

    let mut lifecycle =
        LifecycleManager::new(settings.clone(), store, triggers, gateway, builtin_catalog);
    let report = match lifecycle.start().await {
        Ok(report) => report,
        Err(e) => {
            if let Err(shutdown_err) = lifecycle.shutdown().await {
                warn!("Shutdown after failed start: {}", shutdown_err);
            }
            return Err(e.context("bootstrap failed"));
        }
    };

    if report.failed > 0 {
        print_warn(&format!(
            "{} stored job(s) could not be restored, see the log for details",
            report.failed
        ));
    }
    print_success(&format!(
        "plugbot is running with {} restored job(s). Press Ctrl+C to stop.",
        report.restored()
    ));
    shutdown_signal().await;

    print_info("Shutting down...");
    lifecycle.shutdown().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn open_store(settings: &Settings) -> Result<JobStore> {
    let dir = settings.storage_dir();
    JobStore::open(&dir)
        .await
        .with_context(|| format!("Cannot open job store at {}", dir.display()))
}

async fn list_jobs(settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let records = store.list().await?;
    println!("{}", report::format_listing(&records));
    Ok(())
}

async fn show_status(settings: &Settings, job_id: &str) -> Result<()> {
    let store = open_store(settings).await?;
    let Some(record) = store.read(job_id).await? else {
        bail!("Plugin {} not found.", job_id);
    };
    let status = JobStatus {
        record,
        loaded: false,
        timer: None,
    };
    println!("{}", report::format_status(&status));
    Ok(())
}

/// Only the stored flag changes; a running bot picks it up on the next invocation.
async fn set_active(settings: &Settings, job_id: &str, active: bool) -> Result<()> {
    let store = open_store(settings).await?;
    let word = if active { "enabled" } else { "disabled" };
    match store.read(job_id).await? {
        None => bail!("Plugin {} not found.", job_id),
        Some(record) if record.is_active() == active => {
            print_info(&format!("Plugin {} is already {}.", job_id, word));
        }
        Some(_) => {
            store.set_active(job_id, active).await?;
            print_success(&format!("Plugin {} {} in storage.", job_id, word));
        }
    }
    Ok(())
}
