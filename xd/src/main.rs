//! xferd CLI entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::time::timeout;
use tracing::info;

use xferd::cli::{Cli, Command, HistoryCommand, OutputFormat};
use xferd::config::Config;
use xferd::domain::{TaskCode, TransferConfiguration};
use xferd::manager::TransferManager;
use xferd::protocol::LocalConnector;
use xferd::task::{HistorySaver, TaskEntry, TaskFactory, TaskManager, TaskOutcome};
use histstore::JsonStore;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xferd")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // CLI flag wins over the config file
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
        None | Some("INFO") => tracing::Level::INFO,
    };

    let log_file =
        fs::File::create(log_dir.join("xferd.log")).context("Failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref())?;

    match cli.command {
        Command::Run {
            code,
            repeat,
            data_size,
            producer_interval,
            chunk_size,
            buffer_size,
            consumer_interval,
            consumer_buffer,
            progress,
        } => {
            let transfer = TransferConfiguration {
                producer_data_size: data_size.unwrap_or(config.transfer.producer_data_size),
                producer_interval_ms: producer_interval
                    .unwrap_or(config.transfer.producer_interval_ms),
                producer_chunk_size: chunk_size.unwrap_or(config.transfer.producer_chunk_size),
                transfer_buffer_size: buffer_size.unwrap_or(config.transfer.transfer_buffer_size),
                consumer_interval_ms: consumer_interval
                    .unwrap_or(config.transfer.consumer_interval_ms),
                consumer_buffer_size: consumer_buffer
                    .unwrap_or(config.transfer.consumer_buffer_size),
            };
            run_transfers(&config, code, repeat, transfer, progress).await
        }
        Command::History { command } => match command.unwrap_or(HistoryCommand::Show {
            format: OutputFormat::Table,
        }) {
            HistoryCommand::Show { format } => show_history(&config, format),
            HistoryCommand::Clear => clear_history(&config),
        },
    }
}

fn open_store(config: &Config) -> JsonStore<TaskEntry> {
    JsonStore::new(config.storage.history_path())
}

async fn run_transfers(
    config: &Config,
    code: TaskCode,
    repeat: u32,
    transfer: TransferConfiguration,
    progress: bool,
) -> Result<()> {
    let saver = HistorySaver::new(open_store(config));
    let factory = TaskFactory::new(
        Arc::new(LocalConnector::new()),
        config.timeouts.task_timeout(),
    );
    let tasks = TaskManager::new(factory, saver);
    let manager = TransferManager::new(tasks.clone(), config.timeouts.worker_idle_timeout());

    let baseline = tasks.history().len();
    let mut history_rx = tasks.subscribe_history();
    if progress {
        spawn_progress_reporter(&manager, &tasks);
    }

    info!(code = %code, repeat, config = %transfer, "submitting transfers");
    for _ in 0..repeat {
        manager
            .enqueue_transfer(code, transfer)
            .await
            .context("transfer rejected at admission")?;
    }

    let expected = baseline + repeat as usize;
    let deadline = config.timeouts.task_timeout() * repeat.max(1) + Duration::from_secs(30);
    timeout(deadline, async {
        while history_rx.borrow_and_update().len() < expected {
            if history_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .map_err(|_| eyre::eyre!("timed out waiting for transfers to finish"))?;

    tasks.flush_history().await;

    let history = tasks.history();
    let mut failures = 0usize;
    for entry in &history[baseline..] {
        print_entry_line(entry);
        if matches!(entry.outcome, TaskOutcome::Failed { .. }) {
            failures += 1;
        }
    }
    let throughput_rx = manager.subscribe_throughput();
    let throughput = *throughput_rx.borrow();
    if let Some(throughput) = throughput {
        println!("throughput: {throughput:.1} tasks/min");
    }
    if failures > 0 {
        return Err(eyre::eyre!("{failures} of {repeat} transfers failed"));
    }
    Ok(())
}

fn spawn_progress_reporter(manager: &TransferManager, tasks: &TaskManager) {
    let mut info_rx = tasks.subscribe_information();
    let mut queue_rx = manager.subscribe_queue();
    tokio::spawn(async move {
        loop {
            if let Some(info) = info_rx.borrow_and_update().clone() {
                let queued = queue_rx.borrow_and_update().len();
                eprintln!(
                    "{} {}: {} B read / {} B written ({} queued)",
                    "progress".dimmed(),
                    info.name,
                    info.input_read,
                    info.output_written,
                    queued
                );
            }
            if info_rx.changed().await.is_err() {
                break;
            }
        }
    });
}

fn print_entry_line(entry: &TaskEntry) {
    let status = match &entry.outcome {
        TaskOutcome::Succeeded => "ok".green(),
        TaskOutcome::Cancelled => "cancelled".yellow(),
        TaskOutcome::Failed { .. } => "failed".red(),
    };
    println!(
        "{:<9} {:<6} {:>8} ms {:>10} B read {:>10} B written  {}",
        status,
        entry.name,
        entry.duration_ms,
        entry.input_read,
        entry.output_written,
        match &entry.outcome {
            TaskOutcome::Failed { message, .. } => message.as_str(),
            _ => "",
        }
    );
}

fn show_history(config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(config);
    let history = store.load().context("Failed to load task history")?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        OutputFormat::Table => {
            if history.is_empty() {
                println!("no recorded tasks");
                return Ok(());
            }
            println!(
                "{}",
                format!(
                    "{:<6} {:<25} {:>10} {:>12} {:>12}  {}",
                    "task", "started", "duration", "read", "written", "outcome"
                )
                .bold()
            );
            for entry in &history {
                println!(
                    "{:<6} {:<25} {:>7} ms {:>10} B {:>10} B  {}",
                    entry.name,
                    entry.started_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    entry.duration_ms,
                    entry.input_read,
                    entry.output_written,
                    entry.outcome
                );
                for (label, m) in &entry.measurements {
                    println!(
                        "       {:<16} n={:<5} avg={:>9.0} ns min={:>8} ns max={:>8} ns sd={:>9.0} ns",
                        label, m.count, m.average_ns(), m.min_ns, m.max_ns, m.std_deviation_ns
                    );
                }
            }
        }
    }
    Ok(())
}

fn clear_history(config: &Config) -> Result<()> {
    let store = open_store(config);
    store.save(&[]).context("Failed to clear task history")?;
    println!("task history cleared");
    Ok(())
}
