//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::domain::TaskCode;

/// xferd - producer/consumer transfer coordination daemon
#[derive(Debug, Parser)]
#[command(name = "xd", about = "Run and inspect coordinated producer/consumer transfers")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit transfer requests and wait for them to finish
    Run {
        /// Transfer variant to run
        #[arg(long, value_enum, default_value_t = TaskCode::Single)]
        code: TaskCode,

        /// Number of identical requests to submit
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        /// Total bytes the producer emits
        #[arg(long)]
        data_size: Option<u32>,

        /// Pause before each producer record, milliseconds
        #[arg(long)]
        producer_interval: Option<u64>,

        /// Bytes per producer record
        #[arg(long)]
        chunk_size: Option<u32>,

        /// Copy buffer size between the pipes, bytes
        #[arg(long)]
        buffer_size: Option<u32>,

        /// Pause before each consumer drain, milliseconds
        #[arg(long)]
        consumer_interval: Option<u64>,

        /// Bytes per consumer drain
        #[arg(long)]
        consumer_buffer: Option<u32>,

        /// Print live progress while transfers run
        #[arg(long)]
        progress: bool,
    },

    /// Show or clear the recorded task history
    History {
        #[command(subcommand)]
        command: Option<HistoryCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// Print recorded task entries (default)
    Show {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Delete all recorded task entries
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "xd",
            "run",
            "--code",
            "multi",
            "--repeat",
            "3",
            "--data-size",
            "4096",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                code,
                repeat,
                data_size,
                ..
            } => {
                assert_eq!(code, TaskCode::Multi);
                assert_eq!(repeat, 3);
                assert_eq!(data_size, Some(4096));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn history_defaults_to_show() {
        let cli = Cli::try_parse_from(["xd", "history"]).unwrap();
        assert!(matches!(cli.command, Command::History { command: None }));
    }
}
