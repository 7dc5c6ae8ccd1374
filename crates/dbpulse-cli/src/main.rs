//! # dbpulse-cli
//!
//! Headless terminal monitor for a PostgreSQL connection. Prints a status
//! line whenever the published state changes and accepts single-letter
//! commands on stdin:
//!
//! - `r` asks for a manual reconnect
//! - `d` prints the connection details
//! - `q` stops the monitor and exits (Ctrl-C does the same)

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod view;

use dbpulse::config::DEFAULT_DATABASE_URL;
use dbpulse::{DbPulseConfig, DbPulseError, HealthMonitor, PgConnector, StatusSnapshot};

/// Headless database connection health monitor.
#[derive(Parser)]
#[command(name = "dbpulse", version, about)]
struct Cli {
    /// Path to dbpulse.toml config file
    #[arg(short, long)]
    config: Option<String>,

    /// Database connection string override
    #[arg(long)]
    url: Option<String>,

    /// Seconds between health checks
    #[arg(long)]
    interval: Option<u64>,

    /// Reconnection attempts before waiting for a manual reconnect
    #[arg(long)]
    max_retries: Option<u32>,

    /// How often the status record is polled, in milliseconds
    #[arg(long, default_value_t = 250)]
    refresh_ms: u64,

    /// Print one JSON object per status change instead of text
    #[arg(long)]
    json: bool,

    /// Enable verbose logging (set RUST_LOG for fine-grained control)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reconnect,
    Details,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "reconnect" => Some(Command::Reconnect),
        "d" | "details" => Some(Command::Details),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "dbpulse=debug,dbpulse_cli=debug"
    } else {
        "dbpulse=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    config.validate()?;

    let mut monitor = HealthMonitor::spawn(PgConnector::new(&config.database_url), &config);

    if !cli.json {
        println!("Monitoring {}", monitor.target().cyan());
        println!(
            "{}",
            "Commands: r = reconnect, d = details, q = quit".dimmed()
        );
    }

    let (command_tx, mut command_rx) = mpsc::channel(8);
    tokio::spawn(read_commands(command_tx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let status = monitor.status();
    let trigger = monitor.trigger();
    let mut refresh = tokio::time::interval(Duration::from_millis(cli.refresh_ms.max(1)));
    let mut last_shown: Option<StatusSnapshot> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            Some(command) = command_rx.recv() => match command {
                Command::Reconnect => {
                    if trigger.request() {
                        notice(cli.json, &"Manual reconnect requested".yellow().to_string());
                    } else {
                        notice(cli.json, &"Reconnect already pending".dimmed().to_string());
                    }
                }
                Command::Details => {
                    for line in view::detail_lines(&status.snapshot(), monitor.target()) {
                        notice(cli.json, &format!("  {line}"));
                    }
                }
                Command::Quit => break,
            },
            _ = refresh.tick() => {
                let snapshot = status.snapshot();
                if last_shown.as_ref() != Some(&snapshot) {
                    print_snapshot(&snapshot, cli.json);
                    last_shown = Some(snapshot);
                }
            }
        }
    }

    notice(cli.json, "Stopping monitor...");
    monitor.stop().await;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<DbPulseConfig, Box<dyn std::error::Error>> {
    let mut config = match DbPulseConfig::discover(cli.config.as_deref().map(Path::new)) {
        Ok(c) => c,
        Err(e) if cli.url.is_some() && cli.config.is_none() => {
            tracing::debug!(error = %e, "No config found; using --url");
            DbPulseConfig::new(DEFAULT_DATABASE_URL)
        }
        Err(DbPulseError::ConfigError { .. }) if cli.config.is_none() => {
            eprintln!("{} No config file found. Using defaults.", "Note:".yellow());
            eprintln!(
                "  Set {}, pass {}, or create a dbpulse.toml file.\n",
                "DBPULSE_DATABASE_URL".cyan(),
                "--url".cyan()
            );
            DbPulseConfig::new(DEFAULT_DATABASE_URL)
        }
        Err(e) => {
            eprintln!("{} {}", "Config error:".red(), e);
            return Err(e.into());
        }
    };

    if let Some(url) = &cli.url {
        config.database_url.clone_from(url);
    }
    if let Some(interval) = cli.interval {
        config.monitor.interval_secs = interval;
    }
    if let Some(max_retries) = cli.max_retries {
        config.monitor.max_retries = max_retries;
    }
    Ok(config)
}

/// Write a human-readable line. Stdout carries only snapshots in JSON mode,
/// so the line goes to `err` there.
fn write_notice(json: bool, line: &str, out: &mut impl Write, err: &mut impl Write) -> io::Result<()> {
    if json {
        writeln!(err, "{line}")
    } else {
        writeln!(out, "{line}")
    }
}

fn notice(json: bool, line: &str) {
    let _ = write_notice(json, line, &mut io::stdout().lock(), &mut io::stderr().lock());
}

fn print_snapshot(snapshot: &StatusSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("{} {}", "Failed to format JSON output:".yellow(), e),
        }
    } else {
        println!("{}", view::status_line(snapshot));
    }
}

/// Forward recognised stdin lines until EOF or the receiver goes away.
async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("Unknown command '{}' (r, d or q)", line.trim()),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin; commands disabled");
                break;
            }
        }
    }
}
