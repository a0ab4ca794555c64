use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use leasesync::{
    Config, JsonSnapshotStore, LeaseSync, Outcome, Result, RunMode, RunReport, SnapshotStore,
};

const EXIT_PARTIAL_FAILURE: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "leasesync")]
#[command(author, version, about = "Sync DHCP leases into NetBox", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "leasesync.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct Overrides {
    /// Compute and report actions without touching NetBox or the snapshot
    #[arg(long, global = true)]
    dry_run: bool,

    /// Only create and update active leases
    #[arg(long, global = true, conflicts_with = "only_expired")]
    only_new: bool,

    /// Only retire expired leases
    #[arg(long, global = true)]
    only_expired: bool,

    #[arg(long, global = true)]
    leases_file: Option<PathBuf>,

    #[arg(long, global = true)]
    snapshot_file: Option<PathBuf>,

    #[arg(long, global = true)]
    netbox_url: Option<String>,

    #[arg(long, global = true, env = "NETBOX_TOKEN", hide_env_values = true)]
    netbox_token: Option<String>,

    /// Skip TLS certificate verification for NetBox
    #[arg(long, global = true)]
    insecure: bool,

    /// Print the run report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if self.dry_run {
            config.dry_run = true;
        }
        if self.only_new {
            config.mode = RunMode::NewOnly;
        }
        if self.only_expired {
            config.mode = RunMode::ExpiredOnly;
        }
        if let Some(path) = &self.leases_file {
            config.leases_file = path.clone();
        }
        if let Some(path) = &self.snapshot_file {
            config.snapshot_file = path.clone();
        }
        if let Some(url) = &self.netbox_url {
            config.netbox.url = url.clone();
        }
        if let Some(token) = &self.netbox_token {
            config.netbox.token = token.clone();
        }
        if self.insecure {
            config.netbox.verify_tls = false;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile leases and apply the changes (default)
    Run,
    /// Classify without applying and print the planned actions
    Plan,
    ShowConfig,
    ListSnapshot,
}

fn init_logging(config: &Config, log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match config.active_log_file() {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{:<40} {:<16} {:<10} {}",
        "Address", "Action", "Outcome", "Detail"
    );
    println!("{}", "-".repeat(90));

    for action in &report.actions {
        let outcome = match &action.outcome {
            Outcome::Unchanged => "unchanged",
            Outcome::Applied => "applied",
            Outcome::Planned => "planned",
            Outcome::Skipped => "skipped",
            Outcome::Failed { .. } => "FAILED",
        };
        println!(
            "{:<40} {:<16} {:<10} {}",
            action.address.to_string(),
            action.kind.to_string(),
            outcome,
            action.detail
        );
    }

    println!();
    println!("{}", report.summary());
}

async fn run_sync(config: &Config, json: bool) -> Result<ExitCode> {
    let sync = LeaseSync::from_config(config).await?;

    let report = tokio::select! {
        result = sync.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received interrupt, stopping; the snapshot holds every action applied so far");
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if config.dry_run {
        print_report(&report);
    }

    for failure in report.failures() {
        error!(
            "{} {} failed: {:?}",
            failure.kind, failure.address, failure.outcome
        );
    }

    if report.has_failures() {
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Config::load_or_create(&cli.config)?;
    cli.overrides.apply(&mut config);

    let command = cli.command.unwrap_or(Commands::Run);
    if matches!(command, Commands::Plan) {
        config.dry_run = true;
    }

    init_logging(&config, &cli.log_level)?;

    match command {
        Commands::Run => {
            info!("Using config {:?}", cli.config);
            run_sync(&config, cli.overrides.json).await
        }
        Commands::Plan => {
            let sync = LeaseSync::from_config(&config).await?;
            let report = sync.run().await?;
            if cli.overrides.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::ShowConfig => {
            let mut shown = config.clone();
            if !shown.netbox.token.is_empty() {
                shown.netbox.token = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::ListSnapshot => {
            let store = JsonSnapshotStore::open(&config.snapshot_file).await?;
            let snapshot = store.load_all().await?;

            if snapshot.is_empty() {
                println!("Snapshot is empty.");
                return Ok(ExitCode::SUCCESS);
            }

            let now = Utc::now();
            println!(
                "{:<40} {:<20} {:<24} {:<26} {:<10}",
                "IP Address", "Hardware ID", "Hostname", "Expires At", "Remaining"
            );
            println!("{}", "-".repeat(124));

            for entry in snapshot.values() {
                let expires = entry
                    .expires_at
                    .map(|expires_at| expires_at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                let remaining = match entry.remaining_seconds(now) {
                    Some(0) => "expired".to_string(),
                    Some(seconds) => format!("{}s", seconds),
                    None => "-".to_string(),
                };

                println!(
                    "{:<40} {:<20} {:<24} {:<26} {:<10}",
                    entry.address.to_string(),
                    entry.hardware_id,
                    entry.label,
                    expires,
                    remaining
                );
            }

            Ok(ExitCode::SUCCESS)
        }
    }
}
