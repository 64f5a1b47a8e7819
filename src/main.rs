use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use geotrail::alerts::{run_watchdog, Notifier};
use geotrail::config::{AppConfig, ConfigKey};
use geotrail::reports::{FlightsReport, PassportReport};
use geotrail::server::{serve, AppState};
use geotrail::{refresh, HeartbeatClock, LocationStore, RawArchive, RefreshOptions};

#[derive(Parser)]
#[command(name = "geotrail", version)]
#[command(about = "Personal GPS ingestion and travel reports", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "GEOTRAIL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and the heartbeat watchdog
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load the raw file tree into the database
    Refresh {
        /// Delete all rows before loading
        #[arg(long)]
        rebuild: bool,
        /// Accuracy threshold in meters
        #[arg(long)]
        max_accuracy: Option<f64>,
    },
    /// Print configuration values
    Config(ConfigArgs),
    /// Print flight statistics as JSON
    Flights,
    /// Print visited countries as JSON
    Passport,
}

#[derive(Args)]
struct ConfigArgs {
    /// Show all configuration values
    #[arg(long)]
    all: bool,
    #[arg(long)]
    project_name: bool,
    #[arg(long)]
    project_version: bool,
    #[arg(long)]
    data_api_port: bool,
    #[arg(long)]
    raw_data_dir: bool,
    #[arg(long)]
    db_file: bool,
    #[arg(long)]
    max_horizontal_accuracy: bool,
    #[arg(long)]
    default_location: bool,
    #[arg(long)]
    flights_file: bool,
    #[arg(long)]
    airports_file: bool,
    #[arg(long)]
    countries_file: bool,
    #[arg(long)]
    visited_file: bool,
}

impl ConfigArgs {
    fn selected(&self) -> Option<ConfigKey> {
        [
            (self.project_name, ConfigKey::ProjectName),
            (self.project_version, ConfigKey::ProjectVersion),
            (self.data_api_port, ConfigKey::DataApiPort),
            (self.raw_data_dir, ConfigKey::RawDataDir),
            (self.db_file, ConfigKey::DbFile),
            (self.max_horizontal_accuracy, ConfigKey::MaxHorizontalAccuracy),
            (self.default_location, ConfigKey::DefaultLocation),
            (self.flights_file, ConfigKey::FlightsFile),
            (self.airports_file, ConfigKey::AirportsFile),
            (self.countries_file, ConfigKey::CountriesFile),
            (self.visited_file, ConfigKey::VisitedFile),
        ]
        .into_iter()
        .find_map(|(set, key)| set.then_some(key))
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { port } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")?;
            runtime.block_on(run_server(config, port))?;
        }
        Commands::Refresh {
            rebuild,
            max_accuracy,
        } => {
            let options = RefreshOptions {
                max_horizontal_accuracy: max_accuracy.unwrap_or(config.max_horizontal_accuracy),
                rebuild,
            };
            let archive = RawArchive::new(&config.raw_data_dir);
            let mut store = LocationStore::open(&config.db_file)
                .with_context(|| format!("failed to open {}", config.db_file.display()))?;
            let report = refresh(&archive, &mut store, &options)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config(args) => {
            if args.all {
                for line in config.render_all() {
                    println!("{line}");
                }
            } else if let Some(key) = args.selected() {
                println!("{}", config.value(key));
            } else {
                eprintln!("Error: No config key specified. Use --help to see available options.");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Flights => {
            let report = FlightsReport::load(
                &config.flights_file,
                &config.airports_file,
                &config.countries_file,
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Passport => {
            let report = PassportReport::load(&config.visited_file, &config.countries_file)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_server(config: AppConfig, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(config.data_api_port);
    let store = LocationStore::open(&config.db_file)
        .with_context(|| format!("failed to open {}", config.db_file.display()))?;
    log::info!("Opened database {}", config.db_file.display());

    let notifier = Notifier::from_credentials(
        config.telegram.token.as_deref(),
        config.telegram.chat_id.as_deref(),
    )?;
    let clock = HeartbeatClock::default();
    tokio::spawn(run_watchdog(
        clock.clone(),
        config.alert_schedule.clone(),
        config.quiet_hours(),
        notifier,
    ));

    let state = AppState::new(config, store, clock);
    serve(state, port).await?;
    Ok(())
}
