//! Application configuration.
//!
//! Values come from an optional TOML file; every key has a default so an
//! empty (or absent) file is valid. Telegram credentials can also be given
//! through `TELEGRAM_TOKEN` / `TELEGRAM_CHAT_ID`, which take precedence.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailError};
use crate::refresh::DEFAULT_MAX_HORIZONTAL_ACCURACY;
use crate::watchdog::{AlertSchedule, QuietHours};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "geotrail.toml";

pub const TOKEN_ENV: &str = "TELEGRAM_TOKEN";
pub const CHAT_ID_ENV: &str = "TELEGRAM_CHAT_ID";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub token: Option<String>,
    pub chat_id: Option<String>,
}

/// All settings of the tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port of the ingestion/reporting server.
    /// Default: 5003
    pub data_api_port: u16,

    /// Root of the partitioned raw file tree.
    /// Default: "raw_data"
    pub raw_data_dir: PathBuf,

    /// SQLite database file.
    /// Default: "cache/geo_data.db"
    pub db_file: PathBuf,

    /// Points with a worse accuracy (meters) are not loaded.
    /// Default: 200.0
    pub max_horizontal_accuracy: f64,

    /// Place name used to center maps when there is no data.
    /// Default: "Berlin, De"
    pub default_location: String,

    /// Default: "data/flights.json"
    pub flights_file: PathBuf,

    /// Default: "data/airports.json"
    pub airports_file: PathBuf,

    /// Default: "data/countries.json"
    pub countries_file: PathBuf,

    /// Default: "data/visited.json"
    pub visited_file: PathBuf,

    /// Heartbeat alert thresholds in seconds.
    /// Default: [60, 300, 600, 3600]
    pub alert_schedule: AlertSchedule,

    /// Local hour before which alerts are held back.
    /// Default: 7
    pub quiet_until_hour: u32,

    pub telegram: TelegramSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_api_port: 5003,
            raw_data_dir: PathBuf::from("raw_data"),
            db_file: PathBuf::from("cache/geo_data.db"),
            max_horizontal_accuracy: DEFAULT_MAX_HORIZONTAL_ACCURACY,
            default_location: "Berlin, De".to_string(),
            flights_file: PathBuf::from("data/flights.json"),
            airports_file: PathBuf::from("data/airports.json"),
            countries_file: PathBuf::from("data/countries.json"),
            visited_file: PathBuf::from("data/visited.json"),
            alert_schedule: AlertSchedule::default(),
            quiet_until_hour: 7,
            telegram: TelegramSettings::default(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| TrailError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if present, or use
    /// defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::read_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| TrailError::io(path, e))?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Override Telegram credentials from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.telegram.token = Some(token);
        }
        if let Some(chat_id) = lookup(CHAT_ID_ENV).filter(|v| !v.is_empty()) {
            self.telegram.chat_id = Some(chat_id);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_horizontal_accuracy.is_nan() || self.max_horizontal_accuracy <= 0.0 {
            return Err(TrailError::Config {
                message: "max_horizontal_accuracy must be positive".to_string(),
            });
        }
        if self.quiet_until_hour > 23 {
            return Err(TrailError::Config {
                message: "quiet_until_hour must be between 0 and 23".to_string(),
            });
        }
        Ok(())
    }

    pub fn quiet_hours(&self) -> QuietHours {
        QuietHours {
            until_hour: self.quiet_until_hour,
        }
    }

    pub fn value(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::ProjectName => env!("CARGO_PKG_NAME").to_string(),
            ConfigKey::ProjectVersion => env!("CARGO_PKG_VERSION").to_string(),
            ConfigKey::DataApiPort => self.data_api_port.to_string(),
            ConfigKey::RawDataDir => self.raw_data_dir.display().to_string(),
            ConfigKey::DbFile => self.db_file.display().to_string(),
            ConfigKey::MaxHorizontalAccuracy => self.max_horizontal_accuracy.to_string(),
            ConfigKey::DefaultLocation => self.default_location.clone(),
            ConfigKey::FlightsFile => self.flights_file.display().to_string(),
            ConfigKey::AirportsFile => self.airports_file.display().to_string(),
            ConfigKey::CountriesFile => self.countries_file.display().to_string(),
            ConfigKey::VisitedFile => self.visited_file.display().to_string(),
        }
    }

    /// `key=value` lines for every printable key.
    pub fn render_all(&self) -> Vec<String> {
        ConfigKey::ALL
            .iter()
            .map(|&key| format!("{}={}", key.name(), self.value(key)))
            .collect()
    }
}

/// Keys printable by the `config` command. Credentials are never printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ProjectName,
    ProjectVersion,
    DataApiPort,
    RawDataDir,
    DbFile,
    MaxHorizontalAccuracy,
    DefaultLocation,
    FlightsFile,
    AirportsFile,
    CountriesFile,
    VisitedFile,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 11] = [
        ConfigKey::ProjectName,
        ConfigKey::ProjectVersion,
        ConfigKey::DataApiPort,
        ConfigKey::RawDataDir,
        ConfigKey::DbFile,
        ConfigKey::MaxHorizontalAccuracy,
        ConfigKey::DefaultLocation,
        ConfigKey::FlightsFile,
        ConfigKey::AirportsFile,
        ConfigKey::CountriesFile,
        ConfigKey::VisitedFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::ProjectName => "project_name",
            ConfigKey::ProjectVersion => "project_version",
            ConfigKey::DataApiPort => "data_api_port",
            ConfigKey::RawDataDir => "raw_data_dir",
            ConfigKey::DbFile => "db_file",
            ConfigKey::MaxHorizontalAccuracy => "max_horizontal_accuracy",
            ConfigKey::DefaultLocation => "default_location",
            ConfigKey::FlightsFile => "flights_file",
            ConfigKey::AirportsFile => "airports_file",
            ConfigKey::CountriesFile => "countries_file",
            ConfigKey::VisitedFile => "visited_file",
        }
    }
}
