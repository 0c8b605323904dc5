use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::record::ImportDefaults;
use crate::storage::DEFAULT_BATCH_SIZE;

const DEFAULT_INFLUXDB_URL: &str = "http://localhost:8086";
const DEFAULT_INFLUXDB_TOKEN: &str = "my-super-secret-auth-token";
const DEFAULT_INFLUXDB_ORG: &str = "speedtest";
const DEFAULT_INFLUXDB_BUCKET: &str = "speedtest";
const DEFAULT_INTERVAL_SECONDS: u64 = 3600;
const DEFAULT_SPEEDTEST_COMMAND: &str = "speedtest";
const DEFAULT_SPEEDTEST_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_PROBE_HOST: &str = "google.com";
const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_ERROR_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_SERVER_COUNTRY: &str = "Malaysia";
const DEFAULT_EXPORTER_OFFSET: &str = "+08:00";
const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// InfluxDB 1.8 credentials; when both are set they replace the token.
    pub user: Option<String>,
    pub password: Option<String>,
}

impl InfluxSettings {
    pub fn auth_token(&self) -> String {
        match self.v1_credentials() {
            Some((user, password)) => format!("{user}:{password}"),
            None => self.token.clone(),
        }
    }

    /// User and password of an InfluxDB 1.8 server, when both are configured.
    pub fn v1_credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Database part of a 1.8 `database/retention-policy` bucket.
    pub fn database(&self) -> &str {
        match self.bucket.split_once('/') {
            Some((database, _)) => database,
            None => &self.bucket,
        }
    }
}

/// How the poller waits between measurement cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed delay between cycles.
    Interval(Duration),
    /// Wake at the top of every wall-clock hour.
    Hourly,
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub schedule: Schedule,
    pub run_immediately: bool,
    pub speedtest_command: String,
    pub speedtest_timeout: Duration,
    pub probe_host: String,
    pub probe_timeout: Duration,
    pub error_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub defaults: ImportDefaults,
}

/// Process configuration, built once at startup and passed into each component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub influx: InfluxSettings,
    pub poller: PollerSettings,
    pub import: ImportSettings,
    pub log_dir: String,
}

// Partial config for layering file and environment values.
#[derive(Deserialize, Default, Debug)]
struct PartialSettings {
    influxdb_url: Option<String>,
    influxdb_token: Option<String>,
    influxdb_org: Option<String>,
    influxdb_bucket: Option<String>,
    influxdb_user: Option<String>,
    influxdb_password: Option<String>,
    speedtest_interval: Option<u64>,
    speedtest_schedule: Option<String>,
    speedtest_run_immediately: Option<bool>,
    speedtest_command: Option<String>,
    speedtest_timeout: Option<u64>,
    probe_host: Option<String>,
    probe_timeout: Option<u64>,
    error_cooldown: Option<u64>,
    import_batch_size: Option<usize>,
    import_server_country: Option<String>,
    import_utc_offset: Option<String>,
    log_dir: Option<String>,
}

impl PartialSettings {
    /// Field-wise merge; values in `self` win.
    fn or(self, base: PartialSettings) -> PartialSettings {
        PartialSettings {
            influxdb_url: self.influxdb_url.or(base.influxdb_url),
            influxdb_token: self.influxdb_token.or(base.influxdb_token),
            influxdb_org: self.influxdb_org.or(base.influxdb_org),
            influxdb_bucket: self.influxdb_bucket.or(base.influxdb_bucket),
            influxdb_user: self.influxdb_user.or(base.influxdb_user),
            influxdb_password: self.influxdb_password.or(base.influxdb_password),
            speedtest_interval: self.speedtest_interval.or(base.speedtest_interval),
            speedtest_schedule: self.speedtest_schedule.or(base.speedtest_schedule),
            speedtest_run_immediately: self
                .speedtest_run_immediately
                .or(base.speedtest_run_immediately),
            speedtest_command: self.speedtest_command.or(base.speedtest_command),
            speedtest_timeout: self.speedtest_timeout.or(base.speedtest_timeout),
            probe_host: self.probe_host.or(base.probe_host),
            probe_timeout: self.probe_timeout.or(base.probe_timeout),
            error_cooldown: self.error_cooldown.or(base.error_cooldown),
            import_batch_size: self.import_batch_size.or(base.import_batch_size),
            import_server_country: self.import_server_country.or(base.import_server_country),
            import_utc_offset: self.import_utc_offset.or(base.import_utc_offset),
            log_dir: self.log_dir.or(base.log_dir),
        }
    }
}

impl Settings {
    /// Loads `.env`, an optional TOML file, then the environment; environment overrides file.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path_str) => load_file(Path::new(path_str))?,
            None => PartialSettings::default(),
        };
        let env_config: PartialSettings = envy::from_env()?;

        Self::from_partial(env_config.or(file_config))
    }

    fn from_partial(partial: PartialSettings) -> Result<Self, ConfigError> {
        let interval = Duration::from_secs(non_zero(
            "SPEEDTEST_INTERVAL",
            partial.speedtest_interval.unwrap_or(DEFAULT_INTERVAL_SECONDS),
        )?);
        let schedule = match partial
            .speedtest_schedule
            .as_deref()
            .map(str::trim)
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("interval") => Schedule::Interval(interval),
            Some("hourly") => Schedule::Hourly,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SPEEDTEST_SCHEDULE",
                    reason: format!("expected \"interval\" or \"hourly\", got {other:?}"),
                });
            }
        };

        let offset_str = partial
            .import_utc_offset
            .unwrap_or_else(|| DEFAULT_EXPORTER_OFFSET.to_string());
        let exporter_offset = offset_str
            .trim()
            .parse::<FixedOffset>()
            .map_err(|e| ConfigError::Invalid {
                key: "IMPORT_UTC_OFFSET",
                reason: format!("{offset_str:?}: {e}"),
            })?;

        Ok(Self {
            influx: InfluxSettings {
                url: partial
                    .influxdb_url
                    .unwrap_or_else(|| DEFAULT_INFLUXDB_URL.to_string()),
                token: partial
                    .influxdb_token
                    .unwrap_or_else(|| DEFAULT_INFLUXDB_TOKEN.to_string()),
                org: partial
                    .influxdb_org
                    .unwrap_or_else(|| DEFAULT_INFLUXDB_ORG.to_string()),
                bucket: partial
                    .influxdb_bucket
                    .unwrap_or_else(|| DEFAULT_INFLUXDB_BUCKET.to_string()),
                user: partial.influxdb_user.filter(|v| !v.is_empty()),
                password: partial.influxdb_password.filter(|v| !v.is_empty()),
            },
            poller: PollerSettings {
                schedule,
                run_immediately: partial.speedtest_run_immediately.unwrap_or(true),
                speedtest_command: partial
                    .speedtest_command
                    .unwrap_or_else(|| DEFAULT_SPEEDTEST_COMMAND.to_string()),
                speedtest_timeout: Duration::from_secs(non_zero(
                    "SPEEDTEST_TIMEOUT",
                    partial
                        .speedtest_timeout
                        .unwrap_or(DEFAULT_SPEEDTEST_TIMEOUT_SECONDS),
                )?),
                probe_host: partial
                    .probe_host
                    .unwrap_or_else(|| DEFAULT_PROBE_HOST.to_string()),
                probe_timeout: Duration::from_secs(non_zero(
                    "PROBE_TIMEOUT",
                    partial.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECONDS),
                )?),
                error_cooldown: Duration::from_secs(
                    partial
                        .error_cooldown
                        .unwrap_or(DEFAULT_ERROR_COOLDOWN_SECONDS),
                ),
            },
            import: ImportSettings {
                batch_size: partial
                    .import_batch_size
                    .unwrap_or(DEFAULT_BATCH_SIZE)
                    .max(1),
                defaults: ImportDefaults {
                    server_country: partial
                        .import_server_country
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| DEFAULT_SERVER_COUNTRY.to_string()),
                    exporter_offset,
                },
            },
            log_dir: partial
                .log_dir
                .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
        })
    }
}

fn load_file(path: &Path) -> Result<PartialSettings, ConfigError> {
    if !path.exists() {
        return Ok(PartialSettings::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn non_zero(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
