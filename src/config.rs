// 运行配置
// Runtime settings: built-in defaults < config.yaml < environment / CLI

use chrono_tz::Tz;
use clap::Parser;
use cron::Schedule;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_API_URL: &str = "https://sublink.eooce.com";
pub const DEFAULT_RELAY_HOST: &str = "time.is";
pub const DEFAULT_RELAY_PORT: u16 = 443;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 8;
pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;
pub const DEFAULT_LOG_SWEEP_CRON: &str = "0 0 0 * * *";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown timezone {0:?}")]
    Timezone(String),
    #[error("invalid cron expression {expr:?}: {source}")]
    Cron {
        expr: String,
        #[source]
        source: cron::error::Error,
    },
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "merge-sub", version, about = "订阅合并面板 - Merge proxy subscriptions behind one token URL")]
pub struct Cli {
    /// Optional YAML config file
    #[arg(long, short, default_value = "config.yaml")]
    pub config: PathBuf,

    #[arg(long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// Fallback for hosts that only export `PORT`
    #[arg(long = "fallback-port", env = "PORT", hide = true)]
    pub fallback_port: Option<u16>,

    /// Directory holding data.json, credentials.json and logs/
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Admin username used when credentials.json is first created
    #[arg(long, env = "APP_USERNAME")]
    pub username: Option<String>,

    /// Admin password used when credentials.json is first created
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Sub-converter address shown in the admin UI
    #[arg(long, env = "API_URL")]
    pub api_url: Option<String>,

    #[arg(long, env = "CFIP")]
    pub relay_host: Option<String>,

    #[arg(long, env = "CFPORT")]
    pub relay_port: Option<u16>,

    /// Initial subscription token (random when omitted)
    #[arg(long, env = "SUB_TOKEN", hide_env_values = true)]
    pub sub_token: Option<String>,
}

/// config.yaml；所有字段可选
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct FileConfig {
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    username: Option<String>,
    password: Option<String>,
    api_url: Option<String>,
    relay_host: Option<String>,
    relay_port: Option<u16>,
    sub_token: Option<String>,
    fetch_timeout_secs: Option<u64>,
    log_retention_days: Option<u64>,
    log_timezone: Option<String>,
    log_sweep_cron: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub port: u16,
    pub data_dir: PathBuf,
    pub default_username: String,
    pub default_password: String,
    pub api_url: String,
    pub default_relay_host: String,
    pub default_relay_port: Option<u16>,
    pub initial_sub_token: Option<String>,
    pub fetch_timeout: Duration,
    pub log_retention: Duration,
    pub log_timezone: Tz,
    pub log_sweep: Schedule,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            default_username: "admin".to_string(),
            default_password: "admin".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            default_relay_host: DEFAULT_RELAY_HOST.to_string(),
            default_relay_port: Some(DEFAULT_RELAY_PORT),
            initial_sub_token: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            log_retention: days(DEFAULT_LOG_RETENTION_DAYS),
            log_timezone: chrono_tz::Asia::Shanghai,
            log_sweep: parse_cron(DEFAULT_LOG_SWEEP_CRON).expect("valid default cron"),
        }
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}

fn parse_cron(expr: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expr).map_err(|source| ConfigError::Cron {
        expr: expr.to_string(),
        source,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Settings {
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let file = load_file(&cli.config)?;
        let mut settings = Settings::default();

        if let Some(port) = cli.port.or(cli.fallback_port).or(file.port) {
            settings.port = port;
        }
        if let Some(dir) = cli.data_dir.or(file.data_dir) {
            settings.data_dir = dir;
        }
        if let Some(username) = non_blank(cli.username).or(non_blank(file.username)) {
            settings.default_username = username;
        }
        if let Some(password) = cli.password.or(file.password).filter(|p| !p.is_empty()) {
            settings.default_password = password;
        }
        if let Some(api_url) = non_blank(cli.api_url).or(non_blank(file.api_url)) {
            settings.api_url = api_url;
        }
        if let Some(host) = non_blank(cli.relay_host).or(non_blank(file.relay_host)) {
            settings.default_relay_host = host;
        }
        if let Some(port) = cli.relay_port.or(file.relay_port) {
            settings.default_relay_port = Some(port);
        }
        settings.initial_sub_token = non_blank(cli.sub_token).or(non_blank(file.sub_token));
        if let Some(secs) = file.fetch_timeout_secs.filter(|s| *s > 0) {
            settings.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = file.log_retention_days {
            settings.log_retention = days(n);
        }
        if let Some(tz) = non_blank(file.log_timezone) {
            settings.log_timezone = Tz::from_str(&tz).map_err(|_| ConfigError::Timezone(tz))?;
        }
        if let Some(expr) = non_blank(file.log_sweep_cron) {
            settings.log_sweep = parse_cron(&expr)?;
        }
        Ok(settings)
    }

    pub fn data_file(&self) -> PathBuf {
        self.data_dir.join("data.json")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(FileConfig::default()),
        Ok(text) => serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}
