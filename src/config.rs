use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::RunSettings;
use crate::error::ConfigError;
use crate::fetch::types::DEFAULT_USER_AGENT;
use crate::fetch::BrowserOptions;
use crate::notify::SmtpSettings;

pub const DEFAULT_TARGET_URL: &str = "https://www.apartments-hn.de/en/book-apartment";
pub const DEFAULT_SNAPSHOT_PATH: &str = "apartment_data.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Browser,
    Http,
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "browser" => Ok(FetchMode::Browser),
            "http" => Ok(FetchMode::Http),
            other => Err(format!("expected \"browser\" or \"http\", got {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub target_url: String,
    pub recipient: String,
    pub smtp: SmtpSettings,
    pub fetch_mode: FetchMode,
    pub fetch_timeout: Duration,
    pub run_timeout: Duration,
    pub user_agent: String,
    pub chrome_path: Option<PathBuf>,
    pub settle_delay: Duration,
    pub snapshot_path: PathBuf,
    pub notify_on_baseline: bool,
    pub notify_max_attempts: u32,
    /// `None` disables the in-process check loop
    pub check_interval: Option<Duration>,
}

impl AppConfig {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            target_url: self.target_url.clone(),
            recipient: self.recipient.clone(),
            fetch_timeout: self.fetch_timeout,
            run_timeout: self.run_timeout,
            notify_on_baseline: self.notify_on_baseline,
            notify_max_attempts: self.notify_max_attempts,
            notify_backoff: Duration::from_secs(2),
        }
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            user_agent: self.user_agent.clone(),
            chrome_path: self.chrome_path.clone(),
            settle_delay: self.settle_delay,
            ..BrowserOptions::default()
        }
    }
}

/// Load configuration from the process environment, after reading `.env` if present.
///
/// # Errors
///
/// Returns `ConfigError` if required variables are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    build_app_config(|key| std::env::var(key))
}

/// Only the snapshot location, for commands that never touch SMTP.
pub fn load_snapshot_path() -> PathBuf {
    dotenvy::dotenv().ok();
    snapshot_path(|key| std::env::var(key))
}

fn snapshot_path<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    PathBuf::from(
        lookup("SPOTEYE_SNAPSHOT_PATH").unwrap_or_else(|_| DEFAULT_SNAPSHOT_PATH.to_string()),
    )
}

/// Core parsing, decoupled from the real environment so tests can pass a map.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default =
        |var: &str, default: &str| -> String { lookup(var).unwrap_or_else(|_| default.to_string()) };

    fn parse_as<T: FromStr>(var: &str, raw: &str) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    }

    let secs = |var: &str, default: &str| -> Result<Duration, ConfigError> {
        parse_as::<u64>(var, &or_default(var, default)).map(Duration::from_secs)
    };

    let smtp_user = require("SMTP_USER")?;
    let smtp_password = require("SMTP_PASSWORD")?;
    let recipient = require("RECIPIENT_EMAIL")?;

    let port: u16 = parse_as("PORT", &or_default("PORT", "8080"))?;
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let log_level = or_default("SPOTEYE_LOG_LEVEL", "info");
    let target_url = or_default("SPOTEYE_TARGET_URL", DEFAULT_TARGET_URL);
    if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
        return Err(ConfigError::InvalidEnvVar {
            var: "SPOTEYE_TARGET_URL".to_string(),
            reason: format!("not an http(s) URL: {target_url}"),
        });
    }

    let smtp = SmtpSettings {
        host: or_default("SMTP_SERVER", "smtp.gmail.com"),
        port: parse_as("SMTP_PORT", &or_default("SMTP_PORT", "587"))?,
        sender: lookup("SENDER_EMAIL").unwrap_or_else(|_| smtp_user.clone()),
        username: smtp_user,
        password: smtp_password,
        timeout: Duration::from_secs(30),
    };

    let fetch_mode = parse_as("SPOTEYE_FETCH_MODE", &or_default("SPOTEYE_FETCH_MODE", "browser"))?;
    let fetch_timeout = secs("SPOTEYE_FETCH_TIMEOUT_SECS", "30")?;
    let run_timeout = secs("SPOTEYE_RUN_TIMEOUT_SECS", "300")?;
    let settle_delay = secs("SPOTEYE_SETTLE_DELAY_SECS", "10")?;
    let user_agent = or_default("SPOTEYE_USER_AGENT", DEFAULT_USER_AGENT);
    let chrome_path = lookup("CHROME_PATH").ok().map(PathBuf::from);
    let snapshot_path = snapshot_path(&lookup);

    let notify_on_baseline = parse_as(
        "SPOTEYE_NOTIFY_ON_BASELINE",
        &or_default("SPOTEYE_NOTIFY_ON_BASELINE", "false"),
    )?;
    let notify_max_attempts: u32 = parse_as(
        "SPOTEYE_NOTIFY_MAX_ATTEMPTS",
        &or_default("SPOTEYE_NOTIFY_MAX_ATTEMPTS", "3"),
    )?;
    if notify_max_attempts == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "SPOTEYE_NOTIFY_MAX_ATTEMPTS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let interval_minutes: u64 = parse_as(
        "SPOTEYE_CHECK_INTERVAL_MINUTES",
        &or_default("SPOTEYE_CHECK_INTERVAL_MINUTES", "0"),
    )?;
    let check_interval = (interval_minutes > 0).then(|| Duration::from_secs(interval_minutes * 60));

    Ok(AppConfig {
        bind_addr,
        log_level,
        target_url,
        recipient,
        smtp,
        fetch_mode,
        fetch_timeout,
        run_timeout,
        user_agent,
        chrome_path,
        settle_delay,
        snapshot_path,
        notify_on_baseline,
        notify_max_attempts,
        check_interval,
    })
}
