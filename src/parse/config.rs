use crate::error::ProxyError;
use crate::history::OUTPUT_HISTORY;
use crate::runtime::Settings;
use crate::state::RestartPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use tracing::Level;

pub const CONFIG_ENV: &str = "CONSOLE_PROXY_CONFIG";
pub const CONFIG_FILE: &str = "console-proxy.yml";

fn default_processor() -> Option<String> { Some("passthrough".to_string()) }
fn default_history() -> usize { OUTPUT_HISTORY }
fn default_interval() -> u64 { 1 }
fn default_stale_after() -> u64 { 60 }
fn default_max_restarts() -> u32 { 3 }
fn default_window() -> u64 { 120 }
fn default_grace() -> u64 { 20 }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_log_level() -> String { "info".to_string() }


#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WatchdogConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RestartConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default)]
    pub reset_processor: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}


#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Selects the line processor; required once a configuration file exists.
    pub processor: Option<String>,
    #[serde(default = "default_history")]
    pub history_capacity: usize,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// serde(default) on the sections needs these to agree with the field defaults
impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { interval_secs: default_interval(), stale_after_secs: default_stale_after() }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self { max_restarts: default_max_restarts(), window_secs: default_window(), reset_processor: false }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: default_grace() }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { dir: default_log_dir(), level: default_log_level() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processor: default_processor(),
            history_capacity: default_history(),
            watchdog: WatchdogConfig::default(),
            restart: RestartConfig::default(),
            shutdown: ShutdownConfig::default(),
            log: LogConfig::default(),
        }
    }
}



impl Config {
    /*
        @@@
        @load();
        . Finds the configuration file ($CONSOLE_PROXY_CONFIG, ./console-proxy.yml, then next to the executable).
        . Without any file the built-in defaults apply, with the pass-through processor.
    */
    pub fn load() -> Result<Config, ProxyError> {
        match locate() {
            Some(path) => Config::from_path(&path),
            None => Ok(Config::default()),
        }
    }

    /// Reads and validates one file. I/O and YAML errors keep the path for the report.
    pub fn from_path(path: &Path) -> Result<Config, ProxyError> {
        let yaml = fs::read_to_string(path).map_err(|source| ProxyError::ConfigUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_yaml(&yaml, path)
    }

    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Config, ProxyError> {
        // an empty document is a file without the processor setting
        let parsed: Option<Config> =
            serde_yaml::from_str(yaml).map_err(|source| ProxyError::ConfigInvalid {
                path: path.to_path_buf(),
                source,
            })?;
        match parsed {
            Some(config) if config.processor.as_deref().is_some_and(|p| !p.trim().is_empty()) => {
                Ok(config)
            }
            _ => Err(ProxyError::ConfigMissing { path: path.to_path_buf() }),
        }
    }

    pub fn processor_name(&self) -> &str {
        self.processor.as_deref().unwrap_or("passthrough")
    }

    /// Unknown level names fall back to INFO.
    pub fn log_level(&self) -> Level {
        self.log.level.parse().unwrap_or(Level::INFO)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            restart: RestartPolicy {
                max_restarts: self.restart.max_restarts,
                window: Duration::from_secs(self.restart.window_secs),
            },
            watchdog_period: Duration::from_secs(self.watchdog.interval_secs.max(1)),
            stale_after: Duration::from_secs(self.watchdog.stale_after_secs),
            grace: Duration::from_secs(self.shutdown.grace_secs),
            history_capacity: self.history_capacity,
            reset_processor: self.restart.reset_processor,
        }
    }
}

fn locate() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE)))
        .filter(|path| path.is_file())
}
