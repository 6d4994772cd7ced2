//! Configuration management for the dimmerd daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! and derives the immutable [`Limits`] the controller runs with.

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Factor applied to the monitor cap when `unlimited` is set.
pub const UNLIMITED_FACTOR: usize = 8;

/// Remembered names kept per targetable monitor.
pub const NAMES_PER_MONITOR: usize = 4;

/// Largest accepted `max_monitor_count`.
pub const MAX_MONITOR_COUNT: usize = 1024;

/// Main configuration structure for the dimmerd daemon.
///
/// # Example
///
/// ```yaml
/// version: 1
/// max_monitor_count: 4
/// unlimited: false
/// refresh_seconds: 60
/// device_timeout_ms: 3000
/// names_path: /var/lib/dimmerd/names.json
/// backend:
///   kind: ddcutil
///   binary: /usr/bin/ddcutil
/// watch_displays: true
/// watch_power: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Upper bound on monitors whose brightness is tracked.
    #[serde(default = "defaults::max_monitor_count")]
    pub max_monitor_count: usize,

    /// Multiplies the monitor cap by [`UNLIMITED_FACTOR`].
    #[serde(default)]
    pub unlimited: bool,

    /// Interval of the periodic brightness refresh; 0 disables it.
    #[serde(default = "defaults::refresh_seconds")]
    pub refresh_seconds: u64,

    /// Upper bound for a single device call.
    #[serde(default = "defaults::device_timeout_ms")]
    pub device_timeout_ms: u64,

    /// Where remembered monitor names are persisted.
    #[serde(default)]
    pub names_path: Option<PathBuf>,

    /// Hardware backend used to enumerate monitors.
    #[serde(default)]
    pub backend: BackendCfg,

    /// Rescan when the display device directory changes.
    #[serde(default = "defaults::enabled")]
    pub watch_displays: bool,

    /// Rescan after the system resumes from sleep.
    #[serde(default = "defaults::enabled")]
    pub watch_power: bool,
}

/// Monitor backend variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BackendCfg {
    /// Kernel backlight class devices.
    Sysfs {
        #[serde(default = "defaults::sysfs_root")]
        root: PathBuf,
    },
    /// External monitors over DDC/CI through the `ddcutil` tool.
    Ddcutil {
        #[serde(default = "defaults::ddcutil_binary")]
        binary: PathBuf,
    },
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self::Ddcutil {
            binary: defaults::ddcutil_binary(),
        }
    }
}

impl BackendCfg {
    /// Directory whose entries change when displays come and go.
    pub fn watch_path(&self) -> PathBuf {
        match self {
            Self::Sysfs { root } => root.clone(),
            Self::Ddcutil { .. } => PathBuf::from("/dev"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            max_monitor_count: defaults::max_monitor_count(),
            unlimited: false,
            refresh_seconds: defaults::refresh_seconds(),
            device_timeout_ms: defaults::device_timeout_ms(),
            names_path: None,
            backend: BackendCfg::default(),
            watch_displays: true,
            watch_power: true,
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            bail!("Unsupported config version {}", self.version);
        }
        if self.max_monitor_count == 0 {
            bail!("max_monitor_count must be at least 1");
        }
        if self.max_monitor_count > MAX_MONITOR_COUNT {
            bail!(
                "max_monitor_count must not exceed {MAX_MONITOR_COUNT}, got {}",
                self.max_monitor_count
            );
        }
        if self.device_timeout_ms == 0 {
            bail!("device_timeout_ms must be greater than 0");
        }
        Ok(())
    }

    /// Applies environment overrides on top of the file values.
    ///
    /// `DIMMERD_UNLIMITED` switches the cap multiplier on or off.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("DIMMERD_UNLIMITED") {
            self.unlimited = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    pub fn limits(&self) -> Limits {
        Limits::new(self.max_monitor_count, self.unlimited)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_seconds > 0).then(|| Duration::from_secs(self.refresh_seconds))
    }

    /// Resolved location of the name store.
    pub fn names_path(&self) -> PathBuf {
        self.names_path.clone().unwrap_or_else(default_names_path)
    }
}

/// Caps the controller runs with, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_monitor_count: usize,
    pub max_name_count: usize,
}

impl Limits {
    pub fn new(max_monitor_count: usize, unlimited: bool) -> Self {
        let max_monitor_count = if unlimited {
            max_monitor_count.saturating_mul(UNLIMITED_FACTOR)
        } else {
            max_monitor_count
        };
        Self {
            max_monitor_count,
            max_name_count: max_monitor_count.saturating_mul(NAMES_PER_MONITOR),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(defaults::max_monitor_count(), false)
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn max_monitor_count() -> usize {
        4
    }

    pub fn refresh_seconds() -> u64 {
        0
    }

    pub fn device_timeout_ms() -> u64 {
        3000
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn sysfs_root() -> PathBuf {
        PathBuf::from("/sys/class/backlight")
    }

    pub fn ddcutil_binary() -> PathBuf {
        PathBuf::from("ddcutil")
    }
}

fn default_names_path() -> PathBuf {
    env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".local/state")))
        .map(|dir| dir.join("dimmerd/names.json"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/dimmerd/names.json"))
}

fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("DIMMERD_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("dimmerd/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/dimmerd/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}

/// Loaded configuration plus the file it came from.
///
/// The configuration is immutable once loaded; components receive it by
/// reference through [`AppState`](crate::app_context::AppState).
///
/// # Example
///
/// ```no_run
/// use dimmerd::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(None).await?;
/// let limits = config_manager.get().limits();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<Config>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches in the following order:
    /// 1. Provided path parameter
    /// 2. DIMMERD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/dimmerd/config.yml or ~/.config/dimmerd/config.yml
    /// 4. /etc/dimmerd/config.yml
    ///
    /// Without any file the built-in defaults are used.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(config_path) = path.or_else(locate_config) else {
            info!("No configuration file found, using defaults");
            let mut config = Config::default();
            config.apply_env_overrides();
            return Ok(Self::new(config, None));
        };

        info!("Loading config from: {}", config_path.display());
        let mut config = Self::load_config_from_path(&config_path)?;
        config.apply_env_overrides();

        Ok(Self::new(config, Some(config_path)))
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Renders the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self.config.as_ref()).context("Failed to serialize configuration")
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
