//! Supervisor configuration.
//!
//! Settings are owned by an external settings store; this crate only reads them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Startup timeout floor; shorter configured values are raised to this.
pub const MIN_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
/// Startup timeout ceiling.
pub const MAX_STARTUP_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SPOTIFY_SUPERVISOR_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to parse config: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// How the player process comes to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StartMode {
  /// Find a running instance or launch one.
  #[default]
  Launch,
  /// Wait for the user to start the player, then attach.
  WaitForUser,
}

/// Where volume and mute actions are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeControlMode {
  /// System media keys; changes the master volume.
  SystemWide,
  /// The player's own volume, through the control endpoint.
  #[default]
  TargetOnly,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// Custom Spotify executable path (None = auto-detect).
  #[serde(default)]
  pub spotify_path: Option<String>,

  /// Argument string passed to the player on launch.
  #[serde(default)]
  pub launch_args: String,

  /// AppUserModelId of a packaged (Store) install. Takes precedence over `spotify_path`.
  #[serde(default)]
  pub packaged_app_id: Option<String>,

  /// Image name used to find player processes.
  #[serde(default = "default_executable_name")]
  pub executable_name: String,

  #[serde(default)]
  pub start_mode: StartMode,

  /// Seconds allowed for launch + connect. Values below 60 are raised to 60.
  #[serde(default = "default_startup_timeout_secs")]
  pub startup_timeout_secs: u64,

  /// Minimize the player window once it has started.
  #[serde(default)]
  pub minimize_on_startup: bool,

  /// Delay before minimizing; minimizing immediately can swallow the first status update.
  #[serde(default = "default_minimize_delay_ms")]
  pub minimize_delay_ms: u64,

  #[serde(default)]
  pub volume_control_mode: VolumeControlMode,

  #[serde(default = "default_endpoint_host")]
  pub endpoint_host: String,

  #[serde(default = "default_endpoint_port")]
  pub endpoint_port: u16,

  /// Status polling interval of the control endpoint client.
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,

  /// Quit when the player exits instead of waiting for it to come back.
  #[serde(default = "default_exit_with_player")]
  pub exit_with_player: bool,
}

fn default_executable_name() -> String {
  if cfg!(windows) {
    "Spotify.exe".to_string()
  } else {
    "spotify".to_string()
  }
}

fn default_startup_timeout_secs() -> u64 {
  MIN_STARTUP_TIMEOUT.as_secs()
}

fn default_minimize_delay_ms() -> u64 {
  1000
}

fn default_endpoint_host() -> String {
  "127.0.0.1".to_string()
}

fn default_endpoint_port() -> u16 {
  4381
}

fn default_poll_interval_ms() -> u64 {
  500
}

fn default_exit_with_player() -> bool {
  true
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      spotify_path: None,
      launch_args: String::new(),
      packaged_app_id: None,
      executable_name: default_executable_name(),
      start_mode: StartMode::default(),
      startup_timeout_secs: default_startup_timeout_secs(),
      minimize_on_startup: false,
      minimize_delay_ms: default_minimize_delay_ms(),
      volume_control_mode: VolumeControlMode::default(),
      endpoint_host: default_endpoint_host(),
      endpoint_port: default_endpoint_port(),
      poll_interval_ms: default_poll_interval_ms(),
      exit_with_player: default_exit_with_player(),
    }
  }
}

impl AppConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.executable_name.trim().is_empty() {
      return Err("Executable name cannot be empty".to_string());
    }
    if self.endpoint_host.trim().is_empty() {
      return Err("Endpoint host cannot be empty".to_string());
    }
    if self.endpoint_port == 0 {
      return Err("Endpoint port cannot be 0".to_string());
    }
    if self.poll_interval_ms < 100 || self.poll_interval_ms > 10_000 {
      return Err("Poll interval must be between 100 and 10000 ms".to_string());
    }
    if self.startup_timeout_secs > MAX_STARTUP_TIMEOUT.as_secs() {
      return Err(format!(
        "Startup timeout cannot exceed {} seconds",
        MAX_STARTUP_TIMEOUT.as_secs()
      ));
    }
    if self.minimize_delay_ms > 60_000 {
      return Err("Minimize delay cannot exceed 60000 ms".to_string());
    }
    Ok(())
  }

  /// Effective startup deadline, within [`MIN_STARTUP_TIMEOUT`] and [`MAX_STARTUP_TIMEOUT`].
  pub fn startup_timeout(&self) -> Duration {
    Duration::from_secs(self.startup_timeout_secs)
      .clamp(MIN_STARTUP_TIMEOUT, MAX_STARTUP_TIMEOUT)
  }

  pub fn minimize_delay(&self) -> Duration {
    Duration::from_millis(self.minimize_delay_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  /// `launch_args` split on whitespace, double quotes grouping.
  pub fn launch_arguments(&self) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in self.launch_args.chars() {
      match c {
        '"' => quoted = !quoted,
        c if c.is_whitespace() && !quoted => {
          if !current.is_empty() {
            args.push(std::mem::take(&mut current));
          }
        }
        c => current.push(c),
      }
    }
    if !current.is_empty() {
      args.push(current);
    }
    args
  }

  /// Parse and validate a JSON document.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let json = std::fs::read_to_string(path)?;
    Self::from_json(&json)
  }

  /// Load from `explicit`, then `$SPOTIFY_SUPERVISOR_CONFIG`, then the per-user default
  /// location. Missing or broken files fall back to defaults.
  pub fn load(explicit: Option<&Path>) -> Self {
    let path = explicit
      .map(Path::to_path_buf)
      .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
      .or_else(default_config_path);

    let Some(path) = path else {
      log::info!("No config location available, using defaults");
      return Self::default();
    };

    if !path.exists() {
      log::info!("No config at {:?}, using defaults", path);
      return Self::default();
    }

    match Self::from_file(&path) {
      Ok(config) => {
        log::info!("Loaded config from {:?}", path);
        config
      }
      Err(e) => {
        log::warn!("Failed to load config from {:?}: {} - using defaults", path, e);
        Self::default()
      }
    }
  }
}

/// `<config dir>/spotify-supervisor/config.json`
pub fn default_config_path() -> Option<PathBuf> {
  dirs::config_dir().map(|dir| dir.join("spotify-supervisor").join("config.json"))
}
