//! Spotify executable detection and launching.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use thiserror::Error;

use crate::config::AppConfig;
use crate::platform::image_name_matches;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("Spotify executable not found")]
  NotFound,
  #[error("Failed to launch Spotify: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

/// Result of a launch. `pid` is `None` when the OS does not hand back the player's own
/// process (packaged apps are started through the shell).
#[derive(Debug, Default)]
pub struct LaunchedProcess {
  pub pid: Option<u32>,
  pub child: Option<Child>,
}

/// Starts the player.
pub trait Launcher: Send + Sync {
  fn launch(&self) -> Result<LaunchedProcess, ProcessError>;
}

/// What to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
  Executable(PathBuf),
  /// AppUserModelId of a Store install.
  Packaged(String),
}

/// Launches the player as a child process, or through the shell for packaged installs.
pub struct CommandLauncher {
  spotify_path: Option<PathBuf>,
  packaged_app_id: Option<String>,
  executable_name: String,
  args: Vec<String>,
}

impl CommandLauncher {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      spotify_path: config
        .spotify_path
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from),
      packaged_app_id: config.packaged_app_id.clone().filter(|s| !s.is_empty()),
      executable_name: config.executable_name.clone(),
      args: config.launch_arguments(),
    }
  }

  /// Resolved at launch time so an install that appears later is still picked up.
  pub fn resolve(&self) -> Result<LaunchTarget, ProcessError> {
    if let Some(id) = &self.packaged_app_id {
      return Ok(LaunchTarget::Packaged(id.clone()));
    }
    if let Some(path) = &self.spotify_path {
      if !path.exists() {
        log::warn!("Configured Spotify path does not exist: {:?}", path);
        return Err(ProcessError::NotFound);
      }
      return Ok(LaunchTarget::Executable(path.clone()));
    }
    find_spotify(&self.executable_name)
      .map(LaunchTarget::Executable)
      .ok_or(ProcessError::NotFound)
  }
}

impl Launcher for CommandLauncher {
  fn launch(&self) -> Result<LaunchedProcess, ProcessError> {
    match self.resolve()? {
      LaunchTarget::Executable(path) => {
        log::info!("Launching Spotify: {:?}", path);
        if !self.args.is_empty() {
          log::info!("Launch args: {:?}", self.args);
        }

        let child = Command::new(&path)
          .args(&self.args)
          .stdin(Stdio::null())
          .stdout(Stdio::null())
          .stderr(Stdio::null())
          .spawn()?;

        Ok(LaunchedProcess {
          pid: Some(child.id()),
          child: Some(child),
        })
      }
      LaunchTarget::Packaged(id) => {
        log::info!("Launching packaged Spotify: {}", id);
        // The shell process exits immediately; the player is found by name afterwards.
        Command::new("explorer.exe")
          .arg(format!(r"shell:AppsFolder\{}", id))
          .stdin(Stdio::null())
          .stdout(Stdio::null())
          .stderr(Stdio::null())
          .spawn()?;
        Ok(LaunchedProcess::default())
      }
    }
  }
}

/// Find the Spotify executable on PATH or in common install locations.
pub fn find_spotify(executable: &str) -> Option<PathBuf> {
  if let Ok(path) = which::which(executable) {
    return Some(path);
  }

  common_locations().into_iter().find(|p| {
    p.file_name()
      .is_some_and(|name| image_name_matches(&name.to_string_lossy(), executable))
      && p.exists()
  })
}

fn common_locations() -> Vec<PathBuf> {
  let mut paths = Vec::new();

  #[cfg(windows)]
  {
    // Classic installer puts Spotify under the roaming AppData folder.
    if let Some(roaming) = dirs::config_dir() {
      paths.push(roaming.join("Spotify").join("Spotify.exe"));
    }
    if let Some(local) = dirs::data_local_dir() {
      paths.push(local.join("Microsoft").join("WindowsApps").join("Spotify.exe"));
    }
    paths.push(PathBuf::from(r"C:\Program Files\Spotify\Spotify.exe"));
  }

  #[cfg(target_os = "macos")]
  {
    paths.push(PathBuf::from("/Applications/Spotify.app/Contents/MacOS/Spotify"));
    if let Some(home) = dirs::home_dir() {
      paths.push(home.join("Applications/Spotify.app/Contents/MacOS/Spotify"));
    }
  }

  #[cfg(target_os = "linux")]
  {
    paths.push(PathBuf::from("/usr/bin/spotify"));
    paths.push(PathBuf::from("/usr/local/bin/spotify"));
    paths.push(PathBuf::from("/snap/bin/spotify"));
  }

  paths
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_packaged_id_takes_precedence() {
    let config = AppConfig {
      spotify_path: Some("/opt/spotify/spotify".to_string()),
      packaged_app_id: Some("SpotifyAB.SpotifyMusic_zpdnekdrzrea0!Spotify".to_string()),
      ..Default::default()
    };
    let launcher = CommandLauncher::from_config(&config);
    assert_eq!(
      launcher.resolve().unwrap(),
      LaunchTarget::Packaged("SpotifyAB.SpotifyMusic_zpdnekdrzrea0!Spotify".to_string())
    );
  }

  #[test]
  fn test_configured_path_is_used_as_is() {
    let existing = std::env::current_exe().unwrap();
    let config = AppConfig {
      spotify_path: Some(existing.to_string_lossy().into_owned()),
      ..Default::default()
    };
    let launcher = CommandLauncher::from_config(&config);
    assert_eq!(launcher.resolve().unwrap(), LaunchTarget::Executable(existing));
  }

  #[test]
  fn test_missing_configured_path_is_not_found() {
    let config = AppConfig {
      spotify_path: Some("/nonexistent/dir/Spotify.exe".to_string()),
      ..Default::default()
    };
    let launcher = CommandLauncher::from_config(&config);
    assert!(matches!(launcher.resolve(), Err(ProcessError::NotFound)));
    assert!(matches!(launcher.launch(), Err(ProcessError::NotFound)));
  }

  #[test]
  fn test_unresolvable_executable() {
    let config = AppConfig {
      spotify_path: Some(String::new()),
      executable_name: "no-such-player-binary-7f3a".to_string(),
      ..Default::default()
    };
    let launcher = CommandLauncher::from_config(&config);
    assert!(matches!(launcher.resolve(), Err(ProcessError::NotFound)));
    assert!(matches!(launcher.launch(), Err(ProcessError::NotFound)));
  }
}
