//! OS process and window introspection.
//!
//! Everything above this module is platform-agnostic. Implementations:
//! - `win32.rs` - Win32 windows, input, process and audio session APIs
//! - `generic.rs` - process listing only, for platforms without a window model we drive

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[cfg(not(windows))]
mod generic;
mod procs;
#[cfg(windows)]
mod win32;

#[derive(Error, Debug)]
pub enum PlatformError {
  #[error("Process {0} not found")]
  ProcessNotFound(u32),
  #[error("No audio session for process {0}")]
  NoAudioSession(u32),
  #[error("Not supported on this platform")]
  Unsupported,
  #[error("OS call failed: {0}")]
  Os(String),
}

/// Opaque top-level window reference.
///
/// Only meaningful for the process generation that produced it; callers re-resolve it
/// on every use instead of storing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

impl fmt::Display for WindowHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{:X}", self.0)
  }
}

/// A process as reported by the OS process list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
  pub pid: u32,
  /// Window the OS considers primary (visible and unowned). `None` when the process
  /// has no such window, e.g. while minimized to the tray.
  pub main_window: Option<WindowHandle>,
}

/// Window show state as reported by the placement query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPlacement {
  Normal,
  Minimized,
  Maximized,
  Hidden,
  Unknown,
}

/// Show-state changes the supervisor requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowCommand {
  Minimize,
  Restore,
  Hide,
  Show,
}

/// Application-level commands delivered to a window (`WM_APPCOMMAND` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
  PlayPause,
  Stop,
  PreviousTrack,
  NextTrack,
  FastForward,
  Rewind,
  Copy,
  Paste,
}

impl AppCommand {
  /// `APPCOMMAND_*` identifier.
  pub fn code(self) -> u16 {
    match self {
      AppCommand::NextTrack => 11,
      AppCommand::PreviousTrack => 12,
      AppCommand::Stop => 13,
      AppCommand::PlayPause => 14,
      AppCommand::Copy => 36,
      AppCommand::Paste => 38,
      AppCommand::FastForward => 49,
      AppCommand::Rewind => 50,
    }
  }
}

/// System-wide media keys injected as synthetic keyboard input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKey {
  VolumeMute,
  VolumeDown,
  VolumeUp,
}

impl MediaKey {
  /// Virtual-key code.
  pub fn virtual_key(self) -> u8 {
    match self {
      MediaKey::VolumeMute => 0xAD,
      MediaKey::VolumeDown => 0xAE,
      MediaKey::VolumeUp => 0xAF,
    }
  }
}

/// Per-process audio session state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppVolume {
  /// 0.0 - 1.0
  pub level: f32,
  pub muted: bool,
}

/// OS services the supervisor needs.
///
/// Query methods never fail: an enumeration that cannot be performed is reported as
/// empty, since window and process sets are transient OS state.
pub trait Platform: Send + Sync {
  /// Processes whose image name equals `executable` (case-insensitive), in a stable order.
  fn processes(&self, executable: &str) -> Vec<ProcessInfo>;

  fn is_process_alive(&self, pid: u32) -> bool;

  /// Block up to `timeout` until the process can accept input. Returns `true` when it is
  /// ready or the process has no message loop to wait on.
  fn wait_for_input_idle(&self, pid: u32, timeout: Duration) -> bool;

  fn terminate(&self, pid: u32) -> Result<(), PlatformError>;

  /// Fresh enumeration of the top-level windows owned by `pid`, hidden ones included.
  fn top_level_windows(&self, pid: u32) -> Vec<WindowHandle>;

  fn window_class(&self, window: WindowHandle) -> Option<String>;

  fn window_title(&self, window: WindowHandle) -> Option<String>;

  fn placement(&self, window: WindowHandle) -> WindowPlacement;

  fn show(&self, window: WindowHandle, command: ShowCommand) -> bool;

  fn set_foreground(&self, window: WindowHandle) -> bool;

  /// Politely ask the window to close.
  fn close(&self, window: WindowHandle) -> bool;

  fn send_app_command(&self, window: WindowHandle, command: AppCommand) -> bool;

  fn send_media_key(&self, key: MediaKey) -> bool;

  fn app_volume(&self, pid: u32) -> Result<AppVolume, PlatformError>;

  fn set_app_volume(
    &self,
    pid: u32,
    level: Option<f32>,
    muted: Option<bool>,
  ) -> Result<(), PlatformError>;
}

/// Platform implementation for the OS this binary was built for.
pub fn native() -> Arc<dyn Platform> {
  #[cfg(windows)]
  {
    Arc::new(win32::WindowsPlatform::new())
  }
  #[cfg(not(windows))]
  {
    Arc::new(generic::GenericPlatform::new())
  }
}

/// Case-insensitive image-name comparison; `.exe` on either side is optional.
pub fn image_name_matches(image: &str, executable: &str) -> bool {
  fn stem(name: &str) -> &str {
    match name.len().checked_sub(4) {
      Some(cut) if cut > 0 && name.get(cut..).is_some_and(|ext| ext.eq_ignore_ascii_case(".exe")) => {
        &name[..cut]
      }
      _ => name,
    }
  }
  stem(image).eq_ignore_ascii_case(stem(executable))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_image_name_matching() {
    assert!(image_name_matches("Spotify.exe", "spotify.exe"));
    assert!(image_name_matches("spotify", "Spotify.exe"));
    assert!(image_name_matches("SPOTIFY.EXE", "spotify"));
    assert!(!image_name_matches("SpotifyWebHelper.exe", "Spotify.exe"));
    assert!(!image_name_matches("exe", "Spotify.exe"));
  }

  #[test]
  fn test_command_codes() {
    assert_eq!(AppCommand::PlayPause.code(), 14);
    assert_eq!(AppCommand::NextTrack.code(), 11);
    assert_eq!(MediaKey::VolumeUp.virtual_key(), 0xAF);
  }
}
