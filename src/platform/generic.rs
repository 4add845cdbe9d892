//! Fallback for platforms where we can only see the process table.
//!
//! Window queries report nothing, so the finder never classifies a main instance here;
//! window and input operations are logged and reported as not performed.

use std::time::Duration;

use super::procs::ProcessTable;
use super::{
  AppCommand, AppVolume, MediaKey, Platform, PlatformError, ProcessInfo, ShowCommand,
  WindowHandle, WindowPlacement,
};

pub struct GenericPlatform {
  table: ProcessTable,
}

impl GenericPlatform {
  pub fn new() -> Self {
    Self {
      table: ProcessTable::new(),
    }
  }
}

impl Platform for GenericPlatform {
  fn processes(&self, executable: &str) -> Vec<ProcessInfo> {
    self
      .table
      .matching_pids(executable)
      .into_iter()
      .map(|pid| ProcessInfo {
        pid,
        main_window: None,
      })
      .collect()
  }

  fn is_process_alive(&self, pid: u32) -> bool {
    self.table.is_alive(pid)
  }

  fn wait_for_input_idle(&self, pid: u32, _timeout: Duration) -> bool {
    // No message-loop concept to wait on.
    self.table.is_alive(pid)
  }

  fn terminate(&self, pid: u32) -> Result<(), PlatformError> {
    if self.table.kill(pid) {
      Ok(())
    } else {
      Err(PlatformError::ProcessNotFound(pid))
    }
  }

  fn top_level_windows(&self, _pid: u32) -> Vec<WindowHandle> {
    Vec::new()
  }

  fn window_class(&self, _window: WindowHandle) -> Option<String> {
    None
  }

  fn window_title(&self, _window: WindowHandle) -> Option<String> {
    None
  }

  fn placement(&self, _window: WindowHandle) -> WindowPlacement {
    WindowPlacement::Unknown
  }

  fn show(&self, window: WindowHandle, command: ShowCommand) -> bool {
    log::debug!("show({:?}) on {} not supported here", command, window);
    false
  }

  fn set_foreground(&self, _window: WindowHandle) -> bool {
    false
  }

  fn close(&self, _window: WindowHandle) -> bool {
    false
  }

  fn send_app_command(&self, window: WindowHandle, command: AppCommand) -> bool {
    log::debug!("App command {:?} to {} not supported here", command, window);
    false
  }

  fn send_media_key(&self, key: MediaKey) -> bool {
    log::debug!("Media key {:?} not supported here", key);
    false
  }

  fn app_volume(&self, _pid: u32) -> Result<AppVolume, PlatformError> {
    Err(PlatformError::Unsupported)
  }

  fn set_app_volume(
    &self,
    _pid: u32,
    _level: Option<f32>,
    _muted: Option<bool>,
  ) -> Result<(), PlatformError> {
    Err(PlatformError::Unsupported)
  }
}
