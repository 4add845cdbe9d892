//! Locates the running player instance.

use std::sync::Arc;

use crate::platform::Platform;

use super::window::WindowLocator;

#[derive(Clone)]
pub struct ProcessFinder {
  platform: Arc<dyn Platform>,
  locator: WindowLocator,
  executable: String,
}

impl ProcessFinder {
  pub fn new(platform: Arc<dyn Platform>, executable: impl Into<String>) -> Self {
    Self {
      locator: WindowLocator::new(platform.clone()),
      platform,
      executable: executable.into(),
    }
  }

  pub fn executable(&self) -> &str {
    &self.executable
  }

  pub fn locator(&self) -> &WindowLocator {
    &self.locator
  }

  /// Pid of the main player instance, if one is running.
  ///
  /// Processes are taken in the platform's order (ascending pid). Among processes the
  /// OS reports a primary window for, the first wins. When none has one (e.g. the player
  /// sits in the tray) every window of every candidate is classified instead.
  pub fn find_target_process(&self) -> Option<u32> {
    let processes = self.platform.processes(&self.executable);
    if processes.is_empty() {
      return None;
    }

    let windowed: Vec<u32> = processes
      .iter()
      .filter(|p| p.main_window.is_some())
      .map(|p| p.pid)
      .collect();

    match windowed.as_slice() {
      [pid] => return Some(*pid),
      [first, ..] => {
        log::warn!(
          "{} instances of {} have a main window ({:?}), using pid {}",
          windowed.len(),
          self.executable,
          windowed,
          first
        );
        return Some(*first);
      }
      [] => {}
    }

    let found = processes
      .iter()
      .map(|p| p.pid)
      .find(|pid| self.locator.main_window(*pid).is_some());
    if let Some(pid) = found {
      log::debug!("Found {} pid {} by window class", self.executable, pid);
    }
    found
  }

  /// Whether `pid` currently owns a window classified as main.
  pub fn is_main_instance(&self, pid: u32) -> bool {
    self.locator.main_window(pid).is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakePlatform;

  fn finder(platform: &Arc<FakePlatform>) -> ProcessFinder {
    ProcessFinder::new(platform.clone(), "Spotify.exe")
  }

  #[test]
  fn test_no_process() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_process(10, "Other.exe", None);
    assert_eq!(finder(&platform).find_target_process(), None);
  }

  #[test]
  fn test_single_windowed_process() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_process(30, "Spotify.exe", None);
    platform.add_process(20, "Spotify.exe", Some(5));
    assert_eq!(finder(&platform).find_target_process(), Some(20));
  }

  #[test]
  fn test_ambiguous_candidates_are_stable() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_process(50, "Spotify.exe", Some(2));
    platform.add_process(40, "spotify.exe", Some(1));
    let finder = finder(&platform);

    let first = finder.find_target_process();
    assert_eq!(first, Some(40));
    for _ in 0..5 {
      assert_eq!(finder.find_target_process(), first);
    }
  }

  #[test]
  fn test_fallback_to_window_classification() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_process(11, "Spotify.exe", None);
    platform.add_process(12, "Spotify.exe", None);
    platform.add_window(11, 100, "Chrome_WidgetWin_0", "", true);
    platform.add_window(12, 200, "Chrome_WidgetWin_0", "Spotify Free", true);

    let finder = finder(&platform);
    assert_eq!(finder.find_target_process(), Some(12));
    assert!(finder.is_main_instance(12));
    assert!(!finder.is_main_instance(11));
  }

  #[test]
  fn test_helpers_only() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_process(11, "Spotify.exe", None);
    platform.add_window(11, 100, "Chrome_SystemMessageWindow", "", true);
    assert_eq!(finder(&platform).find_target_process(), None);
  }
}
