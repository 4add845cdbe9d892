//! Window lookup and main-window classification.

use std::sync::Arc;

use crate::platform::{Platform, WindowHandle};

/// Class names the player's main window has carried across its releases.
pub const MAIN_WINDOW_CLASSES: [&str; 3] =
  ["SpotifyMainWindow", "Chrome_WidgetWin_0", "Chrome_WidgetWin_1"];

/// Returns true if `class` is one of [`MAIN_WINDOW_CLASSES`].
pub fn is_main_window_class(class: &str) -> bool {
  MAIN_WINDOW_CLASSES.contains(&class)
}

/// Stateless window queries. Every call enumerates afresh.
#[derive(Clone)]
pub struct WindowLocator {
  platform: Arc<dyn Platform>,
}

impl WindowLocator {
  pub fn new(platform: Arc<dyn Platform>) -> Self {
    Self { platform }
  }

  /// All top-level windows owned by `pid`.
  pub fn find_windows(&self, pid: u32) -> Vec<WindowHandle> {
    self.platform.top_level_windows(pid)
  }

  pub fn title(&self, window: WindowHandle) -> Option<String> {
    self.platform.window_title(window)
  }

  pub fn class_name(&self, window: WindowHandle) -> Option<String> {
    self.platform.window_class(window)
  }

  /// A window is the main window when its class is known and it has a title.
  pub fn classify_as_main(&self, window: WindowHandle) -> bool {
    let Some(class) = self.class_name(window) else {
      return false;
    };
    if !is_main_window_class(&class) {
      return false;
    }
    self.title(window).is_some_and(|title| !title.is_empty())
  }

  /// First window of `pid` that classifies as main.
  pub fn main_window(&self, pid: u32) -> Option<WindowHandle> {
    self
      .find_windows(pid)
      .into_iter()
      .find(|window| self.classify_as_main(*window))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakePlatform;

  #[test]
  fn test_classification_requires_known_class() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_window(100, 1, "Chrome_WidgetWin_0", "Track \u{2014} Artist", false);
    platform.add_window(100, 2, "SpotifyMainWindow", "Spotify", false);
    platform.add_window(100, 3, "Chrome_WidgetWin_1", "Spotify Premium", false);
    platform.add_window(100, 4, "Chrome_WidgetWin_2", "Spotify", false);
    platform.add_window(100, 5, "GDI+ Hook Window Class", "GDI+ Window", false);

    let locator = WindowLocator::new(platform);
    assert!(locator.classify_as_main(WindowHandle(1)));
    assert!(locator.classify_as_main(WindowHandle(2)));
    assert!(locator.classify_as_main(WindowHandle(3)));
    assert!(!locator.classify_as_main(WindowHandle(4)));
    assert!(!locator.classify_as_main(WindowHandle(5)));
  }

  #[test]
  fn test_classification_requires_title() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_window(100, 1, "Chrome_WidgetWin_1", "", false);
    platform.add_window(100, 2, "Chrome_WidgetWin_1", "x", false);

    let locator = WindowLocator::new(platform);
    assert!(!locator.classify_as_main(WindowHandle(1)));
    assert!(locator.classify_as_main(WindowHandle(2)));
    assert_eq!(locator.main_window(100), Some(WindowHandle(2)));
  }

  #[test]
  fn test_unknown_window_is_not_main() {
    let locator = WindowLocator::new(Arc::new(FakePlatform::new()));
    assert!(!locator.classify_as_main(WindowHandle(42)));
    assert!(locator.find_windows(1).is_empty());
  }

  #[test]
  fn test_enumeration_is_not_memoized() {
    let platform = Arc::new(FakePlatform::new());
    let locator = WindowLocator::new(platform.clone());
    assert!(locator.main_window(100).is_none());

    platform.add_window(100, 7, "SpotifyMainWindow", "Spotify", false);
    assert_eq!(locator.main_window(100), Some(WindowHandle(7)));
  }
}
