//! Detects a player instance started by the user.
//!
//! Processes are discovered by polling the process table, including the ones already running
//! when the watch begins. Each pid gets its own worker that waits for input-idle and then for
//! a main window; the first pid to get one wins and the watch ends.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use tokio_util::sync::CancellationToken;

use crate::platform::Platform;

use super::finder::ProcessFinder;
use super::launch::{pause, wait_until_idle, Idle};

/// Process table polling interval.
pub const FEED_INTERVAL: Duration = Duration::from_secs(1);
/// Main-window check interval per candidate.
pub const CLASSIFY_INTERVAL: Duration = Duration::from_millis(500);

pub struct ProcessWatcher {
  platform: Arc<dyn Platform>,
  finder: ProcessFinder,
}

impl ProcessWatcher {
  pub fn new(platform: Arc<dyn Platform>, finder: ProcessFinder) -> Self {
    Self { platform, finder }
  }

  /// Wait until a process of the executable becomes the main instance.
  ///
  /// An instance that is still creating its window when the watch begins is picked up too.
  /// Returns `None` when `shutdown` fires first. No deadline applies.
  pub async fn watch(&self, shutdown: &CancellationToken) -> Option<u32> {
    let token = shutdown.child_token();
    let (new_tx, new_rx) = async_channel::unbounded::<u32>();
    let (found_tx, found_rx) = async_channel::bounded::<u32>(1);

    log::info!("Waiting for {} to start", self.finder.executable());
    tokio::spawn(feed(
      self.platform.clone(),
      self.finder.executable().to_string(),
      new_tx,
      token.clone(),
    ));

    let found = loop {
      tokio::select! {
        biased;
        Ok(pid) = found_rx.recv() => break Some(pid),
        _ = token.cancelled() => break None,
        Ok(pid) = new_rx.recv() => {
          log::debug!("New {} process: {}", self.finder.executable(), pid);
          tokio::spawn(confirm(
            self.platform.clone(),
            self.finder.clone(),
            pid,
            found_tx.clone(),
            token.clone(),
          ));
        }
      }
    };

    // One-shot: stop the feed and every remaining worker.
    token.cancel();
    if let Some(pid) = found {
      log::info!("{} started by user (pid {})", self.finder.executable(), pid);
    }
    found
  }
}

/// Emits every pid of `executable` once.
async fn feed(
  platform: Arc<dyn Platform>,
  executable: String,
  tx: Sender<u32>,
  token: CancellationToken,
) {
  let mut seen = HashSet::new();
  loop {
    for process in platform.processes(&executable) {
      if seen.insert(process.pid) && tx.send(process.pid).await.is_err() {
        return;
      }
    }
    if !pause(&token, FEED_INTERVAL).await {
      return;
    }
  }
}

/// Reports `pid` once it owns a main window. Gives up if it exits.
async fn confirm(
  platform: Arc<dyn Platform>,
  finder: ProcessFinder,
  pid: u32,
  found: Sender<u32>,
  token: CancellationToken,
) {
  match wait_until_idle(&platform, pid, &token).await {
    Idle::Ready => {}
    Idle::Exited | Idle::Cancelled => return,
  }

  loop {
    if finder.is_main_instance(pid) {
      // Only the first winner fits; later ones are dropped.
      let _ = found.try_send(pid);
      return;
    }
    if !platform.is_process_alive(pid) {
      log::debug!("Process {} exited before showing a main window", pid);
      return;
    }
    if !pause(&token, CLASSIFY_INTERVAL).await {
      return;
    }
  }
}
