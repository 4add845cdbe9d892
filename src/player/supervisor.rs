//! Lifecycle owner for one supervised player.
//!
//! Holds at most one process generation. A generation starts with `ensure_started` and
//! ends with exactly one `Exited` event, a `kill`, or `dispose`. Every background task of a
//! generation runs under that generation's cancellation token and checks the generation
//! number before touching shared state, so stale tasks are harmless.

use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, StartMode, VolumeControlMode};
use crate::platform::{Platform, ShowCommand, WindowHandle, WindowPlacement};

use super::action::{Action, Delivery, VolumeAction};
use super::endpoint::{ControlEndpoint, EndpointFactory, ReachabilityProbe, Status};
use super::events::{EventHub, EventKind, SubscriptionId, SupervisorEvent};
use super::finder::ProcessFinder;
use super::launch::{
  pause, CancelReason, LaunchError, LaunchOutcome, LaunchSequencer, LaunchSettings,
};
use super::process::Launcher;
use super::watcher::ProcessWatcher;

/// Liveness check interval while connected.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Time the player gets to close its window before it is terminated.
pub const KILL_GRACE: Duration = Duration::from_secs(1);

/// Called once for a startup that cannot succeed.
pub type FatalHandler = Arc<dyn Fn(&LaunchError) + Send + Sync>;

/// Logs the failure and exits the host process.
pub fn exit_on_failure() -> FatalHandler {
  Arc::new(|error: &LaunchError| {
    log::error!("{}", error.user_message());
    log::error!("Startup failed: {}", error);
    std::process::exit(1);
  })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Idle,
  Starting,
  Running,
}

struct Target {
  pid: u32,
  child: Option<Child>,
}

struct State {
  phase: Phase,
  generation: u64,
  target: Option<Target>,
  endpoint: Option<Arc<dyn ControlEndpoint>>,
  generation_token: Option<CancellationToken>,
}

/// Last fetched status. `epoch` moves on every invalidation so a fetch that raced one is
/// not stored.
#[derive(Default)]
struct StatusCache {
  epoch: u64,
  status: Option<Status>,
}

impl StatusCache {
  fn set(&mut self, status: Status) {
    self.status = Some(status);
  }

  fn invalidate(&mut self) {
    self.epoch += 1;
    self.status = None;
  }
}

struct Inner {
  config: AppConfig,
  platform: Arc<dyn Platform>,
  finder: ProcessFinder,
  endpoint_factory: EndpointFactory,
  probe: Arc<dyn ReachabilityProbe>,
  launcher: Arc<dyn Launcher>,
  hub: EventHub,
  fatal: RwLock<FatalHandler>,
  root: CancellationToken,
  state: Mutex<State>,
  status: Mutex<StatusCache>,
  disposed: AtomicBool,
}

/// Cheap to clone; clones share the same player.
#[derive(Clone)]
pub struct Supervisor {
  inner: Arc<Inner>,
}

impl Supervisor {
  pub fn new(
    config: AppConfig,
    platform: Arc<dyn Platform>,
    endpoint_factory: EndpointFactory,
    probe: Arc<dyn ReachabilityProbe>,
    launcher: Arc<dyn Launcher>,
  ) -> Self {
    let finder = ProcessFinder::new(platform.clone(), config.executable_name.clone());
    Self {
      inner: Arc::new(Inner {
        config,
        platform,
        finder,
        endpoint_factory,
        probe,
        launcher,
        hub: EventHub::new(),
        fatal: RwLock::new(exit_on_failure()),
        root: CancellationToken::new(),
        state: Mutex::new(State {
          phase: Phase::Idle,
          generation: 0,
          target: None,
          endpoint: None,
          generation_token: None,
        }),
        status: Mutex::new(StatusCache::default()),
        disposed: AtomicBool::new(false),
      }),
    }
  }

  /// Replace what happens on an unrecoverable startup failure.
  pub fn with_fatal_handler(self, handler: FatalHandler) -> Self {
    *self.inner.fatal.write() = handler;
    self
  }

  pub fn config(&self) -> &AppConfig {
    &self.inner.config
  }

  pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
  where
    F: Fn(&SupervisorEvent) + Send + Sync + 'static,
  {
    self.inner.hub.on(kind, callback)
  }

  pub fn on_any<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&SupervisorEvent) + Send + Sync + 'static,
  {
    self.inner.hub.on_any(callback)
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.inner.hub.unsubscribe(id)
  }

  /// Start supervising in the configured start mode.
  pub fn ensure_started(&self) -> Option<JoinHandle<()>> {
    self.ensure_started_with(self.inner.config.start_mode)
  }

  /// Start a new generation unless one is starting or running.
  ///
  /// Returns the handle of the startup task, or `None` if nothing was started.
  pub fn ensure_started_with(&self, mode: StartMode) -> Option<JoinHandle<()>> {
    if self.inner.disposed.load(Ordering::SeqCst) {
      log::warn!("ensure_started() after dispose");
      return None;
    }

    let (generation, token) = {
      let mut state = self.inner.state.lock();
      if state.phase != Phase::Idle {
        log::debug!("ensure_started(): already {:?}", state.phase);
        return None;
      }
      state.phase = Phase::Starting;
      state.generation += 1;
      let token = self.inner.root.child_token();
      state.generation_token = Some(token.clone());
      (state.generation, token)
    };

    log::info!("Starting supervision ({:?}, generation {})", mode, generation);
    let inner = self.inner.clone();
    Some(tokio::spawn(async move {
      inner.start(generation, mode, token).await;
    }))
  }

  /// True while a target is set and its main window exists.
  pub fn is_running(&self) -> bool {
    self.inner.main_window().is_some()
  }

  pub fn pid(&self) -> Option<u32> {
    self.inner.state.lock().target.as_ref().map(|t| t.pid)
  }

  /// Last known status, fetched again after any change notification.
  pub async fn status(&self) -> Option<Status> {
    let epoch = {
      let cache = self.inner.status.lock();
      if let Some(status) = &cache.status {
        return Some(status.clone());
      }
      cache.epoch
    };
    let endpoint = self.inner.state.lock().endpoint.clone()?;
    match endpoint.status().await {
      Ok(Some(status)) => {
        let mut cache = self.inner.status.lock();
        if cache.epoch == epoch {
          cache.set(status.clone());
        }
        Some(status)
      }
      Ok(None) => None,
      Err(e) => {
        log::debug!("Status query failed: {}", e);
        None
      }
    }
  }

  /// Deliver `action` to the player. Does nothing when it is not running.
  pub async fn send_action(&self, action: Action) {
    let Some(window) = self.inner.main_window() else {
      log::debug!("Ignoring {:?}: player not running", action);
      return;
    };

    match action.delivery() {
      Delivery::AppCommand(command) => {
        if !self.inner.platform.send_app_command(window, command) {
          log::debug!("App command {:?} was not delivered", command);
        }
      }
      Delivery::Volume(volume) => self.inner.change_volume(volume).await,
      Delivery::ShowPlayer => {
        self.show_player();
      }
      Delivery::Inert => {}
    }
  }

  /// Restore and focus the main window.
  pub fn show_player(&self) -> bool {
    let Some(window) = self.inner.main_window() else {
      return false;
    };
    let platform = &self.inner.platform;
    if matches!(
      platform.placement(window),
      WindowPlacement::Minimized | WindowPlacement::Hidden
    ) {
      platform.show(window, ShowCommand::Restore);
    }
    platform.set_foreground(window)
  }

  pub fn minimize(&self) -> bool {
    self
      .inner
      .main_window()
      .is_some_and(|window| self.inner.platform.show(window, ShowCommand::Minimize))
  }

  pub fn placement(&self) -> Option<WindowPlacement> {
    self
      .inner
      .main_window()
      .map(|window| self.inner.platform.placement(window))
  }

  /// Close the player, then terminate it if it is still alive after [`KILL_GRACE`].
  ///
  /// Ends the current generation without an `Exited` event. Never fails.
  pub async fn kill(&self) {
    let (target, endpoint) = self.inner.end_generation();

    if let Some(target) = target {
      let pid = target.pid;
      if let Some(window) = self.inner.finder.locator().main_window(pid) {
        log::info!("Closing Spotify window {}", window);
        self.inner.platform.close(window);
      }
      tokio::time::sleep(KILL_GRACE).await;
      self.inner.terminate(target).await;
    }

    if let Some(endpoint) = endpoint {
      endpoint.close();
    }
  }

  /// Tear everything down. Later calls do nothing.
  pub fn dispose(&self) {
    if self.inner.disposed.swap(true, Ordering::SeqCst) {
      return;
    }
    log::info!("Disposing supervisor");
    self.inner.root.cancel();
    let (_target, endpoint) = self.inner.end_generation();
    if let Some(endpoint) = endpoint {
      endpoint.close();
    }
    self.inner.hub.clear();
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.disposed.load(Ordering::SeqCst)
  }
}

impl Inner {
  async fn start(self: Arc<Self>, generation: u64, mode: StartMode, token: CancellationToken) {
    let endpoint = (self.endpoint_factory)();
    let sequencer = LaunchSequencer::new(
      self.platform.clone(),
      self.finder.clone(),
      self.launcher.clone(),
      endpoint.clone(),
      self.probe.clone(),
      LaunchSettings {
        timeout: self.config.startup_timeout(),
        minimize_after: self
          .config
          .minimize_on_startup
          .then(|| self.config.minimize_delay()),
      },
    );

    let outcome = match mode {
      StartMode::Launch => sequencer.run(&token).await,
      StartMode::WaitForUser => {
        let watcher = ProcessWatcher::new(self.platform.clone(), self.finder.clone());
        match self.finder.find_target_process() {
          Some(pid) => sequencer.run_known(pid, &token).await,
          None => match watcher.watch(&token).await {
            Some(pid) => sequencer.attach(pid, &token).await,
            None => LaunchOutcome::Cancelled(CancelReason::Shutdown, None),
          },
        }
      }
    };

    self.finish_start(generation, outcome, endpoint, token);
  }

  fn finish_start(
    self: &Arc<Self>,
    generation: u64,
    outcome: LaunchOutcome,
    endpoint: Arc<dyn ControlEndpoint>,
    token: CancellationToken,
  ) {
    let connection = match outcome {
      LaunchOutcome::Connected(connection) => connection,
      LaunchOutcome::Cancelled(CancelReason::Shutdown, spawned) => {
        log::info!("Startup cancelled");
        endpoint.close();
        if !self.reset_if_current(generation) {
          self.stop_orphan(spawned.map(|s| Target {
            pid: s.pid,
            child: s.child,
          }));
        }
        return;
      }
      LaunchOutcome::Cancelled(CancelReason::Timeout { phase }, _) => {
        endpoint.close();
        if self.reset_if_current(generation) {
          self.fail(&LaunchError::timeout(phase, self.config.startup_timeout()));
        }
        return;
      }
      LaunchOutcome::Failed(error) => {
        endpoint.close();
        if self.reset_if_current(generation) {
          self.fail(&error);
        }
        return;
      }
    };

    {
      let mut state = self.state.lock();
      if state.generation != generation || state.phase != Phase::Starting {
        log::debug!("Dropping connection of stale generation {}", generation);
        drop(state);
        endpoint.close();
        if connection.child.is_some() {
          self.stop_orphan(Some(Target {
            pid: connection.pid,
            child: connection.child,
          }));
        }
        return;
      }
      state.phase = Phase::Running;
      state.target = Some(Target {
        pid: connection.pid,
        child: connection.child,
      });
      state.endpoint = Some(endpoint.clone());
    }

    log::info!("Connected to Spotify (pid {})", connection.pid);
    self.status.lock().set(connection.status.clone());
    self.hub.emit(&SupervisorEvent::Connected(connection.status));

    tokio::spawn(self.clone().relay(endpoint, token.clone()));
    tokio::spawn(self.clone().monitor_exit(generation, token));
  }

  /// Re-raise endpoint notifications in arrival order.
  async fn relay(self: Arc<Self>, endpoint: Arc<dyn ControlEndpoint>, token: CancellationToken) {
    let events = endpoint.events();
    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        event = events.recv() => {
          let Ok(event) = event else {
            break;
          };
          self.status.lock().invalidate();
          self.hub.emit(&event.into());
        }
      }
    }
  }

  async fn monitor_exit(self: Arc<Self>, generation: u64, token: CancellationToken) {
    while pause(&token, EXIT_POLL_INTERVAL).await {
      if self.target_exited(generation) {
        self.handle_exit(generation);
        return;
      }
    }
  }

  fn target_exited(&self, generation: u64) -> bool {
    let pid = {
      let mut state = self.state.lock();
      if state.generation != generation {
        return false;
      }
      let Some(target) = state.target.as_mut() else {
        return false;
      };
      if let Some(child) = target.child.as_mut() {
        match child.try_wait() {
          Ok(Some(status)) => {
            log::info!("Spotify exited with {}", status);
            return true;
          }
          Ok(None) => return false,
          Err(e) => log::debug!("try_wait failed: {}", e),
        }
      }
      target.pid
    };
    !self.platform.is_process_alive(pid)
  }

  fn handle_exit(&self, generation: u64) {
    let endpoint = {
      let mut state = self.state.lock();
      if state.generation != generation || state.phase != Phase::Running {
        return;
      }
      state.phase = Phase::Idle;
      state.target = None;
      if let Some(token) = state.generation_token.take() {
        token.cancel();
      }
      state.endpoint.take()
    };
    if let Some(endpoint) = endpoint {
      endpoint.close();
    }
    self.status.lock().invalidate();
    log::info!("Spotify exited (generation {})", generation);
    self.hub.emit(&SupervisorEvent::Exited);
  }

  /// Back to idle if `generation` is still the current one.
  fn reset_if_current(&self, generation: u64) -> bool {
    let mut state = self.state.lock();
    if state.generation != generation {
      return false;
    }
    state.phase = Phase::Idle;
    state.target = None;
    state.endpoint = None;
    state.generation_token = None;
    true
  }

  /// Invalidate the current generation and hand back what it owned.
  fn end_generation(&self) -> (Option<Target>, Option<Arc<dyn ControlEndpoint>>) {
    let owned = {
      let mut state = self.state.lock();
      state.generation += 1;
      state.phase = Phase::Idle;
      if let Some(token) = state.generation_token.take() {
        token.cancel();
      }
      (state.target.take(), state.endpoint.take())
    };
    self.status.lock().invalidate();
    owned
  }

  /// Stop a process this generation spawned after `kill` ended the generation under it.
  fn stop_orphan(self: &Arc<Self>, spawned: Option<Target>) {
    let Some(target) = spawned else {
      return;
    };
    if self.disposed.load(Ordering::SeqCst) {
      return;
    }
    log::info!("Stopping Spotify (pid {}) launched by a killed startup", target.pid);
    let inner = self.clone();
    tokio::spawn(async move { inner.terminate(target).await });
  }

  async fn terminate(&self, target: Target) {
    let pid = target.pid;
    match target.child {
      Some(mut child) => {
        let result = tokio::task::spawn_blocking(move || {
          if let Ok(None) = child.try_wait() {
            child.kill()?;
          }
          child.wait().map(|_| ())
        })
        .await;
        match result {
          Ok(Ok(())) => log::info!("Spotify (pid {}) stopped", pid),
          Ok(Err(e)) => log::warn!("Failed to stop Spotify (pid {}): {}", pid, e),
          Err(e) => log::warn!("Process cleanup task failed: {}", e),
        }
      }
      None => {
        if self.platform.is_process_alive(pid) {
          match self.platform.terminate(pid) {
            Ok(()) => log::info!("Spotify (pid {}) terminated", pid),
            Err(e) => log::warn!("Failed to terminate Spotify (pid {}): {}", pid, e),
          }
        }
      }
    }
  }

  fn fail(&self, error: &LaunchError) {
    log::error!("Startup failed: {}", error);
    let handler = self.fatal.read().clone();
    handler(error);
  }

  fn main_window(&self) -> Option<WindowHandle> {
    let pid = self.state.lock().target.as_ref().map(|t| t.pid)?;
    self.finder.locator().main_window(pid)
  }

  async fn change_volume(&self, volume: VolumeAction) {
    match self.config.volume_control_mode {
      VolumeControlMode::SystemWide => {
        self.platform.send_media_key(volume.media_key());
      }
      VolumeControlMode::TargetOnly => {
        let Some(endpoint) = self.state.lock().endpoint.clone() else {
          return;
        };
        let result = match volume {
          VolumeAction::Up => endpoint.increment_volume().await,
          VolumeAction::Down => endpoint.decrement_volume().await,
          VolumeAction::Mute => endpoint.toggle_mute().await,
        };
        if let Err(e) = result {
          log::warn!("Volume {:?} failed: {}", volume, e);
        }
      }
    }
  }
}
