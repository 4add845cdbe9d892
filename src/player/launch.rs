//! Locate-or-launch, wait for input-idle, connect and verify, under one deadline.

use std::fmt;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::platform::{Platform, ShowCommand};

use super::endpoint::{ControlEndpoint, EndpointError, ReachabilityProbe, Status};
use super::finder::ProcessFinder;
use super::process::{Launcher, ProcessError};

/// Interval between process lookups after a launch that returned no pid.
pub const FIND_INTERVAL: Duration = Duration::from_secs(1);
/// Longest single wait for input-idle before cancellation is rechecked.
pub const IDLE_SLICE: Duration = Duration::from_secs(1);
/// Interval between connect attempts.
pub const CONNECT_INTERVAL: Duration = Duration::from_millis(500);
/// Longest deadline a sequence will schedule.
const MAX_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
  Idle,
  Launching,
  AwaitingIdle,
  Connecting,
  Verifying,
  Connected,
  Cancelled,
  Failed,
}

/// Startup failure categories, each with its own user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  ExecutableNotFound,
  /// The deadline passed while connecting or verifying.
  ConnectTimeout,
  /// The deadline passed before the player was up.
  StartupTimeout,
  /// Connection refused and the public endpoint is unreachable too.
  Blocked,
  /// Connected, but the endpoint reported no status.
  NoStatus,
  Unexpected,
}

impl FailureKind {
  pub fn message(self) -> &'static str {
    match self {
      FailureKind::ExecutableNotFound => {
        "Spotify could not be found. Install Spotify or set its path in the settings."
      }
      FailureKind::ConnectTimeout => {
        "Could not connect to Spotify. Make sure it is running and try again."
      }
      FailureKind::StartupTimeout => "Spotify did not start in time.",
      FailureKind::Blocked => {
        "Spotify's servers are unreachable. A firewall or a hosts file entry may be blocking them."
      }
      FailureKind::NoStatus => "Spotify did not report its status after connecting.",
      FailureKind::Unexpected => "An unexpected error occurred while starting Spotify.",
    }
  }
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.message())
  }
}

/// A classified startup failure.
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {detail}")]
pub struct LaunchError {
  pub kind: FailureKind,
  /// Technical detail for the log.
  pub detail: String,
}

impl LaunchError {
  pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
    Self {
      kind,
      detail: detail.into(),
    }
  }

  /// Failure reported for a deadline that expired during `phase`.
  pub fn timeout(phase: LaunchState, limit: Duration) -> Self {
    let kind = match phase {
      LaunchState::Connecting | LaunchState::Verifying => FailureKind::ConnectTimeout,
      _ => FailureKind::StartupTimeout,
    };
    Self::new(
      kind,
      format!("deadline of {:?} expired while {:?}", limit, phase),
    )
  }

  pub fn user_message(&self) -> &'static str {
    self.kind.message()
  }
}

impl From<ProcessError> for LaunchError {
  fn from(e: ProcessError) -> Self {
    match e {
      ProcessError::NotFound => LaunchError::new(FailureKind::ExecutableNotFound, e.to_string()),
      // The file vanished between resolving and spawning.
      ProcessError::SpawnFailed(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
        LaunchError::new(FailureKind::ExecutableNotFound, e.to_string())
      }
      ProcessError::SpawnFailed(_) => LaunchError::new(FailureKind::Unexpected, e.to_string()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
  /// The deadline expired while in `phase`.
  Timeout { phase: LaunchState },
  /// The owner cancelled the sequence.
  Shutdown,
}

/// A connected player.
pub struct Connection {
  pub pid: u32,
  /// Set when this sequence spawned the process.
  pub child: Option<Child>,
  pub status: Status,
}

/// A process launched by a sequence that did not finish.
pub struct Spawned {
  pub pid: u32,
  pub child: Option<Child>,
}

pub enum LaunchOutcome {
  Connected(Connection),
  /// Carries the process this sequence launched, if any; the owner decides its fate.
  Cancelled(CancelReason, Option<Spawned>),
  Failed(LaunchError),
}

impl fmt::Debug for LaunchOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LaunchOutcome::Connected(c) => write!(f, "Connected(pid {})", c.pid),
      LaunchOutcome::Cancelled(reason, _) => write!(f, "Cancelled({:?})", reason),
      LaunchOutcome::Failed(e) => write!(f, "Failed({})", e),
    }
  }
}

#[derive(Debug, Clone)]
pub struct LaunchSettings {
  pub timeout: Duration,
  /// Minimize the main window this long after it became input-idle.
  pub minimize_after: Option<Duration>,
}

/// Where a sequence starts.
enum Entry {
  /// Find a running instance or launch one.
  Locate,
  /// The process is known but may still be starting.
  Known(u32),
  /// The process is known and already accepts input.
  Attached(u32),
}

/// Why a phase stopped early.
enum Halt {
  Cancelled,
  Failed(LaunchError),
}

impl From<LaunchError> for Halt {
  fn from(e: LaunchError) -> Self {
    Halt::Failed(e)
  }
}

/// State of one launch sequence.
struct LaunchAttempt {
  state: LaunchState,
  started: Instant,
  deadline: Instant,
  last_error: Option<String>,
  /// Set once this sequence has launched the process.
  spawned: Option<Spawned>,
}

impl LaunchAttempt {
  fn new(timeout: Duration) -> Self {
    let started = Instant::now();
    Self {
      state: LaunchState::Idle,
      started,
      // Far-future deadlines are clamped rather than overflowing the clock.
      deadline: started
        .checked_add(timeout)
        .unwrap_or_else(|| started + MAX_DEADLINE),
      last_error: None,
      spawned: None,
    }
  }

  fn enter(&mut self, state: LaunchState) {
    log::info!(
      "Launch: {:?} -> {:?} ({:?} elapsed)",
      self.state,
      state,
      self.started.elapsed()
    );
    self.state = state;
  }
}

/// Sleep for `duration` unless `token` fires first. Returns false when cancelled.
pub(crate) async fn pause(token: &CancellationToken, duration: Duration) -> bool {
  tokio::select! {
    _ = token.cancelled() => false,
    _ = tokio::time::sleep(duration) => true,
  }
}

pub(crate) enum Idle {
  Ready,
  Exited,
  Cancelled,
}

/// Wait for `pid` to accept input, in [`IDLE_SLICE`] steps.
pub(crate) async fn wait_until_idle(
  platform: &Arc<dyn Platform>,
  pid: u32,
  token: &CancellationToken,
) -> Idle {
  loop {
    if token.is_cancelled() {
      return Idle::Cancelled;
    }
    let started = Instant::now();
    let platform_for_wait = platform.clone();
    let idle = tokio::task::spawn_blocking(move || {
      platform_for_wait.wait_for_input_idle(pid, IDLE_SLICE)
    })
    .await
    .unwrap_or(false);
    if idle {
      return Idle::Ready;
    }
    if !platform.is_process_alive(pid) {
      return Idle::Exited;
    }
    // Some platforms answer without waiting; keep the slice length anyway.
    let spent = started.elapsed();
    if spent < IDLE_SLICE && !pause(token, IDLE_SLICE - spent).await {
      return Idle::Cancelled;
    }
  }
}

/// Drives one process from "maybe running" to a verified endpoint connection.
pub struct LaunchSequencer {
  platform: Arc<dyn Platform>,
  finder: ProcessFinder,
  launcher: Arc<dyn Launcher>,
  endpoint: Arc<dyn ControlEndpoint>,
  probe: Arc<dyn ReachabilityProbe>,
  settings: LaunchSettings,
}

impl LaunchSequencer {
  pub fn new(
    platform: Arc<dyn Platform>,
    finder: ProcessFinder,
    launcher: Arc<dyn Launcher>,
    endpoint: Arc<dyn ControlEndpoint>,
    probe: Arc<dyn ReachabilityProbe>,
    settings: LaunchSettings,
  ) -> Self {
    Self {
      platform,
      finder,
      launcher,
      endpoint,
      probe,
      settings,
    }
  }

  /// Find a running instance or launch one, then connect.
  pub async fn run(&self, shutdown: &CancellationToken) -> LaunchOutcome {
    self.execute(Entry::Locate, shutdown).await
  }

  /// Connect to `pid`, which may still be starting up.
  pub async fn run_known(&self, pid: u32, shutdown: &CancellationToken) -> LaunchOutcome {
    self.execute(Entry::Known(pid), shutdown).await
  }

  /// Connect to `pid`, which already accepts input.
  pub async fn attach(&self, pid: u32, shutdown: &CancellationToken) -> LaunchOutcome {
    self.execute(Entry::Attached(pid), shutdown).await
  }

  async fn execute(&self, entry: Entry, shutdown: &CancellationToken) -> LaunchOutcome {
    let token = shutdown.child_token();
    let timed_out = Arc::new(AtomicBool::new(false));
    let mut attempt = LaunchAttempt::new(self.settings.timeout);

    let timer = {
      let token = token.clone();
      let timed_out = timed_out.clone();
      let deadline = attempt.deadline;
      tokio::spawn(async move {
        tokio::select! {
          _ = token.cancelled() => {}
          _ = tokio::time::sleep_until(deadline) => {
            timed_out.store(true, Ordering::SeqCst);
            token.cancel();
          }
        }
      })
    };

    let result = self.drive(entry, &mut attempt, &token, shutdown).await;
    timer.abort();

    match result {
      Ok(connection) => {
        attempt.enter(LaunchState::Connected);
        LaunchOutcome::Connected(connection)
      }
      Err(Halt::Cancelled) => {
        let reason = if timed_out.load(Ordering::SeqCst) {
          CancelReason::Timeout {
            phase: attempt.state,
          }
        } else {
          CancelReason::Shutdown
        };
        if let Some(last) = &attempt.last_error {
          log::info!("Launch cancelled ({:?}), last error: {}", reason, last);
        }
        attempt.enter(LaunchState::Cancelled);
        LaunchOutcome::Cancelled(reason, attempt.spawned.take())
      }
      Err(Halt::Failed(e)) => {
        attempt.enter(LaunchState::Failed);
        LaunchOutcome::Failed(e)
      }
    }
  }

  async fn drive(
    &self,
    entry: Entry,
    attempt: &mut LaunchAttempt,
    token: &CancellationToken,
    shutdown: &CancellationToken,
  ) -> Result<Connection, Halt> {
    let (pid, needs_idle) = match entry {
      Entry::Locate => {
        attempt.enter(LaunchState::Launching);
        let pid = self.locate_or_launch(attempt, token).await?;
        (pid, true)
      }
      Entry::Known(pid) => (pid, true),
      Entry::Attached(pid) => (pid, false),
    };

    if needs_idle {
      attempt.enter(LaunchState::AwaitingIdle);
      match wait_until_idle(&self.platform, pid, token).await {
        Idle::Ready => {}
        Idle::Cancelled => return Err(Halt::Cancelled),
        Idle::Exited => {
          return Err(
            LaunchError::new(
              FailureKind::Unexpected,
              format!("process {} exited during startup", pid),
            )
            .into(),
          )
        }
      }
    }
    self.schedule_minimize(pid, shutdown);

    attempt.enter(LaunchState::Connecting);
    self.connect(attempt, token).await?;

    attempt.enter(LaunchState::Verifying);
    let status = match self.endpoint.status().await {
      Ok(Some(status)) => status,
      Ok(None) => {
        return Err(LaunchError::new(FailureKind::NoStatus, "endpoint returned no status").into())
      }
      Err(e) => return Err(LaunchError::new(FailureKind::Unexpected, e.to_string()).into()),
    };

    let child = attempt.spawned.take().and_then(|s| s.child);
    Ok(Connection { pid, child, status })
  }

  async fn locate_or_launch(
    &self,
    attempt: &mut LaunchAttempt,
    token: &CancellationToken,
  ) -> Result<u32, Halt> {
    if let Some(pid) = self.finder.find_target_process() {
      log::info!("Found running {} (pid {})", self.finder.executable(), pid);
      return Ok(pid);
    }

    let launched = self.launcher.launch().map_err(LaunchError::from)?;
    if let Some(pid) = launched.pid {
      log::info!("Launched {} (pid {})", self.finder.executable(), pid);
      attempt.spawned = Some(Spawned {
        pid,
        child: launched.child,
      });
      return Ok(pid);
    }

    log::info!("Launch returned no process, waiting for it to appear");
    loop {
      if !pause(token, FIND_INTERVAL).await {
        return Err(Halt::Cancelled);
      }
      if let Some(pid) = self.finder.find_target_process() {
        log::info!("Found launched {} (pid {})", self.finder.executable(), pid);
        attempt.spawned = Some(Spawned { pid, child: None });
        return Ok(pid);
      }
    }
  }

  async fn connect(&self, attempt: &mut LaunchAttempt, token: &CancellationToken) -> Result<(), Halt> {
    let mut probed = false;
    loop {
      if token.is_cancelled() {
        return Err(Halt::Cancelled);
      }

      match self.endpoint.connect().await {
        Ok(true) => return Ok(()),
        Ok(false) => log::debug!("Endpoint not ready yet"),
        Err(EndpointError::ConnectionRefused(detail)) => {
          if !probed {
            probed = true;
            if !self.probe.is_reachable().await {
              return Err(LaunchError::new(FailureKind::Blocked, detail).into());
            }
          }
          log::debug!("Endpoint refused connection: {}", detail);
          attempt.last_error = Some(detail);
        }
        Err(e) => {
          log::debug!("Connect attempt failed: {}", e);
          attempt.last_error = Some(e.to_string());
        }
      }

      if !pause(token, CONNECT_INTERVAL).await {
        return Err(Halt::Cancelled);
      }
    }
  }

  /// Minimizing straight away can swallow the player's first status update.
  /// Runs past the end of the sequence, so it follows `shutdown` rather than the deadline.
  fn schedule_minimize(&self, pid: u32, shutdown: &CancellationToken) {
    let Some(delay) = self.settings.minimize_after else {
      return;
    };
    let platform = self.platform.clone();
    let locator = self.finder.locator().clone();
    let token = shutdown.clone();
    tokio::spawn(async move {
      if !pause(&token, delay).await {
        return;
      }
      match locator.main_window(pid) {
        Some(window) => {
          log::info!("Minimizing Spotify window {}", window);
          platform.show(window, ShowCommand::Minimize);
        }
        None => log::debug!("No main window to minimize for pid {}", pid),
      }
    });
  }
}
