//! In-memory stand-ins for the OS, the control endpoint and the launcher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::platform::{
  image_name_matches, AppCommand, AppVolume, MediaKey, Platform, PlatformError, ProcessInfo,
  ShowCommand, WindowHandle, WindowPlacement,
};
use crate::player::{
  ControlEndpoint, EndpointError, EndpointEvent, EndpointFactory, LaunchedProcess, Launcher,
  ProcessError, ReachabilityProbe, Status, Track,
};

struct FakeProcess {
  pid: u32,
  image: String,
  main_window: Option<WindowHandle>,
}

struct FakeWindow {
  pid: u32,
  handle: WindowHandle,
  class: String,
  title: String,
  placement: WindowPlacement,
}

#[derive(Default)]
struct PlatformState {
  processes: Vec<FakeProcess>,
  windows: Vec<FakeWindow>,
  not_idle: Vec<u32>,
  app_commands: Vec<(WindowHandle, AppCommand)>,
  media_keys: Vec<MediaKey>,
  shows: Vec<(WindowHandle, ShowCommand)>,
  foreground: Vec<WindowHandle>,
  closed: Vec<WindowHandle>,
  terminated: Vec<u32>,
  volumes: HashMap<u32, AppVolume>,
}

/// Scriptable process and window table.
#[derive(Default)]
pub struct FakePlatform {
  state: Mutex<PlatformState>,
}

impl FakePlatform {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a process. `main_window` is what the OS would report as primary window;
  /// a matching window entry is added for it.
  pub fn add_process(&self, pid: u32, image: &str, main_window: Option<isize>) {
    let mut state = self.state.lock();
    state.processes.push(FakeProcess {
      pid,
      image: image.to_string(),
      main_window: main_window.map(WindowHandle),
    });
    if let Some(handle) = main_window {
      state.windows.push(FakeWindow {
        pid,
        handle: WindowHandle(handle),
        class: "Chrome_WidgetWin_0".to_string(),
        title: "Spotify".to_string(),
        placement: WindowPlacement::Normal,
      });
    }
  }

  /// Register a window. A window with the same handle is replaced.
  pub fn add_window(&self, pid: u32, handle: isize, class: &str, title: &str, hidden: bool) {
    let mut state = self.state.lock();
    state.windows.retain(|w| w.handle != WindowHandle(handle));
    state.windows.push(FakeWindow {
      pid,
      handle: WindowHandle(handle),
      class: class.to_string(),
      title: title.to_string(),
      placement: if hidden {
        WindowPlacement::Hidden
      } else {
        WindowPlacement::Normal
      },
    });
  }

  pub fn set_placement(&self, handle: isize, placement: WindowPlacement) {
    let mut state = self.state.lock();
    if let Some(window) = state.windows.iter_mut().find(|w| w.handle == WindowHandle(handle)) {
      window.placement = placement;
    }
  }

  /// Remove a process and its windows, as if it exited.
  pub fn remove_process(&self, pid: u32) {
    let mut state = self.state.lock();
    state.processes.retain(|p| p.pid != pid);
    state.windows.retain(|w| w.pid != pid);
  }

  pub fn set_idle(&self, pid: u32, idle: bool) {
    let mut state = self.state.lock();
    state.not_idle.retain(|p| *p != pid);
    if !idle {
      state.not_idle.push(pid);
    }
  }

  pub fn set_volume(&self, pid: u32, level: f32, muted: bool) {
    self.state.lock().volumes.insert(pid, AppVolume { level, muted });
  }

  pub fn volume(&self, pid: u32) -> Option<AppVolume> {
    self.state.lock().volumes.get(&pid).copied()
  }

  pub fn app_commands(&self) -> Vec<(WindowHandle, AppCommand)> {
    self.state.lock().app_commands.clone()
  }

  pub fn media_keys(&self) -> Vec<MediaKey> {
    self.state.lock().media_keys.clone()
  }

  pub fn shows(&self) -> Vec<(WindowHandle, ShowCommand)> {
    self.state.lock().shows.clone()
  }

  pub fn foreground(&self) -> Vec<WindowHandle> {
    self.state.lock().foreground.clone()
  }

  pub fn closed(&self) -> Vec<WindowHandle> {
    self.state.lock().closed.clone()
  }

  pub fn terminated(&self) -> Vec<u32> {
    self.state.lock().terminated.clone()
  }
}

impl Platform for FakePlatform {
  fn processes(&self, executable: &str) -> Vec<ProcessInfo> {
    let state = self.state.lock();
    let mut found: Vec<ProcessInfo> = state
      .processes
      .iter()
      .filter(|p| image_name_matches(&p.image, executable))
      .map(|p| ProcessInfo {
        pid: p.pid,
        main_window: p.main_window,
      })
      .collect();
    found.sort_by_key(|p| p.pid);
    found
  }

  fn is_process_alive(&self, pid: u32) -> bool {
    self.state.lock().processes.iter().any(|p| p.pid == pid)
  }

  fn wait_for_input_idle(&self, pid: u32, _timeout: Duration) -> bool {
    let state = self.state.lock();
    state.processes.iter().any(|p| p.pid == pid) && !state.not_idle.contains(&pid)
  }

  fn terminate(&self, pid: u32) -> Result<(), PlatformError> {
    if !self.is_process_alive(pid) {
      return Err(PlatformError::ProcessNotFound(pid));
    }
    self.remove_process(pid);
    self.state.lock().terminated.push(pid);
    Ok(())
  }

  fn top_level_windows(&self, pid: u32) -> Vec<WindowHandle> {
    let state = self.state.lock();
    state
      .windows
      .iter()
      .filter(|w| w.pid == pid)
      .map(|w| w.handle)
      .collect()
  }

  fn window_class(&self, window: WindowHandle) -> Option<String> {
    let state = self.state.lock();
    state
      .windows
      .iter()
      .find(|w| w.handle == window)
      .map(|w| w.class.clone())
  }

  fn window_title(&self, window: WindowHandle) -> Option<String> {
    let state = self.state.lock();
    state
      .windows
      .iter()
      .find(|w| w.handle == window)
      .map(|w| w.title.clone())
  }

  fn placement(&self, window: WindowHandle) -> WindowPlacement {
    let state = self.state.lock();
    state
      .windows
      .iter()
      .find(|w| w.handle == window)
      .map(|w| w.placement)
      .unwrap_or(WindowPlacement::Unknown)
  }

  fn show(&self, window: WindowHandle, command: ShowCommand) -> bool {
    let mut state = self.state.lock();
    state.shows.push((window, command));
    let placement = match command {
      ShowCommand::Minimize => WindowPlacement::Minimized,
      ShowCommand::Hide => WindowPlacement::Hidden,
      ShowCommand::Restore | ShowCommand::Show => WindowPlacement::Normal,
    };
    match state.windows.iter_mut().find(|w| w.handle == window) {
      Some(w) => {
        w.placement = placement;
        true
      }
      None => false,
    }
  }

  fn set_foreground(&self, window: WindowHandle) -> bool {
    self.state.lock().foreground.push(window);
    true
  }

  fn close(&self, window: WindowHandle) -> bool {
    self.state.lock().closed.push(window);
    true
  }

  fn send_app_command(&self, window: WindowHandle, command: AppCommand) -> bool {
    self.state.lock().app_commands.push((window, command));
    true
  }

  fn send_media_key(&self, key: MediaKey) -> bool {
    self.state.lock().media_keys.push(key);
    true
  }

  fn app_volume(&self, pid: u32) -> Result<AppVolume, PlatformError> {
    self
      .volume(pid)
      .ok_or(PlatformError::NoAudioSession(pid))
  }

  fn set_app_volume(
    &self,
    pid: u32,
    level: Option<f32>,
    muted: Option<bool>,
  ) -> Result<(), PlatformError> {
    let mut state = self.state.lock();
    let volume = state
      .volumes
      .get_mut(&pid)
      .ok_or(PlatformError::NoAudioSession(pid))?;
    if let Some(level) = level {
      volume.level = level;
    }
    if let Some(muted) = muted {
      volume.muted = muted;
    }
    Ok(())
  }
}

/// How a [`FakeEndpoint`] answers `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReply {
  Accept,
  Decline,
  Refuse,
  Fail,
}

struct EndpointState {
  script: VecDeque<ConnectReply>,
  fallback: ConnectReply,
  status: Option<Status>,
  status_delay: Duration,
  connects: usize,
  status_calls: usize,
  increments: usize,
  decrements: usize,
  mutes: usize,
  closes: usize,
}

pub struct FakeEndpoint {
  state: Mutex<EndpointState>,
  events_tx: Sender<EndpointEvent>,
  events_rx: Receiver<EndpointEvent>,
}

impl FakeEndpoint {
  /// Endpoint answering every connect with `fallback` and reporting `status`.
  pub fn new(fallback: ConnectReply, status: Option<Status>) -> Arc<Self> {
    let (events_tx, events_rx) = async_channel::unbounded();
    Arc::new(Self {
      state: Mutex::new(EndpointState {
        script: VecDeque::new(),
        fallback,
        status,
        status_delay: Duration::ZERO,
        connects: 0,
        status_calls: 0,
        increments: 0,
        decrements: 0,
        mutes: 0,
        closes: 0,
      }),
      events_tx,
      events_rx,
    })
  }

  /// Replies used, in order, before falling back.
  pub fn script(&self, replies: &[ConnectReply]) {
    self.state.lock().script.extend(replies.iter().copied());
  }

  pub fn set_status(&self, status: Option<Status>) {
    self.state.lock().status = status;
  }

  /// Delay status answers; the answer is the status current when the call began.
  pub fn set_status_delay(&self, delay: Duration) {
    self.state.lock().status_delay = delay;
  }

  pub fn emit(&self, event: EndpointEvent) {
    let _ = self.events_tx.try_send(event);
  }

  pub fn connects(&self) -> usize {
    self.state.lock().connects
  }

  pub fn status_calls(&self) -> usize {
    self.state.lock().status_calls
  }

  pub fn increments(&self) -> usize {
    self.state.lock().increments
  }

  pub fn decrements(&self) -> usize {
    self.state.lock().decrements
  }

  pub fn mutes(&self) -> usize {
    self.state.lock().mutes
  }

  pub fn closes(&self) -> usize {
    self.state.lock().closes
  }

  pub fn factory(self: &Arc<Self>) -> EndpointFactory {
    let endpoint = self.clone();
    Arc::new(move || endpoint.clone() as Arc<dyn ControlEndpoint>)
  }
}

#[async_trait]
impl ControlEndpoint for FakeEndpoint {
  async fn connect(&self) -> Result<bool, EndpointError> {
    let reply = {
      let mut state = self.state.lock();
      state.connects += 1;
      let fallback = state.fallback;
      state.script.pop_front().unwrap_or(fallback)
    };
    match reply {
      ConnectReply::Accept => Ok(true),
      ConnectReply::Decline => Ok(false),
      ConnectReply::Refuse => Err(EndpointError::ConnectionRefused(
        "127.0.0.1:4381 refused".to_string(),
      )),
      ConnectReply::Fail => Err(EndpointError::Transport("reset by peer".to_string())),
    }
  }

  async fn status(&self) -> Result<Option<Status>, EndpointError> {
    let (status, delay) = {
      let mut state = self.state.lock();
      state.status_calls += 1;
      (state.status.clone(), state.status_delay)
    };
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    Ok(status)
  }

  async fn increment_volume(&self) -> Result<(), EndpointError> {
    self.state.lock().increments += 1;
    Ok(())
  }

  async fn decrement_volume(&self) -> Result<(), EndpointError> {
    self.state.lock().decrements += 1;
    Ok(())
  }

  async fn toggle_mute(&self) -> Result<(), EndpointError> {
    self.state.lock().mutes += 1;
    Ok(())
  }

  fn events(&self) -> Receiver<EndpointEvent> {
    self.events_rx.clone()
  }

  fn close(&self) {
    self.state.lock().closes += 1;
  }
}

pub struct FakeProbe {
  reachable: bool,
  calls: AtomicUsize,
}

impl FakeProbe {
  pub fn new(reachable: bool) -> Arc<Self> {
    Arc::new(Self {
      reachable,
      calls: AtomicUsize::new(0),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
  async fn is_reachable(&self) -> bool {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.reachable
  }
}

enum LaunchBehavior {
  Missing,
  /// Register `pid` with a main window and return it.
  Spawn { pid: u32 },
  /// Register `pid` but return no pid, like a shell launch.
  Shell { pid: u32 },
}

pub struct FakeLauncher {
  platform: Arc<FakePlatform>,
  behavior: LaunchBehavior,
  launches: AtomicUsize,
}

impl FakeLauncher {
  pub fn missing(platform: &Arc<FakePlatform>) -> Arc<Self> {
    Self::build(platform, LaunchBehavior::Missing)
  }

  pub fn spawning(platform: &Arc<FakePlatform>, pid: u32) -> Arc<Self> {
    Self::build(platform, LaunchBehavior::Spawn { pid })
  }

  pub fn via_shell(platform: &Arc<FakePlatform>, pid: u32) -> Arc<Self> {
    Self::build(platform, LaunchBehavior::Shell { pid })
  }

  fn build(platform: &Arc<FakePlatform>, behavior: LaunchBehavior) -> Arc<Self> {
    Arc::new(Self {
      platform: platform.clone(),
      behavior,
      launches: AtomicUsize::new(0),
    })
  }

  pub fn launches(&self) -> usize {
    self.launches.load(Ordering::SeqCst)
  }
}

impl Launcher for FakeLauncher {
  fn launch(&self) -> Result<LaunchedProcess, ProcessError> {
    self.launches.fetch_add(1, Ordering::SeqCst);
    match self.behavior {
      LaunchBehavior::Missing => Err(ProcessError::NotFound),
      LaunchBehavior::Spawn { pid } => {
        self.platform.add_process(pid, "Spotify.exe", Some(pid as isize * 10));
        Ok(LaunchedProcess {
          pid: Some(pid),
          child: None,
        })
      }
      LaunchBehavior::Shell { pid } => {
        self.platform.add_process(pid, "Spotify.exe", Some(pid as isize * 10));
        Ok(LaunchedProcess::default())
      }
    }
  }
}

pub fn sample_status() -> Status {
  Status {
    track: Some(Track {
      name: "Track".to_string(),
      artist: "Artist".to_string(),
      album: "Album".to_string(),
      uri: Some("spotify:track:4uLU6hMCjMI75M1A2tKUQC".to_string()),
      length: 213.0,
    }),
    playing: true,
    volume: 0.5,
    position: 12.0,
  }
}
