//! Spotify supervision - finds or launches the player and keeps a control connection to it.
//!
//! Architecture:
//! - `window.rs` - main-window classification over the platform window queries
//! - `finder.rs` - picks the main player process among same-named processes
//! - `process.rs` - executable discovery and launching
//! - `endpoint.rs` - control endpoint contract, status model and change detection
//! - `local_web.rs` - HTTP client for the local web helper, plus the reachability probe
//! - `launch.rs` - the deadline-bounded launch/connect sequence
//! - `watcher.rs` - detection of a player started by the user
//! - `events.rs` - supervisor events and subscriptions
//! - `action.rs` - user actions and their delivery
//! - `supervisor.rs` - generation lifecycle, event relay and the command surface

mod action;
mod endpoint;
mod events;
mod finder;
mod launch;
mod local_web;
mod process;
mod supervisor;
mod watcher;
mod window;

pub use action::{Action, Delivery, VolumeAction};
pub use endpoint::{
  diff_status, ControlEndpoint, EndpointError, EndpointEvent, EndpointFactory, ReachabilityProbe,
  Status, Track,
};
pub use events::{EventHub, EventKind, SubscriptionId, SupervisorEvent};
pub use finder::ProcessFinder;
pub use launch::{
  CancelReason, Connection, FailureKind, LaunchError, LaunchOutcome, LaunchSequencer,
  LaunchSettings, LaunchState, Spawned,
};
pub use local_web::{HttpProbe, LocalWebClient, LocalWebSettings};
pub use process::{find_spotify, CommandLauncher, LaunchTarget, LaunchedProcess, Launcher, ProcessError};
pub use supervisor::{exit_on_failure, FatalHandler, Supervisor};
pub use watcher::ProcessWatcher;
pub use window::{is_main_window_class, WindowLocator, MAIN_WINDOW_CLASSES};
