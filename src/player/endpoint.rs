//! Control-plane client contract and status model.

use std::sync::Arc;

use async_channel::Receiver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum EndpointError {
  /// Nothing listens on the endpoint address (yet).
  #[error("Connection refused: {0}")]
  ConnectionRefused(String),
  #[error("Transport error: {0}")]
  Transport(String),
  #[error("Unexpected response: {0}")]
  Protocol(String),
  #[error("Not connected")]
  NotConnected,
  #[error("Volume control failed: {0}")]
  Volume(#[from] PlatformError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
  pub name: String,
  pub artist: String,
  pub album: String,
  pub uri: Option<String>,
  /// Seconds.
  pub length: f64,
}

impl Track {
  /// Tracks without a URI (local files, ads) are compared by their metadata.
  pub fn same_as(&self, other: &Track) -> bool {
    match (&self.uri, &other.uri) {
      (Some(a), Some(b)) => a == b,
      _ => self.name == other.name && self.artist == other.artist && self.album == other.album,
    }
  }
}

/// Snapshot of the player state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
  pub track: Option<Track>,
  pub playing: bool,
  /// 0.0 - 1.0
  pub volume: f32,
  /// Seconds into the current track.
  pub position: f64,
}

/// Change notification raised by an endpoint client.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
  TrackChanged {
    old: Option<Track>,
    new: Option<Track>,
  },
  PlayStateChanged {
    playing: bool,
  },
  TrackTimeChanged {
    position: f64,
  },
  VolumeChanged {
    old: f32,
    new: f32,
  },
}

/// Client for the player's local control endpoint.
#[async_trait]
pub trait ControlEndpoint: Send + Sync {
  /// Open a session. `Ok(false)` means the endpoint answered but is not ready.
  async fn connect(&self) -> Result<bool, EndpointError>;

  /// Current state. `Ok(None)` when the endpoint has no state to report.
  async fn status(&self) -> Result<Option<Status>, EndpointError>;

  async fn increment_volume(&self) -> Result<(), EndpointError>;

  async fn decrement_volume(&self) -> Result<(), EndpointError>;

  async fn toggle_mute(&self) -> Result<(), EndpointError>;

  /// Change notifications, in the order they were observed.
  fn events(&self) -> Receiver<EndpointEvent>;

  /// Stop background work and drop the session. Safe to call more than once.
  fn close(&self);
}

/// Builds a fresh client for each process generation.
pub type EndpointFactory = Arc<dyn Fn() -> Arc<dyn ControlEndpoint> + Send + Sync>;

/// One-off check that the player's public web endpoint is reachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
  async fn is_reachable(&self) -> bool;
}

/// Events implied by moving from `old` to `new`.
///
/// The first status of a session (`old == None`) is a baseline and raises nothing.
pub fn diff_status(old: Option<&Status>, new: &Status) -> Vec<EndpointEvent> {
  let Some(old) = old else {
    return Vec::new();
  };
  let mut events = Vec::new();

  let track_changed = match (&old.track, &new.track) {
    (Some(a), Some(b)) => !a.same_as(b),
    (None, None) => false,
    _ => true,
  };
  if track_changed {
    events.push(EndpointEvent::TrackChanged {
      old: old.track.clone(),
      new: new.track.clone(),
    });
  }

  if old.playing != new.playing {
    events.push(EndpointEvent::PlayStateChanged {
      playing: new.playing,
    });
  }

  if (old.position - new.position).abs() > f64::EPSILON {
    events.push(EndpointEvent::TrackTimeChanged {
      position: new.position,
    });
  }

  if (old.volume - new.volume).abs() > f32::EPSILON {
    events.push(EndpointEvent::VolumeChanged {
      old: old.volume,
      new: new.volume,
    });
  }

  events
}
