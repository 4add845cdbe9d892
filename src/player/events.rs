//! Supervisor events and the subscriber registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::endpoint::{EndpointEvent, Status, Track};

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
  Connected(Status),
  Exited,
  SongChanged {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Connected,
  Exited,
  SongChanged,
  PlayStateChanged,
  TrackTimeChanged,
  VolumeChanged,
}

impl SupervisorEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      SupervisorEvent::Connected(_) => EventKind::Connected,
      SupervisorEvent::Exited => EventKind::Exited,
      SupervisorEvent::SongChanged { .. } => EventKind::SongChanged,
      SupervisorEvent::PlayStateChanged { .. } => EventKind::PlayStateChanged,
      SupervisorEvent::TrackTimeChanged { .. } => EventKind::TrackTimeChanged,
      SupervisorEvent::VolumeChanged { .. } => EventKind::VolumeChanged,
    }
  }
}

impl From<EndpointEvent> for SupervisorEvent {
  fn from(event: EndpointEvent) -> Self {
    match event {
      EndpointEvent::TrackChanged { old, new } => SupervisorEvent::SongChanged { old, new },
      EndpointEvent::PlayStateChanged { playing } => SupervisorEvent::PlayStateChanged { playing },
      EndpointEvent::TrackTimeChanged { position } => {
        SupervisorEvent::TrackTimeChanged { position }
      }
      EndpointEvent::VolumeChanged { old, new } => SupervisorEvent::VolumeChanged { old, new },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SupervisorEvent) + Send + Sync>;

struct Subscription {
  id: SubscriptionId,
  kind: Option<EventKind>,
  callback: Callback,
}

/// Callbacks per event kind, called synchronously in subscription order.
#[derive(Default)]
pub struct EventHub {
  next_id: AtomicU64,
  subscriptions: RwLock<Vec<Subscription>>,
}

impl EventHub {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
  where
    F: Fn(&SupervisorEvent) + Send + Sync + 'static,
  {
    self.add(Some(kind), Arc::new(callback))
  }

  /// Subscribe to every event kind.
  pub fn on_any<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&SupervisorEvent) + Send + Sync + 'static,
  {
    self.add(None, Arc::new(callback))
  }

  fn add(&self, kind: Option<EventKind>, callback: Callback) -> SubscriptionId {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.subscriptions.write().push(Subscription { id, kind, callback });
    id
  }

  /// Returns false if `id` was not subscribed.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut subscriptions = self.subscriptions.write();
    let before = subscriptions.len();
    subscriptions.retain(|s| s.id != id);
    subscriptions.len() != before
  }

  /// Deliver `event` to its subscribers before returning.
  pub fn emit(&self, event: &SupervisorEvent) {
    let kind = event.kind();
    // Snapshot so callbacks may (un)subscribe without deadlocking.
    let callbacks: Vec<Callback> = self
      .subscriptions
      .read()
      .iter()
      .filter(|s| s.kind.map_or(true, |k| k == kind))
      .map(|s| s.callback.clone())
      .collect();
    for callback in callbacks {
      callback(event);
    }
  }

  pub fn clear(&self) {
    self.subscriptions.write().clear();
  }

  pub fn len(&self) -> usize {
    self.subscriptions.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
