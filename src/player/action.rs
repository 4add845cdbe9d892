//! User actions and how each is delivered to the player.

use serde::{Deserialize, Serialize};

use crate::platform::{AppCommand, MediaKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
  PlayPause,
  Stop,
  Previous,
  Next,
  FastForward,
  Rewind,
  CopyTrackInfo,
  PasteTrackInfo,
  Mute,
  VolumeUp,
  VolumeDown,
  ShowPlayer,
  ShowToast,
  ThumbsUp,
  ThumbsDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAction {
  Up,
  Down,
  Mute,
}

impl VolumeAction {
  pub fn media_key(self) -> MediaKey {
    match self {
      VolumeAction::Up => MediaKey::VolumeUp,
      VolumeAction::Down => MediaKey::VolumeDown,
      VolumeAction::Mute => MediaKey::VolumeMute,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
  /// Sent to the main window.
  AppCommand(AppCommand),
  /// Endpoint or media key, depending on the volume control mode.
  Volume(VolumeAction),
  ShowPlayer,
  /// Handled outside the supervisor.
  Inert,
}

impl Action {
  pub fn delivery(self) -> Delivery {
    match self {
      Action::PlayPause => Delivery::AppCommand(AppCommand::PlayPause),
      Action::Stop => Delivery::AppCommand(AppCommand::Stop),
      Action::Previous => Delivery::AppCommand(AppCommand::PreviousTrack),
      Action::Next => Delivery::AppCommand(AppCommand::NextTrack),
      Action::FastForward => Delivery::AppCommand(AppCommand::FastForward),
      Action::Rewind => Delivery::AppCommand(AppCommand::Rewind),
      Action::CopyTrackInfo => Delivery::AppCommand(AppCommand::Copy),
      Action::PasteTrackInfo => Delivery::AppCommand(AppCommand::Paste),
      Action::Mute => Delivery::Volume(VolumeAction::Mute),
      Action::VolumeUp => Delivery::Volume(VolumeAction::Up),
      Action::VolumeDown => Delivery::Volume(VolumeAction::Down),
      Action::ShowPlayer => Delivery::ShowPlayer,
      Action::ShowToast | Action::ThumbsUp | Action::ThumbsDown => Delivery::Inert,
    }
  }
}
