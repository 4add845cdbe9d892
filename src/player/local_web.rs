//! Client for the Spotify local web helper.
//!
//! The helper serves JSON on a loopback port. A session needs a CSRF token from the
//! helper and an OAuth token from open.spotify.com; status is then polled and successive
//! snapshots are diffed into change notifications. Volume goes through the OS audio
//! session of the player process, since the helper has no volume control.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{header, Client};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::platform::Platform;

use super::endpoint::{
  diff_status, ControlEndpoint, EndpointError, EndpointEvent, ReachabilityProbe, Status, Track,
};

/// Public endpoint used both for OAuth tokens and as reachability probe target.
pub const OPEN_SPOTIFY_URL: &str = "https://open.spotify.com";
/// Volume change per step, as a fraction of full scale.
pub const VOLUME_STEP: f32 = 0.05;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LocalWebSettings {
  pub host: String,
  pub port: u16,
  pub poll_interval: Duration,
  /// Image name of the player, for per-process volume.
  pub executable: String,
}

impl LocalWebSettings {
  pub fn base_url(&self) -> String {
    format!("http://{}:{}", self.host, self.port)
  }
}

#[derive(Debug, Clone)]
struct Session {
  csrf: String,
  oauth: String,
}

#[derive(Deserialize)]
struct CsrfResponse {
  token: Option<String>,
}

#[derive(Deserialize)]
struct OAuthResponse {
  t: Option<String>,
}

#[derive(Deserialize, Default)]
struct Resource {
  #[serde(default)]
  name: String,
  uri: Option<String>,
}

#[derive(Deserialize)]
struct RawTrack {
  #[serde(default)]
  track_resource: Resource,
  #[serde(default)]
  artist_resource: Resource,
  #[serde(default)]
  album_resource: Resource,
  #[serde(default)]
  length: f64,
}

#[derive(Deserialize)]
struct RawError {
  #[serde(rename = "type", default)]
  kind: String,
  #[serde(default)]
  message: String,
}

#[derive(Deserialize)]
struct RawStatus {
  error: Option<RawError>,
  version: Option<u32>,
  #[serde(default)]
  playing: bool,
  #[serde(default)]
  volume: f32,
  #[serde(default)]
  playing_position: f64,
  track: Option<RawTrack>,
}

impl RawStatus {
  /// `None` for error documents and anything that is not a status.
  fn into_status(self) -> Option<Status> {
    if let Some(error) = self.error {
      log::debug!("Web helper error {}: {}", error.kind, error.message);
      return None;
    }
    self.version?;
    let track = self.track.and_then(|t| {
      if t.track_resource.name.is_empty() {
        return None;
      }
      Some(Track {
        name: t.track_resource.name,
        artist: t.artist_resource.name,
        album: t.album_resource.name,
        uri: t.track_resource.uri,
        length: t.length,
      })
    });
    Some(Status {
      track,
      playing: self.playing,
      volume: self.volume,
      position: self.playing_position,
    })
  }
}

/// Classify a reqwest failure; refused connections get their own variant.
fn classify(e: reqwest::Error) -> EndpointError {
  let mut source: Option<&(dyn StdError + 'static)> = e.source();
  while let Some(err) = source {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
      if io.kind() == std::io::ErrorKind::ConnectionRefused {
        return EndpointError::ConnectionRefused(e.to_string());
      }
    }
    source = err.source();
  }
  EndpointError::Transport(e.to_string())
}

/// HTTP state shared with the polling task.
struct Inner {
  http: Client,
  base_url: String,
  session: Mutex<Option<Session>>,
}

impl Inner {
  async fn fetch_csrf(&self) -> Result<Option<String>, EndpointError> {
    let response = self
      .http
      .get(format!("{}/simplecsrf/token.json", self.base_url))
      .header(header::ORIGIN, OPEN_SPOTIFY_URL)
      .send()
      .await
      .map_err(classify)?;
    let body: CsrfResponse = response
      .json()
      .await
      .map_err(|e| EndpointError::Protocol(e.to_string()))?;
    Ok(body.token)
  }

  async fn fetch_oauth(&self) -> Result<Option<String>, EndpointError> {
    let response = self
      .http
      .get(format!("{}/token", OPEN_SPOTIFY_URL))
      .send()
      .await
      .map_err(classify)?;
    let body: OAuthResponse = response
      .json()
      .await
      .map_err(|e| EndpointError::Protocol(e.to_string()))?;
    Ok(body.t)
  }

  async fn fetch_status(&self) -> Result<Option<Status>, EndpointError> {
    let session = self.session.lock().clone().ok_or(EndpointError::NotConnected)?;
    let response = self
      .http
      .get(format!("{}/remote/status.json", self.base_url))
      .header(header::ORIGIN, OPEN_SPOTIFY_URL)
      .query(&[
        ("oauth", session.oauth.as_str()),
        ("csrf", session.csrf.as_str()),
        ("returnafter", "0"),
        ("returnon", ""),
      ])
      .send()
      .await
      .map_err(classify)?;
    let raw: RawStatus = response
      .json()
      .await
      .map_err(|e| EndpointError::Protocol(e.to_string()))?;
    Ok(raw.into_status())
  }
}

pub struct LocalWebClient {
  inner: Arc<Inner>,
  platform: Arc<dyn Platform>,
  settings: LocalWebSettings,
  event_tx: Sender<EndpointEvent>,
  event_rx: Receiver<EndpointEvent>,
  cancel: CancellationToken,
  poller: Mutex<Option<JoinHandle<()>>>,
}

impl LocalWebClient {
  pub fn new(settings: LocalWebSettings, platform: Arc<dyn Platform>) -> Self {
    let http = Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .unwrap_or_else(|e| {
        log::warn!("Failed to configure HTTP client ({}), using defaults", e);
        Client::new()
      });
    let (event_tx, event_rx) = async_channel::unbounded();
    Self {
      inner: Arc::new(Inner {
        http,
        base_url: settings.base_url(),
        session: Mutex::new(None),
      }),
      platform,
      settings,
      event_tx,
      event_rx,
      cancel: CancellationToken::new(),
      poller: Mutex::new(None),
    }
  }

  fn start_polling(&self) {
    let mut poller = self.poller.lock();
    if poller.is_some() {
      return;
    }
    let inner = self.inner.clone();
    let tx = self.event_tx.clone();
    let token = self.cancel.clone();
    let interval = self.settings.poll_interval;

    *poller = Some(tokio::spawn(async move {
      let mut last: Option<Status> = None;
      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          _ = tokio::time::sleep(interval) => {}
        }
        match inner.fetch_status().await {
          Ok(Some(status)) => {
            for event in diff_status(last.as_ref(), &status) {
              if tx.send(event).await.is_err() {
                return;
              }
            }
            last = Some(status);
          }
          Ok(None) => log::debug!("Web helper returned no status"),
          Err(e) => log::debug!("Status poll failed: {}", e),
        }
      }
      log::debug!("Status polling stopped");
    }));
  }

  fn player_pids(&self) -> Vec<u32> {
    self
      .platform
      .processes(&self.settings.executable)
      .into_iter()
      .map(|p| p.pid)
      .collect()
  }

  /// Apply `change` to the audio session of every player process.
  fn adjust_volume(&self, change: impl Fn(f32) -> f32) -> Result<(), EndpointError> {
    let mut last_error = None;
    let mut applied = false;
    for pid in self.player_pids() {
      let result = self.platform.app_volume(pid).and_then(|v| {
        let level = change(v.level).clamp(0.0, 1.0);
        self.platform.set_app_volume(pid, Some(level), None)
      });
      match result {
        Ok(()) => applied = true,
        // Helper processes often have no audio session.
        Err(e) => last_error = Some(e),
      }
    }
    match (applied, last_error) {
      (true, _) => Ok(()),
      (false, Some(e)) => Err(e.into()),
      (false, None) => Err(EndpointError::NotConnected),
    }
  }
}

#[async_trait]
impl ControlEndpoint for LocalWebClient {
  async fn connect(&self) -> Result<bool, EndpointError> {
    let Some(csrf) = self.inner.fetch_csrf().await? else {
      return Ok(false);
    };
    let Some(oauth) = self.inner.fetch_oauth().await? else {
      return Ok(false);
    };
    *self.inner.session.lock() = Some(Session { csrf, oauth });
    log::info!("Connected to Spotify web helper at {}", self.inner.base_url);
    self.start_polling();
    Ok(true)
  }

  async fn status(&self) -> Result<Option<Status>, EndpointError> {
    self.inner.fetch_status().await
  }

  async fn increment_volume(&self) -> Result<(), EndpointError> {
    self.adjust_volume(|level| level + VOLUME_STEP)
  }

  async fn decrement_volume(&self) -> Result<(), EndpointError> {
    self.adjust_volume(|level| level - VOLUME_STEP)
  }

  async fn toggle_mute(&self) -> Result<(), EndpointError> {
    let pids = self.player_pids();
    let muted = pids
      .iter()
      .find_map(|pid| self.platform.app_volume(*pid).ok())
      .map(|v| v.muted)
      .ok_or(EndpointError::NotConnected)?;
    for pid in pids {
      if let Err(e) = self.platform.set_app_volume(pid, None, Some(!muted)) {
        log::debug!("Mute toggle skipped pid {}: {}", pid, e);
      }
    }
    Ok(())
  }

  fn events(&self) -> Receiver<EndpointEvent> {
    self.event_rx.clone()
  }

  fn close(&self) {
    self.cancel.cancel();
    if let Some(handle) = self.poller.lock().take() {
      handle.abort();
    }
    self.inner.session.lock().take();
  }
}

/// HEAD request against open.spotify.com. Any HTTP response counts as reachable.
pub struct HttpProbe {
  http: Client,
  url: String,
}

impl HttpProbe {
  pub fn new() -> Self {
    Self::with_url(OPEN_SPOTIFY_URL)
  }

  pub fn with_url(url: impl Into<String>) -> Self {
    let http = Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .unwrap_or_else(|_| Client::new());
    Self {
      http,
      url: url.into(),
    }
  }
}

impl Default for HttpProbe {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
  async fn is_reachable(&self) -> bool {
    match self.http.head(&self.url).send().await {
      Ok(response) => {
        log::debug!("{} answered {}", self.url, response.status());
        true
      }
      Err(e) => {
        log::warn!("{} is unreachable: {}", self.url, e);
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakePlatform;

  fn settings(port: u16) -> LocalWebSettings {
    LocalWebSettings {
      host: "127.0.0.1".to_string(),
      port,
      poll_interval: Duration::from_millis(500),
      executable: "Spotify.exe".to_string(),
    }
  }

  /// A loopback port with nothing listening on it.
  async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
  }

  #[tokio::test]
  async fn test_refused_connection_is_classified() {
    let port = closed_port().await;
    let client = LocalWebClient::new(settings(port), Arc::new(FakePlatform::new()));

    let result = client.connect().await;
    assert!(
      matches!(result, Err(EndpointError::ConnectionRefused(_))),
      "got {:?}",
      result
    );
  }

  #[tokio::test]
  async fn test_status_requires_session() {
    let client = LocalWebClient::new(settings(4381), Arc::new(FakePlatform::new()));
    assert!(matches!(client.status().await, Err(EndpointError::NotConnected)));
    client.close();
    client.close();
  }

  #[tokio::test]
  async fn test_probe_unreachable_host() {
    let port = closed_port().await;
    let probe = HttpProbe::with_url(format!("http://127.0.0.1:{}", port));
    assert!(!probe.is_reachable().await);
  }

  #[test]
  fn test_status_document() {
    let raw: RawStatus = serde_json::from_str(
      r#"{
        "version": 9,
        "client_version": "1.0.80.474",
        "playing": true,
        "shuffle": false,
        "volume": 0.62,
        "playing_position": 41.3,
        "track": {
          "track_resource": {"name": "Midnight City", "uri": "spotify:track:1eyzqe2QqGZUmfcPZtrIyt"},
          "artist_resource": {"name": "M83", "uri": "spotify:artist:63MQldklfxkjYDoUE4Tppz"},
          "album_resource": {"name": "Hurry Up, We're Dreaming", "uri": "spotify:album:x"},
          "length": 244,
          "track_type": "normal"
        },
        "online": true,
        "running": true
      }"#,
    )
    .unwrap();

    let status = raw.into_status().unwrap();
    assert!(status.playing);
    assert_eq!(status.volume, 0.62);
    let track = status.track.unwrap();
    assert_eq!(track.name, "Midnight City");
    assert_eq!(track.artist, "M83");
    assert_eq!(track.length, 244.0);
  }

  #[test]
  fn test_error_document_has_no_status() {
    let raw: RawStatus = serde_json::from_str(
      r#"{"error": {"type": "4110", "message": "Invalid Csrf token"}, "version": 9}"#,
    )
    .unwrap();
    assert!(raw.into_status().is_none());

    let raw: RawStatus = serde_json::from_str("{}").unwrap();
    assert!(raw.into_status().is_none());
  }

  #[tokio::test]
  async fn test_volume_steps_apply_to_every_session() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_process(10, "Spotify.exe", Some(1));
    platform.add_process(11, "Spotify.exe", None);
    platform.add_process(12, "Spotify.exe", None);
    platform.set_volume(10, 0.5, false);
    platform.set_volume(12, 0.98, false);
    let client = LocalWebClient::new(settings(4381), platform.clone());

    client.increment_volume().await.unwrap();
    assert!((platform.volume(10).unwrap().level - 0.55).abs() < 1e-6);
    assert_eq!(platform.volume(12).unwrap().level, 1.0);

    client.toggle_mute().await.unwrap();
    assert!(platform.volume(10).unwrap().muted);
    assert!(platform.volume(12).unwrap().muted);
  }

  #[tokio::test]
  async fn test_volume_without_sessions_fails() {
    let platform = Arc::new(FakePlatform::new());
    platform.add_process(10, "Spotify.exe", Some(1));
    let client = LocalWebClient::new(settings(4381), platform);
    assert!(matches!(
      client.decrement_volume().await,
      Err(EndpointError::Volume(_))
    ));
  }
}
