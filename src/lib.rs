use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod logging;
pub mod platform;
pub mod player;
#[cfg(test)]
mod testing;

pub use config::{AppConfig, ConfigError, StartMode, VolumeControlMode};
use player::{
  CommandLauncher, ControlEndpoint, EndpointFactory, EventKind, HttpProbe, LocalWebClient,
  LocalWebSettings, Supervisor, SupervisorEvent,
};

/// Binary entry point: `spotify-supervisor [config.json]`.
pub fn run() {
  logging::init();

  let runtime = match tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
  {
    Ok(runtime) => runtime,
    Err(e) => {
      log::error!("Failed to start async runtime: {}", e);
      std::process::exit(1);
    }
  };

  let config_path = std::env::args_os().nth(1).map(PathBuf::from);
  let config = AppConfig::load(config_path.as_deref());
  runtime.block_on(supervise(config));
}

fn endpoint_factory(config: &AppConfig, platform: Arc<dyn platform::Platform>) -> EndpointFactory {
  let settings = LocalWebSettings {
    host: config.endpoint_host.clone(),
    port: config.endpoint_port,
    poll_interval: config.poll_interval(),
    executable: config.executable_name.clone(),
  };
  Arc::new(move || {
    Arc::new(LocalWebClient::new(settings.clone(), platform.clone())) as Arc<dyn ControlEndpoint>
  })
}

fn log_event(event: &SupervisorEvent) {
  match event {
    SupervisorEvent::Connected(status) => match &status.track {
      Some(track) => log::info!("Connected: {} - {}", track.artist, track.name),
      None => log::info!("Connected"),
    },
    SupervisorEvent::Exited => log::info!("Spotify exited"),
    SupervisorEvent::SongChanged { new, .. } => match new {
      Some(track) => log::info!("Now playing: {} - {}", track.artist, track.name),
      None => log::info!("Nothing playing"),
    },
    SupervisorEvent::PlayStateChanged { playing } => {
      log::info!("{}", if *playing { "Playing" } else { "Paused" })
    }
    SupervisorEvent::TrackTimeChanged { position } => log::debug!("Position: {:.1}s", position),
    SupervisorEvent::VolumeChanged { old, new } => {
      log::info!("Volume: {:.0}% -> {:.0}%", old * 100.0, new * 100.0)
    }
  }
}

async fn supervise(config: AppConfig) {
  let platform = platform::native();
  let supervisor = Supervisor::new(
    config.clone(),
    platform.clone(),
    endpoint_factory(&config, platform),
    Arc::new(HttpProbe::new()),
    Arc::new(CommandLauncher::from_config(&config)),
  );

  let (exit_tx, exit_rx) = async_channel::bounded::<()>(1);
  supervisor.on_any(log_event);
  supervisor.on(EventKind::Exited, move |_| {
    let _ = exit_tx.try_send(());
  });

  supervisor.ensure_started();

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        log::info!("Interrupted, shutting down");
        break;
      }
      Ok(()) = exit_rx.recv() => {
        if config.exit_with_player {
          log::info!("Spotify exited, quitting");
          break;
        }
        log::info!("Waiting for Spotify to be started again");
        supervisor.ensure_started_with(StartMode::WaitForUser);
      }
    }
  }

  supervisor.dispose();
}
