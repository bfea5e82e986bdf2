//! services/reader/src/bin/reader.rs
//!
//! Plays a container through the speakers against the HTTP backend:
//! `reader <container> [--continuous]`. In continuous mode the next container is
//! mounted whenever the session asks to navigate.

use reader_lib::{
    adapters::{HttpBackend, JsonFileStore, SpeakerMedia},
    config::Config,
    engine::{Command, Notification, ReaderDeps, ReaderSession},
    error::ReaderError,
};
use recitation_core::domain::ContainerId;
use recitation_core::ports::ClientStore;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    container: ContainerId,
    continuous: bool,
}

fn parse_args() -> Result<Args, ReaderError> {
    let mut container = ContainerId(1);
    let mut continuous = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--continuous" => continuous = true,
            other => {
                let id = other
                    .parse::<u32>()
                    .map_err(|_| ReaderError::Internal(format!("'{}' is not a container number", other)))?;
                container = ContainerId(id);
            }
        }
    }
    Ok(Args {
        container,
        continuous,
    })
}

#[tokio::main]
async fn main() -> Result<(), ReaderError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let args = parse_args()?;
    info!("Configuration loaded. Starting reader...");

    // --- 2. Initialize Adapters ---
    let store: Arc<dyn ClientStore> = Arc::new(JsonFileStore::open(&config.state_path)?);
    let backend = Arc::new(HttpBackend::new(&config.api_url, &config.audio_url, store.clone())?);
    let (speaker, mut media_events) = SpeakerMedia::open(backend.clone())?;
    let deps = ReaderDeps {
        corpus: backend.clone(),
        progress: backend.clone(),
        analytics: backend.clone(),
        bookmarks: backend.clone(),
        fetcher: backend,
        media: Arc::new(speaker),
        store,
    };
    let settings = config.engine_settings();

    // --- 3. Mount Containers Until Playback Stops Navigating ---
    let mut next = Some(args.container);
    let mut first_mount = true;
    while let Some(container) = next.take() {
        let (session, mut notifications) =
            ReaderSession::mount(deps.clone(), settings.clone(), container).await?;
        let handle = session.handle();
        if first_mount {
            first_mount = false;
            if let Some(token) = config.token.clone() {
                handle.send(Command::Authenticated { token });
            }
            if args.continuous {
                handle.send(Command::StartContinuous);
            } else {
                handle.play(0);
            }
        }
        let runner = tokio::spawn(session.run());

        loop {
            tokio::select! {
                Some(event) = media_events.recv() => handle.media_event(event),
                notification = notifications.recv() => match notification {
                    Some(Notification::Navigate { container }) => {
                        next = Some(container);
                        break;
                    }
                    Some(Notification::ContainerFinished { container }) => {
                        info!("Finished container {}", container);
                        break;
                    }
                    Some(Notification::CorpusFinished) => {
                        info!("Finished the whole corpus");
                        break;
                    }
                    Some(Notification::Error { message }) => warn!("{}", message),
                    Some(other) => info!(?other, "Reader update"),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        handle.unmount();
        if let Err(e) = runner.await {
            warn!("Session task ended abnormally: {}", e);
        }
    }

    Ok(())
}
