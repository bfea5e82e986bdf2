//! services/reader/src/adapters/speaker.rs
//!
//! A `MediaElement` that plays through the default output device with `rodio`.
//! The output stream cannot leave the thread that opened it, so a dedicated
//! audio thread owns it and is driven over a command channel.

use async_trait::async_trait;
use bytes::Bytes;
use recitation_core::domain::MediaEvent;
use recitation_core::ports::{AudioFetcher, MediaElement, MediaSource, PortError, PortResult};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::io::Cursor;
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// How often the audio thread checks whether the current source ran out.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum SpeakerCommand {
    Load {
        url: String,
        bytes: Bytes,
        reply: oneshot::Sender<PortResult<()>>,
    },
    Play,
    Pause,
    Stop,
    Rate(f32),
    Volume(f32),
}

pub struct SpeakerMedia {
    commands: std_mpsc::Sender<SpeakerCommand>,
    fetcher: Arc<dyn AudioFetcher>,
}

impl SpeakerMedia {
    /// Opens the default output device. Ended events for each source arrive on
    /// the returned receiver.
    pub fn open(
        fetcher: Arc<dyn AudioFetcher>,
    ) -> PortResult<(Self, mpsc::UnboundedReceiver<MediaEvent>)> {
        let (commands, command_rx) = std_mpsc::channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        thread::Builder::new()
            .name("reader-audio".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    let _ = ready_tx.send(Ok(()));
                    audio_loop(handle, command_rx, events);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(PortError::Unexpected(e.to_string())));
                }
            })
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|e| PortError::Unexpected(e.to_string()))??;
        info!("Audio output opened");
        Ok((Self { commands, fetcher }, event_rx))
    }

    fn send(&self, command: SpeakerCommand) {
        if self.commands.send(command).is_err() {
            error!("Audio thread is gone");
        }
    }
}

/// State owned by the audio thread.
struct Output {
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    url: Option<String>,
    rate: f32,
    volume: f32,
}

impl Output {
    fn load(&mut self, url: String, bytes: Bytes) -> PortResult<()> {
        if let Some(old) = self.sink.take() {
            old.stop();
        }
        self.url = None;
        let source =
            Decoder::new(Cursor::new(bytes)).map_err(|e| PortError::Unexpected(e.to_string()))?;
        let sink = Sink::try_new(&self.handle).map_err(|e| PortError::Unexpected(e.to_string()))?;
        sink.pause();
        sink.set_speed(self.rate);
        sink.set_volume(self.volume);
        sink.append(source);
        self.sink = Some(sink);
        self.url = Some(url);
        Ok(())
    }

    /// The URL of a source that just played out, if any.
    fn finished(&mut self) -> Option<String> {
        let sink = self.sink.as_ref()?;
        if sink.is_paused() || !sink.empty() {
            return None;
        }
        self.sink = None;
        self.url.take()
    }
}

fn audio_loop(
    handle: OutputStreamHandle,
    commands: std_mpsc::Receiver<SpeakerCommand>,
    events: mpsc::UnboundedSender<MediaEvent>,
) {
    let mut output = Output {
        handle,
        sink: None,
        url: None,
        rate: 1.0,
        volume: 1.0,
    };

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(SpeakerCommand::Load { url, bytes, reply }) => {
                debug!(%url, "Loading source");
                let _ = reply.send(output.load(url, bytes));
            }
            Ok(SpeakerCommand::Play) => {
                if let Some(sink) = &output.sink {
                    sink.play();
                }
            }
            Ok(SpeakerCommand::Pause) => {
                if let Some(sink) = &output.sink {
                    sink.pause();
                }
            }
            Ok(SpeakerCommand::Stop) => {
                if let Some(sink) = output.sink.take() {
                    sink.stop();
                }
                output.url = None;
            }
            Ok(SpeakerCommand::Rate(rate)) => {
                output.rate = rate;
                if let Some(sink) = &output.sink {
                    sink.set_speed(rate);
                }
            }
            Ok(SpeakerCommand::Volume(volume)) => {
                output.volume = volume;
                if let Some(sink) = &output.sink {
                    sink.set_volume(volume);
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if let Some(url) = output.finished() {
            let _ = events.send(MediaEvent::Ended { url });
        }
    }
    debug!("Audio thread exiting");
}

#[async_trait]
impl MediaElement for SpeakerMedia {
    async fn load(&self, source: MediaSource) -> PortResult<()> {
        let bytes = match source.preloaded {
            Some(bytes) => bytes,
            None => self.fetcher.fetch(&source.url).await?,
        };
        let (reply, done) = oneshot::channel();
        self.send(SpeakerCommand::Load {
            url: source.url,
            bytes,
            reply,
        });
        done.await
            .map_err(|_| PortError::Unexpected("audio thread dropped the load".to_string()))?
    }

    async fn play(&self) -> PortResult<()> {
        self.send(SpeakerCommand::Play);
        Ok(())
    }

    fn pause(&self) {
        self.send(SpeakerCommand::Pause);
    }

    fn stop(&self) {
        self.send(SpeakerCommand::Stop);
    }

    fn set_rate(&self, rate: f32) {
        self.send(SpeakerCommand::Rate(rate));
    }

    fn set_volume(&self, volume: f32) {
        self.send(SpeakerCommand::Volume(volume));
    }
}
