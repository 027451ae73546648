//! Playback session manager.
//!
//! One session binds the configured stream URL to at most one live audio
//! pipeline and turns pipeline signals into a small status enum for the UI
//! and the media-key bridge. Transient failures are retried on a fixed
//! delay while the listener still wants audio; a generation counter fences
//! off events arriving from superseded pipelines.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay before an automatic reconnect attempt. The delay is fixed;
/// reconnects for a single long-lived stream do not back off.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Idle,
    Connecting,
    Playing,
    Paused,
    Errored,
}

/// Snapshot published on every transition. `error` is set only in
/// `Errored` and cleared on the way into `Connecting` or `Playing`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionView {
    pub status: Status,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no stream configured")]
    NoStream,
    /// Output device or pipeline construction failure; the message is
    /// already user-readable.
    #[error("{0}")]
    Output(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("stream connection lost: {0}")]
    Network(String),
}

impl PlaybackError {
    /// Only dropped connections are worth retrying; a missing URL, a dead
    /// output device or an undecodable stream will not heal on a timer.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackError::Network(_))
    }
}

/// Signals a pipeline reports back, tagged with the generation it was
/// created under.
#[derive(Debug)]
pub enum StreamSignal {
    /// Audio is flowing (first data after connect, or after a stall).
    Started,
    /// Audio stalled mid-play; the pipeline is still alive.
    Buffering,
    /// The pipeline died.
    Failed(PlaybackError),
}

#[derive(Debug)]
pub enum SessionEvent {
    Toggle,
    Stop,
    SetVolume(f32),
    NetworkRecovered,
    Foregrounded,
    Signal { generation: u64, signal: StreamSignal },
    RetryDue { generation: u64 },
}

/// Builds one live audio pipeline per call. Construction failures are
/// returned synchronously; everything after that arrives as signals.
pub trait StreamBackend: Send + 'static {
    fn connect(
        &mut self,
        url: &str,
        generation: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn StreamHandle>, PlaybackError>;
}

/// A live pipeline. Dropping it releases the audio output.
pub trait StreamHandle: Send {
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_volume(&mut self, volume: f32);
}

/// Cloneable outward surface of a session. All methods return immediately;
/// outcomes arrive through the status channel.
#[derive(Clone)]
pub struct SessionControl {
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Receiver<SessionView>,
    volume: Arc<Mutex<f32>>,
}

impl SessionControl {
    pub fn toggle_play(&self) {
        let _ = self.events.send(SessionEvent::Toggle);
    }

    pub fn stop(&self) {
        let _ = self.events.send(SessionEvent::Stop);
    }

    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 2.0);
        if let Ok(mut v) = self.volume.lock() {
            *v = clamped;
        }
        let _ = self.events.send(SessionEvent::SetVolume(clamped));
    }

    pub fn volume(&self) -> f32 {
        if let Ok(v) = self.volume.lock() {
            *v
        } else {
            0.0
        }
    }

    pub fn network_recovered(&self) {
        let _ = self.events.send(SessionEvent::NetworkRecovered);
    }

    pub fn foregrounded(&self) {
        let _ = self.events.send(SessionEvent::Foregrounded);
    }

    pub fn view(&self) -> SessionView {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.status.clone()
    }
}

/// Starts a session bound to `url` and returns its control surface.
/// An empty or blank URL is reported immediately and never retried.
pub fn start<B: StreamBackend>(backend: B, url: impl Into<String>, volume: f32) -> SessionControl {
    let url = url.into();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let initial = if url.trim().is_empty() {
        SessionView {
            status: Status::Errored,
            error: Some(PlaybackError::NoStream.to_string()),
        }
    } else {
        SessionView::default()
    };
    let (status_tx, status_rx) = watch::channel(initial);

    let session = Session {
        backend,
        url,
        generation: 0,
        handle: None,
        retry: None,
        intend_playing: false,
        volume,
        status_tx,
        events_tx: events_tx.clone(),
    };
    tokio::spawn(session.run(events_rx));

    SessionControl {
        events: events_tx,
        status: status_rx,
        volume: Arc::new(Mutex::new(volume)),
    }
}

struct Session<B> {
    backend: B,
    url: String,
    /// Bumped on every pipeline creation; events carrying an older value
    /// belong to a pipeline that no longer exists and are dropped.
    generation: u64,
    handle: Option<Box<dyn StreamHandle>>,
    /// Single retry slot; set only while `Errored`.
    retry: Option<JoinHandle<()>>,
    /// True when the listener last asked for audio. An explicit pause
    /// clears it, which is what keeps recovery triggers from resuming.
    intend_playing: bool,
    volume: f32,
    status_tx: watch::Sender<SessionView>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl<B: StreamBackend> Session<B> {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Toggle => self.on_toggle(),
                SessionEvent::Stop => {
                    self.teardown();
                    break;
                }
                SessionEvent::SetVolume(volume) => {
                    self.volume = volume;
                    if let Some(handle) = self.handle.as_mut() {
                        handle.set_volume(volume);
                    }
                }
                SessionEvent::NetworkRecovered => self.on_wake("network recovered"),
                SessionEvent::Foregrounded => self.on_wake("back in foreground"),
                SessionEvent::Signal { generation, signal } => {
                    if generation == self.generation {
                        self.on_signal(signal);
                    } else {
                        debug!(
                            "session: dropping {:?} from generation {} (current {})",
                            signal, generation, self.generation
                        );
                    }
                }
                SessionEvent::RetryDue { generation } => self.on_retry_due(generation),
            }
        }
        info!("session: ended");
    }

    fn status(&self) -> Status {
        self.status_tx.borrow().status
    }

    fn publish(&mut self, status: Status, error: Option<String>) {
        let next = SessionView { status, error };
        if *self.status_tx.borrow() == next {
            return;
        }
        info!("session: {:?} -> {:?}", self.status(), status);
        let _ = self.status_tx.send(next);
    }

    fn on_toggle(&mut self) {
        match self.status() {
            Status::Playing => {
                self.intend_playing = false;
                if let Some(handle) = self.handle.as_mut() {
                    handle.pause();
                }
                self.publish(Status::Paused, None);
            }
            Status::Paused => {
                self.intend_playing = true;
                match self.handle.as_mut() {
                    Some(handle) => {
                        // Reuse the live pipeline; it confirms with Started.
                        handle.resume();
                        self.publish(Status::Connecting, None);
                    }
                    None => self.connect_and_play(),
                }
            }
            Status::Idle => {
                self.intend_playing = true;
                self.connect_and_play();
            }
            Status::Errored => {
                // Do not wait out the retry timer; reconnect right away.
                self.intend_playing = true;
                self.connect_and_play();
            }
            Status::Connecting => {
                debug!("session: toggle ignored while connecting");
            }
        }
    }

    fn connect_and_play(&mut self) {
        self.cancel_retry();
        self.handle = None;

        if self.url.trim().is_empty() {
            self.publish(
                Status::Errored,
                Some(PlaybackError::NoStream.to_string()),
            );
            return;
        }

        self.generation += 1;
        self.publish(Status::Connecting, None);
        match self
            .backend
            .connect(&self.url, self.generation, self.events_tx.clone())
        {
            Ok(mut handle) => {
                handle.set_volume(self.volume);
                self.handle = Some(handle);
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: PlaybackError) {
        self.handle = None;
        let transient = err.is_transient();
        warn!("session: playback failed: {}", err);
        self.publish(Status::Errored, Some(err.to_string()));
        if transient && self.intend_playing {
            self.schedule_retry();
        }
    }

    fn on_signal(&mut self, signal: StreamSignal) {
        match signal {
            StreamSignal::Started => {
                if self.status() == Status::Connecting {
                    self.publish(Status::Playing, None);
                }
            }
            StreamSignal::Buffering => {
                // Only an active stream can stall; a deliberate pause is
                // never reinterpreted as trouble.
                if self.status() == Status::Playing {
                    self.publish(Status::Connecting, None);
                }
            }
            StreamSignal::Failed(err) => match self.status() {
                Status::Connecting | Status::Playing | Status::Paused => self.fail(err),
                Status::Idle | Status::Errored => {
                    debug!("session: ignoring late failure: {}", err);
                }
            },
        }
    }

    fn schedule_retry(&mut self) {
        self.cancel_retry();
        let generation = self.generation;
        let events = self.events_tx.clone();
        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(RETRY_DELAY).await;
            let _ = events.send(SessionEvent::RetryDue { generation });
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.abort();
        }
    }

    fn on_retry_due(&mut self, generation: u64) {
        // An aborted timer may still have delivered its message; both
        // checks keep a stale wakeup from touching a healthy session.
        if generation != self.generation {
            debug!("session: dropping stale retry (generation {})", generation);
            return;
        }
        if self.status() != Status::Errored {
            debug!("session: retry due but no longer errored");
            return;
        }
        self.retry = None;
        info!("session: retrying stream connection");
        self.connect_and_play();
    }

    fn on_wake(&mut self, trigger: &str) {
        // A pending retry implies Errored after a transient failure with
        // intent to play; wake triggers just bring it forward.
        if self.retry.is_some() {
            info!("session: {}, reconnecting now", trigger);
            self.connect_and_play();
        } else {
            debug!("session: {} ignored", trigger);
        }
    }

    fn teardown(&mut self) {
        self.cancel_retry();
        self.intend_playing = false;
        self.handle = None;
        self.generation += 1;
        self.publish(Status::Idle, None);
    }
}
