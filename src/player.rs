//! ffmpeg decode pipeline feeding a rodio sink.
//!
//! ffmpeg pulls the stream and decodes it to raw s16le on stdout. A reader
//! thread chops stdout into sample chunks, and a dedicated audio thread owns
//! the rodio output (those handles cannot leave the thread they were created
//! on) and plays a source that drains the chunk queue. Everything the
//! pipeline has to say travels back as tagged signals.

use std::io::{BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::thread;
use std::time::Duration;

use rodio::{OutputStream, Sink, Source};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::session::{PlaybackError, SessionEvent, StreamBackend, StreamHandle, StreamSignal};

const CHANNELS: u16 = 2;
const SAMPLE_RATE: u32 = 44_100;
/// Decoded chunks buffered between the reader and the audio thread.
const CHUNK_QUEUE: usize = 10;
/// How long the source waits for a chunk before emitting silence.
const STARVE_POLL: Duration = Duration::from_millis(100);
/// Starved polls in a row before the pipeline reports a stall (~2s).
const STALL_TICKS: u32 = 20;
const AUDIO_READY_TIMEOUT: Duration = Duration::from_secs(3);

pub struct FfmpegBackend;

impl StreamBackend for FfmpegBackend {
    fn connect(
        &mut self,
        url: &str,
        generation: u64,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn StreamHandle>, PlaybackError> {
        let mut child = Command::new("ffmpeg")
            .arg("-reconnect")
            .arg("1")
            .arg("-reconnect_streamed")
            .arg("1")
            .arg("-reconnect_delay_max")
            .arg("5")
            .arg("-i")
            .arg(url)
            .arg("-f")
            .arg("s16le")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg("44100")
            .arg("-ac")
            .arg("2")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                PlaybackError::Output(format!("Failed to spawn ffmpeg: {}. Is ffmpeg installed?", e))
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PlaybackError::Output("Failed to capture ffmpeg stdout".into()));
            }
        };

        let (chunks_tx, chunks_rx) = mpsc::sync_channel::<Vec<i16>>(CHUNK_QUEUE);
        {
            let events = events.clone();
            thread::spawn(move || {
                pump_stdout(BufReader::new(stdout), chunks_tx, events, generation)
            });
        }

        let (commands_tx, commands_rx) = mpsc::channel::<AudioCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        thread::spawn(move || run_audio(chunks_rx, commands_rx, ready_tx, events, generation));

        let handle = FfmpegHandle {
            child,
            commands: commands_tx,
        };
        match ready_rx.recv_timeout(AUDIO_READY_TIMEOUT) {
            Ok(Ok(())) => Ok(Box::new(handle)),
            Ok(Err(message)) => Err(PlaybackError::Output(message)),
            Err(_) => Err(PlaybackError::Output("Audio output did not come up in time".into())),
        }
    }
}

enum AudioCommand {
    Pause,
    Resume,
    SetVolume(f32),
    Shutdown,
}

struct FfmpegHandle {
    child: Child,
    commands: Sender<AudioCommand>,
}

impl StreamHandle for FfmpegHandle {
    fn pause(&mut self) {
        let _ = self.commands.send(AudioCommand::Pause);
    }

    fn resume(&mut self) {
        let _ = self.commands.send(AudioCommand::Resume);
    }

    fn set_volume(&mut self, volume: f32) {
        let _ = self.commands.send(AudioCommand::SetVolume(volume));
    }
}

impl Drop for FfmpegHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(AudioCommand::Shutdown);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Owns the rodio output for the lifetime of one pipeline. The stream and
/// sink must be created and dropped on this thread; the thread itself is
/// what keeps audio alive.
fn run_audio(
    chunks: Receiver<Vec<i16>>,
    commands: Receiver<AudioCommand>,
    ready: Sender<Result<(), String>>,
    events: UnboundedSender<SessionEvent>,
    generation: u64,
) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(e) => {
            let _ = ready.send(Err(format!(
                "Failed to initialize audio output: {}. Check your audio drivers.",
                e
            )));
            return;
        }
    };
    let sink = match Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready.send(Err(format!("Failed to create audio sink: {}", e)));
            return;
        }
    };

    sink.append(PcmSource::new(chunks, events.clone(), generation));
    sink.play();
    let _ = ready.send(Ok(()));

    while let Ok(command) = commands.recv() {
        match command {
            AudioCommand::Pause => sink.pause(),
            AudioCommand::Resume => {
                sink.play();
                // the pipeline is still warm, confirm right away
                let _ = events.send(SessionEvent::Signal {
                    generation,
                    signal: StreamSignal::Started,
                });
            }
            AudioCommand::SetVolume(volume) => sink.set_volume(volume),
            AudioCommand::Shutdown => break,
        }
    }
    sink.stop();
    debug!("player: audio thread shutting down");
}

/// Reads decoded pcm from ffmpeg and forwards it as sample chunks.
/// Reports the first audio, and classifies how the pipe ended.
fn pump_stdout(
    mut stdout: impl Read,
    chunks: SyncSender<Vec<i16>>,
    events: UnboundedSender<SessionEvent>,
    generation: u64,
) {
    let mut buf = [0u8; 8192];
    let mut carry: Option<u8> = None;
    let mut produced = false;

    let failure = loop {
        match stdout.read(&mut buf) {
            Ok(0) => {
                break if produced {
                    PlaybackError::Network("stream ended".into())
                } else {
                    PlaybackError::Unsupported("ffmpeg exited before producing audio".into())
                };
            }
            Ok(n) => {
                let mut bytes = Vec::with_capacity(n + 1);
                if let Some(b) = carry.take() {
                    bytes.push(b);
                }
                bytes.extend_from_slice(&buf[..n]);
                // a read may split a sample; keep the odd byte for the next one
                if bytes.len() % 2 == 1 {
                    carry = bytes.pop();
                }

                let samples = bytes_to_samples(&bytes);
                if samples.is_empty() {
                    continue;
                }
                if !produced {
                    produced = true;
                    let _ = events.send(SessionEvent::Signal {
                        generation,
                        signal: StreamSignal::Started,
                    });
                }
                if chunks.send(samples).is_err() {
                    // audio side is gone, the session has already moved on
                    return;
                }
            }
            Err(e) => {
                break if produced {
                    PlaybackError::Network(format!("read from ffmpeg failed: {}", e))
                } else {
                    PlaybackError::Unsupported(format!("no audio from ffmpeg: {}", e))
                };
            }
        }
    };
    debug!("player: decoder pipe closed: {}", failure);
    let _ = events.send(SessionEvent::Signal {
        generation,
        signal: StreamSignal::Failed(failure),
    });
}

fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        let lo = bytes[i] as u16;
        let hi = bytes[i + 1] as u16;
        samples.push(((hi << 8) | lo) as i16);
        i += 2;
    }
    samples
}

struct PcmSource {
    chunks: Receiver<Vec<i16>>,
    current: Vec<i16>,
    position: usize,
    events: UnboundedSender<SessionEvent>,
    generation: u64,
    received_any: bool,
    starved_for: u32,
    stalled: bool,
}

impl PcmSource {
    fn new(chunks: Receiver<Vec<i16>>, events: UnboundedSender<SessionEvent>, generation: u64) -> Self {
        PcmSource {
            chunks,
            current: Vec::new(),
            position: 0,
            events,
            generation,
            received_any: false,
            starved_for: 0,
            stalled: false,
        }
    }

    fn signal(&self, signal: StreamSignal) {
        let _ = self.events.send(SessionEvent::Signal {
            generation: self.generation,
            signal,
        });
    }
}

impl Iterator for PcmSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        loop {
            if self.position < self.current.len() {
                let sample = self.current[self.position];
                self.position += 1;
                return Some(sample as f32 / 32768.0);
            }

            match self.chunks.recv_timeout(STARVE_POLL) {
                Ok(chunk) => {
                    if self.stalled {
                        self.stalled = false;
                        self.signal(StreamSignal::Started);
                    }
                    self.received_any = true;
                    self.starved_for = 0;
                    self.current = chunk;
                    self.position = 0;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.starved_for += 1;
                    // quiet before the first chunk is just a slow connect,
                    // not a stall
                    if self.received_any && !self.stalled && self.starved_for >= STALL_TICKS {
                        self.stalled = true;
                        self.signal(StreamSignal::Buffering);
                    }
                    // keep the sink fed so the device stays open
                    return Some(0.0);
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl Source for PcmSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }
    fn channels(&self) -> u16 {
        CHANNELS
    }
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
    fn total_duration(&self) -> Option<Duration> {
        None // live stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn drain(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[test]
    fn samples_are_little_endian_signed() {
        let samples = bytes_to_samples(&[0x00, 0x00, 0xff, 0x7f, 0x00, 0x80]);
        assert_eq!(samples, vec![0, 32767, -32768]);
    }

    #[test]
    fn pump_reports_started_then_end_of_stream() {
        let (chunks_tx, chunks_rx) = mpsc::sync_channel(CHUNK_QUEUE);
        let (events_tx, mut events_rx) = unbounded_channel();

        pump_stdout(Cursor::new(vec![0u8; 32]), chunks_tx, events_tx, 7);

        assert_eq!(chunks_rx.try_iter().count(), 1);
        let signals = drain(&mut events_rx);
        assert_eq!(signals.len(), 2);
        assert!(matches!(
            &signals[0],
            SessionEvent::Signal {
                generation: 7,
                signal: StreamSignal::Started
            }
        ));
        assert!(matches!(
            &signals[1],
            SessionEvent::Signal {
                generation: 7,
                signal: StreamSignal::Failed(PlaybackError::Network(_))
            }
        ));
    }

    #[test]
    fn pump_flags_streams_that_never_produce_audio() {
        let (chunks_tx, _chunks_rx) = mpsc::sync_channel(CHUNK_QUEUE);
        let (events_tx, mut events_rx) = unbounded_channel();

        pump_stdout(Cursor::new(Vec::new()), chunks_tx, events_tx, 1);

        let signals = drain(&mut events_rx);
        assert_eq!(signals.len(), 1);
        assert!(matches!(
            &signals[0],
            SessionEvent::Signal {
                signal: StreamSignal::Failed(PlaybackError::Unsupported(_)),
                ..
            }
        ));
    }

    #[test]
    fn pump_exits_quietly_when_the_audio_side_is_gone() {
        let (chunks_tx, chunks_rx) = mpsc::sync_channel(1);
        drop(chunks_rx);
        let (events_tx, mut events_rx) = unbounded_channel();

        pump_stdout(Cursor::new(vec![0u8; 64]), chunks_tx, events_tx, 3);

        // Started fires before the dead queue is noticed; no failure follows
        let signals = drain(&mut events_rx);
        assert_eq!(signals.len(), 1);
        assert!(matches!(
            &signals[0],
            SessionEvent::Signal {
                signal: StreamSignal::Started,
                ..
            }
        ));
    }

    #[test]
    fn split_sample_bytes_carry_across_reads() {
        struct DribbleReader {
            data: Vec<u8>,
            pos: usize,
        }
        impl Read for DribbleReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.pos >= self.data.len() {
                    return Ok(0);
                }
                buf[0] = self.data[self.pos];
                self.pos += 1;
                Ok(1)
            }
        }

        let (chunks_tx, chunks_rx) = mpsc::sync_channel(CHUNK_QUEUE);
        let (events_tx, _events_rx) = unbounded_channel();
        let reader = DribbleReader {
            data: vec![0x34, 0x12, 0x78, 0x56],
            pos: 0,
        };

        pump_stdout(reader, chunks_tx, events_tx, 1);

        let samples: Vec<i16> = chunks_rx.try_iter().flatten().collect();
        assert_eq!(samples, vec![0x1234, 0x5678]);
    }

    #[test]
    fn source_scales_samples_and_pads_silence() {
        let (tx, rx) = mpsc::sync_channel(4);
        let (events_tx, _events_rx) = unbounded_channel();
        let mut source = PcmSource::new(rx, events_tx, 1);

        tx.send(vec![16384, -16384]).unwrap();
        assert_eq!(source.next(), Some(0.5));
        assert_eq!(source.next(), Some(-0.5));

        // starved: silence keeps flowing
        assert_eq!(source.next(), Some(0.0));

        drop(tx);
        assert_eq!(source.next(), None);
    }

    #[test]
    fn stall_reports_buffering_then_recovery() {
        let (tx, rx) = mpsc::sync_channel(4);
        let (events_tx, mut events_rx) = unbounded_channel();
        let mut source = PcmSource::new(rx, events_tx, 5);

        tx.send(vec![1]).unwrap();
        source.next();

        source.starved_for = STALL_TICKS - 1;
        assert_eq!(source.next(), Some(0.0));
        assert!(matches!(
            events_rx.try_recv(),
            Ok(SessionEvent::Signal {
                generation: 5,
                signal: StreamSignal::Buffering
            })
        ));

        // only one stall report while starved
        assert_eq!(source.next(), Some(0.0));
        assert!(events_rx.try_recv().is_err());

        tx.send(vec![2]).unwrap();
        source.next();
        assert!(matches!(
            events_rx.try_recv(),
            Ok(SessionEvent::Signal {
                generation: 5,
                signal: StreamSignal::Started
            })
        ));
    }
}
