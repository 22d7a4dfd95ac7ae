//! Shared test fakes for the audio hardware and remote services
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use spectra_speech::arbiter::{AudioDevice, AudioMode};
use spectra_speech::stt::{RecognitionEngine, RecognitionEvent};
use spectra_speech::tts::SynthesisClient;
use spectra_speech::voice::PlaybackEngine;
use spectra_speech::{Config, Error, Result, SpeechIo};

/// Audio device that records transitions and counts overlapping activations
#[derive(Default)]
pub struct RecordingDevice {
    active: Mutex<Vec<AudioMode>>,
    log: Mutex<Vec<String>>,
    overlaps: AtomicUsize,
}

impl RecordingDevice {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Times a mode was activated while another was still active
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl AudioDevice for RecordingDevice {
    fn activate(&self, mode: AudioMode) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        if !active.is_empty() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        active.push(mode);
        self.log.lock().unwrap().push(format!("on:{mode}"));
        Ok(())
    }

    fn deactivate(&self, mode: AudioMode) {
        self.active.lock().unwrap().retain(|m| *m != mode);
        self.log.lock().unwrap().push(format!("off:{mode}"));
    }
}

/// Synthesis client returning `audio:<voice>:<text>` after a delay
pub struct FakeSynthesis {
    calls: AtomicUsize,
    delay: Duration,
    failure: Option<Error>,
}

impl FakeSynthesis {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
            failure: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, error: Error) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisClient for FakeSynthesis {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(Bytes::from(format!("audio:{voice_id}:{text}"))),
        }
    }
}

/// Playback engine that "plays" for a fixed duration and honours `stop`
pub struct FakePlayback {
    duration: Duration,
    played: Mutex<Vec<Bytes>>,
    failure: Option<Error>,
}

impl FakePlayback {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            played: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// Fail every playback with `error` once `duration` has passed
    pub fn failing(mut self, error: Error) -> Self {
        self.failure = Some(error);
        self
    }

    /// Audio whose playback ran to completion
    pub fn played(&self) -> Vec<Bytes> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaybackEngine for FakePlayback {
    async fn play(&self, audio: Bytes, stop: CancellationToken) -> Result<()> {
        tokio::select! {
            () = stop.cancelled() => Err(Error::Canceled),
            () = tokio::time::sleep(self.duration) => match &self.failure {
                Some(error) => Err(error.clone()),
                None => {
                    self.played.lock().unwrap().push(audio);
                    Ok(())
                }
            },
        }
    }
}

/// Recognition engine replaying one script of events per session
///
/// Sessions past the end of the script stay silent until stopped.
pub struct ScriptedEngine {
    scripts: Mutex<Vec<Vec<RecognitionEvent>>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<RecognitionEvent>>>,
    starts: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<Vec<RecognitionEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().rev().collect()),
            senders: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
        }
    }

    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Send an event to the most recent session
    pub fn emit(&self, event: RecognitionEvent) {
        if let Some(tx) = self.senders.lock().unwrap().last() {
            let _ = tx.send(event);
        }
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn start(&self, _stop: CancellationToken) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.scripts.lock().unwrap().pop().unwrap_or_default() {
            let _ = tx.send(event);
        }
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }
}

pub fn partial(text: &str) -> RecognitionEvent {
    RecognitionEvent::Transcript {
        text: text.to_string(),
        is_final: false,
    }
}

pub fn final_transcript(text: &str) -> RecognitionEvent {
    RecognitionEvent::Transcript {
        text: text.to_string(),
        is_final: true,
    }
}

/// Fakes wired into a [`SpeechIo`]
pub struct Harness {
    pub device: Arc<RecordingDevice>,
    pub client: Arc<FakeSynthesis>,
    pub playback: Arc<FakePlayback>,
    pub engine: Arc<ScriptedEngine>,
    pub speech: SpeechIo,
}

impl Harness {
    pub fn new(client: FakeSynthesis, playback: FakePlayback, engine: ScriptedEngine) -> Self {
        let device = Arc::new(RecordingDevice::default());
        let client = Arc::new(client);
        let playback = Arc::new(playback);
        let engine = Arc::new(engine);

        let speech = SpeechIo::new(
            Config::default(),
            device.clone(),
            client.clone(),
            playback.clone(),
            engine.clone(),
        );

        Self {
            device,
            client,
            playback,
            engine,
            speech,
        }
    }

    pub fn standard() -> Self {
        Self::new(
            FakeSynthesis::new(),
            FakePlayback::new(Duration::from_millis(50)),
            ScriptedEngine::silent(),
        )
    }
}
