//! Text-to-speech coordination
//!
//! [`SpeechSynthesizer`] turns `speak` requests into played audio:
//!
//! ```text
//!   speak ─▶ cache hit? ──yes──────────────────────────┐
//!              │ no                                     ▼
//!              ▼                                 acquire(Playing)
//!        in flight? ──yes──▶ join waiters ──┐           │
//!              │ no                         │        playback
//!              ▼                            │           │
//!        POST SSML ─▶ cache.put ─▶ notify ──┘        release
//! ```
//!
//! Identical requests share one network call. Every waiter receives the
//! same outcome, in subscription order.

mod cache;
mod client;
mod ssml;

pub use cache::{CacheEntry, CacheKey, DEFAULT_MAX_ENTRIES, SynthesisCache};
pub use client::{HttpSynthesisClient, SynthesisClient};
pub use ssml::{build_ssml, escape_xml};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::arbiter::{AcquireRequest, AudioMode, AudioResourceArbiter, OwnerId};
use crate::config::TtsConfig;
use crate::memory::MemoryPressure;
use crate::voice::PlaybackEngine;
use crate::{Error, Result};

/// Whether a request may be interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Canceled by [`SpeechSynthesizer::cancel_all`]
    #[default]
    Normal,
    /// Runs to completion; immune to `cancel_all` and to revocation
    /// while playing
    Protected,
}

type Waiter = oneshot::Sender<Result<Bytes>>;

/// A synthesis network call shared by every caller asking for the same key
struct PendingRequest {
    id: u64,
    cancel: CancellationToken,
    waiters: Vec<Waiter>,
    protected: bool,
}

enum Subscription {
    Ready(Bytes),
    Waiting(oneshot::Receiver<Result<Bytes>>),
}

struct Inner {
    client: Arc<dyn SynthesisClient>,
    playback: Arc<dyn PlaybackEngine>,
    arbiter: Arc<AudioResourceArbiter>,
    cache: SynthesisCache,
    pending: Mutex<HashMap<CacheKey, PendingRequest>>,
    next_request: AtomicU64,
    /// Parent of every in-flight normal request; replaced on `cancel_all`
    normal_cancel: Mutex<CancellationToken>,
    /// Serializes playback so one utterance plays at a time
    play_turn: tokio::sync::Mutex<()>,
    request_timeout: Duration,
    owner: OwnerId,
}

/// Speaks text through a remote TTS service and the shared audio resource
#[derive(Clone)]
pub struct SpeechSynthesizer {
    inner: Arc<Inner>,
}

impl SpeechSynthesizer {
    /// Create a synthesizer
    #[must_use]
    pub fn new(
        client: Arc<dyn SynthesisClient>,
        playback: Arc<dyn PlaybackEngine>,
        arbiter: Arc<AudioResourceArbiter>,
        config: &TtsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                playback,
                arbiter,
                cache: SynthesisCache::new(config.cache_entries),
                pending: Mutex::new(HashMap::new()),
                next_request: AtomicU64::new(1),
                normal_cancel: Mutex::new(CancellationToken::new()),
                play_turn: tokio::sync::Mutex::new(()),
                request_timeout: Duration::from_secs(config.timeout_secs),
                owner: OwnerId::next(),
            }),
        }
    }

    /// Speak `text` with `voice_id`
    ///
    /// Resolves once playback has finished. Blank text resolves immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] if synthesis failed (not retried)
    /// - [`Error::Canceled`] if a normal request was canceled by `cancel_all`
    /// - [`Error::AudioUnavailable`] / [`Error::ResourceBusy`] if the audio
    ///   resource could not be acquired or was revoked mid-playback
    /// - [`Error::Decode`] if the returned audio could not be played
    pub async fn speak(&self, text: &str, voice_id: &str, priority: Priority) -> Result<()> {
        let token = self.request_token(priority);
        self.speak_with_token(text, voice_id, priority, token).await
    }

    /// Spawn a `speak` and report its outcome to `on_complete` exactly once
    ///
    /// The request is registered for `cancel_all` immediately, before the
    /// spawned task first runs.
    pub fn speak_then<F>(
        &self,
        text: impl Into<String>,
        voice_id: impl Into<String>,
        priority: Priority,
        on_complete: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let this = self.clone();
        let text = text.into();
        let voice_id = voice_id.into();
        let token = self.request_token(priority);

        tokio::spawn(async move {
            let result = this.speak_with_token(&text, &voice_id, priority, token).await;
            on_complete(result);
        })
    }

    /// Cancel every normal request: in-flight synthesis and playback
    ///
    /// Protected requests keep running. A network call shared with a
    /// protected waiter also keeps running; only the normal waiters on it
    /// are released with [`Error::Canceled`]. Canceled calls leave the
    /// in-flight table immediately, so later requests start fresh.
    pub fn cancel_all(&self) {
        let canceled: Vec<PendingRequest> = {
            let mut pending = self.inner.lock_pending();
            let keys: Vec<CacheKey> = pending
                .iter()
                .filter(|(_, r)| !r.protected)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };

        let network_calls = canceled.len();
        for request in canceled {
            request.cancel.cancel();
            for waiter in request.waiters {
                let _ = waiter.send(Err(Error::Canceled));
            }
        }

        let previous = std::mem::replace(
            &mut *self.inner.lock_normal_cancel(),
            CancellationToken::new(),
        );
        previous.cancel();

        tracing::info!(network_calls, "canceled normal speech requests");
    }

    /// Clear the cache whenever memory pressure is signalled
    ///
    /// The task ends when every [`MemoryPressure`] sender is dropped.
    pub fn watch_memory_pressure(&self, signal: &MemoryPressure) -> JoinHandle<()> {
        let mut rx = signal.subscribe();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        tracing::info!("memory pressure, dropping synthesized audio");
                        inner.cache.clear();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// The synthesis cache
    #[must_use]
    pub fn cache(&self) -> &SynthesisCache {
        &self.inner.cache
    }

    /// Number of synthesis network calls currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock_pending().len()
    }

    fn request_token(&self, priority: Priority) -> CancellationToken {
        match priority {
            Priority::Normal => self.inner.lock_normal_cancel().child_token(),
            Priority::Protected => CancellationToken::new(),
        }
    }

    async fn speak_with_token(
        &self,
        text: &str,
        voice_id: &str,
        priority: Priority,
        token: CancellationToken,
    ) -> Result<()> {
        if text.trim().is_empty() {
            tracing::debug!("skipping speech for empty text");
            return Ok(());
        }
        if token.is_cancelled() {
            return Err(Error::Canceled);
        }

        let key = CacheKey::new(text, voice_id);
        let audio = self.resolve(key, priority, &token).await?;
        self.play(audio, priority, &token).await
    }

    /// Get audio for `key` from the cache, an in-flight request, or the network
    async fn resolve(
        &self,
        key: CacheKey,
        priority: Priority,
        token: &CancellationToken,
    ) -> Result<Bytes> {
        if let Some(audio) = self.inner.cache.get(&key) {
            tracing::debug!(voice = %key.voice_id, "synthesis cache hit");
            return Ok(audio);
        }

        match self.subscribe(key, priority) {
            Subscription::Ready(audio) => Ok(audio),
            Subscription::Waiting(rx) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(Error::Canceled),
                    outcome = rx => outcome.unwrap_or(Err(Error::Canceled)),
                }
            }
        }
    }

    fn subscribe(&self, key: CacheKey, priority: Priority) -> Subscription {
        let protected = priority == Priority::Protected;
        let (tx, rx) = oneshot::channel();

        let mut pending = self.inner.lock_pending();

        // Completion stores into the cache before leaving the pending table
        if let Some(audio) = self.inner.cache.get(&key) {
            return Subscription::Ready(audio);
        }

        if let Some(request) = pending.get_mut(&key) {
            request.waiters.push(tx);
            request.protected |= protected;
            tracing::debug!(
                voice = %key.voice_id,
                waiters = request.waiters.len(),
                "joined in-flight synthesis"
            );
            return Subscription::Waiting(rx);
        }

        let id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        pending.insert(
            key.clone(),
            PendingRequest {
                id,
                cancel: cancel.clone(),
                waiters: vec![tx],
                protected,
            },
        );
        drop(pending);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_request(id, key, cancel));

        Subscription::Waiting(rx)
    }

    async fn play(&self, audio: Bytes, priority: Priority, token: &CancellationToken) -> Result<()> {
        let _turn = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Canceled),
            turn = self.inner.play_turn.lock() => turn,
        };

        let stop = token.child_token();
        let revoke = stop.clone();
        let lease = self.inner.arbiter.acquire(
            AcquireRequest::new(self.inner.owner, AudioMode::Playing)
                .protected(priority == Priority::Protected)
                .on_revoked(move || revoke.cancel()),
        )?;

        tracing::debug!(bytes = audio.len(), ?priority, "playing synthesized speech");
        let result = self.inner.playback.play(audio, stop).await;
        self.inner.arbiter.release(&lease);

        match result {
            Err(Error::Canceled) if token.is_cancelled() => Err(Error::Canceled),
            Err(Error::Canceled) => Err(Error::AudioUnavailable(
                "playback revoked by another audio request".to_string(),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "playback failed");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }
}

impl Inner {
    /// Run one network call and fan its outcome out to every waiter
    async fn run_request(self: Arc<Self>, id: u64, key: CacheKey, cancel: CancellationToken) {
        let call = tokio::time::timeout(
            self.request_timeout,
            self.client.synthesize(&key.text, &key.voice_id),
        );

        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(Error::Canceled),
            result = call => match result {
                Ok(Ok(audio)) if audio.is_empty() => {
                    Err(Error::Network("TTS service returned no audio".to_string()))
                }
                Ok(result) => result,
                Err(_) => Err(Error::Network(format!(
                    "synthesis timed out after {}s",
                    self.request_timeout.as_secs()
                ))),
            },
        };

        match &outcome {
            Ok(audio) => self.cache.put(key.clone(), audio.clone()),
            Err(e) => tracing::warn!(voice = %key.voice_id, error = %e, "synthesis failed"),
        }

        // A canceled call may already have been replaced under the same key
        let request = {
            let mut pending = self.lock_pending();
            match pending.get(&key) {
                Some(request) if request.id == id => pending.remove(&key),
                _ => None,
            }
        };
        if let Some(request) = request {
            for waiter in request.waiters {
                // A waiter that was canceled has dropped its receiver
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<CacheKey, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_normal_cancel(&self) -> MutexGuard<'_, CancellationToken> {
        self.normal_cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
