//! Speech recognition sessions
//!
//! [`SpeechListener`] runs at most one recognition session at a time:
//!
//! ```text
//!   Stopped ─▶ Starting ─▶ Listening ─▶ Stopping ─▶ Stopped
//!                 │   acquire(Recording) fails          ▲
//!                 └─────────────────────────────────────┘
//! ```
//!
//! Restarting after a timeout is left to the caller, see
//! [`listen_with_retry`].

mod engine;
mod retry;
mod whisper;

pub use engine::{RecognitionEngine, RecognitionEvent};
pub use retry::listen_with_retry;
pub use whisper::WhisperRecognizer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::arbiter::{AcquireRequest, AudioMode, AudioResourceArbiter, Lease, OwnerId};
use crate::{Error, Result};

/// Lifecycle state of a recognition session
///
/// `Starting` and `Stopping` are passed through while the listener lock is
/// held, so [`SpeechListener::state`] only ever reports `Stopped` or
/// `Listening`. The transitional states show up in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Stopped,
    /// Acquiring the microphone and starting the recognizer
    Starting,
    /// Recognizer running, transcripts flowing
    Listening,
    /// Tearing down
    Stopping,
}

/// Snapshot of the listener's current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionSession {
    /// Current state
    pub state: SessionState,
    /// Sessions started since the last final transcript, minus one
    pub restart_count: u32,
    /// Caller-supplied deadline of the active session
    pub deadline: Option<Instant>,
}

type PartialCallback = Box<dyn Fn(String) + Send + Sync>;
type FinalCallback = Box<dyn FnOnce(String) + Send>;
type ErrorCallback = Box<dyn FnOnce(Error) + Send>;

/// Callbacks receiving the results of one session
pub struct ListenCallbacks {
    on_partial: PartialCallback,
    on_final: FinalCallback,
    on_error: Option<ErrorCallback>,
}

impl ListenCallbacks {
    /// Receive partial transcripts and the final transcript
    pub fn new(
        on_partial: impl Fn(String) + Send + Sync + 'static,
        on_final: impl FnOnce(String) + Send + 'static,
    ) -> Self {
        Self {
            on_partial: Box::new(on_partial),
            on_final: Box::new(on_final),
            on_error: None,
        }
    }

    /// Also receive the error that ended a session without a transcript
    #[must_use]
    pub fn on_error(mut self, on_error: impl FnOnce(Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

/// Identifies a session started by [`SpeechListener::listen`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenHandle {
    id: u64,
    deadline: Option<Instant>,
}

impl ListenHandle {
    /// Deadline the session was started with
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Why a session ended
enum Ending {
    Final(String),
    Stopped,
    Revoked,
    Failed(Error),
}

/// Callback to fire once the listener lock is released
enum Completion {
    Final(FinalCallback, String),
    Error(Option<ErrorCallback>, Error),
    Silent,
}

impl Completion {
    fn fire(self) {
        match self {
            Self::Final(on_final, text) => on_final(text),
            Self::Error(Some(on_error), error) => on_error(error),
            Self::Error(None, _) | Self::Silent => {}
        }
    }
}

struct ActiveSession {
    id: u64,
    lease: Lease,
    stop: CancellationToken,
    deadline: Option<Instant>,
    last_partial: Option<String>,
    on_final: FinalCallback,
    on_error: Option<ErrorCallback>,
    /// Completions decided outside the pump are fired by the pump, after
    /// any `on_partial` it is running
    handoff: oneshot::Sender<Completion>,
}

/// Fire `completion` on the session's pump, or here if the pump is gone
fn hand_off(handoff: oneshot::Sender<Completion>, completion: Completion) {
    if let Err(completion) = handoff.send(completion) {
        completion.fire();
    }
}

#[derive(Default)]
struct ListenerState {
    session: Option<ActiveSession>,
    awaiting_final: bool,
    restart_count: u32,
}

struct ListenerInner {
    arbiter: Arc<AudioResourceArbiter>,
    engine: Arc<dyn RecognitionEngine>,
    owner: OwnerId,
    next_id: AtomicU64,
    state: Mutex<ListenerState>,
}

/// Runs speech recognition sessions through the shared audio resource
#[derive(Clone)]
pub struct SpeechListener {
    inner: Arc<ListenerInner>,
}

impl SpeechListener {
    /// Create a listener
    #[must_use]
    pub fn new(arbiter: Arc<AudioResourceArbiter>, engine: Arc<dyn RecognitionEngine>) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                arbiter,
                engine,
                owner: OwnerId::next(),
                next_id: AtomicU64::new(1),
                state: Mutex::new(ListenerState::default()),
            }),
        }
    }

    /// Start a recognition session
    ///
    /// Any existing session is stopped first. Returns immediately; results
    /// arrive through `callbacks`. `deadline` is recorded on the session for
    /// the caller's timeout handling, the listener does not enforce it.
    ///
    /// # Errors
    ///
    /// - [`Error::AudioUnavailable`] / [`Error::ResourceBusy`] if the
    ///   microphone cannot be acquired
    /// - [`Error::Recognition`] if the recognizer fails to start
    pub fn listen(&self, callbacks: ListenCallbacks, deadline: Option<Duration>) -> Result<ListenHandle> {
        let inner = &self.inner;
        let mut state = inner.lock();

        let previous = state
            .session
            .take()
            .map(|old| inner.teardown(&mut state, old, Ending::Stopped));

        let started = inner.start_session(&mut state, callbacks, deadline);
        drop(state);

        if let Some((completion, handoff)) = previous {
            hand_off(handoff, completion);
        }
        started
    }

    /// Stop the session identified by `handle`
    ///
    /// The microphone is released before this returns. `on_final` then
    /// fires with the latest partial transcript if anything was heard,
    /// after any `on_partial` still running; otherwise the session ends
    /// silently. Returns false if the session had already ended.
    pub fn stop(&self, handle: &ListenHandle) -> bool {
        let inner = &self.inner;
        let (completion, handoff) = {
            let mut state = inner.lock();
            let Some(session) = state.session.take_if(|s| s.id == handle.id) else {
                return false;
            };
            inner.teardown(&mut state, session, Ending::Stopped)
        };

        hand_off(handoff, completion);
        true
    }

    /// Wait for the handle's deadline, then stop the session
    ///
    /// Returns true if the session was still running at the deadline.
    /// Without a deadline this returns false immediately.
    pub async fn stop_at_deadline(&self, handle: &ListenHandle) -> bool {
        let Some(deadline) = handle.deadline else {
            return false;
        };

        tokio::time::sleep_until(deadline).await;
        let stopped = self.stop(handle);
        if stopped {
            tracing::debug!(session = handle.id, "listening deadline reached");
        }
        stopped
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session().state
    }

    /// Snapshot of the current session
    ///
    /// Taken under the listener lock, so `state` is `Listening` while a
    /// session exists and `Stopped` otherwise.
    #[must_use]
    pub fn session(&self) -> RecognitionSession {
        let state = self.inner.lock();
        RecognitionSession {
            state: if state.session.is_some() {
                SessionState::Listening
            } else {
                SessionState::Stopped
            },
            restart_count: state.restart_count,
            deadline: state.session.as_ref().and_then(|s| s.deadline),
        }
    }
}

impl ListenerInner {
    fn start_session(
        self: &Arc<Self>,
        state: &mut ListenerState,
        callbacks: ListenCallbacks,
        deadline: Option<Duration>,
    ) -> Result<ListenHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = id, state = ?SessionState::Starting, "recognition session");

        if state.awaiting_final {
            state.restart_count += 1;
        }

        let stop = CancellationToken::new();
        let revoke = stop.clone();
        let lease = self
            .arbiter
            .acquire(
                AcquireRequest::new(self.owner, AudioMode::Recording)
                    .on_revoked(move || revoke.cancel()),
            )
            .inspect_err(|e| {
                tracing::warn!(session = id, error = %e, "microphone unavailable");
            })?;

        let events = match self.engine.start(stop.clone()) {
            Ok(events) => events,
            Err(e) => {
                stop.cancel();
                self.arbiter.release(&lease);
                tracing::warn!(session = id, error = %e, "recognizer failed to start");
                return Err(match e {
                    Error::Recognition(_) => e,
                    other => Error::Recognition(other.to_string()),
                });
            }
        };

        let deadline = deadline.map(|d| Instant::now() + d);
        let (handoff, handoff_rx) = oneshot::channel();
        state.awaiting_final = true;
        state.session = Some(ActiveSession {
            id,
            lease,
            stop: stop.clone(),
            deadline,
            last_partial: None,
            on_final: callbacks.on_final,
            on_error: callbacks.on_error,
            handoff,
        });

        tokio::spawn(Arc::clone(self).pump(id, events, handoff_rx, stop, callbacks.on_partial));

        tracing::debug!(session = id, state = ?SessionState::Listening, "recognition session");
        Ok(ListenHandle { id, deadline })
    }

    /// Forward recognizer events until the session ends
    ///
    /// Every callback of a session runs on this task, so `on_final` can
    /// never overtake an `on_partial`.
    async fn pump(
        self: Arc<Self>,
        id: u64,
        mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
        mut handoff: oneshot::Receiver<Completion>,
        stop: CancellationToken,
        on_partial: PartialCallback,
    ) {
        let ending = loop {
            let ending = tokio::select! {
                biased;
                completion = &mut handoff => {
                    if let Ok(completion) = completion {
                        completion.fire();
                    }
                    return;
                }
                () = stop.cancelled() => Ending::Revoked,
                event = events.recv() => match event {
                    Some(RecognitionEvent::Transcript { text, is_final: false }) => {
                        if self.record_partial(id, &text) {
                            on_partial(text);
                        }
                        continue;
                    }
                    Some(RecognitionEvent::Transcript { text, is_final: true }) => Ending::Final(text),
                    Some(RecognitionEvent::Error(message)) => {
                        Ending::Failed(Error::Recognition(message))
                    }
                    Some(RecognitionEvent::Unavailable(message)) => {
                        Ending::Failed(Error::AudioUnavailable(message))
                    }
                    None => Ending::Failed(Error::Recognition(
                        "recognizer ended without a result".to_string(),
                    )),
                },
            };
            break ending;
        };

        if let Some(completion) = self.finish(id, ending) {
            completion.fire();
        } else if let Ok(completion) = handoff.await {
            // stop() or a newer listen() ended the session first
            completion.fire();
        }
    }

    fn record_partial(&self, id: u64, text: &str) -> bool {
        let mut state = self.lock();
        match state.session.as_mut() {
            Some(session) if session.id == id => {
                session.last_partial = Some(text.to_string());
                true
            }
            _ => false,
        }
    }

    /// End session `id` if it is still current
    fn finish(&self, id: u64, ending: Ending) -> Option<Completion> {
        let mut state = self.lock();
        let session = state.session.take_if(|s| s.id == id)?;
        let (completion, _) = self.teardown(&mut state, session, ending);
        Some(completion)
    }

    /// Stop the recognizer and release the microphone; callbacks are returned, not fired
    fn teardown(
        &self,
        state: &mut ListenerState,
        session: ActiveSession,
        ending: Ending,
    ) -> (Completion, oneshot::Sender<Completion>) {
        tracing::debug!(session = session.id, state = ?SessionState::Stopping, "recognition session");

        session.stop.cancel();
        // Ignored by the arbiter if the lease was revoked
        self.arbiter.release(&session.lease);

        let completion = match ending {
            Ending::Final(text) => Completion::Final(session.on_final, text),
            Ending::Stopped => session
                .last_partial
                .map_or(Completion::Silent, |text| Completion::Final(session.on_final, text)),
            Ending::Revoked => Completion::Error(
                session.on_error,
                Error::AudioUnavailable("microphone revoked by another audio request".to_string()),
            ),
            Ending::Failed(error) => {
                tracing::warn!(session = session.id, error = %error, "recognition failed");
                Completion::Error(session.on_error, error)
            }
        };

        if matches!(completion, Completion::Final(..)) {
            state.awaiting_final = false;
            state.restart_count = 0;
        }

        tracing::debug!(session = session.id, state = ?SessionState::Stopped, "recognition session");
        (completion, session.handoff)
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
