//! Arbitration of the single hardware audio resource
//!
//! Speaking and listening both need the audio hardware, never at the same
//! time. Every mode change goes through [`AudioResourceArbiter`], which
//! revokes the current holder before granting the resource to a new one.
//!
//! ```text
//!   Idle ──acquire(Playing)──▶ Playing ──acquire(Recording)──▶ Recording
//!    ▲                            │  (holder revoked first)        │
//!    └────────── release ─────────┴────────── release ─────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::{Error, Result};

/// What the hardware audio resource is currently used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioMode {
    /// Nobody holds the resource
    Idle,
    /// Output is active for speech playback
    Playing,
    /// Input is active for speech recognition
    Recording,
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Playing => write!(f, "playing"),
            Self::Recording => write!(f, "recording"),
        }
    }
}

/// Hardware audio device collaborator
///
/// Only the arbiter calls these methods. `deactivate` is best effort and
/// reports problems through logging.
pub trait AudioDevice: Send + Sync {
    /// Activate the hardware for `mode`
    ///
    /// # Errors
    ///
    /// Returns error if the platform refuses or lacks the device
    fn activate(&self, mode: AudioMode) -> Result<()>;

    /// Deactivate the hardware previously activated for `mode`
    fn deactivate(&self, mode: AudioMode);
}

/// Identity of a logical resource owner (synthesizer, listener, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Allocate a process-unique owner id
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback run synchronously when a holder loses the resource
///
/// Runs while the arbiter is mid-transition, so it must not call back into
/// the arbiter. Cancelling a token is the expected use.
pub type RevokeCallback = Arc<dyn Fn() + Send + Sync>;

/// Parameters of an [`AudioResourceArbiter::acquire`] call
pub struct AcquireRequest {
    owner: OwnerId,
    mode: AudioMode,
    protected: bool,
    on_revoked: Option<RevokeCallback>,
}

impl AcquireRequest {
    /// Request `mode` on behalf of `owner`
    #[must_use]
    pub const fn new(owner: OwnerId, mode: AudioMode) -> Self {
        Self {
            owner,
            mode,
            protected: false,
            on_revoked: None,
        }
    }

    /// Protected holders cannot be revoked by other acquirers
    #[must_use]
    pub const fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    /// Set the callback invoked if this holder is revoked
    #[must_use]
    pub fn on_revoked(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_revoked = Some(Arc::new(callback));
        self
    }
}

/// Proof of exclusive use of the audio resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    id: u64,
    owner: OwnerId,
    mode: AudioMode,
}

impl Lease {
    /// Mode this lease was granted for
    #[must_use]
    pub const fn mode(&self) -> AudioMode {
        self.mode
    }

    /// Owner the lease was granted to
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }
}

struct Holder {
    lease: Lease,
    protected: bool,
    on_revoked: Option<RevokeCallback>,
}

#[derive(Default)]
struct State {
    holder: Option<Holder>,
    next_lease: u64,
}

/// Owns the hardware audio mode and serializes every transition
pub struct AudioResourceArbiter {
    device: Arc<dyn AudioDevice>,
    state: Mutex<State>,
    mode_tx: watch::Sender<AudioMode>,
}

impl AudioResourceArbiter {
    /// Create an arbiter over the given hardware device
    #[must_use]
    pub fn new(device: Arc<dyn AudioDevice>) -> Self {
        let (mode_tx, _) = watch::channel(AudioMode::Idle);
        Self {
            device,
            state: Mutex::new(State::default()),
            mode_tx,
        }
    }

    /// Acquire exclusive use of the hardware for the requested mode
    ///
    /// A conflicting holder is revoked first: its callback runs, the device
    /// is deactivated, and only then is the new mode activated. Acquiring
    /// the mode an owner already holds returns the existing lease.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceBusy`] if the current holder is protected
    /// - [`Error::AudioUnavailable`] if the device cannot be activated
    pub fn acquire(&self, request: AcquireRequest) -> Result<Lease> {
        if request.mode == AudioMode::Idle {
            return Err(Error::AudioUnavailable(
                "idle is not an acquirable mode".to_string(),
            ));
        }

        let mut state = self.lock();

        if let Some(holder) = state.holder.as_mut() {
            if holder.lease.owner == request.owner && holder.lease.mode == request.mode {
                holder.protected |= request.protected;
                tracing::trace!(mode = %request.mode, lease = holder.lease.id, "lease extended");
                return Ok(holder.lease.clone());
            }

            if holder.protected {
                tracing::debug!(
                    held = %holder.lease.mode,
                    requested = %request.mode,
                    "refusing to revoke protected holder"
                );
                return Err(Error::ResourceBusy(format!(
                    "audio is {} for a protected request",
                    holder.lease.mode
                )));
            }
        }

        if let Some(previous) = state.holder.take() {
            tracing::debug!(
                revoked = %previous.lease.mode,
                requested = %request.mode,
                "revoking audio holder"
            );
            if let Some(on_revoked) = &previous.on_revoked {
                on_revoked();
            }
            self.device.deactivate(previous.lease.mode);
            self.mode_tx.send_replace(AudioMode::Idle);
        }

        self.device.activate(request.mode).map_err(|e| match e {
            Error::AudioUnavailable(_) => e,
            other => Error::AudioUnavailable(other.to_string()),
        })?;

        state.next_lease += 1;
        let lease = Lease {
            id: state.next_lease,
            owner: request.owner,
            mode: request.mode,
        };
        state.holder = Some(Holder {
            lease: lease.clone(),
            protected: request.protected,
            on_revoked: request.on_revoked,
        });
        self.mode_tx.send_replace(request.mode);

        tracing::debug!(mode = %lease.mode, lease = lease.id, "audio resource granted");
        Ok(lease)
    }

    /// Release a lease, returning the hardware to idle
    ///
    /// Returns false and leaves the resource untouched when the lease has
    /// already been revoked or released.
    pub fn release(&self, lease: &Lease) -> bool {
        let mut state = self.lock();

        let is_current = state
            .holder
            .as_ref()
            .is_some_and(|h| h.lease.id == lease.id);
        if !is_current {
            tracing::debug!(mode = %lease.mode, lease = lease.id, "ignoring stale release");
            return false;
        }

        state.holder = None;
        self.device.deactivate(lease.mode);
        self.mode_tx.send_replace(AudioMode::Idle);

        tracing::debug!(mode = %lease.mode, lease = lease.id, "audio resource released");
        true
    }

    /// Whether `lease` still holds the resource
    #[must_use]
    pub fn is_current(&self, lease: &Lease) -> bool {
        self.lock()
            .holder
            .as_ref()
            .is_some_and(|h| h.lease.id == lease.id)
    }

    /// Current hardware mode
    #[must_use]
    pub fn mode(&self) -> AudioMode {
        self.lock()
            .holder
            .as_ref()
            .map_or(AudioMode::Idle, |h| h.lease.mode)
    }

    /// Watch every mode transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AudioMode> {
        self.mode_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
