//! Timeout-driven restart of recognition sessions

use std::time::Duration;

use tokio::sync::mpsc;

use super::{ListenCallbacks, SpeechListener};
use crate::{Error, Result};

enum Outcome {
    Final(String),
    Failed(Error),
}

/// Listen until a final transcript arrives, restarting on timeout
///
/// Each attempt runs with a deadline of `timeout`. When it expires the
/// session is stopped; if partial speech was heard, the latest partial is
/// returned as the transcript. Otherwise a new session is started, up to
/// `max_retries` times. Recognizer errors count as an attempt.
///
/// Returns `Ok(None)` when every attempt ended without speech.
///
/// # Errors
///
/// Returns [`Error::AudioUnavailable`] / [`Error::ResourceBusy`] if the
/// microphone cannot be used, and [`Error::Recognition`] if the recognizer
/// cannot start.
pub async fn listen_with_retry<P>(
    listener: &SpeechListener,
    on_partial: P,
    timeout: Duration,
    max_retries: u32,
) -> Result<Option<String>>
where
    P: Fn(String) + Clone + Send + Sync + 'static,
{
    for attempt in 0..=max_retries {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let error_tx = tx.clone();
        let callbacks = ListenCallbacks::new(on_partial.clone(), move |text| {
            let _ = tx.send(Outcome::Final(text));
        })
        .on_error(move |e| {
            let _ = error_tx.send(Outcome::Failed(e));
        });

        let handle = listener.listen(callbacks, Some(timeout))?;
        let deadline = handle
            .deadline()
            .unwrap_or_else(|| tokio::time::Instant::now() + timeout);

        let outcome = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                listener.stop(&handle);
                // Yields the last partial, or None once the callbacks are dropped
                rx.recv().await
            }
        };

        match outcome {
            Some(Outcome::Final(text)) => return Ok(Some(text)),
            Some(Outcome::Failed(e)) if e.is_availability() => return Err(e),
            Some(Outcome::Failed(e)) => {
                tracing::warn!(attempt, error = %e, "recognition attempt failed");
            }
            None => tracing::debug!(attempt, "no speech before deadline"),
        }
    }

    tracing::info!(attempts = max_retries + 1, "giving up on listening");
    Ok(None)
}
