//! Recognition engine collaborator

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Event produced by a running recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Recognized speech; `is_final` ends the session
    Transcript {
        /// Recognized text
        text: String,
        /// Whether this is the terminal result
        is_final: bool,
    },
    /// Recognizer failure; ends the session
    Error(String),
    /// The microphone could not be opened; ends the session
    Unavailable(String),
}

/// Streaming speech recognizer
///
/// Consumes live audio once the `Recording` mode is active. The engine
/// keeps running until `stop` is cancelled or it reports a terminal event.
/// `start` is called with the listener locked, so it must return without
/// waiting on hardware; device failures are reported as
/// [`RecognitionEvent::Unavailable`].
pub trait RecognitionEngine: Send + Sync {
    /// Begin recognition and return the event stream
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot start
    fn start(&self, stop: CancellationToken) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>>;
}
