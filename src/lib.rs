//! Spectra Speech - speech I/O coordination for an accessibility assistant
//!
//! This library owns everything between "say this" / "listen for that" and
//! the audio hardware:
//! - Text-to-speech through a remote SSML service, with request sharing,
//!   caching and cancellation
//! - Arbitration of the single audio resource between speaking and listening
//! - Speech recognition sessions with caller-driven timeouts and restarts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      SpeechIo                        │
//! │   SpeechSynthesizer      │      SpeechListener       │
//! │   cache · in-flight      │   session state machine   │
//! └─────────────┬────────────┴─────────────┬─────────────┘
//!               │  acquire(Playing)        │  acquire(Recording)
//! ┌─────────────▼──────────────────────────▼─────────────┐
//! │               AudioResourceArbiter                   │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//! ┌──────────────────────────▼───────────────────────────┐
//! │          AudioDevice (cpal output / input)           │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod arbiter;
pub mod config;
pub mod error;
pub mod memory;
pub mod service;
pub mod stt;
pub mod tts;
pub mod voice;

pub use arbiter::{AudioMode, AudioResourceArbiter};
pub use config::Config;
pub use error::{Error, Result};
pub use memory::MemoryPressure;
pub use service::SpeechIo;
pub use stt::{ListenCallbacks, SpeechListener};
pub use tts::{Priority, SpeechSynthesizer};
