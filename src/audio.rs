//! Audio capture and spectral analysis
//!
//! This module provides the microphone-backed capture session and its
//! collaborators:
//! - `capture`: the `AudioCapture` session facade and its state machine
//! - `analyzer`: rolling-window FFT analysis producing byte snapshots
//! - `device`: cpal-backed input device access
//! - `wav`: WAV export for captured waveform data

use thiserror::Error;

mod analyzer;
mod capture;
mod device;
mod wav;

pub use analyzer::{
    Analyzer, AnalyzerConfig, SharedAnalyzer, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE, MIN_WINDOW_SIZE,
};
pub use capture::{AudioCapture, StreamHandle, StreamInfo, StreamSource, StreamStart};
pub use device::{list_devices, AudioDeviceInfo, CpalSource};
pub use wav::waveform_to_wav;

/// Capture error types
#[derive(Error, Debug)]
pub enum CaptureError {
    /// No microphone is present, or the platform denied access to it.
    /// Not retriable without new user consent.
    #[error("Audio input unavailable: {0}")]
    DeviceUnavailable(String),
    /// The analysis pipeline could not be constructed. Fatal to the session.
    #[error("Analysis pipeline error: {0}")]
    Pipeline(String),
    /// `initialize()` was called on a session that is already capturing.
    #[error("Capture session is already active")]
    AlreadyActive,
    /// `initialize()` was called on a closed session. Closed is terminal;
    /// construct a fresh session instead.
    #[error("Capture session is closed")]
    Closed,
}
