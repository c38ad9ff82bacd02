//! Microphone spectral capture.
//!
//! audioscope acquires a live microphone stream, routes it through an
//! FFT analysis pipeline, and exposes pull-based snapshots of
//! frequency-domain and time-domain sample data as unsigned bytes.

pub mod audio;

pub use audio::{AudioCapture, CaptureError};
