//! Rolling-window frequency analysis
//!
//! Turns the live sample stream into byte-valued snapshots for the
//! capture session. Features:
//! - Blackman window to reduce spectral leakage
//! - temporal smoothing of linear magnitudes for stable readings
//! - decibel mapping of magnitudes into unsigned bytes
//!
//! The FFT itself is delegated to rustfft; this module only windows the
//! most recent samples, scales the result, and formats the two snapshot
//! views (frequency bins and raw waveform).

use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::{Arc, Mutex};

use crate::audio::CaptureError;

/// Default analysis window size in samples
pub const DEFAULT_WINDOW_SIZE: usize = 2048;
/// Smallest analysis window accepted by [`Analyzer::new`]
pub const MIN_WINDOW_SIZE: usize = 32;
/// Largest analysis window accepted by [`Analyzer::new`]
pub const MAX_WINDOW_SIZE: usize = 32768;

/// Analyzer shared between the stream callback thread and the owning session
pub type SharedAnalyzer = Arc<Mutex<Analyzer>>;

/// Configuration for analyzer behavior
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Analysis window size in samples (power of two)
    pub window_size: usize,
    /// Temporal smoothing factor (0.0-1.0, higher = more smoothing)
    pub smoothing_factor: f32,
    /// Magnitude mapped to byte 0 (decibels)
    pub min_decibels: f32,
    /// Magnitude mapped to byte 255 (decibels)
    pub max_decibels: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            smoothing_factor: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// FFT-based analyzer producing byte frequency and waveform snapshots
///
/// Keeps a ring of the most recent `window_size` samples fed from the
/// input stream. Snapshots are computed on demand when a session refreshes
/// its buffers, not on every pushed sample.
pub struct Analyzer {
    config: AnalyzerConfig,
    window: Vec<f32>,
    ring: Vec<f32>,
    write_pos: usize,
    fft_planner: FftPlanner<f32>,
    prev_magnitudes: Vec<f32>,
}

impl Analyzer {
    /// Create an analyzer for the given window size with default behavior
    pub fn new(window_size: usize) -> Result<Self, CaptureError> {
        Self::with_config(AnalyzerConfig {
            window_size,
            ..AnalyzerConfig::default()
        })
    }

    /// Create an analyzer with custom configuration
    ///
    /// The window size must be a power of two between [`MIN_WINDOW_SIZE`]
    /// and [`MAX_WINDOW_SIZE`].
    pub fn with_config(config: AnalyzerConfig) -> Result<Self, CaptureError> {
        let n = config.window_size;
        if !n.is_power_of_two() || !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&n) {
            return Err(CaptureError::Pipeline(format!(
                "invalid analysis window {}: must be a power of two between {} and {}",
                n, MIN_WINDOW_SIZE, MAX_WINDOW_SIZE
            )));
        }

        // Generate Blackman window to reduce spectral leakage
        let mut window = vec![0.0; n];
        for i in 0..n {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            window[i] = 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos();
        }

        Ok(Self {
            window,
            ring: vec![0.0; n],
            write_pos: 0,
            fft_planner: FftPlanner::new(),
            prev_magnitudes: vec![0.0; n / 2],
            config,
        })
    }

    /// Analysis window size in samples
    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    /// Number of frequency bins (half the window size)
    pub fn bin_count(&self) -> usize {
        self.config.window_size / 2
    }

    /// Feed samples from the live stream, keeping the most recent window
    pub fn push_samples(&mut self, samples: &[f32]) {
        let n = self.ring.len();
        for &sample in samples {
            self.ring[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % n;
        }
    }

    /// Refresh `out` with the current byte frequency snapshot
    ///
    /// One unsigned byte per bin: the smoothed linear magnitude converted
    /// to decibels and mapped from [min_decibels, max_decibels] into
    /// [0, 255]. `out` must hold exactly [`Self::bin_count`] bytes.
    pub fn write_frequency_bytes(&mut self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.bin_count());

        let n = self.config.window_size;

        // Window the samples in time order, oldest first
        let mut buffer: Vec<Complex<f32>> = (0..n)
            .map(|i| {
                let sample = self.ring[(self.write_pos + i) % n];
                Complex::new(sample * self.window[i], 0.0)
            })
            .collect();

        let fft = self.fft_planner.plan_fft_forward(n);
        fft.process(&mut buffer);

        let scale = 1.0 / n as f32;
        let tau = self.config.smoothing_factor;
        let db_range = self.config.max_decibels - self.config.min_decibels;

        for (k, byte) in out.iter_mut().enumerate() {
            let magnitude = buffer[k].norm() * scale;

            // Smooth linear magnitudes across snapshots, then convert to dB
            let smoothed = tau * self.prev_magnitudes[k] + (1.0 - tau) * magnitude;
            self.prev_magnitudes[k] = smoothed;

            let db = 20.0 * smoothed.log10();
            let normalized = ((db - self.config.min_decibels) / db_range).clamp(0.0, 1.0);
            *byte = (normalized * 255.0) as u8;
        }
    }

    /// Refresh `out` with the current byte waveform snapshot
    ///
    /// One unsigned byte per sample, oldest first: amplitude in [-1, 1]
    /// mapped to [0, 255] with silence at 128. `out` must hold exactly
    /// [`Self::window_size`] bytes.
    pub fn write_waveform_bytes(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.config.window_size);

        let n = self.config.window_size;
        for (i, byte) in out.iter_mut().enumerate() {
            let sample = self.ring[(self.write_pos + i) % n];
            *byte = ((sample.clamp(-1.0, 1.0) + 1.0) * 128.0).min(255.0) as u8;
        }
    }
}
