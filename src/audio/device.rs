//! cpal input device access
//!
//! Device enumeration and the default stream source used by
//! `AudioCapture`. The cpal stream handle is not `Send`, so the stream
//! lives on a dedicated capture thread for the life of the session and is
//! stopped through an atomic flag when the owning handle drops.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::audio::analyzer::SharedAnalyzer;
use crate::audio::capture::{StreamHandle, StreamInfo, StreamSource, StreamStart};
use crate::audio::CaptureError;

/// Information about an available audio input device
#[derive(Debug)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub supported_sample_rates: Vec<u32>,
    pub supported_formats: Vec<SampleFormat>,
}

/// List all available audio input devices
pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
    let default_device = host.default_input_device();

    let mut device_infos = Vec::new();

    for device in devices {
        let name = device.name().unwrap_or("Unknown Device".to_string());
        let is_default = default_device
            .as_ref()
            .map(|d| d.name().unwrap_or_default() == name)
            .unwrap_or(false);

        let mut supported_sample_rates = Vec::new();
        let mut supported_formats = Vec::new();
        let ranges = device
            .supported_input_configs()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        for range in ranges {
            supported_sample_rates.push(range.max_sample_rate().0);
            supported_formats.push(range.sample_format());
        }

        device_infos.push(AudioDeviceInfo {
            name,
            is_default,
            supported_sample_rates,
            supported_formats,
        });
    }

    Ok(device_infos)
}

/// Find the supported input configuration closest to the target sample rate
fn optimal_config(device: &Device, target_sample_rate: u32) -> Result<StreamConfig, CaptureError> {
    let ranges = device
        .supported_input_configs()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let mut best = None;
    let mut best_diff = u32::MAX;

    for range in ranges {
        let clamped =
            target_sample_rate.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
        let diff = clamped.abs_diff(target_sample_rate);
        if diff < best_diff {
            best_diff = diff;
            best = Some(range);
        }
    }

    let range = best.ok_or_else(|| {
        CaptureError::DeviceUnavailable("no supported input configuration found".to_string())
    })?;

    let rate = target_sample_rate.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
    Ok(range.with_sample_rate(cpal::SampleRate(rate)).into())
}

/// Stream source backed by the default cpal host
///
/// Each `start` spawns a capture thread that owns the stream, feeds the
/// shared analyzer from the input callback, and reports grant or denial
/// over the ready channel.
pub struct CpalSource {
    target_sample_rate: u32,
}

impl Default for CpalSource {
    fn default() -> Self {
        Self {
            target_sample_rate: 48_000,
        }
    }
}

impl CpalSource {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }
}

impl StreamSource for CpalSource {
    fn start(&mut self, sink: SharedAnalyzer) -> StreamStart {
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let target_sample_rate = self.target_sample_rate;

        // If the spawn itself fails, ready_tx is dropped with the closure
        // and the caller observes a closed channel
        let join = std::thread::Builder::new()
            .name("audioscope-capture".to_string())
            .spawn(move || capture_thread(target_sample_rate, sink, thread_stop, ready_tx))
            .ok();

        StreamStart {
            handle: Box::new(CpalStreamHandle { stop, join }),
            ready: ready_rx,
        }
    }
}

struct CpalStreamHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle for CpalStreamHandle {}

impl Drop for CpalStreamHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Body of the capture thread: acquire the stream, acknowledge, then hold
/// it alive until asked to stop
fn capture_thread(
    target_sample_rate: u32,
    sink: SharedAnalyzer,
    stop: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<Result<StreamInfo, CaptureError>>,
) {
    let (stream, info) = match open_stream(target_sample_rate, sink) {
        Ok(acquired) => acquired,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    if ready_tx.send(Ok(info)).is_err() {
        // The caller abandoned the acquisition; release immediately
        return;
    }

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    tracing::debug!("input stream stopped");
}

fn open_stream(
    target_sample_rate: u32,
    sink: SharedAnalyzer,
) -> Result<(cpal::Stream, StreamInfo), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or_else(|| {
        CaptureError::DeviceUnavailable("no default input device found".to_string())
    })?;
    let device_name = device.name().unwrap_or("Unknown Device".to_string());

    let config = optimal_config(&device, target_sample_rate)?;
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut analyzer) = sink.lock() {
                    if channels <= 1 {
                        analyzer.push_samples(data);
                    } else {
                        // Mix interleaved frames down to mono
                        for frame in data.chunks(channels) {
                            let sum: f32 = frame.iter().sum();
                            analyzer.push_samples(&[sum / channels as f32]);
                        }
                    }
                }
            },
            |err| {
                tracing::error!("input stream error: {err}");
            },
            None,
        )
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    tracing::debug!(device = %device_name, sample_rate, "input stream started");

    Ok((
        stream,
        StreamInfo {
            device_name,
            sample_rate,
        },
    ))
}
