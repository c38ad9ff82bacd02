//! Microphone capture session facade
//!
//! [`AudioCapture`] manages the lifecycle of one microphone-backed
//! analysis session: device acquisition, the analysis pipeline, and
//! pull-based snapshot access to the derived sample data.
//!
//! A session moves through three states: it is constructed inert
//! (recording only the requested window size), becomes active after
//! [`AudioCapture::initialize`] acquires the input stream, and is closed
//! for good by [`AudioCapture::close`]. Snapshot buffers exist only while
//! the session is active, so reading data from a released device is
//! unrepresentable.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::audio::analyzer::{Analyzer, SharedAnalyzer, DEFAULT_WINDOW_SIZE};
use crate::audio::device::CpalSource;
use crate::audio::CaptureError;

/// Details reported by a stream source once capture is running
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub device_name: String,
    pub sample_rate: u32,
}

/// Owning handle to a live input stream
///
/// Dropping the handle stops the stream and releases the device. This is
/// the only way a stream ends: sources hand ownership to the session and
/// keep nothing back.
pub trait StreamHandle {}

/// An in-flight stream acquisition
///
/// `ready` resolves once the platform grants or denies access. The handle
/// is surrendered immediately so that abandoning the acquisition (dropping
/// both fields) releases anything already acquired.
pub struct StreamStart {
    pub handle: Box<dyn StreamHandle>,
    pub ready: oneshot::Receiver<Result<StreamInfo, CaptureError>>,
}

/// Provider of live input streams feeding a shared analyzer
pub trait StreamSource {
    /// Begin acquiring an input stream that pushes samples into `sink`
    fn start(&mut self, sink: SharedAnalyzer) -> StreamStart;
}

struct ActiveSession {
    info: StreamInfo,
    analyzer: SharedAnalyzer,
    frequency_buffer: Vec<u8>,
    waveform_buffer: Vec<u8>,
    // Held for its Drop: releases the stream and device
    _stream: Box<dyn StreamHandle>,
}

enum State {
    Uninitialized,
    Active(ActiveSession),
    Closed,
}

/// One microphone-backed analysis session
///
/// Construction is inert; call [`Self::initialize`] to acquire the device
/// and start the pipeline. The owner must call [`Self::close`] on every
/// exit path once initialization has succeeded. Dropping the session also
/// releases the device, but `close` is the documented contract.
pub struct AudioCapture {
    window_size: usize,
    source: Box<dyn StreamSource>,
    state: State,
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl AudioCapture {
    /// Create a session backed by the default cpal input source
    ///
    /// Only records the window size; no device access happens until
    /// [`Self::initialize`].
    pub fn new(window_size: usize) -> Self {
        Self::with_source(window_size, Box::new(CpalSource::default()))
    }

    /// Create a session with a custom stream source
    pub fn with_source(window_size: usize, source: Box<dyn StreamSource>) -> Self {
        Self {
            window_size,
            source,
            state: State::Uninitialized,
        }
    }

    /// Analysis window size this session was configured with
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Whether the session currently owns a live stream
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    /// Stream details, available while the session is active
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        match &self.state {
            State::Active(session) => Some(&session.info),
            _ => None,
        }
    }

    /// Acquire the input device, start the analysis pipeline, and allocate
    /// the snapshot buffers
    ///
    /// Suspends until the platform grants or denies device access; this is
    /// the session's only suspension point. A denied or abandoned attempt
    /// leaves the session uninitialized with nothing acquired, so it may
    /// be retried. Calling this on an active session is an error rather
    /// than a silent reacquire, and a closed session stays closed.
    pub async fn initialize(&mut self) -> Result<(), CaptureError> {
        match self.state {
            State::Uninitialized => {}
            State::Active(_) => return Err(CaptureError::AlreadyActive),
            State::Closed => return Err(CaptureError::Closed),
        }

        let analyzer = Analyzer::new(self.window_size)?;
        let bin_count = analyzer.bin_count();
        let shared: SharedAnalyzer = Arc::new(Mutex::new(analyzer));

        let StreamStart { handle, ready } = self.source.start(shared.clone());
        let info = match ready.await {
            Ok(Ok(info)) => info,
            // On denial the handle is dropped here, releasing anything
            // the source had already acquired
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(CaptureError::DeviceUnavailable(
                    "input stream ended before acknowledging".to_string(),
                ));
            }
        };

        tracing::info!(
            device = %info.device_name,
            sample_rate = info.sample_rate,
            window_size = self.window_size,
            "capture session active"
        );

        self.state = State::Active(ActiveSession {
            info,
            analyzer: shared,
            frequency_buffer: vec![0; bin_count],
            waveform_buffer: vec![0; self.window_size],
            _stream: handle,
        });
        Ok(())
    }

    /// Current frequency-magnitude snapshot, one unsigned byte per bin
    ///
    /// Returns `None` unless the session is active; otherwise the
    /// session's buffer of `window_size / 2` bytes, refreshed in place
    /// from the live pipeline on every call. The slice stays valid until
    /// the next accessor call on this session.
    pub fn frequency_data(&mut self) -> Option<&[u8]> {
        let State::Active(session) = &mut self.state else {
            return None;
        };
        // A poisoned lock degrades to the previous snapshot
        if let Ok(mut analyzer) = session.analyzer.lock() {
            analyzer.write_frequency_bytes(&mut session.frequency_buffer);
        }
        Some(&session.frequency_buffer)
    }

    /// Current time-domain snapshot, one unsigned byte per sample
    ///
    /// Returns `None` unless the session is active; otherwise the
    /// session's buffer of `window_size` bytes, refreshed in place from
    /// the live pipeline on every call. The slice stays valid until the
    /// next accessor call on this session.
    pub fn waveform_data(&mut self) -> Option<&[u8]> {
        let State::Active(session) = &mut self.state else {
            return None;
        };
        if let Ok(analyzer) = session.analyzer.lock() {
            analyzer.write_waveform_bytes(&mut session.waveform_buffer);
        }
        Some(&session.waveform_buffer)
    }

    /// Release the stream, device, and pipeline
    ///
    /// Transitions an active session to closed; closing a session that is
    /// not active is a no-op. Safe to call any number of times, never
    /// fails.
    pub fn close(&mut self) {
        if self.is_active() {
            tracing::info!("closing capture session");
            // Replacing the state drops the session: the stream handle
            // stops the device, then the pipeline and buffers go with it
            self.state = State::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SharedAnalyzer;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeHandle {
        released: Arc<AtomicBool>,
    }

    impl StreamHandle for FakeHandle {}

    impl Drop for FakeHandle {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Stream source that denies the first `denials` attempts and then
    /// grants, feeding a canned sample block into the analyzer on grant.
    struct FakeSource {
        denials: usize,
        feed: Vec<f32>,
        starts: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl FakeSource {
        fn granting(feed: Vec<f32>) -> Self {
            Self {
                denials: 0,
                feed,
                starts: Arc::new(AtomicUsize::new(0)),
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        fn denying_first(denials: usize) -> Self {
            Self {
                denials,
                ..Self::granting(Vec::new())
            }
        }
    }

    impl StreamSource for FakeSource {
        fn start(&mut self, sink: SharedAnalyzer) -> StreamStart {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.released.store(false, Ordering::SeqCst);

            let (tx, rx) = oneshot::channel();
            if self.denials > 0 {
                self.denials -= 1;
                let _ = tx.send(Err(CaptureError::DeviceUnavailable(
                    "access denied".to_string(),
                )));
            } else {
                if let Ok(mut analyzer) = sink.lock() {
                    analyzer.push_samples(&self.feed);
                }
                let _ = tx.send(Ok(StreamInfo {
                    device_name: "fake input".to_string(),
                    sample_rate: 48_000,
                }));
            }

            StreamStart {
                handle: Box::new(FakeHandle {
                    released: self.released.clone(),
                }),
                ready: rx,
            }
        }
    }

    fn fake_capture(window_size: usize, source: FakeSource) -> AudioCapture {
        AudioCapture::with_source(window_size, Box::new(source))
    }

    #[test]
    fn test_accessors_return_none_before_initialize() {
        let mut capture = fake_capture(2048, FakeSource::granting(Vec::new()));
        assert!(capture.frequency_data().is_none());
        assert!(capture.waveform_data().is_none());
        assert!(!capture.is_active());
        assert!(capture.stream_info().is_none());
    }

    #[tokio::test]
    async fn test_initialize_allocates_snapshot_buffers() {
        let mut capture = fake_capture(2048, FakeSource::granting(Vec::new()));
        capture.initialize().await.unwrap();

        assert!(capture.is_active());
        assert_eq!(capture.frequency_data().unwrap().len(), 1024);
        assert_eq!(capture.waveform_data().unwrap().len(), 2048);

        // Lengths hold on every subsequent call
        assert_eq!(capture.frequency_data().unwrap().len(), 1024);
        assert_eq!(capture.waveform_data().unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_default_window_size_is_2048() {
        let capture = AudioCapture::default();
        assert_eq!(capture.window_size(), 2048);

        let mut capture = fake_capture(DEFAULT_WINDOW_SIZE, FakeSource::granting(Vec::new()));
        capture.initialize().await.unwrap();
        assert_eq!(capture.frequency_data().unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_waveform_reflects_fed_samples() {
        let mut capture = fake_capture(64, FakeSource::granting(vec![0.5; 64]));
        capture.initialize().await.unwrap();

        let waveform = capture.waveform_data().unwrap();
        assert!(waveform.iter().all(|&b| b == 192), "0.5 maps to byte 192");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let source = FakeSource::granting(Vec::new());
        let released = source.released.clone();

        let mut capture = fake_capture(2048, source);
        capture.initialize().await.unwrap();
        assert!(!released.load(Ordering::SeqCst));

        capture.close();
        assert!(!capture.is_active());
        assert!(released.load(Ordering::SeqCst), "device released on close");

        capture.close();
        assert!(!capture.is_active());
    }

    #[tokio::test]
    async fn test_accessors_return_none_after_close() {
        let mut capture = fake_capture(2048, FakeSource::granting(Vec::new()));
        capture.initialize().await.unwrap();
        capture.close();

        assert!(capture.frequency_data().is_none());
        assert!(capture.waveform_data().is_none());
        assert!(capture.stream_info().is_none());
    }

    #[tokio::test]
    async fn test_denied_initialize_leaves_session_retriable() {
        let source = FakeSource::denying_first(1);
        let released = source.released.clone();

        let mut capture = fake_capture(2048, source);
        let err = capture.initialize().await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));

        // Nothing acquired, nothing readable
        assert!(!capture.is_active());
        assert!(released.load(Ordering::SeqCst), "denied handle released");
        assert!(capture.frequency_data().is_none());

        // A later retry on the same instance is permitted
        capture.initialize().await.unwrap();
        assert!(capture.is_active());
    }

    #[tokio::test]
    async fn test_reinitialize_while_active_is_rejected() {
        let mut capture = fake_capture(2048, FakeSource::granting(Vec::new()));
        capture.initialize().await.unwrap();

        let err = capture.initialize().await.unwrap_err();
        assert!(matches!(err, CaptureError::AlreadyActive));

        // The running session is untouched
        assert!(capture.is_active());
        assert_eq!(capture.frequency_data().unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_initialize_after_close_is_rejected() {
        let source = FakeSource::granting(Vec::new());
        let starts = source.starts.clone();

        let mut capture = fake_capture(2048, source);
        capture.initialize().await.unwrap();
        capture.close();

        let err = capture.initialize().await.unwrap_err();
        assert!(matches!(err, CaptureError::Closed));
        assert!(!capture.is_active());
        assert_eq!(starts.load(Ordering::SeqCst), 1, "no second acquisition");
    }

    #[tokio::test]
    async fn test_close_before_initialize_is_noop() {
        let mut capture = fake_capture(2048, FakeSource::granting(Vec::new()));
        capture.close();

        // Still uninitialized, so a first initialize works normally
        capture.initialize().await.unwrap();
        assert!(capture.is_active());
    }

    #[tokio::test]
    async fn test_invalid_window_size_fails_before_device_access() {
        let source = FakeSource::granting(Vec::new());
        let starts = source.starts.clone();

        let mut capture = fake_capture(1000, source);
        let err = capture.initialize().await.unwrap_err();
        assert!(matches!(err, CaptureError::Pipeline(_)));
        assert!(!capture.is_active());
        assert_eq!(starts.load(Ordering::SeqCst), 0, "device never touched");
    }
}
