//! Audio capture from microphone
//!
//! [`CaptureUnit`] owns the microphone for the whole process and records one
//! fixed-length window per call to [`CaptureUnit::start_capture`].

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle as ThreadHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::clip::{AudioClip, resample};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Device audio-session mode
///
/// Mobile platforms route audio differently while the microphone is open;
/// capture switches to `PlayAndRecord` and back when it finalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSessionMode {
    /// Output only
    #[default]
    Playback,
    /// Simultaneous record and playback
    PlayAndRecord,
}

/// Microphone permission as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    /// Not probed yet
    #[default]
    Unknown,
    /// Access granted
    Granted,
    /// Access refused; capture stays disabled until re-granted
    Denied,
}

/// A raw microphone backend
///
/// Implementations record mono samples at the rate they were built for.
pub trait AudioSource: Send {
    /// Check (and, where the platform supports it, request) microphone access
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when access is refused
    fn request_permission(&mut self) -> Result<()>;

    /// Begin recording into an internal buffer
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self) -> Result<()>;

    /// Stop recording and hand back everything captured
    ///
    /// # Errors
    ///
    /// Returns error if the captured audio cannot be converted
    fn stop(&mut self) -> Result<Vec<f32>>;

    /// Switch the platform audio-session mode
    fn set_session_mode(&mut self, _mode: AudioSessionMode) {}
}

/// Running cpal stream, parked on its own thread
struct StreamWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: ThreadHandle<()>,
}

/// Captures audio from the default input device
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// that is torn down by [`AudioSource::stop`].
pub struct MicrophoneSource {
    target_rate: u32,
    device_rate: u32,
    channels: u16,
    buffer: Arc<Mutex<Vec<f32>>>,
    worker: Option<StreamWorker>,
}

impl MicrophoneSource {
    /// Create a microphone source producing samples at `target_rate`
    #[must_use]
    pub fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            device_rate: target_rate,
            channels: 1,
            buffer: Arc::new(Mutex::new(Vec::new())),
            worker: None,
        }
    }

    /// Copy of samples captured so far, at the device rate
    #[must_use]
    pub fn peek_samples(&self) -> Vec<f32> {
        lock(&self.buffer).clone()
    }

    /// Rate the device is actually recording at
    #[must_use]
    pub const fn device_rate(&self) -> u32 {
        self.device_rate
    }

    fn pick_config(device: &cpal::Device, target_rate: u32) -> Result<cpal::StreamConfig> {
        let supported = device
            .supported_input_configs()
            .map_err(|e| classify_device_error(&e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(target_rate)
                    && c.max_sample_rate() >= SampleRate(target_rate)
            });

        if let Some(config) = supported {
            return Ok(config.with_sample_rate(SampleRate(target_rate)).config());
        }

        // Fallback: whatever the device prefers, downmixed and resampled later
        device
            .default_input_config()
            .map(|c| c.config())
            .map_err(|e| classify_device_error(&e.to_string()))
    }
}

impl AudioSource for MicrophoneSource {
    fn request_permission(&mut self) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;
        Self::pick_config(&device, self.target_rate).map(|_| ())
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::DeviceBusy);
        }

        lock(&self.buffer).clear();

        let buffer = Arc::clone(&self.buffer);
        let target_rate = self.target_rate;
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<cpal::StreamConfig>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let opened = (|| -> Result<(cpal::Stream, cpal::StreamConfig)> {
                    let host = cpal::default_host();
                    let device = host
                        .default_input_device()
                        .ok_or_else(|| Error::Audio("no input device".to_string()))?;
                    let config = Self::pick_config(&device, target_rate)?;

                    let stream = device
                        .build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                if let Ok(mut buf) = buffer.lock() {
                                    buf.extend_from_slice(data);
                                }
                            },
                            |err| {
                                tracing::error!(error = %err, "audio capture error");
                            },
                            None,
                        )
                        .map_err(|e| classify_device_error(&e.to_string()))?;

                    stream
                        .play()
                        .map_err(|e| classify_device_error(&e.to_string()))?;
                    Ok((stream, config))
                })();

                match opened {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok(config));
                        // Park until stop() or the owner goes away
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let config = ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited early".to_string()))??;

        self.device_rate = config.sample_rate.0;
        self.channels = config.channels;
        self.worker = Some(StreamWorker { stop_tx, thread });

        tracing::debug!(
            sample_rate = self.device_rate,
            channels = self.channels,
            "audio capture started"
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<f32>> {
        let Some(worker) = self.worker.take() else {
            return Ok(Vec::new());
        };

        let _ = worker.stop_tx.send(());
        if worker.thread.join().is_err() {
            tracing::warn!("capture thread panicked");
        }

        let raw = std::mem::take(&mut *lock(&self.buffer));
        let mono = downmix(&raw, self.channels);
        tracing::debug!(samples = mono.len(), "audio capture stopped");

        resample(&mono, self.device_rate, self.target_rate)
    }
}

/// Average interleaved channels into mono
#[allow(clippy::cast_precision_loss)]
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(usize::from(channels))
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Map a backend error message onto the engine taxonomy
fn classify_device_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        Error::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        Error::DeviceBusy
    } else {
        Error::Audio(message.to_string())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One in-progress recording window
struct ActiveCapture {
    id: u64,
    clip_tx: oneshot::Sender<Result<AudioClip>>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct CaptureState {
    active: Option<ActiveCapture>,
    permission: Permission,
    mode: AudioSessionMode,
    next_id: u64,
}

/// Receiving side of one capture window
///
/// Resolves with the encoded clip once the window elapses or
/// [`CaptureUnit::stop_capture`] finalizes early.
#[derive(Debug)]
pub struct CaptureHandle {
    id: u64,
    clip_rx: oneshot::Receiver<Result<AudioClip>>,
}

impl CaptureHandle {
    /// Identifier of this capture window
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the window to finalize and take ownership of the clip
    ///
    /// # Errors
    ///
    /// Returns error if encoding failed or the unit was torn down
    pub async fn finished(self) -> Result<AudioClip> {
        self.clip_rx
            .await
            .map_err(|_| Error::Audio("capture abandoned before finalizing".to_string()))?
    }
}

/// Single-flight owner of the microphone
pub struct CaptureUnit {
    source: Mutex<Box<dyn AudioSource>>,
    state: Mutex<CaptureState>,
    window: Duration,
    sample_rate: u32,
}

impl CaptureUnit {
    /// Create a capture unit around an audio source
    #[must_use]
    pub fn new(source: Box<dyn AudioSource>, window: Duration, sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            source: Mutex::new(source),
            state: Mutex::new(CaptureState::default()),
            window,
            sample_rate,
        })
    }

    /// Probe microphone access and remember the answer
    ///
    /// Also used to re-enable capture after the user grants access again.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if access is refused
    pub fn request_permission(&self) -> Result<()> {
        let mut state = lock(&self.state);
        let outcome = lock(&self.source).request_permission();
        state.permission = match &outcome {
            Ok(()) => Permission::Granted,
            Err(Error::PermissionDenied) => Permission::Denied,
            Err(_) => state.permission,
        };
        tracing::debug!(permission = ?state.permission, "microphone permission probed");
        outcome
    }

    /// Start recording one fixed window
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` without access, `DeviceBusy` if a window is
    /// already open, or an audio error if the device fails to start
    pub fn start_capture(self: &Arc<Self>) -> Result<CaptureHandle> {
        let mut state = lock(&self.state);

        if state.permission == Permission::Denied {
            return Err(Error::PermissionDenied);
        }
        if state.active.is_some() {
            tracing::warn!("start_capture while a capture is active");
            return Err(Error::DeviceBusy);
        }

        let mut source = lock(&self.source);

        if state.permission == Permission::Unknown {
            match source.request_permission() {
                Ok(()) => state.permission = Permission::Granted,
                Err(Error::PermissionDenied) => {
                    state.permission = Permission::Denied;
                    return Err(Error::PermissionDenied);
                }
                Err(e) => return Err(e),
            }
        }

        source.set_session_mode(AudioSessionMode::PlayAndRecord);
        state.mode = AudioSessionMode::PlayAndRecord;

        if let Err(e) = source.start() {
            source.set_session_mode(AudioSessionMode::Playback);
            state.mode = AudioSessionMode::Playback;
            if matches!(e, Error::PermissionDenied) {
                state.permission = Permission::Denied;
            }
            return Err(e);
        }
        drop(source);

        state.next_id += 1;
        let id = state.next_id;
        let (clip_tx, clip_rx) = oneshot::channel();

        let unit = Arc::downgrade(self);
        let window = self.window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(unit) = unit.upgrade() {
                unit.finalize(Some(id), false);
            }
        });

        state.active = Some(ActiveCapture {
            id,
            clip_tx,
            timer: Some(timer),
        });

        tracing::debug!(capture = id, window_ms = window.as_millis(), "capture window opened");
        Ok(CaptureHandle { id, clip_rx })
    }

    /// Finalize the active capture early
    ///
    /// Idempotent: returns `false` and does nothing when no capture is active.
    pub fn stop_capture(&self) -> bool {
        self.finalize(None, true)
    }

    /// Whether a capture window is currently open
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// Last observed microphone permission
    #[must_use]
    pub fn permission(&self) -> Permission {
        lock(&self.state).permission
    }

    /// Current audio-session mode
    #[must_use]
    pub fn session_mode(&self) -> AudioSessionMode {
        lock(&self.state).mode
    }

    /// Length of one recording window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    fn finalize(&self, id: Option<u64>, abort_timer: bool) -> bool {
        let mut state = lock(&self.state);

        let matches = state
            .active
            .as_ref()
            .is_some_and(|active| id.is_none_or(|id| active.id == id));
        if !matches {
            return false;
        }
        let Some(mut active) = state.active.take() else {
            return false;
        };

        if abort_timer {
            if let Some(timer) = active.timer.take() {
                timer.abort();
            }
        }

        let mut source = lock(&self.source);
        let samples = source.stop();
        source.set_session_mode(AudioSessionMode::Playback);
        state.mode = AudioSessionMode::Playback;
        drop(source);
        drop(state);

        let clip = samples.and_then(|s| AudioClip::from_samples(&s, self.sample_rate));
        if let Ok(clip) = &clip {
            tracing::debug!(
                capture = active.id,
                clip = %clip.handle(),
                duration_ms = clip.duration().as_millis(),
                "capture finalized"
            );
        }

        // Receiver may already be gone if the session was torn down
        let _ = active.clip_tx.send(clip);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeSource {
        deny: bool,
        starts: Arc<AtomicUsize>,
        running: bool,
        mode: Arc<Mutex<AudioSessionMode>>,
    }

    impl FakeSource {
        fn new(deny: bool) -> (Self, Arc<AtomicUsize>, Arc<Mutex<AudioSessionMode>>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let mode = Arc::new(Mutex::new(AudioSessionMode::Playback));
            (
                Self {
                    deny,
                    starts: Arc::clone(&starts),
                    running: false,
                    mode: Arc::clone(&mode),
                },
                starts,
                mode,
            )
        }
    }

    impl AudioSource for FakeSource {
        fn request_permission(&mut self) -> Result<()> {
            if self.deny {
                Err(Error::PermissionDenied)
            } else {
                Ok(())
            }
        }

        fn start(&mut self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<Vec<f32>> {
            self.running = false;
            Ok(vec![0.2; 1600])
        }

        fn set_session_mode(&mut self, mode: AudioSessionMode) {
            *self.mode.lock().unwrap() = mode;
        }
    }

    #[tokio::test]
    async fn test_window_elapses_into_clip() {
        let (source, _, mode) = FakeSource::new(false);
        let unit = CaptureUnit::new(Box::new(source), Duration::from_millis(20), SAMPLE_RATE);

        let handle = unit.start_capture().unwrap();
        assert!(unit.is_capturing());
        assert_eq!(*mode.lock().unwrap(), AudioSessionMode::PlayAndRecord);

        let clip = handle.finished().await.unwrap();
        assert_eq!(clip.duration(), Duration::from_millis(100));
        assert!(!unit.is_capturing());
        assert_eq!(*mode.lock().unwrap(), AudioSessionMode::Playback);
    }

    #[tokio::test]
    async fn test_second_start_is_busy() {
        let (source, starts, _) = FakeSource::new(false);
        let unit = CaptureUnit::new(Box::new(source), Duration::from_secs(5), SAMPLE_RATE);

        let _handle = unit.start_capture().unwrap();
        assert!(matches!(unit.start_capture(), Err(Error::DeviceBusy)));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (source, _, _) = FakeSource::new(false);
        let unit = CaptureUnit::new(Box::new(source), Duration::from_secs(5), SAMPLE_RATE);

        assert!(!unit.stop_capture());

        let handle = unit.start_capture().unwrap();
        assert!(unit.stop_capture());
        assert!(!unit.stop_capture());
        assert!(handle.finished().await.is_ok());
    }

    #[tokio::test]
    async fn test_denied_permission_sticks() {
        let (source, starts, _) = FakeSource::new(true);
        let unit = CaptureUnit::new(Box::new(source), Duration::from_millis(20), SAMPLE_RATE);

        assert!(matches!(unit.start_capture(), Err(Error::PermissionDenied)));
        assert_eq!(unit.permission(), Permission::Denied);
        assert!(matches!(unit.start_capture(), Err(Error::PermissionDenied)));
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classify_device_error() {
        assert!(matches!(
            classify_device_error("Permission denied (os error 13)"),
            Error::PermissionDenied
        ));
        assert!(matches!(
            classify_device_error("device or resource busy"),
            Error::DeviceBusy
        ));
        assert!(matches!(classify_device_error("boom"), Error::Audio(_)));
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[0.5, 0.0, 1.0, 1.0], 2), vec![0.25, 1.0]);
    }
}
