//! Output drivers: the periodic frame sink the playback engine renders into
//!
//! An [`OutputDriver`] owns the cadence. It calls the render callback with a
//! buffer to fill, one device period at a time, from its own thread. The
//! engine never knows which driver it runs under, so the same render path is
//! used by the cpal device, the clocked null sink and the synthetic puller in
//! tests.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::device::get_output_device;
use crate::audio::format::FormatDescriptor;
use crate::error::AudioError;

/// Callback that fills one period of interleaved `f32` samples
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// A periodic sink that pulls audio from a render callback
pub trait OutputDriver: Send {
    /// Begin invoking `render` at the sink's cadence for `format`.
    ///
    /// Starting an active driver restarts it with the new callback.
    fn start(&mut self, format: &FormatDescriptor, render: RenderCallback) -> Result<(), AudioError>;

    /// Stop invoking the callback.
    ///
    /// Returns only once no callback can still be running.
    fn stop(&mut self);

    /// Check if the driver is currently pulling audio
    fn is_active(&self) -> bool;

    /// Take the oldest fault the sink reported since it was started
    fn take_error(&mut self) -> Option<AudioError> {
        None
    }
}

/// Worker thread plus the channel that tells it to exit
struct OutputThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl OutputThread {
    fn shutdown(self) {
        // Dropping the sender wakes the worker
        drop(self.stop_tx);
        let _ = self.handle.join();
    }
}

/// Plays through a cpal output device
pub struct CpalOutput {
    device_name: Option<String>,
    worker: Option<OutputThread>,
    error_rx: Option<Receiver<AudioError>>,
}

impl CpalOutput {
    /// Create a driver for the named device, or the default output device
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
            error_rx: None,
        }
    }
}

impl OutputDriver for CpalOutput {
    fn start(&mut self, format: &FormatDescriptor, mut render: RenderCallback) -> Result<(), AudioError> {
        self.stop();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let device_name = self.device_name.clone();
        let config = StreamConfig {
            channels: format.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        // The stream is not Send on every platform, so it lives and dies on
        // this thread.
        let handle = thread::Builder::new()
            .name("playback-output".into())
            .spawn(move || {
                let device = match get_output_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until stopped; the stream is dropped on return, which
                // ends the device callbacks.
                let _ = stop_rx.recv();
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("output thread exited".into())));

        match ready {
            Ok(()) => {
                tracing::info!(
                    "Output stream started: {} Hz, {} channels",
                    format.sample_rate(),
                    format.channels()
                );
                self.worker = Some(OutputThread { stop_tx, handle });
                self.error_rx = Some(error_rx);
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
            tracing::debug!("Output stream stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn take_error(&mut self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Discards audio at the real-time cadence of the format.
///
/// Used on machines without an output device; playback progresses exactly
/// as it would on hardware.
pub struct NullOutput {
    period_frames: usize,
    worker: Option<OutputThread>,
}

impl NullOutput {
    pub fn new(period_frames: usize) -> Self {
        Self {
            period_frames: period_frames.max(1),
            worker: None,
        }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new(512)
    }
}

impl OutputDriver for NullOutput {
    fn start(&mut self, format: &FormatDescriptor, mut render: RenderCallback) -> Result<(), AudioError> {
        self.stop();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let mut period_buffer = vec![0.0f32; self.period_frames * format.channels() as usize];
        let period = Duration::from_secs_f64(self.period_frames as f64 / format.sample_rate() as f64);

        let handle = thread::Builder::new()
            .name("null-output".into())
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    match stop_rx.recv_deadline(deadline) {
                        Err(RecvTimeoutError::Timeout) => {
                            render(&mut period_buffer);
                            deadline += period;
                        }
                        _ => break,
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.worker = Some(OutputThread { stop_tx, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct PullState {
    render: Option<RenderCallback>,
    format: Option<FormatDescriptor>,
    starts: usize,
    error: Option<AudioError>,
}

/// Driver whose periods are pulled by hand.
///
/// Clones share state, so a test can keep one handle and give the other to
/// the code under test.
#[derive(Clone, Default)]
pub struct PullOutput {
    state: Arc<Mutex<PullState>>,
}

impl PullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one period of `frames` frames and return the rendered samples.
    ///
    /// Returns an empty vector when the driver is not started.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut state = self.state.lock();
        let Some(channels) = state.format.map(|f| f.channels() as usize) else {
            return Vec::new();
        };
        let mut out = vec![0.0f32; frames * channels];
        if let Some(render) = state.render.as_mut() {
            render(&mut out);
        }
        out
    }

    /// Format the driver was last started with
    pub fn format(&self) -> Option<FormatDescriptor> {
        self.state.lock().format
    }

    /// How many times the driver has been started
    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    /// Report a fault as a device would from its error callback
    pub fn report_error(&self, error: AudioError) {
        self.state.lock().error = Some(error);
    }
}

impl OutputDriver for PullOutput {
    fn start(&mut self, format: &FormatDescriptor, render: RenderCallback) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        state.render = Some(render);
        state.format = Some(*format);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.render = None;
        state.format = None;
    }

    fn is_active(&self) -> bool {
        self.state.lock().render.is_some()
    }

    fn take_error(&mut self) -> Option<AudioError> {
        self.state.lock().error.take()
    }
}
