//! Microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block or do I/O, so it only downmixes into a reused scratch
//! buffer and pushes into the lock-free SPSC ring producer.
//!
//! `cpal::Stream` is `!Send` on most platforms, so the stream is created,
//! held and dropped on one dedicated thread. `MicCapture` is the `Send`
//! handle to that thread: dropping the shutdown sender releases the device.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::{
    buffering::AudioProducer,
    error::{ParleyError, Result},
};

/// Handle to a running microphone stream.
///
/// Samples arrive in the ring as mono f32 at `sample_rate`.
pub struct MicCapture {
    running: Arc<AtomicBool>,
    shutdown: Option<crossbeam_channel::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    /// Actual capture rate reported by the device (Hz).
    pub sample_rate: u32,
    pub device_name: String,
}

impl MicCapture {
    /// Open an input device (preferred name, default, or first available)
    /// and start pushing mono samples into `producer`.
    ///
    /// Blocks until the device is open.
    ///
    /// # Errors
    /// `NoDefaultInputDevice`, `AudioDevice` or `AudioStream` when the device
    /// cannot be opened; `Io` if the capture thread cannot be spawned.
    pub fn start(producer: AudioProducer, preferred_device: Option<&str>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(u32, String)>>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let flag = Arc::clone(&running);
        let preferred = preferred_device.map(str::to_owned);
        let thread = std::thread::Builder::new()
            .name("parley-capture".into())
            .spawn(move || {
                // ── Open device (must happen on THIS thread: cpal::Stream is !Send) ──
                let stream = match backend::open(producer, flag, preferred.as_deref()) {
                    Ok((stream, rate, name)) => {
                        let _ = ready_tx.send(Ok((rate, name)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the handle drops its sender.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("input device released");
            })?;

        match ready_rx.recv() {
            Ok(Ok((sample_rate, device_name))) => {
                info!(device = device_name.as_str(), sample_rate, "microphone capture started");
                Ok(Self {
                    running,
                    shutdown: Some(shutdown_tx),
                    thread: Some(thread),
                    sample_rate,
                    device_name,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(ParleyError::Other(anyhow::anyhow!(
                "capture thread exited before opening the device"
            ))),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop capturing and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            info!("microphone capture stopped");
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "audio-cpal")]
mod backend {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, StreamTrait},
        FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use crate::{
        audio::device::{select_device, Direction},
        buffering::{AudioProducer, Producer},
        error::{ParleyError, Result},
    };

    pub fn open(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred: Option<&str>,
    ) -> Result<(Stream, u32, String)> {
        let device = select_device(Direction::Input, preferred)?;
        let name = device.name().unwrap_or_default();

        let supported = device
            .default_input_config()
            .map_err(|e| ParleyError::AudioDevice(e.to_string()))?;
        let config: StreamConfig = supported.config();
        info!(
            device = name.as_str(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?supported.sample_format(),
            "opening input device"
        );

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build::<f32>(&device, &config, producer, running),
            SampleFormat::I16 => build::<i16>(&device, &config, producer, running),
            SampleFormat::U16 => build::<u16>(&device, &config, producer, running),
            SampleFormat::U8 => build::<u8>(&device, &config, producer, running),
            fmt => Err(ParleyError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            ))),
        }?;

        stream
            .play()
            .map_err(|e| ParleyError::AudioStream(e.to_string()))?;

        Ok((stream, config.sample_rate.0, name))
    }

    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = usize::from(config.channels.max(1));
        // Reused across callbacks; grows only until the largest period is seen.
        let mut mono: Vec<f32> = Vec::with_capacity(4096);

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    mono.clear();
                    mono.extend(data.chunks_exact(channels).map(|frame| {
                        frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / channels as f32
                    }));
                    let written = producer.push_slice(&mono);
                    if written < mono.len() {
                        warn!(dropped = mono.len() - written, "capture ring full");
                    }
                },
                |err| error!("input stream error: {err}"),
                None,
            )
            .map_err(|e| ParleyError::AudioStream(e.to_string()))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
mod backend {
    use std::sync::{atomic::AtomicBool, Arc};

    use crate::{
        buffering::AudioProducer,
        error::{ParleyError, Result},
    };

    pub struct Stream;

    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred: Option<&str>,
    ) -> Result<(Stream, u32, String)> {
        Err(ParleyError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
