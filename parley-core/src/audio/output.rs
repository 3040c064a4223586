//! `DeviceSink`: plays speech on a cpal output device.
//!
//! A dedicated worker thread owns the `!Send` stream. `play` only hands the
//! buffer to it over a channel; the worker opens the device on the first
//! buffer, resamples to the device rate and fills the shared `Voice` slot.
//! The output callback drains the slot and fires the completion when it
//! runs dry. `release` closes the channel and the worker drops the stream.
//!
//! The callback never blocks. If `play`/`stop` hold the slot at that moment
//! it writes one period of silence instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::codec::PlayableBuffer;
use super::device::{select_device, Direction};
use super::resample::resample_offline;
use super::sink::AudioSink;
use crate::error::{ParleyError, Result};

/// The buffer currently being rendered.
struct Voice {
    samples: Vec<f32>,
    pos: usize,
    done: Option<oneshot::Sender<()>>,
}

type VoiceSlot = Arc<Mutex<Option<Voice>>>;

struct PlayRequest {
    buffer: PlayableBuffer,
    /// `stops` at the time of the request; stale once a `stop` bumps it.
    generation: u64,
    done: oneshot::Sender<()>,
}

/// State shared by the sink and its worker.
#[derive(Clone)]
struct Shared {
    slot: VoiceSlot,
    stops: Arc<AtomicU64>,
}

pub struct DeviceSink {
    preferred_device: Option<String>,
    shared: Shared,
    /// Open while a worker runs; dropping it lets the worker exit.
    requests: Option<Sender<PlayRequest>>,
}

impl DeviceSink {
    /// Create a sink for the named output device (or the default one).
    /// Nothing is opened until the first buffer is played.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            shared: Shared {
                slot: Arc::new(Mutex::new(None)),
                stops: Arc::new(AtomicU64::new(0)),
            },
            requests: None,
        }
    }

    fn worker(&mut self) -> Result<&Sender<PlayRequest>> {
        if self.requests.is_none() {
            let (tx, rx) = crossbeam_channel::unbounded();
            let preferred = self.preferred_device.clone();
            let shared = self.shared.clone();
            // Detached: the worker exits once `requests` is dropped.
            std::thread::Builder::new()
                .name("parley-output".into())
                .spawn(move || run_worker(preferred, shared, rx))?;
            self.requests = Some(tx);
        }
        self.requests
            .as_ref()
            .ok_or_else(|| ParleyError::AudioStream("output worker missing".into()))
    }
}

impl AudioSink for DeviceSink {
    fn play(&mut self, buffer: PlayableBuffer, done: oneshot::Sender<()>) -> Result<()> {
        let generation = self.shared.stops.load(Ordering::Acquire);
        let request = PlayRequest {
            buffer,
            generation,
            done,
        };
        if self.worker()?.send(request).is_err() {
            self.requests = None;
            return Err(ParleyError::AudioStream("output worker stopped".into()));
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut slot = self.shared.slot.lock();
        self.shared.stops.fetch_add(1, Ordering::AcqRel);
        // Dropping the voice drops its completion sender unfired.
        slot.take();
    }

    fn release(&mut self) {
        self.stop();
        if self.requests.take().is_some() {
            debug!("output worker asked to release the device");
        }
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker(preferred: Option<String>, shared: Shared, requests: Receiver<PlayRequest>) {
    let mut stream: Option<(Stream, u32)> = None;

    for PlayRequest {
        buffer,
        generation,
        done,
    } in requests.iter()
    {
        let is_stale = || shared.stops.load(Ordering::Acquire) != generation;
        if is_stale() {
            continue;
        }

        if stream.is_none() {
            match open_stream(preferred.as_deref(), Arc::clone(&shared.slot)) {
                Ok(opened) => stream = Some(opened),
                Err(e) => {
                    // The dropped completion ends this buffer; the next one retries.
                    warn!("output device unavailable: {e}");
                    continue;
                }
            }
        }
        let Some((_, device_rate)) = &stream else {
            continue;
        };

        let samples = if buffer.sample_rate == *device_rate {
            buffer.samples
        } else {
            match resample_offline(&buffer.samples, buffer.sample_rate, *device_rate) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("dropping playback buffer: {e}");
                    continue;
                }
            }
        };

        let mut slot = shared.slot.lock();
        if is_stale() {
            continue;
        }
        *slot = Some(Voice {
            samples,
            pos: 0,
            done: Some(done),
        });
    }

    if stream.take().is_some() {
        info!("output device released");
    }
}

fn open_stream(preferred: Option<&str>, slot: VoiceSlot) -> Result<(Stream, u32)> {
    let device = select_device(Direction::Output, preferred)?;
    let supported = device
        .default_output_config()
        .map_err(|e| ParleyError::AudioDevice(e.to_string()))?;
    let config: StreamConfig = supported.config();

    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "opening output device"
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build::<f32>(&device, &config, slot),
        SampleFormat::I16 => build::<i16>(&device, &config, slot),
        SampleFormat::U16 => build::<u16>(&device, &config, slot),
        fmt => Err(ParleyError::AudioStream(format!(
            "unsupported sample format: {fmt:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| ParleyError::AudioStream(e.to_string()))?;

    Ok((stream, config.sample_rate.0))
}

fn build<T>(device: &cpal::Device, config: &StreamConfig, slot: VoiceSlot) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let Some(mut voice) = slot.try_lock() else {
                    data.fill(T::EQUILIBRIUM);
                    return;
                };
                render(voice.as_mut(), data, channels);
                if voice.as_ref().is_some_and(|v| v.pos >= v.samples.len()) {
                    if let Some(done) = voice.take().and_then(|mut v| v.done.take()) {
                        let _ = done.send(());
                    }
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| ParleyError::AudioStream(e.to_string()))
}

/// Fill one period: each mono sample is duplicated across all channels,
/// silence once the voice runs out (or when there is none).
fn render<T>(mut voice: Option<&mut Voice>, data: &mut [T], channels: usize)
where
    T: Sample + FromSample<f32>,
{
    for frame in data.chunks_mut(channels) {
        let value = match voice.as_deref_mut() {
            Some(v) if v.pos < v.samples.len() => {
                v.pos += 1;
                v.samples[v.pos - 1]
            }
            _ => 0.0,
        };
        frame.fill(T::from_sample(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_duplicates_across_channels_then_pads() {
        let mut voice = Voice {
            samples: vec![0.5, -0.5],
            pos: 0,
            done: None,
        };
        let mut out = [9.0f32; 6];
        render(Some(&mut voice), &mut out, 2);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
        assert_eq!(voice.pos, 2);
    }

    #[test]
    fn render_without_voice_is_silent() {
        let mut out = [1i16; 4];
        render::<i16>(None, &mut out, 1);
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn stop_drops_completion_without_opening_device() {
        let mut sink = DeviceSink::new(None);
        let (tx, mut rx) = oneshot::channel();
        *sink.shared.slot.lock() = Some(Voice {
            samples: vec![0.0; 8],
            pos: 0,
            done: Some(tx),
        });
        sink.stop();
        assert!(sink.shared.slot.lock().is_none());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(sink.requests.is_none(), "stop must not start the worker");
    }

    #[tokio::test]
    async fn play_hands_off_without_waiting_for_the_device() {
        let mut sink = DeviceSink::new(Some("no such device".into()));
        let (tx, rx) = oneshot::channel();

        let started = std::time::Instant::now();
        sink.play(PlayableBuffer::new(vec![0.0; 2400], 24_000), tx)
            .unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(200));

        // Released before the worker got to it: the buffer ends unplayed.
        sink.release();
        assert!(sink.requests.is_none());
        let ended = tokio::time::timeout(std::time::Duration::from_secs(5), rx).await;
        assert!(ended.is_ok(), "completion never resolved");
    }
}
