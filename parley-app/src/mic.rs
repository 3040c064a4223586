//! Microphone → session forwarding.
//!
//! The capture callback fills the ring; a Tokio task drains it every
//! `FORWARD_INTERVAL` and hands each batch to `LiveSession::send_audio`,
//! which resamples to the wire rate.

use std::sync::Arc;
use std::time::Duration;

use parley_core::buffering::{create_audio_ring, Consumer};
use parley_core::{AudioChunk, ConnectionState, LiveSession, MicCapture, ParleyError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const FORWARD_INTERVAL: Duration = Duration::from_millis(100);

pub struct MicStream {
    capture: MicCapture,
    forwarder: JoinHandle<()>,
}

impl MicStream {
    pub async fn start(
        session: Arc<LiveSession>,
        preferred_device: Option<String>,
    ) -> anyhow::Result<Self> {
        let (producer, mut consumer) = create_audio_ring();
        // Opening the device blocks until the capture thread reports back.
        let capture = tokio::task::spawn_blocking(move || {
            MicCapture::start(producer, preferred_device.as_deref())
        })
        .await??;

        let rate = capture.sample_rate;
        let forwarder = tokio::spawn(async move {
            let mut tick = tokio::time::interval(FORWARD_INTERVAL);
            // One second of headroom per tick.
            let mut scratch = vec![0f32; rate as usize];
            loop {
                tick.tick().await;
                let n = consumer.pop_slice(&mut scratch);
                if n == 0 {
                    continue;
                }
                if session.state() != ConnectionState::Ready {
                    debug!(samples = n, "session not ready, dropping captured audio");
                    continue;
                }
                let chunk = AudioChunk::mono(scratch[..n].to_vec(), rate);
                match session.send_audio(chunk).await {
                    Ok(()) => {}
                    Err(ParleyError::NotConnected) => debug!("session closed under the mic"),
                    Err(e) => warn!("microphone audio not sent: {e}"),
                }
            }
        });

        Ok(Self { capture, forwarder })
    }

    pub fn device_name(&self) -> &str {
        &self.capture.device_name
    }

    pub fn stop(mut self) {
        self.forwarder.abort();
        self.capture.stop();
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
