//! Audio output abstraction.
//!
//! The `AudioSink` trait decouples the playback queue from any specific
//! output (a cpal device, a paced headless clock, a test recorder).
//!
//! A sink plays one buffer at a time. The queue hands it a oneshot sender
//! with every buffer; the sink fires it when the buffer has been fully
//! played. Dropping the sender without firing (e.g. on `stop`) also ends
//! the buffer from the queue's point of view.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::codec::PlayableBuffer;
use crate::error::Result;

/// Contract for audio outputs.
pub trait AudioSink: Send + 'static {
    /// Begin playing `buffer`, replacing nothing: the queue only calls this
    /// when the previous buffer has finished or been stopped.
    ///
    /// Called from the session task, so it must return without waiting on
    /// the device; slow work belongs on the sink's own thread.
    ///
    /// # Errors
    /// Returns an error if the output cannot be opened or fed; the queue
    /// drops that buffer and moves on.
    fn play(&mut self, buffer: PlayableBuffer, done: oneshot::Sender<()>) -> Result<()>;

    /// Stop the in-progress buffer immediately. Must be idempotent.
    fn stop(&mut self);

    /// Stop and let go of the underlying output until the next `play`.
    /// Called when a session ends.
    fn release(&mut self) {
        self.stop();
    }
}

/// Thread-safe reference-counted handle to any `AudioSink` implementor.
///
/// The session task locks it only for the duration of `play`/`stop` calls.
#[derive(Clone)]
pub struct SinkHandle(pub Arc<Mutex<dyn AudioSink>>);

impl SinkHandle {
    /// Wrap any `AudioSink` in a `SinkHandle`.
    pub fn new<S: AudioSink>(sink: S) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle").finish_non_exhaustive()
    }
}

/// Device-less sink that "plays" each buffer for its real duration.
///
/// Keeps turn pacing and playback events realistic when no output device is
/// available or wanted. Must be driven from inside a Tokio runtime.
pub struct PacedSink {
    timer: Option<JoinHandle<()>>,
    /// Scales buffer durations; `0.0` completes immediately.
    speed: f64,
}

impl PacedSink {
    pub fn new() -> Self {
        Self {
            timer: None,
            speed: 1.0,
        }
    }

    /// A sink that finishes every buffer without waiting.
    pub fn instant() -> Self {
        Self {
            timer: None,
            speed: 0.0,
        }
    }
}

impl Default for PacedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for PacedSink {
    fn play(&mut self, buffer: PlayableBuffer, done: oneshot::Sender<()>) -> Result<()> {
        self.stop();
        let wait = if self.speed > 0.0 {
            buffer.duration().div_f64(self.speed)
        } else {
            Duration::ZERO
        };
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = done.send(());
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for PacedSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paced_sink_completes_after_buffer_duration() {
        let mut sink = PacedSink::new();
        let (tx, mut rx) = oneshot::channel();
        sink.play(PlayableBuffer::new(vec![0.0; 2400], 24_000), tx)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "finished too early");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn stopping_drops_the_completion() {
        let mut sink = PacedSink::new();
        let (tx, rx) = oneshot::channel();
        sink.play(PlayableBuffer::new(vec![0.0; 24_000], 24_000), tx)
            .unwrap();
        sink.stop();
        sink.stop();
        assert!(rx.await.is_err(), "stopped buffer must not report completion");
    }

    #[tokio::test]
    async fn release_cancels_the_timer() {
        let mut sink = PacedSink::new();
        let (tx, rx) = oneshot::channel();
        sink.play(PlayableBuffer::new(vec![0.0; 24_000], 24_000), tx)
            .unwrap();
        sink.release();
        assert!(sink.timer.is_none());
        assert!(rx.await.is_err());
    }
}
