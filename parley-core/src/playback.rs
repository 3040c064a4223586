//! Ordered, interruptible speech playback.
//!
//! ## Loop
//!
//! ```text
//! enqueue(B) ──► Idle? ──yes──► sink.play(B) ──► Playing(done_rx)   [PlaybackStarted]
//!                  │no
//!                  └──► pending.push_back(B)
//!
//! finished().await ──► advance() ──► pending.pop_front()
//!                                      ├─ Some(B) → sink.play(B) → Playing(done_rx)
//!                                      └─ None    → Idle                 [PlaybackComplete]
//! ```
//!
//! The owner polls `finished()` alongside its other event sources and calls
//! `advance()` when it resolves, so buffers play strictly in arrival order and
//! never overlap. `clear()` is the barge-in path.

use std::collections::VecDeque;

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::audio::codec::PlayableBuffer;
use crate::audio::sink::SinkHandle;
use crate::events::SessionEvent;

/// What the queue is doing right now.
#[derive(Debug)]
pub enum PlaybackState {
    Idle,
    /// A buffer is on the sink; the receiver fires (or closes) when it ends.
    Playing(oneshot::Receiver<()>),
}

pub struct PlaybackQueue {
    sink: SinkHandle,
    pending: VecDeque<PlayableBuffer>,
    state: PlaybackState,
    events: broadcast::Sender<SessionEvent>,
    /// Buffers handed to the sink since creation.
    played: u64,
}

impl PlaybackQueue {
    pub fn new(sink: SinkHandle, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            sink,
            pending: VecDeque::new(),
            state: PlaybackState::Idle,
            events,
            played: 0,
        }
    }

    /// Append a buffer; starts playback immediately when idle.
    pub fn enqueue(&mut self, buffer: PlayableBuffer) {
        if buffer.is_empty() {
            debug!("skipping empty playback buffer");
            return;
        }
        self.pending.push_back(buffer);
        if matches!(self.state, PlaybackState::Idle) {
            let _ = self.events.send(SessionEvent::PlaybackStarted);
            self.play_next();
        }
    }

    /// Resolves when the buffer currently on the sink ends.
    ///
    /// Pending forever while idle, which makes it safe to poll from a
    /// `select!` loop unconditionally.
    pub async fn finished(&mut self) {
        match &mut self.state {
            PlaybackState::Playing(done) => {
                // Err means the sink dropped the sender: treat as ended.
                let _ = done.await;
            }
            PlaybackState::Idle => std::future::pending::<()>().await,
        }
    }

    /// Move past the finished buffer: play the next one or go idle.
    pub fn advance(&mut self) {
        self.state = PlaybackState::Idle;
        self.play_next();
    }

    /// Stop playback now and drop everything pending.
    ///
    /// Always emits exactly one `PlaybackComplete`, even when idle.
    pub fn clear(&mut self) {
        let dropped = self.pending.len();
        self.halt();
        debug!(dropped, "playback cleared");
        let _ = self.events.send(SessionEvent::PlaybackComplete);
    }

    /// Teardown variant of `clear`: releases the sink and only reports
    /// completion if something was actually playing.
    pub fn shutdown(&mut self) {
        let was_active = self.is_playing();
        self.pending.clear();
        self.state = PlaybackState::Idle;
        self.sink.0.lock().release();
        if was_active {
            let _ = self.events.send(SessionEvent::PlaybackComplete);
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing(_))
    }

    /// Buffers waiting behind the one currently playing.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn played(&self) -> u64 {
        self.played
    }

    fn halt(&mut self) {
        self.pending.clear();
        if self.is_playing() {
            self.sink.0.lock().stop();
        }
        self.state = PlaybackState::Idle;
    }

    fn play_next(&mut self) {
        while let Some(buffer) = self.pending.pop_front() {
            let (done_tx, done_rx) = oneshot::channel();
            match self.sink.0.lock().play(buffer, done_tx) {
                Ok(()) => {
                    self.played += 1;
                    self.state = PlaybackState::Playing(done_rx);
                    return;
                }
                Err(e) => {
                    // One bad buffer must not stall the rest of the reply.
                    warn!("dropping playback buffer: {e}");
                }
            }
        }
        self.state = PlaybackState::Idle;
        let _ = self.events.send(SessionEvent::PlaybackComplete);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::sink::AudioSink;
    use crate::error::{ParleyError, Result};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::broadcast::error::TryRecvError;

    /// Sink that records every buffer and lets the test decide when each ends.
    #[derive(Default)]
    pub(crate) struct ManualSinkState {
        pub started: Vec<PlayableBuffer>,
        pub completions: VecDeque<oneshot::Sender<()>>,
        pub stops: usize,
        pub releases: usize,
        pub fail_next: bool,
    }

    #[derive(Clone, Default)]
    pub(crate) struct ManualSink(pub Arc<Mutex<ManualSinkState>>);

    impl ManualSink {
        pub fn finish_current(&self) {
            let done = self.0.lock().completions.pop_front();
            if let Some(done) = done {
                let _ = done.send(());
            }
        }
    }

    impl AudioSink for ManualSink {
        fn play(&mut self, buffer: PlayableBuffer, done: oneshot::Sender<()>) -> Result<()> {
            let mut state = self.0.lock();
            if std::mem::take(&mut state.fail_next) {
                return Err(ParleyError::AudioStream("device lost".into()));
            }
            state.started.push(buffer);
            state.completions.push_back(done);
            Ok(())
        }

        fn stop(&mut self) {
            let mut state = self.0.lock();
            state.stops += 1;
            state.completions.clear();
        }

        fn release(&mut self) {
            self.stop();
            self.0.lock().releases += 1;
        }
    }

    pub(crate) fn tagged(tag: f32) -> PlayableBuffer {
        PlayableBuffer::new(vec![tag; 4], 24_000)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    fn setup() -> (PlaybackQueue, ManualSink, broadcast::Receiver<SessionEvent>) {
        let sink = ManualSink::default();
        let (tx, rx) = broadcast::channel(64);
        let queue = PlaybackQueue::new(SinkHandle::new(sink.clone()), tx);
        (queue, sink, rx)
    }

    #[tokio::test]
    async fn plays_in_order_without_overlap() {
        let (mut queue, sink, mut rx) = setup();

        queue.enqueue(tagged(1.0));
        queue.enqueue(tagged(2.0));
        queue.enqueue(tagged(3.0));

        // Only the head is on the sink.
        assert_eq!(sink.0.lock().started.len(), 1);
        assert_eq!(queue.pending_len(), 2);

        for expected in 2..=3 {
            sink.finish_current();
            queue.finished().await;
            queue.advance();
            assert_eq!(sink.0.lock().started.len(), expected);
        }

        sink.finish_current();
        queue.finished().await;
        queue.advance();
        assert!(!queue.is_playing());

        let order: Vec<f32> = sink.0.lock().started.iter().map(|b| b.samples[0]).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::PlaybackStarted, SessionEvent::PlaybackComplete]
        );
    }

    #[tokio::test]
    async fn clear_mid_playback_discards_rest_and_completes_once() {
        let (mut queue, sink, mut rx) = setup();

        queue.enqueue(tagged(1.0));
        queue.enqueue(tagged(2.0));
        queue.enqueue(tagged(3.0));

        sink.finish_current();
        queue.finished().await;
        queue.advance(); // B2 now playing

        queue.clear();

        assert!(!queue.is_playing());
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(sink.0.lock().stops, 1);
        assert_eq!(sink.0.lock().started.len(), 2, "B3 must never start");

        let events = drain(&mut rx);
        let completes = events
            .iter()
            .filter(|e| **e == SessionEvent::PlaybackComplete)
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn clear_when_idle_still_completes() {
        let (mut queue, sink, mut rx) = setup();
        queue.clear();
        queue.clear();
        assert_eq!(sink.0.lock().stops, 0);
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::PlaybackComplete, SessionEvent::PlaybackComplete]
        );
    }

    #[tokio::test]
    async fn shutdown_when_idle_is_silent() {
        let (mut queue, sink, mut rx) = setup();
        queue.shutdown();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(sink.0.lock().releases, 1);
    }

    #[tokio::test]
    async fn shutdown_mid_playback_releases_the_sink() {
        let (mut queue, sink, mut rx) = setup();
        queue.enqueue(tagged(1.0));
        queue.enqueue(tagged(2.0));
        drain(&mut rx);

        queue.shutdown();

        assert!(!queue.is_playing());
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(sink.0.lock().releases, 1);
        assert!(sink.0.lock().completions.is_empty());
        assert_eq!(drain(&mut rx), vec![SessionEvent::PlaybackComplete]);
    }

    #[tokio::test]
    async fn sink_failure_skips_only_that_buffer() {
        let (mut queue, sink, _rx) = setup();
        sink.0.lock().fail_next = true;

        queue.enqueue(tagged(1.0)); // fails, queue goes idle again
        assert!(!queue.is_playing());

        queue.enqueue(tagged(2.0));
        assert!(queue.is_playing());
        assert_eq!(sink.0.lock().started[0].samples[0], 2.0);
    }

    #[tokio::test]
    async fn dropped_completion_counts_as_finished() {
        let (mut queue, sink, _rx) = setup();
        queue.enqueue(tagged(1.0));
        queue.enqueue(tagged(2.0));

        // Sink lost the buffer without reporting completion.
        sink.0.lock().completions.clear();
        queue.finished().await;
        queue.advance();
        assert_eq!(sink.0.lock().started.len(), 2);
        assert_eq!(queue.played(), 2);
    }
}
