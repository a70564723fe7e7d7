//! Gapless playback scheduling with barge-in interruption
//!
//! Incoming chunks are placed back to back on the output device clock:
//! each starts at `max(next_start_time, now)`. Interrupting stops every
//! scheduled chunk and resets `next_start_time` so the next chunk plays
//! immediately.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, AudioOutput, HandleId};
use super::codec::{self, TransportBlob};
use crate::error::VoiceResult;
use crate::session::SessionCounters;

/// A chunk scheduled on the output device
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    pub id: HandleId,
    /// Device clock time the chunk starts at
    pub start_at: f64,
    /// Chunk length in seconds
    pub duration: f64,
}

impl PlaybackHandle {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    active: BTreeMap<HandleId, PlaybackHandle>,
    next_start_time: f64,
    next_id: u64,
    tap: broadcast::Sender<AudioFrame>,
    counters: Arc<SessionCounters>,
}

impl PlaybackScheduler {
    pub fn new(
        output: Box<dyn AudioOutput>,
        tap: broadcast::Sender<AudioFrame>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        info!(
            "Playback scheduler on {} at {}Hz",
            output.name(),
            output.sample_rate()
        );

        Self {
            output,
            active: BTreeMap::new(),
            next_start_time: 0.0,
            next_id: 0,
            tap,
            counters,
        }
    }

    /// Receiver of naturally-completed chunk ids from the device
    pub fn take_completions(&mut self) -> Option<mpsc::UnboundedReceiver<HandleId>> {
        self.output.take_completions()
    }

    /// Decode a chunk and schedule it right after everything already queued
    ///
    /// A malformed chunk is dropped and the queue is left untouched.
    pub fn enqueue(&mut self, blob: &TransportBlob) -> VoiceResult<HandleId> {
        let frame = codec::decode(blob).map_err(|e| {
            SessionCounters::incr(&self.counters.chunks_dropped);
            warn!("Playback: dropping chunk: {}", e);
            e
        })?;

        let now = self.output.current_time();
        let requested = self.next_start_time.max(now);
        let id = HandleId(self.next_id);

        // The device clock may move between the read above and scheduling,
        // so the chunk is placed where the device actually starts it
        let start_at = match self.output.schedule(id, &frame, requested) {
            Ok(effective) => effective.max(requested),
            Err(e) => {
                SessionCounters::incr(&self.counters.chunks_dropped);
                warn!("Playback: {} rejected chunk: {}", self.output.name(), e);
                return Err(e);
            }
        };

        self.next_id += 1;
        let duration = frame.duration_secs();
        self.next_start_time = start_at + duration;
        self.active.insert(
            id,
            PlaybackHandle {
                id,
                start_at,
                duration,
            },
        );

        let scheduled = SessionCounters::incr(&self.counters.chunks_scheduled);
        debug!(
            "Playback: {:?} at {:.3}s for {:.3}s ({} active, {} total)",
            id,
            start_at,
            duration,
            self.active.len(),
            scheduled
        );

        if self.tap.receiver_count() > 0 {
            let _ = self.tap.send(frame);
        }

        Ok(id)
    }

    /// Stop every scheduled chunk (barge-in)
    ///
    /// Returns the number of chunks stopped. Safe to call with nothing queued.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        self.next_start_time = 0.0;

        if stopped > 0 {
            info!("Playback: interrupted, {} chunks stopped", stopped);
        }
        stopped
    }

    /// Interrupt and forget any scheduling position
    pub fn reset(&mut self) {
        self.interrupt();
        debug!("Playback: reset");
    }

    /// Forget a chunk the device finished playing
    ///
    /// Ids that were already stopped or never scheduled are ignored.
    pub fn on_ended(&mut self, id: HandleId) -> bool {
        let removed = self.active.remove(&id).is_some();
        if !removed {
            debug!("Playback: ignoring completion for {:?}", id);
        }
        removed
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn active_handles(&self) -> impl Iterator<Item = &PlaybackHandle> {
        self.active.values()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    /// True while audio is queued or playing
    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mixer::{lock_mixer, PlaybackMixer, SharedMixer, VirtualClock, VirtualOutput};
    use std::sync::Mutex;

    const EPSILON: f64 = 1e-9;

    fn scheduler() -> (PlaybackScheduler, VirtualClock, mpsc::UnboundedReceiver<HandleId>) {
        let output = VirtualOutput::new(24000);
        let clock = output.clock();
        let (tap, _) = broadcast::channel(4);
        let mut scheduler =
            PlaybackScheduler::new(Box::new(output), tap, Arc::new(SessionCounters::default()));
        let completions = scheduler.take_completions().unwrap();
        (scheduler, clock, completions)
    }

    /// PCM blob of `samples` quiet samples at 24kHz
    fn chunk(samples: usize) -> TransportBlob {
        codec::encode(&AudioFrame::mono(vec![0.1; samples], 24000))
    }

    #[test]
    fn test_first_chunk_starts_now() {
        let (mut scheduler, clock, _rx) = scheduler();
        clock.advance(1.5);

        scheduler.enqueue(&chunk(2400)).unwrap();
        let handle = scheduler.active_handles().next().unwrap().clone();

        assert!((handle.start_at - 1.5).abs() < EPSILON);
        assert!((scheduler.next_start_time() - 1.6).abs() < EPSILON);
    }

    #[test]
    fn test_chunks_are_gapless() {
        let (mut scheduler, _clock, _rx) = scheduler();

        for samples in [2400, 1200, 4800] {
            scheduler.enqueue(&chunk(samples)).unwrap();
        }

        let handles: Vec<_> = scheduler.active_handles().cloned().collect();
        assert_eq!(handles.len(), 3);
        for pair in handles.windows(2) {
            assert!((pair[1].start_at - pair[0].end_at()).abs() < EPSILON);
        }
        assert!((scheduler.next_start_time() - 0.35).abs() < EPSILON);
    }

    #[test]
    fn test_chunks_stay_gapless_while_clock_runs() {
        let (mut scheduler, clock, _rx) = scheduler();

        for _ in 0..4 {
            scheduler.enqueue(&chunk(2400)).unwrap();
            clock.advance(0.03);
        }

        let handles: Vec<_> = scheduler.active_handles().cloned().collect();
        assert_eq!(handles.len(), 4);
        for (k, handle) in handles.iter().enumerate() {
            assert!((handle.start_at - 0.1 * k as f64).abs() < EPSILON);
        }
        for pair in handles.windows(2) {
            assert!((pair[1].start_at - pair[0].end_at()).abs() < EPSILON);
        }
    }

    /// Output whose render clock ticks between `current_time` and `schedule`
    struct TickingOutput {
        mixer: SharedMixer,
        tick: usize,
    }

    impl AudioOutput for TickingOutput {
        fn name(&self) -> &str {
            "ticking"
        }

        fn sample_rate(&self) -> u32 {
            lock_mixer(&self.mixer).sample_rate()
        }

        fn current_time(&self) -> f64 {
            lock_mixer(&self.mixer).current_time()
        }

        fn schedule(
            &mut self,
            id: HandleId,
            frame: &AudioFrame,
            start_at: f64,
        ) -> VoiceResult<f64> {
            let mut mixer = lock_mixer(&self.mixer);
            mixer.advance(self.tick);
            Ok(mixer.schedule(id, frame, start_at))
        }

        fn stop(&mut self, id: HandleId) {
            lock_mixer(&self.mixer).stop(id);
        }

        fn take_completions(&mut self) -> Option<mpsc::UnboundedReceiver<HandleId>> {
            None
        }
    }

    #[test]
    fn test_render_tick_during_schedule_does_not_overlap() {
        let (completions, _rx) = mpsc::unbounded_channel();
        let mixer: SharedMixer = Arc::new(Mutex::new(PlaybackMixer::new(24000, completions)));
        let output = TickingOutput {
            mixer: Arc::clone(&mixer),
            tick: 240,
        };
        let (tap, _) = broadcast::channel(4);
        let mut scheduler =
            PlaybackScheduler::new(Box::new(output), tap, Arc::new(SessionCounters::default()));

        let loud = codec::encode(&AudioFrame::mono(vec![0.25; 2400], 24000));
        scheduler.enqueue(&loud).unwrap();
        scheduler.enqueue(&loud).unwrap();

        let handles: Vec<_> = scheduler.active_handles().cloned().collect();
        assert!((handles[0].start_at - 0.01).abs() < EPSILON);
        assert!((handles[1].start_at - handles[0].end_at()).abs() < EPSILON);

        let mut out = vec![0.0; 7200];
        lock_mixer(&mixer).render(&mut out);

        // The first 240 samples went out during the ticks
        let audible = out.iter().filter(|s| **s != 0.0).count();
        assert_eq!(audible, 4800 - 240);
        assert!(out.iter().all(|s| *s < 0.3), "chunks were summed");
    }

    #[test]
    fn test_late_chunk_after_underrun_starts_now() {
        let (mut scheduler, clock, _rx) = scheduler();
        scheduler.enqueue(&chunk(2400)).unwrap();
        clock.advance(0.5);

        scheduler.enqueue(&chunk(2400)).unwrap();
        let last = scheduler.active_handles().last().unwrap().clone();
        assert!((last.start_at - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_interrupt_stops_everything() {
        let (mut scheduler, clock, mut rx) = scheduler();
        for _ in 0..3 {
            scheduler.enqueue(&chunk(2400)).unwrap();
        }

        assert_eq!(scheduler.interrupt(), 3);
        assert_eq!(scheduler.active_len(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);

        // Stopped chunks never report completion
        clock.advance(1.0);
        assert!(rx.try_recv().is_err());
        assert_eq!(clock.active(), 0);
    }

    #[test]
    fn test_interrupt_on_empty_queue() {
        let (mut scheduler, _clock, _rx) = scheduler();
        assert_eq!(scheduler.interrupt(), 0);
        assert_eq!(scheduler.interrupt(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_chunk_after_interrupt_starts_now() {
        let (mut scheduler, clock, _rx) = scheduler();
        for _ in 0..5 {
            scheduler.enqueue(&chunk(2400)).unwrap();
        }
        clock.advance(0.15);
        scheduler.interrupt();

        scheduler.enqueue(&chunk(2400)).unwrap();
        let handle = scheduler.active_handles().next().unwrap().clone();
        assert!((handle.start_at - 0.15).abs() < EPSILON);
    }

    #[test]
    fn test_completion_removes_handle() {
        let (mut scheduler, clock, mut rx) = scheduler();
        let first = scheduler.enqueue(&chunk(2400)).unwrap();
        let second = scheduler.enqueue(&chunk(2400)).unwrap();

        clock.advance(0.1);
        let done = rx.try_recv().unwrap();
        assert_eq!(done, first);
        assert!(scheduler.on_ended(done));
        assert_eq!(scheduler.active_len(), 1);

        // Unknown or repeated completions are ignored
        assert!(!scheduler.on_ended(first));
        assert!(!scheduler.on_ended(HandleId(99)));
        assert_eq!(scheduler.active_handles().next().unwrap().id, second);
    }

    #[test]
    fn test_malformed_chunk_is_dropped() {
        let (mut scheduler, _clock, _rx) = scheduler();
        scheduler.enqueue(&chunk(2400)).unwrap();
        let before = scheduler.next_start_time();

        let bad = TransportBlob::new(vec![1, 2, 3], "audio/pcm;rate=24000");
        assert!(scheduler.enqueue(&bad).is_err());

        assert_eq!(scheduler.active_len(), 1);
        assert_eq!(scheduler.next_start_time(), before);
        assert_eq!(
            scheduler
                .counters
                .chunks_dropped
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_reset_clears_position() {
        let (mut scheduler, _clock, _rx) = scheduler();
        scheduler.enqueue(&chunk(4800)).unwrap();
        scheduler.reset();
        scheduler.reset();
        assert_eq!(scheduler.active_len(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }
}
