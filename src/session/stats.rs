use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about a live session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the current connection attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub duration_secs: f64,

    /// Microphone frames handed to the transport
    pub frames_sent: u64,

    /// Microphone frames dropped (encode or send failure)
    pub frames_dropped: u64,

    /// Model audio chunks scheduled for playback
    pub chunks_scheduled: u64,

    /// Model audio chunks dropped (decode or device failure)
    pub chunks_dropped: u64,

    /// Barge-in interruptions processed
    pub interruptions: u64,

    /// Tool invocations answered
    pub tool_calls: u64,

    /// Tool invocations answered with a failure result
    pub tool_failures: u64,
}

/// Live counters shared by the capture pump, scheduler and controller
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub interruptions: AtomicU64,
    pub tool_calls: AtomicU64,
    pub tool_failures: AtomicU64,
}

impl SessionCounters {
    pub fn incr(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_dropped,
            &self.chunks_scheduled,
            &self.chunks_dropped,
            &self.interruptions,
            &self.tool_calls,
            &self.tool_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, started_at: Option<DateTime<Utc>>) -> SessionStats {
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            started_at,
            duration_secs,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot_and_reset() {
        let counters = SessionCounters::default();
        SessionCounters::incr(&counters.frames_sent);
        SessionCounters::incr(&counters.frames_sent);
        SessionCounters::add(&counters.tool_calls, 3);

        let stats = counters.snapshot(None);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.tool_calls, 3);
        assert_eq!(stats.duration_secs, 0.0);

        counters.reset();
        assert_eq!(counters.snapshot(None), SessionStats::default());
    }
}
