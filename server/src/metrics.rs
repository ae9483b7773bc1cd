// Speak session counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tts_core::{CompletionCause, StartKind};

/// Counters for the speak endpoint, shared by every connection.
#[derive(Debug, Clone)]
pub struct SpeakMetrics {
    pub speak_requests: Arc<AtomicU64>,
    pub start_failures: Arc<AtomicU64>,
    pub cache_hits: Arc<AtomicU64>,
    pub cache_misses: Arc<AtomicU64>,
    pub completed_normal: Arc<AtomicU64>,
    pub completed_error: Arc<AtomicU64>,
    pub completed_cancelled: Arc<AtomicU64>,
    pub frames_sent: Arc<AtomicU64>,
    pub keepalives_sent: Arc<AtomicU64>,
    pub active_connections: Arc<AtomicU64>,
    started: Instant,
}

impl SpeakMetrics {
    pub fn new() -> Self {
        Self {
            speak_requests: Arc::new(AtomicU64::new(0)),
            start_failures: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            completed_normal: Arc::new(AtomicU64::new(0)),
            completed_error: Arc::new(AtomicU64::new(0)),
            completed_cancelled: Arc::new(AtomicU64::new(0)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            keepalives_sent: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    pub fn record_speak_request(&self) {
        self.speak_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start(&self, kind: StartKind) {
        match kind {
            StartKind::CacheHit => self.cache_hits.fetch_add(1, Ordering::Relaxed),
            StartKind::Network => self.cache_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_start_failure(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self, cause: CompletionCause) {
        let counter = match cause {
            CompletionCause::Normal => &self.completed_normal,
            CompletionCause::Error => &self.completed_error,
            CompletionCause::Cancelled => &self.completed_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keepalive(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        (hits as f64 / total as f64) * 100.0
    }

    pub fn snapshot(&self) -> MetricsResponse {
        let load = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);
        MetricsResponse {
            timestamp: Utc::now(),
            uptime_seconds: self.started.elapsed().as_secs(),
            active_connections: load(&self.active_connections),
            speak_requests: load(&self.speak_requests),
            start_failures: load(&self.start_failures),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            cache_hit_rate: self.cache_hit_rate(),
            completions: CompletionCounts {
                normal: load(&self.completed_normal),
                error: load(&self.completed_error),
                cancelled: load(&self.completed_cancelled),
            },
            frames_sent: load(&self.frames_sent),
            keepalives_sent: load(&self.keepalives_sent),
        }
    }
}

impl Default for SpeakMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub active_connections: u64,
    pub speak_requests: u64,
    pub start_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub completions: CompletionCounts,
    pub frames_sent: u64,
    pub keepalives_sent: u64,
}

#[derive(Debug, Serialize)]
pub struct CompletionCounts {
    pub normal: u64,
    pub error: u64,
    pub cancelled: u64,
}
