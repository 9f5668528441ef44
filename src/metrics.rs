// Performance metrics module
//
// Provides lightweight metrics tracking for monitoring pipeline performance

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Global performance metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Metrics are collected across batches and can be logged periodically or on
/// shutdown for performance analysis.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of batches started
    pub batches_run: AtomicUsize,

    /// Total number of overlays successfully built
    pub overlays_built: AtomicUsize,

    /// Total number of overlays that failed hard
    pub overlays_failed: AtomicUsize,

    /// Total number of overlays soft-skipped for missing variant content
    pub overlays_soft_skipped: AtomicUsize,

    /// Total build time in milliseconds
    pub total_build_time_ms: AtomicU64,

    /// Number of state broadcasts sent
    pub state_broadcasts: AtomicU64,

    /// Number of state broadcast errors (channel full or closed)
    pub state_broadcast_errors: AtomicU64,

    /// Process start time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            batches_run: AtomicUsize::new(0),
            overlays_built: AtomicUsize::new(0),
            overlays_failed: AtomicUsize::new(0),
            overlays_soft_skipped: AtomicUsize::new(0),
            total_build_time_ms: AtomicU64::new(0),
            state_broadcasts: AtomicU64::new(0),
            state_broadcast_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_batch_started(&self) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overlay_built(&self) {
        self.overlays_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overlay_failed(&self) {
        self.overlays_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overlay_soft_skipped(&self) {
        self.overlays_soft_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record build time for one overlay
    pub fn record_build_time(&self, duration: Duration) {
        self.total_build_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_state_broadcast(&self) {
        self.state_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_broadcast_error(&self) {
        self.state_broadcast_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average build time per overlay in milliseconds
    pub fn avg_build_time_ms(&self) -> f64 {
        let total = self.total_build_time_ms.load(Ordering::Relaxed);
        let count = self.overlays_built.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let uptime = self.uptime();
        tracing::info!("=== Performance Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", uptime.as_secs_f64());
        tracing::info!(
            "Batches: {}, overlays: {} built, {} failed, {} soft-skipped",
            self.batches_run.load(Ordering::Relaxed),
            self.overlays_built.load(Ordering::Relaxed),
            self.overlays_failed.load(Ordering::Relaxed),
            self.overlays_soft_skipped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Total build time: {:.2}s (avg: {:.2}ms per overlay)",
            self.total_build_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_build_time_ms()
        );
        tracing::info!(
            "State broadcasts: {}, errors: {}",
            self.state_broadcasts.load(Ordering::Relaxed),
            self.state_broadcast_errors.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
