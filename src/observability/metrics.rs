//! Thread-safe scheduler counters
//!
//! One [`MetricsCollector`] is built by the scheduler composition root and
//! shared by the pipeline, liveness monitor, inbound handlers and HTTP
//! server. Counters are atomics; sweep durations sit in a bounded,
//! mutex-protected window.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of recent sweep durations kept for percentiles
const SWEEP_WINDOW: usize = 256;

#[derive(Debug)]
pub struct MetricsCollector {
    tasks_created: AtomicU64,
    tasks_dispatched: AtomicU64,
    tasks_completed_ok: AtomicU64,
    tasks_completed_error: AtomicU64,
    tasks_timed_out: AtomicU64,
    tasks_deleted: AtomicU64,
    claims_recovered: AtomicU64,
    results_accepted: AtomicU64,
    results_ignored: AtomicU64,
    agents_marked_down: AtomicU64,
    heartbeats_received: AtomicU64,
    frames_received: AtomicU64,
    sweeps: AtomicU64,
    sweep_times: Mutex<VecDeque<u64>>,
    started_at: u64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_created: AtomicU64::new(0),
            tasks_dispatched: AtomicU64::new(0),
            tasks_completed_ok: AtomicU64::new(0),
            tasks_completed_error: AtomicU64::new(0),
            tasks_timed_out: AtomicU64::new(0),
            tasks_deleted: AtomicU64::new(0),
            claims_recovered: AtomicU64::new(0),
            results_accepted: AtomicU64::new(0),
            results_ignored: AtomicU64::new(0),
            agents_marked_down: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            sweep_times: Mutex::new(VecDeque::with_capacity(SWEEP_WINDOW)),
            started_at: current_timestamp(),
        }
    }

    pub fn task_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_dispatched(&self) {
        self.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self, ok: bool) {
        if ok {
            self.tasks_completed_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_completed_error.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn tasks_timed_out(&self, count: u64) {
        self.tasks_timed_out.fetch_add(count, Ordering::Relaxed);
    }

    pub fn tasks_deleted(&self, count: u64) {
        self.tasks_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn claims_recovered(&self, count: u64) {
        self.claims_recovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn result_accepted(&self) {
        self.results_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_ignored(&self) {
        self.results_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn agents_marked_down(&self, count: u64) {
        self.agents_marked_down.fetch_add(count, Ordering::Relaxed);
    }

    pub fn heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sweep_completed(&self, elapsed: Duration) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let mut times = self.sweep_times.lock();
        if times.len() == SWEEP_WINDOW {
            times.pop_front();
        }
        times.push_back(elapsed.as_millis() as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut times: Vec<u64> = self.sweep_times.lock().iter().copied().collect();
        times.sort_unstable();

        MetricsSnapshot {
            tasks: TaskMetrics {
                created: self.tasks_created.load(Ordering::Relaxed),
                dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
                completed_ok: self.tasks_completed_ok.load(Ordering::Relaxed),
                completed_error: self.tasks_completed_error.load(Ordering::Relaxed),
                timed_out: self.tasks_timed_out.load(Ordering::Relaxed),
                deleted: self.tasks_deleted.load(Ordering::Relaxed),
                claims_recovered: self.claims_recovered.load(Ordering::Relaxed),
                results_accepted: self.results_accepted.load(Ordering::Relaxed),
                results_ignored: self.results_ignored.load(Ordering::Relaxed),
            },
            agents: AgentMetrics {
                marked_down: self.agents_marked_down.load(Ordering::Relaxed),
                heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
                frames_received: self.frames_received.load(Ordering::Relaxed),
            },
            sweeps: SweepMetrics {
                count: self.sweeps.load(Ordering::Relaxed),
                p50_ms: percentile(&times, 50.0),
                p95_ms: percentile(&times, 95.0),
                max_ms: times.last().copied().unwrap_or(0),
            },
            uptime_seconds: current_timestamp().saturating_sub(self.started_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks: TaskMetrics,
    pub agents: AgentMetrics,
    pub sweeps: SweepMetrics,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub created: u64,
    pub dispatched: u64,
    pub completed_ok: u64,
    pub completed_error: u64,
    pub timed_out: u64,
    pub deleted: u64,
    pub claims_recovered: u64,
    pub results_accepted: u64,
    pub results_ignored: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentMetrics {
    pub marked_down: u64,
    pub heartbeats_received: u64,
    pub frames_received: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepMetrics {
    pub count: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted: &[u64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted.len() - 1) as f64;
    let lower = sorted[index.floor() as usize] as f64;
    let upper = sorted[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_task_counters() {
        let collector = MetricsCollector::new();
        collector.task_created();
        collector.task_dispatched();
        collector.task_completed(true);
        collector.task_completed(false);
        collector.tasks_timed_out(2);
        collector.tasks_deleted(3);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.tasks.created, 1);
        assert_eq!(snapshot.tasks.dispatched, 1);
        assert_eq!(snapshot.tasks.completed_ok, 1);
        assert_eq!(snapshot.tasks.completed_error, 1);
        assert_eq!(snapshot.tasks.timed_out, 2);
        assert_eq!(snapshot.tasks.deleted, 3);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.frame_received();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.snapshot().agents.frames_received, 800);
    }

    #[test]
    fn test_sweep_window_is_bounded() {
        let collector = MetricsCollector::new();
        for ms in 0..(SWEEP_WINDOW as u64 + 50) {
            collector.sweep_completed(Duration::from_millis(ms));
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.sweeps.count, SWEEP_WINDOW as u64 + 50);
        assert_eq!(collector.sweep_times.lock().len(), SWEEP_WINDOW);
        assert_eq!(snapshot.sweeps.max_ms, SWEEP_WINDOW as u64 + 49);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.01);
        assert!((percentile(&data, 0.0) - 1.0).abs() < 0.01);
        assert!((percentile(&data, 100.0) - 10.0).abs() < 0.01);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let value = serde_json::to_value(MetricsCollector::new().snapshot()).unwrap();
        assert_eq!(value["tasks"]["created"], 0);
        assert!(value["sweeps"]["p95_ms"].is_number());
    }
}
