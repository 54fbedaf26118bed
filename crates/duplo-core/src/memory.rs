//! Memory governor for batch-processing loops.
//!
//! A [`MemoryManager`] samples process RSS and system memory through a
//! [`MemoryProbe`], escalates through the warning/throttle/critical tiers on
//! every background tick, and answers batch-sizing questions from a fresh
//! sample. The sampler is a single thread driven by a crossbeam stop channel:
//! `recv_timeout(interval)` is both the tick and the cancellation point.

use std::fs;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::MemoryConfig;
use crate::errors::DuploResult;

/// Upper bound on how long `stop` waits for the sampler thread.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Used when `/proc/meminfo` is unreadable.
const FALLBACK_SYSTEM_TOTAL_MB: f64 = 8192.0;

const ESTIMATE_MB_PER_FILE: f64 = 0.01;
const ESTIMATE_MB_PER_SYMBOL: f64 = 0.001;
const ESTIMATE_INDEX_OVERHEAD: f64 = 1.5;
const ESTIMATE_BASE_MB: f64 = 100.0;

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// One raw reading, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub process_rss_mb: f64,
    pub system_total_mb: f64,
    pub system_available_mb: f64,
}

pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;
}

/// Linux probe over `/proc/self/status` and `/proc/meminfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMemoryProbe;

fn parse_kb_field(content: &str, key: &str) -> Option<f64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse::<f64>().ok()
    })
}

impl MemoryProbe for ProcMemoryProbe {
    fn sample(&self) -> MemorySample {
        let process_rss_mb = fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|s| parse_kb_field(&s, "VmRSS"))
            .map(|kb| kb / 1024.0)
            .unwrap_or(0.0);

        let meminfo = fs::read_to_string("/proc/meminfo").ok();
        let totals = meminfo.as_deref().and_then(|s| {
            Some((parse_kb_field(s, "MemTotal")?, parse_kb_field(s, "MemAvailable")?))
        });
        match totals {
            Some((total_kb, available_kb)) => MemorySample {
                process_rss_mb,
                system_total_mb: total_kb / 1024.0,
                system_available_mb: available_kb / 1024.0,
            },
            None => MemorySample {
                process_rss_mb,
                system_total_mb: FALLBACK_SYSTEM_TOTAL_MB,
                system_available_mb: (FALLBACK_SYSTEM_TOTAL_MB - process_rss_mb).max(4096.0),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub peak_memory_mb: f64,
    pub current_memory_mb: f64,
    pub system_total_mb: f64,
    pub system_available_mb: f64,
    pub usage_percentage: f64,
    pub gc_collections: u64,
    pub memory_warnings: u64,
    pub throttling_events: u64,
    pub last_update: DateTime<Utc>,
}

impl Default for MemoryStats {
    fn default() -> Self {
        Self {
            peak_memory_mb: 0.0,
            current_memory_mb: 0.0,
            system_total_mb: 0.0,
            system_available_mb: 0.0,
            usage_percentage: 0.0,
            gc_collections: 0,
            memory_warnings: 0,
            throttling_events: 0,
            last_update: Utc::now(),
        }
    }
}

impl MemoryStats {
    fn apply(&mut self, sample: MemorySample) {
        self.current_memory_mb = sample.process_rss_mb;
        self.system_total_mb = sample.system_total_mb;
        self.system_available_mb = sample.system_available_mb;
        self.usage_percentage = if sample.system_total_mb > 0.0 {
            sample.process_rss_mb / sample.system_total_mb * 100.0
        } else {
            0.0
        };
        self.peak_memory_mb = self.peak_memory_mb.max(sample.process_rss_mb);
        self.last_update = Utc::now();
    }
}

/// Pressure tier of a usage percentage; only the highest applicable tier fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureTier {
    Normal,
    Warning,
    Throttle,
    Critical,
}

impl PressureTier {
    pub fn classify(usage_percentage: f64, config: &MemoryConfig) -> Self {
        if usage_percentage >= config.critical_threshold {
            Self::Critical
        } else if usage_percentage >= config.throttle_threshold {
            Self::Throttle
        } else if usage_percentage >= config.warning_threshold {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

/// Batch size for a given usage percentage, always within
/// `[min_batch_size, max_batch_size]` and non-increasing as usage rises.
pub fn batch_size_for_usage(config: &MemoryConfig, usage_percentage: f64, base: usize) -> usize {
    let sized = match PressureTier::classify(usage_percentage, config) {
        PressureTier::Normal => base.min(config.max_batch_size),
        PressureTier::Warning => config.min_batch_size.max((base as f64 * 0.75).round() as usize),
        PressureTier::Throttle => config.min_batch_size.max(base / 2),
        PressureTier::Critical => config.min_batch_size,
    };
    sized.clamp(config.min_batch_size, config.max_batch_size)
}

/// Estimated MB needed to process `file_count` files.
pub fn estimate_memory_for_files(file_count: usize, avg_symbols_per_file: usize) -> f64 {
    let files = file_count as f64;
    let symbols = files * avg_symbols_per_file as f64;
    let base = files * ESTIMATE_MB_PER_FILE + symbols * ESTIMATE_MB_PER_SYMBOL;
    base * ESTIMATE_INDEX_OVERHEAD + ESTIMATE_BASE_MB
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub type MemoryCallback = Box<dyn Fn(&MemoryStats) + Send + Sync>;
pub type ReclaimHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    warning: Vec<MemoryCallback>,
    throttle: Vec<MemoryCallback>,
    critical: Vec<MemoryCallback>,
    reclaim: Vec<ReclaimHook>,
}

struct State {
    stats: MemoryStats,
    last_gc_usage_mb: f64,
}

struct Shared {
    config: MemoryConfig,
    probe: Arc<dyn MemoryProbe>,
    state: Mutex<State>,
    callbacks: RwLock<Callbacks>,
}

impl Shared {
    /// Sample and return a snapshot, all under the stats lock.
    fn refresh(&self) -> MemoryStats {
        let mut state = self.state.lock();
        state.stats.apply(self.probe.sample());
        state.stats.clone()
    }

    /// One sampler tick: sample, escalate, then maybe reclaim. Callbacks run
    /// after the stats lock is released so they may query the manager.
    fn tick(&self) -> PressureTier {
        let (tier, snapshot, reclaim_growth) = {
            let mut state = self.state.lock();
            state.stats.apply(self.probe.sample());
            let tier = PressureTier::classify(state.stats.usage_percentage, &self.config);
            match tier {
                PressureTier::Critical | PressureTier::Warning => state.stats.memory_warnings += 1,
                PressureTier::Throttle => state.stats.throttling_events += 1,
                PressureTier::Normal => {}
            }
            let growth = state.stats.current_memory_mb - state.last_gc_usage_mb;
            let reclaim = self.config.enable_auto_gc && growth >= self.config.gc_threshold_mb;
            (tier, state.stats.clone(), reclaim.then_some(growth))
        };

        let usage_pct = snapshot.usage_percentage;
        {
            let callbacks = self.callbacks.read();
            let fired: &[MemoryCallback] = match tier {
                PressureTier::Critical => {
                    error!(usage_pct, "critical memory usage");
                    &callbacks.critical
                }
                PressureTier::Throttle => {
                    warn!(usage_pct, "high memory usage, throttling");
                    &callbacks.throttle
                }
                PressureTier::Warning => {
                    info!(usage_pct, "memory usage warning");
                    &callbacks.warning
                }
                PressureTier::Normal => &[],
            };
            for callback in fired {
                callback(&snapshot);
            }
        }

        if let Some(growth_mb) = reclaim_growth {
            debug!(growth_mb, "memory grew past reclaim threshold");
            self.reclaim();
        }
        tier
    }

    /// Run the reclaim hooks and reset the growth baseline.
    fn reclaim(&self) -> usize {
        let hooks_run = {
            let callbacks = self.callbacks.read();
            for hook in &callbacks.reclaim {
                hook();
            }
            callbacks.reclaim.len()
        };
        let mut state = self.state.lock();
        state.stats.apply(self.probe.sample());
        state.stats.gc_collections += 1;
        state.last_gc_usage_mb = state.stats.current_memory_mb;
        hooks_run
    }
}

struct Sampler {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Background memory governor. Dropping it stops the sampler.
pub struct MemoryManager {
    shared: Arc<Shared>,
    sampler: Mutex<Option<Sampler>>,
}

impl MemoryManager {
    /// Manager over the `/proc` probe. Monitoring is not started.
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_probe(config, Arc::new(ProcMemoryProbe))
    }

    pub fn with_probe(config: MemoryConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let mut stats = MemoryStats::default();
        stats.apply(probe.sample());
        let baseline = stats.current_memory_mb;
        info!(
            warning = config.warning_threshold,
            throttle = config.throttle_threshold,
            critical = config.critical_threshold,
            baseline_mb = baseline,
            "memory manager initialized"
        );
        Self {
            shared: Arc::new(Shared {
                config,
                probe,
                state: Mutex::new(State {
                    stats,
                    last_gc_usage_mb: baseline,
                }),
                callbacks: RwLock::new(Callbacks::default()),
            }),
            sampler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.shared.config
    }

    /// Spawn the sampler thread. A second call while running is a no-op.
    pub fn start_monitoring(&self) -> DuploResult<()> {
        let mut sampler = self.sampler.lock();
        if sampler.is_some() {
            warn!("memory monitoring already active");
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let interval = Duration::try_from_secs_f64(shared.config.monitoring_interval_secs)
            .unwrap_or(Duration::from_secs(5));
        let handle = std::thread::Builder::new()
            .name("duplo-memory-sampler".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            shared.tick();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let _ = done_tx.send(());
            })?;
        *sampler = Some(Sampler {
            stop_tx,
            done_rx,
            handle,
        });
        info!(interval_secs = interval.as_secs_f64(), "memory monitoring started");
        Ok(())
    }

    pub fn is_monitoring(&self) -> bool {
        self.sampler.lock().is_some()
    }

    /// Stop the sampler, waiting at most a couple of seconds for it. Safe to
    /// call any number of times.
    pub fn stop(&self) {
        let Some(sampler) = self.sampler.lock().take() else {
            return;
        };
        let _ = sampler.stop_tx.send(());
        match sampler.done_rx.recv_timeout(STOP_JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if sampler.handle.join().is_err() {
                    error!("memory sampler thread panicked");
                }
                info!("memory monitoring stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = STOP_JOIN_TIMEOUT.as_millis() as u64,
                    "memory sampler did not stop in time; detaching"
                );
            }
        }
    }

    /// Run one sampler tick on the caller's thread.
    pub fn check_now(&self) -> PressureTier {
        self.shared.tick()
    }

    /// Fresh snapshot of the stats.
    pub fn current_stats(&self) -> MemoryStats {
        self.shared.refresh()
    }

    pub fn should_throttle(&self) -> bool {
        self.shared.refresh().usage_percentage >= self.shared.config.throttle_threshold
    }

    pub fn is_memory_critical(&self) -> bool {
        self.shared.refresh().usage_percentage >= self.shared.config.critical_threshold
    }

    /// Batch size adjusted to the current memory pressure.
    pub fn calculate_optimal_batch_size(&self, base: usize) -> usize {
        let usage = self.shared.refresh().usage_percentage;
        batch_size_for_usage(&self.shared.config, usage, base)
    }

    pub fn default_batch_size(&self) -> usize {
        self.calculate_optimal_batch_size(self.shared.config.default_batch_size)
    }

    pub fn estimate_memory_for_files(&self, file_count: usize, avg_symbols_per_file: usize) -> f64 {
        estimate_memory_for_files(file_count, avg_symbols_per_file)
    }

    /// Admit a batch only if it fits below the throttle threshold.
    pub fn can_process_files(&self, file_count: usize, avg_symbols_per_file: usize) -> bool {
        let estimate = estimate_memory_for_files(file_count, avg_symbols_per_file);
        let stats = self.shared.refresh();
        let limit = stats.system_total_mb * (self.shared.config.throttle_threshold / 100.0);
        estimate + stats.current_memory_mb < limit
    }

    pub fn add_warning_callback(&self, callback: impl Fn(&MemoryStats) + Send + Sync + 'static) {
        self.shared.callbacks.write().warning.push(Box::new(callback));
    }

    pub fn add_throttle_callback(&self, callback: impl Fn(&MemoryStats) + Send + Sync + 'static) {
        self.shared.callbacks.write().throttle.push(Box::new(callback));
    }

    pub fn add_critical_callback(&self, callback: impl Fn(&MemoryStats) + Send + Sync + 'static) {
        self.shared.callbacks.write().critical.push(Box::new(callback));
    }

    /// Hooks that release caches when memory grows past `gc_threshold_mb`.
    pub fn add_reclaim_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks.write().reclaim.push(Box::new(hook));
    }

    /// Run every reclaim hook now; returns how many ran.
    pub fn force_garbage_collection(&self) -> usize {
        info!("forcing memory reclaim");
        let hooks = self.shared.reclaim();
        let current_mb = self.shared.state.lock().stats.current_memory_mb;
        info!(hooks, current_mb, "memory reclaim finished");
        hooks
    }

    /// Snapshot on entry; the returned guard logs the delta when dropped.
    pub fn monitor_operation(&self, description: impl Into<String>) -> OperationMonitor<'_> {
        let description = description.into();
        let start = self.current_stats();
        info!(operation = %description, memory_mb = start.current_memory_mb, "starting operation");
        OperationMonitor {
            manager: self,
            description,
            start,
            started: Instant::now(),
        }
    }

    pub fn memory_report(&self) -> MemoryReport {
        let stats = self.current_stats();
        let config = &self.shared.config;
        let recommendations = recommendations(&stats, config);
        MemoryReport {
            timestamp: Utc::now(),
            warning_threshold: config.warning_threshold,
            throttle_threshold: config.throttle_threshold,
            critical_threshold: config.critical_threshold,
            batch_size_range: (config.min_batch_size, config.max_batch_size),
            gc_enabled: config.enable_auto_gc,
            monitoring_active: self.is_monitoring(),
            stats,
            recommendations,
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn recommendations(stats: &MemoryStats, config: &MemoryConfig) -> Vec<String> {
    let usage = stats.usage_percentage;
    let mut notes = vec![if usage > config.critical_threshold {
        "CRITICAL: Consider reducing batch size or freeing memory"
    } else if usage > config.throttle_threshold {
        "HIGH: Processing may be throttled, monitor closely"
    } else if usage > config.warning_threshold {
        "MODERATE: Memory usage elevated but manageable"
    } else {
        "NORMAL: Memory usage within acceptable limits"
    }
    .to_string()];
    if stats.gc_collections > 10 {
        notes.push("Consider tuning reclaim thresholds if collections are frequent".to_string());
    }
    if stats.throttling_events > 5 {
        notes.push("Frequent throttling detected - consider reducing workload".to_string());
    }
    notes
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub timestamp: DateTime<Utc>,
    pub stats: MemoryStats,
    pub warning_threshold: f64,
    pub throttle_threshold: f64,
    pub critical_threshold: f64,
    pub batch_size_range: (usize, usize),
    pub gc_enabled: bool,
    pub recommendations: Vec<String>,
    pub monitoring_active: bool,
}

/// Scoped diagnostics for one operation; see [`MemoryManager::monitor_operation`].
pub struct OperationMonitor<'a> {
    manager: &'a MemoryManager,
    description: String,
    start: MemoryStats,
    started: Instant,
}

impl OperationMonitor<'_> {
    pub fn start_stats(&self) -> &MemoryStats {
        &self.start
    }
}

impl Drop for OperationMonitor<'_> {
    fn drop(&mut self) {
        let end = self.manager.current_stats();
        let delta_mb = end.current_memory_mb - self.start.current_memory_mb;
        info!(
            operation = %self.description,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            memory_mb = end.current_memory_mb,
            delta_mb,
            "completed operation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe whose RSS is set by the test; system total is fixed at 1000 MB
    /// so RSS in MB reads directly as a tenth of a percent.
    struct FakeProbe {
        rss_mb: Mutex<f64>,
    }

    impl FakeProbe {
        fn set_usage_pct(&self, pct: f64) {
            *self.rss_mb.lock() = pct * 10.0;
        }
    }

    impl MemoryProbe for FakeProbe {
        fn sample(&self) -> MemorySample {
            let rss = *self.rss_mb.lock();
            MemorySample {
                process_rss_mb: rss,
                system_total_mb: 1000.0,
                system_available_mb: 1000.0 - rss,
            }
        }
    }

    fn make_manager(usage_pct: f64) -> (MemoryManager, Arc<FakeProbe>) {
        make_manager_with(MemoryConfig::default(), usage_pct)
    }

    fn make_manager_with(config: MemoryConfig, usage_pct: f64) -> (MemoryManager, Arc<FakeProbe>) {
        let probe = Arc::new(FakeProbe {
            rss_mb: Mutex::new(usage_pct * 10.0),
        });
        let manager = MemoryManager::with_probe(config, probe.clone());
        (manager, probe)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&MemoryStats) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &MemoryStats| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_batch_size_steps() {
        let config = MemoryConfig::default();
        assert_eq!(batch_size_for_usage(&config, 10.0, 20), 20);
        assert_eq!(batch_size_for_usage(&config, 10.0, 500), 100);
        assert_eq!(batch_size_for_usage(&config, 80.0, 20), 15);
        assert_eq!(batch_size_for_usage(&config, 90.0, 20), 10);
        assert_eq!(batch_size_for_usage(&config, 97.0, 20), 5);
        assert_eq!(batch_size_for_usage(&config, 90.0, 6), 5);
        assert_eq!(batch_size_for_usage(&config, 10.0, 1), 5);
    }

    #[test]
    fn test_manager_batch_size_uses_fresh_sample() {
        let (manager, probe) = make_manager(10.0);
        assert_eq!(manager.calculate_optimal_batch_size(40), 40);
        probe.set_usage_pct(88.0);
        assert_eq!(manager.calculate_optimal_batch_size(40), 20);
        assert_eq!(manager.default_batch_size(), 10);
    }

    #[test]
    fn test_throttle_and_critical_are_consistent() {
        let (manager, probe) = make_manager(50.0);
        assert!(!manager.should_throttle());
        assert!(!manager.is_memory_critical());
        probe.set_usage_pct(85.0);
        assert!(manager.should_throttle());
        assert!(!manager.is_memory_critical());
        probe.set_usage_pct(95.0);
        assert!(manager.should_throttle());
        assert!(manager.is_memory_critical());
    }

    #[test]
    fn test_only_highest_tier_fires() {
        let (manager, probe) = make_manager(10.0);
        let (warnings, on_warning) = counter();
        let (throttles, on_throttle) = counter();
        let (criticals, on_critical) = counter();
        manager.add_warning_callback(on_warning);
        manager.add_throttle_callback(on_throttle);
        manager.add_critical_callback(on_critical);

        assert_eq!(manager.check_now(), PressureTier::Normal);
        probe.set_usage_pct(80.0);
        assert_eq!(manager.check_now(), PressureTier::Warning);
        probe.set_usage_pct(90.0);
        assert_eq!(manager.check_now(), PressureTier::Throttle);
        probe.set_usage_pct(99.0);
        assert_eq!(manager.check_now(), PressureTier::Critical);

        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(throttles.load(Ordering::SeqCst), 1);
        assert_eq!(criticals.load(Ordering::SeqCst), 1);
        let stats = manager.current_stats();
        assert_eq!(stats.memory_warnings, 2);
        assert_eq!(stats.throttling_events, 1);
        assert_eq!(stats.peak_memory_mb, 990.0);
    }

    #[test]
    fn test_callback_may_query_manager() {
        let (manager, _probe) = make_manager(99.0);
        let manager = Arc::new(manager);
        let seen = Arc::new(AtomicUsize::new(0));
        let (inner_manager, inner_seen) = (Arc::downgrade(&manager), seen.clone());
        manager.add_critical_callback(move |_| {
            if let Some(m) = inner_manager.upgrade() {
                inner_seen.store(m.calculate_optimal_batch_size(20), Ordering::SeqCst);
            }
        });
        manager.check_now();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_reclaim_triggers_on_growth_only() {
        let (manager, probe) = make_manager(10.0);
        let hooks = Arc::new(AtomicUsize::new(0));
        let inner = hooks.clone();
        manager.add_reclaim_hook(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        // 10% -> 25% of 1000 MB is 150 MB of growth, under the 200 MB default.
        probe.set_usage_pct(25.0);
        manager.check_now();
        assert_eq!(hooks.load(Ordering::SeqCst), 0);

        probe.set_usage_pct(35.0);
        manager.check_now();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(manager.current_stats().gc_collections, 1);

        // Baseline moved to 350 MB.
        probe.set_usage_pct(40.0);
        manager.check_now();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reclaim_disabled() {
        let config = MemoryConfig {
            enable_auto_gc: false,
            ..MemoryConfig::default()
        };
        let (manager, probe) = make_manager_with(config, 0.0);
        probe.set_usage_pct(70.0);
        manager.check_now();
        assert_eq!(manager.current_stats().gc_collections, 0);
        assert_eq!(manager.force_garbage_collection(), 0);
        assert_eq!(manager.current_stats().gc_collections, 1);
    }

    #[test]
    fn test_estimate_and_admission() {
        assert!((estimate_memory_for_files(0, 50) - 100.0).abs() < 1e-9);
        // 1000 files * 50 symbols: (10 + 50) * 1.5 + 100 = 190 MB.
        assert!((estimate_memory_for_files(1000, 50) - 190.0).abs() < 1e-9);

        let (manager, probe) = make_manager(10.0);
        // limit 850 MB; 100 MB current + 190 MB estimate fits.
        assert!(manager.can_process_files(1000, 50));
        probe.set_usage_pct(70.0);
        assert!(!manager.can_process_files(1000, 50));
    }

    #[test]
    fn test_stop_is_idempotent_and_bounded() {
        let config = MemoryConfig {
            monitoring_interval_secs: 0.01,
            ..MemoryConfig::default()
        };
        let (manager, probe) = make_manager_with(config, 80.0);
        let (warnings, on_warning) = counter();
        manager.add_warning_callback(on_warning);
        manager.start_monitoring().unwrap();
        manager.start_monitoring().unwrap();
        assert!(manager.is_monitoring());

        let deadline = Instant::now() + Duration::from_secs(5);
        while warnings.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(warnings.load(Ordering::SeqCst) > 0);

        let started = Instant::now();
        manager.stop();
        manager.stop();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!manager.is_monitoring());

        let after_stop = warnings.load(Ordering::SeqCst);
        probe.set_usage_pct(81.0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(warnings.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_report_recommendations() {
        let (manager, probe) = make_manager(10.0);
        let report = manager.memory_report();
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].starts_with("NORMAL"));
        assert_eq!(report.batch_size_range, (5, 100));
        assert!(!report.monitoring_active);

        probe.set_usage_pct(90.0);
        for _ in 0..6 {
            manager.check_now();
        }
        let report = manager.memory_report();
        assert!(report.recommendations[0].starts_with("HIGH"));
        assert!(report.recommendations.iter().any(|r| r.starts_with("Frequent throttling")));
    }

    #[test]
    fn test_operation_monitor_snapshots_entry() {
        let (manager, probe) = make_manager(10.0);
        {
            let op = manager.monitor_operation("scan");
            probe.set_usage_pct(20.0);
            assert_eq!(op.start_stats().current_memory_mb, 100.0);
        }
        assert_eq!(manager.current_stats().current_memory_mb, 200.0);
    }

    #[test]
    fn test_parse_kb_field() {
        let status = "Name:\tduplo\nVmPeak:\t  2048 kB\nVmRSS:\t  1024 kB\n";
        assert_eq!(parse_kb_field(status, "VmRSS"), Some(1024.0));
        assert_eq!(parse_kb_field(status, "VmSwap"), None);
        let sample = ProcMemoryProbe.sample();
        assert!(sample.system_total_mb > 0.0);
    }

    proptest! {
        #[test]
        fn batch_size_is_clamped_and_non_increasing(
            base in 0usize..400,
            low in 0.0f64..100.0,
            bump in 0.0f64..100.0,
        ) {
            let config = MemoryConfig::default();
            let high = low + bump;
            let at_low = batch_size_for_usage(&config, low, base);
            let at_high = batch_size_for_usage(&config, high, base);
            prop_assert!(at_low >= config.min_batch_size && at_low <= config.max_batch_size);
            prop_assert!(at_high >= config.min_batch_size && at_high <= config.max_batch_size);
            prop_assert!(at_high <= at_low);
        }
    }
}
