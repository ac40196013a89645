//! Per-phase timing for engines.

use crate::engine::{drive, Engine, SyncOutcome};
use crate::error::SyncResult;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Phases reported first, in this order.
const REPORT_ORDER: [&str; 5] = ["sync", "processIncoming", "uploadOutgoing", "startup", "finish"];

/// Accumulated timings for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseStats {
    /// Number of calls.
    pub calls: u64,
    /// Total time spent.
    pub total: Duration,
    /// Shortest call.
    pub min: Duration,
    /// Longest call.
    pub max: Duration,
}

impl PhaseStats {
    fn record(&mut self, elapsed: Duration) {
        if self.calls == 0 || elapsed < self.min {
            self.min = elapsed;
        }
        self.max = self.max.max(elapsed);
        self.calls += 1;
        self.total += elapsed;
    }

    /// Total time in milliseconds.
    pub fn total_ms(&self) -> f64 {
        self.total.as_secs_f64() * 1000.0
    }

    /// Mean time per call in milliseconds.
    pub fn mean_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms() / self.calls as f64
        }
    }
}

/// Wraps an engine and records how long each phase takes.
///
/// The report is logged at debug level after every sync.
pub struct Timed<E> {
    inner: E,
    stats: BTreeMap<&'static str, PhaseStats>,
}

impl<E: Engine> Timed<E> {
    /// Wraps `inner`.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            stats: BTreeMap::new(),
        }
    }

    /// Returns the wrapped engine.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Returns the wrapped engine mutably.
    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    /// Unwraps the engine.
    pub fn into_inner(self) -> E {
        self.inner
    }

    /// Returns the stats for `phase`, if it ran.
    pub fn stats(&self, phase: &str) -> Option<PhaseStats> {
        self.stats.get(phase).copied()
    }

    /// Formats the totals, main phases first.
    pub fn report(&self) -> String {
        let ordered = REPORT_ORDER
            .iter()
            .filter_map(|phase| self.stats.get_key_value(phase));
        let rest = self
            .stats
            .iter()
            .filter(|(phase, _)| !REPORT_ORDER.contains(*phase));
        let parts: Vec<String> = ordered
            .chain(rest)
            .map(|(phase, stats)| format!("{} {:.1}", phase, stats.total_ms()))
            .collect();
        format!("Total (ms): {}", parts.join(", "))
    }

    fn time<T>(&mut self, phase: &'static str, f: impl FnOnce(&mut E) -> T) -> T {
        let start = Instant::now();
        let result = f(&mut self.inner);
        self.stats.entry(phase).or_default().record(start.elapsed());
        result
    }
}

impl<E: Engine> Engine for Timed<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn enabled(&self) -> SyncResult<bool> {
        self.inner.enabled()
    }

    fn startup(&mut self) -> SyncResult<()> {
        self.time("startup", E::startup)
    }

    fn process_incoming(&mut self) -> SyncResult<()> {
        self.time("processIncoming", E::process_incoming)
    }

    fn upload_outgoing(&mut self) -> SyncResult<()> {
        self.time("uploadOutgoing", E::upload_outgoing)
    }

    fn finish(&mut self) -> SyncResult<()> {
        self.time("finish", E::finish)
    }

    fn cleanup(&mut self) {
        self.time("cleanup", E::cleanup)
    }

    fn outcome(&self) -> SyncOutcome {
        self.inner.outcome()
    }

    fn sync(&mut self) -> SyncResult<SyncOutcome> {
        let start = Instant::now();
        let result = drive(self);
        self.stats.entry("sync").or_default().record(start.elapsed());
        debug!(engine = %self.inner.name(), "{}", self.report());
        result
    }

    fn can_decrypt(&self) -> bool {
        self.inner.can_decrypt()
    }

    fn reset_client(&mut self) -> SyncResult<()> {
        self.time("resetClient", E::reset_client)
    }

    fn wipe_client(&mut self) -> SyncResult<()> {
        self.time("wipeClient", E::wipe_client)
    }

    fn wipe_server(&mut self) -> SyncResult<()> {
        self.time("wipeServer", E::wipe_server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        fail_upload: bool,
    }

    impl Engine for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn enabled(&self) -> SyncResult<bool> {
            Ok(true)
        }
        fn startup(&mut self) -> SyncResult<()> {
            self.calls.push("startup");
            Ok(())
        }
        fn process_incoming(&mut self) -> SyncResult<()> {
            self.calls.push("processIncoming");
            Ok(())
        }
        fn upload_outgoing(&mut self) -> SyncResult<()> {
            self.calls.push("uploadOutgoing");
            if self.fail_upload {
                return Err(SyncError::transport_fatal("boom"));
            }
            Ok(())
        }
        fn finish(&mut self) -> SyncResult<()> {
            self.calls.push("finish");
            Ok(())
        }
        fn cleanup(&mut self) {
            self.calls.push("cleanup");
        }
        fn outcome(&self) -> SyncOutcome {
            SyncOutcome::default()
        }
        fn can_decrypt(&self) -> bool {
            true
        }
        fn reset_client(&mut self) -> SyncResult<()> {
            Ok(())
        }
        fn wipe_client(&mut self) -> SyncResult<()> {
            Ok(())
        }
        fn wipe_server(&mut self) -> SyncResult<()> {
            Ok(())
        }
    }

    #[test]
    fn phases_run_in_order() {
        let mut engine = Timed::new(Recorder::default());
        engine.sync().unwrap();
        assert_eq!(
            engine.inner().calls,
            ["startup", "processIncoming", "uploadOutgoing", "finish", "cleanup"]
        );
        assert_eq!(engine.stats("sync").unwrap().calls, 1);
        assert_eq!(engine.stats("finish").unwrap().calls, 1);
    }

    #[test]
    fn stats_track_extremes() {
        let mut stats = PhaseStats::default();
        stats.record(Duration::from_millis(5));
        stats.record(Duration::from_millis(2));
        stats.record(Duration::from_millis(8));
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.min, Duration::from_millis(2));
        assert_eq!(stats.max, Duration::from_millis(8));
        assert_eq!(stats.total, Duration::from_millis(15));
        assert!((stats.mean_ms() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn cleanup_runs_after_failure() {
        let mut engine = Timed::new(Recorder {
            fail_upload: true,
            ..Default::default()
        });
        assert!(engine.sync().is_err());
        assert_eq!(
            engine.inner().calls,
            ["startup", "processIncoming", "uploadOutgoing", "cleanup"]
        );
        assert!(engine.stats("finish").is_none());
    }

    #[test]
    fn report_lists_main_phases_first() {
        let mut engine = Timed::new(Recorder::default());
        engine.sync().unwrap();
        let report = engine.report();
        assert!(report.starts_with("Total (ms): sync "));
        let finish = report.find("finish").unwrap();
        let cleanup = report.find("cleanup").unwrap();
        assert!(finish < cleanup);
    }
}
