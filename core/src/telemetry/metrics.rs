use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Why an input record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Malformed,
    OutOfDomain,
    ImplausibleValue,
    NoUsableModel,
}

/// Point-in-time view of the recorder's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RejectionSummary {
    pub accepted: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
}

impl RejectionSummary {
    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Thread-safe tally of accepted and rejected records, shared by ingestion
/// and the day workers.
pub struct MetricsRecorder {
    inner: Mutex<RejectionSummary>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RejectionSummary::default()),
        }
    }

    /// Each update is a single increment, so a poisoned guard still holds
    /// consistent counts.
    fn lock(&self) -> MutexGuard<'_, RejectionSummary> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::warn!("metrics lock poisoned by a panicked worker; keeping its counts");
            poisoned.into_inner()
        })
    }

    pub fn record_accepted(&self) {
        self.lock().accepted += 1;
    }

    pub fn record_rejected(&self, reason: RejectReason) {
        self.record_rejected_n(reason, 1);
    }

    pub fn record_rejected_n(&self, reason: RejectReason, count: usize) {
        if count == 0 {
            return;
        }
        *self.lock().rejected.entry(reason).or_insert(0) += count;
    }

    pub fn snapshot(&self) -> RejectionSummary {
        self.lock().clone()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn recorder_tallies_by_reason() {
        let recorder = MetricsRecorder::new();
        recorder.record_accepted();
        recorder.record_rejected(RejectReason::Malformed);
        recorder.record_rejected_n(RejectReason::OutOfDomain, 3);
        recorder.record_rejected_n(RejectReason::OutOfDomain, 0);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.rejected[&RejectReason::OutOfDomain], 3);
        assert_eq!(snapshot.total_rejected(), 4);
    }

    #[test]
    fn counts_survive_a_panicked_worker() {
        let recorder = Arc::new(MetricsRecorder::new());
        recorder.record_rejected_n(RejectReason::ImplausibleValue, 2);

        let worker = Arc::clone(&recorder);
        let joined = thread::spawn(move || {
            let mut metrics = worker.inner.lock().unwrap();
            metrics.accepted += 5;
            panic!("worker died holding the metrics lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(recorder.inner.is_poisoned());

        recorder.record_accepted();
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.accepted, 6);
        assert_eq!(snapshot.rejected[&RejectReason::ImplausibleValue], 2);
    }
}
