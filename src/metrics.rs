use crate::access::Rejection;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

const REJECTION_KINDS: usize = Rejection::ALL.len();

/// Service counters shared by the control loop and every session.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    ticks: AtomicU64,
    sensor_failures: AtomicU64,
    actuator_failures: AtomicU64,
    reads: AtomicU64,
    writes_accepted: AtomicU64,
    rejections: [AtomicU64; REJECTION_KINDS],
    sessions_opened: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub unknown_field: u64,
    pub read_only_violation: u64,
    pub out_of_range: u64,
    pub invalid_enum: u64,
    pub type_mismatch: u64,
    pub permission_denied: u64,
    pub batch_too_large: u64,
}

impl RejectionCounts {
    pub fn total(&self) -> u64 {
        self.unknown_field
            + self.read_only_violation
            + self.out_of_range
            + self.invalid_enum
            + self.type_mismatch
            + self.permission_denied
            + self.batch_too_large
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub sensor_failures: u64,
    pub actuator_failures: u64,
    pub reads: u64,
    pub writes_accepted: u64,
    pub writes_rejected: RejectionCounts,
    pub sessions_opened: u64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sensor_failure(&self) {
        self.sensor_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_actuator_failure(&self) {
        self.actuator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reads(&self, count: usize) {
        self.reads.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_writes(&self, count: usize) {
        self.writes_accepted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, rejection: Rejection) {
        self.rejections[rejection.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let rejected = |r: Rejection| self.rejections[r.index()].load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            sensor_failures: self.sensor_failures.load(Ordering::Relaxed),
            actuator_failures: self.actuator_failures.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes_accepted: self.writes_accepted.load(Ordering::Relaxed),
            writes_rejected: RejectionCounts {
                unknown_field: rejected(Rejection::UnknownField),
                read_only_violation: rejected(Rejection::ReadOnlyViolation),
                out_of_range: rejected(Rejection::OutOfRange),
                invalid_enum: rejected(Rejection::InvalidEnum),
                type_mismatch: rejected(Rejection::TypeMismatch),
                permission_denied: rejected(Rejection::PermissionDenied),
                batch_too_large: rejected(Rejection::BatchTooLarge),
            },
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
        }
    }
}
