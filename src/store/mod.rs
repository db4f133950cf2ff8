use crate::models::MeterData;
use log::{error, warn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source for the staleness check, injectable so tests can advance
/// time without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// What to do when no measurement arrived within the timeout window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Stale data is unsafe to publish; stop the whole process.
    Terminate,
    /// Keep running and publish the all-zero record.
    Degrade,
}

struct StoreInner {
    data: MeterData,
    last_update: Instant,
}

/// Single point of truth between the ingest loop (writer) and the
/// publishing loop (reader). One mutex covers both the record and its
/// update timestamp, so a reader can never observe a half-written pair.
/// Staleness is checked lazily on read; there is no background timer.
pub struct MeterStore {
    inner: Mutex<StoreInner>,
    timeout: Duration,
    policy: TimeoutPolicy,
    clock: Arc<dyn Clock>,
}

impl MeterStore {
    pub fn new(timeout: Duration, policy: TimeoutPolicy) -> Self {
        Self::with_clock(timeout, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(timeout: Duration, policy: TimeoutPolicy, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        MeterStore {
            inner: Mutex::new(StoreInner {
                data: MeterData::default(),
                last_update: now,
            }),
            timeout,
            policy,
            clock,
        }
    }

    /// Run a mapping step against the live record under the lock. The
    /// update time is stamped only when the closure reports that it
    /// processed a reading.
    pub fn apply<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut MeterData) -> bool,
    {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let updated = f(&mut inner.data);
        if updated {
            inner.last_update = self.clock.now();
        }
        updated
    }

    /// Replace the record wholesale and stamp the update time.
    pub fn write(&self, data: MeterData) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.data = data;
        inner.last_update = self.clock.now();
    }

    /// Current measurement snapshot.
    ///
    /// When the last update is older than the timeout the record is reset
    /// to the all-zero sentinel in a single step and the configured policy
    /// decides between terminating the process and carrying on. A poisoned
    /// lock yields the zero sentinel for the affected cycle.
    pub fn snapshot(&self) -> MeterData {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Meter store lock poisoned, reporting zeroed data");
                return MeterData::default();
            }
        };

        let elapsed = self.clock.now().saturating_duration_since(inner.last_update);
        if elapsed > self.timeout {
            inner.data = MeterData::default();
            match self.policy {
                TimeoutPolicy::Terminate => {
                    error!("meter data not within time. quit.");
                    std::process::exit(1);
                }
                TimeoutPolicy::Degrade => {
                    error!("meter data not within time. resume.");
                }
            }
        }

        inner.data.clone()
    }
}
