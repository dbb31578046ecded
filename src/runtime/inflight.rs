use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Addresses currently being refreshed, with the time each refresh started.
///
/// Presence of an entry is the only signal: no counting, no re-entry. The lock
/// covers a single check-and-set or delete and is never held across I/O.
#[derive(Default)]
pub struct InFlightGuard {
    entries: Mutex<HashMap<String, OffsetDateTime>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `now` for `address` if absent. Returns the start time on record
    /// and whether a refresh was already running.
    pub fn acquire_or_observe(&self, address: &str, now: OffsetDateTime) -> (OffsetDateTime, bool) {
        let mut entries = self.entries.lock();
        if let Some(started) = entries.get(address) {
            return (*started, true);
        }
        entries.insert(address.to_string(), now);
        (now, false)
    }

    pub fn release(&self, address: &str) {
        self.entries.lock().remove(address);
    }

    pub fn started_at(&self, address: &str) -> Option<OffsetDateTime> {
        self.entries.lock().get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires `address` and hands back a ticket that releases it on drop, so
    /// every exit path of a refresh lets go. `Err` carries the running
    /// refresh's start time.
    pub fn try_acquire(
        self: &Arc<Self>,
        address: &str,
        now: OffsetDateTime,
    ) -> Result<InFlightTicket, OffsetDateTime> {
        match self.acquire_or_observe(address, now) {
            (started, true) => Err(started),
            (started, false) => Ok(InFlightTicket {
                guard: self.clone(),
                address: address.to_string(),
                started,
            }),
        }
    }
}

/// Ownership of one address refresh.
pub struct InFlightTicket {
    guard: Arc<InFlightGuard>,
    address: String,
    started: OffsetDateTime,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.guard.release(&self.address);
        let held = OffsetDateTime::now_utc() - self.started;
        tracing::debug!(
            address = %self.address,
            held_ms = held.whole_milliseconds() as i64,
            "in-flight entry released"
        );
    }
}
