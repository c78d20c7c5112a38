//! In-memory progress log for save requests.
//!
//! Clients poll `GET /generate/status` with the request id they attached to
//! a save while the pipeline runs. Each request id maps to an append-only,
//! capped log of `StatusUpdate`s; logs that go idle are evicted by a
//! background sweeper. The hub is plain shared state handed to whoever
//! needs it, so tests can run several hubs side by side.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::models::StatusUpdate;
use crate::util::epoch_ms;

pub struct StatusHub {
    logs: Mutex<HashMap<String, StatusLog>>,
    capacity: usize,
    idle_ttl: Duration,
}

struct StatusLog {
    updates: VecDeque<StatusUpdate>,
    touched: Instant,
}

impl StatusHub {
    pub fn new(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            capacity,
            idle_ttl,
        }
    }

    /// Append an update for a request. Keeps only the most recent
    /// `capacity` entries per request and refreshes the idle clock.
    pub fn publish(&self, request_id: &str, step: &str, message: &str, progress: Option<u8>) {
        let update = StatusUpdate {
            step: step.to_string(),
            message: message.to_string(),
            progress,
            timestamp_ms: epoch_ms(),
        };
        let mut logs = match self.logs.lock() {
            Ok(guard) => guard,
            // A poisoned progress log is not worth failing a build over.
            Err(poisoned) => poisoned.into_inner(),
        };
        let log = logs.entry(request_id.to_string()).or_insert_with(|| StatusLog {
            updates: VecDeque::new(),
            touched: Instant::now(),
        });
        log.updates.push_back(update);
        while log.updates.len() > self.capacity {
            log.updates.pop_front();
        }
        log.touched = Instant::now();
    }

    /// Most recent update for a request, if any. Unknown ids are not an
    /// error on the poll surface.
    pub fn latest(&self, request_id: &str) -> Option<StatusUpdate> {
        let logs = match self.logs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        logs.get(request_id)
            .and_then(|log| log.updates.back().cloned())
    }

    /// Full ordered history for a request, oldest first. Empty for unknown
    /// ids.
    pub fn history(&self, request_id: &str) -> Vec<StatusUpdate> {
        let logs = match self.logs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        logs.get(request_id)
            .map(|log| log.updates.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop logs that have been idle for at least the configured TTL.
    /// Returns the number of evicted request ids.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut logs = match self.logs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = logs.len();
        logs.retain(|_, log| now.duration_since(log.touched) < self.idle_ttl);
        before - logs.len()
    }

    /// Number of request ids currently tracked.
    pub fn tracked_requests(&self) -> usize {
        match self.logs.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Run `evict_idle` on a fixed period until the hub is dropped elsewhere.
pub fn spawn_sweeper(hub: Arc<StatusHub>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = hub.evict_idle();
            if evicted > 0 {
                debug!(evicted, "Evicted idle status logs");
            }
        }
    })
}
