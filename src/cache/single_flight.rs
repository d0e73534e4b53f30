//! Per-key coordination of concurrent misses
//!
//! The first task to miss on a key becomes the leader and runs the fetch.
//! Tasks that miss while it is running become followers and receive the
//! leader's serialized result over a `watch` channel, so a burst of misses
//! costs one fetch even when the store itself is unreachable.
//!
//! The map entry belongs to the leader and is removed when its guard drops.
//! Followers never touch the map, so cancelling one cannot leak an entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Clone)]
enum FlightState {
    Pending,
    /// JSON of the leader's value, `None` if it produced nothing shareable
    Done(Option<Arc<str>>),
}

struct Flight {
    id: u64,
    rx: watch::Receiver<FlightState>,
}

type FlightMap = Arc<StdMutex<HashMap<String, Flight>>>;

/// Map of in-flight fetches keyed by cache key
#[derive(Clone, Default)]
pub struct SingleFlight {
    flights: FlightMap,
    next_id: Arc<AtomicU64>,
}

/// Outcome of joining a key's flight
pub enum Join {
    /// No fetch was running; the caller must fetch and then `complete`
    Leader(FlightGuard),
    /// Another task is fetching; wait for its result
    Follower(FlightWaiter),
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lead the fetch for `key`, or follow the one already running
    pub fn join(&self, key: &str) -> Join {
        let mut flights = lock_map(&self.flights);

        if let Some(flight) = flights.get(key) {
            return Join::Follower(FlightWaiter {
                rx: flight.rx.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(FlightState::Pending);
        flights.insert(key.to_string(), Flight { id, rx });

        Join::Leader(FlightGuard {
            key: key.to_string(),
            id,
            flights: Arc::clone(&self.flights),
            tx,
            completed: false,
        })
    }

    /// Number of keys with a fetch in progress
    pub fn in_flight(&self) -> usize {
        lock_map(&self.flights).len()
    }
}

fn lock_map(flights: &FlightMap) -> MutexGuard<'_, HashMap<String, Flight>> {
    flights.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Leadership of one key's fetch; followers are released on drop
pub struct FlightGuard {
    key: String,
    id: u64,
    flights: FlightMap,
    tx: watch::Sender<FlightState>,
    completed: bool,
}

impl FlightGuard {
    /// Publish the serialized value to every follower and end the flight
    pub fn complete(mut self, json: Option<Arc<str>>) {
        self.tx.send_replace(FlightState::Done(json));
        self.completed = true;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // A leader that errored or was cancelled leaves followers nothing
        if !self.completed {
            self.tx.send_replace(FlightState::Done(None));
        }

        let mut flights = lock_map(&self.flights);
        if flights.get(&self.key).map(|f| f.id) == Some(self.id) {
            flights.remove(&self.key);
        }
    }
}

/// Follower side of a flight
pub struct FlightWaiter {
    rx: watch::Receiver<FlightState>,
}

impl FlightWaiter {
    /// Wait for the leader. `None` when it failed or gave up.
    pub async fn wait(mut self) -> Option<Arc<str>> {
        let state = self
            .rx
            .wait_for(|state| matches!(state, FlightState::Done(_)))
            .await
            .ok()?;

        match &*state {
            FlightState::Done(json) => json.clone(),
            FlightState::Pending => None,
        }
    }
}
