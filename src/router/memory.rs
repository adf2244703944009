//! Idle-session accounting and the background eviction worker.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::Router;
use crate::error::RouterError;

/// Tracks when each model last served a request. Persistent names are
/// still recorded but never reported stale, so the sweeper leaves them
/// loaded no matter how long they idle.
pub(crate) struct UsageTracker {
    last_used: Mutex<HashMap<String, Instant>>,
    persistent: Mutex<HashSet<String>>,
    ttl: Mutex<Duration>,
}

impl UsageTracker {
    pub(crate) fn new(persistent: HashSet<String>, ttl: Duration) -> Self {
        Self {
            last_used: Mutex::new(HashMap::new()),
            persistent: Mutex::new(persistent),
            ttl: Mutex::new(ttl),
        }
    }

    pub(crate) fn touch(&self, name: &str) {
        self.last_used
            .lock()
            .expect("usage mutex poisoned")
            .insert(name.to_string(), Instant::now());
    }

    pub(crate) fn forget(&self, name: &str) {
        self.last_used
            .lock()
            .expect("usage mutex poisoned")
            .remove(name);
    }

    pub(crate) fn set_persistent(&self, name: &str, persistent: bool) {
        let mut set = self.persistent.lock().expect("persistent mutex poisoned");
        if persistent {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub(crate) fn set_ttl(&self, ttl: Duration) {
        *self.ttl.lock().expect("ttl mutex poisoned") = ttl;
    }

    /// Whether one name currently meets the eviction criteria. The sweep
    /// re-asks this right before teardown: a dispatch can refresh the
    /// timestamp after the staleness snapshot was taken.
    pub(crate) fn is_stale(&self, name: &str) -> bool {
        let ttl = *self.ttl.lock().expect("ttl mutex poisoned");
        if self
            .persistent
            .lock()
            .expect("persistent mutex poisoned")
            .contains(name)
        {
            return false;
        }
        self.last_used
            .lock()
            .expect("usage mutex poisoned")
            .get(name)
            .is_some_and(|at| at.elapsed() >= ttl)
    }

    /// Names whose idle time meets the TTL, persistent names excluded.
    pub(crate) fn stale(&self) -> Vec<String> {
        let ttl = *self.ttl.lock().expect("ttl mutex poisoned");
        let persistent = self.persistent.lock().expect("persistent mutex poisoned");
        self.last_used
            .lock()
            .expect("usage mutex poisoned")
            .iter()
            .filter(|(name, at)| !persistent.contains(*name) && at.elapsed() >= ttl)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Sorted (name, idle duration) pairs for every tracked model.
    pub(crate) fn idle_snapshot(&self) -> Vec<(String, Duration)> {
        let mut snapshot: Vec<(String, Duration)> = self
            .last_used
            .lock()
            .expect("usage mutex poisoned")
            .iter()
            .map(|(name, at)| (name.clone(), at.elapsed()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }
}

/// Owns the eviction thread. The thread wakes every `tick`, asks the
/// router to sweep, and exits when the shutdown channel fires or the
/// manager is dropped. Shutdown joins the thread, so no sweep is ever
/// left running against a router that is being torn down.
pub struct MemoryManager {
    shutdown: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl MemoryManager {
    pub fn spawn(router: Arc<Router>, tick: Duration) -> Result<Self, RouterError> {
        let (shutdown, signal) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name("vox_evictor".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => router.sweep(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| RouterError::Config(format!("failed to spawn eviction worker: {}", e)))?;
        info!(tick_ms = tick.as_millis() as u64, "memory manager started");
        Ok(Self {
            shutdown,
            worker: Some(worker),
        })
    }

    /// Signals the worker and waits for it to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.shutdown.send(());
            if worker.join().is_err() {
                warn!("eviction worker panicked before shutdown");
            }
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.stop();
    }
}
