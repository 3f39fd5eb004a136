//! Deduplicating, delay-capable work queue with per-key in-flight tracking.
//! Requests for the same key coalesce while pending and are never handed to
//! two workers at once; a key re-added while active is redelivered after the
//! active attempt completes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;

/// One pending unit of reconcile work.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

struct State {
    pending: VecDeque<ReconcileRequest>,
    queued: HashSet<ReconcileRequest>,
    active: HashSet<ReconcileRequest>,
    dirty: HashSet<ReconcileRequest>,
    delayed: Vec<(Instant, ReconcileRequest)>,
    failures: HashMap<ReconcileRequest, u32>,
}

pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::with_backoff(Duration::from_millis(200), Duration::from_secs(60))
    }

    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                queued: HashSet::new(),
                active: HashSet::new(),
                dirty: HashSet::new(),
                delayed: Vec::new(),
                failures: HashMap::new(),
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    pub fn add(&self, req: ReconcileRequest) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.add(req);
        }
        self.notify.notify_waiters();
    }

    pub fn add_after(&self, req: ReconcileRequest, delay: Duration) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.delayed.push((Instant::now() + delay, req));
        }
        self.notify.notify_waiters();
    }

    /// Increment the key's failure count and schedule a retry with
    /// exponential, jittered backoff. Returns the chosen delay.
    pub fn backoff(&self, req: ReconcileRequest) -> Duration {
        let delay = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            let attempts = state.failures.entry(req.clone()).or_insert(0);
            *attempts += 1;
            let exp = (*attempts - 1).min(16);
            let base = self.base_delay.saturating_mul(1u32 << exp);
            let capped = base.min(self.max_delay);
            let jitter_ms = capped.as_millis() as u64 / 10;
            let jitter = if jitter_ms > 0 {
                Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
            } else {
                Duration::ZERO
            };
            let delay = capped + jitter;
            state.delayed.push((Instant::now() + delay, req));
            delay
        };
        self.notify.notify_waiters();
        delay
    }

    /// Clear the key's failure history.
    pub fn forget(&self, req: &ReconcileRequest) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.failures.remove(req);
    }

    /// Mark an in-flight attempt finished. If the key was re-added while
    /// active it goes straight back to pending.
    pub fn done(&self, req: &ReconcileRequest) {
        let readded = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.active.remove(req);
            if state.dirty.remove(req) {
                state.add(req.clone());
                true
            } else {
                false
            }
        };
        if readded {
            self.notify.notify_waiters();
        }
    }

    /// Next request ready for work; marks it in flight.
    pub async fn next(&self) -> ReconcileRequest {
        loop {
            let notified = self.notify.notified();
            let earliest = {
                let mut state = self.state.lock().expect("queue lock poisoned");
                state.promote_due(Instant::now());
                if let Some(req) = state.pending.pop_front() {
                    state.queued.remove(&req);
                    state.active.insert(req.clone());
                    return req;
                }
                state.delayed.iter().map(|(at, _)| *at).min()
            };
            match earliest {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        let state = self.state.lock().expect("queue lock poisoned");
        state.pending.len()
    }
}

impl State {
    fn add(&mut self, req: ReconcileRequest) {
        if self.active.contains(&req) {
            self.dirty.insert(req);
            return;
        }
        if self.queued.insert(req.clone()) {
            self.pending.push_back(req);
        }
    }

    fn promote_due(&mut self, now: Instant) {
        let mut due = Vec::new();
        self.delayed.retain(|(at, req)| {
            if *at <= now {
                due.push(req.clone());
                false
            } else {
                true
            }
        });
        for req in due {
            self.add(req);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str) -> ReconcileRequest {
        ReconcileRequest::new("widget", "default", name)
    }

    #[tokio::test]
    async fn pending_requests_coalesce() {
        let q = WorkQueue::new();
        q.add(req("a"));
        q.add(req("a"));
        q.add(req("a"));
        assert_eq!(q.pending_len(), 1);
        let got = q.next().await;
        assert_eq!(got, req("a"));
        assert_eq!(q.pending_len(), 0);
    }

    #[tokio::test]
    async fn active_key_is_redelivered_after_done() {
        let q = WorkQueue::new();
        q.add(req("a"));
        let got = q.next().await;

        // Re-added while in flight: not pending yet.
        q.add(req("a"));
        assert_eq!(q.pending_len(), 0);

        q.done(&got);
        assert_eq!(q.pending_len(), 1);
        assert_eq!(q.next().await, req("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_requests_surface_after_their_deadline() {
        let q = WorkQueue::new();
        q.add_after(req("a"), Duration::from_secs(2));
        assert_eq!(q.pending_len(), 0);
        // Paused clock auto-advances across the sleep inside next().
        let got = q.next().await;
        assert_eq!(got, req("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_and_forget_resets() {
        let q = WorkQueue::with_backoff(Duration::from_millis(100), Duration::from_secs(60));
        let d1 = q.backoff(req("a"));
        let d2 = q.backoff(req("a"));
        let d3 = q.backoff(req("a"));
        assert!(d2 >= d1);
        assert!(d3 > d1);
        q.forget(&req("a"));
        let d4 = q.backoff(req("a"));
        assert!(d4 <= Duration::from_millis(110));
    }
}
