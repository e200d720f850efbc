use crate::config::BackoffConfig;
use crate::runner::event::Event;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// De-duplicating queue of keys waiting to be reconciled.
///
/// A key is in at most one of `ready`, `delayed` or `in_flight` at a time. A key that's added
/// again while it's in flight is marked dirty instead, and goes back to `ready` as soon as the
/// in-flight reconcile is done, so reconciles of the same key never overlap.
#[derive(Debug)]
pub(crate) struct WorkQueue {
    backoff_config: BackoffConfig,
    ready: VecDeque<Event>,
    queued: HashSet<Event>,
    delayed: BTreeMap<(Instant, u64), Event>,
    delayed_keys: HashMap<Event, (Instant, u64)>,
    in_flight: HashSet<Event>,
    dirty: HashSet<Event>,
    backoffs: HashMap<Event, ExponentialBackoff>,
    seq: u64,
}

impl WorkQueue {
    pub fn new(backoff_config: BackoffConfig) -> WorkQueue {
        WorkQueue {
            backoff_config,
            ready: VecDeque::new(),
            queued: HashSet::new(),
            delayed: BTreeMap::new(),
            delayed_keys: HashMap::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            backoffs: HashMap::new(),
            seq: 0,
        }
    }

    /// Queues the key to be reconciled as soon as possible. Returns false if nothing changed
    /// because the key is already waiting.
    pub fn add(&mut self, event: Event) -> bool {
        if self.in_flight.contains(&event) {
            return self.dirty.insert(event);
        }
        if self.queued.contains(&event) {
            return false;
        }
        // a new event wins over a pending retry or resync
        if let Some(at) = self.delayed_keys.remove(&event) {
            self.delayed.remove(&at);
        }
        self.queued.insert(event.clone());
        self.ready.push_back(event);
        true
    }

    /// Queues the key to be reconciled after `delay`, unless it's already waiting to be
    /// reconciled sooner
    pub fn add_after(&mut self, event: Event, delay: Duration) {
        if self.in_flight.contains(&event) || self.queued.contains(&event) {
            return;
        }
        let when = Instant::now() + delay;
        if let Some(existing) = self.delayed_keys.get(&event) {
            if existing.0 <= when {
                return;
            }
            let existing = *existing;
            self.delayed.remove(&existing);
        }
        self.seq += 1;
        let at = (when, self.seq);
        self.delayed.insert(at, event.clone());
        self.delayed_keys.insert(event, at);
    }

    /// Schedules a retry of a failed key using its backoff, and returns the delay
    pub fn retry(&mut self, event: Event) -> Duration {
        let config = &self.backoff_config;
        let delay = self
            .backoffs
            .entry(event.clone())
            .or_insert_with(|| config.new_backoff())
            .next_backoff()
            .unwrap_or(config.max_interval);
        self.add_after(event, delay);
        delay
    }

    /// Resets the backoff for the key, typically after it was reconciled successfully
    pub fn forget(&mut self, event: &Event) {
        self.backoffs.remove(event);
    }

    /// Returns the next key that's ready to be reconciled, and marks it as in flight
    pub fn pop(&mut self, now: Instant) -> Option<Event> {
        self.promote_due(now);
        let event = self.ready.pop_front()?;
        self.queued.remove(&event);
        self.in_flight.insert(event.clone());
        Some(event)
    }

    /// Marks the in-flight key as finished. If it was added again while in flight, then it's
    /// made ready again and this returns true.
    pub fn done(&mut self, event: &Event) -> bool {
        self.in_flight.remove(event);
        if self.dirty.remove(event) {
            self.add(event.clone())
        } else {
            false
        }
    }

    /// Drops every delayed retry and resync. Returns how many there were.
    pub fn clear_delayed(&mut self) -> usize {
        let count = self.delayed.len();
        self.delayed.clear();
        self.delayed_keys.clear();
        count
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.keys().next().map(|(when, _)| *when)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of keys waiting, whether ready or delayed
    pub fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    /// True when nothing is ready or in flight. Delayed keys are not considered.
    pub fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }

    fn promote_due(&mut self, now: Instant) {
        loop {
            let at = match self.delayed.keys().next() {
                Some(at) if at.0 <= now => *at,
                _ => break,
            };
            if let Some(event) = self.delayed.remove(&at) {
                self.delayed_keys.remove(&event);
                self.queued.insert(event.clone());
                self.ready.push_back(event);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::k8s_types::core::v1::Namespace;
    use crate::resource::ResourceKey;

    fn event(name: &str) -> Event {
        Event::new(Namespace, ResourceKey::cluster_scoped(name))
    }

    fn queue() -> WorkQueue {
        WorkQueue::new(BackoffConfig::fixed_interval(Duration::from_millis(100)))
    }

    #[test]
    fn duplicate_keys_are_queued_once() {
        let mut queue = queue();
        assert!(queue.add(event("a")));
        assert!(!queue.add(event("a")));
        assert!(queue.add(event("b")));

        let now = Instant::now();
        assert_eq!(Some(event("a")), queue.pop(now));
        assert_eq!(Some(event("b")), queue.pop(now));
        assert_eq!(None, queue.pop(now));
    }

    #[test]
    fn key_added_while_in_flight_is_requeued_when_done() {
        let mut queue = queue();
        queue.add(event("a"));
        let now = Instant::now();
        let in_flight = queue.pop(now).unwrap();

        assert!(queue.add(event("a")));
        assert!(!queue.add(event("a")));
        // never handed out concurrently
        assert_eq!(None, queue.pop(now));

        assert!(queue.done(&in_flight));
        assert_eq!(Some(event("a")), queue.pop(now));
        assert!(!queue.done(&event("a")));
        assert!(queue.is_drained());
    }

    #[test]
    fn retries_wait_for_their_backoff() {
        let mut queue = queue();
        let start = Instant::now();
        queue.add(event("a"));
        let e = queue.pop(start).unwrap();
        queue.done(&e);

        let delay = queue.retry(e);

        assert_eq!(Duration::from_millis(100), delay);
        assert_eq!(None, queue.pop(start));
        assert!(queue.next_deadline().is_some());
        assert_eq!(Some(event("a")), queue.pop(start + Duration::from_secs(1)));
    }

    #[test]
    fn new_event_overrides_pending_retry() {
        let mut queue = queue();
        queue.retry(event("a"));
        assert_eq!(1, queue.len());

        queue.add(event("a"));

        assert_eq!(1, queue.len());
        assert_eq!(None, queue.next_deadline());
        assert_eq!(Some(event("a")), queue.pop(Instant::now()));
    }

    #[test]
    fn backoff_grows_until_forgotten() {
        let mut queue = WorkQueue::new(BackoffConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            randomization_factor: 0.0,
        });
        let first = queue.retry(event("a"));
        queue.clear_delayed();
        let second = queue.retry(event("a"));
        queue.clear_delayed();
        assert!(second > first, "expected {:?} > {:?}", second, first);

        queue.forget(&event("a"));
        assert_eq!(first, queue.retry(event("a")));
    }

    #[test]
    fn earlier_delay_wins() {
        let mut queue = queue();
        let start = Instant::now();
        queue.add_after(event("a"), Duration::from_secs(60));
        queue.add_after(event("a"), Duration::from_millis(10));
        queue.add_after(event("a"), Duration::from_secs(30));

        assert_eq!(1, queue.len());
        assert_eq!(Some(event("a")), queue.pop(start + Duration::from_secs(1)));
    }
}
