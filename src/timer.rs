//! Cancellable deadlines
//!
//! A keyed deadline queue driven by an injected clock, and a debouncer built
//! on it. Nothing here sleeps: the owner calls `due` with the current time and
//! handles whatever has fired.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Deadline queue with at most one pending deadline per key
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    deadlines: HashMap<K, DateTime<Utc>>,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + Ord> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the deadline for `key`
    pub fn schedule(&mut self, key: K, at: DateTime<Utc>) {
        self.deadlines.insert(key, at);
    }

    /// Cancel a pending deadline; returns whether one existed
    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn deadline(&self, key: &K) -> Option<DateTime<Utc>> {
        self.deadlines.get(key).copied()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// earliest first (ties broken by key)
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<K> {
        let mut fired: Vec<(DateTime<Utc>, K)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, key.clone()))
            .collect();
        fired.sort();

        for (_, key) in &fired {
            self.deadlines.remove(key);
        }
        fired.into_iter().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Keeps the latest value per key and releases it once no newer value has
/// arrived for `delay`
#[derive(Debug, Clone)]
pub struct Debouncer<K, V> {
    delay: Duration,
    timers: TimerQueue<K>,
    latest: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone + Ord, V> Debouncer<K, V> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timers: TimerQueue::new(),
            latest: HashMap::new(),
        }
    }

    /// Replace any pending value for `key` and restart its delay.
    ///
    /// Returns the time at which the value will be released.
    pub fn submit(&mut self, key: K, value: V, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = now + self.delay;
        self.timers.schedule(key.clone(), at);
        self.latest.insert(key, value);
        at
    }

    /// Drop a pending value without releasing it
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.timers.cancel(key);
        self.latest.remove(key)
    }

    /// Release every value whose delay has elapsed, earliest first
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<(K, V)> {
        self.timers
            .due(now)
            .into_iter()
            .filter_map(|key| self.latest.remove(&key).map(|value| (key, value)))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_due_fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        timers.schedule("b", t0() + Duration::seconds(20));
        timers.schedule("a", t0() + Duration::seconds(10));
        timers.schedule("c", t0() + Duration::seconds(60));

        assert_eq!(timers.next_deadline(), Some(t0() + Duration::seconds(10)));
        assert_eq!(timers.due(t0() + Duration::seconds(30)), vec!["a", "b"]);
        assert_eq!(timers.len(), 1);
        assert!(timers.due(t0() + Duration::seconds(30)).is_empty());
    }

    #[test]
    fn test_reschedule_replaces_deadline() {
        let mut timers = TimerQueue::new();
        timers.schedule("idle", t0() + Duration::seconds(30));
        timers.schedule("idle", t0() + Duration::seconds(50));

        assert!(timers.due(t0() + Duration::seconds(40)).is_empty());
        assert_eq!(timers.due(t0() + Duration::seconds(50)), vec!["idle"]);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut timers = TimerQueue::new();
        timers.schedule(7u32, t0());
        assert!(timers.cancel(&7));
        assert!(!timers.cancel(&7));
        assert!(timers.due(t0() + Duration::days(1)).is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn test_debouncer_releases_only_latest_value() {
        let mut debouncer = Debouncer::new(Duration::milliseconds(1000));
        debouncer.submit("conv", 1, t0());
        debouncer.submit("conv", 2, t0() + Duration::milliseconds(400));
        let due = debouncer.submit("conv", 3, t0() + Duration::milliseconds(800));

        assert_eq!(due, t0() + Duration::milliseconds(1800));
        assert!(debouncer.due(t0() + Duration::milliseconds(1500)).is_empty());
        assert_eq!(debouncer.due(due), vec![("conv", 3)]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_debouncer_keys_are_independent() {
        let mut debouncer = Debouncer::new(Duration::seconds(1));
        debouncer.submit("a", "first", t0());
        debouncer.submit("b", "second", t0() + Duration::milliseconds(500));

        assert_eq!(debouncer.len(), 2);
        assert_eq!(debouncer.next_deadline(), Some(t0() + Duration::seconds(1)));
        assert_eq!(debouncer.due(t0() + Duration::seconds(1)), vec![("a", "first")]);
        assert_eq!(debouncer.cancel(&"b"), Some("second"));
        assert!(debouncer.due(t0() + Duration::seconds(5)).is_empty());
    }
}
