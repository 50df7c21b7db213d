// src/liveness.rs
//
// Offline is inferred from the age of the last ping; nothing is ever pushed
// or removed. Records live for the life of the process.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use crate::slots::Slots;
use crate::types::DeviceId;

#[derive(Debug, Clone, Copy)]
pub struct LivenessRecord {
    pub last_seen: Instant,
    pub last_seen_at: DateTime<Utc>,
}

pub struct LivenessTracker {
    records: Slots<LivenessRecord>,
    window: Duration,
}

impl LivenessTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            records: Slots::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record_ping(&self, device: &DeviceId) {
        let record = LivenessRecord {
            last_seen: Instant::now(),
            last_seen_at: Utc::now(),
        };
        self.records.upsert(device.as_str(), |r| *r = Some(record));
        debug!("{device} is alive");
    }

    pub fn is_online(&self, device: &DeviceId) -> bool {
        self.is_online_within(device, self.window)
    }

    pub fn is_online_within(&self, device: &DeviceId, window: Duration) -> bool {
        self.records
            .with_existing(device.as_str(), |r| fresh(r, window))
            .unwrap_or(false)
    }

    /// Every device ever seen, with its current online state.
    pub fn snapshot(&self) -> Vec<(String, LivenessRecord, bool)> {
        self.records
            .snapshot()
            .into_iter()
            .map(|(id, r)| {
                let online = fresh(&r, self.window);
                (id, r, online)
            })
            .collect()
    }
}

fn fresh(r: &LivenessRecord, window: Duration) -> bool {
    Instant::now().saturating_duration_since(r.last_seen) < window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn never_pinged_is_offline() {
        let t = LivenessTracker::new(Duration::from_secs(10));
        assert!(!t.is_online(&id("ghost")));
        assert!(t.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn online_strictly_inside_window() {
        let t = LivenessTracker::new(Duration::from_secs(10));
        t.record_ping(&id("A"));
        assert!(t.is_online(&id("A")));

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(t.is_online(&id("A")));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!t.is_online(&id("A")));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pings_refresh_the_window() {
        let t = LivenessTracker::new(Duration::from_secs(10));
        t.record_ping(&id("A"));
        tokio::time::advance(Duration::from_secs(8)).await;
        t.record_ping(&id("A"));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(t.is_online(&id("A")));
        assert_eq!(t.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_window_overrides_default() {
        let t = LivenessTracker::new(Duration::from_secs(10));
        t.record_ping(&id("A"));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!t.is_online_within(&id("A"), Duration::from_secs(2)));
        assert!(t.is_online_within(&id("A"), Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_devices_stay_listed_as_offline() {
        let t = LivenessTracker::new(Duration::from_secs(10));
        t.record_ping(&id("A"));
        t.record_ping(&id("B"));
        tokio::time::advance(Duration::from_secs(11)).await;
        t.record_ping(&id("B"));

        let snap = t.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!((snap[0].0.as_str(), snap[0].2), ("A", false));
        assert_eq!((snap[1].0.as_str(), snap[1].2), ("B", true));
    }
}
