//! Media group deduplication
//!
//! Telegram delivers a photo album as several updates sharing a media group
//! id. Only the first one per (user, group) should trigger a generation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{get_media_group_max_entries, get_media_group_ttl};

/// Bounded map of recently seen media groups
#[derive(Debug)]
pub struct MediaGroupDedup {
    seen: Mutex<HashMap<(i64, String), Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for MediaGroupDedup {
    fn default() -> Self {
        Self::new(get_media_group_ttl(), get_media_group_max_entries())
    }
}

impl MediaGroupDedup {
    /// Create a map remembering groups for `ttl`, holding at most `max_entries`.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Record a sighting; `true` only the first time within the TTL.
    pub async fn first_sighting(&self, user_id: i64, group_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;

        let key = (user_id, group_id.to_string());
        if let Some(at) = seen.get(&key) {
            if now.duration_since(*at) < self.ttl {
                return false;
            }
        }

        if seen.len() >= self.max_entries && !seen.contains_key(&key) {
            Self::evict(&mut seen, now, self.ttl);
            if seen.len() >= self.max_entries {
                // Still full: drop the oldest entry
                if let Some(oldest) = seen
                    .iter()
                    .min_by_key(|(_, at)| **at)
                    .map(|(k, _)| k.clone())
                {
                    seen.remove(&oldest);
                }
            }
        }

        seen.insert(key, now);
        true
    }

    /// Remove expired entries; returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut seen = self.seen.lock().await;
        Self::evict(&mut seen, Instant::now(), self.ttl)
    }

    /// Number of remembered groups.
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Whether no group is remembered.
    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }

    fn evict(seen: &mut HashMap<(i64, String), Instant>, now: Instant, ttl: Duration) -> usize {
        let before = seen.len();
        seen.retain(|_, at| now.duration_since(*at) < ttl);
        before - seen.len()
    }

    /// Run [`MediaGroupDedup::sweep`] every `every` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep().await;
                        if removed > 0 {
                            debug!(removed, "Expired media groups swept");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_sighting_only_once_within_ttl() {
        let dedup = MediaGroupDedup::new(Duration::from_secs(60), 16);
        assert!(dedup.first_sighting(1, "album").await);
        assert!(!dedup.first_sighting(1, "album").await);
        assert!(dedup.first_sighting(2, "album").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(dedup.first_sighting(1, "album").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired() {
        let dedup = MediaGroupDedup::new(Duration::from_secs(10), 16);
        dedup.first_sighting(1, "a").await;
        tokio::time::advance(Duration::from_secs(5)).await;
        dedup.first_sighting(1, "b").await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(dedup.sweep().await, 1);
        assert_eq!(dedup.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_is_bounded() {
        let dedup = MediaGroupDedup::new(Duration::from_secs(60), 2);
        dedup.first_sighting(1, "a").await;
        tokio::time::advance(Duration::from_millis(10)).await;
        dedup.first_sighting(1, "b").await;
        tokio::time::advance(Duration::from_millis(10)).await;
        dedup.first_sighting(1, "c").await;

        assert_eq!(dedup.len().await, 2);
        // "a" was the oldest and got evicted
        assert!(dedup.first_sighting(1, "a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let dedup = Arc::new(MediaGroupDedup::new(Duration::from_secs(1), 8));
        dedup.first_sighting(5, "g").await;
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&dedup).spawn_sweeper(Duration::from_secs(2), cancel.clone());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(dedup.is_empty().await);

        cancel.cancel();
        assert!(handle.await.is_ok());
    }
}
