//! Unauthorized access flood protection
//!
//! Strangers get "Access denied" at most once per cooldown, so a flood of
//! messages cannot push the bot into Telegram's rate limits.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tracks when each unauthorized user was last answered
#[derive(Clone)]
pub struct UnauthorizedCache {
    // user_id -> (), expiring after the cooldown
    cache: Cache<i64, ()>,
    cooldown: Duration,
    silenced_count: Arc<AtomicU64>,
}

impl UnauthorizedCache {
    /// Create a cache.
    ///
    /// Entries live for `cooldown_secs` (so the user can be answered again
    /// afterwards), capped by `ttl_secs`. At most `max_capacity` users are tracked.
    ///
    /// ```
    /// use oxide_relay_transport_telegram::bot::UnauthorizedCache;
    ///
    /// let cache = UnauthorizedCache::new(1200, 7200, 10_000);
    /// assert_eq!(cache.cooldown().as_secs(), 1200);
    /// ```
    #[must_use]
    pub fn new(cooldown_secs: u64, ttl_secs: u64, max_capacity: u64) -> Self {
        let live_for = Duration::from_secs(cooldown_secs.min(ttl_secs).max(1));
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(live_for)
            .build();

        Self {
            cache,
            cooldown: Duration::from_secs(cooldown_secs),
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether "Access denied" should be sent to this user now.
    ///
    /// Silenced attempts are counted; every 100th is logged.
    pub async fn should_send(&self, user_id: i64, user_name: &str) -> bool {
        if self.cache.get(&user_id).await.is_none() {
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            debug!(
                silenced = count,
                user_id,
                user_name,
                "Unauthorized attempts silenced"
            );
        }
        false
    }

    /// Start the cooldown for a user who was just answered.
    pub async fn mark_sent(&self, user_id: i64) {
        self.cache.insert(user_id, ()).await;
    }

    /// Number of users currently in cooldown.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Total silenced attempts.
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }

    /// Configured cooldown.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cooldown_blocks_second_attempt() {
        let cache = UnauthorizedCache::new(60, 120, 100);

        assert!(cache.should_send(12345, "TestUser").await);
        cache.mark_sent(12345).await;
        assert!(!cache.should_send(12345, "TestUser").await);

        // Other users are unaffected
        assert!(cache.should_send(222, "User2").await);
    }

    #[tokio::test]
    async fn test_silenced_count_increments() {
        let cache = UnauthorizedCache::new(60, 120, 100);
        cache.mark_sent(12345).await;
        for _ in 0..5 {
            cache.should_send(12345, "TestUser").await;
        }
        assert_eq!(cache.silenced_count(), 5);
    }

    #[tokio::test]
    async fn test_entry_count() {
        let cache = UnauthorizedCache::new(60, 120, 100);
        cache.mark_sent(111).await;
        cache.mark_sent(222).await;
        cache.cache.run_pending_tasks().await;
        assert_eq!(cache.entry_count(), 2);
    }
}
