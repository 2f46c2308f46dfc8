//! In-flight generations per user
//!
//! A user has at most one running generation. Starting a new one cancels the
//! previous token; `/stop` cancels without starting anything. A generation
//! that replaced another waits until the old one has finished persisting, so
//! stored history keeps question and answer pairs together.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies one generation of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug)]
struct Running {
    ticket: Ticket,
    cancel: CancellationToken,
    // Resolves once the generation's `Generation` value is dropped
    done: oneshot::Receiver<()>,
}

/// A started generation. Dropping it tells a successor this one is done.
#[derive(Debug)]
pub struct Generation {
    /// Identifies this generation in [`GenerationRegistry::finish`]
    pub ticket: Ticket,
    /// Fires on `/stop` or when a newer generation starts
    pub cancel: CancellationToken,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl Generation {
    /// Wait until the generation this one replaced is over.
    pub async fn wait_for_previous(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Err means the sender was dropped, which is the signal itself
            let _ = previous.await;
        }
    }
}

/// Registry of running generations keyed by user
#[derive(Debug, Default)]
pub struct GenerationRegistry {
    running: Mutex<HashMap<i64, Running>>,
    next_ticket: Mutex<u64>,
}

impl GenerationRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self) -> Ticket {
        let mut next = self
            .next_ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *next += 1;
        Ticket(*next)
    }

    /// Register a new generation for `user_id`, cancelling the previous one.
    ///
    /// Call it in arrival order: the returned value waits for whatever was
    /// registered before it.
    pub fn begin(&self, user_id: i64) -> Generation {
        let ticket = self.issue();
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        let replaced = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                user_id,
                Running {
                    ticket,
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
        let previous = replaced.map(|old| {
            debug!(user_id, "Superseding running generation");
            old.cancel.cancel();
            old.done
        });

        Generation {
            ticket,
            cancel,
            previous,
            _done: done_tx,
        }
    }

    /// Forget the generation identified by `ticket`, unless it was superseded.
    pub fn finish(&self, user_id: i64, ticket: Ticket) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.get(&user_id).is_some_and(|r| r.ticket == ticket) {
            running.remove(&user_id);
        }
    }

    /// Cancel the running generation of `user_id`. Returns whether one was running.
    ///
    /// The entry stays until the generation finishes, so a following one
    /// still waits for it.
    pub fn cancel(&self, user_id: i64) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.get(&user_id).is_some_and(|r| {
            let was_running = !r.cancel.is_cancelled();
            r.cancel.cancel();
            was_running
        })
    }

    /// Number of generations not yet cancelled.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| !r.cancel.is_cancelled())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_generation_cancels_previous() {
        let registry = GenerationRegistry::new();
        let first = registry.begin(1);
        let second = registry.begin(1);

        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());
        assert_ne!(first.ticket, second.ticket);

        // The superseded turn finishing must not drop the newer one
        registry.finish(1, first.ticket);
        assert_eq!(registry.active_count(), 1);
        registry.finish(1, second.ticket);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_cancel() {
        let registry = GenerationRegistry::new();
        assert!(!registry.cancel(7));

        let stopped = registry.begin(7);
        let other = registry.begin(8);
        assert!(registry.cancel(7));
        assert!(stopped.cancel.is_cancelled());
        assert!(!other.cancel.is_cancelled());
        assert!(!registry.cancel(7));
        assert_eq!(registry.active_count(), 1);

        registry.finish(7, stopped.ticket);
        assert!(!registry.cancel(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successor_waits_until_previous_is_dropped() {
        let registry = GenerationRegistry::new();
        let first = registry.begin(1);
        let mut second = registry.begin(1);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(first);
        });

        let started = tokio::time::Instant::now();
        second.wait_for_previous().await;
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_generation_after_stop_waits_for_stopped_one() {
        let registry = GenerationRegistry::new();
        let stopped = registry.begin(3);
        assert!(registry.cancel(3));

        let mut next = registry.begin(3);
        let waiting = tokio::spawn(async move {
            next.wait_for_previous().await;
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        drop(stopped);
        assert!(waiting.await.is_ok());
    }

    #[tokio::test]
    async fn test_first_generation_does_not_wait() {
        let registry = GenerationRegistry::new();
        let mut only = registry.begin(5);
        only.wait_for_previous().await;
        assert!(!only.cancel.is_cancelled());
    }
}
