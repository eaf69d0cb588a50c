//! Change-feed collection for the programmed route table.
//!
//! A subscription is opened before the snapshot is taken and buffers every
//! notification. Once the initial diff is known, [`ChangeFeedCollector::drain`]
//! collects whatever arrived during a short fixed window so routes that are
//! merely in flight are not reported.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::types::{ChangeEvent, ChangeOp, RouteKey};

/// A live stream of programmed-route change notifications
#[async_trait]
pub trait ChangeFeed: Send {
    /// Waits for the next event; `None` once the feed is closed.
    ///
    /// Must be cancel-safe: the collector drops this future at the deadline.
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>>;
}

/// Route keys seen added and removed during a drain window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainedChanges {
    pub adds: BTreeSet<RouteKey>,
    pub removes: BTreeSet<RouteKey>,
}

impl DrainedChanges {
    fn record(&mut self, event: ChangeEvent) {
        match event.op {
            ChangeOp::Add => self.adds.insert(event.key),
            ChangeOp::Remove => self.removes.insert(event.key),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}

/// Buffers a subscription until the reconciler asks for the window's events
pub struct ChangeFeedCollector {
    feed: Box<dyn ChangeFeed>,
}

impl ChangeFeedCollector {
    pub fn new(feed: Box<dyn ChangeFeed>) -> Self {
        Self { feed }
    }

    /// Collects notifications until `window` has elapsed.
    ///
    /// Never blocks past `now + window`; returns early only if the feed closes.
    #[instrument(skip(self))]
    pub async fn drain(&mut self, window: Duration) -> Result<DrainedChanges> {
        let deadline = Instant::now() + window;
        let mut drained = DrainedChanges::default();

        while Instant::now() < deadline {
            match tokio::time::timeout_at(deadline, self.feed.next_event()).await {
                Err(_elapsed) => break,
                Ok(Ok(Some(event))) => {
                    debug!(op = %event.op, key = %event.key, "Change notification");
                    drained.record(event);
                }
                Ok(Ok(None)) => {
                    debug!("Change feed closed before window elapsed");
                    break;
                }
                Ok(Err(e)) => return Err(e),
            }
        }

        debug!(
            adds = drained.adds.len(),
            removes = drained.removes.len(),
            "Drained change feed"
        );
        Ok(drained)
    }
}

/// Channel-backed feed, used by the in-memory store and tests
pub struct ChannelChangeFeed {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChannelChangeFeed {
    /// Creates an open feed and the sender that publishes into it.
    pub fn channel() -> (mpsc::UnboundedSender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Creates a feed that yields `events` and then reports closed.
    pub fn closed_with(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        let (tx, feed) = Self::channel();
        for event in events {
            // The receiver is alive in `feed`, so the send cannot fail.
            let _ = tx.send(event);
        }
        feed
    }
}

#[async_trait]
impl ChangeFeed for ChannelChangeFeed {
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> RouteKey {
        RouteKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_drain_collects_adds_and_removes() {
        let feed = ChannelChangeFeed::closed_with([
            ChangeEvent::add(key("10.0.0.0/24")),
            ChangeEvent::remove(key("20.0.0.0/24")),
            ChangeEvent::add(key("10.0.1.0/24")),
        ]);
        let mut collector = ChangeFeedCollector::new(Box::new(feed));

        let drained = collector.drain(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            drained.adds,
            BTreeSet::from([key("10.0.0.0/24"), key("10.0.1.0/24")])
        );
        assert_eq!(drained.removes, BTreeSet::from([key("20.0.0.0/24")]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stops_at_deadline_without_events() {
        let (_tx, feed) = ChannelChangeFeed::channel();
        let mut collector = ChangeFeedCollector::new(Box::new(feed));

        let start = Instant::now();
        let drained = collector.drain(Duration::from_secs(1)).await.unwrap();

        assert!(drained.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_credits_late_event_inside_window() {
        let (tx, feed) = ChannelChangeFeed::channel();
        let mut collector = ChangeFeedCollector::new(Box::new(feed));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            let _ = tx.send(ChangeEvent::add(RouteKey::parse("10.0.0.0/24").unwrap()));
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(ChangeEvent::add(RouteKey::parse("10.9.0.0/24").unwrap()));
        });

        let drained = collector.drain(Duration::from_secs(1)).await.unwrap();
        assert_eq!(drained.adds, BTreeSet::from([key("10.0.0.0/24")]));
    }

    #[tokio::test]
    async fn test_zero_window_returns_immediately() {
        let feed = ChannelChangeFeed::closed_with([ChangeEvent::add(key("10.0.0.0/24"))]);
        let mut collector = ChangeFeedCollector::new(Box::new(feed));

        let drained = collector.drain(Duration::ZERO).await.unwrap();
        assert!(drained.is_empty());
    }
}
