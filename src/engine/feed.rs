// Block feed - ordered block heights from the ledger with scoped unsubscription

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::external::BlockSource;

pub struct BlockFeed {
    source: Arc<dyn BlockSource>,
    stall_threshold: Duration,
}

impl BlockFeed {
    pub fn new(source: Arc<dyn BlockSource>, stall_threshold: Duration) -> Self {
        Self {
            source,
            stall_threshold,
        }
    }

    pub async fn subscribe(&self) -> Result<Subscription, EngineError> {
        let receiver = self
            .source
            .subscribe()
            .await
            .map_err(EngineError::Subscribe)?;
        debug!("Subscribed to block feed");
        Ok(Subscription {
            receiver,
            source: Arc::clone(&self.source),
            stall_threshold: self.stall_threshold,
            last_block: None,
            last_seen: Instant::now(),
            stall_warnings: 0,
            closed: false,
        })
    }
}

/// Live subscription. Dropping it unsubscribes, so every exit path releases the feed.
pub struct Subscription {
    receiver: mpsc::Receiver<u64>,
    source: Arc<dyn BlockSource>,
    stall_threshold: Duration,
    last_block: Option<u64>,
    last_seen: Instant,
    stall_warnings: u32,
    closed: bool,
}

impl Subscription {
    /// Next block height, or `None` once the underlying connection is gone.
    ///
    /// Waits indefinitely; stalls past the threshold are logged, not fatal.
    /// Cancel-safe: dropping the future loses no block.
    pub async fn next(&mut self) -> Option<u64> {
        if self.closed {
            return None;
        }
        loop {
            let deadline = self.last_seen + self.stall_threshold * (self.stall_warnings + 1);
            match timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(block)) => {
                    self.observe(block);
                    return Some(block);
                }
                Ok(None) => {
                    warn!(last_block = ?self.last_block, "Block feed connection dropped");
                    return None;
                }
                Err(_) => {
                    self.stall_warnings += 1;
                    warn!(
                        last_block = ?self.last_block,
                        stalled_secs = (self.stall_threshold * self.stall_warnings).as_secs(),
                        "No new block received, still waiting"
                    );
                }
            }
        }
    }

    fn observe(&mut self, block: u64) {
        if let Some(last) = self.last_block {
            if block > last + 1 {
                warn!(
                    last_block = last,
                    block = block,
                    missed = block - last - 1,
                    "Gap in block feed"
                );
            } else if block <= last {
                warn!(last_block = last, block = block, "Block height did not advance");
            }
        }
        self.last_block = Some(self.last_block.map_or(block, |last| last.max(block)));
        self.last_seen = Instant::now();
        self.stall_warnings = 0;
    }

    pub fn last_block(&self) -> Option<u64> {
        self.last_block
    }

    /// Unsubscribe from the source. Only the first call has an effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.receiver.close();
        self.source.unsubscribe_all();
        debug!(last_block = ?self.last_block, "Unsubscribed from block feed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ChannelSource {
        receiver: Mutex<Option<mpsc::Receiver<u64>>>,
        unsubscribes: AtomicU32,
    }

    impl ChannelSource {
        fn new() -> (Arc<Self>, mpsc::Sender<u64>) {
            let (tx, rx) = mpsc::channel(16);
            let source = Arc::new(Self {
                receiver: Mutex::new(Some(rx)),
                unsubscribes: AtomicU32::new(0),
            });
            (source, tx)
        }
    }

    #[async_trait]
    impl BlockSource for ChannelSource {
        async fn subscribe(&self) -> Result<mpsc::Receiver<u64>, CollaboratorError> {
            self.receiver
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| CollaboratorError::Ledger("already subscribed".to_string()))
        }

        fn unsubscribe_all(&self) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_delivers_blocks_in_order_and_tolerates_gaps() {
        let (source, tx) = ChannelSource::new();
        let feed = BlockFeed::new(source.clone(), Duration::from_secs(60));
        let mut subscription = feed.subscribe().await.unwrap();

        for block in [10, 11, 14] {
            tx.send(block).await.unwrap();
        }
        assert_eq!(subscription.next().await, Some(10));
        assert_eq!(subscription.next().await, Some(11));
        assert_eq!(subscription.next().await, Some(14));
        assert_eq!(subscription.last_block(), Some(14));
    }

    #[tokio::test]
    async fn test_signals_termination_when_connection_drops() {
        let (source, tx) = ChannelSource::new();
        let feed = BlockFeed::new(source.clone(), Duration::from_secs(60));
        let mut subscription = feed.subscribe().await.unwrap();

        tx.send(1).await.unwrap();
        drop(tx);
        assert_eq!(subscription.next().await, Some(1));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_waiting_through_stall() {
        let (source, tx) = ChannelSource::new();
        let feed = BlockFeed::new(source.clone(), Duration::from_secs(5));
        let mut subscription = feed.subscribe().await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            tx.send(7).await.unwrap();
        });

        let started = Instant::now();
        assert_eq!(subscription.next().await, Some(7));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unsubscribes_exactly_once() {
        let (source, _tx) = ChannelSource::new();
        let feed = BlockFeed::new(source.clone(), Duration::from_secs(60));
        let mut subscription = feed.subscribe().await.unwrap();

        subscription.close();
        subscription.close();
        assert_eq!(subscription.next().await, None);
        drop(subscription);

        assert_eq!(source.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let (source, _tx) = ChannelSource::new();
        let feed = BlockFeed::new(source.clone(), Duration::from_secs(60));
        {
            let _subscription = feed.subscribe().await.unwrap();
        }
        assert_eq!(source.unsubscribes.load(Ordering::SeqCst), 1);
    }
}
