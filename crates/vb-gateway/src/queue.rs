//! Bounded batch queue shared by both gateway directions.
//!
//! Readers block until one item is available, then take whatever else is
//! already queued (up to a limit) without waiting. Producers block while
//! the queue is full.

use tokio::sync::mpsc;

/// Reference queue depth.
pub const QUEUE_CAPACITY: usize = 128;

/// Create a queue holding at most `capacity` items.
pub fn batch_queue<T>(capacity: usize) -> (BatchSender<T>, BatchReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BatchSender { tx }, BatchReceiver { rx })
}

/// Producer side. Cloneable.
#[derive(Debug)]
pub struct BatchSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for BatchSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> BatchSender<T> {
    /// Append an item, waiting for room. Fails only when the receiver is gone.
    pub async fn push(&self, item: T) -> Result<(), T> {
        self.tx.send(item).await.map_err(|e| e.0)
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct BatchReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> BatchReceiver<T> {
    /// Wait for the first item, then collect further immediately available
    /// items until the queue is empty or `max_items` is reached.
    ///
    /// The returned batch is never empty and keeps insertion order. `None`
    /// means every sender was dropped and the queue is drained.
    pub async fn drain_batch(&mut self, max_items: usize) -> Option<Vec<T>> {
        let limit = max_items.max(1);
        let mut batch = Vec::with_capacity(limit.min(QUEUE_CAPACITY));
        match self.rx.recv_many(&mut batch, limit).await {
            0 => None,
            _ => Some(batch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn returns_available_items_in_order() {
        let (tx, mut rx) = batch_queue(16);
        for i in 0..5 {
            tx.push(i).await.unwrap();
        }
        assert_eq!(rx.drain_batch(10).await, Some(vec![0, 1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn never_exceeds_max_items() {
        let (tx, mut rx) = batch_queue(16);
        for i in 0..7 {
            tx.push(i).await.unwrap();
        }
        assert_eq!(rx.drain_batch(3).await, Some(vec![0, 1, 2]));
        assert_eq!(rx.drain_batch(3).await, Some(vec![3, 4, 5]));
        assert_eq!(rx.drain_batch(3).await, Some(vec![6]));
    }

    #[tokio::test]
    async fn zero_limit_still_yields_one() {
        let (tx, mut rx) = batch_queue(4);
        tx.push('a').await.unwrap();
        tx.push('b').await.unwrap();
        assert_eq!(rx.drain_batch(0).await, Some(vec!['a']));
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_first_item() {
        let (tx, mut rx) = batch_queue(4);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.push(42).await.unwrap();
            tx
        });
        let start = tokio::time::Instant::now();
        assert_eq!(rx.drain_batch(10).await, Some(vec![42]));
        assert!(start.elapsed() >= Duration::from_millis(50));
        drop(producer.await.unwrap());
    }

    #[tokio::test]
    async fn none_after_senders_dropped() {
        let (tx, mut rx) = batch_queue(4);
        tx.push(1).await.unwrap();
        drop(tx);
        assert_eq!(rx.drain_batch(10).await, Some(vec![1]));
        assert_eq!(rx.drain_batch(10).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_producer() {
        let (tx, mut rx) = batch_queue(2);
        tx.push(1).await.unwrap();
        tx.push(2).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(10), tx.push(3)).await;
        assert!(blocked.is_err(), "push into full queue must wait");

        assert_eq!(rx.drain_batch(10).await, Some(vec![1, 2]));
        tx.push(3).await.unwrap();
        assert_eq!(rx.drain_batch(10).await, Some(vec![3]));
    }
}
