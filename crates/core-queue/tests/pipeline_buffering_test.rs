//! Integration tests for the queue and batcher working together
//!
//! The batcher's sink plays the part of a flaky transport: rejected batches
//! go back to the queue, the way the connection client handles them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core_queue::{
    BatchRejected, BatchSink, BatcherConfig, BoundedEventQueue, EventBatcher, QueuedEvent,
};

struct FlakySink {
    online: AtomicBool,
    delivered: Mutex<Vec<String>>,
    fallback: Arc<BoundedEventQueue>,
}

impl BatchSink for FlakySink {
    fn send_batch(&self, batch: Vec<QueuedEvent>) -> Result<(), BatchRejected> {
        if self.online.load(Ordering::SeqCst) {
            let mut delivered = self.delivered.lock().unwrap();
            delivered.extend(batch.into_iter().map(QueuedEvent::into_payload));
            Ok(())
        } else {
            let count = batch.len();
            self.fallback.requeue(batch);
            Err(BatchRejected::new(count, "offline"))
        }
    }
}

#[test]
fn test_capacity_invariant_for_many_sizes() {
    for capacity in [1usize, 2, 5, 17] {
        let queue = BoundedEventQueue::new(capacity).unwrap();
        let total = capacity * 3 + 1;

        for i in 0..total {
            queue.enqueue(i.to_string());
        }

        let drained: Vec<usize> = queue
            .dequeue_all()
            .into_iter()
            .map(|e| e.payload().parse().unwrap())
            .collect();

        assert_eq!(drained, ((total - capacity)..total).collect::<Vec<_>>());
        assert_eq!(queue.metrics().total_dropped, (total - capacity) as u64);
    }
}

#[tokio::test]
async fn test_rejected_batches_land_back_in_queue() {
    let queue = Arc::new(BoundedEventQueue::new(100).unwrap());
    let sink = Arc::new(FlakySink {
        online: AtomicBool::new(false),
        delivered: Mutex::new(Vec::new()),
        fallback: Arc::clone(&queue),
    });

    let batcher = EventBatcher::start(
        BatcherConfig {
            max_batch_size: 3,
            flush_timeout: Duration::from_millis(50),
        },
        sink.clone(),
    )
    .unwrap();

    for i in 0..3 {
        batcher.add(format!("e{}", i)).unwrap();
    }
    assert_eq!(queue.size(), 3);
    assert_eq!(batcher.metrics().failed_flushes, 1);

    sink.online.store(true, Ordering::SeqCst);
    batcher.add("e3").unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(*sink.delivered.lock().unwrap(), vec!["e3"]);
    let queued: Vec<String> = queue
        .dequeue_all()
        .into_iter()
        .map(QueuedEvent::into_payload)
        .collect();
    assert_eq!(queued, vec!["e0", "e1", "e2"]);

    batcher.shutdown();
}

#[tokio::test]
async fn test_shutdown_delivers_pending_before_returning() {
    let queue = Arc::new(BoundedEventQueue::new(10).unwrap());
    let sink = Arc::new(FlakySink {
        online: AtomicBool::new(true),
        delivered: Mutex::new(Vec::new()),
        fallback: Arc::clone(&queue),
    });

    let batcher = EventBatcher::start(
        BatcherConfig {
            max_batch_size: 50,
            flush_timeout: Duration::from_secs(60),
        },
        sink.clone(),
    )
    .unwrap();

    batcher.add("pending-1").unwrap();
    batcher.add("pending-2").unwrap();
    batcher.shutdown();

    assert_eq!(
        *sink.delivered.lock().unwrap(),
        vec!["pending-1", "pending-2"]
    );
    assert!(batcher.add("after").is_err());
}
