//! Event-writer task (spec §5): the single consumer of the Event Queue.
//! Drains admitted [`WireEvent`]s, runs each through the handler chain, and
//! sleeps 1 s when the queue is empty rather than blocking indefinitely.
//!
//! A shutdown is only observed between drains, never mid-batch — spec §5:
//! "a shutdown must not interrupt a transaction" — so the per-item loop in
//! [`drain_once`] always runs to completion once started.

use std::sync::Arc;
use std::time::Duration;

use ignite_handlers::{HandlerChain, StagedEvent};
use ignite_queue::EventQueue;
use ignite_types::WireEvent;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::warn;

const DRAIN_BATCH: usize = 64;
const EMPTY_QUEUE_SLEEP: Duration = Duration::from_secs(1);

fn wire_to_staged(wire: WireEvent) -> StagedEvent {
    StagedEvent {
        event_id: wire.event_id,
        timestamp_ms: wire.timestamp_ms,
        timezone_ms: wire.timezone_ms,
        app_id: wire.app_id,
        topic: wire.topic,
        payload: wire.payload,
        has_attach: wire.has_attach,
        is_alert: wire.is_alert,
        priority: wire.priority,
        attachment_failure_reason: None,
    }
}

/// Run the writer loop until `shutdown` fires, then drain whatever remains
/// in the queue once more before returning — the coordinator's grace
/// period exists so this final drain has time to finish.
pub async fn run(queue: Arc<EventQueue>, mut chain: HandlerChain, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let drained = drain_once(&queue, &mut chain).await;
        if drained {
            continue;
        }
        tokio::select! {
            _ = shutdown.recv() => {
                drain_once(&queue, &mut chain).await;
                return;
            }
            _ = sleep(EMPTY_QUEUE_SLEEP) => {}
        }
    }
}

/// Drain and process one batch. Returns `true` if anything was drained, so
/// the caller can keep draining without sleeping while the queue is busy.
async fn drain_once(queue: &EventQueue, chain: &mut HandlerChain) -> bool {
    let items = queue.drain(DRAIN_BATCH).await;
    if items.is_empty() {
        return false;
    }
    for item in items {
        match serde_json::from_slice::<WireEvent>(&item.bytes) {
            Ok(wire) => {
                chain.process(wire_to_staged(wire)).await;
            }
            Err(e) => warn!(error = %e, "dropping malformed queued event"),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ignite_handlers::{Handler, HandlerOutcome};
    use ignite_queue::QueuedEvent;
    use ignite_types::EventName;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingStage {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for CountingStage {
        async fn admit(&mut self, _event: ignite_handlers::StagedEvent) -> HandlerOutcome {
            self.count.fetch_add(1, Ordering::SeqCst);
            HandlerOutcome::Written
        }
    }

    fn wire(event_id: &str) -> WireEvent {
        WireEvent {
            event_id: EventName(event_id.to_string()),
            timestamp_ms: 1,
            timezone_ms: 0,
            app_id: "app".into(),
            topic: "topic".into(),
            payload: vec![],
            has_attach: false,
            is_alert: false,
            priority: 0,
        }
    }

    fn encoder(_: &ignite_queue::OverflowSummary) -> Vec<u8> {
        Vec::new()
    }

    #[tokio::test]
    async fn drain_once_processes_every_admitted_item() {
        let queue = EventQueue::new(1_000_000, 1_000, encoder);
        for i in 0..3 {
            queue
                .enqueue(QueuedEvent {
                    bytes: serde_json::to_vec(&wire(&format!("e{i}"))).unwrap(),
                    timestamp_ms: i,
                })
                .await;
        }
        let count = Arc::new(AtomicUsize::new(0));
        let mut chain = HandlerChain::new(vec![Box::new(CountingStage { count: count.clone() })]);

        assert!(drain_once(&queue, &mut chain).await);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!drain_once(&queue, &mut chain).await);
    }

    #[tokio::test]
    async fn drain_once_drops_malformed_bytes_without_panicking() {
        let queue = EventQueue::new(1_000_000, 1_000, encoder);
        queue
            .enqueue(QueuedEvent {
                bytes: b"not json".to_vec(),
                timestamp_ms: 1,
            })
            .await;
        let count = Arc::new(AtomicUsize::new(0));
        let mut chain = HandlerChain::new(vec![Box::new(CountingStage { count: count.clone() })]);

        assert!(drain_once(&queue, &mut chain).await);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_exits_after_shutdown_with_final_drain() {
        let queue = Arc::new(EventQueue::new(1_000_000, 1_000, encoder));
        queue
            .enqueue(QueuedEvent {
                bytes: serde_json::to_vec(&wire("e0")).unwrap(),
                timestamp_ms: 1,
            })
            .await;
        let count = Arc::new(AtomicUsize::new(0));
        let chain = HandlerChain::new(vec![Box::new(CountingStage { count: count.clone() })]);
        let (tx, rx) = broadcast::channel(1);

        tx.send(()).unwrap();
        run(queue, chain, rx).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
