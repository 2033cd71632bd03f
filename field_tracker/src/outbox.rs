//! Best-effort checkpoint persistence.
//!
//! Checkpoints are queued without waiting and stored by a background worker.
//! A failed store is logged and counted, never retried.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use field_trip_lib::checkpoint::NewCheckpoint;
use tokio::{
    sync::{mpsc, oneshot, Notify},
    task::JoinHandle,
};

use crate::{api::TripApi, error::TrackerError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub enqueued: u64,
    pub persisted: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl OutboxStats {
    /// Queued checkpoints not yet stored or failed.
    pub fn pending(&self) -> u64 {
        self.enqueued - self.persisted - self.failed
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    last_failure: Mutex<Option<TrackerError>>,
    settled: Notify,
}

impl Counters {
    fn snapshot(&self) -> OutboxStats {
        // Settled counters first so `pending` never underflows.
        let persisted = self.persisted.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        OutboxStats {
            enqueued: self.enqueued.load(Ordering::Acquire).max(persisted + failed),
            persisted,
            failed,
            dropped: self.dropped.load(Ordering::Acquire),
        }
    }

    fn fail(&self, failure: TrackerError) {
        tracing::warn!("{}", failure);
        *self.last_failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(failure);
        self.failed.fetch_add(1, Ordering::AcqRel);
    }
}

/// The enqueue side of an outbox. Cheap to clone into sample callbacks.
#[derive(Clone)]
pub struct OutboxSender {
    tx: mpsc::Sender<NewCheckpoint>,
    counters: Arc<Counters>,
}

impl OutboxSender {
    /// Queues a checkpoint without waiting. Returns false if it was dropped
    /// because the queue is full or closed.
    pub fn enqueue(&self, checkpoint: NewCheckpoint) -> bool {
        match self.tx.try_send(checkpoint) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::AcqRel);
                true
            },
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::AcqRel);
                tracing::warn!("Dropped checkpoint: {}", e);
                false
            },
        }
    }

    pub fn stats(&self) -> OutboxStats {
        self.counters.snapshot()
    }

    /// The most recent checkpoint that could not be stored.
    pub fn last_failure(&self) -> Option<TrackerError> {
        self.counters.last_failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

pub struct CheckpointOutbox {
    sender: OutboxSender,
    close_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CheckpointOutbox {
    pub fn start(api: Arc<dyn TripApi>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());

        let worker = tokio::spawn(persist_worker(api, rx, close_rx, counters.clone()));

        Self {
            sender: OutboxSender {
                tx,
                counters,
            },
            close_tx: Some(close_tx),
            worker: Some(worker),
        }
    }

    pub fn sender(&self) -> OutboxSender {
        self.sender.clone()
    }

    pub fn enqueue(&self, checkpoint: NewCheckpoint) -> bool {
        self.sender.enqueue(checkpoint)
    }

    pub fn stats(&self) -> OutboxStats {
        self.sender.stats()
    }

    pub fn last_failure(&self) -> Option<TrackerError> {
        self.sender.last_failure()
    }

    /// Waits until everything queued so far is stored or failed, up to `timeout`.
    /// Returns false on timeout.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let counters = &self.sender.counters;
        let target = counters.enqueued.load(Ordering::Acquire);

        let settled = async {
            loop {
                let notified = counters.settled.notified();
                let stats = counters.snapshot();
                if stats.persisted + stats.failed >= target {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, settled).await.is_ok()
    }

    /// Stops accepting checkpoints, stores what is queued and stops the worker.
    pub async fn close(&mut self) -> OutboxStats {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::error!("Checkpoint worker failed: {}", e);
            }
        }
        self.stats()
    }
}

impl Drop for CheckpointOutbox {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn persist_worker(
    api: Arc<dyn TripApi>,
    mut rx: mpsc::Receiver<NewCheckpoint>,
    mut close_rx: oneshot::Receiver<()>,
    counters: Arc<Counters>,
) {
    let mut closing = false;

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(checkpoint) = next else {
                    break;
                };

                match api.append_checkpoint(&checkpoint).await {
                    Ok(stored) => {
                        counters.persisted.fetch_add(1, Ordering::AcqRel);
                        tracing::debug!("Stored checkpoint {} of trip {}", stored.sequence, stored.trip_id);
                    },
                    Err(e) => counters.fail(TrackerError::PersistenceFailure(format!(
                        "Checkpoint for trip {} not stored: {}",
                        checkpoint.trip_id, e
                    ))),
                }
                counters.settled.notify_waiters();
            },
            _ = &mut close_rx, if !closing => {
                // Drain what is already queued, accept nothing new.
                closing = true;
                rx.close();
            },
        }
    }

    tracing::debug!("Checkpoint worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{north_of, MemoryTripApi, GUADELOUPE};
    use field_trip_lib::trip::StartTripRequest;

    fn checkpoint(trip_id: i64, meters: f64) -> NewCheckpoint {
        let position = north_of(GUADELOUPE, meters);
        NewCheckpoint {
            trip_id,
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy: Some(5.0),
            speed: None,
            heading: None,
        }
    }

    #[tokio::test]
    async fn stores_queued_checkpoints_in_order() {
        let api = Arc::new(MemoryTripApi::new(1));
        let trip = api.start_trip(&StartTripRequest::new("prospection", GUADELOUPE)).await.unwrap();

        let mut outbox = CheckpointOutbox::start(api.clone(), 16);
        for i in 0..3 {
            assert!(outbox.enqueue(checkpoint(trip.trip_id, i as f64 * 20.0)));
        }

        let stats = outbox.close().await;
        assert_eq!(stats, OutboxStats { enqueued: 3, persisted: 3, failed: 0, dropped: 0 });

        let stored = api.get_checkpoints(trip.trip_id).await.unwrap();
        let sequences: Vec<i64> = stored.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failures_are_counted_not_retried() {
        let api = Arc::new(MemoryTripApi::new(1));
        let trip = api.start_trip(&StartTripRequest::new("prospection", GUADELOUPE)).await.unwrap();
        api.fail_checkpoints(true);

        let outbox = CheckpointOutbox::start(api.clone(), 16);
        outbox.enqueue(checkpoint(trip.trip_id, 0.0));
        outbox.enqueue(checkpoint(trip.trip_id, 20.0));
        assert!(outbox.flush(Duration::from_secs(5)).await);

        api.fail_checkpoints(false);
        outbox.enqueue(checkpoint(trip.trip_id, 40.0));
        assert!(outbox.flush(Duration::from_secs(5)).await);

        assert_eq!(outbox.stats(), OutboxStats { enqueued: 3, persisted: 1, failed: 2, dropped: 0 });
        assert!(matches!(outbox.last_failure(), Some(TrackerError::PersistenceFailure(msg)) if msg.contains(&trip.trip_id.to_string())));
        assert_eq!(api.get_checkpoints(trip.trip_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let api = Arc::new(MemoryTripApi::new(1));
        let trip = api.start_trip(&StartTripRequest::new("prospection", GUADELOUPE)).await.unwrap();
        api.set_latency(Duration::from_millis(200));

        let mut outbox = CheckpointOutbox::start(api.clone(), 1);
        let accepted = (0..10).filter(|i| outbox.enqueue(checkpoint(trip.trip_id, *i as f64 * 20.0))).count() as u64;

        let stats = outbox.close().await;
        assert!(accepted < 10);
        assert_eq!(stats.enqueued, accepted);
        assert_eq!(stats.dropped, 10 - accepted);
        assert_eq!(stats.persisted, accepted);
    }

    #[tokio::test]
    async fn closed_outbox_rejects_new_checkpoints() {
        let api = Arc::new(MemoryTripApi::new(1));
        let mut outbox = CheckpointOutbox::start(api, 4);
        let sender = outbox.sender();
        outbox.close().await;

        assert!(!sender.enqueue(checkpoint(1, 0.0)));
        assert_eq!(outbox.stats().dropped, 1);
    }
}
