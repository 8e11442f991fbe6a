//! Per-client FIFO lanes for hook invocations.
//!
//! Each client with queued or running hooks owns one lane: an unbounded
//! queue drained by a dedicated task, so hooks for the same client reach the
//! plugin in the order the broker fired them. Lanes of different clients run
//! independently.
//!
//! A lane retires itself as soon as its queue is empty. Clients that never
//! disconnect therefore hold no lane between events, and a client that
//! reconnects while its disconnect is still queued lines up behind it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// A queued hook invocation, already wrapped with its timeout handling.
pub(crate) type LaneJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug)]
struct Lane {
    tx: mpsc::UnboundedSender<LaneJob>,
    /// Jobs submitted and not yet finished. Only raised under the map's
    /// shard lock, so a zero seen under that lock is final.
    queued: Arc<AtomicUsize>,
}

/// Registry of live client lanes.
#[derive(Debug, Default)]
pub(crate) struct ClientLanes {
    /// Client ID → the lane serving that client.
    lanes: Arc<DashMap<String, Lane>>,
}

impl ClientLanes {
    /// Creates an empty lane registry.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a job behind every earlier job for the same client.
    pub(crate) fn submit(&self, client_id: &str, job: LaneJob) {
        let mut lane = self
            .lanes
            .entry(client_id.to_string())
            .or_insert_with(|| self.spawn_lane(client_id));

        lane.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(job)) = lane.tx.send(job) {
            // The lane task is gone; start a fresh one for this client.
            *lane = self.spawn_lane(client_id);
            lane.queued.fetch_add(1, Ordering::SeqCst);
            let _ = lane.tx.send(job);
        }
    }

    /// Forgets every lane; queued jobs still run to completion.
    pub(crate) fn retire_all(&self) {
        self.lanes.clear();
    }

    /// Number of clients with queued or running jobs.
    pub(crate) fn len(&self) -> usize {
        self.lanes.len()
    }

    fn spawn_lane(&self, client_id: &str) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<LaneJob>();
        let queued = Arc::new(AtomicUsize::new(0));

        let lanes = self.lanes.clone();
        let counter = queued.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
                if counter.fetch_sub(1, Ordering::SeqCst) != 1 {
                    continue;
                }
                // Removing the entry drops the only sender, which ends the loop.
                let retired = lanes.remove_if(&client_id, |_, lane| {
                    Arc::ptr_eq(&lane.queued, &counter) && lane.queued.load(Ordering::SeqCst) == 0
                });
                if retired.is_some() {
                    debug!(client_id = %client_id, "Client lane retired");
                }
            }
        });

        Lane { tx, queued }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    async fn until_idle(lanes: &ClientLanes) {
        for _ in 0..100 {
            if lanes.len() == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_jobs_for_one_client_run_in_order() {
        let lanes = ClientLanes::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();

        for i in 0..5u64 {
            let seen = seen.clone();
            lanes.submit(
                "c1",
                Box::pin(async move {
                    // Earlier jobs sleep longer; order must still hold.
                    tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                    seen.lock().expect("lock").push(i);
                }),
            );
        }
        lanes.submit(
            "c1",
            Box::pin(async move {
                let _ = done_tx.send(());
            }),
        );

        done_rx.await.expect("lane finished");
        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_idle_lanes_retire_themselves() {
        let lanes = ClientLanes::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        lanes.submit(
            "busy",
            Box::pin(async move {
                let _ = release_rx.await;
            }),
        );
        for client in ["a", "b", "c"] {
            lanes.submit(client, Box::pin(async {}));
        }
        assert_eq!(lanes.len(), 4);

        for _ in 0..100 {
            if lanes.len() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(lanes.len(), 1, "only the client with a running job keeps its lane");

        release_tx.send(()).expect("release");
        until_idle(&lanes).await;
        assert_eq!(lanes.len(), 0);
    }

    #[tokio::test]
    async fn test_retired_client_gets_a_fresh_lane() {
        let lanes = ClientLanes::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for round in 0..3 {
            let (done_tx, done_rx) = oneshot::channel();
            let log = seen.clone();
            lanes.submit(
                "c1",
                Box::pin(async move {
                    log.lock().expect("lock").push(round);
                    let _ = done_tx.send(());
                }),
            );
            done_rx.await.expect("job ran");
            until_idle(&lanes).await;
            assert_eq!(lanes.len(), 0);
        }
        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_retire_all_lets_queued_jobs_finish() {
        let lanes = ClientLanes::new();
        let (done_tx, done_rx) = oneshot::channel();
        lanes.submit(
            "c1",
            Box::pin(async move {
                tokio::task::yield_now().await;
                let _ = done_tx.send(());
            }),
        );

        lanes.retire_all();
        assert_eq!(lanes.len(), 0);
        done_rx.await.expect("queued job still ran");
    }
}
