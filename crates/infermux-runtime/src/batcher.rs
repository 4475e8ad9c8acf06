use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use infermux_core::{BatchingConfig, InferError};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::queue::RequestQueue;
use crate::{router, InferRequest};

/// Batching policy, normalized from `BatchingConfig`. Only the largest
/// preferred size matters at run time: it is both the emit trigger and the
/// cut size, and splitting repeats it until the remainder is below it.
#[derive(Clone, Copy, Debug)]
pub struct BatchPolicy {
    pub largest_preferred: usize,
    pub max_batch: usize,
    pub max_delay: Duration,
}

impl BatchPolicy {
    pub fn from_config(config: &BatchingConfig) -> Self {
        let largest_preferred = config
            .preferred_sizes()
            .into_iter()
            .max()
            .unwrap_or(config.max_batch_size);
        Self {
            largest_preferred,
            max_batch: config.max_batch_size,
            max_delay: config.max_queue_delay(),
        }
    }
}

/// A batch ready to run on an executor instance.
#[derive(Debug)]
pub struct Batch {
    pub model: String,
    pub requests: Vec<InferRequest>,
    pub assembled_at: Instant,
    /// The size the assembler was aiming for when it cut this batch.
    pub target_size: usize,
    /// True when the delay window expired before a preferred size was reached.
    pub forced: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// What the assembler should do given the current queue state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchPlan {
    /// Cut a batch of up to `take` requests now.
    Emit { take: usize, forced: bool },
    /// Sleep out the rest of the oldest request's delay window, waking
    /// early on new arrivals.
    Wait { remaining: Duration },
    /// Queue is empty; wait for an arrival.
    Idle,
}

/// Pure batching decision. The delay window is anchored to the oldest
/// queued request; arrivals never restart it.
pub fn plan(available: usize, oldest_age: Option<Duration>, policy: &BatchPolicy) -> BatchPlan {
    if available == 0 {
        return BatchPlan::Idle;
    }
    if available >= policy.largest_preferred {
        return BatchPlan::Emit {
            take: policy.largest_preferred.min(policy.max_batch),
            forced: false,
        };
    }
    let age = oldest_age.unwrap_or_default();
    if age >= policy.max_delay {
        return BatchPlan::Emit {
            take: available.min(policy.max_batch),
            forced: true,
        };
    }
    BatchPlan::Wait {
        remaining: policy.max_delay - age,
    }
}

/// Per-model task that turns the pending queue into dispatchable batches.
pub struct BatchAssembler {
    model: String,
    policy: BatchPolicy,
    queue: Arc<RequestQueue>,
    dispatch_tx: mpsc::Sender<Batch>,
}

impl BatchAssembler {
    pub fn new(
        model: String,
        policy: BatchPolicy,
        queue: Arc<RequestQueue>,
        dispatch_tx: mpsc::Sender<Batch>,
    ) -> Self {
        Self {
            model,
            policy,
            queue,
            dispatch_tx,
        }
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let available = self.queue.len();
            let oldest_age = self.queue.oldest_arrival().map(|t| t.elapsed());

            match plan(available, oldest_age, &self.policy) {
                BatchPlan::Emit { take, forced } => {
                    // A concurrent cancel may have shrunk the queue; whatever
                    // is still there goes out in arrival order.
                    let requests = self.queue.drain(take);
                    if requests.is_empty() {
                        continue;
                    }
                    self.emit(requests, take, forced).await;
                }
                BatchPlan::Wait { remaining } => {
                    tokio::select! {
                        _ = self.queue.wait_arrival() => {}
                        _ = sleep(remaining) => {}
                    }
                }
                BatchPlan::Idle => {
                    if self.queue.is_closed() {
                        break;
                    }
                    self.queue.wait_arrival().await;
                }
            }
        }

        debug!(model = %self.model, "batch assembler stopped");
        Ok(())
    }

    async fn emit(&self, requests: Vec<InferRequest>, target_size: usize, forced: bool) {
        let batch = Batch {
            model: self.model.clone(),
            requests,
            assembled_at: Instant::now(),
            target_size,
            forced,
        };

        if forced {
            debug!(model = %self.model, batch = batch.len(), "delay window expired, flushing undersized batch");
        } else {
            debug!(model = %self.model, batch = batch.len(), target = batch.target_size, "dispatching preferred-size batch");
        }

        // Only fails when the dispatcher is gone, i.e. during teardown.
        if let Err(send_err) = self.dispatch_tx.send(batch).await {
            router::fail_batch(send_err.0, InferError::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(largest_preferred: usize, max_batch: usize, delay_ms: u64) -> BatchPolicy {
        BatchPolicy {
            largest_preferred,
            max_batch,
            max_delay: Duration::from_millis(delay_ms),
        }
    }

    #[test]
    fn emits_largest_preferred_when_enough_are_queued() {
        let p = policy(8, 8, 100);
        assert_eq!(
            plan(8, Some(Duration::ZERO), &p),
            BatchPlan::Emit {
                take: 8,
                forced: false
            }
        );
        // Oversupply is cut to the preferred size; the remainder is a
        // separate planning round.
        assert_eq!(
            plan(10, Some(Duration::ZERO), &p),
            BatchPlan::Emit {
                take: 8,
                forced: false
            }
        );
    }

    #[test]
    fn waits_below_preferred_size_within_window() {
        let p = policy(8, 8, 100);
        assert_eq!(
            plan(3, Some(Duration::from_millis(40)), &p),
            BatchPlan::Wait {
                remaining: Duration::from_millis(60)
            }
        );
    }

    #[test]
    fn forces_flush_once_window_expires() {
        let p = policy(8, 8, 100);
        assert_eq!(
            plan(3, Some(Duration::from_millis(100)), &p),
            BatchPlan::Emit {
                take: 3,
                forced: true
            }
        );
        assert_eq!(
            plan(3, Some(Duration::from_millis(250)), &p),
            BatchPlan::Emit {
                take: 3,
                forced: true
            }
        );
    }

    #[test]
    fn idles_on_empty_queue() {
        let p = policy(4, 8, 100);
        assert_eq!(plan(0, None, &p), BatchPlan::Idle);
    }

    #[test]
    fn policy_from_config_picks_largest_preferred() {
        let config = BatchingConfig {
            preferred_batch_sizes: vec![4, 8],
            max_queue_delay_ms: 100,
            max_batch_size: 8,
        };
        let p = BatchPolicy::from_config(&config);
        assert_eq!(p.largest_preferred, 8);

        let config = BatchingConfig {
            preferred_batch_sizes: vec![],
            max_queue_delay_ms: 100,
            max_batch_size: 6,
        };
        assert_eq!(BatchPolicy::from_config(&config).largest_preferred, 6);
    }
}
