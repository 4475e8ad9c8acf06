use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use infermux_core::{BackendExecutor, InferError, RequestInputs};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::{router, Batch};

/// One backend instance; runs one batch at a time.
pub struct ExecutorSlot {
    pub instance_id: u32,
    executor: Box<dyn BackendExecutor>,
}

/// Bounded pool of executor slots for one model. The permit count always
/// matches the free-list length, so concurrent acquire/release cannot
/// oversubscribe the configured instance count.
pub struct SlotPool {
    free: Mutex<Vec<ExecutorSlot>>,
    permits: Arc<Semaphore>,
    total: usize,
}

impl SlotPool {
    pub fn new(executors: Vec<Box<dyn BackendExecutor>>) -> Arc<Self> {
        let slots: Vec<ExecutorSlot> = executors
            .into_iter()
            .enumerate()
            .map(|(i, executor)| ExecutorSlot {
                instance_id: i as u32,
                executor,
            })
            .collect();
        let total = slots.len();
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(total)),
            free: Mutex::new(slots),
            total,
        })
    }

    /// Suspends until an instance is free.
    pub async fn acquire(pool: &Arc<SlotPool>) -> Result<SlotLease> {
        let permit = Arc::clone(&pool.permits)
            .acquire_owned()
            .await
            .context("slot pool closed")?;
        let slot = pool
            .free
            .lock()
            .unwrap()
            .pop()
            .context("no free slot while holding a permit")?;
        Ok(SlotLease {
            slot: Some(slot),
            pool: Arc::clone(pool),
            _permit: permit,
        })
    }

    /// Waits until every slot is back in the pool, i.e. no batch is in
    /// flight.
    pub async fn quiesce(&self) -> Result<()> {
        let _all = Arc::clone(&self.permits)
            .acquire_many_owned(self.total as u32)
            .await
            .context("slot pool closed")?;
        Ok(())
    }
}

/// Holds one slot; returns it to the pool on drop, whatever the outcome.
pub struct SlotLease {
    slot: Option<ExecutorSlot>,
    pool: Arc<SlotPool>,
    _permit: OwnedSemaphorePermit,
}

impl SlotLease {
    pub fn instance_id(&self) -> u32 {
        self.slot.as_ref().map(|s| s.instance_id).unwrap_or(0)
    }

    fn executor(&mut self) -> &mut dyn BackendExecutor {
        self.slot
            .as_mut()
            .map(|s| s.executor.as_mut())
            .expect("slot present until drop")
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.free.lock().unwrap().push(slot);
        }
        // The permit drops after the slot is back, releasing the semaphore.
    }
}

/// Per-model task that binds ready batches to free executor slots, strictly
/// in the order the batches became ready.
pub struct DispatchScheduler {
    model: String,
    rx: mpsc::Receiver<Batch>,
    pool: Arc<SlotPool>,
}

impl DispatchScheduler {
    pub fn new(model: String, rx: mpsc::Receiver<Batch>, pool: Arc<SlotPool>) -> Self {
        Self { model, rx, pool }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(batch) = self.rx.recv().await {
            let lease = SlotPool::acquire(&self.pool).await?;
            debug!(
                model = %self.model,
                instance = lease.instance_id(),
                batch = batch.len(),
                "batch bound to instance"
            );
            // Each batch runs on its own task so the next one can bind as
            // soon as another slot frees up.
            tokio::spawn(async move {
                run_batch(lease, batch);
            });
        }

        // Channel closed: the assembler is done. Let in-flight batches
        // finish before reporting this model quiesced.
        self.pool.quiesce().await?;
        debug!(model = %self.model, "dispatch scheduler stopped");
        Ok(())
    }
}

fn run_batch(mut lease: SlotLease, mut batch: Batch) {
    let started = Instant::now();
    let dispatch_us = started.duration_since(batch.assembled_at).as_micros() as u64;

    let inputs: Vec<RequestInputs> = batch
        .requests
        .iter_mut()
        .map(|req| std::mem::take(&mut req.inputs))
        .collect();

    let result = lease.executor().execute(&inputs);
    let backend_us = started.elapsed().as_micros() as u64;
    drop(lease);

    match result {
        Ok(outputs) => router::deliver(batch, outputs, dispatch_us, backend_us),
        Err(err) => router::fail_batch(batch, InferError::Backend(err.to_string())),
    }
}
