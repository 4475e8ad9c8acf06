use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use anyhow::{bail, ensure, Context, Result};
use infermux_core::{BackendExecutor, InferError, ModelConfig, ModelSpec, RequestInputs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::batcher::{BatchAssembler, BatchPolicy};
use crate::dispatch::{DispatchScheduler, SlotPool};
use crate::queue::RequestQueue;
use crate::request::{completion_channel, InferOutput, InferRequest, RequestId, ResponseHandle};

/// Assembler -> dispatcher channel depth. A full channel suspends the
/// assembler task, never a caller.
const READY_BATCH_DEPTH: usize = 64;

struct ModelRuntime {
    name: String,
    spec: ModelSpec,
    queue: Arc<RequestQueue>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Registry and front door: one independent queue/assembler/dispatcher
/// pipeline per registered model.
pub struct Engine {
    models: RwLock<HashMap<String, Arc<ModelRuntime>>>,
    next_id: AtomicU64,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a model and starts its pipeline. Requires a running tokio
    /// runtime; the model's assembler and dispatcher tasks are spawned here.
    pub fn register_model(
        &self,
        name: &str,
        config: ModelConfig,
        executors: Vec<Box<dyn BackendExecutor>>,
    ) -> Result<()> {
        config
            .validate()
            .with_context(|| format!("invalid config for model '{name}'"))?;
        ensure!(
            executors.len() == config.instance_count,
            "model '{}' is configured for {} instances but {} executors were given",
            name,
            config.instance_count,
            executors.len()
        );

        let spec = executors[0].spec().clone();
        for executor in &executors[1..] {
            ensure!(
                executor.spec() == &spec,
                "model '{}' executors disagree on the I/O spec",
                name
            );
        }

        let mut models = self.models.write().unwrap();
        if models.contains_key(name) {
            bail!("model '{}' is already registered", name);
        }

        let queue = Arc::new(RequestQueue::new(config.queue_capacity));
        let (batch_tx, batch_rx) = mpsc::channel(READY_BATCH_DEPTH);
        let pool = SlotPool::new(executors);

        let assembler = BatchAssembler::new(
            name.to_string(),
            BatchPolicy::from_config(&config.batching),
            Arc::clone(&queue),
            batch_tx,
        );
        let dispatcher = DispatchScheduler::new(name.to_string(), batch_rx, pool);

        let mut tasks = Vec::with_capacity(2);
        {
            let model = name.to_string();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = assembler.run().await {
                    error!(model = %model, error = ?e, "batch assembler exited");
                }
            }));
        }
        {
            let model = name.to_string();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = dispatcher.run().await {
                    error!(model = %model, error = ?e, "dispatch scheduler exited");
                }
            }));
        }

        info!(model = %name, instances = config.instance_count, "model registered");
        models.insert(
            name.to_string(),
            Arc::new(ModelRuntime {
                name: name.to_string(),
                spec,
                queue,
                tasks: Mutex::new(tasks),
            }),
        );
        Ok(())
    }

    /// Admits one request. Rejections (unknown model, invalid input, full or
    /// closed queue) surface here, before any completion handle exists.
    pub fn submit(
        &self,
        model: &str,
        inputs: RequestInputs,
    ) -> Result<ResponseHandle, InferError> {
        let runtime = self
            .model_runtime(model)
            .ok_or_else(|| InferError::UnknownModel(model.to_string()))?;

        runtime
            .spec
            .validate_inputs(&inputs)
            .map_err(InferError::InvalidInput)?;

        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (completion, handle) = completion_channel(id);
        let request = InferRequest {
            id,
            model: model.to_string(),
            inputs,
            arrived_at: Instant::now(),
            completion,
        };

        runtime.queue.enqueue(request).map_err(|(_, err)| err)?;
        Ok(handle)
    }

    /// Submit and wait for the completion in place.
    pub async fn infer(
        &self,
        model: &str,
        inputs: RequestInputs,
    ) -> Result<InferOutput, InferError> {
        self.submit(model, inputs)?.recv().await
    }

    /// Withdraws a request that is still queued; it completes as canceled.
    /// Returns false once the request has been batched, after which it
    /// completes or fails together with its batch.
    pub fn cancel(&self, model: &str, id: RequestId) -> bool {
        let Some(runtime) = self.model_runtime(model) else {
            return false;
        };
        match runtime.queue.cancel(id) {
            Some(request) => {
                request.completion.complete(Err(InferError::Canceled));
                true
            }
            None => false,
        }
    }

    /// Closes every queue, fails still-pending requests, and joins the
    /// per-model tasks. In-flight batches run to completion first.
    pub async fn shutdown(&self) {
        let runtimes: Vec<Arc<ModelRuntime>> = {
            let mut models = self.models.write().unwrap();
            models.drain().map(|(_, runtime)| runtime).collect()
        };

        for runtime in &runtimes {
            let remainder = runtime.queue.close();
            if !remainder.is_empty() {
                info!(
                    model = %runtime.name,
                    pending = remainder.len(),
                    "failing requests still queued at shutdown"
                );
            }
            for request in remainder {
                request.completion.complete(Err(InferError::Shutdown));
            }
        }

        for runtime in &runtimes {
            let tasks: Vec<JoinHandle<()>> = runtime.tasks.lock().unwrap().drain(..).collect();
            for task in tasks {
                let _ = task.await;
            }
        }
    }

    fn model_runtime(&self, model: &str) -> Option<Arc<ModelRuntime>> {
        self.models.read().unwrap().get(model).cloned()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
