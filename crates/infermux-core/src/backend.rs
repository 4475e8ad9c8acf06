use anyhow::Result;

use crate::{ModelSpec, Tensor, TensorName};

/// One request's named input tensors.
pub type RequestInputs = Vec<(TensorName, Tensor)>;

/// One request's named output tensors.
pub type RequestOutputs = Vec<(TensorName, Tensor)>;

/// Object-safe executor interface over an opaque model runtime.
/// Keep it synchronous; the dispatch task calls it directly.
pub trait BackendExecutor: Send + 'static {
    fn spec(&self) -> &ModelSpec;

    /// Runs one assembled batch. `batch[i]` holds the i-th request's inputs;
    /// the returned vec must hold one output set per request, same order.
    /// An error fails the whole batch.
    fn execute(&mut self, batch: &[RequestInputs]) -> Result<Vec<RequestOutputs>>;
}
