use infermux_core::{InferError, RequestOutputs};
use tracing::error;

use crate::{Batch, InferOutput, Timings};

/// Matches backend outputs to the batch's requests by position (output set
/// `i` belongs to the i-th request as assembled) and resolves each
/// completion handle exactly once.
pub fn deliver(batch: Batch, outputs: Vec<RequestOutputs>, dispatch_us: u64, backend_us: u64) {
    if outputs.len() != batch.requests.len() {
        let err = InferError::Backend(format!(
            "backend returned {} output sets for a batch of {}",
            outputs.len(),
            batch.requests.len()
        ));
        error!(model = %batch.model, error = %err, "misaligned backend output");
        fail_batch(batch, err);
        return;
    }

    let assembled_at = batch.assembled_at;
    for (request, outputs) in batch.requests.into_iter().zip(outputs) {
        let queued_us = assembled_at.duration_since(request.arrived_at).as_micros() as u64;
        request.completion.complete(Ok(InferOutput {
            outputs,
            timings: Timings {
                queued_us,
                dispatch_us,
                backend_us,
            },
        }));
    }
}

/// Fails every request in the batch with the same cause.
pub fn fail_batch(batch: Batch, err: InferError) {
    error!(model = %batch.model, batch = batch.len(), error = %err, "failing batch");
    for request in batch.requests {
        request.completion.complete(Err(err.clone()));
    }
}
