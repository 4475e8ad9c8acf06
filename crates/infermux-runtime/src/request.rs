use std::time::Instant;

use infermux_core::{InferError, RequestInputs, RequestOutputs};
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One admitted inference request, owned by the queue until drained into a
/// batch.
#[derive(Debug)]
pub struct InferRequest {
    pub id: RequestId,
    pub model: String,
    pub inputs: RequestInputs,
    pub arrived_at: Instant,
    pub(crate) completion: CompletionHandle,
}

/// Successful completion payload.
#[derive(Debug)]
pub struct InferOutput {
    pub outputs: RequestOutputs,
    pub timings: Timings,
}

/// What a request ultimately resolves to, success or failure.
pub type CompletionRecord = Result<InferOutput, InferError>;

#[derive(Debug, Default, Clone, Copy)]
pub struct Timings {
    /// Arrival to batch assembly.
    pub queued_us: u64,
    /// Batch assembly to executor start.
    pub dispatch_us: u64,
    /// Executor run time for the whole batch.
    pub backend_us: u64,
}

/// Sending side of a request's completion channel. `complete` consumes the
/// handle, so each request resolves at most once; the engine guarantees at
/// least once.
#[derive(Debug)]
pub(crate) struct CompletionHandle {
    tx: oneshot::Sender<CompletionRecord>,
}

impl CompletionHandle {
    pub(crate) fn complete(self, record: CompletionRecord) {
        // The caller may have dropped its ResponseHandle; that is its choice.
        let _ = self.tx.send(record);
    }
}

/// Caller side of a submitted request. Await it to receive the completion;
/// dropping it abandons the result without affecting the request.
#[derive(Debug)]
pub struct ResponseHandle {
    id: RequestId,
    rx: oneshot::Receiver<CompletionRecord>,
}

impl ResponseHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub async fn recv(self) -> CompletionRecord {
        match self.rx.await {
            Ok(record) => record,
            // Only reachable if the model's tasks were torn down mid-flight.
            Err(_) => Err(InferError::Shutdown),
        }
    }
}

pub(crate) fn completion_channel(id: RequestId) -> (CompletionHandle, ResponseHandle) {
    let (tx, rx) = oneshot::channel();
    (CompletionHandle { tx }, ResponseHandle { id, rx })
}
