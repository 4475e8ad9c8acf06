use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use infermux_core::InferError;
use tokio::sync::Notify;

use crate::{InferRequest, RequestId};

/// Per-model admission queue. Requests leave in arrival order, either by
/// being drained into a batch or by cancellation/close.
pub struct RequestQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    /// Wakes the assembler on arrivals and on close.
    arrivals: Notify,
}

struct Inner {
    pending: VecDeque<InferRequest>,
    closed: bool,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                closed: false,
            }),
            capacity,
            arrivals: Notify::new(),
        }
    }

    /// Admits a request, or hands it back with the rejection cause.
    pub fn enqueue(&self, request: InferRequest) -> Result<(), (InferRequest, InferError)> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err((request, InferError::Shutdown));
            }
            if inner.pending.len() >= self.capacity {
                return Err((
                    request,
                    InferError::QueueFull {
                        capacity: self.capacity,
                    },
                ));
            }
            inner.pending.push_back(request);
        }
        self.arrivals.notify_one();
        Ok(())
    }

    /// Removes up to `max_n` oldest requests, preserving arrival order.
    pub fn drain(&self, max_n: usize) -> Vec<InferRequest> {
        let mut inner = self.inner.lock().unwrap();
        let n = max_n.min(inner.pending.len());
        inner.pending.drain(..n).collect()
    }

    /// Withdraws a still-queued request. Returns `None` once the request has
    /// left the queue (batched, completed, or never admitted).
    pub fn cancel(&self, id: RequestId) -> Option<InferRequest> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.pending.iter().position(|req| req.id == id)?;
        inner.pending.remove(pos)
    }

    /// Closes the queue to new admissions and hands back whatever is still
    /// pending so the caller can resolve it.
    pub fn close(&self) -> Vec<InferRequest> {
        let remainder = {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.pending.drain(..).collect()
        };
        self.arrivals.notify_one();
        remainder
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arrival instant of the oldest pending request.
    pub fn oldest_arrival(&self) -> Option<Instant> {
        self.inner
            .lock()
            .unwrap()
            .pending
            .front()
            .map(|req| req.arrived_at)
    }

    /// Resolves on the next arrival or close. A notification sent while no
    /// one is waiting is held, so checking state before awaiting is safe.
    pub async fn wait_arrival(&self) {
        self.arrivals.notified().await;
    }
}
