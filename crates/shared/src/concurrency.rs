//! Request-scoped context, cancellation, and a bounded job queue.
//!
//! - `RequestContext` carries a correlation id and a shared cancellation token.
//!   The server and agent create one root context per process; every request,
//!   flush tick, or dispatch tick derives a child that shares cancellation.
//! - `BoundedQueue` is the job queue behind the agent's fan-out dispatch.

use crate::{ErrorCode, ErrorEnvelope, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify, oneshot};

/// A correlation identifier used in log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Create a new request id, unique within this process.
    #[must_use]
    pub fn new_request_id() -> Self {
        Self::next_with_prefix("req_")
    }

    /// Create a new id with a custom prefix (`tick_`, `flush_`, ...).
    #[must_use]
    pub fn next_with_prefix(prefix: &str) -> Self {
        let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(Arc::<str>::from(format!("{prefix}{n}")))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A clonable cancellation token that can be awaited.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel the token and wake all waiters.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns true if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Request-scoped context passed across boundaries.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a new context with a fresh cancellation token.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            cancellation: CancellationToken::new(),
        }
    }

    /// Create a context with an auto-generated `req_*` id.
    #[must_use]
    pub fn new_request() -> Self {
        Self::new(CorrelationId::new_request_id())
    }

    /// Derive a context with a fresh id that shares this context's cancellation.
    #[must_use]
    pub fn child(&self, prefix: &str) -> Self {
        Self {
            correlation_id: CorrelationId::next_with_prefix(prefix),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Return the correlation id.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Return a clone of the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Returns true if the context was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this context and every context sharing its token.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Await cancellation.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Return a cancellation error when cancelled, including operation metadata.
    pub fn ensure_not_cancelled(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ErrorEnvelope::cancelled("operation cancelled")
                .with_metadata("operation", operation));
        }
        Ok(())
    }
}

/// Error returned when a `BoundedQueue` is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedQueueClosedError;

impl fmt::Display for BoundedQueueClosedError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("BoundedQueue is closed")
    }
}

impl std::error::Error for BoundedQueueClosedError {}

impl From<BoundedQueueClosedError> for ErrorEnvelope {
    fn from(_: BoundedQueueClosedError) -> Self {
        Self::expected(queue_closed_code(), "BoundedQueue is closed")
    }
}

fn queue_closed_code() -> ErrorCode {
    ErrorCode::new("core", "bounded_queue_closed")
}

/// Returns true when the error signals a closed queue.
#[must_use]
pub fn is_queue_closed(error: &ErrorEnvelope) -> bool {
    error.code == queue_closed_code()
}

/// A bounded async queue with explicit backpressure.
///
/// - `enqueue` waits when the queue is full
/// - `dequeue` waits when the queue is empty and fails once closed and drained
/// - both are cancellation-aware via `RequestContext`
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Arc<Mutex<QueueState<T>>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    waiting_consumers: VecDeque<oneshot::Sender<T>>,
    waiting_producers: VecDeque<oneshot::Sender<()>>,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    /// Create a new bounded queue.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ErrorEnvelope::invalid_input(
                "capacity must be a positive number",
            ));
        }

        Ok(Self {
            capacity,
            state: Arc::new(Mutex::new(QueueState {
                items: VecDeque::new(),
                waiting_consumers: VecDeque::new(),
                waiting_producers: VecDeque::new(),
                closed: false,
            })),
        })
    }

    /// Return the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the current queue length.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Return true when the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Close the queue. Items already queued may still be dequeued.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.waiting_consumers.clear();
        state.waiting_producers.clear();
    }

    /// Enqueue an item, waiting for capacity when the queue is full.
    pub async fn enqueue(&self, ctx: &RequestContext, mut item: T) -> Result<()> {
        ctx.ensure_not_cancelled("queue.enqueue")?;

        loop {
            let producer_gate = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(ErrorEnvelope::from(BoundedQueueClosedError));
                }

                // Hand off directly to a parked consumer.
                while let Some(consumer) = state.waiting_consumers.pop_front() {
                    match consumer.send(item) {
                        Ok(()) => return Ok(()),
                        Err(returned) => item = returned,
                    }
                }

                if state.items.len() < self.capacity {
                    state.items.push_back(item);
                    return Ok(());
                }

                let (tx, rx) = oneshot::channel::<()>();
                state.waiting_producers.push_back(tx);
                rx
            };

            tokio::select! {
                () = ctx.cancelled() => {
                    return Err(ErrorEnvelope::cancelled("operation cancelled")
                        .with_metadata("operation", "queue.enqueue"));
                }
                res = producer_gate => {
                    if res.is_err() {
                        return Err(ErrorEnvelope::from(BoundedQueueClosedError));
                    }
                }
            }
        }
    }

    /// Dequeue an item, waiting for one when the queue is empty.
    pub async fn dequeue(&self, ctx: &RequestContext) -> Result<T> {
        ctx.ensure_not_cancelled("queue.dequeue")?;

        let consumer_wait = {
            let mut state = self.state.lock().await;

            if let Some(item) = state.items.pop_front() {
                while let Some(producer) = state.waiting_producers.pop_front() {
                    if producer.send(()).is_ok() {
                        break;
                    }
                }
                return Ok(item);
            }

            if state.closed {
                return Err(ErrorEnvelope::from(BoundedQueueClosedError));
            }

            let (tx, rx) = oneshot::channel::<T>();
            state.waiting_consumers.push_back(tx);
            rx
        };

        tokio::select! {
            () = ctx.cancelled() => {
                Err(ErrorEnvelope::cancelled("operation cancelled")
                    .with_metadata("operation", "queue.dequeue"))
            }
            res = consumer_wait => {
                res.map_err(|_| ErrorEnvelope::from(BoundedQueueClosedError))
            }
        }
    }
}
