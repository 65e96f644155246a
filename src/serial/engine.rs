//! Serial command correlation engine.
//!
//! The wire protocol has no correlation ids, so an incoming byte can only be
//! attributed to a request by opcode and arrival order. The engine keeps an
//! ordered set of outstanding requests and runs a single dispatch loop over
//! the transport's byte queue: each received byte is matched against the
//! oldest pending request with that opcode, the response payload (if any) is
//! pulled inline from the same queue, and the result is delivered through the
//! request's one-shot sink.
//!
//! Requests may carry a deadline; the dispatch loop evicts expired entries on
//! its own schedule, independently of the caller's timeout. The two are not
//! synchronized: a response that lands between the caller giving up and the
//! engine evicting is dropped.
//!
//! Invariant: a request is registered before its bytes are written to the
//! transport, so the device cannot reply before the engine is watching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AppResult, LaserError};
use crate::serial::command::CommandMeta;
use crate::serial::transport::Transport;

/// An exchange awaiting its response bytes.
pub struct PendingRequest {
    pub meta: CommandMeta,
    pub arg: Vec<u8>,
    /// Write-once, single-consumer result channel. Registration fails without
    /// one.
    pub sink: Option<oneshot::Sender<Vec<u8>>>,
    /// When set, the engine evicts the request after this point.
    pub deadline: Option<Instant>,
}

impl PendingRequest {
    /// Build a request and the receiving end of its result sink.
    pub fn new(meta: CommandMeta, arg: Vec<u8>) -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (sink, reply) = oneshot::channel();
        (
            Self {
                meta,
                arg,
                sink: Some(sink),
                deadline: None,
            },
            reply,
        )
    }

    /// Like [`PendingRequest::new`], with an eviction deadline.
    pub fn with_deadline(
        meta: CommandMeta,
        arg: Vec<u8>,
        deadline: Instant,
    ) -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (mut request, reply) = Self::new(meta, arg);
        request.deadline = Some(deadline);
        (request, reply)
    }
}

/// Identity of a registered request, for rollback and eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHandle(u64);

struct PendingEntry {
    id: u64,
    meta: CommandMeta,
    sink: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct Shared {
    /// Insertion-ordered; same-opcode requests resolve strictly FIFO.
    pending: Mutex<Vec<Arc<PendingEntry>>>,
    next_id: AtomicU64,
    /// Wakes the dispatch loop when the pending set changes, so a new
    /// deadline is picked up even while the loop is idle.
    changed: Notify,
}

/// Correlates device responses with outstanding requests.
///
/// Cheap to clone; all clones share the same pending set.
#[derive(Clone, Default)]
pub struct CorrelationEngine {
    shared: Arc<Shared>,
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request into the pending set. Returns immediately; the
    /// result arrives through the request's sink.
    pub fn register(&self, request: PendingRequest) -> AppResult<RequestHandle> {
        let sink = request.sink.ok_or(LaserError::NoSink)?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(PendingEntry {
            id,
            meta: request.meta,
            sink: Mutex::new(Some(sink)),
            deadline: request.deadline,
        });
        self.shared.pending.lock().push(entry);
        self.shared.changed.notify_one();
        Ok(RequestHandle(id))
    }

    /// Remove a request by identity. Fails with [`LaserError::NotFound`] when
    /// it was already resolved or evicted.
    pub fn unregister(&self, handle: &RequestHandle) -> AppResult<()> {
        let mut pending = self.shared.pending.lock();
        match pending.iter().position(|entry| entry.id == handle.0) {
            Some(index) => {
                pending.remove(index);
                Ok(())
            }
            None => Err(LaserError::NotFound),
        }
    }

    /// Register a request, then write its frame. A failed write rolls the
    /// registration back and surfaces the write error.
    pub async fn submit(
        &self,
        mut request: PendingRequest,
        link: &mut dyn Transport,
    ) -> AppResult<RequestHandle> {
        debug_assert_eq!(request.arg.len(), request.meta.request_len);
        let meta = request.meta;
        let arg = std::mem::take(&mut request.arg);

        // Register first: the device must not be able to reply before the
        // dispatch loop is watching for the opcode.
        let handle = self.register(request)?;
        match link.write_frame(meta.opcode as u8, &arg).await {
            Ok(()) => Ok(handle),
            Err(error) => {
                let _ = self.unregister(&handle);
                Err(error)
            }
        }
    }

    /// Number of requests currently outstanding.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Run the response dispatch loop until the byte queue ends.
    ///
    /// Responses are delivered in the order their opcode bytes are consumed
    /// from the stream; while a multi-byte payload is being assembled no
    /// other dispatch work proceeds, matching the protocol's guarantee that a
    /// payload immediately follows its opcode byte.
    pub async fn run(self, mut bytes: mpsc::Receiver<u8>) {
        debug!("response dispatch loop started");
        'dispatch: loop {
            // Register interest in set changes before reading the deadline,
            // so a request added in between still wakes the loop.
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            let wake = self.earliest_deadline();

            tokio::select! {
                received = bytes.recv() => {
                    let Some(opcode) = received else {
                        break 'dispatch;
                    };
                    let Some(entry) = self.match_oldest(opcode) else {
                        warn!(opcode, "unmatched response byte dropped");
                        continue 'dispatch;
                    };

                    let mut payload = Vec::with_capacity(entry.meta.response_len);
                    while payload.len() < entry.meta.response_len {
                        match bytes.recv().await {
                            Some(byte) => payload.push(byte),
                            None => break 'dispatch,
                        }
                    }

                    self.remove(entry.id);
                    let sink = entry.sink.lock().take();
                    if let Some(sink) = sink {
                        // the caller may have given up; a refused payload is fine
                        let _ = sink.send(payload);
                    }
                }
                () = deadline_sleep(wake) => {
                    self.evict_expired();
                }
                () = &mut changed => {
                    // re-evaluate the earliest deadline
                }
            }
        }

        // No further responses will ever be delivered. Dropping the entries
        // closes their sinks, which callers observe as a disconnect.
        let abandoned = {
            let mut pending = self.shared.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            warn!(abandoned, "serial stream ended with requests outstanding");
        }
        debug!("response dispatch loop stopped");
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.shared
            .pending
            .lock()
            .iter()
            .filter_map(|entry| entry.deadline)
            .min()
    }

    /// Oldest pending request whose opcode matches the received byte.
    fn match_oldest(&self, opcode: u8) -> Option<Arc<PendingEntry>> {
        self.shared
            .pending
            .lock()
            .iter()
            .find(|entry| entry.meta.opcode as u8 == opcode)
            .cloned()
    }

    fn remove(&self, id: u64) {
        let mut pending = self.shared.pending.lock();
        pending.retain(|entry| entry.id != id);
    }

    /// Drop expired entries without delivering to their sinks; the caller
    /// observes its own timeout independently.
    fn evict_expired(&self) {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut pending = self.shared.pending.lock();
            pending.retain(|entry| {
                let keep = entry.deadline.map_or(true, |deadline| deadline > now);
                if !keep {
                    evicted.push(entry.meta.name);
                }
                keep
            });
        }
        for command in evicted {
            warn!(command, "pending request evicted after deadline");
        }
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
