//! Mock transport for tests and hardware-less development.
//!
//! `MockTransport` records every written frame and can be scripted with
//! device replies: when a frame with a known opcode is written, the queued
//! raw bytes (opcode echo plus payload, exactly as the device would send
//! them) are fed into the byte queue. Clones share state, so a test can keep
//! a handle after moving the transport into a session.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{AppResult, LaserError};
use crate::serial::command::Opcode;
use crate::serial::transport::Transport;

#[derive(Default)]
struct MockInner {
    path: Option<String>,
    feed: Option<mpsc::Sender<u8>>,
    replies: HashMap<u8, VecDeque<Vec<u8>>>,
    writes: Vec<(u8, Vec<u8>)>,
}

/// Scripted in-memory transport.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
    buffer: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::default(),
            buffer: 128,
        }
    }

    /// Queue the raw bytes the device sends after the next write of
    /// `opcode`. Successive calls for the same opcode queue successive
    /// replies.
    pub fn push_reply(&self, opcode: Opcode, raw: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .replies
            .entry(opcode as u8)
            .or_default()
            .push_back(raw.into());
    }

    /// Frames written so far, as (opcode, argument bytes).
    pub fn written(&self) -> Vec<(u8, Vec<u8>)> {
        self.inner.lock().writes.clone()
    }

    /// Inject unsolicited bytes into the byte queue. Returns false when the
    /// link is closed.
    pub async fn feed(&self, raw: &[u8]) -> bool {
        let Some(tx) = self.inner.lock().feed.clone() else {
            return false;
        };
        for &byte in raw {
            if tx.send(byte).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.inner.lock().path.is_some()
    }

    fn path(&self) -> Option<String> {
        self.inner.lock().path.clone()
    }

    async fn open(&mut self, path: &str) -> AppResult<mpsc::Receiver<u8>> {
        let mut inner = self.inner.lock();
        if let Some(open) = &inner.path {
            return Err(LaserError::AlreadyOpen(open.clone()));
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        inner.path = Some(path.to_string());
        inner.feed = Some(tx);
        Ok(rx)
    }

    async fn close(&mut self) {
        let mut inner = self.inner.lock();
        inner.path = None;
        // dropping the sender signals end-of-stream to the dispatch loop
        inner.feed = None;
    }

    async fn write_frame(&mut self, opcode: u8, arg: &[u8]) -> AppResult<()> {
        let (tx, reply) = {
            let mut inner = self.inner.lock();
            if inner.path.is_none() {
                return Err(LaserError::NotOpen);
            }
            inner.writes.push((opcode, arg.to_vec()));
            let reply = inner
                .replies
                .get_mut(&opcode)
                .and_then(VecDeque::pop_front);
            (inner.feed.clone(), reply)
        };

        if let (Some(tx), Some(reply)) = (tx, reply) {
            for byte in reply {
                if tx.send(byte).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }
}
