//! # Stream Multiplexer
//!
//! Flow-controlled sub-channels layered on a peer's connection.
//!
//! Streams carry large or binary payloads outside the request/response
//! channel so bulk transfers never head-of-line block RPC calls. Each
//! stream is one-directional: the initiator writes, the acceptor reads; a
//! duplex conversation opens one stream in each direction.
//!
//! Per-stream state machine: `REQUESTED -> ACCEPTED -> FLOWING <-> PAUSED
//! -> ENDED`. The receiver enforces a buffered-bytes high-water mark:
//! crossing it emits `STREAM_PAUSE`, which the writer honors until
//! `STREAM_RESUME` arrives once the consumer drains below half the mark.
//! `STREAM_END` is sent exactly once and duplicates are ignored on receipt.
//!
//! Stream ids live in their own namespace (a dedicated allocator on the
//! peer); the packet `id` field carries the stream id for stream actions.

use crate::core::packet::{Action, Packet};
use crate::error::{NetronError, Result};
use crate::utils::timeout::with_timeout;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Lifecycle of one stream, as seen by either side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Requested,
    Accepted,
    Flowing,
    Paused,
    Ended,
}

/// Write half of a stream we initiated
struct WriterState {
    id: u32,
    state: Mutex<StreamState>,
    /// Set by inbound STREAM_PAUSE, cleared by STREAM_RESUME
    paused: watch::Sender<bool>,
    ended: AtomicBool,
    /// Connection gone; all writes fail
    closed: AtomicBool,
    pauses_seen: AtomicUsize,
}

/// Read half of a stream the remote initiated
struct ReaderState {
    id: u32,
    /// Dropped to close the consumer channel on END or connection loss
    chunks: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    buffered: AtomicUsize,
    paused: AtomicBool,
    ended: AtomicBool,
    state: Mutex<StreamState>,
}

/// Per-peer registry of stream halves plus the pending-accept table
pub(crate) struct StreamTable {
    outbound: mpsc::UnboundedSender<Packet>,
    high_water_mark: usize,
    pending_accept: Mutex<HashMap<u32, oneshot::Sender<()>>>,
    writers: Mutex<HashMap<u32, Arc<WriterState>>>,
    readers: Mutex<HashMap<u32, Arc<ReaderState>>>,
    incoming: mpsc::UnboundedSender<StreamReader>,
}

impl StreamTable {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<Packet>,
        high_water_mark: usize,
    ) -> (Self, mpsc::UnboundedReceiver<StreamReader>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                high_water_mark,
                pending_accept: Mutex::new(HashMap::new()),
                writers: Mutex::new(HashMap::new()),
                readers: Mutex::new(HashMap::new()),
                incoming: incoming_tx,
            },
            incoming_rx,
        )
    }

    fn send(&self, packet: Packet) -> Result<()> {
        self.outbound
            .send(packet)
            .map_err(|_| NetronError::ConnectionLost)
    }

    /// Initiate a stream and wait for the remote side to accept it
    pub(crate) async fn open(&self, id: u32, accept_timeout: Duration) -> Result<StreamWriter> {
        let (tx, rx) = oneshot::channel();
        self.pending_accept.lock().unwrap().insert(id, tx);
        self.send(Packet::request(Action::StreamRequest, id, Bytes::new()))?;

        match with_timeout(rx, accept_timeout).await {
            Ok(Ok(())) => {
                let (paused_tx, _) = watch::channel(false);
                let state = Arc::new(WriterState {
                    id,
                    state: Mutex::new(StreamState::Flowing),
                    paused: paused_tx,
                    ended: AtomicBool::new(false),
                    closed: AtomicBool::new(false),
                    pauses_seen: AtomicUsize::new(0),
                });
                self.writers.lock().unwrap().insert(id, state.clone());
                debug!(stream = id, "stream accepted");
                Ok(StreamWriter {
                    state,
                    outbound: self.outbound.clone(),
                })
            }
            Ok(Err(_)) => Err(NetronError::ConnectionLost),
            Err(_) => {
                self.pending_accept.lock().unwrap().remove(&id);
                Err(NetronError::Timeout)
            }
        }
    }

    /// Inbound STREAM_REQUEST: auto-accept and surface a reader
    pub(crate) fn on_request(&self, id: u32) {
        let mut readers = self.readers.lock().unwrap();
        if readers.contains_key(&id) {
            warn!(stream = id, "duplicate stream request ignored");
            return;
        }

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ReaderState {
            id,
            chunks: Mutex::new(Some(chunk_tx)),
            buffered: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            state: Mutex::new(StreamState::Accepted),
        });
        readers.insert(id, state.clone());
        drop(readers);

        let reader = StreamReader {
            state,
            chunks: chunk_rx,
            outbound: self.outbound.clone(),
            resume_mark: self.high_water_mark / 2,
        };
        let _ = self.send(Packet::response(Action::StreamAccept, id, Bytes::new()));
        let _ = self.incoming.send(reader);
    }

    /// Inbound STREAM_ACCEPT: resolve the initiator's pending open
    pub(crate) fn on_accept(&self, id: u32) {
        match self.pending_accept.lock().unwrap().remove(&id) {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => warn!(stream = id, "accept for unknown stream"),
        }
    }

    /// Inbound STREAM_DATA: buffer the chunk, pausing the writer when the
    /// high-water mark is crossed
    pub(crate) fn on_data(&self, id: u32, payload: Bytes) {
        let state = match self.readers.lock().unwrap().get(&id) {
            Some(s) => s.clone(),
            None => {
                warn!(stream = id, "data for unknown stream dropped");
                return;
            }
        };
        if state.ended.load(Ordering::Acquire) {
            return;
        }

        let buffered = state.buffered.fetch_add(payload.len(), Ordering::AcqRel) + payload.len();
        if let Some(tx) = state.chunks.lock().unwrap().as_ref() {
            let _ = tx.send(payload);
        }

        if buffered > self.high_water_mark && !state.paused.swap(true, Ordering::AcqRel) {
            *state.state.lock().unwrap() = StreamState::Paused;
            debug!(stream = id, buffered, "high-water mark crossed, pausing");
            let _ = self.send(Packet::request(Action::StreamPause, id, Bytes::new()));
        }
    }

    /// Inbound STREAM_PAUSE: stop the writer until resume
    pub(crate) fn on_pause(&self, id: u32) {
        if let Some(writer) = self.writers.lock().unwrap().get(&id) {
            writer.pauses_seen.fetch_add(1, Ordering::Relaxed);
            *writer.state.lock().unwrap() = StreamState::Paused;
            let _ = writer.paused.send_replace(true);
        }
    }

    /// Inbound STREAM_RESUME: wake the writer
    pub(crate) fn on_resume(&self, id: u32) {
        if let Some(writer) = self.writers.lock().unwrap().get(&id) {
            *writer.state.lock().unwrap() = StreamState::Flowing;
            let _ = writer.paused.send_replace(false);
        }
    }

    /// Inbound STREAM_END: close the reader; duplicates are ignored
    pub(crate) fn on_end(&self, id: u32) {
        if let Some(reader) = self.readers.lock().unwrap().get(&id) {
            if !reader.ended.swap(true, Ordering::AcqRel) {
                *reader.state.lock().unwrap() = StreamState::Ended;
                reader.chunks.lock().unwrap().take();
                debug!(stream = id, "stream ended");
            }
        }
    }

    /// Connection loss: end every reader, fail every writer, reject every
    /// pending open
    pub(crate) fn close_all(&self) {
        self.pending_accept.lock().unwrap().clear();

        let writers = std::mem::take(&mut *self.writers.lock().unwrap());
        for writer in writers.values() {
            writer.closed.store(true, Ordering::Release);
            *writer.state.lock().unwrap() = StreamState::Ended;
            let _ = writer.paused.send_replace(false);
        }

        let readers = std::mem::take(&mut *self.readers.lock().unwrap());
        for reader in readers.values() {
            if !reader.ended.swap(true, Ordering::AcqRel) {
                *reader.state.lock().unwrap() = StreamState::Ended;
                reader.chunks.lock().unwrap().take();
            }
        }
    }
}

/// Write half handed to the initiator once the stream is accepted
pub struct StreamWriter {
    state: Arc<WriterState>,
    outbound: mpsc::UnboundedSender<Packet>,
}

impl StreamWriter {
    pub fn stream_id(&self) -> u32 {
        self.state.id
    }

    pub fn state(&self) -> StreamState {
        *self.state.state.lock().unwrap()
    }

    /// Number of PAUSE signals honored so far
    pub fn times_paused(&self) -> usize {
        self.state.pauses_seen.load(Ordering::Relaxed)
    }

    /// Send one chunk, waiting out any active pause first
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<()> {
        if self.state.ended.load(Ordering::Acquire) {
            return Err(NetronError::IllegalState("stream already ended".into()));
        }

        let mut paused = self.state.paused.subscribe();
        while *paused.borrow_and_update() {
            if self.state.closed.load(Ordering::Acquire) {
                return Err(NetronError::ConnectionLost);
            }
            paused
                .changed()
                .await
                .map_err(|_| NetronError::ConnectionLost)?;
        }
        if self.state.closed.load(Ordering::Acquire) {
            return Err(NetronError::ConnectionLost);
        }

        self.outbound
            .send(Packet::request(
                Action::StreamData,
                self.state.id,
                chunk.into(),
            ))
            .map_err(|_| NetronError::ConnectionLost)
    }

    /// Finish the stream. Idempotent: END goes out exactly once.
    pub fn end(&self) -> Result<()> {
        if !self.state.ended.swap(true, Ordering::AcqRel) {
            *self.state.state.lock().unwrap() = StreamState::Ended;
            self.outbound
                .send(Packet::request(
                    Action::StreamEnd,
                    self.state.id,
                    Bytes::new(),
                ))
                .map_err(|_| NetronError::ConnectionLost)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("id", &self.state.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Read half surfaced to the acceptor
pub struct StreamReader {
    state: Arc<ReaderState>,
    chunks: mpsc::UnboundedReceiver<Bytes>,
    outbound: mpsc::UnboundedSender<Packet>,
    resume_mark: usize,
}

impl StreamReader {
    pub fn stream_id(&self) -> u32 {
        self.state.id
    }

    pub fn state(&self) -> StreamState {
        *self.state.state.lock().unwrap()
    }

    /// Next chunk in send order; `None` once the stream has ended and the
    /// buffer is drained. Draining below half the high-water mark resumes a
    /// paused writer.
    pub async fn read(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.recv().await?;
        let remaining =
            self.state.buffered.fetch_sub(chunk.len(), Ordering::AcqRel) - chunk.len();

        if remaining <= self.resume_mark && self.state.paused.swap(false, Ordering::AcqRel) {
            *self.state.state.lock().unwrap() = StreamState::Flowing;
            let _ = self.outbound.send(Packet::request(
                Action::StreamResume,
                self.state.id,
                Bytes::new(),
            ));
        }
        Some(chunk)
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("id", &self.state.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
