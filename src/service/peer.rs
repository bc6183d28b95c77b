//! # Peer
//!
//! One connected remote Netron instance: its lifecycle state, the pending
//! request table, the cache of learned definitions and proxies, event
//! handler registrations and the stream multiplexer.
//!
//! Lifecycle runs `OFFLINE -> CONNECTING -> HANDSHAKING -> ONLINE` and back
//! to `OFFLINE` on disconnect. The state lives in a `watch` channel so the
//! accept path can await ONLINE and callers can observe transitions.
//!
//! A peer never owns its Netron core; the core owns the peer and proxies
//! hold a `Weak` reference back here. Disconnect therefore tears down
//! cleanly: pending requests are rejected exactly once, streams are closed
//! and handlers are dropped.

use crate::config::NetronConfig;
use crate::core::packet::{Action, Packet};
use crate::core::sequence::SequenceId;
use crate::error::{NetronError, Result};
use crate::protocol::definition::Definition;
use crate::protocol::interface::{EventHandler, Interface};
use crate::protocol::message::{
    self, EventRequest, GetRequest, Hello, Reply, SetRequest, Value,
};
use crate::service::stream::{StreamReader, StreamTable, StreamWriter};
use crate::utils::timeout::with_timeout;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Connection lifecycle of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Offline,
    Connecting,
    Handshaking,
    Online,
}

/// A connected remote instance
pub struct Peer {
    id: u64,
    /// Remote instance uid, learned from the handshake
    uid: OnceLock<u64>,
    config: NetronConfig,
    status: watch::Sender<PeerStatus>,
    /// Request/response correlation ids
    seq: SequenceId,
    /// Stream ids live in their own namespace
    stream_seq: SequenceId,
    outbound: mpsc::UnboundedSender<Packet>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Result<Bytes>>>>,
    /// Definitions learned from the remote side, by id and by context name
    known: RwLock<HashMap<u64, Definition>>,
    names: RwLock<HashMap<String, u64>>,
    /// Proxy cache; one `Arc<Interface>` per definition id
    interfaces: Mutex<HashMap<u64, Arc<Interface>>>,
    /// Local handlers for remote events, keyed by (definition id, event)
    handlers: Mutex<HashMap<(u64, String), Vec<EventHandler>>>,
    streams: StreamTable,
    incoming_streams: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamReader>>,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Peer {
    pub(crate) fn new(
        id: u64,
        config: NetronConfig,
        outbound: mpsc::UnboundedSender<Packet>,
        streams: StreamTable,
        incoming_streams: mpsc::UnboundedReceiver<StreamReader>,
    ) -> Self {
        let (status, _) = watch::channel(PeerStatus::Offline);
        Self {
            id,
            uid: OnceLock::new(),
            config,
            status,
            seq: SequenceId::new(),
            stream_seq: SequenceId::new(),
            outbound,
            pending: Mutex::new(HashMap::new()),
            known: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            interfaces: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            streams,
            incoming_streams: tokio::sync::Mutex::new(incoming_streams),
            io_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Local handle id, unique within this Netron instance
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote instance uid; `None` before the handshake completes
    pub fn remote_uid(&self) -> Option<u64> {
        self.uid.get().copied()
    }

    pub fn status(&self) -> PeerStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == PeerStatus::Online
    }

    pub(crate) fn status_watch(&self) -> watch::Receiver<PeerStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: PeerStatus) {
        let _ = self.status.send_replace(status);
    }

    /// Flip to OFFLINE; returns false when the peer was already offline so
    /// the disconnect path runs exactly once.
    pub(crate) fn begin_offline(&self) -> bool {
        self.status.send_if_modified(|s| {
            if *s == PeerStatus::Offline {
                false
            } else {
                *s = PeerStatus::Offline;
                true
            }
        })
    }

    pub(crate) fn streams(&self) -> &StreamTable {
        &self.streams
    }

    pub(crate) fn send_packet(&self, packet: Packet) -> Result<()> {
        self.outbound
            .send(packet)
            .map_err(|_| NetronError::ConnectionLost)
    }

    /// Fire-and-forget impulse (event emits, context attach/detach pushes)
    pub(crate) fn send_push(&self, action: Action, payload: Bytes) -> Result<()> {
        self.send_packet(Packet::request(action, self.seq.next(), payload))
    }

    /// Send a request and await the raw response payload. Used directly by
    /// the handshake, which runs before the peer is ONLINE.
    pub(crate) async fn raw_request(
        &self,
        action: Action,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        let id = self.seq.next();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            debug_assert!(!pending.contains_key(&id));
            pending.insert(id, tx);
        }

        if let Err(e) = self.send_packet(Packet::request(action, id, payload)) {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match with_timeout(rx, timeout).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetronError::ConnectionLost),
            Err(_) => {
                // Late responses find no pending entry and are dropped
                self.pending.lock().unwrap().remove(&id);
                Err(NetronError::Timeout)
            }
        }
    }

    /// Send a request on an ONLINE peer and decode the remote outcome
    async fn request(&self, action: Action, payload: Bytes) -> Result<Value> {
        match self.status() {
            PeerStatus::Online => {}
            PeerStatus::Offline => return Err(NetronError::ConnectionLost),
            other => {
                return Err(NetronError::IllegalState(format!(
                    "peer is {other:?}, not online"
                )))
            }
        }
        let raw = self
            .raw_request(action, payload, self.config.response_timeout)
            .await?;
        let reply: Reply = message::decode(&raw)?;
        reply
    }

    /// Resolve a pending request with its response payload
    pub(crate) fn resolve(&self, id: u32, result: Result<Bytes>) {
        match self.pending.lock().unwrap().remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(peer = self.id, id, "response for unknown request dropped"),
        }
    }

    fn reject_all_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (_, tx) in pending {
            let _ = tx.send(Err(NetronError::ConnectionLost));
        }
    }

    /// Read a remote property
    pub(crate) async fn get(&self, def_id: u64, property: &str) -> Result<Value> {
        let payload = message::encode(&GetRequest {
            def_id,
            member: property.to_string(),
            args: None,
        })?;
        self.request(Action::Get, payload).await
    }

    /// Write a remote property
    pub(crate) async fn set(&self, def_id: u64, property: &str, value: Value) -> Result<()> {
        let payload = message::encode(&SetRequest {
            def_id,
            member: property.to_string(),
            value,
        })?;
        self.request(Action::Set, payload).await.map(|_| ())
    }

    /// Invoke a remote method; a call is a GET with arguments
    pub(crate) async fn call(&self, def_id: u64, method: &str, args: Vec<Value>) -> Result<Value> {
        let payload = message::encode(&GetRequest {
            def_id,
            member: method.to_string(),
            args: Some(args),
        })?;
        self.request(Action::Get, payload).await
    }

    /// Liveness check; usable in any non-OFFLINE state
    pub async fn ping(&self) -> Result<()> {
        if self.status() == PeerStatus::Offline {
            return Err(NetronError::ConnectionLost);
        }
        let raw = self
            .raw_request(Action::Ping, Bytes::new(), self.config.response_timeout)
            .await?;
        let reply: Reply = message::decode(&raw)?;
        reply.map(|_| ())
    }

    /// Register a local handler; the first handler for an event registers
    /// the subscription remotely. The handler is installed before the
    /// EVENT_ON round trip so an emission arriving in that window is not
    /// lost, and rolled back if the registration fails.
    pub(crate) async fn subscribe(
        &self,
        def_id: u64,
        event: &str,
        handler: EventHandler,
    ) -> Result<()> {
        let key = (def_id, event.to_string());
        let first = {
            let mut handlers = self.handlers.lock().unwrap();
            let list = handlers.entry(key.clone()).or_default();
            list.push(handler);
            list.len() == 1
        };
        if first {
            let payload = message::encode(&EventRequest {
                def_id,
                event: event.to_string(),
            })?;
            if let Err(e) = self.request(Action::EventOn, payload).await {
                let mut handlers = self.handlers.lock().unwrap();
                if let Some(list) = handlers.get_mut(&key) {
                    list.pop();
                    if list.is_empty() {
                        handlers.remove(&key);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop every handler for the event and unregister remotely
    pub(crate) async fn unsubscribe(&self, def_id: u64, event: &str) -> Result<()> {
        let key = (def_id, event.to_string());
        let existed = self.handlers.lock().unwrap().remove(&key).is_some();
        if existed {
            let payload = message::encode(&EventRequest {
                def_id,
                event: event.to_string(),
            })?;
            self.request(Action::EventOff, payload).await?;
        }
        Ok(())
    }

    /// Run local handlers for an inbound EVENT_EMIT, in subscription order
    pub(crate) fn dispatch_event(&self, def_id: u64, event: &str, data: &Value) {
        let handlers = self.handlers.lock().unwrap();
        match handlers.get(&(def_id, event.to_string())) {
            Some(list) => {
                for handler in list {
                    handler(data);
                }
            }
            None => debug!(peer = self.id, def_id, event, "emit without local handlers"),
        }
    }

    /// Absorb the remote side's handshake payload
    pub(crate) fn learn_hello(&self, hello: Hello) {
        let _ = self.uid.set(hello.uid);
        for (name, def) in hello.definitions {
            self.learn_definition(Some(&name), def);
        }
    }

    /// Cache a remote definition, optionally bound to a context name
    pub(crate) fn learn_definition(&self, name: Option<&str>, def: Definition) {
        if let Some(name) = name {
            self.names.write().unwrap().insert(name.to_string(), def.id);
        }
        self.known.write().unwrap().insert(def.id, def);
    }

    /// Forget a remote definition. The cached proxy is always pruned
    /// (definition ids are monotone, the entry can never be reused); with
    /// `release` set it is also invalidated and its event handlers dropped.
    pub(crate) fn forget_definition(&self, def_id: u64, release: bool) {
        self.known.write().unwrap().remove(&def_id);
        self.names.write().unwrap().retain(|_, id| *id != def_id);
        let iface = self.interfaces.lock().unwrap().remove(&def_id);
        if release {
            if let Some(iface) = iface {
                iface.release();
            }
            self.handlers
                .lock()
                .unwrap()
                .retain(|(id, _), _| *id != def_id);
        }
    }

    /// Resolve a context name learned from the handshake or a later attach
    pub fn interface(self: &Arc<Self>, name: &str) -> Result<Arc<Interface>> {
        let def_id = self
            .names
            .read()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| NetronError::NotExists(format!("context '{name}'")))?;
        self.interface_by_id(def_id)
    }

    pub fn interface_by_id(self: &Arc<Self>, def_id: u64) -> Result<Arc<Interface>> {
        let def = self
            .known
            .read()
            .unwrap()
            .get(&def_id)
            .cloned()
            .ok_or_else(|| NetronError::NotExists(format!("definition {def_id}")))?;
        Ok(self.intern_interface(def))
    }

    /// Proxy cache entry point: the same definition id always yields the
    /// identical `Arc<Interface>`.
    pub(crate) fn intern_interface(self: &Arc<Self>, def: Definition) -> Arc<Interface> {
        let def_id = def.id;
        self.learn_definition(None, def.clone());
        self.interfaces
            .lock()
            .unwrap()
            .entry(def_id)
            .or_insert_with(|| Arc::new(Interface::new(def, self)))
            .clone()
    }

    /// Names of every remote context currently known
    pub fn context_names(&self) -> Vec<String> {
        self.names.read().unwrap().keys().cloned().collect()
    }

    /// Open an outbound stream toward this peer
    pub async fn open_stream(&self) -> Result<StreamWriter> {
        if !self.is_online() {
            return Err(NetronError::IllegalState("peer is not online".into()));
        }
        let id = self.stream_seq.next();
        self.streams.open(id, self.config.stream_accept_timeout).await
    }

    /// Next inbound stream opened by the remote side; `None` after disconnect
    pub async fn next_stream(&self) -> Option<StreamReader> {
        self.incoming_streams.lock().await.recv().await
    }

    pub(crate) fn set_io_tasks(&self, tasks: Vec<JoinHandle<()>>) {
        *self.io_tasks.lock().unwrap() = tasks;
    }

    pub(crate) fn abort_io(&self) {
        for task in self.io_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Teardown after the connection is gone. The OFFLINE transition has
    /// already happened via `begin_offline`.
    pub(crate) fn handle_disconnect(&self) {
        self.reject_all_pending();
        self.streams.close_all();
        self.handlers.lock().unwrap().clear();
        debug!(peer = self.id, "peer torn down");
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("remote_uid", &self.remote_uid())
            .finish_non_exhaustive()
    }
}
