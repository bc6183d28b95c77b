//! # Netron Core
//!
//! The arena owning every context stub and connected peer, plus the packet
//! dispatcher that drives both.
//!
//! One `Netron` instance is cheap to clone (it is an `Arc` handle) and is
//! the single owner of all shared state. Peers never reference the core;
//! the reader task spawned per connection captures a core handle and feeds
//! inbound packets into [`Netron::process_packet`], which is synchronous so
//! dispatch order matches arrival order.
//!
//! Connection setup is transport-agnostic: anything `AsyncRead + AsyncWrite`
//! can carry the protocol, which keeps tests on in-memory duplex pipes and
//! production on TCP without separate code paths.

use crate::config::NetronConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::{Action, Packet};
use crate::core::sequence::DefinitionId;
use crate::error::{NetronError, Result};
use crate::protocol::definition::{CapabilityDescriptor, Definition};
use crate::protocol::message::{
    self, ContextAttach, ContextDetach, EventEmit, EventRequest, GetRequest, Hello, Reply,
    SetRequest, Value,
};
use crate::protocol::stub::{CallResult, Context, Stub};
use crate::service::peer::{Peer, PeerStatus};
use crate::utils::timeout::with_timeout_error;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// A Netron instance: the local side of the distributed-object mesh
#[derive(Clone)]
pub struct Netron {
    inner: Arc<Inner>,
}

struct Inner {
    uid: u64,
    config: NetronConfig,
    def_ids: DefinitionId,
    peer_ids: DefinitionId,
    /// Context name to root definition id
    contexts: RwLock<HashMap<String, u64>>,
    stubs: RwLock<HashMap<u64, Arc<Stub>>>,
    peers: RwLock<HashMap<u64, Arc<Peer>>>,
    /// Remote subscribers per (definition id, event), in subscription order
    subscribers: Mutex<HashMap<(u64, String), Vec<u64>>>,
}

impl Netron {
    pub fn new(config: NetronConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                uid: rand::random(),
                config,
                def_ids: DefinitionId::new(),
                peer_ids: DefinitionId::new(),
                contexts: RwLock::new(HashMap::new()),
                stubs: RwLock::new(HashMap::new()),
                peers: RwLock::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Random instance uid exchanged during handshakes
    pub fn uid(&self) -> u64 {
        self.inner.uid
    }

    pub fn config(&self) -> &NetronConfig {
        &self.inner.config
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.read().unwrap().len()
    }

    pub fn peer(&self, id: u64) -> Option<Arc<Peer>> {
        self.inner.peers.read().unwrap().get(&id).cloned()
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner.peers.read().unwrap().values().cloned().collect()
    }

    /// Peers that have completed the handshake; attach/detach pushes go
    /// only to these, everyone else learns the registry from their hello.
    fn online_peers(&self) -> Vec<Arc<Peer>> {
        self.inner
            .peers
            .read()
            .unwrap()
            .values()
            .filter(|p| p.is_online())
            .cloned()
            .collect()
    }

    // ---- context registry ----------------------------------------------

    /// Publish a local object under a unique name. Online peers are told
    /// immediately; later handshakes include it in the hello.
    pub fn attach_context<C: Context>(
        &self,
        name: &str,
        instance: C,
        caps: CapabilityDescriptor,
    ) -> Result<Definition> {
        let def = {
            let mut contexts = self.inner.contexts.write().unwrap();
            if contexts.contains_key(name) {
                return Err(NetronError::AlreadyExists(format!("context '{name}'")));
            }
            let id = self.inner.def_ids.next();
            let def = Definition::new(id, None, name, caps);
            self.inner
                .stubs
                .write()
                .unwrap()
                .insert(id, Arc::new(Stub::new(Box::new(instance), def.clone())));
            contexts.insert(name.to_string(), id);
            def
        };

        info!(name, def_id = def.id, "context attached");
        let push = message::encode(&ContextAttach {
            name: name.to_string(),
            definition: def.clone(),
        })?;
        for peer in self.online_peers() {
            let _ = peer.send_push(Action::ContextAttach, push.clone());
        }
        Ok(def)
    }

    /// Withdraw a published context. With `release_originated` every context
    /// the detached one originated (transitively, via `parent_id`) goes too,
    /// and remote proxies for all released ids are invalidated.
    pub fn detach_context(&self, name: &str, release_originated: bool) -> Result<u64> {
        let root_id = self
            .inner
            .contexts
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| NetronError::NotExists(format!("context '{name}'")))?;

        let mut released = vec![root_id];
        {
            let mut stubs = self.inner.stubs.write().unwrap();
            if release_originated {
                // Transitive children by parent_id; ids are monotone so one
                // pass per generation terminates.
                let mut frontier = vec![root_id];
                while let Some(parent) = frontier.pop() {
                    let children: Vec<u64> = stubs
                        .values()
                        .filter(|s| s.definition().parent_id == Some(parent))
                        .map(|s| s.definition().id)
                        .collect();
                    for child in children {
                        released.push(child);
                        frontier.push(child);
                    }
                }
            }
            for id in &released {
                stubs.remove(id);
            }
        }
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .retain(|(id, _), _| !released.contains(id));

        info!(name, def_id = root_id, released = released.len(), "context detached");
        for id in &released {
            let push = message::encode(&ContextDetach {
                def_id: *id,
                release_originated,
            })?;
            for peer in self.online_peers() {
                let _ = peer.send_push(Action::ContextDetach, push.clone());
            }
        }
        Ok(root_id)
    }

    pub fn has_context(&self, name: &str) -> bool {
        self.inner.contexts.read().unwrap().contains_key(name)
    }

    pub fn context_names(&self) -> Vec<String> {
        self.inner.contexts.read().unwrap().keys().cloned().collect()
    }

    pub fn definition_by_name(&self, name: &str) -> Option<Definition> {
        let id = *self.inner.contexts.read().unwrap().get(name)?;
        self.stub(id).ok().map(|s| s.definition().clone())
    }

    fn stub(&self, def_id: u64) -> Result<Arc<Stub>> {
        self.inner
            .stubs
            .read()
            .unwrap()
            .get(&def_id)
            .cloned()
            .ok_or_else(|| NetronError::NotExists(format!("definition {def_id}")))
    }

    /// Local access paths go through the same stub checks as remote ones
    pub fn get_local(&self, def_id: u64, property: &str) -> Result<Value> {
        self.stub(def_id)?.get(property)
    }

    pub fn set_local(&self, def_id: u64, property: &str, value: Value) -> Result<()> {
        self.stub(def_id)?.set(property, value)
    }

    pub fn call_local(&self, def_id: u64, method: &str, args: Vec<Value>) -> Result<Value> {
        self.local_invoke(def_id, method, Some(args))
    }

    fn local_definitions(&self) -> HashMap<String, Definition> {
        let contexts = self.inner.contexts.read().unwrap();
        let stubs = self.inner.stubs.read().unwrap();
        contexts
            .iter()
            .filter_map(|(name, id)| {
                stubs
                    .get(id)
                    .map(|s| (name.clone(), s.definition().clone()))
            })
            .collect()
    }

    /// Service one GET: a property read when `args` is `None`, a method call
    /// otherwise. Context-returning calls auto-attach the new context and
    /// ship its definition, provided the method declared `returns_context`.
    fn local_invoke(&self, def_id: u64, member: &str, args: Option<Vec<Value>>) -> Reply {
        let stub = self.stub(def_id)?;
        match args {
            None => stub.get(member),
            Some(args) => match stub.call(member, args)? {
                CallResult::Value(v) => Ok(v),
                CallResult::Context {
                    instance,
                    descriptor,
                    name,
                } => {
                    let returns_context = stub
                        .definition()
                        .method(member)
                        .map(|m| m.returns_context)
                        .unwrap_or(false);
                    if !returns_context {
                        return Err(NetronError::NotSupported(format!(
                            "method '{member}' is not declared to return a context"
                        )));
                    }
                    let def = self.attach_nested(def_id, &name, instance, descriptor);
                    Ok(Value::Definition(def))
                }
            },
        }
    }

    /// Attach a context originated by a method call. Unnamed: reachable only
    /// through the definition id handed to the caller.
    fn attach_nested(
        &self,
        parent_id: u64,
        name: &str,
        instance: Box<dyn Context>,
        caps: CapabilityDescriptor,
    ) -> Definition {
        let id = self.inner.def_ids.next();
        let def = Definition::new(id, Some(parent_id), name, caps);
        self.inner
            .stubs
            .write()
            .unwrap()
            .insert(id, Arc::new(Stub::new(instance, def.clone())));
        debug!(name, def_id = id, parent_id, "originated context attached");
        def
    }

    // ---- events ---------------------------------------------------------

    /// Push an event to every subscribed peer, in subscription order
    pub fn emit_event(&self, def_id: u64, event: &str, data: Value) -> Result<()> {
        let stub = self.stub(def_id)?;
        if !stub.definition().has_event(event) {
            return Err(NetronError::NotExists(format!("event '{event}'")));
        }

        let targets = self
            .inner
            .subscribers
            .lock()
            .unwrap()
            .get(&(def_id, event.to_string()))
            .cloned()
            .unwrap_or_default();
        if targets.is_empty() {
            return Ok(());
        }

        let push = message::encode(&EventEmit {
            def_id,
            event: event.to_string(),
            data,
        })?;
        let peers = self.inner.peers.read().unwrap();
        for peer_id in targets {
            if let Some(peer) = peers.get(&peer_id) {
                let _ = peer.send_push(Action::EventEmit, push.clone());
            }
        }
        Ok(())
    }

    // ---- connection setup ----------------------------------------------

    /// Wire up IO tasks for a new connection and register the peer
    fn spawn_peer<T>(&self, io: T, initial: PeerStatus) -> Arc<Peer>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let config = self.inner.config.clone();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (streams, incoming) =
            crate::service::stream::StreamTable::new(out_tx.clone(), config.stream_high_water_mark);
        let max_payload = config.max_payload_size;
        let peer = Arc::new(Peer::new(
            self.inner.peer_ids.next(),
            config,
            out_tx,
            streams,
            incoming,
        ));
        peer.set_status(initial);
        self.inner
            .peers
            .write()
            .unwrap()
            .insert(peer.id(), peer.clone());

        let framed = Framed::new(io, PacketCodec::new(max_payload));
        let (mut sink, mut stream) = framed.split();

        let writer = tokio::spawn(async move {
            while let Some(packet) = out_rx.recv().await {
                if sink.send(packet).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let netron = self.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                // Malformed frames are skipped inside the decoder, so an
                // Err here is a framing or transport failure the connection
                // cannot survive.
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(packet) => netron.process_packet(&peer, packet),
                        Err(e) => {
                            debug!(peer = peer.id(), error = %e, "connection read failed");
                            break;
                        }
                    }
                }
                netron.peer_disconnected(&peer);
            })
        };
        peer.set_io_tasks(vec![writer, reader]);
        peer
    }

    /// Initiate a connection over any byte stream: spawn IO, send the hello
    /// and go ONLINE once the remote hello comes back.
    pub async fn connect<T>(&self, io: T) -> Result<Arc<Peer>>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let peer = self.spawn_peer(io, PeerStatus::Connecting);
        peer.set_status(PeerStatus::Handshaking);

        let hello = message::encode(&Hello {
            uid: self.inner.uid,
            definitions: self.local_definitions(),
        })?;
        let raw = match peer
            .raw_request(Action::Get, hello, self.inner.config.handshake_timeout)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.disconnect_peer(&peer);
                return Err(e);
            }
        };
        let remote: Hello = match message::decode(&raw) {
            Ok(h) => h,
            Err(e) => {
                self.disconnect_peer(&peer);
                return Err(e);
            }
        };

        peer.learn_hello(remote);
        peer.set_status(PeerStatus::Online);
        info!(peer = peer.id(), uid = peer.remote_uid(), "peer online");
        Ok(peer)
    }

    /// Accept an initiated connection: spawn IO and wait for the remote
    /// hello to drive the peer ONLINE.
    pub async fn accept<T>(&self, io: T) -> Result<Arc<Peer>>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let peer = self.spawn_peer(io, PeerStatus::Handshaking);

        let mut status = peer.status_watch();
        let wait = async {
            loop {
                match *status.borrow_and_update() {
                    PeerStatus::Online => return Ok(()),
                    PeerStatus::Offline => return Err(NetronError::ConnectionLost),
                    _ => {}
                }
                status
                    .changed()
                    .await
                    .map_err(|_| NetronError::ConnectionLost)?;
            }
        };
        match with_timeout_error(wait, self.inner.config.handshake_timeout).await {
            Ok(()) => {
                info!(peer = peer.id(), uid = peer.remote_uid(), "peer online");
                Ok(peer)
            }
            Err(e) => {
                self.disconnect_peer(&peer);
                Err(e)
            }
        }
    }

    // ---- dispatch -------------------------------------------------------

    /// Dispatch one inbound packet. Synchronous: packets from a connection
    /// are processed strictly in arrival order.
    pub(crate) fn process_packet(&self, peer: &Arc<Peer>, packet: Packet) {
        let action = match Action::from_code(packet.action) {
            Some(a) => a,
            None => {
                warn!(
                    peer = peer.id(),
                    action = packet.action,
                    "unsupported action code"
                );
                if packet.impulse {
                    let reply: Reply = Err(NetronError::NotSupported(format!(
                        "action code {}",
                        packet.action
                    )));
                    if let Ok(payload) = message::encode(&reply) {
                        let _ =
                            peer.send_packet(Packet::raw_response(packet.action, packet.id, payload));
                    }
                }
                if self.inner.config.fatal_protocol_violations {
                    self.disconnect_peer(peer);
                }
                return;
            }
        };

        // Stream packets carry a stream id, not a correlation id; route them
        // before the response path can mistake one for a pending reply.
        if action.is_stream() {
            let streams = peer.streams();
            match action {
                Action::StreamRequest => streams.on_request(packet.id),
                Action::StreamAccept => streams.on_accept(packet.id),
                Action::StreamData => streams.on_data(packet.id, packet.payload),
                Action::StreamPause => streams.on_pause(packet.id),
                Action::StreamResume => streams.on_resume(packet.id),
                Action::StreamEnd => streams.on_end(packet.id),
                _ => unreachable!(),
            }
            return;
        }

        if !packet.impulse {
            peer.resolve(packet.id, Ok(packet.payload));
            return;
        }

        match peer.status() {
            PeerStatus::Handshaking => self.process_handshake(peer, action, packet),
            PeerStatus::Online => self.process_request(peer, action, packet),
            status => {
                debug!(peer = peer.id(), ?status, ?action, "impulse dropped");
            }
        }
    }

    /// Only the hello GET (and a bare ping) is legal while HANDSHAKING
    fn process_handshake(&self, peer: &Arc<Peer>, action: Action, packet: Packet) {
        match action {
            Action::Get => match message::decode::<Hello>(&packet.payload) {
                Ok(hello) => {
                    peer.learn_hello(hello);
                    let reply = Hello {
                        uid: self.inner.uid,
                        definitions: self.local_definitions(),
                    };
                    match message::encode(&reply) {
                        Ok(payload) => {
                            let _ = peer.send_packet(Packet::response(
                                Action::Get,
                                packet.id,
                                payload,
                            ));
                            peer.set_status(PeerStatus::Online);
                        }
                        Err(e) => warn!(peer = peer.id(), error = %e, "hello encode failed"),
                    }
                }
                Err(_) => {
                    warn!(peer = peer.id(), "malformed hello");
                    if self.inner.config.fatal_protocol_violations {
                        self.disconnect_peer(peer);
                    }
                }
            },
            Action::Ping => self.reply(peer, Action::Ping, packet.id, Ok(Value::Null)),
            other => {
                warn!(peer = peer.id(), action = ?other, "impulse before handshake completed");
            }
        }
    }

    fn process_request(&self, peer: &Arc<Peer>, action: Action, packet: Packet) {
        match action {
            Action::Get => {
                let reply = match message::decode::<GetRequest>(&packet.payload) {
                    Ok(req) => self.local_invoke(req.def_id, &req.member, req.args),
                    Err(e) => Err(e),
                };
                self.reply(peer, Action::Get, packet.id, reply);
            }
            Action::Set => {
                let reply = match message::decode::<SetRequest>(&packet.payload) {
                    Ok(req) => self
                        .stub(req.def_id)
                        .and_then(|s| s.set(&req.member, req.value))
                        .map(|()| Value::Null),
                    Err(e) => Err(e),
                };
                self.reply(peer, Action::Set, packet.id, reply);
            }
            Action::Ping => self.reply(peer, Action::Ping, packet.id, Ok(Value::Null)),
            Action::EventOn => {
                let reply = match message::decode::<EventRequest>(&packet.payload) {
                    Ok(req) => self.subscribe_peer(peer.id(), req),
                    Err(e) => Err(e),
                };
                self.reply(peer, Action::EventOn, packet.id, reply);
            }
            Action::EventOff => {
                let reply = match message::decode::<EventRequest>(&packet.payload) {
                    Ok(req) => {
                        self.unsubscribe_peer(peer.id(), &req);
                        Ok(Value::Null)
                    }
                    Err(e) => Err(e),
                };
                self.reply(peer, Action::EventOff, packet.id, reply);
            }
            Action::EventEmit => match message::decode::<EventEmit>(&packet.payload) {
                Ok(emit) => peer.dispatch_event(emit.def_id, &emit.event, &emit.data),
                Err(_) => warn!(peer = peer.id(), "malformed event emit dropped"),
            },
            Action::ContextAttach => match message::decode::<ContextAttach>(&packet.payload) {
                Ok(attach) => {
                    debug!(peer = peer.id(), name = %attach.name, "remote context attached");
                    peer.learn_definition(Some(&attach.name), attach.definition);
                }
                Err(_) => warn!(peer = peer.id(), "malformed context attach dropped"),
            },
            Action::ContextDetach => match message::decode::<ContextDetach>(&packet.payload) {
                Ok(detach) => {
                    debug!(peer = peer.id(), def_id = detach.def_id, "remote context detached");
                    peer.forget_definition(detach.def_id, detach.release_originated);
                }
                Err(_) => warn!(peer = peer.id(), "malformed context detach dropped"),
            },
            // Stream actions never reach here
            _ => unreachable!(),
        }
    }

    fn subscribe_peer(&self, peer_id: u64, req: EventRequest) -> Reply {
        let stub = self.stub(req.def_id)?;
        if !stub.definition().has_event(&req.event) {
            return Err(NetronError::NotExists(format!("event '{}'", req.event)));
        }
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        let list = subscribers.entry((req.def_id, req.event)).or_default();
        if !list.contains(&peer_id) {
            list.push(peer_id);
        }
        Ok(Value::Null)
    }

    /// Unsubscribing an unknown registration is a no-op, not an error
    fn unsubscribe_peer(&self, peer_id: u64, req: &EventRequest) {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        if let Some(list) = subscribers.get_mut(&(req.def_id, req.event.clone())) {
            list.retain(|id| *id != peer_id);
            if list.is_empty() {
                subscribers.remove(&(req.def_id, req.event.clone()));
            }
        }
    }

    fn reply(&self, peer: &Arc<Peer>, action: Action, id: u32, reply: Reply) {
        match message::encode(&reply) {
            Ok(payload) => {
                let _ = peer.send_packet(Packet::response(action, id, payload));
            }
            Err(e) => warn!(peer = peer.id(), error = %e, "reply encode failed"),
        }
    }

    // ---- teardown -------------------------------------------------------

    /// Runs exactly once per connection, whether the loss was local or
    /// remote. Guarded by the OFFLINE transition.
    fn peer_disconnected(&self, peer: &Arc<Peer>) {
        if !peer.begin_offline() {
            return;
        }
        peer.handle_disconnect();
        self.inner.peers.write().unwrap().remove(&peer.id());
        {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            for list in subscribers.values_mut() {
                list.retain(|id| *id != peer.id());
            }
            subscribers.retain(|_, list| !list.is_empty());
        }
        info!(peer = peer.id(), "peer disconnected");
    }

    /// Actively drop a connection
    pub fn disconnect_peer(&self, peer: &Arc<Peer>) {
        peer.abort_io();
        self.peer_disconnected(peer);
    }

    pub fn disconnect_all(&self) {
        for peer in self.peers() {
            self.disconnect_peer(&peer);
        }
    }
}
