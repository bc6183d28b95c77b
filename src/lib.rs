//! # Netron Protocol
//!
//! A peer-to-peer distributed-object protocol: publish local objects as
//! named contexts, connect instances over any byte stream and operate on
//! remote objects through typed proxies.
//!
//! ## Architecture
//!
//! - [`core`]: the binary packet envelope, length-delimited codec and id
//!   allocators
//! - [`protocol`]: message payloads, capability definitions, local stubs
//!   and remote interface proxies
//! - [`service`]: the Netron core dispatcher, per-peer state machine and
//!   flow-controlled stream multiplexer
//! - [`utils`]: logging and timeout helpers
//!
//! ## Example
//!
//! ```no_run
//! use netron_protocol::{CapabilityDescriptor, Context, Netron, NetronConfig, Result, Value};
//!
//! struct Greeter;
//!
//! impl Context for Greeter {
//!     fn call(&self, method: &str, args: Vec<Value>) -> Result<netron_protocol::CallResult> {
//!         match method {
//!             "greet" => {
//!                 let name = args.first().and_then(Value::as_str).unwrap_or("world");
//!                 Ok(Value::Str(format!("hello, {name}")).into())
//!             }
//!             other => Err(netron_protocol::NetronError::NotExists(other.into())),
//!         }
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let netron = Netron::new(NetronConfig::default());
//! netron.attach_context(
//!     "greeter",
//!     Greeter,
//!     CapabilityDescriptor::new().method("greet"),
//! )?;
//! let socket = tokio::net::TcpStream::connect("127.0.0.1:8787").await?;
//! let peer = netron.connect(socket).await?;
//! let iface = peer.interface("greeter")?;
//! let reply = iface.call("greet", vec!["netron".into()]).await?;
//! println!("{:?}", reply.into_value()?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use crate::config::NetronConfig;
pub use crate::core::codec::PacketCodec;
pub use crate::core::packet::{Action, Packet};
pub use error::{NetronError, Result};
pub use protocol::definition::{CapabilityDescriptor, Definition, MethodMeta, PropertyMeta};
pub use protocol::interface::{CallReply, Interface};
pub use protocol::message::Value;
pub use protocol::stub::{CallResult, Context, Stub};
pub use service::netron::Netron;
pub use service::peer::{Peer, PeerStatus};
pub use service::stream::{StreamReader, StreamState, StreamWriter};
