//! # Core Protocol Components
//!
//! Low-level packet handling, codecs and id allocation.
//!
//! This module provides the foundation for the protocol: the fixed binary
//! envelope, framing over byte streams and correlation-id sequencing.
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [Flags(1)] [Id(4)] [Payload(N)]
//! ```
//!
//! The flags byte packs the action code (low 7 bits) and the impulse bit
//! (bit 7). All multi-byte integers are big-endian.

pub mod codec;
pub mod packet;
pub mod sequence;
