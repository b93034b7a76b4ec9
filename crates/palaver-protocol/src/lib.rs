//! # palaver-protocol
//!
//! Wire event definitions for the Palaver realtime relay.
//!
//! This crate defines the binary protocol used for communication between
//! Palaver clients and servers: the inbound and outbound event types and the
//! length-prefixed MessagePack codec that carries them.
//!
//! ## Event Types
//!
//! - [`ClientEvent`] - `join-room` / `leave-room` / `send-message` / `typing`
//! - [`ServerEvent`] - `user-joined` / `user-left` / `receive-message` / `user-typing`
//!
//! ## Example
//!
//! ```rust
//! use palaver_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::JoinRoom {
//!     room: "lobby".into(),
//!     user_id: "alice".into(),
//! };
//!
//! // Encode and decode
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, ServerEvent};
