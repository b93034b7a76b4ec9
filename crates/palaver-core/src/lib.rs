//! # palaver-core
//!
//! The realtime core of the Palaver presence-and-broadcast relay.
//!
//! This crate provides the live concurrent state of the system:
//!
//! - **ConnectionRegistry** - authoritative map from connection to identity,
//!   joined rooms, and outbound send primitive
//! - **RoomDirectory** - authoritative map from room to member connections
//! - **PresenceCoordinator** - join/leave orchestration and presence notices
//! - **RelayEngine** - chat message and typing-indicator fan-out
//! - **LifecycleManager** - connect/disconnect binding and cleanup
//!
//! ## Architecture
//!
//! ```text
//! transport ──▶ LifecycleManager ──▶ ConnectionRegistry
//!                                          ▲
//! client events ──▶ PresenceCoordinator ───┤
//!              └──▶ RelayEngine ──▶ RoomDirectory ──▶ member fan-out
//! ```
//!
//! ## Concurrency
//!
//! Operations targeting the same room are serialized: membership mutation and
//! the computation of the notification list happen as one step under that
//! room's exclusive map-entry guard, so the member list at notification time
//! always reflects the mutation that triggered the notification. Operations
//! on different rooms proceed in parallel. Delivery to members is
//! fire-and-forget through each connection's unbounded outbound queue; a slow
//! peer never blocks a room operation. Per-connection ordering (a disconnect
//! never overtakes an in-flight operation from the same connection) is the
//! transport binding's responsibility: each connection is driven by a single
//! task that runs [`LifecycleManager::on_disconnect`] only after its event
//! loop has exited.
//!
//! All state is volatile and scoped to the process lifetime; there is no
//! persistence, replay, or cross-process fan-out. Delivery is best-effort,
//! at-most-once, with no retry.

pub mod coordinator;
pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod rooms;

use thiserror::Error;

pub use coordinator::PresenceCoordinator;
pub use lifecycle::LifecycleManager;
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionSnapshot, EventSender};
pub use relay::RelayEngine;
pub use rooms::{RoomDirectory, RoomId};

/// Errors raised by the realtime core.
///
/// Every error is local to the failing operation: a failure processing one
/// room's operation never affects another room's state or pending operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A required payload field is missing or empty. The operation is dropped
    /// without emitting any event.
    #[error("Invalid payload: {0}")]
    InvalidPayload(&'static str),

    /// A registry operation referenced a connection with no live entry.
    /// Benign for unregister/disconnect races, a logic fault elsewhere.
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// The transport issued two connect hooks for one session. Fatal
    /// invariant violation.
    #[error("Duplicate connection: {0}")]
    DuplicateConnection(String),
}
