//! Room directory for Palaver.
//!
//! Rooms are named broadcast scopes. A room exists only as a non-empty entry
//! in the directory: it is created implicitly on first join and deleted when
//! its last member leaves, so directory memory is bounded by live membership
//! rather than by historical room names.

use crate::registry::ConnectionId;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// A room identifier. Caller-supplied, arbitrary namespace.
pub type RoomId = String;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Authoritative map from room to member connections.
///
/// Membership mutation and the computation of the notification list are one
/// operation executed under the room's exclusive entry guard, so concurrent
/// operations on the same room serialize while different rooms proceed in
/// parallel.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room on first join.
    ///
    /// Idempotent: adding an already-present member changes nothing. Returns
    /// the OTHER members as of immediately after the add — the peers the
    /// caller's presence-event policy notifies.
    pub fn join(&self, room_id: &str, connection_id: &str) -> Vec<ConnectionId> {
        let mut members = self.rooms.entry(room_id.to_string()).or_default();

        if members.insert(connection_id.to_string()) {
            debug!(
                room = %room_id,
                connection = %connection_id,
                members = members.len(),
                "Joined room"
            );
        }

        members
            .iter()
            .filter(|m| m.as_str() != connection_id)
            .cloned()
            .collect()
    }

    /// Remove a connection from a room.
    ///
    /// Idempotent: removing a non-member is a no-op. Returns the remaining
    /// members after the removal. If the member set empties, the room entry
    /// is deleted.
    pub fn leave(&self, room_id: &str, connection_id: &str) -> Vec<ConnectionId> {
        let mut remaining = Vec::new();
        let mut emptied = false;

        if let Some(mut members) = self.rooms.get_mut(room_id) {
            if members.remove(connection_id) {
                debug!(
                    room = %room_id,
                    connection = %connection_id,
                    members = members.len(),
                    "Left room"
                );
            }
            remaining = members.iter().cloned().collect();
            emptied = members.is_empty();
        }

        if emptied {
            // Guarded delete so a join that lands between the guard release
            // and this call keeps the room alive.
            if self
                .rooms
                .remove_if(room_id, |_, members| members.is_empty())
                .is_some()
            {
                debug!(room = %room_id, "Deleted empty room");
            }
        }

        remaining
    }

    /// Get the current members of a room.
    ///
    /// Returns the empty set for an unknown room, never an error.
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, room_id: &str, connection_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Check if a room exists (has at least one member).
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get all live room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }
}
