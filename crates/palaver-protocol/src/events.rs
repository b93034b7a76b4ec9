//! Event types for the Palaver protocol.
//!
//! Events are the fundamental unit of communication in Palaver.
//! Each event is serialized using MessagePack for efficient binary encoding,
//! tagged with its event name so the wire shape matches the JSON-era clients.

use serde::{Deserialize, Serialize};

/// An event sent by a client to the relay.
///
/// The initiating connection is implicit — it is the connection the event
/// arrived on, never a payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join a named room.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room to join.
        room: String,
        /// Identity the client claims for presence notices.
        user_id: String,
    },

    /// Leave a named room.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Room to leave.
        room: String,
        /// Identity used in the departure notice.
        user_id: String,
    },

    /// Send a chat message to a room.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        /// Target room.
        room: String,
        /// Message text.
        message: String,
        /// Identity the message is attributed to.
        user_id: String,
    },

    /// Start or stop a typing indicator in a room.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Target room.
        room: String,
        /// Identity the indicator is attributed to.
        user_id: String,
        /// Whether the user is currently typing.
        is_typing: bool,
    },
}

/// An event delivered by the relay to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Another member joined the room.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        /// Identity of the joiner.
        user_id: String,
        /// Human-readable notice.
        message: String,
    },

    /// A member left the room.
    #[serde(rename_all = "camelCase")]
    UserLeft {
        /// Identity of the leaver.
        user_id: String,
        /// Human-readable notice.
        message: String,
    },

    /// A chat message from another member.
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        /// Identity of the sender.
        user_id: String,
        /// Message text.
        message: String,
        /// Server-assigned timestamp, milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// A typing indicator from another member.
    #[serde(rename_all = "camelCase")]
    UserTyping {
        /// Identity of the typist.
        user_id: String,
        /// Whether the user is currently typing.
        is_typing: bool,
    },
}

impl ServerEvent {
    /// Create a `user-joined` notice for the given identity.
    #[must_use]
    pub fn user_joined(identity: &str) -> Self {
        ServerEvent::UserJoined {
            user_id: identity.to_string(),
            message: format!("User {identity} joined the room"),
        }
    }

    /// Create a `user-left` notice for the given identity.
    #[must_use]
    pub fn user_left(identity: &str) -> Self {
        ServerEvent::UserLeft {
            user_id: identity.to_string(),
            message: format!("User {identity} left the room"),
        }
    }

    /// Create a `receive-message` event.
    #[must_use]
    pub fn receive_message(
        identity: impl Into<String>,
        text: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        ServerEvent::ReceiveMessage {
            user_id: identity.into(),
            message: text.into(),
            timestamp,
        }
    }

    /// Create a `user-typing` event.
    #[must_use]
    pub fn user_typing(identity: impl Into<String>, is_typing: bool) -> Self {
        ServerEvent::UserTyping {
            user_id: identity.into(),
            is_typing,
        }
    }

    /// Get the wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserJoined { .. } => "user-joined",
            ServerEvent::UserLeft { .. } => "user-left",
            ServerEvent::ReceiveMessage { .. } => "receive-message",
            ServerEvent::UserTyping { .. } => "user-typing",
        }
    }
}

impl ClientEvent {
    /// Get the wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::LeaveRoom { .. } => "leave-room",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::Typing { .. } => "typing",
        }
    }
}
