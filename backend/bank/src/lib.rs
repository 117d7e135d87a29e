//! # Bank
//!
//! Shared records for the marketplace backend and anything else that speaks
//! its JSON (dashboards, test tools).
//!
//! - [`models`]: stored entities and their status enums
//! - [`payloads`]: request bodies and query strings
//! - [`realtime`]: websocket frames exchanged with the hub
//!
//! ## Workflow
//!
//! The lead/connection/appointment workflow is a set of small state machines.
//! Transitions are validated here so every caller agrees on them.
//!
//! Connections
//! - pending -> active | rejected
//! - rejected -> pending (client asks again)
//!
//! Appointments
//! - pending -> confirmed | rejected | cancelled
//! - confirmed -> completed | cancelled
//! - only pending and confirmed appointments hold their slot
use thiserror::Error;
use uuid::Uuid;

pub mod models;
pub mod payloads;
pub mod realtime;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Cannot move {kind} from {from} to {to}")]
    InvalidTransition {
        kind: &'static str,
        from: &'static str,
        to: &'static str,
    },
}

/// Room shared by both sides of a conversation, independent of who asks.
pub fn conversation_room(a: Uuid, b: Uuid) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    format!("{first}-{second}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(conversation_room(a, b), conversation_room(b, a));
        assert!(conversation_room(a, b).contains(&a.to_string()));
    }
}
