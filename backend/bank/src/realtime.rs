//! Websocket frames. Every frame is `{"event": "...", "data": {...}}`.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Role};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    JoinLawyerPool,
    RequestInstantConsult(ConsultRequest),
    AcceptConsult(ConsultAccept),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ReceiveMessage(Message),
    IncomingLead(ConsultRequest),
    ConsultStart(ConsultStart),
    ConsultTaken { client_id: Uuid },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    /// A user id or a conversation room name.
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultRequest {
    pub client_id: Uuid,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultAccept {
    pub lawyer_id: Uuid,
    #[serde(default)]
    pub lawyer_name: String,
    pub client_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultStart {
    pub meeting_id: Uuid,
    /// Which side the receiving socket is on.
    pub role: Role,
    pub client_id: Uuid,
    pub lawyer_id: Uuid,
    pub lawyer_name: String,
    pub client_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unit_and_struct_frames() {
        let pool: ClientEvent = serde_json::from_str(r#"{"event":"join_lawyer_pool"}"#).unwrap();
        assert_eq!(pool, ClientEvent::JoinLawyerPool);

        let join: ClientEvent =
            serde_json::from_str(r#"{"event":"join_room","data":{"userId":"abc"}}"#).unwrap();
        assert_eq!(
            join,
            ClientEvent::JoinRoom(JoinRoom {
                user_id: "abc".to_string()
            })
        );
    }

    #[test]
    fn server_frames_carry_event_names() {
        let frame = ServerEvent::ConsultTaken {
            client_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["event"], "consult_taken");
        assert_eq!(json["data"]["clientId"], Uuid::nil().to_string());
    }
}
