//! # Realtime hub
//!
//! Room based relay for websocket members.
//!
//! ## Rooms
//! - `{userId}`: personal room, joined by dashboards after login
//! - `{a}-{b}`: conversation room for a client/lawyer pair, ids sorted
//! - `lawyer_pool`: every lawyer waiting for instant consult leads
//!
//! ## Delivery
//! - Each member owns a bounded outbox drained by its socket writer
//! - Emits never wait: a member whose outbox is full or closed is dropped
//!   from the room
//!
//! ## Instant consults
//! - A client request is parked under the client id and fanned out to the pool
//! - A parked request is dropped when the member who made it disconnects
//! - The first `accept_consult` removes the parked request and wins
//! - Both winner and client get `consult_start` with a shared meeting id,
//!   everyone later gets `consult_taken`
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bank::{
    models::Role,
    realtime::{ClientEvent, ConsultAccept, ConsultRequest, ConsultStart, ServerEvent},
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

pub const LAWYER_POOL: &str = "lawyer_pool";
pub const OUTBOX_CAPACITY: usize = 64;

pub type MemberId = u64;

#[derive(Default)]
pub struct Hub {
    rooms: DashMap<String, HashMap<MemberId, Sender<ServerEvent>>>,
    /// Parked consult requests by client id, with the member that parked them.
    consults: DashMap<Uuid, (MemberId, ConsultRequest)>,
    next_member: AtomicU64,
}

/// Outcome of an `accept_consult` race.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Won(ConsultStart),
    Taken,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (MemberId, Sender<ServerEvent>, Receiver<ServerEvent>) {
        let id = self.next_member.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::channel(OUTBOX_CAPACITY);

        (id, outbox, inbox)
    }

    pub fn join(&self, room: &str, member: MemberId, outbox: &Sender<ServerEvent>) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(member, outbox.clone());

        debug!("Member {member} joined {room}");
    }

    pub fn leave_all(&self, member: MemberId) {
        self.rooms.retain(|_, members| {
            members.remove(&member);
            !members.is_empty()
        });
        self.consults.retain(|_, (owner, _)| *owner != member);
    }

    /// Delivers to every member of `room`, returning how many accepted it.
    pub fn emit(&self, room: &str, event: &ServerEvent) -> usize {
        let Some(mut members) = self.rooms.get_mut(room) else {
            return 0;
        };

        members.retain(|member, outbox| match outbox.try_send(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping member {member} from {room}: {e}");
                false
            }
        });

        let delivered = members.len();
        let empty = members.is_empty();
        drop(members);

        if empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }

        delivered
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Parks the request for `member` and offers it to the lawyer pool.
    pub fn request_consult(&self, member: MemberId, request: ConsultRequest) -> usize {
        self.consults.insert(request.client_id, (member, request.clone()));

        self.emit(LAWYER_POOL, &ServerEvent::IncomingLead(request))
    }

    pub fn claim_consult(&self, accept: &ConsultAccept) -> Claim {
        let Some((_, (_, request))) = self.consults.remove(&accept.client_id) else {
            return Claim::Taken;
        };

        Claim::Won(ConsultStart {
            meeting_id: Uuid::new_v4(),
            role: Role::Lawyer,
            client_id: request.client_id,
            lawyer_id: accept.lawyer_id,
            lawyer_name: accept.lawyer_name.clone(),
            client_name: request.client_name,
        })
    }

    /// Resolves an accept and notifies both sides. `reply` is the acceptor's outbox.
    pub fn accept_consult(&self, accept: &ConsultAccept, reply: &Sender<ServerEvent>) -> Claim {
        let claim = self.claim_consult(accept);

        match &claim {
            Claim::Won(start) => {
                info!(
                    "Consult {} claimed by lawyer {} for client {}",
                    start.meeting_id, start.lawyer_id, start.client_id
                );

                if let Err(e) = reply.try_send(ServerEvent::ConsultStart(start.clone())) {
                    warn!(
                        "Consult {} start not delivered to lawyer {}: {e}",
                        start.meeting_id, start.lawyer_id
                    );
                }

                let client_view = ConsultStart {
                    role: Role::Client,
                    ..start.clone()
                };
                self.emit(
                    &start.client_id.to_string(),
                    &ServerEvent::ConsultStart(client_view),
                );
            }
            Claim::Taken => {
                let _ = reply.try_send(ServerEvent::ConsultTaken {
                    client_id: accept.client_id,
                });
            }
        }

        claim
    }

    pub fn dispatch(&self, member: MemberId, outbox: &Sender<ServerEvent>, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom(join) => self.join(&join.user_id, member, outbox),
            ClientEvent::JoinLawyerPool => self.join(LAWYER_POOL, member, outbox),
            ClientEvent::RequestInstantConsult(request) => {
                let client_room = request.client_id.to_string();
                self.join(&client_room, member, outbox);

                let offered = self.request_consult(member, request);
                info!("Instant consult offered to {offered} lawyers");
            }
            ClientEvent::AcceptConsult(accept) => {
                self.accept_consult(&accept, outbox);
            }
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let hub = &state.hub;
    let (member, outbox, mut inbox) = hub.register();
    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode event: {e}");
                    continue;
                }
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => hub.dispatch(member, &outbox, event),
                Err(e) => {
                    let _ = outbox.try_send(ServerEvent::Error {
                        message: format!("Malformed event: {e}"),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.leave_all(member);
    writer.abort();

    debug!("Member {member} disconnected");
}

#[cfg(test)]
mod tests {
    use bank::realtime::JoinRoom;

    use super::*;

    fn accept(client_id: Uuid, lawyer_name: &str) -> ConsultAccept {
        ConsultAccept {
            lawyer_id: Uuid::new_v4(),
            lawyer_name: lawyer_name.to_string(),
            client_id,
        }
    }

    #[test]
    fn emit_reaches_room_members_only() {
        let hub = Hub::new();
        let (a, a_out, mut a_in) = hub.register();
        let (b, b_out, mut b_in) = hub.register();

        hub.join("room-1", a, &a_out);
        hub.join("room-2", b, &b_out);

        let delivered = hub.emit(
            "room-1",
            &ServerEvent::Error {
                message: "hello".into(),
            },
        );

        assert_eq!(delivered, 1);
        assert!(a_in.try_recv().is_ok());
        assert!(b_in.try_recv().is_err());
    }

    #[test]
    fn closed_members_are_dropped() {
        let hub = Hub::new();
        let (a, a_out, a_in) = hub.register();
        hub.join("room", a, &a_out);
        drop(a_in);

        let delivered = hub.emit(
            "room",
            &ServerEvent::Error {
                message: "gone".into(),
            },
        );

        assert_eq!(delivered, 0);
        assert_eq!(hub.room_size("room"), 0);
    }

    #[test]
    fn full_outboxes_do_not_block_others() {
        let hub = Hub::new();
        let (slow, slow_out, _slow_in) = hub.register();
        let (fast, fast_out, mut fast_in) = hub.register();
        hub.join("room", slow, &slow_out);
        hub.join("room", fast, &fast_out);

        let event = ServerEvent::Error {
            message: "tick".into(),
        };
        for _ in 0..OUTBOX_CAPACITY {
            hub.emit("room", &event);
            fast_in.try_recv().unwrap();
        }

        assert_eq!(hub.emit("room", &event), 1);
        assert!(fast_in.try_recv().is_ok());
    }

    #[test]
    fn leave_all_clears_every_room() {
        let hub = Hub::new();
        let (a, a_out, _a_in) = hub.register();

        hub.dispatch(
            a,
            &a_out,
            ClientEvent::JoinRoom(JoinRoom {
                user_id: "u1".into(),
            }),
        );
        hub.dispatch(a, &a_out, ClientEvent::JoinLawyerPool);
        assert_eq!(hub.room_size(LAWYER_POOL), 1);

        hub.leave_all(a);

        assert_eq!(hub.room_size(LAWYER_POOL), 0);
        assert_eq!(hub.room_size("u1"), 0);
    }

    #[test]
    fn first_lawyer_wins_the_consult() {
        let hub = Hub::new();
        let client_id = Uuid::new_v4();

        let (lawyer_a, a_out, mut a_in) = hub.register();
        let (lawyer_b, b_out, mut b_in) = hub.register();
        let (client, client_out, mut client_in) = hub.register();
        hub.join(LAWYER_POOL, lawyer_a, &a_out);
        hub.join(LAWYER_POOL, lawyer_b, &b_out);

        hub.dispatch(
            client,
            &client_out,
            ClientEvent::RequestInstantConsult(ConsultRequest {
                client_id,
                client_name: "Asha".into(),
                topic: "tenancy".into(),
            }),
        );

        assert!(matches!(a_in.try_recv(), Ok(ServerEvent::IncomingLead(_))));
        assert!(matches!(b_in.try_recv(), Ok(ServerEvent::IncomingLead(_))));

        let first = hub.accept_consult(&accept(client_id, "Adv. Rao"), &a_out);
        let second = hub.accept_consult(&accept(client_id, "Adv. Iyer"), &b_out);

        let Claim::Won(start) = first else {
            panic!("first accept should win");
        };
        assert_eq!(second, Claim::Taken);

        match a_in.try_recv() {
            Ok(ServerEvent::ConsultStart(event)) => {
                assert_eq!(event.role, Role::Lawyer);
                assert_eq!(event.meeting_id, start.meeting_id);
            }
            other => panic!("unexpected {other:?}"),
        }
        match client_in.try_recv() {
            Ok(ServerEvent::ConsultStart(event)) => {
                assert_eq!(event.role, Role::Client);
                assert_eq!(event.meeting_id, start.meeting_id);
                assert_eq!(event.lawyer_name, "Adv. Rao");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            b_in.try_recv(),
            Ok(ServerEvent::ConsultTaken { .. })
        ));
    }

    #[test]
    fn consults_leave_with_their_client() {
        let hub = Hub::new();
        let client_id = Uuid::new_v4();
        let (client, client_out, client_in) = hub.register();
        let (lawyer, lawyer_out, mut lawyer_in) = hub.register();
        hub.join(LAWYER_POOL, lawyer, &lawyer_out);

        hub.dispatch(
            client,
            &client_out,
            ClientEvent::RequestInstantConsult(ConsultRequest {
                client_id,
                client_name: "Asha".into(),
                topic: "bail".into(),
            }),
        );
        assert!(matches!(
            lawyer_in.try_recv(),
            Ok(ServerEvent::IncomingLead(_))
        ));

        hub.leave_all(client);
        drop(client_in);

        assert_eq!(
            hub.accept_consult(&accept(client_id, "Adv. Rao"), &lawyer_out),
            Claim::Taken
        );
        assert!(matches!(
            lawyer_in.try_recv(),
            Ok(ServerEvent::ConsultTaken { .. })
        ));
    }

    #[test]
    fn closed_lawyer_socket_still_starts_the_client() {
        let hub = Hub::new();
        let client_id = Uuid::new_v4();
        let (client, client_out, mut client_in) = hub.register();
        let (_, lawyer_out, lawyer_in) = hub.register();
        hub.join(&client_id.to_string(), client, &client_out);
        hub.request_consult(
            client,
            ConsultRequest {
                client_id,
                client_name: "Asha".into(),
                topic: "bail".into(),
            },
        );
        drop(lawyer_in);

        let claim = hub.accept_consult(&accept(client_id, "Adv. Rao"), &lawyer_out);

        assert!(matches!(claim, Claim::Won(_)));
        assert!(matches!(
            client_in.try_recv(),
            Ok(ServerEvent::ConsultStart(ConsultStart {
                role: Role::Client,
                ..
            }))
        ));
    }

    #[test]
    fn concurrent_accepts_have_one_winner() {
        let hub = Arc::new(Hub::new());
        let client_id = Uuid::new_v4();
        let (client, _, _) = hub.register();
        hub.request_consult(
            client,
            ConsultRequest {
                client_id,
                client_name: String::new(),
                topic: String::new(),
            },
        );

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let hub = hub.clone();
                std::thread::spawn(move || hub.claim_consult(&accept(client_id, &format!("L{i}"))))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claim| matches!(claim, Claim::Won(_)))
            .count();

        assert_eq!(winners, 1);
    }
}
