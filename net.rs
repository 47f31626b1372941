//! Position sync with other racers.
//!
//! Messages are JSON envelopes `{ "event": ..., "payload": ... }`. The engine
//! talks to a [`Transport`]; [`LoopbackHub`] relays in-process and
//! [`UdpTransport`] talks to an external relay.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JOIN_ROOM: &str = "join_room";
pub const LEAVE_ROOM: &str = "leave_room";
pub const RACE_UPDATE: &str = "race_update";
pub const LIVE_RANKINGS: &str = "live_rankings";
pub const PLAYER_FINISHED: &str = "player_finished";

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("not joined to a session")]
    NotJoined,
}

/// Another racer's last reported position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub id: String,
    pub x: f32,
    pub z: f32,
    pub character_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionBroadcast {
    pub room_id: String,
    pub state: RemoteSnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerIdentity {
    pub id: String,
    pub name: String,
    pub character_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_id: String,
    pub player: PlayerIdentity,
}

/// Result record sent once the local racer crosses the line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishSubmission {
    pub room_id: Option<String>,
    pub player: PlayerIdentity,
    pub score: u32,
    /// Seconds from race start.
    pub time: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRanking {
    pub id: String,
    pub z: f32,
    pub character_id: String,
    /// 1 is the leader.
    pub rank: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub payload: Value,
}

/// Orders participants by distance covered, furthest first. Ties keep their
/// input order.
pub fn rank_participants<I>(participants: I) -> Vec<LiveRanking>
where
    I: IntoIterator<Item = (String, f32, String)>,
{
    let mut entries: Vec<(String, f32, String)> = participants.into_iter().collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (id, z, character_id))| LiveRanking {
            id,
            z,
            character_id,
            rank: i + 1,
        })
        .collect()
}

pub type Handler = Box<dyn FnMut(&Value)>;

pub trait Transport {
    fn join(&mut self, session: &str, player: &PlayerIdentity) -> Result<(), NetError>;
    fn send(&mut self, event: &str, payload: Value) -> Result<(), NetError>;
    /// Registers `handler` for every inbound `event`.
    fn on(&mut self, event: &str, handler: Handler);
    /// Dispatches whatever has arrived; returns the number of messages handled.
    fn pump(&mut self) -> Result<usize, NetError>;
    fn leave(&mut self) -> Result<(), NetError>;
}

#[derive(Default)]
struct Handlers {
    by_event: HashMap<String, Vec<Handler>>,
}

impl Handlers {
    fn add(&mut self, event: &str, handler: Handler) {
        self.by_event.entry(event.to_string()).or_default().push(handler);
    }

    fn dispatch(&mut self, envelope: &Envelope) {
        match self.by_event.get_mut(&envelope.event) {
            Some(handlers) => {
                for handler in handlers.iter_mut() {
                    handler(&envelope.payload);
                }
            }
            None => tracing::trace!("No handler for {}", envelope.event),
        }
    }
}

type Inbox = Rc<RefCell<VecDeque<Envelope>>>;

struct Member {
    id: String,
    character_id: String,
    z: f32,
    inbox: Inbox,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<String, Vec<Member>>,
    finishes: Vec<FinishSubmission>,
}

impl HubState {
    fn relay_position(&mut self, broadcast: PositionBroadcast) -> Result<(), NetError> {
        let Some(members) = self.sessions.get_mut(&broadcast.room_id) else {
            tracing::debug!("Dropping update for unknown session {}", broadcast.room_id);
            return Ok(());
        };
        let state = serde_json::to_value(&broadcast.state)?;
        for member in members.iter_mut() {
            if member.id == broadcast.state.id {
                member.z = broadcast.state.z;
            } else {
                member.inbox.borrow_mut().push_back(Envelope {
                    event: RACE_UPDATE.to_string(),
                    payload: state.clone(),
                });
            }
        }
        let rankings = rank_participants(
            members
                .iter()
                .map(|m| (m.id.clone(), m.z, m.character_id.clone())),
        );
        let payload = serde_json::to_value(&rankings)?;
        for member in members.iter() {
            member.inbox.borrow_mut().push_back(Envelope {
                event: LIVE_RANKINGS.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }
}

/// In-process relay shared by several [`LoopbackTransport`]s.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Rc<RefCell<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> LoopbackTransport {
        LoopbackTransport {
            hub: self.clone(),
            inbox: Rc::default(),
            handlers: Handlers::default(),
            joined: None,
        }
    }

    pub fn members(&self, session: &str) -> usize {
        self.state.borrow().sessions.get(session).map_or(0, Vec::len)
    }

    pub fn finishes(&self) -> Vec<FinishSubmission> {
        self.state.borrow().finishes.clone()
    }
}

pub struct LoopbackTransport {
    hub: LoopbackHub,
    inbox: Inbox,
    handlers: Handlers,
    joined: Option<(String, String)>,
}

impl Transport for LoopbackTransport {
    fn join(&mut self, session: &str, player: &PlayerIdentity) -> Result<(), NetError> {
        self.leave()?;
        let mut state = self.hub.state.borrow_mut();
        state.sessions.entry(session.to_string()).or_default().push(Member {
            id: player.id.clone(),
            character_id: player.character_id.clone(),
            z: 0.0,
            inbox: Rc::clone(&self.inbox),
        });
        self.joined = Some((session.to_string(), player.id.clone()));
        tracing::debug!("{} joined loopback session {}", player.id, session);
        Ok(())
    }

    fn send(&mut self, event: &str, payload: Value) -> Result<(), NetError> {
        if self.joined.is_none() {
            return Err(NetError::NotJoined);
        }
        let mut state = self.hub.state.borrow_mut();
        match event {
            RACE_UPDATE => state.relay_position(serde_json::from_value(payload)?),
            PLAYER_FINISHED => {
                let finish: FinishSubmission = serde_json::from_value(payload)?;
                tracing::info!("{} finished in {:.2}s", finish.player.id, finish.time);
                state.finishes.push(finish);
                Ok(())
            }
            other => {
                tracing::debug!("Loopback ignores {}", other);
                Ok(())
            }
        }
    }

    fn on(&mut self, event: &str, handler: Handler) {
        self.handlers.add(event, handler);
    }

    fn pump(&mut self) -> Result<usize, NetError> {
        let pending: Vec<Envelope> = self.inbox.borrow_mut().drain(..).collect();
        for envelope in &pending {
            self.handlers.dispatch(envelope);
        }
        Ok(pending.len())
    }

    fn leave(&mut self) -> Result<(), NetError> {
        if let Some((session, id)) = self.joined.take() {
            let mut state = self.hub.state.borrow_mut();
            if let Some(members) = state.sessions.get_mut(&session) {
                members.retain(|m| m.id != id);
            }
            self.inbox.borrow_mut().clear();
        }
        Ok(())
    }
}

const MAX_DATAGRAM: usize = 65536;

/// Non-blocking UDP client for an external relay.
pub struct UdpTransport {
    socket: UdpSocket,
    handlers: Handlers,
    session: Option<String>,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub fn connect(relay: SocketAddr) -> Result<Self, NetError> {
        let bind: SocketAddr = if relay.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(relay)?;
        socket.set_nonblocking(true)?;
        tracing::info!("Relay socket {} -> {}", socket.local_addr()?, relay);
        Ok(Self {
            socket,
            handlers: Handlers::default(),
            session: None,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), NetError> {
        let envelope = Envelope {
            event: event.to_string(),
            payload,
        };
        self.socket.send(&serde_json::to_vec(&envelope)?)?;
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn join(&mut self, session: &str, player: &PlayerIdentity) -> Result<(), NetError> {
        let request = JoinRequest {
            room_id: session.to_string(),
            player: player.clone(),
        };
        self.emit(JOIN_ROOM, serde_json::to_value(&request)?)?;
        self.session = Some(session.to_string());
        Ok(())
    }

    fn send(&mut self, event: &str, payload: Value) -> Result<(), NetError> {
        if self.session.is_none() {
            return Err(NetError::NotJoined);
        }
        self.emit(event, payload)
    }

    fn on(&mut self, event: &str, handler: Handler) {
        self.handlers.add(event, handler);
    }

    fn pump(&mut self) -> Result<usize, NetError> {
        let mut handled = 0;
        loop {
            let len = match self.socket.recv(&mut self.buf) {
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // an ICMP refusal surfaces here when no relay is listening
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => break,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<Envelope>(&self.buf[..len]) {
                Ok(envelope) => {
                    self.handlers.dispatch(&envelope);
                    handled += 1;
                }
                Err(e) => tracing::debug!("Dropping malformed datagram: {}", e),
            }
        }
        Ok(handled)
    }

    fn leave(&mut self) -> Result<(), NetError> {
        if let Some(session) = self.session.take() {
            self.emit(LEAVE_ROOM, serde_json::json!({ "roomId": session }))?;
        }
        Ok(())
    }
}
