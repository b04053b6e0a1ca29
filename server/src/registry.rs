//! Process-wide directory of sessions and rooms.
//!
//! All mutation happens on [`RegistryState`] under the registry's single lock.
//! Handlers return the messages they want delivered as [`Effects`]; the
//! async [`Registry`] wrapper serializes and enqueues them only after the lock
//! is released, so no socket work ever happens while the lock is held.

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::room::{Room, RoomPhase};
use crate::sanitize::sanitize_chat;
use crate::session::{Outbound, RoomId, Session, SessionId};
use crate::utils::{get_timestamp, new_id};
use arena_shared::protocol::{
    ChatMsg, ChatSendReq, ClientMessage, HelloAck, InputReq, PongMsg, RoomConfigReq, RoomsMsg,
    ServerMessage,
};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};

const DEFAULT_ROOM_NAME: &str = "Room";

/// One message and the sessions that should receive it.
#[derive(Debug)]
pub struct Outgoing {
    pub recipients: Vec<Outbound>,
    pub message: ServerMessage,
}

/// What a handler wants to happen once the lock is released.
#[derive(Debug, Default)]
pub struct Effects {
    pub outgoing: Vec<Outgoing>,
    /// A room that just started and needs its tick loop spawned.
    pub start_loop: Option<RoomId>,
}

impl Effects {
    fn send(&mut self, recipients: Vec<Outbound>, message: ServerMessage) {
        if !recipients.is_empty() {
            self.outgoing.push(Outgoing {
                recipients,
                message,
            });
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Snapshot for this tick; keep ticking.
    Continue(Vec<Outgoing>),
    /// Final snapshot plus the end-of-match summary; stop ticking.
    Finished(Vec<Outgoing>),
    /// Room gone or no longer running.
    Stopped,
}

/// Session and room tables. Every method runs with the registry lock held.
#[derive(Debug)]
pub struct RegistryState {
    sessions: HashMap<SessionId, Session>,
    rooms: HashMap<RoomId, Room>,
    tick_ms: u64,
}

impl RegistryState {
    pub fn new(tick_ms: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            rooms: HashMap::new(),
            tick_ms,
        }
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn add_session(&mut self, session_id: SessionId, outbound: Outbound) {
        self.sessions
            .insert(session_id.clone(), Session::new(session_id, outbound));
    }

    /// Drops the session and leaves its room, if any.
    pub fn remove_session(&mut self, session_id: &str) -> Effects {
        let Some(session) = self.sessions.remove(session_id) else {
            return Effects::default();
        };
        match session.room_id {
            Some(room_id) => self.leave_room(session_id, &room_id),
            None => Effects::default(),
        }
    }

    /// Dispatches one decoded message from `session_id`.
    pub fn apply(&mut self, session_id: &str, message: ClientMessage) -> Result<Effects, AppError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(AppError::NotAuthenticated)?;
        let open = matches!(message, ClientMessage::Hello(_) | ClientMessage::Ping(_));
        if !open && !session.is_authenticated() {
            return Err(AppError::NotAuthenticated);
        }
        let room_id = session.room_id.clone();

        match message {
            ClientMessage::Hello(req) => self.hello(session_id, &req.name),
            ClientMessage::Ping(req) => {
                let mut effects = Effects::default();
                effects.send(self.direct(session_id), ServerMessage::Pong(PongMsg { t: req.t }));
                Ok(effects)
            }
            ClientMessage::RoomsList => {
                let mut effects = Effects::default();
                effects.send(self.direct(session_id), self.rooms_message());
                Ok(effects)
            }
            ClientMessage::RoomCreate(req) => self.create_room(session_id, room_id, &req.name),
            ClientMessage::RoomJoin(req) => self.join_room(session_id, room_id, &req.room_id),
            ClientMessage::RoomLeave => Ok(match room_id {
                Some(room_id) => {
                    if let Some(session) = self.sessions.get_mut(session_id) {
                        session.room_id = None;
                    }
                    self.leave_room(session_id, &room_id)
                }
                None => Effects::default(),
            }),
            ClientMessage::RoomReady(req) => {
                self.set_ready(session_id, room_id.ok_or(AppError::NotInRoom)?, req.ready)
            }
            ClientMessage::RoomStart(req) => {
                self.start_room(session_id, room_id.ok_or(AppError::NotInRoom)?, &req)
            }
            ClientMessage::RoomConfig(req) => {
                self.configure_room(session_id, room_id.ok_or(AppError::NotInRoom)?, &req)
            }
            ClientMessage::Input(req) => self.input(session_id, room_id, req),
            ClientMessage::ChatSend(req) => {
                self.chat(session_id, room_id.ok_or(AppError::NotInRoom)?, &req)
            }
        }
    }

    /// An `error{message}` addressed to the offending session only.
    pub fn error_reply(&self, session_id: &str, err: &AppError) -> Effects {
        let mut effects = Effects::default();
        effects.send(self.direct(session_id), ServerMessage::error(err.to_string()));
        effects
    }

    fn hello(&mut self, session_id: &str, name: &str) -> Result<Effects, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::NameRequired);
        }
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(AppError::NotAuthenticated)?;
        session.name = name.to_string();
        let room_id = session.room_id.clone();

        let mut effects = Effects::default();
        effects.send(
            self.direct(session_id),
            ServerMessage::HelloAck(HelloAck {
                user_id: session_id.to_string(),
                name: name.to_string(),
            }),
        );
        effects.send(self.direct(session_id), self.rooms_message());

        // renaming mid-room refreshes the roster
        if let Some(room_id) = room_id {
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.rename_participant(session_id, name);
            }
            self.broadcast_room_state(&room_id, &mut effects);
        }
        Ok(effects)
    }

    fn create_room(
        &mut self,
        session_id: &str,
        current: Option<RoomId>,
        name: &str,
    ) -> Result<Effects, AppError> {
        if current.is_some() {
            return Err(AppError::AlreadyInRoom);
        }
        let name = match name.trim() {
            "" => DEFAULT_ROOM_NAME,
            name => name,
        };
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(AppError::NotAuthenticated)?;

        let room_id = new_id("r_");
        let mut room = Room::new(room_id.clone(), name.to_string());
        room.add_participant(session.id.clone(), session.name.clone());
        session.room_id = Some(room_id.clone());
        self.rooms.insert(room_id.clone(), room);
        info!("Room {} ({}) created by {}", room_id, name, session_id);

        let mut effects = Effects::default();
        self.broadcast_room_state(&room_id, &mut effects);
        self.broadcast_rooms(&mut effects);
        Ok(effects)
    }

    fn join_room(
        &mut self,
        session_id: &str,
        current: Option<RoomId>,
        room_id: &str,
    ) -> Result<Effects, AppError> {
        let room = self.rooms.get_mut(room_id).ok_or(AppError::RoomNotFound)?;
        if room.phase() != RoomPhase::Lobby {
            return Err(AppError::RoomAlreadyStarted);
        }
        if current.is_some() {
            return Err(AppError::AlreadyInRoom);
        }
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(AppError::NotAuthenticated)?;
        room.add_participant(session.id.clone(), session.name.clone());
        session.room_id = Some(room_id.to_string());
        info!("Session {} joined room {}", session_id, room_id);

        let mut effects = Effects::default();
        self.broadcast_room_state(room_id, &mut effects);
        self.broadcast_rooms(&mut effects);
        Ok(effects)
    }

    /// Removes `session_id` from the room roster. The caller has already
    /// cleared (or removed) the session's own room reference.
    fn leave_room(&mut self, session_id: &str, room_id: &str) -> Effects {
        let mut effects = Effects::default();
        let Some(room) = self.rooms.get_mut(room_id) else {
            return effects;
        };
        room.remove_participant(session_id);
        if room.is_empty() {
            self.rooms.remove(room_id);
            info!("Room {} closed", room_id);
        } else {
            self.broadcast_room_state(room_id, &mut effects);
        }
        debug!("Session {} left room {}", session_id, room_id);
        self.broadcast_rooms(&mut effects);
        effects
    }

    fn set_ready(
        &mut self,
        session_id: &str,
        room_id: RoomId,
        ready: bool,
    ) -> Result<Effects, AppError> {
        let room = self.rooms.get_mut(&room_id).ok_or(AppError::NotInRoom)?;
        if room.phase() != RoomPhase::Lobby {
            return Err(AppError::RoomAlreadyStarted);
        }
        room.set_ready(session_id, ready);

        let mut effects = Effects::default();
        self.broadcast_room_state(&room_id, &mut effects);
        Ok(effects)
    }

    fn start_room(
        &mut self,
        session_id: &str,
        room_id: RoomId,
        overrides: &RoomConfigReq,
    ) -> Result<Effects, AppError> {
        let tick_ms = self.tick_ms;
        let room = self.rooms.get_mut(&room_id).ok_or(AppError::NotInRoom)?;
        if room.host_id() != session_id {
            return Err(AppError::NotHostStart);
        }
        if room.phase() != RoomPhase::Lobby {
            return Err(AppError::RoomAlreadyStarted);
        }
        if !room.all_ready() {
            return Err(AppError::NotAllReady);
        }
        room.configure(overrides);
        room.start();
        let start = room.game_start(tick_ms);

        let mut effects = Effects::default();
        self.broadcast_room_state(&room_id, &mut effects);
        effects.send(self.members(&room_id), ServerMessage::GameStart(start));
        self.broadcast_rooms(&mut effects);
        effects.start_loop = Some(room_id);
        Ok(effects)
    }

    fn configure_room(
        &mut self,
        session_id: &str,
        room_id: RoomId,
        overrides: &RoomConfigReq,
    ) -> Result<Effects, AppError> {
        let room = self.rooms.get_mut(&room_id).ok_or(AppError::NotInRoom)?;
        if room.host_id() != session_id {
            return Err(AppError::NotHostConfig);
        }
        if room.phase() != RoomPhase::Lobby {
            return Err(AppError::RoomAlreadyStarted);
        }
        room.configure(overrides);

        let mut effects = Effects::default();
        self.broadcast_room_state(&room_id, &mut effects);
        self.broadcast_rooms(&mut effects);
        Ok(effects)
    }

    /// Input outside a running match is dropped without a reply.
    fn input(
        &mut self,
        session_id: &str,
        room_id: Option<RoomId>,
        input: InputReq,
    ) -> Result<Effects, AppError> {
        if !input.turn.is_finite() {
            return Err(AppError::InvalidPayload);
        }
        let room = room_id.and_then(|room_id| self.rooms.get_mut(&room_id));
        if let Some(room) = room.filter(|room| room.phase() == RoomPhase::Started) {
            room.set_input(session_id, input);
        }
        Ok(Effects::default())
    }

    fn chat(
        &mut self,
        session_id: &str,
        room_id: RoomId,
        req: &ChatSendReq,
    ) -> Result<Effects, AppError> {
        let mut effects = Effects::default();
        let text = sanitize_chat(&req.text);
        if text.is_empty() {
            return Ok(effects);
        }
        let name = self
            .sessions
            .get(session_id)
            .map(|session| session.name.clone())
            .unwrap_or_default();
        let message = ServerMessage::Chat(ChatMsg {
            user_id: session_id.to_string(),
            name,
            text,
            ts: get_timestamp(),
        });
        effects.send(self.members(&room_id), message);
        Ok(effects)
    }

    /// Advances one room by a tick and collects what its members should see.
    pub fn tick_room(&mut self, room_id: &str) -> TickOutcome {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return TickOutcome::Stopped;
        };
        if room.phase() != RoomPhase::Started {
            return TickOutcome::Stopped;
        }
        room.tick();
        if room.tick_count() % 100 == 0 {
            debug!("Room {} reached tick {}", room_id, room.tick_count());
        }
        let snapshot = room.game_state();
        let game_over = room.take_game_over();

        let recipients = self.members(room_id);
        let mut outgoing = vec![Outgoing {
            recipients: recipients.clone(),
            message: ServerMessage::GameState(snapshot),
        }];
        match game_over {
            Some(summary) => {
                outgoing.push(Outgoing {
                    recipients,
                    message: ServerMessage::GameOver(summary),
                });
                TickOutcome::Finished(outgoing)
            }
            None => TickOutcome::Continue(outgoing),
        }
    }

    fn direct(&self, session_id: &str) -> Vec<Outbound> {
        self.sessions
            .get(session_id)
            .map(|session| vec![session.outbound.clone()])
            .unwrap_or_default()
    }

    /// Authenticated sessions on the room's roster, in join order.
    fn members(&self, room_id: &str) -> Vec<Outbound> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.participant_ids()
            .filter_map(|id| self.sessions.get(id))
            .filter(|session| session.is_authenticated())
            .map(|session| session.outbound.clone())
            .collect()
    }

    /// Authenticated sessions that are not in any room.
    fn lobby_browsers(&self) -> Vec<Outbound> {
        self.sessions
            .values()
            .filter(|session| session.is_authenticated() && session.room_id.is_none())
            .map(|session| session.outbound.clone())
            .collect()
    }

    /// Rooms still accepting players, ordered by name.
    fn rooms_message(&self) -> ServerMessage {
        let mut rooms: Vec<_> = self
            .rooms
            .values()
            .filter(|room| room.phase() == RoomPhase::Lobby)
            .map(Room::summary)
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        ServerMessage::Rooms(RoomsMsg { rooms })
    }

    fn broadcast_rooms(&self, effects: &mut Effects) {
        effects.send(self.lobby_browsers(), self.rooms_message());
    }

    fn broadcast_room_state(&self, room_id: &str, effects: &mut Effects) {
        if let Some(room) = self.rooms.get(room_id) {
            effects.send(self.members(room_id), ServerMessage::RoomState(room.state()));
        }
    }
}

/// Serializes each message once and enqueues it for every recipient.
fn deliver(outgoing: Vec<Outgoing>) {
    for Outgoing {
        recipients,
        message,
    } in outgoing
    {
        let encoded: Arc<str> = match serde_json::to_string(&message) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!("Failed to encode {} message: {}", message.kind(), e);
                continue;
            }
        };
        for outbound in &recipients {
            outbound.push(Arc::clone(&encoded));
        }
    }
}

/// Shared handle on the registry; one per process, cloned into every task.
pub struct Registry {
    state: Mutex<RegistryState>,
    tick_interval: Duration,
    queue_capacity: usize,
}

impl Registry {
    pub fn new(config: &ServerConfig) -> Self {
        let tick_interval = config.tick_interval();
        Self {
            state: Mutex::new(RegistryState::new(tick_interval.as_millis() as u64)),
            tick_interval,
            queue_capacity: config.outbound_queue,
        }
    }

    /// Registers a fresh, unauthenticated session and returns the receiving
    /// end of its outbound queue.
    pub async fn connect(&self) -> (SessionId, mpsc::Receiver<Arc<str>>) {
        let session_id = new_id("u_");
        let (outbound, rx) = Outbound::channel(session_id.clone(), self.queue_capacity);
        self.state.lock().await.add_session(session_id.clone(), outbound);
        (session_id, rx)
    }

    pub async fn disconnect(&self, session_id: &str) {
        let effects = self.state.lock().await.remove_session(session_id);
        deliver(effects.outgoing);
    }

    /// Decodes and dispatches one inbound text payload. Validation failures
    /// go back to the sender as `error` messages; nothing else is affected.
    pub async fn handle_frame(self: &Arc<Self>, session_id: &str, payload: &[u8]) {
        let effects = {
            let mut state = self.state.lock().await;
            let result = ClientMessage::decode(payload)
                .map_err(AppError::from)
                .and_then(|message| {
                    debug!("{} <- {}", session_id, message.kind());
                    state.apply(session_id, message)
                });
            match result {
                Ok(effects) => effects,
                Err(err) => {
                    debug!("Rejected message from {}: {}", session_id, err);
                    state.error_reply(session_id, &err)
                }
            }
        };

        deliver(effects.outgoing);
        if let Some(room_id) = effects.start_loop {
            tokio::spawn(Arc::clone(self).run_room(room_id));
        }
    }

    pub async fn tick_room(&self, room_id: &str) -> TickOutcome {
        self.state.lock().await.tick_room(room_id)
    }

    /// Fixed-rate simulation loop for one started room. Exits once the match
    /// finishes or the room disappears.
    pub async fn run_room(self: Arc<Self>, room_id: RoomId) {
        let mut interval_timer = interval(self.tick_interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        interval_timer.tick().await;

        info!("Room {} ticking every {:?}", room_id, self.tick_interval);
        loop {
            interval_timer.tick().await;
            match self.tick_room(&room_id).await {
                TickOutcome::Continue(outgoing) => deliver(outgoing),
                TickOutcome::Finished(outgoing) => {
                    deliver(outgoing);
                    info!("Room {} match over", room_id);
                    break;
                }
                TickOutcome::Stopped => {
                    debug!("Room {} loop stopped", room_id);
                    break;
                }
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.session_count()
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.room_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::protocol::{HelloReq, RoomCreateReq, RoomJoinReq, RoomReadyReq};
    use arena_shared::SHOT_DAMAGE;

    const TICK_MS: u64 = 50;

    struct Client {
        id: SessionId,
        rx: mpsc::Receiver<Arc<str>>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(text) = self.rx.try_recv() {
                messages.push(serde_json::from_str(&text).unwrap());
            }
            messages
        }

        fn kinds(&mut self) -> Vec<&'static str> {
            self.drain().iter().map(ServerMessage::kind).collect()
        }
    }

    fn connect(state: &mut RegistryState, id: &str) -> Client {
        let (outbound, rx) = Outbound::channel(id.to_string(), 64);
        state.add_session(id.to_string(), outbound);
        Client {
            id: id.to_string(),
            rx,
        }
    }

    fn send(state: &mut RegistryState, client: &Client, message: ClientMessage) -> Result<Effects, AppError> {
        let result = state.apply(&client.id, message);
        if let Ok(effects) = &result {
            deliver(
                effects
                    .outgoing
                    .iter()
                    .map(|o| Outgoing {
                        recipients: o.recipients.clone(),
                        message: o.message.clone(),
                    })
                    .collect(),
            );
        }
        result
    }

    fn hello(state: &mut RegistryState, client: &mut Client) {
        send(
            state,
            client,
            ClientMessage::Hello(HelloReq {
                name: format!("name-{}", client.id),
            }),
        )
        .unwrap();
        client.drain();
    }

    fn create(state: &mut RegistryState, client: &mut Client) -> RoomId {
        send(
            state,
            client,
            ClientMessage::RoomCreate(RoomCreateReq {
                name: "Arena".to_string(),
            }),
        )
        .unwrap();
        client.drain();
        state.session(&client.id).unwrap().room_id.clone().unwrap()
    }

    fn join(state: &mut RegistryState, client: &mut Client, room_id: &str) {
        send(
            state,
            client,
            ClientMessage::RoomJoin(RoomJoinReq {
                room_id: room_id.to_string(),
            }),
        )
        .unwrap();
    }

    fn ready(state: &mut RegistryState, client: &Client) {
        send(state, client, ClientMessage::RoomReady(RoomReadyReq { ready: true })).unwrap();
    }

    #[test]
    fn test_everything_but_hello_and_ping_needs_auth() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");

        assert_eq!(
            send(&mut state, &a, ClientMessage::RoomsList).unwrap_err(),
            AppError::NotAuthenticated
        );
        assert_eq!(
            send(&mut state, &a, ClientMessage::RoomCreate(RoomCreateReq::default())).unwrap_err(),
            AppError::NotAuthenticated
        );

        send(&mut state, &a, ClientMessage::Ping(arena_shared::protocol::PingReq { t: 42 })).unwrap();
        assert_eq!(a.drain(), vec![ServerMessage::Pong(PongMsg { t: 42 })]);
    }

    #[test]
    fn test_hello_acks_then_lists_rooms() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");

        assert_eq!(
            send(&mut state, &a, ClientMessage::Hello(HelloReq { name: "   ".to_string() })).unwrap_err(),
            AppError::NameRequired
        );

        send(&mut state, &a, ClientMessage::Hello(HelloReq { name: " ada ".to_string() })).unwrap();
        let messages = a.drain();
        assert_eq!(
            messages[0],
            ServerMessage::HelloAck(HelloAck {
                user_id: "u_a".to_string(),
                name: "ada".to_string(),
            })
        );
        assert_eq!(messages[1], ServerMessage::Rooms(RoomsMsg { rooms: vec![] }));
        assert!(state.session("u_a").unwrap().is_authenticated());
    }

    #[test]
    fn test_room_lifecycle_and_host_handover() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        let mut b = connect(&mut state, "u_b");
        hello(&mut state, &mut a);
        hello(&mut state, &mut b);

        send(&mut state, &a, ClientMessage::RoomCreate(RoomCreateReq { name: "  ".to_string() })).unwrap();
        let room_id = state.session("u_a").unwrap().room_id.clone().unwrap();
        assert_eq!(state.room(&room_id).unwrap().name, DEFAULT_ROOM_NAME);
        assert_eq!(a.kinds(), vec!["room_state"]);

        // b is browsing the lobby and sees the new room
        match b.drain().as_slice() {
            [ServerMessage::Rooms(list)] => {
                assert_eq!(list.rooms.len(), 1);
                assert_eq!(list.rooms[0].players, 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        join(&mut state, &mut b, &room_id);
        assert_eq!(a.kinds(), vec!["room_state"]);
        match b.drain().as_slice() {
            [ServerMessage::RoomState(room)] => {
                assert_eq!(room.host_id, "u_a");
                assert_eq!(room.players.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            send(&mut state, &b, ClientMessage::RoomCreate(RoomCreateReq::default())).unwrap_err(),
            AppError::AlreadyInRoom
        );
        assert_eq!(
            send(&mut state, &b, ClientMessage::RoomJoin(RoomJoinReq { room_id: room_id.clone() })).unwrap_err(),
            AppError::AlreadyInRoom
        );
        assert_eq!(
            send(&mut state, &b, ClientMessage::RoomJoin(RoomJoinReq { room_id: "r_missing".to_string() })).unwrap_err(),
            AppError::RoomNotFound
        );

        send(&mut state, &a, ClientMessage::RoomLeave).unwrap();
        assert_eq!(state.room(&room_id).unwrap().host_id(), "u_b");
        assert_eq!(a.kinds(), vec!["rooms"]);

        // leaving twice is a no-op
        assert!(send(&mut state, &a, ClientMessage::RoomLeave).unwrap().outgoing.is_empty());

        send(&mut state, &b, ClientMessage::RoomLeave).unwrap();
        assert!(state.room(&room_id).is_none());
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn test_disconnect_removes_session_and_empty_room() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        let mut b = connect(&mut state, "u_b");
        hello(&mut state, &mut a);
        hello(&mut state, &mut b);
        let room_id = create(&mut state, &mut a);
        join(&mut state, &mut b, &room_id);
        a.drain();

        deliver(state.remove_session("u_b").outgoing);
        assert_eq!(state.session_count(), 1);
        match a.drain().as_slice() {
            [ServerMessage::RoomState(room)] => assert_eq!(room.players.len(), 1),
            other => panic!("unexpected {:?}", other),
        }

        state.remove_session("u_a");
        assert_eq!(state.session_count(), 0);
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn test_start_requires_host_and_everyone_ready() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        let mut b = connect(&mut state, "u_b");
        let mut c = connect(&mut state, "u_c");
        hello(&mut state, &mut a);
        hello(&mut state, &mut b);
        hello(&mut state, &mut c);
        let room_id = create(&mut state, &mut a);
        join(&mut state, &mut b, &room_id);

        let start = || ClientMessage::RoomStart(RoomConfigReq::default());
        assert_eq!(send(&mut state, &b, start()).unwrap_err(), AppError::NotHostStart);
        ready(&mut state, &a);
        assert_eq!(send(&mut state, &a, start()).unwrap_err(), AppError::NotAllReady);
        ready(&mut state, &b);
        a.drain();
        b.drain();
        c.drain();

        let effects = send(
            &mut state,
            &a,
            ClientMessage::RoomStart(RoomConfigReq {
                win_score: Some(3),
                ..Default::default()
            }),
        )
        .unwrap();
        assert_eq!(effects.start_loop.as_deref(), Some(room_id.as_str()));
        assert_eq!(a.kinds(), vec!["room_state", "game_start"]);
        assert_eq!(c.drain(), vec![ServerMessage::Rooms(RoomsMsg { rooms: vec![] })]);

        let room = state.room(&room_id).unwrap();
        assert_eq!(room.phase(), RoomPhase::Started);
        assert_eq!(room.config().win_score, 3);
        assert!(!room.all_ready());

        assert_eq!(
            send(&mut state, &c, ClientMessage::RoomJoin(RoomJoinReq { room_id: room_id.clone() })).unwrap_err(),
            AppError::RoomAlreadyStarted
        );
        assert_eq!(send(&mut state, &a, start()).unwrap_err(), AppError::RoomAlreadyStarted);
        assert_eq!(
            send(&mut state, &a, ClientMessage::RoomConfig(RoomConfigReq::default())).unwrap_err(),
            AppError::RoomAlreadyStarted
        );
        assert_eq!(
            send(&mut state, &b, ClientMessage::RoomConfig(RoomConfigReq::default())).unwrap_err(),
            AppError::NotHostConfig
        );
    }

    #[test]
    fn test_config_clamps_win_score() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        hello(&mut state, &mut a);
        let room_id = create(&mut state, &mut a);

        for (requested, expected) in [(0, 10), (999, 50), (-5, 10), (7, 7)] {
            send(
                &mut state,
                &a,
                ClientMessage::RoomConfig(RoomConfigReq {
                    win_score: Some(requested),
                    ..Default::default()
                }),
            )
            .unwrap();
            assert_eq!(state.room(&room_id).unwrap().config().win_score, expected);
        }
    }

    #[test]
    fn test_config_change_refreshes_lobby_list() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        let mut b = connect(&mut state, "u_b");
        hello(&mut state, &mut a);
        hello(&mut state, &mut b);
        let room_id = create(&mut state, &mut a);
        b.drain();

        send(
            &mut state,
            &a,
            ClientMessage::RoomConfig(RoomConfigReq {
                win_score: Some(3),
                ..Default::default()
            }),
        )
        .unwrap();
        assert_eq!(a.kinds(), vec!["room_state"]);
        match b.drain().as_slice() {
            [ServerMessage::Rooms(list)] => {
                assert_eq!(list.rooms.len(), 1);
                assert_eq!(list.rooms[0].id, room_id);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rooms_list_answers_inside_a_room() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        hello(&mut state, &mut a);
        let room_id = create(&mut state, &mut a);

        send(&mut state, &a, ClientMessage::RoomsList).unwrap();
        match a.drain().as_slice() {
            [ServerMessage::Rooms(list)] => {
                assert_eq!(list.rooms.len(), 1);
                assert_eq!(list.rooms[0].id, room_id);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chat_is_sanitized_and_room_scoped() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        let mut b = connect(&mut state, "u_b");
        hello(&mut state, &mut a);
        hello(&mut state, &mut b);

        let chat = |text: &str| {
            ClientMessage::ChatSend(ChatSendReq {
                text: text.to_string(),
            })
        };
        assert_eq!(send(&mut state, &a, chat("hi")).unwrap_err(), AppError::NotInRoom);

        let room_id = create(&mut state, &mut a);
        join(&mut state, &mut b, &room_id);
        a.drain();
        b.drain();

        assert!(send(&mut state, &a, chat("   ")).unwrap().outgoing.is_empty());
        send(&mut state, &a, chat("  gg  ")).unwrap();
        for client in [&mut a, &mut b] {
            match client.drain().as_slice() {
                [ServerMessage::Chat(msg)] => {
                    assert_eq!(msg.user_id, "u_a");
                    assert_eq!(msg.name, "name-u_a");
                    assert_eq!(msg.text, "gg");
                    assert!(msg.ts > 0);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_input_outside_match_is_ignored() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        hello(&mut state, &mut a);

        let turn = InputReq {
            turn: 1.0,
            ..Default::default()
        };
        assert!(send(&mut state, &a, ClientMessage::Input(turn)).unwrap().outgoing.is_empty());

        let room_id = create(&mut state, &mut a);
        send(&mut state, &a, ClientMessage::Input(turn)).unwrap();
        assert_eq!(state.room(&room_id).unwrap().participant("u_a").unwrap().dir, 0.0);

        let bad = InputReq {
            turn: f64::NAN,
            ..Default::default()
        };
        assert_eq!(
            send(&mut state, &a, ClientMessage::Input(bad)).unwrap_err(),
            AppError::InvalidPayload
        );
    }

    #[test]
    fn test_finished_room_reports_game_over_once() {
        let mut state = RegistryState::new(TICK_MS);
        let mut a = connect(&mut state, "u_a");
        let mut b = connect(&mut state, "u_b");
        hello(&mut state, &mut a);
        hello(&mut state, &mut b);
        let room_id = create(&mut state, &mut a);
        join(&mut state, &mut b, &room_id);
        ready(&mut state, &a);
        ready(&mut state, &b);
        send(
            &mut state,
            &a,
            ClientMessage::RoomStart(RoomConfigReq {
                win_score: Some(1),
                ..Default::default()
            }),
        )
        .unwrap();
        a.drain();

        {
            let room = state.rooms.get_mut(&room_id).unwrap();
            let shooter = room.participant_mut("u_a").unwrap();
            shooter.x = 2.5;
            shooter.y = 1.5;
            let target = room.participant_mut("u_b").unwrap();
            target.x = 4.5;
            target.y = 1.5;
            target.hp = SHOT_DAMAGE;
        }
        send(
            &mut state,
            &a,
            ClientMessage::Input(InputReq {
                shoot: true,
                ..Default::default()
            }),
        )
        .unwrap();

        match state.tick_room(&room_id) {
            TickOutcome::Finished(outgoing) => {
                let kinds: Vec<_> = outgoing.iter().map(|o| o.message.kind()).collect();
                assert_eq!(kinds, vec!["game_state", "game_over"]);
                match &outgoing[1].message {
                    ServerMessage::GameOver(over) => {
                        assert_eq!(over.winner_id, "u_a");
                        assert_eq!(over.room_id, room_id);
                    }
                    other => panic!("unexpected {:?}", other),
                }
                assert_eq!(outgoing[1].recipients.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(state.tick_room(&room_id), TickOutcome::Stopped));
        assert!(matches!(state.tick_room("r_missing"), TickOutcome::Stopped));

        let room = state.room(&room_id).unwrap();
        assert!(room.state().finished);
        assert_eq!(room.state().winner_id, "u_a");
    }

    #[tokio::test]
    async fn test_registry_connect_and_disconnect() {
        let registry = Arc::new(Registry::new(&ServerConfig::default()));
        let (session_id, mut rx) = registry.connect().await;
        assert!(session_id.starts_with("u_"));
        assert_eq!(registry.session_count().await, 1);

        registry
            .handle_frame(&session_id, br#"{"type":"ping","payload":{"t":7}}"#)
            .await;
        assert_eq!(rx.recv().await.unwrap().as_ref(), r#"{"type":"pong","payload":{"t":7}}"#);

        registry.handle_frame(&session_id, b"not json").await;
        assert_eq!(
            rx.recv().await.unwrap().as_ref(),
            r#"{"type":"error","payload":{"message":"invalid json"}}"#
        );

        registry.disconnect(&session_id).await;
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(registry.room_count().await, 0);
    }
}
