//! Authoritative state and per-tick simulation for a single match.

use crate::sanitize::sanitize_wall_text;
use crate::session::{RoomId, SessionId};
use arena_shared::protocol::{
    GameOver, GameStart, GameStateMsg, InputReq, PlayerFrame, RoomConfigReq, RoomState,
    RoomSummary, RosterEntry,
};
use arena_shared::{
    clamp_win_score, normalize_angle, ArenaMap, COLLISION_RADIUS, DEFAULT_WIN_SCORE, HIT_RADIUS,
    MAX_HEALTH, PLAYER_SPEED, SHOT_COOLDOWN_TICKS, SHOT_DAMAGE, SHOT_RANGE, SHOT_STEP,
    SPAWN_POINTS,
};
use log::info;
use std::f64::consts::FRAC_PI_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Lobby,
    Started,
    /// Terminal.
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomConfig {
    pub win_score: u32,
    pub show_enemies_on_map: bool,
    pub wall_text: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            win_score: DEFAULT_WIN_SCORE,
            show_enemies_on_map: true,
            wall_text: String::new(),
        }
    }
}

impl RoomConfig {
    /// Applies whichever overrides are present, clamping and sanitizing.
    pub fn apply(&mut self, req: &RoomConfigReq) {
        if let Some(win_score) = req.win_score {
            self.win_score = clamp_win_score(win_score);
        }
        if let Some(show) = req.show_enemies_on_map {
            self.show_enemies_on_map = show;
        }
        if let Some(text) = &req.wall_text {
            self.wall_text = sanitize_wall_text(text);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: SessionId,
    pub name: String,
    pub ready: bool,
    pub x: f64,
    pub y: f64,
    /// Facing in radians, always within `(-PI, PI]`.
    pub dir: f64,
    pub hp: i32,
    pub score: u32,
    /// Ticks until the weapon may fire again.
    pub cooldown: u32,
    pub input: InputReq,
}

impl Participant {
    fn new(id: SessionId, name: String, spawn: (f64, f64)) -> Self {
        Self {
            id,
            name,
            ready: false,
            x: spawn.0,
            y: spawn.1,
            dir: 0.0,
            hp: MAX_HEALTH,
            score: 0,
            cooldown: 0,
            input: InputReq::default(),
        }
    }

    fn frame(&self) -> PlayerFrame {
        PlayerFrame {
            id: self.id.clone(),
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            dir: self.dir,
            hp: self.hp,
            score: self.score,
        }
    }

    fn step(&mut self, map: &ArenaMap) {
        let input = self.input;
        let (mut dx, mut dy) = (0.0, 0.0);
        let mut push = |angle: f64, sign: f64| {
            dx += sign * angle.cos() * PLAYER_SPEED;
            dy += sign * angle.sin() * PLAYER_SPEED;
        };
        if input.forward {
            push(self.dir, 1.0);
        }
        if input.back {
            push(self.dir, -1.0);
        }
        if input.left {
            push(self.dir - FRAC_PI_2, 1.0);
        }
        if input.right {
            push(self.dir + FRAC_PI_2, 1.0);
        }

        // Axes commit independently so a blocked axis still lets the other slide.
        let nx = self.x + dx;
        if !map.is_wall(nx + COLLISION_RADIUS, self.y) && !map.is_wall(nx - COLLISION_RADIUS, self.y)
        {
            self.x = nx;
        }
        let ny = self.y + dy;
        if !map.is_wall(self.x, ny + COLLISION_RADIUS) && !map.is_wall(self.x, ny - COLLISION_RADIUS)
        {
            self.y = ny;
        }
    }
}

/// One match: roster, configuration, lifecycle and simulation clock.
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    host_id: SessionId,
    phase: RoomPhase,
    tick: u64,
    config: RoomConfig,
    map: ArenaMap,
    /// Join order; the first entry inherits host when the host leaves.
    participants: Vec<Participant>,
    winner_id: Option<SessionId>,
    game_over_sent: bool,
}

impl Room {
    pub fn new(id: RoomId, name: String) -> Self {
        Self {
            id,
            name,
            host_id: String::new(),
            phase: RoomPhase::Lobby,
            tick: 0,
            config: RoomConfig::default(),
            map: ArenaMap::default_arena(),
            participants: Vec::new(),
            winner_id: None,
            game_over_sent: false,
        }
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn winner_id(&self) -> Option<&str> {
        self.winner_id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub(crate) fn participant_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.id.as_str())
    }

    /// Adds a participant at the next spawn slot. The first one becomes host.
    pub fn add_participant(&mut self, id: SessionId, name: String) {
        if self.participant(&id).is_some() {
            return;
        }
        let spawn = SPAWN_POINTS[self.participants.len() % SPAWN_POINTS.len()];
        if self.host_id.is_empty() {
            self.host_id = id.clone();
        }
        self.participants.push(Participant::new(id, name, spawn));
    }

    /// Removes a participant, handing host to the earliest remaining joiner.
    pub fn remove_participant(&mut self, id: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        if self.host_id == id {
            self.host_id = self
                .participants
                .first()
                .map(|p| p.id.clone())
                .unwrap_or_default();
        }
        self.participants.len() != before
    }

    pub fn rename_participant(&mut self, id: &str, name: &str) {
        if let Some(p) = self.participant_mut(id) {
            p.name = name.to_string();
        }
    }

    pub fn set_ready(&mut self, id: &str, ready: bool) {
        if let Some(p) = self.participant_mut(id) {
            p.ready = ready;
        }
    }

    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty() && self.participants.iter().all(|p| p.ready)
    }

    pub fn configure(&mut self, req: &RoomConfigReq) {
        self.config.apply(req);
    }

    /// Flips lobby to started and resets per-match participant state.
    pub fn start(&mut self) {
        self.phase = RoomPhase::Started;
        self.winner_id = None;
        self.game_over_sent = false;
        for p in &mut self.participants {
            p.ready = false;
            p.hp = MAX_HEALTH;
            p.score = 0;
            p.cooldown = 0;
            p.input = InputReq::default();
        }
        info!(
            "Room {} started with {} players, win score {}",
            self.id,
            self.participants.len(),
            self.config.win_score
        );
    }

    /// Stores the latest input. Turning applies right away; movement and the
    /// fire flag wait for the next tick.
    pub fn set_input(&mut self, id: &str, input: InputReq) {
        if let Some(p) = self.participant_mut(id) {
            p.dir = normalize_angle(p.dir + input.turn);
            p.input = input;
        }
    }

    /// Advances the simulation by one tick. Does nothing unless started.
    pub fn tick(&mut self) {
        if self.phase != RoomPhase::Started {
            return;
        }
        self.tick += 1;

        let map = &self.map;
        for p in &mut self.participants {
            p.step(map);
        }

        for shooter in 0..self.participants.len() {
            let p = &mut self.participants[shooter];
            if p.cooldown > 0 {
                p.cooldown -= 1;
            }
            let fire = p.input.shoot && p.cooldown == 0;
            p.input.shoot = false;
            if fire {
                p.cooldown = SHOT_COOLDOWN_TICKS;
                self.resolve_shot(shooter);
            }
        }
    }

    /// Marches a ray from the shooter; the first sample point within hit
    /// radius of a living participant takes the damage. Walls absorb the shot.
    fn resolve_shot(&mut self, shooter: usize) {
        let (origin_x, origin_y, dir) = {
            let p = &self.participants[shooter];
            (p.x, p.y, p.dir)
        };
        let (step_x, step_y) = (dir.cos() * SHOT_STEP, dir.sin() * SHOT_STEP);
        let steps = (SHOT_RANGE / SHOT_STEP).round() as usize;

        let (mut x, mut y) = (origin_x, origin_y);
        let mut hit = None;
        for _ in 0..steps {
            x += step_x;
            y += step_y;
            if self.map.is_wall(x, y) {
                return;
            }
            hit = self.participants.iter().enumerate().position(|(i, target)| {
                let (dx, dy) = (target.x - x, target.y - y);
                i != shooter && target.hp > 0 && dx * dx + dy * dy <= HIT_RADIUS * HIT_RADIUS
            });
            if hit.is_some() {
                break;
            }
        }
        let Some(target) = hit else {
            return;
        };

        self.participants[target].hp -= SHOT_DAMAGE;
        if self.participants[target].hp > 0 {
            return;
        }

        let score = {
            let p = &mut self.participants[shooter];
            p.score += 1;
            p.score
        };
        if self.phase != RoomPhase::Finished && score >= self.config.win_score {
            self.phase = RoomPhase::Finished;
            self.winner_id = Some(self.participants[shooter].id.clone());
            info!(
                "Room {} finished on tick {}, winner {}",
                self.id, self.tick, self.participants[shooter].id
            );
        }
        self.respawn(target);
    }

    /// Deterministic respawn: the slot is chosen by tick count.
    fn respawn(&mut self, index: usize) {
        let spawn = SPAWN_POINTS[(self.tick % SPAWN_POINTS.len() as u64) as usize];
        let p = &mut self.participants[index];
        p.x = spawn.0;
        p.y = spawn.1;
        p.hp = MAX_HEALTH;
        p.dir = 0.0;
    }

    /// Final standings: score descending, then health descending.
    pub fn rankings(&self) -> Vec<PlayerFrame> {
        let mut frames: Vec<PlayerFrame> = self.participants.iter().map(Participant::frame).collect();
        frames.sort_by(|a, b| b.score.cmp(&a.score).then(b.hp.cmp(&a.hp)));
        frames
    }

    /// Yields the end-of-match summary the first time it is asked for after
    /// the room finished, and `None` forever after.
    pub fn take_game_over(&mut self) -> Option<GameOver> {
        if self.phase != RoomPhase::Finished || self.game_over_sent {
            return None;
        }
        self.game_over_sent = true;
        Some(GameOver {
            room_id: self.id.clone(),
            room_name: self.name.clone(),
            winner_id: self.winner_id.clone().unwrap_or_default(),
            win_score: self.config.win_score,
            rankings: self.rankings(),
        })
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            players: self.participants.len(),
            started: self.phase != RoomPhase::Lobby,
        }
    }

    pub fn state(&self) -> RoomState {
        RoomState {
            id: self.id.clone(),
            name: self.name.clone(),
            host_id: self.host_id.clone(),
            started: self.phase != RoomPhase::Lobby,
            finished: self.phase == RoomPhase::Finished,
            winner_id: self.winner_id.clone().unwrap_or_default(),
            win_score: self.config.win_score,
            show_enemies_on_map: self.config.show_enemies_on_map,
            wall_text: self.config.wall_text.clone(),
            players: self
                .participants
                .iter()
                .map(|p| RosterEntry {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    ready: p.ready,
                })
                .collect(),
        }
    }

    pub fn game_state(&self) -> GameStateMsg {
        GameStateMsg {
            tick: self.tick,
            players: self.participants.iter().map(Participant::frame).collect(),
        }
    }

    pub fn game_start(&self, tick_ms: u64) -> GameStart {
        GameStart {
            map: self.map.clone(),
            tick_ms,
            win_score: self.config.win_score,
            show_enemies_on_map: self.config.show_enemies_on_map,
            wall_text: self.config.wall_text.clone(),
        }
    }
}
