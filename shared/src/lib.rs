//! Wire vocabulary shared by the arena server and its clients.
//!
//! Holds the gameplay constants both sides agree on, the fixed arena map,
//! and the JSON envelope types exchanged once a connection has been upgraded.

pub mod arena;
pub mod protocol;

pub use arena::ArenaMap;
pub use protocol::{ClientMessage, DecodeError, ServerMessage};

use std::f64::consts::{PI, TAU};

/// Distance a participant covers in one tick when moving along one axis of input.
pub const PLAYER_SPEED: f64 = 0.08;
/// Probe offset used for wall collision on each movement axis.
pub const COLLISION_RADIUS: f64 = 0.18;
pub const MAX_HEALTH: i32 = 100;

pub const SHOT_DAMAGE: i32 = 35;
pub const SHOT_COOLDOWN_TICKS: u32 = 6;
pub const SHOT_RANGE: f64 = 12.0;
pub const SHOT_STEP: f64 = 0.05;
/// Distance from a ray sample point at which a participant counts as hit.
pub const HIT_RADIUS: f64 = 0.22;

pub const DEFAULT_WIN_SCORE: u32 = 10;
pub const MIN_WIN_SCORE: u32 = 1;
pub const MAX_WIN_SCORE: u32 = 50;

pub const WALL_TEXT_MAX_CHARS: usize = 24;
pub const CHAT_TEXT_MAX_CHARS: usize = 120;

/// Spawn pool for the default arena, indexed by roster size on join and by
/// tick count on respawn.
pub const SPAWN_POINTS: [(f64, f64); 4] = [(2.5, 2.5), (13.5, 2.5), (2.5, 8.5), (13.5, 8.5)];

/// Folds an angle in radians into `(-PI, PI]`.
///
/// Angles already inside the range are returned unchanged. Non-finite input
/// collapses to zero so a bad turn delta can never poison a facing.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let folded = angle % TAU;
    if folded <= -PI {
        folded + TAU
    } else if folded > PI {
        folded - TAU
    } else {
        folded
    }
}

/// Clamps a requested win score into the accepted range.
///
/// Non-positive requests fall back to the default rather than the minimum.
pub fn clamp_win_score(requested: i64) -> u32 {
    if requested <= 0 {
        DEFAULT_WIN_SCORE
    } else if requested > MAX_WIN_SCORE as i64 {
        MAX_WIN_SCORE
    } else {
        (requested as u32).max(MIN_WIN_SCORE)
    }
}
