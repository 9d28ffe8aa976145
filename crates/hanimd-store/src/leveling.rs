//! Experience and level arithmetic.
//!
//! Reaching `level * 100` experience advances exactly one level and resets
//! experience to zero; any surplus from the same gain is discarded.

/// Experience granted per message when the caller does not say otherwise.
pub const DEFAULT_XP_GAIN: i64 = 5;

/// Experience needed per level.
pub const XP_PER_LEVEL: i64 = 100;

/// Experience required to leave `level`.
pub fn threshold(level: i64) -> i64 {
    level.max(1).saturating_mul(XP_PER_LEVEL)
}

/// Outcome of adding experience to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub level: i64,
    pub xp: i64,
    pub leveled_up: bool,
}

/// Add `amount` experience to a user currently at `level` with `xp`.
pub fn accrue(level: i64, xp: i64, amount: i64) -> Progress {
    let level = level.max(1);
    let xp = xp.saturating_add(amount);
    if xp >= threshold(level) {
        Progress {
            level: level.saturating_add(1),
            xp: 0,
            leveled_up: true,
        }
    } else {
        Progress {
            level,
            xp,
            leveled_up: false,
        }
    }
}
