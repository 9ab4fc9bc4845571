//! Tick events
//!
//! One [`TickEvent`] is produced per scheduled click step and handed to
//! observers synchronously on the scheduler's execution context. Events are
//! ephemeral; nothing stores them.

use crate::is_accent;

/// A single scheduled click step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    /// Position within the current subdivision cycle, `0..steps_per_beat`
    pub sub_index: u32,
    /// Whether this step is the downbeat of its cycle
    pub accent: bool,
}

impl TickEvent {
    /// Build the event for a given step position
    #[inline]
    pub fn at_step(sub_index: u32) -> Self {
        Self {
            sub_index,
            accent: is_accent(sub_index),
        }
    }
}
