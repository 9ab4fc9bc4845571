//! tf-core: Tempo math and shared state for TempoForge
//!
//! This crate provides the value logic every other TempoForge crate builds
//! on: bpm clamping, subdivision → step mapping, interval lengths in seconds
//! and in audio samples, and the lock-free [`TempoState`] that carries live
//! tempo edits from the caller's thread to a running scheduler.
//!
//! No I/O and no audio dependencies live here.

mod tempo;
mod tick;

pub use tempo::*;
pub use tick::*;
