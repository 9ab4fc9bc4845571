//! tf-audio: Click playback backends using cpal
//!
//! Everything that makes noise lives here: the `ClickSink` trait the engine
//! schedules against, the cached click samples, and the cpal-backed
//! streaming sink with its pacing ring.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │ scheduler     │────▶│ StreamingPcmSink │────▶│ cpal Device │
//! │               │     │                  │     │             │
//! │ - play(tick)  │     │ - voice pool     │     │ - output    │
//! │ - pacer clock │     │ - pacing ring    │     │   callback  │
//! └───────────────┘     │ - ClickCache     │     └─────────────┘
//!                       └──────────────────┘
//! ```
//!
//! `ToneSink` and `NullSink` are the fallbacks when no output device is
//! usable; they satisfy the same trait without touching cpal.

mod cache;
mod device;
mod error;
mod sink;
mod stream;
mod thread_priority;

pub use cache::*;
pub use device::*;
pub use error::*;
pub use sink::*;
pub use stream::*;
pub use thread_priority::*;
