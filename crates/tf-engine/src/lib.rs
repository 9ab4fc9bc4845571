//! tf-engine: tick scheduling and the metronome orchestrator
//!
//! Three interchangeable scheduling strategies produce a drift-free tick
//! sequence behind one contract; [`Metronome`] owns whichever one is
//! configured and republishes its ticks.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────────────┐     ┌─────────────┐
//! │ Metronome     │────▶│ SchedulerRun         │────▶│ ClickSink   │
//! │               │     │                      │     │             │
//! │ - start/stop  │     │ - stream-clocked     │     │ - play()    │
//! │ - live tempo  │     │ - wall-clock         │     └─────────────┘
//! │ - tick events │     │ - one-shot timer     │
//! └───────────────┘     └──────────────────────┘
//! ```
//!
//! Every strategy computes tick instants as `anchor + tick_index × interval`
//! (never by accumulating previous nominal times), re-reads the live tempo
//! each scheduling decision, and fast-forwards past missed boundaries in a
//! single jump.

mod engine;
mod os_timer;
mod scheduler;
mod stream_clock;
mod wall_clock;

pub use engine::*;
pub use os_timer::{OneShotTimer, TimerHandle, TimerResolutionGuard};
pub use scheduler::SchedulerStrategy;
pub use stream_clock::ClickCursor;
