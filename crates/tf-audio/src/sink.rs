//! Click sink contract and the simple backends
//!
//! A sink turns one scheduled tick into something audible, best-effort. The
//! contract is deliberately thin: no result, no completion signal, and no
//! blocking beyond the streaming backend's bounded readiness wait, so a
//! scheduler can call it from its hot loop without caring which backend is
//! behind it.

use std::io::Write;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError, bounded};

/// Audible click output
pub trait ClickSink: Send + Sync {
    /// Play one click, accented or not. Never fails, never blocks the
    /// caller beyond a bounded wait.
    fn play(&self, accent: bool);
}

// ═══════════════════════════════════════════════════════════════════════════════
// NULL SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// Discards every click
///
/// Stands in when audio output could not be initialized (ticks and events
/// still fire) and serves as the test backend.
#[derive(Debug, Default)]
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self {
        Self
    }
}

impl ClickSink for NullSink {
    fn play(&self, _accent: bool) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// TONE SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// Fire-and-forget system tone backend
///
/// Delegates to the terminal bell from a dedicated worker thread so the
/// beep never runs on the scheduler's context. The hand-off channel holds a
/// single pending click; while the worker is busy further clicks are
/// dropped, not queued.
pub struct ToneSink {
    tx: Sender<bool>,
}

impl ToneSink {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<bool>(1);

        // Worker exits when the sink (and with it the sender) is dropped.
        let spawned = thread::Builder::new().name("tone-sink".into()).spawn(move || {
            while let Ok(accent) = rx.recv() {
                ring_bell(accent);
            }
        });

        if let Err(e) = spawned {
            log::error!("failed to spawn tone worker: {}", e);
        }

        Self { tx }
    }
}

impl Default for ToneSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ClickSink for ToneSink {
    fn play(&self, accent: bool) {
        match self.tx.try_send(accent) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("tone worker busy, click dropped"),
            Err(TrySendError::Disconnected(_)) => log::debug!("tone worker gone, click dropped"),
        }
    }
}

/// Ring the terminal bell; the accent rings twice (the bell has no pitch
/// control). Write failures are swallowed.
fn ring_bell(accent: bool) {
    let mut out = std::io::stdout();
    let _ = out.write_all(b"\x07");
    let _ = out.flush();
    if accent {
        thread::sleep(Duration::from_millis(40));
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
