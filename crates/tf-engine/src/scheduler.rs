//! Scheduler run contract
//!
//! The three tick strategies share one shape: a cancellation token, an
//! execution context (dedicated thread or one-shot timer), tick emission
//! through the engine's click sink and event dispatch, and a stop that waits
//! a bounded time for the context to exit before releasing it regardless.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tf_audio::{ClickSink, ThreadPriorityHint};
use tf_core::{TempoState, TickEvent};

use crate::os_timer::OneShotTimer;

/// Bounded wait for a run's execution context to exit on stop
pub(crate) const STOP_TIMEOUT: Duration = Duration::from_millis(500);

const STOP_POLL: Duration = Duration::from_millis(5);

/// Tick production strategy, chosen once at engine construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerStrategy {
    /// Pump pacing blocks into the streaming sink's ring; ring backpressure
    /// is the sample clock. Requires a live output stream.
    StreamClocked,
    /// Dedicated thread against the monotonic clock, coarse sleep then spin
    #[default]
    WallClock,
    /// Self-rescheduling one-shot timer dispatch
    OsCallback,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TICK DISPATCH
// ═══════════════════════════════════════════════════════════════════════════════

type TickCallback = Box<dyn Fn(TickEvent) + Send + Sync + 'static>;

/// Fan-out of tick events to subscribers, invoked synchronously on the
/// scheduler's execution context
///
/// Channel sends are unbounded and never block; a lagging receiver only
/// grows its own queue. Consumers marshal to their own context themselves.
pub(crate) struct TickDispatch {
    channels: Mutex<Vec<Sender<TickEvent>>>,
    callbacks: RwLock<Vec<TickCallback>>,
}

impl TickDispatch {
    pub(crate) fn new() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<TickEvent> {
        let (tx, rx) = unbounded();
        self.channels.lock().push(tx);
        rx
    }

    pub(crate) fn add_callback<F>(&self, callback: F)
    where
        F: Fn(TickEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Box::new(callback));
    }

    pub(crate) fn emit(&self, event: TickEvent) {
        for callback in self.callbacks.read().iter() {
            callback(event);
        }
        // Sending doubles as liveness probing: channels whose receiver went
        // away are dropped here.
        self.channels.lock().retain(|tx| tx.send(event).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUN CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a strategy's execution context needs for one run
pub(crate) struct RunContext {
    pub(crate) tempo: Arc<TempoState>,
    pub(crate) sink: Arc<dyn ClickSink>,
    pub(crate) dispatch: Arc<TickDispatch>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) priority: ThreadPriorityHint,
}

impl RunContext {
    #[inline]
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// One tick: click first, then notify observers
    pub(crate) fn emit_tick(&self, sub_index: u32) {
        let event = TickEvent::at_step(sub_index);
        self.sink.play(event.accent);
        self.dispatch.emit(event);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUN HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) enum RunDriver {
    Thread(JoinHandle<()>),
    Timer(OneShotTimer),
}

/// Handle to a live scheduler activation, held by the engine's run slot
pub(crate) struct SchedulerRun {
    cancel: Arc<AtomicBool>,
    driver: Option<RunDriver>,
}

impl SchedulerRun {
    pub(crate) fn new(cancel: Arc<AtomicBool>, driver: RunDriver) -> Self {
        Self {
            cancel,
            driver: Some(driver),
        }
    }

    /// Request cancellation and wait up to [`STOP_TIMEOUT`] for the context
    /// to exit. A context that overruns is detached, never kept: it exits at
    /// its next cancellation check and cannot touch a successor's resources.
    pub(crate) fn stop(mut self) {
        self.cancel.store(true, Ordering::Release);
        match self.driver.take() {
            Some(RunDriver::Thread(handle)) => {
                if join_within(&handle, STOP_TIMEOUT) {
                    let _ = handle.join();
                    log::debug!("scheduler run joined");
                } else {
                    log::warn!(
                        "scheduler thread did not exit within {:?}, detaching it",
                        STOP_TIMEOUT
                    );
                }
            }
            Some(RunDriver::Timer(timer)) => {
                if timer.stop(STOP_TIMEOUT) {
                    log::debug!("timer dispatch joined");
                } else {
                    log::warn!(
                        "timer dispatch did not exit within {:?}, detaching it",
                        STOP_TIMEOUT
                    );
                }
            }
            None => {}
        }
    }
}

impl Drop for SchedulerRun {
    fn drop(&mut self) {
        // Safety net for a handle dropped without stop(): cancel and detach.
        self.cancel.store(true, Ordering::Release);
    }
}

fn join_within(handle: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(STOP_POLL);
    }
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_delivers_to_subscribers() {
        let dispatch = TickDispatch::new();
        let rx_a = dispatch.subscribe();
        let rx_b = dispatch.subscribe();

        dispatch.emit(TickEvent::at_step(0));
        dispatch.emit(TickEvent::at_step(1));

        assert_eq!(rx_a.try_recv().unwrap().sub_index, 0);
        assert_eq!(rx_a.try_recv().unwrap().sub_index, 1);
        assert_eq!(rx_b.try_recv().unwrap().sub_index, 0);
        assert_eq!(rx_b.try_recv().unwrap().sub_index, 1);
    }

    #[test]
    fn test_dispatch_prunes_dead_receivers() {
        let dispatch = TickDispatch::new();
        let rx_a = dispatch.subscribe();
        let rx_b = dispatch.subscribe();
        assert_eq!(dispatch.channel_count(), 2);

        drop(rx_b);
        dispatch.emit(TickEvent::at_step(2));

        assert_eq!(dispatch.channel_count(), 1);
        assert_eq!(rx_a.try_recv().unwrap().sub_index, 2);
    }

    #[test]
    fn test_dispatch_invokes_callbacks() {
        use std::sync::atomic::AtomicU32;

        let dispatch = TickDispatch::new();
        let accents = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&accents);
        dispatch.add_callback(move |event| {
            if event.accent {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        });

        dispatch.emit(TickEvent::at_step(0));
        dispatch.emit(TickEvent::at_step(1));
        dispatch.emit(TickEvent::at_step(0));

        assert_eq!(accents.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_run_stop_joins_cooperative_thread() {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        });

        let started = Instant::now();
        SchedulerRun::new(cancel, RunDriver::Thread(handle)).stop();
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_run_stop_detaches_stuck_thread() {
        let cancel = Arc::new(AtomicBool::new(false));
        // Ignores cancellation; stop() must still come back.
        let handle = thread::spawn(|| thread::sleep(Duration::from_secs(2)));

        let started = Instant::now();
        SchedulerRun::new(cancel, RunDriver::Thread(handle)).stop();
        let waited = started.elapsed();
        assert!(waited >= STOP_TIMEOUT);
        assert!(waited < Duration::from_secs(1));
    }
}
