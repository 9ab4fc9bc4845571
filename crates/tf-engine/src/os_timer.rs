//! One-shot timer dispatch
//!
//! [`OneShotTimer`] owns a dispatch thread and a single replaceable
//! deadline: `schedule` arms or re-arms it (at most one registration is
//! outstanding at any time), `cancel` disarms it, and the callback runs on
//! the dispatch thread when a deadline passes. The OS-callback scheduling
//! strategy drives a run by re-arming the timer from inside its own
//! callback, with the same anchor arithmetic as the wall-clock strategy.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tf_audio::{ThreadPriorityHint, apply_priority_hint};

use crate::scheduler::RunContext;
use crate::wall_clock::{missed_steps, tick_target};

const STOP_POLL: Duration = Duration::from_millis(5);

// ═══════════════════════════════════════════════════════════════════════════════
// TIMER
// ═══════════════════════════════════════════════════════════════════════════════

struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// Cheap cloneable control surface; what a self-rescheduling callback holds
#[derive(Clone)]
pub struct TimerHandle(Arc<TimerInner>);

impl TimerHandle {
    /// Arm the timer, replacing any outstanding registration
    pub fn schedule(&self, deadline: Instant) {
        let mut state = self.0.state.lock();
        if state.shutdown {
            return;
        }
        state.deadline = Some(deadline);
        self.0.cv.notify_all();
    }

    /// Disarm without firing
    pub fn cancel(&self) {
        let mut state = self.0.state.lock();
        state.deadline = None;
        self.0.cv.notify_all();
    }
}

/// Self-rescheduling one-shot timer with a dedicated dispatch thread
pub struct OneShotTimer {
    inner: Arc<TimerInner>,
    worker: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    /// Spawn the dispatch thread. `make_callback` runs on the caller and
    /// receives the timer's own handle, so the callback it returns can
    /// re-arm the timer from inside a firing.
    pub fn spawn<F, C>(name: &str, priority: ThreadPriorityHint, make_callback: F) -> io::Result<Self>
    where
        F: FnOnce(TimerHandle) -> C,
        C: FnMut() + Send + 'static,
    {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                deadline: None,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let callback = make_callback(TimerHandle(Arc::clone(&inner)));
        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new().name(name.into()).spawn(move || {
            apply_priority_hint(priority);
            dispatch_loop(worker_inner, callback);
        })?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle(Arc::clone(&self.inner))
    }

    pub fn schedule(&self, deadline: Instant) {
        self.handle().schedule(deadline);
    }

    pub fn cancel(&self) {
        self.handle().cancel();
    }

    /// Shut down and wait up to `timeout` for the dispatch thread to exit.
    /// Returns false if it had to be detached; a detached thread exits at
    /// its next state check.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.request_shutdown();
        let Some(worker) = self.worker.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(STOP_POLL);
        }
        let _ = worker.join();
        true
    }

    fn request_shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        state.deadline = None;
        self.inner.cv.notify_all();
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.request_shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn dispatch_loop<C: FnMut()>(inner: Arc<TimerInner>, mut callback: C) {
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        match state.deadline {
            None => inner.cv.wait(&mut state),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    state.deadline = None;
                    // Fire outside the lock so the callback can re-arm.
                    MutexGuard::unlocked(&mut state, || callback());
                } else {
                    let _ = inner.cv.wait_for(&mut state, deadline - now);
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIMER RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Elevated OS timer resolution held for the lifetime of the guard
///
/// Windows quantizes timed waits to the multimedia timer period; raising it
/// to 1ms keeps one-shot firings tight. On other platforms this is a no-op.
pub struct TimerResolutionGuard {
    active: bool,
}

impl TimerResolutionGuard {
    pub fn acquire() -> Self {
        let active = raise_timer_resolution();
        if active {
            log::debug!("timer resolution raised to 1ms");
        }
        Self { active }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for TimerResolutionGuard {
    fn drop(&mut self) {
        if self.active {
            restore_timer_resolution();
            log::debug!("timer resolution restored");
        }
    }
}

#[cfg(target_os = "windows")]
fn raise_timer_resolution() -> bool {
    use windows::Win32::Media::{TIMERR_NOERROR, timeBeginPeriod};
    unsafe { timeBeginPeriod(1) == TIMERR_NOERROR }
}

#[cfg(target_os = "windows")]
fn restore_timer_resolution() {
    use windows::Win32::Media::timeEndPeriod;
    unsafe {
        let _ = timeEndPeriod(1);
    }
}

#[cfg(not(target_os = "windows"))]
fn raise_timer_resolution() -> bool {
    false
}

#[cfg(not(target_os = "windows"))]
fn restore_timer_resolution() {}

// ═══════════════════════════════════════════════════════════════════════════════
// STRATEGY RUN
// ═══════════════════════════════════════════════════════════════════════════════

struct TimerRun {
    ctx: RunContext,
    handle: TimerHandle,
    anchor: Instant,
    tick_index: u64,
    _resolution: TimerResolutionGuard,
}

impl TimerRun {
    /// One firing: emit the due tick, then re-arm for the next target
    fn fire(&mut self) {
        if self.ctx.cancelled() {
            return;
        }
        let snapshot = self.ctx.tempo.snapshot();
        let interval = snapshot.interval_seconds();
        let steps = snapshot.steps_per_beat();

        let target = tick_target(self.anchor, self.tick_index, interval);
        let late = Instant::now().saturating_duration_since(target);
        let missed = missed_steps(late, interval);
        if missed > 0 {
            log::debug!("timer fired {:?} late, skipping {} boundary(ies)", late, missed);
            self.tick_index += missed;
        }

        self.ctx.emit_tick((self.tick_index % steps as u64) as u32);
        self.tick_index += 1;

        self.handle
            .schedule(tick_target(self.anchor, self.tick_index, interval));
    }
}

/// Start an OS-callback run: the timer's dispatch thread is the run's
/// execution context, armed here for the first tick.
pub(crate) fn spawn(ctx: RunContext) -> io::Result<OneShotTimer> {
    let priority = ctx.priority;
    OneShotTimer::spawn("tick-timer", priority, move |handle| {
        let mut run = TimerRun {
            anchor: Instant::now(),
            tick_index: 0,
            handle: handle.clone(),
            _resolution: TimerResolutionGuard::acquire(),
            ctx,
        };
        handle.schedule(tick_target(run.anchor, 0, run.ctx.tempo.snapshot().interval_seconds()));
        move || run.fire()
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serial_test::serial;

    use super::*;

    fn counting_timer(count: Arc<AtomicU32>) -> OneShotTimer {
        OneShotTimer::spawn("test-timer", ThreadPriorityHint::Normal, move |_| {
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap()
    }

    #[test]
    #[serial]
    fn test_timer_fires_once_per_registration() {
        let count = Arc::new(AtomicU32::new(0));
        let timer = counting_timer(Arc::clone(&count));

        timer.schedule(Instant::now() + Duration::from_millis(30));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        // One-shot: no further firings without re-arming.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[serial]
    fn test_schedule_replaces_outstanding_registration() {
        let count = Arc::new(AtomicU32::new(0));
        let timer = counting_timer(Arc::clone(&count));

        timer.schedule(Instant::now() + Duration::from_millis(500));
        timer.schedule(Instant::now() + Duration::from_millis(30));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        // The replaced registration never fires.
        thread::sleep(Duration::from_millis(500));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[serial]
    fn test_cancel_disarms() {
        let count = Arc::new(AtomicU32::new(0));
        let timer = counting_timer(Arc::clone(&count));

        timer.schedule(Instant::now() + Duration::from_millis(50));
        timer.cancel();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    #[serial]
    fn test_callback_can_re_arm() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);
        let timer = OneShotTimer::spawn("test-timer", ThreadPriorityHint::Normal, move |handle| {
            move || {
                let fired = seen.fetch_add(1, Ordering::Relaxed) + 1;
                if fired < 3 {
                    handle.schedule(Instant::now() + Duration::from_millis(10));
                }
            }
        })
        .unwrap();

        timer.schedule(Instant::now() + Duration::from_millis(10));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_stop_is_bounded_and_clean() {
        let count = Arc::new(AtomicU32::new(0));
        let timer = counting_timer(Arc::clone(&count));

        let started = Instant::now();
        assert!(timer.stop(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_resolution_guard_matches_platform() {
        let guard = TimerResolutionGuard::acquire();
        assert_eq!(guard.is_active(), cfg!(target_os = "windows"));
    }
}
