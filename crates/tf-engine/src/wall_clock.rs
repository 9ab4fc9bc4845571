//! Wall-clock tick scheduling
//!
//! A dedicated thread waits out each interval against the monotonic clock:
//! coarse sleeps down to a small margin, then a tight spin so the wake lands
//! close to the target. Targets are products off the run anchor, so sleep
//! jitter never accumulates into drift.

use std::thread;
use std::time::{Duration, Instant};

use tf_audio::apply_priority_hint;

use crate::scheduler::RunContext;

/// Margin left for the spin tail after coarse sleeping
const SPIN_MARGIN: Duration = Duration::from_millis(8);

/// Longest single sleep slice; keeps cancellation latency low at slow tempos
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Nominal instant of tick `tick_index`: one interval past the anchor, times
/// the index. Never a previous tick's nominal time plus an interval.
pub(crate) fn tick_target(anchor: Instant, tick_index: u64, interval_seconds: f64) -> Instant {
    anchor + Duration::from_secs_f64(interval_seconds * (tick_index + 1) as f64)
}

/// Whole boundaries passed beyond a missed target
pub(crate) fn missed_steps(late: Duration, interval_seconds: f64) -> u64 {
    if interval_seconds <= 0.0 {
        return 0;
    }
    (late.as_secs_f64() / interval_seconds) as u64
}

pub(crate) fn run(ctx: RunContext) {
    apply_priority_hint(ctx.priority);
    let anchor = Instant::now();
    let mut tick_index: u64 = 0;
    log::debug!("wall-clock run started");

    loop {
        let snapshot = ctx.tempo.snapshot();
        let interval = snapshot.interval_seconds();
        let steps = snapshot.steps_per_beat();
        let target = tick_target(anchor, tick_index, interval);

        if !wait_until(target, &ctx) {
            break;
        }

        // Overslept past later boundaries: fast-forward to the most recent
        // one in a single jump.
        let late = Instant::now().saturating_duration_since(target);
        let missed = missed_steps(late, interval);
        if missed > 0 {
            log::debug!("woke {:?} late, skipping {} boundary(ies)", late, missed);
            tick_index += missed;
        }

        ctx.emit_tick((tick_index % steps as u64) as u32);
        tick_index += 1;
    }

    log::debug!("wall-clock run ended at tick {}", tick_index);
}

/// Sleep coarsely to within [`SPIN_MARGIN`] of `target`, then spin the rest.
/// Returns false when cancelled while waiting.
fn wait_until(target: Instant, ctx: &RunContext) -> bool {
    loop {
        if ctx.cancelled() {
            return false;
        }
        let now = Instant::now();
        let Some(remaining) = target.checked_duration_since(now) else {
            return true;
        };
        if remaining <= SPIN_MARGIN {
            break;
        }
        thread::sleep((remaining - SPIN_MARGIN).min(MAX_SLEEP_SLICE));
    }

    while Instant::now() < target {
        if ctx.cancelled() {
            return false;
        }
        std::hint::spin_loop();
    }
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use approx::assert_relative_eq;
    use tf_audio::{NullSink, ThreadPriorityHint};
    use tf_core::TempoState;

    use super::*;
    use crate::scheduler::TickDispatch;

    fn context(cancel: Arc<AtomicBool>) -> RunContext {
        RunContext {
            tempo: Arc::new(TempoState::default()),
            sink: Arc::new(NullSink::new()),
            dispatch: Arc::new(TickDispatch::new()),
            cancel,
            priority: ThreadPriorityHint::Normal,
        }
    }

    #[test]
    fn test_targets_are_products_off_the_anchor() {
        let anchor = Instant::now();
        let interval = 0.5;
        for n in 0..1000u64 {
            let target = tick_target(anchor, n, interval);
            let nominal = (n + 1) as f64 * interval;
            assert_relative_eq!(
                (target - anchor).as_secs_f64(),
                nominal,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_missed_steps() {
        let interval = 0.5;
        assert_eq!(missed_steps(Duration::ZERO, interval), 0);
        assert_eq!(missed_steps(Duration::from_millis(200), interval), 0);
        assert_eq!(missed_steps(Duration::from_millis(500), interval), 1);
        assert_eq!(missed_steps(Duration::from_millis(1600), interval), 3);
    }

    #[test]
    fn test_wait_until_honors_cancellation() {
        let ctx = context(Arc::new(AtomicBool::new(true)));
        let started = Instant::now();
        assert!(!wait_until(Instant::now() + Duration::from_secs(5), &ctx));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_wait_until_reaches_target() {
        let ctx = context(Arc::new(AtomicBool::new(false)));
        let target = Instant::now() + Duration::from_millis(30);
        assert!(wait_until(target, &ctx));
        assert!(Instant::now() >= target);
    }

    #[test]
    fn test_run_emits_ticks_until_cancelled() {
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = context(Arc::clone(&cancel));
        ctx.tempo.set_bpm(300);
        ctx.tempo.set_subdivision(tf_core::Subdivision::Sixteenth);
        let rx = ctx.dispatch.subscribe();

        let worker = thread::spawn(move || run(ctx));
        thread::sleep(Duration::from_millis(320));
        cancel.store(true, Ordering::Release);
        worker.join().unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        // 50ms interval: something like six ticks, first one the downbeat.
        assert!(events.len() >= 3, "only {} ticks", events.len());
        assert_eq!(events[0].sub_index, 0);
        assert!(events[0].accent);
        for event in &events {
            assert_eq!(event.accent, event.sub_index == 0);
            assert!(event.sub_index < 4);
        }
    }
}
