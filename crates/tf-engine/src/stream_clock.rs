//! Stream-clocked tick scheduling
//!
//! The scheduler thread pushes fixed-size silent pacing blocks into the
//! streaming sink's ring buffer. The audio callback drains the ring in real
//! time, so the push backpressure is a sample-accurate clock: each admitted
//! block covers a known `[start, end)` range of sample time, and clicks are
//! emitted while scanning that range.
//!
//! All cursor arithmetic is integer sample math off an absolute origin, so
//! tick boundaries cannot accumulate rounding drift.

use tf_audio::{PacerSlot, StreamPacer, apply_priority_hint};

use crate::scheduler::RunContext;

/// Click boundary cursor in sample time
///
/// Tracks the next click boundary, the monotone tick index and the position
/// within the subdivision cycle. Pure arithmetic; the pump loop feeds it
/// block ranges and a per-block `samples_per_tick`.
#[derive(Debug)]
pub struct ClickCursor {
    next_click_sample: u64,
    tick_index: u64,
    sub_index: u32,
}

impl ClickCursor {
    /// Cursor whose first boundary lies at `origin`
    pub fn new(origin: u64) -> Self {
        Self {
            next_click_sample: origin,
            tick_index: 0,
            sub_index: 0,
        }
    }

    pub fn tick_index(&self) -> u64 {
        self.tick_index
    }

    pub fn sub_index(&self) -> u32 {
        self.sub_index
    }

    pub fn next_click_sample(&self) -> u64 {
        self.next_click_sample
    }

    /// Scan one pacing block, invoking `emit(sub_index, at_sample)` for every
    /// click boundary inside `[block_start, block_end)`.
    ///
    /// `samples_per_tick` is fixed for the whole block; the boundary already
    /// committed before this call keeps its position even if tempo changed.
    /// A cursor that fell behind `block_start` jumps forward whole steps in
    /// one pass, advancing `tick_index` and `sub_index` together, instead of
    /// emitting a burst of stale ticks.
    pub fn scan_block<F>(
        &mut self,
        block_start: u64,
        block_end: u64,
        samples_per_tick: u64,
        steps: u32,
        mut emit: F,
    ) where
        F: FnMut(u32, u64),
    {
        debug_assert!(samples_per_tick >= 1);
        let steps = steps.max(1);

        if self.next_click_sample < block_start {
            let deficit = block_start - self.next_click_sample;
            let jumped = deficit.div_ceil(samples_per_tick);
            self.next_click_sample += jumped * samples_per_tick;
            self.tick_index += jumped;
            self.sub_index = (self.sub_index + (jumped % steps as u64) as u32) % steps;
            log::debug!("cursor fell {} samples behind, jumped {} step(s)", deficit, jumped);
        }

        while self.next_click_sample < block_end {
            emit(self.sub_index, self.next_click_sample);
            self.tick_index += 1;
            self.sub_index = (self.sub_index + 1) % steps;
            self.next_click_sample += samples_per_tick;
        }
    }
}

/// Pump loop: one warm-up block, then scan every admitted block.
///
/// Exits when cancelled or when the stream side of the ring goes away; the
/// pacer is returned to its slot on every path so a later run can take it.
pub(crate) fn run(ctx: RunContext, mut pacer: StreamPacer, slot: PacerSlot) {
    apply_priority_hint(ctx.priority);
    let sample_rate = pacer.sample_rate();

    // Warm-up: the callback has queued silence before the first click, and
    // the cursor's origin starts after it.
    let Some((_, origin)) = pacer.write_block(&ctx.cancel) else {
        slot.put_back(pacer);
        return;
    };
    let mut cursor = ClickCursor::new(origin);
    log::debug!(
        "stream-clocked run: {} Hz, {}-sample blocks, origin {}",
        sample_rate,
        pacer.block_len(),
        origin
    );

    while let Some((block_start, block_end)) = pacer.write_block(&ctx.cancel) {
        let snapshot = ctx.tempo.snapshot();
        let samples_per_tick = snapshot.samples_per_tick(sample_rate);
        let steps = snapshot.steps_per_beat();
        cursor.scan_block(block_start, block_end, samples_per_tick, steps, |sub_index, _| {
            ctx.emit_tick(sub_index);
        });
    }

    let ticks = cursor.tick_index();
    slot.put_back(pacer);
    log::debug!("stream-clocked run ended after {} ticks", ticks);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(
        cursor: &mut ClickCursor,
        block: (u64, u64),
        samples_per_tick: u64,
        steps: u32,
    ) -> Vec<(u32, u64)> {
        let mut ticks = Vec::new();
        cursor.scan_block(block.0, block.1, samples_per_tick, steps, |sub, at| {
            ticks.push((sub, at));
        });
        ticks
    }

    #[test]
    fn test_cursor_emits_on_grid() {
        let mut cursor = ClickCursor::new(0);
        let ticks = collect(&mut cursor, (0, 1000), 250, 2);
        assert_eq!(ticks, vec![(0, 0), (1, 250), (0, 500), (1, 750)]);
        assert_eq!(cursor.tick_index(), 4);
        assert_eq!(cursor.next_click_sample(), 1000);
    }

    #[test]
    fn test_cursor_boundary_on_block_edge_belongs_to_next_block() {
        let mut cursor = ClickCursor::new(0);
        collect(&mut cursor, (0, 1000), 250, 2);
        // next boundary sits exactly at the next block's start
        let ticks = collect(&mut cursor, (1000, 2000), 250, 2);
        assert_eq!(ticks[0], (0, 1000));
        assert_eq!(ticks.len(), 4);
    }

    #[test]
    fn test_cursor_catch_up_after_delayed_pumping() {
        let mut cursor = ClickCursor::new(0);
        let first = collect(&mut cursor, (0, 400), 100, 4);
        assert_eq!(first, vec![(0, 0), (1, 100), (2, 200), (3, 300)]);

        // Pumping stalls for three intervals: boundaries 400/500/600 are
        // skipped in one jump, not re-emitted.
        let late = collect(&mut cursor, (700, 800), 100, 4);
        assert_eq!(late, vec![(3, 700)]);
        assert_eq!(cursor.tick_index(), 8);
        assert_eq!(cursor.sub_index(), (cursor.tick_index() % 4) as u32);
    }

    #[test]
    fn test_cursor_sub_index_congruent_after_catch_up() {
        let mut cursor = ClickCursor::new(0);
        collect(&mut cursor, (0, 100), 30, 3);
        assert_eq!(cursor.tick_index(), 4);

        let ticks = collect(&mut cursor, (400, 500), 30, 3);
        assert!(!ticks.is_empty());
        for &(sub, at) in &ticks {
            assert_eq!(at % 30, 0);
            assert_eq!(sub, ((at / 30) % 3) as u32);
        }
        assert_eq!(cursor.sub_index(), (cursor.tick_index() % 3) as u32);
    }

    #[test]
    fn test_cursor_no_drift_over_thousand_ticks() {
        // bpm 120, quarter notes at 44100 Hz
        let samples_per_tick = 22050;
        let origin = 2304;
        let block = 2304;

        let mut cursor = ClickCursor::new(origin);
        let mut boundaries = Vec::new();
        let mut start = origin;
        while boundaries.len() < 1000 {
            cursor.scan_block(start, start + block, samples_per_tick, 1, |_, at| {
                boundaries.push(at);
            });
            start += block;
        }

        for (n, at) in boundaries.iter().take(1000).enumerate() {
            assert_eq!(*at, origin + n as u64 * samples_per_tick, "tick {}", n);
        }
    }

    #[test]
    fn test_cursor_keeps_committed_boundary_across_slowdown() {
        let mut cursor = ClickCursor::new(0);
        collect(&mut cursor, (0, 1000), 500, 1);
        assert_eq!(cursor.next_click_sample(), 1000);

        // Tempo slows fourfold; the boundary committed at 1000 still fires
        // there, only later boundaries move to the new grid.
        let ticks = collect(&mut cursor, (1000, 2000), 2000, 1);
        assert_eq!(ticks, vec![(0, 1000)]);
        assert_eq!(cursor.next_click_sample(), 3000);

        assert!(collect(&mut cursor, (2000, 3000), 2000, 1).is_empty());
        assert_eq!(collect(&mut cursor, (3000, 4000), 2000, 1), vec![(0, 3000)]);
    }

    #[test]
    fn test_cursor_speed_up_waits_for_committed_boundary() {
        let mut cursor = ClickCursor::new(0);
        collect(&mut cursor, (0, 1000), 2000, 1);
        assert_eq!(cursor.next_click_sample(), 2000);

        // Faster tempo does not pull the committed boundary earlier.
        assert!(collect(&mut cursor, (1000, 1500), 100, 1).is_empty());

        let ticks = collect(&mut cursor, (1500, 2500), 100, 1);
        assert_eq!(ticks.first(), Some(&(0, 2000)));
        assert_eq!(ticks.len(), 5);
    }
}
