//! Metronome engine
//!
//! [`Metronome`] owns the live tempo state, one click sink, and at most one
//! scheduler run at a time. Start and stop drive the Idle → Running → Idle
//! state machine; tempo edits write shared atomics that a running scheduler
//! re-reads on its next iteration, so they land without a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tf_audio::{ClickSink, PacerSlot, StreamPacer, StreamingPcmSink, ThreadPriorityHint};
use tf_core::{Subdivision, TempoState, TickEvent};

use crate::os_timer;
use crate::scheduler::{RunContext, RunDriver, SchedulerRun, SchedulerStrategy, TickDispatch};
use crate::stream_clock;
use crate::wall_clock;

/// Engine construction options
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub strategy: SchedulerStrategy,
    pub priority: ThreadPriorityHint,
}

/// The tempo generator: Idle → Running → Idle
///
/// All methods take `&self` and are safe against concurrent and re-entrant
/// calls; the single-run invariant is enforced by the running flag plus the
/// mutexed run slot, never by locking inside the tick path.
pub struct Metronome {
    tempo: Arc<TempoState>,
    sink: Arc<dyn ClickSink>,
    dispatch: Arc<TickDispatch>,
    strategy: SchedulerStrategy,
    priority: ThreadPriorityHint,
    pacer_slot: Option<PacerSlot>,
    running: AtomicBool,
    run: Mutex<Option<SchedulerRun>>,
    runs_started: AtomicU64,
}

impl Metronome {
    /// Engine over any click sink. The stream-clocked strategy needs a
    /// streaming sink's pacer; without one it degrades to wall-clock.
    pub fn new(sink: Arc<dyn ClickSink>, config: EngineConfig) -> Self {
        Self::build(sink, None, config)
    }

    /// Engine wired to a streaming sink, making the stream-clocked strategy
    /// fully available.
    pub fn with_streaming_sink(sink: StreamingPcmSink, config: EngineConfig) -> Self {
        let pacer_slot = sink.pacer_slot();
        Self::build(Arc::new(sink), Some(pacer_slot), config)
    }

    fn build(
        sink: Arc<dyn ClickSink>,
        pacer_slot: Option<PacerSlot>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tempo: Arc::new(TempoState::default()),
            sink,
            dispatch: Arc::new(TickDispatch::new()),
            strategy: config.strategy,
            priority: config.priority,
            pacer_slot,
            running: AtomicBool::new(false),
            run: Mutex::new(None),
            runs_started: AtomicU64::new(0),
        }
    }

    /// Begin ticking at `bpm` (clamped). Idempotent while running: a second
    /// start only updates the tempo, it never spawns a second run.
    pub fn start(&self, bpm: u32) {
        self.tempo.set_bpm(bpm);

        let mut slot = self.run.lock();
        if self.running.swap(true, Ordering::AcqRel) {
            log::debug!("start while running: tempo updated to {} bpm", self.tempo.bpm());
            return;
        }

        match self.spawn_run() {
            Ok(run) => {
                self.runs_started.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "metronome started: {} bpm, {} subdivision, {:?} strategy",
                    self.tempo.bpm(),
                    self.tempo.subdivision(),
                    self.strategy
                );
                *slot = Some(run);
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                log::error!("failed to start scheduler run: {}", e);
            }
        }
    }

    /// Stop ticking. Idempotent; waits a bounded time for the run to exit,
    /// then releases it regardless. May block up to that bound.
    pub fn stop(&self) {
        let mut slot = self.run.lock();
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(run) = slot.take() {
            run.stop();
            log::info!("metronome stopped");
        }
    }

    /// Clamp and store a new tempo; a running scheduler picks it up on its
    /// next iteration.
    pub fn set_bpm(&self, bpm: u32) {
        self.tempo.set_bpm(bpm);
    }

    pub fn set_subdivision(&self, subdivision: Subdivision) {
        self.tempo.set_subdivision(subdivision);
    }

    pub fn bpm(&self) -> u32 {
        self.tempo.bpm()
    }

    pub fn subdivision(&self) -> Subdivision {
        self.tempo.subdivision()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Scheduler runs spawned since construction; a diagnostic counter
    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    /// Receive every tick event. Events are sent from the scheduler's
    /// execution context and never block it; receivers consume at their own
    /// pace and marshal to their own context themselves.
    pub fn subscribe(&self) -> Receiver<TickEvent> {
        self.dispatch.subscribe()
    }

    /// Invoke `callback` synchronously on the scheduler's execution context
    /// for every tick. Keep it short; it runs inside the tick path.
    pub fn on_tick<F>(&self, callback: F)
    where
        F: Fn(TickEvent) + Send + Sync + 'static,
    {
        self.dispatch.add_callback(callback);
    }

    fn spawn_run(&self) -> std::io::Result<SchedulerRun> {
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = RunContext {
            tempo: Arc::clone(&self.tempo),
            sink: Arc::clone(&self.sink),
            dispatch: Arc::clone(&self.dispatch),
            cancel: Arc::clone(&cancel),
            priority: self.priority,
        };

        let driver = match self.strategy {
            SchedulerStrategy::StreamClocked => match self.take_pacer() {
                Some((pacer, slot)) => {
                    let handle = thread::Builder::new()
                        .name("tick-stream".into())
                        .spawn(move || stream_clock::run(ctx, pacer, slot))?;
                    RunDriver::Thread(handle)
                }
                None => {
                    log::warn!(
                        "stream-clocked scheduling unavailable (no stream pacer), using wall clock"
                    );
                    RunDriver::Thread(spawn_wall_clock(ctx)?)
                }
            },
            SchedulerStrategy::WallClock => RunDriver::Thread(spawn_wall_clock(ctx)?),
            SchedulerStrategy::OsCallback => RunDriver::Timer(os_timer::spawn(ctx)?),
        };

        Ok(SchedulerRun::new(cancel, driver))
    }

    fn take_pacer(&self) -> Option<(StreamPacer, PacerSlot)> {
        let slot = self.pacer_slot.as_ref()?;
        let pacer = slot.take()?;
        Some((pacer, slot.clone()))
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_wall_clock(ctx: RunContext) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("tick-wall-clock".into())
        .spawn(move || wall_clock::run(ctx))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
