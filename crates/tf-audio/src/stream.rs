//! Streaming PCM click backend
//!
//! One cpal output stream whose callback mixes a small pool of click voices
//! and drains a silent pacing ring. The ring exists for the stream-clocked
//! scheduler: pushing fixed blocks into it while the callback drains them
//! turns ring backpressure into a sample clock.
//!
//! The cpal stream itself lives on a dedicated holder thread for its whole
//! life; the sink handle and the callback only share atomics, so the handle
//! is freely `Send + Sync`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, Device, Stream, StreamConfig, SupportedStreamConfig};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::{AudioError, AudioResult, ClickCache, ClickSink, default_output_device, pick_output_config};

/// Overlapping playback voices
const VOICE_COUNT: usize = 4;

/// Voice position marking "not sounding"
const VOICE_IDLE: usize = usize::MAX;

/// Pacing ring capacity, in blocks
const PACING_BLOCKS: usize = 4;

/// Pacing block alignment in samples
const BLOCK_ALIGN: usize = 256;

/// Bounded wait for the click cache before a click is dropped
const READY_WAIT: Duration = Duration::from_secs(1);

/// How long construction waits for the holder thread to report
const STREAM_INIT_TIMEOUT: Duration = Duration::from_secs(2);

const PACER_POLL: Duration = Duration::from_millis(1);
const HOLDER_POLL: Duration = Duration::from_millis(100);

/// Pacing block length for a sample rate: ~50ms, aligned up
pub fn pacing_block_len(sample_rate: u32) -> usize {
    (sample_rate as usize / 20)
        .max(1)
        .div_ceil(BLOCK_ALIGN)
        * BLOCK_ALIGN
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICES
// ═══════════════════════════════════════════════════════════════════════════════

/// One playback voice: a cursor into a cached click buffer
///
/// `position == VOICE_IDLE` means the voice is free. `play` writes the
/// position last (release) so the callback never mixes a half-configured
/// voice.
struct Voice {
    accent: AtomicBool,
    position: AtomicUsize,
}

impl Voice {
    fn idle() -> Self {
        Self {
            accent: AtomicBool::new(false),
            position: AtomicUsize::new(VOICE_IDLE),
        }
    }
}

/// Pick a voice for a new click: any idle one, else the voice closest to
/// finishing (oldest-steal, like a capped sample player).
fn claim_voice(voices: &[Voice]) -> &Voice {
    let mut steal = &voices[0];
    let mut steal_pos = 0;
    for voice in voices {
        let pos = voice.position.load(Ordering::Acquire);
        if pos == VOICE_IDLE {
            return voice;
        }
        if pos >= steal_pos {
            steal_pos = pos;
            steal = voice;
        }
    }
    steal
}

struct SinkShared {
    voices: [Voice; VOICE_COUNT],
    shutdown: AtomicBool,
    ready_warned: AtomicBool,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            voices: std::array::from_fn(|_| Voice::idle()),
            shutdown: AtomicBool::new(false),
            ready_warned: AtomicBool::new(false),
        }
    }
}

/// Mix active voices into an interleaved output buffer and drain the pacing
/// ring by the same number of frames.
fn render_block(
    shared: &SinkShared,
    cache: &ClickCache,
    pacing: &mut Consumer<f32>,
    data: &mut [f32],
    channels: usize,
) {
    data.fill(0.0);
    let channels = channels.max(1);
    let frames = data.len() / channels;

    // The ring carries silence; draining it advances the pacer's clock.
    for _ in 0..frames {
        if pacing.pop().is_err() {
            break;
        }
    }

    for voice in &shared.voices {
        let pos = voice.position.load(Ordering::Acquire);
        if pos == VOICE_IDLE {
            continue;
        }
        let accent = voice.accent.load(Ordering::Relaxed);
        let Some(click) = cache.buffer(accent) else {
            voice.position.store(VOICE_IDLE, Ordering::Release);
            continue;
        };
        if pos >= click.len() {
            voice.position.store(VOICE_IDLE, Ordering::Release);
            continue;
        }

        let n = (click.len() - pos).min(frames);
        for (frame, &sample) in data.chunks_mut(channels).zip(&click[pos..pos + n]) {
            for out in frame.iter_mut() {
                *out += sample;
            }
        }

        let next = pos + n;
        voice.position.store(
            if next >= click.len() { VOICE_IDLE } else { next },
            Ordering::Release,
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PACER
// ═══════════════════════════════════════════════════════════════════════════════

/// Producer side of the pacing ring, borrowed by the stream-clocked
/// scheduler for the duration of a run
pub struct StreamPacer {
    producer: Producer<f32>,
    block_len: usize,
    sample_rate: u32,
    samples_generated: u64,
}

impl StreamPacer {
    pub(crate) fn new(producer: Producer<f32>, block_len: usize, sample_rate: u32) -> Self {
        Self {
            producer,
            block_len,
            sample_rate,
            samples_generated: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Samples pushed so far; monotone within a run
    pub fn samples_generated(&self) -> u64 {
        self.samples_generated
    }

    /// Push one full block of pacing silence, waiting for ring space.
    ///
    /// The wait (poll + short sleep) while the ring is full is the sample
    /// clock: the callback drains in real time. Returns the pushed block as
    /// `[start, end)` in sample time, or `None` once `cancel` is set or the
    /// stream side of the ring is gone.
    pub fn write_block(&mut self, cancel: &AtomicBool) -> Option<(u64, u64)> {
        loop {
            if cancel.load(Ordering::Acquire) {
                return None;
            }
            if self.producer.is_abandoned() {
                log::debug!("pacing ring abandoned by the stream");
                return None;
            }
            if self.producer.slots() >= self.block_len {
                break;
            }
            thread::sleep(PACER_POLL);
        }

        for _ in 0..self.block_len {
            let _ = self.producer.push(0.0);
        }
        let start = self.samples_generated;
        self.samples_generated += self.block_len as u64;
        Some((start, self.samples_generated))
    }
}

/// Shared slot through which a scheduler run borrows the pacer and hands it
/// back when the run ends
#[derive(Clone)]
pub struct PacerSlot(Arc<Mutex<Option<StreamPacer>>>);

impl PacerSlot {
    fn new(pacer: StreamPacer) -> Self {
        Self(Arc::new(Mutex::new(Some(pacer))))
    }

    /// Borrow the pacer; `None` if a previous run still holds it
    pub fn take(&self) -> Option<StreamPacer> {
        self.0.lock().take()
    }

    pub fn put_back(&self, pacer: StreamPacer) {
        *self.0.lock() = Some(pacer);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SINK
// ═══════════════════════════════════════════════════════════════════════════════

struct StreamInit {
    sample_rate: u32,
    channels: u16,
    block_len: usize,
    producer: Producer<f32>,
    cache: ClickCache,
}

/// Streaming PCM click sink on the default output device
pub struct StreamingPcmSink {
    shared: Arc<SinkShared>,
    cache: ClickCache,
    pacer_slot: PacerSlot,
    sample_rate: u32,
    channels: u16,
    holder: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingPcmSink {
    /// Open the default output device and start the stream.
    ///
    /// Fails if there is no usable device; callers degrade to a silent or
    /// tone backend in that case.
    pub fn new() -> AudioResult<Self> {
        let shared = Arc::new(SinkShared::new());
        let (init_tx, init_rx) = bounded::<AudioResult<StreamInit>>(1);

        let holder_shared = Arc::clone(&shared);
        let holder = thread::Builder::new()
            .name("click-stream".into())
            .spawn(move || stream_holder(holder_shared, init_tx))
            .map_err(AudioError::from)?;

        match init_rx.recv_timeout(STREAM_INIT_TIMEOUT) {
            Ok(Ok(init)) => {
                log::info!(
                    "streaming click sink ready: {} Hz, {} channel(s)",
                    init.sample_rate,
                    init.channels
                );
                Ok(Self {
                    shared,
                    cache: init.cache,
                    pacer_slot: PacerSlot::new(StreamPacer::new(
                        init.producer,
                        init.block_len,
                        init.sample_rate,
                    )),
                    sample_rate: init.sample_rate,
                    channels: init.channels,
                    holder: Mutex::new(Some(holder)),
                })
            }
            Ok(Err(e)) => {
                let _ = holder.join();
                Err(e)
            }
            Err(_) => {
                // Holder is stuck in a driver call; tell it to bail out
                // whenever it comes back.
                shared.shutdown.store(true, Ordering::Release);
                holder.thread().unpark();
                Err(AudioError::StreamBuildError(
                    "audio initialization timed out".into(),
                ))
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Slot the stream-clocked scheduler takes its pacer from
    pub fn pacer_slot(&self) -> PacerSlot {
        self.pacer_slot.clone()
    }
}

impl ClickSink for StreamingPcmSink {
    fn play(&self, accent: bool) {
        if !self.cache.wait_ready(accent, READY_WAIT) {
            if !self.shared.ready_warned.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "click samples not ready after {:?}, dropping clicks until loaded",
                    READY_WAIT
                );
            } else {
                log::debug!("click samples still not ready, click dropped");
            }
            return;
        }

        let voice = claim_voice(&self.shared.voices);
        voice.accent.store(accent, Ordering::Relaxed);
        voice.position.store(0, Ordering::Release);
    }
}

impl Drop for StreamingPcmSink {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(holder) = self.holder.lock().take() {
            holder.thread().unpark();
            let _ = holder.join();
        }
    }
}

fn stream_holder(
    shared: Arc<SinkShared>,
    init_tx: crossbeam_channel::Sender<AudioResult<StreamInit>>,
) {
    let init = || -> AudioResult<(Stream, StreamInit)> {
        let device = default_output_device()?;
        let config = pick_output_config(&device)?;
        let sample_rate = config.sample_rate();
        let channels = config.channels();

        let cache = ClickCache::get_or_init(sample_rate);
        let block_len = pacing_block_len(sample_rate);
        let (producer, consumer) = RingBuffer::<f32>::new(block_len * PACING_BLOCKS);

        let stream = build_stream(&device, &config, Arc::clone(&shared), cache.clone(), consumer)?;
        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok((
            stream,
            StreamInit {
                sample_rate,
                channels,
                block_len,
                producer,
                cache,
            },
        ))
    };

    match init() {
        Ok((stream, init)) => {
            if init_tx.send(Ok(init)).is_err() {
                // Construction already timed out on the other side.
                drop(stream);
                return;
            }
            while !shared.shutdown.load(Ordering::Acquire) {
                thread::park_timeout(HOLDER_POLL);
            }
            drop(stream);
            log::debug!("click stream released");
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
        }
    }
}

fn build_stream(
    device: &Device,
    supported: &SupportedStreamConfig,
    shared: Arc<SinkShared>,
    cache: ClickCache,
    mut pacing: Consumer<f32>,
) -> AudioResult<Stream> {
    let channels = supported.channels() as usize;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Default,
    };

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render_block(&shared, &cache, &mut pacing, data, channels);
            },
            move |err| {
                log::error!("audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_block_len() {
        assert_eq!(pacing_block_len(44100), 2304);
        assert_eq!(pacing_block_len(48000), 2560);
        for rate in [8000, 22050, 44100, 48000, 96000] {
            let len = pacing_block_len(rate);
            assert_eq!(len % BLOCK_ALIGN, 0);
            assert!(len >= rate as usize / 20);
        }
    }

    #[test]
    fn test_claim_voice_prefers_idle() {
        let voices: [Voice; 3] = std::array::from_fn(|_| Voice::idle());
        voices[0].position.store(10, Ordering::Relaxed);
        let claimed = claim_voice(&voices);
        assert!(std::ptr::eq(claimed, &voices[1]));
    }

    #[test]
    fn test_claim_voice_steals_most_advanced() {
        let voices: [Voice; 3] = std::array::from_fn(|_| Voice::idle());
        voices[0].position.store(10, Ordering::Relaxed);
        voices[1].position.store(500, Ordering::Relaxed);
        voices[2].position.store(77, Ordering::Relaxed);
        let claimed = claim_voice(&voices);
        assert!(std::ptr::eq(claimed, &voices[1]));
    }

    #[test]
    fn test_render_block_mixes_and_finishes_voice() {
        let shared = SinkShared::new();
        let cache = ClickCache::preloaded(48000, vec![0.5; 4], vec![0.25; 6]);
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        for _ in 0..3 {
            producer.push(0.0).unwrap();
        }

        shared.voices[0].accent.store(false, Ordering::Relaxed);
        shared.voices[0].position.store(0, Ordering::Release);

        let mut data = vec![1.0f32; 10]; // 5 stereo frames, stale garbage
        render_block(&shared, &cache, &mut consumer, &mut data, 2);

        // Four click samples into both channels, then silence.
        assert_eq!(&data[..8], &[0.5; 8]);
        assert_eq!(&data[8..], &[0.0, 0.0]);
        assert_eq!(shared.voices[0].position.load(Ordering::Acquire), VOICE_IDLE);
        // Ring fully drained (3 queued < 5 frames).
        assert!(consumer.pop().is_err());
    }

    #[test]
    fn test_render_block_sums_overlapping_voices() {
        let shared = SinkShared::new();
        let cache = ClickCache::preloaded(48000, vec![0.5; 2], vec![0.25; 2]);
        let (_producer, mut consumer) = RingBuffer::<f32>::new(8);

        shared.voices[0].accent.store(false, Ordering::Relaxed);
        shared.voices[0].position.store(0, Ordering::Release);
        shared.voices[1].accent.store(true, Ordering::Relaxed);
        shared.voices[1].position.store(0, Ordering::Release);

        let mut data = vec![0.0f32; 4];
        render_block(&shared, &cache, &mut consumer, &mut data, 1);

        assert_eq!(&data[..2], &[0.75, 0.75]);
        assert_eq!(&data[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_render_block_without_cache_idles_voice() {
        let shared = SinkShared::new();
        let cache = ClickCache::empty(48000);
        let (_producer, mut consumer) = RingBuffer::<f32>::new(8);

        shared.voices[2].position.store(0, Ordering::Release);

        let mut data = vec![0.0f32; 4];
        render_block(&shared, &cache, &mut consumer, &mut data, 2);

        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(shared.voices[2].position.load(Ordering::Acquire), VOICE_IDLE);
    }

    #[test]
    fn test_stream_pacer_backpressure_and_cancel() {
        let (producer, mut consumer) = RingBuffer::<f32>::new(8);
        let mut pacer = StreamPacer::new(producer, 4, 48000);
        let cancel = AtomicBool::new(false);

        assert_eq!(pacer.write_block(&cancel), Some((0, 4)));
        assert_eq!(pacer.write_block(&cancel), Some((4, 8)));
        assert_eq!(pacer.samples_generated(), 8);

        // Ring is full; a cancelled pacer gives up instead of waiting.
        cancel.store(true, Ordering::Release);
        assert_eq!(pacer.write_block(&cancel), None);

        // Draining one block frees space again.
        cancel.store(false, Ordering::Release);
        for _ in 0..4 {
            consumer.pop().unwrap();
        }
        assert_eq!(pacer.write_block(&cancel), Some((8, 12)));
    }

    #[test]
    fn test_stream_pacer_detects_abandoned_ring() {
        let (producer, consumer) = RingBuffer::<f32>::new(4);
        let mut pacer = StreamPacer::new(producer, 2, 48000);
        drop(consumer);

        let cancel = AtomicBool::new(false);
        assert_eq!(pacer.write_block(&cancel), None);
    }
}
