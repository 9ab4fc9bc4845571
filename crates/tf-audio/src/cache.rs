//! Click sample cache
//!
//! The streaming backend plays two short sine clicks: a normal step and a
//! higher, longer downbeat accent. They are synthesized once per process,
//! persisted as WAV assets in the user cache directory so later runs skip
//! synthesis, and loaded on a background thread. Playback never waits on the
//! loader unboundedly: [`ClickCache::wait_ready`] gates on a condvar with a
//! caller-supplied timeout.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::{AudioError, AudioResult};

// ═══════════════════════════════════════════════════════════════════════════════
// CLICK PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Normal click: lower pitch, shorter
const NORMAL_FREQ_HZ: f64 = 880.0;
const NORMAL_DURATION_SECS: f64 = 0.100;

/// Accent click: higher pitch, longer
const ACCENT_FREQ_HZ: f64 = 1320.0;
const ACCENT_DURATION_SECS: f64 = 0.120;

/// Peak amplitude of both clicks
const CLICK_AMPLITUDE: f64 = 0.9;

/// Fade lengths keeping the click edges pop-free
const ATTACK_SECS: f64 = 0.001;
const RELEASE_SECS: f64 = 0.008;

const NORMAL_FILE: &str = "click_normal.wav";
const ACCENT_FILE: &str = "click_accent.wav";

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

struct CacheInner {
    sample_rate: u32,
    normal: OnceLock<Vec<f32>>,
    accent: OnceLock<Vec<f32>>,
    gate: Mutex<()>,
    ready: Condvar,
}

/// Handle to the process-wide click cache
///
/// Cloning is cheap; all clones share the same buffers and readiness gate.
/// Each buffer becomes available exactly once, when the loader publishes it.
#[derive(Clone)]
pub struct ClickCache {
    inner: Arc<CacheInner>,
}

static PROCESS_CACHE: OnceLock<ClickCache> = OnceLock::new();

impl ClickCache {
    /// Get the process-wide cache, spawning the loader on first use.
    ///
    /// The cache binds to the sample rate of the first caller; one output
    /// stream exists per process in practice.
    pub fn get_or_init(sample_rate: u32) -> Self {
        PROCESS_CACHE
            .get_or_init(|| Self::spawn_with_dir(sample_rate, default_cache_dir()))
            .clone()
    }

    /// Start a cache whose assets live under `dir`.
    pub(crate) fn spawn_with_dir(sample_rate: u32, dir: PathBuf) -> Self {
        let cache = Self::empty(sample_rate);
        let loader = cache.clone();
        let spawned = thread::Builder::new()
            .name("click-cache-loader".into())
            .spawn(move || loader.load_all(&dir));
        if let Err(e) = spawned {
            log::error!("failed to spawn click cache loader: {}", e);
        }
        cache
    }

    /// A cache with no loader attached; buffers never become ready.
    pub(crate) fn empty(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                sample_rate,
                normal: OnceLock::new(),
                accent: OnceLock::new(),
                gate: Mutex::new(()),
                ready: Condvar::new(),
            }),
        }
    }

    /// A cache that is ready immediately; test backend.
    #[cfg(test)]
    pub(crate) fn preloaded(sample_rate: u32, normal: Vec<f32>, accent: Vec<f32>) -> Self {
        let cache = Self::empty(sample_rate);
        cache.publish(false, normal);
        cache.publish(true, accent);
        cache
    }

    fn load_all(&self, dir: &Path) {
        // The first scheduled tick is a downbeat, so the accent loads first.
        for (accent, file, freq, duration) in [
            (true, ACCENT_FILE, ACCENT_FREQ_HZ, ACCENT_DURATION_SECS),
            (false, NORMAL_FILE, NORMAL_FREQ_HZ, NORMAL_DURATION_SECS),
        ] {
            let samples = self.load_or_synthesize(dir, file, freq, duration);
            self.publish(accent, samples);
        }
        log::info!("click cache ready ({} Hz)", self.inner.sample_rate);
    }

    fn load_or_synthesize(&self, dir: &Path, file: &str, freq_hz: f64, duration: f64) -> Vec<f32> {
        let path = dir.join(file);
        match load_wav(&path, self.inner.sample_rate) {
            Ok(samples) => {
                log::debug!("loaded cached click {:?}", path);
                return samples;
            }
            Err(e) => log::debug!("click cache miss for {:?}: {}", path, e),
        }

        let samples = synthesize_click(self.inner.sample_rate, freq_hz, duration, CLICK_AMPLITUDE);
        if let Err(e) = write_wav(&path, self.inner.sample_rate, &samples) {
            log::warn!("failed to persist click asset {:?}: {}", path, e);
        }
        samples
    }

    fn publish(&self, accent: bool, samples: Vec<f32>) {
        let slot = if accent { &self.inner.accent } else { &self.inner.normal };
        let _ = slot.set(samples);
        // Lock round-trip orders the set before any waiter parks.
        drop(self.inner.gate.lock());
        self.inner.ready.notify_all();
    }

    /// Sample rate the buffers were rendered at
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// The loaded click, if the loader has published it
    pub fn buffer(&self, accent: bool) -> Option<&[f32]> {
        let slot = if accent { &self.inner.accent } else { &self.inner.normal };
        slot.get().map(|v| v.as_slice())
    }

    pub fn is_ready(&self, accent: bool) -> bool {
        self.buffer(accent).is_some()
    }

    /// Wait up to `timeout` for a buffer to become available.
    ///
    /// Returns whether the buffer is ready afterwards; the caller decides
    /// whether to play or drop the click.
    pub fn wait_ready(&self, accent: bool, timeout: Duration) -> bool {
        if self.is_ready(accent) {
            return true;
        }
        let mut guard = self.inner.gate.lock();
        self.inner
            .ready
            .wait_while_for(&mut guard, |_| !self.is_ready(accent), timeout);
        self.is_ready(accent)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTHESIS AND WAV ASSETS
// ═══════════════════════════════════════════════════════════════════════════════

/// Render a sine click with a short attack/release fade
pub fn synthesize_click(
    sample_rate: u32,
    freq_hz: f64,
    duration_secs: f64,
    amplitude: f64,
) -> Vec<f32> {
    let len = (sample_rate as f64 * duration_secs).round() as usize;
    let attack = (sample_rate as f64 * ATTACK_SECS).round() as usize;
    let release = (sample_rate as f64 * RELEASE_SECS).round() as usize;

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let t = i as f64 / sample_rate as f64;
        let mut env = 1.0;
        if attack > 0 && i < attack {
            env = i as f64 / attack as f64;
        }
        let remaining = len - i;
        if release > 0 && remaining <= release {
            env = env.min(remaining as f64 / release as f64);
        }
        let sample = (2.0 * std::f64::consts::PI * freq_hz * t).sin() * amplitude * env;
        out.push(sample as f32);
    }
    out
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> AudioResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn load_wav(path: &Path, expected_rate: u32) -> AudioResult<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1
        || spec.sample_rate != expected_rate
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(AudioError::StaleClickAsset(path.to_path_buf()));
    }

    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    Ok(samples?
        .into_iter()
        .map(|s| s as f32 / i16::MAX as f32)
        .collect())
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("tempoforge"))
        .unwrap_or_else(|| std::env::temp_dir().join("tempoforge"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
