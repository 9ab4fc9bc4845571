//! Tempo model
//!
//! Pure tempo arithmetic plus the shared live tempo state:
//! - bpm clamping to the supported range
//! - subdivision → steps-per-beat mapping
//! - tick interval in seconds and in audio samples
//! - [`TempoState`]: independently atomic bpm/subdivision scalars
//!
//! All of this is recomputed by schedulers on every scheduling decision,
//! never cached across a tempo change, so live edits land on the next tick.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum supported tempo
pub const MIN_BPM: u32 = 30;

/// Maximum supported tempo
pub const MAX_BPM: u32 = 300;

/// Clamp a requested tempo into the supported range
#[inline]
pub fn clamp_bpm(bpm: u32) -> u32 {
    bpm.clamp(MIN_BPM, MAX_BPM)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBDIVISION
// ═══════════════════════════════════════════════════════════════════════════════

/// Tempo model errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TempoError {
    #[error("invalid subdivision step count: {0} (expected 1, 2, 3 or 4)")]
    InvalidSubdivision(u32),
}

/// Beat subdivision: how many click steps one beat is divided into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Subdivision {
    /// One click per beat
    Quarter = 1,
    /// Two clicks per beat
    Eighth = 2,
    /// Three clicks per beat
    Triplet = 3,
    /// Four clicks per beat
    Sixteenth = 4,
}

impl Subdivision {
    /// Click steps per beat (the interval divider)
    #[inline]
    pub fn steps_per_beat(self) -> u32 {
        self as u32
    }

    /// Map a step count back to a subdivision
    pub fn from_steps(steps: u32) -> Result<Self, TempoError> {
        match steps {
            1 => Ok(Self::Quarter),
            2 => Ok(Self::Eighth),
            3 => Ok(Self::Triplet),
            4 => Ok(Self::Sixteenth),
            other => Err(TempoError::InvalidSubdivision(other)),
        }
    }
}

impl Default for Subdivision {
    fn default() -> Self {
        Self::Quarter
    }
}

impl fmt::Display for Subdivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Quarter => "quarter",
            Self::Eighth => "eighth",
            Self::Triplet => "triplet",
            Self::Sixteenth => "sixteenth",
        };
        f.write_str(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERVAL MATH
// ═══════════════════════════════════════════════════════════════════════════════

/// Length of one click step in seconds
#[inline]
pub fn interval_seconds(bpm: u32, subdivision: Subdivision) -> f64 {
    60.0 / (bpm as f64 * subdivision.steps_per_beat() as f64)
}

/// Length of one click step as a [`Duration`]
#[inline]
pub fn interval_duration(bpm: u32, subdivision: Subdivision) -> Duration {
    Duration::from_secs_f64(interval_seconds(bpm, subdivision))
}

/// Length of one click step in audio samples, rounded, never below 1
///
/// The floor guards degenerate sample rates; within the supported bpm range
/// at real rates the result is always far above it.
#[inline]
pub fn samples_per_tick(sample_rate: u32, bpm: u32, subdivision: Subdivision) -> u64 {
    let samples = (sample_rate as f64 * interval_seconds(bpm, subdivision)).round() as u64;
    samples.max(1)
}

/// Accent rule: the downbeat is step 0 of each subdivision cycle
#[inline]
pub fn is_accent(sub_index: u32) -> bool {
    sub_index == 0
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED LIVE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Live tempo state shared between the caller and a running scheduler
///
/// `bpm` and `subdivision` are independent atomic scalars. A scheduler reads
/// both fresh on every iteration; observing a torn combination mid-change is
/// acceptable because it self-corrects within one tick.
#[derive(Debug)]
pub struct TempoState {
    bpm: AtomicU32,
    subdivision: AtomicU32,
}

impl TempoState {
    pub fn new(bpm: u32, subdivision: Subdivision) -> Self {
        Self {
            bpm: AtomicU32::new(clamp_bpm(bpm)),
            subdivision: AtomicU32::new(subdivision.steps_per_beat()),
        }
    }

    /// Clamp and store a new tempo
    pub fn set_bpm(&self, bpm: u32) {
        let clamped = clamp_bpm(bpm);
        if clamped != bpm {
            log::debug!("bpm {} clamped to {}", bpm, clamped);
        }
        self.bpm.store(clamped, Ordering::Relaxed);
    }

    #[inline]
    pub fn bpm(&self) -> u32 {
        self.bpm.load(Ordering::Relaxed)
    }

    pub fn set_subdivision(&self, subdivision: Subdivision) {
        self.subdivision
            .store(subdivision.steps_per_beat(), Ordering::Relaxed);
    }

    #[inline]
    pub fn subdivision(&self) -> Subdivision {
        // Only valid step counts are ever stored, but decode defensively.
        Subdivision::from_steps(self.subdivision.load(Ordering::Relaxed))
            .unwrap_or(Subdivision::Quarter)
    }

    /// Read both scalars for one scheduling decision
    #[inline]
    pub fn snapshot(&self) -> TempoSnapshot {
        TempoSnapshot {
            bpm: self.bpm(),
            subdivision: self.subdivision(),
        }
    }
}

impl Default for TempoState {
    fn default() -> Self {
        Self::new(120, Subdivision::Quarter)
    }
}

/// One iteration's view of the live tempo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoSnapshot {
    pub bpm: u32,
    pub subdivision: Subdivision,
}

impl TempoSnapshot {
    #[inline]
    pub fn steps_per_beat(&self) -> u32 {
        self.subdivision.steps_per_beat()
    }

    #[inline]
    pub fn interval_seconds(&self) -> f64 {
        interval_seconds(self.bpm, self.subdivision)
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        interval_duration(self.bpm, self.subdivision)
    }

    #[inline]
    pub fn samples_per_tick(&self, sample_rate: u32) -> u64 {
        samples_per_tick(sample_rate, self.bpm, self.subdivision)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
