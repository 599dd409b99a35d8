//! Per-cell storage of the hash table.
//!
//! Producers only touch [`AccumulationEntry`] and [`MetadataSlot`], both built
//! from atomics. [`ResolvedEntry`] and [`VisualizationEntry`] are plain `Pod`
//! data owned by the resolve stage so they can be handed to a consumer as bytes.

use crate::cascade::Checksum;
use bytemuck::{Pod, Zeroable};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Fixed-point codec between float radiance and the integer accumulators.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RadianceQuantizer {
    scale: f32,
    max_radiance: f32,
}

impl RadianceQuantizer {
    pub fn new(scale: f32, max_radiance: f32) -> Self {
        Self {
            scale,
            max_radiance,
        }
    }

    /// Clamp to `[0, max_radiance]` and scale. NaN counts as black. Anything
    /// above the ceiling is clipped.
    pub fn encode(&self, radiance: [f32; 3]) -> [u64; 3] {
        radiance.map(|channel| {
            let clamped = if channel.is_nan() {
                0.0
            } else {
                channel.max(0.0).min(self.max_radiance)
            };
            (clamped * self.scale).round() as u64
        })
    }

    pub fn decode_mean(&self, sum: [u64; 3], count: u32) -> [f32; 3] {
        if count == 0 {
            return [0.0; 3];
        }
        let denominator = self.scale as f64 * count as f64;
        sum.map(|channel| (channel as f64 / denominator) as f32)
    }
}

/// Transient per-time-step merge target. Every field only grows between two
/// clears, and each one is updated by its own atomic add.
#[derive(Debug, Default)]
pub struct AccumulationEntry {
    sum: [AtomicU64; 3],
    count: AtomicU32,
    /// Set when this step's first accepted write claimed or evicted the cell.
    fresh: AtomicBool,
}

/// Plain copy of an [`AccumulationEntry`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AccumulationSnapshot {
    pub sum: [u64; 3],
    pub count: u32,
    pub fresh: bool,
}

impl AccumulationSnapshot {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl AccumulationEntry {
    #[inline]
    pub fn add(&self, scaled: [u64; 3]) {
        for (field, value) in self.sum.iter().zip(scaled) {
            if value != 0 {
                field.fetch_add(value, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn mark_fresh(&self) {
        self.fresh.store(true, Ordering::Relaxed);
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AccumulationSnapshot {
        AccumulationSnapshot {
            sum: [
                self.sum[0].load(Ordering::Relaxed),
                self.sum[1].load(Ordering::Relaxed),
                self.sum[2].load(Ordering::Relaxed),
            ],
            count: self.count.load(Ordering::Relaxed),
            fresh: self.fresh.load(Ordering::Relaxed),
        }
    }

    /// Read and zero the entry. Exclusive access means no producer is live.
    pub fn take(&mut self) -> AccumulationSnapshot {
        AccumulationSnapshot {
            sum: self.sum.each_mut().map(|field| std::mem::take(field.get_mut())),
            count: std::mem::take(self.count.get_mut()),
            fresh: std::mem::take(self.fresh.get_mut()),
        }
    }
}

/// Direct/indirect split accumulated next to the main sum when visualization
/// is enabled. Shares the sample count of the owning [`AccumulationEntry`].
#[derive(Debug, Default)]
pub struct VisualizationAccumulation {
    direct: [AtomicU64; 3],
    indirect: [AtomicU64; 3],
}

impl VisualizationAccumulation {
    #[inline]
    pub fn add(&self, direct: [u64; 3], indirect: [u64; 3]) {
        for (field, value) in self.direct.iter().zip(direct) {
            field.fetch_add(value, Ordering::Relaxed);
        }
        for (field, value) in self.indirect.iter().zip(indirect) {
            field.fetch_add(value, Ordering::Relaxed);
        }
    }

    pub fn take(&mut self) -> ([u64; 3], [u64; 3]) {
        (
            self.direct.each_mut().map(|field| std::mem::take(field.get_mut())),
            self.indirect.each_mut().map(|field| std::mem::take(field.get_mut())),
        )
    }
}

/// Persistent, temporally blended estimate of a cell.
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ResolvedEntry {
    pub radiance: [f32; 3],
    /// Time steps this cell has been written since it was claimed, saturating
    /// at `max_accumulated_samples`.
    pub sample_count: u32,
}

#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct VisualizationEntry {
    pub direct_radiance: [f32; 3],
    pub _pad0: u32,
    pub indirect_radiance: [f32; 3],
    pub _pad1: u32,
}

/// Ownership state of a cell, decoded from its [`MetadataSlot`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CellState {
    Empty,
    Owned { checksum: Checksum, last_write: u32 },
}

impl CellState {
    const fn pack(checksum: Checksum, last_write: u32) -> u64 {
        ((checksum.get() as u64) << 32) | last_write as u64
    }

    fn unpack(word: u64) -> Self {
        let raw_checksum = (word >> 32) as u32;
        if raw_checksum == 0 {
            Self::Empty
        } else {
            Self::Owned {
                checksum: Checksum::from_hash(raw_checksum),
                last_write: word as u32,
            }
        }
    }

    /// Time steps since the last accepted write. `None` for empty cells.
    pub fn age(&self, now: u32) -> Option<u32> {
        match *self {
            Self::Empty => None,
            Self::Owned { last_write, .. } => Some(now.wrapping_sub(last_write)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Checksum and last write time packed into one word, so that a claim, a
/// refresh or an eviction is a single compare-exchange.
#[derive(Debug, Default)]
pub struct MetadataSlot(AtomicU64);

impl MetadataSlot {
    pub fn load(&self) -> CellState {
        CellState::unpack(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn load_word(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Install `checksum` at `now` if the slot still holds `expected`.
    pub(crate) fn try_transition(&self, expected: u64, checksum: Checksum, now: u32) -> Result<(), u64> {
        self.0
            .compare_exchange(
                expected,
                CellState::pack(checksum, now),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
    }

    pub(crate) fn decode(word: u64) -> CellState {
        CellState::unpack(word)
    }

    pub fn state_mut(&mut self) -> CellState {
        CellState::unpack(*self.0.get_mut())
    }

    pub fn release(&mut self) {
        *self.0.get_mut() = 0;
    }
}
