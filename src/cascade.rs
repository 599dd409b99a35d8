use crate::config::CacheConfig;
use crate::hash::{checksum_hash, index_hash};
use cgmath::{InnerSpace, Vector3};
use std::fmt;
use std::num::NonZeroU32;

/// Position of an entry in the shared table. Cascades occupy disjoint
/// `capacity_per_cascade`-sized ranges.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashIndex(u32);

impl HashIndex {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HashIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Second hash of a cell key, stored next to the entry to tell apart two
/// keys that land on the same [`HashIndex`]. Never zero: zero is reserved
/// for unclaimed metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Checksum(NonZeroU32);

impl Checksum {
    /// Substitute for a raw hash of zero.
    pub const SENTINEL: u32 = 0x5bd1_e995;

    pub fn from_hash(raw: u32) -> Self {
        match NonZeroU32::new(raw) {
            Some(value) => Self(value),
            None => Self(NonZeroU32::new(Self::SENTINEL).unwrap_or(NonZeroU32::MIN)),
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// A cell at one cascade resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub level: u32,
    pub coord: [i32; 3],
}

/// Maps world positions to table slots, choosing coarser cascades further
/// from the reference point.
#[derive(Clone, Debug)]
pub struct CascadeIndexer {
    capacity_per_cascade: u32,
    cascade_count: u32,
    base_cell_size: f32,
    cascade_base_distance: f32,
}

impl CascadeIndexer {
    /// Expects a config that passed [`CacheConfig::validate`].
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            capacity_per_cascade: config.capacity_per_cascade,
            cascade_count: config.cascade_count,
            base_cell_size: config.base_cell_size,
            cascade_base_distance: config.cascade_base_distance,
        }
    }

    pub fn cell_size(&self, level: u32) -> f32 {
        self.base_cell_size * (1u32 << level.min(self.cascade_count - 1)) as f32
    }

    pub fn cascade_level(&self, position: Vector3<f32>, reference_point: Vector3<f32>) -> u32 {
        let distance = (position - reference_point).magnitude();
        // `as` saturates: NaN lands on cascade 0, infinity on the last one.
        let band = (distance / self.cascade_base_distance).floor() as u32;
        band.min(self.cascade_count - 1)
    }

    pub fn cell_key_for(&self, position: Vector3<f32>, reference_point: Vector3<f32>) -> CellKey {
        let level = self.cascade_level(position, reference_point);
        let cell_size = self.cell_size(level);
        CellKey {
            level,
            coord: [
                (position.x / cell_size).floor() as i32,
                (position.y / cell_size).floor() as i32,
                (position.z / cell_size).floor() as i32,
            ],
        }
    }

    pub fn key_index(&self, key: CellKey) -> HashIndex {
        let level = key.level.min(self.cascade_count - 1);
        let slot = index_hash(key.coord) % self.capacity_per_cascade;
        HashIndex(slot + level * self.capacity_per_cascade)
    }

    pub fn key_checksum(&self, key: CellKey) -> Checksum {
        Checksum::from_hash(checksum_hash(key.level, key.coord))
    }

    pub fn index_for(
        &self,
        position: Vector3<f32>,
        reference_point: Vector3<f32>,
    ) -> (HashIndex, Checksum) {
        let key = self.cell_key_for(position, reference_point);
        (self.key_index(key), self.key_checksum(key))
    }

    /// Cascade an index belongs to.
    pub fn level_of(&self, index: HashIndex) -> u32 {
        (index.get() / self.capacity_per_cascade).min(self.cascade_count - 1)
    }
}
