use crate::cascade::HashIndex;
use bytemuck::{Pod, Zeroable};

pub type QueryId = u32;

/// Which cell a query depends on, plus the distance it travelled to get
/// there. A raw index of `u32::MAX` marks a miss.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QueryRecord {
    index: u32,
    pub distance: f32,
}

impl QueryRecord {
    const MISS_INDEX: u32 = u32::MAX;

    pub const MISS: Self = Self {
        index: Self::MISS_INDEX,
        distance: 0.0,
    };

    pub fn hit(index: HashIndex, distance: f32) -> Self {
        Self {
            index: index.get(),
            distance,
        }
    }

    pub fn miss(distance: f32) -> Self {
        Self {
            index: Self::MISS_INDEX,
            distance,
        }
    }

    pub fn cell(&self) -> Option<HashIndex> {
        (self.index != Self::MISS_INDEX).then(|| HashIndex::new(self.index))
    }

    pub fn is_miss(&self) -> bool {
        self.index == Self::MISS_INDEX
    }
}

impl Default for QueryRecord {
    fn default() -> Self {
        Self::MISS
    }
}

/// Dense side map from query id (its position) to the cell it reads.
#[derive(Clone, Debug, Default)]
pub struct QueryTable {
    records: Vec<QueryRecord>,
}

impl QueryTable {
    pub fn from_records(records: Vec<QueryRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store the record for `id`, growing the table with misses as needed.
    pub fn record(&mut self, id: QueryId, record: QueryRecord) {
        let slot = id as usize;
        if slot >= self.records.len() {
            self.records.resize(slot + 1, QueryRecord::MISS);
        }
        self.records[slot] = record;
    }

    pub fn get(&self, id: QueryId) -> Option<&QueryRecord> {
        self.records.get(id as usize)
    }

    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    pub fn hit_count(&self) -> usize {
        self.records.iter().filter(|record| !record.is_miss()).count()
    }
}

/// Value delivered to one query after resolve.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ScatteredSample {
    pub radiance: [f32; 3],
    pub distance: f32,
}
