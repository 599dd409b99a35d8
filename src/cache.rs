//! The radiance cache table and its per-time-step protocol.
//!
//! One time step is:
//! 1. [`RadianceCache::begin_time_step`]
//! 2. any number of concurrent [`RadianceCache::submit_contribution`] calls
//! 3. [`RadianceCache::resolve`]
//! 4. any number of concurrent reads ([`RadianceCache::query_radiance`],
//!    [`RadianceCache::scatter_results`])
//!
//! Producers and readers borrow the cache shared; the stage changes borrow it
//! exclusively, so a resolve or reset can never overlap in-flight writes.

use crate::cascade::{CascadeIndexer, Checksum, HashIndex};
use crate::collision::{CollisionPolicy, WriteOutcome};
use crate::config::{CacheConfig, ConfigError};
use crate::entry::{
    AccumulationEntry, AccumulationSnapshot, CellState, MetadataSlot, RadianceQuantizer,
    ResolvedEntry, VisualizationAccumulation, VisualizationEntry,
};
use crate::resolve::{resolve_cell, BlendLaw, ResolveParams, ResolveReport};
use crate::scatter::{QueryId, QueryTable, ScatteredSample};
use cgmath::{Vector3, Zero};
use rayon::prelude::*;
use std::collections::HashMap;

/// What a strict lookup found for a position.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CellLookup {
    /// No key owns the slot.
    Empty,
    /// The owner has not written for longer than the stale threshold.
    Stale { age: u32 },
    /// Owned, but no written step has been resolved since the claim.
    Pending,
    /// The slot belongs to a different cell that hashed to the same index.
    Foreign(Vector3<f32>),
    Resolved(Vector3<f32>),
}

impl CellLookup {
    /// Radiance usable for shading, if any.
    pub fn radiance(&self) -> Option<Vector3<f32>> {
        match *self {
            Self::Resolved(radiance) | Self::Foreign(radiance) => Some(radiance),
            Self::Empty | Self::Stale { .. } | Self::Pending => None,
        }
    }
}

struct VisualizationTable {
    accumulation: Vec<VisualizationAccumulation>,
    entries: Vec<VisualizationEntry>,
}

impl VisualizationTable {
    fn new(len: usize) -> Self {
        Self {
            accumulation: (0..len).map(|_| VisualizationAccumulation::default()).collect(),
            entries: vec![VisualizationEntry::default(); len],
        }
    }
}

pub struct RadianceCache {
    config: CacheConfig,
    indexer: CascadeIndexer,
    policy: CollisionPolicy,
    quantizer: RadianceQuantizer,
    law: BlendLaw,
    accumulation: Vec<AccumulationEntry>,
    metadata: Vec<MetadataSlot>,
    resolved: Vec<ResolvedEntry>,
    visualization: Option<VisualizationTable>,
    time_step: u32,
}

impl RadianceCache {
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let len = config.total_capacity();
        log::info!(
            "radiance cache: {} cascades x {} cells ({} entries), cell {} world units, visualization {}",
            config.cascade_count,
            config.capacity_per_cascade,
            len,
            config.base_cell_size,
            if config.visualization { "on" } else { "off" },
        );
        Ok(Self {
            indexer: CascadeIndexer::new(&config),
            policy: CollisionPolicy::new(config.evict_threshold),
            quantizer: RadianceQuantizer::new(config.radiance_scale, config.max_radiance),
            law: BlendLaw::new(config.max_accumulated_samples),
            accumulation: (0..len).map(|_| AccumulationEntry::default()).collect(),
            metadata: (0..len).map(|_| MetadataSlot::default()).collect(),
            resolved: vec![ResolvedEntry::default(); len],
            visualization: config.visualization.then(|| VisualizationTable::new(len)),
            time_step: 0,
            config,
        })
    }

    /// Rebuild the table for a new configuration. Discards all history.
    pub fn reconfigure(&mut self, config: CacheConfig) -> Result<(), ConfigError> {
        let time_step = self.time_step;
        *self = Self::new(config)?;
        self.time_step = time_step;
        Ok(())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn indexer(&self) -> &CascadeIndexer {
        &self.indexer
    }

    pub fn capacity(&self) -> usize {
        self.resolved.len()
    }

    pub fn time_step(&self) -> u32 {
        self.time_step
    }

    pub fn begin_time_step(&mut self, time_step: u32) {
        self.time_step = time_step;
    }

    pub fn index_for(
        &self,
        position: Vector3<f32>,
        reference_point: Vector3<f32>,
    ) -> (HashIndex, Checksum) {
        self.indexer.index_for(position, reference_point)
    }

    pub fn submit_contribution(
        &self,
        position: Vector3<f32>,
        reference_point: Vector3<f32>,
        contribution: Vector3<f32>,
    ) -> WriteOutcome {
        let (index, checksum) = self.indexer.index_for(position, reference_point);
        self.submit_at(index, checksum, contribution)
    }

    /// Like [`submit_contribution`](Self::submit_contribution), keeping the
    /// direct and indirect parts apart for the visualization table. Also
    /// returns the slot, which a rejected caller still reads at scatter time.
    pub fn submit_split(
        &self,
        position: Vector3<f32>,
        reference_point: Vector3<f32>,
        direct: Vector3<f32>,
        indirect: Vector3<f32>,
    ) -> (HashIndex, WriteOutcome) {
        let (index, checksum) = self.indexer.index_for(position, reference_point);
        let outcome = self.submit_at(index, checksum, direct + indirect);
        if outcome.is_accepted() {
            if let Some(visualization) = &self.visualization {
                visualization.accumulation[index.as_usize()].add(
                    self.quantizer.encode(direct.into()),
                    self.quantizer.encode(indirect.into()),
                );
            }
        }
        (index, outcome)
    }

    /// Write path for callers that already hold an index and checksum.
    /// Indices outside the table are rejected.
    pub fn submit_at(
        &self,
        index: HashIndex,
        checksum: Checksum,
        contribution: Vector3<f32>,
    ) -> WriteOutcome {
        let slot = index.as_usize();
        let (Some(metadata), Some(accumulation)) =
            (self.metadata.get(slot), self.accumulation.get(slot))
        else {
            return WriteOutcome::Rejected;
        };
        let outcome = self.policy.admit(metadata, checksum, self.time_step);
        if outcome.starts_history() {
            accumulation.mark_fresh();
        }
        if outcome.is_accepted() {
            accumulation.add(self.quantizer.encode(contribution.into()));
        }
        outcome
    }

    /// Resolved radiance at `position`, zero when nothing usable is stored.
    ///
    /// A slot owned by a colliding cell returns that cell's value; use
    /// [`lookup`](Self::lookup) to tell the cases apart.
    pub fn query_radiance(
        &self,
        position: Vector3<f32>,
        reference_point: Vector3<f32>,
    ) -> Vector3<f32> {
        self.lookup(position, reference_point)
            .radiance()
            .unwrap_or_else(Vector3::zero)
    }

    pub fn lookup(&self, position: Vector3<f32>, reference_point: Vector3<f32>) -> CellLookup {
        let (index, checksum) = self.indexer.index_for(position, reference_point);
        let slot = index.as_usize();
        match self.metadata[slot].load() {
            CellState::Empty => CellLookup::Empty,
            CellState::Owned {
                checksum: owner,
                last_write,
            } => {
                let age = self.time_step.wrapping_sub(last_write);
                if age > self.config.stale_threshold {
                    return CellLookup::Stale { age };
                }
                let resolved = &self.resolved[slot];
                if self.accumulation[slot].is_fresh() || resolved.sample_count == 0 {
                    return CellLookup::Pending;
                }
                let radiance = Vector3::from(resolved.radiance);
                if owner == checksum {
                    CellLookup::Resolved(radiance)
                } else {
                    CellLookup::Foreign(radiance)
                }
            }
        }
    }

    pub fn cell_state(&self, index: HashIndex) -> CellState {
        self.metadata
            .get(index.as_usize())
            .map_or(CellState::Empty, MetadataSlot::load)
    }

    pub fn accumulation(&self, index: HashIndex) -> AccumulationSnapshot {
        self.accumulation
            .get(index.as_usize())
            .map(AccumulationEntry::snapshot)
            .unwrap_or_default()
    }

    pub fn resolved_entry(&self, index: HashIndex) -> ResolvedEntry {
        self.resolved
            .get(index.as_usize())
            .copied()
            .unwrap_or_default()
    }

    /// The persistent table, laid out for a verbatim upload.
    pub fn resolved_entries(&self) -> &[ResolvedEntry] {
        &self.resolved
    }

    pub fn visualization_entries(&self) -> Option<&[VisualizationEntry]> {
        self.visualization
            .as_ref()
            .map(|visualization| visualization.entries.as_slice())
    }

    pub fn occupied_cells(&self) -> usize {
        self.metadata
            .par_iter()
            .filter(|slot| !slot.load().is_empty())
            .count()
    }

    /// Fold this step's accumulation into the persistent entries and clear it.
    pub fn resolve(&mut self) -> ResolveReport {
        let params = ResolveParams {
            quantizer: self.quantizer,
            law: self.law,
            now: self.time_step,
            stale_threshold: self.config.stale_threshold,
        };
        let cells = self
            .accumulation
            .par_iter_mut()
            .zip(self.resolved.par_iter_mut())
            .zip(self.metadata.par_iter_mut());

        let report = match self.visualization.as_mut() {
            Some(visualization) => cells
                .zip(
                    visualization
                        .accumulation
                        .par_iter_mut()
                        .zip(visualization.entries.par_iter_mut()),
                )
                .map(|(((accumulation, resolved), metadata), (split, entry))| {
                    resolve_cell(&params, accumulation, resolved, metadata, Some((split, entry)))
                })
                .reduce(ResolveReport::default, |a, b| a + b),
            None => cells
                .map(|((accumulation, resolved), metadata)| {
                    resolve_cell(&params, accumulation, resolved, metadata, None)
                })
                .reduce(ResolveReport::default, |a, b| a + b),
        };

        log::debug!(
            "resolve step {}: {} cells from {} samples, {} new histories, {} released",
            self.time_step,
            report.resolved_cells,
            report.samples,
            report.first_writes,
            report.released_cells,
        );
        report
    }

    /// Deliver each recorded query its cell's resolved value, or `fallback`
    /// for misses. Read-only, so repeated calls within a step agree.
    pub fn scatter_into(
        &self,
        queries: &QueryTable,
        fallback: Vector3<f32>,
        out: &mut Vec<ScatteredSample>,
    ) {
        let fallback: [f32; 3] = fallback.into();
        queries
            .records()
            .par_iter()
            .map(|record| ScatteredSample {
                radiance: record
                    .cell()
                    .and_then(|index| self.resolved.get(index.as_usize()))
                    .map_or(fallback, |entry| entry.radiance),
                distance: record.distance,
            })
            .collect_into_vec(out);
    }

    pub fn scatter_results(
        &self,
        queries: &QueryTable,
        fallback: Vector3<f32>,
    ) -> HashMap<QueryId, Vector3<f32>> {
        let mut samples = Vec::with_capacity(queries.len());
        self.scatter_into(queries, fallback, &mut samples);
        samples
            .into_iter()
            .enumerate()
            .map(|(id, sample)| (id as QueryId, Vector3::from(sample.radiance)))
            .collect()
    }

    /// Drop this step's contributions. Histories survive, except where this
    /// step's write claimed or evicted the cell: the new owner keeps its slot
    /// and starts from an empty history.
    pub fn clear_accumulation(&mut self) {
        if let Some(visualization) = self.visualization.as_mut() {
            self.accumulation
                .par_iter()
                .zip(
                    visualization
                        .accumulation
                        .par_iter_mut()
                        .zip(visualization.entries.par_iter_mut()),
                )
                .for_each(|(accumulation, (split, entry))| {
                    split.take();
                    if accumulation.is_fresh() {
                        *entry = VisualizationEntry::default();
                    }
                });
        }
        self.accumulation
            .par_iter_mut()
            .zip(self.resolved.par_iter_mut())
            .for_each(|(accumulation, resolved)| {
                if accumulation.take().fresh {
                    *resolved = ResolvedEntry::default();
                }
            });
    }

    /// Forget everything: accumulation, history, ownership. Used on scene changes.
    pub fn reset(&mut self) {
        self.clear_accumulation();
        self.metadata.par_iter_mut().for_each(MetadataSlot::release);
        self.resolved.fill(ResolvedEntry::default());
        if let Some(visualization) = self.visualization.as_mut() {
            visualization.entries.fill(VisualizationEntry::default());
        }
        log::info!(
            "radiance cache reset at step {} ({} entries)",
            self.time_step,
            self.resolved.len()
        );
    }
}
