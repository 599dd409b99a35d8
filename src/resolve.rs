//! Per-cell resolve: turns the step's integer accumulation into the persistent
//! blended estimate, and releases cells that stopped receiving writes.

use crate::entry::{
    AccumulationEntry, CellState, MetadataSlot, RadianceQuantizer, ResolvedEntry,
    VisualizationAccumulation, VisualizationEntry,
};
use std::ops::Add;

/// Hybrid running-mean / exponential blend.
///
/// A cell's first `max_accumulated_samples` written steps are averaged with
/// equal weight; afterwards each new step gets a fixed weight of
/// `1 / max_accumulated_samples`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlendLaw {
    max_accumulated_samples: u32,
}

impl BlendLaw {
    pub fn new(max_accumulated_samples: u32) -> Self {
        Self {
            max_accumulated_samples: max_accumulated_samples.max(1),
        }
    }

    /// Next history length and the blend weight for the incoming mean.
    pub fn advance(&self, sample_count: u32, first_write: bool) -> (u32, f32) {
        if first_write {
            return (1, 1.0);
        }
        let count = sample_count
            .saturating_add(1)
            .min(self.max_accumulated_samples);
        (count, 1.0 / count as f32)
    }
}

/// Blend `from` toward `to`. The result never leaves the `[from, to]` span
/// per channel, so repeated blending cannot overshoot.
pub fn blend_radiance(from: [f32; 3], to: [f32; 3], weight: f32) -> [f32; 3] {
    if weight >= 1.0 {
        return to;
    }
    std::array::from_fn(|i| {
        let value = from[i] + (to[i] - from[i]) * weight;
        value.clamp(from[i].min(to[i]), from[i].max(to[i]))
    })
}

/// Counts produced by one resolve pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Cells that had at least one accepted contribution this step.
    pub resolved_cells: usize,
    /// Resolved cells whose history restarted (claim or eviction).
    pub first_writes: usize,
    /// Cells returned to the empty state for exceeding the stale threshold.
    pub released_cells: usize,
    /// Accepted contributions merged this step.
    pub samples: u64,
}

impl Add for ResolveReport {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            resolved_cells: self.resolved_cells + other.resolved_cells,
            first_writes: self.first_writes + other.first_writes,
            released_cells: self.released_cells + other.released_cells,
            samples: self.samples + other.samples,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct ResolveParams {
    pub quantizer: RadianceQuantizer,
    pub law: BlendLaw,
    pub now: u32,
    pub stale_threshold: u32,
}

pub(crate) fn resolve_cell(
    params: &ResolveParams,
    accumulation: &mut AccumulationEntry,
    resolved: &mut ResolvedEntry,
    metadata: &mut MetadataSlot,
    visualization: Option<(&mut VisualizationAccumulation, &mut VisualizationEntry)>,
) -> ResolveReport {
    let taken = accumulation.take();

    if taken.count == 0 {
        let stale = matches!(
            metadata.state_mut(),
            CellState::Owned { last_write, .. }
                if params.now.wrapping_sub(last_write) > params.stale_threshold
        );
        if !stale {
            return ResolveReport::default();
        }
        metadata.release();
        *resolved = ResolvedEntry::default();
        if let Some((split, entry)) = visualization {
            split.take();
            *entry = VisualizationEntry::default();
        }
        return ResolveReport {
            released_cells: 1,
            ..ResolveReport::default()
        };
    }

    let (sample_count, weight) = params.law.advance(resolved.sample_count, taken.fresh);
    let mean = params.quantizer.decode_mean(taken.sum, taken.count);
    resolved.radiance = blend_radiance(resolved.radiance, mean, weight);
    resolved.sample_count = sample_count;

    if let Some((split, entry)) = visualization {
        let (direct, indirect) = split.take();
        let direct = params.quantizer.decode_mean(direct, taken.count);
        let indirect = params.quantizer.decode_mean(indirect, taken.count);
        entry.direct_radiance = blend_radiance(entry.direct_radiance, direct, weight);
        entry.indirect_radiance = blend_radiance(entry.indirect_radiance, indirect, weight);
    }

    ResolveReport {
        resolved_cells: 1,
        first_writes: usize::from(taken.fresh),
        released_cells: 0,
        samples: taken.count as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::Checksum;

    fn params(now: u32) -> ResolveParams {
        ResolveParams {
            quantizer: RadianceQuantizer::new(1024.0, 1.0),
            law: BlendLaw::new(8),
            now,
            stale_threshold: 10,
        }
    }

    #[test]
    fn blend_law_is_linear_then_exponential() {
        let law = BlendLaw::new(4);
        assert_eq!(law.advance(0, true), (1, 1.0));
        assert_eq!(law.advance(1, false), (2, 0.5));
        assert_eq!(law.advance(2, false), (3, 1.0 / 3.0));
        assert_eq!(law.advance(3, false), (4, 0.25));
        assert_eq!(law.advance(4, false), (4, 0.25));
        assert_eq!(law.advance(u32::MAX, false), (4, 0.25));
        assert_eq!(law.advance(4, true), (1, 1.0));
    }

    #[test]
    fn blend_never_overshoots() {
        let from = [0.1, 0.9, 0.3];
        let to = [0.7, 0.2, 0.3];
        for step in 1..=64 {
            let weight = 1.0 / step as f32;
            let value = blend_radiance(from, to, weight);
            for i in 0..3 {
                assert!(value[i] >= from[i].min(to[i]) && value[i] <= from[i].max(to[i]));
            }
        }
        assert_eq!(blend_radiance(from, to, 1.0), to);
    }

    #[test]
    fn fresh_cell_takes_the_mean_verbatim() {
        let mut accumulation = AccumulationEntry::default();
        accumulation.add([1024, 0, 512]);
        accumulation.add([0, 0, 512]);
        accumulation.mark_fresh();
        let mut resolved = ResolvedEntry {
            radiance: [0.9, 0.9, 0.9],
            sample_count: 8,
        };
        let mut metadata = MetadataSlot::default();
        let report = resolve_cell(&params(1), &mut accumulation, &mut resolved, &mut metadata, None);

        assert_eq!(resolved.radiance, [0.5, 0.0, 0.5]);
        assert_eq!(resolved.sample_count, 1);
        assert_eq!(report.resolved_cells, 1);
        assert_eq!(report.first_writes, 1);
        assert_eq!(report.samples, 2);
        assert!(accumulation.snapshot().is_empty());
    }

    #[test]
    fn idle_cell_is_released_after_stale_threshold() {
        let mut metadata = MetadataSlot::default();
        metadata
            .try_transition(0, Checksum::from_hash(99), 3)
            .unwrap();
        let mut resolved = ResolvedEntry {
            radiance: [0.4, 0.4, 0.4],
            sample_count: 5,
        };
        let mut accumulation = AccumulationEntry::default();

        let kept = resolve_cell(&params(13), &mut accumulation, &mut resolved, &mut metadata, None);
        assert_eq!(kept, ResolveReport::default());
        assert_eq!(resolved.sample_count, 5);

        let released =
            resolve_cell(&params(14), &mut accumulation, &mut resolved, &mut metadata, None);
        assert_eq!(released.released_cells, 1);
        assert_eq!(resolved, ResolvedEntry::default());
        assert!(metadata.load().is_empty());
    }

    #[test]
    fn visualization_split_uses_the_same_weight() {
        let mut accumulation = AccumulationEntry::default();
        let mut split = VisualizationAccumulation::default();
        accumulation.add([1024, 1024, 1024]);
        split.add([512, 512, 512], [512, 512, 512]);
        let mut resolved = ResolvedEntry {
            radiance: [0.0; 3],
            sample_count: 1,
        };
        let mut entry = VisualizationEntry::default();
        let mut metadata = MetadataSlot::default();
        resolve_cell(
            &params(2),
            &mut accumulation,
            &mut resolved,
            &mut metadata,
            Some((&mut split, &mut entry)),
        );
        assert_eq!(resolved.radiance, [0.5; 3]);
        assert_eq!(entry.direct_radiance, [0.25; 3]);
        assert_eq!(entry.indirect_radiance, [0.25; 3]);
    }
}
