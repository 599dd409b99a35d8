use crate::cache::{CellLookup, RadianceCache};
use crate::cascade::HashIndex;
use crate::hash::{fmix32, u01};
use cgmath::Vector3;

/// What a debug overlay shows for a cached position.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebugView {
    Radiance,
    /// Random colour per table slot; neighbouring cells should look distinct.
    CellIndex,
    Cascade,
    /// History length relative to `max_accumulated_samples`.
    SampleCount,
    DirectRadiance,
    IndirectRadiance,
}

impl Default for DebugView {
    fn default() -> Self {
        Self::Radiance
    }
}

impl DebugView {
    pub const ALL: [DebugView; 6] = [
        Self::Radiance,
        Self::CellIndex,
        Self::Cascade,
        Self::SampleCount,
        Self::DirectRadiance,
        Self::IndirectRadiance,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Radiance => 0,
            Self::CellIndex => 1,
            Self::Cascade => 2,
            Self::SampleCount => 3,
            Self::DirectRadiance => 4,
            Self::IndirectRadiance => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Radiance => "radiance",
            Self::CellIndex => "cell_index",
            Self::Cascade => "cascade",
            Self::SampleCount => "sample_count",
            Self::DirectRadiance => "direct",
            Self::IndirectRadiance => "indirect",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|view| view.label() == label)
    }
}

const CASCADE_PALETTE: [[f32; 3]; 8] = [
    [0.90, 0.30, 0.25],
    [0.95, 0.65, 0.20],
    [0.85, 0.85, 0.30],
    [0.35, 0.80, 0.35],
    [0.25, 0.70, 0.85],
    [0.30, 0.40, 0.90],
    [0.65, 0.35, 0.85],
    [0.85, 0.40, 0.65],
];

pub fn cascade_color(level: u32) -> Vector3<f32> {
    Vector3::from(CASCADE_PALETTE[level as usize % CASCADE_PALETTE.len()])
}

pub fn cell_index_color(index: HashIndex) -> Vector3<f32> {
    let h = fmix32(index.get().wrapping_add(0x68e3_1da4));
    Vector3::new(
        0.2 + 0.8 * u01(h & 0xffff_0000),
        0.2 + 0.8 * u01(h.rotate_left(10) & 0xffff_0000),
        0.2 + 0.8 * u01(h.rotate_left(20) & 0xffff_0000),
    )
}

impl RadianceCache {
    /// Colour for `position` under `view`. Black where the cache has nothing
    /// usable; visualization views fall back to black when disabled.
    pub fn debug_color(
        &self,
        position: Vector3<f32>,
        reference_point: Vector3<f32>,
        view: DebugView,
    ) -> Vector3<f32> {
        let black = Vector3::new(0.0, 0.0, 0.0);
        let (index, _) = self.index_for(position, reference_point);
        match view {
            DebugView::Radiance => self.query_radiance(position, reference_point),
            DebugView::CellIndex => cell_index_color(index),
            DebugView::Cascade => cascade_color(self.indexer().level_of(index)),
            DebugView::SampleCount => match self.lookup(position, reference_point) {
                CellLookup::Resolved(_) | CellLookup::Foreign(_) => {
                    let fraction = self.resolved_entry(index).sample_count as f32
                        / self.config().max_accumulated_samples as f32;
                    Vector3::new(fraction, fraction, fraction)
                }
                _ => black,
            },
            DebugView::DirectRadiance | DebugView::IndirectRadiance => {
                if self.lookup(position, reference_point).radiance().is_none() {
                    return black;
                }
                let Some(entry) = self
                    .visualization_entries()
                    .and_then(|entries| entries.get(index.as_usize()))
                else {
                    return black;
                };
                if view == DebugView::DirectRadiance {
                    Vector3::from(entry.direct_radiance)
                } else {
                    Vector3::from(entry.indirect_radiance)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    #[test]
    fn labels_round_trip() {
        for view in DebugView::ALL {
            assert_eq!(DebugView::from_label(view.label()), Some(view));
        }
        assert_eq!(DebugView::from_label("nope"), None);
        assert_eq!(DebugView::default().as_u32(), 0);
    }

    #[test]
    fn index_colors_are_bright_and_stable() {
        let a = cell_index_color(HashIndex::new(3));
        assert_eq!(a, cell_index_color(HashIndex::new(3)));
        assert_ne!(a, cell_index_color(HashIndex::new(4)));
        for channel in 0..3 {
            assert!(a[channel] >= 0.2 && a[channel] <= 1.0);
        }
    }

    #[test]
    fn debug_views_read_the_cache() {
        let mut cache = RadianceCache::new(CacheConfig {
            capacity_per_cascade: 64,
            cascade_count: 2,
            base_cell_size: 1.0,
            cascade_base_distance: 10.0,
            max_accumulated_samples: 4,
            visualization: true,
            ..CacheConfig::default()
        })
        .unwrap();
        let viewer = Vector3::new(0.0, 0.0, 0.0);
        let near = Vector3::new(1.5, 0.5, 0.5);
        let far = Vector3::new(15.5, 0.5, 0.5);

        cache.begin_time_step(1);
        cache.submit_split(
            near,
            viewer,
            Vector3::new(0.5, 0.0, 0.0),
            Vector3::new(0.0, 0.25, 0.0),
        );
        cache.resolve();

        assert_eq!(cache.debug_color(near, viewer, DebugView::Cascade), cascade_color(0));
        assert_eq!(cache.debug_color(far, viewer, DebugView::Cascade), cascade_color(1));
        assert_eq!(
            cache.debug_color(near, viewer, DebugView::SampleCount),
            Vector3::new(0.25, 0.25, 0.25)
        );
        assert_eq!(
            cache.debug_color(near, viewer, DebugView::DirectRadiance),
            Vector3::new(0.5, 0.0, 0.0)
        );
        assert_eq!(
            cache.debug_color(near, viewer, DebugView::IndirectRadiance),
            Vector3::new(0.0, 0.25, 0.0)
        );
        assert_eq!(
            cache.debug_color(far, viewer, DebugView::Radiance),
            Vector3::new(0.0, 0.0, 0.0)
        );
    }
}
