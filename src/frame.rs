//! One full time step against the scene services: trace probe rays, feed the
//! cache, resolve, and hand every ray its cell's value.

use crate::cache::RadianceCache;
use crate::resolve::ResolveReport;
use crate::scatter::{QueryRecord, QueryTable, ScatteredSample};
use crate::scene::{SceneTracer, TimeSource};
use crate::stats::{CacheProfile, StageTimings, WriteTally};
use cgmath::{ElementWise, Vector3, Zero};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use web_time::Instant;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProbeRay {
    pub origin: Vector3<f32>,
    pub direction: Vector3<f32>,
    pub max_distance: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Feed the cache's own estimate at a hit back in as one extra bounce.
    pub cache_feedback: bool,
    pub indirect_weight: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cache_feedback: true,
            indirect_weight: 1.0,
        }
    }
}

pub struct FrameOutput {
    pub time_step: u32,
    /// One entry per probe ray, in ray order.
    pub samples: Vec<ScatteredSample>,
    pub queries: QueryTable,
    pub writes: WriteTally,
    pub resolve: ResolveReport,
    pub timings: StageTimings,
}

pub struct FramePipeline {
    settings: PipelineSettings,
    profile: CacheProfile,
}

impl FramePipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            profile: CacheProfile::new(Instant::now()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Producer stage: every ray is traced and shaded independently, and hits
    /// are merged into the cache. Query ids are ray positions in `rays`.
    pub fn populate<T: SceneTracer>(
        &self,
        cache: &RadianceCache,
        scene: &T,
        viewer: Vector3<f32>,
        rays: &[ProbeRay],
    ) -> (QueryTable, WriteTally) {
        let (records, tallies): (Vec<QueryRecord>, Vec<WriteTally>) = rays
            .par_iter()
            .map(|ray| {
                let Some(hit) = scene.trace_visibility(ray.origin, ray.direction, ray.max_distance)
                else {
                    return (QueryRecord::miss(ray.max_distance), WriteTally::default());
                };
                let direct = scene.shade_direct(&hit.surface);
                let indirect = if self.settings.cache_feedback {
                    scene
                        .albedo(&hit.surface)
                        .mul_element_wise(cache.query_radiance(hit.position, viewer))
                        * self.settings.indirect_weight
                } else {
                    Vector3::zero()
                };
                let (index, outcome) = cache.submit_split(hit.position, viewer, direct, indirect);
                // Rejected rays still read the slot's resident value.
                (QueryRecord::hit(index, hit.distance), WriteTally::of(outcome))
            })
            .unzip();

        let writes = tallies
            .into_iter()
            .fold(WriteTally::default(), |total, tally| total + tally);
        (QueryTable::from_records(records), writes)
    }

    pub fn run_time_step<T: SceneTracer, C: TimeSource>(
        &mut self,
        cache: &mut RadianceCache,
        scene: &T,
        clock: &C,
        viewer: Vector3<f32>,
        rays: &[ProbeRay],
    ) -> FrameOutput {
        let time_step = clock.current_time_step();
        cache.begin_time_step(time_step);

        let populate_start = Instant::now();
        let (queries, writes) = self.populate(cache, scene, viewer, rays);
        let resolve_start = Instant::now();
        let resolve = cache.resolve();
        let scatter_start = Instant::now();
        let mut samples = Vec::with_capacity(queries.len());
        cache.scatter_into(&queries, scene.sky_radiance(), &mut samples);
        let scatter_end = Instant::now();

        let timings = StageTimings {
            populate: resolve_start.duration_since(populate_start),
            resolve: scatter_start.duration_since(resolve_start),
            scatter: scatter_end.duration_since(scatter_start),
        };
        log::debug!(
            "step {time_step}: {} rays, {} hits, {} rejected writes",
            rays.len(),
            queries.hit_count(),
            writes.rejected,
        );

        self.profile.record_step(writes, resolve, timings);
        if let Some(report) = self.profile.take_report_if_due(scatter_end) {
            report.log();
        }

        FrameOutput {
            time_step,
            samples,
            queries,
            writes,
            resolve,
            timings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::demo::{probe_grid_rays, DemoScene};

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings: PipelineSettings =
            serde_json::from_str(r#"{ "cache_feedback": false }"#).unwrap();
        assert_eq!(
            settings,
            PipelineSettings {
                cache_feedback: false,
                indirect_weight: 1.0,
            }
        );
        let text = serde_json::to_string(&PipelineSettings::default()).unwrap();
        assert_eq!(
            serde_json::from_str::<PipelineSettings>(&text).unwrap(),
            PipelineSettings::default()
        );
    }

    #[test]
    fn populate_records_the_slot_each_hit_was_written_to() {
        let cache = RadianceCache::new(CacheConfig {
            capacity_per_cascade: 64,
            cascade_count: 2,
            base_cell_size: 0.5,
            ..CacheConfig::default()
        })
        .unwrap();
        let scene = DemoScene::default();
        let viewer = Vector3::new(0.0, 1.0, 0.0);
        let rays = probe_grid_rays(3, 1.0, 1.0, 24, 30.0, 0);
        let pipeline = FramePipeline::new(PipelineSettings::default());

        let (queries, writes) = pipeline.populate(&cache, &scene, viewer, &rays);

        assert_eq!(queries.len(), rays.len());
        assert_eq!(writes.total(), queries.hit_count() as u64);
        for (ray, record) in rays.iter().zip(queries.records()) {
            match scene.trace_visibility(ray.origin, ray.direction, ray.max_distance) {
                Some(hit) => {
                    let (index, _) = cache.index_for(hit.position, viewer);
                    assert_eq!(record.cell(), Some(index));
                    assert_eq!(record.distance, hit.distance);
                }
                None => assert!(record.is_miss()),
            }
        }
    }
}
