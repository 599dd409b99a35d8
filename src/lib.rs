//! World-space radiance cache keyed by a multi-cascade spatial hash.
//!
//! Many parallel producers merge shaded samples into a fixed-capacity table
//! with lock-free integer accumulation; once per time step the table is
//! resolved into a temporally stable estimate that readers query by position
//! or receive in bulk through a scatter pass.

mod cache;
mod cascade;
mod collision;
mod config;
mod debug;
mod entry;
mod frame;
mod hash;
mod resolve;
mod scatter;
mod scene;
mod stats;

pub mod demo;

pub use crate::cache::{CellLookup, RadianceCache};
pub use crate::cascade::{CascadeIndexer, CellKey, Checksum, HashIndex};
pub use crate::collision::{CollisionDecision, CollisionPolicy, WriteOutcome};
pub use crate::config::{CacheConfig, ConfigError, MAX_CASCADE_COUNT};
pub use crate::debug::{cascade_color, cell_index_color, DebugView};
pub use crate::entry::{
    AccumulationSnapshot, CellState, RadianceQuantizer, ResolvedEntry, VisualizationEntry,
};
pub use crate::frame::{FrameOutput, FramePipeline, PipelineSettings, ProbeRay};
pub use crate::resolve::{blend_radiance, BlendLaw, ResolveReport};
pub use crate::scatter::{QueryId, QueryRecord, QueryTable, ScatteredSample};
pub use crate::scene::{FrameCounter, SceneTracer, TimeSource, VisibilityHit};
pub use crate::stats::{CacheProfile, CacheProfileReport, StageTimings, WriteTally};

use crate::demo::{probe_grid_rays, DemoScene};
use cgmath::{InnerSpace, Vector3};
use std::path::Path;

const DEMO_DEFAULT_FRAMES: u32 = 240;
const DEMO_PROBE_GRID: u32 = 16;
const DEMO_PROBE_SPACING: f32 = 1.5;
const DEMO_PROBE_HEIGHT: f32 = 1.0;
const DEMO_RAYS_PER_PROBE: u32 = 64;
const DEMO_MAX_RAY_DISTANCE: f32 = 64.0;

/// Drive the demo scene for a number of frames.
///
/// Arguments: `[config.json] [frames]`. The sun moves halfway through, which
/// is treated as a scene change and resets the cache.
pub fn run() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => CacheConfig::load(Path::new(&path)).unwrap_or_else(|error| {
            log::warn!("{error}; using the default cache config");
            CacheConfig::default()
        }),
        None => CacheConfig::default(),
    };
    let frames = args
        .next()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEMO_DEFAULT_FRAMES);

    let mut cache = match RadianceCache::new(config) {
        Ok(cache) => cache,
        Err(error) => {
            log::error!("invalid cache config: {error}");
            return;
        }
    };
    let mut scene = DemoScene::default();
    let mut pipeline = FramePipeline::new(PipelineSettings::default());
    let mut clock = FrameCounter::default();
    let viewer = Vector3::new(0.0, DEMO_PROBE_HEIGHT, 0.0);

    for frame in 0..frames {
        if frame == frames / 2 && frame > 0 {
            scene = scene.with_sun(Vector3::new(0.5, 0.6, -0.4));
            cache.reset();
        }
        let step = clock.advance();
        let rays = probe_grid_rays(
            DEMO_PROBE_GRID,
            DEMO_PROBE_SPACING,
            DEMO_PROBE_HEIGHT,
            DEMO_RAYS_PER_PROBE,
            DEMO_MAX_RAY_DISTANCE,
            step,
        );
        let output = pipeline.run_time_step(&mut cache, &scene, &clock, viewer, &rays);

        if frame + 1 == frames {
            let mean = output
                .samples
                .iter()
                .fold(Vector3::new(0.0, 0.0, 0.0), |sum, sample| {
                    sum + Vector3::from(sample.radiance)
                })
                / output.samples.len().max(1) as f32;
            log::info!(
                "final step {}: {} occupied cells, mean probe radiance {:.3} ({:.3}, {:.3}, {:.3})",
                output.time_step,
                cache.occupied_cells(),
                mean.magnitude(),
                mean.x,
                mean.y,
                mean.z,
            );
        }
    }
}
