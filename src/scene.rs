//! Services the cache's producers and readers call into. Intersection,
//! material evaluation and the frame clock live outside this crate.

use cgmath::Vector3;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VisibilityHit<S> {
    pub position: Vector3<f32>,
    pub distance: f32,
    pub surface: S,
}

/// Geometry and lighting queries against the scene.
pub trait SceneTracer: Sync {
    /// Whatever the scene needs to shade a hit point later.
    type Surface: Send;

    fn trace_visibility(
        &self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        max_distance: f32,
    ) -> Option<VisibilityHit<Self::Surface>>;

    fn shade_direct(&self, surface: &Self::Surface) -> Vector3<f32>;

    /// Diffuse reflectance at a hit, weighting the cached bounce.
    fn albedo(&self, _surface: &Self::Surface) -> Vector3<f32> {
        Vector3::new(1.0, 1.0, 1.0)
    }

    fn sky_radiance(&self) -> Vector3<f32>;
}

pub trait TimeSource {
    fn current_time_step(&self) -> u32;
}

/// Time source counting rendered frames.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameCounter {
    frame: u32,
}

impl FrameCounter {
    pub fn advance(&mut self) -> u32 {
        self.frame = self.frame.wrapping_add(1);
        self.frame
    }
}

impl TimeSource for FrameCounter {
    fn current_time_step(&self) -> u32 {
        self.frame
    }
}
