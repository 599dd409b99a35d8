//! Headless test scene: a checkered ground plane and a red wall lit by a sun,
//! sampled by a grid of probes.

use crate::frame::ProbeRay;
use crate::scene::{SceneTracer, VisibilityHit};
use cgmath::{ElementWise, InnerSpace, Vector3};
use std::f32::consts::PI;

const SHADOW_BIAS: f32 = 1.0e-3;
const GOLDEN_ANGLE: f32 = 2.399_963;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DemoSurface {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub albedo: Vector3<f32>,
}

#[derive(Clone, Debug)]
pub struct DemoScene {
    /// Unit vector pointing toward the sun.
    pub sun_direction: Vector3<f32>,
    pub sun_color: Vector3<f32>,
    pub sky: Vector3<f32>,
    pub ground_half_extent: f32,
    pub wall_x: f32,
    pub wall_height: f32,
}

impl Default for DemoScene {
    fn default() -> Self {
        Self {
            sun_direction: Vector3::new(-0.4, 0.8, 0.3).normalize(),
            sun_color: Vector3::new(1.0, 0.95, 0.85),
            sky: Vector3::new(0.15, 0.25, 0.45),
            ground_half_extent: 16.0,
            wall_x: 6.0,
            wall_height: 4.0,
        }
    }
}

impl DemoScene {
    pub fn with_sun(mut self, sun_direction: Vector3<f32>) -> Self {
        self.sun_direction = sun_direction.normalize();
        self
    }

    fn intersect_ground(
        &self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
    ) -> Option<(f32, DemoSurface)> {
        if direction.y.abs() < 1.0e-6 {
            return None;
        }
        let t = -origin.y / direction.y;
        if t <= 0.0 {
            return None;
        }
        let position = origin + direction * t;
        if position.x.abs() > self.ground_half_extent || position.z.abs() > self.ground_half_extent {
            return None;
        }
        let checker = (position.x.floor() as i32 + position.z.floor() as i32).rem_euclid(2);
        let albedo = if checker == 0 {
            Vector3::new(0.8, 0.8, 0.8)
        } else {
            Vector3::new(0.3, 0.3, 0.3)
        };
        let normal = Vector3::new(0.0, -direction.y.signum(), 0.0);
        Some((
            t,
            DemoSurface {
                position,
                normal,
                albedo,
            },
        ))
    }

    fn intersect_wall(
        &self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
    ) -> Option<(f32, DemoSurface)> {
        if direction.x.abs() < 1.0e-6 {
            return None;
        }
        let t = (self.wall_x - origin.x) / direction.x;
        if t <= 0.0 {
            return None;
        }
        let position = origin + direction * t;
        if position.y < 0.0 || position.y > self.wall_height || position.z.abs() > self.ground_half_extent
        {
            return None;
        }
        Some((
            t,
            DemoSurface {
                position,
                normal: Vector3::new(-direction.x.signum(), 0.0, 0.0),
                albedo: Vector3::new(0.8, 0.15, 0.1),
            },
        ))
    }
}

impl SceneTracer for DemoScene {
    type Surface = DemoSurface;

    fn trace_visibility(
        &self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        max_distance: f32,
    ) -> Option<VisibilityHit<DemoSurface>> {
        let ground = self.intersect_ground(origin, direction);
        let wall = self.intersect_wall(origin, direction);
        let (distance, surface) = match (ground, wall) {
            (Some(g), Some(w)) => {
                if g.0 <= w.0 {
                    g
                } else {
                    w
                }
            }
            (Some(hit), None) | (None, Some(hit)) => hit,
            (None, None) => return None,
        };
        (distance <= max_distance).then_some(VisibilityHit {
            position: surface.position,
            distance,
            surface,
        })
    }

    fn shade_direct(&self, surface: &DemoSurface) -> Vector3<f32> {
        let cosine = surface.normal.dot(self.sun_direction);
        if cosine <= 0.0 {
            return Vector3::new(0.0, 0.0, 0.0);
        }
        let shadow_origin = surface.position + surface.normal * SHADOW_BIAS;
        if self
            .trace_visibility(shadow_origin, self.sun_direction, f32::INFINITY)
            .is_some()
        {
            return Vector3::new(0.0, 0.0, 0.0);
        }
        self.sun_color.mul_element_wise(surface.albedo) * (cosine / PI)
    }

    fn albedo(&self, surface: &DemoSurface) -> Vector3<f32> {
        surface.albedo
    }

    fn sky_radiance(&self) -> Vector3<f32> {
        self.sky
    }
}

/// Evenly spread unit directions, rotated by `frame` so successive frames
/// sample different directions.
pub fn fibonacci_directions(count: u32, frame: u32) -> Vec<Vector3<f32>> {
    let rotation = frame as f32 * GOLDEN_ANGLE;
    (0..count)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let radius = (1.0 - z * z).max(0.0).sqrt();
            let phi = i as f32 * GOLDEN_ANGLE + rotation;
            Vector3::new(radius * phi.cos(), z, radius * phi.sin())
        })
        .collect()
}

/// Rays for a `grid x grid` layer of probes at `height`, centred on the origin.
pub fn probe_grid_rays(
    grid: u32,
    spacing: f32,
    height: f32,
    rays_per_probe: u32,
    max_distance: f32,
    frame: u32,
) -> Vec<ProbeRay> {
    let directions = fibonacci_directions(rays_per_probe, frame);
    let offset = (grid as f32 - 1.0) * spacing * 0.5;
    let mut rays = Vec::with_capacity(grid as usize * grid as usize * rays_per_probe as usize);
    for gz in 0..grid {
        for gx in 0..grid {
            let origin = Vector3::new(
                gx as f32 * spacing - offset,
                height,
                gz as f32 * spacing - offset,
            );
            rays.extend(directions.iter().map(|direction| ProbeRay {
                origin,
                direction: *direction,
                max_distance,
            }));
        }
    }
    rays
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downward_ray_hits_lit_ground() {
        let scene = DemoScene::default();
        let hit = scene
            .trace_visibility(
                Vector3::new(0.25, 2.0, 0.25),
                Vector3::new(0.0, -1.0, 0.0),
                10.0,
            )
            .unwrap();
        assert!((hit.distance - 2.0).abs() < 1.0e-5);
        assert_eq!(hit.surface.normal, Vector3::new(0.0, 1.0, 0.0));
        let direct = scene.shade_direct(&hit.surface);
        assert!(direct.x > 0.0 && direct.y > 0.0 && direct.z > 0.0);
    }

    #[test]
    fn upward_ray_misses() {
        let scene = DemoScene::default();
        assert!(scene
            .trace_visibility(Vector3::new(0.0, 1.0, 0.0), Vector3::new(0.0, 1.0, 0.0), 100.0)
            .is_none());
    }

    #[test]
    fn wall_blocks_the_ground_behind_it() {
        let scene = DemoScene::default();
        let hit = scene
            .trace_visibility(
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(1.0, -0.05, 0.0).normalize(),
                100.0,
            )
            .unwrap();
        assert!((hit.position.x - scene.wall_x).abs() < 1.0e-4);
        assert_eq!(hit.surface.normal, Vector3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn max_distance_cuts_hits() {
        let scene = DemoScene::default();
        assert!(scene
            .trace_visibility(Vector3::new(0.0, 2.0, 0.0), Vector3::new(0.0, -1.0, 0.0), 1.0)
            .is_none());
    }

    #[test]
    fn fibonacci_directions_are_unit_length() {
        for direction in fibonacci_directions(64, 3) {
            assert!((direction.magnitude() - 1.0).abs() < 1.0e-4);
        }
        assert_ne!(fibonacci_directions(8, 0), fibonacci_directions(8, 1));
    }

    #[test]
    fn probe_grid_emits_every_ray() {
        let rays = probe_grid_rays(3, 2.0, 1.0, 16, 32.0, 0);
        assert_eq!(rays.len(), 3 * 3 * 16);
        assert_eq!(rays[0].origin, Vector3::new(-2.0, 1.0, -2.0));
    }
}
