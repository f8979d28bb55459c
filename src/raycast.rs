//! Stage D: per-pixel camera ray vs. fitted bowl mesh intersection (spec
//! §4.D), via `ncollide3d`'s `shape::TriMesh` and its internal bounding
//! volume tree — the same mesh type and `RayCast` trait the teacher's own
//! `freemovr-calibration` crate uses for ray-vs-display-surface queries.

use nalgebra::{Isometry3, Point3};
use ncollide3d::query::{Ray, RayCast};
use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::types::mesh::FittedBowlMesh;
use crate::types::Intrinsics;

pub struct RaycastResult {
    pub width: usize,
    pub height: usize,
    /// Distance in mm from the camera to the bowl surface along each
    /// pixel's ray; `0.0` where the ray missed the mesh.
    pub bowl_depth_mm: Vec<f32>,
    pub hit: Vec<bool>,
}

impl RaycastResult {
    pub fn hit(&self, u: usize, v: usize) -> bool {
        self.hit[v * self.width + u]
    }

    pub fn depth_mm(&self, u: usize, v: usize) -> f32 {
        self.bowl_depth_mm[v * self.width + u]
    }
}

/// Cast one ray per pixel of a `width x height` image against `fitted`'s
/// surface, returning the first positive intersection distance.
///
/// Whether the hit rate is degenerate (spec §7 `RayCastDegenerate`) can
/// only be judged against the food mask, not this full-frame result, so
/// that determination is made by [`crate::volume::integrate`] instead.
pub fn cast(
    intrinsics: &Intrinsics,
    fitted: &FittedBowlMesh,
    width: usize,
    height: usize,
    ray_epsilon: f64,
    cancel: &CancellationToken,
) -> Result<RaycastResult> {
    let mesh = fitted.mesh.to_ncollide();
    let eye = Isometry3::identity();
    let origin = Point3::origin();

    let rows: Vec<(Vec<f32>, Vec<bool>)> = (0..height)
        .into_par_iter()
        .map(|v| {
            if cancel.is_cancelled() {
                return (vec![0.0; width], vec![false; width]);
            }
            let mut depths = Vec::with_capacity(width);
            let mut hits = Vec::with_capacity(width);
            for u in 0..width {
                // Single precision is sufficient for ray construction
                // (spec §4.D); widened to f64 only at the query boundary
                // since ncollide3d's mesh-query stack is f64-native.
                let dir_f32 = intrinsics.ray_direction(u as f64, v as f64).cast::<f32>();
                let dir = dir_f32.cast::<f64>();
                let ray = Ray::new(origin, dir);
                match mesh.toi_with_ray(&eye, &ray, f64::MAX, false) {
                    Some(toi) if toi > ray_epsilon => {
                        depths.push(toi as f32);
                        hits.push(true);
                    }
                    _ => {
                        depths.push(0.0);
                        hits.push(false);
                    }
                }
            }
            (depths, hits)
        })
        .collect();

    cancel.check()?;

    let mut bowl_depth_mm = Vec::with_capacity(width * height);
    let mut hit = Vec::with_capacity(width * height);
    for (depths, hits) in rows {
        bowl_depth_mm.extend(depths);
        hit.extend(hits);
    }

    Ok(RaycastResult {
        width,
        height,
        bowl_depth_mm,
        hit,
    })
}
