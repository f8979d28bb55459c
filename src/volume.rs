//! Stage E: integrate per-pixel food height over footprint area into a
//! volume in millilitres (spec §4.E).

use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::error::{Result, Warning};
use crate::raycast::RaycastResult;
use crate::types::{DepthImage, FoodMask, Intrinsics};

/// Volume and quality diagnostics produced by VolumeIntegrate (spec §3,
/// `VolumeResult`'s diagnostics fields).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeDiagnostics {
    pub volume_ml: f64,
    pub n_food_pixels: usize,
    pub n_valid_pixels: usize,
    pub valid_ratio: f64,
    pub mean_height_mm: f64,
    pub max_height_mm: f64,
    pub std_height_mm: f64,
}

#[derive(Default, Clone, Copy)]
struct RowAccum {
    sum_volume_mm3: f64,
    n_valid: usize,
    sum_height: f64,
    sum_height_sq: f64,
    max_height: f64,
    n_food_bowl_hits: usize,
}

/// Integrate food volume over every masked-in pixel with valid observed
/// depth and a valid bowl-surface raycast hit. Also judges
/// `RayCastDegenerate` (spec §7): the fitted mesh has zero hit rate
/// specifically over the food mask, which only this stage can see.
pub fn integrate(
    intrinsics: &Intrinsics,
    depth: &DepthImage,
    mask: &FoodMask,
    raycast: &RaycastResult,
    cancel: &CancellationToken,
) -> Result<(VolumeDiagnostics, Vec<Warning>)> {
    let width = depth.width();
    let height = depth.height();

    let per_row: Vec<RowAccum> = (0..height)
        .into_par_iter()
        .map(|v| {
            let mut acc = RowAccum::default();
            if cancel.is_cancelled() {
                return acc;
            }
            for u in 0..width {
                if !mask.is_food(u, v) {
                    continue;
                }
                let raw = depth.raw(u, v);
                if raw == 0 {
                    continue;
                }
                if raycast.hit(u, v) {
                    acc.n_food_bowl_hits += 1;
                } else {
                    continue;
                }
                let observed_z_mm = depth.to_mm(raw);
                let bowl_z_mm = raycast.depth_mm(u, v) as f64;
                let height_mm = bowl_z_mm - observed_z_mm;
                if height_mm <= 0.0 {
                    // Food is at or behind the bowl surface: a noisy edge
                    // pixel or an empty bowl (spec §4.E step 4). Not a
                    // valid contribution, not counted towards n_valid.
                    continue;
                }

                let footprint_mm2 = (observed_z_mm * observed_z_mm) / (intrinsics.fx * intrinsics.fy);
                acc.sum_volume_mm3 += height_mm * footprint_mm2;
                acc.n_valid += 1;
                acc.sum_height += height_mm;
                acc.sum_height_sq += height_mm * height_mm;
                acc.max_height = acc.max_height.max(height_mm);
            }
            acc
        })
        .collect();

    cancel.check()?;

    let mut sum_volume_mm3 = 0.0;
    let mut n_valid = 0usize;
    let mut sum_height = 0.0;
    let mut sum_height_sq = 0.0;
    let mut max_height = 0.0;
    let mut n_food_bowl_hits = 0usize;
    for acc in per_row {
        sum_volume_mm3 += acc.sum_volume_mm3;
        n_valid += acc.n_valid;
        sum_height += acc.sum_height;
        sum_height_sq += acc.sum_height_sq;
        max_height = max_height.max(acc.max_height);
        n_food_bowl_hits += acc.n_food_bowl_hits;
    }

    let n_food_pixels = mask.count();
    let valid_ratio = if n_food_pixels == 0 {
        0.0
    } else {
        n_valid as f64 / n_food_pixels as f64
    };
    let mean_height_mm = if n_valid == 0 { 0.0 } else { sum_height / n_valid as f64 };
    let std_height_mm = if n_valid == 0 {
        0.0
    } else {
        let variance = (sum_height_sq / n_valid as f64) - mean_height_mm * mean_height_mm;
        variance.max(0.0).sqrt()
    };

    let mut warnings = Vec::new();
    if n_food_pixels > 0 && n_food_bowl_hits == 0 {
        warnings.push(Warning::RayCastDegenerate);
    }

    Ok((
        VolumeDiagnostics {
            volume_ml: sum_volume_mm3 / 1000.0,
            n_food_pixels,
            n_valid_pixels: n_valid,
            valid_ratio,
            mean_height_mm,
            max_height_mm: max_height,
            std_height_mm,
        },
        warnings,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;

    fn uniform_raycast(width: usize, height: usize, bowl_depth_mm: f32) -> RaycastResult {
        RaycastResult {
            width,
            height,
            bowl_depth_mm: vec![bowl_depth_mm; width * height],
            hit: vec![true; width * height],
        }
    }

    #[test]
    fn cancellation_before_integration_aborts_with_cancelled_error() {
        let width = 10;
        let height = 10;
        let intr = Intrinsics::new(500.0, 500.0, 5.0, 5.0, width, height).unwrap();
        let depth = DepthImage::new(width, height, vec![1000u16; width * height], 1e-4).unwrap();
        let mask = FoodMask::new(width, height, vec![true; width * height]).unwrap();
        let raycast = uniform_raycast(width, height, 150.0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = integrate(&intr, &depth, &mask, &raycast, &cancel).unwrap_err();
        assert!(matches!(err, crate::error::BowlVolumeError::Cancelled));
    }

    #[test]
    fn empty_mask_yields_zero_volume() {
        let intr = Intrinsics::new(500.0, 500.0, 5.0, 5.0, 10, 10).unwrap();
        let depth = DepthImage::new(10, 10, vec![1000u16; 100], 1e-4).unwrap();
        let mask = FoodMask::new(10, 10, vec![false; 100]).unwrap();
        let raycast = uniform_raycast(10, 10, 150.0);
        let cancel = CancellationToken::new();
        let (diag, warnings) = integrate(&intr, &depth, &mask, &raycast, &cancel).unwrap();
        assert_eq!(diag.volume_ml, 0.0);
        assert_eq!(diag.n_food_pixels, 0);
        assert_eq!(diag.valid_ratio, 0.0);
        // No food pixels at all is not the same as a degenerate raycast.
        assert!(warnings.is_empty());
    }

    #[test]
    fn equal_food_and_bowl_depth_yields_zero_valid_pixels() {
        // Spec S2: food depth equals bowl depth per pixel everywhere ->
        // volume_ml = 0 exactly and valid_ratio = 0 (every pixel is
        // skipped at h_mm <= 0, not merely floored to zero height).
        let intr = Intrinsics::new(500.0, 500.0, 5.0, 5.0, 10, 10).unwrap();
        let depth = DepthImage::new(10, 10, vec![1000u16; 100], 1e-4).unwrap();
        let mask = FoodMask::new(10, 10, vec![true; 100]).unwrap();
        let raycast = uniform_raycast(10, 10, 100.0);
        let cancel = CancellationToken::new();
        let (diag, _warnings) = integrate(&intr, &depth, &mask, &raycast, &cancel).unwrap();
        assert_eq!(diag.volume_ml, 0.0);
        assert_eq!(diag.n_food_pixels, 100);
        assert_eq!(diag.n_valid_pixels, 0);
        assert_eq!(diag.valid_ratio, 0.0);
    }

    #[test]
    fn zero_bowl_hit_rate_over_food_mask_raises_degenerate_warning() {
        let intr = Intrinsics::new(500.0, 500.0, 5.0, 5.0, 10, 10).unwrap();
        let depth = DepthImage::new(10, 10, vec![1000u16; 100], 1e-4).unwrap();
        let mask = FoodMask::new(10, 10, vec![true; 100]).unwrap();
        let raycast = RaycastResult {
            width: 10,
            height: 10,
            bowl_depth_mm: vec![0.0; 100],
            hit: vec![false; 100],
        };
        let cancel = CancellationToken::new();
        let (diag, warnings) = integrate(&intr, &depth, &mask, &raycast, &cancel).unwrap();
        assert_eq!(diag.volume_ml, 0.0);
        assert!(warnings.contains(&Warning::RayCastDegenerate));
    }

    #[test]
    fn uniform_height_matches_closed_form_cylinder_volume() {
        // Flat food slab of known height under a flat bowl-surface
        // raycast: volume should match height * total footprint area.
        let width = 100;
        let height = 100;
        let fx = 500.0;
        let fy = 500.0;
        let intr = Intrinsics::new(fx, fy, 50.0, 50.0, width, height).unwrap();
        // observed depth 100mm, bowl surface at 110mm -> 10mm of food.
        let raw = 1000u16; // 1000 * 1e-4 m/unit * 1000mm/m = 100mm
        let depth = DepthImage::new(width, height, vec![raw; width * height], 1e-4).unwrap();
        let mask = FoodMask::new(width, height, vec![true; width * height]).unwrap();
        let raycast = uniform_raycast(width, height, 110.0);
        let cancel = CancellationToken::new();
        let (diag, _warnings) = integrate(&intr, &depth, &mask, &raycast, &cancel).unwrap();

        let expected_footprint_mm2 = (100.0_f64 * 100.0) / (fx * fy);
        let expected_volume_mm3 = 10.0 * expected_footprint_mm2 * (width * height) as f64;
        assert!((diag.volume_ml - expected_volume_mm3 / 1000.0).abs() < 1e-6);
        assert_eq!(diag.n_valid_pixels, width * height);
        assert!((diag.mean_height_mm - 10.0).abs() < 1e-9);
        assert!((diag.max_height_mm - 10.0).abs() < 1e-9);
        assert!(diag.std_height_mm < 1e-9);
    }

    #[test]
    fn circular_food_patch_approximates_cylinder_volume() {
        // A 20mm-radius, 10mm-tall disc of food sitting at 200mm depth
        // should integrate close to its closed-form cylinder volume
        // (pi * r^2 * h =~ 12.566 ml).
        let width = 240;
        let height = 240;
        let (cx, cy) = (120usize, 120usize);
        let fx = 1000.0;
        let fy = 1000.0;
        let intr = Intrinsics::new(fx, fy, cx as f64, cy as f64, width, height).unwrap();

        let observed_z_mm = 200.0;
        let depth_scale = 1e-4;
        let raw = (observed_z_mm / (depth_scale * 1000.0)).round() as u16;
        let depth = DepthImage::new(width, height, vec![raw; width * height], depth_scale).unwrap();

        // At 200mm depth with fx=fy=1000, one pixel spans 0.2mm, so a
        // 20mm-radius disc is a 100-pixel-radius circle.
        let radius_px = 100.0_f64;
        let mut mask_data = vec![false; width * height];
        for v in 0..height {
            for u in 0..width {
                let dx = u as f64 - cx as f64;
                let dy = v as f64 - cy as f64;
                if dx * dx + dy * dy <= radius_px * radius_px {
                    mask_data[v * width + u] = true;
                }
            }
        }
        let mask = FoodMask::new(width, height, mask_data).unwrap();
        let raycast = uniform_raycast(width, height, observed_z_mm + 10.0);
        let cancel = CancellationToken::new();
        let (diag, _warnings) = integrate(&intr, &depth, &mask, &raycast, &cancel).unwrap();

        let expected_ml = std::f64::consts::PI * 20.0 * 20.0 * 10.0 / 1000.0;
        assert!((diag.volume_ml - expected_ml).abs() / expected_ml < 0.05);
    }

    #[test]
    fn doubling_every_height_doubles_volume() {
        // Spec §8 invariant 9: VolumeIntegrate is linear in per-pixel
        // heights.
        let width = 50;
        let height = 50;
        let intr = Intrinsics::new(500.0, 500.0, 25.0, 25.0, width, height).unwrap();
        let depth = DepthImage::new(width, height, vec![1000u16; width * height], 1e-4).unwrap();
        let mask = FoodMask::new(width, height, vec![true; width * height]).unwrap();
        let cancel = CancellationToken::new();

        let raycast_base = uniform_raycast(width, height, 110.0);
        let (diag_base, _) = integrate(&intr, &depth, &mask, &raycast_base, &cancel).unwrap();

        // Doubling every per-pixel height (bowl surface twice as far
        // past the observed food depth) must double the volume.
        let raycast_doubled = uniform_raycast(width, height, 120.0);
        let (diag_doubled, _) = integrate(&intr, &depth, &mask, &raycast_doubled, &cancel).unwrap();

        assert!((diag_doubled.volume_ml - 2.0 * diag_base.volume_ml).abs() < 1e-9);
    }

    #[test]
    fn hemispherical_bowl_matches_closed_form_volume() {
        // Spec S5: a hemisphere of inner radius 50mm, food surface the
        // horizontal plane at the hemisphere's equator, mask = pixels
        // whose ray hits the hemisphere. Per-pixel height sqrt(R^2-r^2)
        // integrated over the disc footprint should approximate
        // (2/3)*pi*R^3 =~ 261.8 ml.
        let width = 600;
        let height = 600;
        let (cx, cy) = (300usize, 300usize);
        let fx = 1000.0;
        let fy = 1000.0;
        let intr = Intrinsics::new(fx, fy, cx as f64, cy as f64, width, height).unwrap();

        let radius_mm = 50.0;
        let standoff_mm = 200.0;
        let depth_scale = 1e-4;
        let raw = (standoff_mm / (depth_scale * 1000.0)).round() as u16;
        let depth = DepthImage::new(width, height, vec![raw; width * height], depth_scale).unwrap();

        let mut mask_data = vec![false; width * height];
        let mut bowl_depth_mm = vec![0.0f32; width * height];
        let mut hit = vec![false; width * height];
        for v in 0..height {
            for u in 0..width {
                let dx_mm = (u as f64 - cx as f64) * standoff_mm / fx;
                let dy_mm = (v as f64 - cy as f64) * standoff_mm / fy;
                let r_sq = dx_mm * dx_mm + dy_mm * dy_mm;
                if r_sq <= radius_mm * radius_mm {
                    let idx = v * width + u;
                    mask_data[idx] = true;
                    hit[idx] = true;
                    bowl_depth_mm[idx] = (standoff_mm + (radius_mm * radius_mm - r_sq).sqrt()) as f32;
                }
            }
        }
        let mask = FoodMask::new(width, height, mask_data).unwrap();
        let raycast = RaycastResult {
            width,
            height,
            bowl_depth_mm,
            hit,
        };
        let cancel = CancellationToken::new();
        let (diag, _warnings) = integrate(&intr, &depth, &mask, &raycast, &cancel).unwrap();

        let expected_ml = (2.0 / 3.0) * std::f64::consts::PI * radius_mm.powi(3) / 1000.0;
        assert!((diag.volume_ml - expected_ml).abs() / expected_ml < 0.08);
    }
}
