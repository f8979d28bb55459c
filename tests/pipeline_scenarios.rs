//! End-to-end scenarios exercising the full `estimate_volume` pipeline.

use bowl_volume::{CancellationToken, Config, DepthImage, EstimateRequest, FoodMask, Intrinsics, TriMesh};
use nalgebra::Point3;

fn hemisphere_mesh(radius: f64, n_lat: usize, n_lon: usize) -> TriMesh {
    let mut vertices = Vec::new();
    for i in 0..=n_lat {
        let phi = std::f64::consts::FRAC_PI_2 * (i as f64) / (n_lat as f64);
        let z = radius - radius * phi.cos();
        let r = radius * phi.sin();
        for j in 0..n_lon {
            let theta = 2.0 * std::f64::consts::PI * (j as f64) / (n_lon as f64);
            vertices.push(Point3::new(r * theta.cos(), r * theta.sin(), z));
        }
    }
    let mut triangles = Vec::new();
    for i in 0..n_lat {
        for j in 0..n_lon {
            let a = (i * n_lon + j) as u32;
            let b = (i * n_lon + (j + 1) % n_lon) as u32;
            let c = ((i + 1) * n_lon + j) as u32;
            let d = ((i + 1) * n_lon + (j + 1) % n_lon) as u32;
            triangles.push([a, b, c]);
            triangles.push([b, d, c]);
        }
    }
    TriMesh::new(vertices, triangles).unwrap()
}

fn flat_scene(width: usize, height: usize, raw: u16) -> DepthImage {
    DepthImage::new(width, height, vec![raw; width * height], 1e-4).unwrap()
}

/// An empty food mask must report exactly zero volume, regardless of bowl
/// fit quality: VolumeIntegrate only ever sums over masked-in pixels.
#[test]
fn empty_mask_reports_exactly_zero_volume() {
    let width = 64;
    let height = 64;
    let intrinsics = Intrinsics::new(500.0, 500.0, 32.0, 32.0, width, height).unwrap();
    let depth = flat_scene(width, height, 2000); // 200mm
    let mask = FoodMask::new(width, height, vec![false; width * height]).unwrap();
    let bowl_mesh = hemisphere_mesh(50.0, 6, 16);

    let request = EstimateRequest {
        depth: &depth,
        food_mask: &mask,
        intrinsics: &intrinsics,
        bowl_mesh: &bowl_mesh,
        bowl_rim_diameter_mm: 100.0,
        config: Config::default(),
        cancel: CancellationToken::new(),
    };

    let result = bowl_volume::estimate_volume(&request).unwrap();
    assert_eq!(result.volume_ml, 0.0);
    assert_eq!(result.diagnostics.n_food_pixels, 0);
    assert_eq!(result.diagnostics.n_valid_pixels, 0);
}

/// Running the same request twice must produce bit-identical results: no
/// stage introduces nondeterministic ordering (spec §5, §8 invariant 8).
#[test]
fn repeated_runs_are_deterministic() {
    let width = 80;
    let height = 80;
    let intrinsics = Intrinsics::new(400.0, 400.0, 40.0, 40.0, width, height).unwrap();
    let depth = flat_scene(width, height, 2000);
    let mut mask_data = vec![false; width * height];
    for v in 30..50 {
        for u in 30..50 {
            mask_data[v * width + u] = true;
        }
    }
    let mask = FoodMask::new(width, height, mask_data).unwrap();
    let bowl_mesh = hemisphere_mesh(60.0, 8, 20);

    let make_request = || EstimateRequest {
        depth: &depth,
        food_mask: &mask,
        intrinsics: &intrinsics,
        bowl_mesh: &bowl_mesh,
        bowl_rim_diameter_mm: 120.0,
        config: Config::default(),
        cancel: CancellationToken::new(),
    };

    let first = bowl_volume::estimate_volume(&make_request()).unwrap();
    let second = bowl_volume::estimate_volume(&make_request()).unwrap();
    assert_eq!(first, second);
}

/// Structural invariants that must hold regardless of fit quality: volume
/// is never negative, and pixel counts nest as expected (spec §8,
/// invariants 1 and 2).
#[test]
fn volume_is_nonnegative_and_pixel_counts_are_bounded() {
    let width = 96;
    let height = 96;
    let intrinsics = Intrinsics::new(450.0, 450.0, 48.0, 48.0, width, height).unwrap();
    let depth = flat_scene(width, height, 2200); // 220mm
    let mut mask_data = vec![false; width * height];
    for v in 20..70 {
        for u in 20..70 {
            mask_data[v * width + u] = true;
        }
    }
    let mask = FoodMask::new(width, height, mask_data).unwrap();
    let bowl_mesh = hemisphere_mesh(55.0, 8, 20);

    let request = EstimateRequest {
        depth: &depth,
        food_mask: &mask,
        intrinsics: &intrinsics,
        bowl_mesh: &bowl_mesh,
        bowl_rim_diameter_mm: 110.0,
        config: Config::default(),
        cancel: CancellationToken::new(),
    };

    let result = bowl_volume::estimate_volume(&request).unwrap();
    assert!(result.volume_ml >= 0.0);
    assert!(result.diagnostics.n_valid_pixels <= result.diagnostics.n_food_pixels);
    assert!(result.diagnostics.n_food_pixels <= width * height);
}

/// Cancelling before the pipeline starts must abort with `Cancelled`
/// rather than silently running to completion.
#[test]
fn cancellation_aborts_before_any_stage_runs() {
    let width = 16;
    let height = 16;
    let intrinsics = Intrinsics::new(300.0, 300.0, 8.0, 8.0, width, height).unwrap();
    let depth = flat_scene(width, height, 2000);
    let mask = FoodMask::new(width, height, vec![false; width * height]).unwrap();
    let bowl_mesh = hemisphere_mesh(40.0, 4, 10);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let request = EstimateRequest {
        depth: &depth,
        food_mask: &mask,
        intrinsics: &intrinsics,
        bowl_mesh: &bowl_mesh,
        bowl_rim_diameter_mm: 80.0,
        config: Config::default(),
        cancel,
    };

    let err = bowl_volume::estimate_volume(&request).unwrap_err();
    assert!(matches!(err, bowl_volume::BowlVolumeError::Cancelled));
}
