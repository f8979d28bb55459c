//! Stage A: back-project a depth image into a metric camera-frame point
//! cloud (spec §4.A).

use rayon::prelude::*;

use crate::types::{DepthImage, Intrinsics, PointCloud};

/// Back-project every valid pixel of `depth` into a camera-frame point in
/// millimetres. A pixel is valid iff its raw depth is nonzero and its
/// resulting z lies within `[min_valid_mm, max_valid_mm]`.
///
/// Work is partitioned by row and reduced in row order, so the resulting
/// point order (and therefore `n_dropped`) is deterministic regardless of
/// how the thread pool schedules chunks (spec §5).
pub fn back_project(
    intrinsics: &Intrinsics,
    depth: &DepthImage,
    min_valid_mm: f64,
    max_valid_mm: f64,
) -> PointCloud {
    let width = depth.width();
    let height = depth.height();

    let per_row: Vec<(Vec<nalgebra::Point3<f64>>, usize)> = (0..height)
        .into_par_iter()
        .map(|v| {
            let mut row_points = Vec::new();
            let mut row_dropped = 0usize;
            for u in 0..width {
                let raw = depth.raw(u, v);
                if raw == 0 {
                    row_dropped += 1;
                    continue;
                }
                let z_mm = depth.to_mm(raw);
                if z_mm < min_valid_mm || z_mm > max_valid_mm {
                    row_dropped += 1;
                    continue;
                }
                row_points.push(intrinsics.back_project(u as f64, v as f64, z_mm));
            }
            (row_points, row_dropped)
        })
        .collect();

    let mut points = Vec::new();
    let mut n_dropped = 0usize;
    for (row_points, row_dropped) in per_row {
        points.extend(row_points);
        n_dropped += row_dropped;
    }

    PointCloud { points, n_dropped }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_depth(width: usize, height: usize, raw: u16) -> DepthImage {
        DepthImage::new(width, height, vec![raw; width * height], 1e-4).unwrap()
    }

    #[test]
    fn drops_zero_depth() {
        let intr = Intrinsics::new(100.0, 100.0, 5.0, 5.0, 10, 10).unwrap();
        let depth = flat_depth(10, 10, 0);
        let cloud = back_project(&intr, &depth, 70.0, 500.0);
        assert!(cloud.is_empty());
        assert_eq!(cloud.n_dropped, 100);
    }

    #[test]
    fn drops_out_of_range_depth() {
        let intr = Intrinsics::new(100.0, 100.0, 5.0, 5.0, 10, 10).unwrap();
        // 1000 raw units * 1e-4 m/unit * 1000 mm/m = 100mm -> within range
        let depth_ok = flat_depth(10, 10, 1000);
        let cloud = back_project(&intr, &depth_ok, 70.0, 90.0);
        assert!(cloud.is_empty());
        assert_eq!(cloud.n_dropped, 100);
    }

    #[test]
    fn keeps_valid_depth_and_matches_formula() {
        let intr = Intrinsics::new(100.0, 100.0, 5.0, 5.0, 10, 10).unwrap();
        let depth = flat_depth(10, 10, 1000); // 100mm
        let cloud = back_project(&intr, &depth, 70.0, 500.0);
        assert_eq!(cloud.len(), 100);
        assert_eq!(cloud.n_dropped, 0);
        let p = cloud.points[0];
        assert!((p.z - 100.0).abs() < 1e-9);
        let expected_x = (0.0 - 5.0) * 100.0 / 100.0;
        assert!((p.x - expected_x).abs() < 1e-9);
    }

    #[test]
    fn empty_output_is_legal() {
        let intr = Intrinsics::new(100.0, 100.0, 5.0, 5.0, 1, 1).unwrap();
        let depth = flat_depth(1, 1, 0);
        let cloud = back_project(&intr, &depth, 70.0, 500.0);
        assert_eq!(cloud.len(), 0);
    }
}
