//! Stage B: canonicalize a reference bowl mesh (spec §4.B).
//!
//! The canonical frame has the bowl's opening facing +z, the rim plane at
//! `z = rim_z_mm` (the largest vertex z), and the rim centroid projected to
//! the xy-origin. No scaling is performed here; scale is solved later from
//! the measured true rim diameter (spec §4.C).

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};

use crate::error::{BowlVolumeError, Result};
use crate::types::mesh::{CanonicalBowlMesh, TriMesh};

/// Canonicalize `mesh` per spec §4.B, and measure its rim diameter using
/// the top `rim_percentile`% of vertices by z.
pub fn canonicalize(mesh: &TriMesh, rim_percentile: f64) -> Result<CanonicalBowlMesh> {
    let rotation = symmetry_axis_rotation(&mesh.vertices)?;
    let mut rotated: Vec<Point3<f64>> = mesh
        .vertices
        .iter()
        .map(|v| Point3::from(rotation * v.coords))
        .collect();

    if !opening_is_at_positive_z(&rotated) {
        // Flip about x: negate y and z.
        for v in rotated.iter_mut() {
            v.y = -v.y;
            v.z = -v.z;
        }
    }

    // Translate so the mean of the rim-candidate vertices (top
    // `rim_percentile`%) lands at (0, 0, z_rim), z_rim = max vertex z.
    let rim_idx = rim_candidate_indices(&rotated, rim_percentile);
    let (sum_x, sum_y) = rim_idx.iter().fold((0.0, 0.0), |(sx, sy), &i| {
        (sx + rotated[i].x, sy + rotated[i].y)
    });
    let n_rim = rim_idx.len().max(1) as f64;
    let mean_x = sum_x / n_rim;
    let mean_y = sum_y / n_rim;

    let translated: Vec<Point3<f64>> = rotated
        .iter()
        .map(|v| Point3::new(v.x - mean_x, v.y - mean_y, v.z))
        .collect();

    let rim_z_mm = translated
        .iter()
        .map(|v| v.z)
        .fold(f64::NEG_INFINITY, f64::max);

    let canonical_mesh = TriMesh {
        vertices: translated,
        triangles: mesh.triangles.clone(),
    };

    let rim_diameter_model_mm = measure_rim_diameter(&canonical_mesh, rim_percentile);

    Ok(CanonicalBowlMesh {
        mesh: canonical_mesh,
        rim_z_mm,
        rim_diameter_model_mm,
        rim_vertex_indices: rim_idx,
    })
}

/// Run PCA over vertex positions and return the rotation that aligns the
/// axis of smallest variance (the bowl's symmetry axis candidate) with +z.
fn symmetry_axis_rotation(vertices: &[Point3<f64>]) -> Result<Rotation3<f64>> {
    if vertices.len() < 4 {
        return Err(BowlVolumeError::InvalidInput(
            "mesh must have at least 4 vertices for PCA".into(),
        ));
    }
    let n = vertices.len() as f64;
    let centroid = vertices
        .iter()
        .fold(Vector3::zeros(), |acc, v| acc + v.coords)
        / n;

    let mut cov = Matrix3::zeros();
    for v in vertices {
        let d = v.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n;

    let eigen = nalgebra::linalg::SymmetricEigen::new(cov);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .ok_or(BowlVolumeError::SvdFailed)?;
    let axis = eigen.eigenvectors.column(min_idx).into_owned();
    let axis = Vector3::new(axis.x, axis.y, axis.z);

    match Rotation3::rotation_between(&axis, &Vector3::z()) {
        Some(r) => Ok(r),
        // axis is anti-parallel (or exactly parallel) to +z already.
        None => {
            if axis.z >= 0.0 {
                Ok(Rotation3::identity())
            } else {
                Ok(Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI))
            }
        }
    }
}

/// Decide whether the +z end of `vertices` is the bowl's opening: the end
/// whose vertices form a larger convex-hull area (in xy) after projection.
fn opening_is_at_positive_z(vertices: &[Point3<f64>]) -> bool {
    let mut zs: Vec<f64> = vertices.iter().map(|v| v.z).collect();
    zs.sort_by(f64::total_cmp);
    let n = zs.len();
    let band = (n / 10).max(1);

    let top_z_threshold = zs[n - band];
    let bottom_z_threshold = zs[band - 1];

    let top_pts: Vec<(f64, f64)> = vertices
        .iter()
        .filter(|v| v.z >= top_z_threshold)
        .map(|v| (v.x, v.y))
        .collect();
    let bottom_pts: Vec<(f64, f64)> = vertices
        .iter()
        .filter(|v| v.z <= bottom_z_threshold)
        .map(|v| (v.x, v.y))
        .collect();

    convex_hull_area(&top_pts) >= convex_hull_area(&bottom_pts)
}

fn rim_candidate_indices(vertices: &[Point3<f64>], percentile: f64) -> Vec<usize> {
    let mut zs: Vec<f64> = vertices.iter().map(|v| v.z).collect();
    zs.sort_by(f64::total_cmp);
    let threshold = percentile_value(&zs, percentile);
    vertices
        .iter()
        .enumerate()
        .filter(|(_, v)| v.z >= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Linear-interpolated percentile over an already-sorted slice.
fn percentile_value(sorted: &[f64], percentile: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (percentile / 100.0) * (n as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Measure the rim diameter of `mesh`: project the top `rim_percentile`%
/// of vertices by z onto xy, PCA those points, and report the span along
/// the major axis.
pub fn measure_rim_diameter(mesh: &TriMesh, rim_percentile: f64) -> f64 {
    let mut zs: Vec<f64> = mesh.vertices.iter().map(|v| v.z).collect();
    zs.sort_by(f64::total_cmp);
    let threshold = percentile_value(&zs, rim_percentile);

    let pts: Vec<(f64, f64)> = mesh
        .vertices
        .iter()
        .filter(|v| v.z >= threshold)
        .map(|v| (v.x, v.y))
        .collect();

    pca_major_axis_span(&pts)
}

/// Span of `points` along the dominant-variance axis of their 3-D PCA: the
/// general-orientation analogue of `measure_rim_diameter`'s xy ellipse fit,
/// used by `FittedBowlMesh::rim_diameter_mm` once the rim is no longer
/// guaranteed to lie in a z=const band (spec §8 invariant 7).
pub(crate) fn measure_rim_diameter_3d(points: &[Point3<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n;

    let eigen = nalgebra::linalg::SymmetricEigen::new(cov);
    let (max_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .expect("covariance matrix always has 3 eigenvalues");
    let axis = eigen.eigenvectors.column(max_idx).into_owned();

    let (mut min_proj, mut max_proj) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in points {
        let proj = (p.coords - centroid).dot(&axis);
        min_proj = min_proj.min(proj);
        max_proj = max_proj.max(proj);
    }
    max_proj - min_proj
}

/// Span of `pts` along the major axis of their 2-D PCA.
fn pca_major_axis_span(pts: &[(f64, f64)]) -> f64 {
    if pts.len() < 2 {
        return 0.0;
    }
    let n = pts.len() as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
    let (mx, my) = (sx / n, sy / n);

    let mut cxx = 0.0;
    let mut cxy = 0.0;
    let mut cyy = 0.0;
    for (x, y) in pts {
        let dx = x - mx;
        let dy = y - my;
        cxx += dx * dx;
        cxy += dx * dy;
        cyy += dy * dy;
    }
    cxx /= n;
    cxy /= n;
    cyy /= n;

    let cov = nalgebra::Matrix2::new(cxx, cxy, cxy, cyy);
    let eigen = nalgebra::linalg::SymmetricEigen::new(cov);
    let (max_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .unwrap();
    let axis = eigen.eigenvectors.column(max_idx);
    let (ax, ay) = (axis.x, axis.y);

    let (mut min_proj, mut max_proj) = (f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in pts {
        let proj = (x - mx) * ax + (y - my) * ay;
        min_proj = min_proj.min(proj);
        max_proj = max_proj.max(proj);
    }
    max_proj - min_proj
}

/// Area of the convex hull of `pts`, via a Graham scan and the shoelace
/// formula. `pts.len() < 3` yields an area of 0.
fn convex_hull_area(pts: &[(f64, f64)]) -> f64 {
    let hull = convex_hull(pts);
    if hull.len() < 3 {
        return 0.0;
    }
    let mut area2 = 0.0;
    for i in 0..hull.len() {
        let (x0, y0) = hull[i];
        let (x1, y1) = hull[(i + 1) % hull.len()];
        area2 += x0 * y1 - x1 * y0;
    }
    area2.abs() / 2.0
}

/// Convex hull of a 2-D point set via monotone chain (Andrew's algorithm).
fn convex_hull(pts: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted = pts.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    sorted.dedup();
    let n = sorted.len();
    if n < 3 {
        return sorted;
    }

    fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &sorted {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}
