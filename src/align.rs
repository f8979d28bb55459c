//! Rigid point-set alignment (spec §4.C), grounded directly on the
//! teacher's `align_points` Kabsch-Umeyama solve in
//! `geometry/mvg/src/align_points.rs`, generalized to operate on
//! correspondence pairs with scale pinned to 1.0 — BowlFit solves scale
//! once, analytically, from the rim-diameter ratio before ICP begins.

use nalgebra::{Matrix3, Point3, Vector3};

use crate::error::{BowlVolumeError, Result};

/// Point-to-point rigid solve: find `(R, t)` minimizing
/// `sum_i |R*src[i] + t - dst[i]|^2`, via SVD (Kabsch-Umeyama with scale
/// fixed at 1.0).
pub fn solve_point_to_point(src: &[Point3<f64>], dst: &[Point3<f64>]) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    if src.len() != dst.len() || src.is_empty() {
        return Err(BowlVolumeError::InvalidInput(
            "point-to-point solve requires equal, nonempty correspondence sets".into(),
        ));
    }
    let n = src.len() as f64;

    let src_centroid = src.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let dst_centroid = dst.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;

    let mut cross_cov = Matrix3::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let sc = s.coords - src_centroid;
        let dc = d.coords - dst_centroid;
        cross_cov += dc * sc.transpose();
    }
    cross_cov /= n;

    let svd = nalgebra::linalg::SVD::try_new(cross_cov, true, true, 1e-12, 0)
        .ok_or(BowlVolumeError::SvdFailed)?;
    let u = svd.u.ok_or(BowlVolumeError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(BowlVolumeError::SvdFailed)?;

    // Correct for a reflection so the result is a proper rotation.
    let mut d = Matrix3::identity();
    if (u * v_t).determinant() < 0.0 {
        d[(2, 2)] = -1.0;
    }
    let rotation = u * d * v_t;
    let translation = dst_centroid - rotation * src_centroid;

    Ok((rotation, translation))
}

/// Point-to-plane rigid solve: find `(R, t)` minimizing
/// `sum_i ((R*src[i] + t - dst[i]) . n_i)^2` via the standard
/// small-angle linearization (6x6 normal-equations solve over the twist
/// parameters, then re-orthonormalized into a rotation matrix).
pub fn solve_point_to_plane(
    src: &[Point3<f64>],
    dst: &[Point3<f64>],
    dst_normals: &[Vector3<f64>],
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    if src.len() != dst.len() || src.len() != dst_normals.len() || src.is_empty() {
        return Err(BowlVolumeError::InvalidInput(
            "point-to-plane solve requires equal, nonempty correspondence sets".into(),
        ));
    }

    let mut ata = nalgebra::Matrix6::zeros();
    let mut atb = nalgebra::Vector6::zeros();

    for ((s, d), n) in src.iter().zip(dst.iter()).zip(dst_normals.iter()) {
        let n = n.normalize();
        let cross = s.coords.cross(&n);
        // Jacobian row: [cross, n] for unknowns [alpha, beta, gamma, tx, ty, tz]
        let row = nalgebra::Vector6::new(cross.x, cross.y, cross.z, n.x, n.y, n.z);
        let b = (d.coords - s.coords).dot(&n);
        ata += row * row.transpose();
        atb += row * b;
    }

    let solved = ata
        .lu()
        .solve(&atb)
        .ok_or(BowlVolumeError::SvdFailed)?;

    let (alpha, beta, gamma) = (solved[0], solved[1], solved[2]);
    let translation = Vector3::new(solved[3], solved[4], solved[5]);

    // Small-angle rotation, re-orthonormalized via its own SVD so the
    // result stays a proper rotation matrix even for larger steps.
    let small_angle = Matrix3::new(
        1.0, -gamma, beta, //
        gamma, 1.0, -alpha, //
        -beta, alpha, 1.0,
    );
    let svd = nalgebra::linalg::SVD::try_new(small_angle, true, true, 1e-12, 0)
        .ok_or(BowlVolumeError::SvdFailed)?;
    let u = svd.u.ok_or(BowlVolumeError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(BowlVolumeError::SvdFailed)?;
    let mut d = Matrix3::identity();
    if (u * v_t).determinant() < 0.0 {
        d[(2, 2)] = -1.0;
    }
    let rotation = u * d * v_t;

    Ok((rotation, translation))
}
