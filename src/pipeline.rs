//! Top-level orchestration: BackProject → MeshPrep/BowlFit → RayCast →
//! VolumeIntegrate (spec §2, §6).

use nalgebra::Matrix4;
use tracing::{debug, info, instrument};

use crate::backproject;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{BowlVolumeError, Result, Warning};
use crate::icp;
use crate::mesh_prep;
use crate::raycast;
use crate::types::{DepthImage, FoodMask, Intrinsics, TriMesh};
use crate::volume::{self, VolumeDiagnostics};

/// Everything needed to estimate the volume of food in one overhead
/// capture (spec §6). The RGB image is accepted by callers upstream of
/// this crate for segmentation only; the food mask it produces is the
/// input here, so RGB itself plays no further role in the computation.
pub struct EstimateRequest<'a> {
    pub depth: &'a DepthImage,
    pub food_mask: &'a FoodMask,
    pub intrinsics: &'a Intrinsics,
    pub bowl_mesh: &'a TriMesh,
    pub bowl_rim_diameter_mm: f64,
    pub config: Config,
    pub cancel: CancellationToken,
}

/// The full result of a volume estimate: the headline number, the fitted
/// bowl transform, fit-quality metrics, and any non-fatal warnings
/// accumulated along the way (spec §3, §7).
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeResult {
    pub volume_ml: f64,
    pub diagnostics: VolumeDiagnostics,
    pub fitted_transform: Matrix4<f64>,
    pub fit_fitness: f64,
    pub fit_rmse_mm: f64,
    pub fit_n_iterations: usize,
    pub fit_converged: bool,
    pub warnings: Vec<Warning>,
}

/// Run the full pipeline for one capture.
#[instrument(skip_all)]
pub fn estimate_volume(request: &EstimateRequest<'_>) -> Result<VolumeResult> {
    let EstimateRequest {
        depth,
        food_mask,
        intrinsics,
        bowl_mesh,
        bowl_rim_diameter_mm,
        config,
        cancel,
    } = request;

    cancel.check()?;
    validate_request(depth, food_mask, intrinsics, *bowl_rim_diameter_mm)?;
    info!(width = depth.width(), height = depth.height(), "starting volume estimate");

    debug!("canonicalizing reference bowl mesh");
    let canonical = mesh_prep::canonicalize(bowl_mesh, config.rim_percentile)?;

    cancel.check()?;
    debug!("back-projecting bowl-visible (non-food) depth into scene cloud");
    let bowl_scene_depth = mask_out_food(depth, food_mask)?;
    let scene_cloud = backproject::back_project(
        intrinsics,
        &bowl_scene_depth,
        config.min_valid_depth_mm,
        config.max_valid_depth_mm,
    );
    info!(n_scene_points = scene_cloud.len(), n_dropped = scene_cloud.n_dropped, "scene point cloud ready");

    cancel.check()?;
    debug!("fitting canonical bowl mesh into camera frame");
    let (icp_result, mut warnings) =
        icp::fit_bowl(&canonical, &scene_cloud, *bowl_rim_diameter_mm, config, cancel)?;
    info!(
        fitness = icp_result.fitness,
        rmse_mm = icp_result.rmse_mm,
        n_iterations = icp_result.n_iterations,
        converged = icp_result.converged,
        "bowl fit complete"
    );

    cancel.check()?;
    debug!("casting per-pixel rays against fitted bowl surface");
    let raycast_result = raycast::cast(
        intrinsics,
        &icp_result.fitted,
        depth.width(),
        depth.height(),
        config.ray_epsilon,
        cancel,
    )?;

    cancel.check()?;
    debug!("integrating food volume");
    let (diagnostics, volume_warnings) =
        volume::integrate(intrinsics, depth, food_mask, &raycast_result, cancel)?;
    warnings.extend(volume_warnings);
    info!(volume_ml = diagnostics.volume_ml, n_valid_pixels = diagnostics.n_valid_pixels, "volume estimate complete");

    Ok(VolumeResult {
        volume_ml: diagnostics.volume_ml,
        diagnostics,
        fitted_transform: icp_result.fitted.as_4x4(),
        fit_fitness: icp_result.fitness,
        fit_rmse_mm: icp_result.rmse_mm,
        fit_n_iterations: icp_result.n_iterations,
        fit_converged: icp_result.converged,
        warnings,
    })
}

/// Reject shape-mismatched or non-finite ingress data before any stage
/// runs a single computation (spec §7 `InvalidInput`: "reject at ingress;
/// no partial work").
fn validate_request(
    depth: &DepthImage,
    food_mask: &FoodMask,
    intrinsics: &Intrinsics,
    bowl_rim_diameter_mm: f64,
) -> Result<()> {
    if food_mask.width() != depth.width() || food_mask.height() != depth.height() {
        return Err(BowlVolumeError::InvalidInput(format!(
            "food mask shape {}x{} does not match depth image shape {}x{}",
            food_mask.width(),
            food_mask.height(),
            depth.width(),
            depth.height()
        )));
    }
    if intrinsics.width != depth.width() || intrinsics.height != depth.height() {
        return Err(BowlVolumeError::InvalidInput(format!(
            "intrinsics shape {}x{} does not match depth image shape {}x{}",
            intrinsics.width,
            intrinsics.height,
            depth.width(),
            depth.height()
        )));
    }
    if !(bowl_rim_diameter_mm.is_finite() && bowl_rim_diameter_mm > 0.0) {
        return Err(BowlVolumeError::InvalidInput(
            "bowl_rim_diameter_mm must be finite and positive".into(),
        ));
    }
    Ok(())
}

/// Build a copy of `depth` with every food-mask pixel zeroed out, so that
/// [`backproject::back_project`] naturally drops it: BowlFit registers
/// against the visible bowl surface, not the (possibly occluding) food.
fn mask_out_food(depth: &DepthImage, mask: &FoodMask) -> Result<DepthImage> {
    let mut data = depth.as_slice().to_vec();
    for v in 0..depth.height() {
        for u in 0..depth.width() {
            if mask.is_food(u, v) {
                data[v * depth.width() + u] = 0;
            }
        }
    }
    DepthImage::new(depth.width(), depth.height(), data, depth.depth_scale_m_per_unit)
}
