//! Estimate the volume of food in a bowl from a single overhead capture by
//! an active stereo depth sensor.
//!
//! Given an RGB image (for context only), an aligned 16-bit depth image, a
//! reference bowl mesh, the bowl's true rim diameter, and a mask of the
//! pixels occupied by food, [`estimate_volume`] registers the reference
//! mesh into the camera frame via scaled rigid ICP, ray-casts the fitted
//! surface back against the depth image, and integrates the resulting
//! per-pixel food height over its footprint area into a volume in
//! millilitres.
//!
//! ```no_run
//! use bowl_volume::{Config, CancellationToken, DepthImage, EstimateRequest,
//!     FoodMask, Intrinsics, TriMesh, estimate_volume};
//!
//! # fn example(
//! #     depth: DepthImage, food_mask: FoodMask, intrinsics: Intrinsics,
//! #     bowl_mesh: TriMesh, bowl_rim_diameter_mm: f64,
//! # ) -> Result<(), bowl_volume::BowlVolumeError> {
//! let request = EstimateRequest {
//!     depth: &depth,
//!     food_mask: &food_mask,
//!     intrinsics: &intrinsics,
//!     bowl_mesh: &bowl_mesh,
//!     bowl_rim_diameter_mm,
//!     config: Config::default(),
//!     cancel: CancellationToken::new(),
//! };
//! let result = estimate_volume(&request)?;
//! println!("{:.1} ml", result.volume_ml);
//! # Ok(())
//! # }
//! ```

mod align;
pub mod backproject;
mod cancel;
mod config;
mod error;
mod icp;
pub mod mesh_prep;
mod pipeline;
mod raycast;
mod types;
mod volume;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{BowlVolumeError, Result, Warning};
pub use pipeline::{estimate_volume, EstimateRequest, VolumeResult};
pub use raycast::RaycastResult;
pub use types::{CanonicalBowlMesh, DepthImage, FittedBowlMesh, FoodMask, Intrinsics, PointCloud, TriMesh};
pub use volume::VolumeDiagnostics;
