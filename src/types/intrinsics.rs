//! Pinhole camera intrinsics, as specified in spec §3.

use crate::error::{BowlVolumeError, Result};

/// Pinhole intrinsics of the depth sensor. `(fx, fy)` are the focal lengths
/// and `(cx, cy)` the principal point, all in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: usize,
    pub height: usize,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: usize, height: usize) -> Result<Self> {
        if !(fx.is_finite() && fy.is_finite() && cx.is_finite() && cy.is_finite()) {
            return Err(BowlVolumeError::InvalidInput(
                "intrinsics must be finite".into(),
            ));
        }
        if fx <= 0.0 || fy <= 0.0 {
            return Err(BowlVolumeError::InvalidInput(
                "fx and fy must be positive".into(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(BowlVolumeError::InvalidInput(
                "width and height must be positive".into(),
            ));
        }
        if !(0.0..(width as f64)).contains(&cx) || !(0.0..(height as f64)).contains(&cy) {
            return Err(BowlVolumeError::InvalidInput(
                "principal point must lie within the image".into(),
            ));
        }
        Ok(Intrinsics {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        })
    }

    /// Back-project a pixel at the given metric depth (millimetres) to a
    /// camera-frame point (millimetres), per spec §4.A.
    #[inline]
    pub fn back_project(&self, u: f64, v: f64, z_mm: f64) -> nalgebra::Point3<f64> {
        let x_mm = (u - self.cx) * z_mm / self.fx;
        let y_mm = (v - self.cy) * z_mm / self.fy;
        nalgebra::Point3::new(x_mm, y_mm, z_mm)
    }

    /// Project a camera-frame point back to a pixel, used only by the
    /// back-projection round-trip property test (spec §8, invariant 5).
    #[inline]
    pub fn project(&self, p: &nalgebra::Point3<f64>) -> (f64, f64) {
        let u = p.x * self.fx / p.z + self.cx;
        let v = p.y * self.fy / p.z + self.cy;
        (u, v)
    }

    /// Unnormalized camera-frame ray direction through pixel `(u, v)`.
    #[inline]
    pub fn ray_direction(&self, u: f64, v: f64) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0)
    }
}
