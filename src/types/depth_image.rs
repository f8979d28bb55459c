//! Depth image input type (spec §3).

use crate::error::{BowlVolumeError, Result};

/// A H×W 16-bit depth image, row-major, with an associated metres-per-unit
/// scale. A raw value of `0` denotes an invalid pixel.
#[derive(Debug, Clone)]
pub struct DepthImage {
    width: usize,
    height: usize,
    /// Row-major raw depth values.
    data: Vec<u16>,
    /// Metres per raw unit, e.g. 1e-4 for a sensor reporting tenths of a
    /// millimetre.
    pub depth_scale_m_per_unit: f64,
}

impl DepthImage {
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<u16>,
        depth_scale_m_per_unit: f64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(BowlVolumeError::InvalidInput(
                "depth image width/height must be positive".into(),
            ));
        }
        if data.len() != width * height {
            return Err(BowlVolumeError::InvalidInput(format!(
                "depth data length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        if !(depth_scale_m_per_unit > 0.0) {
            return Err(BowlVolumeError::InvalidInput(
                "depth_scale_m_per_unit must be positive".into(),
            ));
        }
        Ok(DepthImage {
            width,
            height,
            data,
            depth_scale_m_per_unit,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn raw(&self, u: usize, v: usize) -> u16 {
        self.data[v * self.width + u]
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }

    /// Converts a raw depth unit to millimetres.
    #[inline]
    pub fn to_mm(&self, raw: u16) -> f64 {
        raw as f64 * self.depth_scale_m_per_unit * 1000.0
    }
}
