//! Food-mask input type (spec §3).

use crate::error::{BowlVolumeError, Result};

/// A H×W boolean mask aligned to a [`crate::DepthImage`] of the same shape,
/// identifying the pixels whose depth is to be integrated as food.
#[derive(Debug, Clone)]
pub struct FoodMask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl FoodMask {
    pub fn new(width: usize, height: usize, data: Vec<bool>) -> Result<Self> {
        if data.len() != width * height {
            return Err(BowlVolumeError::InvalidInput(format!(
                "mask data length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(FoodMask {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_food(&self, u: usize, v: usize) -> bool {
        self.data[v * self.width + u]
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|b| **b).count()
    }
}
