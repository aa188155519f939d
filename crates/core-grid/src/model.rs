//! Target model (.mdl) reader.
//!
//! Layout: first byte is the side R, then ceil(R^3 / 8) bytes of occupancy
//! bits, least-significant bit first within each byte, cells enumerated with
//! y slowest, x middle, z fastest. A set bit marks a MODEL cell.

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use tracing::info;

use crate::{GridError, Matrix};

/// Sides admitted by the contest problems.
pub const MODEL_SIDE_RANGE: RangeInclusive<i32> = 2..=250;

impl Matrix {
    pub fn from_model_bytes(bytes: &[u8]) -> Result<Matrix, GridError> {
        let Some((&side, rest)) = bytes.split_first() else {
            return Err(GridError::BadModel("empty file".into()));
        };
        let r = side as i32;
        if !MODEL_SIDE_RANGE.contains(&r) {
            return Err(GridError::BadModel(format!("side {r} out of range")));
        }
        let ncells = (r as usize).pow(3);
        let needed = ncells.div_ceil(8);
        if rest.len() < needed {
            return Err(GridError::BadModel(format!(
                "expected {needed} occupancy bytes, found {}",
                rest.len()
            )));
        }

        let mut matrix = Matrix::empty(r);
        let coords: Vec<_> = matrix.cells_iter().collect();
        for (i, c) in coords.into_iter().enumerate() {
            if rest[i / 8] >> (i % 8) & 1 == 1 {
                matrix.set_model(c)?;
            }
        }
        Ok(matrix)
    }

    pub fn load_model(path: &Path) -> Result<Matrix, GridError> {
        let bytes = fs::read(path)?;
        let matrix = Matrix::from_model_bytes(&bytes)?;
        info!(
            target: "grid.model",
            path = %path.display(),
            side = matrix.side(),
            nmodel = matrix.nmodel(),
            "model loaded"
        );
        Ok(matrix)
    }
}
