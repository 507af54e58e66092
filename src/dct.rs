//! Orthonormal DCT-II / DCT-III wrappers.
//!
//! `rustdct` computes the unnormalized transforms; the carriers need the
//! orthonormal pair (what signal-processing texts call `norm='ortho'`),
//! where applying the forward transform and then the inverse reproduces the
//! input exactly. This module owns the scale factors so embed and extract
//! can never disagree about them.

use std::sync::Arc;

use rustdct::{DctPlanner, TransformType2And3};

/// A planned orthonormal DCT pair for one block length.
pub struct OrthoDct {
    transform: Arc<dyn TransformType2And3<f64>>,
    len: usize,
}

impl OrthoDct {
    /// Plan transforms for blocks of `len` samples.
    pub fn new(planner: &mut DctPlanner<f64>, len: usize) -> Self {
        Self {
            transform: planner.plan_dct2(len),
            len,
        }
    }

    /// Block length this instance was planned for.
    pub fn len(&self) -> usize {
        self.len
    }

    /// In-place orthonormal DCT-II.
    pub fn forward(&self, block: &mut [f64]) {
        debug_assert_eq!(block.len(), self.len);
        self.transform.process_dct2(block);

        let n = self.len as f64;
        let scale = (2.0 / n).sqrt();
        block[0] *= (1.0 / n).sqrt();
        for value in block.iter_mut().skip(1) {
            *value *= scale;
        }
    }

    /// In-place orthonormal DCT-III (the inverse of [`forward`](Self::forward)).
    pub fn inverse(&self, block: &mut [f64]) {
        debug_assert_eq!(block.len(), self.len);

        let n = self.len as f64;
        let scale = (2.0 / n).sqrt();
        // The planned DCT-3 gives its first input element half weight
        // (DCT-2 and DCT-3 invert each other up to len/2 only under that
        // definition), so the DC pre-scale is double forward()'s
        // (1.0 / n).sqrt() to land on the same orthonormal basis.
        block[0] *= 2.0 * (1.0 / n).sqrt();
        for value in block.iter_mut().skip(1) {
            *value *= scale;
        }
        self.transform.process_dct3(block);
    }
}
