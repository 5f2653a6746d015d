//! Owned feature vectors
//!
//! A [`FeatureVec`] is one frame of features: a fixed-width row of `f32`
//! copied out of a module's ring cache. Rows are small (a dozen to a few
//! hundred scalars), so handing out owned copies keeps the graph's borrow
//! structure simple without measurable cost.

use std::ops::{Deref, Index};

/// One frame of features with a fixed dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVec {
    values: Box<[f32]>,
}

impl FeatureVec {
    /// Create a zero-filled vector of the given dimension.
    pub fn zeros(dim: usize) -> Self {
        Self {
            values: vec![0.0; dim].into_boxed_slice(),
        }
    }

    /// Number of scalars in the vector.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

impl From<Vec<f32>> for FeatureVec {
    fn from(values: Vec<f32>) -> Self {
        Self {
            values: values.into_boxed_slice(),
        }
    }
}

impl From<&[f32]> for FeatureVec {
    fn from(values: &[f32]) -> Self {
        Self {
            values: values.into(),
        }
    }
}

impl Deref for FeatureVec {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.values
    }
}

impl Index<usize> for FeatureVec {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let v = FeatureVec::zeros(4);
        assert_eq!(v.dim(), 4);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_slice() {
        let v = FeatureVec::from(&[1.0f32, 2.0, 3.0][..]);
        assert_eq!(v[1], 2.0);
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);
    }
}
