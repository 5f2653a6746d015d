//! Cepstral projection (discrete cosine transform)
//!
//! Projects a (log-compressed) filterbank frame onto the first `dim`
//! type-II DCT basis vectors. Source dimensions are small, so the basis is
//! materialized at configure time and applied as a dense mat-vec; no FFT.

use crate::config::ModuleConfig;
use crate::graph::{Generated, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

pub struct Dct {
    dim: usize,
    src_dim: usize,
    /// Row-major `dim × src_dim` cosine basis.
    basis: Vec<f32>,
}

impl Dct {
    pub fn new() -> Self {
        Self {
            dim: 0,
            src_dim: 0,
            basis: Vec::new(),
        }
    }
}

impl Default for Dct {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Dct {
    fn type_name(&self) -> &'static str {
        "dct"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "dct: exactly one source required".into(),
            ));
        }
        self.dim = config.get_usize("dim")?.unwrap_or(12);
        if self.dim < 1 {
            return Err(PipelineError::Config("dct: dimension must be > 0".into()));
        }
        self.src_dim = source_dims[0];

        let n = self.src_dim as f32;
        self.basis = Vec::with_capacity(self.dim * self.src_dim);
        for i in 0..self.dim {
            for b in 0..self.src_dim {
                self.basis
                    .push(((i + 1) as f32 * (b as f32 + 0.5) * std::f32::consts::PI / n).cos());
            }
        }
        Ok(TransformSpec::pointwise(self.dim))
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let src = sources.at(0, frame)?;
        for (i, o) in out.iter_mut().enumerate() {
            let row = &self.basis[i * self.src_dim..(i + 1) * self.src_dim];
            *o = row.iter().zip(src.iter()).map(|(c, s)| c * s).sum();
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        assert!(self.dim > 0);
        config.set("dim", self.dim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dimension() {
        let mut dct = Dct::new();
        let spec = dct.configure(&ModuleConfig::new(), &[21]).unwrap();
        assert_eq!(spec.dim, 12);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut dct = Dct::new();
        let mut config = ModuleConfig::new();
        config.set("dim", 0i64);
        assert!(dct.configure(&config, &[21]).is_err());
    }

    #[test]
    fn test_basis_rows_sum_to_zero() {
        // Each basis row is a whole number of half-periods of a cosine, so a
        // constant input projects to (numerically) zero on every coefficient.
        let mut dct = Dct::new();
        let mut config = ModuleConfig::new();
        config.set("dim", 6i64);
        dct.configure(&config, &[20]).unwrap();
        for i in 0..6 {
            let row_sum: f32 = dct.basis[i * 20..(i + 1) * 20].iter().sum();
            assert!(row_sum.abs() < 1e-4, "row {} sums to {}", i, row_sum);
        }
    }
}
