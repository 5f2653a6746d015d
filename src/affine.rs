//! Per-dimension normalization and general linear transforms
//!
//! [`Normalization`] applies `(x - mean) * scale` per dimension, with the
//! scale given directly or derived from a variance vector. [`LinTransform`]
//! applies a full affine map `A·x + b`. Both expose runtime parameter
//! swapping so speaker/channel adaptation can update statistics between
//! utterances without rebuilding the graph.

use crate::config::ModuleConfig;
use crate::graph::{Generated, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

/// Per-dimension affine normalization.
pub struct Normalization {
    dim: usize,
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl Normalization {
    pub fn new() -> Self {
        Self {
            dim: 0,
            mean: Vec::new(),
            scale: Vec::new(),
        }
    }

    fn check_dim(&self, what: &str, len: usize) -> Result<(), PipelineError> {
        if len != self.dim {
            return Err(PipelineError::Config(format!(
                "normalization: invalid {} dimension {} (input is {})",
                what, len, self.dim
            )));
        }
        Ok(())
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Normalization {
    fn type_name(&self) -> &'static str {
        "normalization"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "normalization: exactly one source required".into(),
            ));
        }
        self.dim = source_dims[0];
        self.mean = vec![0.0; self.dim];
        self.scale = vec![1.0; self.dim];

        if let Some(mean) = config.get_floats("mean")? {
            self.check_dim("mean", mean.len())?;
            self.mean.copy_from_slice(mean);
        }

        if config.exists("var") && config.exists("scale") {
            return Err(PipelineError::Config(
                "normalization: scale and var can not be defined simultaneously".into(),
            ));
        }
        if let Some(var) = config.get_floats("var")? {
            self.check_dim("variance", var.len())?;
            for (s, v) in self.scale.iter_mut().zip(var) {
                *s = 1.0 / v.sqrt();
            }
        } else if let Some(scale) = config.get_floats("scale")? {
            self.check_dim("scale", scale.len())?;
            self.scale.copy_from_slice(scale);
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
        for (d, o) in out.iter_mut().enumerate() {
            *o = (src[d] - self.mean[d]) * self.scale[d];
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        config.set("mean", self.mean.clone());
        config.set("scale", self.scale.clone());
    }

    /// Replace mean/scale statistics between utterances.
    fn set_parameters(&mut self, config: &ModuleConfig) -> Result<(), PipelineError> {
        if let Some(mean) = config.get_floats("mean")? {
            self.check_dim("mean", mean.len())?;
            self.mean.copy_from_slice(mean);
        }
        if let Some(scale) = config.get_floats("scale")? {
            self.check_dim("scale", scale.len())?;
            self.scale.copy_from_slice(scale);
        }
        Ok(())
    }

    fn get_parameters(&self, config: &mut ModuleConfig) {
        config.set("mean", self.mean.clone());
        config.set("scale", self.scale.clone());
    }
}

/// General affine map `out = A·in + b`.
///
/// The matrix defaults to an identity submatrix and the bias to zero; the
/// module remembers which of the two were explicitly set so configuration
/// queries echo only real parameters.
pub struct LinTransform {
    dim: usize,
    src_dim: usize,
    matrix: Vec<f32>,
    bias: Vec<f32>,
    matrix_defined: bool,
    bias_defined: bool,
}

impl LinTransform {
    pub fn new() -> Self {
        Self {
            dim: 0,
            src_dim: 0,
            matrix: Vec::new(),
            bias: Vec::new(),
            matrix_defined: false,
            bias_defined: false,
        }
    }

    /// Validate explicit parameters, or install the identity defaults.
    fn check_parameters(&mut self) -> Result<(), PipelineError> {
        if self.matrix.is_empty() {
            self.matrix_defined = false;
            self.matrix = vec![0.0; self.dim * self.src_dim];
            for r in 0..self.dim.min(self.src_dim) {
                self.matrix[r * self.src_dim + r] = 1.0;
            }
        } else {
            self.matrix_defined = true;
            if self.matrix.len() != self.dim * self.src_dim {
                return Err(PipelineError::Config(format!(
                    "lin_transform: invalid matrix dimension {} (expected {}x{})",
                    self.matrix.len(),
                    self.dim,
                    self.src_dim
                )));
            }
        }

        if self.bias.is_empty() {
            self.bias_defined = false;
            self.bias = vec![0.0; self.dim];
        } else {
            self.bias_defined = true;
            if self.bias.len() != self.dim {
                return Err(PipelineError::Config(format!(
                    "lin_transform: invalid bias dimension {} (expected {})",
                    self.bias.len(),
                    self.dim
                )));
            }
        }
        Ok(())
    }
}

impl Default for LinTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for LinTransform {
    fn type_name(&self) -> &'static str {
        "lin_transform"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "lin_transform: exactly one source required".into(),
            ));
        }
        self.src_dim = source_dims[0];
        self.dim = config.get_usize("dim")?.unwrap_or(self.src_dim);
        if self.dim < 1 {
            return Err(PipelineError::Config(
                "lin_transform: dimension must be > 0".into(),
            ));
        }
        self.matrix = config.get_floats("matrix")?.map(<[f32]>::to_vec).unwrap_or_default();
        self.bias = config.get_floats("bias")?.map(<[f32]>::to_vec).unwrap_or_default();
        self.check_parameters()?;
        Ok(TransformSpec::pointwise(self.dim))
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let src = sources.at(0, frame)?;
        if self.matrix_defined || self.dim != self.src_dim {
            for (i, o) in out.iter_mut().enumerate() {
                let row = &self.matrix[i * self.src_dim..(i + 1) * self.src_dim];
                *o = row.iter().zip(src.iter()).map(|(m, s)| m * s).sum();
            }
        } else {
            out.copy_from_slice(&src);
        }
        if self.bias_defined {
            for (o, b) in out.iter_mut().zip(&self.bias) {
                *o += b;
            }
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        assert!(self.dim > 0);
        config.set("dim", self.dim);
        if self.matrix_defined {
            config.set("matrix", self.matrix.clone());
        }
        if self.bias_defined {
            config.set("bias", self.bias.clone());
        }
    }

    /// Swap the adaptation transform between utterances. Omitting `matrix`
    /// or `bias` reverts that parameter to its default.
    fn set_parameters(&mut self, config: &ModuleConfig) -> Result<(), PipelineError> {
        self.matrix = config.get_floats("matrix")?.map(<[f32]>::to_vec).unwrap_or_default();
        self.bias = config.get_floats("bias")?.map(<[f32]>::to_vec).unwrap_or_default();
        self.check_parameters()
    }

    fn get_parameters(&self, config: &mut ModuleConfig) {
        config.set("matrix", self.matrix.clone());
        config.set("bias", self.bias.clone());
    }
}
