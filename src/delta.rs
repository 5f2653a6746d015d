//! Delta features (symmetric regression differences)
//!
//! The classic dynamic-feature estimate: a weighted difference of frames up
//! to `width` steps away on either side, divided by a normalization
//! constant. The window is declared as own context, so upstream modules
//! automatically retain enough history.

use crate::config::ModuleConfig;
use crate::graph::{Generated, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

pub struct Delta {
    dim: usize,
    width: usize,
    normalization: f32,
}

impl Delta {
    pub fn new() -> Self {
        Self {
            dim: 0,
            width: 2,
            normalization: 0.0,
        }
    }
}

impl Default for Delta {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Delta {
    fn type_name(&self) -> &'static str {
        "delta"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "delta: exactly one source required".into(),
            ));
        }
        self.dim = source_dims[0];

        self.width = config.get_usize("width")?.unwrap_or(2);
        if self.width < 1 {
            return Err(PipelineError::Config("delta: width must be > 0".into()));
        }

        // Default regression normalization 2 * sum of squared offsets.
        let w = self.width as f32;
        self.normalization = config
            .get_f32("normalization")?
            .unwrap_or(2.0 * w * (w + 1.0) * (2.0 * w + 1.0) / 6.0);

        Ok(TransformSpec {
            dim: self.dim,
            own_left: self.width,
            own_right: self.width,
            copy_borders: false,
        })
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        out.fill(0.0);
        for k in 1..=self.width as i64 {
            let left = sources.at(0, frame - k)?;
            let right = sources.at(0, frame + k)?;
            for (d, o) in out.iter_mut().enumerate() {
                *o += k as f32 * (right[d] - left[d]);
            }
        }
        for o in out.iter_mut() {
            *o /= self.normalization;
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        config.set("width", self.width);
        config.set("normalization", self.normalization);
    }
}
