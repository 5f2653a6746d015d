//! Stream combination and sliding-window statistics
//!
//! [`Merger`] concatenates several parallel streams into one vector per
//! frame (cepstra plus log energy is the classic case). [`Concat`] stacks a
//! window of consecutive frames of a single stream into one long vector.
//! [`MeanSubtractor`] removes a sliding-window mean per dimension, the usual
//! cepstral mean subtraction; the window mean is updated incrementally on
//! consecutive accesses and recomputed from scratch otherwise.

use crate::config::ModuleConfig;
use crate::graph::{Generated, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

/// Concatenation of parallel source streams.
pub struct Merger {
    dim: usize,
}

impl Merger {
    pub fn new() -> Self {
        Self { dim: 0 }
    }
}

impl Default for Merger {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Merger {
    fn type_name(&self) -> &'static str {
        "merger"
    }

    fn configure(
        &mut self,
        _config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.is_empty() {
            return Err(PipelineError::Config(
                "merger: at least one source required".into(),
            ));
        }
        self.dim = source_dims.iter().sum();
        Ok(TransformSpec::pointwise(self.dim))
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let mut pos = 0;
        for s in 0..sources.len() {
            let src = sources.at(s, frame)?;
            out[pos..pos + src.dim()].copy_from_slice(&src);
            pos += src.dim();
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, _config: &mut ModuleConfig) {}

    fn allows_multiple_sources(&self) -> bool {
        true
    }
}

/// Stacking of consecutive frames into one vector.
pub struct Concat {
    src_dim: usize,
    left: usize,
    right: usize,
}

impl Concat {
    pub fn new() -> Self {
        Self {
            src_dim: 0,
            left: 0,
            right: 0,
        }
    }
}

impl Default for Concat {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Concat {
    fn type_name(&self) -> &'static str {
        "concat"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "concat: exactly one source required".into(),
            ));
        }
        self.src_dim = source_dims[0];
        self.left = config.get_usize("left")?.unwrap_or(0);
        self.right = config.get_usize("right")?.unwrap_or(0);
        Ok(TransformSpec {
            dim: self.src_dim * (1 + self.left + self.right),
            own_left: self.left,
            own_right: self.right,
            copy_borders: false,
        })
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        for (w, chunk) in out.chunks_exact_mut(self.src_dim).enumerate() {
            let offset = w as i64 - self.left as i64;
            let src = sources.at(0, frame + offset)?;
            chunk.copy_from_slice(&src);
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        config.set("left", self.left);
        config.set("right", self.right);
    }
}

/// Sliding-window mean subtraction (cepstral mean subtraction).
///
/// The window covers `left` frames of history and `right` frames of
/// lookahead around the current frame. One extra frame of left context is
/// declared so the incremental update can read the frame that just left
/// the window.
pub struct MeanSubtractor {
    dim: usize,
    own_left: usize,
    own_right: usize,
    mean: Vec<f32>,
    prev_frame: Option<i64>,
}

impl MeanSubtractor {
    pub fn new() -> Self {
        Self {
            dim: 0,
            own_left: 0,
            own_right: 0,
            mean: Vec::new(),
            prev_frame: None,
        }
    }

    fn width(&self) -> f32 {
        (self.own_left + self.own_right) as f32
    }
}

impl Default for MeanSubtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for MeanSubtractor {
    fn type_name(&self) -> &'static str {
        "mean_subtractor"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "mean_subtractor: exactly one source required".into(),
            ));
        }
        self.dim = source_dims[0];
        self.own_left = config.get_usize("left")?.unwrap_or(75) + 1;
        self.own_right = config.get_usize("right")?.unwrap_or(75);
        self.mean = vec![0.0; self.dim];
        self.prev_frame = None;
        Ok(TransformSpec {
            dim: self.dim,
            own_left: self.own_left,
            own_right: self.own_right,
            copy_borders: false,
        })
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let width = self.width();
        match self.prev_frame {
            Some(prev) if frame == prev + 1 => {
                // Slide the window by one frame.
                let leaving = sources.at(0, frame - self.own_left as i64)?;
                let entering = sources.at(0, frame + self.own_right as i64)?;
                for (d, m) in self.mean.iter_mut().enumerate() {
                    *m += (entering[d] - leaving[d]) / width;
                }
            }
            _ => {
                // Cold start or a jump: recompute the whole window mean.
                self.mean.fill(0.0);
                for i in -(self.own_left as i64 - 1)..=self.own_right as i64 {
                    let src = sources.at(0, frame + i)?;
                    for (d, m) in self.mean.iter_mut().enumerate() {
                        *m += src[d] / width;
                    }
                }
            }
        }
        self.prev_frame = Some(frame);

        let src = sources.at(0, frame)?;
        for (d, o) in out.iter_mut().enumerate() {
            *o = src[d] - self.mean[d];
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        assert!(self.own_left > 0);
        config.set("left", self.own_left - 1);
        config.set("right", self.own_right);
    }

    fn reset(&mut self) {
        self.prev_frame = None;
        self.mean.fill(0.0);
    }
}
