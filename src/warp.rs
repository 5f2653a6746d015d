//! Vocal tract length normalization (frequency warping)
//!
//! Remaps the frequency axis of a spectral frame according to a
//! speaker-specific warp factor. The mapping is tabulated once per factor
//! change: each output bin stores the (fractional) source bin it reads, and
//! `generate` is plain linear interpolation over that table.
//!
//! Two warp families are supported: a bilinear arctangent warp, and a
//! piecewise-linear warp that is identity-sloped below a configurable turn
//! point and continues linearly to the top bin above it.

use tracing::debug;

use crate::config::ModuleConfig;
use crate::graph::{Generated, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

pub struct Vtln {
    dim: usize,
    use_pwlin: bool,
    pwlin_turn_point: f32,
    warp_factor: f32,
    /// Fractional source-bin position for each output bin.
    bins: Vec<f32>,
}

impl Vtln {
    pub fn new() -> Self {
        Self {
            dim: 0,
            use_pwlin: false,
            pwlin_turn_point: 0.8,
            warp_factor: 1.0,
            bins: Vec::new(),
        }
    }

    pub fn warp_factor(&self) -> f32 {
        self.warp_factor
    }

    /// The bin-position table for the current warp factor.
    pub fn warp_table(&self) -> &[f32] {
        &self.bins
    }

    fn set_warp_factor(&mut self, factor: f32) {
        self.warp_factor = factor;
        if self.use_pwlin {
            self.create_pwlin_bins();
        } else {
            self.create_blin_bins();
        }
        debug!(warp_factor = factor, pwlin = self.use_pwlin, "rebuilt warp table");
    }

    /// Piecewise-linear warp: slope `warp_factor` until the turn point is
    /// crossed (in either source or target position), then the unique line
    /// through the current bin and the fixed top corner `(d-1, d-1)`.
    fn create_pwlin_bins(&mut self) {
        let top = (self.dim - 1) as f32;
        let border = self.pwlin_turn_point * top;
        let mut slope = 0.0f32;
        let mut point = 0.0f32;
        let mut limit = false;

        self.bins = vec![0.0; self.dim];
        for t in 0..self.dim - 1 {
            self.bins[t] = if limit {
                slope * t as f32 + point
            } else {
                self.warp_factor * t as f32
            };
            if !limit && (t as f32 >= border || self.bins[t] >= border) {
                slope = (top - self.bins[t]) / (top - t as f32);
                point = (1.0 - slope) * top;
                limit = true;
            }
        }
        self.bins[self.dim - 1] = top;
    }

    /// Bilinear warp through the arctangent of the normalized frequency.
    fn create_blin_bins(&mut self) {
        let top = (self.dim - 1) as f64;
        let warp = self.warp_factor as f64;

        self.bins = vec![0.0; self.dim];
        for t in 0..self.dim - 1 {
            let nf = std::f64::consts::PI * t as f64 / top;
            let shift = 2.0 * ((warp - 1.0) * nf.sin()).atan2(1.0 + (1.0 - warp) * nf.cos())
                / std::f64::consts::PI
                * top;
            self.bins[t] = (t as f64 + shift) as f32;
        }
        self.bins[self.dim - 1] = top as f32;
    }
}

impl Default for Vtln {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Vtln {
    fn type_name(&self) -> &'static str {
        "vtln"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "vtln: exactly one source required".into(),
            ));
        }
        self.dim = source_dims[0];
        self.use_pwlin = config.get_bool("pwlin_vtln")?.unwrap_or(false);
        self.pwlin_turn_point = config.get_f32("pwlin_turnpoint")?.unwrap_or(0.8);
        self.set_warp_factor(1.0);
        Ok(TransformSpec::pointwise(self.dim))
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let data = sources.at(0, frame)?;
        let top = self.dim - 1;
        for (b, o) in out.iter_mut().enumerate() {
            let pos = self.bins[b];
            let p = pos.ceil() - pos;
            let lo = (pos.floor().max(0.0) as usize).min(top);
            let hi = (pos.ceil().max(0.0) as usize).min(top);
            *o = p * data[lo] + (1.0 - p) * data[hi];
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        if self.use_pwlin {
            config.set("pwlin_vtln", true);
            config.set("pwlin_turnpoint", self.pwlin_turn_point);
        }
    }

    fn set_parameters(&mut self, config: &ModuleConfig) -> Result<(), PipelineError> {
        let factor = config.get_f32("warp_factor")?.unwrap_or(1.0);
        self.set_warp_factor(factor);
        Ok(())
    }

    fn get_parameters(&self, config: &mut ModuleConfig) {
        config.set("warp_factor", self.warp_factor);
    }
}
