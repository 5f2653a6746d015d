//! Perceptual filterbank and log-energy transforms
//!
//! [`MelBank`] bins a power spectrum into overlapping triangular filters on
//! a mel-like frequency scale. The number of bands and the bin edges follow
//! the sample rate: 21 bands at 16 kHz, fewer at lower rates. Edges are
//! expressed directly in source-bin positions, so binning is a single pass
//! of linearly interpolated weighted sums.
//!
//! [`Energy`] collapses a spectral frame to a single log-energy scalar.

use crate::config::ModuleConfig;
use crate::graph::{Generated, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

/// Mel filterbank over a power/magnitude spectrum.
pub struct MelBank {
    sample_rate: u32,
    dim: usize,
    /// Filter edges in fractional source-bin positions, `dim + 2` entries.
    bin_edges: Vec<f32>,
}

impl MelBank {
    pub fn new() -> Self {
        Self {
            sample_rate: 0,
            dim: 0,
            bin_edges: Vec::new(),
        }
    }

    /// Band count for a sample rate, normalized so 16 kHz yields 21 bands.
    fn band_count(sample_rate: u32) -> usize {
        let rate = sample_rate as f32;
        ((21.0 + 2.0) * (1.0 + rate / 1400.0).log10() / (1.0f32 + 16000.0 / 1400.0).log10() - 2.0)
            as usize
    }

    fn create_bins(&mut self, src_dim: usize) {
        let edges = self.dim + 2;
        let rate = self.sample_rate as f32;
        let mel_step = 2595.0 * (1.0 + rate / 1400.0).log10() / edges as f32;

        self.bin_edges = (0..edges)
            .map(|i| {
                1400.0 * (10.0f32.powf((i + 1) as f32 * mel_step / 2595.0) - 1.0)
                    * (src_dim - 1) as f32
                    / rate
            })
            .collect();
    }
}

impl Default for MelBank {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for MelBank {
    fn type_name(&self) -> &'static str {
        "melbank"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "melbank: exactly one source required".into(),
            ));
        }
        let sample_rate = config
            .get_usize("sample_rate")?
            .ok_or_else(|| PipelineError::Config("melbank: sample_rate must be set".into()))?;
        if sample_rate == 0 {
            return Err(PipelineError::Config(
                "melbank: sample_rate must be positive".into(),
            ));
        }
        self.sample_rate = sample_rate as u32;
        self.dim = Self::band_count(self.sample_rate);
        self.create_bins(source_dims[0]);
        Ok(TransformSpec::pointwise(self.dim))
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let data = sources.at(0, frame)?;
        let top = data.dim() - 1;

        for (b, o) in out.iter_mut().enumerate() {
            let mut val = 0.0f32;
            let mut sum = 0.0f32;

            // Rising edge, starting one bin below the lower edge.
            let mut beg = self.bin_edges[b] - 1.0;
            let mut end = self.bin_edges[b + 1];
            let mut t = beg.ceil().max(0.0) as i64;
            while (t as f32) < end {
                let scale = (t as f32 - beg) / (end - beg);
                val += scale * data[(t as usize).min(top)];
                sum += scale;
                t += 1;
            }

            // Falling edge.
            beg = end;
            end = self.bin_edges[b + 2];
            while (t as f32) < end {
                let scale = (end - t as f32) / (end - beg);
                val += scale * data[(t as usize).min(top)];
                sum += scale;
                t += 1;
            }

            *o = (val / sum + 1.0).ln();
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        config.set("sample_rate", self.sample_rate as i64);
    }
}

/// Single log-energy scalar per frame.
pub struct Energy;

impl Transform for Energy {
    fn type_name(&self) -> &'static str {
        "energy"
    }

    fn configure(
        &mut self,
        _config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if source_dims.len() != 1 {
            return Err(PipelineError::Config(
                "energy: exactly one source required".into(),
            ));
        }
        Ok(TransformSpec::pointwise(1))
    }

    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let src = sources.at(0, frame)?;
        let power: f32 = src.iter().sum();
        out[0] = (power + 1e-10).ln();
        Ok(Generated::Frame)
    }

    fn export_config(&self, _config: &mut ModuleConfig) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_count_reference_rates() {
        assert_eq!(MelBank::band_count(16000), 21);
        assert!(MelBank::band_count(8000) < 21);
        assert!(MelBank::band_count(44100) > 21);
    }

    #[test]
    fn test_bin_edges_cover_spectrum() {
        let mut bank = MelBank::new();
        let mut config = ModuleConfig::new();
        config.set("sample_rate", 16000i64);
        let spec = bank.configure(&config, &[129]).unwrap();
        assert_eq!(spec.dim, 21);
        assert_eq!(bank.bin_edges.len(), 23);

        // Edges are strictly increasing and the last one lands on the top
        // source bin.
        for pair in bank.bin_edges.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        let last = *bank.bin_edges.last().unwrap();
        assert!((last - 128.0).abs() < 1e-3, "top edge {} should be 128", last);
    }
}
