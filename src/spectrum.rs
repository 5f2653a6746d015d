//! Short-time power/magnitude spectrum (raw-audio leaf)
//!
//! Converts raw samples into a 125 Hz stream of spectral frames: first
//! difference pre-emphasis, Hamming window, forward FFT, squared magnitude
//! per bin. All temporal history lives in raw-sample space and is delegated
//! to the attached [`AudioReader`], so the module declares no own context.
//!
//! FFT buffers are planned and pre-allocated at configure time to avoid
//! per-frame heap allocations.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::audio::AudioReader;
use crate::config::ModuleConfig;
use crate::graph::{Generated, ModuleInput, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

/// Fixed output frame rate in Hz.
pub const FRAME_RATE: u32 = 125;

/// Spectral analysis leaf.
pub struct Spectrum {
    sample_rate: u32,
    pre_emph_coef: f32,
    magnitude: bool,
    window_width: usize,
    window_advance: usize,
    hamming: Vec<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    fft_input: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    reader: Option<Box<dyn AudioReader>>,
}

impl Spectrum {
    pub fn new() -> Self {
        Self {
            sample_rate: 0,
            pre_emph_coef: 0.97,
            magnitude: false,
            window_width: 0,
            window_advance: 0,
            hamming: Vec::new(),
            fft: None,
            fft_input: Vec::new(),
            fft_scratch: Vec::new(),
            reader: None,
        }
    }

    pub fn window_width(&self) -> usize {
        self.window_width
    }

    pub fn window_advance(&self) -> usize {
        self.window_advance
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Spectrum {
    fn type_name(&self) -> &'static str {
        "spectrum"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if !source_dims.is_empty() {
            return Err(PipelineError::Config(
                "spectrum: source leaf takes no module sources".into(),
            ));
        }

        let sample_rate = config
            .get_usize("sample_rate")?
            .ok_or_else(|| PipelineError::Config("spectrum: sample_rate must be set".into()))?;
        if sample_rate == 0 {
            return Err(PipelineError::Config(
                "spectrum: sample_rate must be positive".into(),
            ));
        }
        self.sample_rate = sample_rate as u32;
        let copy_borders = config.get_bool("copy_borders")?.unwrap_or(true);
        self.pre_emph_coef = config.get_f32("pre_emph_coef")?.unwrap_or(0.97);
        self.magnitude = config.get_bool("magnitude")?.unwrap_or(false);

        // 16 ms analysis window, 8 ms advance: a fixed 125 Hz frame rate.
        self.window_width = (sample_rate as f64 / 62.5) as usize;
        self.window_advance = sample_rate / FRAME_RATE as usize;
        let dim = self.window_width / 2 + 1;

        let w = self.window_width;
        self.hamming = (0..w)
            .map(|i| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / (w as f32 - 1.0)).cos())
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(w);
        self.fft_input = vec![Complex::new(0.0, 0.0); w];
        self.fft_scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        self.fft = Some(fft);

        Ok(TransformSpec {
            dim,
            own_left: 0,
            own_right: 0,
            copy_borders,
        })
    }

    fn set_input(&mut self, input: ModuleInput) -> Result<(), PipelineError> {
        match input {
            ModuleInput::Audio(reader) => {
                if reader.sample_rate() != self.sample_rate {
                    return Err(PipelineError::Config(format!(
                        "spectrum: input sample rate {} does not match configured rate {}",
                        reader.sample_rate(),
                        self.sample_rate
                    )));
                }
                self.reader = Some(reader);
                Ok(())
            }
            ModuleInput::Features(_) => Err(PipelineError::Config(
                "spectrum: expects audio input, not a feature stream".into(),
            )),
        }
    }

    fn generate(
        &mut self,
        frame: i64,
        _sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| PipelineError::Config("spectrum: no audio input attached".into()))?;

        // One extra sample for the first-difference pre-emphasis filter.
        let window_start = frame * self.window_advance as i64;
        let window_end = window_start + self.window_width as i64 + 1;
        reader.fetch(window_start, window_end)?;
        if reader.eof_sample() < window_end {
            return Ok(Generated::Exhausted);
        }

        for t in 0..self.window_width {
            let s0 = reader.sample(window_start + t as i64);
            let s1 = reader.sample(window_start + t as i64 + 1);
            self.fft_input[t] = Complex::new(self.hamming[t] * (s1 - self.pre_emph_coef * s0), 0.0);
        }

        let fft = self.fft.as_ref().expect("spectrum generated before configure");
        fft.process_with_scratch(&mut self.fft_input, &mut self.fft_scratch);

        for (k, o) in out.iter_mut().enumerate() {
            let bin = self.fft_input[k];
            let power = bin.re * bin.re + bin.im * bin.im;
            *o = if self.magnitude { power.sqrt() } else { power };
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        assert!(self.sample_rate > 0);
        config.set("sample_rate", self.sample_rate as i64);
        config.set("pre_emph_coef", self.pre_emph_coef);
        config.set("magnitude", self.magnitude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemoryAudioReader;
    use crate::{FeatureGraph, ModuleId};

    fn sine(sample_rate: u32, freq: f32, num_samples: usize) -> Vec<f32> {
        (0..num_samples)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn spectrum_graph(samples: Vec<f32>, sample_rate: u32) -> (FeatureGraph, ModuleId) {
        let mut graph = FeatureGraph::new();
        let id = graph.add_module("fft", Box::new(Spectrum::new())).unwrap();
        let mut config = ModuleConfig::new();
        config.set("sample_rate", sample_rate as i64);
        graph.configure(id, &config).unwrap();
        graph
            .set_input(
                id,
                ModuleInput::Audio(Box::new(MemoryAudioReader::new(samples, sample_rate))),
            )
            .unwrap();
        (graph, id)
    }

    #[test]
    fn test_window_geometry() {
        let mut module = Spectrum::new();
        let mut config = ModuleConfig::new();
        config.set("sample_rate", 16000i64);
        let spec = module.configure(&config, &[]).unwrap();
        assert_eq!(module.window_width(), 256);
        assert_eq!(module.window_advance(), 128);
        assert_eq!(spec.dim, 129);
        assert_eq!((spec.own_left, spec.own_right), (0, 0));
    }

    #[test]
    fn test_sine_peak_bin() {
        let sr = 16000;
        let freq = 1000.0;
        let (graph, id) = spectrum_graph(sine(sr, freq, sr as usize), sr);
        let frame = graph.at(id, 5).unwrap();

        let peak_bin = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        // Expected bin: freq * window_width / sample_rate = 1000 * 256 / 16000.
        let expected = (freq * 256.0 / sr as f32).round() as usize;
        assert!(
            (peak_bin as i32 - expected as i32).abs() <= 1,
            "peak at bin {} should be near {}",
            peak_bin,
            expected
        );
    }

    #[test]
    fn test_magnitude_is_sqrt_of_power() {
        let sr = 16000;
        let samples = sine(sr, 500.0, 4000);
        let (power_graph, power_id) = spectrum_graph(samples.clone(), sr);

        let mut graph = FeatureGraph::new();
        let id = graph.add_module("fft", Box::new(Spectrum::new())).unwrap();
        let mut config = ModuleConfig::new();
        config.set("sample_rate", sr as i64);
        config.set("magnitude", true);
        graph.configure(id, &config).unwrap();
        graph
            .set_input(
                id,
                ModuleInput::Audio(Box::new(MemoryAudioReader::new(samples, sr))),
            )
            .unwrap();

        let power = power_graph.at(power_id, 3).unwrap();
        let magnitude = graph.at(id, 3).unwrap();
        for (p, m) in power.iter().zip(magnitude.iter()) {
            assert!((p.sqrt() - m).abs() < 1e-3);
        }
    }

    #[test]
    fn test_short_audio_hits_border_policy() {
        let sr = 16000;
        // Room for frames 0..=9; frame 10 needs samples up to 1537.
        let (graph, id) = spectrum_graph(sine(sr, 440.0, 1500), sr);
        let first = graph.at(id, 0).unwrap();
        assert_eq!(graph.at(id, -5).unwrap(), first);

        let last = graph.at(id, 9).unwrap();
        assert_eq!(graph.at(id, 10).unwrap(), last);
        assert!(graph.eof(id, 10));
        assert_eq!(graph.at(id, 20).unwrap(), last);
    }

    #[test]
    fn test_audio_shorter_than_one_frame_is_fatal() {
        let sr = 16000;
        let (graph, id) = spectrum_graph(vec![0.0; 100], sr);
        assert!(matches!(
            graph.at(id, 0),
            Err(PipelineError::InputExhausted { frame: 0 })
        ));
    }

    #[test]
    fn test_rejects_mismatched_sample_rate() {
        let mut graph = FeatureGraph::new();
        let id = graph.add_module("fft", Box::new(Spectrum::new())).unwrap();
        let mut config = ModuleConfig::new();
        config.set("sample_rate", 16000i64);
        graph.configure(id, &config).unwrap();
        let result = graph.set_input(
            id,
            ModuleInput::Audio(Box::new(MemoryAudioReader::new(vec![0.0; 100], 8000))),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
