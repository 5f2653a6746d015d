//! Precomputed-feature file source
//!
//! Reads a foreign binary feature stream: a dimension header (4-byte
//! little-endian, or a single byte for legacy files) followed by fixed-width
//! `f32` frames. Sequential reads advance a cursor; any non-consecutive
//! frame request seeks to `header + frame * dim * 4`. The border/EOF policy
//! of the module graph applies unchanged.
//!
//! [`FeatureFileWriter`] emits the same format and backs both the tests and
//! offline feature dumping.

use std::io::{Seek, SeekFrom, Write};

use crate::config::ModuleConfig;
use crate::graph::{FeatureInput, Generated, ModuleInput, SourceCtx, Transform, TransformSpec};
use crate::PipelineError;

/// Source leaf reading precomputed feature frames from a seekable stream.
pub struct FeatureFileSource {
    dim: usize,
    sample_rate: u32,
    frame_rate: u32,
    legacy_file: bool,
    header_size: u64,
    /// Last frame read sequentially; `None` forces a seek.
    cursor: Option<i64>,
    input: Option<Box<dyn FeatureInput>>,
}

impl FeatureFileSource {
    pub fn new() -> Self {
        Self {
            dim: 0,
            sample_rate: 0,
            frame_rate: 0,
            legacy_file: false,
            header_size: 0,
            cursor: None,
            input: None,
        }
    }
}

impl Default for FeatureFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for FeatureFileSource {
    fn type_name(&self) -> &'static str {
        "feature_file"
    }

    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError> {
        if !source_dims.is_empty() {
            return Err(PipelineError::Config(
                "feature_file: source leaf takes no module sources".into(),
            ));
        }

        self.sample_rate = config.get_usize("sample_rate")?.unwrap_or(16000) as u32;
        self.frame_rate = config.get_usize("frame_rate")?.unwrap_or(125) as u32;
        self.legacy_file = config.get_bool("legacy_file")?.unwrap_or(false);
        let copy_borders = config.get_bool("copy_borders")?.unwrap_or(true);

        self.dim = config
            .get_usize("dim")?
            .ok_or_else(|| PipelineError::Config("feature_file: dim must be set".into()))?;
        if self.dim == 0 {
            return Err(PipelineError::Config(
                "feature_file: dim must be positive".into(),
            ));
        }

        Ok(TransformSpec {
            dim: self.dim,
            own_left: 0,
            own_right: 0,
            copy_borders,
        })
    }

    fn set_input(&mut self, input: ModuleInput) -> Result<(), PipelineError> {
        let mut stream = match input {
            ModuleInput::Features(stream) => stream,
            ModuleInput::Audio(_) => {
                return Err(PipelineError::Config(
                    "feature_file: expects a feature stream, not audio".into(),
                ))
            }
        };

        stream.seek(SeekFrom::Start(0))?;
        let dim = if self.legacy_file {
            let mut byte = [0u8; 1];
            read_fully(&mut *stream, &mut byte)?;
            self.header_size = 1;
            byte[0] as usize
        } else {
            let mut bytes = [0u8; 4];
            read_fully(&mut *stream, &mut bytes)?;
            self.header_size = 4;
            let dim = i32::from_le_bytes(bytes);
            if dim <= 0 {
                return Err(PipelineError::Config(format!(
                    "feature_file: invalid dimension header {}",
                    dim
                )));
            }
            dim as usize
        };

        if dim != self.dim {
            return Err(PipelineError::Config(format!(
                "feature_file: file dimension {} does not match configured dimension {}",
                dim, self.dim
            )));
        }

        self.cursor = None;
        self.input = Some(stream);
        Ok(())
    }

    fn generate(
        &mut self,
        frame: i64,
        _sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| PipelineError::Config("feature_file: no input attached".into()))?;

        if self.cursor.map_or(true, |c| frame != c + 1) {
            let offset = self.header_size + frame as u64 * self.dim as u64 * 4;
            input.seek(SeekFrom::Start(offset))?;
        }

        let mut bytes = vec![0u8; self.dim * 4];
        if !read_frame(&mut **input, &mut bytes)? {
            // Stream position is unreliable after a short read.
            self.cursor = None;
            return Ok(Generated::Exhausted);
        }
        self.cursor = Some(frame);

        for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Generated::Frame)
    }

    fn export_config(&self, config: &mut ModuleConfig) {
        assert!(self.dim > 0);
        config.set("sample_rate", self.sample_rate as i64);
        config.set("frame_rate", self.frame_rate as i64);
        config.set("dim", self.dim);
        if self.legacy_file {
            config.set("legacy_file", true);
        }
    }

    fn reset(&mut self) {
        self.cursor = None;
    }
}

fn read_fully(stream: &mut dyn FeatureInput, buf: &mut [u8]) -> Result<(), PipelineError> {
    stream
        .read_exact(buf)
        .map_err(|_| PipelineError::Config("feature_file: could not read the header".into()))
}

/// Read one frame; `Ok(false)` on clean end of input.
fn read_frame(stream: &mut dyn FeatureInput, buf: &mut [u8]) -> Result<bool, PipelineError> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Writer for the on-disk feature format read by [`FeatureFileSource`].
pub struct FeatureFileWriter<W> {
    inner: W,
    dim: usize,
}

impl<W: Write> FeatureFileWriter<W> {
    /// Write the dimension header and return the writer.
    pub fn create(mut inner: W, dim: usize, legacy: bool) -> Result<Self, PipelineError> {
        assert!(dim > 0);
        if legacy {
            assert!(dim <= u8::MAX as usize, "legacy header holds one byte");
            inner.write_all(&[dim as u8])?;
        } else {
            inner.write_all(&(dim as i32).to_le_bytes())?;
        }
        Ok(Self { inner, dim })
    }

    pub fn write_frame(&mut self, frame: &[f32]) -> Result<(), PipelineError> {
        assert_eq!(frame.len(), self.dim);
        for value in frame {
            self.inner.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<W, PipelineError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeatureGraph, ModuleId};
    use std::io::Cursor;

    fn feature_bytes(dim: usize, legacy: bool, frames: &[Vec<f32>]) -> Vec<u8> {
        let mut writer = FeatureFileWriter::create(Vec::new(), dim, legacy).unwrap();
        for frame in frames {
            writer.write_frame(frame).unwrap();
        }
        writer.finish().unwrap()
    }

    fn file_graph(dim: usize, legacy: bool, frames: &[Vec<f32>]) -> (FeatureGraph, ModuleId) {
        let bytes = feature_bytes(dim, legacy, frames);
        let mut graph = FeatureGraph::new();
        let id = graph
            .add_module("pre", Box::new(FeatureFileSource::new()))
            .unwrap();
        let mut config = ModuleConfig::new();
        config.set("dim", dim);
        if legacy {
            config.set("legacy_file", true);
        }
        graph.configure(id, &config).unwrap();
        graph
            .set_input(id, ModuleInput::Features(Box::new(Cursor::new(bytes))))
            .unwrap();
        (graph, id)
    }

    #[test]
    fn test_round_trip() {
        let frames = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]];
        let (graph, id) = file_graph(3, false, &frames);
        assert_eq!(graph.dim(id), 3);
        for (f, expected) in frames.iter().enumerate() {
            assert_eq!(graph.at(id, f as i64).unwrap().as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn test_legacy_header() {
        let frames = vec![vec![0.5, -0.5], vec![1.5, -1.5]];
        let (graph, id) = file_graph(2, true, &frames);
        assert_eq!(graph.at(id, 1).unwrap().as_slice(), &[1.5, -1.5]);
    }

    #[test]
    fn test_backward_access_seeks() {
        let frames: Vec<Vec<f32>> = (0..50).map(|f| vec![f as f32]).collect();
        let (graph, id) = file_graph(1, false, &frames);
        graph.request_context(id, 5, 0);
        assert_eq!(graph.at(id, 40).unwrap()[0], 40.0);
        assert_eq!(graph.at(id, 10).unwrap()[0], 10.0);
        assert_eq!(graph.at(id, 40).unwrap()[0], 40.0);
    }

    #[test]
    fn test_eof_copies_last_frame() {
        let frames: Vec<Vec<f32>> = (0..5).map(|f| vec![f as f32, 0.0]).collect();
        let (graph, id) = file_graph(2, false, &frames);
        let last = graph.at(id, 4).unwrap();
        assert_eq!(graph.at(id, 5).unwrap(), last);
        assert!(graph.eof(id, 5));
        assert_eq!(graph.at(id, 100).unwrap(), last);
    }

    #[test]
    fn test_reads_from_disk_file() {
        let frames = vec![vec![1.0f32, -1.0], vec![2.0, -2.0]];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utt.fea");
        std::fs::write(&path, feature_bytes(2, false, &frames)).unwrap();

        let mut graph = FeatureGraph::new();
        let id = graph
            .add_module("pre", Box::new(FeatureFileSource::new()))
            .unwrap();
        let mut config = ModuleConfig::new();
        config.set("dim", 2);
        graph.configure(id, &config).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        graph
            .set_input(id, ModuleInput::Features(Box::new(file)))
            .unwrap();

        assert_eq!(graph.at(id, 1).unwrap().as_slice(), &[2.0, -2.0]);
        assert_eq!(graph.at(id, 0).unwrap().as_slice(), &[1.0, -1.0]);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let bytes = feature_bytes(4, false, &[vec![0.0; 4]]);
        let mut graph = FeatureGraph::new();
        let id = graph
            .add_module("pre", Box::new(FeatureFileSource::new()))
            .unwrap();
        let mut config = ModuleConfig::new();
        config.set("dim", 3);
        graph.configure(id, &config).unwrap();
        let result = graph.set_input(id, ModuleInput::Features(Box::new(Cursor::new(bytes))));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_empty_file_is_fatal_at_frame_zero() {
        let (graph, id) = file_graph(2, false, &[]);
        assert!(matches!(
            graph.at(id, 0),
            Err(PipelineError::InputExhausted { frame: 0 })
        ));
    }
}
