//! Audio input collaborators
//!
//! The spectral leaf pulls raw samples through the [`AudioReader`] trait:
//! `fetch` makes a sample range available (blocking I/O), `eof_sample`
//! reports where the input ends once known, and `sample` gives indexed
//! access to fetched samples. Two implementations are provided, plus a
//! Symphonia-based file decoder that feeds the in-memory reader.

use std::io::Read;
use std::path::Path;

use crate::PipelineError;

/// Synchronous source of mono `f32` samples.
pub trait AudioReader {
    fn sample_rate(&self) -> u32;

    /// Ensure samples `[start, end)` are available. Blocking; fails with an
    /// IO error only on a real read failure, not on end of input.
    fn fetch(&mut self, start: i64, end: i64) -> Result<(), PipelineError>;

    /// Index of the first sample past the end of input, `i64::MAX` while
    /// the end has not been observed yet.
    fn eof_sample(&self) -> i64;

    /// A fetched sample; out-of-range indices read as silence.
    fn sample(&self, index: i64) -> f32;
}

/// Reader over a fully decoded (or synthetic) sample buffer.
pub struct MemoryAudioReader {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl MemoryAudioReader {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

impl AudioReader for MemoryAudioReader {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn fetch(&mut self, _start: i64, _end: i64) -> Result<(), PipelineError> {
        Ok(())
    }

    fn eof_sample(&self) -> i64 {
        self.samples.len() as i64
    }

    fn sample(&self, index: i64) -> f32 {
        if index < 0 {
            return 0.0;
        }
        self.samples.get(index as usize).copied().unwrap_or(0.0)
    }
}

/// Incremental reader of headerless 16-bit little-endian PCM.
///
/// Reads forward on demand and keeps everything read so far, so backward
/// windows within an utterance never re-touch the underlying stream.
pub struct RawPcmReader<R> {
    inner: R,
    sample_rate: u32,
    samples: Vec<f32>,
    eof: bool,
}

impl<R: Read> RawPcmReader<R> {
    pub fn new(inner: R, sample_rate: u32) -> Self {
        Self {
            inner,
            sample_rate,
            samples: Vec::new(),
            eof: false,
        }
    }

    fn read_until(&mut self, end: usize) -> Result<(), PipelineError> {
        let mut chunk = [0u8; 8192];
        let mut pending: Option<u8> = None;
        while self.samples.len() < end && !self.eof {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
                break;
            }
            let mut bytes = &chunk[..n];
            if let Some(low) = pending.take() {
                let sample = i16::from_le_bytes([low, bytes[0]]);
                self.samples.push(sample as f32 / 32768.0);
                bytes = &bytes[1..];
            }
            let mut pairs = bytes.chunks_exact(2);
            for pair in &mut pairs {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                self.samples.push(sample as f32 / 32768.0);
            }
            if let [low] = pairs.remainder() {
                pending = Some(*low);
            }
        }
        Ok(())
    }
}

impl<R: Read> AudioReader for RawPcmReader<R> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn fetch(&mut self, _start: i64, end: i64) -> Result<(), PipelineError> {
        if end > self.samples.len() as i64 {
            self.read_until(end.max(0) as usize)?;
        }
        Ok(())
    }

    fn eof_sample(&self) -> i64 {
        if self.eof {
            self.samples.len() as i64
        } else {
            i64::MAX
        }
    }

    fn sample(&self, index: i64) -> f32 {
        if index < 0 {
            return 0.0;
        }
        self.samples.get(index as usize).copied().unwrap_or(0.0)
    }
}

/// Audio decoded to mono `f32`.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn into_reader(self) -> MemoryAudioReader {
        MemoryAudioReader::new(self.samples, self.sample_rate)
    }
}

/// Decode an audio file to mono samples.
///
/// Symphonia probes the container format (WAV, FLAC, OGG, MP3); multi-channel
/// audio is downmixed to mono by averaging.
pub fn decode_audio_file(path: &Path) -> Result<DecodedAudio, PipelineError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = std::fs::File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PipelineError::Decode(format!("unrecognized audio format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PipelineError::Decode("no audio track found".into()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::Decode("unknown sample rate".into()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::Decode(format!("unsupported codec: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(PipelineError::Decode(format!("packet read failed: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                tracing::warn!("skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(PipelineError::Decode(format!("decode failed: {}", e))),
        };

        if sample_buf
            .as_ref()
            .map_or(true, |b| b.capacity() < decoded.capacity())
        {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(buf.samples());
        }
    }

    let samples = if channels > 1 {
        let scale = 1.0 / channels as f32;
        interleaved
            .chunks_exact(channels as usize)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect()
    } else {
        interleaved
    };

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_memory_reader_bounds() {
        let reader = MemoryAudioReader::new(vec![0.1, 0.2, 0.3], 16000);
        assert_eq!(reader.eof_sample(), 3);
        assert_eq!(reader.sample(1), 0.2);
        assert_eq!(reader.sample(-1), 0.0);
        assert_eq!(reader.sample(10), 0.0);
    }

    #[test]
    fn test_raw_pcm_reader_decodes_le() {
        let mut bytes = Vec::new();
        for v in [0i16, 16384, -16384, 32767] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut reader = RawPcmReader::new(Cursor::new(bytes), 16000);
        assert_eq!(reader.eof_sample(), i64::MAX);

        reader.fetch(0, 4).unwrap();
        assert_eq!(reader.sample(0), 0.0);
        assert!((reader.sample(1) - 0.5).abs() < 1e-6);
        assert!((reader.sample(2) + 0.5).abs() < 1e-6);

        // Reading past the end pins the EOF sample.
        reader.fetch(0, 100).unwrap();
        assert_eq!(reader.eof_sample(), 4);
    }

    #[test]
    fn test_raw_pcm_reader_incremental() {
        let bytes: Vec<u8> = (0..1000i16).flat_map(|v| v.to_le_bytes()).collect();
        let mut reader = RawPcmReader::new(Cursor::new(bytes), 8000);
        reader.fetch(0, 10).unwrap();
        reader.fetch(500, 600).unwrap();
        assert!((reader.sample(599) - 599.0 / 32768.0).abs() < 1e-6);
    }
}
