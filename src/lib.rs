//! Cepstra – Streaming feature extraction for speech recognition
//!
//! # Architecture
//!
//! ```text
//! Audio (.wav/.mp3/.flac)          Precomputed features (.fea)
//!     │                                │
//!     ▼                                ▼
//! ┌──────────┐   ┌─────────┐   ┌──────────────┐   ┌────────┐
//! │ Spectrum │──▶│ MelBank │──▶│ Dct / Delta  │──▶│ Merger │──▶ decoder
//! │ rustfft  │   │         │   │ Norm / CMS   │   │        │
//! └──────────┘   └─────────┘   └──────────────┘   └────────┘
//!          demand-evaluated module graph, per-module ring caches
//! ```
//!
//! Every stage is a [`Transform`] hosted in a [`FeatureGraph`]. Frames are
//! pulled from the terminal module with `at(frame)`; each module generates
//! only the frames it is missing and caches them in a fixed-capacity ring
//! buffer. Temporal context requirements (delta windows, sliding means,
//! frame stacking) are negotiated upstream at configuration time, so the
//! graph knows exactly how much history every stage must retain without any
//! module having global knowledge.
//!
//! The pipeline is single-threaded and pull-based: use one graph per
//! consumer, or replicate the graph per thread.

pub mod affine;
pub mod audio;
pub mod buffer;
pub mod cepstrum;
pub mod combine;
pub mod config;
pub mod delta;
pub mod feature_file;
pub mod filterbank;
pub mod graph;
pub mod spectrum;
pub mod vector;
pub mod warp;

use thiserror::Error;

pub use buffer::FrameBuffer;
pub use config::{ModuleConfig, Value};
pub use graph::{
    FeatureGraph, Generated, ModuleId, ModuleInput, SourceCtx, Transform, TransformSpec,
};
pub use vector::FeatureVec;

/// Errors raised by the feature pipeline.
///
/// `Config` failures are fatal to graph construction and never retried.
/// `InputExhausted` is raised only when the border-copy policy cannot absorb
/// an end-of-input condition (it is always fatal at frame 0). Internal
/// invariant violations are construction bugs and abort via `assert!`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("input exhausted at frame {frame}")]
    InputExhausted { frame: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),
}
