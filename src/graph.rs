//! Module graph and the shared demand/cache algorithm
//!
//! A [`FeatureGraph`] owns every module of a pipeline in one arena; modules
//! reference their sources by [`ModuleId`], never by owning pointer. All of
//! the buffering, cache invalidation, context negotiation, and border/EOF
//! handling lives here, implemented once; concrete transforms only supply
//! `generate` plus option handling through the [`Transform`] trait.
//!
//! # Evaluation
//!
//! `at(id, frame)` answers from the module's ring cache when possible.
//! A forward access generates only the missing suffix, clamped to the cache
//! capacity. A backward or non-consecutive access conservatively regenerates
//! the entire window; correctness over minimal recomputation.
//!
//! # Context negotiation
//!
//! `request_context(id, left, right)` records the running maximum context any
//! consumer has requested. When the cache has to grow and the module itself
//! reads temporal context from its sources, the request propagates upstream
//! with the module's own offsets added. A chain of modules thereby works out,
//! purely from local declarations, how much history the ultimate input has to
//! retain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Read, Seek};

use tracing::debug;

use crate::audio::AudioReader;
use crate::buffer::FrameBuffer;
use crate::config::ModuleConfig;
use crate::vector::FeatureVec;
use crate::PipelineError;

/// Handle to a module inside a [`FeatureGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(usize);

/// Outcome of one `generate` call.
///
/// Recoverable end-of-input is data, not an error: a source leaf reports
/// `Exhausted` and the shared border-copy logic decides whether to substitute
/// the last valid frame or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generated {
    Frame,
    Exhausted,
}

/// Byte stream a precomputed-feature leaf reads from.
pub trait FeatureInput: Read + Seek {}
impl<T: Read + Seek> FeatureInput for T {}

/// External input attached to a source leaf.
pub enum ModuleInput {
    Audio(Box<dyn AudioReader>),
    Features(Box<dyn FeatureInput>),
}

/// What a transform derives from its options at configure time.
#[derive(Debug, Clone, Copy)]
pub struct TransformSpec {
    /// Output dimension, must be positive.
    pub dim: usize,
    /// Frames of left context read from sources per output frame.
    pub own_left: usize,
    /// Frames of right context read from sources per output frame.
    pub own_right: usize,
    /// Substitute border frames for out-of-range queries (leaves only).
    pub copy_borders: bool,
}

impl TransformSpec {
    /// Shape of a transform without temporal context.
    pub fn pointwise(dim: usize) -> Self {
        Self {
            dim,
            own_left: 0,
            own_right: 0,
            copy_borders: false,
        }
    }
}

/// Read-only view of a module's sources during `generate`.
///
/// `at` recursively pulls the requested frame from the source module; the
/// offsets used must stay within the transform's declared own context.
pub struct SourceCtx<'a> {
    graph: &'a FeatureGraph,
    ids: &'a [ModuleId],
}

impl SourceCtx<'_> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn at(&self, index: usize, frame: i64) -> Result<FeatureVec, PipelineError> {
        self.graph.at(self.ids[index], frame)
    }

    pub fn dim(&self, index: usize) -> usize {
        self.graph.dim(self.ids[index])
    }
}

/// One stage of the pipeline.
///
/// `generate` must be a pure function of the sources' values at the allowed
/// offsets plus module parameters; any per-frame state a transform keeps (a
/// file cursor, a sliding mean) must be cleared by `reset`.
pub trait Transform {
    fn type_name(&self) -> &'static str;

    /// Apply recognized options and derive dimension and own context.
    /// `source_dims` holds the output dimension of each attached source.
    fn configure(
        &mut self,
        config: &ModuleConfig,
        source_dims: &[usize],
    ) -> Result<TransformSpec, PipelineError>;

    /// Fill `out` with the feature vector for `frame`.
    fn generate(
        &mut self,
        frame: i64,
        sources: &SourceCtx<'_>,
        out: &mut [f32],
    ) -> Result<Generated, PipelineError>;

    /// Echo recognized options and their current values.
    fn export_config(&self, config: &mut ModuleConfig);

    /// Replace runtime parameters (adaptation) without reconfiguring.
    fn set_parameters(&mut self, _config: &ModuleConfig) -> Result<(), PipelineError> {
        Err(PipelineError::Config(format!(
            "{}: module has no runtime parameters",
            self.type_name()
        )))
    }

    /// Report current runtime parameters.
    fn get_parameters(&self, _config: &mut ModuleConfig) {}

    /// Attach an external input (source leaves only).
    fn set_input(&mut self, _input: ModuleInput) -> Result<(), PipelineError> {
        Err(PipelineError::Config(format!(
            "{}: module does not take external input",
            self.type_name()
        )))
    }

    fn allows_multiple_sources(&self) -> bool {
        false
    }

    /// Clear per-frame state on speaker/file change.
    fn reset(&mut self) {}
}

struct ModuleState {
    name: String,
    transform: Box<dyn Transform>,
    sources: Vec<ModuleId>,
    buffer: FrameBuffer,
    configured: bool,
    own_left: usize,
    own_right: usize,
    req_left: usize,
    req_right: usize,
    copy_borders: bool,
    eof_frame: Option<i64>,
    first_feature: Option<FeatureVec>,
    last_feature: Option<FeatureVec>,
    last_feature_frame: i64,
}

impl ModuleState {
    fn clear_borders(&mut self) {
        self.first_feature = None;
        self.last_feature = None;
        self.last_feature_frame = i64::MIN;
    }
}

/// Arena of modules forming one feature-extraction pipeline.
pub struct FeatureGraph {
    modules: Vec<RefCell<ModuleState>>,
    names: HashMap<String, ModuleId>,
}

impl FeatureGraph {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            names: HashMap::new(),
        }
    }

    /// Add a module under a unique name.
    pub fn add_module(
        &mut self,
        name: &str,
        transform: Box<dyn Transform>,
    ) -> Result<ModuleId, PipelineError> {
        if self.names.contains_key(name) {
            return Err(PipelineError::Config(format!(
                "duplicate module name `{}`",
                name
            )));
        }
        let id = ModuleId(self.modules.len());
        self.modules.push(RefCell::new(ModuleState {
            name: name.to_owned(),
            transform,
            sources: Vec::new(),
            buffer: FrameBuffer::new(),
            configured: false,
            own_left: 0,
            own_right: 0,
            req_left: 0,
            req_right: 0,
            copy_borders: false,
            eof_frame: None,
            first_feature: None,
            last_feature: None,
            last_feature_frame: i64::MIN,
        }));
        self.names.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Look up a module by name.
    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    /// Attach `source` as an upstream producer of `sink`.
    ///
    /// Modules accept exactly one source unless their transform overrides
    /// the cardinality; wiring a cycle is rejected.
    pub fn connect(&mut self, source: ModuleId, sink: ModuleId) -> Result<(), PipelineError> {
        if source == sink || self.reaches(source, sink) {
            return Err(PipelineError::Config(format!(
                "connecting `{}` to `{}` would create a cycle",
                self.modules[source.0].borrow().name,
                self.modules[sink.0].borrow().name
            )));
        }
        let mut cell = self.modules[sink.0].borrow_mut();
        if !cell.sources.is_empty() && !cell.transform.allows_multiple_sources() {
            return Err(PipelineError::Config(format!(
                "multiple sources are not allowed for module `{}` ({})",
                cell.name,
                cell.transform.type_name()
            )));
        }
        cell.sources.push(source);
        Ok(())
    }

    /// Is `to` among the transitive sources of `from`?
    fn reaches(&self, from: ModuleId, to: ModuleId) -> bool {
        if from == to {
            return true;
        }
        let sources = self.modules[from.0].borrow().sources.clone();
        sources.into_iter().any(|s| self.reaches(s, to))
    }

    /// Configure a module from its option bag.
    ///
    /// Sources must already be configured (their dimensions feed the
    /// transform). Finishes by requesting zero context from the module
    /// itself, which sizes its cache and propagates context upstream.
    pub fn configure(&self, id: ModuleId, config: &ModuleConfig) -> Result<(), PipelineError> {
        let source_dims: Vec<usize> = {
            let cell = self.modules[id.0].borrow();
            let mut dims = Vec::with_capacity(cell.sources.len());
            for &source in &cell.sources {
                let dim = self.modules[source.0].borrow().buffer.dim();
                if dim == 0 {
                    return Err(PipelineError::Config(format!(
                        "source of module `{}` is not configured",
                        cell.name
                    )));
                }
                dims.push(dim);
            }
            dims
        };

        {
            let mut cell = self.modules[id.0].borrow_mut();
            let spec = cell.transform.configure(config, &source_dims)?;
            assert!(spec.dim > 0, "transform produced a zero dimension");
            cell.buffer.set_dim(spec.dim);
            cell.own_left = spec.own_left;
            cell.own_right = spec.own_right;
            cell.copy_borders = spec.copy_borders;
            cell.configured = true;
            debug!(
                module = %cell.name,
                r#type = cell.transform.type_name(),
                dim = spec.dim,
                own_left = spec.own_left,
                own_right = spec.own_right,
                "configured module"
            );
        }
        self.request_context(id, 0, 0);
        Ok(())
    }

    /// Record that a consumer needs `left`/`right` frames of context from
    /// this module. Requirements never shrink; a growth event invalidates
    /// the cache and propagates upstream with own offsets added.
    pub fn request_context(&self, id: ModuleId, left: usize, right: usize) {
        let mut cell = self.modules[id.0].borrow_mut();
        assert!(cell.configured, "context requested before configure");
        cell.req_left = cell.req_left.max(left);
        cell.req_right = cell.req_right.max(right);
        let new_size = cell.req_left + cell.req_right + 1;
        cell.buffer.invalidate();
        if new_size > cell.buffer.capacity() {
            cell.buffer.grow(new_size);
            if cell.own_left + cell.own_right > 0 {
                let left = cell.req_left + cell.own_left;
                let right = cell.req_right + cell.own_right;
                let sources = cell.sources.clone();
                drop(cell);
                for source in sources {
                    self.request_context(source, left, right);
                }
            }
        }
    }

    /// Negotiated `(req_left, req_right)` context of a module.
    pub fn required_context(&self, id: ModuleId) -> (usize, usize) {
        let cell = self.modules[id.0].borrow();
        (cell.req_left, cell.req_right)
    }

    /// Output dimension of a module (0 before configuration).
    pub fn dim(&self, id: ModuleId) -> usize {
        self.modules[id.0].borrow().buffer.dim()
    }

    /// The feature vector of `frame`, total over all integers once the
    /// border policy of the underlying input applies.
    ///
    /// Repeated calls with no intervening access beyond `frame` return
    /// identical vectors.
    pub fn at(&self, id: ModuleId, frame: i64) -> Result<FeatureVec, PipelineError> {
        let mut cell = self.modules[id.0]
            .try_borrow_mut()
            .expect("module graph must be acyclic");
        assert!(cell.configured, "module used before configure");

        if cell.buffer.contains(frame) {
            return Ok(cell.buffer.copy_row(frame));
        }

        let capacity = cell.buffer.capacity() as i64;
        let gen_start = match cell.buffer.last_pos() {
            // Moving forward: generate only the missing suffix, clamped so
            // the span never exceeds the cache capacity.
            Some(last) if frame > last => (last + 1).max(frame - capacity + 1),
            // Backwards or cold: regenerate the whole window.
            _ => frame - capacity + 1,
        };
        cell.buffer.advance_to(frame);

        for i in gen_start..=frame {
            if let Err(e) = self.fill_row(&mut cell, i) {
                cell.buffer.invalidate();
                return Err(e);
            }
        }
        Ok(cell.buffer.copy_row(frame))
    }

    fn fill_row(&self, cell: &mut ModuleState, frame: i64) -> Result<(), PipelineError> {
        if cell.sources.is_empty() {
            return self.fill_leaf_row(cell, frame);
        }
        let ModuleState {
            transform,
            buffer,
            sources,
            ..
        } = cell;
        let ctx = SourceCtx {
            graph: self,
            ids: sources,
        };
        match transform.generate(frame, &ctx, buffer.row_mut(frame))? {
            Generated::Frame => Ok(()),
            Generated::Exhausted => {
                unreachable!("interior module reported input exhaustion")
            }
        }
    }

    /// Generate a row on a source leaf, applying the border/EOF policy:
    /// negative frames answer with the first valid frame, frames at or past
    /// the EOF marker with the last valid one. Exhaustion at frame 0 is
    /// always fatal.
    fn fill_leaf_row(&self, cell: &mut ModuleState, frame: i64) -> Result<(), PipelineError> {
        let ModuleState {
            transform,
            buffer,
            copy_borders,
            eof_frame,
            first_feature,
            last_feature,
            last_feature_frame,
            ..
        } = cell;

        let gen_frame = if frame < 0 {
            if let Some(first) = first_feature {
                buffer.row_mut(frame).copy_from_slice(first);
                return Ok(());
            }
            // First feature not captured yet: clamp generation to frame 0.
            0
        } else {
            frame
        };

        if let Some(eof) = *eof_frame {
            if gen_frame >= eof {
                let last = last_feature
                    .as_ref()
                    .expect("EOF marker set without a cached last feature");
                buffer.row_mut(frame).copy_from_slice(last);
                return Ok(());
            }
        }

        let ctx = SourceCtx {
            graph: self,
            ids: &[],
        };
        match transform.generate(gen_frame, &ctx, buffer.row_mut(frame))? {
            Generated::Frame => {
                if *copy_borders {
                    if first_feature.is_none() && frame <= 0 {
                        *first_feature = Some(buffer.copy_row(frame));
                    }
                    if gen_frame > *last_feature_frame {
                        *last_feature = Some(buffer.copy_row(frame));
                        *last_feature_frame = gen_frame;
                    }
                }
                Ok(())
            }
            Generated::Exhausted => {
                if gen_frame == 0 {
                    // Input shorter than a single frame.
                    return Err(PipelineError::InputExhausted { frame: 0 });
                }
                if eof_frame.is_none() {
                    *eof_frame = Some(gen_frame);
                }
                if !*copy_borders {
                    return Err(PipelineError::InputExhausted { frame: gen_frame });
                }
                let last = last_feature
                    .as_ref()
                    .expect("input exhausted before any frame was generated");
                buffer.row_mut(frame).copy_from_slice(last);
                Ok(())
            }
        }
    }

    /// Has the input behind this module ended at or before `frame`?
    pub fn eof(&self, id: ModuleId, frame: i64) -> bool {
        let cell = self.modules[id.0].borrow();
        if let Some(eof) = cell.eof_frame {
            if frame >= eof {
                return true;
            }
        }
        let sources = cell.sources.clone();
        drop(cell);
        sources.into_iter().any(|s| self.eof(s, frame))
    }

    /// Invalidate one module's cache, border caches, and EOF marker without
    /// re-running configuration.
    pub fn reset_module(&self, id: ModuleId) {
        let mut cell = self.modules[id.0].borrow_mut();
        cell.buffer.invalidate();
        cell.clear_borders();
        cell.eof_frame = None;
        cell.transform.reset();
    }

    /// Reset every module (speaker or file change).
    pub fn reset(&self) {
        for id in 0..self.modules.len() {
            self.reset_module(ModuleId(id));
        }
    }

    /// Attach an external input to a source leaf. Clears cached frames,
    /// border caches, and the EOF marker.
    pub fn set_input(&self, id: ModuleId, input: ModuleInput) -> Result<(), PipelineError> {
        let mut cell = self.modules[id.0].borrow_mut();
        cell.buffer.invalidate();
        cell.clear_borders();
        cell.eof_frame = None;
        cell.transform.set_input(input)
    }

    /// Replace a module's runtime parameters (adaptation transforms,
    /// normalization statistics, warp factors).
    pub fn set_parameters(
        &self,
        id: ModuleId,
        config: &ModuleConfig,
    ) -> Result<(), PipelineError> {
        let mut cell = self.modules[id.0].borrow_mut();
        cell.buffer.invalidate();
        cell.transform.set_parameters(config)
    }

    /// Report a module's runtime parameters.
    pub fn get_parameters(&self, id: ModuleId) -> ModuleConfig {
        let mut config = ModuleConfig::new();
        self.modules[id.0].borrow().transform.get_parameters(&mut config);
        config
    }

    /// Echo a module's recognized options, including its name and type.
    pub fn module_config(&self, id: ModuleId) -> ModuleConfig {
        let cell = self.modules[id.0].borrow();
        let mut config = ModuleConfig::new();
        config.set("name", cell.name.as_str());
        config.set("type", cell.transform.type_name());
        cell.transform.export_config(&mut config);
        config
    }
}

impl Default for FeatureGraph {
    fn default() -> Self {
        Self::new()
    }
}
