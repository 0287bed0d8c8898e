//! # KWS Frontend RT
//!
//! Streaming acoustic front-end for keyword spotting (KWS). Raw audio goes
//! in, fixed-width normalized feature vectors come out, ready to feed a
//! spotter network.
//!
//! Audio may arrive in chunks of any size - the pipeline buffers the tail
//! that does not yet fill a frame and produces exactly the same features as
//! a single-shot pass over the whole waveform, bit for bit.
//!
//! ## Quick Start
//!
//! Use [`FeaturePipeline`] with trained normalization stats:
//!
//! ```ignore
//! use kws_frontend_rt::{FeaturePipeline, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let mut pipeline = FeaturePipeline::from_cmvn_file(config, "models/kws/cmvn.bin")?;
//!
//! // Feed audio as it arrives; chunk sizes are arbitrary
//! pipeline.accept_waveform(&samples)?;
//! if pipeline.num_frames_ready() > 0 {
//!     let mut feats = Vec::new();
//!     let n = pipeline.read_all(&mut feats)?;
//!     // feats now holds n vectors of pipeline.feature_dim() values
//! }
//!
//! // End of stream: synthesize right context for the tail and drain
//! pipeline.finalize()?;
//! ```
//!
//! ## Processing Stages
//!
//! 1. **Framing** - sliding windows of `frame_length` samples every
//!    `frame_shift` samples (defaults: 25 ms / 10 ms at 16 kHz).
//! 2. **Log-mel filterbank** - [`Fbank`](fbank::Fbank) turns each frame
//!    into `num_bins` log-mel energies.
//! 3. **Normalization** - [`Cmvn`](cmvn::Cmvn) maps each value `v` to
//!    `(v - mean) * inv_std` with per-bin stats trained offline.
//! 4. **Context splicing** - each output vector concatenates
//!    `left_context` earlier frames, the frame itself, and `right_context`
//!    later frames. Missing neighbors at the stream edges are replaced by
//!    copies of the first (respectively last) frame.
//!
//! ## Feature Vector Layout
//!
//! With `left_context = L`, `right_context = R` and `num_bins = D`, the
//! vector for frame `t` is `(L + 1 + R) * D` wide:
//!
//! ```text
//! [ frame t-L | ... | frame t-1 | frame t | frame t+1 | ... | frame t+R ]
//!    D values                     D values                    D values
//! ```
//!
//! ## Readiness
//!
//! A frame becomes readable once its right context exists, so
//! [`num_frames_ready`](FeaturePipeline::num_frames_ready) trails the frame
//! count by `right_context` while the stream is live.
//! [`finalize`](FeaturePipeline::finalize) replicates the last frame to
//! stand in for the missing future and releases the tail.
//!
//! ## Audio Requirements
//!
//! - **Sample rate**: `sample_rate` from the config (16 kHz default);
//!   resample before feeding if needed
//! - **Format**: Mono f32 samples in range [-1.0, 1.0]
//!
//! ## Logging
//!
//! This crate uses the `log` facade for debug messages. Install any logger
//! in the host application (the demo programs use `env_logger`).
//!
//! ## Thread Safety
//!
//! Each pipeline instance is independent and `Send`. Create separate
//! instances for parallel streams - they do not share state.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub mod cmvn;
pub mod fbank;

pub use cmvn::Cmvn;
pub use fbank::Fbank;

// Default front-end geometry (16 kHz speech models)
pub const DEFAULT_NUM_BINS: usize = 40;
pub const DEFAULT_SAMPLE_RATE: usize = 16000;
/// 25 ms at 16 kHz.
pub const DEFAULT_FRAME_LENGTH: usize = 400;
/// 10 ms at 16 kHz.
pub const DEFAULT_FRAME_SHIFT: usize = 160;
pub const DEFAULT_LEFT_CONTEXT: usize = 10;
pub const DEFAULT_RIGHT_CONTEXT: usize = 5;

#[derive(Error, Debug)]
pub enum KwsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Config error: {0}")]
    Config(String),
    #[error("pipeline is already finalized")]
    AlreadyFinalized,
    #[error("frame {index} is out of range: only {total} frames computed")]
    FrameOutOfRange { index: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, KwsError>;

/// Simple INI parser
fn parse_ini(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') || line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Front-end geometry and context configuration.
///
/// The defaults match common 16 kHz KWS models: 40 mel bins, 25 ms frames
/// every 10 ms, 10 frames of left context and 5 of right context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of mel bins per raw frame.
    pub num_bins: usize,
    /// Expected input sample rate in Hz.
    pub sample_rate: usize,
    /// Frame length in samples.
    pub frame_length: usize,
    /// Frame shift in samples.
    pub frame_shift: usize,
    /// Frames of context spliced before each frame.
    pub left_context: usize,
    /// Frames of context spliced after each frame.
    pub right_context: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_bins: DEFAULT_NUM_BINS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_length: DEFAULT_FRAME_LENGTH,
            frame_shift: DEFAULT_FRAME_SHIFT,
            left_context: DEFAULT_LEFT_CONTEXT,
            right_context: DEFAULT_RIGHT_CONTEXT,
        }
    }
}

impl PipelineConfig {
    /// Load config from an INI file shipped next to the model.
    pub fn from_ini_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            KwsError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Ok(Self::from_ini(&content))
    }

    /// Parse config from INI text. Missing or malformed keys keep their defaults.
    pub fn from_ini(content: &str) -> Self {
        let params = parse_ini(content);
        let get = |key: &str, default: usize| {
            params.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
        };
        Self {
            num_bins: get("num_bins", DEFAULT_NUM_BINS),
            sample_rate: get("sample_rate", DEFAULT_SAMPLE_RATE),
            frame_length: get("frame_length", DEFAULT_FRAME_LENGTH),
            frame_shift: get("frame_shift", DEFAULT_FRAME_SHIFT),
            left_context: get("left_context", DEFAULT_LEFT_CONTEXT),
            right_context: get("right_context", DEFAULT_RIGHT_CONTEXT),
        }
    }

    /// Width of one spliced output vector: `(left + 1 + right) * num_bins`.
    pub fn feature_dim(&self) -> usize {
        (self.left_context + 1 + self.right_context) * self.num_bins
    }

    fn validate(&self) -> Result<()> {
        if self.num_bins == 0 {
            return Err(KwsError::Config("num_bins must be positive".into()));
        }
        if self.sample_rate == 0 {
            return Err(KwsError::Config("sample_rate must be positive".into()));
        }
        if self.frame_shift == 0 {
            return Err(KwsError::Config("frame_shift must be positive".into()));
        }
        if self.frame_length < self.frame_shift {
            return Err(KwsError::Config(format!(
                "frame_length ({}) must be at least frame_shift ({})",
                self.frame_length, self.frame_shift
            )));
        }
        if self.frame_length < 2 {
            return Err(KwsError::Config("frame_length must be at least 2 samples".into()));
        }
        Ok(())
    }
}

/// Streaming feature pipeline: framing, log-mel filterbank, CMVN, context splicing.
///
/// Chunk boundaries never change the output: the pipeline carries the
/// waveform tail that does not yet fill a frame and recomputes nothing.
/// The frame history grows with the stream; call
/// [`reset`](Self::reset) between utterances to start over.
pub struct FeaturePipeline {
    config: PipelineConfig,
    fbank: Fbank,
    cmvn: Cmvn,
    /// Waveform tail shorter than one frame, carried between pushes.
    wav_carry: Vec<f32>,
    /// Normalized frame history: left-context seed rows, one row per real
    /// frame, right-context tail rows once finalized.
    feature_buf: Vec<f32>,
    /// Raw frames from the latest push (reused between calls).
    feat_scratch: Vec<f32>,
    /// Count of real frames (seed and tail rows excluded).
    num_frames: usize,
    done: bool,
}

impl FeaturePipeline {
    /// Create a pipeline from a config and normalization stats.
    ///
    /// Fails if the config is inconsistent or the stats do not cover
    /// `num_bins` bins.
    pub fn new(config: PipelineConfig, cmvn: Cmvn) -> Result<Self> {
        config.validate()?;
        if cmvn.dim() != config.num_bins {
            return Err(KwsError::Config(format!(
                "cmvn stats cover {} bins but num_bins is {}",
                cmvn.dim(),
                config.num_bins
            )));
        }
        let fbank = Fbank::new(
            config.num_bins,
            config.sample_rate,
            config.frame_length,
            config.frame_shift,
        );
        log::debug!(
            "feature pipeline ready: {} mel bins, frame {}/{} samples, context -{}/+{}, output dim {}",
            config.num_bins,
            config.frame_length,
            config.frame_shift,
            config.left_context,
            config.right_context,
            config.feature_dim()
        );
        Ok(Self {
            fbank,
            cmvn,
            wav_carry: Vec::with_capacity(config.frame_length * 2),
            feature_buf: Vec::new(),
            feat_scratch: Vec::new(),
            num_frames: 0,
            done: false,
            config,
        })
    }

    /// Create a pipeline loading normalization stats from a file.
    pub fn from_cmvn_file<P: AsRef<Path>>(config: PipelineConfig, path: P) -> Result<Self> {
        let cmvn = Cmvn::from_file(path)?;
        Self::new(config, cmvn)
    }

    /// Push a chunk of audio into the pipeline.
    ///
    /// Computes every frame the buffered audio now completes, normalizes
    /// it and appends it to the history. Samples that do not yet fill a
    /// frame are kept for the next push, so chunk sizes are arbitrary and
    /// an empty chunk is a no-op. Fails once the stream is finalized.
    pub fn accept_waveform(&mut self, wave: &[f32]) -> Result<()> {
        if self.done {
            return Err(KwsError::AlreadyFinalized);
        }
        self.wav_carry.extend_from_slice(wave);

        let num_new = self.fbank.compute(&self.wav_carry, &mut self.feat_scratch);
        if num_new > 0 {
            let dim = self.config.num_bins;
            for frame in self.feat_scratch.chunks_exact_mut(dim) {
                self.cmvn.apply(frame);
            }
            // First frames of the stream: seed the left context with
            // copies of the very first frame
            if self.num_frames == 0 && self.config.left_context > 0 {
                let first = &self.feat_scratch[..dim];
                for _ in 0..self.config.left_context {
                    self.feature_buf.extend_from_slice(first);
                }
            }
            self.feature_buf.extend_from_slice(&self.feat_scratch);
            self.num_frames += num_new;
        }
        // The carry keeps everything past the consumed frame shifts, which
        // is always shorter than one frame
        self.wav_carry.drain(..num_new * self.config.frame_shift);
        Ok(())
    }

    /// Mark the end of the stream.
    ///
    /// Replicates the last frame `right_context` times so the final real
    /// frames gain a full window, then releases them for reading. Fails if
    /// called twice. A stream with no frames finalizes to an empty one.
    pub fn finalize(&mut self) -> Result<()> {
        if self.done {
            return Err(KwsError::AlreadyFinalized);
        }
        self.done = true;
        if self.num_frames == 0 {
            log::debug!("stream finalized with no frames");
            return Ok(());
        }
        let dim = self.config.num_bins;
        let last = self.feature_buf.len() - dim;
        for _ in 0..self.config.right_context {
            self.feature_buf.extend_from_within(last..last + dim);
        }
        log::debug!("stream finalized after {} frames", self.num_frames);
        Ok(())
    }

    /// Number of frames whose spliced vector can be read right now.
    ///
    /// While streaming this trails [`num_frames`](Self::num_frames) by
    /// `right_context`; after [`finalize`](Self::finalize) every frame is
    /// ready. A stream that never reaches `right_context` frames reports
    /// zero even after finalizing.
    pub fn num_frames_ready(&self) -> usize {
        if self.num_frames < self.config.right_context {
            0
        } else if self.done {
            self.num_frames
        } else {
            self.num_frames - self.config.right_context
        }
    }

    /// Read spliced vectors for frames `start..` as far as readiness allows.
    ///
    /// `out` is cleared and filled with whole vectors of
    /// [`feature_dim`](Self::feature_dim) values each; the count of vectors
    /// written is returned. When `start` falls in the not-yet-ready tail
    /// this reads nothing and leaves `out` untouched. `start` must point at
    /// a computed frame, otherwise the call fails.
    pub fn read_frames(&self, start: usize, out: &mut Vec<f32>) -> Result<usize> {
        if start >= self.num_frames {
            return Err(KwsError::FrameOutOfRange {
                index: start,
                total: self.num_frames,
            });
        }
        let count = self.num_frames_ready().saturating_sub(start);
        if count == 0 {
            return Ok(0);
        }
        let dim = self.config.num_bins;
        let window = self.feature_dim();
        out.clear();
        out.reserve(count * window);
        for t in start..start + count {
            // History row t is the first left-context slot of frame t's
            // window, so the window is one contiguous run
            let begin = t * dim;
            out.extend_from_slice(&self.feature_buf[begin..begin + window]);
        }
        Ok(count)
    }

    /// Read every ready frame from the start of the stream.
    ///
    /// Equivalent to [`read_frames(0, out)`](Self::read_frames).
    pub fn read_all(&self, out: &mut Vec<f32>) -> Result<usize> {
        self.read_frames(0, out)
    }

    /// Drop all audio, frames and the finalized flag, keeping the config
    /// and stats. The pipeline is ready for a fresh stream.
    pub fn reset(&mut self) {
        self.wav_carry.clear();
        self.feature_buf.clear();
        self.feat_scratch.clear();
        self.num_frames = 0;
        self.done = false;
        log::debug!("pipeline reset");
    }

    /// Width of one spliced output vector.
    pub fn feature_dim(&self) -> usize {
        self.config.feature_dim()
    }

    /// Count of real frames computed so far.
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Frames a window of `num_samples` samples yields.
    pub fn frames_for_samples(&self, num_samples: usize) -> usize {
        self.fbank.num_frames(num_samples)
    }

    /// Whether [`finalize`](Self::finalize) has been called.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

// Verify that pipelines can be sent between threads
// This is a compile-time check - if it compiles, the types are Send
fn _assert_send<T: Send>() {}
fn _assert_pipeline_is_send() {
    _assert_send::<FeaturePipeline>();
}
