//! Log-mel filterbank frame computation.
//!
//! [`Fbank`] turns a window of time-domain samples into log-mel feature
//! frames: pre-emphasis, Hamming window, zero-padded real FFT, power
//! spectrum, triangular mel integration, natural log with a floor.
//!
//! Pre-emphasis is applied per frame rather than across the whole waveform,
//! so a frame's output depends only on its own `frame_length` samples. This
//! keeps results identical no matter how the waveform was chunked upstream.
//!
//! All FFT buffers are pre-allocated at construction time;
//! [`compute`](Fbank::compute) only allocates when growing the caller's
//! output vector.

use num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

// ─────────────────────────── Constants ───────────────────────────

/// Pre-emphasis coefficient (standard speech front-end value).
const PRE_EMPHASIS: f32 = 0.97;
/// Lower edge of the mel filterbank in Hz.
const MEL_LOW_HZ: f32 = 20.0;
/// Floor applied to mel energies before the log.
const LOG_FLOOR: f32 = 1e-10;

// ───────────────────────────── Fbank ─────────────────────────────

/// Log-mel filterbank extractor over sliding frames.
///
/// Frames start every `frame_shift` samples and span `frame_length` samples.
/// A window of `n` samples yields `1 + (n - frame_length) / frame_shift`
/// frames when `n >= frame_length`, otherwise none.
pub struct Fbank {
    num_bins: usize,
    frame_length: usize,
    frame_shift: usize,
    /// FFT length: `frame_length` rounded up to a power of two.
    fft_size: usize,
    /// Hamming window coefficients (`frame_length` values).
    window: Vec<f32>,
    /// Triangular mel filters, one row of `fft_size / 2 + 1` weights per bin.
    mel_banks: Vec<Vec<f32>>,
    /// FFT plan (forward: real → complex).
    fft: Arc<dyn RealToComplex<f32>>,
    /// Pre-emphasized, windowed, zero-padded FFT input (`fft_size` samples).
    fft_in: Vec<f32>,
    /// FFT output bins.
    fft_out: Vec<Complex32>,
    /// Scratch buffer for FFT.
    fft_scratch: Vec<Complex32>,
    /// Power spectrum of the current frame.
    power: Vec<f32>,
}

impl Fbank {
    /// Create an extractor producing `num_bins` log-mel values per frame.
    ///
    /// `frame_length` and `frame_shift` are in samples at `sample_rate` Hz.
    /// The mel filters span `MEL_LOW_HZ` up to the Nyquist frequency.
    pub fn new(num_bins: usize, sample_rate: usize, frame_length: usize, frame_shift: usize) -> Self {
        let fft_size = frame_length.next_power_of_two();
        let num_fft_bins = fft_size / 2 + 1;

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let fft_scratch = fft.make_scratch_vec();
        let fft_out = fft.make_output_vec();

        Self {
            num_bins,
            frame_length,
            frame_shift,
            fft_size,
            window: hamming_window(frame_length),
            mel_banks: mel_filter_banks(num_bins, num_fft_bins, fft_size, sample_rate),
            fft,
            fft_in: vec![0.0f32; fft_size],
            fft_out,
            fft_scratch,
            power: vec![0.0f32; num_fft_bins],
        }
    }

    /// Number of complete frames a window of `num_samples` samples yields.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if num_samples < self.frame_length {
            0
        } else {
            1 + (num_samples - self.frame_length) / self.frame_shift
        }
    }

    /// Compute all complete frames in `wave`.
    ///
    /// `out` is cleared and filled with `num_frames(wave.len()) * num_bins`
    /// values, frame after frame. Returns the number of frames written.
    /// Trailing samples that do not fill a frame are ignored; streaming
    /// callers carry them into the next window themselves.
    pub fn compute(&mut self, wave: &[f32], out: &mut Vec<f32>) -> usize {
        let num_frames = self.num_frames(wave.len());
        out.clear();
        if num_frames == 0 {
            return 0;
        }
        out.resize(num_frames * self.num_bins, 0.0);

        for t in 0..num_frames {
            let start = t * self.frame_shift;
            let frame = &wave[start..start + self.frame_length];
            let dst = &mut out[t * self.num_bins..(t + 1) * self.num_bins];
            self.compute_frame(frame, dst);
        }
        num_frames
    }

    /// Compute one frame: `frame_length` samples in, `num_bins` log-mel values out.
    fn compute_frame(&mut self, frame: &[f32], out: &mut [f32]) {
        debug_assert_eq!(frame.len(), self.frame_length);
        debug_assert_eq!(out.len(), self.num_bins);

        // Pre-emphasis, computed right-to-left so each sample sees the
        // original value of its predecessor. The first sample has no
        // predecessor inside the frame and is scaled instead.
        self.fft_in[..self.frame_length].copy_from_slice(frame);
        for i in (1..self.frame_length).rev() {
            self.fft_in[i] -= PRE_EMPHASIS * self.fft_in[i - 1];
        }
        self.fft_in[0] *= 1.0 - PRE_EMPHASIS;

        // Window, then zero-pad up to the FFT length
        for (s, &w) in self.fft_in[..self.frame_length].iter_mut().zip(&self.window) {
            *s *= w;
        }
        self.fft_in[self.frame_length..].fill(0.0);

        self.fft
            .process_with_scratch(&mut self.fft_in, &mut self.fft_out, &mut self.fft_scratch)
            .expect("FFT forward failed");

        // Power spectrum
        for (p, c) in self.power.iter_mut().zip(self.fft_out.iter()) {
            *p = c.re * c.re + c.im * c.im;
        }

        // Mel energies, log-compressed with a floor
        for (bank, dst) in self.mel_banks.iter().zip(out.iter_mut()) {
            let energy: f32 = bank
                .iter()
                .zip(self.power.iter())
                .map(|(&w, &p)| w * p)
                .sum();
            *dst = energy.max(LOG_FLOOR).ln();
        }
    }

    /// Number of log-mel bins per frame.
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Frame length in samples.
    #[inline]
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Frame shift in samples.
    #[inline]
    pub fn frame_shift(&self) -> usize {
        self.frame_shift
    }

    /// FFT length used internally.
    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }
}

// ──────────────────────────── Helpers ────────────────────────────

/// Hamming window coefficients for a frame of `size` samples.
fn hamming_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.54 - 0.46 * ((2.0 * PI * n as f32) / (size - 1) as f32).cos())
        .collect()
}

/// Triangular mel filters with edges spaced evenly on the mel scale
/// between `MEL_LOW_HZ` and the Nyquist frequency.
fn mel_filter_banks(
    num_bins: usize,
    num_fft_bins: usize,
    fft_size: usize,
    sample_rate: usize,
) -> Vec<Vec<f32>> {
    let mel_low = hz_to_mel(MEL_LOW_HZ);
    let mel_high = hz_to_mel(sample_rate as f32 / 2.0);
    let mel_step = (mel_high - mel_low) / (num_bins + 1) as f32;

    // num_bins triangles need num_bins + 2 edge frequencies
    let edges: Vec<f32> = (0..num_bins + 2)
        .map(|i| mel_to_hz(mel_low + i as f32 * mel_step))
        .collect();

    let hz_per_bin = sample_rate as f32 / fft_size as f32;
    let mut banks = vec![vec![0.0f32; num_fft_bins]; num_bins];
    for (b, bank) in banks.iter_mut().enumerate() {
        let (left, center, right) = (edges[b], edges[b + 1], edges[b + 2]);
        for (k, weight) in bank.iter_mut().enumerate() {
            let freq = k as f32 * hz_per_bin;
            *weight = if freq <= left || freq >= right {
                0.0
            } else if freq <= center {
                (freq - left) / (center - left)
            } else {
                (right - freq) / (right - center)
            };
        }
    }
    banks
}

#[inline]
fn hz_to_mel(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

#[inline]
fn mel_to_hz(mel: f32) -> f32 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}
