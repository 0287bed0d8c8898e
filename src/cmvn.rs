//! Cepstral mean and variance normalization (CMVN).
//!
//! [`Cmvn`] holds per-bin normalization statistics as a `2 x D` table:
//! row 0 is the mean of each bin, row 1 the inverse standard deviation.
//! Applying it maps a raw feature value `v` in bin `j` to
//! `(v - mean[j]) * inv_std[j]`.
//!
//! Stats are usually trained offline over the corpus and shipped next to
//! the model. The on-disk format is little-endian binary:
//!
//! ```text
//! i32 rows (must be 2) | i32 cols (= D) | rows * cols f32, row-major
//! ```
//!
//! [`Cmvn::estimate`] additionally derives per-utterance stats from raw
//! frames for offline use when no trained table is available.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{Array2, ArrayView1};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::{KwsError, Result};

/// Floor applied to estimated standard deviations before inversion.
const STD_FLOOR: f64 = 1e-10;

/// Per-bin normalization statistics.
#[derive(Debug, Clone)]
pub struct Cmvn {
    /// Row 0: means. Row 1: inverse standard deviations.
    stats: Array2<f32>,
}

impl Cmvn {
    /// Read stats from a little-endian binary reader.
    ///
    /// Rejects tables whose row count is not 2 or whose column count is
    /// not positive. Truncated data surfaces as an IO error.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let rows = reader.read_i32::<LittleEndian>()?;
        let cols = reader.read_i32::<LittleEndian>()?;
        if rows != 2 || cols < 1 {
            return Err(KwsError::Config(format!(
                "normalization stats must be a 2 x D table, got {} x {}",
                rows, cols
            )));
        }
        let cols = cols as usize;
        let mut data = vec![0.0f32; 2 * cols];
        reader.read_f32_into::<LittleEndian>(&mut data)?;
        Ok(Self {
            stats: Array2::from_shape_vec((2, cols), data)?,
        })
    }

    /// Load stats from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            KwsError::Config(format!("cannot open cmvn stats {}: {}", path.display(), e))
        })?;
        let cmvn = Self::read(BufReader::new(file))?;
        log::debug!("loaded cmvn stats from {} ({} bins)", path.display(), cmvn.dim());
        Ok(cmvn)
    }

    /// Write stats in the binary format accepted by [`read`](Self::read).
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_i32::<LittleEndian>(2)?;
        writer.write_i32::<LittleEndian>(self.dim() as i32)?;
        for &v in self.stats.iter() {
            writer.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    /// Build stats from precomputed means and inverse standard deviations.
    pub fn from_stats(means: Vec<f32>, inv_stds: Vec<f32>) -> Result<Self> {
        if means.is_empty() || means.len() != inv_stds.len() {
            return Err(KwsError::Config(format!(
                "normalization stats rows must have equal non-zero length, got {} means and {} inverse stddevs",
                means.len(),
                inv_stds.len()
            )));
        }
        let dim = means.len();
        let mut data = means;
        data.extend(inv_stds);
        Ok(Self {
            stats: Array2::from_shape_vec((2, dim), data)?,
        })
    }

    /// Estimate stats from raw frames laid out as `num_frames * dim` values.
    ///
    /// Accumulates in f64 to keep long utterances accurate. Standard
    /// deviations are floored before inversion so constant bins stay finite.
    pub fn estimate(frames: &[f32], dim: usize) -> Result<Self> {
        if dim == 0 || frames.is_empty() || frames.len() % dim != 0 {
            return Err(KwsError::Config(format!(
                "cannot estimate normalization stats from {} values with dim {}",
                frames.len(),
                dim
            )));
        }
        let num_frames = (frames.len() / dim) as f64;

        let mut means = vec![0.0f64; dim];
        for frame in frames.chunks_exact(dim) {
            for (m, &v) in means.iter_mut().zip(frame) {
                *m += v as f64;
            }
        }
        for m in means.iter_mut() {
            *m /= num_frames;
        }

        let mut vars = vec![0.0f64; dim];
        for frame in frames.chunks_exact(dim) {
            for ((va, &v), &m) in vars.iter_mut().zip(frame).zip(means.iter()) {
                let d = v as f64 - m;
                *va += d * d;
            }
        }

        let mut data = Vec::with_capacity(2 * dim);
        data.extend(means.iter().map(|&m| m as f32));
        data.extend(vars.iter().map(|&va| {
            let std = (va / num_frames).sqrt().max(STD_FLOOR);
            (1.0 / std) as f32
        }));
        Ok(Self {
            stats: Array2::from_shape_vec((2, dim), data)?,
        })
    }

    /// Normalize one raw frame in place.
    pub fn apply(&self, frame: &mut [f32]) {
        debug_assert_eq!(frame.len(), self.dim());
        for (j, v) in frame.iter_mut().enumerate() {
            *v = (*v - self.stats[[0, j]]) * self.stats[[1, j]];
        }
    }

    /// Number of feature bins these stats cover.
    #[inline]
    pub fn dim(&self) -> usize {
        self.stats.ncols()
    }

    /// Per-bin means.
    pub fn means(&self) -> ArrayView1<'_, f32> {
        self.stats.row(0)
    }

    /// Per-bin inverse standard deviations.
    pub fn inv_stds(&self) -> ArrayView1<'_, f32> {
        self.stats.row(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_read_roundtrip() {
        let cmvn = Cmvn::from_stats(vec![1.0, -2.5, 0.25], vec![2.0, 0.5, 4.0]).unwrap();
        let mut buf = Vec::new();
        cmvn.write(&mut buf).unwrap();
        // 2 header i32s + 6 f32s
        assert_eq!(buf.len(), 2 * 4 + 6 * 4);

        let back = Cmvn::read(Cursor::new(buf)).unwrap();
        assert_eq!(back.dim(), 3);
        assert_eq!(back.stats, cmvn.stats);
    }

    #[test]
    fn test_read_rejects_wrong_row_count() {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(3).unwrap();
        buf.write_i32::<LittleEndian>(4).unwrap();
        for _ in 0..12 {
            buf.write_f32::<LittleEndian>(0.0).unwrap();
        }
        let err = Cmvn::read(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, KwsError::Config(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_read_rejects_truncated_data() {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(2).unwrap();
        buf.write_i32::<LittleEndian>(4).unwrap();
        // Only 3 of the 8 expected floats
        for _ in 0..3 {
            buf.write_f32::<LittleEndian>(1.0).unwrap();
        }
        let err = Cmvn::read(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, KwsError::Io(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_from_stats_rejects_mismatched_rows() {
        assert!(matches!(
            Cmvn::from_stats(vec![0.0; 4], vec![1.0; 3]),
            Err(KwsError::Config(_))
        ));
        assert!(matches!(
            Cmvn::from_stats(vec![], vec![]),
            Err(KwsError::Config(_))
        ));
    }

    #[test]
    fn test_apply_arithmetic() {
        let cmvn = Cmvn::from_stats(vec![1.0, 2.0], vec![2.0, 0.5]).unwrap();
        let mut frame = [2.0f32, 4.0];
        cmvn.apply(&mut frame);
        assert_eq!(frame, [2.0, 1.0]);
    }

    #[test]
    fn test_estimate_whitens() {
        // Two bins with distinct means and spreads
        let dim = 2;
        let mut frames = Vec::new();
        for i in 0..200 {
            let x = (i as f32 * 0.37).sin();
            frames.push(3.0 + x); // mean ~3, spread ~sin
            frames.push(-1.0 + 0.1 * x); // mean ~-1, tighter spread
        }
        let cmvn = Cmvn::estimate(&frames, dim).unwrap();

        let mut sums = vec![0.0f64; dim];
        let mut sq_sums = vec![0.0f64; dim];
        for frame in frames.chunks_exact(dim) {
            let mut f = [frame[0], frame[1]];
            cmvn.apply(&mut f);
            for j in 0..dim {
                sums[j] += f[j] as f64;
                sq_sums[j] += (f[j] as f64) * (f[j] as f64);
            }
        }
        let n = (frames.len() / dim) as f64;
        for j in 0..dim {
            let mean = sums[j] / n;
            let var = sq_sums[j] / n - mean * mean;
            assert!(mean.abs() < 1e-4, "bin {} mean {} after normalization", j, mean);
            assert!((var - 1.0).abs() < 1e-3, "bin {} variance {} after normalization", j, var);
        }
    }

    #[test]
    fn test_estimate_rejects_ragged_input() {
        assert!(matches!(
            Cmvn::estimate(&[1.0, 2.0, 3.0], 2),
            Err(KwsError::Config(_))
        ));
        assert!(matches!(Cmvn::estimate(&[], 2), Err(KwsError::Config(_))));
        assert!(matches!(Cmvn::estimate(&[1.0], 0), Err(KwsError::Config(_))));
    }

    #[test]
    fn test_constant_bin_stays_finite() {
        let frames = [5.0f32, 5.0, 5.0, 5.0]; // 4 frames, dim 1, zero variance
        let cmvn = Cmvn::estimate(&frames, 1).unwrap();
        let mut f = [5.0f32];
        cmvn.apply(&mut f);
        assert!(f[0].is_finite());
        assert_eq!(f[0], 0.0);
    }

    #[test]
    fn test_from_file_missing_is_config_error() {
        let err = Cmvn::from_file("/nonexistent/cmvn.bin").unwrap_err();
        assert!(matches!(err, KwsError::Config(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_file_roundtrip() {
        let cmvn = Cmvn::from_stats(vec![0.5; 6], vec![1.5; 6]).unwrap();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        cmvn.write(&mut tmp).unwrap();
        tmp.flush().unwrap();

        let back = Cmvn::from_file(tmp.path()).unwrap();
        assert_eq!(back.dim(), 6);
        assert_eq!(back.stats, cmvn.stats);
    }
}
