//! Fixed-binning 1D histogram used as the per-trial fill buffer.

use serde::{Deserialize, Serialize};
use ts_core::{Error, Result};

/// Equal-width binning `n_bins` over `[x_min, x_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Binning {
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge of the first bin.
    pub x_min: f64,
    /// Upper edge of the last bin.
    pub x_max: f64,
}

impl Binning {
    /// Check `n_bins > 0` and a finite, non-empty range.
    pub fn validate(&self) -> Result<()> {
        check_binning(self.n_bins, self.x_min, self.x_max)
    }

    /// Create an empty histogram with this binning.
    pub fn histogram(&self, name: impl Into<String>) -> Result<Histogram> {
        Histogram::new(name, self.n_bins, self.x_min, self.x_max)
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self { n_bins: 100, x_min: 0.0, x_max: 100.0 }
    }
}

/// A 1D histogram with `n_bins` equal-width bins over `[x_min, x_max)`.
///
/// Bin contents are unweighted counts, so the statistical error of bin `i` is
/// `sqrt(count_i)`. Samples outside the range are tallied in the underflow /
/// overflow counters and never touch the bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    name: String,
    title: String,
    n_bins: usize,
    x_min: f64,
    x_max: f64,
    bin_content: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Histogram {
    /// Create an empty histogram.
    ///
    /// Fails with [`Error::InvalidConfiguration`] unless `n_bins > 0` and
    /// `x_min < x_max` (both finite).
    pub fn new(name: impl Into<String>, n_bins: usize, x_min: f64, x_max: f64) -> Result<Self> {
        check_binning(n_bins, x_min, x_max)?;
        Ok(Self {
            name: name.into(),
            title: String::new(),
            n_bins,
            x_min,
            x_max,
            bin_content: vec![0.0; n_bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        })
    }

    /// Rebuild a histogram from stored bin counts.
    ///
    /// `entries` is set to the total in-range count; use [`Histogram::with_entries`]
    /// when the original fill count (including out-of-range samples) is known.
    pub fn from_counts(
        name: impl Into<String>,
        x_min: f64,
        x_max: f64,
        counts: Vec<f64>,
    ) -> Result<Self> {
        check_binning(counts.len(), x_min, x_max)?;
        if let Some((i, c)) = counts.iter().enumerate().find(|(_, c)| !(c.is_finite() && **c >= 0.0))
        {
            return Err(Error::InvalidConfiguration(format!(
                "bin {i} has invalid count {c}; counts must be finite and >= 0"
            )));
        }
        let total: f64 = counts.iter().sum();
        Ok(Self {
            name: name.into(),
            title: String::new(),
            n_bins: counts.len(),
            x_min,
            x_max,
            bin_content: counts,
            underflow: 0.0,
            overflow: 0.0,
            entries: total.round() as u64,
        })
    }

    /// Set the descriptive title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Override the fill count.
    pub fn with_entries(mut self, entries: u64) -> Self {
        self.entries = entries;
        self
    }

    /// Set the underflow / overflow tallies.
    pub fn with_flows(mut self, underflow: f64, overflow: f64) -> Self {
        self.underflow = underflow;
        self.overflow = overflow;
        self
    }

    /// Increment the bin containing `x`.
    ///
    /// Returns `true` if `x` landed in `[x_min, x_max)`. Every call counts towards
    /// [`Histogram::entries`], in range or not.
    pub fn fill(&mut self, x: f64) -> bool {
        self.entries += 1;
        match self.find_bin(x) {
            Some(i) => {
                self.bin_content[i] += 1.0;
                true
            }
            None => {
                if x < self.x_min {
                    self.underflow += 1.0;
                } else if x >= self.x_max {
                    self.overflow += 1.0;
                }
                false
            }
        }
    }

    /// Zero all counts, keeping the binning.
    pub fn reset(&mut self) {
        self.bin_content.iter_mut().for_each(|c| *c = 0.0);
        self.underflow = 0.0;
        self.overflow = 0.0;
        self.entries = 0;
    }

    /// Index of the bin containing `x`, or `None` outside `[x_min, x_max)` (and for NaN).
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.x_min && x < self.x_max) {
            return None;
        }
        let idx = ((x - self.x_min) / self.bin_width()) as usize;
        // x just below x_max can round up to n_bins.
        Some(idx.min(self.n_bins - 1))
    }

    /// Histogram name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Histogram title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Lower edge of the first bin.
    pub fn x_min(&self) -> f64 {
        self.x_min
    }

    /// Upper edge of the last bin.
    pub fn x_max(&self) -> f64 {
        self.x_max
    }

    /// Width shared by every bin.
    #[inline]
    pub fn bin_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.n_bins as f64
    }

    /// Center of bin `i`.
    #[inline]
    pub fn bin_center(&self, i: usize) -> f64 {
        self.x_min + (i as f64 + 0.5) * self.bin_width()
    }

    /// Count in bin `i`. Panics if `i >= n_bins`.
    #[inline]
    pub fn bin_content(&self, i: usize) -> f64 {
        self.bin_content[i]
    }

    /// Poisson count error of bin `i`: `sqrt(count)`, zero for an empty bin.
    #[inline]
    pub fn bin_error(&self, i: usize) -> f64 {
        self.bin_content[i].sqrt()
    }

    /// All bin counts in bin order.
    pub fn bin_contents(&self) -> &[f64] {
        &self.bin_content
    }

    /// Sum of in-range counts.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Number of bins with a non-zero count.
    pub fn n_nonempty_bins(&self) -> usize {
        self.bin_content.iter().filter(|&&c| c > 0.0).count()
    }

    /// Number of fill calls since creation or the last reset.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Samples that fell below `x_min`.
    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    /// Samples at or above `x_max`.
    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Binning of this histogram.
    pub fn binning(&self) -> Binning {
        Binning { n_bins: self.n_bins, x_min: self.x_min, x_max: self.x_max }
    }
}

fn check_binning(n_bins: usize, x_min: f64, x_max: f64) -> Result<()> {
    if n_bins == 0 {
        return Err(Error::InvalidConfiguration("histogram needs at least one bin".to_string()));
    }
    if !(x_min.is_finite() && x_max.is_finite() && x_max > x_min) {
        return Err(Error::InvalidConfiguration(format!(
            "histogram range must be finite with x_min < x_max, got [{x_min}, {x_max})"
        )));
    }
    Ok(())
}
