//! Persisted histogram containers.
//!
//! A container is a JSON document holding named histograms:
//!
//! ```json
//! { "histograms": [ { "name": "randomHist1", "n_bins": 100, "x_min": 0.0, "x_max": 100.0,
//!                     "bin_content": [0.0, 1.0, ...], "entries": 25 } ] }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ts_core::{Error, Result};

use crate::histogram::Histogram;

/// Anything that can hand out named histograms.
pub trait HistogramSource {
    /// Human-readable container identifier used in error messages.
    fn container_name(&self) -> String;

    /// Load a copy of the histogram stored under `name`.
    ///
    /// Returns [`Error::HistogramNotFound`] if the container has no such histogram.
    fn load_histogram(&self, name: &str) -> Result<Histogram>;
}

/// Serialized form of one histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredHistogram {
    /// Histogram name.
    pub name: String,
    /// Histogram title.
    #[serde(default)]
    pub title: String,
    /// Number of bins (excluding under/overflow).
    pub n_bins: usize,
    /// Lower edge of first bin.
    pub x_min: f64,
    /// Upper edge of last bin.
    pub x_max: f64,
    /// Bin contents (length = n_bins, excluding under/overflow).
    pub bin_content: Vec<f64>,
    /// Total number of fills; defaults to the in-range count plus flows.
    #[serde(default)]
    pub entries: Option<u64>,
    /// Underflow count.
    #[serde(default)]
    pub underflow: f64,
    /// Overflow count.
    #[serde(default)]
    pub overflow: f64,
}

impl TryFrom<StoredHistogram> for Histogram {
    type Error = Error;

    fn try_from(stored: StoredHistogram) -> Result<Self> {
        if stored.bin_content.len() != stored.n_bins {
            return Err(Error::InvalidConfiguration(format!(
                "histogram '{}': n_bins={} but {} bin contents stored",
                stored.name,
                stored.n_bins,
                stored.bin_content.len()
            )));
        }
        let in_range: f64 = stored.bin_content.iter().sum();
        let entries = stored
            .entries
            .unwrap_or_else(|| (in_range + stored.underflow + stored.overflow).round() as u64);
        let h = Histogram::from_counts(stored.name, stored.x_min, stored.x_max, stored.bin_content)?
            .with_title(stored.title)
            .with_flows(stored.underflow, stored.overflow)
            .with_entries(entries);
        Ok(h)
    }
}

impl From<&Histogram> for StoredHistogram {
    fn from(h: &Histogram) -> Self {
        Self {
            name: h.name().to_string(),
            title: h.title().to_string(),
            n_bins: h.n_bins(),
            x_min: h.x_min(),
            x_max: h.x_max(),
            bin_content: h.bin_contents().to_vec(),
            entries: Some(h.entries()),
            underflow: h.underflow(),
            overflow: h.overflow(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContainerDocument {
    histograms: Vec<StoredHistogram>,
}

/// In-memory view of a histogram container.
#[derive(Debug, Clone, Default)]
pub struct HistogramStore {
    path: Option<PathBuf>,
    histograms: Vec<StoredHistogram>,
}

impl HistogramStore {
    /// Empty store not yet associated with a file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a container from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("opening histogram container {}", path.display());
        let json = std::fs::read_to_string(path)?;
        let mut store = Self::from_json_str(&json)?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Parse a container from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: ContainerDocument = serde_json::from_str(json)?;
        Ok(Self { path: None, histograms: doc.histograms })
    }

    /// Names of the stored histograms, in storage order.
    pub fn names(&self) -> Vec<&str> {
        self.histograms.iter().map(|h| h.name.as_str()).collect()
    }

    /// Number of stored histograms.
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Whether the store holds no histograms.
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Store `histogram`, replacing an existing entry with the same name.
    pub fn insert(&mut self, histogram: &Histogram) {
        let stored = StoredHistogram::from(histogram);
        match self.histograms.iter_mut().find(|h| h.name == stored.name) {
            Some(slot) => *slot = stored,
            None => self.histograms.push(stored),
        }
    }

    /// Serialize the container as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        let doc = ContainerDocument { histograms: self.histograms.clone() };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Write the container to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json_string()?)?;
        Ok(())
    }
}

impl fmt::Display for HistogramStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "{}", p.display()),
            None => f.write_str("<in-memory container>"),
        }
    }
}

impl HistogramSource for HistogramStore {
    fn container_name(&self) -> String {
        self.to_string()
    }

    fn load_histogram(&self, name: &str) -> Result<Histogram> {
        let stored = self.histograms.iter().find(|h| h.name == name).ok_or_else(|| {
            Error::HistogramNotFound { container: self.container_name(), name: name.to_string() }
        })?;
        Histogram::try_from(stored.clone())
    }
}
