//! # ts-hist
//!
//! Binned data for ToyStat.
//!
//! - [`Histogram`]: fixed binning over `[x_min, x_max)`, filled one sample at a time and
//!   reset between pseudo-experiments without reallocating.
//! - [`HistogramStore`]: a JSON container of named histograms, the persisted input of
//!   the contour and consistency workflows.
//!
//! ## Example
//!
//! ```no_run
//! use ts_hist::{HistogramSource, HistogramStore};
//!
//! let store = HistogramStore::open("histo25.json").unwrap();
//! let h = store.load_histogram("randomHist1").unwrap();
//! println!("bins: {}, entries: {}", h.n_bins(), h.entries());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod histogram;
pub mod store;

pub use histogram::{Binning, Histogram};
pub use store::{HistogramSource, HistogramStore, StoredHistogram};
