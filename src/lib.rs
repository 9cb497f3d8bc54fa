#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! visavg averages chunked streams of radio interferometric visibility rows
//! over time.
//!
//! Rows are pulled from a [`RowSource`], grouped by [`AveragingKey`] (baseline,
//! data description, array and observation), and folded into weighted partial
//! sums until a [`BoundaryPolicy`] closes them: too much time has passed since
//! the first row, the baseline has moved too far in uvw, or the scan or field
//! has changed. Every partial sum is closed at the end of an upstream chunk.
//!
//! # Examples
//!
//! Average three rows of one baseline over two seconds
//!
//! ```rust
//! use visavg::{
//!     ndarray::array, AveragingConfigBuilder, AveragingEngine, ChunkedRows, Complex, InputRow,
//!     Uvw,
//! };
//!
//! let rows = vec![
//!     InputRow::new(0.0, 1.0, 1, 2, 0, Uvw::default(), array![[Complex::new(1.0, 0.0)]]),
//!     InputRow::new(1.0, 1.0, 1, 2, 0, Uvw::default(), array![[Complex::new(3.0, 0.0)]]),
//!     InputRow::new(2.5, 1.0, 1, 2, 0, Uvw::default(), array![[Complex::new(5.0, 0.0)]]),
//! ];
//!
//! let config = AveragingConfigBuilder::default()
//!     .averaging_interval_seconds(2.0)
//!     .build()
//!     .unwrap();
//! let mut engine = AveragingEngine::new(ChunkedRows::new(vec![rows]), config).unwrap();
//!
//! // the third row is more than 2s after the first, so the first two are closed early
//! let first = engine.next_output().unwrap().unwrap();
//! assert_eq!(first.data[[0, 0]], Complex::new(2.0, 0.0));
//! assert_eq!(first.weights[[0, 0]], 2.0);
//! assert_eq!(first.time, 0.5);
//!
//! // the last row is closed at the end of the chunk
//! let second = engine.next_output().unwrap().unwrap();
//! assert_eq!(second.data[[0, 0]], Complex::new(5.0, 0.0));
//! assert!(engine.next_output().unwrap().is_none());
//! ```

use cfg_if::cfg_if;

pub mod accumulator;
pub mod boundary;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod source;
pub mod types;

cfg_if! {
    if #[cfg(feature = "cli")] {
        pub mod cli;
        pub mod io;
    }
}

#[cfg(test)]
pub(crate) mod test_common;

pub use ndarray;
pub use num_complex::Complex;

pub use accumulator::{Accumulator, AccumulatorTable};
pub use boundary::{BoundaryPolicy, CloseReason};
pub use config::{AveragingConfig, AveragingConfigBuilder, ColumnPlan, ColumnWeighting};
pub use engine::{AveragedRows, AveragingEngine, EngineState, EngineStats};
pub use error::{AveragingError, SourceError, TableError};
pub use key::{AveragingKey, KeyMapper};
pub use source::{ChunkedRows, RowSource};
pub use types::{InputRow, OutputRow, RowIds, Uvw, Weights};
