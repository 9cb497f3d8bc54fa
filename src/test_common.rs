//! Fixtures shared by the unit tests.

use std::{cell::Cell, rc::Rc};

use crate::{
    error::AveragingError,
    ndarray::{Array1, Array2},
    source::RowSource,
    types::{InputRow, Uvw, Weights},
    Complex,
};

pub fn c32(re: f32, im: f32) -> Complex<f32> {
    Complex::new(re, im)
}

/// A single channel, single polarisation row of unit weight and interval,
/// holding `value + 0i`, with zero uvw.
pub fn unit_row(time: f64, antenna1: u32, antenna2: u32, data_desc_id: u32, value: f32) -> InputRow {
    InputRow::new(
        time,
        1.0,
        antenna1,
        antenna2,
        data_desc_id,
        Uvw::default(),
        Array2::from_elem((1, 1), c32(value, 0.0)),
    )
}

/// A deterministic stream of 2 channel, 2 polarisation rows for
/// `num_baselines` baselines, `num_times` timesteps per chunk. Times run on
/// across chunks. Some cells and some whole rows are flagged, and weights vary.
pub fn synthetic_chunks(
    num_chunks: usize,
    num_baselines: u32,
    num_times: usize,
    time_step: f64,
) -> Vec<Vec<InputRow>> {
    (0..num_chunks)
        .map(|chunk| {
            let mut rows = vec![];
            for timestep in 0..num_times {
                let step = chunk * num_times + timestep;
                let time = step as f64 * time_step;
                for baseline in 0..num_baselines {
                    let b = baseline as usize;
                    let data = Array2::from_shape_fn((2, 2), |(chan, pol)| {
                        c32((step + chan) as f32, (b * 2 + pol) as f32 - 1.0)
                    });
                    let mut row = InputRow::new(
                        time,
                        time_step,
                        baseline,
                        baseline + 1,
                        0,
                        Uvw::new(10.0 * (b + 1) as f64 + time * 0.01, 5.0, 0.0),
                        data,
                    );
                    row.flags =
                        Array2::from_shape_fn((2, 2), |(chan, pol)| (step + b + chan + pol) % 7 == 0);
                    row.weights = if b % 2 == 0 {
                        Weights::PerPol(Array1::from_vec(vec![1.0, 0.5 + (step % 3) as f32]))
                    } else {
                        Weights::Spectrum(Array2::from_shape_fn((2, 2), |(chan, pol)| {
                            1.0 + (chan + pol + step % 2) as f32
                        }))
                    };
                    row.flag_row = (step * 3 + b) % 11 == 0;
                    rows.push(row);
                }
            }
            rows
        })
        .collect()
}

/// Counts every call made to the wrapped source.
pub struct CountingSource<S> {
    inner: S,
    calls: Rc<Cell<usize>>,
}

impl<S: RowSource> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Rc::new(Cell::new(0)),
        }
    }

    /// A handle on the call count which outlives the source.
    pub fn calls(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.calls)
    }

    fn count(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl<S: RowSource> RowSource for CountingSource<S> {
    fn next_chunk(&mut self) -> Result<bool, AveragingError> {
        self.count();
        self.inner.next_chunk()
    }

    fn more_rows_in_chunk(&mut self) -> Result<bool, AveragingError> {
        self.count();
        self.inner.more_rows_in_chunk()
    }

    fn next_row(&mut self) -> Result<InputRow, AveragingError> {
        self.count();
        self.inner.next_row()
    }
}
