//! Weighted partial sums of visibility rows, one per open [`AveragingKey`].

use std::collections::HashMap;

use indexmap::{map::Entry, IndexMap};
use itertools::izip;
use log::trace;

use crate::{
    config::{ColumnPlan, ColumnWeighting},
    error::{AveragingError, TableError},
    key::AveragingKey,
    ndarray::{Array1, Array2, ArrayView2},
    types::{InputRow, OutputRow, RowIds, Uvw},
    Complex,
};

/// Weighted sum of one data column.
#[derive(Clone, Debug)]
struct ColumnSum {
    weighting: ColumnWeighting,
    sum: Array2<Complex<f64>>,
}

impl ColumnSum {
    fn new(weighting: ColumnWeighting, shape: (usize, usize)) -> Self {
        Self {
            weighting,
            sum: Array2::zeros(shape),
        }
    }

    fn accumulate(
        &mut self,
        column: &Array2<Complex<f32>>,
        weights: &Array2<f64>,
        unflagged: &Array2<f64>,
    ) {
        let factors = match self.weighting {
            ColumnWeighting::Weights => weights,
            ColumnWeighting::Unity => unflagged,
        };
        for (sum, value, &factor) in izip!(self.sum.iter_mut(), column.iter(), factors.iter()) {
            if factor > 0.0 {
                *sum += Complex::new(value.re as f64, value.im as f64) * factor;
            }
        }
    }

    /// Divide through by the accumulated weights. Cells without weight are
    /// zero.
    fn normalize(&self, weight_sum: &Array2<f64>, counts: &Array2<u32>) -> Array2<Complex<f32>> {
        Array2::from_shape_fn(self.sum.dim(), |idx| {
            let weight = weight_sum[idx];
            if weight <= 0.0 {
                return Complex::new(0.0, 0.0);
            }
            let denominator = match self.weighting {
                ColumnWeighting::Weights => weight,
                ColumnWeighting::Unity => counts[idx] as f64,
            };
            let mean = self.sum[idx] / denominator;
            Complex::new(mean.re as f32, mean.im as f32)
        })
    }
}

/// One open partial sum for an [`AveragingKey`] within one averaging interval.
///
/// Flagged samples are folded in with zero weight, so every cell of the
/// `[channel][polarisation]` grid is always present.
#[derive(Clone, Debug)]
pub struct Accumulator {
    key: AveragingKey,
    generation: u64,
    chunk_index: usize,

    antenna1: u32,
    antenna2: u32,
    data_desc_id: u32,
    ids: RowIds,
    uvw_first: Uvw,

    interval_start: f64,
    time_last: f64,
    interval_first: f64,
    interval_last: f64,

    observed: ColumnSum,
    corrected: Option<ColumnSum>,
    model: Option<ColumnSum>,
    weight_sum: Array2<f64>,
    counts: Array2<u32>,

    row_weight_sum: f64,
    time_weighted_sum: f64,
    time_sum: f64,
    uvw_weighted_sum: Uvw,
    uvw_sum: Uvw,
    exposure_sum: f64,
    exposure_unflagged_sum: f64,
    any_unflagged: bool,
    sample_count: usize,
}

impl Accumulator {
    /// An empty accumulator shaped after `first`, whose time becomes the
    /// interval start. `first` is not folded in.
    pub(crate) fn new(
        key: AveragingKey,
        generation: u64,
        chunk_index: usize,
        first: &InputRow,
        plan: &ColumnPlan,
    ) -> Self {
        let shape = first.shape();
        let optional_column = |weighting: Option<ColumnWeighting>, present: bool| {
            weighting
                .filter(|_| present)
                .map(|weighting| ColumnSum::new(weighting, shape))
        };
        Self {
            key,
            generation,
            chunk_index,
            antenna1: first.antenna1,
            antenna2: first.antenna2,
            data_desc_id: first.data_desc_id,
            ids: first.ids,
            uvw_first: first.uvw,
            interval_start: first.time,
            time_last: first.time,
            interval_first: first.interval,
            interval_last: first.interval,
            observed: ColumnSum::new(plan.observed, shape),
            corrected: optional_column(plan.corrected, first.corrected.is_some()),
            model: optional_column(plan.model, first.model.is_some()),
            weight_sum: Array2::zeros(shape),
            counts: Array2::zeros(shape),
            row_weight_sum: 0.0,
            time_weighted_sum: 0.0,
            time_sum: 0.0,
            uvw_weighted_sum: Uvw::default(),
            uvw_sum: Uvw::default(),
            exposure_sum: 0.0,
            exposure_unflagged_sum: 0.0,
            any_unflagged: false,
            sample_count: 0,
        }
    }

    /// The key this accumulator belongs to
    pub fn key(&self) -> &AveragingKey {
        &self.key
    }

    /// How many accumulators of this key were flushed before this one opened
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The upstream chunk this accumulator was opened in
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// Time of the first row folded in \[s\]
    pub fn interval_start(&self) -> f64 {
        self.interval_start
    }

    /// Latest time folded in \[s\]
    pub fn time_last(&self) -> f64 {
        self.time_last
    }

    /// Identifiers of the first row folded in
    pub fn ids(&self) -> &RowIds {
        &self.ids
    }

    /// `(num_chans, num_pols)`
    pub fn shape(&self) -> (usize, usize) {
        self.weight_sum.dim()
    }

    /// Number of rows folded in, flagged or not
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Summed unflagged weight of each cell
    pub fn weight_sum(&self) -> ArrayView2<f64> {
        self.weight_sum.view()
    }

    /// Weighted mean uvw of the rows folded in, falling back to the arithmetic
    /// mean when no weight has been accumulated.
    pub fn mean_uvw(&self) -> Uvw {
        if self.row_weight_sum > 0.0 {
            self.uvw_weighted_sum / self.row_weight_sum
        } else if self.sample_count > 0 {
            self.uvw_sum / self.sample_count as f64
        } else {
            self.uvw_first
        }
    }

    fn check_compatible(&self, row: &InputRow) -> Result<(), AveragingError> {
        if row.shape() != self.shape() {
            return Err(AveragingError::ShapeMismatch {
                key: self.key,
                expected: format!("shape {:?}", self.shape()),
                received: format!("shape {:?}", row.shape()),
            });
        }
        for (name, averaged, present) in [
            ("corrected", self.corrected.is_some(), row.corrected.is_some()),
            ("model", self.model.is_some(), row.model.is_some()),
        ] {
            // columns dropped by the plan are never averaged, so only a missing
            // averaged column matters
            if averaged && !present {
                return Err(AveragingError::ShapeMismatch {
                    key: self.key,
                    expected: format!("a {name} column"),
                    received: format!("no {name} column"),
                });
            }
        }
        Ok(())
    }

    /// Add `row`'s weighted contribution to every cell and row-level sum.
    ///
    /// `row` must already be valid (see [`InputRow::validate`]). Nothing is
    /// modified if it is incompatible with this accumulator.
    pub(crate) fn fold(&mut self, row: &InputRow) -> Result<(), AveragingError> {
        self.check_compatible(row)?;

        let unflagged = Array2::from_shape_fn(self.shape(), |(chan, pol)| {
            if row.flag_row || row.flags[[chan, pol]] {
                0.0
            } else {
                1.0
            }
        });
        let weights = Array2::from_shape_fn(self.shape(), |(chan, pol)| {
            unflagged[[chan, pol]] * row.weights.at(chan, pol) as f64
        });

        for (weight_sum, count, &weight, &good) in izip!(
            self.weight_sum.iter_mut(),
            self.counts.iter_mut(),
            weights.iter(),
            unflagged.iter()
        ) {
            *weight_sum += weight;
            if good > 0.0 {
                *count += 1;
            }
        }
        self.observed.accumulate(&row.data, &weights, &unflagged);
        if let (Some(sum), Some(column)) = (self.corrected.as_mut(), row.corrected.as_ref()) {
            sum.accumulate(column, &weights, &unflagged);
        }
        if let (Some(sum), Some(column)) = (self.model.as_mut(), row.model.as_ref()) {
            sum.accumulate(column, &weights, &unflagged);
        }

        let row_weight = weights.sum();
        let offset = row.time - self.interval_start;
        self.row_weight_sum += row_weight;
        self.time_weighted_sum += offset * row_weight;
        self.time_sum += offset;
        self.uvw_weighted_sum += row.uvw * row_weight;
        self.uvw_sum += row.uvw;

        self.exposure_sum += row.exposure;
        if unflagged.iter().any(|&good| good > 0.0) {
            self.exposure_unflagged_sum += row.exposure;
            self.any_unflagged = true;
        }
        if row.time >= self.time_last {
            self.time_last = row.time;
            self.interval_last = row.interval;
        }
        self.sample_count += 1;
        Ok(())
    }

    /// Normalise the sums into an [`OutputRow`].
    pub(crate) fn finalize(self) -> OutputRow {
        let flags = self.weight_sum.mapv(|w| w <= 0.0);
        let weights = self.weight_sum.mapv(|w| w.min(f64::from(f32::MAX)) as f32);
        let data = self.observed.normalize(&self.weight_sum, &self.counts);
        let corrected = self
            .corrected
            .as_ref()
            .map(|column| column.normalize(&self.weight_sum, &self.counts));
        let model = self
            .model
            .as_ref()
            .map(|column| column.normalize(&self.weight_sum, &self.counts));

        let sigma = Array1::from_shape_fn(self.shape().1, |pol| {
            let (total, num_good) = weights
                .column(pol)
                .iter()
                .filter(|&&w| w > 0.0)
                .fold((0.0_f64, 0_usize), |(total, n), &w| (total + w as f64, n + 1));
            if num_good == 0 {
                return -1.0;
            }
            let mean = total / num_good as f64;
            if mean > 1e-9 {
                (1.0 / mean.sqrt()) as f32
            } else {
                -1.0
            }
        });

        let time_offset = if self.row_weight_sum > 0.0 {
            self.time_weighted_sum / self.row_weight_sum
        } else if self.sample_count > 0 {
            self.time_sum / self.sample_count as f64
        } else {
            0.0
        };
        let span = self.time_last - self.interval_start;
        let interval = if span == 0.0 {
            self.interval_first
        } else {
            span + self.interval_first / 2.0 + self.interval_last / 2.0
        };
        let exposure = if self.any_unflagged {
            self.exposure_unflagged_sum
        } else {
            self.exposure_sum
        };
        let flag_row = flags.iter().all(|&f| f);

        OutputRow {
            key: self.key,
            generation: self.generation,
            chunk_index: self.chunk_index,
            sample_count: self.sample_count,
            time: self.interval_start + time_offset,
            time_midpoint: self.interval_start + span / 2.0,
            interval_start: self.interval_start,
            interval,
            exposure,
            antenna1: self.antenna1,
            antenna2: self.antenna2,
            data_desc_id: self.data_desc_id,
            ids: self.ids,
            uvw: self.mean_uvw(),
            data,
            corrected,
            model,
            flags,
            weights,
            sigma,
            flag_row,
        }
    }
}

/// The open accumulators of one averaging stage, at most one per key, kept in
/// the order they were opened.
///
/// The first row folded for a key fixes that key's `(num_chans, num_pols)`
/// shape until [`Self::flush_all`] or [`Self::discard`], however many
/// accumulators the key opens and closes in between.
#[derive(Debug, Default)]
pub struct AccumulatorTable {
    plan: ColumnPlan,
    open: IndexMap<AveragingKey, Accumulator>,
    generations: HashMap<AveragingKey, u64>,
    shapes: HashMap<AveragingKey, (usize, usize)>,
}

impl AccumulatorTable {
    /// An empty table averaging the columns in `plan`.
    pub fn new(plan: ColumnPlan) -> Self {
        Self {
            plan,
            open: IndexMap::new(),
            generations: HashMap::new(),
            shapes: HashMap::new(),
        }
    }

    /// Fold `row` into the accumulator for `key`, opening a new one if none is
    /// open.
    ///
    /// # Errors
    ///
    /// - [`AveragingError::MalformedRow`] if `row` fails [`InputRow::validate`]
    /// - [`AveragingError::ShapeMismatch`] if `row` disagrees with the shape
    ///   established for `key`, or with the open accumulator's columns
    ///
    /// The table is unchanged on error.
    pub fn fold(
        &mut self,
        key: AveragingKey,
        row: &InputRow,
        chunk_index: usize,
    ) -> Result<(), AveragingError> {
        row.validate()?;
        self.fold_valid(key, row, chunk_index)
    }

    /// [`Self::fold`] for a row that has already been validated.
    pub(crate) fn fold_valid(
        &mut self,
        key: AveragingKey,
        row: &InputRow,
        chunk_index: usize,
    ) -> Result<(), AveragingError> {
        match self.open.entry(key) {
            Entry::Occupied(entry) => entry.into_mut().fold(row),
            Entry::Vacant(entry) => {
                let shape = row.shape();
                if let Some(&established) = self.shapes.get(&key) {
                    if established != shape {
                        return Err(AveragingError::ShapeMismatch {
                            key,
                            expected: format!("shape {established:?}"),
                            received: format!("shape {shape:?}"),
                        });
                    }
                }
                let generation = self.generations.get(&key).copied().unwrap_or(0);
                let mut acc = Accumulator::new(key, generation, chunk_index, row, &self.plan);
                acc.fold(row)?;
                self.shapes.insert(key, shape);
                trace!(
                    "opened accumulator for {} (generation {}) at {}",
                    key,
                    generation,
                    row.time
                );
                entry.insert(acc);
                Ok(())
            }
        }
    }

    /// Close the accumulator for `key`, returning its averaged row.
    ///
    /// # Errors
    ///
    /// [`TableError::NoSuchKey`] if no accumulator is open for `key`.
    pub fn flush(&mut self, key: &AveragingKey) -> Result<OutputRow, TableError> {
        let acc = self
            .open
            .shift_remove(key)
            .ok_or(TableError::NoSuchKey { key: *key })?;
        Ok(self.close(acc))
    }

    /// Close the accumulator for `key` if `must_close` returns a reason for
    /// it, giving back the reason and the averaged row. Nothing happens when no
    /// accumulator is open for `key`.
    ///
    /// # Errors
    ///
    /// Whatever `must_close` returns. The accumulator stays open.
    pub(crate) fn flush_when<R, E, F>(
        &mut self,
        key: &AveragingKey,
        must_close: F,
    ) -> Result<Option<(R, OutputRow)>, E>
    where
        F: FnOnce(&Accumulator) -> Result<Option<R>, E>,
    {
        match self.open.entry(*key) {
            Entry::Occupied(entry) => match must_close(entry.get())? {
                Some(reason) => {
                    let acc = entry.shift_remove();
                    Ok(Some((reason, self.close(acc))))
                }
                None => Ok(None),
            },
            Entry::Vacant(_) => Ok(None),
        }
    }

    /// Close every open accumulator, in the order they were opened. The shapes
    /// established for their keys are forgotten.
    pub fn flush_all(&mut self) -> Vec<OutputRow> {
        self.shapes.clear();
        let open = std::mem::take(&mut self.open);
        open.into_values().map(|acc| self.close(acc)).collect()
    }

    fn close(&mut self, acc: Accumulator) -> OutputRow {
        *self.generations.entry(acc.key).or_insert(0) += 1;
        trace!(
            "closed accumulator for {} (generation {}) after {} rows",
            acc.key,
            acc.generation,
            acc.sample_count
        );
        acc.finalize()
    }

    /// Drop every open accumulator and established shape without producing
    /// output.
    pub fn discard(&mut self) {
        self.open.clear();
        self.shapes.clear();
    }

    /// The open accumulator for `key`, if any
    pub fn get(&self, key: &AveragingKey) -> Option<&Accumulator> {
        self.open.get(key)
    }

    /// Number of accumulators flushed so far for `key`
    pub fn generation(&self, key: &AveragingKey) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }

    /// Number of open accumulators
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Whether no accumulator is open
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// The open keys, in the order they were opened
    pub fn keys(&self) -> impl Iterator<Item = &AveragingKey> {
        self.open.keys()
    }
}
