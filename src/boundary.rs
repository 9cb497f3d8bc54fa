//! When an open accumulator must be closed.
//!
//! Every predicate is a pure decision on an open [`Accumulator`] and the next
//! row for its key. The predicates are OR'd together by
//! [`BoundaryPolicy::close_reason`]. Exhaustion of an upstream chunk always
//! closes every accumulator; that rule is not configurable.

use std::fmt::{Display, Formatter};

use crate::{
    accumulator::Accumulator, config::AveragingConfig, error::AveragingError, types::InputRow,
};

/// Why an accumulator was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The candidate row is more than the averaging interval after the start
    Time,
    /// The candidate row's uvw is too far from the accumulated mean
    Geometry,
    /// The candidate row has a different data description
    DataDescription,
    /// The scan number changed
    Scan,
    /// The field changed
    Field,
    /// The upstream chunk is exhausted
    ChunkBoundary,
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Time => "time",
            Self::Geometry => "uvw distance",
            Self::DataDescription => "data description",
            Self::Scan => "scan",
            Self::Field => "field",
            Self::ChunkBoundary => "chunk boundary",
        };
        write!(f, "{reason}")
    }
}

/// Thresholds for closing accumulators, validated once at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryPolicy {
    interval_seconds: f64,
    max_uvw_distance: Option<f64>,
    break_on_scan: bool,
    break_on_field: bool,
}

impl BoundaryPolicy {
    /// # Errors
    ///
    /// [`AveragingError::Configuration`] if `config` does not validate.
    pub fn new(config: &AveragingConfig) -> Result<Self, AveragingError> {
        config.validate()?;
        Ok(Self {
            interval_seconds: config.averaging_interval_seconds,
            max_uvw_distance: config.uvw_distance_threshold(),
            break_on_scan: config.break_on_scan,
            break_on_field: config.break_on_field,
        })
    }

    /// The averaging interval \[s\]
    pub fn interval_seconds(&self) -> f64 {
        self.interval_seconds
    }

    /// True when `row` is strictly more than the interval after the first row of
    /// `acc`. A row exactly one interval later still folds in.
    pub fn must_close_for_time(&self, acc: &Accumulator, row: &InputRow) -> bool {
        row.time - acc.interval_start() > self.interval_seconds
    }

    /// True when `row`'s uvw is strictly further than the threshold from the
    /// weighted mean uvw of `acc`. Always false when no threshold is set.
    pub fn must_close_for_geometry(&self, acc: &Accumulator, row: &InputRow) -> bool {
        match self.max_uvw_distance {
            Some(max) => acc.mean_uvw().distance(&row.uvw) > max,
            None => false,
        }
    }

    /// True when `row` belongs to a different data description than `acc`.
    ///
    /// Routing by [`crate::AveragingKey`] already separates data descriptions,
    /// so this only fires for accumulators keyed without one.
    pub fn must_close_for_data_description_change(
        &self,
        acc: &Accumulator,
        row: &InputRow,
    ) -> bool {
        row.data_desc_id != acc.key().data_desc_id
    }

    /// True when scan breaks are enabled and `row`'s scan differs from the scan
    /// of the first row of `acc`.
    pub fn must_close_for_scan(&self, acc: &Accumulator, row: &InputRow) -> bool {
        self.break_on_scan && row.ids.scan_number != acc.ids().scan_number
    }

    /// True when field breaks are enabled and `row`'s field differs from the
    /// field of the first row of `acc`.
    pub fn must_close_for_field(&self, acc: &Accumulator, row: &InputRow) -> bool {
        self.break_on_field && row.ids.field_id != acc.ids().field_id
    }

    /// Every open accumulator closes when its upstream chunk is exhausted.
    pub const fn must_close_for_chunk_boundary(at_end_of_source_chunk: bool) -> bool {
        at_end_of_source_chunk
    }

    /// The first predicate requiring `acc` to close before `row` is folded in,
    /// if any.
    pub fn close_reason(&self, acc: &Accumulator, row: &InputRow) -> Option<CloseReason> {
        if self.must_close_for_time(acc, row) {
            Some(CloseReason::Time)
        } else if self.must_close_for_geometry(acc, row) {
            Some(CloseReason::Geometry)
        } else if self.must_close_for_data_description_change(acc, row) {
            Some(CloseReason::DataDescription)
        } else if self.must_close_for_scan(acc, row) {
            Some(CloseReason::Scan)
        } else if self.must_close_for_field(acc, row) {
            Some(CloseReason::Field)
        } else {
            None
        }
    }
}
