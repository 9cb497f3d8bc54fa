//! Row-level data model: the fine-grained rows read from a [`crate::RowSource`]
//! and the averaged rows produced by the [`crate::AveragingEngine`].

use std::{
    fmt::{Display, Formatter},
    ops::{Add, AddAssign, Div, Mul, Sub},
};

use crate::{
    error::AveragingError,
    key::AveragingKey,
    ndarray::{Array1, Array2},
    Complex,
};

/// Baseline geometry \[metres\].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Uvw {
    /// u coordinate
    pub u: f64,
    /// v coordinate
    pub v: f64,
    /// w coordinate
    pub w: f64,
}

impl Uvw {
    /// Create a new [`Uvw`] from its components.
    pub const fn new(u: f64, v: f64, w: f64) -> Self {
        Self { u, v, w }
    }

    /// Euclidean distance between two baseline vectors.
    pub fn distance(&self, other: &Self) -> f64 {
        let d = *self - *other;
        (d.u * d.u + d.v * d.v + d.w * d.w).sqrt()
    }
}

impl Add for Uvw {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.u + rhs.u, self.v + rhs.v, self.w + rhs.w)
    }
}

impl AddAssign for Uvw {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Uvw {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.u - rhs.u, self.v - rhs.v, self.w - rhs.w)
    }
}

impl Mul<f64> for Uvw {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.u * rhs, self.v * rhs, self.w * rhs)
    }
}

impl Div<f64> for Uvw {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.u / rhs, self.v / rhs, self.w / rhs)
    }
}

impl Display for Uvw {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3}) m", self.u, self.v, self.w)
    }
}

/// Identifiers carried along with a row which are not part of its visibility
/// payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RowIds {
    /// Array (sub-array) id
    pub array_id: i32,
    /// Observation id
    pub observation_id: i32,
    /// Field id
    pub field_id: i32,
    /// Scan number
    pub scan_number: i32,
    /// State id
    pub state_id: i32,
}

/// The weights of an input row.
#[derive(Clone, Debug, PartialEq)]
pub enum Weights {
    /// One weight per polarisation, applied to every channel.
    PerPol(Array1<f32>),
    /// One weight per `[channel][polarisation]` cell.
    Spectrum(Array2<f32>),
}

impl Weights {
    /// The weight of a single `[channel][polarisation]` cell.
    #[inline]
    pub fn at(&self, chan: usize, pol: usize) -> f32 {
        match self {
            Self::PerPol(w) => w[pol],
            Self::Spectrum(w) => w[[chan, pol]],
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &f32> + '_> {
        match self {
            Self::PerPol(w) => Box::new(w.iter()),
            Self::Spectrum(w) => Box::new(w.iter()),
        }
    }
}

/// One fine-grained observation record for one baseline and spectral setup.
///
/// All per-cell arrays have the shape `[channel][polarisation]`.
#[derive(Clone, Debug, PartialEq)]
pub struct InputRow {
    /// Centroid of the integration \[s\]
    pub time: f64,
    /// Duration of the integration \[s\]
    pub interval: f64,
    /// Effective integration time \[s\]
    pub exposure: f64,
    /// First antenna of the baseline
    pub antenna1: u32,
    /// Second antenna of the baseline
    pub antenna2: u32,
    /// Spectral window / polarisation setup
    pub data_desc_id: u32,
    /// Other identifiers
    pub ids: RowIds,
    /// Baseline geometry
    pub uvw: Uvw,
    /// Observed visibilities
    pub data: Array2<Complex<f32>>,
    /// Calibrated visibilities, if the source provides them
    pub corrected: Option<Array2<Complex<f32>>>,
    /// Model visibilities, if the source provides them
    pub model: Option<Array2<Complex<f32>>>,
    /// Per-cell flags
    pub flags: Array2<bool>,
    /// Visibility weights
    pub weights: Weights,
    /// Whole-row flag. A flagged row contributes no weight to any cell.
    pub flag_row: bool,
}

impl InputRow {
    /// A row with every cell unflagged and unit weight.
    ///
    /// `exposure` defaults to `interval`, ids to zero and the optional columns
    /// to `None`.
    pub fn new(
        time: f64,
        interval: f64,
        antenna1: u32,
        antenna2: u32,
        data_desc_id: u32,
        uvw: Uvw,
        data: Array2<Complex<f32>>,
    ) -> Self {
        let (num_chans, num_pols) = data.dim();
        Self {
            time,
            interval,
            exposure: interval,
            antenna1,
            antenna2,
            data_desc_id,
            ids: RowIds::default(),
            uvw,
            data,
            corrected: None,
            model: None,
            flags: Array2::from_elem((num_chans, num_pols), false),
            weights: Weights::PerPol(Array1::ones(num_pols)),
            flag_row: false,
        }
    }

    /// `(num_chans, num_pols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Check that every per-cell array agrees with the shape of `data`, and that
    /// the scalars can be averaged.
    ///
    /// # Errors
    ///
    /// Returns [`AveragingError::MalformedRow`] describing the first problem
    /// found.
    pub fn validate(&self) -> Result<(), AveragingError> {
        let malformed = |reason: String| AveragingError::MalformedRow {
            time: self.time,
            reason,
        };
        let shape = self.shape();
        if !self.time.is_finite() {
            return Err(malformed("time is not finite".into()));
        }
        if !(self.interval.is_finite() && self.interval >= 0.0) {
            return Err(malformed(format!("invalid interval {}", self.interval)));
        }
        if !(self.exposure.is_finite() && self.exposure >= 0.0) {
            return Err(malformed(format!("invalid exposure {}", self.exposure)));
        }
        if self.flags.dim() != shape {
            return Err(malformed(format!(
                "flags have shape {:?}, data has shape {:?}",
                self.flags.dim(),
                shape
            )));
        }
        match &self.weights {
            Weights::PerPol(w) if w.len() != shape.1 => {
                return Err(malformed(format!(
                    "{} per-polarisation weights for {} polarisations",
                    w.len(),
                    shape.1
                )));
            }
            Weights::Spectrum(w) if w.dim() != shape => {
                return Err(malformed(format!(
                    "weights have shape {:?}, data has shape {:?}",
                    w.dim(),
                    shape
                )));
            }
            _ => {}
        }
        if let Some(bad) = self.weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
            return Err(malformed(format!("invalid weight {bad}")));
        }
        for (name, column) in [("corrected", &self.corrected), ("model", &self.model)] {
            if let Some(column) = column {
                if column.dim() != shape {
                    return Err(malformed(format!(
                        "{name} column has shape {:?}, data has shape {:?}",
                        column.dim(),
                        shape
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The averaged result of exactly one closed accumulator.
///
/// For every cell, `weights == 0` if and only if `flags` is set; flagged cells
/// hold zero in every data column.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRow {
    /// The key this row was averaged under
    pub key: AveragingKey,
    /// Which accumulator of `key` this is, counting from zero
    pub generation: u64,
    /// Index of the upstream chunk every contributing row came from
    pub chunk_index: usize,
    /// Number of input rows folded in, flagged or not
    pub sample_count: usize,
    /// Weighted centroid of the folded input times \[s\]
    pub time: f64,
    /// Midway between the first and last folded input times \[s\]
    pub time_midpoint: f64,
    /// Time of the first folded row \[s\]
    pub interval_start: f64,
    /// Span covered by the folded rows, including half an integration at each
    /// end \[s\]
    pub interval: f64,
    /// Summed exposure \[s\]
    pub exposure: f64,
    /// First antenna of the first folded row
    pub antenna1: u32,
    /// Second antenna of the first folded row
    pub antenna2: u32,
    /// Spectral window / polarisation setup
    pub data_desc_id: u32,
    /// Identifiers of the first folded row
    pub ids: RowIds,
    /// Weighted mean baseline geometry
    pub uvw: Uvw,
    /// Averaged observed visibilities
    pub data: Array2<Complex<f32>>,
    /// Averaged calibrated visibilities
    pub corrected: Option<Array2<Complex<f32>>>,
    /// Averaged model visibilities
    pub model: Option<Array2<Complex<f32>>>,
    /// Set where no unflagged weight was accumulated
    pub flags: Array2<bool>,
    /// Summed unflagged weights
    pub weights: Array2<f32>,
    /// Per-polarisation noise estimate, `-1` where a polarisation is fully
    /// flagged
    pub sigma: Array1<f32>,
    /// Set when every cell is flagged
    pub flag_row: bool,
}

impl OutputRow {
    /// `(num_chans, num_pols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Re-express this averaged row as an input to a further averaging stage.
    pub fn into_input_row(self) -> InputRow {
        InputRow {
            time: self.time,
            interval: self.interval,
            exposure: self.exposure,
            antenna1: self.antenna1,
            antenna2: self.antenna2,
            data_desc_id: self.data_desc_id,
            ids: self.ids,
            uvw: self.uvw,
            data: self.data,
            corrected: self.corrected,
            model: self.model,
            flags: self.flags,
            weights: Weights::Spectrum(self.weights),
            flag_row: self.flag_row,
        }
    }
}
