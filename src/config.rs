//! Averaging parameters

use std::fmt::{Display, Formatter};

use derive_builder::Builder;
use log::warn;

use crate::error::AveragingError;

/// How samples of a data column are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnWeighting {
    /// `sum(w * x) / sum(w)` over unflagged samples
    Weights,
    /// Arithmetic mean of the unflagged samples
    Unity,
}

impl Display for ColumnWeighting {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weights => write!(f, "weighted"),
            Self::Unity => write!(f, "unweighted"),
        }
    }
}

/// Which data columns are averaged, and how.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnPlan {
    /// The observed column is always averaged.
    pub observed: ColumnWeighting,
    /// `None` drops the corrected column from the output.
    pub corrected: Option<ColumnWeighting>,
    /// `None` drops the model column from the output.
    pub model: Option<ColumnWeighting>,
}

impl Default for ColumnPlan {
    fn default() -> Self {
        Self {
            observed: ColumnWeighting::Weights,
            corrected: Some(ColumnWeighting::Weights),
            model: Some(ColumnWeighting::Unity),
        }
    }
}

/// Options for averaging a visibility stream
#[derive(Builder, Debug, Clone, PartialEq)]
pub struct AveragingConfig {
    /// Rows more than this many seconds after the first row of an open
    /// accumulator close it.
    pub averaging_interval_seconds: f64,

    /// Rows whose uvw is further than this from the accumulator's mean uvw
    /// close it \[metres\]. `None` or zero disables the check.
    #[builder(default, setter(strip_option))]
    pub max_uvw_distance: Option<f64>,

    /// Leave the antennas out of the averaging key.
    #[builder(default = "false")]
    pub average_across_baselines: bool,

    /// Close an accumulator when the scan number changes.
    #[builder(default = "false")]
    pub break_on_scan: bool,

    /// Close an accumulator when the field id changes.
    #[builder(default = "false")]
    pub break_on_field: bool,

    /// How the observed column is averaged.
    #[builder(default = "ColumnWeighting::Weights")]
    pub observed_weighting: ColumnWeighting,

    /// Whether the corrected column is averaged when present.
    #[builder(default = "true")]
    pub average_corrected: bool,

    /// How the corrected column is averaged.
    #[builder(default = "ColumnWeighting::Weights")]
    pub corrected_weighting: ColumnWeighting,

    /// Whether the model column is averaged when present.
    #[builder(default = "true")]
    pub average_model: bool,

    /// How the model column is averaged.
    #[builder(default = "ColumnWeighting::Unity")]
    pub model_weighting: ColumnWeighting,
}

impl AveragingConfig {
    /// A configuration with the given interval and every other option at its
    /// default.
    pub fn new(averaging_interval_seconds: f64) -> Self {
        Self {
            averaging_interval_seconds,
            max_uvw_distance: None,
            average_across_baselines: false,
            break_on_scan: false,
            break_on_field: false,
            observed_weighting: ColumnWeighting::Weights,
            average_corrected: true,
            corrected_weighting: ColumnWeighting::Weights,
            average_model: true,
            model_weighting: ColumnWeighting::Unity,
        }
    }

    /// Check the parameters can drive an averager.
    ///
    /// # Errors
    ///
    /// [`AveragingError::Configuration`] if the interval is not positive, or the
    /// uvw distance is negative or NaN.
    pub fn validate(&self) -> Result<(), AveragingError> {
        let interval = self.averaging_interval_seconds;
        if interval.is_nan() || interval <= 0.0 {
            return Err(AveragingError::Configuration {
                option: "averaging_interval_seconds".into(),
                expected: "a positive number of seconds".into(),
                received: format!("{interval}"),
            });
        }
        if interval.is_infinite() {
            warn!("infinite averaging interval, each key will be averaged over whole chunks");
        }
        if let Some(distance) = self.max_uvw_distance {
            if distance.is_nan() || distance < 0.0 {
                return Err(AveragingError::Configuration {
                    option: "max_uvw_distance".into(),
                    expected: "a non-negative distance in metres".into(),
                    received: format!("{distance}"),
                });
            }
        }
        Ok(())
    }

    /// The uvw distance threshold, if the geometry check is enabled.
    pub fn uvw_distance_threshold(&self) -> Option<f64> {
        self.max_uvw_distance.filter(|&d| d > 0.0)
    }

    /// The data columns to average.
    pub fn column_plan(&self) -> ColumnPlan {
        ColumnPlan {
            observed: self.observed_weighting,
            corrected: self.average_corrected.then_some(self.corrected_weighting),
            model: self.average_model.then_some(self.model_weighting),
        }
    }

    /// A one line description of the averaging to be done.
    pub fn as_comment(&self) -> String {
        [
            Some(format!("{}s averaging", self.averaging_interval_seconds)),
            self.uvw_distance_threshold()
                .map(|d| format!("max uvw distance {d}m")),
            if self.average_across_baselines {
                Some("across baselines".to_string())
            } else {
                None
            },
            if self.break_on_scan {
                Some("scan boundaries".to_string())
            } else {
                None
            },
            if self.break_on_field {
                Some("field boundaries".to_string())
            } else {
                None
            },
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<String>>()
        .join(", ")
    }
}

impl Display for AveragingConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Will average over {} seconds.",
            self.averaging_interval_seconds
        )?;
        match self.uvw_distance_threshold() {
            Some(distance) => writeln!(f, "Will close averages beyond {distance} m in uvw.")?,
            None => writeln!(f, "Will not limit averages in uvw.")?,
        }
        writeln!(
            f,
            "{} average across baselines.",
            if self.average_across_baselines {
                "Will"
            } else {
                "Will not"
            }
        )?;
        writeln!(
            f,
            "{} close averages at scan changes.",
            if self.break_on_scan { "Will" } else { "Will not" }
        )?;
        writeln!(
            f,
            "{} close averages at field changes.",
            if self.break_on_field { "Will" } else { "Will not" }
        )?;
        let plan = self.column_plan();
        writeln!(f, "Observed data will be {}.", plan.observed)?;
        match plan.corrected {
            Some(weighting) => writeln!(f, "Corrected data will be {weighting}.")?,
            None => writeln!(f, "Corrected data will be dropped.")?,
        }
        match plan.model {
            Some(weighting) => writeln!(f, "Model data will be {weighting}.")?,
            None => writeln!(f, "Model data will be dropped.")?,
        }
        Ok(())
    }
}
