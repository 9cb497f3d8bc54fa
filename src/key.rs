//! Grouping identity for averaging.

use std::fmt::{Display, Formatter};

use crate::types::InputRow;

/// The identity rows are grouped by for averaging.
///
/// Antenna pairs are kept in the order the source delivers them: `(1, 2)` and
/// `(2, 1)` are distinct keys. Sources which want conjugate baselines averaged
/// together must canonicalise them upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AveragingKey {
    /// `(antenna1, antenna2)`, or `None` when averaging across baselines
    pub baseline: Option<(u32, u32)>,
    /// Spectral window / polarisation setup
    pub data_desc_id: u32,
    /// Array (sub-array) id
    pub array_id: i32,
    /// Observation id
    pub observation_id: i32,
}

impl Display for AveragingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.baseline {
            Some((ant1, ant2)) => write!(f, "baseline {ant1}-{ant2}")?,
            None => write!(f, "all baselines")?,
        }
        write!(
            f,
            ", ddid {}, array {}, obs {}",
            self.data_desc_id, self.array_id, self.observation_id
        )
    }
}

/// Maps input rows to their [`AveragingKey`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyMapper {
    average_across_baselines: bool,
}

impl KeyMapper {
    /// When `average_across_baselines` is set, the antennas are left out of the
    /// key so all baselines sharing a data description share one accumulator.
    pub const fn new(average_across_baselines: bool) -> Self {
        Self {
            average_across_baselines,
        }
    }

    /// Whether the antennas are left out of the key.
    pub const fn averages_across_baselines(&self) -> bool {
        self.average_across_baselines
    }

    /// The key of `row`. Pure: equal rows always give equal keys.
    pub fn key_of(&self, row: &InputRow) -> AveragingKey {
        AveragingKey {
            baseline: if self.average_across_baselines {
                None
            } else {
                Some((row.antenna1, row.antenna2))
            },
            data_desc_id: row.data_desc_id,
            array_id: row.ids.array_id,
            observation_id: row.ids.observation_id,
        }
    }
}
