use crate::error::{EpiError, EpiResult};
use serde::{Deserialize, Serialize};

/// States sampled at the requested time points, optionally labelled by compartment.
///
/// Every state has the same length, and there is one state per time point.
/// Deserialization rejects payloads that break this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTrajectory")]
pub struct Trajectory {
    compartments: Vec<String>,
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
struct RawTrajectory {
    #[serde(default)]
    compartments: Vec<String>,
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

impl TryFrom<RawTrajectory> for Trajectory {
    type Error = EpiError;

    fn try_from(raw: RawTrajectory) -> EpiResult<Self> {
        if raw.states.len() != raw.times.len() {
            return Err(EpiError::shape(
                "trajectory states",
                raw.times.len(),
                raw.states.len(),
            ));
        }
        let dim = raw.states.first().map_or(raw.compartments.len(), Vec::len);
        if let Some(state) = raw.states.iter().find(|state| state.len() != dim) {
            return Err(EpiError::shape("trajectory state", dim, state.len()));
        }
        if !raw.compartments.is_empty() && raw.compartments.len() != dim {
            return Err(EpiError::shape(
                "trajectory compartments",
                dim,
                raw.compartments.len(),
            ));
        }
        Ok(Trajectory {
            compartments: raw.compartments,
            times: raw.times,
            states: raw.states,
        })
    }
}

impl Trajectory {
    pub(crate) fn new(times: Vec<f64>, states: Vec<Vec<f64>>) -> Self {
        Self {
            compartments: Vec::new(),
            times,
            states,
        }
    }

    pub(crate) fn with_compartments(mut self, compartments: Vec<String>) -> Self {
        self.compartments = compartments;
        self
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn compartments(&self) -> &[String] {
        &self.compartments
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    pub fn state(&self, index: usize) -> Option<&[f64]> {
        self.states.get(index).map(Vec::as_slice)
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &[f64])> {
        self.times
            .iter()
            .copied()
            .zip(self.states.iter().map(Vec::as_slice))
    }

    /// Time series of one compartment by index.
    pub fn series(&self, index: usize) -> EpiResult<Vec<f64>> {
        let dim = self.states.first().map_or(0, Vec::len);
        if index >= dim {
            return Err(EpiError::unknown(format!("#{index}")));
        }
        Ok(self.states.iter().map(|state| state[index]).collect())
    }

    /// Time series of one compartment by label.
    pub fn series_by_label(&self, label: &str) -> EpiResult<Vec<f64>> {
        let index = self
            .compartments
            .iter()
            .position(|c| c == label)
            .ok_or_else(|| EpiError::unknown(label))?;
        self.series(index)
    }

    /// Sum over all compartments at every sampled time.
    pub fn totals(&self) -> Vec<f64> {
        self.states.iter().map(|state| state.iter().sum()).collect()
    }
}
