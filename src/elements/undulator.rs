use super::maps::drift_matrix;
use super::{num_pieces, unique_name, BeamElement, Element};
use crate::batch::{all_zero, broadcast_view, map_batch, param, IntoParam, MapArray};
use crate::error::Result;
use crate::Float;
use ndarray::ArrayD;

/// Undulator, tracked as a drift of the same length.
#[derive(Debug, Clone)]
pub struct Undulator {
    pub length: ArrayD<Float>,
    pub is_active: bool,
    pub name: String,
}

impl Undulator {
    pub fn new(length: impl IntoParam, is_active: bool) -> Undulator {
        Undulator {
            length: param(length),
            is_active,
            name: unique_name(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl BeamElement for Undulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        map_batch([&self.length, energy], |[l, e]| drift_matrix(l, e))
    }

    fn split(&self, resolution: Float) -> Vec<Element> {
        if resolution <= 0.0 {
            return vec![self.clone().into()];
        }
        let n = num_pieces(&self.length, resolution);
        let piece = Undulator {
            length: &self.length / n as Float,
            ..self.clone()
        };
        vec![piece.into(); n]
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(Undulator {
            length: broadcast_view(&self.length, shape)?.to_owned(),
            ..self.clone()
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        all_zero(&self.length)
    }
}
