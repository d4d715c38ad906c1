use super::{unique_name, BeamElement, Element};
use crate::batch::{identity_maps, param, MapArray};
use crate::error::Result;
use crate::Float;
use ndarray::ArrayD;

/// Named position in the lattice without any effect on the beam.
#[derive(Debug, Clone)]
pub struct Marker {
    pub name: String,
}

impl Marker {
    pub fn new() -> Marker {
        Marker {
            name: unique_name(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for Marker {
    fn default() -> Self {
        Self::new()
    }
}

impl BeamElement for Marker {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(param(0.0))
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        Ok(identity_maps(energy.shape()))
    }

    fn split(&self, _resolution: Float) -> Vec<Element> {
        vec![self.clone().into()]
    }

    fn broadcast(&self, _shape: &[usize]) -> Result<Element> {
        Ok(self.clone().into())
    }

    fn is_skippable(&self) -> bool {
        true
    }
}
