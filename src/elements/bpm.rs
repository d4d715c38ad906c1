use super::{unique_name, BeamElement, Element};
use crate::batch::{identity_maps, param, MapArray};
use crate::beam::Beam;
use crate::error::{shape, Result};
use crate::Float;
use ndarray::{stack, ArrayD, Axis};

/// Beam position monitor. Records the beam centroid every time a beam
/// passes and leaves the beam untouched.
#[derive(Debug, Clone)]
pub struct Bpm {
    pub is_active: bool,
    /// `(mu_x, mu_y)` of the last beam, shape `(*batch, 2)`. `None` after an
    /// empty beam or before the first one.
    pub reading: Option<ArrayD<Float>>,
    pub name: String,
}

impl Bpm {
    pub fn new(is_active: bool) -> Bpm {
        Bpm {
            is_active,
            reading: None,
            name: unique_name(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl BeamElement for Bpm {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(param(0.0))
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        Ok(identity_maps(energy.shape()))
    }

    fn track(&mut self, incoming: &Beam) -> Result<Beam> {
        self.reading = match (incoming.mu_x(), incoming.mu_y()) {
            (Some(mu_x), Some(mu_y)) => {
                let axis = Axis(mu_x.ndim());
                Some(stack(axis, &[mu_x.view(), mu_y.view()]).map_err(|e| shape(e.to_string()))?)
            }
            _ => None,
        };
        Ok(incoming.clone())
    }

    fn split(&self, _resolution: Float) -> Vec<Element> {
        vec![self.clone().into()]
    }

    fn broadcast(&self, _shape: &[usize]) -> Result<Element> {
        Ok(self.clone().into())
    }

    fn is_skippable(&self) -> bool {
        !self.is_active
    }

    fn is_linear(&self) -> bool {
        !self.is_active
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::beam::{BeamParameters, ParameterBeam};
    use crate::E_TOL;

    #[test]
    fn reading_is_the_centroid() {
        let beam: Beam = ParameterBeam::from_parameters(
            &BeamParameters::new().mu_x(vec![1e-3, 2e-3]).mu_y(-1e-3),
        )
        .unwrap()
        .into();
        let mut bpm = Bpm::new(true);
        bpm.track(&beam).unwrap();
        let reading = bpm.reading.clone().unwrap();
        assert_eq!(reading.shape(), &[2, 2]);
        assert!((reading[[1, 0]] - 2e-3).abs() < E_TOL);
        assert!((reading[[1, 1]] + 1e-3).abs() < E_TOL);

        bpm.track(&Beam::Empty).unwrap();
        assert!(bpm.reading.is_none());
    }
}
